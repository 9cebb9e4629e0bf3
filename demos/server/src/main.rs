//! Standalone session server.
//!
//! Run with: cargo run -p devloop-server-demo
//!
//! Fetch a session token from `GET /token`, then connect to
//! `ws://localhost:3000/ws?token=...` and drive the protocol:
//! `initialize`, `start`, `chat`.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use devloop_agent::AgentRegistry;
use devloop_core::{CommandManager, SessionConfig};
use devloop_executor::ShellCommandManager;
use devloop_model::{CompletionTransport, HttpTransport, RetryPolicy};
use devloop_transport::{
    BackendFactory, ConfigurationError, Gateway, ModelFactory, mint_session_token, router,
};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// Backend factory running commands directly on the host.
struct ShellBackendFactory;

#[async_trait]
impl BackendFactory for ShellBackendFactory {
    async fn command_manager(
        &self,
        config: &SessionConfig,
    ) -> Result<Arc<dyn CommandManager>, ConfigurationError> {
        let manager = ShellCommandManager::new(&config.working_dir)
            .map_err(|e| ConfigurationError(e.to_string()))?;
        Ok(Arc::new(manager))
    }
}

/// Model factory building an OpenAI-compatible HTTP transport.
struct HttpModelFactory;

impl ModelFactory for HttpModelFactory {
    fn transport(
        &self,
        config: &SessionConfig,
    ) -> Result<Arc<dyn CompletionTransport>, ConfigurationError> {
        let api_base = config
            .api_base
            .clone()
            .or_else(|| std::env::var("API_BASE").ok())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("API_KEY").ok());
        Ok(Arc::new(HttpTransport::new(
            api_base,
            api_key,
            config.model.clone(),
        )))
    }
}

/// Development convenience: mint a token for a fresh session id.
async fn token_handler(State(gateway): State<Arc<Gateway>>) -> impl IntoResponse {
    let sid = Uuid::new_v4().to_string();
    match mint_session_token(&sid, &gateway.jwt_secret) {
        Ok(token) => Json(serde_json::json!({ "sid": sid, "token": token })).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "token minting failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn gateway_from_env() -> Gateway {
    let jwt_secret = std::env::var("JWT_SECRET").unwrap_or_else(|_| "5ecRe7".to_string());
    let mut defaults = SessionConfig::default();
    if let Ok(dir) = std::env::var("WORKSPACE_DIR") {
        defaults.working_dir = dir.into();
    }
    if let Ok(model) = std::env::var("MODEL") {
        defaults.model = model;
    }
    let max_steps = std::env::var("MAX_STEPS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(100);

    Gateway {
        jwt_secret: jwt_secret.into_bytes(),
        defaults,
        retry: RetryPolicy::default(),
        max_steps,
        registry: AgentRegistry::default(),
        backends: Arc::new(ShellBackendFactory),
        models: Arc::new(HttpModelFactory),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let gateway = Arc::new(gateway_from_env());

    // Build router
    let app = Router::new()
        .route("/token", get(token_handler))
        .with_state(Arc::clone(&gateway))
        .merge(router(gateway))
        .layer(CorsLayer::permissive());

    // Start server
    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    tracing::info!("Server listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
