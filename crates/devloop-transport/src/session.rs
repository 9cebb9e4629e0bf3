//! One client connection bound to at most one control loop.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use devloop_agent::AgentRegistry;
use devloop_core::{Action, CommandManager, EventStream, Observation, SessionConfig};
use devloop_model::{CompletionTransport, ModelClient, RetryPolicy};
use devloop_session::{ControlError, ControlLoop, LoopState};

use crate::protocol::{ChatArgs, ClientMessage, InitializeArgs, ServerMessage, StartArgs};

/// Controller-construction failure, surfaced once as a client-visible
/// error event; the session stays alive.
#[derive(Debug, Error)]
#[error("configuration error: {0}")]
pub struct ConfigurationError(pub String);

/// Builds the command-execution backend for a session.
#[async_trait]
pub trait BackendFactory: Send + Sync {
    /// Construct a backend for the given configuration.
    async fn command_manager(
        &self,
        config: &SessionConfig,
    ) -> Result<Arc<dyn CommandManager>, ConfigurationError>;
}

/// Builds the model-completion transport for a session.
pub trait ModelFactory: Send + Sync {
    /// Construct a transport for the given configuration.
    fn transport(
        &self,
        config: &SessionConfig,
    ) -> Result<Arc<dyn CompletionTransport>, ConfigurationError>;
}

/// Process-wide gateway configuration shared by all sessions.
pub struct Gateway {
    pub jwt_secret: Vec<u8>,
    pub defaults: SessionConfig,
    pub retry: RetryPolicy,
    pub max_steps: u32,
    pub registry: AgentRegistry,
    pub backends: Arc<dyn BackendFactory>,
    pub models: Arc<dyn ModelFactory>,
}

/// The durable binding between one client connection and one control
/// loop. Translates protocol messages into control commands and agent
/// events into client-visible messages.
pub struct Session {
    sid: String,
    gateway: Arc<Gateway>,
    outbound: mpsc::UnboundedSender<ServerMessage>,
    controller: Option<Arc<ControlLoop>>,
    loop_task: Option<JoinHandle<()>>,
    forward_task: Option<JoinHandle<()>>,
}

impl Session {
    #[must_use]
    pub fn new(
        sid: impl Into<String>,
        gateway: Arc<Gateway>,
        outbound: mpsc::UnboundedSender<ServerMessage>,
    ) -> Self {
        Self {
            sid: sid.into(),
            gateway,
            outbound,
            controller: None,
            loop_task: None,
            forward_task: None,
        }
    }

    /// Session id from the verified credential.
    #[must_use]
    pub fn sid(&self) -> &str {
        &self.sid
    }

    /// Handle one raw text frame from the client.
    pub async fn handle_text(&mut self, text: &str) {
        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(_) => {
                self.send(ServerMessage::error("Invalid JSON"));
                return;
            }
        };
        let Some(action) = value.get("action").and_then(|a| a.as_str()).map(String::from) else {
            self.send(ServerMessage::error("Invalid event"));
            return;
        };
        match serde_json::from_value::<ClientMessage>(value) {
            Ok(msg) => self.handle_message(msg).await,
            Err(e) => {
                if matches!(action.as_str(), "initialize" | "start" | "chat") {
                    self.send(ServerMessage::error(format!(
                        "Invalid {action} request: {e}"
                    )));
                } else {
                    self.send(ServerMessage::error(format!(
                        "I didn't recognize this action: {action}"
                    )));
                }
            }
        }
    }

    /// Handle one parsed protocol message.
    pub async fn handle_message(&mut self, msg: ClientMessage) {
        match msg {
            ClientMessage::Initialize { args } => self.initialize(args).await,
            ClientMessage::Start { args } => self.start(args),
            ClientMessage::Chat { args } => self.chat(&args),
        }
    }

    /// Tear down on disconnect: cancel any in-flight loop and stop
    /// forwarding. Subsequent sends are no-ops.
    pub fn disconnect(&mut self) {
        if let Some(controller) = &self.controller {
            controller.cancel();
        }
        if let Some(task) = self.forward_task.take() {
            task.abort();
        }
        self.loop_task = None;
        tracing::info!(sid = %self.sid, "session disconnected");
    }

    async fn initialize(&mut self, args: InitializeArgs) {
        if self
            .controller
            .as_ref()
            .is_some_and(|c| c.state() == LoopState::Running)
        {
            self.send(ServerMessage::error(
                "Cannot re-initialize while a task is running",
            ));
            return;
        }

        let config = self.merged_config(args);

        let transport = match self.gateway.models.transport(&config) {
            Ok(t) => t,
            Err(e) => {
                self.send(ServerMessage::error(format!("Error creating controller: {e}")));
                return;
            }
        };
        let model = ModelClient::new(transport, self.gateway.retry.clone());

        let Some(agent) = self.gateway.registry.resolve(&config.agent, model) else {
            self.send(ServerMessage::error(format!(
                "Unknown agent class: {}",
                config.agent
            )));
            return;
        };

        let commands = match self.gateway.backends.command_manager(&config).await {
            Ok(c) => c,
            Err(e) => {
                self.send(ServerMessage::error(format!("Error creating controller: {e}")));
                return;
            }
        };

        let events = Arc::new(EventStream::new());
        let controller = ControlLoop::new(
            self.sid.clone(),
            agent,
            commands,
            Arc::clone(&events),
            self.gateway.registry.names(),
            self.gateway.max_steps,
        );

        if let Some(task) = self.forward_task.take() {
            task.abort();
        }
        self.forward_task = Some(Self::spawn_forwarder(&events, self.outbound.clone()));
        self.controller = Some(controller);

        tracing::info!(sid = %self.sid, agent = %config.agent, model = %config.model, "controller created");
        self.send(ServerMessage::initialized());
    }

    fn start(&mut self, args: StartArgs) {
        let Some(task) = args.task else {
            self.send(ServerMessage::error("No task specified"));
            return;
        };
        let Some(controller) = &self.controller else {
            self.send(ServerMessage::error(
                "No agent started. Please wait a second...",
            ));
            return;
        };

        self.send(ServerMessage::info("Starting new task..."));
        match controller.start(task) {
            Ok(handle) => self.loop_task = Some(handle),
            Err(ControlError::AlreadyRunning) => {
                self.send(ServerMessage::error("A task is already running"));
            }
        }
    }

    fn chat(&mut self, args: &ChatArgs) {
        match &self.controller {
            Some(controller) => controller.add_history(
                Action::Null,
                Observation::UserMessage {
                    message: args.message.clone(),
                },
            ),
            None => self.send(ServerMessage::error(
                "No agent started. Please wait a second...",
            )),
        }
    }

    fn merged_config(&self, args: InitializeArgs) -> SessionConfig {
        let mut config = self.gateway.defaults.clone();
        if let Some(directory) = args.directory {
            config.working_dir = directory.into();
        }
        if let Some(agent) = args.agent {
            config.agent = agent;
        }
        if let Some(model) = args.model {
            config.model = model;
        }
        if let Some(api_key) = args.api_key {
            config.api_key = Some(api_key);
        }
        if let Some(api_base) = args.api_base {
            config.api_base = Some(api_base);
        }
        if let Some(image) = args.container_image {
            config.container_image = image;
        }
        config
    }

    /// Forward agent events to the outbound channel in production order.
    fn spawn_forwarder(
        events: &Arc<EventStream>,
        outbound: mpsc::UnboundedSender<ServerMessage>,
    ) -> JoinHandle<()> {
        let mut rx = events.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if outbound.send(ServerMessage::Event(event)).is_err() {
                            tracing::debug!("client channel closed, stopping event forwarding");
                            return;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "event forwarder lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                }
            }
        })
    }

    fn send(&self, msg: ServerMessage) {
        if self.outbound.send(msg).is_err() {
            tracing::debug!(sid = %self.sid, "dropping message for disconnected client");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use devloop_core::AgentEvent;
    use devloop_model::{Completion, Message, ModelError};

    use super::*;

    /// Transport replaying scripted replies in order. When gated, every
    /// completion blocks until the gate is notified.
    struct ScriptedTransport {
        replies: StdMutex<VecDeque<String>>,
        gate: Option<Arc<tokio::sync::Notify>>,
    }

    impl ScriptedTransport {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                replies: StdMutex::new(replies.iter().map(ToString::to_string).collect()),
                gate: None,
            })
        }

        fn gated(replies: &[&str], gate: Arc<tokio::sync::Notify>) -> Arc<Self> {
            Arc::new(Self {
                replies: StdMutex::new(replies.iter().map(ToString::to_string).collect()),
                gate: Some(gate),
            })
        }
    }

    #[async_trait]
    impl CompletionTransport for ScriptedTransport {
        async fn complete(&self, _messages: &[Message]) -> Result<Completion, ModelError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| r#"{"action":"finish"}"#.to_string());
            Ok(Completion {
                content: reply,
                usage: None,
            })
        }
    }

    struct StubModelFactory {
        transport: Arc<ScriptedTransport>,
    }

    impl ModelFactory for StubModelFactory {
        fn transport(
            &self,
            _config: &SessionConfig,
        ) -> Result<Arc<dyn CompletionTransport>, ConfigurationError> {
            Ok(Arc::clone(&self.transport) as Arc<dyn CompletionTransport>)
        }
    }

    #[derive(Default)]
    struct RecordingManager {
        calls: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl CommandManager for RecordingManager {
        async fn run(&self, command: &str, _background: bool) -> Observation {
            self.calls.lock().unwrap().push(command.to_string());
            Observation::CmdOutput {
                command_id: 1,
                command: command.to_string(),
                exit_code: 0,
                output: "ok".into(),
            }
        }

        async fn kill(&self, id: u64) -> Observation {
            self.calls.lock().unwrap().push(format!("kill {id}"));
            Observation::Null
        }
    }

    struct StubBackendFactory {
        manager: Arc<RecordingManager>,
        fail: bool,
    }

    #[async_trait]
    impl BackendFactory for StubBackendFactory {
        async fn command_manager(
            &self,
            _config: &SessionConfig,
        ) -> Result<Arc<dyn CommandManager>, ConfigurationError> {
            if self.fail {
                return Err(ConfigurationError("backend unavailable".into()));
            }
            Ok(Arc::clone(&self.manager) as Arc<dyn CommandManager>)
        }
    }

    struct Harness {
        session: Session,
        rx: mpsc::UnboundedReceiver<ServerMessage>,
        manager: Arc<RecordingManager>,
    }

    fn harness(replies: &[&str]) -> Harness {
        harness_with(ScriptedTransport::new(replies), false)
    }

    fn harness_with(transport: Arc<ScriptedTransport>, backend_fails: bool) -> Harness {
        let manager = Arc::new(RecordingManager::default());
        let gateway = Arc::new(Gateway {
            jwt_secret: b"secret".to_vec(),
            defaults: SessionConfig::default(),
            retry: RetryPolicy::default(),
            max_steps: 16,
            registry: AgentRegistry::default(),
            backends: Arc::new(StubBackendFactory {
                manager: Arc::clone(&manager),
                fail: backend_fails,
            }),
            models: Arc::new(StubModelFactory { transport }),
        });
        let (tx, rx) = mpsc::unbounded_channel();
        Harness {
            session: Session::new("sid-1", gateway, tx),
            rx,
            manager,
        }
    }

    async fn next_message(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> ServerMessage {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for message")
            .expect("channel closed")
    }

    fn initialize_msg(directory: &str) -> ClientMessage {
        serde_json::from_value(serde_json::json!({
            "action": "initialize",
            "args": {"directory": directory}
        }))
        .unwrap()
    }

    fn start_msg(task: &str) -> ClientMessage {
        serde_json::from_value(serde_json::json!({
            "action": "start",
            "args": {"task": task}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn end_to_end_initialize_start_run() {
        let mut h = harness(&[
            "Sure! {\"action\":\"run\",\"command\":\"ls\"}",
            r#"{"action":"finish"}"#,
        ]);

        h.session.handle_message(initialize_msg("/tmp/x")).await;
        assert_eq!(next_message(&mut h.rx).await, ServerMessage::initialized());

        h.session.handle_message(start_msg("list files")).await;
        assert_eq!(
            next_message(&mut h.rx).await,
            ServerMessage::info("Starting new task...")
        );

        // exactly one run action with command "ls", then its output
        let run = next_message(&mut h.rx).await;
        assert_eq!(
            run,
            ServerMessage::Event(AgentEvent::Action(Action::Run {
                command: "ls".into(),
                background: false
            }))
        );
        let output = next_message(&mut h.rx).await;
        assert!(matches!(
            output,
            ServerMessage::Event(AgentEvent::Observation(Observation::CmdOutput { .. }))
        ));
        let finish = next_message(&mut h.rx).await;
        assert_eq!(
            finish,
            ServerMessage::Event(AgentEvent::Action(Action::Finish))
        );

        assert_eq!(h.manager.calls.lock().unwrap().as_slice(), ["ls"]);
    }

    #[tokio::test]
    async fn prose_only_reply_yields_one_error_event_and_terminates() {
        let mut h = harness(&["I cannot help with that."]);

        h.session.handle_message(initialize_msg("/tmp/x")).await;
        next_message(&mut h.rx).await; // initialize ack
        h.session.handle_message(start_msg("do something")).await;
        next_message(&mut h.rx).await; // starting info

        let err = next_message(&mut h.rx).await;
        assert!(matches!(
            err,
            ServerMessage::Event(AgentEvent::Observation(Observation::Error { ref message }))
                if message.contains("no complete JSON object")
        ));

        // the loop terminated and no action ever reached the executor
        let controller = h.session.controller.as_ref().unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while controller.state() != LoopState::Terminated {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(h.manager.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn start_without_initialize_is_one_error_event() {
        let mut h = harness(&[]);

        h.session.handle_message(start_msg("task")).await;

        // "Starting new task..." is never sent; the only message is the error
        let msg = next_message(&mut h.rx).await;
        assert_eq!(
            msg,
            ServerMessage::error("No agent started. Please wait a second...")
        );
        assert!(h.rx.try_recv().is_err());
        assert!(h.session.loop_task.is_none());
    }

    #[tokio::test]
    async fn start_without_task_is_rejected() {
        let mut h = harness(&[]);
        h.session.handle_message(initialize_msg("/tmp/x")).await;
        next_message(&mut h.rx).await;

        h.session
            .handle_message(serde_json::from_str(r#"{"action":"start","args":{}}"#).unwrap())
            .await;
        assert_eq!(
            next_message(&mut h.rx).await,
            ServerMessage::error("No task specified")
        );
    }

    #[tokio::test]
    async fn second_start_while_running_is_rejected() {
        // gate the model call so the first task is still running when
        // the second start arrives
        let gate = Arc::new(tokio::sync::Notify::new());
        let mut h = harness_with(
            ScriptedTransport::gated(&[r#"{"action":"finish"}"#], Arc::clone(&gate)),
            false,
        );

        h.session.handle_message(initialize_msg("/tmp/x")).await;
        next_message(&mut h.rx).await;

        h.session.handle_message(start_msg("first")).await;
        next_message(&mut h.rx).await; // starting info
        tokio::task::yield_now().await;

        h.session.handle_message(start_msg("second")).await;
        next_message(&mut h.rx).await; // starting info for the attempt
        assert_eq!(
            next_message(&mut h.rx).await,
            ServerMessage::error("A task is already running")
        );

        gate.notify_one();
        if let Some(task) = h.session.loop_task.take() {
            task.await.unwrap();
        }
    }

    #[tokio::test]
    async fn chat_before_initialize_is_rejected() {
        let mut h = harness(&[]);
        h.session
            .handle_message(
                serde_json::from_str(r#"{"action":"chat","args":{"message":"hi"}}"#).unwrap(),
            )
            .await;
        assert_eq!(
            next_message(&mut h.rx).await,
            ServerMessage::error("No agent started. Please wait a second...")
        );
    }

    #[tokio::test]
    async fn backend_failure_keeps_session_alive() {
        let mut h = harness_with(ScriptedTransport::new(&[]), true);

        h.session.handle_message(initialize_msg("/tmp/x")).await;
        let msg = next_message(&mut h.rx).await;
        assert!(matches!(
            msg,
            ServerMessage::Error { ref message, .. }
                if message.contains("Error creating controller")
        ));

        // the session still answers protocol messages afterwards
        h.session.handle_message(start_msg("task")).await;
        assert_eq!(
            next_message(&mut h.rx).await,
            ServerMessage::error("No agent started. Please wait a second...")
        );
    }

    #[tokio::test]
    async fn unknown_action_text_is_rejected() {
        let mut h = harness(&[]);
        h.session.handle_text(r#"{"action":"reboot"}"#).await;
        let msg = next_message(&mut h.rx).await;
        assert_eq!(
            msg,
            ServerMessage::error("I didn't recognize this action: reboot")
        );
    }

    #[tokio::test]
    async fn invalid_json_text_is_rejected() {
        let mut h = harness(&[]);
        h.session.handle_text("not json").await;
        assert_eq!(next_message(&mut h.rx).await, ServerMessage::error("Invalid JSON"));
    }

    #[tokio::test]
    async fn missing_action_field_is_rejected() {
        let mut h = harness(&[]);
        h.session.handle_text(r#"{"args":{}}"#).await;
        assert_eq!(next_message(&mut h.rx).await, ServerMessage::error("Invalid event"));
    }

    #[tokio::test]
    async fn disconnect_cancels_the_loop() {
        // gate the model call so the loop is mid-step at disconnect
        let gate = Arc::new(tokio::sync::Notify::new());
        let mut h = harness_with(
            ScriptedTransport::gated(
                &[
                    r#"{"action":"think","thought":"one"}"#,
                    r#"{"action":"think","thought":"two"}"#,
                ],
                Arc::clone(&gate),
            ),
            false,
        );

        h.session.handle_message(initialize_msg("/tmp/x")).await;
        next_message(&mut h.rx).await;
        h.session.handle_message(start_msg("task")).await;
        next_message(&mut h.rx).await; // starting info
        tokio::task::yield_now().await;

        h.session.disconnect();
        let controller = Arc::clone(h.session.controller.as_ref().unwrap());

        // the in-flight step completes, then the loop suspends
        gate.notify_one();
        tokio::time::timeout(Duration::from_secs(5), async {
            while controller.state() == LoopState::Running {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(controller.state(), LoopState::Suspended);
    }

    #[tokio::test]
    async fn chat_is_recorded_in_history() {
        let mut h = harness(&[r#"{"action":"finish"}"#]);
        h.session.handle_message(initialize_msg("/tmp/x")).await;
        next_message(&mut h.rx).await;

        h.session
            .handle_message(
                serde_json::from_str(r#"{"action":"chat","args":{"message":"please hurry"}}"#)
                    .unwrap(),
            )
            .await;
        // no error, no event: the null action and its user message are
        // history-only until the next prompt renders them
        assert!(h.rx.try_recv().is_err());
    }
}
