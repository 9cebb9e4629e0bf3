//! Action extraction and the per-step agent machinery.
//!
//! - `extract` - recover exactly one structured action from raw model text
//! - `PromptContext` - ephemeral snapshot of session state for one prompt
//! - `AgentStep` - one completion + one extraction, with usage accounting
//! - `Agent` / `AgentRegistry` - closed set of agent variants keyed by name

pub mod context;
pub mod extract;
pub mod prompt;
pub mod registry;
pub mod step;

pub use context::PromptContext;
pub use extract::{ExtractError, extract};
pub use registry::{Agent, AgentRegistry, TaskAgent};
pub use step::{AgentStep, StepError};
