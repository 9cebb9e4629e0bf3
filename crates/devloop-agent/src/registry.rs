//! Closed set of agent variants, resolved by name.

use std::collections::HashMap;

use async_trait::async_trait;

use devloop_core::{Action, UsageMeter};
use devloop_model::ModelClient;

use crate::{AgentStep, PromptContext, StepError, prompt::build_task_prompt};

/// The capability every agent variant provides: one action per context.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Registry key of this variant.
    fn name(&self) -> &'static str;

    /// Produce exactly one action from the given context snapshot.
    async fn step(&self, ctx: &PromptContext, usage: &UsageMeter) -> Result<Action, StepError>;
}

/// The default agent: renders the task prompt and runs one step.
pub struct TaskAgent {
    step: AgentStep,
}

impl TaskAgent {
    #[must_use]
    pub fn new(model: ModelClient) -> Self {
        Self {
            step: AgentStep::new(model),
        }
    }
}

#[async_trait]
impl Agent for TaskAgent {
    fn name(&self) -> &'static str {
        "task"
    }

    async fn step(&self, ctx: &PromptContext, usage: &UsageMeter) -> Result<Action, StepError> {
        let prompt = build_task_prompt(ctx);
        self.step.run(&prompt, usage).await
    }
}

type AgentCtor = fn(ModelClient) -> Box<dyn Agent>;

/// Registry mapping agent names to constructors.
///
/// Resolution happens once, at session construction; there is no
/// runtime type lookup afterwards.
pub struct AgentRegistry {
    ctors: HashMap<&'static str, AgentCtor>,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        let mut registry = Self {
            ctors: HashMap::new(),
        };
        registry.register("task", |model| Box::new(TaskAgent::new(model)));
        registry
    }
}

impl AgentRegistry {
    /// Register a variant under a name. Later registrations win.
    pub fn register(&mut self, name: &'static str, ctor: AgentCtor) {
        self.ctors.insert(name, ctor);
    }

    /// Construct the named variant, or `None` if unknown.
    #[must_use]
    pub fn resolve(&self, name: &str, model: ModelClient) -> Option<Box<dyn Agent>> {
        self.ctors.get(name).map(|ctor| ctor(model))
    }

    /// Names of all registered variants, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.ctors.keys().map(ToString::to_string).collect();
        names.sort();
        names
    }
}
