//! The control loop state machine.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

use devloop_agent::{Agent, PromptContext};
use devloop_core::{Action, AgentEvent, CommandManager, EventStream, Observation, UsageMeter};

/// Scheduling state of a control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// No task scheduled.
    Idle,
    /// The loop task is executing steps.
    Running,
    /// Cancelled externally while running; no further steps execute.
    Suspended,
    /// Finished, failed, or exhausted its step budget.
    Terminated,
}

/// Control loop error.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("a task is already running")]
    AlreadyRunning,
}

/// Drives one session: repeatedly invokes the agent, applies the
/// resulting action through the command backend, and emits events.
///
/// At most one loop task is active at a time; a second `start` is
/// rejected synchronously, never queued. Null actions and observations
/// are swallowed before the event stream.
pub struct ControlLoop {
    sid: String,
    agent: Box<dyn Agent>,
    commands: Arc<dyn CommandManager>,
    events: Arc<EventStream>,
    delegates: Vec<String>,
    usage: UsageMeter,
    max_steps: u32,
    state: Mutex<LoopState>,
    history: Mutex<Vec<(Action, Observation)>>,
    cancel: watch::Sender<bool>,
}

impl ControlLoop {
    #[must_use]
    pub fn new(
        sid: impl Into<String>,
        agent: Box<dyn Agent>,
        commands: Arc<dyn CommandManager>,
        events: Arc<EventStream>,
        delegates: Vec<String>,
        max_steps: u32,
    ) -> Arc<Self> {
        let (cancel, _) = watch::channel(false);
        Arc::new(Self {
            sid: sid.into(),
            agent,
            commands,
            events,
            delegates,
            usage: UsageMeter::default(),
            max_steps,
            state: Mutex::new(LoopState::Idle),
            history: Mutex::new(Vec::new()),
            cancel,
        })
    }

    /// Current scheduling state.
    #[must_use]
    pub fn state(&self) -> LoopState {
        *self.state.lock().unwrap()
    }

    /// Characters exchanged with the model so far.
    #[must_use]
    pub fn usage_chars(&self) -> u64 {
        self.usage.chars()
    }

    /// The event stream this loop writes to.
    #[must_use]
    pub fn events(&self) -> &Arc<EventStream> {
        &self.events
    }

    /// Append an action/observation pair to history (used by the
    /// gateway for user chat messages as well as by the loop itself).
    pub fn add_history(&self, action: Action, observation: Observation) {
        self.history.lock().unwrap().push((action, observation));
    }

    /// Schedule the loop task for `task`.
    ///
    /// # Errors
    /// [`ControlError::AlreadyRunning`] when a task is active; the
    /// running task is not disturbed.
    pub fn start(self: &Arc<Self>, task: String) -> Result<JoinHandle<()>, ControlError> {
        {
            let mut state = self.state.lock().unwrap();
            if *state == LoopState::Running {
                return Err(ControlError::AlreadyRunning);
            }
            *state = LoopState::Running;
        }
        // a restarted loop must not observe a stale cancellation
        let _ = self.cancel.send(false);

        let this = Arc::clone(self);
        let span = tracing::info_span!("control_loop", sid = %self.sid);
        Ok(tokio::spawn(this.run(task).instrument(span)))
    }

    /// Request cooperative cancellation. The loop observes the signal at
    /// the top of its next iteration; an in-flight model call completes
    /// first and its usage is still accounted.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    fn set_state(&self, state: LoopState) {
        *self.state.lock().unwrap() = state;
    }

    fn emit(&self, event: AgentEvent) {
        let null = match &event {
            AgentEvent::Action(a) => a.is_null(),
            AgentEvent::Observation(o) => o.is_null(),
        };
        if !null {
            self.events.push(event);
        }
    }

    fn snapshot(&self, task: &str) -> PromptContext {
        PromptContext {
            task: task.to_string(),
            history: self.history.lock().unwrap().clone(),
            delegates: self.delegates.clone(),
        }
    }

    async fn apply(&self, action: &Action) -> Observation {
        match action {
            Action::Run {
                command,
                background,
            } => self.commands.run(command, *background).await,
            Action::Kill { id } => self.commands.kill(*id).await,
            Action::Null | Action::Think { .. } | Action::Talk { .. } | Action::Finish => {
                Observation::Null
            }
        }
    }

    async fn run(self: Arc<Self>, task: String) {
        let cancel = self.cancel.subscribe();
        self.add_history(
            Action::Null,
            Observation::UserMessage {
                message: task.clone(),
            },
        );

        for step in 0..self.max_steps {
            if *cancel.borrow() {
                tracing::info!(step, "loop cancelled");
                self.set_state(LoopState::Suspended);
                return;
            }

            let ctx = self.snapshot(&task);
            let action = match self.agent.step(&ctx, &self.usage).await {
                Ok(action) => action,
                Err(e) => {
                    tracing::warn!(error = %e, "agent step failed");
                    self.emit(AgentEvent::Observation(Observation::Error {
                        message: e.to_string(),
                    }));
                    self.set_state(LoopState::Terminated);
                    return;
                }
            };

            self.emit(AgentEvent::Action(action.clone()));
            let observation = self.apply(&action).await;
            self.emit(AgentEvent::Observation(observation.clone()));

            let finished = matches!(action, Action::Finish);
            self.add_history(action, observation);

            if finished {
                tracing::info!(step, chars = self.usage.chars(), "task finished");
                self.set_state(LoopState::Terminated);
                return;
            }
        }

        self.emit(AgentEvent::Observation(Observation::Error {
            message: format!("step budget of {} exhausted", self.max_steps),
        }));
        self.set_state(LoopState::Terminated);
    }
}
