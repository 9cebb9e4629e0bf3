//! Prompt assembly for the task agent.

use std::fmt::Write as _;

use crate::PromptContext;

const INSTRUCTIONS: &str = "\
You are an autonomous agent working on the task below inside a sandboxed \
workspace. On every turn, reply with exactly one JSON object describing \
your next action. Available actions:

  {\"action\": \"run\", \"command\": \"<shell command>\", \"background\": false}
  {\"action\": \"kill\", \"id\": <background command id>}
  {\"action\": \"think\", \"thought\": \"<internal reasoning>\"}
  {\"action\": \"talk\", \"content\": \"<message to the user>\"}
  {\"action\": \"finish\"}

Send `finish` once the task is complete. Do not wrap the JSON in markdown.";

/// Render the task agent's prompt from a context snapshot.
pub(crate) fn build_task_prompt(ctx: &PromptContext) -> String {
    let mut out = String::new();
    out.push_str(INSTRUCTIONS);
    let _ = write!(out, "\n\nTask:\n{}\n", ctx.task);

    if !ctx.delegates.is_empty() {
        let _ = write!(out, "\nDelegate agents: {}\n", ctx.delegates.join(", "));
    }

    if !ctx.history.is_empty() {
        out.push_str("\nHistory so far (oldest first):\n");
        for (action, observation) in &ctx.history {
            if !action.is_null() {
                if let Ok(line) = serde_json::to_string(action) {
                    let _ = writeln!(out, "{line}");
                }
            }
            if !observation.is_null() {
                if let Ok(line) = serde_json::to_string(observation) {
                    let _ = writeln!(out, "{line}");
                }
            }
        }
    }

    if let Some(message) = ctx.latest_user_message() {
        let _ = write!(out, "\nLatest user message:\n{message}\n");
    }

    out.push_str("\nWhat is your next action?");
    out
}

#[cfg(test)]
mod tests {
    use devloop_core::{Action, Observation};

    use super::*;

    #[test]
    fn prompt_carries_task_and_history() {
        let ctx = PromptContext {
            task: "list files".into(),
            history: vec![(
                Action::Run {
                    command: "ls".into(),
                    background: false,
                },
                Observation::CmdOutput {
                    command_id: 1,
                    command: "ls".into(),
                    exit_code: 0,
                    output: "a.txt".into(),
                },
            )],
            delegates: vec!["task".into()],
        };
        let prompt = build_task_prompt(&ctx);
        assert!(prompt.contains("list files"));
        assert!(prompt.contains(r#""command":"ls""#));
        assert!(prompt.contains("Delegate agents: task"));
    }

    #[test]
    fn null_turns_are_omitted_from_history() {
        let ctx = PromptContext {
            task: "t".into(),
            history: vec![(Action::Null, Observation::Null)],
            delegates: vec![],
        };
        let prompt = build_task_prompt(&ctx);
        assert!(!prompt.contains(r#""action":"null""#));
    }
}
