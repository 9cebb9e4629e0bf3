//! `sh -c` command manager with background job tracking.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    process::Stdio,
    sync::atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::{process::Command, sync::Mutex};

use devloop_core::{CommandManager, Observation};

/// Backend construction error.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("failed to prepare working directory {path}: {source}")]
    WorkingDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Command manager running everything through `sh -c` in one working
/// directory. Background jobs are numbered; ids are unique per manager.
pub struct ShellCommandManager {
    working_dir: PathBuf,
    next_id: AtomicU64,
    jobs: Mutex<HashMap<u64, tokio::process::Child>>,
}

impl ShellCommandManager {
    /// Create a manager rooted at `working_dir`, creating it if missing.
    ///
    /// # Errors
    /// [`ExecutorError::WorkingDir`] when the directory cannot be created.
    pub fn new(working_dir: impl AsRef<Path>) -> Result<Self, ExecutorError> {
        let working_dir = working_dir.as_ref().to_path_buf();
        if !working_dir.exists() {
            tracing::info!(path = %working_dir.display(), "creating working directory");
            std::fs::create_dir_all(&working_dir).map_err(|source| ExecutorError::WorkingDir {
                path: working_dir.clone(),
                source,
            })?;
        }
        Ok(Self {
            working_dir,
            next_id: AtomicU64::new(1),
            jobs: Mutex::new(HashMap::new()),
        })
    }

    fn command(&self, command: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    async fn run_foreground(&self, id: u64, command: &str) -> Observation {
        match self.command(command).output().await {
            Ok(output) => {
                let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                text.push_str(&String::from_utf8_lossy(&output.stderr));
                Observation::CmdOutput {
                    command_id: id,
                    command: command.to_string(),
                    exit_code: output.status.code().unwrap_or(-1),
                    output: text,
                }
            }
            Err(e) => Observation::Error {
                message: format!("failed to run command: {e}"),
            },
        }
    }

    async fn run_background(&self, id: u64, command: &str) -> Observation {
        match self.command(command).spawn() {
            Ok(child) => {
                self.jobs.lock().await.insert(id, child);
                Observation::CmdOutput {
                    command_id: id,
                    command: command.to_string(),
                    exit_code: 0,
                    output: format!(
                        "Background command started. To stop it, send a `kill` action with id {id}."
                    ),
                }
            }
            Err(e) => Observation::Error {
                message: format!("failed to start background command: {e}"),
            },
        }
    }
}

#[async_trait]
impl CommandManager for ShellCommandManager {
    async fn run(&self, command: &str, background: bool) -> Observation {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        tracing::info!(id, command, background, "running command");
        if background {
            self.run_background(id, command).await
        } else {
            self.run_foreground(id, command).await
        }
    }

    async fn kill(&self, id: u64) -> Observation {
        let child = self.jobs.lock().await.remove(&id);
        match child {
            Some(mut child) => {
                if let Err(e) = child.kill().await {
                    return Observation::Error {
                        message: format!("failed to kill command {id}: {e}"),
                    };
                }
                Observation::CmdOutput {
                    command_id: id,
                    command: String::new(),
                    exit_code: -1,
                    output: format!("Background command {id} killed."),
                }
            }
            None => Observation::Error {
                message: format!("no background command with id {id}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ShellCommandManager {
        ShellCommandManager::new(std::env::temp_dir().join("devloop-executor-tests")).unwrap()
    }

    #[tokio::test]
    async fn foreground_command_captures_output_and_exit_code() {
        let mgr = manager();
        let obs = mgr.run("echo hello", false).await;
        match obs {
            Observation::CmdOutput {
                exit_code, output, ..
            } => {
                assert_eq!(exit_code, 0);
                assert!(output.contains("hello"));
            }
            other => panic!("unexpected observation: {other:?}"),
        }
    }

    #[tokio::test]
    async fn failing_command_reports_nonzero_exit() {
        let mgr = manager();
        let obs = mgr.run("exit 3", false).await;
        match obs {
            Observation::CmdOutput { exit_code, .. } => assert_eq!(exit_code, 3),
            other => panic!("unexpected observation: {other:?}"),
        }
    }

    #[tokio::test]
    async fn background_command_can_be_killed() {
        let mgr = manager();
        let obs = mgr.run("sleep 30", true).await;
        let id = match obs {
            Observation::CmdOutput { command_id, .. } => command_id,
            other => panic!("unexpected observation: {other:?}"),
        };

        let killed = mgr.kill(id).await;
        assert!(matches!(killed, Observation::CmdOutput { .. }));
    }

    #[tokio::test]
    async fn kill_unknown_id_is_an_error_observation() {
        let mgr = manager();
        let obs = mgr.kill(999).await;
        assert!(matches!(obs, Observation::Error { .. }));
    }
}
