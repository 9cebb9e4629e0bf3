//! Shell command backend.
//!
//! `ShellCommandManager` implements the `CommandManager` boundary with
//! plain `sh -c` processes: foreground commands block until exit and
//! capture combined output, background commands get a numeric id and can
//! be killed later.

pub mod shell;

pub use shell::{ExecutorError, ShellCommandManager};
