//! Types for recipe execution.
//!
//! This module defines the configuration, error and report types used by
//! the scheduler.

use serde::Serialize;
use thiserror::Error;

use crate::consts::MAX_WAIT_HANDLES;

/// Errors that stop the scheduler itself.
///
/// A failing recipe is not an error at this level; it is recorded in the
/// [`BuildReport`].
#[derive(Debug, Error)]
pub enum ExecuteError {
  /// I/O error while writing output or preparing a command.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  /// A child-process task panicked or was cancelled.
  #[error("child task failed: {0}")]
  Task(#[from] tokio::task::JoinError),

  /// The run was interrupted from the keyboard.
  #[error("interrupted")]
  Interrupted,

  /// The configuration cannot be used.
  #[error("invalid configuration: {0}")]
  InvalidConfig(String),
}

/// A target whose recipe failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetFailure {
  pub target: String,
  pub reason: String,
}

/// Outcome of one scheduler run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
  /// Targets whose recipes ran to completion, in completion order.
  pub built: Vec<String>,

  /// Targets whose recipes failed.
  pub failed: Vec<TargetFailure>,

  /// Targets never started because a prerequisite failed or the run was
  /// stopped early.
  pub skipped: Vec<String>,

  /// Number of commands executed, builtins included.
  pub commands_run: usize,

  /// Largest number of job slots occupied at once.
  pub peak_jobs: usize,
}

impl BuildReport {
  /// Returns true if no target failed or was skipped.
  pub fn is_success(&self) -> bool {
    self.failed.is_empty() && self.skipped.is_empty()
  }

  /// Returns the number of targets the run touched.
  pub fn total(&self) -> usize {
    self.built.len() + self.failed.len() + self.skipped.len()
  }
}

/// Configuration for recipe execution.
#[derive(Debug, Clone)]
pub struct ExecuteConfig {
  /// Maximum number of targets building at once.
  pub jobs: usize,

  /// Keep building independent targets after a failure.
  pub keep_going: bool,

  /// Print commands without running them.
  pub dry_run: bool,

  /// Do not echo commands.
  pub silent: bool,

  /// Treat every command as if it carried the `-` prefix.
  pub ignore_errors: bool,

  /// Rebuild every target that has a recipe or prerequisites.
  pub always_rebuild: bool,

  /// Command interpreter for lines that need one.
  /// If None, uses /bin/sh (Unix) or cmd.exe (Windows).
  pub shell: Option<String>,

  /// Buffer child output and print it when the command completes.
  pub capture_output: bool,
}

impl Default for ExecuteConfig {
  fn default() -> Self {
    Self {
      jobs: num_cpus(),
      keep_going: false,
      dry_run: false,
      silent: false,
      ignore_errors: false,
      always_rebuild: false,
      shell: None,
      capture_output: true,
    }
  }
}

impl ExecuteConfig {
  /// Requested parallelism clamped to what the scheduler can wait on.
  pub fn effective_jobs(&self) -> usize {
    self.jobs.clamp(1, MAX_WAIT_HANDLES)
  }

  pub fn validate(&self) -> Result<(), ExecuteError> {
    if let Some(shell) = &self.shell
      && shell.trim().is_empty()
    {
      return Err(ExecuteError::InvalidConfig("shell must not be empty".to_string()));
    }
    Ok(())
  }
}

/// Get the number of CPUs for default parallelism.
fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}
