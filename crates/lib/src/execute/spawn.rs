//! Child process launching.
//!
//! The scheduler only sees the [`Spawner`] trait: hand it a program, its
//! arguments and a working directory, get back a future resolving to the exit
//! code and captured output, plus a way to stop the child early.

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

/// What to run and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
  pub program: String,
  pub args: Vec<String>,
  pub cwd: PathBuf,
  /// Buffer stdout and stderr (merged) instead of inheriting them.
  pub capture: bool,
}

/// A finished child.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChildOutcome {
  pub exit_code: i32,
  pub output: Vec<u8>,
}

pub type Completion = Pin<Box<dyn Future<Output = io::Result<ChildOutcome>> + Send>>;

/// A launched child.
pub struct SpawnedChild {
  pub pid: Option<u32>,
  /// Resolves once the child has exited and all of its output is collected.
  pub completion: Completion,
  /// Sending on this force-kills the child.
  pub kill: Option<oneshot::Sender<()>>,
}

#[derive(Debug, Error)]
pub enum SpawnError {
  #[error("{program}: command not found")]
  NotFound { program: String },

  #[error("failed to start {program}: {source}")]
  Io {
    program: String,
    #[source]
    source: io::Error,
  },
}

/// Starts child processes for the scheduler.
pub trait Spawner {
  fn spawn(&self, request: SpawnRequest) -> Result<SpawnedChild, SpawnError>;
}

/// Spawns real processes with `tokio::process`. Must be called from within a
/// tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSpawner;

impl Spawner for TokioSpawner {
  fn spawn(&self, request: SpawnRequest) -> Result<SpawnedChild, SpawnError> {
    let mut command = Command::new(&request.program);
    command
      .args(&request.args)
      .current_dir(&request.cwd)
      .stdin(Stdio::null())
      .kill_on_drop(true);
    if request.capture {
      command.stdout(Stdio::piped()).stderr(Stdio::piped());
    }

    debug!(program = %request.program, cwd = %request.cwd.display(), "spawning process");
    let mut child = command.spawn().map_err(|source| {
      if source.kind() == io::ErrorKind::NotFound {
        SpawnError::NotFound {
          program: request.program.clone(),
        }
      } else {
        SpawnError::Io {
          program: request.program.clone(),
          source,
        }
      }
    })?;
    let pid = child.id();

    // Both pipes feed one channel; it closes once both pumps hit EOF.
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    if let Some(stdout) = child.stdout.take() {
      tokio::spawn(pump(stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
      tokio::spawn(pump(stderr, tx.clone()));
    }
    drop(tx);

    let (kill_tx, kill_rx) = oneshot::channel::<()>();
    let program = request.program;
    let completion = async move {
      let exited = tokio::select! {
        status = child.wait() => Some(status?),
        Ok(()) = kill_rx => None,
      };
      let status = match exited {
        Some(status) => status,
        None => {
          debug!(program = %program, "killing process");
          child.kill().await?;
          child.wait().await?
        }
      };

      let mut output = Vec::new();
      while let Some(chunk) = rx.recv().await {
        output.extend_from_slice(&chunk);
      }
      let exit_code = exit_code(status);
      trace!(program = %program, exit_code, bytes = output.len(), "process finished");
      Ok::<_, io::Error>(ChildOutcome { exit_code, output })
    };

    Ok(SpawnedChild {
      pid,
      completion: Box::pin(completion),
      kill: Some(kill_tx),
    })
  }
}

async fn pump<R: AsyncRead + Unpin>(mut reader: R, tx: mpsc::UnboundedSender<Vec<u8>>) {
  let mut buf = vec![0u8; 8192];
  loop {
    match reader.read(&mut buf).await {
      Ok(0) | Err(_) => break,
      Ok(n) => {
        if tx.send(buf[..n].to_vec()).is_err() {
          break;
        }
      }
    }
  }
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
  use std::os::unix::process::ExitStatusExt;
  status.code().or_else(|| status.signal().map(|s| 128 + s)).unwrap_or(1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
  status.code().unwrap_or(1)
}

/// Ask a child to exit (SIGTERM).
#[cfg(unix)]
pub fn terminate(pid: u32) {
  use rustix::process::{Pid, Signal, kill_process};

  let Some(target) = i32::try_from(pid).ok().and_then(Pid::from_raw) else {
    return;
  };
  if let Err(e) = kill_process(target, Signal::TERM) {
    trace!(pid, error = %e, "terminate failed");
  }
}

/// No graceful termination request exists; stragglers are force-killed.
#[cfg(not(unix))]
pub fn terminate(_pid: u32) {}
