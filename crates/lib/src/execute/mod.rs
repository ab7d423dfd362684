//! Recipe execution.
//!
//! The [`Scheduler`] drains the ready queue produced by planning into a
//! bounded set of job slots. Orchestration is single threaded: only the
//! launched children run concurrently, each awaited as a task in a
//! [`JoinSet`]. Output of every command is buffered in its slot and written
//! when the command completes, so parallel recipes never interleave lines.
//!
//! - [`command`]: classifies a command line (builtin, direct, interpreter)
//! - [`builtins`]: in-process commands
//! - [`spawn`]: child process launching
//! - [`types`]: configuration, errors and the build report

pub mod builtins;
pub mod command;
pub mod spawn;
pub mod types;

use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use tempfile::NamedTempFile;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::consts::TERMINATE_GRACE_MS;
use crate::graph::{BuildQueues, CmdToExec, TargetGraph, TargetId};
use crate::scope::ScopeTable;

use builtins::{change_dir, evaluate_if};
use command::{Plan, get_shell, plan};
use spawn::{ChildOutcome, SpawnRequest};

pub use builtins::{BuiltinFn, BuiltinTable};
pub use spawn::{SpawnError, SpawnedChild, Spawner, TokioSpawner};
pub use types::{BuildReport, ExecuteConfig, ExecuteError, TargetFailure};

/// One occupied job slot.
struct Slot {
  target: TargetId,
  /// Index of the next command to launch.
  position: usize,
  cwd: PathBuf,
  output: Vec<u8>,
  /// Command currently running, for messages.
  command: String,
  ignore_errors: bool,
  /// Inline files of the running command; removed on drop.
  inline: Vec<NamedTempFile>,
}

/// Result of starting one command.
enum Launch {
  /// Ran in-process, or needed no process at all.
  Done(i32),
  /// Could not be started.
  Failed(String),
  /// A child is running; its completion arrives through the join set.
  Spawned,
}

enum Event {
  Joined(Option<Result<(usize, io::Result<ChildOutcome>), tokio::task::JoinError>>),
  Interrupt(io::Result<()>),
}

pub struct Scheduler<'a, S: Spawner> {
  graph: &'a mut TargetGraph,
  scopes: &'a ScopeTable,
  queues: &'a mut BuildQueues,
  config: &'a ExecuteConfig,
  spawner: &'a S,
  builtins: &'a BuiltinTable,
  out: Box<dyn Write + 'a>,
  err: Box<dyn Write + 'a>,
  shell: (String, Vec<String>),
  handle_interrupts: bool,
  slots: Vec<Option<Slot>>,
  running: JoinSet<(usize, io::Result<ChildOutcome>)>,
  kills: HashMap<usize, (Option<u32>, oneshot::Sender<()>)>,
  draining: bool,
  report: BuildReport,
}

impl<'a, S: Spawner> Scheduler<'a, S> {
  pub fn new(
    graph: &'a mut TargetGraph,
    scopes: &'a ScopeTable,
    queues: &'a mut BuildQueues,
    config: &'a ExecuteConfig,
    spawner: &'a S,
    builtins: &'a BuiltinTable,
  ) -> Self {
    Self {
      graph,
      scopes,
      queues,
      config,
      spawner,
      builtins,
      out: Box::new(io::stdout()),
      err: Box::new(io::stderr()),
      shell: get_shell(config.shell.as_deref()),
      handle_interrupts: true,
      slots: Vec::new(),
      running: JoinSet::new(),
      kills: HashMap::new(),
      draining: false,
      report: BuildReport::default(),
    }
  }

  /// Where command echo and captured output go. Defaults to stdout.
  pub fn with_output(mut self, out: impl Write + 'a) -> Self {
    self.out = Box::new(out);
    self
  }

  /// Where failure messages go. Defaults to stderr.
  pub fn with_errors(mut self, err: impl Write + 'a) -> Self {
    self.err = Box::new(err);
    self
  }

  /// Stop running children on Ctrl-C. On by default.
  pub fn handle_interrupts(mut self, yes: bool) -> Self {
    self.handle_interrupts = yes;
    self
  }

  /// Run until both queues are empty and no slot is occupied, or until a
  /// failure has drained the running work.
  pub async fn run(mut self) -> Result<BuildReport, ExecuteError> {
    self.config.validate()?;
    let jobs = self.config.effective_jobs();
    self.slots = (0..jobs).map(|_| None).collect();
    info!(
      jobs,
      ready = self.queues.ready.len(),
      waiting = self.queues.waiting.len(),
      "starting build"
    );

    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    let mut armed = self.handle_interrupts;

    loop {
      self.fill()?;
      if self.running.is_empty() {
        break;
      }

      let event = tokio::select! {
        joined = self.running.join_next() => Event::Joined(joined),
        signal = &mut interrupt, if armed => Event::Interrupt(signal),
      };

      match event {
        Event::Joined(Some(joined)) => {
          let (index, result) = joined?;
          self.kills.remove(&index);
          self.complete(index, result)?;
        }
        Event::Joined(None) => break,
        Event::Interrupt(Ok(())) => {
          self.interrupt().await?;
          return Err(ExecuteError::Interrupted);
        }
        Event::Interrupt(Err(e)) => {
          warn!(error = %e, "cannot listen for interrupts");
          armed = false;
        }
      }
    }

    self.finish()
  }

  /// Occupy free slots with ready targets.
  fn fill(&mut self) -> Result<(), ExecuteError> {
    while !self.draining {
      let Some(index) = self.slots.iter().position(Option::is_none) else {
        break;
      };
      let Some(id) = self.queues.ready.pop_front() else {
        break;
      };

      if self.graph.target(id).commands.is_empty() {
        self.target_done(id);
        continue;
      }

      let cwd = self.scopes.get(self.graph.target(id).scope).dir.clone();
      debug!(target = %self.graph.display_name(id), slot = index, "starting target");
      self.slots[index] = Some(Slot {
        target: id,
        position: 0,
        cwd,
        output: Vec::new(),
        command: String::new(),
        ignore_errors: false,
        inline: Vec::new(),
      });
      let active = self.slots.iter().filter(|s| s.is_some()).count();
      self.report.peak_jobs = self.report.peak_jobs.max(active);
      self.advance(index)?;
    }
    Ok(())
  }

  /// Run the slot's commands until one is left running in a child, the
  /// target is finished, or it failed.
  fn advance(&mut self, index: usize) -> Result<(), ExecuteError> {
    loop {
      self.flush(index)?;
      let Some(slot) = self.slots[index].as_mut() else {
        return Ok(());
      };
      let id = slot.target;
      let Some(cmd) = self.graph.target(id).commands.get(slot.position).cloned() else {
        self.slots[index] = None;
        self.target_done(id);
        return Ok(());
      };
      if self.draining {
        self.slots[index] = None;
        self.report.skipped.push(self.graph.display_name(id));
        return Ok(());
      }

      slot.position += 1;
      slot.command = cmd.command.clone();
      slot.ignore_errors = cmd.ignore_errors || self.config.ignore_errors;
      if self.config.dry_run || !(cmd.suppress_echo || self.config.silent) {
        writeln!(slot.output, "\t{}", cmd.command)?;
      }
      if self.config.dry_run {
        continue;
      }
      if !self.config.capture_output {
        self.flush(index)?;
      }

      self.report.commands_run += 1;
      match self.launch(index, &cmd) {
        Launch::Spawned => return Ok(()),
        Launch::Done(0) => {}
        Launch::Done(code) => {
          let reason = format!("'{}' exited with code {}", cmd.command, code);
          if !self.command_failed(index, reason)? {
            return Ok(());
          }
        }
        Launch::Failed(reason) => {
          if !self.command_failed(index, reason)? {
            return Ok(());
          }
        }
      }
    }
  }

  /// A child finished.
  fn complete(&mut self, index: usize, result: io::Result<ChildOutcome>) -> Result<(), ExecuteError> {
    let Some(slot) = self.slots[index].as_mut() else {
      return Ok(());
    };
    slot.inline.clear();
    let failure = match result {
      Ok(outcome) => {
        slot.output.extend_from_slice(&outcome.output);
        (outcome.exit_code != 0).then(|| format!("'{}' exited with code {}", slot.command, outcome.exit_code))
      }
      Err(e) => Some(format!("'{}' could not be waited on: {}", slot.command, e)),
    };
    if let Some(reason) = failure
      && !self.command_failed(index, reason)?
    {
      return Ok(());
    }
    self.advance(index)
  }

  /// Handle a failed command. Returns true when the failure is tolerated and
  /// the target carries on.
  fn command_failed(&mut self, index: usize, reason: String) -> Result<bool, ExecuteError> {
    let Some(slot) = self.slots[index].as_mut() else {
      return Ok(false);
    };
    if slot.ignore_errors {
      writeln!(slot.output, "{} (ignored)", reason)?;
      debug!(target = %self.graph.display_name(slot.target), %reason, "ignoring failure");
      return Ok(true);
    }

    self.flush(index)?;
    let Some(slot) = self.slots[index].take() else {
      return Ok(false);
    };
    let name = self.graph.display_name(slot.target);
    writeln!(self.err, "mkr: error building {}: {}", name, reason)?;
    self.err.flush()?;
    warn!(target = %name, %reason, "target failed");

    let target = self.graph.target_mut(slot.target);
    target.executed = true;
    target.failed = true;
    self.report.failed.push(TargetFailure { target: name, reason });
    if !self.config.keep_going {
      self.draining = true;
    }
    Ok(false)
  }

  /// Start one command of the slot.
  fn launch(&mut self, index: usize, cmd: &CmdToExec) -> Launch {
    let mut line = cmd.command.clone();
    if !cmd.inline_files.is_empty() {
      match write_inline_files(&line, &cmd.inline_files) {
        Ok((substituted, files)) => {
          line = substituted;
          if let Some(slot) = self.slots[index].as_mut() {
            slot.inline = files;
          }
        }
        Err(e) => return Launch::Failed(format!("cannot write inline file: {}", e)),
      }
    }
    self.run_line(index, &line)
  }

  fn run_line(&mut self, index: usize, line: &str) -> Launch {
    let Some(slot) = self.slots[index].as_mut() else {
      return Launch::Failed("no job slot".to_string());
    };

    match plan(line, self.builtins) {
      Plan::Empty | Plan::ChangeDir(None) => Launch::Done(0),
      Plan::ChangeDir(Some(arg)) => match change_dir(&slot.cwd, &arg) {
        Ok(dir) => {
          slot.cwd = dir;
          Launch::Done(0)
        }
        Err(message) => {
          let _ = writeln!(slot.output, "{}", message);
          Launch::Done(1)
        }
      },
      Plan::If {
        negate,
        condition,
        command,
      } => {
        if evaluate_if(&condition, negate, &slot.cwd) {
          self.run_line(index, &command)
        } else {
          Launch::Done(0)
        }
      }
      Plan::Builtin { name, args } => match self.builtins.get(&name) {
        Some(builtin) => Launch::Done(builtin(&args, &slot.cwd, &mut slot.output)),
        None => Launch::Failed(format!("{}: builtin not registered", name)),
      },
      Plan::Direct(mut argv) => {
        let program = argv.remove(0);
        self.spawn(index, program, argv)
      }
      Plan::Interpreter(line) => {
        let (shell, mut args) = self.shell.clone();
        args.push(line);
        self.spawn(index, shell, args)
      }
    }
  }

  fn spawn(&mut self, index: usize, program: String, args: Vec<String>) -> Launch {
    let Some(slot) = self.slots[index].as_ref() else {
      return Launch::Failed("no job slot".to_string());
    };
    let request = SpawnRequest {
      program,
      args,
      cwd: slot.cwd.clone(),
      capture: self.config.capture_output,
    };

    match self.spawner.spawn(request) {
      Ok(child) => {
        if let Some(kill) = child.kill {
          self.kills.insert(index, (child.pid, kill));
        }
        let completion = child.completion;
        self.running.spawn(async move { (index, completion.await) });
        Launch::Spawned
      }
      Err(e) => Launch::Failed(e.to_string()),
    }
  }

  /// A target ran all of its commands: release its dependents.
  fn target_done(&mut self, id: TargetId) {
    let name = self.graph.display_name(id);
    let target = self.graph.target_mut(id);
    target.executed = true;
    if !target.commands.is_empty() {
      debug!(target = %name, "target built");
      self.report.built.push(name);
    }

    for child in self.graph.dependents(id) {
      let target = self.graph.target_mut(child);
      target.unresolved_parents = target.unresolved_parents.saturating_sub(1);
      if target.unresolved_parents == 0
        && let Some(pos) = self.queues.waiting.iter().position(|&w| w == child)
      {
        self.queues.waiting.remove(pos);
        self.queues.ready.push_back(child);
      }
    }
  }

  fn flush(&mut self, index: usize) -> Result<(), ExecuteError> {
    if let Some(slot) = self.slots[index].as_mut()
      && !slot.output.is_empty()
    {
      self.out.write_all(&slot.output)?;
      self.out.flush()?;
      slot.output.clear();
    }
    Ok(())
  }

  /// Terminate every running child, give them a moment, kill the rest and
  /// collect what they wrote.
  async fn interrupt(&mut self) -> Result<(), ExecuteError> {
    warn!(running = self.running.len(), "interrupted, stopping running commands");
    self.draining = true;
    for (pid, _) in self.kills.values() {
      if let Some(pid) = pid {
        spawn::terminate(*pid);
      }
    }
    tokio::time::sleep(Duration::from_millis(TERMINATE_GRACE_MS)).await;
    for (_, (_, kill)) in self.kills.drain() {
      let _ = kill.send(());
    }

    while let Some(joined) = self.running.join_next().await {
      if let Ok((index, Ok(outcome))) = joined
        && let Some(slot) = self.slots[index].as_mut()
      {
        slot.output.extend_from_slice(&outcome.output);
        self.flush(index)?;
      }
    }
    Ok(())
  }

  fn finish(mut self) -> Result<BuildReport, ExecuteError> {
    let leftover: Vec<TargetId> = self.queues.ready.drain(..).chain(self.queues.waiting.drain(..)).collect();
    for id in leftover {
      self.report.skipped.push(self.graph.display_name(id));
    }
    self.out.flush()?;
    info!(
      built = self.report.built.len(),
      failed = self.report.failed.len(),
      skipped = self.report.skipped.len(),
      "build finished"
    );
    Ok(self.report)
  }
}

/// Write each inline file and substitute its path for the matching `<<`.
fn write_inline_files(line: &str, contents: &[String]) -> io::Result<(String, Vec<NamedTempFile>)> {
  let mut files = Vec::with_capacity(contents.len());
  let mut result = String::with_capacity(line.len());
  let mut rest = line;

  for content in contents {
    let mut file = tempfile::Builder::new().prefix("mkr").suffix(".tmp").tempfile()?;
    file.write_all(content.as_bytes())?;
    file.flush()?;
    match rest.find("<<") {
      Some(pos) => {
        result.push_str(&rest[..pos]);
        result.push_str(&file.path().to_string_lossy());
        rest = &rest[pos + 2..];
      }
      None => break,
    }
    files.push(file);
  }
  result.push_str(rest);
  Ok((result, files))
}
