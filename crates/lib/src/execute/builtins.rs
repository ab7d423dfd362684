//! In-process commands.
//!
//! Builtins run synchronously on the scheduler and never touch the process
//! working directory: each receives the step's directory explicitly.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::trace;

use super::command::IfCondition;
use crate::util::path::resolve;

/// A builtin gets its arguments (without the command name), the step's
/// working directory and the step's output buffer, and returns an exit code.
pub type BuiltinFn = fn(&[String], &Path, &mut Vec<u8>) -> i32;

/// Name to function table. Names are matched case-insensitively.
#[derive(Clone)]
pub struct BuiltinTable {
  entries: HashMap<String, BuiltinFn>,
}

impl BuiltinTable {
  /// A table with no builtins at all.
  pub fn empty() -> Self {
    Self {
      entries: HashMap::new(),
    }
  }

  pub fn register(&mut self, name: &str, f: BuiltinFn) {
    self.entries.insert(name.to_ascii_lowercase(), f);
  }

  pub fn contains(&self, name: &str) -> bool {
    self.entries.contains_key(&name.to_ascii_lowercase())
  }

  pub fn get(&self, name: &str) -> Option<BuiltinFn> {
    self.entries.get(&name.to_ascii_lowercase()).copied()
  }
}

impl Default for BuiltinTable {
  fn default() -> Self {
    let mut table = Self::empty();
    table.register("echo", echo);
    table.register("mkdir", mkdir);
    table
  }
}

impl std::fmt::Debug for BuiltinTable {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let mut names: Vec<_> = self.entries.keys().collect();
    names.sort();
    f.debug_struct("BuiltinTable").field("names", &names).finish()
  }
}

fn echo(args: &[String], _cwd: &Path, out: &mut Vec<u8>) -> i32 {
  match writeln!(out, "{}", args.join(" ")) {
    Ok(()) => 0,
    Err(_) => 1,
  }
}

fn mkdir(args: &[String], cwd: &Path, out: &mut Vec<u8>) -> i32 {
  if args.is_empty() {
    let _ = writeln!(out, "mkdir: missing operand");
    return 1;
  }
  let mut code = 0;
  for arg in args {
    let dir = resolve(cwd, arg);
    if let Err(e) = std::fs::create_dir_all(&dir) {
      let _ = writeln!(out, "mkdir: {}: {}", arg, e);
      code = 1;
    }
  }
  code
}

/// New working directory for `CD arg` run in `cwd`.
pub fn change_dir(cwd: &Path, arg: &str) -> Result<PathBuf, String> {
  let dir = resolve(cwd, arg);
  if dir.is_dir() {
    trace!(dir = %dir.display(), "cd");
    Ok(dir)
  } else {
    Err(format!("cd: {}: no such directory", arg))
  }
}

/// Evaluate an `IF` condition relative to `cwd`.
pub fn evaluate_if(condition: &IfCondition, negate: bool, cwd: &Path) -> bool {
  let result = match condition {
    IfCondition::Exist(path) => resolve(cwd, path).exists(),
    IfCondition::Equal(a, b) => a == b,
  };
  result != negate
}
