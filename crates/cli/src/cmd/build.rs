//! Implementation of the `mkr` build command.
//!
//! Reads the build file, applies command-line definitions, plans the
//! requested goals and runs the scheduler on a current-thread runtime.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::debug;

use mkr_lib::MakeContext;
use mkr_lib::execute::{ExecuteConfig, TokioSpawner};

use crate::output::{JsonReport, OutputFormat, print_json, print_summary};

/// Everything the build command needs from the command line.
#[derive(Debug, Clone, Default)]
pub struct BuildArgs {
  pub file: Option<PathBuf>,
  pub directory: Option<PathBuf>,
  pub config: ExecuteConfig,
  /// Positional arguments: `NAME=value` definitions and goals, in any order.
  pub args: Vec<String>,
  pub format: OutputFormat,
}

/// Split positional arguments into variable definitions and goals.
///
/// An argument is a definition when it contains `=` and the part before it
/// is a non-empty name without blanks.
pub fn split_arguments(args: &[String]) -> (Vec<(String, String)>, Vec<String>) {
  let mut definitions = Vec::new();
  let mut goals = Vec::new();
  for arg in args {
    match arg.split_once('=') {
      Some((name, value)) if !name.is_empty() && !name.contains(char::is_whitespace) => {
        definitions.push((name.to_string(), value.to_string()));
      }
      _ => goals.push(arg.clone()),
    }
  }
  (definitions, goals)
}

/// Execute the build command.
///
/// Returns whether the build succeeded; errors are reserved for problems that
/// stop the build before or outside of running recipes.
pub fn cmd_build(args: BuildArgs) -> Result<bool> {
  let dir = match &args.directory {
    Some(dir) => dir.clone(),
    None => std::env::current_dir().context("Failed to determine current directory")?,
  };
  let (definitions, goals) = split_arguments(&args.args);
  let json = args.format.is_json();

  let mut ctx = MakeContext::new(&dir, args.config.clone())
    .with_context(|| format!("Failed to use directory {}", dir.display()))?;
  for (name, value) in &definitions {
    debug!(name = %name, value = %value, "command-line definition");
    ctx.set_command_line_variable(name, value);
  }

  // Keep stdout clean for the JSON document.
  if json {
    ctx.load_with_output(args.file.as_deref(), std::io::stderr())?;
  } else {
    ctx.load(args.file.as_deref())?;
  }
  ctx.plan(&goals)?;

  let rt = tokio::runtime::Builder::new_current_thread()
    .enable_all()
    .build()
    .context("Failed to create async runtime")?;
  let start = Instant::now();
  let report = if json {
    rt.block_on(ctx.execute_with(&TokioSpawner, std::io::stderr(), std::io::stderr(), true))?
  } else {
    rt.block_on(ctx.execute())?
  };
  let elapsed = start.elapsed();
  let up_to_date = ctx.up_to_date_goals();

  if json {
    print_json(&JsonReport {
      success: report.is_success(),
      elapsed_ms: elapsed.as_millis(),
      up_to_date: &up_to_date,
      report: &report,
    })?;
  } else {
    print_summary(&report, &up_to_date, elapsed);
  }

  Ok(report.is_success())
}
