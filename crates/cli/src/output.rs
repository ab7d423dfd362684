//! CLI output formatting utilities.
//!
//! Colored status lines, elapsed time formatting and the JSON form of the
//! build report.

use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};
use serde::Serialize;

use mkr_lib::execute::BuildReport;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
}

/// Elapsed time at millisecond resolution, e.g. `1s 500ms`.
pub fn format_duration(duration: Duration) -> String {
  let millis = Duration::from_millis(duration.as_millis() as u64);
  humantime::format_duration(millis).to_string()
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!("  {}: {}", label.if_supports_color(Stream::Stdout, |s| s.dimmed()), value);
}

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}

/// The report as printed by `--format json`.
#[derive(Debug, Serialize)]
pub struct JsonReport<'a> {
  pub success: bool,
  pub elapsed_ms: u128,
  pub up_to_date: &'a [String],
  #[serde(flatten)]
  pub report: &'a BuildReport,
}

/// Text summary printed after a build.
pub fn print_summary(report: &BuildReport, up_to_date: &[String], elapsed: Duration) {
  for name in up_to_date {
    print_info(&format!("'{}' is up to date", name));
  }

  if report.is_success() {
    if report.built.is_empty() {
      if up_to_date.is_empty() {
        print_info("Nothing to be done");
      }
      return;
    }
    print_success(&format!(
      "Built {} target(s) in {}",
      report.built.len(),
      format_duration(elapsed)
    ));
    if report.peak_jobs > 1 {
      print_stat("Parallel jobs", &report.peak_jobs.to_string());
    }
    return;
  }

  print_error(&format!(
    "Build failed after {}: {} failed, {} skipped",
    format_duration(elapsed),
    report.failed.len(),
    report.skipped.len()
  ));
  for failure in &report.failed {
    eprintln!("  {} ({})", failure.target, failure.reason);
  }
  if !report.skipped.is_empty() {
    print_warning(&format!("Not built: {}", report.skipped.join(", ")));
  }
}
