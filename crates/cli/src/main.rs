mod cmd;
mod output;

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use mkr_lib::execute::ExecuteConfig;

use cmd::{BuildArgs, cmd_build};
use output::{OutputFormat, print_error};

/// mkr - make-style build engine
#[derive(Parser)]
#[command(name = "mkr")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Build file to read (default: Makefile, makefile or mkrfile)
  #[arg(short = 'f', long = "file", value_name = "FILE")]
  file: Option<PathBuf>,

  /// Change to DIR before doing anything
  #[arg(short = 'C', long = "directory", value_name = "DIR")]
  directory: Option<PathBuf>,

  /// Number of recipes to run at once (at most 64)
  #[arg(short, long, value_name = "N")]
  jobs: Option<usize>,

  /// Keep building targets that do not depend on a failed one
  #[arg(short, long)]
  keep_going: bool,

  /// Print commands without running them
  #[arg(short = 'n', long)]
  dry_run: bool,

  /// Do not echo commands
  #[arg(short, long)]
  silent: bool,

  /// Ignore failing commands
  #[arg(short, long)]
  ignore_errors: bool,

  /// Rebuild every target regardless of timestamps
  #[arg(short = 'a', long)]
  always_make: bool,

  /// Command interpreter for lines that need one
  #[arg(long, value_name = "PROGRAM")]
  shell: Option<String>,

  /// Enable verbose output
  #[arg(short, long)]
  verbose: bool,

  /// Output format for the build summary
  #[arg(long, value_enum, default_value_t)]
  format: OutputFormat,

  /// Variable definitions (NAME=value) and targets to build
  #[arg(value_name = "NAME=value | TARGET")]
  args: Vec<String>,
}

impl Cli {
  fn into_build_args(self) -> BuildArgs {
    let mut config = ExecuteConfig {
      keep_going: self.keep_going,
      dry_run: self.dry_run,
      silent: self.silent,
      ignore_errors: self.ignore_errors,
      always_rebuild: self.always_make,
      shell: self.shell,
      ..Default::default()
    };
    if let Some(jobs) = self.jobs {
      config.jobs = jobs;
    }
    BuildArgs {
      file: self.file,
      directory: self.directory,
      config,
      args: self.args,
      format: self.format,
    }
  }
}

fn main() {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "warn" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .without_time()
    .with_writer(std::io::stderr)
    .init();

  match cmd_build(cli.into_build_args()) {
    Ok(true) => {}
    Ok(false) => std::process::exit(1),
    Err(e) => {
      print_error(&format!("{:#}", e));
      std::process::exit(1);
    }
  }
}
