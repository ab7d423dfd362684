//! Shared test helpers for CLI integration tests.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Isolated project directory.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  /// Create a project whose `Makefile` holds `content`.
  pub fn with_makefile(content: &str) -> Self {
    let env = Self::empty();
    env.write_file("Makefile", content);
    env
  }

  pub fn empty() -> Self {
    Self {
      temp: TempDir::new().unwrap(),
    }
  }

  /// Write a file relative to the project directory.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  pub fn path(&self, relative_path: &str) -> PathBuf {
    self.temp.path().join(relative_path)
  }

  pub fn dir(&self) -> &Path {
    self.temp.path()
  }

  /// `mkr` running inside the project directory.
  pub fn mkr(&self) -> Command {
    let mut cmd = cargo_bin_cmd!("mkr");
    cmd.current_dir(self.temp.path());
    cmd
  }
}
