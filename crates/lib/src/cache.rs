//! Memoized exit codes of `[command]` conditions.
//!
//! A condition command is only re-run when its text, the process environment
//! or the variables visible to its scope have changed. The store is behind a
//! trait so a persistent cache can replace the in-memory one.

use std::collections::HashMap;

use crate::util::hash::StateHash;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
  pub env: StateHash,
  pub vars: StateHash,
  pub command: String,
}

pub trait ExitCodeCache: Send {
  fn lookup(&self, key: &CacheKey) -> Option<i32>;
  fn insert(&mut self, key: CacheKey, exit_code: i32);
}

/// Cache that lives for a single invocation.
#[derive(Debug, Default)]
pub struct MemoryCache {
  entries: HashMap<CacheKey, i32>,
}

impl MemoryCache {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

impl ExitCodeCache for MemoryCache {
  fn lookup(&self, key: &CacheKey) -> Option<i32> {
    self.entries.get(key).copied()
  }

  fn insert(&mut self, key: CacheKey, exit_code: i32) {
    self.entries.insert(key, exit_code);
  }
}
