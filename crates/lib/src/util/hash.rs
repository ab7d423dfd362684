//! Hashing utilities for cache keys.
//!
//! The conditional-expression cache is keyed on the state that could change
//! a command's exit code: the process environment and every variable visible
//! to the command's scope. Both are reduced to a SHA-256 digest here.

use sha2::{Digest, Sha256};

/// A full 64-character SHA-256 hash, lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateHash(pub String);

impl std::fmt::Display for StateHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Hash a sequence of name/value pairs.
///
/// Pairs are sorted by name first, so the result does not depend on the
/// iteration order of the source map.
pub fn hash_pairs<'a, I>(pairs: I) -> StateHash
where
  I: IntoIterator<Item = (&'a str, &'a str)>,
{
  let mut sorted: Vec<(&str, &str)> = pairs.into_iter().collect();
  sorted.sort();

  let mut hasher = Sha256::new();
  for (name, value) in sorted {
    hasher.update(name.as_bytes());
    hasher.update(b"=");
    hasher.update(value.as_bytes());
    hasher.update(b"\0");
  }

  StateHash(hex::encode(hasher.finalize()))
}

/// Hash the current process environment.
pub fn hash_environment() -> StateHash {
  let vars: Vec<(String, String)> = std::env::vars_os()
    .map(|(k, v)| (k.to_string_lossy().into_owned(), v.to_string_lossy().into_owned()))
    .collect();
  hash_pairs(vars.iter().map(|(k, v)| (k.as_str(), v.as_str())))
}
