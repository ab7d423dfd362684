//! Shared utilities.
//!
//! Hashing for the conditional-command cache, lexical path handling, and test
//! helpers.

pub mod hash;
pub mod path;

#[cfg(test)]
pub mod testutil;
