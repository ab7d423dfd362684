//! Engine-wide constants.

/// Hard ceiling on simultaneously awaited child processes.
///
/// Requested parallelism is clamped to this value.
pub const MAX_WAIT_HANDLES: usize = 64;

/// Number of records allocated together by [`crate::slab::Slab`].
pub const SLAB_CHUNK_SIZE: usize = 64;

/// Build file names probed, in order, when none is given explicitly.
pub const BUILD_FILE_NAMES: &[&str] = &["Makefile", "makefile", "mkrfile"];

/// File name component of a scope's synthetic default target.
pub const DEFAULT_TARGET_NAME: &str = ".DEFAULT";

/// How long interrupted children get to exit before they are force-killed.
pub const TERMINATE_GRACE_MS: u64 = 250;

/// Commands that always require the external command interpreter.
pub const INTERPRETER_ONLY_COMMANDS: &[&str] = &["copy", "del", "erase", "for", "move", "ren", "rename", "type"];
