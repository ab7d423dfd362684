//! mkr-lib: the build engine behind `mkr`
//!
//! This crate reads make-style build files and brings targets up to date:
//! - `vars` / `scope`: the variable store and per-directory scopes
//! - `preprocess`: directives, conditionals, assignments and rule headers
//! - `graph`: the target graph, inference rules and staleness planning
//! - `execute`: the bounded job scheduler and command launching
//! - `context`: the driver tying the stages together

pub mod cache;
pub mod consts;
pub mod context;
pub mod execute;
pub mod graph;
pub mod preprocess;
pub mod scope;
pub mod slab;
pub mod util;
pub mod vars;

pub use context::{MakeContext, MakeError};
