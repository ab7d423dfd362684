//! Variable store.
//!
//! Variables live in the map of the scope that defined them. Lookups walk the
//! scope chain outward; the entry with the highest precedence wins and, among
//! equals, the innermost one. A write below the effective precedence is
//! silently ignored, which is what lets command-line definitions override
//! anything a build file says. Undefining leaves a tombstone rather than
//! removing the entry.

mod expand;

use std::collections::BTreeMap;

use tracing::trace;

use crate::scope::{ScopeId, ScopeTable};

pub use expand::{AutoVars, ExpandError, expand, expand_for_target, unescape_dollars};

/// Where a definition came from. Later variants override earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Precedence {
  Predefined,
  BuildFile,
  CommandLine,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
  pub value: String,
  pub precedence: Precedence,
  /// False once `!UNDEF` has tombstoned the entry.
  pub defined: bool,
}

/// Result of resolving a name through a scope chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup<'a> {
  Defined(&'a str),
  /// An entry exists but has been undefined.
  Undefined,
  Missing,
}

impl<'a> Lookup<'a> {
  pub fn value(self) -> &'a str {
    match self {
      Lookup::Defined(v) => v,
      Lookup::Undefined | Lookup::Missing => "",
    }
  }
}

impl ScopeTable {
  /// The effective entry for `name` as seen from `scope`.
  fn effective(&self, scope: ScopeId, name: &str) -> Option<(ScopeId, &Variable)> {
    let mut best: Option<(ScopeId, &Variable)> = None;
    for id in self.chain(scope) {
      if let Some(var) = self.get(id).vars.get(name) {
        match best {
          Some((_, b)) if b.precedence >= var.precedence => {}
          _ => best = Some((id, var)),
        }
      }
    }
    best
  }

  /// Define (`is_define`) or undefine `name` in `scope`.
  ///
  /// Returns false when the write was ignored because a higher-precedence
  /// definition is visible.
  pub fn set_variable(&mut self, scope: ScopeId, name: &str, value: &str, is_define: bool, precedence: Precedence) -> bool {
    if let Some((_, existing)) = self.effective(scope, name)
      && precedence < existing.precedence
    {
      trace!(name, ?precedence, existing = ?existing.precedence, "ignoring lower-precedence write");
      return false;
    }

    let entry = Variable {
      value: if is_define { value.to_string() } else { String::new() },
      precedence,
      defined: is_define,
    };

    let vars = &mut self.get_mut(scope).vars;
    match vars.get_mut(name) {
      Some(var) if precedence >= var.precedence => *var = entry,
      Some(_) => return false,
      None => {
        vars.insert(name.to_string(), entry);
      }
    }
    trace!(name, ?precedence, defined = is_define, "variable set");
    true
  }

  /// Shorthand for an undefine at `precedence`.
  pub fn undefine_variable(&mut self, scope: ScopeId, name: &str, precedence: Precedence) -> bool {
    self.set_variable(scope, name, "", false, precedence)
  }

  pub fn lookup(&self, scope: ScopeId, name: &str) -> Lookup<'_> {
    match self.effective(scope, name) {
      Some((_, var)) if var.defined => Lookup::Defined(&var.value),
      Some(_) => Lookup::Undefined,
      None => Lookup::Missing,
    }
  }

  pub fn is_defined(&self, scope: ScopeId, name: &str) -> bool {
    matches!(self.lookup(scope, name), Lookup::Defined(_))
  }

  /// Every defined variable visible from `scope` with its effective value.
  pub fn visible_variables(&self, scope: ScopeId) -> BTreeMap<String, String> {
    let mut names: Vec<&str> = Vec::new();
    for id in self.chain(scope) {
      names.extend(self.get(id).vars.keys().map(String::as_str));
    }

    let mut out = BTreeMap::new();
    for name in names {
      if let Lookup::Defined(value) = self.lookup(scope, name) {
        out.insert(name.to_string(), value.to_string());
      }
    }
    out
  }
}
