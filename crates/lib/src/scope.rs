//! Per-directory lexical environments.
//!
//! Every build file is processed inside a [`Scope`]: its own variables, its own
//! inference rules, and its own conditional-nesting and parser state. A scope
//! chains to a parent (variable and rule inheritance) and to a previous scope
//! (where processing resumes once this scope's file is done).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::graph::{RuleId, TargetId};
use crate::slab::{Key, Slab};
use crate::vars::Variable;

pub type ScopeId = Key<Scope>;

/// What the preprocessor expects the next line of a scope to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParserState {
  #[default]
  Default,
  RecipeActive,
  InlineFileActive,
}

/// Conditional-nesting counters.
///
/// `current` counts every open `!IF`; `active` is the deepest level whose
/// branch is executing. Lines execute only while the two are equal.
/// `branch_taken` records whether a branch has already fired at level
/// `active + 1`, the only level where it is ever consulted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conditional {
  pub current: u32,
  pub active: u32,
  pub branch_taken: bool,
  /// One entry per open level: whether its plain `!ELSE` has been seen.
  pub else_seen: Vec<bool>,
}

impl Conditional {
  pub fn is_executing(&self) -> bool {
    self.current == self.active
  }

  /// The innermost open level is not executing but its parent is, so a
  /// later `!ELSE`/`!ELSEIF` might still switch it on.
  pub fn is_pending(&self) -> bool {
    self.current == self.active + 1
  }
}

/// Recipe lines collected for the most recent rule header.
#[derive(Debug, Default)]
pub struct RecipeState {
  /// Targets receiving the lines: the header's explicit targets, or the
  /// pseudo-target of an inference rule.
  pub targets: Vec<TargetId>,
  /// At least one line has been attached since the header.
  pub started: bool,
  /// Lines are stored without expansion (inference rule recipes).
  pub raw: bool,
  /// `<<` blocks still to be read for the last recipe line.
  pub pending_inline: usize,
  pub inline_buffer: Vec<String>,
}

#[derive(Debug)]
pub struct Scope {
  pub dir: PathBuf,
  pub parent: Option<ScopeId>,
  pub previous: Option<ScopeId>,
  pub vars: HashMap<String, Variable>,
  /// Inference rules in definition order; searched newest first.
  pub rules: Vec<RuleId>,
  pub cond: Conditional,
  pub state: ParserState,
  pub recipe: RecipeState,
  pub default_target: Option<TargetId>,
  /// The default target already received its first real dependency.
  pub default_seeded: bool,
  /// The scope's build file has been processed.
  pub loaded: bool,
}

impl Scope {
  fn new(dir: PathBuf, parent: Option<ScopeId>, previous: Option<ScopeId>) -> Self {
    Self {
      dir,
      parent,
      previous,
      vars: HashMap::new(),
      rules: Vec::new(),
      cond: Conditional::default(),
      state: ParserState::Default,
      recipe: RecipeState::default(),
      default_target: None,
      default_seeded: false,
      loaded: false,
    }
  }
}

/// All scopes of a build, addressed by [`ScopeId`] and keyed by directory.
#[derive(Default)]
pub struct ScopeTable {
  slab: Slab<Scope>,
  by_dir: HashMap<PathBuf, ScopeId>,
}

impl ScopeTable {
  pub fn new() -> Self {
    Self::default()
  }

  /// Return the scope for `dir`, creating it on first reference.
  ///
  /// The returned flag is true when the scope was created by this call.
  pub fn get_or_create(&mut self, dir: &Path, parent: Option<ScopeId>, previous: Option<ScopeId>) -> (ScopeId, bool) {
    if let Some(&id) = self.by_dir.get(dir) {
      return (id, false);
    }

    let id = self.slab.insert(Scope::new(dir.to_path_buf(), parent, previous));
    self.by_dir.insert(dir.to_path_buf(), id);
    debug!(dir = %dir.display(), scope = ?id, "created scope");
    (id, true)
  }

  pub fn find(&self, dir: &Path) -> Option<ScopeId> {
    self.by_dir.get(dir).copied()
  }

  pub fn get(&self, id: ScopeId) -> &Scope {
    &self.slab[id]
  }

  pub fn get_mut(&mut self, id: ScopeId) -> &mut Scope {
    &mut self.slab[id]
  }

  pub fn len(&self) -> usize {
    self.slab.len()
  }

  pub fn is_empty(&self) -> bool {
    self.slab.is_empty()
  }

  /// `id` followed by each of its ancestors, innermost first.
  pub fn chain(&self, id: ScopeId) -> Vec<ScopeId> {
    let mut out = vec![id];
    let mut cursor = self.slab[id].parent;
    while let Some(parent) = cursor {
      out.push(parent);
      cursor = self.slab[parent].parent;
    }
    out
  }

  /// Inference rules visible from `id`: own rules newest first, then each
  /// ancestor's the same way.
  pub fn visible_rules(&self, id: ScopeId) -> Vec<RuleId> {
    self
      .chain(id)
      .into_iter()
      .flat_map(|s| self.slab[s].rules.iter().rev().copied().collect::<Vec<_>>())
      .collect()
  }
}
