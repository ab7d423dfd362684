//! Target graph.
//!
//! Targets are build goals or files, identified by normalized absolute path.
//! A [`Dependency`] edge runs from a parent (must build first) to a child
//! (builds after); each target keeps the edges on both sides. Inference rules
//! hold their generic recipe on a pseudo-target that is never built itself.
//!
//! - [`infer`]: attaches inference rules to targets lacking a recipe
//! - [`plan`]: decides which targets are stale and queues them

pub mod infer;
pub mod plan;

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use thiserror::Error;
use tracing::{debug, trace};

use crate::consts::DEFAULT_TARGET_NAME;
use crate::scope::{ScopeId, ScopeTable};
use crate::slab::{Key, Slab};
use crate::util::path::{relative_display, resolve};
use crate::vars::ExpandError;

pub use infer::InferenceResolver;
pub use plan::Planner;

pub type TargetId = Key<Target>;
pub type DependencyId = Key<Dependency>;
pub type RuleId = Key<InferenceRule>;

/// Errors raised while resolving or evaluating the graph.
#[derive(Debug, Error)]
pub enum GraphError {
  #[error("circular dependency involving {0}")]
  Cycle(String),

  #[error("don't know how to build {0}")]
  NoRecipe(String),

  #[error("nothing to build: no targets defined")]
  NoTargets,

  #[error("in recipe for {target}: {source}")]
  Expand {
    target: String,
    #[source]
    source: ExpandError,
  },
}

/// One recipe line as written, before prefix stripping.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RecipeLine {
  pub text: String,
  /// Contents of each `<<` inline file opened by this line, in order.
  pub inline_files: Vec<String>,
}

impl RecipeLine {
  pub fn new(text: impl Into<String>) -> Self {
    Self {
      text: text.into(),
      inline_files: Vec::new(),
    }
  }
}

/// One command ready for the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdToExec {
  pub command: String,
  /// `@` prefix: do not echo.
  pub suppress_echo: bool,
  /// `-` prefix: a failure does not fail the target.
  pub ignore_errors: bool,
  pub inline_files: Vec<String>,
}

impl CmdToExec {
  /// Parse `@`/`-` prefixes off an expanded recipe line.
  pub fn parse(line: &str, inline_files: Vec<String>) -> Self {
    let mut rest = line.trim_start();
    let mut suppress_echo = false;
    let mut ignore_errors = false;

    loop {
      if let Some(r) = rest.strip_prefix('@') {
        suppress_echo = true;
        rest = r.trim_start();
      } else if let Some(r) = rest.strip_prefix('-') {
        ignore_errors = true;
        rest = r.trim_start();
      } else {
        break;
      }
    }

    Self {
      command: rest.trim_end().to_string(),
      suppress_echo,
      ignore_errors,
      inline_files,
    }
  }
}

/// The inference rule chosen for a target and the file it builds from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inference {
  pub rule: RuleId,
  pub source: TargetId,
  /// The source has been added as a real dependency edge.
  pub promoted: bool,
}

#[derive(Debug, Clone)]
pub struct Target {
  pub path: PathBuf,
  /// Scope the target was first referenced in; the defining scope once an
  /// explicit recipe is attached.
  pub scope: ScopeId,
  pub parents: Vec<DependencyId>,
  pub children: Vec<DependencyId>,
  /// Parents that still have to finish before this target may run.
  pub unresolved_parents: usize,
  pub recipe: Vec<RecipeLine>,
  pub commands: Vec<CmdToExec>,
  pub explicit_recipe: bool,
  pub executed: bool,
  pub failed: bool,
  pub probed: bool,
  pub exists: bool,
  pub modified: Option<SystemTime>,
  pub deps_evaluated: bool,
  pub evaluating: bool,
  pub rebuild_required: bool,
  pub is_rule_pseudo: bool,
  pub inference_attempted: bool,
  pub inference: Option<Inference>,
}

impl Target {
  fn new(path: PathBuf, scope: ScopeId) -> Self {
    Self {
      path,
      scope,
      parents: Vec::new(),
      children: Vec::new(),
      unresolved_parents: 0,
      recipe: Vec::new(),
      commands: Vec::new(),
      explicit_recipe: false,
      executed: false,
      failed: false,
      probed: false,
      exists: false,
      modified: None,
      deps_evaluated: false,
      evaluating: false,
      rebuild_required: false,
      is_rule_pseudo: false,
      inference_attempted: false,
      inference: None,
    }
  }

  /// Refresh `exists`/`modified` from the filesystem.
  pub fn probe(&mut self) {
    match std::fs::metadata(&self.path) {
      Ok(meta) => {
        self.exists = true;
        self.modified = meta.modified().ok();
      }
      Err(_) => {
        self.exists = false;
        self.modified = None;
      }
    }
    self.probed = true;
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dependency {
  pub parent: TargetId,
  pub child: TargetId,
}

/// A `{srcdir}.ext{dstdir}.ext` transformation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceRule {
  pub scope: ScopeId,
  pub src_dir: Option<String>,
  pub src_ext: String,
  pub dst_dir: Option<String>,
  pub dst_ext: String,
  /// Pseudo-target holding the generic recipe.
  pub pseudo: TargetId,
}

impl InferenceRule {
  pub fn same_pattern(&self, other: &InferenceRule) -> bool {
    self.src_dir == other.src_dir
      && self.dst_dir == other.dst_dir
      && self.src_ext.eq_ignore_ascii_case(&other.src_ext)
      && self.dst_ext.eq_ignore_ascii_case(&other.dst_ext)
  }
}

impl std::fmt::Display for InferenceRule {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    if let Some(dir) = &self.src_dir {
      write!(f, "{{{}}}", dir)?;
    }
    write!(f, "{}", self.src_ext)?;
    if let Some(dir) = &self.dst_dir {
      write!(f, "{{{}}}", dir)?;
    }
    write!(f, "{}", self.dst_ext)
  }
}

/// Work queues produced by planning and drained by the scheduler.
#[derive(Debug, Default)]
pub struct BuildQueues {
  pub ready: VecDeque<TargetId>,
  pub waiting: Vec<TargetId>,
}

impl BuildQueues {
  pub fn is_empty(&self) -> bool {
    self.ready.is_empty() && self.waiting.is_empty()
  }
}

/// Every target, dependency edge and inference rule of a build.
pub struct TargetGraph {
  root: PathBuf,
  targets: Slab<Target>,
  deps: Slab<Dependency>,
  rules: Slab<InferenceRule>,
  by_path: HashMap<PathBuf, TargetId>,
}

impl TargetGraph {
  /// `root` is only used to shorten names in messages.
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self {
      root: root.into(),
      targets: Slab::new(),
      deps: Slab::new(),
      rules: Slab::new(),
      by_path: HashMap::new(),
    }
  }

  pub fn target(&self, id: TargetId) -> &Target {
    &self.targets[id]
  }

  pub fn target_mut(&mut self, id: TargetId) -> &mut Target {
    &mut self.targets[id]
  }

  pub fn rule(&self, id: RuleId) -> &InferenceRule {
    &self.rules[id]
  }

  pub fn dependency(&self, id: DependencyId) -> &Dependency {
    &self.deps[id]
  }

  pub fn target_ids(&self) -> Vec<TargetId> {
    self.targets.keys()
  }

  pub fn target_count(&self) -> usize {
    self.targets.len()
  }

  pub fn rule_count(&self) -> usize {
    self.rules.len()
  }

  pub fn find(&self, path: &Path) -> Option<TargetId> {
    self.by_path.get(path).copied()
  }

  /// Name used in messages: the path relative to the build root.
  pub fn display_name(&self, id: TargetId) -> String {
    let target = &self.targets[id];
    if target.is_rule_pseudo {
      return format!("<inference rule {}>", target.path.display());
    }
    relative_display(&target.path, &self.root)
  }

  /// Return the target at `path`, creating it in `scope` if unseen.
  pub fn lookup_or_create_path(&mut self, path: PathBuf, scope: ScopeId) -> TargetId {
    if let Some(&id) = self.by_path.get(&path) {
      return id;
    }
    trace!(path = %path.display(), "new target");
    let id = self.targets.insert(Target::new(path.clone(), scope));
    self.by_path.insert(path, id);
    id
  }

  /// Resolve `name` against the scope's directory and look it up.
  pub fn lookup_or_create(&mut self, scopes: &ScopeTable, scope: ScopeId, name: &str) -> TargetId {
    let path = resolve(&scopes.get(scope).dir, name);
    self.lookup_or_create_path(path, scope)
  }

  /// Like [`lookup_or_create`](Self::lookup_or_create) for a target named on
  /// a rule header: the first one in a scope becomes a dependency of the
  /// scope's default target.
  pub fn lookup_or_create_goal(&mut self, scopes: &mut ScopeTable, scope: ScopeId, name: &str) -> TargetId {
    let id = self.lookup_or_create(scopes, scope, name);
    if !scopes.get(scope).default_seeded {
      let default = self.default_target(scopes, scope);
      if default != id {
        self.add_dependency(id, default);
      }
      scopes.get_mut(scope).default_seeded = true;
      debug!(target = %self.display_name(id), "default target");
    }
    id
  }

  /// The synthetic target standing for "build this scope".
  pub fn default_target(&mut self, scopes: &mut ScopeTable, scope: ScopeId) -> TargetId {
    if let Some(id) = scopes.get(scope).default_target {
      return id;
    }
    let path = scopes.get(scope).dir.join(DEFAULT_TARGET_NAME);
    let id = self.lookup_or_create_path(path, scope);
    scopes.get_mut(scope).default_target = Some(id);
    id
  }

  /// Link `parent` (built first) to `child`. Duplicate edges are ignored.
  pub fn add_dependency(&mut self, parent: TargetId, child: TargetId) -> DependencyId {
    let existing = self.targets[child]
      .parents
      .iter()
      .copied()
      .find(|&d| self.deps[d].parent == parent);
    if let Some(dep) = existing {
      return dep;
    }

    let dep = self.deps.insert(Dependency { parent, child });
    self.targets[child].parents.push(dep);
    self.targets[parent].children.push(dep);
    dep
  }

  /// Targets `id` depends on.
  pub fn prerequisites(&self, id: TargetId) -> Vec<TargetId> {
    self.targets[id].parents.iter().map(|&d| self.deps[d].parent).collect()
  }

  /// Targets that depend on `id`.
  pub fn dependents(&self, id: TargetId) -> Vec<TargetId> {
    self.targets[id].children.iter().map(|&d| self.deps[d].child).collect()
  }

  /// Register an inference rule in `scope`, replacing an earlier rule with
  /// the same pattern there. Returns the rule and its pseudo-target.
  pub fn add_rule(
    &mut self,
    scopes: &mut ScopeTable,
    scope: ScopeId,
    src_dir: Option<String>,
    src_ext: String,
    dst_dir: Option<String>,
    dst_ext: String,
  ) -> (RuleId, TargetId) {
    let mut pseudo = Target::new(PathBuf::new(), scope);
    pseudo.is_rule_pseudo = true;
    let pseudo_id = self.targets.insert(pseudo);

    let rule = InferenceRule {
      scope,
      src_dir,
      src_ext,
      dst_dir,
      dst_ext,
      pseudo: pseudo_id,
    };
    self.targets[pseudo_id].path = PathBuf::from(rule.to_string());

    let replaced: Vec<RuleId> = scopes
      .get(scope)
      .rules
      .iter()
      .copied()
      .filter(|&r| self.rules[r].same_pattern(&rule))
      .collect();
    for old in replaced {
      if let Some(old_rule) = self.rules.remove(old) {
        self.targets.remove(old_rule.pseudo);
        debug!(rule = %old_rule, "replacing inference rule");
      }
      scopes.get_mut(scope).rules.retain(|&r| r != old);
    }

    debug!(rule = %rule, "inference rule");
    let id = self.rules.insert(rule);
    scopes.get_mut(scope).rules.push(id);
    (id, pseudo_id)
  }
}
