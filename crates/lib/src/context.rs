//! Top-level build driver.
//!
//! A [`MakeContext`] owns everything one invocation needs: the scopes, the
//! target graph, the condition cache, the builtin table and the queues.
//! Callers go through it in order: define variables, [`load`](MakeContext::load)
//! the build file, [`plan`](MakeContext::plan) the goals, then
//! [`execute`](MakeContext::execute).

use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::cache::{ExitCodeCache, MemoryCache};
use crate::execute::{BuildReport, BuiltinTable, ExecuteConfig, ExecuteError, Scheduler, Spawner, TokioSpawner};
use crate::graph::{BuildQueues, GraphError, InferenceResolver, Planner, TargetGraph, TargetId};
use crate::preprocess::{ParseError, Preprocessor};
use crate::scope::{ScopeId, ScopeTable};
use crate::vars::Precedence;

#[derive(Debug, Error)]
pub enum MakeError {
  #[error(transparent)]
  Parse(#[from] ParseError),

  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error(transparent)]
  Execute(#[from] ExecuteError),

  #[error("cannot use {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

pub struct MakeContext {
  config: ExecuteConfig,
  scopes: ScopeTable,
  graph: TargetGraph,
  cache: Box<dyn ExitCodeCache>,
  builtins: BuiltinTable,
  root: ScopeId,
  root_dir: PathBuf,
  queues: BuildQueues,
  goals: Vec<TargetId>,
}

impl MakeContext {
  /// Create a context rooted at `dir`. The process environment becomes the
  /// predefined variables, along with `MAKE` and `MAKEDIR`.
  pub fn new(dir: &Path, config: ExecuteConfig) -> Result<Self, MakeError> {
    let root_dir = dunce::canonicalize(dir).map_err(|source| MakeError::Io {
      path: dir.to_path_buf(),
      source,
    })?;
    let mut scopes = ScopeTable::new();
    let (root, _) = scopes.get_or_create(&root_dir, None, None);

    for (name, value) in std::env::vars() {
      scopes.set_variable(root, &name, &value, true, Precedence::Predefined);
    }
    let make = std::env::args().next().unwrap_or_else(|| "mkr".to_string());
    scopes.set_variable(root, "MAKE", &make, true, Precedence::Predefined);
    scopes.set_variable(root, "MAKEDIR", &root_dir.to_string_lossy(), true, Precedence::Predefined);

    debug!(root = %root_dir.display(), jobs = config.effective_jobs(), "new build context");
    Ok(Self {
      config,
      scopes,
      graph: TargetGraph::new(&root_dir),
      cache: Box::new(MemoryCache::new()),
      builtins: BuiltinTable::default(),
      root,
      root_dir,
      queues: BuildQueues::default(),
      goals: Vec::new(),
    })
  }

  /// Replace the in-memory condition cache.
  pub fn with_cache(mut self, cache: Box<dyn ExitCodeCache>) -> Self {
    self.cache = cache;
    self
  }

  pub fn config(&self) -> &ExecuteConfig {
    &self.config
  }

  pub fn root_dir(&self) -> &Path {
    &self.root_dir
  }

  pub fn root_scope(&self) -> ScopeId {
    self.root
  }

  pub fn scopes(&self) -> &ScopeTable {
    &self.scopes
  }

  pub fn graph(&self) -> &TargetGraph {
    &self.graph
  }

  pub fn queues(&self) -> &BuildQueues {
    &self.queues
  }

  /// Register additional builtins before executing.
  pub fn builtins_mut(&mut self) -> &mut BuiltinTable {
    &mut self.builtins
  }

  /// `NAME=value` from the command line; nothing a build file does can
  /// override it.
  pub fn set_command_line_variable(&mut self, name: &str, value: &str) {
    self
      .scopes
      .set_variable(self.root, name, value, true, Precedence::CommandLine);
  }

  pub fn set_predefined(&mut self, name: &str, value: &str) {
    self
      .scopes
      .set_variable(self.root, name, value, true, Precedence::Predefined);
  }

  /// Read `file` (relative to the root directory), or the first standard
  /// build file there when None. `!MESSAGE` text goes to stdout.
  pub fn load(&mut self, file: Option<&Path>) -> Result<(), MakeError> {
    self.load_with_output(file, std::io::stdout())
  }

  pub fn load_with_output(&mut self, file: Option<&Path>, out: impl Write) -> Result<(), MakeError> {
    let mut preprocessor = Preprocessor::new(&mut self.scopes, &mut self.graph, &mut *self.cache)
      .with_output(out)
      .with_shell(self.config.shell.clone());
    match file {
      Some(file) => preprocessor.load_file(self.root, &self.root_dir.join(file))?,
      None => preprocessor.load_directory(self.root)?,
    }
    Ok(())
  }

  /// Process build file text held in memory, as if read from `name` in the
  /// root directory.
  pub fn load_str(&mut self, name: &str, text: &str, out: impl Write) -> Result<(), MakeError> {
    let path = self.root_dir.join(name);
    Preprocessor::new(&mut self.scopes, &mut self.graph, &mut *self.cache)
      .with_output(out)
      .with_shell(self.config.shell.clone())
      .load_str(self.root, &path, text)?;
    Ok(())
  }

  /// Attach inference rules to every target lacking a recipe.
  pub fn resolve_inference(&mut self) {
    InferenceResolver::new(&mut self.graph, &self.scopes).resolve_all();
  }

  /// Decide what `goals` need and fill the queues. No goals means the root
  /// scope's default target.
  pub fn plan(&mut self, goals: &[String]) -> Result<(), MakeError> {
    let ids = if goals.is_empty() {
      let default = self.graph.default_target(&mut self.scopes, self.root);
      if self.graph.prerequisites(default).is_empty() {
        return Err(GraphError::NoTargets.into());
      }
      vec![default]
    } else {
      goals
        .iter()
        .map(|name| self.graph.lookup_or_create(&self.scopes, self.root, name))
        .collect()
    };

    self.resolve_inference();
    let mut planner =
      Planner::new(&mut self.graph, &self.scopes, &mut self.queues).always_rebuild(self.config.always_rebuild);
    for &id in &ids {
      planner.determine(id)?;
    }

    info!(
      goals = ids.len(),
      targets = self.graph.target_count(),
      ready = self.queues.ready.len(),
      waiting = self.queues.waiting.len(),
      "planned build"
    );
    self.goals = ids;
    Ok(())
  }

  /// Goals from the last [`plan`](Self::plan) that need no work.
  pub fn up_to_date_goals(&self) -> Vec<String> {
    self
      .goals
      .iter()
      .filter(|&&id| !self.graph.target(id).rebuild_required)
      .map(|&id| self.graph.display_name(id))
      .collect()
  }

  /// Run the planned work with real processes, writing to stdout/stderr.
  pub async fn execute(&mut self) -> Result<BuildReport, MakeError> {
    self
      .execute_with(&TokioSpawner, std::io::stdout(), std::io::stderr(), true)
      .await
  }

  /// Run the planned work with `spawner`, writing command output to `out`
  /// and failure messages to `err`.
  pub async fn execute_with<S: Spawner>(
    &mut self,
    spawner: &S,
    out: impl Write,
    err: impl Write,
    handle_interrupts: bool,
  ) -> Result<BuildReport, MakeError> {
    let report = Scheduler::new(
      &mut self.graph,
      &self.scopes,
      &mut self.queues,
      &self.config,
      spawner,
      &self.builtins,
    )
    .with_output(out)
    .with_errors(err)
    .handle_interrupts(handle_interrupts)
    .run()
    .await?;
    Ok(report)
  }
}
