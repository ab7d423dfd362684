//! Build file preprocessor.
//!
//! Reads a build file line by line in the context of one [`Scope`], joining
//! continuations, stripping comments and classifying each logical line as a
//! directive, a variable assignment, a rule header, a recipe line or inline
//! file content. Conditional directives are tracked with two counters, see
//! [`Conditional`](crate::scope::Conditional); lines inside a branch that is
//! not executing are skipped apart from the bookkeeping directives.
//!
//! Explicit recipe lines are expanded (deferred, without target context) as
//! they are read. Inference rule recipes are stored as written and expanded
//! only when a target is bound to the rule.
//!
//! [`Scope`]: crate::scope::Scope

mod expr;
mod lines;
mod rule;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::{CacheKey, ExitCodeCache};
use crate::consts::BUILD_FILE_NAMES;
use crate::execute::command::get_shell;
use crate::graph::{RecipeLine, TargetGraph, TargetId};
use crate::scope::{ParserState, RecipeState, ScopeId, ScopeTable};
use crate::util::hash::{hash_environment, hash_pairs};
use crate::util::path::resolve;
use crate::vars::{ExpandError, Precedence, expand, unescape_dollars};

pub use expr::{ExprEnv, evaluate};
pub use rule::{HeaderKind, InferencePattern, RuleHeader, RuleOptions, parse_header, parse_inference};

use lines::{Separator, continues, find_separator, join_continuation, split_lines, strip_comment};

/// What went wrong on a build file line.
#[derive(Debug, Error)]
pub enum ParseErrorKind {
  #[error("unrecognized line: {0}")]
  Unrecognized(String),

  #[error("unknown directive !{0}")]
  UnknownDirective(String),

  #[error("invalid conditional expression: {0}")]
  Condition(String),

  #[error("!{0} without a matching !IF")]
  Unmatched(String),

  #[error("unbalanced conditional: missing !ENDIF")]
  Unbalanced,

  #[error("inline file not closed with '<<'")]
  UnterminatedInline,

  #[error("{0}")]
  UserError(String),

  #[error("include file {0} not found")]
  IncludeNotFound(String),

  #[error("bad rule header: {0}")]
  BadRuleHeader(String),

  #[error("unknown rule option '{0}'")]
  UnknownOption(String),

  #[error("no build file found in {}", .0.display())]
  NoBuildFile(PathBuf),

  #[error("cannot read {}: {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error(transparent)]
  Expand(#[from] ExpandError),
}

/// A [`ParseErrorKind`] with the file and line it occurred on.
#[derive(Debug, Error)]
#[error("{}({line}): {kind}", file.display())]
pub struct ParseError {
  pub file: PathBuf,
  pub line: usize,
  pub kind: ParseErrorKind,
}

/// Locate the build file of `dir`, trying each standard name in order.
pub fn find_build_file(dir: &Path) -> Option<PathBuf> {
  BUILD_FILE_NAMES.iter().map(|name| dir.join(name)).find(|p| p.is_file())
}

pub struct Preprocessor<'a> {
  scopes: &'a mut ScopeTable,
  graph: &'a mut TargetGraph,
  cache: &'a mut dyn ExitCodeCache,
  out: Box<dyn Write + 'a>,
  shell: Option<String>,
  file: PathBuf,
  line: usize,
}

impl<'a> Preprocessor<'a> {
  pub fn new(scopes: &'a mut ScopeTable, graph: &'a mut TargetGraph, cache: &'a mut dyn ExitCodeCache) -> Self {
    Self {
      scopes,
      graph,
      cache,
      out: Box::new(std::io::stdout()),
      shell: None,
      file: PathBuf::new(),
      line: 0,
    }
  }

  /// Where `!MESSAGE` text goes. Defaults to stdout.
  pub fn with_output(mut self, out: impl Write + 'a) -> Self {
    self.out = Box::new(out);
    self
  }

  /// Interpreter for `[command]` conditions.
  pub fn with_shell(mut self, shell: Option<String>) -> Self {
    self.shell = shell;
    self
  }

  /// Process the build file of `scope`'s directory.
  pub fn load_directory(&mut self, scope: ScopeId) -> Result<(), ParseError> {
    let dir = self.scopes.get(scope).dir.clone();
    match find_build_file(&dir) {
      Some(path) => self.load_file(scope, &path),
      None => Err(ParseError {
        file: dir.clone(),
        line: 0,
        kind: ParseErrorKind::NoBuildFile(dir),
      }),
    }
  }

  /// Process `path` as the top-level build file of `scope`.
  pub fn load_file(&mut self, scope: ScopeId, path: &Path) -> Result<(), ParseError> {
    let text = fs::read_to_string(path).map_err(|source| ParseError {
      file: path.to_path_buf(),
      line: 0,
      kind: ParseErrorKind::Io {
        path: path.to_path_buf(),
        source,
      },
    })?;
    self.load_str(scope, path, &text)
  }

  /// Process `text` as the top-level build file of `scope`. `path` names it
  /// in messages and anchors relative includes.
  pub fn load_str(&mut self, scope: ScopeId, path: &Path, text: &str) -> Result<(), ParseError> {
    info!(file = %path.display(), "reading build file");
    self.scopes.get_mut(scope).loaded = true;

    let saved = (std::mem::replace(&mut self.file, path.to_path_buf()), self.line);
    let result = self.process(scope, text).and_then(|()| self.finish(scope));
    (self.file, self.line) = saved;
    result
  }

  /// End-of-file checks for a top-level file.
  fn finish(&mut self, scope: ScopeId) -> Result<(), ParseError> {
    let s = self.scopes.get_mut(scope);
    let state = std::mem::take(&mut s.state);
    s.recipe = RecipeState::default();
    if state == ParserState::InlineFileActive {
      return Err(self.error(ParseErrorKind::UnterminatedInline));
    }
    if self.scopes.get(scope).cond.current != 0 {
      return Err(self.error(ParseErrorKind::Unbalanced));
    }
    Ok(())
  }

  fn error(&self, kind: ParseErrorKind) -> ParseError {
    ParseError {
      file: self.file.clone(),
      line: self.line,
      kind,
    }
  }

  fn located<T, E: Into<ParseErrorKind>>(&self, result: Result<T, E>) -> Result<T, ParseError> {
    result.map_err(|e| self.error(e.into()))
  }

  fn process(&mut self, scope: ScopeId, text: &str) -> Result<(), ParseError> {
    let lines = split_lines(text);
    let mut i = 0;

    while i < lines.len() {
      self.line = i + 1;

      if self.scopes.get(scope).state == ParserState::InlineFileActive {
        self.inline_line(scope, lines[i])?;
        i += 1;
        continue;
      }

      let mut logical = lines[i].to_string();
      i += 1;
      while continues(&logical) && i < lines.len() {
        logical = join_continuation(&logical, lines[i]);
        i += 1;
      }
      if continues(&logical) {
        logical = join_continuation(&logical, "").trim_end().to_string();
      }

      self.logical_line(scope, &logical)?;
    }
    Ok(())
  }

  fn logical_line(&mut self, scope: ScopeId, line: &str) -> Result<(), ParseError> {
    if line.starts_with('!') {
      return self.directive(scope, line);
    }
    if !self.scopes.get(scope).cond.is_executing() {
      return Ok(());
    }

    let indented = line.starts_with([' ', '\t']);
    if indented && self.scopes.get(scope).state == ParserState::RecipeActive {
      let body = line.trim();
      if body.is_empty() || body.starts_with('#') {
        return Ok(());
      }
      return self.recipe_line(scope, body);
    }

    let text = strip_comment(line);
    if text.trim().is_empty() {
      return Ok(());
    }
    self.scopes.get_mut(scope).state = ParserState::Default;

    match find_separator(&text) {
      Some(Separator::Assign(at)) => self.assignment(scope, &text, at),
      Some(Separator::Colon(at)) => self.rule_header(scope, &text, at),
      None => Err(self.error(ParseErrorKind::Unrecognized(text.trim().to_string()))),
    }
  }

  fn assignment(&mut self, scope: ScopeId, text: &str, at: usize) -> Result<(), ParseError> {
    let name = self.located(expand(self.scopes, scope, text[..at].trim()))?;
    let name = name.trim();
    if name.is_empty() || name.contains(char::is_whitespace) {
      return Err(self.error(ParseErrorKind::Unrecognized(text.trim().to_string())));
    }
    let value = self.located(expand(self.scopes, scope, text[at + 1..].trim()))?;
    self.scopes.set_variable(scope, name, &value, true, Precedence::BuildFile);
    Ok(())
  }

  fn rule_header(&mut self, scope: ScopeId, text: &str, at: usize) -> Result<(), ParseError> {
    let lhs = self.located(expand(self.scopes, scope, &text[..at]))?;
    let rhs = self.located(expand(self.scopes, scope, &text[at + 1..]))?;
    let header = self.located(parse_header(&lhs, &rhs))?;

    match header.kind {
      HeaderKind::Inference(pattern) => {
        let (_, pseudo) = self.graph.add_rule(
          self.scopes,
          scope,
          pattern.src_dir,
          pattern.src_ext,
          pattern.dst_dir,
          pattern.dst_ext,
        );
        self.begin_recipe(scope, vec![pseudo], true);
      }
      HeaderKind::Explicit(names) => {
        let targets: Vec<TargetId> = names
          .iter()
          .map(|name| self.graph.lookup_or_create_goal(self.scopes, scope, name))
          .collect();

        for dep in &header.deps {
          let prereq = if header.options.dirs {
            let dir = resolve(&self.scopes.get(scope).dir, dep);
            let sub = self.subscope(scope, dir)?;
            match &header.options.target {
              Some(name) => self.graph.lookup_or_create(self.scopes, sub, name),
              None => self.graph.default_target(self.scopes, sub),
            }
          } else {
            self.graph.lookup_or_create(self.scopes, scope, dep)
          };
          for &target in &targets {
            self.graph.add_dependency(prereq, target);
          }
        }
        self.begin_recipe(scope, targets, false);
      }
    }

    if let Some(command) = header.command {
      self.recipe_line(scope, &command)?;
    }
    Ok(())
  }

  /// Scope for a `[dirs]` subdirectory, loading its build file the first
  /// time it is referenced.
  fn subscope(&mut self, parent: ScopeId, dir: PathBuf) -> Result<ScopeId, ParseError> {
    let (id, created) = self.scopes.get_or_create(&dir, Some(parent), Some(parent));
    if created {
      let makedir = dir.to_string_lossy();
      self.scopes.set_variable(id, "MAKEDIR", &makedir, true, Precedence::Predefined);
    }
    if !self.scopes.get(id).loaded {
      debug!(dir = %dir.display(), "entering subdirectory");
      self.load_directory(id)?;
    }
    Ok(id)
  }

  fn begin_recipe(&mut self, scope: ScopeId, targets: Vec<TargetId>, raw: bool) {
    let s = self.scopes.get_mut(scope);
    s.recipe = RecipeState {
      targets,
      raw,
      ..RecipeState::default()
    };
    s.state = ParserState::RecipeActive;
  }

  fn recipe_line(&mut self, scope: ScopeId, text: &str) -> Result<(), ParseError> {
    let raw = self.scopes.get(scope).recipe.raw;
    let text = if raw {
      text.to_string()
    } else {
      self.located(expand(self.scopes, scope, text))?
    };
    let targets = self.scopes.get(scope).recipe.targets.clone();

    if !self.scopes.get(scope).recipe.started {
      for &id in &targets {
        if self.graph.target(id).explicit_recipe {
          warn!(target = %self.graph.display_name(id), "replacing earlier recipe");
        }
        let target = self.graph.target_mut(id);
        target.recipe.clear();
        target.explicit_recipe = !target.is_rule_pseudo;
        target.scope = scope;
      }
      self.scopes.get_mut(scope).recipe.started = true;
    }

    for &id in &targets {
      self.graph.target_mut(id).recipe.push(RecipeLine::new(text.clone()));
    }

    let inline = text.matches("<<").count();
    if inline > 0 {
      let s = self.scopes.get_mut(scope);
      s.recipe.pending_inline = inline;
      s.recipe.inline_buffer.clear();
      s.state = ParserState::InlineFileActive;
    }
    Ok(())
  }

  fn inline_line(&mut self, scope: ScopeId, line: &str) -> Result<(), ParseError> {
    if !line.trim_start().starts_with("<<") {
      self.scopes.get_mut(scope).recipe.inline_buffer.push(line.to_string());
      return Ok(());
    }

    let recipe = &mut self.scopes.get_mut(scope).recipe;
    let buffer = std::mem::take(&mut recipe.inline_buffer);
    let raw = recipe.raw;
    let mut content = buffer.join("\n");
    if !buffer.is_empty() {
      content.push('\n');
    }
    let content = if raw {
      content
    } else {
      self.located(expand(self.scopes, scope, &content))?
    };

    let targets = self.scopes.get(scope).recipe.targets.clone();
    for id in targets {
      if let Some(last) = self.graph.target_mut(id).recipe.last_mut() {
        last.inline_files.push(content.clone());
      }
    }

    let s = self.scopes.get_mut(scope);
    s.recipe.pending_inline = s.recipe.pending_inline.saturating_sub(1);
    if s.recipe.pending_inline == 0 {
      s.state = ParserState::RecipeActive;
    }
    Ok(())
  }

  fn directive(&mut self, scope: ScopeId, line: &str) -> Result<(), ParseError> {
    let text = strip_comment(line);
    let body = text[1..].trim_start();
    let split = body.find(|c: char| !c.is_ascii_alphabetic()).unwrap_or(body.len());
    let mut word = body[..split].to_ascii_uppercase();
    let mut rest = body[split..].trim().to_string();

    // `!ELSE IF ...` spelled with a space.
    if word == "ELSE" {
      let sub_split = rest.find(|c: char| !c.is_ascii_alphabetic()).unwrap_or(rest.len());
      let sub = rest[..sub_split].to_ascii_uppercase();
      if matches!(sub.as_str(), "IF" | "IFDEF" | "IFNDEF") {
        word = format!("ELSE{}", sub);
        rest = rest[sub_split..].trim().to_string();
      }
    }

    match word.as_str() {
      "IF" | "IFDEF" | "IFNDEF" => self.open_conditional(scope, &word, &rest),
      "ELSE" | "ELSEIF" | "ELSEIFDEF" | "ELSEIFNDEF" => self.else_branch(scope, &word, &rest),
      "ENDIF" => self.end_conditional(scope),
      _ if !self.scopes.get(scope).cond.is_executing() => Ok(()),
      "INCLUDE" => self.include(scope, &rest),
      "MESSAGE" => {
        let message = unescape_dollars(&self.located(expand(self.scopes, scope, &rest))?);
        let written = writeln!(self.out, "{}", message).and_then(|()| self.out.flush());
        self.located(written.map_err(|source| ParseErrorKind::Io {
          path: PathBuf::from("<stdout>"),
          source,
        }))
      }
      "ERROR" => {
        let message = unescape_dollars(&self.located(expand(self.scopes, scope, &rest))?);
        Err(self.error(ParseErrorKind::UserError(message)))
      }
      "UNDEF" => {
        let name = self.located(expand(self.scopes, scope, &rest))?;
        let name = name.trim();
        if name.is_empty() {
          return Err(self.error(ParseErrorKind::Condition("!UNDEF needs a name".to_string())));
        }
        self.scopes.undefine_variable(scope, name, Precedence::BuildFile);
        Ok(())
      }
      _ => Err(self.error(ParseErrorKind::UnknownDirective(word))),
    }
  }

  fn open_conditional(&mut self, scope: ScopeId, kind: &str, rest: &str) -> Result<(), ParseError> {
    if !self.scopes.get(scope).cond.is_executing() {
      let cond = &mut self.scopes.get_mut(scope).cond;
      cond.current += 1;
      cond.else_seen.push(false);
      return Ok(());
    }

    let value = self.test(scope, kind, rest)?;
    let cond = &mut self.scopes.get_mut(scope).cond;
    cond.current += 1;
    cond.else_seen.push(false);
    if value {
      cond.active += 1;
    }
    cond.branch_taken = value;
    Ok(())
  }

  fn else_branch(&mut self, scope: ScopeId, kind: &str, rest: &str) -> Result<(), ParseError> {
    let cond = &self.scopes.get(scope).cond;
    if cond.current == 0 || cond.else_seen.last().copied().unwrap_or(false) {
      return Err(self.error(ParseErrorKind::Unmatched(kind.to_string())));
    }
    let (executing, pending, branch_taken) = (cond.is_executing(), cond.is_pending(), cond.branch_taken);
    if kind == "ELSE"
      && let Some(seen) = self.scopes.get_mut(scope).cond.else_seen.last_mut()
    {
      *seen = true;
    }

    if executing {
      let cond = &mut self.scopes.get_mut(scope).cond;
      cond.active -= 1;
      cond.branch_taken = true;
    } else if pending && !branch_taken && self.test(scope, kind, rest)? {
      let cond = &mut self.scopes.get_mut(scope).cond;
      cond.active += 1;
      cond.branch_taken = true;
    }
    Ok(())
  }

  fn end_conditional(&mut self, scope: ScopeId) -> Result<(), ParseError> {
    let cond = &mut self.scopes.get_mut(scope).cond;
    if cond.current == 0 {
      return Err(self.error(ParseErrorKind::Unmatched("ENDIF".to_string())));
    }
    if cond.active == cond.current {
      cond.active -= 1;
    }
    cond.current -= 1;
    cond.else_seen.pop();
    Ok(())
  }

  /// Evaluate the condition of an `!IF`-family or `!ELSE`-family directive.
  fn test(&mut self, scope: ScopeId, kind: &str, rest: &str) -> Result<bool, ParseError> {
    let kind = kind.strip_prefix("ELSE").unwrap_or(kind);
    let text = self.located(expand(self.scopes, scope, rest))?;

    match kind {
      "" => Ok(true),
      "IFDEF" | "IFNDEF" => {
        let name = text.trim();
        if name.is_empty() {
          return Err(self.error(ParseErrorKind::Condition(format!("!{} needs a name", kind))));
        }
        let defined = self.scopes.is_defined(scope, name);
        Ok(if kind == "IFDEF" { defined } else { !defined })
      }
      _ => {
        let mut env = Conditions {
          scopes: self.scopes,
          scope,
          cache: &mut *self.cache,
          shell: self.shell.as_deref(),
        };
        let result = evaluate(&text, &mut env);
        self.located(result.map_err(ParseErrorKind::Condition))
      }
    }
  }

  fn include(&mut self, scope: ScopeId, rest: &str) -> Result<(), ParseError> {
    let name = self.located(expand(self.scopes, scope, rest))?;
    let name = name.trim().trim_matches('"');

    let path = match name.strip_prefix('<').and_then(|n| n.strip_suffix('>')) {
      Some(inner) => self
        .search_include_path(scope, inner)
        .ok_or_else(|| self.error(ParseErrorKind::IncludeNotFound(inner.to_string())))?,
      None => {
        let base = self.file.parent().map(Path::to_path_buf).unwrap_or_default();
        resolve(&base, name)
      }
    };

    let text = fs::read_to_string(&path).map_err(|source| {
      self.error(ParseErrorKind::Io {
        path: path.clone(),
        source,
      })
    })?;
    debug!(file = %path.display(), "including");

    let saved = (std::mem::replace(&mut self.file, path), self.line);
    let result = self.process(scope, &text);
    (self.file, self.line) = saved;
    result
  }

  fn search_include_path(&self, scope: ScopeId, name: &str) -> Option<PathBuf> {
    let dir = &self.scopes.get(scope).dir;
    self
      .scopes
      .lookup(scope, "INCLUDE")
      .value()
      .split(';')
      .map(str::trim)
      .filter(|d| !d.is_empty())
      .map(|d| resolve(dir, d).join(name))
      .find(|p| p.is_file())
  }
}

/// Expression environment bound to one scope.
struct Conditions<'p, 'a> {
  scopes: &'p ScopeTable,
  scope: ScopeId,
  cache: &'p mut (dyn ExitCodeCache + 'a),
  shell: Option<&'p str>,
}

impl ExprEnv for Conditions<'_, '_> {
  fn is_defined(&self, name: &str) -> bool {
    self.scopes.is_defined(self.scope, name)
  }

  fn exists(&self, path: &str) -> bool {
    resolve(&self.scopes.get(self.scope).dir, path).exists()
  }

  fn run(&mut self, command: &str) -> Result<i64, String> {
    let vars = self.scopes.visible_variables(self.scope);
    let key = CacheKey {
      env: hash_environment(),
      vars: hash_pairs(vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))),
      command: command.to_string(),
    };
    if let Some(code) = self.cache.lookup(&key) {
      debug!(command, code, "cached condition");
      return Ok(i64::from(code));
    }

    let dir = &self.scopes.get(self.scope).dir;
    let (shell, args) = get_shell(self.shell);
    let status = std::process::Command::new(&shell)
      .args(&args)
      .arg(command)
      .current_dir(dir)
      .status()
      .map_err(|e| format!("cannot run [{}]: {}", command, e))?;
    let code = status.code().unwrap_or(-1);
    debug!(command, code, "condition command");

    self.cache.insert(key, code);
    Ok(i64::from(code))
  }
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;

  use serial_test::serial;
  use tempfile::TempDir;
  use tracing_test::traced_test;

  use super::*;
  use crate::cache::MemoryCache;
  use crate::util::testutil::write_file;

  struct Harness {
    _tmp: TempDir,
    dir: PathBuf,
    scopes: ScopeTable,
    root: ScopeId,
    graph: TargetGraph,
    cache: MemoryCache,
    out: Vec<u8>,
  }

  impl Harness {
    fn new() -> Self {
      let tmp = TempDir::new().unwrap();
      let dir = tmp.path().to_path_buf();
      let mut scopes = ScopeTable::new();
      let (root, _) = scopes.get_or_create(&dir, None, None);
      Self {
        _tmp: tmp,
        graph: TargetGraph::new(&dir),
        dir,
        scopes,
        root,
        cache: MemoryCache::new(),
        out: Vec::new(),
      }
    }

    fn load(&mut self, text: &str) -> Result<(), ParseError> {
      let path = self.dir.join("Makefile");
      Preprocessor::new(&mut self.scopes, &mut self.graph, &mut self.cache)
        .with_output(&mut self.out)
        .load_str(self.root, &path, text)
    }

    fn var(&self, name: &str) -> &str {
      self.scopes.lookup(self.root, name).value()
    }

    fn target(&self, name: &str) -> TargetId {
      self.graph.find(&self.dir.join(name)).unwrap()
    }

    fn recipe(&self, name: &str) -> Vec<String> {
      let id = self.target(name);
      self.graph.target(id).recipe.iter().map(|l| l.text.clone()).collect()
    }

    fn output(&self) -> String {
      String::from_utf8_lossy(&self.out).into_owned()
    }
  }

  #[test]
  fn assignments_expand_at_definition() {
    let mut h = Harness::new();
    h.load("CC = cl\nCFLAGS = /O2 $(CC)\nCC = gcc\n").unwrap();
    assert_eq!(h.var("CFLAGS"), "/O2 cl");
    assert_eq!(h.var("CC"), "gcc");
  }

  #[test]
  fn appending_to_itself() {
    let mut h = Harness::new();
    h.load("OBJS = a.obj\nOBJS = $(OBJS) b.obj\n").unwrap();
    assert_eq!(h.var("OBJS"), "a.obj b.obj");
  }

  #[test]
  fn false_if_takes_else_branch() {
    let mut h = Harness::new();
    h.load("!IF 1==2\nX = body\n!ELSE\nX = other\n!ENDIF\n").unwrap();
    assert_eq!(h.var("X"), "other");
  }

  #[test]
  fn elseif_chain_and_nesting() {
    let mut h = Harness::new();
    h.load(
      "!IF 0\nA = 1\n!ELSEIF 1\nA = 2\n!  IF 0\nB = 1\n!  ELSE\nB = 2\n!  ENDIF\n!ELSEIF 1\nA = 3\n!ELSE\nA = 4\n!ENDIF\n",
    )
    .unwrap();
    assert_eq!(h.var("A"), "2");
    assert_eq!(h.var("B"), "2");
    assert_eq!(h.scopes.get(h.root).cond, Default::default());
  }

  #[test]
  fn else_if_spelled_with_space() {
    let mut h = Harness::new();
    h.load("!IF 0\nA = 1\n!ELSE IF 1\nA = 2\n!ENDIF\n").unwrap();
    assert_eq!(h.var("A"), "2");
  }

  #[test]
  fn skipped_branches_are_not_evaluated() {
    let mut h = Harness::new();
    h.load("!IF 0\n!IF \"a\" == 1\nX = 1\n!ELSEIF \"b\" == 2\n!ENDIF\n!ENDIF\nY = done\n")
      .unwrap();
    assert_eq!(h.var("X"), "");
    assert_eq!(h.var("Y"), "done");
  }

  #[test]
  fn nested_else_under_false_branch_stays_off() {
    let mut h = Harness::new();
    h.load("!IF 0\n!IF 1\nX = 1\n!ELSE\nX = 2\n!ENDIF\n!ENDIF\n").unwrap();
    assert!(!h.scopes.is_defined(h.root, "X"));
  }

  #[test]
  fn unbalanced_conditionals() {
    let mut h = Harness::new();
    let err = h.load("!IF 1\nX = 1\n").unwrap_err();
    assert!(matches!(err.kind, ParseErrorKind::Unbalanced));

    let mut h = Harness::new();
    let err = h.load("X = 1\n!ELSE\n").unwrap_err();
    assert!(matches!(err.kind, ParseErrorKind::Unmatched(ref d) if d == "ELSE"));
    assert_eq!(err.line, 2);

    let mut h = Harness::new();
    assert!(matches!(h.load("!ENDIF\n").unwrap_err().kind, ParseErrorKind::Unmatched(_)));
  }

  #[test]
  fn else_after_else_is_rejected() {
    let mut h = Harness::new();
    let err = h.load("!IF 1\nX = a\n!ELSE\nX = b\n!ELSE\nX = c\n!ENDIF\n").unwrap_err();
    assert!(matches!(err.kind, ParseErrorKind::Unmatched(ref d) if d == "ELSE"));
    assert_eq!(err.line, 5);

    let mut h = Harness::new();
    let err = h.load("!IF 0\n!ELSE\n!ELSEIF 1\n!ENDIF\n").unwrap_err();
    assert!(matches!(err.kind, ParseErrorKind::Unmatched(ref d) if d == "ELSEIF"));

    // Each nesting level tracks its own ELSE.
    let mut h = Harness::new();
    h.load("!IF 0\n!ELSE\n!IF 1\n!ELSE\n!ENDIF\n!ENDIF\n!IF 0\n!ELSEIF 0\n!ELSEIF 1\nY = yes\n!ELSE\n!ENDIF\n")
      .unwrap();
    assert_eq!(h.var("Y"), "yes");
  }

  #[test]
  fn bad_expression_is_fatal() {
    let mut h = Harness::new();
    let err = h.load("!IF \"x\" == 1\n!ENDIF\n").unwrap_err();
    assert!(matches!(err.kind, ParseErrorKind::Condition(_)));
  }

  #[test]
  fn ifdef_ifndef_and_undef() {
    let mut h = Harness::new();
    h.load(
      "DEBUG = 1\n!IFDEF DEBUG\nA = yes\n!ENDIF\n!UNDEF DEBUG\n!IFNDEF DEBUG\nB = yes\n!ENDIF\n!IF DEFINED(DEBUG)\nC = yes\n!ENDIF\n",
    )
    .unwrap();
    assert_eq!(h.var("A"), "yes");
    assert_eq!(h.var("B"), "yes");
    assert!(!h.scopes.is_defined(h.root, "C"));
  }

  #[test]
  fn message_unescapes_dollars() {
    let mut h = Harness::new();
    h.load("PRICE = 5\n!MESSAGE cost $$$(PRICE)\n").unwrap();
    assert_eq!(h.output(), "cost $5\n");
  }

  #[test]
  fn error_directive_is_fatal() {
    let mut h = Harness::new();
    let err = h.load("!IF 1\n!ERROR unsupported platform\n!ENDIF\n").unwrap_err();
    assert!(matches!(err.kind, ParseErrorKind::UserError(ref m) if m == "unsupported platform"));
    assert_eq!(err.line, 2);
  }

  #[test]
  fn unknown_directive_and_unrecognized_line() {
    let mut h = Harness::new();
    assert!(matches!(
      h.load("!FROB x\n").unwrap_err().kind,
      ParseErrorKind::UnknownDirective(ref d) if d == "FROB"
    ));

    let mut h = Harness::new();
    let err = h.load("X = 1\nthis is nonsense\n").unwrap_err();
    assert!(matches!(err.kind, ParseErrorKind::Unrecognized(_)));
    assert_eq!(err.line, 2);
    assert!(err.to_string().contains("Makefile(2)"));
  }

  #[test]
  fn explicit_rule_builds_graph_and_defers_shorthands() {
    let mut h = Harness::new();
    h.load("OBJ = a.obj\nall: app.exe\napp.exe: $(OBJ) util.obj\n\tlink $(OBJ) -o $@\n\n\t@echo done\n")
      .unwrap();

    let app = h.target("app.exe");
    let a = h.target("a.obj");
    let util = h.target("util.obj");
    assert_eq!(h.graph.prerequisites(app), vec![a, util]);
    assert_eq!(h.recipe("app.exe"), vec!["link a.obj -o $@", "@echo done"]);
    assert!(h.graph.target(app).explicit_recipe);
    assert!(!h.graph.target(h.target("all")).explicit_recipe);

    let default = h.graph.default_target(&mut h.scopes, h.root);
    assert_eq!(h.graph.prerequisites(default), vec![h.target("all")]);
  }

  #[test]
  fn recipe_uses_values_at_parse_time() {
    let mut h = Harness::new();
    h.load("MSG = first\nout:\n\techo $(MSG)\nMSG = second\n").unwrap();
    assert_eq!(h.recipe("out"), vec!["echo first"]);
  }

  #[test]
  fn inference_recipe_is_stored_raw() {
    let mut h = Harness::new();
    h.load(".c.obj:\n\tcl $(CFLAGS) /c $<\n").unwrap();

    let rules = &h.scopes.get(h.root).rules;
    assert_eq!(rules.len(), 1);
    let rule = h.graph.rule(rules[0]);
    assert_eq!(rule.src_ext, ".c");
    assert_eq!(rule.dst_ext, ".obj");
    let pseudo = h.graph.target(rule.pseudo);
    assert!(pseudo.is_rule_pseudo);
    assert!(!pseudo.explicit_recipe);
    assert_eq!(pseudo.recipe[0].text, "cl $(CFLAGS) /c $<");
  }

  #[test]
  fn comments_and_continuations() {
    let mut h = Harness::new();
    h.load("# header\nX = 1 # trailing\nLIST = a \\\n  b \\\n  c\nout:\n\t# not a command\n\techo # kept\n")
      .unwrap();
    assert_eq!(h.var("X"), "1");
    assert_eq!(h.var("LIST"), "a b c");
    assert_eq!(h.recipe("out"), vec!["echo # kept"]);
  }

  #[test]
  fn header_command_after_semicolon() {
    let mut h = Harness::new();
    h.load("clean: ; rm -f *.obj\n\techo cleaned\n").unwrap();
    assert_eq!(h.recipe("clean"), vec!["rm -f *.obj", "echo cleaned"]);
  }

  #[test]
  fn inline_file_content_is_collected() {
    let mut h = Harness::new();
    h.load("NAME = world\nout.txt:\n\tcat <<\nhello $(NAME)\n# not a comment \\\n<<\n\techo after\n")
      .unwrap();

    let out = h.target("out.txt");
    let recipe = &h.graph.target(out).recipe;
    assert_eq!(recipe.len(), 2);
    assert_eq!(recipe[0].inline_files, vec!["hello world\n# not a comment \\\n"]);
    assert_eq!(recipe[1].text, "echo after");
  }

  #[test]
  fn unterminated_inline_file() {
    let mut h = Harness::new();
    let err = h.load("out:\n\tcat <<\nnever closed\n").unwrap_err();
    assert!(matches!(err.kind, ParseErrorKind::UnterminatedInline));
  }

  #[test]
  #[traced_test]
  fn second_recipe_replaces_first() {
    let mut h = Harness::new();
    h.load("a:\n\techo one\na:\n\techo two\n").unwrap();
    assert_eq!(h.recipe("a"), vec!["echo two"]);
    assert!(logs_contain("replacing earlier recipe"));
  }

  #[test]
  fn dependency_lines_accumulate() {
    let mut h = Harness::new();
    h.load("app: a.obj\napp: b.obj\n\tlink\n").unwrap();
    assert_eq!(h.graph.prerequisites(h.target("app")).len(), 2);
    assert_eq!(h.recipe("app"), vec!["link"]);
  }

  #[test]
  fn command_line_value_wins() {
    let mut h = Harness::new();
    h.scopes
      .set_variable(h.root, "FOO", "b", true, Precedence::CommandLine);
    h.load("FOO = a\nX = $(FOO)\nout:\n\techo $(FOO)\n").unwrap();
    assert_eq!(h.var("FOO"), "b");
    assert_eq!(h.var("X"), "b");
    assert_eq!(h.recipe("out"), vec!["echo b"]);
  }

  #[test]
  fn include_relative_and_search_path() {
    let mut h = Harness::new();
    write_file(&h.dir.join("conf/local.mk"), "LOCAL = yes\n");
    write_file(&h.dir.join("inc/shared.mk"), "SHARED = yes\n!IF 1\n");
    let text = "!INCLUDE conf/local.mk\nINCLUDE = missing;inc\n!INCLUDE <shared.mk>\nX = 1\n!ENDIF\n";
    h.load(text).unwrap();
    assert_eq!(h.var("LOCAL"), "yes");
    assert_eq!(h.var("SHARED"), "yes");
    assert_eq!(h.var("X"), "1");
  }

  #[test]
  fn missing_include_reports_path() {
    let mut h = Harness::new();
    let err = h.load("!INCLUDE <nowhere.mk>\n").unwrap_err();
    assert!(matches!(err.kind, ParseErrorKind::IncludeNotFound(ref n) if n == "nowhere.mk"));

    let mut h = Harness::new();
    let err = h.load("!INCLUDE nowhere.mk\n").unwrap_err();
    assert!(matches!(err.kind, ParseErrorKind::Io { .. }));
  }

  #[test]
  fn dirs_option_loads_subdirectory_once() {
    let mut h = Harness::new();
    write_file(&h.dir.join("lib/Makefile"), "LIBVAR = inner\nbuild:\n\techo lib\n");
    h.load("all: lib [dirs target=build]\n\techo all\nagain: lib [dirs]\n").unwrap();

    let sub = h.scopes.find(&h.dir.join("lib")).unwrap();
    assert_eq!(h.scopes.get(sub).parent, Some(h.root));
    assert!(h.scopes.get(sub).loaded);
    assert_eq!(h.scopes.lookup(sub, "LIBVAR").value(), "inner");
    assert!(!h.scopes.is_defined(h.root, "LIBVAR"));

    let build = h.graph.find(&h.dir.join("lib/build")).unwrap();
    assert_eq!(h.graph.prerequisites(h.target("all")), vec![build]);

    let sub_default = h.graph.default_target(&mut h.scopes, sub);
    assert_eq!(h.graph.prerequisites(h.target("again")), vec![sub_default]);
    assert_eq!(h.graph.prerequisites(sub_default), vec![build]);
  }

  #[test]
  fn dirs_without_build_file_fails() {
    let mut h = Harness::new();
    std::fs::create_dir_all(h.dir.join("empty")).unwrap();
    let err = h.load("all: empty [dirs]\n").unwrap_err();
    assert!(matches!(err.kind, ParseErrorKind::NoBuildFile(_)));
  }

  #[cfg(unix)]
  #[test]
  #[serial]
  fn command_conditions_are_memoized() {
    let mut h = Harness::new();
    let text = "!IF [exit 3] == 3\n!MESSAGE three\n!ENDIF\n";
    h.load(text).unwrap();
    assert_eq!(h.cache.len(), 1);

    h.load(text).unwrap();
    assert_eq!(h.cache.len(), 1);
    assert_eq!(h.output(), "three\nthree\n");
  }

  #[cfg(unix)]
  #[test]
  #[serial]
  fn variable_change_invalidates_condition_cache() {
    let mut h = Harness::new();
    h.load("!IF [exit 0] == 0\n!ENDIF\nV = 1\n!IF [exit 0] == 0\n!ENDIF\n").unwrap();
    assert_eq!(h.cache.len(), 2);
  }

  #[test]
  fn exist_checks_relative_to_scope() {
    let mut h = Harness::new();
    write_file(&h.dir.join("config.h"), "");
    h.load("!IF EXIST(config.h) && !EXIST(other.h)\nHAVE = 1\n!ENDIF\n").unwrap();
    assert_eq!(h.var("HAVE"), "1");
  }
}
