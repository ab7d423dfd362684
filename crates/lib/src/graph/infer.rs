//! Inference rule resolution.
//!
//! A target with no explicit recipe is matched against the inference rules
//! visible from its scope. A rule applies when its destination extension (and
//! directory, if given) match the target and the candidate source either
//! exists on disk or is itself a target with an explicit recipe. If no rule
//! applies directly, one intermediate step is tried: a rule whose source
//! could in turn be produced by a second rule from an existing file.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use super::{Inference, RuleId, TargetGraph, TargetId};
use crate::scope::ScopeTable;
use crate::util::path::{dot_extension, resolve};

pub struct InferenceResolver<'a> {
  graph: &'a mut TargetGraph,
  scopes: &'a ScopeTable,
}

impl<'a> InferenceResolver<'a> {
  pub fn new(graph: &'a mut TargetGraph, scopes: &'a ScopeTable) -> Self {
    Self { graph, scopes }
  }

  /// Resolve every target that still lacks a recipe, including any created
  /// along the way.
  pub fn resolve_all(&mut self) {
    let mut seen: HashSet<TargetId> = HashSet::new();
    loop {
      let pending: Vec<TargetId> = self
        .graph
        .target_ids()
        .into_iter()
        .filter(|id| !seen.contains(id))
        .collect();
      if pending.is_empty() {
        break;
      }
      for id in pending {
        seen.insert(id);
        self.resolve(id);
      }
    }
  }

  /// Attach an inference rule to `id` if one applies. Repeated calls return
  /// the first answer.
  pub fn resolve(&mut self, id: TargetId) -> Option<RuleId> {
    let target = self.graph.target(id);
    if target.is_rule_pseudo || target.explicit_recipe || target.inference_attempted || target.inference.is_some() {
      return target.inference.map(|i| i.rule);
    }
    self.graph.target_mut(id).inference_attempted = true;

    let path = self.graph.target(id).path.clone();
    let scope = self.graph.target(id).scope;
    let rules = self.scopes.visible_rules(scope);

    let direct = self.candidates(&rules, &path);
    for (rule, source) in &direct {
      if self.source_exists(source) {
        self.attach(id, *rule, source.clone());
        return Some(*rule);
      }
    }

    for (outer, intermediate) in &direct {
      for (inner, source) in self.candidates(&rules, intermediate) {
        if !self.source_exists(&source) {
          continue;
        }
        debug!(
          target = %self.graph.display_name(id),
          via = %intermediate.display(),
          "chained inference"
        );
        let mid = self.graph.lookup_or_create_path(intermediate.clone(), scope);
        if self.graph.target(mid).inference.is_none() && !self.graph.target(mid).explicit_recipe {
          self.graph.target_mut(mid).inference_attempted = true;
          self.attach(mid, inner, source);
        }
        self.attach(id, *outer, intermediate.clone());
        return Some(*outer);
      }
    }

    trace!(target = %self.graph.display_name(id), "no inference rule");
    None
  }

  /// Rules whose destination matches `path`, each with its candidate source.
  fn candidates(&self, rules: &[RuleId], path: &Path) -> Vec<(RuleId, PathBuf)> {
    let ext = dot_extension(path);
    if ext.is_empty() {
      return Vec::new();
    }

    rules
      .iter()
      .filter(|&&r| self.graph.rule(r).dst_ext.eq_ignore_ascii_case(&ext))
      .filter_map(|&r| self.candidate_source(r, path).map(|src| (r, src)))
      .collect()
  }

  fn candidate_source(&self, rule: RuleId, path: &Path) -> Option<PathBuf> {
    let rule = self.graph.rule(rule);
    let rule_dir = &self.scopes.get(rule.scope).dir;
    let target_dir = path.parent()?;

    if let Some(dst) = &rule.dst_dir
      && resolve(rule_dir, dst) != target_dir
    {
      return None;
    }

    let stem = path.file_stem()?.to_string_lossy();
    let src_dir = match &rule.src_dir {
      Some(dir) => resolve(rule_dir, dir),
      None => target_dir.to_path_buf(),
    };
    Some(src_dir.join(format!("{}{}", stem, rule.src_ext)))
  }

  fn source_exists(&self, path: &Path) -> bool {
    if let Some(id) = self.graph.find(path)
      && self.graph.target(id).explicit_recipe
    {
      return true;
    }
    path.exists()
  }

  fn attach(&mut self, id: TargetId, rule: RuleId, source: PathBuf) {
    let scope = self.graph.target(id).scope;
    let source = self.graph.lookup_or_create_path(source, scope);
    debug!(
      target = %self.graph.display_name(id),
      rule = %self.graph.rule(rule),
      source = %self.graph.display_name(source),
      "inferred"
    );
    self.graph.target_mut(id).inference = Some(Inference {
      rule,
      source,
      promoted: false,
    });
  }
}
