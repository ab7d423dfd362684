//! Staleness evaluation.
//!
//! Walks the prerequisites of a goal depth first, probes timestamps, decides
//! which targets must be rebuilt, generates their final command lines and
//! sorts them into the ready and waiting queues.

use std::path::PathBuf;

use tracing::{debug, trace};

use super::{BuildQueues, CmdToExec, GraphError, RecipeLine, TargetGraph, TargetId};
use crate::scope::ScopeTable;
use crate::vars::{AutoVars, expand_for_target};

pub struct Planner<'a> {
  graph: &'a mut TargetGraph,
  scopes: &'a ScopeTable,
  queues: &'a mut BuildQueues,
  always_rebuild: bool,
}

impl<'a> Planner<'a> {
  pub fn new(graph: &'a mut TargetGraph, scopes: &'a ScopeTable, queues: &'a mut BuildQueues) -> Self {
    Self {
      graph,
      scopes,
      queues,
      always_rebuild: false,
    }
  }

  /// Treat every target with a recipe or prerequisites as stale.
  pub fn always_rebuild(mut self, yes: bool) -> Self {
    self.always_rebuild = yes;
    self
  }

  /// Evaluate `id` and everything it depends on. Each target is evaluated
  /// once no matter how many goals reach it.
  pub fn determine(&mut self, id: TargetId) -> Result<(), GraphError> {
    let target = self.graph.target(id);
    if target.deps_evaluated {
      return Ok(());
    }
    if target.evaluating {
      return Err(GraphError::Cycle(self.graph.display_name(id)));
    }
    self.graph.target_mut(id).evaluating = true;

    if let Some(mut inference) = self.graph.target(id).inference
      && !inference.promoted
    {
      self.graph.add_dependency(inference.source, id);
      inference.promoted = true;
      self.graph.target_mut(id).inference = Some(inference);
    }

    let parents = self.graph.prerequisites(id);
    for &parent in &parents {
      self.determine(parent)?;
    }

    self.graph.target_mut(id).probe();
    let target = self.graph.target(id);
    let has_work = target.explicit_recipe || target.inference.is_some() || !parents.is_empty();
    let mut rebuild = !target.exists || (self.always_rebuild && has_work);
    let mut unresolved = 0;
    let mut newer = Vec::new();

    for &parent in &parents {
      let p = self.graph.target(parent);
      if p.rebuild_required {
        rebuild = true;
        unresolved += 1;
        newer.push(p.path.clone());
      } else if let (Some(theirs), Some(ours)) = (p.modified, target.modified)
        && theirs > ours
      {
        rebuild = true;
        newer.push(p.path.clone());
      }
    }

    if rebuild && !has_work {
      let name = self.graph.display_name(id);
      self.graph.target_mut(id).evaluating = false;
      return Err(GraphError::NoRecipe(name));
    }

    if rebuild {
      let commands = self.commands_for(id, &parents, newer)?;
      trace!(target = %self.graph.display_name(id), count = commands.len(), "commands");
      let target = self.graph.target_mut(id);
      target.commands = commands;
      target.unresolved_parents = unresolved;
      if unresolved == 0 {
        self.queues.ready.push_back(id);
      } else {
        self.queues.waiting.push(id);
      }
      debug!(target = %self.graph.display_name(id), unresolved, "out of date");
    }

    let target = self.graph.target_mut(id);
    target.rebuild_required = rebuild;
    target.deps_evaluated = true;
    target.evaluating = false;
    Ok(())
  }

  /// Final command lines for `id`, from its explicit recipe or else from the
  /// recipe of its inference rule.
  fn commands_for(&self, id: TargetId, parents: &[TargetId], newer: Vec<PathBuf>) -> Result<Vec<CmdToExec>, GraphError> {
    let target = self.graph.target(id);
    let lines: &[RecipeLine] = if target.explicit_recipe {
      &target.recipe
    } else if let Some(inference) = target.inference {
      &self.graph.target(self.graph.rule(inference.rule).pseudo).recipe
    } else {
      &[]
    };

    let auto = AutoVars {
      base_dir: self.scopes.get(target.scope).dir.clone(),
      target: target.path.clone(),
      prerequisites: parents.iter().map(|&p| self.graph.target(p).path.clone()).collect(),
      newer,
      source: target.inference.map(|i| self.graph.target(i.source).path.clone()),
    };

    let expand = |text: &str| {
      expand_for_target(self.scopes, target.scope, &auto, text).map_err(|source| GraphError::Expand {
        target: self.graph.display_name(id),
        source,
      })
    };

    let mut commands = Vec::with_capacity(lines.len());
    for line in lines {
      let text = expand(&line.text)?;
      if text.trim().is_empty() {
        continue;
      }
      let inline_files = line
        .inline_files
        .iter()
        .map(|content| expand(content))
        .collect::<Result<Vec<_>, _>>()?;
      commands.push(CmdToExec::parse(&text, inline_files));
    }
    Ok(commands)
  }
}
