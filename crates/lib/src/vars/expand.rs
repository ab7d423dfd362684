//! Macro expansion.
//!
//! Recognized forms:
//!
//! - `$(NAME)` and `$(NAME:OLD=NEW)` - variable value, optionally with every
//!   occurrence of `OLD` replaced by `NEW`
//! - `$@`, `$*`, `$**`, `$?`, `$<` - target-specific shorthands
//! - `$(@B)`, `$(**F)`, ... - shorthands with a file-part qualifier
//! - `$$` - a literal dollar sign
//!
//! Expansion happens in two modes. Deferred expansion ([`expand`]) has no
//! target: shorthands and `$$` are copied through untouched so that a later
//! pass can resolve them. Final expansion ([`expand_for_target`]) resolves
//! shorthands against an [`AutoVars`] and collapses `$$` to `$`.
//!
//! Any other `$x` sequence, and `%%`, pass through unchanged.

use std::path::PathBuf;

use thiserror::Error;

use crate::scope::{ScopeId, ScopeTable};
use crate::util::path::{Qualifier, file_part, relative_display, strip_extension};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpandError {
  #[error("unterminated macro reference: {0}")]
  Unterminated(String),

  #[error("macro {0} refers to itself")]
  Recursive(String),
}

/// Values behind the target-specific shorthands.
#[derive(Debug, Clone, Default)]
pub struct AutoVars {
  /// Directory that displayed paths are made relative to.
  pub base_dir: PathBuf,
  /// `$@`
  pub target: PathBuf,
  /// `$**`
  pub prerequisites: Vec<PathBuf>,
  /// `$?`
  pub newer: Vec<PathBuf>,
  /// `$<`, the inference-rule source.
  pub source: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shorthand {
  Target,
  Stem,
  All,
  Newer,
  Source,
}

impl AutoVars {
  fn items(&self, kind: Shorthand) -> Vec<String> {
    let show = |p: &PathBuf| relative_display(p, &self.base_dir);
    match kind {
      Shorthand::Target => vec![show(&self.target)],
      Shorthand::Stem => vec![strip_extension(&show(&self.target))],
      Shorthand::All => self.prerequisites.iter().map(show).collect(),
      Shorthand::Newer => self.newer.iter().map(show).collect(),
      Shorthand::Source => self
        .source
        .as_ref()
        .or_else(|| self.prerequisites.first())
        .map(show)
        .into_iter()
        .collect(),
    }
  }

  fn value(&self, kind: Shorthand, qualifier: Option<Qualifier>) -> String {
    self
      .items(kind)
      .iter()
      .map(|item| file_part(item, qualifier))
      .collect::<Vec<_>>()
      .join(" ")
  }
}

/// Expand without a target. Shorthands and `$$` are preserved.
pub fn expand(scopes: &ScopeTable, scope: ScopeId, text: &str) -> Result<String, ExpandError> {
  Expander::new(scopes, scope, None).run(text)
}

/// Expand with target context. Every form is resolved.
pub fn expand_for_target(scopes: &ScopeTable, scope: ScopeId, auto: &AutoVars, text: &str) -> Result<String, ExpandError> {
  Expander::new(scopes, scope, Some(auto)).run(text)
}

/// Collapse `$$` escapes for text that is about to be shown to the user.
pub fn unescape_dollars(text: &str) -> String {
  text.replace("$$", "$")
}

struct Expander<'a> {
  scopes: &'a ScopeTable,
  scope: ScopeId,
  auto: Option<&'a AutoVars>,
  active: Vec<String>,
}

impl<'a> Expander<'a> {
  fn new(scopes: &'a ScopeTable, scope: ScopeId, auto: Option<&'a AutoVars>) -> Self {
    Self {
      scopes,
      scope,
      auto,
      active: Vec::new(),
    }
  }

  fn run(&mut self, text: &str) -> Result<String, ExpandError> {
    let mut out = String::with_capacity(text.len());
    self.expand_into(text, &mut out)?;
    Ok(out)
  }

  fn expand_into(&mut self, text: &str, out: &mut String) -> Result<(), ExpandError> {
    let bytes = text.as_bytes();
    let mut literal_start = 0;
    let mut i = 0;

    while i < bytes.len() {
      if bytes[i] != b'$' {
        i += 1;
        continue;
      }
      out.push_str(&text[literal_start..i]);

      match bytes.get(i + 1) {
        Some(b'$') => {
          out.push_str(if self.auto.is_some() { "$" } else { "$$" });
          i += 2;
        }
        Some(b'(') => {
          let close = find_close(bytes, i + 2).ok_or_else(|| ExpandError::Unterminated(text[i..].to_string()))?;
          self.expand_reference(&text[i + 2..close], &text[i..=close], out)?;
          i = close + 1;
        }
        Some(b'*') if bytes.get(i + 2) == Some(&b'*') => {
          self.push_shorthand(Shorthand::All, None, &text[i..i + 3], out);
          i += 3;
        }
        Some(&c @ (b'@' | b'*' | b'?' | b'<')) => {
          let kind = match c {
            b'@' => Shorthand::Target,
            b'*' => Shorthand::Stem,
            b'?' => Shorthand::Newer,
            _ => Shorthand::Source,
          };
          self.push_shorthand(kind, None, &text[i..i + 2], out);
          i += 2;
        }
        _ => {
          out.push('$');
          i += 1;
        }
      }
      literal_start = i;
    }

    out.push_str(&text[literal_start..]);
    Ok(())
  }

  fn push_shorthand(&self, kind: Shorthand, qualifier: Option<Qualifier>, verbatim: &str, out: &mut String) {
    match self.auto {
      Some(auto) => out.push_str(&auto.value(kind, qualifier)),
      None => out.push_str(verbatim),
    }
  }

  /// Handle the inside of a `$( ... )` reference.
  fn expand_reference(&mut self, inner: &str, verbatim: &str, out: &mut String) -> Result<(), ExpandError> {
    let (name_part, substitution) = match find_top_level(inner.as_bytes(), b':') {
      Some(colon) => (&inner[..colon], Some(&inner[colon + 1..])),
      None => (inner, None),
    };

    let value = match parse_shorthand(name_part) {
      Some((kind, qualifier)) => match self.auto {
        Some(auto) => auto.value(kind, qualifier),
        None => {
          out.push_str(verbatim);
          return Ok(());
        }
      },
      None => {
        let name = if name_part.contains('$') {
          self.run(name_part)?
        } else {
          name_part.to_string()
        };
        self.variable_value(name.trim())?
      }
    };

    let value = match substitution {
      Some(pattern) => self.substitute(&value, pattern)?,
      None => value,
    };
    out.push_str(&value);
    Ok(())
  }

  fn variable_value(&mut self, name: &str) -> Result<String, ExpandError> {
    let scopes = self.scopes;
    let raw = scopes.lookup(self.scope, name).value();
    if !raw.contains('$') {
      return Ok(raw.to_string());
    }

    if self.active.iter().any(|n| n == name) {
      return Err(ExpandError::Recursive(name.to_string()));
    }
    self.active.push(name.to_string());
    let expanded = self.run(raw);
    self.active.pop();
    expanded
  }

  /// Apply `OLD=NEW` to `value`. A pattern without `=` leaves the value alone.
  fn substitute(&mut self, value: &str, pattern: &str) -> Result<String, ExpandError> {
    let Some(eq) = pattern.find('=') else {
      return Ok(value.to_string());
    };
    let search = self.run(&pattern[..eq])?;
    let replace = self.run(&pattern[eq + 1..])?;
    if search.is_empty() {
      return Ok(value.to_string());
    }
    Ok(value.replace(&search, &replace))
  }
}

/// Recognize `@`, `*`, `**`, `?`, `<` with an optional qualifier letter.
fn parse_shorthand(name: &str) -> Option<(Shorthand, Option<Qualifier>)> {
  let (kind, rest) = if let Some(rest) = name.strip_prefix("**") {
    (Shorthand::All, rest)
  } else {
    let mut chars = name.chars();
    let kind = match chars.next()? {
      '@' => Shorthand::Target,
      '*' => Shorthand::Stem,
      '?' => Shorthand::Newer,
      '<' => Shorthand::Source,
      _ => return None,
    };
    (kind, chars.as_str())
  };

  let mut chars = rest.chars();
  match (chars.next(), chars.next()) {
    (None, _) => Some((kind, None)),
    (Some(q), None) => Qualifier::from_char(q).map(|q| (kind, Some(q))),
    _ => None,
  }
}

/// Index of the `)` closing a reference whose body starts at `start`.
fn find_close(bytes: &[u8], start: usize) -> Option<usize> {
  let mut depth = 1usize;
  for (offset, &b) in bytes[start..].iter().enumerate() {
    match b {
      b'(' => depth += 1,
      b')' => {
        depth -= 1;
        if depth == 0 {
          return Some(start + offset);
        }
      }
      _ => {}
    }
  }
  None
}

/// First `needle` not nested inside parentheses.
fn find_top_level(bytes: &[u8], needle: u8) -> Option<usize> {
  let mut depth = 0usize;
  for (i, &b) in bytes.iter().enumerate() {
    match b {
      b'(' => depth += 1,
      b')' => depth = depth.saturating_sub(1),
      _ if b == needle && depth == 0 => return Some(i),
      _ => {}
    }
  }
  None
}
