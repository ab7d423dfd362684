//! Lexical path handling.
//!
//! Target identity is a normalized absolute path. Normalization is purely
//! lexical because targets routinely name files that do not exist yet.

use std::path::{Component, Path, PathBuf};

/// File-part qualifier accepted after a shorthand macro, e.g. `$(@B)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qualifier {
  /// `B`: base name without directory or extension.
  Base,
  /// `D`: directory part.
  Dir,
  /// `F`: file name with extension.
  File,
  /// `R`: full path without extension.
  Root,
}

impl Qualifier {
  pub fn from_char(c: char) -> Option<Self> {
    match c {
      'B' => Some(Qualifier::Base),
      'D' => Some(Qualifier::Dir),
      'F' => Some(Qualifier::File),
      'R' => Some(Qualifier::Root),
      _ => None,
    }
  }
}

/// Resolve `name` against `base` and remove `.` and `..` components.
pub fn resolve(base: &Path, name: &str) -> PathBuf {
  normalize(&base.join(name))
}

/// Lexically normalize a path.
pub fn normalize(path: &Path) -> PathBuf {
  let mut out = PathBuf::new();
  for component in path.components() {
    match component {
      Component::CurDir => {}
      Component::ParentDir => {
        if !out.pop() {
          out.push("..");
        }
      }
      other => out.push(other.as_os_str()),
    }
  }
  out
}

/// Display `path` relative to `base` when it lives underneath it.
pub fn relative_display(path: &Path, base: &Path) -> String {
  match path.strip_prefix(base) {
    Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
    Ok(rel) => to_slash(rel),
    Err(_) => to_slash(path),
  }
}

/// The extension of `path` including its leading dot, or `""`.
pub fn dot_extension(path: &Path) -> String {
  path
    .extension()
    .map(|e| format!(".{}", e.to_string_lossy()))
    .unwrap_or_default()
}

/// Apply a file-part qualifier to a displayed path.
pub fn file_part(path: &str, qualifier: Option<Qualifier>) -> String {
  let p = Path::new(path);
  match qualifier {
    None => path.to_string(),
    Some(Qualifier::Dir) => match p.parent() {
      Some(parent) if !parent.as_os_str().is_empty() => to_slash(parent),
      _ => ".".to_string(),
    },
    Some(Qualifier::Base) => p.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default(),
    Some(Qualifier::File) => p.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default(),
    Some(Qualifier::Root) => strip_extension(path),
  }
}

/// Remove the final extension of a displayed path, keeping its directory.
pub fn strip_extension(path: &str) -> String {
  let p = Path::new(path);
  match (p.parent(), p.file_stem()) {
    (Some(parent), Some(stem)) if !parent.as_os_str().is_empty() => to_slash(&parent.join(stem)),
    (_, Some(stem)) => stem.to_string_lossy().into_owned(),
    _ => path.to_string(),
  }
}

fn to_slash(path: &Path) -> String {
  path.to_string_lossy().replace('\\', "/")
}
