//! Rule header parsing.

use super::ParseErrorKind;
use super::lines::{find_unquoted, split_names};

/// `{srcdir}.ext{dstdir}.ext` as written on an inference rule header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferencePattern {
  pub src_dir: Option<String>,
  pub src_ext: String,
  pub dst_dir: Option<String>,
  pub dst_ext: String,
}

/// Options from a trailing `[...]` block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleOptions {
  /// Each dependency is a subdirectory with its own build file.
  pub dirs: bool,
  /// Target to build in each subdirectory; its default target when absent.
  pub target: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderKind {
  Explicit(Vec<String>),
  Inference(InferencePattern),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleHeader {
  pub kind: HeaderKind,
  pub deps: Vec<String>,
  pub options: RuleOptions,
  /// `; command` given on the header line itself.
  pub command: Option<String>,
}

/// Parse the already-expanded halves of a rule header around its colon.
pub fn parse_header(lhs: &str, rhs: &str) -> Result<RuleHeader, ParseErrorKind> {
  // `a:: b` is accepted as `a: b`.
  let rhs = rhs.strip_prefix(':').unwrap_or(rhs);

  let (rest, command) = match find_unquoted(rhs, ';') {
    Some(i) => (&rhs[..i], Some(rhs[i + 1..].trim().to_string())),
    None => (rhs, None),
  };

  let (deps_text, options) = match find_unquoted(rest, '[') {
    Some(open) => {
      let close = rest[open..]
        .find(']')
        .map(|c| open + c)
        .ok_or_else(|| ParseErrorKind::BadRuleHeader(format!("unterminated option block in '{}'", rest.trim())))?;
      let trailing = rest[close + 1..].trim();
      if !trailing.is_empty() {
        return Err(ParseErrorKind::BadRuleHeader(format!(
          "unexpected '{}' after option block",
          trailing
        )));
      }
      (&rest[..open], parse_options(&rest[open + 1..close])?)
    }
    None => (rest, RuleOptions::default()),
  };

  let deps = split_names(deps_text);
  let lhs = lhs.trim();

  let kind = match parse_inference(lhs) {
    Some(pattern) => {
      if !deps.is_empty() {
        return Err(ParseErrorKind::BadRuleHeader(format!(
          "inference rule {} cannot have dependencies",
          lhs
        )));
      }
      HeaderKind::Inference(pattern)
    }
    None => {
      let targets = split_names(lhs);
      if targets.is_empty() {
        return Err(ParseErrorKind::BadRuleHeader("no targets before ':'".to_string()));
      }
      HeaderKind::Explicit(targets)
    }
  };

  Ok(RuleHeader {
    kind,
    deps,
    options,
    command: command.filter(|c| !c.is_empty()),
  })
}

fn parse_options(text: &str) -> Result<RuleOptions, ParseErrorKind> {
  let mut options = RuleOptions::default();
  for word in text.split_whitespace() {
    if word.eq_ignore_ascii_case("dirs") {
      options.dirs = true;
    } else if let Some((key, value)) = word.split_once('=')
      && key.eq_ignore_ascii_case("target")
      && !value.is_empty()
    {
      options.target = Some(value.to_string());
    } else {
      return Err(ParseErrorKind::UnknownOption(word.to_string()));
    }
  }
  Ok(options)
}

/// Recognize `.c.obj`, `{src}.c{obj}.obj` and mixed forms.
pub fn parse_inference(text: &str) -> Option<InferencePattern> {
  if text.is_empty() || text.contains(char::is_whitespace) {
    return None;
  }
  let mut rest = text;
  let (src_dir, src_ext) = take_component(&mut rest)?;
  let (dst_dir, dst_ext) = take_component(&mut rest)?;
  if !rest.is_empty() {
    return None;
  }
  Some(InferencePattern {
    src_dir,
    src_ext,
    dst_dir,
    dst_ext,
  })
}

fn take_component(rest: &mut &str) -> Option<(Option<String>, String)> {
  let mut dir = None;
  if let Some(after) = rest.strip_prefix('{') {
    let close = after.find('}')?;
    let d = after[..close].trim();
    if !d.is_empty() {
      dir = Some(d.to_string());
    }
    *rest = &after[close + 1..];
  }

  let after_dot = rest.strip_prefix('.')?;
  let len = after_dot
    .find(|c: char| c == '.' || c == '{')
    .unwrap_or(after_dot.len());
  if len == 0 || !after_dot[..len].chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-') {
    return None;
  }
  let ext = format!(".{}", &after_dot[..len]);
  *rest = &after_dot[len..];
  Some((dir, ext))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn explicit_header() {
    let header = parse_header("a.exe, b.exe", " a.obj b.obj").unwrap();
    assert_eq!(header.kind, HeaderKind::Explicit(vec!["a.exe".into(), "b.exe".into()]));
    assert_eq!(header.deps, vec!["a.obj", "b.obj"]);
    assert_eq!(header.command, None);
  }

  #[test]
  fn header_with_inline_command() {
    let header = parse_header("clean", " ; rm -f *.obj").unwrap();
    assert!(header.deps.is_empty());
    assert_eq!(header.command.as_deref(), Some("rm -f *.obj"));
  }

  #[test]
  fn dirs_options() {
    let header = parse_header("all", " lib app [dirs target=install]").unwrap();
    assert_eq!(header.deps, vec!["lib", "app"]);
    assert!(header.options.dirs);
    assert_eq!(header.options.target.as_deref(), Some("install"));

    let err = parse_header("all", " lib [recursive]").unwrap_err();
    assert!(matches!(err, ParseErrorKind::UnknownOption(o) if o == "recursive"));
  }

  #[test]
  fn inference_patterns() {
    assert_eq!(
      parse_inference(".c.obj"),
      Some(InferencePattern {
        src_dir: None,
        src_ext: ".c".into(),
        dst_dir: None,
        dst_ext: ".obj".into(),
      })
    );
    assert_eq!(
      parse_inference("{src}.c{obj}.obj"),
      Some(InferencePattern {
        src_dir: Some("src".into()),
        src_ext: ".c".into(),
        dst_dir: Some("obj".into()),
        dst_ext: ".obj".into(),
      })
    );
    assert_eq!(parse_inference(".DEFAULT"), None);
    assert_eq!(parse_inference("foo.c"), None);
    assert_eq!(parse_inference(".c.obj.exe"), None);
  }

  #[test]
  fn inference_header_rejects_dependencies() {
    assert!(parse_header(".c.obj", "").is_ok());
    assert!(parse_header(".c.obj", " x.h").is_err());
  }
}
