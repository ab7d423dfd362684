//! Command line planning.
//!
//! Decides how a single expanded recipe line is run: in-process (`CD`,
//! `IF`, a registered builtin), spawned directly from its argument vector,
//! or handed whole to the external command interpreter when it needs shell
//! features such as pipes or redirection.

use std::ops::Range;

use crate::consts::INTERPRETER_ONLY_COMMANDS;

use super::builtins::BuiltinTable;

/// How to run one command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
  /// Nothing to run.
  Empty,
  /// `CD`/`CHDIR`, with its argument if any.
  ChangeDir(Option<String>),
  /// `IF [NOT] condition command`.
  If {
    negate: bool,
    condition: IfCondition,
    command: String,
  },
  /// Name (lowercase) and arguments of a registered builtin.
  Builtin { name: String, args: Vec<String> },
  /// Program and arguments, spawned without an interpreter.
  Direct(Vec<String>),
  /// Whole line for the command interpreter.
  Interpreter(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IfCondition {
  Exist(String),
  Equal(String, String),
}

/// Classify `line`.
pub fn plan(line: &str, builtins: &BuiltinTable) -> Plan {
  let line = line.trim();
  let tokens = tokenize(line);
  let Some((first, _)) = tokens.first() else {
    return Plan::Empty;
  };
  let first = first.to_ascii_lowercase();

  if first == "if" {
    return plan_if(line, &tokens).unwrap_or_else(|| Plan::Interpreter(line.to_string()));
  }

  if needs_interpreter(line) || INTERPRETER_ONLY_COMMANDS.contains(&first.as_str()) {
    return Plan::Interpreter(line.to_string());
  }

  if first == "cd" || first == "chdir" {
    return Plan::ChangeDir(tokens.get(1).map(|(t, _)| t.clone()));
  }

  let args: Vec<String> = tokens.into_iter().map(|(t, _)| t).collect();
  if builtins.contains(&first) {
    return Plan::Builtin {
      name: first,
      args: args[1..].to_vec(),
    };
  }

  Plan::Direct(args)
}

/// `IF [NOT] EXIST path cmd` or `IF [NOT] a==b cmd`; None for anything the
/// interpreter has to handle.
fn plan_if(line: &str, tokens: &[(String, Range<usize>)]) -> Option<Plan> {
  let mut i = 1;
  let negate = tokens.get(i)?.0.eq_ignore_ascii_case("not");
  if negate {
    i += 1;
  }

  let (condition, end) = if tokens.get(i)?.0.eq_ignore_ascii_case("exist") {
    let (path, span) = tokens.get(i + 1)?;
    (IfCondition::Exist(path.clone()), span.end)
  } else {
    let (word, span) = tokens.get(i)?;
    if let Some((a, b)) = word.split_once("==")
      && !b.is_empty()
    {
      (IfCondition::Equal(a.to_string(), b.to_string()), span.end)
    } else if tokens.get(i + 1)?.0 == "==" {
      let (rhs, span) = tokens.get(i + 2)?;
      (IfCondition::Equal(word.clone(), rhs.clone()), span.end)
    } else if let Some(lhs) = word.strip_suffix("==") {
      let (rhs, span) = tokens.get(i + 1)?;
      (IfCondition::Equal(lhs.to_string(), rhs.clone()), span.end)
    } else {
      return None;
    }
  };

  let command = line[end..].trim();
  if command.is_empty() || command.starts_with('(') || has_else_clause(command) {
    return None;
  }
  Some(Plan::If {
    negate,
    condition,
    command: command.to_string(),
  })
}

fn has_else_clause(command: &str) -> bool {
  tokenize(command).iter().any(|(t, _)| t.eq_ignore_ascii_case("else"))
}

/// Split on blanks, honoring double quotes. Quotes are removed from the
/// returned words; spans cover the raw text of each word.
pub fn tokenize(line: &str) -> Vec<(String, Range<usize>)> {
  let mut tokens = Vec::new();
  let mut current = String::new();
  let mut start = None;
  let mut quoted = false;

  for (i, c) in line.char_indices() {
    match c {
      '"' => {
        quoted = !quoted;
        start.get_or_insert(i);
      }
      c if c.is_whitespace() && !quoted => {
        if let Some(s) = start.take() {
          tokens.push((std::mem::take(&mut current), s..i));
        }
      }
      c => {
        current.push(c);
        start.get_or_insert(i);
      }
    }
  }
  if let Some(s) = start {
    tokens.push((current, s..line.len()));
  }
  tokens
}

/// Characters that make a line a multi-program or redirected plan.
const METACHARACTERS: &[char] = &['|', '&', ';', '<', '>', '`'];

/// On Unix, expansion characters the interpreter must see as well.
const UNIX_EXPANSION: &[char] = &['*', '?', '$', '~', '\'', '(', ')', '{', '}', '\\', '\n'];

/// True when the line uses interpreter syntax outside of double quotes.
pub fn needs_interpreter(line: &str) -> bool {
  let mut quoted = false;
  for c in line.chars() {
    if c == '"' {
      quoted = !quoted;
      continue;
    }
    if quoted {
      if cfg!(unix) && matches!(c, '$' | '`' | '\\') {
        return true;
      }
      continue;
    }
    if METACHARACTERS.contains(&c) || (cfg!(unix) && UNIX_EXPANSION.contains(&c)) {
      return true;
    }
  }
  false
}

/// Get the interpreter command and arguments for the current platform.
///
/// # Arguments
///
/// * `override_shell` - Optional interpreter override from config
///
/// # Returns
///
/// A tuple of (shell_command, shell_arguments); the command line is passed
/// as one more argument after them.
pub fn get_shell(override_shell: Option<&str>) -> (String, Vec<String>) {
  if let Some(shell) = override_shell {
    let args = if shell.contains("powershell") || shell.contains("pwsh") {
      vec!["-NoProfile".to_string(), "-Command".to_string()]
    } else if shell.contains("cmd") {
      vec!["/C".to_string()]
    } else {
      vec!["-c".to_string()]
    };
    return (shell.to_string(), args);
  }

  #[cfg(unix)]
  {
    ("/bin/sh".to_string(), vec!["-c".to_string()])
  }

  #[cfg(windows)]
  {
    ("cmd.exe".to_string(), vec!["/C".to_string()])
  }
}
