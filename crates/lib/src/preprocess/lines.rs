//! Line-level lexing shared by the preprocessor.

/// Split file text into physical lines, accepting `\n` and `\r\n`.
pub fn split_lines(text: &str) -> Vec<&str> {
  text.lines().collect()
}

/// A line whose last non-blank character is `\` continues on the next one.
pub fn continues(line: &str) -> bool {
  line.trim_end().ends_with('\\')
}

/// Join a continued line with its successor, replacing the backslash and
/// surrounding blanks with a single space.
pub fn join_continuation(line: &str, next: &str) -> String {
  let head = line.trim_end();
  let head = head.strip_suffix('\\').unwrap_or(head).trim_end();
  format!("{} {}", head, next.trim_start())
}

/// Drop an unescaped `#` comment. `^#` yields a literal `#`.
pub fn strip_comment(line: &str) -> String {
  let mut out = String::with_capacity(line.len());
  let mut chars = line.chars().peekable();
  while let Some(c) = chars.next() {
    match c {
      '^' if chars.peek() == Some(&'#') => {
        out.push('#');
        chars.next();
      }
      '#' => break,
      _ => out.push(c),
    }
  }
  let trimmed = out.trim_end().len();
  out.truncate(trimmed);
  out
}

/// Where a default-state line splits into its two halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Separator {
  /// `NAME = value`
  Assign(usize),
  /// `targets : dependencies`
  Colon(usize),
}

/// Find the first `=` or `:` outside brackets, braces, quotes and macro
/// references.
pub fn find_separator(line: &str) -> Option<Separator> {
  let bytes = line.as_bytes();
  let mut square = 0usize;
  let mut brace = 0usize;
  let mut paren = 0usize;
  let mut quoted = false;
  let mut i = 0;

  while i < bytes.len() {
    match bytes[i] {
      b'"' => quoted = !quoted,
      _ if quoted => {}
      b'$' if bytes.get(i + 1) == Some(&b'(') => {
        paren += 1;
        i += 1;
      }
      b'(' if paren > 0 => paren += 1,
      b')' if paren > 0 => paren -= 1,
      b'[' => square += 1,
      b']' => square = square.saturating_sub(1),
      b'{' => brace += 1,
      b'}' => brace = brace.saturating_sub(1),
      b'=' if square == 0 && brace == 0 && paren == 0 => return Some(Separator::Assign(i)),
      b':' if square == 0 && brace == 0 && paren == 0 => {
        if is_drive_letter(bytes, i) {
          i += 1;
          continue;
        }
        return Some(Separator::Colon(i));
      }
      _ => {}
    }
    i += 1;
  }
  None
}

/// `C:\x` or `C:/x` at the start of a token.
fn is_drive_letter(bytes: &[u8], colon: usize) -> bool {
  colon >= 1
    && bytes[colon - 1].is_ascii_alphabetic()
    && (colon == 1 || bytes[colon - 2].is_ascii_whitespace())
    && matches!(bytes.get(colon + 1), Some(b'\\') | Some(b'/'))
}

/// Split a target or dependency list on whitespace and commas. Double quotes
/// group a name containing spaces and are removed.
pub fn split_names(text: &str) -> Vec<String> {
  let mut names = Vec::new();
  let mut current = String::new();
  let mut quoted = false;
  let mut had_quotes = false;

  for c in text.chars() {
    match c {
      '"' => {
        quoted = !quoted;
        had_quotes = true;
      }
      c if !quoted && (c.is_whitespace() || c == ',') => {
        if !current.is_empty() || had_quotes {
          names.push(std::mem::take(&mut current));
        }
        had_quotes = false;
      }
      c => current.push(c),
    }
  }
  if !current.is_empty() || had_quotes {
    names.push(current);
  }
  names
}

/// Position of the first `c` outside double quotes and square brackets.
pub fn find_unquoted(text: &str, c: char) -> Option<usize> {
  let mut quoted = false;
  let mut square = 0usize;
  for (i, ch) in text.char_indices() {
    match ch {
      _ if ch == c && !quoted && square == 0 => return Some(i),
      '"' => quoted = !quoted,
      '[' if !quoted => square += 1,
      ']' if !quoted => square = square.saturating_sub(1),
      _ => {}
    }
  }
  None
}
