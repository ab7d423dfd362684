//! `!IF` expression evaluation.
//!
//! Operators `&&` and `||` have equal precedence and are applied strictly
//! left to right; every atom is evaluated, there is no short circuit.
//! Atoms are a comparison `A op B` or a lone operand. Operands are
//! numbers (decimal, negative, `0x` hex), quoted strings, `[command]`
//! (its exit code), `DEFINED(name)`, `EXIST(path)` and parenthesized
//! sub-expressions.

use std::cmp::Ordering;

/// Effects an expression may need from its surroundings.
pub trait ExprEnv {
  fn is_defined(&self, name: &str) -> bool;
  fn exists(&self, path: &str) -> bool;
  /// Run a `[command]` operand and return its exit code.
  fn run(&mut self, command: &str) -> Result<i64, String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
  Num(i64),
  Str(String),
  Command(String),
  Defined(String),
  Exist(String),
  Cmp(CmpOp),
  And,
  Or,
  Not,
  Open,
  Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
  Eq,
  Ne,
  Ge,
  Le,
  Gt,
  Lt,
}

impl CmpOp {
  fn test(self, ord: Ordering) -> bool {
    match self {
      CmpOp::Eq => ord == Ordering::Equal,
      CmpOp::Ne => ord != Ordering::Equal,
      CmpOp::Ge => ord != Ordering::Less,
      CmpOp::Le => ord != Ordering::Greater,
      CmpOp::Gt => ord == Ordering::Greater,
      CmpOp::Lt => ord == Ordering::Less,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Value {
  Num(i64),
  Str(String),
}

impl Value {
  fn truthy(&self) -> bool {
    match self {
      Value::Num(n) => *n != 0,
      Value::Str(s) => !s.is_empty(),
    }
  }
}

/// Evaluate an already macro-expanded expression.
pub fn evaluate(text: &str, env: &mut dyn ExprEnv) -> Result<bool, String> {
  let tokens = tokenize(text)?;
  if tokens.is_empty() {
    return Err("empty expression".to_string());
  }
  let mut parser = Parser { tokens, pos: 0, env };
  let result = parser.expression()?;
  if parser.pos != parser.tokens.len() {
    return Err(format!("unexpected {:?}", parser.tokens[parser.pos]));
  }
  Ok(result)
}

struct Parser<'e> {
  tokens: Vec<Token>,
  pos: usize,
  env: &'e mut dyn ExprEnv,
}

impl Parser<'_> {
  fn peek(&self) -> Option<&Token> {
    self.tokens.get(self.pos)
  }

  fn next(&mut self) -> Option<Token> {
    let token = self.tokens.get(self.pos).cloned();
    self.pos += 1;
    token
  }

  fn expression(&mut self) -> Result<bool, String> {
    let mut acc = self.unary()?;
    loop {
      match self.peek() {
        Some(Token::And) => {
          self.pos += 1;
          let rhs = self.unary()?;
          acc = acc && rhs;
        }
        Some(Token::Or) => {
          self.pos += 1;
          let rhs = self.unary()?;
          acc = acc || rhs;
        }
        _ => return Ok(acc),
      }
    }
  }

  fn unary(&mut self) -> Result<bool, String> {
    if self.peek() == Some(&Token::Not) {
      self.pos += 1;
      return Ok(!self.unary()?);
    }
    self.atom()
  }

  fn atom(&mut self) -> Result<bool, String> {
    let lhs = self.operand()?;
    let op = match self.peek() {
      Some(Token::Cmp(op)) => *op,
      _ => return Ok(lhs.truthy()),
    };
    self.pos += 1;
    let rhs = self.operand()?;

    let ord = match (&lhs, &rhs) {
      (Value::Num(a), Value::Num(b)) => a.cmp(b),
      (Value::Str(a), Value::Str(b)) => a.cmp(b),
      _ => return Err("cannot compare a string with a number".to_string()),
    };
    Ok(op.test(ord))
  }

  fn operand(&mut self) -> Result<Value, String> {
    match self.next() {
      Some(Token::Num(n)) => Ok(Value::Num(n)),
      Some(Token::Str(s)) => Ok(Value::Str(s)),
      Some(Token::Command(cmd)) => Ok(Value::Num(self.env.run(&cmd)?)),
      Some(Token::Defined(name)) => Ok(Value::Num(self.env.is_defined(&name) as i64)),
      Some(Token::Exist(path)) => Ok(Value::Num(self.env.exists(&path) as i64)),
      Some(Token::Open) => {
        let inner = self.expression()?;
        match self.next() {
          Some(Token::Close) => Ok(Value::Num(inner as i64)),
          _ => Err("missing ')'".to_string()),
        }
      }
      Some(other) => Err(format!("expected operand, found {:?}", other)),
      None => Err("expected operand at end of expression".to_string()),
    }
  }
}

fn tokenize(text: &str) -> Result<Vec<Token>, String> {
  let chars: Vec<char> = text.chars().collect();
  let mut tokens = Vec::new();
  let mut i = 0;

  while i < chars.len() {
    let c = chars[i];
    let next = chars.get(i + 1).copied();
    match c {
      c if c.is_whitespace() => i += 1,
      '&' if next == Some('&') => {
        tokens.push(Token::And);
        i += 2;
      }
      '|' if next == Some('|') => {
        tokens.push(Token::Or);
        i += 2;
      }
      '=' if next == Some('=') => {
        tokens.push(Token::Cmp(CmpOp::Eq));
        i += 2;
      }
      '!' if next == Some('=') => {
        tokens.push(Token::Cmp(CmpOp::Ne));
        i += 2;
      }
      '>' | '<' => {
        let op = match (c, next) {
          ('>', Some('=')) => CmpOp::Ge,
          ('<', Some('=')) => CmpOp::Le,
          ('>', _) => CmpOp::Gt,
          _ => CmpOp::Lt,
        };
        i += if next == Some('=') { 2 } else { 1 };
        tokens.push(Token::Cmp(op));
      }
      '!' => {
        tokens.push(Token::Not);
        i += 1;
      }
      '(' => {
        tokens.push(Token::Open);
        i += 1;
      }
      ')' => {
        tokens.push(Token::Close);
        i += 1;
      }
      '"' => {
        let end = chars[i + 1..]
          .iter()
          .position(|&ch| ch == '"')
          .ok_or_else(|| "unterminated string".to_string())?;
        tokens.push(Token::Str(chars[i + 1..i + 1 + end].iter().collect()));
        i += end + 2;
      }
      '[' => {
        let mut depth = 0;
        let mut end = None;
        for (j, &ch) in chars.iter().enumerate().skip(i) {
          match ch {
            '[' => depth += 1,
            ']' => {
              depth -= 1;
              if depth == 0 {
                end = Some(j);
                break;
              }
            }
            _ => {}
          }
        }
        let end = end.ok_or_else(|| "unterminated [command]".to_string())?;
        tokens.push(Token::Command(chars[i + 1..end].iter().collect::<String>().trim().to_string()));
        i = end + 1;
      }
      _ => {
        let start = i;
        while i < chars.len() && is_word_char(chars[i]) {
          i += 1;
        }
        if i == start {
          return Err(format!("unexpected character '{}'", c));
        }
        let word: String = chars[start..i].iter().collect();

        if chars.get(i) == Some(&'(')
          && (word.eq_ignore_ascii_case("defined") || word.eq_ignore_ascii_case("exist"))
        {
          let close = chars[i..]
            .iter()
            .position(|&ch| ch == ')')
            .ok_or_else(|| format!("missing ')' after {}", word))?;
          let arg: String = chars[i + 1..i + close].iter().collect();
          let arg = arg.trim().trim_matches('"').to_string();
          tokens.push(if word.eq_ignore_ascii_case("defined") {
            Token::Defined(arg)
          } else {
            Token::Exist(arg)
          });
          i += close + 1;
        } else if let Some(n) = parse_number(&word) {
          tokens.push(Token::Num(n));
        } else {
          tokens.push(Token::Str(word));
        }
      }
    }
  }
  Ok(tokens)
}

fn is_word_char(c: char) -> bool {
  !c.is_whitespace() && !matches!(c, '&' | '|' | '=' | '!' | '<' | '>' | '(' | ')' | '"' | '[' | ']')
}

fn parse_number(word: &str) -> Option<i64> {
  let (negative, digits) = match word.strip_prefix('-') {
    Some(rest) => (true, rest),
    None => (false, word),
  };
  let value = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
    i64::from_str_radix(hex, 16).ok()?
  } else {
    digits.parse::<i64>().ok()?
  };
  Some(if negative { -value } else { value })
}
