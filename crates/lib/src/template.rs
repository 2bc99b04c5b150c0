//! Variable substitution for image-provided templates.
//!
//! Unit files, tmpfiles declarations, OCI configs, rpm specs and host files
//! shipped by an image can reference configuration values. This module parses
//! those templates and substitutes values from a [`Resolver`].
//!
//! # Syntax
//!
//! - `$NAME` - a variable; `NAME` is `[A-Za-z_][A-Za-z0-9_]*`
//! - `${NAME}` - the same, delimited so text can follow directly
//! - `$$` - a literal `$`
//!
//! Any other use of `$` is malformed.
//!
//! # Example
//!
//! ```
//! use hostctr_lib::template::{parse, Segment};
//!
//! let segments = parse("exec ${DESTDIR}/run.sh $$1").unwrap();
//! assert_eq!(segments, vec![
//!     Segment::Literal("exec ".to_string()),
//!     Segment::Variable("DESTDIR".to_string()),
//!     Segment::Literal("/run.sh $1".to_string()),
//! ]);
//! ```

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

/// A segment of parsed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  /// Literal text, with `$$` already collapsed to `$`
  Literal(String),

  /// A variable to be resolved
  Variable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
  #[error("invalid placeholder in {template} at position {position}")]
  Malformed { template: String, position: usize },

  #[error("the template file '{template}' still contains an unreplaced value for: '{variable}'")]
  Unresolved { template: String, variable: String },
}

/// Source of variable values.
pub trait Resolver {
  fn resolve(&self, name: &str) -> Option<&str>;
}

impl Resolver for BTreeMap<String, String> {
  fn resolve(&self, name: &str) -> Option<&str> {
    self.get(name).map(String::as_str)
  }
}

fn is_ident_start(ch: char) -> bool {
  ch.is_ascii_alphabetic() || ch == '_'
}

fn is_ident_char(ch: char) -> bool {
  ch.is_ascii_alphanumeric() || ch == '_'
}

/// Parse template text into segments.
///
/// `name` only labels errors (usually the file the text came from).
pub fn parse_named(name: &str, input: &str) -> Result<Vec<Segment>, TemplateError> {
  let malformed = |position| TemplateError::Malformed {
    template: name.to_string(),
    position,
  };

  let mut segments = Vec::new();
  let mut literal = String::new();
  let mut chars = input.char_indices().peekable();

  while let Some((pos, ch)) = chars.next() {
    if ch != '$' {
      literal.push(ch);
      continue;
    }

    let variable = match chars.peek() {
      Some((_, '$')) => {
        chars.next();
        literal.push('$');
        continue;
      }
      Some((_, '{')) => {
        chars.next();
        let mut ident = String::new();
        let mut closed = false;
        for (_, c) in chars.by_ref() {
          if c == '}' {
            closed = true;
            break;
          }
          ident.push(c);
        }
        let valid = ident.chars().next().is_some_and(is_ident_start) && ident.chars().all(is_ident_char);
        if !closed || !valid {
          return Err(malformed(pos));
        }
        ident
      }
      Some(&(_, c)) if is_ident_start(c) => {
        let mut ident = String::new();
        while let Some(&(_, c)) = chars.peek() {
          if !is_ident_char(c) {
            break;
          }
          ident.push(c);
          chars.next();
        }
        ident
      }
      _ => return Err(malformed(pos)),
    };

    if !literal.is_empty() {
      segments.push(Segment::Literal(std::mem::take(&mut literal)));
    }
    segments.push(Segment::Variable(variable));
  }

  if !literal.is_empty() {
    segments.push(Segment::Literal(literal));
  }

  Ok(segments)
}

/// Parse template text that has no meaningful name.
pub fn parse(input: &str) -> Result<Vec<Segment>, TemplateError> {
  parse_named("<inline>", input)
}

/// Names of the variables referenced by a template.
pub fn variables(name: &str, input: &str) -> Result<BTreeSet<String>, TemplateError> {
  Ok(
    parse_named(name, input)?
      .into_iter()
      .filter_map(|segment| match segment {
        Segment::Variable(var) => Some(var),
        Segment::Literal(_) => None,
      })
      .collect(),
  )
}

/// Substitute pre-parsed segments.
pub fn substitute_segments(name: &str, segments: &[Segment], resolver: &impl Resolver) -> Result<String, TemplateError> {
  let mut result = String::new();

  for segment in segments {
    match segment {
      Segment::Literal(s) => result.push_str(s),
      Segment::Variable(var) => {
        let value = resolver.resolve(var).ok_or_else(|| TemplateError::Unresolved {
          template: name.to_string(),
          variable: var.clone(),
        })?;
        result.push_str(value);
      }
    }
  }

  Ok(result)
}

/// Parse and substitute in one step.
pub fn substitute(name: &str, input: &str, resolver: &impl Resolver) -> Result<String, TemplateError> {
  let segments = parse_named(name, input)?;
  substitute_segments(name, &segments, resolver)
}
