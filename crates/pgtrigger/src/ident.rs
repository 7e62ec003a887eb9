//! SQL identifier and literal quoting.
//!
//! Rendered trigger DDL is hashed, so every helper here must be deterministic:
//! the same input always produces byte-identical output.
//!
//! - [`quote`] wraps a table/schema label in double quotes unless it is already quoted
//! - [`quote_ident`] always quotes and escapes embedded `"` as `""`
//! - [`quote_literal`] renders a single-quoted string literal
//! - [`Ident`] validates schema names passed to runtime scopes

use crate::error::{TriggerError, TriggerResult};

/// Quote a table or schema label.
///
/// Labels that already start or end with `"` are returned unchanged, so callers
/// can pass pre-quoted or mixed-case names through verbatim.
pub fn quote(label: &str) -> String {
    if label.starts_with('"') || label.ends_with('"') {
        label.to_string()
    } else {
        format!("\"{label}\"")
    }
}

/// Quote a column identifier, escaping embedded double quotes.
pub fn quote_ident(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 2);
    out.push('"');
    for ch in name.chars() {
        if ch == '"' {
            out.push('"');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

/// Render a SQL string literal.
///
/// Single quotes are doubled. When the text contains a backslash the `E''`
/// form is used with backslashes doubled, so the result means the same thing
/// regardless of `standard_conforming_strings`.
pub fn quote_literal(text: &str) -> TriggerResult<String> {
    if text.contains('\0') {
        return Err(TriggerError::definition(
            "String literal cannot contain NUL character",
        ));
    }
    let escaped = text.replace('\'', "''");
    if escaped.contains('\\') {
        Ok(format!("E'{}'", escaped.replace('\\', "\\\\")))
    } else {
        Ok(format!("'{escaped}'"))
    }
}

/// A part of a SQL identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentPart {
    /// Unquoted identifier: must match `[A-Za-z_][A-Za-z0-9_$]*`.
    Unquoted(String),
    /// Quoted identifier: allows any characters except NUL.
    Quoted(String),
}

/// A possibly dotted SQL identifier (e.g. a schema name in a search path).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident {
    pub parts: Vec<IdentPart>,
}

impl Ident {
    /// Parse an identifier string, supporting dotted and quoted forms.
    pub fn parse(s: &str) -> TriggerResult<Self> {
        if s.is_empty() {
            return Err(TriggerError::usage("Identifier cannot be empty"));
        }
        if s.contains('\0') {
            return Err(TriggerError::usage(
                "Identifier cannot contain NUL character",
            ));
        }

        let mut parts = Vec::new();
        let mut chars = s.chars().peekable();

        while chars.peek().is_some() {
            if !parts.is_empty() {
                match chars.next() {
                    Some('.') if chars.peek().is_some() => {}
                    Some('.') => return Err(TriggerError::usage("Trailing '.' in identifier")),
                    Some(c) => {
                        return Err(TriggerError::usage(format!(
                            "Expected '.' between identifier parts, got '{c}'"
                        )));
                    }
                    None => break,
                }
            }

            if chars.peek() == Some(&'"') {
                chars.next();
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('"') if chars.peek() == Some(&'"') => {
                            chars.next();
                            name.push('"');
                        }
                        Some('"') => break,
                        Some(c) => name.push(c),
                        None => return Err(TriggerError::usage("Unclosed quoted identifier")),
                    }
                }
                if name.is_empty() {
                    return Err(TriggerError::usage("Empty quoted identifier"));
                }
                parts.push(IdentPart::Quoted(name));
                continue;
            }

            let mut name = String::new();
            while let Some(&c) = chars.peek() {
                if c == '.' {
                    break;
                }
                let valid = if name.is_empty() {
                    c == '_' || c.is_ascii_alphabetic()
                } else {
                    c == '_' || c == '$' || c.is_ascii_alphanumeric()
                };
                if !valid {
                    return Err(TriggerError::usage(format!(
                        "Invalid character in identifier: '{c}'"
                    )));
                }
                name.push(c);
                chars.next();
            }
            if name.is_empty() {
                return Err(TriggerError::usage("Empty identifier segment"));
            }
            parts.push(IdentPart::Unquoted(name));
        }

        Ok(Self { parts })
    }

    /// Render the identifier as SQL, keeping unquoted parts bare.
    pub fn to_sql(&self) -> String {
        self.parts
            .iter()
            .map(|part| match part {
                IdentPart::Unquoted(s) => s.clone(),
                IdentPart::Quoted(s) => quote_ident(s),
            })
            .collect::<Vec<_>>()
            .join(".")
    }
}
