//! Safe SQL identifier handling.
//!
//! This module provides [`Ident`] which represents a SQL identifier (schema/table/column),
//! supporting dotted notation and quoted identifiers. Rendering is dialect-aware:
//!
//! - Unquoted parts are validated against: `[A-Za-z_][A-Za-z0-9_$]*` and rendered bare,
//!   unless they collide with a reserved word, in which case the dialect quotes them
//! - Quoted parts allow any characters except NUL and are always quoted, with the
//!   dialect's closing quote character doubled
//!
//! # Example
//! ```ignore
//! use sqlweave::{Dialect, Ident};
//!
//! let t = Ident::parse("public.users")?;
//! assert_eq!(t.to_sql(Dialect::Postgres), "public.users");
//! let c = Ident::parse(r#""CamelCase"."UserTable""#)?;
//! assert_eq!(c.to_sql(Dialect::SqlServer), "[CamelCase].[UserTable]");
//! # Ok::<(), sqlweave::OrmError>(())
//! ```

use crate::dialect::Dialect;
use crate::error::{OrmError, OrmResult};

/// A part of a SQL identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentPart {
    /// Unquoted identifier: must match `[A-Za-z_][A-Za-z0-9_$]*`.
    Unquoted(String),
    /// Quoted identifier: allows any characters except NUL.
    Quoted(String),
}

/// A SQL identifier (column, table, or schema name).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident {
    pub parts: Vec<IdentPart>,
}

const RESERVED: &[&str] = &[
    "all", "and", "as", "asc", "by", "case", "check", "column", "constraint", "create", "default",
    "delete", "desc", "distinct", "drop", "else", "end", "except", "exists", "false", "from",
    "full", "group", "having", "in", "index", "inner", "insert", "intersect", "into", "is",
    "join", "key", "left", "like", "limit", "not", "null", "offset", "on", "or", "order",
    "outer", "primary", "references", "right", "select", "set", "table", "then", "to", "true",
    "union", "unique", "update", "user", "using", "values", "when", "where", "with",
];

/// Whether a single name can be emitted without quotes in any dialect.
pub fn is_plain(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first == '_' || first.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
        && !RESERVED.contains(&name.to_ascii_lowercase().as_str())
}

impl Ident {
    /// Create a single-part identifier from a mapped name.
    ///
    /// Plain names stay unquoted; anything else becomes a quoted part.
    pub fn name(name: &str) -> OrmResult<Self> {
        if is_plain(name) {
            Ok(Self {
                parts: vec![IdentPart::Unquoted(name.to_string())],
            })
        } else {
            Self::quoted(name)
        }
    }

    /// Create a quoted identifier.
    pub fn quoted(name: &str) -> OrmResult<Self> {
        if name.is_empty() {
            return Err(OrmError::validation("Empty quoted identifier"));
        }
        if name.contains('\0') {
            return Err(OrmError::validation(
                "Identifier cannot contain NUL character",
            ));
        }
        Ok(Self {
            parts: vec![IdentPart::Quoted(name.to_string())],
        })
    }

    /// Parse an identifier string, supporting dotted and quoted forms.
    ///
    /// - Dotted: `schema.table.column`
    /// - Quoted: `"CamelCase"."UserTable"`
    /// - Mixed: `public."UserTable".id`
    pub fn parse(s: &str) -> OrmResult<Self> {
        if s.is_empty() {
            return Err(OrmError::validation("Identifier cannot be empty"));
        }
        if s.contains('\0') {
            return Err(OrmError::validation(
                "Identifier cannot contain NUL character",
            ));
        }

        let mut parts = Vec::new();
        let mut chars = s.chars().peekable();

        while chars.peek().is_some() {
            // Consume '.' between parts (but require there is a next part).
            if !parts.is_empty() {
                match chars.next() {
                    Some('.') => {
                        if chars.peek().is_none() {
                            return Err(OrmError::validation("Trailing '.' in identifier"));
                        }
                    }
                    Some(c) => {
                        return Err(OrmError::validation(format!(
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
                        Some('"') => {
                            // Escaped quote: ""
                            if chars.peek() == Some(&'"') {
                                chars.next();
                                name.push('"');
                            } else {
                                break;
                            }
                        }
                        Some(c) => name.push(c),
                        None => return Err(OrmError::validation("Unclosed quoted identifier")),
                    }
                }
                if name.is_empty() {
                    return Err(OrmError::validation("Empty quoted identifier"));
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
                    return Err(OrmError::validation(format!(
                        "Invalid character in identifier: '{c}'"
                    )));
                }
                name.push(c);
                chars.next();
            }
            if name.is_empty() {
                return Err(OrmError::validation("Empty identifier segment"));
            }
            parts.push(IdentPart::Unquoted(name));
        }

        if parts.is_empty() {
            return Err(OrmError::validation("Empty identifier"));
        }

        Ok(Self { parts })
    }

    /// Render the identifier for a dialect.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        let mut out = String::new();
        self.write_sql(dialect, &mut out);
        out
    }

    pub(crate) fn write_sql(&self, dialect: Dialect, out: &mut String) {
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                out.push('.');
            }
            match part {
                IdentPart::Unquoted(s) if is_plain(s) => out.push_str(s),
                IdentPart::Unquoted(s) | IdentPart::Quoted(s) => write_quoted(dialect, s, out),
            }
        }
    }
}

/// Quote one name for a dialect, doubling the closing quote. NUL is dropped.
pub(crate) fn write_quoted(dialect: Dialect, name: &str, out: &mut String) {
    let (open, close) = dialect.quote_chars();
    out.push(open);
    for ch in name.chars().filter(|c| *c != '\0') {
        if ch == close {
            out.push(close);
        }
        out.push(ch);
    }
    out.push(close);
}
