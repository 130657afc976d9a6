//! Date/time format-token translation.
//!
//! Format strings in expressions use the common `yyyy-MM-dd HH:mm:ss` token
//! style. Each token is rewritten into the target's own pattern language by
//! longest-match-first substitution, so `yyyy` is consumed whole before `yy`
//! gets a chance to match its first two characters.

use crate::dialect::Dialect;
use crate::error::{OrmError, OrmResult};

/// Where a translated format string will be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatTarget {
    Sql(Dialect),
    /// chrono's strftime syntax, for host-side evaluation of constant operands.
    Chrono,
}

impl From<Dialect> for FormatTarget {
    fn from(d: Dialect) -> Self {
        FormatTarget::Sql(d)
    }
}

/// Source tokens, longest first. Order is load-bearing.
const TOKENS: &[&str] = &[
    "yyyy", "MMMM", "dddd", "MMM", "ddd", "fff", "yy", "MM", "dd", "HH", "hh", "mm", "ss", "tt",
    "M", "d", "H", "h", "m", "s",
];

fn map_token(target: FormatTarget, token: &str) -> Option<&'static str> {
    match target {
        FormatTarget::Sql(Dialect::Postgres) => Some(match token {
            "yyyy" => "YYYY",
            "yy" => "YY",
            "MMMM" => "FMMonth",
            "MMM" => "Mon",
            "MM" => "MM",
            "M" => "FMMM",
            "dddd" => "FMDay",
            "ddd" => "Dy",
            "dd" => "DD",
            "d" => "FMDD",
            "HH" => "HH24",
            "H" => "FMHH24",
            "hh" => "HH12",
            "h" => "FMHH12",
            "mm" => "MI",
            "m" => "FMMI",
            "ss" => "SS",
            "s" => "FMSS",
            "fff" => "MS",
            "tt" => "AM",
            _ => return None,
        }),
        FormatTarget::Sql(Dialect::MySql) => Some(match token {
            "yyyy" => "%Y",
            "yy" => "%y",
            "MMMM" => "%M",
            "MMM" => "%b",
            "MM" => "%m",
            "M" => "%c",
            "dddd" => "%W",
            "ddd" => "%a",
            "dd" => "%d",
            "d" => "%e",
            "HH" => "%H",
            "H" => "%k",
            "hh" => "%h",
            "h" => "%l",
            "mm" | "m" => "%i",
            "ss" | "s" => "%s",
            "tt" => "%p",
            _ => return None,
        }),
        FormatTarget::Sql(Dialect::Sqlite) => Some(match token {
            "yyyy" => "%Y",
            "MM" => "%m",
            "dd" => "%d",
            "HH" => "%H",
            "mm" => "%M",
            "ss" => "%S",
            _ => return None,
        }),
        // SQL Server's FORMAT() speaks the source token language natively.
        FormatTarget::Sql(Dialect::SqlServer) => TOKENS.iter().find(|t| **t == token).copied(),
        FormatTarget::Chrono => Some(match token {
            "yyyy" => "%Y",
            "yy" => "%y",
            "MMMM" => "%B",
            "MMM" => "%b",
            "MM" => "%m",
            "M" => "%-m",
            "dddd" => "%A",
            "ddd" => "%a",
            "dd" => "%d",
            "d" => "%-d",
            "HH" => "%H",
            "H" => "%-H",
            "hh" => "%I",
            "h" => "%-I",
            "mm" => "%M",
            "m" => "%-M",
            "ss" => "%S",
            "s" => "%-S",
            "fff" => "%3f",
            "tt" => "%p",
            _ => return None,
        }),
    }
}

fn push_literal(target: FormatTarget, out: &mut String, pending: &mut String) {
    if pending.is_empty() {
        return;
    }
    match target {
        // TO_CHAR treats bare letters as pattern fragments; quote alphabetic runs.
        FormatTarget::Sql(Dialect::Postgres) if pending.chars().any(char::is_alphabetic) => {
            out.push('"');
            out.push_str(&pending.replace('"', "\\\""));
            out.push('"');
        }
        FormatTarget::Sql(Dialect::MySql | Dialect::Sqlite) | FormatTarget::Chrono => {
            out.push_str(&pending.replace('%', "%%"));
        }
        _ => out.push_str(pending),
    }
    pending.clear();
}

/// Translate a format string into the target's pattern language.
///
/// Fails with `UnsupportedExpression` when the target has no equivalent for a token.
pub fn translate_format(format: &str, target: impl Into<FormatTarget>) -> OrmResult<String> {
    let target = target.into();
    let mut out = String::with_capacity(format.len() + 8);
    let mut pending = String::new();
    let mut rest = format;

    while !rest.is_empty() {
        match TOKENS.iter().find(|t| rest.starts_with(**t)) {
            Some(token) => {
                let mapped = map_token(target, token).ok_or_else(|| {
                    OrmError::unsupported(format!(
                        "format token '{token}' in \"{format}\" has no {target:?} equivalent"
                    ))
                })?;
                push_literal(target, &mut out, &mut pending);
                out.push_str(mapped);
                rest = &rest[token.len()..];
            }
            None => {
                let mut chars = rest.chars();
                if let Some(c) = chars.next() {
                    pending.push(c);
                }
                rest = chars.as_str();
            }
        }
    }
    push_literal(target, &mut out, &mut pending);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_digit_year_wins_over_two_digit() {
        assert_eq!(
            translate_format("yyyy-MM-dd", Dialect::Postgres).unwrap(),
            "YYYY-MM-DD"
        );
        assert_eq!(translate_format("yyyy-MM-dd", Dialect::MySql).unwrap(), "%Y-%m-%d");
        assert_eq!(translate_format("yy/M/d", Dialect::MySql).unwrap(), "%y/%c/%e");
        assert_eq!(translate_format("yyyy-MM-dd", FormatTarget::Chrono).unwrap(), "%Y-%m-%d");
    }

    #[test]
    fn time_tokens_translate() {
        assert_eq!(
            translate_format("HH:mm:ss.fff", Dialect::Postgres).unwrap(),
            "HH24:MI:SS.MS"
        );
        assert_eq!(translate_format("HH:mm:ss", Dialect::Sqlite).unwrap(), "%H:%M:%S");
    }

    #[test]
    fn literal_letters_are_quoted_for_postgres() {
        assert_eq!(
            translate_format("yyyy 'at' HH", Dialect::Postgres).unwrap(),
            "YYYY\" 'at' \"HH24"
        );
    }

    #[test]
    fn percent_is_escaped_for_strftime_targets() {
        assert_eq!(translate_format("dd%", Dialect::MySql).unwrap(), "%d%%");
    }

    #[test]
    fn sql_server_passes_tokens_through() {
        assert_eq!(
            translate_format("yyyy-MM-dd HH:mm", Dialect::SqlServer).unwrap(),
            "yyyy-MM-dd HH:mm"
        );
    }

    #[test]
    fn unsupported_token_is_reported() {
        let err = translate_format("dddd", Dialect::Sqlite).unwrap_err();
        assert!(matches!(err, OrmError::UnsupportedExpression(_)));
    }
}
