//! SQL dialects: quoting, placeholders, paging, native types and clause styles.
//!
//! Built-in operation translation (date/time members, formatting, collection
//! membership) lives in [`translate`], keyed by dialect.

mod format;
mod rules;
pub mod translate;

pub use format::translate_format;
pub use translate::{Rule, RuleKey, TypeTag, lookup};

use crate::error::{OrmError, OrmResult};
use crate::ident::{is_plain, write_quoted};
use crate::value::ValueType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Postgres,
    MySql,
    Sqlite,
    SqlServer,
}

/// How a dialect returns values from a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturningStyle {
    /// `... RETURNING a, b`
    Suffix,
    /// `... OUTPUT INSERTED.a, INSERTED.b VALUES ...`
    Output,
    Unsupported,
}

/// How a dialect expresses insert-or-update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertStyle {
    /// `ON CONFLICT (...) DO NOTHING | DO UPDATE SET ...`
    OnConflict,
    /// `ON DUPLICATE KEY UPDATE ...`
    OnDuplicateKey,
    Unsupported,
}

impl Dialect {
    pub(crate) fn quote_chars(self) -> (char, char) {
        match self {
            Dialect::Postgres | Dialect::Sqlite => ('"', '"'),
            Dialect::MySql => ('`', '`'),
            Dialect::SqlServer => ('[', ']'),
        }
    }

    /// Render one identifier, quoting only when needed.
    pub fn ident(self, name: &str) -> String {
        if is_plain(name) {
            return name.to_string();
        }
        let mut out = String::with_capacity(name.len() + 2);
        write_quoted(self, name, &mut out);
        out
    }

    /// Render a possibly schema-qualified table name.
    pub fn table(self, schema: Option<&str>, table: &str) -> String {
        match schema {
            Some(schema) => format!("{}.{}", self.ident(schema), self.ident(table)),
            None => self.ident(table),
        }
    }

    /// Render the placeholder for a bound parameter.
    ///
    /// `position` is 1-based within the parameter collection; `name` is the
    /// allocated parameter name.
    pub fn placeholder(self, position: usize, name: &str) -> String {
        match self {
            Dialect::Postgres => format!("${position}"),
            Dialect::MySql => "?".to_string(),
            Dialect::Sqlite | Dialect::SqlServer => format!("@{name}"),
        }
    }

    /// Whether a placeholder may be referenced more than once in one statement.
    pub fn supports_param_reuse(self) -> bool {
        !matches!(self, Dialect::MySql)
    }

    /// Whether several parameterized statements can be sent as one command.
    pub fn supports_multi_statement_batch(self) -> bool {
        !matches!(self, Dialect::Postgres)
    }

    fn paging_template(self, take: bool, skip: bool) -> &'static str {
        match (self, take, skip) {
            (Dialect::SqlServer, true, true) => "OFFSET {skip} ROWS FETCH NEXT {take} ROWS ONLY",
            (Dialect::SqlServer, true, false) => "OFFSET 0 ROWS FETCH NEXT {take} ROWS ONLY",
            (Dialect::SqlServer, false, _) => "OFFSET {skip} ROWS",
            (Dialect::MySql | Dialect::Sqlite, false, true) => "LIMIT -1 OFFSET {skip}",
            (_, true, true) => "LIMIT {take} OFFSET {skip}",
            (_, true, false) => "LIMIT {take}",
            (_, false, _) => "OFFSET {skip}",
        }
    }

    /// Render the paging clause, substituting `{take}` / `{skip}` tokens.
    pub fn paging(self, take: Option<u64>, skip: Option<u64>) -> Option<String> {
        if take.is_none() && skip.is_none() {
            return None;
        }
        let template = self.paging_template(take.is_some(), skip.is_some());
        let mut sql = template.to_string();
        if let Some(take) = take {
            sql = sql.replace("{take}", &take.to_string());
        }
        sql = sql.replace("{skip}", &skip.unwrap_or(0).to_string());
        if self == Dialect::MySql && sql.starts_with("LIMIT -1") {
            sql = sql.replace("LIMIT -1", "LIMIT 18446744073709551615");
        }
        Some(sql)
    }

    /// Whether paging requires an ORDER BY clause.
    pub fn paging_requires_order(self) -> bool {
        matches!(self, Dialect::SqlServer)
    }

    pub fn bool_literal(self, value: bool) -> &'static str {
        match (self, value) {
            (Dialect::Postgres, true) => "TRUE",
            (Dialect::Postgres, false) => "FALSE",
            (_, true) => "1",
            (_, false) => "0",
        }
    }

    /// Always-false predicate.
    pub fn false_predicate(self) -> &'static str {
        "1 = 0"
    }

    /// Native column type for a value type.
    pub fn native_type(self, vt: &ValueType) -> String {
        let name = match (self, vt) {
            (_, ValueType::Bool) => match self {
                Dialect::Postgres => "BOOLEAN",
                Dialect::SqlServer => "BIT",
                Dialect::MySql => "TINYINT(1)",
                Dialect::Sqlite => "INTEGER",
            },
            (_, ValueType::I16) => "SMALLINT",
            (Dialect::Sqlite, ValueType::I32 | ValueType::I64) => "INTEGER",
            (_, ValueType::I32) => "INTEGER",
            (_, ValueType::I64) => "BIGINT",
            (Dialect::Postgres, ValueType::F64 | ValueType::Interval) => "DOUBLE PRECISION",
            (Dialect::SqlServer, ValueType::F64 | ValueType::Interval) => "FLOAT",
            (Dialect::MySql, ValueType::F64 | ValueType::Interval) => "DOUBLE",
            (Dialect::Sqlite, ValueType::F64 | ValueType::Interval) => "REAL",
            (Dialect::Postgres, ValueType::Text) => "TEXT",
            (Dialect::MySql, ValueType::Text) => "VARCHAR(4000)",
            (Dialect::SqlServer, ValueType::Text) => "NVARCHAR(MAX)",
            (Dialect::Sqlite, ValueType::Text) => "TEXT",
            (Dialect::Postgres, ValueType::Bytes) => "BYTEA",
            (Dialect::SqlServer, ValueType::Bytes) => "VARBINARY(MAX)",
            (_, ValueType::Bytes) => "BLOB",
            (Dialect::Postgres, ValueType::Uuid) => "UUID",
            (Dialect::SqlServer, ValueType::Uuid) => "UNIQUEIDENTIFIER",
            (Dialect::MySql, ValueType::Uuid) => "CHAR(36)",
            (Dialect::Sqlite, ValueType::Uuid) => "TEXT",
            (_, ValueType::Date) => "DATE",
            (_, ValueType::Time) => "TIME",
            (Dialect::Postgres, ValueType::DateTime) => "TIMESTAMP",
            (Dialect::Postgres, ValueType::DateTimeUtc) => "TIMESTAMPTZ",
            (Dialect::SqlServer, ValueType::DateTime) => "DATETIME2",
            (Dialect::SqlServer, ValueType::DateTimeUtc) => "DATETIMEOFFSET",
            (_, ValueType::DateTime | ValueType::DateTimeUtc) => "DATETIME",
            (Dialect::Postgres, ValueType::Json) => "JSONB",
            (Dialect::MySql, ValueType::Json) => "JSON",
            (Dialect::SqlServer, ValueType::Json) => "NVARCHAR(MAX)",
            (Dialect::Sqlite, ValueType::Json) => "TEXT",
            (Dialect::Postgres, ValueType::Array(inner)) => {
                return format!("{}[]", self.native_type(inner));
            }
            (_, ValueType::Array(_)) => "TEXT",
            (_, ValueType::Object(_) | ValueType::Unknown) => "TEXT",
        };
        name.to_string()
    }

    /// `CAST(sql AS native)`.
    pub fn cast(self, sql: &str, vt: &ValueType) -> String {
        format!("CAST({sql} AS {})", self.native_type(vt))
    }

    /// String concatenation of already-rendered operands.
    pub fn concat(self, parts: &[&str]) -> String {
        match self {
            Dialect::MySql => format!("CONCAT({})", parts.join(", ")),
            Dialect::SqlServer => format!("({})", parts.join(" + ")),
            Dialect::Postgres | Dialect::Sqlite => format!("({})", parts.join(" || ")),
        }
    }

    pub fn returning_style(self) -> ReturningStyle {
        match self {
            Dialect::Postgres | Dialect::Sqlite => ReturningStyle::Suffix,
            Dialect::SqlServer => ReturningStyle::Output,
            Dialect::MySql => ReturningStyle::Unsupported,
        }
    }

    pub fn upsert_style(self) -> UpsertStyle {
        match self {
            Dialect::Postgres | Dialect::Sqlite => UpsertStyle::OnConflict,
            Dialect::MySql => UpsertStyle::OnDuplicateKey,
            Dialect::SqlServer => UpsertStyle::Unsupported,
        }
    }

    /// Reference to the value proposed for insertion inside an upsert's update list.
    pub fn excluded(self, column: &str) -> String {
        match self {
            Dialect::MySql => format!("VALUES({})", self.ident(column)),
            _ => format!("EXCLUDED.{}", self.ident(column)),
        }
    }

    /// Physical name for a call-scoped staging table.
    pub fn temp_table_name(self, base: &str) -> String {
        match self {
            Dialect::SqlServer => format!("#{base}"),
            _ => base.to_string(),
        }
    }

    /// DDL for a staging table with a composite key.
    pub fn create_temp_table(
        self,
        name: &str,
        columns: &[(String, ValueType)],
        keys: &[String],
    ) -> OrmResult<String> {
        if columns.is_empty() {
            return Err(OrmError::invalid_operation(
                "staging table requires at least one column",
            ));
        }
        let cols: Vec<String> = columns
            .iter()
            .map(|(col, vt)| format!("{} {}", self.ident(col), self.native_type(vt)))
            .collect();
        let keys: Vec<String> = keys.iter().map(|k| self.ident(k)).collect();
        let create = match self {
            Dialect::SqlServer => "CREATE TABLE",
            Dialect::Postgres | Dialect::MySql => "CREATE TEMPORARY TABLE",
            Dialect::Sqlite => "CREATE TEMP TABLE",
        };
        let table = match self {
            Dialect::SqlServer => name.to_string(),
            _ => self.ident(name),
        };
        let mut sql = format!("{create} {table} ({}", cols.join(", "));
        if !keys.is_empty() {
            sql.push_str(&format!(", PRIMARY KEY ({})", keys.join(", ")));
        }
        sql.push(')');
        Ok(sql)
    }

    pub fn drop_table(self, name: &str) -> String {
        match self {
            Dialect::SqlServer => format!("DROP TABLE {name}"),
            _ => format!("DROP TABLE {}", self.ident(name)),
        }
    }

    /// Catalog-introspection query listing tables whose name matches a LIKE pattern.
    ///
    /// Takes exactly one parameter: the pattern.
    pub fn table_discovery_sql(self) -> String {
        let p = self.placeholder(1, "p0");
        match self {
            Dialect::Postgres => format!(
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_name LIKE {p}"
            ),
            Dialect::MySql => format!(
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_schema = DATABASE() AND table_name LIKE {p}"
            ),
            Dialect::Sqlite => {
                format!("SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE {p}")
            }
            Dialect::SqlServer => format!(
                "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES \
                 WHERE TABLE_TYPE = 'BASE TABLE' AND TABLE_NAME LIKE {p}"
            ),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Dialect::Postgres => "postgres",
            Dialect::MySql => "mysql",
            Dialect::Sqlite => "sqlite",
            Dialect::SqlServer => "sqlserver",
        })
    }
}

impl FromStr for Dialect {
    type Err = OrmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            "sqlite" => Ok(Dialect::Sqlite),
            "sqlserver" | "mssql" => Ok(Dialect::SqlServer),
            other => Err(OrmError::validation(format!("unknown dialect: {other}"))),
        }
    }
}
