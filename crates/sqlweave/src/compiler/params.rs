//! Parameter collections.
//!
//! While a statement is being assembled, every bound value is written into the
//! SQL text as an opaque marker. [`ParamSet::render`] then rewrites markers into
//! the dialect's placeholders in textual order, which keeps positional
//! dialects correct no matter in which order clauses were compiled.

use crate::dialect::Dialect;
use crate::error::{OrmError, OrmResult};
use crate::value::Value;
use std::collections::HashMap;
use tokio_postgres::types::ToSql;

const MARK: char = '\u{1}';

/// One bound parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundParam {
    pub name: String,
    pub value: Value,
}

/// An ordered collection of named parameters.
#[derive(Debug, Clone)]
pub struct ParamSet {
    prefix: String,
    statement: Option<usize>,
    seq: usize,
    params: Vec<BoundParam>,
    variables: HashMap<String, usize>,
}

impl Default for ParamSet {
    fn default() -> Self {
        Self::with_prefix("p")
    }
}

impl ParamSet {
    /// Create an empty set using the default `p` name prefix.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            statement: None,
            seq: 0,
            params: Vec::new(),
            variables: HashMap::new(),
        }
    }

    /// Suffix subsequently allocated names with a statement index.
    ///
    /// Used when several statements share one collection in a batched command.
    pub fn set_statement(&mut self, index: Option<usize>) {
        self.statement = index;
    }

    fn next_name(&mut self) -> String {
        let name = match self.statement {
            Some(i) => format!("{}{}_{}", self.prefix, self.seq, i),
            None => format!("{}{}", self.prefix, self.seq),
        };
        self.seq += 1;
        name
    }

    /// Bind a value, returning the marker to embed in SQL text.
    pub fn bind(&mut self, value: Value) -> String {
        let name = self.next_name();
        self.params.push(BoundParam { name, value });
        marker(self.params.len() - 1)
    }

    /// Bind a named host variable. Repeated bindings of the same variable in
    /// the same statement share one parameter.
    pub fn bind_variable(&mut self, variable: &str, value: Value) -> String {
        let key = match self.statement {
            Some(i) => format!("{variable}#{i}"),
            None => variable.to_string(),
        };
        if let Some(&index) = self.variables.get(&key) {
            return marker(index);
        }
        let placeholder = self.bind(value);
        self.variables.insert(key, self.params.len() - 1);
        placeholder
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BoundParam> {
        self.params.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.params
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.value)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.params.iter().map(|p| &p.value)
    }

    /// Parameters as references for tokio-postgres.
    pub fn as_refs(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.params
            .iter()
            .map(|p| &p.value as &(dyn ToSql + Sync))
            .collect()
    }

    /// Drop all parameters and restart name allocation.
    pub fn clear(&mut self) {
        self.seq = 0;
        self.statement = None;
        self.params.clear();
        self.variables.clear();
    }

    /// Rewrite markers in `sql` into dialect placeholders.
    ///
    /// Returns the final text and the parameters the text references, in the
    /// order the dialect binds them. Positional-only dialects receive one
    /// parameter per occurrence; the others receive each parameter once.
    pub fn render(&self, sql: &str, dialect: Dialect) -> OrmResult<(String, ParamSet)> {
        let mut out = String::with_capacity(sql.len());
        let mut rendered = ParamSet::with_prefix(self.prefix.clone());
        let mut positions: HashMap<usize, usize> = HashMap::new();
        let mut rest = sql;

        while let Some(start) = rest.find(MARK) {
            out.push_str(&rest[..start]);
            let after = &rest[start + MARK.len_utf8()..];
            let end = after
                .find(MARK)
                .ok_or_else(|| OrmError::Other("unterminated parameter marker".into()))?;
            let index: usize = after[..end]
                .parse()
                .map_err(|_| OrmError::Other("malformed parameter marker".into()))?;
            let param = self
                .params
                .get(index)
                .ok_or_else(|| OrmError::Other(format!("unknown parameter #{index}")))?;

            let position = if dialect.supports_param_reuse() {
                match positions.get(&index) {
                    Some(&p) => p,
                    None => {
                        rendered.params.push(param.clone());
                        positions.insert(index, rendered.params.len());
                        rendered.params.len()
                    }
                }
            } else {
                rendered.params.push(param.clone());
                rendered.params.len()
            };
            out.push_str(&dialect.placeholder(position, &param.name));
            rest = &after[end + MARK.len_utf8()..];
        }
        out.push_str(rest);
        rendered.seq = rendered.params.len();
        Ok((out, rendered))
    }
}

fn marker(index: usize) -> String {
    format!("{MARK}{index}{MARK}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_prefix_and_sequence() {
        let mut set = ParamSet::new();
        set.bind(Value::I32(1));
        set.set_statement(Some(2));
        set.bind(Value::I32(2));
        let names: Vec<_> = set.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["p0", "p1_2"]);
    }

    #[test]
    fn postgres_numbers_in_text_order() {
        let mut set = ParamSet::new();
        let late = set.bind(Value::I32(1));
        let early = set.bind(Value::I32(2));
        let sql = format!("SELECT {early} WHERE x = {late}");
        let (text, params) = set.render(&sql, Dialect::Postgres).unwrap();
        assert_eq!(text, "SELECT $1 WHERE x = $2");
        assert_eq!(params.values().cloned().collect::<Vec<_>>(), vec![Value::I32(2), Value::I32(1)]);
    }

    #[test]
    fn variables_are_deduplicated_except_for_positional_dialects() {
        let mut set = ParamSet::new();
        let a = set.bind_variable("min", Value::I32(5));
        let b = set.bind_variable("min", Value::I32(5));
        assert_eq!(a, b);
        let sql = format!("a > {a} AND b > {b}");

        let (text, params) = set.render(&sql, Dialect::SqlServer).unwrap();
        assert_eq!(text, "a > @p0 AND b > @p0");
        assert_eq!(params.len(), 1);

        let (text, params) = set.render(&sql, Dialect::MySql).unwrap();
        assert_eq!(text, "a > ? AND b > ?");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn statement_index_separates_variables() {
        let mut set = ParamSet::new();
        set.set_statement(Some(0));
        let a = set.bind_variable("v", Value::I32(1));
        set.set_statement(Some(1));
        let b = set.bind_variable("v", Value::I32(2));
        assert_ne!(a, b);
        let (text, _) = set.render(&format!("{a};{b}"), Dialect::Sqlite).unwrap();
        assert_eq!(text, "@p0_0;@p1_1");
    }
}
