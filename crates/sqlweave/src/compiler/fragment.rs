use crate::mapping::ValueConverter;
use crate::value::{Value, ValueType};
use std::sync::Arc;

/// One compiled expression node.
///
/// A constant fragment carries its host value unbound; it only becomes a
/// parameter when the enclosing node decides it needs SQL text. That lets
/// parents fold constants and attach a neighbouring column's converter first.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub sql: String,
    pub constant: Option<Value>,
    /// Host variable name, for parameter de-duplication.
    pub variable: Option<String>,
    /// Whether the fragment references a table column.
    pub has_field: bool,
    /// Whether the SQL is a boolean predicate (as opposed to a bool-typed value).
    pub predicate: bool,
    /// `false` when wrapping the predicate in NOT is not allowed.
    pub negatable: bool,
    pub value_type: ValueType,
    pub native_type: Option<String>,
    pub converter: Option<Arc<dyn ValueConverter>>,
}

impl Fragment {
    pub fn constant(value: Value) -> Self {
        let value_type = value.value_type();
        Self {
            sql: String::new(),
            constant: Some(value),
            variable: None,
            has_field: false,
            predicate: false,
            negatable: true,
            value_type,
            native_type: None,
            converter: None,
        }
    }

    pub fn variable(name: impl Into<String>, value: Value) -> Self {
        Self {
            variable: Some(name.into()),
            ..Self::constant(value)
        }
    }

    /// A column reference.
    pub fn column(sql: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            sql: sql.into(),
            constant: None,
            variable: None,
            has_field: true,
            predicate: false,
            negatable: true,
            value_type,
            native_type: None,
            converter: None,
        }
    }

    /// Computed SQL.
    pub fn sql(sql: impl Into<String>, value_type: ValueType, has_field: bool) -> Self {
        Self {
            has_field,
            ..Self::column(sql, value_type)
        }
    }

    pub fn as_predicate(mut self) -> Self {
        self.predicate = true;
        self
    }

    pub fn is_constant(&self) -> bool {
        self.constant.is_some()
    }

    pub fn is_null_constant(&self) -> bool {
        matches!(self.constant, Some(Value::Null))
    }
}
