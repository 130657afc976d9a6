//! Value converters between host and database representations.

use crate::error::{OrmError, OrmResult};
use crate::value::{Value, ValueType};
use std::fmt;

/// Converts a member's host value to and from its stored form.
///
/// Converters apply to bound parameters and to constants compared against
/// converted columns, never to SQL emitted for the column itself.
pub trait ValueConverter: Send + Sync + fmt::Debug {
    fn to_db(&self, value: Value) -> OrmResult<Value>;

    fn from_db(&self, value: Value) -> OrmResult<Value>;

    /// Stored value type, when it differs from the member type.
    fn stored_type(&self) -> Option<ValueType> {
        None
    }
}

/// Stores values as their JSON text.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonText;

impl ValueConverter for JsonText {
    fn to_db(&self, value: Value) -> OrmResult<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::Json(j) => Ok(Value::Text(j.to_string())),
            other => serde_json::to_string(&other)
                .map(Value::Text)
                .map_err(|e| OrmError::conversion(e.to_string())),
        }
    }

    fn from_db(&self, value: Value) -> OrmResult<Value> {
        match value {
            Value::Text(s) => serde_json::from_str(&s)
                .map(Value::Json)
                .map_err(|e| OrmError::conversion(e.to_string())),
            other => Ok(other),
        }
    }

    fn stored_type(&self) -> Option<ValueType> {
        Some(ValueType::Text)
    }
}

/// Stores an enum-like text value as its position in a fixed label list.
#[derive(Debug, Clone)]
pub struct EnumOrdinal {
    labels: Vec<String>,
}

impl EnumOrdinal {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }
}

impl ValueConverter for EnumOrdinal {
    fn to_db(&self, value: Value) -> OrmResult<Value> {
        match value {
            Value::Text(label) => self
                .labels
                .iter()
                .position(|l| *l == label)
                .map(|i| Value::I32(i as i32))
                .ok_or_else(|| OrmError::conversion(format!("unknown enum label '{label}'"))),
            other => Ok(other),
        }
    }

    fn from_db(&self, value: Value) -> OrmResult<Value> {
        match value.as_i64() {
            Some(i) => usize::try_from(i)
                .ok()
                .and_then(|i| self.labels.get(i))
                .map(|l| Value::Text(l.clone()))
                .ok_or_else(|| OrmError::conversion(format!("enum ordinal {i} out of range"))),
            None => Ok(value),
        }
    }

    fn stored_type(&self) -> Option<ValueType> {
        Some(ValueType::I32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_ordinal_round_trips_labels() {
        let c = EnumOrdinal::new(["draft", "paid", "shipped"]);
        assert_eq!(c.to_db(Value::Text("paid".into())).unwrap(), Value::I32(1));
        assert_eq!(c.from_db(Value::I32(2)).unwrap(), Value::Text("shipped".into()));
        assert!(c.to_db(Value::Text("lost".into())).is_err());
        assert!(c.from_db(Value::I32(9)).is_err());
    }

    #[test]
    fn json_text_serializes_values() {
        let c = JsonText;
        let stored = c.to_db(Value::Json(serde_json::json!({"a": 1}))).unwrap();
        assert_eq!(stored, Value::Text("{\"a\":1}".into()));
        assert_eq!(
            c.from_db(stored).unwrap(),
            Value::Json(serde_json::json!({"a": 1}))
        );
        assert_eq!(c.to_db(Value::Null).unwrap(), Value::Null);
    }
}
