//! Scalar values, value types, and the Rust-type → value-type mapping.
//!
//! [`Value`] is what flows through the compiler: constants folded on the host,
//! parameters bound into a [`ParamSet`](crate::compiler::ParamSet), and column
//! values decoded from result rows. It implements `tokio_postgres` `ToSql` and
//! `FromSql` so parameter collections bind directly to the Postgres driver.

use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use tokio_postgres::types::{FromSql, IsNull, Kind, ToSql, Type};
use uuid::Uuid;

/// A dynamically typed SQL value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F64(f64),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    DateTimeUtc(DateTime<Utc>),
    /// A duration, in seconds.
    Interval(f64),
    Json(serde_json::Value),
    Array(Vec<Value>),
    /// A host-side object. Used for constant folding of captured values; never bound.
    Record(Record),
}

/// The declared type of a member, fragment, or value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Bool,
    I16,
    I32,
    I64,
    F64,
    Text,
    Bytes,
    Uuid,
    Date,
    Time,
    DateTime,
    DateTimeUtc,
    Interval,
    Json,
    Array(Box<ValueType>),
    /// A mapped entity or constructed object, by entity name.
    Object(String),
    Unknown,
}

impl ValueType {
    /// Whether arithmetic on this type is numeric.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::I16 | Self::I32 | Self::I64 | Self::F64)
    }

    /// Whether this is a date/time instant type.
    pub fn is_temporal(&self) -> bool {
        matches!(self, Self::Date | Self::DateTime | Self::DateTimeUtc)
    }

    /// Element type for arrays.
    pub fn element(&self) -> Option<&ValueType> {
        match self {
            Self::Array(inner) => Some(inner),
            _ => None,
        }
    }

    /// Merge two operand types for an arithmetic result (wider numeric wins).
    pub fn merge(&self, other: &ValueType) -> ValueType {
        fn rank(t: &ValueType) -> u8 {
            match t {
                ValueType::I16 => 1,
                ValueType::I32 => 2,
                ValueType::I64 => 3,
                ValueType::F64 => 4,
                _ => 0,
            }
        }
        match (self, other) {
            (ValueType::Unknown, t) | (t, ValueType::Unknown) => t.clone(),
            (a, b) if a.is_numeric() && b.is_numeric() => {
                if rank(a) >= rank(b) {
                    a.clone()
                } else {
                    b.clone()
                }
            }
            (a, _) => a.clone(),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Array(inner) => write!(f, "{inner}[]"),
            Self::Object(name) => f.write_str(name),
            other => write!(f, "{other:?}"),
        }
    }
}

impl Value {
    /// The runtime type of this value (`Unknown` for NULL and empty arrays).
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Unknown,
            Value::Bool(_) => ValueType::Bool,
            Value::I16(_) => ValueType::I16,
            Value::I32(_) => ValueType::I32,
            Value::I64(_) => ValueType::I64,
            Value::F64(_) => ValueType::F64,
            Value::Text(_) => ValueType::Text,
            Value::Bytes(_) => ValueType::Bytes,
            Value::Uuid(_) => ValueType::Uuid,
            Value::Date(_) => ValueType::Date,
            Value::Time(_) => ValueType::Time,
            Value::DateTime(_) => ValueType::DateTime,
            Value::DateTimeUtc(_) => ValueType::DateTimeUtc,
            Value::Interval(_) => ValueType::Interval,
            Value::Json(_) => ValueType::Json,
            Value::Array(items) => ValueType::Array(Box::new(
                items
                    .iter()
                    .map(Value::value_type)
                    .find(|t| *t != ValueType::Unknown)
                    .unwrap_or(ValueType::Unknown),
            )),
            Value::Record(_) => ValueType::Object("record".to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I16(v) => Some(i64::from(*v)),
            Value::I32(v) => Some(i64::from(*v)),
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F64(v) | Value::Interval(v) => Some(*v),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Value::DateTime(dt) => Some(*dt),
            Value::DateTimeUtc(dt) => Some(dt.naive_utc()),
            Value::Date(d) => d.and_hms_opt(0, 0, 0),
            _ => None,
        }
    }

    /// Whether this value may be bound as a statement parameter.
    pub fn is_bindable(&self) -> bool {
        match self {
            Value::Record(_) => false,
            Value::Array(items) => items.iter().all(Value::is_bindable),
            _ => true,
        }
    }

    /// Short type label for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::I16(_) | Value::I32(_) | Value::I64(_) => "integer",
            Value::F64(_) => "float",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Uuid(_) => "uuid",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::DateTime(_) | Value::DateTimeUtc(_) => "datetime",
            Value::Interval(_) => "interval",
            Value::Json(_) => "json",
            Value::Array(_) => "array",
            Value::Record(_) => "record",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::I16(v) => write!(f, "{v}"),
            Value::I32(v) => write!(f, "{v}"),
            Value::I64(v) => write!(f, "{v}"),
            Value::F64(v) => write!(f, "{v}"),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Uuid(u) => write!(f, "{u}"),
            Value::Date(d) => write!(f, "{d}"),
            Value::Time(t) => write!(f, "{t}"),
            Value::DateTime(dt) => write!(f, "{dt}"),
            Value::DateTimeUtc(dt) => write!(f, "{dt}"),
            Value::Interval(secs) => write!(f, "{secs}s"),
            Value::Json(j) => write!(f, "{j}"),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Record(r) => write!(f, "{r}"),
        }
    }
}

// ==================== Record ====================

/// An ordered set of named values: one anonymous payload row or one result row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert (replaces an existing field with the same name).
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn into_values(self) -> Vec<Value> {
        self.fields.into_iter().map(|(_, v)| v).collect()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{ ")?;
        for (i, (name, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}: {value}")?;
        }
        f.write_str(" }")
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (name, value) in iter {
            record.set(name, value);
        }
        record
    }
}

// ==================== SqlType ====================

/// Maps a Rust type to its [`ValueType`] and converts instances to [`Value`].
///
/// `#[derive(Entity)]` uses this to reflect member types. Implement it for
/// your own enums (returning `true` from `is_enum`) to make them mappable.
pub trait SqlType {
    fn value_type() -> ValueType;

    fn nullable() -> bool {
        false
    }

    fn is_enum() -> bool {
        false
    }

    fn to_value(&self) -> Value;
}

macro_rules! impl_sql_type {
    ($($ty:ty => $vt:ident, |$v:ident| $conv:expr;)*) => {
        $(
            impl SqlType for $ty {
                fn value_type() -> ValueType {
                    ValueType::$vt
                }

                fn to_value(&self) -> Value {
                    let $v = self;
                    $conv
                }
            }

            impl From<$ty> for Value {
                fn from($v: $ty) -> Self {
                    SqlType::to_value(&$v)
                }
            }
        )*
    };
}

impl_sql_type! {
    bool => Bool, |v| Value::Bool(*v);
    i16 => I16, |v| Value::I16(*v);
    i32 => I32, |v| Value::I32(*v);
    i64 => I64, |v| Value::I64(*v);
    u32 => I64, |v| Value::I64(i64::from(*v));
    f32 => F64, |v| Value::F64(f64::from(*v));
    f64 => F64, |v| Value::F64(*v);
    String => Text, |v| Value::Text(v.clone());
    Vec<u8> => Bytes, |v| Value::Bytes(v.clone());
    Uuid => Uuid, |v| Value::Uuid(*v);
    NaiveDate => Date, |v| Value::Date(*v);
    NaiveTime => Time, |v| Value::Time(*v);
    NaiveDateTime => DateTime, |v| Value::DateTime(*v);
    DateTime<Utc> => DateTimeUtc, |v| Value::DateTimeUtc(*v);
    chrono::TimeDelta => Interval, |v| Value::Interval(v.num_milliseconds() as f64 / 1000.0);
    serde_json::Value => Json, |v| Value::Json(v.clone());
}

macro_rules! impl_sql_array {
    ($($ty:ty => $vt:ident;)*) => {
        $(
            impl SqlType for Vec<$ty> {
                fn value_type() -> ValueType {
                    ValueType::Array(Box::new(ValueType::$vt))
                }

                fn to_value(&self) -> Value {
                    Value::Array(self.iter().map(SqlType::to_value).collect())
                }
            }

            impl From<Vec<$ty>> for Value {
                fn from(v: Vec<$ty>) -> Self {
                    SqlType::to_value(&v)
                }
            }
        )*
    };
}

impl_sql_array! {
    i32 => I32;
    i64 => I64;
    String => Text;
    Uuid => Uuid;
}

impl<T: SqlType> SqlType for Option<T> {
    fn value_type() -> ValueType {
        T::value_type()
    }

    fn nullable() -> bool {
        true
    }

    fn is_enum() -> bool {
        T::is_enum()
    }

    fn to_value(&self) -> Value {
        match self {
            Some(v) => v.to_value(),
            None => Value::Null,
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Record> for Value {
    fn from(v: Record) -> Self {
        Value::Record(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

// ==================== tokio-postgres binding ====================

type BoxError = Box<dyn Error + Sync + Send>;

impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(b) => b.to_sql_checked(ty, out),
            Value::I16(_) | Value::I32(_) | Value::I64(_) => {
                let v = self.as_i64().unwrap_or_default();
                if *ty == Type::INT2 {
                    i16::try_from(v)?.to_sql_checked(ty, out)
                } else if *ty == Type::INT4 {
                    i32::try_from(v)?.to_sql_checked(ty, out)
                } else if *ty == Type::FLOAT8 {
                    (v as f64).to_sql_checked(ty, out)
                } else if *ty == Type::FLOAT4 {
                    (v as f32).to_sql_checked(ty, out)
                } else {
                    v.to_sql_checked(ty, out)
                }
            }
            Value::F64(v) | Value::Interval(v) => {
                if *ty == Type::FLOAT4 {
                    (*v as f32).to_sql_checked(ty, out)
                } else {
                    v.to_sql_checked(ty, out)
                }
            }
            Value::Text(s) => s.to_sql_checked(ty, out),
            Value::Bytes(b) => b.to_sql_checked(ty, out),
            Value::Uuid(u) => u.to_sql_checked(ty, out),
            Value::Date(d) => d.to_sql_checked(ty, out),
            Value::Time(t) => t.to_sql_checked(ty, out),
            Value::DateTime(dt) => dt.to_sql_checked(ty, out),
            Value::DateTimeUtc(dt) => dt.to_sql_checked(ty, out),
            Value::Json(j) => j.to_sql_checked(ty, out),
            Value::Array(items) => items.to_sql_checked(ty, out),
            Value::Record(r) => Err(format!("cannot bind host record {r} as a parameter").into()),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    tokio_postgres::types::to_sql_checked!();
}

impl<'a> FromSql<'a> for Value {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        if let Kind::Array(_) = ty.kind() {
            return Vec::<Value>::from_sql(ty, raw).map(Value::Array);
        }
        let value = if *ty == Type::BOOL {
            Value::Bool(bool::from_sql(ty, raw)?)
        } else if *ty == Type::INT2 {
            Value::I16(i16::from_sql(ty, raw)?)
        } else if *ty == Type::INT4 {
            Value::I32(i32::from_sql(ty, raw)?)
        } else if *ty == Type::INT8 {
            Value::I64(i64::from_sql(ty, raw)?)
        } else if *ty == Type::FLOAT4 {
            Value::F64(f64::from(f32::from_sql(ty, raw)?))
        } else if *ty == Type::FLOAT8 {
            Value::F64(f64::from_sql(ty, raw)?)
        } else if *ty == Type::BYTEA {
            Value::Bytes(Vec::<u8>::from_sql(ty, raw)?)
        } else if *ty == Type::UUID {
            Value::Uuid(Uuid::from_sql(ty, raw)?)
        } else if *ty == Type::DATE {
            Value::Date(NaiveDate::from_sql(ty, raw)?)
        } else if *ty == Type::TIME {
            Value::Time(NaiveTime::from_sql(ty, raw)?)
        } else if *ty == Type::TIMESTAMP {
            Value::DateTime(NaiveDateTime::from_sql(ty, raw)?)
        } else if *ty == Type::TIMESTAMPTZ {
            Value::DateTimeUtc(DateTime::<Utc>::from_sql(ty, raw)?)
        } else if *ty == Type::JSON || *ty == Type::JSONB {
            Value::Json(serde_json::Value::from_sql(ty, raw)?)
        } else if <String as FromSql>::accepts(ty) {
            Value::Text(String::from_sql(ty, raw)?)
        } else {
            return Err(format!("unsupported column type: {ty}").into());
        };
        Ok(value)
    }

    fn from_sql_null(_ty: &Type) -> Result<Self, BoxError> {
        Ok(Value::Null)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

/// The Postgres wire type for a value type (used by binary COPY).
pub(crate) fn pg_type(vt: &ValueType) -> Type {
    match vt {
        ValueType::Bool => Type::BOOL,
        ValueType::I16 => Type::INT2,
        ValueType::I32 => Type::INT4,
        ValueType::I64 => Type::INT8,
        ValueType::F64 | ValueType::Interval => Type::FLOAT8,
        ValueType::Bytes => Type::BYTEA,
        ValueType::Uuid => Type::UUID,
        ValueType::Date => Type::DATE,
        ValueType::Time => Type::TIME,
        ValueType::DateTime => Type::TIMESTAMP,
        ValueType::DateTimeUtc => Type::TIMESTAMPTZ,
        ValueType::Json => Type::JSONB,
        ValueType::Array(inner) => match inner.as_ref() {
            ValueType::I32 => Type::INT4_ARRAY,
            ValueType::I64 => Type::INT8_ARRAY,
            ValueType::Uuid => Type::UUID_ARRAY,
            _ => Type::TEXT_ARRAY,
        },
        ValueType::Text | ValueType::Object(_) | ValueType::Unknown => Type::TEXT,
    }
}
