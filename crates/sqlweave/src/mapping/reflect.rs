//! Compile-time reflection over host types.
//!
//! `#[derive(Entity)]` implements both traits. [`Record`] implements
//! [`Payload`] so anonymous rows can be written without a derived type.

use crate::value::{Record, Value, ValueType};

/// Mapping hints carried by a member declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberHints {
    pub key: bool,
    pub auto_increment: bool,
    pub ignore: bool,
    /// Column name override.
    pub column: Option<String>,
    /// Target entity name for relationship members.
    pub navigation: Option<String>,
    /// `true` when the relationship is a collection.
    pub to_many: bool,
    /// Foreign-key member of a relationship.
    pub foreign_key: Option<String>,
}

/// Static description of one member of a reflected type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    pub name: String,
    pub value_type: ValueType,
    pub nullable: bool,
    pub is_enum: bool,
    pub hints: MemberHints,
}

impl MemberInfo {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            nullable: false,
            is_enum: false,
            hints: MemberHints::default(),
        }
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn hints(mut self, hints: MemberHints) -> Self {
        self.hints = hints;
        self
    }
}

/// A type whose members can be mapped to a table.
pub trait Reflect {
    /// Entity name used as the catalog key.
    fn type_name() -> &'static str;

    /// Table name declared on the type, if any.
    fn table_name() -> Option<&'static str> {
        None
    }

    /// Schema declared on the type, if any.
    fn schema_name() -> Option<&'static str> {
        None
    }

    /// Members in declaration order.
    fn members() -> Vec<MemberInfo>;
}

/// A row of values that can be written: member name → value.
pub trait Payload {
    /// Member names in declaration order.
    fn member_names(&self) -> Vec<String>;

    /// The value of a member, or `None` when the payload lacks it.
    fn value(&self, member: &str) -> Option<Value>;
}

impl Payload for Record {
    fn member_names(&self) -> Vec<String> {
        self.names().map(str::to_string).collect()
    }

    fn value(&self, member: &str) -> Option<Value> {
        self.get(member).cloned()
    }
}

impl<T: Payload + ?Sized> Payload for &T {
    fn member_names(&self) -> Vec<String> {
        (**self).member_names()
    }

    fn value(&self, member: &str) -> Option<Value> {
        (**self).value(member)
    }
}
