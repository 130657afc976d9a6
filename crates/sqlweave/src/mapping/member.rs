use super::converter::ValueConverter;
use super::reflect::MemberInfo;
use crate::value::ValueType;
use std::sync::Arc;

/// Cardinality of a relationship member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationKind {
    ToOne,
    ToMany,
}

/// Relationship metadata for a navigation member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigation {
    pub kind: NavigationKind,
    /// Target entity name.
    pub target: String,
    /// Foreign-key member. On to-one relationships it lives on the owning
    /// entity; on to-many relationships it lives on the target.
    pub foreign_key: String,
}

/// Mapping of one member to one column.
#[derive(Debug, Clone)]
pub struct MemberMap {
    pub name: String,
    pub column: String,
    pub value_type: ValueType,
    pub nullable: bool,
    pub is_enum: bool,
    pub key: bool,
    pub auto_increment: bool,
    pub ignored: bool,
    pub navigation: Option<Navigation>,
    /// Explicit native column type, overriding the dialect default.
    pub native_type: Option<String>,
    pub converter: Option<Arc<dyn ValueConverter>>,
}

impl MemberMap {
    /// Map a reflected member. The column defaults to `prefix + name`.
    pub fn from_info(info: &MemberInfo, prefix: &str) -> Self {
        let column = info
            .hints
            .column
            .clone()
            .unwrap_or_else(|| format!("{prefix}{}", info.name));
        let navigation = info.hints.navigation.as_ref().map(|target| Navigation {
            kind: if info.hints.to_many {
                NavigationKind::ToMany
            } else {
                NavigationKind::ToOne
            },
            target: target.clone(),
            foreign_key: info.hints.foreign_key.clone().unwrap_or_default(),
        });
        Self {
            name: info.name.clone(),
            column,
            value_type: info.value_type.clone(),
            nullable: info.nullable,
            is_enum: info.is_enum,
            key: info.hints.key,
            auto_increment: info.hints.auto_increment,
            ignored: info.hints.ignore,
            navigation,
            native_type: None,
            converter: None,
        }
    }

    /// Copy this mapping onto another member declaration.
    ///
    /// Column, native type and converter carry over; nullability and the enum
    /// flag come from the new member's own type.
    pub fn clone_for(&self, info: &MemberInfo) -> Self {
        Self {
            name: info.name.clone(),
            column: self.column.clone(),
            value_type: info.value_type.clone(),
            nullable: info.nullable,
            is_enum: info.is_enum,
            key: self.key,
            auto_increment: self.auto_increment,
            ignored: self.ignored,
            navigation: self.navigation.clone(),
            native_type: self.native_type.clone(),
            converter: self.converter.clone(),
        }
    }

    /// Whether the member is written to / read from a column.
    pub fn is_column(&self) -> bool {
        !self.ignored && self.navigation.is_none()
    }

    /// Type of the stored value, after conversion.
    pub fn stored_type(&self) -> ValueType {
        self.converter
            .as_ref()
            .and_then(|c| c.stored_type())
            .unwrap_or_else(|| self.value_type.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::converter::EnumOrdinal;
    use crate::mapping::reflect::MemberHints;

    #[test]
    fn column_defaults_to_prefixed_name() {
        let info = MemberInfo::new("name", ValueType::Text);
        assert_eq!(MemberMap::from_info(&info, "").column, "name");
        assert_eq!(MemberMap::from_info(&info, "usr_").column, "usr_name");

        let renamed = MemberInfo::new("name", ValueType::Text).hints(MemberHints {
            column: Some("full_name".into()),
            ..Default::default()
        });
        assert_eq!(MemberMap::from_info(&renamed, "usr_").column, "full_name");
    }

    #[test]
    fn clone_for_recomputes_type_flags() {
        let mut status = MemberMap::from_info(&MemberInfo::new("status", ValueType::Text), "");
        status.column = "order_status".into();
        status.native_type = Some("SMALLINT".into());
        status.converter = Some(Arc::new(EnumOrdinal::new(["new", "done"])));

        let payload = MemberInfo::new("status", ValueType::Text).nullable(true);
        let cloned = status.clone_for(&payload);
        assert_eq!(cloned.column, "order_status");
        assert_eq!(cloned.native_type.as_deref(), Some("SMALLINT"));
        assert!(cloned.converter.is_some());
        assert!(cloned.nullable);
        assert!(!status.nullable);
        assert_eq!(cloned.stored_type(), ValueType::I32);
    }
}
