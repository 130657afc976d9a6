use super::converter::ValueConverter;
use super::member::{MemberMap, Navigation, NavigationKind};
use super::reflect::{MemberInfo, Reflect};
use crate::dialect::Dialect;
use crate::error::{OrmError, OrmResult};
use crate::ident::Ident;
use crate::shard::ShardingStrategy;
use crate::value::ValueType;
use std::collections::HashSet;
use std::sync::Arc;

/// Mapping of one entity to one logical table.
#[derive(Debug, Clone)]
pub struct EntityMap {
    name: String,
    table: String,
    schema: Option<String>,
    prefix: String,
    members: Vec<MemberMap>,
    key_fields: Vec<String>,
    auto_increment: Option<String>,
    sharding: Option<Arc<ShardingStrategy>>,
    finalized: bool,
}

impl EntityMap {
    /// Start an explicit mapping. The table defaults to the entity name.
    pub fn builder(name: impl Into<String>) -> EntityMapBuilder {
        let name = name.into();
        EntityMapBuilder {
            map: EntityMap {
                table: name.clone(),
                name,
                schema: None,
                prefix: String::new(),
                members: Vec::new(),
                key_fields: Vec::new(),
                auto_increment: None,
                sharding: None,
                finalized: false,
            },
            infos: Vec::new(),
            error: None,
        }
    }

    /// Automatic mapping: one member per reflected member, column = member name.
    pub fn reflect<T: Reflect>() -> OrmResult<Self> {
        let mut builder = Self::builder(T::type_name()).members(T::members());
        if let Some(table) = T::table_name() {
            builder = builder.table(table);
        }
        if let Some(schema) = T::schema_name() {
            builder = builder.schema(schema);
        }
        builder.build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Column names of key members, in declaration order.
    pub fn key_fields(&self) -> &[String] {
        &self.key_fields
    }

    /// Column name of the auto-increment member, if any.
    pub fn auto_increment(&self) -> Option<&str> {
        self.auto_increment.as_deref()
    }

    pub fn sharding(&self) -> Option<&Arc<ShardingStrategy>> {
        self.sharding.as_ref()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// All members, including ignored and navigation members.
    pub fn members(&self) -> &[MemberMap] {
        &self.members
    }

    /// Members that read/write a column.
    pub fn columns(&self) -> impl Iterator<Item = &MemberMap> {
        self.members.iter().filter(|m| m.is_column())
    }

    /// Key members, in declaration order.
    pub fn key_members(&self) -> impl Iterator<Item = &MemberMap> {
        self.columns().filter(|m| m.key)
    }

    /// Look up a member by name.
    pub fn member(&self, name: &str) -> OrmResult<&MemberMap> {
        self.try_member(name)
            .ok_or_else(|| OrmError::missing_member(&self.name, name))
    }

    pub fn try_member(&self, name: &str) -> Option<&MemberMap> {
        self.members.iter().find(|m| m.name == name)
    }

    /// Look up a member by its column name.
    pub fn member_by_column(&self, column: &str) -> Option<&MemberMap> {
        self.columns().find(|m| m.column == column)
    }

    /// Physical table name, rendered for a dialect.
    pub fn qualified_table(&self, dialect: Dialect) -> String {
        dialect.table(self.schema.as_deref(), &self.table)
    }

    /// Derive key and auto-increment fields and validate the mapping.
    ///
    /// Idempotent: a second call recomputes the same values.
    pub fn finalize(&mut self) -> OrmResult<()> {
        if self.table.trim().is_empty() {
            return Err(OrmError::mapping(format!(
                "entity '{}' has no table name",
                self.name
            )));
        }

        let names = self
            .schema
            .iter()
            .chain(std::iter::once(&self.table))
            .chain(self.members.iter().filter(|m| m.is_column()).map(|m| &m.column));
        for name in names {
            Ident::name(name)
                .map_err(|e| OrmError::mapping(format!("entity '{}': {e}", self.name)))?;
        }

        let mut seen = HashSet::new();
        for m in self.members.iter().filter(|m| m.is_column()) {
            if !seen.insert(m.column.as_str()) {
                return Err(OrmError::mapping(format!(
                    "entity '{}' maps column '{}' more than once",
                    self.name, m.column
                )));
            }
        }

        for m in &self.members {
            if m.key && !m.is_column() {
                return Err(OrmError::mapping(format!(
                    "key member '{}.{}' is ignored or a navigation",
                    self.name, m.name
                )));
            }
        }

        let auto: Vec<&MemberMap> = self
            .members
            .iter()
            .filter(|m| m.auto_increment && m.is_column())
            .collect();
        if auto.len() > 1 {
            return Err(OrmError::mapping(format!(
                "entity '{}' has {} auto-increment members; at most one is allowed",
                self.name,
                auto.len()
            )));
        }
        let auto_increment = auto.first().map(|m| m.column.clone());

        let owner_fk = format!("{}_id", self.name.to_ascii_lowercase());
        for m in &mut self.members {
            if let Some(nav) = m.navigation.as_mut()
                && nav.foreign_key.is_empty()
            {
                nav.foreign_key = match nav.kind {
                    NavigationKind::ToOne => format!("{}_id", m.name),
                    NavigationKind::ToMany => owner_fk.clone(),
                };
            }
        }
        for m in &self.members {
            if let Some(nav) = &m.navigation
                && nav.kind == NavigationKind::ToOne
                && !self.members.iter().any(|o| o.name == nav.foreign_key && o.is_column())
            {
                return Err(OrmError::mapping(format!(
                    "navigation '{}.{}' uses unmapped foreign key '{}'",
                    self.name, m.name, nav.foreign_key
                )));
            }
        }

        self.key_fields = self
            .members
            .iter()
            .filter(|m| m.key && m.is_column())
            .map(|m| m.column.clone())
            .collect();
        self.auto_increment = auto_increment;
        self.finalized = true;
        Ok(())
    }
}

/// Explicit mapping configuration.
///
/// Member options refer to members by name; referring to an undeclared member
/// surfaces as a mapping error from [`build`](Self::build).
#[derive(Debug)]
pub struct EntityMapBuilder {
    map: EntityMap,
    infos: Vec<MemberInfo>,
    error: Option<OrmError>,
}

impl EntityMapBuilder {
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.map.table = table.into();
        self
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.map.schema = Some(schema.into());
        self
    }

    /// Column-name prefix applied to members without an explicit column.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.map.prefix = prefix.into();
        for (m, info) in self.map.members.iter_mut().zip(&self.infos) {
            if info.hints.column.is_none() {
                m.column = format!("{}{}", self.map.prefix, m.name);
            }
        }
        self
    }

    /// Declare one member.
    pub fn member(mut self, name: impl Into<String>, value_type: ValueType) -> Self {
        let info = MemberInfo::new(name, value_type);
        self.push(info);
        self
    }

    /// Declare reflected members.
    pub fn members(mut self, infos: impl IntoIterator<Item = MemberInfo>) -> Self {
        for info in infos {
            self.push(info);
        }
        self
    }

    fn push(&mut self, info: MemberInfo) {
        let map = MemberMap::from_info(&info, &self.map.prefix);
        self.map.members.push(map);
        self.infos.push(info);
    }

    fn with_member(mut self, name: &str, f: impl FnOnce(&mut MemberMap)) -> Self {
        match self.map.members.iter_mut().find(|m| m.name == name) {
            Some(m) => f(m),
            None => {
                if self.error.is_none() {
                    self.error = Some(OrmError::missing_member(&self.map.name, name));
                }
            }
        }
        self
    }

    pub fn key(self, member: &str) -> Self {
        self.with_member(member, |m| m.key = true)
    }

    pub fn auto_increment(self, member: &str) -> Self {
        self.with_member(member, |m| m.auto_increment = true)
    }

    pub fn ignore(self, member: &str) -> Self {
        self.with_member(member, |m| m.ignored = true)
    }

    pub fn nullable(self, member: &str) -> Self {
        self.with_member(member, |m| m.nullable = true)
    }

    pub fn column(mut self, member: &str, column: impl Into<String>) -> Self {
        let column = column.into();
        if let Some(info) = self.infos.iter_mut().find(|i| i.name == member) {
            info.hints.column = Some(column.clone());
        }
        self.with_member(member, |m| m.column = column)
    }

    pub fn native_type(self, member: &str, native: impl Into<String>) -> Self {
        let native = native.into();
        self.with_member(member, |m| m.native_type = Some(native))
    }

    pub fn converter(self, member: &str, converter: impl ValueConverter + 'static) -> Self {
        let converter: Arc<dyn ValueConverter> = Arc::new(converter);
        self.with_member(member, |m| m.converter = Some(converter))
    }

    /// Declare a to-one relationship whose foreign key lives on this entity.
    pub fn references(mut self, member: &str, target: &str, foreign_key: &str) -> Self {
        if self.map.try_member_mut(member).is_none() {
            self.push(MemberInfo::new(member, ValueType::Object(target.to_string())).nullable(true));
        }
        self.navigation(member, NavigationKind::ToOne, target, foreign_key)
    }

    /// Declare a to-many relationship whose foreign key lives on the target.
    pub fn has_many(mut self, member: &str, target: &str, foreign_key: &str) -> Self {
        if self.map.try_member_mut(member).is_none() {
            let vt = ValueType::Array(Box::new(ValueType::Object(target.to_string())));
            self.push(MemberInfo::new(member, vt));
        }
        self.navigation(member, NavigationKind::ToMany, target, foreign_key)
    }

    fn navigation(self, member: &str, kind: NavigationKind, target: &str, fk: &str) -> Self {
        let nav = Navigation {
            kind,
            target: target.to_string(),
            foreign_key: fk.to_string(),
        };
        self.with_member(member, |m| m.navigation = Some(nav))
    }

    /// Route rows to physical tables.
    pub fn sharding(mut self, strategy: ShardingStrategy) -> Self {
        self.map.sharding = Some(Arc::new(strategy));
        self
    }

    /// Finalize and return the mapping.
    pub fn build(mut self) -> OrmResult<EntityMap> {
        if let Some(err) = self.error {
            return Err(err);
        }
        self.map.finalize()?;
        Ok(self.map)
    }
}

impl EntityMap {
    fn try_member_mut(&mut self, name: &str) -> Option<&mut MemberMap> {
        self.members.iter_mut().find(|m| m.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_map() -> EntityMapBuilder {
        EntityMap::builder("Order")
            .table("orders")
            .member("id", ValueType::I64)
            .member("customer_id", ValueType::I64)
            .member("total", ValueType::F64)
            .member("note", ValueType::Text)
            .key("id")
            .auto_increment("id")
    }

    #[test]
    fn finalize_derives_keys_and_auto_increment() {
        let map = order_map().column("id", "order_id").build().unwrap();
        assert_eq!(map.key_fields(), &["order_id".to_string()]);
        assert_eq!(map.auto_increment(), Some("order_id"));
        assert!(map.is_finalized());
    }

    #[test]
    fn finalize_is_idempotent() {
        let mut map = order_map().build().unwrap();
        let (keys, auto, name) = (
            map.key_fields().to_vec(),
            map.auto_increment().map(str::to_string),
            map.name().to_string(),
        );
        map.finalize().unwrap();
        assert_eq!(map.key_fields(), keys.as_slice());
        assert_eq!(map.auto_increment().map(str::to_string), auto);
        assert_eq!(map.name(), name);
    }

    #[test]
    fn duplicate_columns_are_rejected() {
        let err = order_map().column("note", "total").build().unwrap_err();
        assert!(matches!(err, OrmError::Mapping(_)));
    }

    #[test]
    fn unusable_names_are_rejected() {
        let err = order_map().column("note", "").build().unwrap_err();
        assert!(matches!(err, OrmError::Mapping(_)));
        let err = order_map().schema("sales\0").build().unwrap_err();
        assert!(matches!(err, OrmError::Mapping(_)));

        let map = order_map().column("note", "order note").build().unwrap();
        assert_eq!(map.member("note").unwrap().column, "order note");
    }

    #[test]
    fn two_auto_increment_members_are_rejected() {
        let err = order_map().auto_increment("customer_id").build().unwrap_err();
        assert!(matches!(err, OrmError::Mapping(_)));
    }

    #[test]
    fn ignored_members_leave_column_list() {
        let map = order_map().ignore("note").build().unwrap();
        assert!(map.columns().all(|m| m.name != "note"));
        assert!(map.member("note").unwrap().ignored);
    }

    #[test]
    fn unknown_member_in_configuration_fails() {
        let err = order_map().key("nope").build().unwrap_err();
        assert!(matches!(err, OrmError::MissingMember { .. }));
    }

    #[test]
    fn prefix_applies_to_unrenamed_members() {
        let map = EntityMap::builder("User")
            .member("id", ValueType::I64)
            .member("name", ValueType::Text)
            .column("id", "user_id")
            .prefix("u_")
            .build()
            .unwrap();
        assert_eq!(map.member("id").unwrap().column, "user_id");
        assert_eq!(map.member("name").unwrap().column, "u_name");
        assert_eq!(map.member_by_column("u_name").unwrap().name, "name");
    }

    #[test]
    fn to_one_navigation_needs_its_foreign_key() {
        let ok = order_map()
            .references("customer", "Customer", "customer_id")
            .build()
            .unwrap();
        assert!(ok.columns().all(|m| m.name != "customer"));

        let err = order_map()
            .references("customer", "Customer", "buyer_id")
            .build()
            .unwrap_err();
        assert!(matches!(err, OrmError::Mapping(_)));
    }
}
