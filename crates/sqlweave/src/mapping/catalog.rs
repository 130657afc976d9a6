use super::entity::EntityMap;
use super::member::MemberMap;
use super::reflect::{MemberInfo, Reflect};
use crate::error::{OrmError, OrmResult};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

/// Registry of entity mappings, keyed by entity name.
///
/// Explicit mappings are registered once at configuration time; types without
/// one are mapped automatically on first use through [`Catalog::map_for`].
#[derive(Debug, Default)]
pub struct Catalog {
    maps: RwLock<HashMap<String, Arc<EntityMap>>>,
}

/// Payload members paired with a target entity's members.
#[derive(Debug, Clone)]
pub struct PayloadMapping {
    pub entity: Arc<EntityMap>,
    /// One entry per paired payload member, in payload order. Each carries the
    /// payload member name and the target mapping cloned onto it.
    pub members: Vec<MemberMap>,
}

impl PayloadMapping {
    /// Paired members that write a column.
    pub fn columns(&self) -> impl Iterator<Item = &MemberMap> {
        self.members.iter().filter(|m| m.is_column())
    }
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide catalog.
    pub fn global() -> &'static Catalog {
        static GLOBAL: OnceLock<Catalog> = OnceLock::new();
        GLOBAL.get_or_init(Catalog::new)
    }

    /// Register an explicit mapping. Fails if the entity is already mapped.
    pub fn register(&self, mut map: EntityMap) -> OrmResult<Arc<EntityMap>> {
        map.finalize()?;
        let mut maps = self.maps.write().unwrap_or_else(|e| e.into_inner());
        if maps.contains_key(map.name()) {
            return Err(OrmError::mapping(format!(
                "entity '{}' is already mapped",
                map.name()
            )));
        }
        let map = Arc::new(map);
        maps.insert(map.name().to_string(), Arc::clone(&map));
        Ok(map)
    }

    pub fn get(&self, name: &str) -> Option<Arc<EntityMap>> {
        self.maps
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Like [`get`](Self::get), failing with a mapping error when absent.
    pub fn entity(&self, name: &str) -> OrmResult<Arc<EntityMap>> {
        self.get(name)
            .ok_or_else(|| OrmError::mapping(format!("entity '{name}' is not mapped")))
    }

    /// The mapping for a reflected type: registered or derived on first use.
    pub fn map_for<T: Reflect>(&self) -> OrmResult<Arc<EntityMap>> {
        if let Some(map) = self.get(T::type_name()) {
            return Ok(map);
        }
        let derived = Arc::new(EntityMap::reflect::<T>()?);
        let mut maps = self.maps.write().unwrap_or_else(|e| e.into_inner());
        Ok(Arc::clone(
            maps.entry(T::type_name().to_string()).or_insert(derived),
        ))
    }

    pub fn len(&self) -> usize {
        self.maps.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pair an anonymous payload's members with a target entity.
    ///
    /// Each payload member pairs with the target member of the same name, or
    /// failing that, the target member whose column has that name.
    pub fn pair_payload<I, S>(entity: &Arc<EntityMap>, members: I) -> OrmResult<PayloadMapping>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut paired = Vec::new();
        for name in members {
            let name = name.as_ref();
            let target = entity
                .try_member(name)
                .or_else(|| entity.member_by_column(name))
                .ok_or_else(|| OrmError::missing_member(entity.name(), name))?;
            let info = MemberInfo::new(name, target.value_type.clone()).nullable(target.nullable);
            let mut member = target.clone_for(&info);
            member.is_enum = target.is_enum;
            paired.push(member);
        }
        Ok(PayloadMapping {
            entity: Arc::clone(entity),
            members: paired,
        })
    }

    /// Pair a reflected payload type's members with a target entity.
    pub fn pair_reflected<T: Reflect>(entity: &Arc<EntityMap>) -> OrmResult<PayloadMapping> {
        let mut paired = Vec::new();
        for info in T::members() {
            if info.hints.ignore || info.hints.navigation.is_some() {
                continue;
            }
            let target = entity
                .try_member(&info.name)
                .or_else(|| entity.member_by_column(&info.name))
                .ok_or_else(|| OrmError::missing_member(entity.name(), &info.name))?;
            paired.push(target.clone_for(&info));
        }
        Ok(PayloadMapping {
            entity: Arc::clone(entity),
            members: paired,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::reflect::MemberHints;
    use crate::value::ValueType;

    struct Article;

    impl Reflect for Article {
        fn type_name() -> &'static str {
            "Article"
        }

        fn members() -> Vec<MemberInfo> {
            vec![
                MemberInfo::new("Id", ValueType::I64),
                MemberInfo::new("Title", ValueType::Text),
                MemberInfo::new("PublishedAt", ValueType::DateTime).nullable(true),
            ]
        }
    }

    struct Patch;

    impl Reflect for Patch {
        fn type_name() -> &'static str {
            "Patch"
        }

        fn members() -> Vec<MemberInfo> {
            vec![
                MemberInfo::new("Id", ValueType::I64),
                MemberInfo::new("Title", ValueType::Text).nullable(true),
                MemberInfo::new("scratch", ValueType::Text).hints(MemberHints {
                    ignore: true,
                    ..Default::default()
                }),
            ]
        }
    }

    #[test]
    fn automatic_mapping_uses_member_names() {
        let catalog = Catalog::new();
        let map = catalog.map_for::<Article>().unwrap();
        assert_eq!(map.table(), "Article");
        assert_eq!(map.prefix(), "");
        assert_eq!(map.members().len(), 3);
        for m in map.members() {
            assert_eq!(m.column, m.name);
        }
        assert!(Arc::ptr_eq(&map, &catalog.map_for::<Article>().unwrap()));
    }

    #[test]
    fn registering_twice_fails() {
        let catalog = Catalog::new();
        let map = EntityMap::builder("Tag")
            .member("id", ValueType::I32)
            .build()
            .unwrap();
        catalog.register(map.clone()).unwrap();
        assert!(matches!(catalog.register(map), Err(OrmError::Mapping(_))));
        assert!(catalog.entity("Nope").is_err());
    }

    #[test]
    fn payload_pairs_by_member_then_column() {
        let map = Arc::new(
            EntityMap::builder("Article")
                .member("id", ValueType::I64)
                .member("title", ValueType::Text)
                .column("title", "headline")
                .key("id")
                .build()
                .unwrap(),
        );
        let paired = Catalog::pair_payload(&map, ["id", "headline"]).unwrap();
        assert_eq!(paired.members[1].name, "headline");
        assert_eq!(paired.members[1].column, "headline");
        assert!(paired.members[0].key);

        let err = Catalog::pair_payload(&map, ["id", "body"]).unwrap_err();
        assert!(matches!(err, OrmError::MissingMember { .. }));
    }

    #[test]
    fn reflected_payload_skips_ignored_members() {
        let catalog = Catalog::new();
        let map = catalog.map_for::<Article>().unwrap();
        let paired = Catalog::pair_reflected::<Patch>(&map).unwrap();
        assert_eq!(paired.members.len(), 2);
        assert!(paired.members[1].nullable);
    }
}
