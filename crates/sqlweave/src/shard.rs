//! Sharding: physical table discovery and row partitioning.
//!
//! An entity with a [`ShardingStrategy`] is stored across several physical
//! tables named by a pattern such as `orders_{key}`. Reads and predicate
//! mutations fan out over the tables discovered in the database; writes route
//! each row to the table its shard key selects.

use crate::client::Transport;
use crate::compiler::BuildContext;
use crate::error::{OrmError, OrmResult};
use crate::mapping::{EntityMap, Payload};
use crate::value::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

const KEY_TOKEN: &str = "{key}";

type ShardKeyFn = dyn Fn(&dyn Payload) -> Option<String> + Send + Sync;

/// How an entity's rows map onto physical tables.
#[derive(Clone)]
pub struct ShardingStrategy {
    key: Arc<ShardKeyFn>,
    table_pattern: String,
}

impl fmt::Debug for ShardingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardingStrategy")
            .field("table_pattern", &self.table_pattern)
            .finish_non_exhaustive()
    }
}

impl ShardingStrategy {
    /// Strategy with a custom key function. `table_pattern` must contain `{key}`.
    pub fn new<F>(table_pattern: impl Into<String>, key: F) -> Self
    where
        F: Fn(&dyn Payload) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            key: Arc::new(key),
            table_pattern: table_pattern.into(),
        }
    }

    /// Shard on the text form of one member's value.
    pub fn by_member(table_pattern: impl Into<String>, member: impl Into<String>) -> Self {
        let member = member.into();
        Self::new(table_pattern, move |row| {
            row.value(&member).and_then(|v| match v {
                Value::Null => None,
                Value::Text(s) => Some(s),
                other => Some(other.to_string()),
            })
        })
    }

    pub fn table_pattern(&self) -> &str {
        &self.table_pattern
    }

    pub fn shard_key(&self, row: &dyn Payload) -> Option<String> {
        (self.key)(row)
    }

    pub fn table_for_key(&self, key: &str) -> String {
        self.table_pattern.replace(KEY_TOKEN, key)
    }

    fn affixes(&self) -> (&str, &str) {
        self.table_pattern
            .split_once(KEY_TOKEN)
            .unwrap_or((self.table_pattern.as_str(), ""))
    }

    /// LIKE pattern handed to the catalog-introspection query.
    pub fn discovery_pattern(&self) -> String {
        let (prefix, suffix) = self.affixes();
        format!("{prefix}%{suffix}")
    }

    /// Whether a discovered table name fits the pattern.
    pub fn matches(&self, table: &str) -> bool {
        let (prefix, suffix) = self.affixes();
        table.len() > prefix.len() + suffix.len() && table.starts_with(prefix) && table.ends_with(suffix)
    }
}

/// Discovers shard tables, memoized for the lifetime of one call.
pub struct ShardResolver<'t, T: Transport> {
    transport: &'t T,
    memo: HashMap<String, Vec<String>>,
}

impl<'t, T: Transport> ShardResolver<'t, T> {
    pub fn new(transport: &'t T) -> Self {
        Self {
            transport,
            memo: HashMap::new(),
        }
    }

    /// Physical tables of an entity in discovery order.
    ///
    /// Unsharded entities resolve to their logical table. A sharded entity
    /// with no matching table resolves to an empty list.
    pub async fn tables(&mut self, entity: &EntityMap) -> OrmResult<Vec<String>> {
        let Some(strategy) = entity.sharding() else {
            return Ok(vec![entity.table().to_string()]);
        };
        if let Some(hit) = self.memo.get(entity.name()) {
            return Ok(hit.clone());
        }

        let names = self
            .transport
            .table_names(&strategy.discovery_pattern())
            .await?;
        let mut tables: Vec<String> = Vec::with_capacity(names.len());
        for name in names {
            if strategy.matches(&name) && !tables.contains(&name) {
                tables.push(name);
            }
        }
        tracing::debug!(
            target: "sqlweave.shard",
            entity = entity.name(),
            pattern = strategy.table_pattern(),
            tables = tables.len(),
            "discovered shard tables"
        );
        self.memo.insert(entity.name().to_string(), tables.clone());
        Ok(tables)
    }

    /// Record an entity's shard tables in a build context.
    pub async fn prepare(&mut self, ctx: &mut BuildContext<'_>, entity: &EntityMap) -> OrmResult<()> {
        if entity.sharding().is_some() {
            let tables = self.tables(entity).await?;
            ctx.set_shard_tables(entity.name(), tables);
        }
        Ok(())
    }
}

/// Split rows into per-table groups, in order of first appearance.
///
/// Unsharded entities yield a single group for the logical table.
pub fn partition<R: Payload>(entity: &EntityMap, rows: Vec<R>) -> OrmResult<Vec<(String, Vec<R>)>> {
    let Some(strategy) = entity.sharding() else {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        return Ok(vec![(entity.table().to_string(), rows)]);
    };

    let mut groups: Vec<(String, Vec<R>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for row in rows {
        let key = strategy.shard_key(&row).ok_or_else(|| {
            OrmError::invalid_operation(format!(
                "row has no shard key for entity '{}'",
                entity.name()
            ))
        })?;
        let table = strategy.table_for_key(&key);
        match index.get(&table) {
            Some(&i) => groups[i].1.push(row),
            None => {
                index.insert(table.clone(), groups.len());
                groups.push((table, vec![row]));
            }
        }
    }
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Record, ValueType};

    fn orders() -> EntityMap {
        EntityMap::builder("Order")
            .table("orders")
            .member("id", ValueType::I64)
            .member("region", ValueType::Text)
            .key("id")
            .sharding(ShardingStrategy::by_member("orders_{key}", "region"))
            .build()
            .unwrap()
    }

    fn row(id: i64, region: &str) -> Record {
        Record::new().with("id", id).with("region", region)
    }

    #[test]
    fn pattern_substitution_and_matching() {
        let s = ShardingStrategy::by_member("orders_{key}", "region");
        assert_eq!(s.table_for_key("eu"), "orders_eu");
        assert_eq!(s.discovery_pattern(), "orders_%");
        assert!(s.matches("orders_eu"));
        assert!(!s.matches("orders_"));
        assert!(!s.matches("customers_eu"));
    }

    #[test]
    fn partition_groups_by_key_in_first_appearance_order() {
        let rows = vec![row(1, "us"), row(2, "eu"), row(3, "us"), row(4, "ap")];
        let groups = partition(&orders(), rows).unwrap();
        let tables: Vec<_> = groups.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(tables, vec!["orders_us", "orders_eu", "orders_ap"]);
        let ids: Vec<_> = groups[0].1.iter().map(|r| r.get("id").cloned()).collect();
        assert_eq!(ids, vec![Some(Value::I64(1)), Some(Value::I64(3))]);
        assert_eq!(groups.iter().map(|(_, g)| g.len()).sum::<usize>(), 4);
    }

    #[test]
    fn rows_without_a_key_are_rejected() {
        let rows = vec![Record::new().with("id", 1_i64)];
        let err = partition(&orders(), rows).unwrap_err();
        assert!(matches!(err, OrmError::InvalidOperation(_)));
    }

    #[test]
    fn unsharded_partition_is_identity() {
        let plain = EntityMap::builder("Note")
            .table("notes")
            .member("id", ValueType::I64)
            .build()
            .unwrap();
        let groups = partition(&plain, vec![row(1, "x"), row(2, "y")]).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].0, "notes");
        assert_eq!(groups[0].1.len(), 2);
    }
}
