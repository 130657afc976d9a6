//! Expression compilation: alias resolution, parameter allocation, and the
//! recursive expression → SQL fragment compiler.

mod compile;
mod fragment;
mod params;
mod reader;
mod resolver;

pub use compile::Compiler;
pub(crate) use compile::to_db;
pub use fragment::Fragment;
pub use params::{BoundParam, ParamSet};
pub use reader::{IncludeWiring, ReaderField};
pub use resolver::{AliasResolver, FromItem, JoinKind, SourceKind, TableSegment};

use crate::dialect::Dialect;
use crate::error::OrmResult;
use crate::mapping::Catalog;
use crate::value::Value;
use std::collections::HashMap;

/// Per-build settings shared by every statement compiled in one call.
///
/// ```ignore
/// let ctx = BuildContext::new(Dialect::Postgres)
///     .with_shard_tables("Order", ["orders_2023", "orders_2024"]);
/// ```
#[derive(Debug, Clone)]
pub struct BuildContext<'a> {
    pub dialect: Dialect,
    pub catalog: &'a Catalog,
    pub param_prefix: String,
    shard_tables: HashMap<String, Vec<String>>,
}

impl BuildContext<'static> {
    /// Context over the process-wide catalog.
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            catalog: Catalog::global(),
            param_prefix: "p".to_string(),
            shard_tables: HashMap::new(),
        }
    }
}

impl<'a> BuildContext<'a> {
    /// Resolve entities against another catalog.
    pub fn with_catalog<'b>(self, catalog: &'b Catalog) -> BuildContext<'b> {
        BuildContext {
            dialect: self.dialect,
            catalog,
            param_prefix: self.param_prefix,
            shard_tables: self.shard_tables,
        }
    }

    pub fn param_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.param_prefix = prefix.into();
        self
    }

    /// Physical tables an entity resolves to, in discovery order.
    pub fn with_shard_tables<I, S>(mut self, entity: &str, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_shard_tables(entity, tables.into_iter().map(Into::into).collect());
        self
    }

    pub fn set_shard_tables(&mut self, entity: &str, tables: Vec<String>) {
        self.shard_tables.insert(entity.to_string(), tables);
    }

    /// Resolved shard tables, or `None` when the entity is not fanned out.
    pub fn shard_tables(&self, entity: &str) -> Option<&[String]> {
        self.shard_tables.get(entity).map(Vec::as_slice)
    }
}

/// Final SQL text, its parameters in bind order, and the reader-field tree.
#[derive(Debug, Clone)]
pub struct CompiledStatement {
    pub sql: String,
    pub params: ParamSet,
    pub fields: Vec<ReaderField>,
}

impl CompiledStatement {
    /// Render parameter markers into the dialect's placeholders.
    pub(crate) fn finish(
        sql: &str,
        params: &ParamSet,
        fields: Vec<ReaderField>,
        dialect: Dialect,
    ) -> OrmResult<Self> {
        let (sql, params) = params.render(sql, dialect)?;
        Ok(Self { sql, params, fields })
    }

    pub fn param_values(&self) -> Vec<Value> {
        self.params.values().cloned().collect()
    }

    /// Output column of a projected member, looked up through the reader tree.
    pub fn field(&self, member: &str) -> Option<&ReaderField> {
        ReaderField::leaves(&self.fields)
            .into_iter()
            .find(|f| f.column_alias == member || f.target_member == member)
    }
}
