//! # sqlweave
//!
//! An entity-mapped, dialect-aware SQL compiler with sharding and bulk execution.
//!
//! ## Features
//!
//! - **Expression trees in, SQL out**: filters, projections and assignments are
//!   explicit [`Expr`] trees compiled to parameterized SQL
//! - **Four dialects**: Postgres, MySQL, SQLite and SQL Server, each with its own
//!   quoting, placeholders, paging and upsert/returning forms
//! - **Automatic mapping**: `#[derive(Entity)]` describes members; the
//!   [`Catalog`] turns them into table/column maps
//! - **Sharding**: rows are routed to physical tables by a shard key; reads
//!   fan out over every discovered table
//! - **Bulk execution**: batched multi-row statements, native copy and staged
//!   bulk updates with per-flush timeout and cancellation
//! - **Safe defaults**: UPDATE and DELETE require a filter
//!
//! ## Example
//!
//! ```ignore
//! use sqlweave::prelude::*;
//!
//! let catalog = Catalog::new();
//! let orders = catalog.register(EntityMap::reflect::<Order>()?)?;
//! let ctx = BuildContext::new(Dialect::Postgres).with_catalog(&catalog);
//!
//! let mut q = Query::from(orders);
//! q.filter(lambda(["o"], param("o").field("total").gt(value(100.0))))
//!     .order_by_desc(lambda(["o"], param("o").field("placed")))
//!     .take(10);
//! let rows = q.fetch(&client, &ctx).await?;
//! ```

pub mod builder;
pub mod bulk;
pub mod client;
pub mod compiler;
pub mod config;
pub mod dialect;
pub mod error;
pub mod expr;
pub mod ident;
pub mod mapping;
pub mod shard;
pub mod value;

pub use builder::{ConflictTarget, Delete, Insert, OnConflictBuilder, Query, Source, Update};
pub use bulk::BatchReport;
pub use client::Transport;
pub use compiler::{BuildContext, CompiledStatement, IncludeWiring, ParamSet, ReaderField};
pub use config::{CommandOptions, DEFAULT_BATCH_SIZE};
pub use dialect::{Dialect, ReturningStyle, UpsertStyle};
pub use error::{OrmError, OrmResult};
pub use expr::{Expr, Lambda, host, lambda, new_object, param, value, var, when};
pub use ident::{Ident, IdentPart};
pub use mapping::{
    Catalog, EntityMap, EntityMapBuilder, EnumOrdinal, JsonText, MemberHints, MemberInfo, MemberMap,
    Navigation, NavigationKind, Payload, Reflect, ValueConverter,
};
pub use shard::{ShardResolver, ShardingStrategy};
pub use value::{Record, SqlType, Value, ValueType};

#[cfg(feature = "derive")]
pub use sqlweave_derive::Entity;

/// Everything needed to declare entities and build statements.
pub mod prelude {
    pub use crate::builder::{ConflictTarget, Delete, Insert, Query, Update};
    pub use crate::compiler::BuildContext;
    pub use crate::config::CommandOptions;
    pub use crate::dialect::Dialect;
    pub use crate::error::{OrmError, OrmResult};
    pub use crate::expr::{lambda, new_object, param, value, var, when};
    pub use crate::mapping::{Catalog, EntityMap, Payload, Reflect};
    pub use crate::shard::ShardingStrategy;
    pub use crate::value::{Record, Value, ValueType};

    #[cfg(feature = "derive")]
    pub use sqlweave_derive::Entity;
}
