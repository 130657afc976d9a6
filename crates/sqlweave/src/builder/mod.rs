//! Statement builders.
//!
//! Each builder records clause intents in call order and replays them once at
//! build time against a [`BuildContext`](crate::compiler::BuildContext).
//!
//! ## Safety rails
//!
//! - UPDATE and DELETE require at least one filter.
//! - Bulk calls with no rows are rejected.
//! - Every value is bound as a parameter; identifiers are quoted per dialect.

pub mod delete;
pub mod insert;
pub mod query;
pub mod segment;
pub mod update;

mod statement;

pub use delete::Delete;
pub use insert::{Insert, OnConflictBuilder};
pub use query::Query;
pub use segment::{ConflictTarget, Source};
pub use update::Update;

#[cfg(test)]
mod tests;
