//! Deferred segments: clause-building intents recorded in call order and
//! replayed once when a statement is built.

use super::query::Query;
use crate::compiler::JoinKind;
use crate::expr::Lambda;
use crate::mapping::EntityMap;
use crate::value::{Record, Value};
use std::sync::Arc;

/// A FROM or JOIN source.
#[derive(Debug, Clone)]
pub enum Source {
    Entity(Arc<EntityMap>),
    /// A nested query, emitted as a derived table.
    Query(Box<Query>),
    /// A CTE declared on the enclosing query, by name.
    Cte(String),
}

#[derive(Debug, Clone)]
pub(crate) enum QuerySegment {
    Join {
        kind: JoinKind,
        source: Source,
        on: Lambda,
    },
    Filter(Lambda),
    GroupBy(Lambda),
    Having(Lambda),
    OrderBy { key: Lambda, descending: bool },
    Select(Lambda),
    Distinct,
    Take(u64),
    Skip(u64),
    Union { other: Box<Query>, all: bool },
    Include(Lambda),
}

/// What an upsert resolves conflicts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictTarget {
    /// Key members; empty means the entity's own key.
    Keys(Vec<String>),
    /// A named unique constraint.
    Constraint(String),
}

#[derive(Debug, Clone)]
pub(crate) enum InsertSegment {
    Values(Record),
    ValuesMany(Vec<Record>),
    BulkCopy,
    Returning(Lambda),
    ReturningAll,
    OnConflict(ConflictTarget),
    DoNothing,
    /// `(row, excluded) => new { member = value, .. }`
    DoUpdate(Lambda),
    DoUpdateColumns(Vec<String>),
}

#[derive(Debug, Clone)]
pub(crate) enum UpdateSegment {
    Set { member: Lambda, value: Lambda },
    SetValue { member: String, value: Value },
    Filter(Lambda),
    Returning(Lambda),
}
