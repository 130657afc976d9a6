//! Binding of lambda parameters to table sources.

use super::reader::ReaderField;
use crate::error::{OrmError, OrmResult};
use crate::expr::Lambda;
use crate::mapping::EntityMap;
use std::collections::HashMap;
use std::sync::Arc;

/// What a table segment reads from.
#[derive(Debug, Clone)]
pub enum SourceKind {
    Entity(Arc<EntityMap>),
    /// A sub-query, CTE or union result; fields reference `alias.column`.
    Derived { fields: Vec<ReaderField> },
    /// The current statement's own projection; fields carry inline SQL.
    Projection { fields: Vec<ReaderField> },
    /// A grouping: `key` plus the sources being aggregated.
    Grouping {
        key: Vec<ReaderField>,
        scalar_key: bool,
        elements: Vec<usize>,
    },
    /// The row proposed for insertion inside an upsert.
    Excluded {
        entity: Arc<EntityMap>,
        columns: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

impl JoinKind {
    pub fn sql(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
        }
    }
}

/// A FROM-clause item.
#[derive(Debug, Clone)]
pub struct FromItem {
    /// Rendered source, without alias.
    pub source: String,
    /// Join kind and rendered ON condition; `None` for the first source.
    pub join: Option<(JoinKind, String)>,
}

/// One FROM/JOIN source or pseudo-source.
#[derive(Debug, Clone)]
pub struct TableSegment {
    pub kind: SourceKind,
    pub alias: Option<String>,
    pub from: Option<FromItem>,
    /// `segment.member` key of an automatic navigation join.
    pub nav_path: Option<String>,
}

/// Live parameter-name → segment map.
#[derive(Debug, Default)]
pub struct AliasResolver {
    segments: Vec<TableSegment>,
    scope: Vec<usize>,
    frames: Vec<HashMap<String, usize>>,
    next_alias: usize,
    qualify: bool,
}

impl AliasResolver {
    /// Resolver whose columns are qualified by generated aliases (`t0`, `t1`, ...).
    pub fn qualified() -> Self {
        Self {
            qualify: true,
            ..Default::default()
        }
    }

    /// Resolver whose entity columns render bare (single-table mutations).
    pub fn unqualified() -> Self {
        Self::default()
    }

    /// Continue alias numbering from another resolver, so sub-queries never
    /// reuse an outer alias.
    pub fn nested(&self) -> Self {
        Self {
            qualify: true,
            next_alias: self.next_alias,
            ..Default::default()
        }
    }

    pub(crate) fn absorb_aliases(&mut self, inner: &AliasResolver) {
        self.next_alias = self.next_alias.max(inner.next_alias);
    }

    fn alias(&mut self, prefix: char) -> Option<String> {
        if !self.qualify {
            return None;
        }
        let alias = format!("{prefix}{}", self.next_alias);
        self.next_alias += 1;
        Some(alias)
    }

    fn push(&mut self, kind: SourceKind, alias: Option<String>, from: Option<FromItem>) -> usize {
        self.segments.push(TableSegment {
            kind,
            alias,
            from,
            nav_path: None,
        });
        self.segments.len() - 1
    }

    /// Add the first source of a new scope.
    pub fn add_source(&mut self, kind: SourceKind, source: Option<String>) -> usize {
        let prefix = if matches!(kind, SourceKind::Entity(_)) { 't' } else { 'q' };
        let alias = self.alias(prefix);
        let from = source.map(|source| FromItem { source, join: None });
        let idx = self.push(kind, alias, from);
        self.scope = vec![idx];
        idx
    }

    /// Add a source that needs no FROM item and is qualified by a fixed name
    /// (the target table of an upsert).
    pub fn add_named_source(&mut self, kind: SourceKind, name: String) -> usize {
        let idx = self.push(kind, Some(name), None);
        self.scope = vec![idx];
        idx
    }

    /// Replace a segment's kind once its alias is known (derived sources).
    pub fn set_kind(&mut self, idx: usize, kind: SourceKind) {
        if let Some(segment) = self.segments.get_mut(idx) {
            segment.kind = kind;
        }
    }

    /// Add a joined source; it joins the current scope. The ON condition is
    /// filled in by [`set_join_condition`](Self::set_join_condition).
    pub fn add_join(&mut self, kind: SourceKind, source: String, join: JoinKind) -> usize {
        let prefix = if matches!(kind, SourceKind::Entity(_)) { 't' } else { 'q' };
        let alias = self.alias(prefix);
        let idx = self.push(
            kind,
            alias,
            Some(FromItem {
                source,
                join: Some((join, String::new())),
            }),
        );
        self.scope.push(idx);
        idx
    }

    pub fn set_join_condition(&mut self, idx: usize, on: String) {
        if let Some(FromItem {
            join: Some((_, cond)),
            ..
        }) = self.segments.get_mut(idx).and_then(|s| s.from.as_mut())
        {
            *cond = on;
        }
    }

    /// Add an automatic LEFT JOIN for a navigation path. Not added to scope.
    pub fn add_nav_join(&mut self, kind: SourceKind, source: String, on: String, nav_path: String) -> usize {
        let alias = self.alias('t');
        let idx = self.push(
            kind,
            alias,
            Some(FromItem {
                source,
                join: Some((JoinKind::Left, on)),
            }),
        );
        self.segments[idx].nav_path = Some(nav_path);
        idx
    }

    pub fn find_nav(&self, nav_path: &str) -> Option<usize> {
        self.segments
            .iter()
            .position(|s| s.nav_path.as_deref() == Some(nav_path))
    }

    /// Add a pseudo-source (projection, grouping, excluded row) and make it
    /// the whole scope.
    pub fn reseed(&mut self, kind: SourceKind) -> usize {
        let idx = self.push(kind, None, None);
        self.scope = vec![idx];
        idx
    }

    /// Add a pseudo-source without changing scope.
    pub fn add_pseudo(&mut self, kind: SourceKind) -> usize {
        self.push(kind, None, None)
    }

    pub fn scope(&self) -> &[usize] {
        &self.scope
    }

    pub fn set_scope(&mut self, scope: Vec<usize>) {
        self.scope = scope;
    }

    pub fn segment(&self, idx: usize) -> &TableSegment {
        &self.segments[idx]
    }

    pub fn segments(&self) -> &[TableSegment] {
        &self.segments
    }

    /// FROM items in order.
    pub fn from_items(&self) -> impl Iterator<Item = (&TableSegment, &FromItem)> {
        self.segments
            .iter()
            .filter_map(|s| s.from.as_ref().map(|f| (s, f)))
    }

    /// Bind a lambda's parameters positionally to the current scope.
    pub fn bind(&mut self, lambda: &Lambda) -> OrmResult<()> {
        let scope = self.scope.clone();
        self.bind_to(&lambda.params, &scope)
    }

    /// Bind parameters positionally to explicit segments.
    pub fn bind_to(&mut self, params: &[String], segments: &[usize]) -> OrmResult<()> {
        if params.len() > segments.len() {
            return Err(OrmError::invalid_operation(format!(
                "lambda declares {} parameter(s) but only {} source(s) are in scope",
                params.len(),
                segments.len()
            )));
        }
        let frame = params
            .iter()
            .cloned()
            .zip(segments.iter().copied())
            .collect();
        self.frames.push(frame);
        Ok(())
    }

    pub fn unbind(&mut self) {
        self.frames.pop();
    }

    /// Segment bound to a parameter name, innermost binding first.
    pub fn lookup(&self, name: &str) -> OrmResult<usize> {
        self.frames
            .iter()
            .rev()
            .find_map(|f| f.get(name).copied())
            .ok_or_else(|| {
                OrmError::invalid_operation(format!("parameter '{name}' is not bound to any source"))
            })
    }
}
