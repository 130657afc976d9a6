//! SELECT builder.
//!
//! Clauses are recorded as deferred segments and replayed in call order. A
//! clause that would change the meaning of clauses already applied (a filter
//! after paging, ordering a union, grouping across shard tables) first wraps
//! everything so far into a derived table and continues against its output.

use super::segment::{QuerySegment, Source};
use super::statement::{prepared_context, query_all, with_alias};
use crate::client::{Transport, trace_statement};
use crate::compiler::{BuildContext, CompiledStatement, Compiler, JoinKind, ReaderField, SourceKind};
use crate::error::{OrmError, OrmResult};
use crate::expr::{Expr, Lambda};
use crate::mapping::EntityMap;
use crate::value::Record;
use std::collections::HashMap;
use std::sync::Arc;

/// Stand-in for the primary table while the statement is fanned out over shards.
const SHARD_TABLE: &str = "\u{2}shard\u{2}";

/// A query over one primary source.
///
/// ```ignore
/// let mut q = Query::from(orders);
/// q.filter(lambda(["o"], param("o").field("total").gt(value(100.0))))
///     .order_by_desc(lambda(["o"], param("o").field("placed")))
///     .take(20);
/// let stmt = q.build(&ctx)?;
/// ```
#[derive(Debug, Clone)]
pub struct Query {
    source: Source,
    ctes: Vec<(String, Query)>,
    segments: Vec<QuerySegment>,
}

impl From<Arc<EntityMap>> for Source {
    fn from(map: Arc<EntityMap>) -> Self {
        Source::Entity(map)
    }
}

impl From<Query> for Source {
    fn from(query: Query) -> Self {
        Source::Query(Box::new(query))
    }
}

impl Query {
    /// Query an entity's table.
    pub fn from(entity: Arc<EntityMap>) -> Self {
        Self::with_source(Source::Entity(entity))
    }

    /// Query the result of another query.
    pub fn from_query(inner: Query) -> Self {
        Self::with_source(Source::Query(Box::new(inner)))
    }

    /// Query a CTE declared with [`with_cte`](Self::with_cte).
    pub fn from_cte(name: impl Into<String>) -> Self {
        Self::with_source(Source::Cte(name.into()))
    }

    fn with_source(source: Source) -> Self {
        Self {
            source,
            ctes: Vec::new(),
            segments: Vec::new(),
        }
    }

    /// Declare a common table expression, visible to this query and its sub-queries.
    pub fn with_cte(&mut self, name: impl Into<String>, query: Query) -> &mut Self {
        self.ctes.push((name.into(), query));
        self
    }

    /// INNER JOIN. The condition lambda takes one parameter per source in scope.
    pub fn join(&mut self, source: impl Into<Source>, on: Lambda) -> &mut Self {
        self.push(QuerySegment::Join {
            kind: JoinKind::Inner,
            source: source.into(),
            on,
        })
    }

    pub fn left_join(&mut self, source: impl Into<Source>, on: Lambda) -> &mut Self {
        self.push(QuerySegment::Join {
            kind: JoinKind::Left,
            source: source.into(),
            on,
        })
    }

    pub fn filter(&mut self, predicate: Lambda) -> &mut Self {
        self.push(QuerySegment::Filter(predicate))
    }

    /// Group by a scalar key or a constructed composite key.
    pub fn group_by(&mut self, key: Lambda) -> &mut Self {
        self.push(QuerySegment::GroupBy(key))
    }

    pub fn having(&mut self, predicate: Lambda) -> &mut Self {
        self.push(QuerySegment::Having(predicate))
    }

    pub fn order_by(&mut self, key: Lambda) -> &mut Self {
        self.push(QuerySegment::OrderBy {
            key,
            descending: false,
        })
    }

    pub fn order_by_desc(&mut self, key: Lambda) -> &mut Self {
        self.push(QuerySegment::OrderBy {
            key,
            descending: true,
        })
    }

    pub fn select(&mut self, projection: Lambda) -> &mut Self {
        self.push(QuerySegment::Select(projection))
    }

    pub fn distinct(&mut self) -> &mut Self {
        self.push(QuerySegment::Distinct)
    }

    pub fn take(&mut self, n: u64) -> &mut Self {
        self.push(QuerySegment::Take(n))
    }

    pub fn skip(&mut self, n: u64) -> &mut Self {
        self.push(QuerySegment::Skip(n))
    }

    /// UNION (duplicates removed).
    pub fn union(&mut self, other: Query) -> &mut Self {
        self.push(QuerySegment::Union {
            other: Box::new(other),
            all: false,
        })
    }

    pub fn union_all(&mut self, other: Query) -> &mut Self {
        self.push(QuerySegment::Union {
            other: Box::new(other),
            all: true,
        })
    }

    /// Load a navigation member alongside each row.
    pub fn include(&mut self, navigation: Lambda) -> &mut Self {
        self.push(QuerySegment::Include(navigation))
    }

    fn push(&mut self, segment: QuerySegment) -> &mut Self {
        self.segments.push(segment);
        self
    }

    /// Compile the statement.
    ///
    /// Returns `None` when a sharded source currently has no physical table.
    pub fn build(&self, ctx: &BuildContext<'_>) -> OrmResult<Option<CompiledStatement>> {
        let mut c = Compiler::new(ctx);
        let mut env = Env::default();
        let Some(Body { sql: body, fields, .. }) = compile_query(self, &mut c, &mut env)? else {
            return Ok(None);
        };
        let sql = if env.ctes.is_empty() {
            body
        } else {
            let ctes: Vec<String> = env
                .ctes
                .iter()
                .map(|(name, sql)| format!("{} AS ({sql})", ctx.dialect.ident(name)))
                .collect();
            format!("WITH {} {body}", ctes.join(", "))
        };
        let stmt = CompiledStatement::finish(&sql, &c.params, fields, ctx.dialect)?;
        trace_statement(&stmt.sql, &stmt.params);
        Ok(Some(stmt))
    }

    /// Resolve shard tables, compile and run the query.
    pub async fn fetch<T: Transport>(&self, transport: &T, ctx: &BuildContext<'_>) -> OrmResult<Vec<Record>> {
        let mut entities = Vec::new();
        self.collect_entities(ctx, &mut entities);
        let refs: Vec<&EntityMap> = entities.iter().map(Arc::as_ref).collect();
        let ctx = prepared_context(transport, ctx, &refs).await?;
        match self.build(&ctx)? {
            Some(stmt) => query_all(transport, std::slice::from_ref(&stmt)).await,
            None => Ok(Vec::new()),
        }
    }

    fn collect_entities(&self, ctx: &BuildContext<'_>, out: &mut Vec<Arc<EntityMap>>) {
        let add = |map: &Arc<EntityMap>, out: &mut Vec<Arc<EntityMap>>| {
            if !out.iter().any(|m| m.name() == map.name()) {
                out.push(Arc::clone(map));
            }
            for member in map.members() {
                if let Some(target) = member.navigation.as_ref().and_then(|n| ctx.catalog.get(&n.target))
                    && !out.iter().any(|m| m.name() == target.name())
                {
                    out.push(target);
                }
            }
        };
        let visit = |source: &Source, out: &mut Vec<Arc<EntityMap>>| match source {
            Source::Entity(map) => add(map, out),
            Source::Query(q) => q.collect_entities(ctx, out),
            Source::Cte(_) => {}
        };
        visit(&self.source, out);
        for (_, cte) in &self.ctes {
            cte.collect_entities(ctx, out);
        }
        for segment in &self.segments {
            match segment {
                QuerySegment::Join { source, .. } => visit(source, out),
                QuerySegment::Union { other, .. } => other.collect_entities(ctx, out),
                _ => {}
            }
        }
    }
}

/// Build-wide state shared by a query and its sub-queries.
#[derive(Default)]
struct Env {
    ctes: Vec<(String, String)>,
    cte_fields: HashMap<String, Vec<ReaderField>>,
}

/// A primary source spread over several shard tables.
struct Fanout {
    map: Arc<EntityMap>,
    tables: Vec<String>,
}

/// The SELECT being assembled at the current nesting level.
#[derive(Default)]
struct Select {
    fields: Vec<ReaderField>,
    conditions: Vec<String>,
    group_by: Vec<String>,
    having: Vec<String>,
    order_by: Vec<String>,
    distinct: bool,
    take: Option<u64>,
    skip: Option<u64>,
    grouped: bool,
    projected: bool,
    fanout: Option<Fanout>,
    unions: Vec<(bool, String)>,
}

impl Select {
    fn paged(&self) -> bool {
        self.take.is_some() || self.skip.is_some()
    }

    fn combined(&self) -> bool {
        !self.unions.is_empty() || self.fanout.is_some()
    }
}

/// A rendered SELECT and the reader fields it produces.
struct Body {
    sql: String,
    fields: Vec<ReaderField>,
    /// Set operators, ORDER BY or paging at the top level; a set operand must be wrapped.
    open: bool,
}

fn compile_query(query: &Query, c: &mut Compiler<'_>, env: &mut Env) -> OrmResult<Option<Body>> {
    for (name, cte) in &query.ctes {
        let Some(Body { sql, fields, .. }) = nested(cte, c, env)? else {
            return Ok(None);
        };
        env.ctes.push((name.clone(), sql));
        env.cte_fields.insert(name.clone(), fields);
    }

    let mut select = Select::default();
    let Some(primary) = add_primary(&query.source, c, env, &mut select)? else {
        return Ok(None);
    };
    select.fields = match &c.resolver.segment(primary).kind {
        SourceKind::Entity(map) => c.entity_fields(primary, map),
        SourceKind::Derived { fields } => fields.clone(),
        _ => Vec::new(),
    };
    ReaderField::number(&mut select.fields);

    for segment in &query.segments {
        if !apply(segment, c, env, &mut select)? {
            return Ok(None);
        }
    }
    let sql = render(c, &select)?;
    let open = select.combined() || select.paged() || !select.order_by.is_empty();
    Ok(Some(Body {
        sql,
        fields: select.fields,
        open,
    }))
}

/// Compile a sub-query with its own alias scope, sharing parameters.
fn nested(query: &Query, c: &mut Compiler<'_>, env: &mut Env) -> OrmResult<Option<Body>> {
    let inner = c.resolver.nested();
    let outer = std::mem::replace(&mut c.resolver, inner);
    let result = compile_query(query, c, env);
    let inner = std::mem::replace(&mut c.resolver, outer);
    c.resolver.absorb_aliases(&inner);
    result
}

/// Add a derived source and rebase its fields onto the generated alias.
fn add_derived(c: &mut Compiler<'_>, source: String, fields: &[ReaderField], join: Option<JoinKind>) -> usize {
    let placeholder = SourceKind::Derived { fields: Vec::new() };
    let idx = match join {
        None => c.resolver.add_source(placeholder, Some(source)),
        Some(kind) => c.resolver.add_join(placeholder, source, kind),
    };
    let alias = c.resolver.segment(idx).alias.clone().unwrap_or_default();
    let rebased = ReaderField::rebase(fields, &alias, c.dialect());
    c.resolver.set_kind(idx, SourceKind::Derived { fields: rebased });
    idx
}

fn cte_fields<'e>(env: &'e Env, name: &str) -> OrmResult<&'e [ReaderField]> {
    env.cte_fields
        .get(name)
        .map(Vec::as_slice)
        .ok_or_else(|| OrmError::invalid_operation(format!("CTE '{name}' is not declared")))
}

fn add_primary(source: &Source, c: &mut Compiler<'_>, env: &mut Env, select: &mut Select) -> OrmResult<Option<usize>> {
    let idx = match source {
        Source::Entity(map) => {
            let kind = SourceKind::Entity(Arc::clone(map));
            match c.ctx.shard_tables(map.name()) {
                Some([]) => return Ok(None),
                Some([one]) => {
                    let table = c.table_sql(map, Some(one));
                    c.resolver.add_source(kind, Some(table))
                }
                Some(tables) => {
                    select.fanout = Some(Fanout {
                        map: Arc::clone(map),
                        tables: tables.to_vec(),
                    });
                    c.resolver.add_source(kind, Some(SHARD_TABLE.to_string()))
                }
                None => {
                    let table = c.table_sql(map, None);
                    c.resolver.add_source(kind, Some(table))
                }
            }
        }
        Source::Query(q) => {
            let Some(Body { sql, fields, .. }) = nested(q, c, env)? else {
                return Ok(None);
            };
            add_derived(c, format!("({sql})"), &fields, None)
        }
        Source::Cte(name) => {
            let fields = cte_fields(env, name)?.to_vec();
            let source = c.dialect().ident(name);
            add_derived(c, source, &fields, None)
        }
    };
    Ok(Some(idx))
}

fn add_joined(source: &Source, kind: JoinKind, c: &mut Compiler<'_>, env: &mut Env) -> OrmResult<Option<usize>> {
    let idx = match source {
        Source::Entity(map) => {
            let table = c.join_table(map)?;
            c.resolver.add_join(SourceKind::Entity(Arc::clone(map)), table, kind)
        }
        Source::Query(q) => {
            let Some(Body { sql, fields, .. }) = nested(q, c, env)? else {
                return Ok(None);
            };
            add_derived(c, format!("({sql})"), &fields, Some(kind))
        }
        Source::Cte(name) => {
            let fields = cte_fields(env, name)?.to_vec();
            let source = c.dialect().ident(name);
            add_derived(c, source, &fields, Some(kind))
        }
    };
    Ok(Some(idx))
}

/// Close the current SELECT into a derived table and continue against its output.
fn wrap(c: &mut Compiler<'_>, select: &mut Select) -> OrmResult<()> {
    let sql = render(c, select)?;
    let fields = std::mem::take(&mut select.fields);
    let next = c.resolver.nested();
    c.resolver = next;
    let idx = add_derived(c, format!("({sql})"), &fields, None);
    *select = Select::default();
    if let SourceKind::Derived { fields } = &c.resolver.segment(idx).kind {
        select.fields = fields.clone();
    }
    Ok(())
}

/// Replay one segment. Returns `false` when the statement has no rows to read.
fn apply(segment: &QuerySegment, c: &mut Compiler<'_>, env: &mut Env, select: &mut Select) -> OrmResult<bool> {
    match segment {
        QuerySegment::Join { kind, source, on } => {
            if select.grouped || select.distinct || select.paged() || !select.unions.is_empty() {
                wrap(c, select)?;
            }
            let Some(idx) = add_joined(source, *kind, c, env)? else {
                return Ok(false);
            };
            let cond = c.condition(on)?;
            c.resolver.set_join_condition(idx, cond);
        }
        QuerySegment::Filter(predicate) => {
            if select.grouped || select.distinct || select.paged() || !select.unions.is_empty() {
                wrap(c, select)?;
            }
            let cond = c.condition(predicate)?;
            select.conditions.push(cond);
        }
        QuerySegment::GroupBy(key) => {
            if select.grouped || select.distinct || select.paged() || select.combined() {
                wrap(c, select)?;
            }
            let elements = c.resolver.scope().to_vec();
            let fields = c.projection(key)?;
            let scalar_key =
                !matches!(key.body, Expr::New { .. }) && fields.len() == 1 && !fields[0].is_object();
            select.group_by = ReaderField::leaves(&fields)
                .into_iter()
                .map(|f| f.sql.clone())
                .collect();
            c.resolver.reseed(SourceKind::Grouping {
                key: fields.clone(),
                scalar_key,
                elements,
            });
            select.grouped = true;
            if !select.projected {
                select.fields = fields;
            }
        }
        QuerySegment::Having(predicate) => {
            if !select.grouped {
                return Err(OrmError::invalid_operation("having requires a preceding group_by"));
            }
            let cond = c.condition(predicate)?;
            select.having.push(cond);
        }
        QuerySegment::OrderBy { key, descending } => {
            if select.paged() || select.combined() {
                wrap(c, select)?;
            }
            let frag = c.value(key)?;
            let sql = c.operand(frag)?;
            select
                .order_by
                .push(if *descending { format!("{sql} DESC") } else { sql });
        }
        QuerySegment::Select(projection) => {
            if select.distinct || select.paged() || !select.unions.is_empty() {
                wrap(c, select)?;
            }
            let fields = c.projection(projection)?;
            c.resolver.reseed(SourceKind::Projection {
                fields: fields.clone(),
            });
            select.fields = fields;
            select.projected = true;
        }
        QuerySegment::Distinct => {
            if select.paged() || select.combined() {
                wrap(c, select)?;
            }
            select.distinct = true;
        }
        QuerySegment::Take(n) => {
            if select.combined() {
                wrap(c, select)?;
            }
            select.take = Some(select.take.map_or(*n, |t| t.min(*n)));
        }
        QuerySegment::Skip(n) => {
            if select.combined() || select.take.is_some() {
                wrap(c, select)?;
            }
            select.skip = Some(select.skip.unwrap_or(0) + n);
        }
        QuerySegment::Union { other, all } => {
            if select.paged() || !select.order_by.is_empty() {
                wrap(c, select)?;
            }
            if let Some(body) = nested(other, c, env)? {
                let sql = if body.open {
                    format!("SELECT * FROM ({}) u{}", body.sql, select.unions.len())
                } else {
                    body.sql
                };
                select.unions.push((*all, sql));
            }
        }
        QuerySegment::Include(navigation) => {
            if select.projected || select.grouped {
                return Err(OrmError::invalid_operation(
                    "include must precede select and group_by",
                ));
            }
            let field = c.include(navigation)?;
            select.fields.push(field);
            ReaderField::number(&mut select.fields);
        }
    }
    Ok(true)
}

fn from_clause(c: &Compiler<'_>) -> String {
    let mut sql = String::new();
    for (segment, item) in c.resolver.from_items() {
        let aliased = match &segment.alias {
            Some(alias) => format!("{} {alias}", item.source),
            None => item.source.clone(),
        };
        match &item.join {
            None if sql.is_empty() => sql.push_str(&aliased),
            None => {
                sql.push_str(", ");
                sql.push_str(&aliased);
            }
            Some((kind, on)) => {
                sql.push_str(&format!(" {} {aliased} ON {on}", kind.sql()));
            }
        }
    }
    sql
}

fn render(c: &Compiler<'_>, select: &Select) -> OrmResult<String> {
    let dialect = c.dialect();
    let leaves = ReaderField::leaves(&select.fields);
    if leaves.is_empty() {
        return Err(OrmError::invalid_operation("the projection selects no columns"));
    }
    let list: Vec<String> = leaves
        .iter()
        .map(|f| with_alias(dialect, f.sql.clone(), &f.column_alias))
        .collect();

    let mut sql = format!(
        "SELECT {}{} FROM {}",
        if select.distinct { "DISTINCT " } else { "" },
        list.join(", "),
        from_clause(c)
    );
    if !select.conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&select.conditions.join(" AND "));
    }
    if !select.group_by.is_empty() {
        sql.push_str(" GROUP BY ");
        sql.push_str(&select.group_by.join(", "));
    }
    if !select.having.is_empty() {
        sql.push_str(" HAVING ");
        sql.push_str(&select.having.join(" AND "));
    }

    if let Some(fanout) = &select.fanout {
        let branches: Vec<String> = fanout
            .tables
            .iter()
            .map(|t| sql.replace(SHARD_TABLE, &c.table_sql(&fanout.map, Some(t))))
            .collect();
        sql = branches.join(" UNION ALL ");
    }
    for (all, other) in &select.unions {
        sql.push_str(if *all { " UNION ALL " } else { " UNION " });
        sql.push_str(other);
    }

    if !select.order_by.is_empty() {
        sql.push_str(" ORDER BY ");
        sql.push_str(&select.order_by.join(", "));
    }
    if let Some(paging) = dialect.paging(select.take, select.skip) {
        if select.order_by.is_empty() && dialect.paging_requires_order() {
            sql.push_str(" ORDER BY (SELECT NULL)");
        }
        sql.push(' ');
        sql.push_str(&paging);
    }
    Ok(sql)
}
