//! UPDATE builder.
//!
//! Three shapes share one entry point:
//! - a predicate update (`set` / `set_value` / `filter`), one statement per
//!   physical table;
//! - [`Update::update_many`], key-matched rows batched into few statements;
//! - [`Update::bulk_update`], rows bulk-loaded into a staging table and merged
//!   with one set-based UPDATE per physical table.

use super::segment::UpdateSegment;
use super::statement::{
    capture, execute_all, prepared_context, query_all, returning_clause, returning_fields, target_tables,
    uniform_members, where_clause,
};
use crate::bulk::{BatchReport, BatchTemplate, BatchWriter, guarded};
use crate::client::{Transport, trace_statement};
use crate::compiler::{BuildContext, CompiledStatement, Compiler, ParamSet, SourceKind, to_db};
use crate::config::CommandOptions;
use crate::dialect::{Dialect, ReturningStyle};
use crate::error::{OrmError, OrmResult};
use crate::expr::Lambda;
use crate::mapping::{Catalog, EntityMap, MemberMap, Payload};
use crate::shard::partition;
use crate::value::{Record, Value, ValueType};
use std::sync::Arc;
use uuid::Uuid;

/// Update rows of an entity's table.
///
/// ```ignore
/// let mut update = Update::table(orders);
/// update
///     .set(lambda(["o"], param("o").field("status")), lambda(["o"], value("shipped")))
///     .filter(lambda(["o"], param("o").field("id").eq(value(7_i64))));
/// update.execute(&client, &ctx).await?;
/// ```
#[derive(Debug, Clone)]
pub struct Update {
    entity: Arc<EntityMap>,
    segments: Vec<UpdateSegment>,
}

/// Key members and written members of a payload, paired with the entity.
struct Split {
    keys: Vec<MemberMap>,
    sets: Vec<MemberMap>,
}

impl Split {
    fn all(&self) -> impl Iterator<Item = &MemberMap> {
        self.keys.iter().chain(self.sets.iter())
    }
}

impl Update {
    pub fn table(entity: Arc<EntityMap>) -> Self {
        Self {
            entity,
            segments: Vec::new(),
        }
    }

    fn push(&mut self, segment: UpdateSegment) -> &mut Self {
        self.segments.push(segment);
        self
    }

    /// `member = value`; both lambdas take the target row.
    pub fn set(&mut self, member: Lambda, value: Lambda) -> &mut Self {
        self.push(UpdateSegment::Set { member, value })
    }

    pub fn set_value(&mut self, member: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.push(UpdateSegment::SetValue {
            member: member.into(),
            value: value.into(),
        })
    }

    pub fn filter(&mut self, predicate: Lambda) -> &mut Self {
        self.push(UpdateSegment::Filter(predicate))
    }

    pub fn returning(&mut self, projection: Lambda) -> &mut Self {
        self.push(UpdateSegment::Returning(projection))
    }

    /// Compile one statement per physical table.
    ///
    /// Fails before producing any SQL when no filter was given.
    pub fn build(&self, ctx: &BuildContext<'_>) -> OrmResult<Vec<CompiledStatement>> {
        if !self.segments.iter().any(|s| matches!(s, UpdateSegment::Filter(_))) {
            return Err(OrmError::invalid_operation(format!(
                "update of '{}' without a filter",
                self.entity.name()
            )));
        }
        if !self
            .segments
            .iter()
            .any(|s| matches!(s, UpdateSegment::Set { .. } | UpdateSegment::SetValue { .. }))
        {
            return Err(OrmError::invalid_operation("update sets no members"));
        }
        target_tables(ctx, &self.entity)
            .iter()
            .map(|table| self.compile(ctx, table))
            .collect()
    }

    fn compile(&self, ctx: &BuildContext<'_>, table: &str) -> OrmResult<CompiledStatement> {
        let dialect = ctx.dialect;
        let entity = &self.entity;
        let mut c = Compiler::unqualified(ctx);
        c.resolver.add_source(SourceKind::Entity(Arc::clone(entity)), None);

        let mut sets = Vec::new();
        let mut conditions = Vec::new();
        let mut fields = Vec::new();
        for segment in &self.segments {
            match segment {
                UpdateSegment::Set { member, value } => {
                    let target = c.member_selector(member)?;
                    let mut frag = c.value(value)?;
                    if frag.is_constant() && frag.converter.is_none() {
                        frag.converter = target.converter.clone();
                    }
                    let sql = c.operand(frag)?;
                    sets.push(format!("{} = {sql}", dialect.ident(&target.column)));
                }
                UpdateSegment::SetValue { member, value } => {
                    let target = entity.member(member)?;
                    if !target.is_column() {
                        return Err(OrmError::invalid_operation(format!("'{member}' is not a mapped column")));
                    }
                    let marker = c.bind_value(value.clone(), None, target.converter.as_ref())?;
                    sets.push(format!("{} = {marker}", dialect.ident(&target.column)));
                }
                UpdateSegment::Filter(predicate) => conditions.push(c.condition(predicate)?),
                UpdateSegment::Returning(projection) => fields = returning_fields(&mut c, projection)?,
            }
        }

        let returned = match fields.is_empty() {
            true => None,
            false => Some(returning_clause(dialect, entity, &fields)?),
        };
        let mut sql = format!(
            "UPDATE {} SET {}",
            dialect.table(entity.schema(), table),
            sets.join(", ")
        );
        if let (Some(list), ReturningStyle::Output) = (&returned, dialect.returning_style()) {
            sql.push_str(&format!(" OUTPUT {list}"));
        }
        sql.push_str(&where_clause(&conditions).unwrap_or_default());
        if let (Some(list), ReturningStyle::Suffix) = (&returned, dialect.returning_style()) {
            sql.push_str(&format!(" RETURNING {list}"));
        }
        CompiledStatement::finish(&sql, &c.params, fields, dialect)
    }

    /// Resolve shard tables, then run the update against each in turn.
    pub async fn execute<T: Transport>(&self, transport: &T, ctx: &BuildContext<'_>) -> OrmResult<u64> {
        let ctx = prepared_context(transport, ctx, &[self.entity.as_ref()]).await?;
        let statements = self.build(&ctx)?;
        execute_all(transport, &statements).await
    }

    pub async fn fetch_returning<T: Transport>(&self, transport: &T, ctx: &BuildContext<'_>) -> OrmResult<Vec<Record>> {
        let ctx = prepared_context(transport, ctx, &[self.entity.as_ref()]).await?;
        let statements = self.build(&ctx)?;
        query_all(transport, &statements).await
    }

    fn payload_only(&self, operation: &str) -> OrmResult<()> {
        if self.segments.is_empty() {
            Ok(())
        } else {
            Err(OrmError::invalid_operation(format!(
                "{operation} takes its values from the rows; set, filter and returning do not apply"
            )))
        }
    }

    /// Pair the first row's members with the entity and split keys from
    /// written columns. Every key member must be present.
    fn split(&self, first: &Record) -> OrmResult<Split> {
        let paired = Catalog::pair_payload(&self.entity, first.member_names())?;
        let mut keys = Vec::new();
        for key in self.entity.key_members() {
            let member = paired
                .columns()
                .find(|m| m.column == key.column)
                .ok_or_else(|| {
                    OrmError::invalid_operation(format!(
                        "rows for '{}' must carry key member '{}'",
                        self.entity.name(),
                        key.name
                    ))
                })?;
            keys.push(member.clone());
        }
        if keys.is_empty() {
            return Err(OrmError::invalid_operation(format!(
                "entity '{}' has no key to match rows on",
                self.entity.name()
            )));
        }
        let sets: Vec<MemberMap> = paired.columns().filter(|m| !m.key).cloned().collect();
        if sets.is_empty() {
            return Err(OrmError::invalid_operation("rows carry no members to update"));
        }
        Ok(Split { keys, sets })
    }

    /// Update each row by key, batching by `options.batch_size`.
    ///
    /// Postgres receives one `UPDATE .. FROM (VALUES ..)` per flush; other
    /// dialects receive the row statements joined into one command.
    pub async fn update_many<T, P, I>(
        &self,
        transport: &T,
        ctx: &BuildContext<'_>,
        options: &CommandOptions,
        rows: I,
    ) -> OrmResult<BatchReport>
    where
        T: Transport,
        P: Payload,
        I: IntoIterator<Item = P>,
    {
        self.payload_only("update_many")?;
        options.validate()?;
        let rows: Vec<Record> = rows.into_iter().map(|row| capture(&row)).collect();
        let Some(first) = rows.first() else {
            return Err(OrmError::invalid_operation("update_many called with no rows"));
        };
        uniform_members(&self.entity, &rows)?;
        let split = self.split(first)?;
        let dialect = transport.dialect();

        let mut report = BatchReport::default();
        for (table, rows) in partition(&self.entity, rows)? {
            let table_sql = dialect.table(self.entity.schema(), &table);
            let mut template = match dialect {
                Dialect::Postgres => values_join_template(dialect, &table_sql, &split),
                _ => BatchTemplate {
                    separator: "; ".to_string(),
                    per_statement: true,
                    ..Default::default()
                },
            };
            template.params = ParamSet::with_prefix(ctx.param_prefix.clone());
            let mut writer = BatchWriter::new(transport, options, template).after_flushes(report.flush_count());
            for row in &rows {
                match dialect {
                    Dialect::Postgres => writer.push(|params| cast_tuple(params, dialect, &split, row)).await?,
                    _ => {
                        writer
                            .push(|params| keyed_statement(params, dialect, &table_sql, &split, row))
                            .await?
                    }
                }
            }
            report.merge(writer.finish().await?);
        }
        Ok(report)
    }

    /// Merge rows through a staging table.
    ///
    /// The staging table is created, bulk-loaded with every row, used for one
    /// UPDATE per physical table in discovery order, and dropped. Once created
    /// it is dropped on every path, failures included.
    pub async fn bulk_update<T, P, I>(
        &self,
        transport: &T,
        ctx: &BuildContext<'_>,
        options: &CommandOptions,
        rows: I,
    ) -> OrmResult<BatchReport>
    where
        T: Transport,
        P: Payload,
        I: IntoIterator<Item = P>,
    {
        self.payload_only("bulk_update")?;
        options.validate()?;
        let rows: Vec<Record> = rows.into_iter().map(|row| capture(&row)).collect();
        let Some(first) = rows.first() else {
            return Err(OrmError::invalid_operation("bulk_update called with no rows"));
        };
        uniform_members(&self.entity, &rows)?;
        let split = self.split(first)?;
        let ctx = prepared_context(transport, ctx, &[self.entity.as_ref()]).await?;
        let dialect = ctx.dialect;

        let stage = dialect.temp_table_name(&format!("sqlweave_stage_{}", Uuid::new_v4().simple()));
        let columns: Vec<(String, ValueType)> = split.all().map(|m| (m.column.clone(), m.stored_type())).collect();
        let key_columns: Vec<String> = split.keys.iter().map(|m| m.column.clone()).collect();
        let create = dialect.create_temp_table(&stage, &columns, &key_columns)?;
        let no_params = ParamSet::new();
        trace_statement(&create, &no_params);
        transport.execute(&create, &no_params).await?;

        let merged = self.merge(transport, &ctx, options, &stage, &columns, &split, &rows).await;

        let drop = dialect.drop_table(&stage);
        trace_statement(&drop, &no_params);
        let dropped = transport.execute(&drop, &no_params).await;
        let report = merged?;
        dropped?;
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    async fn merge<T: Transport>(
        &self,
        transport: &T,
        ctx: &BuildContext<'_>,
        options: &CommandOptions,
        stage: &str,
        columns: &[(String, ValueType)],
        split: &Split,
        rows: &[Record],
    ) -> OrmResult<BatchReport> {
        let dialect = ctx.dialect;
        let stage_sql = match dialect {
            Dialect::SqlServer => stage.to_string(),
            _ => dialect.ident(stage),
        };
        let mut report = BatchReport::default();
        for chunk in rows.chunks(options.batch_size) {
            let values = chunk
                .iter()
                .map(|row| row_values(split.all(), row))
                .collect::<OrmResult<Vec<_>>>()?;
            tracing::debug!(
                target: "sqlweave.bulk",
                table = %stage_sql,
                rows = chunk.len(),
                "staging rows"
            );
            guarded(
                options,
                report.flush_count(),
                transport.bulk_copy(&stage_sql, columns, values),
            )
            .await?;
            report.flushes.push(chunk.len());
        }

        let no_params = ParamSet::new();
        for table in target_tables(ctx, &self.entity) {
            let table_sql = dialect.table(self.entity.schema(), &table);
            let sql = staged_update(dialect, &table_sql, &stage_sql, split);
            trace_statement(&sql, &no_params);
            report.affected += guarded(options, report.flush_count(), transport.execute(&sql, &no_params)).await?;
        }
        Ok(report)
    }
}

fn row_values<'m>(members: impl Iterator<Item = &'m MemberMap>, row: &Record) -> OrmResult<Vec<Value>> {
    members
        .map(|m| {
            let value = row.get(&m.name).cloned().unwrap_or(Value::Null);
            to_db(value, m.converter.as_ref())
        })
        .collect()
}

/// `UPDATE t AS t SET a = v.a FROM (VALUES ..) AS v(k, a) WHERE t.k = v.k`
fn values_join_template(dialect: Dialect, table_sql: &str, split: &Split) -> BatchTemplate {
    let sets: Vec<String> = split
        .sets
        .iter()
        .map(|m| {
            let col = dialect.ident(&m.column);
            format!("{col} = v.{col}")
        })
        .collect();
    let names: Vec<String> = split.all().map(|m| dialect.ident(&m.column)).collect();
    let matches: Vec<String> = split
        .keys
        .iter()
        .map(|m| {
            let col = dialect.ident(&m.column);
            format!("t.{col} = v.{col}")
        })
        .collect();
    BatchTemplate {
        header: format!("UPDATE {table_sql} AS t SET {} FROM (VALUES ", sets.join(", ")),
        separator: ", ".to_string(),
        footer: format!(") AS v({}) WHERE {}", names.join(", "), matches.join(" AND ")),
        ..Default::default()
    }
}

/// One VALUES tuple with typed markers; untyped parameters in VALUES would
/// be inferred as text.
fn cast_tuple(params: &mut ParamSet, dialect: Dialect, split: &Split, row: &Record) -> OrmResult<String> {
    let values = row_values(split.all(), row)?;
    let items: Vec<String> = split
        .all()
        .zip(values)
        .map(|(m, v)| dialect.cast(&params.bind(v), &m.stored_type()))
        .collect();
    Ok(format!("({})", items.join(", ")))
}

/// `UPDATE t SET a = @p WHERE k = @p` for one row.
fn keyed_statement(
    params: &mut ParamSet,
    dialect: Dialect,
    table_sql: &str,
    split: &Split,
    row: &Record,
) -> OrmResult<String> {
    let assign = |members: &[MemberMap], params: &mut ParamSet| -> OrmResult<Vec<String>> {
        let values = row_values(members.iter(), row)?;
        Ok(members
            .iter()
            .zip(values)
            .map(|(m, v)| format!("{} = {}", dialect.ident(&m.column), params.bind(v)))
            .collect())
    };
    let sets = assign(&split.sets, params)?;
    let keys = assign(&split.keys, params)?;
    Ok(format!(
        "UPDATE {table_sql} SET {} WHERE {}",
        sets.join(", "),
        keys.join(" AND ")
    ))
}

/// Set-based merge of a staging table into one physical table.
fn staged_update(dialect: Dialect, table_sql: &str, stage_sql: &str, split: &Split) -> String {
    let on: Vec<String> = split
        .keys
        .iter()
        .map(|m| {
            let col = dialect.ident(&m.column);
            format!("t.{col} = s.{col}")
        })
        .collect();
    let on = on.join(" AND ");
    let assign = |qualify: bool| -> String {
        split
            .sets
            .iter()
            .map(|m| {
                let col = dialect.ident(&m.column);
                match qualify {
                    true => format!("t.{col} = s.{col}"),
                    false => format!("{col} = s.{col}"),
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    };
    match dialect {
        Dialect::Postgres | Dialect::Sqlite => {
            format!("UPDATE {table_sql} AS t SET {} FROM {stage_sql} AS s WHERE {on}", assign(false))
        }
        Dialect::MySql => {
            format!("UPDATE {table_sql} AS t INNER JOIN {stage_sql} AS s ON {on} SET {}", assign(true))
        }
        Dialect::SqlServer => {
            format!("UPDATE t SET {} FROM {table_sql} AS t INNER JOIN {stage_sql} AS s ON {on}", assign(true))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split() -> Split {
        let map = EntityMap::builder("Order")
            .table("orders")
            .member("id", ValueType::I64)
            .member("total", ValueType::F64)
            .key("id")
            .build()
            .unwrap();
        let member = |name: &str| map.member(name).unwrap().clone();
        Split {
            keys: vec![member("id")],
            sets: vec![member("total")],
        }
    }

    #[test]
    fn staged_merge_per_dialect() {
        let split = split();
        assert_eq!(
            staged_update(Dialect::Postgres, "orders", "stage", &split),
            "UPDATE orders AS t SET total = s.total FROM stage AS s WHERE t.id = s.id"
        );
        assert_eq!(
            staged_update(Dialect::MySql, "orders", "stage", &split),
            "UPDATE orders AS t INNER JOIN stage AS s ON t.id = s.id SET t.total = s.total"
        );
        assert_eq!(
            staged_update(Dialect::SqlServer, "orders", "#stage", &split),
            "UPDATE t SET t.total = s.total FROM orders AS t INNER JOIN #stage AS s ON t.id = s.id"
        );
    }

    #[test]
    fn keyed_statement_binds_sets_then_keys() {
        let split = split();
        let row = Record::new().with("id", 7_i64).with("total", 9.5);
        let mut params = ParamSet::new();
        let sql = keyed_statement(&mut params, Dialect::Sqlite, "orders", &split, &row).unwrap();
        let (sql, params) = params.render(&sql, Dialect::Sqlite).unwrap();
        assert_eq!(sql, "UPDATE orders SET total = @p0 WHERE id = @p1");
        assert_eq!(params.values().cloned().collect::<Vec<_>>(), vec![Value::F64(9.5), Value::I64(7)]);
    }
}
