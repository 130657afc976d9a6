//! INSERT builder: single and multi-row inserts, upserts, returning lists and
//! bulk copy.

use super::segment::{ConflictTarget, InsertSegment};
use super::statement::{all_fields, capture, returning_clause, returning_fields, uniform_members};
use crate::bulk::{BatchReport, BatchTemplate, BatchWriter, guarded};
use crate::client::Transport;
use crate::compiler::{BuildContext, CompiledStatement, Compiler, ParamSet, ReaderField, SourceKind, to_db};
use crate::config::CommandOptions;
use crate::dialect::{Dialect, ReturningStyle, UpsertStyle};
use crate::error::{OrmError, OrmResult};
use crate::expr::{Expr, Lambda};
use crate::mapping::{Catalog, EntityMap, MemberMap, Payload};
use crate::shard::partition;
use crate::value::{Record, Value};
use std::sync::Arc;

/// Insert rows into an entity's table.
///
/// ```ignore
/// let mut insert = Insert::into(orders);
/// insert
///     .values(&order)
///     .on_conflict(ConflictTarget::Keys(vec![]))
///     .do_update_columns(["total", "status"]);
/// insert.execute(&client, &ctx, &CommandOptions::default()).await?;
/// ```
#[derive(Debug, Clone)]
pub struct Insert {
    entity: Arc<EntityMap>,
    segments: Vec<InsertSegment>,
}

/// Chooses what an upsert does on conflict.
#[must_use = "an upsert needs an action: do_nothing, do_update or do_update_columns"]
pub struct OnConflictBuilder<'a> {
    insert: &'a mut Insert,
}

impl<'a> OnConflictBuilder<'a> {
    pub fn do_nothing(self) -> &'a mut Insert {
        self.insert.push(InsertSegment::DoNothing)
    }

    /// Update with a `(row, excluded) => new { member = value, .. }` lambda.
    /// `row` is the existing row, `excluded` the row proposed for insertion.
    pub fn do_update(self, assignments: Lambda) -> &'a mut Insert {
        self.insert.push(InsertSegment::DoUpdate(assignments))
    }

    /// Overwrite the listed members with their proposed values.
    pub fn do_update_columns<I, S>(self, members: I) -> &'a mut Insert
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let members = members.into_iter().map(Into::into).collect();
        self.insert.push(InsertSegment::DoUpdateColumns(members))
    }
}

#[derive(Debug, Clone)]
enum ConflictAction {
    Nothing,
    Update(Lambda),
    Columns(Vec<String>),
}

#[derive(Debug, Clone)]
struct Conflict {
    target: ConflictTarget,
    action: Option<ConflictAction>,
}

#[derive(Debug, Clone)]
enum Returning {
    Fields(Lambda),
    All,
}

/// Replayed segments, validated against one dialect.
#[derive(Debug, Default)]
struct Plan {
    rows: Vec<Record>,
    bulk: bool,
    returning: Option<Returning>,
    conflict: Option<Conflict>,
}

/// Everything except the row tuples, rendered for one physical table.
struct Template {
    header: String,
    footer: String,
    params: ParamSet,
    fields: Vec<ReaderField>,
}

impl Insert {
    pub fn into(entity: Arc<EntityMap>) -> Self {
        Self {
            entity,
            segments: Vec::new(),
        }
    }

    fn push(&mut self, segment: InsertSegment) -> &mut Self {
        self.segments.push(segment);
        self
    }

    /// Add one row. Payload members pair with entity members by name or column.
    pub fn values<P: Payload>(&mut self, row: &P) -> &mut Self {
        self.push(InsertSegment::Values(capture(row)))
    }

    pub fn values_many<P, I>(&mut self, rows: I) -> &mut Self
    where
        P: Payload,
        I: IntoIterator<Item = P>,
    {
        let rows = rows.into_iter().map(|row| capture(&row)).collect();
        self.push(InsertSegment::ValuesMany(rows))
    }

    /// Load the rows through the transport's native bulk path instead of
    /// INSERT statements.
    pub fn bulk_copy(&mut self) -> &mut Self {
        self.push(InsertSegment::BulkCopy)
    }

    /// Return values computed from each inserted row.
    pub fn returning(&mut self, projection: Lambda) -> &mut Self {
        self.push(InsertSegment::Returning(projection))
    }

    pub fn returning_all(&mut self) -> &mut Self {
        self.push(InsertSegment::ReturningAll)
    }

    /// Start an upsert. Must follow the values it applies to.
    pub fn on_conflict(&mut self, target: ConflictTarget) -> OnConflictBuilder<'_> {
        self.push(InsertSegment::OnConflict(target));
        OnConflictBuilder { insert: self }
    }

    fn plan(&self, dialect: Dialect) -> OrmResult<Plan> {
        let mut plan = Plan::default();
        for segment in &self.segments {
            match segment {
                InsertSegment::Values(row) => plan.rows.push(row.clone()),
                InsertSegment::ValuesMany(rows) => plan.rows.extend(rows.iter().cloned()),
                InsertSegment::BulkCopy => {
                    if plan.conflict.is_some() {
                        return Err(OrmError::invalid_operation(
                            "bulk copy cannot be combined with on_conflict",
                        ));
                    }
                    plan.bulk = true;
                }
                InsertSegment::Returning(lambda) => {
                    plan.returning = Some(Returning::Fields(lambda.clone()));
                }
                InsertSegment::ReturningAll => plan.returning = Some(Returning::All),
                InsertSegment::OnConflict(target) => {
                    if plan.rows.is_empty() {
                        return Err(OrmError::invalid_operation(
                            "on_conflict must follow the values it applies to",
                        ));
                    }
                    if plan.bulk {
                        return Err(OrmError::invalid_operation(
                            "bulk copy cannot be combined with on_conflict",
                        ));
                    }
                    if dialect.upsert_style() == UpsertStyle::Unsupported {
                        return Err(OrmError::invalid_operation(format!(
                            "{dialect} has no insert-or-update statement"
                        )));
                    }
                    if matches!(target, ConflictTarget::Constraint(_)) && dialect == Dialect::Sqlite {
                        return Err(OrmError::invalid_operation(
                            "sqlite cannot resolve conflicts by constraint name",
                        ));
                    }
                    plan.conflict = Some(Conflict {
                        target: target.clone(),
                        action: None,
                    });
                }
                InsertSegment::DoNothing => set_action(&mut plan, ConflictAction::Nothing)?,
                InsertSegment::DoUpdate(lambda) => set_action(&mut plan, ConflictAction::Update(lambda.clone()))?,
                InsertSegment::DoUpdateColumns(members) => {
                    set_action(&mut plan, ConflictAction::Columns(members.clone()))?
                }
            }
        }
        if plan.rows.is_empty() {
            return Err(OrmError::invalid_operation("insert has no values"));
        }
        if plan.conflict.as_ref().is_some_and(|c| c.action.is_none()) {
            return Err(OrmError::invalid_operation("on_conflict has no action"));
        }
        if plan.returning.is_some() {
            if plan.bulk {
                return Err(OrmError::invalid_operation("bulk copy cannot return values"));
            }
            if dialect.returning_style() == ReturningStyle::Unsupported {
                return Err(OrmError::invalid_operation(format!(
                    "{dialect} does not support returning values from a mutation"
                )));
            }
        }
        Ok(plan)
    }

    /// Written members paired from the first row; every row must carry the
    /// same members. Auto-increment keys are left to the database.
    fn written_members(&self, plan: &Plan) -> OrmResult<Vec<MemberMap>> {
        uniform_members(&self.entity, &plan.rows)?;
        let names = plan.rows.first().map(|r| r.member_names()).unwrap_or_default();
        let paired = Catalog::pair_payload(&self.entity, names)?;
        let members: Vec<MemberMap> = paired.columns().filter(|m| !m.auto_increment).cloned().collect();
        if members.is_empty() {
            return Err(OrmError::invalid_operation(format!(
                "no insertable members for '{}'",
                self.entity.name()
            )));
        }
        Ok(members)
    }

    fn template(&self, ctx: &BuildContext<'_>, plan: &Plan, members: &[MemberMap], table: &str) -> OrmResult<Template> {
        let dialect = ctx.dialect;
        let entity = &self.entity;
        let mut c = Compiler::unqualified(ctx);
        c.resolver.add_source(SourceKind::Entity(Arc::clone(entity)), None);

        let fields = match &plan.returning {
            Some(Returning::Fields(lambda)) => returning_fields(&mut c, lambda)?,
            Some(Returning::All) => all_fields(&c, entity)?,
            None => Vec::new(),
        };
        let returned = match fields.is_empty() {
            true => None,
            false => Some(returning_clause(dialect, entity, &fields)?),
        };

        let table_sql = dialect.table(entity.schema(), table);
        let columns: Vec<String> = members.iter().map(|m| dialect.ident(&m.column)).collect();
        let mut header = format!("INSERT INTO {table_sql} ({})", columns.join(", "));
        if let (Some(list), ReturningStyle::Output) = (&returned, dialect.returning_style()) {
            header.push_str(&format!(" OUTPUT {list}"));
        }
        header.push_str(" VALUES ");

        let mut footer = String::new();
        if let Some(conflict) = &plan.conflict {
            footer.push_str(&self.conflict_clause(&mut c, conflict, members, table)?);
        }
        if let (Some(list), ReturningStyle::Suffix) = (&returned, dialect.returning_style()) {
            footer.push_str(&format!(" RETURNING {list}"));
        }
        Ok(Template {
            header,
            footer,
            params: c.params,
            fields,
        })
    }

    fn conflict_clause(
        &self,
        c: &mut Compiler<'_>,
        conflict: &Conflict,
        members: &[MemberMap],
        table: &str,
    ) -> OrmResult<String> {
        let dialect = c.dialect();
        let entity = &self.entity;
        let inserted: Vec<String> = members.iter().map(|m| m.column.clone()).collect();

        let assignments = match &conflict.action {
            Some(ConflictAction::Update(lambda)) => {
                let row = c
                    .resolver
                    .add_named_source(SourceKind::Entity(Arc::clone(entity)), dialect.ident(table));
                let excluded = c.resolver.add_pseudo(SourceKind::Excluded {
                    entity: Arc::clone(entity),
                    columns: inserted.clone(),
                });
                c.resolver.bind_to(&lambda.params, &[row, excluded])?;
                let result = set_list(c, entity, &lambda.body);
                c.resolver.unbind();
                Some(result?)
            }
            Some(ConflictAction::Columns(names)) => {
                let mut sets = Vec::with_capacity(names.len());
                for name in names {
                    let member = entity.member(name)?;
                    if !inserted.contains(&member.column) {
                        return Err(OrmError::invalid_operation(format!(
                            "'{name}' is not among the inserted columns"
                        )));
                    }
                    let column = dialect.ident(&member.column);
                    sets.push(format!("{column} = {}", dialect.excluded(&member.column)));
                }
                Some(sets.join(", "))
            }
            Some(ConflictAction::Nothing) | None => None,
        };

        match dialect.upsert_style() {
            UpsertStyle::OnConflict => {
                let target = match &conflict.target {
                    ConflictTarget::Constraint(name) => format!("ON CONSTRAINT {}", dialect.ident(name)),
                    ConflictTarget::Keys(keys) => {
                        let columns: Vec<String> = if keys.is_empty() {
                            entity.key_fields().to_vec()
                        } else {
                            keys.iter()
                                .map(|k| entity.member(k).map(|m| m.column.clone()))
                                .collect::<OrmResult<_>>()?
                        };
                        if columns.is_empty() {
                            return Err(OrmError::invalid_operation(format!(
                                "entity '{}' has no key to resolve conflicts on",
                                entity.name()
                            )));
                        }
                        let columns: Vec<String> = columns.iter().map(|k| dialect.ident(k)).collect();
                        format!("({})", columns.join(", "))
                    }
                };
                Ok(match assignments {
                    Some(sets) => format!(" ON CONFLICT {target} DO UPDATE SET {sets}"),
                    None => format!(" ON CONFLICT {target} DO NOTHING"),
                })
            }
            UpsertStyle::OnDuplicateKey => {
                let sets = match assignments {
                    Some(sets) => sets,
                    None => {
                        let column = entity.key_fields().first().unwrap_or(&inserted[0]);
                        let column = dialect.ident(column);
                        format!("{column} = {column}")
                    }
                };
                Ok(format!(" ON DUPLICATE KEY UPDATE {sets}"))
            }
            UpsertStyle::Unsupported => Err(OrmError::invalid_operation(format!(
                "{dialect} has no insert-or-update statement"
            ))),
        }
    }

    /// Compile one statement per physical table, all rows in each.
    pub fn build(&self, ctx: &BuildContext<'_>) -> OrmResult<Vec<CompiledStatement>> {
        let plan = self.plan(ctx.dialect)?;
        let members = self.written_members(&plan)?;
        let mut statements = Vec::new();
        for (table, rows) in partition(&self.entity, plan.rows.clone())? {
            let template = self.template(ctx, &plan, &members, &table)?;
            let mut params = template.params;
            let tuples = rows
                .iter()
                .map(|row| row_tuple(&mut params, &members, row))
                .collect::<OrmResult<Vec<_>>>()?;
            let sql = format!("{}{}{}", template.header, tuples.join(", "), template.footer);
            statements.push(CompiledStatement::finish(&sql, &params, template.fields, ctx.dialect)?);
        }
        Ok(statements)
    }

    /// Insert every row, batching by `options.batch_size`.
    pub async fn execute<T: Transport>(
        &self,
        transport: &T,
        ctx: &BuildContext<'_>,
        options: &CommandOptions,
    ) -> OrmResult<BatchReport> {
        let (report, _) = self.run(transport, ctx, options, false).await?;
        Ok(report)
    }

    /// Insert every row and collect the returned values.
    pub async fn fetch_returning<T: Transport>(
        &self,
        transport: &T,
        ctx: &BuildContext<'_>,
        options: &CommandOptions,
    ) -> OrmResult<Vec<Record>> {
        let (_, rows) = self.run(transport, ctx, options, true).await?;
        Ok(rows)
    }

    async fn run<T: Transport>(
        &self,
        transport: &T,
        ctx: &BuildContext<'_>,
        options: &CommandOptions,
        collect: bool,
    ) -> OrmResult<(BatchReport, Vec<Record>)> {
        options.validate()?;
        let mut ctx = ctx.clone();
        ctx.dialect = transport.dialect();
        let plan = self.plan(ctx.dialect)?;
        let members = self.written_members(&plan)?;
        let groups = partition(&self.entity, plan.rows.clone())?;
        if plan.bulk {
            let report = self.copy_groups(transport, &ctx, options, &members, groups).await?;
            return Ok((report, Vec::new()));
        }

        let mut report = BatchReport::default();
        let mut returned = Vec::new();
        for (table, rows) in groups {
            let template = self.template(&ctx, &plan, &members, &table)?;
            let mut writer = BatchWriter::new(
                transport,
                options,
                BatchTemplate {
                    header: template.header,
                    separator: ", ".to_string(),
                    footer: template.footer,
                    params: template.params,
                    per_statement: false,
                },
            )
            .after_flushes(report.flush_count());
            if collect {
                writer = writer.collect_rows();
            }
            for row in &rows {
                writer.push(|params| row_tuple(params, &members, row)).await?;
            }
            let (part, rows) = writer.finish_rows().await?;
            report.merge(part);
            returned.extend(rows);
        }
        Ok((report, returned))
    }

    async fn copy_groups<T: Transport>(
        &self,
        transport: &T,
        ctx: &BuildContext<'_>,
        options: &CommandOptions,
        members: &[MemberMap],
        groups: Vec<(String, Vec<Record>)>,
    ) -> OrmResult<BatchReport> {
        let columns: Vec<(String, crate::value::ValueType)> =
            members.iter().map(|m| (m.column.clone(), m.stored_type())).collect();
        let mut report = BatchReport::default();
        for (table, rows) in groups {
            let table_sql = ctx.dialect.table(self.entity.schema(), &table);
            for chunk in rows.chunks(options.batch_size) {
                let values = chunk
                    .iter()
                    .map(|row| row_values(members, row))
                    .collect::<OrmResult<Vec<_>>>()?;
                tracing::debug!(
                    target: "sqlweave.bulk",
                    table = %table_sql,
                    rows = chunk.len(),
                    "bulk copy"
                );
                let copied = guarded(
                    options,
                    report.flush_count(),
                    transport.bulk_copy(&table_sql, &columns, values),
                )
                .await?;
                report.affected += copied;
                report.flushes.push(chunk.len());
            }
        }
        Ok(report)
    }
}

fn set_action(plan: &mut Plan, action: ConflictAction) -> OrmResult<()> {
    match plan.conflict.as_mut() {
        Some(conflict) => {
            conflict.action = Some(action);
            Ok(())
        }
        None => Err(OrmError::invalid_operation("conflict action without on_conflict")),
    }
}

/// `SET` list of a `new { member = value, .. }` body.
fn set_list(c: &mut Compiler<'_>, entity: &EntityMap, body: &Expr) -> OrmResult<String> {
    let Expr::New { members, .. } = body else {
        return Err(OrmError::unsupported(body));
    };
    let dialect = c.dialect();
    let mut sets = Vec::with_capacity(members.len());
    for (name, init) in members {
        let member = entity.member(name)?;
        if !member.is_column() {
            return Err(OrmError::invalid_operation(format!("'{name}' is not a mapped column")));
        }
        let mut frag = c.compile(init)?;
        if frag.is_constant() && frag.converter.is_none() {
            frag.converter = member.converter.clone();
        }
        let value = c.operand(frag)?;
        sets.push(format!("{} = {value}", dialect.ident(&member.column)));
    }
    Ok(sets.join(", "))
}

/// Stored values of one row, in column order.
fn row_values(members: &[MemberMap], row: &Record) -> OrmResult<Vec<Value>> {
    members
        .iter()
        .map(|m| {
            let value = row.get(&m.name).cloned().unwrap_or(Value::Null);
            to_db(value, m.converter.as_ref())
        })
        .collect()
}

/// `(marker, marker, ..)` for one row.
fn row_tuple(params: &mut ParamSet, members: &[MemberMap], row: &Record) -> OrmResult<String> {
    let markers: Vec<String> = row_values(members, row)?
        .into_iter()
        .map(|v| params.bind(v))
        .collect();
    Ok(format!("({})", markers.join(", ")))
}
