//! Pieces shared by the mutation builders.

use crate::client::{Transport, trace_statement};
use crate::compiler::{BuildContext, CompiledStatement, Compiler, ReaderField};
use crate::dialect::{Dialect, ReturningStyle};
use crate::error::{OrmError, OrmResult};
use crate::expr::Lambda;
use crate::mapping::{EntityMap, Payload};
use crate::shard::ShardResolver;
use crate::value::Record;
use std::collections::HashSet;

/// Capture a payload as an ordered record.
pub(crate) fn capture(row: &dyn Payload) -> Record {
    row.member_names()
        .into_iter()
        .map(|name| {
            let value = row.value(&name).unwrap_or(crate::value::Value::Null);
            (name, value)
        })
        .collect()
}

/// Reject rows whose member set differs from the first row's.
pub(crate) fn uniform_members(entity: &EntityMap, rows: &[Record]) -> OrmResult<()> {
    let Some((first, rest)) = rows.split_first() else {
        return Ok(());
    };
    let expected: HashSet<&str> = first.names().collect();
    for (i, row) in rest.iter().enumerate() {
        if row.names().collect::<HashSet<&str>>() != expected {
            return Err(OrmError::invalid_operation(format!(
                "row {} for '{}' does not carry the same members as the first row",
                i + 1,
                entity.name()
            )));
        }
    }
    Ok(())
}

/// Physical tables a predicate statement runs against, in discovery order.
pub(crate) fn target_tables(ctx: &BuildContext<'_>, entity: &EntityMap) -> Vec<String> {
    match ctx.shard_tables(entity.name()) {
        Some(tables) => tables.to_vec(),
        None => vec![entity.table().to_string()],
    }
}

/// Reader fields of a RETURNING / OUTPUT list, compiled against the target row.
pub(crate) fn returning_fields(c: &mut Compiler<'_>, lambda: &Lambda) -> OrmResult<Vec<ReaderField>> {
    if c.dialect().returning_style() == ReturningStyle::Unsupported {
        return Err(OrmError::invalid_operation(format!(
            "{} does not support returning values from a mutation",
            c.dialect()
        )));
    }
    c.projection(lambda)
}

/// Every mapped column of an entity as reader fields.
pub(crate) fn all_fields(c: &Compiler<'_>, entity: &EntityMap) -> OrmResult<Vec<ReaderField>> {
    if c.dialect().returning_style() == ReturningStyle::Unsupported {
        return Err(OrmError::invalid_operation(format!(
            "{} does not support returning values from a mutation",
            c.dialect()
        )));
    }
    let mut fields = c.entity_fields(c.resolver.scope().first().copied().unwrap_or(0), entity);
    ReaderField::number(&mut fields);
    Ok(fields)
}

/// Render a returning list: `RETURNING a, b` or `OUTPUT INSERTED.a, INSERTED.b`.
///
/// Output style only accepts plain members of the target entity.
pub(crate) fn returning_clause(
    dialect: Dialect,
    entity: &EntityMap,
    fields: &[ReaderField],
) -> OrmResult<String> {
    let leaves = ReaderField::leaves(fields);
    let mut items = Vec::with_capacity(leaves.len());
    for f in leaves {
        let item = match dialect.returning_style() {
            ReturningStyle::Output => {
                let member = f
                    .source_member
                    .as_deref()
                    .and_then(|m| entity.try_member(m))
                    .filter(|m| m.is_column())
                    .ok_or_else(|| {
                        OrmError::unsupported(format!("OUTPUT of computed value '{}'", f.sql))
                    })?;
                with_alias(dialect, format!("INSERTED.{}", dialect.ident(&member.column)), &f.column_alias)
            }
            _ => with_alias(dialect, f.sql.clone(), &f.column_alias),
        };
        items.push(item);
    }
    Ok(items.join(", "))
}

/// `sql AS alias`, or just `sql` when it already names the alias.
pub(crate) fn with_alias(dialect: Dialect, sql: String, alias: &str) -> String {
    let quoted = dialect.ident(alias);
    if sql == quoted || sql.ends_with(&format!(".{quoted}")) {
        sql
    } else {
        format!("{sql} AS {quoted}")
    }
}

/// Joined WHERE conditions, or `None` when there are none.
pub(crate) fn where_clause(conditions: &[String]) -> Option<String> {
    (!conditions.is_empty()).then(|| format!(" WHERE {}", conditions.join(" AND ")))
}

/// Resolve shard tables for `entities` into a context for one call.
pub(crate) async fn prepared_context<'a, T: Transport>(
    transport: &T,
    ctx: &BuildContext<'a>,
    entities: &[&EntityMap],
) -> OrmResult<BuildContext<'a>> {
    let mut ctx = ctx.clone();
    ctx.dialect = transport.dialect();
    let mut resolver = ShardResolver::new(transport);
    for entity in entities {
        resolver.prepare(&mut ctx, entity).await?;
    }
    Ok(ctx)
}

/// Execute compiled statements in order and sum affected rows.
pub(crate) async fn execute_all<T: Transport>(transport: &T, statements: &[CompiledStatement]) -> OrmResult<u64> {
    let mut affected = 0;
    for stmt in statements {
        trace_statement(&stmt.sql, &stmt.params);
        affected += transport.execute(&stmt.sql, &stmt.params).await?;
    }
    Ok(affected)
}

/// Run compiled statements as queries and concatenate their rows.
pub(crate) async fn query_all<T: Transport>(transport: &T, statements: &[CompiledStatement]) -> OrmResult<Vec<Record>> {
    let mut rows = Vec::new();
    for stmt in statements {
        trace_statement(&stmt.sql, &stmt.params);
        rows.extend(transport.query(&stmt.sql, &stmt.params).await?);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_are_omitted_when_redundant() {
        assert_eq!(with_alias(Dialect::Postgres, "t0.id".into(), "id"), "t0.id");
        assert_eq!(with_alias(Dialect::Postgres, "id".into(), "id"), "id");
        assert_eq!(
            with_alias(Dialect::Postgres, "t1.name".into(), "customer_name"),
            "t1.name AS customer_name"
        );
        assert_eq!(
            with_alias(Dialect::SqlServer, "COUNT(*)".into(), "user"),
            "COUNT(*) AS [user]"
        );
    }

    #[test]
    fn payload_capture_keeps_member_order() {
        let row = Record::new().with("b", 2_i32).with("a", 1_i32);
        let captured = capture(&row);
        assert_eq!(captured.names().collect::<Vec<_>>(), vec!["b", "a"]);
    }
}
