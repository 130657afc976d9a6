//! DELETE builder.

use super::statement::{execute_all, prepared_context, target_tables, where_clause};
use crate::client::Transport;
use crate::compiler::{BuildContext, CompiledStatement, Compiler, SourceKind};
use crate::error::{OrmError, OrmResult};
use crate::expr::Lambda;
use crate::mapping::EntityMap;
use std::sync::Arc;

/// Delete rows matching every filter. At least one filter is required.
#[derive(Debug, Clone)]
pub struct Delete {
    entity: Arc<EntityMap>,
    filters: Vec<Lambda>,
}

impl Delete {
    pub fn from(entity: Arc<EntityMap>) -> Self {
        Self {
            entity,
            filters: Vec::new(),
        }
    }

    pub fn filter(&mut self, predicate: Lambda) -> &mut Self {
        self.filters.push(predicate);
        self
    }

    /// One statement per physical table.
    pub fn build(&self, ctx: &BuildContext<'_>) -> OrmResult<Vec<CompiledStatement>> {
        if self.filters.is_empty() {
            return Err(OrmError::invalid_operation(format!(
                "delete from '{}' without a filter",
                self.entity.name()
            )));
        }
        target_tables(ctx, &self.entity)
            .iter()
            .map(|table| {
                let mut c = Compiler::unqualified(ctx);
                c.resolver.add_source(SourceKind::Entity(Arc::clone(&self.entity)), None);
                let conditions = self
                    .filters
                    .iter()
                    .map(|f| c.condition(f))
                    .collect::<OrmResult<Vec<_>>>()?;
                let sql = format!(
                    "DELETE FROM {}{}",
                    ctx.dialect.table(self.entity.schema(), table),
                    where_clause(&conditions).unwrap_or_default()
                );
                CompiledStatement::finish(&sql, &c.params, Vec::new(), ctx.dialect)
            })
            .collect()
    }

    pub async fn execute<T: Transport>(&self, transport: &T, ctx: &BuildContext<'_>) -> OrmResult<u64> {
        let ctx = prepared_context(transport, ctx, &[self.entity.as_ref()]).await?;
        let statements = self.build(&ctx)?;
        execute_all(transport, &statements).await
    }
}
