//! Transport trait: the only seam between compiled statements and a database.
//!
//! Statements arrive fully rendered (dialect placeholders, parameters in bind
//! order). The crate ships implementations for `tokio_postgres::Client` and
//! `tokio_postgres::Transaction`; other drivers implement the trait themselves.

use crate::compiler::ParamSet;
use crate::dialect::Dialect;
use crate::error::{OrmError, OrmResult};
use crate::value::{Record, Value, ValueType, pg_type};
use bytes::Bytes;
use futures_util::TryStreamExt;
use tokio_postgres::Row;
use tokio_postgres::binary_copy::BinaryCopyInWriter;
use tokio_postgres::types::ToSql;

/// Executes rendered SQL against one connection or transaction.
pub trait Transport: Send + Sync {
    /// The dialect statements must be compiled for.
    fn dialect(&self) -> Dialect;

    /// Execute a statement and return the number of affected rows.
    fn execute(
        &self,
        sql: &str,
        params: &ParamSet,
    ) -> impl std::future::Future<Output = OrmResult<u64>> + Send;

    /// Execute a query and return every row as a [`Record`] keyed by column alias.
    fn query(
        &self,
        sql: &str,
        params: &ParamSet,
    ) -> impl std::future::Future<Output = OrmResult<Vec<Record>>> + Send;

    /// Bulk-load rows into `table` using the driver's native copy path.
    ///
    /// `table` is already quoted. The default implementation falls back to
    /// one multi-row `INSERT` per call.
    fn bulk_copy(
        &self,
        table: &str,
        columns: &[(String, ValueType)],
        rows: Vec<Vec<Value>>,
    ) -> impl std::future::Future<Output = OrmResult<u64>> + Send {
        async move {
            if rows.is_empty() {
                return Ok(0);
            }
            let dialect = self.dialect();
            let mut params = ParamSet::new();
            let cols: Vec<String> = columns.iter().map(|(c, _)| dialect.ident(c)).collect();
            let tuples: Vec<String> = rows
                .into_iter()
                .map(|row| {
                    let marks: Vec<String> = row.into_iter().map(|v| params.bind(v)).collect();
                    format!("({})", marks.join(", "))
                })
                .collect();
            let sql = format!(
                "INSERT INTO {table} ({}) VALUES {}",
                cols.join(", "),
                tuples.join(", ")
            );
            let (sql, params) = params.render(&sql, dialect)?;
            self.execute(&sql, &params).await
        }
    }

    /// Names of tables matching a LIKE pattern, in catalog order.
    fn table_names(
        &self,
        pattern: &str,
    ) -> impl std::future::Future<Output = OrmResult<Vec<String>>> + Send {
        async move {
            let mut params = ParamSet::new();
            params.bind(Value::Text(pattern.to_string()));
            let rows = self
                .query(&self.dialect().table_discovery_sql(), &params)
                .await?;
            Ok(rows
                .into_iter()
                .filter_map(|row| {
                    row.iter()
                        .find_map(|(_, v)| v.as_str().map(str::to_string))
                })
                .collect())
        }
    }
}

const LOGGED_SQL_BYTES: usize = 2048;

pub(crate) fn truncate_sql(sql: &str, max_bytes: usize) -> &str {
    if sql.len() <= max_bytes {
        return sql;
    }
    let mut end = max_bytes;
    while end > 0 && !sql.is_char_boundary(end) {
        end -= 1;
    }
    &sql[..end]
}

/// Emit a compiled statement on the `sqlweave.sql` target.
pub(crate) fn trace_statement(sql: &str, params: &ParamSet) {
    tracing::debug!(
        target: "sqlweave.sql",
        params = params.len(),
        sql = truncate_sql(sql, LOGGED_SQL_BYTES),
        "compiled statement"
    );
}

fn record_from_row(row: &Row) -> OrmResult<Record> {
    let mut record = Record::new();
    for (i, column) in row.columns().iter().enumerate() {
        let value: Value = row
            .try_get(i)
            .map_err(|e| OrmError::conversion(format!("column '{}': {e}", column.name())))?;
        record.set(column.name(), value);
    }
    Ok(record)
}

fn copy_statement(table: &str, columns: &[(String, ValueType)]) -> String {
    let cols: Vec<String> = columns
        .iter()
        .map(|(c, _)| Dialect::Postgres.ident(c))
        .collect();
    format!("COPY {table} ({}) FROM STDIN BINARY", cols.join(", "))
}

macro_rules! impl_pg_transport {
    ($ty:ty) => {
        impl Transport for $ty {
            fn dialect(&self) -> Dialect {
                Dialect::Postgres
            }

            async fn execute(&self, sql: &str, params: &ParamSet) -> OrmResult<u64> {
                <$ty>::execute(self, sql, &params.as_refs())
                    .await
                    .map_err(OrmError::from_db_error)
            }

            async fn query(&self, sql: &str, params: &ParamSet) -> OrmResult<Vec<Record>> {
                let stream = <$ty>::query_raw(self, sql, params.as_refs())
                    .await
                    .map_err(OrmError::from_db_error)?;
                let rows: Vec<Row> = stream.try_collect().await.map_err(OrmError::from_db_error)?;
                rows.iter().map(record_from_row).collect()
            }

            async fn bulk_copy(
                &self,
                table: &str,
                columns: &[(String, ValueType)],
                rows: Vec<Vec<Value>>,
            ) -> OrmResult<u64> {
                if rows.is_empty() {
                    return Ok(0);
                }
                let types: Vec<_> = columns.iter().map(|(_, vt)| pg_type(vt)).collect();
                let sink = <$ty>::copy_in::<_, Bytes>(self, &copy_statement(table, columns))
                    .await
                    .map_err(OrmError::from_db_error)?;
                let writer = BinaryCopyInWriter::new(sink, &types);
                tokio::pin!(writer);
                for row in &rows {
                    let refs: Vec<&(dyn ToSql + Sync)> =
                        row.iter().map(|v| v as &(dyn ToSql + Sync)).collect();
                    writer
                        .as_mut()
                        .write(&refs)
                        .await
                        .map_err(OrmError::from_db_error)?;
                }
                writer.finish().await.map_err(OrmError::from_db_error)
            }
        }
    };
}

impl_pg_transport!(tokio_postgres::Client);
impl_pg_transport!(tokio_postgres::Transaction<'_>);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_char_boundaries() {
        let sql = "SELECT 'ééé'";
        let cut = truncate_sql(sql, 10);
        assert!(cut.len() <= 10);
        assert!(sql.starts_with(cut));
        assert_eq!(truncate_sql("SELECT 1", 100), "SELECT 1");
    }

    #[test]
    fn copy_statement_quotes_columns_only_when_needed() {
        let columns = vec![
            ("id".to_string(), ValueType::I64),
            ("user".to_string(), ValueType::Text),
        ];
        assert_eq!(
            copy_statement("orders", &columns),
            r#"COPY orders (id, "user") FROM STDIN BINARY"#
        );
    }
}
