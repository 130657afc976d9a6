//! Bulk execution: batched multi-row statements and guarded flushes.
//!
//! A [`BatchWriter`] accumulates per-row SQL fragments into one text buffer and
//! one parameter collection, executing the statement whenever the configured
//! batch size is reached and once more for the remainder. Cancellation is
//! checked before every flush and each flush runs under the configured timeout;
//! a flush already sent is never interrupted.

use crate::client::{Transport, trace_statement};
use crate::compiler::ParamSet;
use crate::config::CommandOptions;
use crate::error::{OrmError, OrmResult};
use crate::value::Record;
use std::future::Future;

/// Outcome of a batched or staged command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Total affected (or returned) rows.
    pub affected: u64,
    /// Payload rows sent by each flush, in order.
    pub flushes: Vec<usize>,
}

impl BatchReport {
    pub fn flush_count(&self) -> usize {
        self.flushes.len()
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: BatchReport) {
        self.affected += other.affected;
        self.flushes.extend(other.flushes);
    }
}

/// Fixed parts of a batched statement.
///
/// `params` holds values referenced by `header` or `footer`; every flush starts
/// from a copy of it.
#[derive(Debug, Clone, Default)]
pub struct BatchTemplate {
    pub header: String,
    pub separator: String,
    pub footer: String,
    pub params: ParamSet,
    /// Suffix row parameter names with the row's index within the flush.
    pub per_statement: bool,
}

/// Run one flush: fail fast if cancellation was requested, then await the
/// flush under the configured timeout.
pub(crate) async fn guarded<T, F>(options: &CommandOptions, completed: usize, flush: F) -> OrmResult<T>
where
    F: Future<Output = OrmResult<T>>,
{
    if options.is_cancelled() {
        return Err(OrmError::Cancelled { completed });
    }
    match options.timeout {
        Some(limit) => tokio::time::timeout(limit, flush)
            .await
            .map_err(|_| OrmError::Timeout(limit))?,
        None => flush.await,
    }
}

/// Accumulates rows of one batched statement and flushes them in groups.
pub struct BatchWriter<'t, T: Transport> {
    transport: &'t T,
    options: &'t CommandOptions,
    template: BatchTemplate,
    body: String,
    params: ParamSet,
    rows: usize,
    returning: Option<Vec<Record>>,
    report: BatchReport,
    completed_before: usize,
}

impl<'t, T: Transport> BatchWriter<'t, T> {
    pub fn new(transport: &'t T, options: &'t CommandOptions, template: BatchTemplate) -> Self {
        let params = template.params.clone();
        Self {
            transport,
            options,
            template,
            body: String::new(),
            params,
            rows: 0,
            returning: None,
            report: BatchReport::default(),
            completed_before: 0,
        }
    }

    /// Run flushes as queries and keep the returned rows.
    pub fn collect_rows(mut self) -> Self {
        self.returning = Some(Vec::new());
        self
    }

    /// Count flushes of earlier writers in the same command, so a
    /// cancellation error reports the command-wide total.
    pub fn after_flushes(mut self, completed: usize) -> Self {
        self.completed_before = completed;
        self
    }

    /// Append one row. `render` binds the row's values and returns its SQL.
    pub async fn push<F>(&mut self, render: F) -> OrmResult<()>
    where
        F: FnOnce(&mut ParamSet) -> OrmResult<String>,
    {
        if self.template.per_statement {
            self.params.set_statement(Some(self.rows));
        }
        let fragment = render(&mut self.params)?;
        if self.rows > 0 {
            self.body.push_str(&self.template.separator);
        }
        self.body.push_str(&fragment);
        self.rows += 1;
        if self.rows >= self.options.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> OrmResult<()> {
        if self.rows == 0 {
            return Ok(());
        }
        let completed = self.completed_before + self.report.flushes.len();
        let sql = format!("{}{}{}", self.template.header, self.body, self.template.footer);
        let (sql, params) = self.params.render(&sql, self.transport.dialect())?;
        trace_statement(&sql, &params);
        tracing::debug!(
            target: "sqlweave.bulk",
            flush = completed + 1,
            rows = self.rows,
            "flushing batch"
        );

        let affected = match self.returning.as_mut() {
            Some(collected) => {
                let rows = guarded(self.options, completed, self.transport.query(&sql, &params)).await?;
                let n = rows.len() as u64;
                collected.extend(rows);
                n
            }
            None => guarded(self.options, completed, self.transport.execute(&sql, &params)).await?,
        };

        self.report.affected += affected;
        self.report.flushes.push(self.rows);
        self.body.clear();
        self.params = self.template.params.clone();
        self.rows = 0;
        Ok(())
    }

    /// Flush the remainder and return the report.
    pub async fn finish(mut self) -> OrmResult<BatchReport> {
        self.flush().await?;
        Ok(self.report)
    }

    /// Flush the remainder and return the report with any collected rows.
    pub async fn finish_rows(mut self) -> OrmResult<(BatchReport, Vec<Record>)> {
        self.flush().await?;
        Ok((self.report, self.returning.unwrap_or_default()))
    }
}
