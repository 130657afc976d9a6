//! An in-memory transport that records every call.

#![allow(dead_code)]

use sqlweave::{Dialect, OrmError, OrmResult, ParamSet, Record, Transport, Value, ValueType};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Execute { sql: String, params: Vec<Value> },
    Query { sql: String, params: Vec<Value> },
    Copy { table: String, columns: Vec<String>, rows: usize },
    Discover { pattern: String },
}

impl Call {
    pub fn sql(&self) -> Option<&str> {
        match self {
            Call::Execute { sql, .. } | Call::Query { sql, .. } => Some(sql),
            _ => None,
        }
    }
}

pub struct RecordingTransport {
    dialect: Dialect,
    calls: Mutex<Vec<Call>>,
    tables: Vec<String>,
    results: Mutex<VecDeque<Vec<Record>>>,
    delay: Option<Duration>,
    fail_copy: bool,
    cancel_after: Option<(usize, watch::Sender<bool>)>,
}

impl RecordingTransport {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            calls: Mutex::new(Vec::new()),
            tables: Vec::new(),
            results: Mutex::new(VecDeque::new()),
            delay: None,
            fail_copy: false,
            cancel_after: None,
        }
    }

    /// Tables reported by catalog discovery.
    pub fn with_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables = tables.into_iter().map(Into::into).collect();
        self
    }

    /// Rows returned by the next query.
    pub fn with_result(self, rows: Vec<Record>) -> Self {
        self.results.lock().unwrap().push_back(rows);
        self
    }

    /// Sleep this long inside every execute and query.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing_copy(mut self) -> Self {
        self.fail_copy = true;
        self
    }

    /// Raise the cancellation signal once `n` statements have executed.
    pub fn cancel_after(mut self, n: usize, signal: watch::Sender<bool>) -> Self {
        self.cancel_after = Some((n, signal));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|c| c.sql().map(str::to_string))
            .collect()
    }

    fn record(&self, call: Call) -> usize {
        let mut calls = self.calls.lock().unwrap();
        calls.push(call);
        calls.iter().filter(|c| matches!(c, Call::Execute { .. })).count()
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

fn values(params: &ParamSet) -> Vec<Value> {
    params.values().cloned().collect()
}

impl Transport for RecordingTransport {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn execute(&self, sql: &str, params: &ParamSet) -> OrmResult<u64> {
        self.pause().await;
        let executed = self.record(Call::Execute {
            sql: sql.to_string(),
            params: values(params),
        });
        if let Some((n, signal)) = &self.cancel_after
            && executed >= *n
        {
            let _ = signal.send(true);
        }
        Ok(1)
    }

    async fn query(&self, sql: &str, params: &ParamSet) -> OrmResult<Vec<Record>> {
        self.pause().await;
        self.record(Call::Query {
            sql: sql.to_string(),
            params: values(params),
        });
        Ok(self.results.lock().unwrap().pop_front().unwrap_or_default())
    }

    async fn bulk_copy(
        &self,
        table: &str,
        columns: &[(String, ValueType)],
        rows: Vec<Vec<Value>>,
    ) -> OrmResult<u64> {
        self.record(Call::Copy {
            table: table.to_string(),
            columns: columns.iter().map(|(c, _)| c.clone()).collect(),
            rows: rows.len(),
        });
        if self.fail_copy {
            return Err(OrmError::Other("copy rejected".to_string()));
        }
        Ok(rows.len() as u64)
    }

    async fn table_names(&self, pattern: &str) -> OrmResult<Vec<String>> {
        self.record(Call::Discover {
            pattern: pattern.to_string(),
        });
        Ok(self.tables.clone())
    }
}
