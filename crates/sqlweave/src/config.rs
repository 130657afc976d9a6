//! Per-command execution options.

use crate::error::{OrmError, OrmResult};
use serde::{Deserialize, Deserializer};
use std::time::Duration;
use tokio::sync::watch;

/// Default number of rows per batch flush.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Options for one bulk or batched command.
///
/// Can be read from TOML:
///
/// ```toml
/// batch_size = 500
/// timeout_ms = 30000
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CommandOptions {
    /// Rows per flush.
    pub batch_size: usize,
    /// Timeout applied to each flush.
    #[serde(rename = "timeout_ms", deserialize_with = "millis")]
    pub timeout: Option<Duration>,
    /// Cancellation signal, checked before each flush.
    #[serde(skip)]
    pub cancel: Option<watch::Receiver<bool>>,
}

fn millis<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
    Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
}

impl Default for CommandOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            timeout: None,
            cancel: None,
        }
    }
}

impl CommandOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse options from TOML text. Missing fields keep their defaults.
    pub fn from_toml_str(raw: &str) -> OrmResult<Self> {
        let options: Self = toml::from_str(raw)
            .map_err(|e| OrmError::validation(format!("invalid command options: {e}")))?;
        options.validate()?;
        Ok(options)
    }

    /// Set rows per flush.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set the per-flush timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Attach a cancellation signal. Sending `true` aborts before the next flush.
    pub fn cancel_on(mut self, signal: watch::Receiver<bool>) -> Self {
        self.cancel = Some(signal);
        self
    }

    pub fn validate(&self) -> OrmResult<()> {
        if self.batch_size == 0 {
            return Err(OrmError::validation("batch_size must be at least 1"));
        }
        Ok(())
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }
}
