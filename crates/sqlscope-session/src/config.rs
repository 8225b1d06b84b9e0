//! Client configuration.

use serde::{Deserialize, Serialize};
use sqlscope_core::{IsolationLevel, TransactionOptions};

/// Configuration shared by every scope a [`Client`](crate::Client) opens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Options used by `Scope::transaction` when none are given explicitly.
    pub transaction: TransactionOptions,
    /// Log every data operation at `info` instead of `trace`.
    pub log_operations: bool,
}

impl ClientConfig {
    /// Create a new config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default transaction options.
    #[must_use]
    pub fn transaction_options(mut self, options: TransactionOptions) -> Self {
        self.transaction = options;
        self
    }

    /// Set the default isolation level for new transactions.
    #[must_use]
    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.transaction.isolation_level = Some(level);
        self
    }

    /// Set the default transaction timeout in milliseconds.
    #[must_use]
    pub fn transaction_timeout_ms(mut self, ms: u64) -> Self {
        self.transaction.timeout_ms = Some(ms);
        self
    }

    #[must_use]
    pub fn log_operations(mut self, enabled: bool) -> Self {
        self.log_operations = enabled;
        self
    }
}
