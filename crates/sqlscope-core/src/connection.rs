//! Store driver traits.
//!
//! A driver provides three things:
//!
//! - [`Connector`] - creates a fresh [`Connection`] per scoped client
//! - [`Connection`] - executes requests outside a transaction and begins transactions
//! - [`TransactionOps`] - executes requests inside one transaction and finishes it
//!
//! All calls take an asupersync [`Cx`] and report raw [`StoreError`]s through
//! an [`Outcome`]. Classification happens above the driver.

use crate::error::StoreError;
use asupersync::{Cx, Outcome};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Dirty reads, non-repeatable reads and phantoms possible.
    ReadUncommitted,
    /// Only committed changes from other transactions are visible.
    #[default]
    ReadCommitted,
    /// A consistent snapshot for the whole transaction.
    RepeatableRead,
    /// Transactions appear to execute one after another.
    Serializable,
}

impl IsolationLevel {
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// Options handed to [`Connection::begin`].
///
/// The transaction manager never interprets these; they reach the driver
/// exactly as given. Unset fields mean "driver default".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionOptions {
    pub isolation_level: Option<IsolationLevel>,
    /// Maximum lifetime of the transaction, in milliseconds
    pub timeout_ms: Option<u64>,
    /// Maximum time to wait for the transaction to start, in milliseconds
    pub max_wait_ms: Option<u64>,
}

impl TransactionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = Some(level);
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    pub fn max_wait_ms(mut self, ms: u64) -> Self {
        self.max_wait_ms = Some(ms);
        self
    }
}

/// A data action understood by drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Create,
    CreateMany,
    FindUnique,
    FindUniqueOrThrow,
    FindFirst,
    FindFirstOrThrow,
    FindMany,
    Update,
    UpdateMany,
    Upsert,
    Delete,
    DeleteMany,
    Count,
    Aggregate,
    GroupBy,
}

impl Action {
    /// Operation name as it appears in failures (`"findUnique"`, `"createMany"`, ...).
    pub const fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::CreateMany => "createMany",
            Action::FindUnique => "findUnique",
            Action::FindUniqueOrThrow => "findUniqueOrThrow",
            Action::FindFirst => "findFirst",
            Action::FindFirstOrThrow => "findFirstOrThrow",
            Action::FindMany => "findMany",
            Action::Update => "update",
            Action::UpdateMany => "updateMany",
            Action::Upsert => "upsert",
            Action::Delete => "delete",
            Action::DeleteMany => "deleteMany",
            Action::Count => "count",
            Action::Aggregate => "aggregate",
            Action::GroupBy => "groupBy",
        }
    }

    /// Does this action modify data?
    pub const fn is_write(&self) -> bool {
        matches!(
            self,
            Action::Create
                | Action::CreateMany
                | Action::Update
                | Action::UpdateMany
                | Action::Upsert
                | Action::Delete
                | Action::DeleteMany
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One data operation against one model.
///
/// `args` follows the query-engine argument shape (`where`, `data`, `create`,
/// `update`, `select`, ...). Drivers answer with a JSON document.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub model: String,
    pub action: Action,
    pub args: serde_json::Value,
}

impl Request {
    pub fn new(model: impl Into<String>, action: Action, args: serde_json::Value) -> Self {
        Self {
            model: model.into(),
            action,
            args,
        }
    }
}

/// Operations on an open transaction.
///
/// Exactly one of [`commit`](Self::commit) or [`rollback`](Self::rollback) is
/// called per transaction. A transaction dropped without either must discard
/// its pending writes.
pub trait TransactionOps: Send + Sync + 'static {
    /// Execute a request inside this transaction.
    fn execute(
        &self,
        cx: &Cx,
        request: Request,
    ) -> impl Future<Output = Outcome<serde_json::Value, StoreError>> + Send;

    /// Make the transaction's writes durable.
    fn commit(&self, cx: &Cx) -> impl Future<Output = Outcome<(), StoreError>> + Send;

    /// Discard the transaction's writes.
    fn rollback(&self, cx: &Cx) -> impl Future<Output = Outcome<(), StoreError>> + Send;
}

/// An open connection to a store.
pub trait Connection: Send + Sync + 'static {
    /// The transaction type returned by this connection.
    type Tx: TransactionOps;

    /// Execute a request outside any transaction.
    fn execute(
        &self,
        cx: &Cx,
        request: Request,
    ) -> impl Future<Output = Outcome<serde_json::Value, StoreError>> + Send;

    /// Begin a transaction. `options` must be honored as given.
    fn begin(
        &self,
        cx: &Cx,
        options: &TransactionOptions,
    ) -> impl Future<Output = Outcome<Self::Tx, StoreError>> + Send;

    /// Close the connection. Called exactly once per scoped client.
    fn disconnect(&self, cx: &Cx) -> impl Future<Output = Outcome<(), StoreError>> + Send;
}

/// Creates connections.
pub trait Connector: Send + Sync {
    type Connection: Connection;

    fn connect(&self, cx: &Cx) -> impl Future<Output = Outcome<Self::Connection, StoreError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_options_builder() {
        let options = TransactionOptions::new()
            .isolation_level(IsolationLevel::Serializable)
            .timeout_ms(5_000)
            .max_wait_ms(2_000);
        assert_eq!(options.isolation_level, Some(IsolationLevel::Serializable));
        assert_eq!(options.timeout_ms, Some(5_000));
        assert_eq!(options.max_wait_ms, Some(2_000));
    }

    #[test]
    fn test_transaction_options_from_partial_config() {
        let options: TransactionOptions =
            serde_json::from_str(r#"{"isolation_level": "repeatable_read"}"#).unwrap();
        assert_eq!(options.isolation_level, Some(IsolationLevel::RepeatableRead));
        assert_eq!(options.timeout_ms, None);
        assert_eq!(IsolationLevel::RepeatableRead.as_sql(), "REPEATABLE READ");
    }

    #[test]
    fn test_action_names() {
        assert_eq!(Action::FindUniqueOrThrow.as_str(), "findUniqueOrThrow");
        assert_eq!(Action::GroupBy.to_string(), "groupBy");
        assert!(Action::Upsert.is_write());
        assert!(!Action::Count.is_write());
    }
}
