//! sqlscope - data access with typed exits and correct transaction scoping.
//!
//! sqlscope provides:
//!
//! - A three-way `Exit` (success, typed failure, defect) for every operation
//! - Acquire/use/release with exactly-once, interruption-masked release
//! - Ambient transactions: nested calls join, only the owner commits
//! - Classification of raw store errors into a closed `ErrorKind` set
//! - Scoped clients that connect and disconnect exactly once per scope
//!
//! # Quick Start
//!
//! ```ignore
//! use sqlscope::prelude::*;
//!
//! #[derive(Debug, Deserialize)]
//! struct User {
//!     id: i64,
//!     email: String,
//! }
//!
//! impl Model for User {
//!     const NAME: &'static str = "User";
//! }
//!
//! async fn sign_up<K: Connector>(cx: &Cx, client: &Client<K>) -> Exit<User, DataError> {
//!     let users = model::<User>();
//!     client
//!         .scoped(cx, |scope| async move {
//!             scope
//!                 .transaction(|tx| async move {
//!                     users.create(json!({"email": "ada@example.com"})).run(&tx).await
//!                 })
//!                 .await
//!         })
//!         .await
//! }
//! ```
//!
//! # Crate Layout
//!
//! - `sqlscope-core`: `Exit`, `bracket`, the classifier and the driver traits
//! - `sqlscope-session`: `Client`, `Scope`, transactions and typed operations
//! - `sqlscope-memory`: an in-memory reference driver

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub use sqlscope_core::{
    Action, AmbientContext, Connection, Connector, DataError, Defect, DefectKind, ErrorKind,
    ErrorMapper, Exit, ExitError, ExitStatus, InterruptHandle, IsolationLevel, KnownError,
    MapWith, MaskGuard, OperationDescriptor, Provenance, Request, ResourceKey, StandardMapper,
    StoreError, TransactionOps, TransactionOptions, bracket, classify, kind_for_code, settle,
    try_exit,
};
pub use sqlscope_session::{
    ActiveTransaction, BatchPayload, Client, ClientConfig, Executor, Model, ModelDelegate,
    Operation, Scope, TransactionHandle, model,
};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use sqlscope::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Client, ClientConfig, Cx, DataError, Defect, ErrorKind, Exit, InterruptHandle,
        IsolationLevel, Model, Scope, TransactionOptions, model, try_exit,
    };
    pub use serde::Deserialize;
    pub use serde_json::json;
}
