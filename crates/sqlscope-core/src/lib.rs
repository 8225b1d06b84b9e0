//! Core types and traits for sqlscope.
//!
//! - `Exit` and `Defect`, the three-way result of every data operation
//! - `bracket`, the acquire/use/release combinator with masked release
//! - `classify` and `ErrorMapper`, turning raw store errors into typed failures
//! - `Connection` / `TransactionOps` / `Connector`, the store driver seam
//! - `AmbientContext`, the immutable typed context scopes carry
//! - `Outcome` and `Cx` re-exported from asupersync

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod bracket;
pub mod classify;
pub mod connection;
pub mod context;
pub mod error;
pub mod exit;
pub mod interrupt;

pub use bracket::bracket;
pub use classify::{
    ErrorMapper, MapWith, Provenance, StandardMapper, classify, kind_for_code, settle,
};
pub use connection::{
    Action, Connection, Connector, IsolationLevel, Request, TransactionOps, TransactionOptions,
};
pub use context::{AmbientContext, ResourceKey};
pub use error::{DataError, ErrorKind, KnownError, OperationDescriptor, StoreError};
pub use exit::{Defect, DefectKind, Exit, ExitError, ExitStatus};
pub use interrupt::{InterruptHandle, MaskGuard};
