//! Error types shared by drivers, the classifier and callers.
//!
//! - [`StoreError`] is what a driver reports, untyped
//! - [`DataError`] is the typed failure callers match on
//! - [`ErrorKind`] is the closed set of categories a [`DataError`] can carry

use serde::{Deserialize, Serialize};
use std::fmt;

/// A raw error reported by a store driver.
#[derive(Debug)]
pub enum StoreError {
    /// A recognized query-engine error carrying an error code
    Known(KnownError),
    /// The engine failed without a code
    Unknown { message: String },
    /// The engine itself crashed or was torn down
    Engine { message: String },
    /// Wire-level failure between the driver and the engine
    Protocol {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// A recognized query-engine error.
#[derive(Debug, Clone, PartialEq)]
pub struct KnownError {
    pub code: String,
    pub message: String,
    /// Engine-provided details, e.g. `{"target": ["email"]}` for a unique violation
    pub meta: Option<serde_json::Value>,
}

impl StoreError {
    /// Build a known error from a code and message.
    pub fn known(code: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::Known(KnownError {
            code: code.into(),
            message: message.into(),
            meta: None,
        })
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        StoreError::Unknown {
            message: message.into(),
        }
    }

    pub fn engine(message: impl Into<String>) -> Self {
        StoreError::Engine {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        StoreError::Protocol {
            message: message.into(),
            source: None,
        }
    }

    /// Attach engine metadata. No-op on anything but a known error.
    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        if let StoreError::Known(known) = &mut self {
            known.meta = Some(meta);
        }
        self
    }

    /// The engine error code, when this is a known error.
    pub fn code(&self) -> Option<&str> {
        match self {
            StoreError::Known(known) => Some(&known.code),
            _ => None,
        }
    }

    /// Engine metadata, when this is a known error that carries some.
    pub fn meta(&self) -> Option<&serde_json::Value> {
        match self {
            StoreError::Known(known) => known.meta.as_ref(),
            _ => None,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, StoreError::Known(_))
    }

    pub fn message(&self) -> &str {
        match self {
            StoreError::Known(known) => &known.message,
            StoreError::Unknown { message }
            | StoreError::Engine { message }
            | StoreError::Protocol { message, .. } => message,
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Known(known) => write!(f, "[{}] {}", known.code, known.message),
            StoreError::Unknown { message } => write!(f, "Unknown store error: {}", message),
            StoreError::Engine { message } => write!(f, "Engine error: {}", message),
            StoreError::Protocol { message, .. } => write!(f, "Protocol error: {}", message),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Protocol {
                source: Some(source),
                ..
            } => Some(source.as_ref() as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl From<KnownError> for StoreError {
    fn from(err: KnownError) -> Self {
        StoreError::Known(err)
    }
}

/// Category of a typed data failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    UniqueConstraint,
    ForeignKeyConstraint,
    RecordNotFound,
    RelationViolation,
    RelatedRecordNotFound,
    TransactionConflict,
    ValueTooLong,
    ValueOutOfRange,
    ConstraintOther,
    Connection,
    MissingRequiredValue,
    InputValidation,
    /// A known error whose code is not in the classification table
    Uncategorized,
}

impl ErrorKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UniqueConstraint => "unique-constraint",
            ErrorKind::ForeignKeyConstraint => "foreign-key-constraint",
            ErrorKind::RecordNotFound => "record-not-found",
            ErrorKind::RelationViolation => "relation-violation",
            ErrorKind::RelatedRecordNotFound => "related-record-not-found",
            ErrorKind::TransactionConflict => "transaction-conflict",
            ErrorKind::ValueTooLong => "value-too-long",
            ErrorKind::ValueOutOfRange => "value-out-of-range",
            ErrorKind::ConstraintOther => "constraint-other",
            ErrorKind::Connection => "connection",
            ErrorKind::MissingRequiredValue => "missing-required-value",
            ErrorKind::InputValidation => "input-validation",
            ErrorKind::Uncategorized => "uncategorized",
        }
    }

    /// Is retrying the whole transaction likely to succeed?
    pub const fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::TransactionConflict | ErrorKind::Connection)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified, typed failure.
///
/// `operation` and `model` name the call that failed. Transaction control
/// failures use the model `$transaction`; client lifecycle failures use
/// `$client`.
#[derive(Debug)]
pub struct DataError {
    pub kind: ErrorKind,
    pub cause: StoreError,
    pub operation: String,
    pub model: String,
}

impl DataError {
    pub fn is_unique_violation(&self) -> bool {
        self.kind == ErrorKind::UniqueConstraint
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::RecordNotFound
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// The engine error code of the cause.
    pub fn code(&self) -> Option<&str> {
        self.cause.code()
    }
}

impl fmt::Display for DataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed on {}.{}: {}",
            self.kind, self.model, self.operation, self.cause
        )
    }
}

impl std::error::Error for DataError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

/// Which operation on which model produced an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationDescriptor {
    pub operation: String,
    pub model: String,
}

impl OperationDescriptor {
    pub const TRANSACTION_MODEL: &'static str = "$transaction";
    pub const CLIENT_MODEL: &'static str = "$client";

    pub fn new(operation: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            model: model.into(),
        }
    }

    /// Descriptor for a transaction control call (`begin`, `commit`, `rollback`).
    pub fn transaction(operation: &str) -> Self {
        Self::new(operation, Self::TRANSACTION_MODEL)
    }

    /// Descriptor for a client lifecycle call (`connect`, `disconnect`).
    pub fn client(operation: &str) -> Self {
        Self::new(operation, Self::CLIENT_MODEL)
    }
}

impl fmt::Display for OperationDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.model, self.operation)
    }
}
