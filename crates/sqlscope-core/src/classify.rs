//! Translating raw store errors into typed failures or defects.
//!
//! Known query-engine errors are looked up in a static code table. Anything
//! that is not a known error becomes a [`Defect`]: a raw error is never handed
//! to callers through the typed channel.
//!
//! The whole step can be replaced with a custom [`ErrorMapper`]. Its failure
//! type must keep the raw cause and the operation that produced it
//! ([`Provenance`]).

use crate::error::{DataError, ErrorKind, OperationDescriptor, StoreError};
use crate::exit::{Defect, Exit};
use asupersync::Outcome;
use std::fmt;

static CODE_TABLE: &[(&str, ErrorKind)] = &[
    ("P2002", ErrorKind::UniqueConstraint),
    ("P2003", ErrorKind::ForeignKeyConstraint),
    ("P2001", ErrorKind::RecordNotFound),
    ("P2025", ErrorKind::RecordNotFound),
    ("P2014", ErrorKind::RelationViolation),
    ("P2017", ErrorKind::RelationViolation),
    ("P2015", ErrorKind::RelatedRecordNotFound),
    ("P2018", ErrorKind::RelatedRecordNotFound),
    ("P2034", ErrorKind::TransactionConflict),
    ("P2000", ErrorKind::ValueTooLong),
    ("P2020", ErrorKind::ValueOutOfRange),
    ("P2004", ErrorKind::ConstraintOther),
    ("P1000", ErrorKind::Connection),
    ("P1001", ErrorKind::Connection),
    ("P1002", ErrorKind::Connection),
    ("P1008", ErrorKind::Connection),
    ("P1017", ErrorKind::Connection),
    ("P2024", ErrorKind::Connection),
    ("P2011", ErrorKind::MissingRequiredValue),
    ("P2012", ErrorKind::MissingRequiredValue),
    ("P2013", ErrorKind::MissingRequiredValue),
    ("P2005", ErrorKind::InputValidation),
    ("P2006", ErrorKind::InputValidation),
    ("P2007", ErrorKind::InputValidation),
    ("P2019", ErrorKind::InputValidation),
];

/// Look up the category for an engine error code.
pub fn kind_for_code(code: &str) -> ErrorKind {
    CODE_TABLE
        .iter()
        .find(|(c, _)| *c == code)
        .map_or(ErrorKind::Uncategorized, |(_, kind)| *kind)
}

/// Classify a raw error produced by `operation` on `model`.
pub fn classify(raw: StoreError, operation: &str, model: &str) -> Result<DataError, Defect> {
    let kind = match &raw {
        StoreError::Known(known) => kind_for_code(&known.code),
        StoreError::Unknown { .. } | StoreError::Engine { .. } | StoreError::Protocol { .. } => {
            tracing::debug!(operation, model, error = %raw, "store error is not classifiable");
            let message = format!("unclassified store error in {}.{}: {}", model, operation, raw);
            return Err(Defect::unclassified(message, raw));
        }
    };
    tracing::trace!(operation, model, %kind, "classified store error");
    Ok(DataError {
        kind,
        cause: raw,
        operation: operation.to_string(),
        model: model.to_string(),
    })
}

/// A typed failure that remembers which call produced it.
pub trait Provenance {
    fn cause(&self) -> &StoreError;
    fn operation(&self) -> &str;
    fn model(&self) -> &str;
}

impl Provenance for DataError {
    fn cause(&self) -> &StoreError {
        &self.cause
    }

    fn operation(&self) -> &str {
        &self.operation
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Strategy turning raw store errors into a typed failure.
pub trait ErrorMapper: Send + Sync + 'static {
    type Failure: Provenance + fmt::Debug + Send + 'static;

    /// Map a raw error, or reject it as a defect.
    fn map(&self, raw: StoreError, descriptor: &OperationDescriptor) -> Result<Self::Failure, Defect>;
}

/// The built-in mapper: [`classify`] with the static code table.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardMapper;

impl ErrorMapper for StandardMapper {
    type Failure = DataError;

    fn map(&self, raw: StoreError, descriptor: &OperationDescriptor) -> Result<DataError, Defect> {
        classify(raw, &descriptor.operation, &descriptor.model)
    }
}

/// Adapts a closure into an [`ErrorMapper`].
pub struct MapWith<F, T> {
    f: F,
    _failure: std::marker::PhantomData<fn() -> T>,
}

impl<F, T> MapWith<F, T>
where
    F: Fn(StoreError, &OperationDescriptor) -> Result<T, Defect> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _failure: std::marker::PhantomData,
        }
    }
}

impl<F, T> ErrorMapper for MapWith<F, T>
where
    F: Fn(StoreError, &OperationDescriptor) -> Result<T, Defect> + Send + Sync + 'static,
    T: Provenance + fmt::Debug + Send + 'static,
{
    type Failure = T;

    fn map(&self, raw: StoreError, descriptor: &OperationDescriptor) -> Result<T, Defect> {
        (self.f)(raw, descriptor)
    }
}

impl<F, T> fmt::Debug for MapWith<F, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapWith").finish_non_exhaustive()
    }
}

/// Turn a driver outcome into an [`Exit`], routing errors through `mapper`.
pub fn settle<T, M: ErrorMapper>(
    mapper: &M,
    outcome: Outcome<T, StoreError>,
    descriptor: &OperationDescriptor,
) -> Exit<T, M::Failure> {
    match outcome {
        Outcome::Ok(value) => Exit::Success(value),
        Outcome::Err(raw) => match mapper.map(raw, descriptor) {
            Ok(failure) => Exit::Failure(failure),
            Err(defect) => Exit::Defect(defect),
        },
        Outcome::Cancelled(reason) => {
            tracing::debug!(%descriptor, ?reason, "driver call cancelled");
            Exit::Defect(Defect::cancelled(format!("{descriptor} cancelled: {reason:?}")))
        }
        Outcome::Panicked(payload) => {
            Exit::Defect(Defect::panic(format!("{descriptor} panicked: {payload:?}")))
        }
    }
}
