//! The three-way result of running a computation.
//!
//! Every data operation, transaction and scoped client in sqlscope resolves to
//! an [`Exit`]:
//!
//! - [`Exit::Success`] - the computation produced a value
//! - [`Exit::Failure`] - a typed, recoverable failure callers are expected to match on
//! - [`Exit::Defect`] - an unrecoverable failure (panic, interruption, unclassified
//!   store error) that bypasses the typed channel
//!
//! Drivers speak asupersync's four-valued [`Outcome`]; converting one into an
//! `Exit` folds `Cancelled` and `Panicked` into defects.

use asupersync::Outcome;
use std::any::Any;
use std::fmt;

/// Result of running a computation: success, typed failure, or defect.
#[derive(Debug)]
pub enum Exit<V, F> {
    /// The computation succeeded.
    Success(V),
    /// The computation failed with a typed, recoverable failure.
    Failure(F),
    /// The computation failed in a way callers are not meant to recover from.
    Defect(Defect),
}

/// Which variant an [`Exit`] holds, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Failure,
    Defect,
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Success => write!(f, "success"),
            ExitStatus::Failure => write!(f, "failure"),
            ExitStatus::Defect => write!(f, "defect"),
        }
    }
}

impl<V, F> Exit<V, F> {
    /// Get the variant of this exit.
    pub const fn status(&self) -> ExitStatus {
        match self {
            Exit::Success(_) => ExitStatus::Success,
            Exit::Failure(_) => ExitStatus::Failure,
            Exit::Defect(_) => ExitStatus::Defect,
        }
    }

    pub const fn is_success(&self) -> bool {
        matches!(self, Exit::Success(_))
    }

    pub const fn is_failure(&self) -> bool {
        matches!(self, Exit::Failure(_))
    }

    pub const fn is_defect(&self) -> bool {
        matches!(self, Exit::Defect(_))
    }

    /// The success value, if any.
    pub fn success(self) -> Option<V> {
        match self {
            Exit::Success(v) => Some(v),
            Exit::Failure(_) | Exit::Defect(_) => None,
        }
    }

    /// The typed failure, if any.
    pub fn failure(self) -> Option<F> {
        match self {
            Exit::Failure(f) => Some(f),
            Exit::Success(_) | Exit::Defect(_) => None,
        }
    }

    /// The defect, if any.
    pub fn defect(self) -> Option<Defect> {
        match self {
            Exit::Defect(d) => Some(d),
            Exit::Success(_) | Exit::Failure(_) => None,
        }
    }

    /// Borrow the typed failure, if any.
    pub fn failure_ref(&self) -> Option<&F> {
        match self {
            Exit::Failure(f) => Some(f),
            Exit::Success(_) | Exit::Defect(_) => None,
        }
    }

    /// Transform the success value.
    pub fn map<U>(self, f: impl FnOnce(V) -> U) -> Exit<U, F> {
        match self {
            Exit::Success(v) => Exit::Success(f(v)),
            Exit::Failure(e) => Exit::Failure(e),
            Exit::Defect(d) => Exit::Defect(d),
        }
    }

    /// Transform the typed failure. Defects pass through untouched.
    pub fn map_failure<G>(self, f: impl FnOnce(F) -> G) -> Exit<V, G> {
        match self {
            Exit::Success(v) => Exit::Success(v),
            Exit::Failure(e) => Exit::Failure(f(e)),
            Exit::Defect(d) => Exit::Defect(d),
        }
    }

    /// Chain a computation on the success value.
    pub fn and_then<U>(self, f: impl FnOnce(V) -> Exit<U, F>) -> Exit<U, F> {
        match self {
            Exit::Success(v) => f(v),
            Exit::Failure(e) => Exit::Failure(e),
            Exit::Defect(d) => Exit::Defect(d),
        }
    }

    /// Recover from a typed failure.
    ///
    /// Defects are never handed to `f`: there is no way to catch a defect
    /// through the typed channel.
    pub fn catch_failure<G>(self, f: impl FnOnce(F) -> Exit<V, G>) -> Exit<V, G> {
        match self {
            Exit::Success(v) => Exit::Success(v),
            Exit::Failure(e) => f(e),
            Exit::Defect(d) => Exit::Defect(d),
        }
    }

    /// Convert into a `Result`, keeping failures and defects apart.
    pub fn into_result(self) -> Result<V, ExitError<F>> {
        match self {
            Exit::Success(v) => Ok(v),
            Exit::Failure(e) => Err(ExitError::Failure(e)),
            Exit::Defect(d) => Err(ExitError::Defect(d)),
        }
    }
}

impl<V, F> From<Outcome<V, F>> for Exit<V, F> {
    fn from(outcome: Outcome<V, F>) -> Self {
        match outcome {
            Outcome::Ok(v) => Exit::Success(v),
            Outcome::Err(e) => Exit::Failure(e),
            Outcome::Cancelled(reason) => Exit::Defect(Defect::cancelled(format!("{reason:?}"))),
            Outcome::Panicked(payload) => Exit::Defect(Defect::panic(format!("{payload:?}"))),
        }
    }
}

/// Error half of [`Exit::into_result`].
#[derive(Debug)]
pub enum ExitError<F> {
    Failure(F),
    Defect(Defect),
}

impl<F: fmt::Display> fmt::Display for ExitError<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitError::Failure(e) => write!(f, "{e}"),
            ExitError::Defect(d) => write!(f, "{d}"),
        }
    }
}

impl<F: std::error::Error + 'static> std::error::Error for ExitError<F> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExitError::Failure(e) => Some(e),
            ExitError::Defect(d) => Some(d),
        }
    }
}

/// Unwrap the success value of an [`Exit`] or return early with its failure or defect.
///
/// The failure is returned as-is, so the enclosing function must use the same
/// failure type.
#[macro_export]
macro_rules! try_exit {
    ($e:expr) => {
        match $e {
            $crate::Exit::Success(value) => value,
            $crate::Exit::Failure(failure) => return $crate::Exit::Failure(failure),
            $crate::Exit::Defect(defect) => return $crate::Exit::Defect(defect),
        }
    };
}

/// What kind of unrecoverable failure a [`Defect`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefectKind {
    /// A panic caught while running a computation
    Panic,
    /// The scope was interrupted through its `InterruptHandle`
    Interrupted,
    /// The asupersync context or a driver reported cancellation
    Cancelled,
    /// A store error that is not a recognized error shape
    Unclassified,
    /// The computation explicitly aborted
    Die,
}

impl fmt::Display for DefectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DefectKind::Panic => "panic",
            DefectKind::Interrupted => "interrupted",
            DefectKind::Cancelled => "cancelled",
            DefectKind::Unclassified => "unclassified",
            DefectKind::Die => "die",
        };
        f.write_str(name)
    }
}

/// An unrecoverable failure.
///
/// Defects are not meant to be pattern-matched by callers. They always force
/// the owning transaction to roll back, and the classifier never turns one
/// into a typed failure.
#[derive(Debug)]
pub struct Defect {
    kind: DefectKind,
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
    suppressed: Vec<String>,
}

impl Defect {
    pub fn new(kind: DefectKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
            suppressed: Vec::new(),
        }
    }

    /// Explicitly abort a computation.
    pub fn die(message: impl Into<String>) -> Self {
        Self::new(DefectKind::Die, message)
    }

    pub fn panic(message: impl Into<String>) -> Self {
        Self::new(DefectKind::Panic, message)
    }

    pub fn interrupted(reason: impl Into<String>) -> Self {
        Self::new(DefectKind::Interrupted, reason)
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::new(DefectKind::Cancelled, reason)
    }

    /// A failure that did not match any recognized error shape.
    pub fn unclassified(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::new(DefectKind::Unclassified, message).with_source(source)
    }

    /// Build a defect from a caught panic payload.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic with non-string payload".to_string()
        };
        Self::panic(message)
    }

    /// Attach the underlying error.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub const fn kind(&self) -> DefectKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Secondary failures that happened while this defect was propagating
    /// (for example a rollback that also failed).
    pub fn suppressed(&self) -> &[String] {
        &self.suppressed
    }

    pub fn push_suppressed(&mut self, failure: impl Into<String>) {
        self.suppressed.push(failure.into());
    }
}

impl fmt::Display for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "defect ({}): {}", self.kind, self.message)?;
        if !self.suppressed.is_empty() {
            write!(f, " [suppressed: {}]", self.suppressed.join("; "))?;
        }
        Ok(())
    }
}

impl std::error::Error for Defect {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|err| err as &(dyn std::error::Error + 'static))
    }
}
