//! Errors delivered to observation error handlers.

use std::any::Any;

use thiserror::Error;
use vigil_core::Error as DatabaseError;

/// The stage of an observation that failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObservationErrorKind {
    /// The observed region could not be computed when the observation started.
    Region,
    /// The fetch failed.
    Fetch,
    /// Turning fetched data into a value failed.
    Reduce,
}

impl core::fmt::Display for ObservationErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            ObservationErrorKind::Region => "region",
            ObservationErrorKind::Fetch => "fetch",
            ObservationErrorKind::Reduce => "reduce",
        })
    }
}

/// A terminal observation failure.
///
/// An observation reports at most one error, after which it delivers
/// nothing.
#[derive(Error, Debug)]
#[error("observation {kind} failed: {source}")]
pub struct ObservationError {
    kind: ObservationErrorKind,
    source: DatabaseError,
}

impl ObservationError {
    pub fn new(kind: ObservationErrorKind, source: DatabaseError) -> Self {
        Self { kind, source }
    }

    pub fn region(source: DatabaseError) -> Self {
        Self::new(ObservationErrorKind::Region, source)
    }

    pub fn fetch(source: DatabaseError) -> Self {
        Self::new(ObservationErrorKind::Fetch, source)
    }

    pub fn reduce(source: DatabaseError) -> Self {
        Self::new(ObservationErrorKind::Reduce, source)
    }

    /// Returns the failed stage.
    pub fn kind(&self) -> ObservationErrorKind {
        self.kind
    }

    /// Returns the underlying database or application error.
    pub fn database_error(&self) -> &DatabaseError {
        &self.source
    }

    pub fn into_database_error(self) -> DatabaseError {
        self.source
    }
}

/// A reducer panicked while fetching or reducing.
///
/// Reported as the custom source of an [`ObservationError`].
#[derive(Error, Debug)]
#[error("reducer panicked: {message}")]
pub struct ReducerPanic {
    message: String,
}

impl ReducerPanic {
    pub(crate) fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&str>() {
            message.to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self { message }
    }

    /// Returns the panic message.
    pub fn message(&self) -> &str {
        &self.message
    }
}
