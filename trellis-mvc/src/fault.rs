// Binding and dispatch failures

use crate::invoker::DispatchState;
use crate::source::SourceConflict;
use thiserror::Error;
use trellis_core::Error;

/// Why a parameter could not be given a value
#[derive(Error, Debug)]
pub enum BindingError {
    #[error("parameter '{parameter}': {conflict}")]
    SourceConflict {
        parameter: String,
        conflict: SourceConflict,
    },

    #[error("parameter '{parameter}' could not be converted to {type_name}: {cause}")]
    Coercion {
        parameter: String,
        type_name: &'static str,
        cause: String,
    },

    #[error("parameter '{parameter}' of type {type_name} has no value, default or registered service")]
    Unresolvable {
        parameter: String,
        type_name: &'static str,
    },

    #[error("parameter '{parameter}': {source}")]
    Source {
        parameter: String,
        #[source]
        source: Error,
    },

    #[error("action returned no result")]
    NullResult,
}

impl From<BindingError> for Error {
    fn from(err: BindingError) -> Self {
        match err {
            // cancellation keeps its identity so callers can tell it apart
            BindingError::Source { source, .. } if source.is_cancelled() => source,
            other => Error::Binding(other.to_string()),
        }
    }
}

/// A dispatch that ended in the faulted state
#[derive(Error, Debug)]
#[error("dispatch faulted while {phase:?}: {error}")]
pub struct DispatchFault {
    /// State the dispatch was in when it failed
    pub phase: DispatchState,
    #[source]
    pub error: Error,
}

impl DispatchFault {
    pub fn new(phase: DispatchState, error: impl Into<Error>) -> Self {
        Self {
            phase,
            error: error.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.error.is_cancelled()
    }
}
