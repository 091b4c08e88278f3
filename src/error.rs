//! Error types for Resona
//!
//! Every fallible operation in the runtime returns one of a closed set of
//! result kinds. Callers should treat variants they do not recognize as a
//! generic failure.

use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResonaError {
    /// A null, empty, or out-of-range argument.
    #[error("parameter invalid")]
    ParameterInvalid,

    /// The operation was issued in the wrong lifecycle or interface state.
    #[error("preconditions violated")]
    PreconditionsViolated,

    /// An allocation or fixed-pool slot could not be obtained.
    #[error("memory failure")]
    MemoryFailure,

    /// A bounded resource (instance table, worker pool) is exhausted.
    #[error("resource error")]
    ResourceError,

    #[error("I/O error")]
    Io,

    /// The buffer queue is full; the caller's buffer was not retained.
    #[error("buffer insufficient")]
    BufferInsufficient,

    /// The content format is recognized but not supported.
    #[error("content unsupported")]
    ContentUnsupported,

    #[error("content not found")]
    ContentNotFound,

    #[error("content corrupted")]
    ContentCorrupted,

    #[error("permission denied")]
    PermissionDenied,

    /// The capability is not registered for this class, or is not exposed.
    #[error("feature unsupported")]
    FeatureUnsupported,

    #[error("internal error")]
    InternalError,

    /// An asynchronous operation was aborted before it ran.
    #[error("operation aborted")]
    OperationAborted,

    #[error("control lost")]
    ControlLost,
}

pub type Result<T> = std::result::Result<T, ResonaError>;
