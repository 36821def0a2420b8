use native_layout::{CodecError, FieldError, LayoutError, OverflowError};
use native_struct::{StructError, UseAfterCloseError};
use std::time::Duration;
use thiserror::Error;

/// Result alias used by accessor chains.
pub type AccessResult<T> = Result<T, AccessError>;

/// Failure reported by a native endpoint implementation.
pub type EndpointError = Box<dyn std::error::Error + Send + Sync>;

/// A push or pull took longer than the chain allowed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("query '{query}' took {elapsed:?}, exceeding its {timeout:?} timeout")]
pub struct TimeoutError {
    pub query: String,
    pub timeout: Duration,
    pub elapsed: Duration,
}

/// Errors produced while executing an accessor chain. Struct-level failures
/// are flattened so overflow and field errors arrive unchanged.
#[derive(Debug, Error)]
pub enum AccessError {
    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error(transparent)]
    Field(#[from] FieldError),

    #[error(transparent)]
    Overflow(#[from] OverflowError),

    #[error("field '{path}': {source}")]
    Codec {
        path: String,
        #[source]
        source: CodecError,
    },

    #[error(transparent)]
    UseAfterClose(#[from] UseAfterCloseError),

    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    /// A child lies behind a pointer and the control was not opted into
    /// dereferencing pointers.
    #[error("child '{path}' is behind a pointer and remote children are disabled")]
    RemoteDisabled { path: String },

    /// The scope's value cannot be stored into its field.
    #[error("cannot commit a {found} value to '{path}'")]
    Uncommittable { path: String, found: &'static str },

    /// `increase`/`decrease` reached a value that is not an integer.
    #[error("cannot step the {found} value of '{path}'")]
    NotNumeric { path: String, found: &'static str },

    #[error("operation '{op}' needs a native endpoint but control '{control}' has none")]
    NoEndpoint { control: String, op: &'static str },

    #[error("endpoint failed for query '{query}': {source}")]
    Endpoint {
        query: String,
        #[source]
        source: EndpointError,
    },
}

impl From<StructError> for AccessError {
    fn from(err: StructError) -> Self {
        match err {
            StructError::Layout(e) => AccessError::Layout(e),
            StructError::Field(e) => AccessError::Field(e),
            StructError::Overflow(e) => AccessError::Overflow(e),
            StructError::Codec { path, source } => AccessError::Codec { path, source },
            StructError::UseAfterClose(e) => AccessError::UseAfterClose(e),
        }
    }
}
