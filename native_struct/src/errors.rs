use native_layout::{CodecError, FieldError, LayoutError, OverflowError};
use thiserror::Error;

/// Result alias used by bound struct operations.
pub type StructResult<T> = Result<T, StructError>;

/// An owning instance was touched after `close()`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("struct '{prototype}' used after close")]
pub struct UseAfterCloseError {
    pub prototype: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructError {
    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error(transparent)]
    Field(#[from] FieldError),

    #[error(transparent)]
    Overflow(#[from] OverflowError),

    /// Encoding failed for a reason other than range, e.g. an address
    /// written into an integer field.
    #[error("field '{path}': {source}")]
    Codec {
        path: String,
        #[source]
        source: CodecError,
    },

    #[error(transparent)]
    UseAfterClose(#[from] UseAfterCloseError),
}

impl StructError {
    /* Keeps overflow errors intact and attaches the path to the rest */
    pub(crate) fn codec(path: &str, err: CodecError) -> Self {
        match err {
            CodecError::Overflow(overflow) => StructError::Overflow(overflow),
            source => StructError::Codec {
                path: path.to_string(),
                source,
            },
        }
    }
}
