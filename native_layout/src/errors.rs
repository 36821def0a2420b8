use crate::field_type::FieldType;
use thiserror::Error;

/// Result alias used by the layout engine.
pub type LayoutResult<T> = Result<T, LayoutError>;

/// A value does not fit the bit width of its target field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("value {value} does not fit field type {field_type}")]
pub struct OverflowError {
    pub field_type: FieldType,
    pub value: i128,
}

/// Failures of the primitive encode/decode routines.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error(transparent)]
    Overflow(#[from] OverflowError),

    /// The value's kind cannot be stored in this field type.
    #[error("cannot store {found} value in field type {field_type}")]
    TypeMismatch {
        field_type: FieldType,
        found: &'static str,
    },

    /// The memory view ends before the field does.
    #[error("field at offset {offset} needs {size} bytes but the view holds {available}")]
    ViewTooShort {
        offset: usize,
        size: usize,
        available: usize,
    },
}

/// Prototype construction and memory binding failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("duplicate field '{name}' in prototype")]
    DuplicateField { name: String },

    #[error("array field '{name}' has zero length")]
    EmptyArray { name: String },

    #[error("struct '{name}' overflowed the address space during layout")]
    SizeOverflow { name: String },

    /// A memory region is shorter than the prototype it is bound to.
    #[error("prototype requires {required} bytes but only {available} available")]
    BufferTooSmall { required: usize, available: usize },

    #[error("cannot bind a prototype to the null address")]
    NullAddress,

    #[error("allocation of {size} bytes failed")]
    AllocationFailed { size: usize },
}

/// Path resolution failures against a prototype.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("field '{path}' not found")]
    NotFound { path: String },

    /// The path ends at a struct, union or pointer instead of a value.
    #[error("field '{path}' is not a primitive value")]
    NotPrimitive { path: String },

    /// Embedded wrapping needs a struct or union field.
    #[error("field '{path}' is not a struct or union")]
    NotAggregate { path: String },

    /// Remote wrapping needs a pointer field.
    #[error("field '{path}' is not a pointer")]
    NotPointer { path: String },

    /// The path continues past a pointer; the target lives in other memory.
    #[error("field '{path}' lies behind a pointer and must be reached through a remote child")]
    Indirect { path: String },

    #[error("pointer field '{path}' is null")]
    NullPointer { path: String },

    #[error("pointer field '{path}' has no target prototype")]
    OpaquePointer { path: String },

    #[error("index {index} out of range for array '{path}' of length {len}")]
    IndexOutOfRange {
        path: String,
        index: usize,
        len: usize,
    },

    /// Two members of one union were given new values at once. They share
    /// their bytes, so at most one of them can be stored.
    #[error("union '{path}' got new values for both '{first}' and '{second}'")]
    UnionConflict {
        path: String,
        first: String,
        second: String,
    },
}

/// Failures while turning schema documents into prototypes.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("unknown type '{type_name}' for '{context}'")]
    UnknownType { type_name: String, context: String },

    /// Query types must be structs.
    #[error("type '{type_name}' of query '{query}' is not a struct")]
    IllegalQueryType { query: String, type_name: String },

    #[error("unable to resolve query index '{index}'")]
    InvalidQueryIndex { index: String },

    #[error("enum '{type_name}' has no value '{value}'")]
    UnknownEnumValue { type_name: String, value: String },

    #[error("layout of '{type_name}' failed: {source}")]
    Layout {
        type_name: String,
        #[source]
        source: LayoutError,
    },

    #[error("failed to parse JSON definitions: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to parse YAML definitions: {0}")]
    Yaml(#[from] serde_yml::Error),
}
