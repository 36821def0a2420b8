/* Native Struct Library
 *
 * Binds struct prototypes to memory, either a zeroed buffer owned by the
 * instance or a foreign address supplied by the caller, and exposes typed
 * field access by name or path. Nested structs are reached as embedded
 * children sharing the parent's memory; pointer fields are followed into
 * remote children bound to a separate region.
 */

pub mod bound;
pub mod errors;
mod memory;

pub use bound::BoundStruct;
pub use errors::{StructError, StructResult, UseAfterCloseError};
