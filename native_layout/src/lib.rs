/* Native Layout Library
 *
 * Describes C-compatible structs as data: a catalog of primitive field
 * types, a builder that lays fields out the way a C compiler would, and a
 * loader that turns definition documents into shared prototypes.
 */

pub mod definition;
pub mod errors;
pub mod field_type;
pub mod prototype;
pub mod value;

pub use definition::{
    ControlKind, ControlMapping, DefinitionConfig, DefinitionDocument, DefinitionFormat,
    DefinitionRegistry, QueryDefinition,
};
pub use errors::{CodecError, DefinitionError, FieldError, LayoutError, LayoutResult, OverflowError};
pub use field_type::FieldType;
pub use prototype::{
    split_path, FieldDescriptor, FieldKind, ResolvedField, StructPrototype, StructPrototypeBuilder,
};
pub use value::{Address, Value};
