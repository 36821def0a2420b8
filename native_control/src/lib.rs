/* Native Control Library
 *
 * Query controls bind a struct prototype to named controls and a native
 * endpoint. Accessor chains describe reads and writes fluently and run them
 * in order against one bound instance when `call()` is invoked.
 */

pub mod accessor;
pub mod config;
pub mod control;
pub mod endpoint;
pub mod errors;
pub mod state;

pub use accessor::{Accessor, Nested, Root};
pub use config::ControlConfig;
pub use control::{ControlNode, ControlTree, QueryControl};
pub use endpoint::{NativeEndpoint, ParamKind};
pub use errors::{AccessError, AccessResult, EndpointError, TimeoutError};
pub use state::AccessorState;
