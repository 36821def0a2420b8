/* The seam to whatever moves parameter blocks across the native boundary */

use crate::errors::EndpointError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which family of native call a query goes through.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ParamKind {
    #[default]
    Parameter,
    Config,
}

/// Moves a query's bytes in and out of a native component.
///
/// Implementations should honor `timeout` where they can; the chain checks
/// the elapsed time afterwards either way.
pub trait NativeEndpoint: Send + Sync {
    /// Fills `buf` with the current contents of query `index`.
    fn pull(
        &self,
        index: u32,
        kind: ParamKind,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<(), EndpointError>;

    /// Sends `buf` as the new contents of query `index`.
    fn push(
        &self,
        index: u32,
        kind: ParamKind,
        buf: &[u8],
        timeout: Option<Duration>,
    ) -> Result<(), EndpointError>;
}
