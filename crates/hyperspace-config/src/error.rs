//! Configuration validation errors.

use hyperspace_types::{RegionId, SpaceId, VirtualServerId};
use thiserror::Error;

/// Errors detected while adopting a coordinator snapshot. A snapshot
/// that fails validation is rejected wholesale; the daemon keeps serving
/// the previous epoch.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("space {space} hashes on unknown attribute {attr}")]
    UnknownAttribute { space: SpaceId, attr: u16 },

    #[error("region {region} rectangle does not match its subspace's attribute count")]
    BadRectangle { region: RegionId },

    #[error("region {region} has an empty replica chain")]
    EmptyChain { region: RegionId },

    #[error("region {region} appears more than once")]
    DuplicateRegion { region: RegionId },

    #[error("virtual server {vsi} appears in more than one chain")]
    DuplicateVirtualServer { vsi: VirtualServerId },

    #[error("virtual server {vsi} is not assigned to any server")]
    UnassignedVirtualServer { vsi: VirtualServerId },
}
