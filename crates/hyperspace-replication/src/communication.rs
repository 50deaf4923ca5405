//! The transport seam.
//!
//! The network layer (connection management, framing on the socket,
//! receive threads) is an external collaborator. The engine only needs
//! to hand a message to a neighbor or a client; a `false` return means
//! the send was dropped; the retransmitter repairs chain traffic, and
//! clients time out end-to-end.

use hyperspace_types::{ConfigEpoch, ServerId, VirtualServerId};
use hyperspace_wire::Message;

/// Outbound message sink. Implementations must be thread-safe; sends may
/// block on flow control.
pub trait Communication: Send + Sync {
    /// Sends a server-to-server message on behalf of virtual server
    /// `from`.
    fn send(
        &self,
        from: VirtualServerId,
        to: VirtualServerId,
        epoch: ConfigEpoch,
        message: Message,
    ) -> bool;

    /// Sends a response from virtual server `from` to a client.
    fn send_client(&self, from: VirtualServerId, client: ServerId, message: Message) -> bool;
}
