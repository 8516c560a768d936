//! The session capability consumed by the core.
//!
//! The transport owns the connection; the core only needs to send packets,
//! observe liveness, force a disconnect, wait for inbound packets and read or
//! update the session's auth state.

use crate::core::packet::Packet;
use crate::error::Result;
use crate::protocol::access::AuthState;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Filter for [`Session::await_packet`]
pub type PacketPredicate = Arc<dyn Fn(&Packet) -> bool + Send + Sync>;

#[async_trait]
pub trait Session: Send + Sync {
    fn id(&self) -> &str;

    /// Encode and send a local packet
    async fn send(&self, packet: Packet) -> Result<()>;

    fn is_alive(&self) -> bool;

    /// Force the connection closed
    fn disconnect(&self);

    /// Wait for the next processed inbound packet matching `predicate`.
    ///
    /// Returns `None` on timeout or when the session closes first.
    async fn await_packet(
        &self,
        predicate: PacketPredicate,
        timeout: Duration,
    ) -> Option<Arc<Packet>>;

    fn auth_state(&self) -> AuthState;

    fn set_auth_state(&self, state: AuthState);
}

/// Matches every packet
pub fn any_packet() -> PacketPredicate {
    Arc::new(|_| true)
}

/// Matches action packets with the given id
pub fn action_is(action_id: impl Into<String>) -> PacketPredicate {
    let action_id = action_id.into();
    Arc::new(move |packet| packet.action_id() == Some(action_id.as_str()))
}
