//! In-process loopback session.
//!
//! Outbound packets land on a channel the host drains; inbound packets are
//! injected with [`MemorySession::deliver`]. [`spawn_link`] connects two
//! endpoints through their routers so a full exchange runs without a socket.

use crate::core::packet::Packet;
use crate::error::{ProtocolError, Result};
use crate::protocol::access::AuthState;
use crate::protocol::router::ProtocolRouter;
use crate::protocol::session::{PacketPredicate, Session};
use crate::transport::inbox::PacketInbox;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub struct MemorySession {
    id: String,
    outbound: mpsc::UnboundedSender<Packet>,
    inbox: PacketInbox,
    disconnects: AtomicUsize,
    auth: RwLock<AuthState>,
}

impl MemorySession {
    /// New live session and the receiver of everything it sends
    pub fn new(id: impl Into<String>) -> (Arc<Self>, mpsc::UnboundedReceiver<Packet>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let session = Arc::new(Self {
            id: id.into(),
            outbound,
            inbox: PacketInbox::new(),
            disconnects: AtomicUsize::new(0),
            auth: RwLock::new(AuthState::guest()),
        });
        (session, rx)
    }

    /// Same as [`MemorySession::new`], already authorized
    pub fn authorized(
        id: impl Into<String>,
        state: AuthState,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Packet>) {
        let (session, rx) = Self::new(id);
        session.set_auth_state(state);
        (session, rx)
    }

    /// Make a processed inbound packet visible to `await_packet` waiters
    pub fn deliver(&self, packet: Packet) {
        self.inbox.publish(packet);
    }

    /// How many times `disconnect` was called
    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Session for MemorySession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send(&self, packet: Packet) -> Result<()> {
        if packet.is_remote() {
            let action = packet.action_id().unwrap_or_default().to_string();
            return Err(ProtocolError::RemotePacket(action));
        }
        if self.inbox.is_closed() {
            return Err(ProtocolError::ConnectionClosed);
        }
        self.outbound
            .send(packet)
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    fn is_alive(&self) -> bool {
        !self.inbox.is_closed()
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        if self.inbox.close() {
            debug!(session = %self.id, "Memory session disconnected");
        }
    }

    async fn await_packet(
        &self,
        predicate: PacketPredicate,
        timeout: Duration,
    ) -> Option<Arc<Packet>> {
        self.inbox.wait(predicate, timeout).await
    }

    fn auth_state(&self) -> AuthState {
        self.auth
            .read()
            .map(|state| state.clone())
            .unwrap_or_default()
    }

    fn set_auth_state(&self, state: AuthState) {
        if let Ok(mut auth) = self.auth.write() {
            *auth = state;
        }
    }
}

/// Forward everything `outbound` yields from one endpoint into another.
///
/// Packets are encoded by `from`, passed through `map` as raw bytes, then
/// handled by `to` on behalf of `session` and delivered to its waiters.
pub fn spawn_link_with<F>(
    from: Arc<ProtocolRouter>,
    mut outbound: mpsc::UnboundedReceiver<Packet>,
    to: Arc<ProtocolRouter>,
    session: Arc<MemorySession>,
    mut map: F,
) -> JoinHandle<()>
where
    F: FnMut(Vec<u8>) -> Vec<u8> + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(packet) = outbound.recv().await {
            let bytes = match from.prepare_packet(packet).await {
                Ok(bytes) => map(bytes),
                Err(e) => {
                    warn!(error = %e, "Failed to encode outbound packet");
                    continue;
                }
            };
            let target: Arc<dyn Session> = session.clone();
            match to.handle_packet(target, &bytes).await {
                Ok(packet) => session.deliver(packet),
                Err(e) => debug!(session = %session.id(), error = %e, "Inbound packet rejected"),
            }
        }
    })
}

/// [`spawn_link_with`] without rewriting
pub fn spawn_link(
    from: Arc<ProtocolRouter>,
    outbound: mpsc::UnboundedReceiver<Packet>,
    to: Arc<ProtocolRouter>,
    session: Arc<MemorySession>,
) -> JoinHandle<()> {
    spawn_link_with(from, outbound, to, session, |bytes| bytes)
}
