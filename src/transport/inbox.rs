//! Fan-out of processed inbound packets to `await_packet` waiters.

use crate::core::packet::Packet;
use crate::protocol::session::PacketPredicate;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};

const INBOX_CAPACITY: usize = 64;

/// Inbound packet broadcast plus the session's closed flag
pub struct PacketInbox {
    packets: broadcast::Sender<Arc<Packet>>,
    closed: watch::Sender<bool>,
}

impl Default for PacketInbox {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketInbox {
    pub fn new() -> Self {
        let (packets, _) = broadcast::channel(INBOX_CAPACITY);
        let (closed, _) = watch::channel(false);
        Self { packets, closed }
    }

    /// Hand a processed packet to current waiters; nobody waiting is fine
    pub fn publish(&self, packet: Packet) {
        let _ = self.packets.send(Arc::new(packet));
    }

    /// Mark closed. Returns true only for the call that closed it.
    pub fn close(&self) -> bool {
        !self.closed.send_replace(true)
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the inbox is closed
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Next published packet matching `predicate`, or `None` on timeout or close
    pub async fn wait(&self, predicate: PacketPredicate, timeout: Duration) -> Option<Arc<Packet>> {
        let mut packets = self.packets.subscribe();
        let mut closed = self.closed.subscribe();

        let wait = async {
            loop {
                tokio::select! {
                    received = packets.recv() => match received {
                        Ok(packet) if predicate(&packet) => return Some(packet),
                        Ok(_) | Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => return None,
                    },
                    _ = closed.wait_for(|closed| *closed) => return None,
                }
            }
        };

        tokio::time::timeout(timeout, wait).await.ok().flatten()
    }
}
