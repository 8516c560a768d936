//! # Protocol Router
//!
//! Entry point of the core: turns raw inbound bytes into packets and local
//! packets into outbound bytes.
//!
//! Handlers are consulted in order. The first one whose `can_handle` accepts the
//! decoded document materialises the packet. Documents nobody claims are kept
//! as [`Packet::Unrecognized`] so the transport can still inspect them.

use crate::core::envelope::{decode_document, encode_document, Envelope};
use crate::core::packet::{Packet, RawPacket};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::registry::ActionRegistry;
use crate::protocol::session::Session;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, trace};

/// A strategy that can materialise inbound documents and encode outbound packets
#[async_trait]
pub trait PacketHandler: Send + Sync {
    fn can_handle(&self, document: &Value) -> bool;

    fn can_transform(&self, packet: &Packet) -> bool;

    async fn handle(&self, session: Arc<dyn Session>, document: Value) -> Result<Packet>;

    async fn transform(&self, packet: Packet) -> Result<Value>;
}

#[async_trait]
impl PacketHandler for ActionRegistry {
    /// Claims any document that names an action
    fn can_handle(&self, document: &Value) -> bool {
        document.get("action").is_some_and(|a| !a.is_null())
    }

    fn can_transform(&self, packet: &Packet) -> bool {
        matches!(packet, Packet::Action(_))
    }

    async fn handle(&self, session: Arc<dyn Session>, document: Value) -> Result<Packet> {
        let envelope = Envelope::from_document(document)?;
        self.dispatch(session, envelope).await.map(Packet::Action)
    }

    async fn transform(&self, packet: Packet) -> Result<Value> {
        match packet {
            Packet::Action(instance) => self.encode(instance).await,
            Packet::Unrecognized(raw) => Ok(raw.into_data()),
        }
    }
}

pub struct ProtocolRouter {
    registry: ActionRegistry,
    handlers: Vec<Arc<dyn PacketHandler>>,
}

impl ProtocolRouter {
    pub fn new(registry: ActionRegistry) -> Self {
        let handlers: Vec<Arc<dyn PacketHandler>> = vec![Arc::new(registry.clone())];
        Self { registry, handlers }
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    /// Append a handler consulted after the ones already installed
    pub fn push_handler(&mut self, handler: Arc<dyn PacketHandler>) {
        self.handlers.push(handler);
    }

    /// Decode one raw inbound message and process it.
    ///
    /// Decode failures, unregistered actions and rejected authorization are
    /// returned as errors; field and behavior failures are recorded on the
    /// returned packet instead.
    pub async fn handle_packet(&self, session: Arc<dyn Session>, raw: &[u8]) -> Result<Packet> {
        let document = decode_document(raw)?;

        match self.handlers.iter().find(|h| h.can_handle(&document)) {
            Some(handler) => handler.handle(session, document).await,
            None => {
                trace!(session = %session.id(), "No handler claimed document");
                Ok(Packet::Unrecognized(RawPacket::remote(document)))
            }
        }
    }

    /// Encode a local packet for the transport. Remote packets are refused.
    pub async fn prepare_packet(&self, packet: Packet) -> Result<Vec<u8>> {
        if packet.is_remote() {
            let action = packet.action_id().unwrap_or(constants::UNRECOGNIZED_PACKET);
            return Err(ProtocolError::RemotePacket(action.to_string()));
        }

        let document = match self.handlers.iter().find(|h| h.can_transform(&packet)) {
            Some(handler) => handler.transform(packet).await?,
            None => {
                debug!("No handler transforms packet, sending raw data");
                match packet {
                    Packet::Unrecognized(raw) => raw.into_data(),
                    Packet::Action(instance) => self.registry.encode(instance).await?,
                }
            }
        };
        encode_document(&document)
    }
}
