//! File transfer actions.
//!
//! | action | direction | handled by |
//! |---|---|---|
//! | `file_transfer.request.meta` | sender → receiver | [`FileTransferService::receive_file`] |
//! | `file_transfer.request.status` | receiver → sender | [`FileTransferService::handle_request`] |
//! | `file_transfer.response.status` | sender → receiver | [`FileTransferService::handle_response`] |
//!
//! `file_transfer.response.meta` is accepted and ignored. All of them require
//! an authorized user.

use crate::core::packet::PacketInstance;
use crate::error::{ProtocolError, Result};
use crate::protocol::access::AccessLevel;
use crate::protocol::descriptor::{ActionBehavior, ActionDescriptor, ActionDescriptorBuilder, NoReply};
use crate::service::file_transfer::{FileTransferService, IncomingTransfer};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

pub const META_REQUEST: &str = "file_transfer.request.meta";
pub const META_RESPONSE: &str = "file_transfer.response.meta";
pub const STATUS_REQUEST: &str = "file_transfer.request.status";
pub const STATUS_RESPONSE: &str = "file_transfer.response.status";

pub const UUID: &str = "uuid";
pub const NAME: &str = "name";
pub const SIZE: &str = "size";
pub const HASH: &str = "hash";
pub const STATUS: &str = "status";
pub const EVENT: &str = "event";
pub const DATA: &str = "data";

/// Event carried by the status actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEvent {
    Start,
    Next,
    Complete,
    Error,
}

impl TransferEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            TransferEvent::Start => "transmit.start",
            TransferEvent::Next => "transmit.next",
            TransferEvent::Complete => "transmit.complete",
            TransferEvent::Error => "transmit.error",
        }
    }

    pub fn parse(event: &str) -> Result<Self> {
        match event {
            "transmit.start" => Ok(TransferEvent::Start),
            "transmit.next" => Ok(TransferEvent::Next),
            "transmit.complete" => Ok(TransferEvent::Complete),
            "transmit.error" => Ok(TransferEvent::Error),
            other => Err(ProtocolError::InvalidTransferEvent(other.to_string())),
        }
    }
}

/// Build a status packet on the session of `origin`
pub fn event_packet(
    origin: &PacketInstance,
    action_id: &str,
    uuid: &str,
    event: TransferEvent,
    data: Value,
) -> Result<PacketInstance> {
    let mut packet = origin.reply(action_id)?;
    packet
        .set_field(UUID, json!(uuid))?
        .set_field(STATUS, json!(event != TransferEvent::Error))?
        .set_field(EVENT, json!(event.as_str()))?
        .set_field(DATA, data)?;
    Ok(packet)
}

/// Data member of a `transmit.error` event
pub fn error_data(reason: &str) -> Value {
    json!({ "error": reason })
}

struct MetaRequest {
    service: Arc<FileTransferService>,
    incoming: Option<UnboundedSender<IncomingTransfer>>,
}

#[async_trait]
impl ActionBehavior for MetaRequest {
    async fn on_success(&self, packet: &mut PacketInstance) -> Result<Option<PacketInstance>> {
        let incoming = self.service.receive_file(packet).await?;

        match &self.incoming {
            Some(tx) => {
                if let Err(unsent) = tx.send(incoming) {
                    debug!(uuid = %unsent.0.info.uuid, "Transfer listener gone, watching transfer locally");
                    spawn_outcome_logger(unsent.0);
                }
            }
            None => spawn_outcome_logger(incoming),
        }
        Ok(None)
    }

    /// Tell the sender to drop its stream when the announcement is unusable
    async fn on_failure(&self, packet: &mut PacketInstance) -> Result<Option<PacketInstance>> {
        let Some(uuid) = packet.str_field(UUID)?.map(str::to_string) else {
            return Ok(None);
        };
        let reason = packet
            .errors()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        warn!(uuid = %uuid, reason = %reason, "Rejected transfer announcement");
        event_packet(packet, STATUS_REQUEST, &uuid, TransferEvent::Error, error_data(&reason)).map(Some)
    }
}

fn spawn_outcome_logger(incoming: IncomingTransfer) {
    tokio::spawn(async move {
        let IncomingTransfer { info, completion } = incoming;
        match completion.await {
            Ok(()) => info!(uuid = %info.uuid, name = %info.name, size = info.size, "File received"),
            Err(e) => warn!(uuid = %info.uuid, name = %info.name, error = %e, "File transfer failed"),
        }
    });
}

/// Receiver-driven events, handled on the sending side
struct StatusRequest {
    service: Arc<FileTransferService>,
}

#[async_trait]
impl ActionBehavior for StatusRequest {
    async fn on_success(&self, packet: &mut PacketInstance) -> Result<Option<PacketInstance>> {
        self.service.handle_request(packet).await
    }

    async fn on_failure(&self, packet: &mut PacketInstance) -> Result<Option<PacketInstance>> {
        debug!(errors = packet.errors().len(), "Dropped invalid transfer request event");
        Ok(None)
    }
}

/// Sender events, handled on the receiving side
struct StatusResponse {
    service: Arc<FileTransferService>,
}

#[async_trait]
impl ActionBehavior for StatusResponse {
    async fn on_success(&self, packet: &mut PacketInstance) -> Result<Option<PacketInstance>> {
        self.service.handle_response(packet).await
    }

    async fn on_failure(&self, packet: &mut PacketInstance) -> Result<Option<PacketInstance>> {
        debug!(errors = packet.errors().len(), "Dropped invalid transfer response event");
        Ok(None)
    }
}

fn meta(action_id: &'static str) -> ActionDescriptorBuilder {
    ActionDescriptor::builder(action_id)
        .access(AccessLevel::AuthorizedUser)
        .field(UUID, "required|string")
        .field(NAME, "required|string")
        .field(SIZE, "required|string")
        .field(HASH, "required|string")
}

fn status(action_id: &'static str) -> ActionDescriptorBuilder {
    ActionDescriptor::builder(action_id)
        .access(AccessLevel::AuthorizedUser)
        .field(UUID, "required|string")
        .field(STATUS, "nullable|boolean")
        .field(EVENT, "required|string")
        .field(DATA, "nullable|object")
}

/// Descriptors wiring the transfer actions to `service`.
///
/// Accepted inbound transfers are handed to `incoming` when given; otherwise
/// their outcome is only logged.
pub fn descriptors(
    service: Arc<FileTransferService>,
    incoming: Option<UnboundedSender<IncomingTransfer>>,
) -> Result<Vec<ActionDescriptor>> {
    Ok(vec![
        meta(META_REQUEST)
            .behavior(MetaRequest {
                service: Arc::clone(&service),
                incoming,
            })
            .build()?,
        meta(META_RESPONSE).behavior(NoReply).build()?,
        status(STATUS_REQUEST)
            .behavior(StatusRequest {
                service: Arc::clone(&service),
            })
            .build()?,
        status(STATUS_RESPONSE)
            .behavior(StatusResponse { service })
            .build()?,
    ])
}
