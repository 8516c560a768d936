//! `updater.request` / `updater.response`.
//!
//! The core only carries the exchange. Running the update is delegated to the
//! host's [`UpdateHandler`].

use crate::core::packet::PacketInstance;
use crate::error::Result;
use crate::protocol::access::AccessLevel;
use crate::protocol::descriptor::{ActionBehavior, ActionDescriptor, NoReply};
use crate::protocol::session::Session;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

pub const UPDATER_REQUEST: &str = "updater.request";
pub const UPDATER_RESPONSE: &str = "updater.response";
pub const STATUS: &str = "status";
pub const MESSAGE: &str = "message";

const UPDATES_UNSUPPORTED: &str = "Updates are not supported by this endpoint";

/// Host hook invoked when a peer asks this side to prepare an update
#[async_trait]
pub trait UpdateHandler: Send + Sync {
    /// Returns an optional message for the peer; an error reports failure
    async fn request_update(&self, session: &Arc<dyn Session>) -> Result<Option<String>>;
}

struct UpdaterRequest {
    handler: Option<Arc<dyn UpdateHandler>>,
}

#[async_trait]
impl ActionBehavior for UpdaterRequest {
    async fn on_success(&self, packet: &mut PacketInstance) -> Result<Option<PacketInstance>> {
        let (status, message) = match &self.handler {
            Some(handler) => match handler.request_update(packet.session()).await {
                Ok(message) => (true, message),
                Err(e) => {
                    warn!(session = %packet.session().id(), error = %e, "Update request failed");
                    (false, Some(e.to_string()))
                }
            },
            None => (false, Some(UPDATES_UNSUPPORTED.to_string())),
        };

        let mut response = packet.reply(UPDATER_RESPONSE)?;
        response.set_field(STATUS, Value::Bool(status))?;
        response.set_field(MESSAGE, message.map_or(Value::Null, Value::String))?;
        Ok(Some(response))
    }
}

pub fn descriptors(handler: Option<Arc<dyn UpdateHandler>>) -> Result<Vec<ActionDescriptor>> {
    Ok(vec![
        ActionDescriptor::builder(UPDATER_REQUEST)
            .access(AccessLevel::AuthorizedUser)
            .behavior(UpdaterRequest { handler })
            .build()?,
        ActionDescriptor::builder(UPDATER_RESPONSE)
            .access(AccessLevel::AuthorizedUser)
            .field(STATUS, "boolean|required")
            .field(MESSAGE, "string|nullable")
            .behavior(NoReply)
            .build()?,
    ])
}
