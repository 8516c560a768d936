//! `authorize.request` / `authorize.response`.
//!
//! The request carries credentials checked against the host's
//! [`CredentialStore`]. On success the session is marked authorized with the
//! returned [`AuthItem`]; either way the peer receives a response whose
//! `authItem` is the item's map form or null.

use crate::core::packet::PacketInstance;
use crate::core::schema::{FieldDecl, FieldType};
use crate::error::Result;
use crate::protocol::access::{AuthItem, AuthState};
use crate::protocol::descriptor::{ActionBehavior, ActionDescriptor, NoReply};
use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

pub const AUTHORIZE_REQUEST: &str = "authorize.request";
pub const AUTHORIZE_RESPONSE: &str = "authorize.response";
pub const USERNAME: &str = "username";
pub const KEY: &str = "key";
pub const AUTH_ITEM: &str = "authItem";

/// Host-side credential store
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Check a username/key pair; `None` rejects
    async fn authenticate(&self, username: &str, key: &str) -> Result<Option<AuthItem>>;

    /// Resolve an announced auth item map into a known identity
    async fn retrieve_by_credentials(&self, credentials: &Value) -> Result<Option<AuthItem>>;
}

struct AuthorizeRequest {
    store: Option<Arc<dyn CredentialStore>>,
}

impl AuthorizeRequest {
    fn respond(packet: &PacketInstance, item: Option<&AuthItem>) -> Result<PacketInstance> {
        let mut response = packet.reply(AUTHORIZE_RESPONSE)?;
        response.set_field(AUTH_ITEM, item.map_or(Value::Null, AuthItem::to_map))?;
        Ok(response)
    }
}

#[async_trait]
impl ActionBehavior for AuthorizeRequest {
    async fn on_success(&self, packet: &mut PacketInstance) -> Result<Option<PacketInstance>> {
        let username = packet.str_field(USERNAME)?.unwrap_or_default();
        let key = packet.str_field(KEY)?.unwrap_or_default();

        let item = match &self.store {
            Some(store) => store.authenticate(username, key).await?,
            None => None,
        };

        match &item {
            Some(item) => {
                info!(session = %packet.session().id(), username = %username, level = %item.access_level, "Session authorized");
                packet
                    .session()
                    .set_auth_state(AuthState::authorized(item.clone()));
            }
            None => debug!(session = %packet.session().id(), username = %username, "Authorization rejected"),
        }

        Self::respond(packet, item.as_ref()).map(Some)
    }

    async fn on_failure(&self, packet: &mut PacketInstance) -> Result<Option<PacketInstance>> {
        Self::respond(packet, None).map(Some)
    }
}

async fn resolve_auth_item(store: Option<Arc<dyn CredentialStore>>, value: Value) -> Result<Value> {
    let empty = match &value {
        Value::Null => true,
        Value::Object(obj) => obj.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    };
    if empty {
        return Ok(Value::Null);
    }
    let item = match store {
        Some(store) => store.retrieve_by_credentials(&value).await?,
        None => AuthItem::from_map(&value),
    };
    Ok(item.as_ref().map_or(Value::Null, AuthItem::to_map))
}

pub fn descriptors(store: Option<Arc<dyn CredentialStore>>) -> Result<Vec<ActionDescriptor>> {
    let resolver = store.clone();
    let auth_item = FieldDecl::typed(AUTH_ITEM, FieldType::Object)
        .rule("nullable")
        .deserialize_with(move |value, _packet| {
            resolve_auth_item(resolver.clone(), value).boxed()
        });

    Ok(vec![
        ActionDescriptor::builder(AUTHORIZE_REQUEST)
            .field(USERNAME, "string|required")
            .field(KEY, "string|required")
            .behavior(AuthorizeRequest { store })
            .build()?,
        ActionDescriptor::builder(AUTHORIZE_RESPONSE)
            .field_decl(auth_item)
            .behavior(NoReply)
            .build()?,
    ])
}
