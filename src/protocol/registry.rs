use crate::core::envelope::Envelope;
use crate::core::packet::PacketInstance;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::access::authorize;
use crate::protocol::descriptor::ActionDescriptor;
use crate::protocol::session::Session;
use serde_json::Value;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, instrument, warn};

/// Action registry and dispatcher.
///
/// Maps each action id to exactly one descriptor. Registration happens at boot;
/// afterwards the registry is read-mostly and cheap to clone into every packet.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: Arc<RwLock<HashMap<Cow<'static, str>, Arc<ActionDescriptor>>>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor. A duplicate id fails and leaves the first intact.
    pub fn register(&self, descriptor: ActionDescriptor) -> Result<()> {
        let mut actions = self.actions.write().map_err(|_| {
            ProtocolError::Custom(constants::ERR_REGISTRY_WRITE_LOCK.to_string())
        })?;

        let id = descriptor.action_id().to_string();
        if actions.contains_key(id.as_str()) {
            return Err(ProtocolError::DuplicateAction(id));
        }

        debug!(action = %id, "Registered action");
        actions.insert(Cow::Owned(id), Arc::new(descriptor));
        Ok(())
    }

    /// Register an explicit list of descriptors, stopping at the first error
    pub fn register_all<I>(&self, descriptors: I) -> Result<()>
    where
        I: IntoIterator<Item = ActionDescriptor>,
    {
        descriptors.into_iter().try_for_each(|d| self.register(d))
    }

    pub fn unregister(&self, action_id: &str) -> Result<bool> {
        let mut actions = self.actions.write().map_err(|_| {
            ProtocolError::Custom(constants::ERR_REGISTRY_WRITE_LOCK.to_string())
        })?;
        Ok(actions.remove(action_id).is_some())
    }

    pub fn get(&self, action_id: &str) -> Result<Option<Arc<ActionDescriptor>>> {
        let actions = self.actions.read().map_err(|_| {
            ProtocolError::Custom(constants::ERR_REGISTRY_READ_LOCK.to_string())
        })?;
        Ok(actions.get(action_id).cloned())
    }

    pub fn contains(&self, action_id: &str) -> bool {
        matches!(self.get(action_id), Ok(Some(_)))
    }

    pub fn action_ids(&self) -> Vec<String> {
        self.actions
            .read()
            .map(|actions| actions.keys().map(|k| k.to_string()).collect())
            .unwrap_or_default()
    }

    fn require(&self, action_id: &str) -> Result<Arc<ActionDescriptor>> {
        self.get(action_id)?
            .ok_or_else(|| ProtocolError::UnregisteredAction(action_id.to_string()))
    }

    /// Create a local packet of a registered action
    pub fn create_packet(&self, session: Arc<dyn Session>, action_id: &str) -> Result<PacketInstance> {
        let descriptor = self.require(action_id)?;
        Ok(PacketInstance::new(descriptor, self.clone(), session, false))
    }

    /// Process one inbound envelope.
    ///
    /// Authorization is checked before any field is touched. The optional reply
    /// is sent after yielding once so the inbound dispatch settles first; a send
    /// failure is attached to the returned packet rather than aborting dispatch.
    #[instrument(skip(self, session, envelope), fields(action = %envelope.action, session = %session.id()))]
    pub async fn dispatch(
        &self,
        session: Arc<dyn Session>,
        envelope: Envelope,
    ) -> Result<PacketInstance> {
        let descriptor = self.require(&envelope.action)?;

        authorize(descriptor.access_required(), &session.auth_state()).into_result()?;

        let mut packet = PacketInstance::new(descriptor, self.clone(), session, true);
        let reply = packet.handle(&envelope.data).await;

        if let Some(reply) = reply {
            tokio::task::yield_now().await;
            let reply_action = reply.action_id().to_string();
            if let Err(e) = reply.send().await {
                warn!(reply = %reply_action, error = %e, "Failed to send reply");
                packet.attach_error(e);
            }
        }

        Ok(packet)
    }

    /// Encode a local packet as `{action, data}`
    pub async fn encode(&self, mut packet: PacketInstance) -> Result<Value> {
        let data = packet.transform().await?;
        Ok(Envelope::new(packet.action_id(), data).into_document())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;
    use crate::transport::memory::MemorySession;
    use serde_json::json;

    fn ping_descriptor() -> ActionDescriptor {
        ActionDescriptor::builder("ping")
            .field("time", "float|required")
            .build()
            .unwrap()
    }

    #[test]
    fn test_duplicate_registration_keeps_first() {
        let registry = ActionRegistry::new();
        registry.register(ping_descriptor()).unwrap();

        let second = ActionDescriptor::builder("ping")
            .field("other", "string")
            .build()
            .unwrap();
        let err = registry.register(second).unwrap_err();
        assert!(matches!(err, ProtocolError::DuplicateAction(ref id) if id == "ping"));
        assert!(err.is_configuration());

        let kept = registry.get("ping").unwrap().unwrap();
        assert!(kept.schema().contains("time"));
        assert!(!kept.schema().contains("other"));
    }

    #[tokio::test]
    async fn test_dispatch_unknown_action() {
        let registry = ActionRegistry::new();
        let (session, mut outbound) = MemorySession::new("s1");
        let envelope = Envelope::from_document(json!({"action": "unknown", "data": {}})).unwrap();

        let err = registry.dispatch(session, envelope).await.unwrap_err();
        assert!(matches!(err, ProtocolError::UnregisteredAction(ref id) if id == "unknown"));
        assert!(outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_encode_shape() {
        let registry = ActionRegistry::new();
        registry.register(ping_descriptor()).unwrap();
        let (session, _outbound) = MemorySession::new("s1");

        let mut packet = registry.create_packet(session, "ping").unwrap();
        packet.set_field("time", json!("1.25")).unwrap();
        let doc = registry.encode(packet).await.unwrap();
        assert_eq!(doc, json!({"action": "ping", "data": {"time": 1.25}}));
    }

    #[test]
    fn test_unregister_and_listing() {
        let registry = ActionRegistry::new();
        registry.register(ping_descriptor()).unwrap();
        registry
            .register(ActionDescriptor::builder("pong").build().unwrap())
            .unwrap();

        let mut ids = registry.action_ids();
        ids.sort();
        assert_eq!(ids, vec!["ping".to_string(), "pong".to_string()]);

        assert!(registry.unregister("pong").unwrap());
        assert!(!registry.unregister("pong").unwrap());
        assert!(!registry.contains("pong"));

        let (session, _outbound) = MemorySession::new("s1");
        assert!(matches!(
            registry.create_packet(session, "pong"),
            Err(ProtocolError::UnregisteredAction(_))
        ));
    }
}
