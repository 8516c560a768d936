//! # Packets
//!
//! A [`PacketInstance`] is one message of a registered action type. It is created
//! per message and discarded after processing.
//!
//! Inbound instances are *remote*: they were materialised from the wire by the
//! registry and carry the processing outcome (success flag and ordered error
//! list). They cannot be sent again; [`PacketInstance::to_local`] produces a
//! sendable copy.
//!
//! Documents no registry claims become [`Packet::Unrecognized`], preserving the
//! raw data instead of dropping it.

use crate::core::value::FieldValue;
use crate::error::{ProtocolError, Result};
use crate::protocol::descriptor::ActionDescriptor;
use crate::protocol::registry::ActionRegistry;
use crate::protocol::session::Session;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

static NULL: Value = Value::Null;

/// Any packet the router can receive or send
#[derive(Debug)]
pub enum Packet {
    Action(PacketInstance),
    Unrecognized(RawPacket),
}

impl Packet {
    /// Action id for action packets
    pub fn action_id(&self) -> Option<&str> {
        match self {
            Packet::Action(p) => Some(p.action_id()),
            Packet::Unrecognized(_) => None,
        }
    }

    pub fn as_action(&self) -> Option<&PacketInstance> {
        match self {
            Packet::Action(p) => Some(p),
            Packet::Unrecognized(_) => None,
        }
    }

    pub fn into_action(self) -> Option<PacketInstance> {
        match self {
            Packet::Action(p) => Some(p),
            Packet::Unrecognized(_) => None,
        }
    }

    pub fn is_remote(&self) -> bool {
        match self {
            Packet::Action(p) => p.is_remote(),
            Packet::Unrecognized(raw) => raw.remote,
        }
    }
}

impl From<PacketInstance> for Packet {
    fn from(packet: PacketInstance) -> Self {
        Packet::Action(packet)
    }
}

/// A document passed through without interpretation
#[derive(Debug, Clone, PartialEq)]
pub struct RawPacket {
    data: Value,
    remote: bool,
}

impl RawPacket {
    /// Outbound raw document, sent as-is
    pub fn new(data: Value) -> Self {
        Self {
            data,
            remote: false,
        }
    }

    pub(crate) fn remote(data: Value) -> Self {
        Self { data, remote: true }
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn into_data(self) -> Value {
        self.data
    }
}

/// One message of a registered action type.
pub struct PacketInstance {
    descriptor: Arc<ActionDescriptor>,
    registry: ActionRegistry,
    session: Arc<dyn Session>,
    remote: bool,
    fields: HashMap<String, FieldValue>,
    handled: bool,
    errors: Vec<ProtocolError>,
}

impl PacketInstance {
    pub(crate) fn new(
        descriptor: Arc<ActionDescriptor>,
        registry: ActionRegistry,
        session: Arc<dyn Session>,
        remote: bool,
    ) -> Self {
        let fields = descriptor
            .schema()
            .iter()
            .map(|spec| (spec.name().to_string(), FieldValue::default()))
            .collect();
        Self {
            descriptor,
            registry,
            session,
            remote,
            fields,
            handled: false,
            errors: Vec::new(),
        }
    }

    pub fn action_id(&self) -> &str {
        self.descriptor.action_id()
    }

    pub fn descriptor(&self) -> &Arc<ActionDescriptor> {
        &self.descriptor
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub fn session(&self) -> &Arc<dyn Session> {
        &self.session
    }

    pub fn is_remote(&self) -> bool {
        self.remote
    }

    /// Store a raw value without validating it.
    pub fn set_field(&mut self, name: &str, value: impl Into<FieldValue>) -> Result<&mut Self> {
        let slot = self
            .fields
            .get_mut(name)
            .ok_or_else(|| ProtocolError::UnknownField(name.to_string()))?;
        *slot = value.into();
        Ok(self)
    }

    pub fn get_field(&self, name: &str) -> Result<&FieldValue> {
        self.fields
            .get(name)
            .ok_or_else(|| ProtocolError::UnknownField(name.to_string()))
    }

    /// Literal value of a field. Deferred values read as null until transformed.
    pub fn value(&self, name: &str) -> Result<&Value> {
        Ok(self.get_field(name)?.as_literal().unwrap_or(&NULL))
    }

    pub fn str_field(&self, name: &str) -> Result<Option<&str>> {
        Ok(self.value(name)?.as_str())
    }

    pub fn is_handled_successfully(&self) -> bool {
        self.handled
    }

    /// Ordered errors recorded while handling or replying
    pub fn errors(&self) -> &[ProtocolError] {
        &self.errors
    }

    /// Take the recorded errors as one error: the single cause or `Multiple`
    pub fn take_handle_error(&mut self) -> Option<ProtocolError> {
        ProtocolError::aggregate(std::mem::take(&mut self.errors))
    }

    pub fn attach_error(&mut self, error: ProtocolError) -> &mut Self {
        self.errors.push(error);
        self
    }

    /// Sendable local copy carrying the same literal and deferred values
    pub fn to_local(&self) -> PacketInstance {
        PacketInstance {
            descriptor: Arc::clone(&self.descriptor),
            registry: self.registry.clone(),
            session: Arc::clone(&self.session),
            remote: false,
            fields: self.fields.clone(),
            handled: false,
            errors: Vec::new(),
        }
    }

    /// New local packet of another action on the same session
    pub fn reply(&self, action_id: &str) -> Result<PacketInstance> {
        self.registry
            .create_packet(Arc::clone(&self.session), action_id)
    }

    /// Hand this packet to its session for outbound send
    pub async fn send(self) -> Result<()> {
        let session = Arc::clone(&self.session);
        session.send(Packet::Action(self)).await
    }

    /// Process an inbound `data` document.
    ///
    /// Every declared field is deserialized or transformed first; absent members
    /// read as null. If all succeed the success branch runs, otherwise (or when
    /// the success branch fails) the failure branch runs. Errors from either
    /// branch are appended, never propagated, so a reply is always optional.
    pub async fn handle(&mut self, payload: &Value) -> Option<PacketInstance> {
        let descriptor = Arc::clone(&self.descriptor);
        let mut failures = Vec::new();

        for spec in descriptor.schema().iter() {
            let raw = payload.get(spec.name()).cloned().unwrap_or(Value::Null);
            let outcome = match spec.deserializer() {
                Some(deserialize) => deserialize(raw, &*self).await,
                None => spec.transform(raw),
            };
            match outcome {
                Ok(value) => {
                    self.fields
                        .insert(spec.name().to_string(), FieldValue::Literal(value));
                }
                Err(e) => failures.push(e),
            }
        }

        let behavior = Arc::clone(descriptor.behavior());

        if failures.is_empty() {
            match behavior.on_success(self).await {
                Ok(reply) => {
                    self.handled = true;
                    return reply;
                }
                Err(e) => failures.push(e),
            }
        }

        self.handled = false;
        debug!(action = %self.action_id(), errors = failures.len(), "Action handling failed");
        self.errors.extend(failures);

        match behavior.on_failure(self).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(action = %self.action_id(), error = %e, "Failure handler errored");
                self.errors.push(e);
                None
            }
        }
    }

    /// Build the outbound `data` map.
    ///
    /// Per field: a declared serializer wins, otherwise a deferred producer is
    /// resolved, otherwise the stored value is validated and coerced.
    pub async fn transform(&mut self) -> Result<Map<String, Value>> {
        let descriptor = Arc::clone(&self.descriptor);
        Arc::clone(descriptor.behavior())
            .before_transform(self)
            .await?;

        let mut out = Map::new();
        for spec in descriptor.schema().iter() {
            let stored = self.fields.get(spec.name()).cloned().unwrap_or_default();
            let value = match (spec.serializer(), &stored) {
                (Some(serialize), _) => serialize(&stored, &*self).await?,
                (None, FieldValue::Deferred(producer)) => producer().await?,
                (None, FieldValue::Literal(value)) => spec.transform(value.clone())?,
            };
            out.insert(spec.name().to_string(), value);
        }
        Ok(out)
    }
}

impl fmt::Debug for PacketInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketInstance")
            .field("action", &self.action_id())
            .field("session", &self.session.id())
            .field("remote", &self.remote)
            .field("fields", &self.fields)
            .field("handled", &self.handled)
            .field("errors", &self.errors)
            .finish()
    }
}
