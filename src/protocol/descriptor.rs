//! Action descriptors: one compiled schema plus behavior per action type.

use crate::core::packet::PacketInstance;
use crate::core::schema::{FieldDecl, FieldSchema};
use crate::error::Result;
use crate::protocol::access::AccessLevel;
use async_trait::async_trait;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// What an action does once its fields are processed.
///
/// Both branches may return a reply packet, which the registry sends on the
/// same session after dispatch. Errors from `on_success` reroute to
/// `on_failure`; errors from `on_failure` are recorded and swallowed.
#[async_trait]
pub trait ActionBehavior: Send + Sync {
    async fn on_success(&self, packet: &mut PacketInstance) -> Result<Option<PacketInstance>>;

    async fn on_failure(&self, _packet: &mut PacketInstance) -> Result<Option<PacketInstance>> {
        Ok(None)
    }

    /// Runs right before an outbound packet is transformed
    async fn before_transform(&self, _packet: &mut PacketInstance) -> Result<()> {
        Ok(())
    }
}

/// Accepts the packet and produces no reply
#[derive(Debug, Default, Clone, Copy)]
pub struct NoReply;

#[async_trait]
impl ActionBehavior for NoReply {
    async fn on_success(&self, _packet: &mut PacketInstance) -> Result<Option<PacketInstance>> {
        Ok(None)
    }
}

/// Compiled metadata for one action type
pub struct ActionDescriptor {
    action_id: Cow<'static, str>,
    access_required: Option<AccessLevel>,
    schema: FieldSchema,
    behavior: Arc<dyn ActionBehavior>,
}

impl ActionDescriptor {
    pub fn builder(action_id: impl Into<Cow<'static, str>>) -> ActionDescriptorBuilder {
        ActionDescriptorBuilder {
            action_id: action_id.into(),
            access_required: None,
            fields: Vec::new(),
            behavior: None,
        }
    }

    pub fn action_id(&self) -> &str {
        &self.action_id
    }

    pub fn access_required(&self) -> Option<AccessLevel> {
        self.access_required
    }

    pub fn schema(&self) -> &FieldSchema {
        &self.schema
    }

    pub fn behavior(&self) -> &Arc<dyn ActionBehavior> {
        &self.behavior
    }
}

impl fmt::Debug for ActionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionDescriptor")
            .field("action_id", &self.action_id)
            .field("access_required", &self.access_required)
            .field("schema", &self.schema)
            .finish()
    }
}

pub struct ActionDescriptorBuilder {
    action_id: Cow<'static, str>,
    access_required: Option<AccessLevel>,
    fields: Vec<FieldDecl>,
    behavior: Option<Arc<dyn ActionBehavior>>,
}

impl ActionDescriptorBuilder {
    pub fn access(mut self, level: AccessLevel) -> Self {
        self.access_required = Some(level);
        self
    }

    /// Declare a field with a pipe-delimited rule string
    pub fn field(mut self, name: &str, rules: &str) -> Self {
        self.fields.push(FieldDecl::new(name, rules));
        self
    }

    /// Declare a field with the structured builder
    pub fn field_decl(mut self, decl: FieldDecl) -> Self {
        self.fields.push(decl);
        self
    }

    pub fn behavior(mut self, behavior: impl ActionBehavior + 'static) -> Self {
        self.behavior = Some(Arc::new(behavior));
        self
    }

    /// Compile the schema. Unknown rule tokens fail here, never at runtime.
    pub fn build(self) -> Result<ActionDescriptor> {
        Ok(ActionDescriptor {
            schema: FieldSchema::compile(self.fields)?,
            action_id: self.action_id,
            access_required: self.access_required,
            behavior: self.behavior.unwrap_or_else(|| Arc::new(NoReply)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;

    #[test]
    fn test_build_compiles_schema() {
        let descriptor = ActionDescriptor::builder("updater.response")
            .access(AccessLevel::AuthorizedUser)
            .field("status", "boolean|required")
            .field("message", "string|nullable")
            .build()
            .unwrap();
        assert_eq!(descriptor.action_id(), "updater.response");
        assert_eq!(descriptor.access_required(), Some(AccessLevel::AuthorizedUser));
        assert_eq!(descriptor.schema().len(), 2);
    }

    #[test]
    fn test_unknown_rule_is_configuration_error() {
        let err = ActionDescriptor::builder("broken")
            .field("x", "string|sometimes")
            .build()
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(matches!(err, ProtocolError::UnknownRule { .. }));
    }
}
