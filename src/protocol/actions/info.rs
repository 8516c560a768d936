//! `info.request` / `info.response`: exchange of build identity.
//!
//! Both sides fill `version` and `git_commit_hash` from the host's
//! [`InfoProvider`] right before sending. The commit hash is deferred, so the
//! provider is only asked for it once the packet is actually encoded.

use crate::core::packet::PacketInstance;
use crate::core::value::FieldValue;
use crate::error::Result;
use crate::protocol::descriptor::{ActionBehavior, ActionDescriptor};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub const INFO_REQUEST: &str = "info.request";
pub const INFO_RESPONSE: &str = "info.response";
pub const VERSION: &str = "version";
pub const GIT_COMMIT_HASH: &str = "git_commit_hash";

/// Sent when the provider reports no version
pub const UNDEFINED_VERSION: &str = "UNDEFINED";

/// Build identity of the local process
#[async_trait]
pub trait InfoProvider: Send + Sync {
    fn version(&self) -> Option<String>;

    async fn git_commit_hash(&self) -> Result<Option<String>>;
}

/// Fixed identity, typically taken from `CARGO_PKG_VERSION` at build time
#[derive(Debug, Clone, Default)]
pub struct StaticInfo {
    version: Option<String>,
    git_commit_hash: Option<String>,
}

impl StaticInfo {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: Some(version.into()),
            git_commit_hash: None,
        }
    }

    pub fn with_commit(mut self, hash: impl Into<String>) -> Self {
        self.git_commit_hash = Some(hash.into());
        self
    }
}

#[async_trait]
impl InfoProvider for StaticInfo {
    fn version(&self) -> Option<String> {
        self.version.clone()
    }

    async fn git_commit_hash(&self) -> Result<Option<String>> {
        Ok(self.git_commit_hash.clone())
    }
}

struct Info {
    provider: Arc<dyn InfoProvider>,
    /// Request side answers with a response
    replies: bool,
}

impl Info {
    fn respond(&self, packet: &PacketInstance) -> Result<Option<PacketInstance>> {
        if self.replies {
            packet.reply(INFO_RESPONSE).map(Some)
        } else {
            Ok(None)
        }
    }
}

#[async_trait]
impl ActionBehavior for Info {
    async fn on_success(&self, packet: &mut PacketInstance) -> Result<Option<PacketInstance>> {
        self.respond(packet)
    }

    // A peer with a malformed identity still gets ours
    async fn on_failure(&self, packet: &mut PacketInstance) -> Result<Option<PacketInstance>> {
        self.respond(packet)
    }

    async fn before_transform(&self, packet: &mut PacketInstance) -> Result<()> {
        let version = self
            .provider
            .version()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| UNDEFINED_VERSION.to_string());
        packet.set_field(VERSION, Value::String(version))?;

        let provider = Arc::clone(&self.provider);
        packet.set_field(
            GIT_COMMIT_HASH,
            FieldValue::deferred(move || {
                let provider = Arc::clone(&provider);
                async move { Ok(provider.git_commit_hash().await?.map_or(Value::Null, Value::String)) }
            }),
        )?;
        Ok(())
    }
}

pub fn descriptors(provider: Arc<dyn InfoProvider>) -> Result<Vec<ActionDescriptor>> {
    let build = |id: &'static str, replies: bool| {
        ActionDescriptor::builder(id)
            .field(VERSION, "string|required")
            .field(GIT_COMMIT_HASH, "string|nullable")
            .behavior(Info {
                provider: Arc::clone(&provider),
                replies,
            })
            .build()
    };
    Ok(vec![build(INFO_REQUEST, true)?, build(INFO_RESPONSE, false)?])
}
