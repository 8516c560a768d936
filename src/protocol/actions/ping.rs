//! `ping` / `pong` liveness probes.

use crate::core::packet::PacketInstance;
use crate::error::Result;
use crate::protocol::descriptor::{ActionBehavior, ActionDescriptor};
use crate::utils::time::now_secs_f64;
use async_trait::async_trait;
use serde_json::Value;

pub const PING: &str = "ping";
pub const PONG: &str = "pong";
pub const TIME: &str = "time";

/// Answers a ping with a pong echoing its `time`
struct Ping;

/// Stamps `time` on an outgoing packet that has none yet
async fn stamp_time(packet: &mut PacketInstance) -> Result<()> {
    if !packet.get_field(TIME)?.is_deferred() && packet.value(TIME)?.is_null() {
        packet.set_field(TIME, Value::from(now_secs_f64()))?;
    }
    Ok(())
}

#[async_trait]
impl ActionBehavior for Ping {
    async fn on_success(&self, packet: &mut PacketInstance) -> Result<Option<PacketInstance>> {
        let mut pong = packet.reply(PONG)?;
        pong.set_field(TIME, packet.value(TIME)?.clone())?;
        Ok(Some(pong))
    }

    async fn before_transform(&self, packet: &mut PacketInstance) -> Result<()> {
        stamp_time(packet).await
    }
}

struct Pong;

#[async_trait]
impl ActionBehavior for Pong {
    async fn on_success(&self, _packet: &mut PacketInstance) -> Result<Option<PacketInstance>> {
        Ok(None)
    }

    async fn before_transform(&self, packet: &mut PacketInstance) -> Result<()> {
        stamp_time(packet).await
    }
}

pub fn descriptors() -> Result<Vec<ActionDescriptor>> {
    Ok(vec![
        ActionDescriptor::builder(PING)
            .field(TIME, "float|required")
            .behavior(Ping)
            .build()?,
        ActionDescriptor::builder(PONG)
            .field(TIME, "float|required")
            .behavior(Pong)
            .build()?,
    ])
}
