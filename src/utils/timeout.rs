//! Timeout constants and an async deadline wrapper.

use crate::error::{ProtocolError, Result};
use std::future::Future;
use std::time::Duration;

/// Default heartbeat probe interval
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(60);

/// Time allowed for a pong to answer a ping
pub const PONG_TIMEOUT: Duration = Duration::from_secs(5);

/// Granularity of cancellation and liveness polling
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How long a send may wait for room in a full outbound queue
pub const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Run `fut` with a deadline, mapping expiry to [`ProtocolError::Timeout`]
pub async fn with_timeout<F, T>(duration: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(duration, fut)
        .await
        .map_err(|_| ProtocolError::Timeout)?
}
