//! # Line-Framed Connection
//!
//! Drives the action protocol over any async byte stream (TCP, Unix socket,
//! in-memory duplex). Each JSON document travels on its own line.
//!
//! ## Tasks
//! - **Reader**: splits frames and dispatches each message in its own task;
//!   processed packets are published to `await_packet` waiters.
//! - **Writer**: drains the bounded outbound queue into the sink.
//! - **Heartbeat**: owned by the connection and started when enabled.
//!
//! End of stream, an I/O error, a forced disconnect or dropping the
//! [`Connection`] closes the session and stops all three.

use crate::config::ServiceConfig;
use crate::core::packet::Packet;
use crate::error::{ProtocolError, Result};
use crate::protocol::access::AuthState;
use crate::protocol::router::ProtocolRouter;
use crate::protocol::session::{PacketPredicate, Session};
use crate::service::heartbeat::HeartbeatService;
use crate::transport::inbox::PacketInbox;
use crate::utils::timeout::with_timeout;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

struct ConnectionSession {
    id: String,
    router: Arc<ProtocolRouter>,
    outbound: mpsc::Sender<String>,
    send_timeout: Duration,
    inbox: Arc<PacketInbox>,
    auth: RwLock<AuthState>,
}

#[async_trait]
impl Session for ConnectionSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send(&self, packet: Packet) -> Result<()> {
        if self.inbox.is_closed() {
            return Err(ProtocolError::ConnectionClosed);
        }
        let bytes = self.router.prepare_packet(packet).await?;
        let line = String::from_utf8(bytes)
            .map_err(|e| ProtocolError::MalformedMessage(e.to_string()))?;
        with_timeout(self.send_timeout, async {
            self.outbound
                .send(line)
                .await
                .map_err(|_| ProtocolError::ConnectionClosed)
        })
        .await
    }

    fn is_alive(&self) -> bool {
        !self.inbox.is_closed()
    }

    fn disconnect(&self) {
        if self.inbox.close() {
            info!(session = %self.id, "Connection closed");
        }
    }

    async fn await_packet(
        &self,
        predicate: PacketPredicate,
        timeout: Duration,
    ) -> Option<Arc<Packet>> {
        self.inbox.wait(predicate, timeout).await
    }

    fn auth_state(&self) -> AuthState {
        self.auth
            .read()
            .map(|state| state.clone())
            .unwrap_or_default()
    }

    fn set_auth_state(&self, state: AuthState) {
        if let Ok(mut auth) = self.auth.write() {
            *auth = state;
        }
    }
}

/// A running connection. Dropping it closes the session.
pub struct Connection {
    session: Arc<ConnectionSession>,
    heartbeat: Option<HeartbeatService>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Connection {
    /// Start serving the protocol on `io`
    pub fn spawn<T>(io: T, router: Arc<ProtocolRouter>, config: &ServiceConfig) -> Result<Self>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let codec = LinesCodec::new_with_max_length(config.connection.max_frame_length);
        let (mut sink, mut frames) = Framed::new(io, codec).split();
        let (outbound, mut queue) = mpsc::channel::<String>(config.connection.outbound_capacity.max(1));
        let inbox = Arc::new(PacketInbox::new());

        let session = Arc::new(ConnectionSession {
            id: Uuid::new_v4().to_string(),
            router: Arc::clone(&router),
            outbound,
            send_timeout: config.connection.send_timeout,
            inbox: Arc::clone(&inbox),
            auth: RwLock::new(AuthState::guest()),
        });

        let writer_inbox = Arc::clone(&inbox);
        let writer_id = session.id.clone();
        let writer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    line = queue.recv() => match line {
                        Some(line) => {
                            if let Err(e) = sink.send(line).await {
                                warn!(session = %writer_id, error = %e, "Write failed");
                                break;
                            }
                        }
                        None => break,
                    },
                    _ = writer_inbox.closed() => break,
                }
            }
            writer_inbox.close();
            let _ = sink.close().await;
        });

        let reader_session = Arc::clone(&session);
        let disconnect_on_malformed = config.connection.disconnect_on_malformed;
        let reader = tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    frame = frames.next() => frame,
                    _ = reader_session.inbox.closed() => break,
                };
                match frame {
                    Some(Ok(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        tokio::spawn(dispatch(
                            Arc::clone(&reader_session),
                            line,
                            disconnect_on_malformed,
                        ));
                    }
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        warn!(session = %reader_session.id, "Inbound frame exceeds max length");
                        if disconnect_on_malformed {
                            break;
                        }
                    }
                    Some(Err(LinesCodecError::Io(e))) => {
                        warn!(session = %reader_session.id, error = %e, "Read failed");
                        break;
                    }
                    None => {
                        debug!(session = %reader_session.id, "Peer closed stream");
                        break;
                    }
                }
            }
            reader_session.disconnect();
        });

        let heartbeat = if config.heartbeat.enabled {
            let session: Arc<dyn Session> = session.clone();
            let heartbeat =
                HeartbeatService::new(session, router.registry().clone(), config.heartbeat.clone());
            heartbeat.start()?;
            Some(heartbeat)
        } else {
            None
        };

        info!(session = %session.id, "Connection established");
        Ok(Self {
            session,
            heartbeat,
            reader,
            writer,
        })
    }

    pub fn id(&self) -> &str {
        &self.session.id
    }

    /// Session handle for sending and auth state
    pub fn session(&self) -> Arc<dyn Session> {
        self.session.clone()
    }

    pub fn heartbeat(&self) -> Option<&HeartbeatService> {
        self.heartbeat.as_ref()
    }

    pub fn is_alive(&self) -> bool {
        self.session.is_alive()
    }

    /// Resolves when the session closes for any reason
    pub async fn closed(&self) {
        self.session.inbox.closed().await;
    }

    /// Close the session and wait for the connection tasks to finish
    pub async fn shutdown(mut self) {
        self.session.disconnect();
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.cancel();
            heartbeat.join().await;
        }
        let _ = (&mut self.reader).await;
        let _ = (&mut self.writer).await;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.session.disconnect();
    }
}

#[instrument(skip(session, line), fields(session = %session.id))]
async fn dispatch(session: Arc<ConnectionSession>, line: String, disconnect_on_malformed: bool) {
    let router = Arc::clone(&session.router);
    let target: Arc<dyn Session> = session.clone();
    match router.handle_packet(target, line.as_bytes()).await {
        Ok(packet) => session.inbox.publish(packet),
        Err(ProtocolError::MalformedMessage(reason)) => {
            warn!(reason = %reason, "Malformed inbound message");
            if disconnect_on_malformed {
                session.disconnect();
            }
        }
        Err(e) => debug!(error = %e, "Inbound message rejected"),
    }
}
