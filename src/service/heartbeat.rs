//! # Heartbeat Service
//!
//! Per-session liveness supervisor.
//!
//! Every interval the loop checks whether any packet arrived recently. Traffic
//! counts as liveness, so probing only happens on an idle session: a `ping`
//! stamped with the current time is sent and a `pong` echoing that time is
//! awaited. Misses build a failure streak; once it exceeds the configured
//! maximum the session is force-disconnected and the streak resets.
//!
//! The loop stops when cancelled or when the session is no longer alive; both
//! are checked at `poll_interval` granularity, and a cancel also interrupts any
//! wait in progress. A new interval takes effect by restarting the idle wait.

use crate::config::{HeartbeatConfig, MIN_HEARTBEAT_INTERVAL};
use crate::core::packet::Packet;
use crate::error::{ProtocolError, Result};
use crate::protocol::actions::ping::{PING, PONG, TIME};
use crate::protocol::registry::ActionRegistry;
use crate::protocol::session::{action_is, any_packet, Session};
use crate::utils::time::{now_secs_f64, same_timestamp};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, trace, warn};

struct HeartbeatState {
    interval: watch::Sender<Duration>,
    cancelled: watch::Sender<bool>,
    failures: AtomicU32,
    running: AtomicBool,
}

impl HeartbeatState {
    fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }
}

pub struct HeartbeatService {
    session: Arc<dyn Session>,
    registry: ActionRegistry,
    config: HeartbeatConfig,
    state: Arc<HeartbeatState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatService {
    pub fn new(session: Arc<dyn Session>, registry: ActionRegistry, config: HeartbeatConfig) -> Self {
        let (interval, _) = watch::channel(config.interval);
        let (cancelled, _) = watch::channel(false);
        Self {
            session,
            registry,
            config,
            state: Arc::new(HeartbeatState {
                interval,
                cancelled,
                failures: AtomicU32::new(0),
                running: AtomicBool::new(false),
            }),
            task: Mutex::new(None),
        }
    }

    /// Start probing every `interval`.
    ///
    /// Calling this again while running only replaces the interval; one loop
    /// runs per service. A cancelled service cannot be restarted.
    pub fn every(&self, interval: Duration) -> Result<()> {
        if interval < MIN_HEARTBEAT_INTERVAL {
            return Err(ProtocolError::ConfigError(format!(
                "Heartbeat interval must be at least {}s, got {interval:?}",
                MIN_HEARTBEAT_INTERVAL.as_secs()
            )));
        }
        if self.state.is_cancelled() {
            return Err(ProtocolError::ConfigError(
                "Heartbeat was cancelled and cannot be restarted".to_string(),
            ));
        }

        self.state.interval.send_replace(interval);

        if self.state.running.swap(true, Ordering::SeqCst) {
            debug!(session = %self.session.id(), ?interval, "Heartbeat interval updated");
            return Ok(());
        }

        let probe = Probe {
            session: Arc::clone(&self.session),
            registry: self.registry.clone(),
            config: self.config.clone(),
            state: Arc::clone(&self.state),
        };
        let handle = tokio::spawn(probe.run());
        match self.task.lock() {
            Ok(mut task) => *task = Some(handle),
            Err(_) => handle.abort(),
        }
        Ok(())
    }

    /// Start with the configured interval
    pub fn start(&self) -> Result<()> {
        self.every(self.config.interval)
    }

    /// Stop the loop, interrupting any wait in progress. Idempotent.
    pub fn cancel(&self) {
        if !self.state.cancelled.send_replace(true) {
            debug!(session = %self.session.id(), "Heartbeat cancelled");
        }
    }

    /// Wait for the loop to exit
    pub async fn join(&self) {
        let handle = self.task.lock().ok().and_then(|mut task| task.take());
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }

    /// Current consecutive miss count
    pub fn failure_streak(&self) -> u32 {
        self.state.failures.load(Ordering::SeqCst)
    }

    pub fn interval(&self) -> Duration {
        *self.state.interval.borrow()
    }
}

impl Drop for HeartbeatService {
    fn drop(&mut self) {
        self.state.cancelled.send_replace(true);
    }
}

/// The loop itself, owning clones of everything it touches
struct Probe {
    session: Arc<dyn Session>,
    registry: ActionRegistry,
    config: HeartbeatConfig,
    state: Arc<HeartbeatState>,
}

impl Probe {
    #[instrument(name = "heartbeat", skip(self), fields(session = %self.session.id()))]
    async fn run(self) {
        let mut cancel = self.state.cancelled.subscribe();
        let mut interval = self.state.interval.subscribe();
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = cancelled(&mut cancel) => break,
            }
            if !self.session.is_alive() {
                break;
            }

            let failures = self.state.failures.load(Ordering::SeqCst);
            if failures > self.config.max_failures {
                warn!(failures, "Heartbeat failure limit exceeded, disconnecting");
                self.session.disconnect();
                self.state.failures.store(0, Ordering::SeqCst);
                continue;
            }

            let idle = *interval.borrow_and_update();
            tokio::select! {
                seen = self.session.await_packet(any_packet(), idle) => {
                    if seen.is_some() {
                        trace!("Traffic observed, skipping probe");
                        continue;
                    }
                }
                _ = interval.changed() => {
                    trace!("Interval changed, restarting idle wait");
                    continue;
                }
                _ = cancelled(&mut cancel) => break,
            }
            if !self.session.is_alive() {
                break;
            }

            let outcome = tokio::select! {
                outcome = self.probe() => outcome,
                _ = cancelled(&mut cancel) => break,
            };
            match outcome {
                Ok(true) => {
                    self.state.failures.store(0, Ordering::SeqCst);
                }
                Ok(false) => {
                    let failures = self.state.failures.fetch_add(1, Ordering::SeqCst) + 1;
                    debug!(failures, "Heartbeat missed");
                }
                Err(e) => {
                    let failures = self.state.failures.fetch_add(1, Ordering::SeqCst) + 1;
                    debug!(failures, error = %e, "Heartbeat probe failed");
                }
            }
        }
        self.state.running.store(false, Ordering::SeqCst);
        debug!("Heartbeat stopped");
    }

    /// One ping/pong exchange; true when a matching pong arrived in time
    async fn probe(&self) -> Result<bool> {
        let time = now_secs_f64();
        let mut ping = self.registry.create_packet(Arc::clone(&self.session), PING)?;
        ping.set_field(TIME, Value::from(time))?;

        // Subscribe before sending so a fast pong is not missed
        let (pong, sent) = futures::future::join(
            self.session
                .await_packet(action_is(PONG), self.config.pong_timeout),
            ping.send(),
        )
        .await;
        sent?;

        Ok(pong.as_deref().is_some_and(|packet| pong_matches(packet, time)))
    }
}

fn pong_matches(packet: &Packet, time: f64) -> bool {
    packet
        .as_action()
        .and_then(|pong| pong.value(TIME).ok())
        .and_then(Value::as_f64)
        .is_some_and(|echoed| same_timestamp(echoed, time))
}

/// Resolves once the cancel flag is set
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|cancelled| *cancelled).await;
}
