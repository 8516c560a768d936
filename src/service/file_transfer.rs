//! # File Transfer Service
//!
//! Chunked, receiver-driven file transfer over the action protocol.
//!
//! ## Flow
//! ```text
//! sender                                   receiver
//!   | -- request.meta {uuid,name,size,hash} --> |  create destination file
//!   | <-- request.status transmit.start ------- |
//!   | -- response.status transmit.next #0 ----> |  write at 0 * chunk_size
//!   | <-- request.status transmit.next #1 ----- |
//!   |                 ...                       |
//!   | -- response.status transmit.complete ---> |  verify SHA-256
//!   | <-- request.status complete | error ----- |
//! ```
//!
//! The receiver names the chunk it wants and chunks are written at
//! `chunk_id * chunk_size`, so arrival order never decides file layout.
//!
//! ## Streams
//! Each open stream exclusively owns its file handle and a one-shot completion.
//! Closing removes the stream from its table before anything else, so every
//! terminal transition runs exactly once and repeated closes are no-ops. A
//! watchdog per stream closes it when the session dies.
//!
//! A destination path belongs to at most one open receive stream; a second
//! announcement of the same name is rejected until the first one closes.

use crate::config::TransferConfig;
use crate::core::packet::PacketInstance;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::actions::file_transfer::{
    error_data, event_packet, TransferEvent, DATA, EVENT, HASH, META_REQUEST, NAME, SIZE,
    STATUS_REQUEST, STATUS_RESPONSE, UUID,
};
use crate::protocol::registry::ActionRegistry;
use crate::protocol::session::Session;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Announced metadata of one transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferInfo {
    pub uuid: String,
    pub name: String,
    pub size: u64,
    /// Lowercase hex SHA-256 of the whole file
    pub hash: String,
}

impl TransferInfo {
    /// Read the metadata of a processed `meta` packet
    pub fn from_meta(packet: &PacketInstance) -> Result<Self> {
        let text = |field: &str| -> Result<String> {
            packet
                .str_field(field)?
                .map(str::to_string)
                .ok_or_else(|| ProtocolError::Validation {
                    field: field.to_string(),
                    rule: "required".to_string(),
                })
        };
        let raw_size = text(SIZE)?;
        let size = raw_size.trim().parse::<u64>().map_err(|_| ProtocolError::Validation {
            field: SIZE.to_string(),
            rule: "int".to_string(),
        })?;
        Ok(Self {
            uuid: text(UUID)?,
            name: text(NAME)?,
            size,
            hash: text(HASH)?,
        })
    }
}

/// Which table a stream lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Receive,
}

/// Settles once the stream reaches a terminal state.
///
/// Dropping the owning stream without settling reads as
/// [`ProtocolError::TransferAborted`].
#[derive(Debug)]
pub struct TransferCompletion {
    uuid: String,
    rx: oneshot::Receiver<Result<()>>,
}

impl TransferCompletion {
    pub fn uuid(&self) -> &str {
        &self.uuid
    }
}

impl Future for TransferCompletion {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(ProtocolError::TransferAborted {
                uuid: self.uuid.clone(),
            })),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// An accepted inbound transfer
#[derive(Debug)]
pub struct IncomingTransfer {
    pub info: TransferInfo,
    pub completion: TransferCompletion,
}

struct TransferStream {
    info: TransferInfo,
    path: PathBuf,
    file: Option<File>,
    completion: Option<oneshot::Sender<Result<()>>>,
}

impl TransferStream {
    fn file(&mut self) -> Result<&mut File> {
        let uuid = &self.info.uuid;
        self.file
            .as_mut()
            .ok_or_else(|| ProtocolError::UnknownStream(uuid.clone()))
    }

    /// Close the handle and settle the completion; both happen at most once
    async fn settle(&mut self, outcome: Result<()>, remove_file: bool) {
        if let Some(mut file) = self.file.take() {
            if let Err(e) = file.flush().await {
                debug!(uuid = %self.info.uuid, error = %e, "Flush on close failed");
            }
        }
        if remove_file {
            if let Err(e) = fs::remove_file(&self.path).await {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(uuid = %self.info.uuid, path = %self.path.display(), error = %e, "Failed to remove partial file");
                }
            }
        }
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(outcome);
        }
    }
}

type SharedStream = Arc<AsyncMutex<TransferStream>>;

/// Table entry; the path is readable without locking the stream
struct StreamEntry {
    path: PathBuf,
    stream: SharedStream,
}

type StreamTable = HashMap<String, StreamEntry>;

pub struct FileTransferService {
    config: TransferConfig,
    sending: Mutex<StreamTable>,
    receiving: Mutex<StreamTable>,
}

impl FileTransferService {
    pub fn new(config: TransferConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            sending: Mutex::new(HashMap::new()),
            receiving: Mutex::new(HashMap::new()),
        })
    }

    /// Construct and, when configured, empty the destination directory
    pub async fn start(config: TransferConfig) -> Result<Arc<Self>> {
        let service = Self::new(config);
        if service.config.clear_destination_on_start {
            service.reset_destination().await?;
        }
        Ok(service)
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Remove everything under the destination directory, creating it if absent
    pub async fn reset_destination(&self) -> Result<()> {
        let dir = &self.config.destination_dir;
        fs::create_dir_all(dir).await?;
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                fs::remove_dir_all(&path).await?;
            } else {
                fs::remove_file(&path).await?;
            }
        }
        debug!(dir = %dir.display(), "Transfer destination reset");
        Ok(())
    }

    fn table(&self, direction: Direction) -> &Mutex<StreamTable> {
        match direction {
            Direction::Send => &self.sending,
            Direction::Receive => &self.receiving,
        }
    }

    fn with_table<T>(
        &self,
        direction: Direction,
        f: impl FnOnce(&mut StreamTable) -> T,
    ) -> Result<T> {
        let mut table = self
            .table(direction)
            .lock()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.to_string()))?;
        Ok(f(&mut table))
    }

    /// Number of open streams in one direction
    pub fn open_streams(&self, direction: Direction) -> usize {
        self.with_table(direction, |t| t.len()).unwrap_or(0)
    }

    pub fn is_open(&self, direction: Direction, uuid: &str) -> bool {
        self.with_table(direction, |t| t.contains_key(uuid))
            .unwrap_or(false)
    }

    fn stream(&self, direction: Direction, uuid: &str) -> Result<SharedStream> {
        self.with_table(direction, |t| t.get(uuid).map(|e| Arc::clone(&e.stream)))?
            .ok_or_else(|| ProtocolError::UnknownStream(uuid.to_string()))
    }

    fn take(&self, direction: Direction, uuid: &str) -> Option<SharedStream> {
        self.with_table(direction, |t| t.remove(uuid).map(|e| e.stream))
            .ok()
            .flatten()
    }

    /// Add a stream unless its uuid, or for receives its path, is already taken
    fn insert(&self, direction: Direction, stream: TransferStream) -> Result<()> {
        let uuid = stream.info.uuid.clone();
        let path = stream.path.clone();
        self.with_table(direction, |t| {
            if t.contains_key(&uuid) {
                return Err(ProtocolError::InvalidTransferEvent(format!(
                    "transfer {uuid} is already open"
                )));
            }
            if direction == Direction::Receive && t.values().any(|entry| entry.path == path) {
                return Err(ProtocolError::InvalidTransferEvent(format!(
                    "{} is already in use by another transfer",
                    path.display()
                )));
            }
            t.insert(
                uuid.clone(),
                StreamEntry {
                    path: path.clone(),
                    stream: Arc::new(AsyncMutex::new(stream)),
                },
            );
            Ok(())
        })?
    }

    /// Terminal transition. Returns false when the stream was already closed.
    async fn close(
        &self,
        direction: Direction,
        uuid: &str,
        outcome: Result<()>,
        remove_file: bool,
    ) -> bool {
        let Some(stream) = self.take(direction, uuid) else {
            return false;
        };
        stream.lock().await.settle(outcome, remove_file).await;
        true
    }

    fn spawn_watchdog(self: &Arc<Self>, direction: Direction, uuid: String, session: Arc<dyn Session>) {
        let service = Arc::clone(self);
        let interval = self.config.watchdog_interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if !service.is_open(direction, &uuid) {
                    break;
                }
                if !session.is_alive() {
                    warn!(uuid = %uuid, ?direction, "Session lost, aborting transfer");
                    let aborted = Err(ProtocolError::TransferAborted { uuid: uuid.clone() });
                    service
                        .close(direction, &uuid, aborted, direction == Direction::Receive)
                        .await;
                    break;
                }
            }
        });
    }

    /// Announce `path` to the peer and serve it chunk by chunk on request.
    ///
    /// The returned completion resolves once the last chunk has been served,
    /// or fails when the peer reports an error or the session dies first.
    #[instrument(skip(self, registry, session, path), fields(session = %session.id(), path = %path.display()))]
    pub async fn send_file(
        self: &Arc<Self>,
        registry: &ActionRegistry,
        session: Arc<dyn Session>,
        path: &Path,
    ) -> Result<TransferCompletion> {
        let metadata = fs::metadata(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|_| metadata.is_file())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, constants::ERR_INVALID_FILE))?;

        let hash = hash_file(path).await?;
        let file = File::open(path).await?;

        let uuid = loop {
            let candidate = Uuid::new_v4().to_string();
            if !self.is_open(Direction::Send, &candidate) {
                break candidate;
            }
        };
        let info = TransferInfo {
            uuid: uuid.clone(),
            name,
            size: metadata.len(),
            hash,
        };

        let mut meta = registry.create_packet(Arc::clone(&session), META_REQUEST)?;
        meta.set_field(UUID, json!(info.uuid))?
            .set_field(NAME, json!(info.name))?
            .set_field(SIZE, json!(info.size.to_string()))?
            .set_field(HASH, json!(info.hash))?;

        let (tx, rx) = oneshot::channel();
        self.insert(
            Direction::Send,
            TransferStream {
                info: info.clone(),
                path: path.to_path_buf(),
                file: Some(file),
                completion: Some(tx),
            },
        )?;

        if let Err(e) = meta.send().await {
            self.take(Direction::Send, &uuid);
            return Err(e);
        }

        info!(uuid = %uuid, name = %info.name, size = info.size, "File offered");
        self.spawn_watchdog(Direction::Send, uuid.clone(), session);
        Ok(TransferCompletion { uuid, rx })
    }

    /// Accept an announced transfer: create the destination file and ask for
    /// the first chunk.
    #[instrument(skip(self, meta), fields(session = %meta.session().id()))]
    pub async fn receive_file(self: &Arc<Self>, meta: &PacketInstance) -> Result<IncomingTransfer> {
        let info = TransferInfo::from_meta(meta)?;

        let file_name = Path::new(&info.name)
            .file_name()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, constants::ERR_INVALID_FILE))?;
        let path = self.config.destination_dir.join(file_name);

        // Reserve the uuid and path before touching the file
        let (tx, rx) = oneshot::channel();
        self.insert(
            Direction::Receive,
            TransferStream {
                info: info.clone(),
                path: path.clone(),
                file: None,
                completion: Some(tx),
            },
        )?;

        let opened = async {
            fs::create_dir_all(&self.config.destination_dir).await?;
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&path)
                .await
        }
        .await;
        let file = match opened {
            Ok(file) => file,
            Err(e) => {
                self.take(Direction::Receive, &info.uuid);
                return Err(e.into());
            }
        };
        self.stream(Direction::Receive, &info.uuid)?.lock().await.file = Some(file);

        let start = event_packet(meta, STATUS_REQUEST, &info.uuid, TransferEvent::Start, Value::Null)?;
        if let Err(e) = start.send().await {
            if let Some(stream) = self.take(Direction::Receive, &info.uuid) {
                stream.lock().await.settle(Ok(()), true).await;
            }
            return Err(e);
        }

        info!(uuid = %info.uuid, name = %info.name, size = info.size, "Receiving file");
        self.spawn_watchdog(Direction::Receive, info.uuid.clone(), Arc::clone(meta.session()));
        Ok(IncomingTransfer {
            completion: TransferCompletion {
                uuid: info.uuid.clone(),
                rx,
            },
            info,
        })
    }

    /// Sender side: answer one receiver event.
    pub async fn handle_request(&self, packet: &PacketInstance) -> Result<Option<PacketInstance>> {
        let uuid = packet.str_field(UUID)?.unwrap_or_default().to_string();
        let event = TransferEvent::parse(packet.str_field(EVENT)?.unwrap_or_default())?;
        let data = packet.value(DATA)?;

        match event {
            TransferEvent::Start | TransferEvent::Next => {
                let chunk_id = chunk_id(data)?;
                match self.read_chunk(&uuid, chunk_id).await {
                    Ok(Some(chunk)) => event_packet(
                        packet,
                        STATUS_RESPONSE,
                        &uuid,
                        TransferEvent::Next,
                        json!({ "chunk_id": chunk_id, "chunk_data": STANDARD.encode(chunk) }),
                    )
                    .map(Some),
                    Ok(None) => {
                        self.close(Direction::Send, &uuid, Ok(()), false).await;
                        info!(uuid = %uuid, chunks = chunk_id, "File sent");
                        event_packet(packet, STATUS_RESPONSE, &uuid, TransferEvent::Complete, Value::Null)
                            .map(Some)
                    }
                    Err(e) => {
                        let reason = e.to_string();
                        warn!(uuid = %uuid, error = %reason, "Failed to serve chunk");
                        self.close(Direction::Send, &uuid, Err(e), false).await;
                        event_packet(packet, STATUS_RESPONSE, &uuid, TransferEvent::Error, error_data(&reason))
                            .map(Some)
                    }
                }
            }
            TransferEvent::Complete => {
                debug!(uuid = %uuid, "Receiver confirmed transfer");
                Ok(None)
            }
            TransferEvent::Error => {
                let reason = error_reason(data);
                let failed = Err(ProtocolError::TransferPeer {
                    uuid: uuid.clone(),
                    reason: reason.clone(),
                });
                if !self.close(Direction::Send, &uuid, failed, false).await {
                    debug!(uuid = %uuid, reason = %reason, "Error for closed transfer dropped");
                }
                Ok(None)
            }
        }
    }

    /// Receiver side: apply one sender event.
    pub async fn handle_response(&self, packet: &PacketInstance) -> Result<Option<PacketInstance>> {
        let uuid = packet.str_field(UUID)?.unwrap_or_default().to_string();
        let event = TransferEvent::parse(packet.str_field(EVENT)?.unwrap_or_default())?;
        let data = packet.value(DATA)?;

        let outcome = match event {
            TransferEvent::Next => match self.write_chunk(&uuid, data).await {
                Ok(next) => event_packet(
                    packet,
                    STATUS_REQUEST,
                    &uuid,
                    TransferEvent::Next,
                    json!({ "chunk_id": next }),
                )
                .map(Some),
                Err(e) => Err(e),
            },
            TransferEvent::Complete => return self.finish_receive(packet, &uuid).await,
            TransferEvent::Error => {
                let reason = error_reason(data);
                warn!(uuid = %uuid, reason = %reason, "Sender reported transfer error");
                let failed = Err(ProtocolError::TransferPeer {
                    uuid: uuid.clone(),
                    reason,
                });
                self.close(Direction::Receive, &uuid, failed, true).await;
                return Ok(None);
            }
            TransferEvent::Start => Err(ProtocolError::InvalidTransferEvent(
                TransferEvent::Start.as_str().to_string(),
            )),
        };

        match outcome {
            Ok(reply) => Ok(reply),
            Err(e) => {
                let reason = e.to_string();
                warn!(uuid = %uuid, error = %reason, "Transfer failed");
                self.close(Direction::Receive, &uuid, Err(e), true).await;
                event_packet(packet, STATUS_REQUEST, &uuid, TransferEvent::Error, error_data(&reason))
                    .map(Some)
            }
        }
    }

    async fn read_chunk(&self, uuid: &str, chunk_id: u64) -> Result<Option<Vec<u8>>> {
        let stream = self.stream(Direction::Send, uuid)?;
        let mut stream = stream.lock().await;
        let chunk_size = self.config.chunk_size as u64;
        let offset = chunk_offset(chunk_id, chunk_size)?;

        let file = stream.file()?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut chunk = Vec::with_capacity(self.config.chunk_size);
        (&mut *file).take(chunk_size).read_to_end(&mut chunk).await?;

        Ok((!chunk.is_empty()).then_some(chunk))
    }

    /// Write one chunk at its own offset; returns the id to request next
    async fn write_chunk(&self, uuid: &str, data: &Value) -> Result<u64> {
        let chunk_id = chunk_id(data)?;
        let encoded = data
            .get("chunk_data")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::InvalidTransferEvent(constants::ERR_MISSING_CHUNK_DATA.to_string()))?;
        let chunk = STANDARD
            .decode(encoded)
            .map_err(|_| ProtocolError::InvalidTransferEvent(constants::ERR_INVALID_CHUNK_DATA.to_string()))?;

        let stream = self.stream(Direction::Receive, uuid)?;
        let mut stream = stream.lock().await;
        let offset = chunk_offset(chunk_id, self.config.chunk_size as u64)?;
        if chunk.len() > self.config.chunk_size || offset + chunk.len() as u64 > stream.info.size {
            return Err(ProtocolError::InvalidTransferEvent(format!(
                "chunk {chunk_id} exceeds the announced size"
            )));
        }

        let file = stream.file()?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(&chunk).await?;
        Ok(chunk_id + 1)
    }

    async fn finish_receive(&self, packet: &PacketInstance, uuid: &str) -> Result<Option<PacketInstance>> {
        let Some(stream) = self.take(Direction::Receive, uuid) else {
            return Err(ProtocolError::UnknownStream(uuid.to_string()));
        };
        let mut stream = stream.lock().await;

        let flushed = match stream.file.take() {
            Some(mut file) => file.flush().await.map_err(ProtocolError::from),
            None => Ok(()),
        };
        let verified = match flushed {
            Ok(()) => hash_file(&stream.path).await,
            Err(e) => Err(e),
        };

        match verified {
            Ok(actual) if actual.eq_ignore_ascii_case(&stream.info.hash) => {
                info!(uuid = %uuid, name = %stream.info.name, "File received and verified");
                stream.settle(Ok(()), false).await;
                event_packet(packet, STATUS_REQUEST, uuid, TransferEvent::Complete, Value::Null).map(Some)
            }
            Ok(actual) => {
                warn!(uuid = %uuid, expected = %stream.info.hash, actual = %actual, "Received file hash mismatch");
                let mismatch = Err(ProtocolError::TransferHashMismatch {
                    uuid: uuid.to_string(),
                });
                stream.settle(mismatch, true).await;
                event_packet(
                    packet,
                    STATUS_REQUEST,
                    uuid,
                    TransferEvent::Error,
                    error_data(constants::ERR_HASH_MISMATCH),
                )
                .map(Some)
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(uuid = %uuid, error = %reason, "Failed to verify received file");
                stream.settle(Err(e), true).await;
                event_packet(packet, STATUS_REQUEST, uuid, TransferEvent::Error, error_data(&reason))
                    .map(Some)
            }
        }
    }
}

fn chunk_offset(chunk_id: u64, chunk_size: u64) -> Result<u64> {
    chunk_id
        .checked_mul(chunk_size)
        .ok_or_else(|| ProtocolError::InvalidTransferEvent(format!("chunk id {chunk_id} out of range")))
}

/// `data.chunk_id`, defaulting to the first chunk
fn chunk_id(data: &Value) -> Result<u64> {
    match data.get("chunk_id") {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| ProtocolError::InvalidTransferEvent(format!("invalid chunk id {n}"))),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| ProtocolError::InvalidTransferEvent(format!("invalid chunk id {s}"))),
        Some(other) => Err(ProtocolError::InvalidTransferEvent(format!(
            "invalid chunk id {other}"
        ))),
    }
}

fn error_reason(data: &Value) -> String {
    data.get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string()
}

/// Lowercase hex SHA-256 of a file's contents
pub async fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUFFER_SIZE];
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
