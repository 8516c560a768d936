//! # Action Protocol
//!
//! Communication core of a long-lived, session-based client/server service.
//!
//! A typed *action* protocol runs on a persistent connection. Authorization is
//! enforced per action, and large files travel as a chunked sub-protocol with
//! integrity verification.
//!
//! ## Layers
//! - [`core`]: field schemas, values, the wire envelope and packets
//! - [`protocol`]: access levels, descriptors, registry, router, sessions and
//!   the standard action catalogue
//! - [`service`]: heartbeat supervision and file transfer
//! - [`transport`]: line-framed connections and an in-memory loopback
//! - [`config`], [`error`], [`utils`]: configuration, errors, logging and timing
//!
//! ## Example
//! ```rust,no_run
//! use action_protocol::config::ServiceConfig;
//! use action_protocol::protocol::actions::Catalogue;
//! use action_protocol::protocol::{ActionRegistry, ProtocolRouter};
//! use action_protocol::transport::connection::Connection;
//! use std::sync::Arc;
//!
//! # async fn run() -> action_protocol::Result<()> {
//! let config = ServiceConfig::default();
//! let registry = ActionRegistry::new();
//! Catalogue::new().register(&registry)?;
//! let router = Arc::new(ProtocolRouter::new(registry));
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:9000").await?;
//! loop {
//!     let (stream, _) = listener.accept().await?;
//!     let connection = Connection::spawn(stream, Arc::clone(&router), &config)?;
//!     tokio::spawn(async move { connection.closed().await });
//! }
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use config::ServiceConfig;
pub use error::{ProtocolError, Result};
pub use protocol::{ActionRegistry, ProtocolRouter, Session};
