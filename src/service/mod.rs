//! # Protocol Services
//!
//! Long-running clients of the action protocol.
//!
//! - **Heartbeat**: per-session ping/pong supervision
//! - **File Transfer**: chunked, hash-verified file exchange

pub mod file_transfer;
pub mod heartbeat;
