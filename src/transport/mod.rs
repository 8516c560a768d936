//! # Transport Layer
//!
//! Session implementations the protocol core runs on.
//!
//! - **Connection**: newline-delimited JSON over any async byte stream
//! - **Memory**: in-process loopback for embedding and tests

pub mod connection;
pub mod inbox;
pub mod memory;
