//! # Utility Modules
//!
//! Supporting utilities for logging, timing and timeouts.
//!
//! ## Components
//! - **Logging**: Structured logging configuration
//! - **Time**: Wall clock timestamps carried by liveness probes
//! - **Timeout**: Timeout constants and async deadline wrapper

pub mod logging;
pub mod time;
pub mod timeout;
