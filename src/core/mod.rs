//! # Core Protocol Components
//!
//! Field schemas, field values, the wire envelope and packet instances.
//!
//! ## Components
//! - **Schema**: per-action field declarations compiled from rule tokens
//! - **Value**: literal or deferred field values
//! - **Envelope**: `{action, data}` document decode/encode
//! - **Packet**: one message of a registered action, or an unrecognized document
//!
//! ## Wire Format
//! ```text
//! { "action": "<action id>", "data": { ...declared fields... } }
//! ```

pub mod envelope;
pub mod packet;
pub mod schema;
pub mod value;
