//! # Protocol Layer
//!
//! Action descriptors, the registry that dispatches them, the router in front
//! of it and the session capability they all talk to.
//!
//! ## Data Flow
//! ```text
//! raw bytes -> ProtocolRouter::handle_packet -> ActionRegistry::dispatch
//!           -> authorization gate -> PacketInstance::handle -> optional reply
//! ```

pub mod access;
pub mod actions;
pub mod descriptor;
pub mod registry;
pub mod router;
pub mod session;

pub use access::{authorize, AccessLevel, AuthDecision, AuthItem, AuthState};
pub use descriptor::{ActionBehavior, ActionDescriptor, NoReply};
pub use registry::ActionRegistry;
pub use router::{PacketHandler, ProtocolRouter};
pub use session::Session;
