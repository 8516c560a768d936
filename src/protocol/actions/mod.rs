//! # Action Catalogue
//!
//! The standard actions and the host hooks they delegate to.
//!
//! | action id | access |
//! |---|---|
//! | `ping`, `pong` | none |
//! | `info.request`, `info.response` | none |
//! | `authorize.request`, `authorize.response` | none |
//! | `file_transfer.{request,response}.{meta,status}` | authorized user |
//! | `updater.request`, `updater.response` | authorized user |
//!
//! ## Example
//! ```rust
//! use action_protocol::protocol::actions::{info::StaticInfo, Catalogue};
//! use action_protocol::protocol::ActionRegistry;
//! use std::sync::Arc;
//!
//! let registry = ActionRegistry::new();
//! Catalogue::new()
//!     .with_info(Arc::new(StaticInfo::new(env!("CARGO_PKG_VERSION"))))
//!     .register(&registry)
//!     .unwrap();
//! assert!(registry.contains("ping"));
//! assert!(!registry.contains("file_transfer.request.meta"));
//! ```

pub mod authorize;
pub mod file_transfer;
pub mod info;
pub mod ping;
pub mod updater;

use crate::error::Result;
use crate::protocol::descriptor::ActionDescriptor;
use crate::protocol::registry::ActionRegistry;
use crate::service::file_transfer::{FileTransferService, IncomingTransfer};
use authorize::CredentialStore;
use info::{InfoProvider, StaticInfo};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use updater::UpdateHandler;

/// Explicit list of actions a host registers at boot
#[derive(Default)]
pub struct Catalogue {
    info: Option<Arc<dyn InfoProvider>>,
    credentials: Option<Arc<dyn CredentialStore>>,
    updates: Option<Arc<dyn UpdateHandler>>,
    transfers: Option<(Arc<FileTransferService>, Option<UnboundedSender<IncomingTransfer>>)>,
}

impl Catalogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_info(mut self, provider: Arc<dyn InfoProvider>) -> Self {
        self.info = Some(provider);
        self
    }

    pub fn with_credentials(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(store);
        self
    }

    pub fn with_updates(mut self, handler: Arc<dyn UpdateHandler>) -> Self {
        self.updates = Some(handler);
        self
    }

    /// Enable the file transfer actions
    pub fn with_file_transfer(
        mut self,
        service: Arc<FileTransferService>,
        incoming: Option<UnboundedSender<IncomingTransfer>>,
    ) -> Self {
        self.transfers = Some((service, incoming));
        self
    }

    /// Compile every descriptor
    pub fn descriptors(self) -> Result<Vec<ActionDescriptor>> {
        let provider = self
            .info
            .unwrap_or_else(|| Arc::new(StaticInfo::default()));

        let mut descriptors = ping::descriptors()?;
        descriptors.extend(info::descriptors(provider)?);
        descriptors.extend(authorize::descriptors(self.credentials)?);
        descriptors.extend(updater::descriptors(self.updates)?);
        if let Some((service, incoming)) = self.transfers {
            descriptors.extend(file_transfer::descriptors(service, incoming)?);
        }
        Ok(descriptors)
    }

    pub fn register(self, registry: &ActionRegistry) -> Result<()> {
        registry.register_all(self.descriptors()?)
    }
}
