pub mod disk;
pub mod memory;

use crate::core::config::{AppConfig, CredentialStoreKind};
use crate::core::credentials::CredentialStore;
use anyhow::Result;
use disk::DiskCredentialStore;
use memory::MemoryCredentialStore;
use std::sync::Arc;
use tracing::debug;

/// Opens the credential store selected in the config.
pub fn credential_store(config: &AppConfig) -> Result<Arc<dyn CredentialStore>> {
    match config.credentials.store {
        CredentialStoreKind::Memory => {
            debug!("Using in-memory credential store");
            Ok(Arc::new(MemoryCredentialStore::default()))
        }
        CredentialStoreKind::Disk => {
            let path = config.default_data_path()?;
            debug!("Using credential store at {}", path.display());
            Ok(Arc::new(DiskCredentialStore::open(&path)?))
        }
    }
}
