use crate::core::credentials::{CredentialStore, Session};
use anyhow::{Context, Result};
use fjall::{Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use std::path::Path;
use tracing::debug;

const PARTITION: &str = "credentials";
const SESSION_KEY: &str = "session";

/// Keeps the session in a fjall partition so a login outlives the process.
pub struct DiskCredentialStore {
    keyspace: Keyspace,
    partition: PartitionHandle,
}

impl DiskCredentialStore {
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create data directory: {}", path.display()))?;
        let keyspace = fjall::Config::new(path.join("session"))
            .open()
            .with_context(|| format!("Failed to open keyspace at {}", path.display()))?;
        let partition = keyspace
            .open_partition(PARTITION, PartitionCreateOptions::default())
            .context("Failed to open credentials partition")?;
        Ok(Self {
            keyspace,
            partition,
        })
    }
}

impl CredentialStore for DiskCredentialStore {
    fn load(&self) -> Result<Option<Session>> {
        let Some(bytes) = self.partition.get(SESSION_KEY)? else {
            debug!("No saved session");
            return Ok(None);
        };
        let session: Session =
            serde_json::from_slice(&bytes).context("Saved session is corrupt")?;
        debug!("Loaded saved session for {}", session.user.data.email);
        Ok(Some(session))
    }

    fn save(&self, session: &Session) -> Result<()> {
        self.partition
            .insert(SESSION_KEY, serde_json::to_vec(session)?)?;
        self.keyspace.persist(PersistMode::SyncAll)?;
        debug!("Saved session for {}", session.user.data.email);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.partition.remove(SESSION_KEY)?;
        self.keyspace.persist(PersistMode::SyncAll)?;
        debug!("Removed saved session");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::credentials::tests::demo_session;
    use tempfile::tempdir;

    #[test]
    fn test_session_survives_reopen() {
        let dir = tempdir().unwrap();
        let session = demo_session(Some(3600));
        {
            let store = DiskCredentialStore::open(dir.path()).unwrap();
            assert!(store.load().unwrap().is_none());
            store.save(&session).unwrap();
        }

        let store = DiskCredentialStore::open(dir.path()).unwrap();
        assert_eq!(store.load().unwrap(), Some(session));
    }

    #[test]
    fn test_clear_removes_session() {
        let dir = tempdir().unwrap();
        let store = DiskCredentialStore::open(dir.path()).unwrap();
        store.save(&demo_session(None)).unwrap();
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }
}
