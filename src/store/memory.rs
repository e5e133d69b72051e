use crate::core::cache::Cache;
use crate::core::credentials::{CredentialStore, Session};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

struct CacheValue<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> CacheValue<V> {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= Instant::now())
    }
}

/// In-process cache; expired entries are dropped when next read.
pub struct MemoryCache<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    inner: Arc<Mutex<HashMap<K, CacheValue<V>>>>,
}

impl<K, V> MemoryCache<K, V>
where
    K: Eq + Hash + Send + Sync,
    V: Clone + Send + Sync,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K, V> Default for MemoryCache<K, V>
where
    K: Eq + Hash + Send + Sync,
    V: Clone + Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K, V> Cache<K, V> for MemoryCache<K, V>
where
    K: Eq + Hash + Send + Sync + std::fmt::Debug + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &K) -> Option<V> {
        let mut cache = self.inner.lock().await;
        match cache.get(key) {
            Some(entry) if entry.is_expired() => {
                debug!("Cache entry expired for key: {:?}", key);
                cache.remove(key);
                None
            }
            Some(entry) => {
                debug!("Cache HIT for key: {:?}", key);
                Some(entry.value.clone())
            }
            None => {
                debug!("Cache MISS for key: {:?}", key);
                None
            }
        }
    }

    async fn put(&self, key: K, value: V, ttl: Option<Duration>) {
        let expires_at = ttl.map(|duration| Instant::now() + duration);
        let mut cache = self.inner.lock().await;
        debug!("Cache PUT for key: {:?}", key);
        cache.insert(key, CacheValue { value, expires_at });
    }

    async fn remove(&self, key: &K) {
        let mut cache = self.inner.lock().await;
        cache.remove(key);
        debug!("Cache REMOVE for key: {:?}", key);
    }

    async fn clear(&self) {
        let mut cache = self.inner.lock().await;
        cache.clear();
        debug!("Cache CLEAR");
    }
}

/// Keeps the session for the lifetime of the process only.
#[derive(Default)]
pub struct MemoryCredentialStore {
    session: RwLock<Option<Session>>,
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<Session>> {
        let session = self
            .session
            .read()
            .map_err(|_| anyhow!("Credential store lock poisoned"))?;
        Ok(session.clone())
    }

    fn save(&self, session: &Session) -> Result<()> {
        let mut slot = self
            .session
            .write()
            .map_err(|_| anyhow!("Credential store lock poisoned"))?;
        *slot = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut slot = self
            .session
            .write()
            .map_err(|_| anyhow!("Credential store lock poisoned"))?;
        *slot = None;
        Ok(())
    }
}
