pub mod mock;
pub mod rest;
pub mod supabase;
pub mod util;

use crate::core::config::{AppConfig, BackendConfig};
use crate::core::credentials::Credentials;
use crate::core::gateway::{Backend, Gateway};
use crate::store;
use anyhow::Result;
use mock::MockBackend;
use rest::RestBackend;
use std::sync::Arc;
use supabase::SupabaseBackend;
use tracing::debug;

/// Builds the backend selected in the config.
pub fn backend(config: &AppConfig) -> Result<Arc<dyn Backend>> {
    let backend: Arc<dyn Backend> = match &config.backend {
        BackendConfig::Rest {
            environment,
            base_url,
        } => {
            let url = base_url.as_deref().unwrap_or(environment.base_url());
            debug!("Using REST backend at {}", url);
            Arc::new(RestBackend::new(
                url,
                config.retry.clone(),
                config.market_cache_ttl(),
            )?)
        }
        BackendConfig::Supabase { url, anon_key } => {
            debug!("Using Supabase project at {}", url);
            Arc::new(SupabaseBackend::new(url, anon_key, config.retry.clone())?)
        }
        BackendConfig::Mock { latency_ms } => {
            debug!("Using mock backend ({}ms latency)", latency_ms);
            Arc::new(MockBackend::seeded(*latency_ms)?)
        }
    };
    Ok(backend)
}

/// Opens the configured credential store and backend behind one gateway.
pub fn connect(config: &AppConfig) -> Result<Gateway> {
    let credentials = Arc::new(Credentials::new(store::credential_store(config)?));
    Ok(Gateway::new(backend(config)?, credentials).with_projection(config.projection))
}
