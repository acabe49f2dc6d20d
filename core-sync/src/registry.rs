//! Named set of remote providers, mutable at runtime.

use crate::{Result, SyncError};
use bridge_traits::SyncProvider;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Providers keyed by name; iteration order is the name order so fan-out is
/// deterministic.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<BTreeMap<String, Arc<dyn SyncProvider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, name: impl Into<String>, provider: Arc<dyn SyncProvider>) -> Result<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(SyncError::Config("Provider name cannot be empty".to_string()));
        }

        let mut providers = self.providers.write().await;
        if providers.contains_key(&name) {
            return Err(SyncError::ProviderExists(name));
        }
        providers.insert(name.clone(), provider);
        info!(provider = %name, "Registered provider");
        Ok(())
    }

    pub async fn remove(&self, name: &str) -> Result<Arc<dyn SyncProvider>> {
        let removed = self.providers.write().await.remove(name);
        match removed {
            Some(provider) => {
                info!(provider = %name, "Unregistered provider");
                Ok(provider)
            }
            None => Err(SyncError::ProviderNotFound(name.to_string())),
        }
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn SyncProvider>> {
        self.providers.read().await.get(name).cloned()
    }

    pub async fn names(&self) -> Vec<String> {
        self.providers.read().await.keys().cloned().collect()
    }

    /// Point-in-time copy, so calls into providers never hold the lock.
    pub async fn snapshot(&self) -> Vec<(String, Arc<dyn SyncProvider>)> {
        self.providers
            .read()
            .await
            .iter()
            .map(|(name, provider)| (name.clone(), Arc::clone(provider)))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.providers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.providers.read().await.is_empty()
    }
}
