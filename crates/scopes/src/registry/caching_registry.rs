//! Registry backed by a periodically refreshed remote scope list
//!
//! A background task polls a [`RemoteScopeSource`] and replaces the cached
//! snapshot on success. Lookups always answer from the cache, so callers
//! see stale data between refreshes instead of waiting on the network.
//! After a failed poll the task retries on the (usually shorter) failed
//! refresh interval.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use scopes_rpc::ProxyString;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::events::{RegistryEvent, RegistryNotifier, Subscription};
use super::metadata::{MetadataMap, ScopeMetadata};
use super::Registry;
use crate::error::{Result, ScopesError};

/// A scope offered by a remote source
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteScope {
    pub metadata: ScopeMetadata,
    /// Server that answers queries for this scope
    pub base_url: String,
}

/// Where the remote scope list comes from
#[async_trait]
pub trait RemoteScopeSource: Send + Sync {
    /// Server the list is fetched from
    fn base_url(&self) -> String;

    async fn fetch(&self) -> Result<Vec<RemoteScope>>;
}

/// Refresh intervals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachingRegistryConfig {
    pub refresh_interval: Duration,
    pub failed_refresh_interval: Duration,
}

impl Default for CachingRegistryConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(24 * 60 * 60),
            failed_refresh_interval: Duration::from_secs(10),
        }
    }
}

#[derive(Default)]
struct Cache {
    scopes: MetadataMap,
    base_urls: HashMap<String, String>,
}

struct Inner {
    source: Arc<dyn RemoteScopeSource>,
    cache: RwLock<Cache>,
    notifier: RegistryNotifier,
    refreshes: AtomicU64,
    failures: AtomicU64,
}

impl Inner {
    async fn refresh(&self) -> Result<bool> {
        let scopes = match self.source.fetch().await {
            Ok(scopes) => scopes,
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };
        self.refreshes.fetch_add(1, Ordering::Relaxed);

        let mut fresh = Cache::default();
        for remote in scopes {
            let id = remote.metadata.scope_id.clone();
            fresh.base_urls.insert(id.clone(), remote.base_url);
            fresh.scopes.insert(id, remote.metadata);
        }

        let changed = {
            let mut cache = self.cache.write();
            let changed = cache.scopes != fresh.scopes;
            *cache = fresh;
            changed
        };
        if changed {
            info!(
                "CachingRegistry: scope list from {} changed",
                self.source.base_url()
            );
            self.notifier.notify(RegistryEvent::ListChanged);
        }
        Ok(changed)
    }
}

/// Remote registry with a local cache
pub struct CachingRegistry {
    inner: Arc<Inner>,
    config: CachingRegistryConfig,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CachingRegistry {
    /// Start the refresh task. The first poll runs immediately. Must be
    /// called within a tokio runtime.
    pub fn start(source: Arc<dyn RemoteScopeSource>, config: CachingRegistryConfig) -> Arc<Self> {
        let inner = Arc::new(Inner {
            source,
            cache: RwLock::new(Cache::default()),
            notifier: RegistryNotifier::new(),
            refreshes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(refresh_loop(Arc::clone(&inner), config, shutdown_rx));

        Arc::new(Self {
            inner,
            config,
            shutdown_tx,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn config(&self) -> &CachingRegistryConfig {
        &self.config
    }

    /// Poll the source now. Returns whether the scope list changed.
    pub async fn refresh(&self) -> Result<bool> {
        self.inner.refresh().await
    }

    pub fn has_scope(&self, scope_id: &str) -> bool {
        self.inner.cache.read().scopes.contains_key(scope_id)
    }

    /// Server answering queries for `scope_id`
    pub fn get_base_url(&self, scope_id: &str) -> Result<String> {
        self.inner
            .cache
            .read()
            .base_urls
            .get(scope_id)
            .cloned()
            .ok_or_else(|| ScopesError::not_found("remote scope", scope_id))
    }

    /// Number of successful and failed polls so far
    pub fn refresh_counts(&self) -> (u64, u64) {
        (
            self.inner.refreshes.load(Ordering::Relaxed),
            self.inner.failures.load(Ordering::Relaxed),
        )
    }

    pub fn on_list_update<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.notifier.on_list_update(callback)
    }

    /// Stop the refresh task and wait for it to exit
    pub async fn stop(&self) {
        self.shutdown_tx.send_replace(true);
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("CachingRegistry: refresh task failed: {}", e);
            }
        }
    }
}

impl Drop for CachingRegistry {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}

async fn refresh_loop(
    inner: Arc<Inner>,
    config: CachingRegistryConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    debug!(
        "CachingRegistry: refresh task started for {}",
        inner.source.base_url()
    );
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        let outcome = tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            outcome = inner.refresh() => outcome,
        };
        let wait = match outcome {
            Ok(_) => config.refresh_interval,
            Err(e) => {
                warn!(
                    "CachingRegistry: refresh from {} failed, retrying in {:?}: {}",
                    inner.source.base_url(),
                    config.failed_refresh_interval,
                    e
                );
                config.failed_refresh_interval
            }
        };

        tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep(wait) => {}
        }
    }
    debug!("CachingRegistry: refresh task stopped");
}

#[async_trait]
impl Registry for CachingRegistry {
    async fn get_metadata(&self, scope_id: &str) -> Result<ScopeMetadata> {
        self.inner
            .cache
            .read()
            .scopes
            .get(scope_id)
            .cloned()
            .ok_or_else(|| ScopesError::not_found("scope", scope_id))
    }

    async fn list(&self) -> Result<MetadataMap> {
        Ok(self.inner.cache.read().scopes.clone())
    }

    async fn locate(&self, scope_id: &str) -> Result<ProxyString> {
        Ok(self.get_metadata(scope_id).await?.proxy)
    }

    async fn is_scope_running(&self, _scope_id: &str) -> Result<bool> {
        Err(ScopesError::Registry(
            "CachingRegistry::is_scope_running(): operation not available".to_string(),
        ))
    }
}
