//! Local registry

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use scopes_rpc::ProxyString;
use tracing::{debug, info, warn};

use super::events::{RegistryEvent, RegistryNotifier, Subscription};
use super::metadata::{MetadataMap, ScopeMetadata};
use super::{ProcessState, Registry, ScopeState};
use crate::error::{Result, ScopesError};

/// Registry of the scopes installed on this machine, optionally backed by a
/// remote registry for scopes it does not know itself
pub struct RegistryObject {
    scopes: RwLock<MetadataMap>,
    processes: Mutex<HashMap<String, ProcessState>>,
    remote: RwLock<Option<Arc<dyn Registry>>>,
    notifier: RegistryNotifier,
}

impl Default for RegistryObject {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryObject {
    pub fn new() -> Self {
        Self {
            scopes: RwLock::new(MetadataMap::new()),
            processes: Mutex::new(HashMap::new()),
            remote: RwLock::new(None),
            notifier: RegistryNotifier::new(),
        }
    }

    /// Add or replace a scope. Returns `false` if an entry with the same id
    /// was replaced.
    pub fn add_local_scope(&self, metadata: ScopeMetadata) -> Result<bool> {
        let scope_id = metadata.scope_id.clone();
        if scope_id.is_empty() {
            return Err(ScopesError::InvalidArgument(
                "RegistryObject::add_local_scope(): Cannot add scope with empty id".to_string(),
            ));
        }
        if scope_id.contains('/') {
            return Err(ScopesError::InvalidArgument(format!(
                "RegistryObject::add_local_scope(): Cannot create a scope with '/' in its id: {}",
                scope_id
            )));
        }

        let inserted = self
            .scopes
            .write()
            .insert(scope_id.clone(), metadata)
            .is_none();
        self.processes.lock().entry(scope_id.clone()).or_default();

        debug!(
            "Registry: {} scope \"{}\"",
            if inserted { "added" } else { "replaced" },
            scope_id
        );
        self.notifier.notify(RegistryEvent::ListChanged);
        Ok(inserted)
    }

    /// Remove a scope; `false` if it was not registered
    pub fn remove_local_scope(&self, scope_id: &str) -> bool {
        let removed = self.scopes.write().remove(scope_id).is_some();
        if removed {
            let was_running = matches!(
                self.processes.lock().remove(scope_id),
                Some(ProcessState::Running)
            );
            debug!("Registry: removed scope \"{}\"", scope_id);
            if was_running {
                self.notifier.notify(RegistryEvent::ScopeStateChanged {
                    scope_id: scope_id.to_string(),
                    running: false,
                });
            }
            self.notifier.notify(RegistryEvent::ListChanged);
        }
        removed
    }

    /// Fall back to `remote` for scopes not registered locally
    pub fn set_remote_registry(&self, remote: Arc<dyn Registry>) {
        *self.remote.write() = Some(remote);
        self.notifier.notify(RegistryEvent::ListChanged);
    }

    pub fn has_local_scope(&self, scope_id: &str) -> bool {
        self.scopes.read().contains_key(scope_id)
    }

    /// Mark a scope as being launched
    pub fn set_scope_starting(&self, scope_id: &str) -> Result<()> {
        let mut processes = self.processes.lock();
        let state = processes
            .get_mut(scope_id)
            .ok_or_else(|| ScopesError::not_found("scope", scope_id))?;
        if *state == ProcessState::Stopped {
            *state = ProcessState::Starting;
        }
        Ok(())
    }

    /// Apply a state reported by a scope process
    pub fn on_state_received(&self, scope_id: &str, state: ScopeState) -> Result<()> {
        let changed = {
            let mut processes = self.processes.lock();
            let current = processes.get_mut(scope_id).ok_or_else(|| {
                warn!(
                    "Registry: state {:?} received for unknown scope \"{}\"",
                    state, scope_id
                );
                ScopesError::not_found("scope", scope_id)
            })?;

            let next = match state {
                ScopeState::Ready => ProcessState::Running,
                ScopeState::Stopping => ProcessState::Stopped,
            };
            let changed = *current != next;
            debug!("Registry: scope \"{}\" {} -> {}", scope_id, current, next);
            *current = next;
            changed
        };

        if changed {
            let running = state == ScopeState::Ready;
            info!(
                "Registry: scope \"{}\" is {}",
                scope_id,
                if running { "running" } else { "stopped" }
            );
            self.notifier.notify(RegistryEvent::ScopeStateChanged {
                scope_id: scope_id.to_string(),
                running,
            });
        }
        Ok(())
    }

    pub fn process_state(&self, scope_id: &str) -> Option<ProcessState> {
        self.processes.lock().get(scope_id).copied()
    }

    pub fn notifier(&self) -> &RegistryNotifier {
        &self.notifier
    }

    pub fn on_list_update<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.notifier.on_list_update(callback)
    }

    pub fn on_scope_state_change<F>(&self, scope_id: &str, callback: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.notifier.on_scope_state_change(scope_id, callback)
    }

    fn remote(&self) -> Option<Arc<dyn Registry>> {
        self.remote.read().clone()
    }
}

#[async_trait]
impl Registry for RegistryObject {
    async fn get_metadata(&self, scope_id: &str) -> Result<ScopeMetadata> {
        if scope_id.is_empty() {
            return Err(ScopesError::InvalidArgument(
                "RegistryObject::get_metadata(): Cannot search for scope with empty id"
                    .to_string(),
            ));
        }

        let local = self.scopes.read().get(scope_id).cloned();
        if let Some(meta) = local {
            return Ok(meta);
        }
        match self.remote() {
            Some(remote) => remote.get_metadata(scope_id).await,
            None => Err(ScopesError::not_found("scope", scope_id)),
        }
    }

    async fn list(&self) -> Result<MetadataMap> {
        let mut all = match self.remote() {
            Some(remote) => remote.list().await.unwrap_or_else(|e| {
                warn!("Registry: remote list failed, serving local scopes only: {}", e);
                MetadataMap::new()
            }),
            None => MetadataMap::new(),
        };
        for (id, meta) in self.scopes.read().iter() {
            all.insert(id.clone(), meta.clone());
        }
        Ok(all)
    }

    async fn locate(&self, scope_id: &str) -> Result<ProxyString> {
        let meta = self.get_metadata(scope_id).await?;
        if self.process_state(scope_id) == Some(ProcessState::Stopped) {
            debug!("Registry: locate(\"{}\") while the scope is stopped", scope_id);
        }
        Ok(meta.proxy)
    }

    async fn is_scope_running(&self, scope_id: &str) -> Result<bool> {
        if let Some(state) = self.process_state(scope_id) {
            return Ok(state == ProcessState::Running);
        }
        match self.remote() {
            Some(remote) => remote.is_scope_running(scope_id).await,
            None => Err(ScopesError::not_found("scope", scope_id)),
        }
    }
}
