//! Scope registry
//!
//! A registry maps scope ids to [`ScopeMetadata`] and knows whether the scope
//! behind each entry is running. Three implementations share the
//! [`Registry`] trait:
//!
//! ```text
//!   RegistryProxy ──twoway──► RegistryServant ──► RegistryObject ──► remote
//!   (client side)             (<id>-R adapter)    (local scopes)     CachingRegistry
//! ```

mod caching_registry;
mod events;
mod metadata;
mod registry_object;
mod servant;

pub use caching_registry::*;
pub use events::*;
pub use metadata::*;
pub use registry_object::*;
pub use servant::*;

use async_trait::async_trait;
use scopes_rpc::ProxyString;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Predicate for [`Registry::list_if`]
pub type ScopePredicate<'a> = &'a (dyn Fn(&ScopeMetadata) -> bool + Send + Sync);

/// Directory of scopes
#[async_trait]
pub trait Registry: Send + Sync {
    /// Metadata of one scope; `NotFound` if unknown
    async fn get_metadata(&self, scope_id: &str) -> Result<ScopeMetadata>;

    /// Snapshot of every known scope
    async fn list(&self) -> Result<MetadataMap>;

    /// Snapshot of the scopes accepted by `predicate`
    async fn list_if(&self, predicate: ScopePredicate<'_>) -> Result<MetadataMap> {
        let mut scopes = self.list().await?;
        scopes.retain(|_, meta| predicate(meta));
        Ok(scopes)
    }

    /// Proxy of a scope object
    async fn locate(&self, scope_id: &str) -> Result<ProxyString>;

    async fn is_scope_running(&self, scope_id: &str) -> Result<bool>;
}

/// State reported by a scope process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeState {
    Ready,
    Stopping,
}

/// Registry's view of a scope process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessState::Stopped => write!(f, "Stopped"),
            ProcessState::Starting => write!(f, "Starting"),
            ProcessState::Running => write!(f, "Running"),
            ProcessState::Stopping => write!(f, "Stopping"),
        }
    }
}
