//! Runtime
//!
//! Entry point of a scopes process. A runtime owns one middleware, the
//! reaper for client reply objects and the scopes it serves.
//!
//! ```text
//!  Runtime::create(server, config)
//!     ├─ Middleware (adapters, invoker, connection reaper)
//!     ├─ reply reaper (created on first client query)
//!     ├─ RegistryProxy ──► "<registry id>-R"
//!     └─ scopes: id ──► ScopeBase  (served on adapter "<id>")
//! ```

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use scopes_rpc::{panic_message, DestroyPolicy, ObjectProxy, Reaper};
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::error::{Result, ScopesError};
use crate::middleware::Middleware;
use crate::proxies::RegistryProxy;
use crate::query::ScopeBase;
use crate::registry::{Registry, RegistryObject, RegistryServant, ScopeMetadata, ScopeState};
use crate::scope_object::ScopeObject;
use crate::scope_proxy::ScopeProxy;

pub struct Runtime {
    middleware: Arc<Middleware>,
    registry: Mutex<Option<Arc<RegistryProxy>>>,
    reply_reaper: Mutex<Option<Arc<Reaper>>>,
    /// `None` while the scope's `start` hook runs
    scopes: Mutex<HashMap<String, Option<Arc<dyn ScopeBase>>>>,
    destroyed: AtomicBool,
}

impl Runtime {
    /// Start a runtime for `server_name`. Must be called within a tokio
    /// runtime.
    pub fn create(server_name: &str, config: RuntimeConfig) -> Result<Arc<Self>> {
        let middleware = Middleware::new(server_name, config)?;
        middleware.start()?;
        info!("Runtime {} created", server_name);
        Ok(Arc::new(Self {
            middleware,
            registry: Mutex::new(None),
            reply_reaper: Mutex::new(None),
            scopes: Mutex::new(HashMap::new()),
            destroyed: AtomicBool::new(false),
        }))
    }

    /// Like [`create`](Self::create) with the configuration read from a TOML file
    pub fn create_from_file(server_name: &str, path: &Path) -> Result<Arc<Self>> {
        Self::create(server_name, RuntimeConfig::from_file(path)?)
    }

    pub fn server_name(&self) -> &str {
        self.middleware.server_name()
    }

    pub fn config(&self) -> &RuntimeConfig {
        self.middleware.config()
    }

    pub fn middleware(&self) -> &Arc<Middleware> {
        &self.middleware
    }

    fn check_alive(&self) -> Result<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(ScopesError::Logic(format!(
                "Runtime {} has been destroyed",
                self.server_name()
            )));
        }
        Ok(())
    }

    /// Proxy to the registry named in the configuration
    pub fn registry(&self) -> Result<Arc<RegistryProxy>> {
        self.check_alive()?;
        let mut slot = self.registry.lock();
        if let Some(registry) = slot.as_ref() {
            return Ok(Arc::clone(registry));
        }
        let registry = Arc::new(self.middleware.registry_proxy()?);
        *slot = Some(Arc::clone(&registry));
        Ok(registry)
    }

    /// Reaper that finishes client reply objects nobody pushes to any more
    pub fn reply_reaper(&self) -> Result<Arc<Reaper>> {
        self.check_alive()?;
        let mut slot = self.reply_reaper.lock();
        if let Some(reaper) = slot.as_ref() {
            return Ok(Arc::clone(reaper));
        }
        let config = self.config();
        let reaper = Arc::new(Reaper::new(
            config.reap_interval(),
            config.reap_expiry(),
            DestroyPolicy::CallbackOnDestroy,
        )?);
        *slot = Some(Arc::clone(&reaper));
        Ok(reaper)
    }

    /// Client handle for the scope described by `metadata`
    pub fn scope_proxy(&self, metadata: &ScopeMetadata) -> Result<ScopeProxy> {
        let proxy = self.middleware.object_proxy(&metadata.proxy)?;
        Ok(ScopeProxy::new(
            &metadata.scope_id,
            proxy,
            Arc::clone(&self.middleware),
            self.reply_reaper()?,
        ))
    }

    /// Look `scope_id` up in the registry and return a handle for it
    pub async fn locate_scope(&self, scope_id: &str) -> Result<ScopeProxy> {
        let metadata = self.registry()?.get_metadata(scope_id).await?;
        self.scope_proxy(&metadata)
    }

    /// Start `scope` and serve it under `scope_id`. The registry is told the
    /// scope is ready; failing to reach it is only logged.
    pub async fn run_scope(&self, scope_id: &str, scope: Arc<dyn ScopeBase>) -> Result<ObjectProxy> {
        self.check_alive()?;
        if scope_id.is_empty() || scope_id.contains('/') {
            return Err(ScopesError::InvalidArgument(format!(
                "run_scope(): invalid scope id \"{}\"",
                scope_id
            )));
        }
        if self.middleware.is_reserved_adapter_name(scope_id) {
            return Err(ScopesError::InvalidArgument(format!(
                "run_scope(): scope id \"{}\" is reserved by the runtime",
                scope_id
            )));
        }
        {
            let mut scopes = self.scopes.lock();
            if scopes.contains_key(scope_id) {
                return Err(ScopesError::Logic(format!(
                    "run_scope(): scope {} is already running",
                    scope_id
                )));
            }
            scopes.insert(scope_id.to_string(), None);
        }

        if let Err(e) = start_hook(scope_id, Arc::clone(&scope)).await {
            self.scopes.lock().remove(scope_id);
            return Err(e);
        }
        let proxy = match self.serve_scope(scope_id, &scope).await {
            Ok(proxy) => proxy,
            Err(e) => {
                self.scopes.lock().remove(scope_id);
                stop_hook(scope_id, scope).await;
                return Err(e);
            }
        };
        info!("Runtime {}: scope {} running at {}", self.server_name(), scope_id, proxy);

        self.announce(scope_id, ScopeState::Ready).await;
        Ok(proxy)
    }

    /// Add the scope servant and fill in the reserved slot. Fails if the
    /// runtime was destroyed while the scope was starting.
    async fn serve_scope(&self, scope_id: &str, scope: &Arc<dyn ScopeBase>) -> Result<ObjectProxy> {
        self.check_alive()?;
        let servant = ScopeObject::new(scope_id, Arc::clone(scope), &self.middleware);
        let proxy = self.middleware.add_scope_object(scope_id, servant).await?;

        let filled = match self.scopes.lock().get_mut(scope_id) {
            Some(slot) => {
                *slot = Some(Arc::clone(scope));
                true
            }
            None => false,
        };
        if !filled {
            if let Err(e) = self.middleware.stop_adapter(scope_id).await {
                warn!("Runtime: scope {}: {}", scope_id, e);
            }
            return Err(ScopesError::Logic(format!(
                "Runtime {} destroyed while scope {} was starting",
                self.server_name(),
                scope_id
            )));
        }
        Ok(proxy)
    }

    /// Stop serving `scope_id` and call its `stop` hook
    pub async fn stop_scope(&self, scope_id: &str) -> Result<()> {
        let removed = {
            let mut scopes = self.scopes.lock();
            match scopes.get(scope_id) {
                Some(None) => {
                    return Err(ScopesError::Logic(format!(
                        "stop_scope(): scope {} is still starting",
                        scope_id
                    )))
                }
                Some(Some(_)) => scopes.remove(scope_id).flatten(),
                None => None,
            }
        };
        let scope = removed.ok_or_else(|| ScopesError::not_found("scope", scope_id))?;
        self.announce(scope_id, ScopeState::Stopping).await;
        if let Err(e) = self.middleware.stop_adapter(scope_id).await {
            warn!("Runtime: scope {}: {}", scope_id, e);
        }
        stop_hook(scope_id, scope).await;
        Ok(())
    }

    async fn announce(&self, scope_id: &str, state: ScopeState) {
        let registry = match self.registry() {
            Ok(registry) => registry,
            Err(e) => {
                warn!("Runtime: cannot reach registry: {}", e);
                return;
            }
        };
        if let Err(e) = registry.set_scope_state(scope_id, state).await {
            warn!(
                "Runtime: could not report state {:?} of scope {} to registry: {}",
                state, scope_id, e
            );
        }
    }

    /// Serve `registry` under the configured registry identity
    pub async fn serve_registry(&self, registry: Arc<RegistryObject>) -> Result<ObjectProxy> {
        self.check_alive()?;
        let proxy = self
            .middleware
            .add_registry_object(RegistryServant::new(registry))
            .await?;
        info!("Runtime {}: registry at {}", self.server_name(), proxy);
        Ok(proxy)
    }

    /// Stop every scope, the middleware and the reply reaper. Pending client
    /// queries finish with an error.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        // pending replies finish with an error while their objects still exist
        let reaper = self.reply_reaper.lock().take();
        if let Some(reaper) = reaper {
            if let Err(e) = tokio::task::spawn_blocking(move || reaper.destroy()).await {
                warn!("Runtime: reply reaper: {}", e);
            }
        }

        let scopes: Vec<_> = self.scopes.lock().drain().collect();
        self.middleware.stop().await;
        // scopes still starting are stopped by their own run_scope call
        for (scope_id, scope) in scopes {
            if let Some(scope) = scope {
                stop_hook(&scope_id, scope).await;
            }
        }
        self.registry.lock().take();
        info!("Runtime {} destroyed", self.server_name());
    }
}

async fn start_hook(scope_id: &str, scope: Arc<dyn ScopeBase>) -> Result<()> {
    let id = scope_id.to_string();
    tokio::task::spawn_blocking(move || match catch_unwind(AssertUnwindSafe(|| scope.start(&id))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ScopesError::Resource(format!("scope {}: start() failed: {}", id, e))),
        Err(panic) => Err(ScopesError::Resource(format!(
            "scope {}: start() failed: {}",
            id,
            panic_message(&*panic)
        ))),
    })
    .await
    .map_err(scopes_rpc::MiddlewareError::from)?
}

async fn stop_hook(scope_id: &str, scope: Arc<dyn ScopeBase>) {
    let outcome = tokio::task::spawn_blocking(move || catch_unwind(AssertUnwindSafe(|| scope.stop()))).await;
    match outcome {
        Ok(Ok(())) => debug!("Runtime: scope {} stopped", scope_id),
        Ok(Err(panic)) => warn!(
            "Runtime: scope {}: stop() panicked: {}",
            scope_id,
            panic_message(&*panic)
        ),
        Err(e) => warn!("Runtime: scope {}: stop() failed: {}", scope_id, e),
    }
}
