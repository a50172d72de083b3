//! Middleware facade
//!
//! Owns the invoker, the connection reaper and every object adapter of one
//! server process. Adapters are created on first use and named after what
//! they host:
//!
//! | adapter              | hosts                | mode   |
//! |----------------------|----------------------|--------|
//! | `<server>-q`         | query objects        | oneway |
//! | `<server>-c`         | query control objects| oneway |
//! | `<server>-r`         | reply objects        | oneway |
//! | `<scope id>`         | one scope            | twoway |
//! | `<registry id>-R`    | the registry         | twoway |
//!
//! Each adapter listens on `ipc://<endpoint_dir>/<adapter name>`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use scopes_rpc::{
    AdapterBinding, DestroyPolicy, Endpoint, Invoker, InvokerConfig, ObjectAdapter,
    ObjectAdapterConfig, ObjectProxy, ProxyString, Reaper, RequestMode, Servant,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::error::{Result, ScopesError};
use crate::proxies::RegistryProxy;
use crate::registry::SCOPE_CATEGORY;

pub const QUERY_CATEGORY: &str = "Query";
pub const QUERY_CTRL_CATEGORY: &str = "QueryCtrl";
pub const REPLY_CATEGORY: &str = "Reply";
pub const REGISTRY_CATEGORY: &str = "Registry";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiddlewareState {
    Created,
    Started,
    Stopping,
    Stopped,
}

impl fmt::Display for MiddlewareState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MiddlewareState::Created => "Created",
            MiddlewareState::Started => "Started",
            MiddlewareState::Stopping => "Stopping",
            MiddlewareState::Stopped => "Stopped",
        };
        f.write_str(s)
    }
}

struct AdapterSpec {
    name: String,
    mode: RequestMode,
    category: &'static str,
    pool_size: usize,
}

pub struct Middleware {
    server_name: String,
    config: RuntimeConfig,
    invoker: Invoker,
    connection_reaper: Arc<Reaper>,
    state: Mutex<MiddlewareState>,
    adapters: tokio::sync::Mutex<HashMap<String, Arc<ObjectAdapter>>>,
}

impl Middleware {
    /// Must be called within a tokio runtime
    pub fn new(server_name: &str, config: RuntimeConfig) -> Result<Arc<Self>> {
        if server_name.is_empty() || server_name.contains('/') {
            return Err(ScopesError::InvalidArgument(format!(
                "Middleware(): invalid server name \"{}\"",
                server_name
            )));
        }
        config.validate()?;

        let idle = config.middleware.connection_idle();
        let connection_reaper = Arc::new(Reaper::new(
            config.reap_interval().min(idle),
            idle,
            DestroyPolicy::NoCallbackOnDestroy,
        )?);
        let invoker = Invoker::new(
            InvokerConfig {
                twoway_timeout: config.middleware.twoway_timeout(),
                max_frame_size: config.middleware.max_frame_size,
            },
            Some(Arc::clone(&connection_reaper)),
        )?;

        Ok(Arc::new(Self {
            server_name: server_name.to_string(),
            config,
            invoker,
            connection_reaper,
            state: Mutex::new(MiddlewareState::Created),
            adapters: tokio::sync::Mutex::new(HashMap::new()),
        }))
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn invoker(&self) -> &Invoker {
        &self.invoker
    }

    pub fn state(&self) -> MiddlewareState {
        *self.state.lock()
    }

    /// Create the endpoint directory and accept adapter creation
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            MiddlewareState::Started => return Ok(()),
            MiddlewareState::Created => {}
            other => {
                return Err(ScopesError::Logic(format!(
                    "Middleware::start(): cannot start in {} state",
                    other
                )))
            }
        }
        std::fs::create_dir_all(&self.config.middleware.endpoint_dir).map_err(|e| {
            ScopesError::Config(format!(
                "cannot create endpoint directory {}: {}",
                self.config.middleware.endpoint_dir.display(),
                e
            ))
        })?;
        *state = MiddlewareState::Started;
        info!("Middleware {} started", self.server_name);
        Ok(())
    }

    /// Endpoint string of the adapter called `adapter_name`
    pub fn endpoint(&self, adapter_name: &str) -> String {
        format!(
            "ipc://{}",
            self.config.middleware.endpoint_dir.join(adapter_name).display()
        )
    }

    fn check_started(&self) -> Result<()> {
        let state = self.state();
        if state != MiddlewareState::Started {
            return Err(ScopesError::Logic(format!(
                "Middleware {} in {} state",
                self.server_name, state
            )));
        }
        Ok(())
    }

    async fn find_adapter(&self, spec: AdapterSpec) -> Result<Arc<ObjectAdapter>> {
        self.check_started()?;
        let mut adapters = self.adapters.lock().await;
        if let Some(adapter) = adapters.get(&spec.name) {
            return Ok(Arc::clone(adapter));
        }

        let endpoint = Endpoint::parse(&self.endpoint(&spec.name))?;
        let config = ObjectAdapterConfig::new(spec.name.clone(), endpoint, spec.mode)
            .with_category(spec.category)
            .with_pool_size(spec.pool_size)
            .with_max_frame_size(self.config.middleware.max_frame_size);
        let adapter = ObjectAdapter::new(config, self.invoker.clone());
        adapter.activate().await?;
        adapters.insert(spec.name, Arc::clone(&adapter));
        Ok(adapter)
    }

    async fn add_with_uuid(
        &self,
        spec: AdapterSpec,
        servant: Arc<dyn Servant>,
    ) -> Result<(ObjectProxy, AdapterBinding)> {
        let adapter = self.find_adapter(spec).await?;
        let identity = Uuid::new_v4().to_string();
        let proxy = adapter.add(&identity, servant)?;
        Ok((proxy, AdapterBinding::new(&adapter, identity)))
    }

    fn oneway_spec(&self, suffix: &str, category: &'static str, pool_size: usize) -> AdapterSpec {
        AdapterSpec {
            name: format!("{}-{}", self.server_name, suffix),
            mode: RequestMode::Oneway,
            category,
            pool_size,
        }
    }

    pub async fn add_query_object(
        &self,
        servant: Arc<dyn Servant>,
    ) -> Result<(ObjectProxy, AdapterBinding)> {
        let spec = self.oneway_spec("q", QUERY_CATEGORY, self.config.middleware.oneway_pool_size);
        self.add_with_uuid(spec, servant).await
    }

    pub async fn add_ctrl_object(
        &self,
        servant: Arc<dyn Servant>,
    ) -> Result<(ObjectProxy, AdapterBinding)> {
        let spec = self.oneway_spec(
            "c",
            QUERY_CTRL_CATEGORY,
            self.config.middleware.oneway_pool_size,
        );
        self.add_with_uuid(spec, servant).await
    }

    /// Reply objects share a single worker so a reply sees its pushes in
    /// the order they were sent
    pub async fn add_reply_object(
        &self,
        servant: Arc<dyn Servant>,
    ) -> Result<(ObjectProxy, AdapterBinding)> {
        let spec = self.oneway_spec("r", REPLY_CATEGORY, 1);
        self.add_with_uuid(spec, servant).await
    }

    /// True for the names of the query, control, reply and registry adapters
    pub fn is_reserved_adapter_name(&self, name: &str) -> bool {
        ["q", "c", "r"]
            .iter()
            .any(|suffix| name == format!("{}-{}", self.server_name, suffix))
            || name == format!("{}-R", self.config.runtime.registry_identity)
    }

    /// Serve a scope on its own adapter under its id
    pub async fn add_scope_object(
        &self,
        scope_id: &str,
        servant: Arc<dyn Servant>,
    ) -> Result<ObjectProxy> {
        if self.is_reserved_adapter_name(scope_id) {
            return Err(ScopesError::InvalidArgument(format!(
                "scope id \"{}\" collides with an internal adapter name",
                scope_id
            )));
        }
        let adapter = self
            .find_adapter(AdapterSpec {
                name: scope_id.to_string(),
                mode: RequestMode::Twoway,
                category: SCOPE_CATEGORY,
                pool_size: self.config.middleware.twoway_pool_size,
            })
            .await?;
        Ok(adapter.add(scope_id, servant)?)
    }

    pub async fn add_registry_object(&self, servant: Arc<dyn Servant>) -> Result<ObjectProxy> {
        let registry_id = &self.config.runtime.registry_identity;
        let adapter = self
            .find_adapter(AdapterSpec {
                name: format!("{}-R", registry_id),
                mode: RequestMode::Twoway,
                category: REGISTRY_CATEGORY,
                pool_size: self.config.middleware.twoway_pool_size,
            })
            .await?;
        Ok(adapter.add(registry_id, servant)?)
    }

    /// Shut down and forget one adapter
    pub async fn stop_adapter(&self, name: &str) -> Result<()> {
        let adapter = self.adapters.lock().await.remove(name);
        let adapter = adapter.ok_or_else(|| ScopesError::not_found("adapter", name))?;
        adapter.shutdown();
        adapter.wait_for_shutdown().await;
        debug!("Middleware {}: adapter {} stopped", self.server_name, name);
        Ok(())
    }

    pub async fn has_adapter(&self, name: &str) -> bool {
        self.adapters.lock().await.contains_key(name)
    }

    pub async fn adapter(&self, name: &str) -> Option<Arc<ObjectAdapter>> {
        self.adapters.lock().await.get(name).cloned()
    }

    /// Proxy for any stringified proxy
    pub fn object_proxy(&self, proxy: &ProxyString) -> Result<ObjectProxy> {
        Ok(ObjectProxy::new(self.invoker.clone(), proxy.clone())?)
    }

    /// Proxy to the registry named in the configuration
    pub fn registry_proxy(&self) -> Result<RegistryProxy> {
        let registry_id = &self.config.runtime.registry_identity;
        let target = ProxyString::new(self.endpoint(&format!("{}-R", registry_id)), registry_id)
            .with_category(REGISTRY_CATEGORY)
            .with_mode(RequestMode::Twoway)
            .with_timeout(self.config.middleware.registry_timeout_ms as i64);
        Ok(RegistryProxy::new(
            self.object_proxy(&target)?,
            self.config.middleware.locate_timeout_ms as i64,
        ))
    }

    /// Shut down every adapter, then the outbound side
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock();
            match *state {
                MiddlewareState::Stopping | MiddlewareState::Stopped => return,
                _ => *state = MiddlewareState::Stopping,
            }
        }
        debug!("Middleware {}: stopping", self.server_name);

        let adapters: Vec<_> = self.adapters.lock().await.drain().map(|(_, a)| a).collect();
        for adapter in &adapters {
            adapter.shutdown();
        }
        for adapter in adapters {
            adapter.wait_for_shutdown().await;
        }

        self.invoker.shutdown().await;
        let reaper = Arc::clone(&self.connection_reaper);
        if let Err(e) = tokio::task::spawn_blocking(move || reaper.destroy()).await {
            warn!("Middleware {}: connection reaper: {}", self.server_name, e);
        }

        *self.state.lock() = MiddlewareState::Stopped;
        info!("Middleware {} stopped", self.server_name);
    }
}
