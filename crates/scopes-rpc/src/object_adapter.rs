//! Object adapter
//!
//! An adapter owns one endpoint, a table of servants keyed by identity and a
//! pool of worker tasks. All requests on an adapter use the same request
//! mode.
//!
//! ```text
//!   connections          broker             job queue         workers
//!  ┌──────────┐    ┌──────────────┐      ┌───────────┐     ┌──────────┐
//!  │ reader 1 ├───►│ accept loop  │      │           ├────►│ worker 1 │
//!  │ reader 2 ├──┐ │ (spawns one  │      │  bounded  │     │   ...    │
//!  │   ...    │  └►│  reader per  ├─────►│   mpsc    ├────►│ worker N │
//!  └──────────┘    │  connection) │      │           │     └────┬─────┘
//!                  └──────────────┘      └───────────┘          │
//!        ▲                                                       │
//!        └──────────── response (twoway only) ◄──────────────────┘
//! ```
//!
//! With a single worker, oneway requests are dispatched strictly in arrival
//! order. Twoway readers process one request at a time per connection.

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::io::split;
use tokio::sync::{mpsc, oneshot, watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, trace, warn};

use crate::error::{panic_message, MiddlewareError, Result};
use crate::frame::{Request, Response, RuntimeException};
use crate::invoker::Invoker;
use crate::proxy::{ObjectProxy, PING_OP};
use crate::proxy_string::{ProxyString, RequestMode, DEFAULT_CATEGORY};
use crate::servant::{Current, Servant};
use crate::transport::{Connection, Endpoint, FrameTransport, Listener, DEFAULT_MAX_FRAME_SIZE};

/// Lifecycle of an adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Inactive,
    Activating,
    Active,
    Deactivating,
    Destroyed,
    Failed,
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AdapterState::Inactive => "Inactive",
            AdapterState::Activating => "Activating",
            AdapterState::Active => "Active",
            AdapterState::Deactivating => "Deactivating",
            AdapterState::Destroyed => "Destroyed",
            AdapterState::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Adapter configuration
#[derive(Debug, Clone)]
pub struct ObjectAdapterConfig {
    pub name: String,
    pub endpoint: Endpoint,
    pub mode: RequestMode,
    /// Category put into proxies created by [`ObjectAdapter::add`]
    pub category: String,
    pub pool_size: usize,
    pub max_connections: usize,
    pub max_frame_size: usize,
}

impl ObjectAdapterConfig {
    pub fn new(name: impl Into<String>, endpoint: Endpoint, mode: RequestMode) -> Self {
        Self {
            name: name.into(),
            endpoint,
            mode,
            category: DEFAULT_CATEGORY.to_string(),
            pool_size: 1,
            max_connections: 1024,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }
}

/// Adapter statistics
#[derive(Debug, Default)]
pub struct AdapterStats {
    pub connections_accepted: AtomicU64,
    pub connections_active: AtomicU64,
    pub connections_rejected: AtomicU64,
    pub requests_received: AtomicU64,
    pub requests_dispatched: AtomicU64,
    pub requests_failed: AtomicU64,
}

impl AdapterStats {
    pub fn snapshot(&self) -> AdapterStatsSnapshot {
        AdapterStatsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            requests_received: self.requests_received.load(Ordering::Relaxed),
            requests_dispatched: self.requests_dispatched.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of adapter statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterStatsSnapshot {
    pub connections_accepted: u64,
    pub connections_active: u64,
    pub connections_rejected: u64,
    pub requests_received: u64,
    pub requests_dispatched: u64,
    pub requests_failed: u64,
}

struct Job {
    request: Request,
    reply: Option<oneshot::Sender<Response>>,
}

type ServantMap = HashMap<String, Arc<dyn Servant>>;

/// Server-side request dispatcher for one endpoint
pub struct ObjectAdapter {
    config: ObjectAdapterConfig,
    invoker: Invoker,
    state: Mutex<AdapterState>,
    servants: RwLock<ServantMap>,
    default_servants: RwLock<ServantMap>,
    shutdown_tx: watch::Sender<bool>,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    stats: Arc<AdapterStats>,
}

impl ObjectAdapter {
    /// Create an inactive adapter. `invoker` is used for the proxies handed
    /// out by [`add`](Self::add).
    pub fn new(config: ObjectAdapterConfig, invoker: Invoker) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            config,
            invoker,
            state: Mutex::new(AdapterState::Inactive),
            servants: RwLock::new(HashMap::new()),
            default_servants: RwLock::new(HashMap::new()),
            shutdown_tx,
            tasks: tokio::sync::Mutex::new(Vec::new()),
            stats: Arc::new(AdapterStats::default()),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.config.endpoint
    }

    pub fn mode(&self) -> RequestMode {
        self.config.mode
    }

    pub fn config(&self) -> &ObjectAdapterConfig {
        &self.config
    }

    pub fn state(&self) -> AdapterState {
        *self.state.lock()
    }

    pub fn stats(&self) -> &Arc<AdapterStats> {
        &self.stats
    }

    fn state_error(&self, state: AdapterState) -> MiddlewareError {
        MiddlewareError::AdapterState {
            adapter: self.config.name.clone(),
            state: state.to_string(),
        }
    }

    fn check_usable(&self) -> Result<()> {
        match self.state() {
            state @ (AdapterState::Deactivating
            | AdapterState::Destroyed
            | AdapterState::Failed) => Err(self.state_error(state)),
            _ => Ok(()),
        }
    }

    /// Proxy for `identity` on this adapter
    pub fn proxy(&self, identity: &str) -> Result<ObjectProxy> {
        let target = ProxyString::new(self.config.endpoint.to_string(), identity)
            .with_category(&self.config.category)
            .with_mode(self.config.mode);
        ObjectProxy::new(self.invoker.clone(), target)
    }

    /// Register `servant` under `identity` and return a proxy for it
    pub fn add(&self, identity: &str, servant: Arc<dyn Servant>) -> Result<ObjectProxy> {
        if identity.is_empty() {
            return Err(MiddlewareError::InvalidArgument(format!(
                "ObjectAdapter::add(): invalid empty identity (adapter: {})",
                self.config.name
            )));
        }
        self.check_usable()?;

        {
            let mut servants = self.servants.write();
            if servants.contains_key(identity) {
                return Err(MiddlewareError::Logic(format!(
                    "ObjectAdapter::add(): cannot add identity \"{}\": identity already in use (adapter: {})",
                    identity, self.config.name
                )));
            }
            servants.insert(identity.to_string(), servant);
        }
        trace!("Adapter {}: added servant {}", self.config.name, identity);
        self.proxy(identity)
    }

    /// Unregister the servant for `identity` and return it
    pub fn remove(&self, identity: &str) -> Result<Arc<dyn Servant>> {
        if self.state() == AdapterState::Destroyed {
            return Err(self.state_error(AdapterState::Destroyed));
        }
        let removed = self.servants.write().remove(identity);
        match removed {
            Some(servant) => {
                trace!("Adapter {}: removed servant {}", self.config.name, identity);
                Ok(servant)
            }
            None => Err(MiddlewareError::Logic(format!(
                "ObjectAdapter::remove(): cannot remove identity \"{}\": identity not present (adapter: {})",
                identity, self.config.name
            ))),
        }
    }

    pub fn find(&self, identity: &str) -> Option<Arc<dyn Servant>> {
        self.servants.read().get(identity).cloned()
    }

    pub fn len(&self) -> usize {
        self.servants.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.servants.read().is_empty()
    }

    /// Register a servant that handles requests for unknown identities in
    /// `category`
    pub fn add_dflt_servant(&self, category: &str, servant: Arc<dyn Servant>) -> Result<()> {
        self.check_usable()?;
        let mut defaults = self.default_servants.write();
        if defaults.contains_key(category) {
            return Err(MiddlewareError::Logic(format!(
                "ObjectAdapter::add_dflt_servant(): cannot add category \"{}\": category already in use (adapter: {})",
                category, self.config.name
            )));
        }
        defaults.insert(category.to_string(), servant);
        Ok(())
    }

    pub fn remove_dflt_servant(&self, category: &str) -> Result<Arc<dyn Servant>> {
        self.default_servants.write().remove(category).ok_or_else(|| {
            MiddlewareError::Logic(format!(
                "ObjectAdapter::remove_dflt_servant(): cannot remove category \"{}\": category not present (adapter: {})",
                category, self.config.name
            ))
        })
    }

    pub fn find_dflt_servant(&self, category: &str) -> Option<Arc<dyn Servant>> {
        self.default_servants.read().get(category).cloned()
    }

    /// Bind the endpoint and start the broker and worker tasks. Calling this
    /// on an active adapter does nothing.
    pub async fn activate(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = self.state.lock();
            match *state {
                AdapterState::Active => return Ok(()),
                AdapterState::Inactive => *state = AdapterState::Activating,
                other => return Err(self.state_error(other)),
            }
        }

        let listener = match self.config.endpoint.bind().await {
            Ok(listener) => listener,
            Err(e) => {
                *self.state.lock() = AdapterState::Failed;
                error!(
                    "Adapter {}: cannot bind {}: {}",
                    self.config.name, self.config.endpoint, e
                );
                return Err(e);
            }
        };

        let pool_size = self.config.pool_size.max(1);
        let (job_tx, job_rx) = mpsc::channel::<Job>(pool_size * 64);
        let job_rx = Arc::new(tokio::sync::Mutex::new(job_rx));

        let mut handles = Vec::with_capacity(pool_size + 1);
        for worker_id in 0..pool_size {
            handles.push(tokio::spawn(worker_loop(
                worker_id,
                Arc::downgrade(self),
                Arc::clone(&job_rx),
            )));
        }
        handles.push(tokio::spawn(broker_loop(
            listener,
            job_tx,
            self.shutdown_tx.subscribe(),
            self.config.clone(),
            Arc::clone(&self.stats),
        )));
        self.tasks.lock().await.extend(handles);

        let mut state = self.state.lock();
        if *state != AdapterState::Activating {
            // shut down while binding
            let _ = self.shutdown_tx.send_replace(true);
            return Err(self.state_error(*state));
        }
        *state = AdapterState::Active;
        info!(
            "Adapter {} listening on {} ({}, {} worker(s))",
            self.config.name, self.config.endpoint, self.config.mode, pool_size
        );
        Ok(())
    }

    /// Stop accepting requests. Requests already queued are still
    /// dispatched; use [`wait_for_shutdown`](Self::wait_for_shutdown) to wait
    /// for them.
    pub fn shutdown(&self) {
        {
            let mut state = self.state.lock();
            match *state {
                AdapterState::Inactive => *state = AdapterState::Destroyed,
                AdapterState::Activating | AdapterState::Active => {
                    *state = AdapterState::Deactivating
                }
                _ => return,
            }
        }
        debug!("Adapter {}: shutting down", self.config.name);
        let _ = self.shutdown_tx.send_replace(true);
    }

    /// Wait for the broker and all workers to finish, then drop every
    /// servant. Must not be called from a servant of this adapter.
    pub async fn wait_for_shutdown(&self) {
        let handles = std::mem::take(&mut *self.tasks.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Adapter {}: task failed: {}", self.config.name, e);
            }
        }

        let servants = std::mem::take(&mut *self.servants.write());
        let defaults = std::mem::take(&mut *self.default_servants.write());
        drop(servants);
        drop(defaults);

        let mut state = self.state.lock();
        if *state != AdapterState::Failed {
            *state = AdapterState::Destroyed;
        }
        debug!("Adapter {}: destroyed", self.config.name);
    }

    /// Dispatch one request to its servant. Always produces a response; the
    /// caller discards it for oneway requests.
    pub async fn dispatch(&self, request: Request) -> Response {
        let oneway = request.mode == RequestMode::Oneway;
        let result = self.dispatch_inner(request).await;
        match result {
            Ok(payload) => {
                self.stats.requests_dispatched.fetch_add(1, Ordering::Relaxed);
                Response::success(payload)
            }
            Err(e) => {
                self.stats.requests_failed.fetch_add(1, Ordering::Relaxed);
                if oneway {
                    warn!("Adapter {}: oneway request failed: {}", self.config.name, e);
                }
                error_response(e)
            }
        }
    }

    async fn dispatch_inner(&self, request: Request) -> Result<Bytes> {
        if request.identity.is_empty() || request.op_name.is_empty() {
            return Err(MiddlewareError::Unknown(format!(
                "invalid request: empty identity or operation name (adapter: {})",
                self.config.name
            )));
        }
        if request.mode != self.config.mode {
            return Err(MiddlewareError::InvalidRequestMode {
                expected: self.config.mode.to_string(),
                got: request.mode.to_string(),
            });
        }

        let current = Current {
            identity: request.identity,
            category: request.category,
            op_name: request.op_name,
            mode: request.mode,
            adapter_name: self.config.name.clone(),
            endpoint: self.config.endpoint.to_string(),
        };

        let servant = self
            .find(&current.identity)
            .or_else(|| self.find_dflt_servant(&current.category))
            .ok_or_else(|| MiddlewareError::ObjectNotExist {
                proxy: current.proxy_string(),
                adapter: self.config.name.clone(),
            })?;

        if current.op_name == PING_OP {
            return Ok(Bytes::new());
        }

        let op_name = current.op_name.clone();
        let payload = request.payload;
        let outcome = match std::panic::catch_unwind(AssertUnwindSafe(|| {
            servant.dispatch(current, payload)
        })) {
            Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
            Err(panic) => Err(panic),
        };

        match outcome {
            Ok(result) => result,
            Err(panic) => {
                let msg = panic_message(&*panic);
                error!(
                    "Adapter {}: operation \"{}\" panicked: {}",
                    self.config.name, op_name, msg
                );
                Err(MiddlewareError::Unknown(msg))
            }
        }
    }
}

impl Drop for ObjectAdapter {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send_replace(true);
    }
}

impl fmt::Debug for ObjectAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectAdapter")
            .field("name", &self.config.name)
            .field("endpoint", &self.config.endpoint.to_string())
            .field("mode", &self.config.mode)
            .field("state", &self.state())
            .finish()
    }
}

fn error_response(e: MiddlewareError) -> Response {
    match e {
        MiddlewareError::UserException { kind, message } => {
            Response::user_exception(&kind, &message)
        }
        MiddlewareError::ObjectNotExist { proxy, adapter } => {
            Response::runtime_exception(RuntimeException::ObjectNotExist { proxy, adapter })
        }
        MiddlewareError::OperationNotExist { proxy, adapter, op } => {
            Response::runtime_exception(RuntimeException::OperationNotExist { proxy, adapter, op })
        }
        MiddlewareError::Unknown(message) => {
            Response::runtime_exception(RuntimeException::Unknown(message))
        }
        other => Response::runtime_exception(RuntimeException::Unknown(other.to_string())),
    }
}

async fn worker_loop(
    worker_id: usize,
    adapter: Weak<ObjectAdapter>,
    jobs: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
) {
    loop {
        let job = {
            let mut rx = jobs.lock().await;
            rx.recv().await
        };
        let Some(job) = job else { break };
        let Some(adapter) = adapter.upgrade() else { break };

        let response = adapter.dispatch(job.request).await;
        if let Some(reply) = job.reply {
            let _ = reply.send(response);
        }
    }
    trace!("Worker {} stopped", worker_id);
}

async fn broker_loop(
    listener: Listener,
    job_tx: mpsc::Sender<Job>,
    mut shutdown_rx: watch::Receiver<bool>,
    config: ObjectAdapterConfig,
    stats: Arc<AdapterStats>,
) {
    let semaphore = Arc::new(Semaphore::new(config.max_connections));
    let mut connections = JoinSet::new();

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }

            accepted = listener.accept() => {
                let (conn, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Adapter {}: accept failed: {}", config.name, e);
                        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        stats.connections_rejected.fetch_add(1, Ordering::Relaxed);
                        warn!("Adapter {}: connection limit reached, rejecting {}", config.name, peer);
                        continue;
                    }
                };

                stats.connections_accepted.fetch_add(1, Ordering::Relaxed);
                stats.connections_active.fetch_add(1, Ordering::Relaxed);
                trace!("Adapter {}: accepted connection from {}", config.name, peer);

                let job_tx = job_tx.clone();
                let shutdown_rx = shutdown_rx.clone();
                let stats = Arc::clone(&stats);
                let name = config.name.clone();
                let max_frame_size = config.max_frame_size;

                connections.spawn(async move {
                    let _permit = permit;
                    let result =
                        handle_connection(conn, job_tx, shutdown_rx, max_frame_size, &stats).await;
                    stats.connections_active.fetch_sub(1, Ordering::Relaxed);

                    match result {
                        Ok(()) | Err(MiddlewareError::ConnectionClosed) => {
                            trace!("Adapter {}: connection from {} closed", name, peer)
                        }
                        Err(e) => warn!("Adapter {}: connection error from {}: {}", name, peer, e),
                    }
                });
            }

            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    drop(listener);
    while connections.join_next().await.is_some() {}
    debug!("Adapter {}: broker stopped", config.name);
}

async fn handle_connection(
    conn: Connection,
    job_tx: mpsc::Sender<Job>,
    mut shutdown_rx: watch::Receiver<bool>,
    max_frame_size: usize,
    stats: &AdapterStats,
) -> Result<()> {
    let (reader, writer) = split(conn);
    let mut read_transport = FrameTransport::new(reader).with_max_frame_size(max_frame_size);
    let mut write_transport = FrameTransport::new(writer).with_max_frame_size(max_frame_size);

    loop {
        if *shutdown_rx.borrow() {
            return Ok(());
        }

        let frame = tokio::select! {
            biased;

            _ = shutdown_rx.changed() => return Ok(()),
            frame = read_transport.read_frame() => frame?,
        };
        stats.requests_received.fetch_add(1, Ordering::Relaxed);

        let request = Request::decode(&frame)?;
        match request.mode {
            RequestMode::Oneway => {
                if job_tx.send(Job { request, reply: None }).await.is_err() {
                    return Ok(());
                }
            }
            RequestMode::Twoway => {
                let (reply_tx, reply_rx) = oneshot::channel();
                let job = Job {
                    request,
                    reply: Some(reply_tx),
                };
                if job_tx.send(job).await.is_err() {
                    return Ok(());
                }
                let response = reply_rx.await.unwrap_or_else(|_| {
                    Response::runtime_exception(RuntimeException::Unknown(
                        "adapter shut down before dispatching the request".to_string(),
                    ))
                });
                write_transport.write_frame(&response.encode()).await?;
            }
        }
    }
}

/// Weak link from a servant to the adapter it is registered with, so the
/// servant can remove itself
#[derive(Clone)]
pub struct AdapterBinding {
    adapter: Weak<ObjectAdapter>,
    identity: String,
}

impl AdapterBinding {
    pub fn new(adapter: &Arc<ObjectAdapter>, identity: impl Into<String>) -> Self {
        Self {
            adapter: Arc::downgrade(adapter),
            identity: identity.into(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Remove the servant from its adapter. Returns false if the adapter is
    /// gone or the servant was already removed.
    pub fn disconnect(&self) -> bool {
        match self.adapter.upgrade() {
            Some(adapter) => adapter.remove(&self.identity).is_ok(),
            None => false,
        }
    }
}

impl fmt::Debug for AdapterBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterBinding")
            .field("identity", &self.identity)
            .finish()
    }
}
