//! Outbound invocation
//!
//! Oneway requests are queued to a single invocation task that owns its own
//! [`ConnectionPool`]; the caller never waits for the network. Because there
//! is exactly one such task, requests queued by one caller reach each
//! endpoint in the order they were queued.
//!
//! Twoway requests run on the caller's task: a connection is taken from a
//! shared pool (or opened), the request is written and the caller awaits the
//! response frame under the proxy's timeout.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::connection_pool::{ConnectionPool, PooledConnection};
use crate::error::{MiddlewareError, Result};
use crate::frame::{Request, Response};
use crate::reaper::Reaper;
use crate::transport::{Endpoint, DEFAULT_MAX_FRAME_SIZE};

/// Default twoway timeout
pub const DEFAULT_TWOWAY_TIMEOUT: Duration = Duration::from_millis(1000);

/// Invoker configuration
#[derive(Debug, Clone)]
pub struct InvokerConfig {
    pub twoway_timeout: Duration,
    pub max_frame_size: usize,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            twoway_timeout: DEFAULT_TWOWAY_TIMEOUT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// Invocation statistics
#[derive(Debug, Default)]
pub struct InvokerStats {
    pub oneway_sent: AtomicU64,
    pub oneway_failed: AtomicU64,
    pub twoway_sent: AtomicU64,
    pub twoway_failed: AtomicU64,
    pub twoway_timeouts: AtomicU64,
}

impl InvokerStats {
    pub fn snapshot(&self) -> InvokerStatsSnapshot {
        InvokerStatsSnapshot {
            oneway_sent: self.oneway_sent.load(Ordering::Relaxed),
            oneway_failed: self.oneway_failed.load(Ordering::Relaxed),
            twoway_sent: self.twoway_sent.load(Ordering::Relaxed),
            twoway_failed: self.twoway_failed.load(Ordering::Relaxed),
            twoway_timeouts: self.twoway_timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of invocation statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokerStatsSnapshot {
    pub oneway_sent: u64,
    pub oneway_failed: u64,
    pub twoway_sent: u64,
    pub twoway_failed: u64,
    pub twoway_timeouts: u64,
}

enum OnewayMessage {
    Call { endpoint: Endpoint, frame: Bytes },
    Flush(oneshot::Sender<()>),
}

struct InvokerInner {
    config: InvokerConfig,
    oneway_tx: Mutex<Option<mpsc::UnboundedSender<OnewayMessage>>>,
    oneway_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    twoway_pool: Mutex<ConnectionPool>,
    stats: Arc<InvokerStats>,
}

/// Handle to a middleware's invocation machinery; cheap to clone
#[derive(Clone)]
pub struct Invoker {
    inner: Arc<InvokerInner>,
}

impl Invoker {
    /// Start the oneway invocation task. Must be called within a tokio
    /// runtime. Pooled connections are reaped by `reaper` when given.
    pub fn new(config: InvokerConfig, reaper: Option<Arc<Reaper>>) -> Result<Self> {
        let handle = tokio::runtime::Handle::try_current().map_err(|e| {
            MiddlewareError::Logic(format!("invoker requires a tokio runtime: {}", e))
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(InvokerStats::default());
        let oneway_pool = ConnectionPool::new(reaper.clone()).with_max_frame_size(config.max_frame_size);
        let task = handle.spawn(oneway_loop(rx, oneway_pool, Arc::clone(&stats)));

        Ok(Self {
            inner: Arc::new(InvokerInner {
                twoway_pool: Mutex::new(
                    ConnectionPool::new(reaper).with_max_frame_size(config.max_frame_size),
                ),
                config,
                oneway_tx: Mutex::new(Some(tx)),
                oneway_task: tokio::sync::Mutex::new(Some(task)),
                stats,
            }),
        })
    }

    pub fn config(&self) -> &InvokerConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> &Arc<InvokerStats> {
        &self.inner.stats
    }

    /// Queue a oneway request. Returns as soon as the request is queued;
    /// delivery failures are only logged.
    pub fn invoke_oneway(&self, endpoint: &Endpoint, request: &Request) -> Result<()> {
        let guard = self.inner.oneway_tx.lock();
        let tx = guard.as_ref().ok_or(MiddlewareError::ConnectionClosed)?;
        tx.send(OnewayMessage::Call {
            endpoint: endpoint.clone(),
            frame: request.encode(),
        })
        .map_err(|_| MiddlewareError::ConnectionClosed)
    }

    /// Send a twoway request and await the response payload
    pub async fn invoke_twoway(
        &self,
        endpoint: &Endpoint,
        request: &Request,
        timeout: Option<Duration>,
    ) -> Result<Bytes> {
        let timeout = timeout.unwrap_or(self.inner.config.twoway_timeout);
        let frame = request.encode();
        let stats = &self.inner.stats;

        let pooled = self.inner.twoway_pool.lock().take(endpoint);
        let reused = pooled.is_some();

        // a request that reached the peer is never sent again
        let result = tokio::time::timeout(timeout, async {
            let first = self.exchange(endpoint, pooled, &frame).await;
            let outcome = match first {
                Err(e) if reused && !e.written && e.error.is_transport() => {
                    debug!(
                        "Pooled connection to {} is dead ({}), reconnecting",
                        endpoint, e.error
                    );
                    self.exchange(endpoint, None, &frame).await
                }
                other => other,
            };
            outcome.map_err(|e| e.error)
        })
        .await;

        match result {
            Err(_) => {
                stats.twoway_timeouts.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Twoway request \"{}\" to {} timed out",
                    request.op_name, endpoint
                );
                Err(MiddlewareError::Timeout(timeout.as_millis() as u64))
            }
            Ok(Err(e)) => {
                stats.twoway_failed.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
            Ok(Ok((conn, response))) => {
                stats.twoway_sent.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = self.inner.twoway_pool.lock().put(conn) {
                    trace!("Could not return connection to pool: {}", e);
                }
                Response::decode(&response)?.into_result()
            }
        }
    }

    async fn exchange(
        &self,
        endpoint: &Endpoint,
        conn: Option<PooledConnection>,
        frame: &[u8],
    ) -> std::result::Result<(PooledConnection, Bytes), ExchangeError> {
        let mut conn = match conn {
            Some(conn) => conn,
            None => PooledConnection::connect(endpoint, self.inner.config.max_frame_size)
                .await
                .map_err(ExchangeError::unsent)?,
        };
        conn.send(frame).await.map_err(ExchangeError::unsent)?;
        let response = conn.receive().await.map_err(|error| ExchangeError {
            error,
            written: true,
        })?;
        Ok((conn, response))
    }

    /// Wait until every oneway request queued before this call has been
    /// handed to the transport
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        let queued = {
            let guard = self.inner.oneway_tx.lock();
            guard
                .as_ref()
                .map(|tx| tx.send(OnewayMessage::Flush(done_tx)).is_ok())
                .unwrap_or(false)
        };
        if queued {
            let _ = done_rx.await;
        }
    }

    /// Stop accepting oneway requests, deliver the ones already queued and
    /// stop the invocation task
    pub async fn shutdown(&self) {
        self.inner.oneway_tx.lock().take();
        let task = self.inner.oneway_task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Oneway invocation task failed: {}", e);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.oneway_tx.lock().is_some()
    }
}

/// Failed twoway exchange; `written` once the request frame went out
struct ExchangeError {
    error: MiddlewareError,
    written: bool,
}

impl ExchangeError {
    fn unsent(error: MiddlewareError) -> Self {
        Self {
            error,
            written: false,
        }
    }
}

async fn oneway_loop(
    mut rx: mpsc::UnboundedReceiver<OnewayMessage>,
    mut pool: ConnectionPool,
    stats: Arc<InvokerStats>,
) {
    while let Some(msg) = rx.recv().await {
        match msg {
            OnewayMessage::Call { endpoint, frame } => {
                let sent = async {
                    let conn = pool.find(&endpoint).await?;
                    conn.send(&frame).await
                }
                .await;
                match sent {
                    Ok(()) => {
                        stats.oneway_sent.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        stats.oneway_failed.fetch_add(1, Ordering::Relaxed);
                        pool.remove(&endpoint);
                        warn!("Oneway request to {} failed: {}", endpoint, e);
                    }
                }
            }
            OnewayMessage::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Oneway invocation task stopped");
}
