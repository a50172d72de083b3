//! Outbound connection pool
//!
//! A pool caches one connection per endpoint. It is not thread-safe: each
//! invocation task owns its own pool and passes `&mut` around. Connections
//! that stay unused for longer than the reaper's expiry interval are marked
//! stale by the reaper and replaced by a fresh connection on the next
//! [`ConnectionPool::find`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::error::{MiddlewareError, Result};
use crate::reaper::{ReapItem, Reaper};
use crate::transport::{Connection, Endpoint, FrameTransport, DEFAULT_MAX_FRAME_SIZE};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A connected, framed stream to one endpoint
pub struct PooledConnection {
    id: u64,
    endpoint: Endpoint,
    transport: FrameTransport<Connection>,
}

impl PooledConnection {
    /// Connect to `endpoint`. This may block for as long as the connect takes.
    pub async fn connect(endpoint: &Endpoint, max_frame_size: usize) -> Result<Self> {
        let stream = endpoint.connect().await?;
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        debug!("Opened connection {} to {}", id, endpoint);
        Ok(Self::from_stream(id, endpoint.clone(), stream, max_frame_size))
    }

    fn from_stream(id: u64, endpoint: Endpoint, stream: Connection, max_frame_size: usize) -> Self {
        Self {
            id,
            endpoint,
            transport: FrameTransport::new(stream).with_max_frame_size(max_frame_size),
        }
    }

    /// Process-unique id, new for every connect
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub async fn send(&mut self, frame: &[u8]) -> Result<()> {
        self.transport.write_frame(frame).await
    }

    pub async fn receive(&mut self) -> Result<Bytes> {
        self.transport.read_frame().await
    }
}

struct PoolEntry {
    conn: PooledConnection,
    stale: Arc<AtomicBool>,
    reap_item: Option<ReapItem>,
}

impl PoolEntry {
    fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }
}

/// Per-task cache of outbound connections keyed by endpoint
pub struct ConnectionPool {
    entries: HashMap<Endpoint, PoolEntry>,
    reaper: Option<Arc<Reaper>>,
    max_frame_size: usize,
}

impl ConnectionPool {
    /// Create a pool. Without a reaper, connections are never evicted for
    /// being idle.
    pub fn new(reaper: Option<Arc<Reaper>>) -> Self {
        Self {
            entries: HashMap::new(),
            reaper,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Return the pooled connection for `endpoint`, connecting first if
    /// there is none (or the pooled one was reaped).
    pub async fn find(&mut self, endpoint: &Endpoint) -> Result<&mut PooledConnection> {
        self.purge_stale();

        if !self.entries.contains_key(endpoint) {
            let conn = PooledConnection::connect(endpoint, self.max_frame_size).await?;
            self.register_socket(conn, true)?;
        }

        let entry = self
            .entries
            .get_mut(endpoint)
            .ok_or(MiddlewareError::ConnectionClosed)?;
        if let Some(item) = &entry.reap_item {
            item.refresh();
        }
        trace!("Using connection {} to {}", entry.conn.id, endpoint);
        Ok(&mut entry.conn)
    }

    /// Insert an externally created connection, replacing any existing one
    /// for the same endpoint. With `reap == false` the connection is exempt
    /// from idle eviction.
    pub fn register_socket(&mut self, conn: PooledConnection, reap: bool) -> Result<()> {
        let stale = Arc::new(AtomicBool::new(false));
        let reap_item = match (&self.reaper, reap) {
            (Some(reaper), true) => {
                let flag = Arc::clone(&stale);
                let id = conn.id;
                let endpoint = conn.endpoint.to_string();
                Some(reaper.add(move || {
                    debug!("Connection {} to {} idle, evicting", id, endpoint);
                    flag.store(true, Ordering::Release);
                })?)
            }
            _ => None,
        };

        self.entries.insert(
            conn.endpoint.clone(),
            PoolEntry {
                conn,
                stale,
                reap_item,
            },
        );
        Ok(())
    }

    /// Evict the connection for `endpoint`, e.g. after an error on it
    pub fn remove(&mut self, endpoint: &Endpoint) -> bool {
        self.entries.remove(endpoint).is_some()
    }

    /// Take the connection for `endpoint` out of the pool for exclusive use
    pub fn take(&mut self, endpoint: &Endpoint) -> Option<PooledConnection> {
        self.purge_stale();
        self.entries.remove(endpoint).map(|entry| entry.conn)
    }

    /// Return a connection obtained with [`take`](Self::take) or
    /// [`PooledConnection::connect`]. If the slot is occupied meanwhile, the
    /// returned connection is closed instead.
    pub fn put(&mut self, conn: PooledConnection) -> Result<()> {
        if self.entries.contains_key(&conn.endpoint) {
            trace!("Pool slot for {} occupied, closing connection {}", conn.endpoint, conn.id);
            return Ok(());
        }
        self.register_socket(conn, true)
    }

    pub fn contains(&self, endpoint: &Endpoint) -> bool {
        self.entries
            .get(endpoint)
            .map(|entry| !entry.is_stale())
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn purge_stale(&mut self) {
        self.entries.retain(|endpoint, entry| {
            let keep = !entry.is_stale();
            if !keep {
                debug!("Dropping reaped connection {} to {}", entry.conn.id, endpoint);
            }
            keep
        });
    }
}
