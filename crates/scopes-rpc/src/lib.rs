//! Message-oriented RPC middleware for scopes
//!
//! This crate provides the object-adapter/proxy layer the scopes runtime is
//! built on: stringified proxies, a framed request/response envelope over
//! UNIX-domain (or TCP) sockets, pooled outbound connections with idle
//! reaping, and object adapters that dispatch requests to servants on a
//! pool of worker tasks.
//!
//! ```text
//!  client process                                server process
//! ┌─────────────────────────┐                  ┌──────────────────────────┐
//! │ ObjectProxy             │   Request frame  │ ObjectAdapter            │
//! │   └─ Invoker ───────────┼─────────────────►│   broker ─► job queue    │
//! │        ├─ oneway task   │                  │              │           │
//! │        │   (own pool)   │  Response frame  │   workers ◄──┘           │
//! │        └─ twoway pool ◄─┼──────────────────┤     └─► Servant          │
//! │  Reaper (idle eviction) │   (twoway only)  │                          │
//! └─────────────────────────┘                  └──────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use bytes::Bytes;
//! use scopes_rpc::{
//!     Endpoint, Invoker, InvokerConfig, ObjectAdapter, ObjectAdapterConfig, RequestMode,
//!     ServantBuilder,
//! };
//!
//! #[tokio::main]
//! async fn main() -> scopes_rpc::Result<()> {
//!     let invoker = Invoker::new(InvokerConfig::default(), None)?;
//!     let endpoint = Endpoint::parse("ipc:///tmp/echo")?;
//!     let adapter = ObjectAdapter::new(
//!         ObjectAdapterConfig::new("echo", endpoint, RequestMode::Twoway),
//!         invoker,
//!     );
//!
//!     let servant = ServantBuilder::new()
//!         .operation("echo", |_current, args: Bytes| async move { Ok(args) })
//!         .build();
//!     let proxy = adapter.add("echo", servant)?;
//!     adapter.activate().await?;
//!
//!     let reply = proxy.invoke_twoway("echo", Bytes::from("hello")).await?;
//!     assert_eq!(reply.as_ref(), b"hello");
//!
//!     adapter.shutdown();
//!     adapter.wait_for_shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod connection_pool;
pub mod error;
pub mod frame;
pub mod invoker;
pub mod object_adapter;
pub mod proxy;
pub mod proxy_string;
pub mod reaper;
pub mod servant;
pub mod transport;

pub use error::{panic_message, MiddlewareError, Result, UNKNOWN_EXCEPTION};

pub use connection_pool::{ConnectionPool, PooledConnection};
pub use frame::{FrameHeader, FrameType, ReplyStatus, Request, Response, RuntimeException};
pub use invoker::{
    Invoker, InvokerConfig, InvokerStats, InvokerStatsSnapshot, DEFAULT_TWOWAY_TIMEOUT,
};
pub use object_adapter::{
    AdapterBinding, AdapterState, AdapterStats, AdapterStatsSnapshot, ObjectAdapter,
    ObjectAdapterConfig,
};
pub use proxy::{ObjectProxy, PING_OP};
pub use proxy_string::{ProxyString, RequestMode, DEFAULT_CATEGORY, DEFAULT_TIMEOUT, NULL_PROXY};
pub use reaper::{DestroyPolicy, ReapCallback, ReapItem, Reaper};
pub use servant::{
    Current, DispatchFuture, DispatchResult, FnServant, OperationHandler, Servant, ServantBuilder,
};
pub use transport::{Connection, Endpoint, FrameTransport, Listener, DEFAULT_MAX_FRAME_SIZE};
