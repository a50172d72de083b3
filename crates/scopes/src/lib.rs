//! Scope runtime
//!
//! Client code sends a query to a named scope; the runtime locates the
//! scope through the registry, forwards the query and streams results back
//! to a listener until the query is cancelled or exhausted.
//!
//! ```text
//!  client                      scope process
//! ┌────────────────┐  search  ┌──────────────────────────────┐
//! │ ScopeProxy     │─────────►│ ScopeObject                  │
//! │                │◄─ctrl────│   ├─ QueryCtrlObject  (-c)   │
//! │ QueryCtrl ─────┼─cancel──►│   └─ QueryObject      (-q)   │
//! │                │          │        └─ user query run()   │
//! │ ReplyObject ◄──┼──push────┤           └─ SearchReply     │
//! │  (-r) listener │ finished │                              │
//! └────────────────┘          └──────────────────────────────┘
//! ```
//!
//! Every arrow is a request on the `scopes-rpc` middleware. At most one
//! terminal event reaches a listener, and only after pushes already in
//! flight have been delivered.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use scopes::{Runtime, RuntimeConfig};
//!
//! # async fn demo(scope: Arc<dyn scopes::ScopeBase>) -> scopes::Result<()> {
//! let runtime = Runtime::create("demo", RuntimeConfig::default())?;
//! runtime.run_scope("echo", scope).await?;
//! // ...
//! runtime.destroy().await;
//! # Ok(())
//! # }
//! ```

pub mod canned_query;
pub mod config;
pub mod error;
pub mod middleware;
pub mod proxies;
pub mod query;
pub mod registry;
pub mod reply;
pub mod runtime;
pub mod scope_object;
pub mod scope_proxy;
pub mod types;

pub use canned_query::{CannedQuery, FilterState};
pub use config::{MiddlewareConfig, RuntimeConfig, RuntimeConfigBuilder, RuntimeSettings};
pub use error::{BoxError, Result, ScopesError};
pub use middleware::{Middleware, MiddlewareState};
pub use proxies::{QueryCtrlProxy, QueryProxy, RegistryProxy, ReplyProxy};
pub use query::{
    ActionMetadata, ActivationQueryBase, PreviewQueryBase, QueryBase, ScopeBase, SearchMetadata,
    SearchQueryBase,
};
pub use registry::{
    scope_proxy_string, CachingRegistry, CachingRegistryConfig, MetadataMap, ProcessState, Registry,
    RegistryEvent, RegistryObject, RegistryServant, RemoteScope, RemoteScopeSource, ScopeMetadata,
    ScopeState, Subscription,
};
pub use reply::{
    ActivationListener, ListenerBase, PreviewListener, PreviewReply, QueryCtrl, Reply,
    SearchListener, SearchReply,
};
pub use runtime::Runtime;
pub use scope_proxy::ScopeProxy;
pub use types::{
    ActivationResponse, ActivationStatus, CategorisedResult, Category, CompletionDetails,
    CompletionStatus, InfoCode, OperationInfo, ScopeResult, Variant, VariantArray, VariantMap,
};

pub use tokio_util::sync::CancellationToken;
