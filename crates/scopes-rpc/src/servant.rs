//! Servants
//!
//! A servant is the server-side implementation registered under an identity
//! in an [`ObjectAdapter`](crate::ObjectAdapter). The adapter decodes the
//! request envelope and hands the servant the operation name (inside
//! [`Current`]) and the raw parameter payload; the servant returns the raw
//! result payload.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::{MiddlewareError, Result};
use crate::proxy_string::{ProxyString, RequestMode};

/// Result of a dispatched operation
pub type DispatchResult = Result<Bytes>;

/// Future type for dispatch results
pub type DispatchFuture = Pin<Box<dyn Future<Output = DispatchResult> + Send>>;

/// Context of one dispatched request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Current {
    pub identity: String,
    pub category: String,
    pub op_name: String,
    pub mode: RequestMode,
    /// Name of the adapter the request arrived on
    pub adapter_name: String,
    /// Endpoint of that adapter
    pub endpoint: String,
}

impl Current {
    /// Proxy string of the target object
    pub fn proxy_string(&self) -> String {
        ProxyString::new(&self.endpoint, &self.identity)
            .with_category(&self.category)
            .with_mode(self.mode)
            .to_string()
    }

    /// Error for an operation this servant does not implement
    pub fn operation_not_exist(&self) -> MiddlewareError {
        MiddlewareError::OperationNotExist {
            proxy: self.proxy_string(),
            adapter: self.adapter_name.clone(),
            op: self.op_name.clone(),
        }
    }
}

/// Trait for servant implementations
pub trait Servant: Send + Sync + 'static {
    /// Invoke the operation named in `current`
    fn dispatch(self: Arc<Self>, current: Current, payload: Bytes) -> DispatchFuture;

    /// Cast to Any for downcasting
    fn as_any(&self) -> &dyn Any;
}

/// Operation handler function type
pub type OperationHandler = Arc<dyn Fn(Current, Bytes) -> DispatchFuture + Send + Sync>;

/// Servant assembled from per-operation closures
pub struct FnServant {
    operations: HashMap<String, OperationHandler>,
}

impl FnServant {
    pub fn operation_names(&self) -> Vec<&str> {
        self.operations.keys().map(String::as_str).collect()
    }
}

impl Servant for FnServant {
    fn dispatch(self: Arc<Self>, current: Current, payload: Bytes) -> DispatchFuture {
        match self.operations.get(&current.op_name) {
            Some(handler) => handler(current, payload),
            None => {
                let err = current.operation_not_exist();
                Box::pin(async move { Err(err) })
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Builder for creating servants with a fluent API
#[derive(Default)]
pub struct ServantBuilder {
    operations: HashMap<String, OperationHandler>,
}

impl ServantBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn operation<F, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(Current, Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DispatchResult> + Send + 'static,
    {
        self.operations.insert(
            name.to_string(),
            Arc::new(move |current, args| Box::pin(handler(current, args))),
        );
        self
    }

    pub fn build(self) -> Arc<FnServant> {
        Arc::new(FnServant {
            operations: self.operations,
        })
    }
}
