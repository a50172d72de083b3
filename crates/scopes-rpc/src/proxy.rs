//! Object proxies
//!
//! An [`ObjectProxy`] names one remote object (endpoint + identity) and
//! carries the request mode of the adapter that hosts it. Typed proxies in
//! higher layers wrap it and marshal their parameters into the opaque
//! payload.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use tracing::trace;

use crate::error::{MiddlewareError, Result};
use crate::frame::Request;
use crate::invoker::Invoker;
use crate::proxy_string::{ProxyString, RequestMode, DEFAULT_TIMEOUT};
use crate::transport::Endpoint;

/// Operation every servant answers
pub const PING_OP: &str = "ping";

/// Client-side handle to a remote object; cheap to clone
#[derive(Clone)]
pub struct ObjectProxy {
    invoker: Invoker,
    endpoint: Endpoint,
    target: ProxyString,
}

impl ObjectProxy {
    pub fn new(invoker: Invoker, target: ProxyString) -> Result<Self> {
        let endpoint = Endpoint::parse(&target.endpoint)?;
        Ok(Self {
            invoker,
            endpoint,
            target,
        })
    }

    /// Parse a stringified proxy; `nullproxy:` yields `None`
    pub fn from_string(invoker: &Invoker, s: &str) -> Result<Option<Self>> {
        ProxyString::parse(s)?
            .map(|target| ObjectProxy::new(invoker.clone(), target))
            .transpose()
    }

    pub fn identity(&self) -> &str {
        &self.target.identity
    }

    pub fn category(&self) -> &str {
        &self.target.category
    }

    pub fn mode(&self) -> RequestMode {
        self.target.mode
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn proxy_string(&self) -> &ProxyString {
        &self.target
    }

    pub fn invoker(&self) -> &Invoker {
        &self.invoker
    }

    /// Twoway timeout of this proxy, `None` for the middleware default
    pub fn timeout(&self) -> Option<Duration> {
        if self.target.timeout == DEFAULT_TIMEOUT {
            None
        } else {
            Some(Duration::from_millis(self.target.timeout as u64))
        }
    }

    /// Same proxy with a different twoway timeout in milliseconds
    pub fn with_timeout(mut self, timeout_ms: i64) -> Self {
        self.target.timeout = timeout_ms;
        self
    }

    fn request(&self, mode: RequestMode, op_name: &str, payload: Bytes) -> Request {
        Request::new(
            mode,
            op_name,
            self.target.identity.clone(),
            self.target.category.clone(),
            payload,
        )
    }

    fn check_mode(&self, wanted: RequestMode, op_name: &str) -> Result<()> {
        if self.target.mode != wanted {
            return Err(MiddlewareError::Logic(format!(
                "cannot invoke {} operation \"{}\" on {} proxy {}",
                wanted, op_name, self.target.mode, self.target
            )));
        }
        Ok(())
    }

    /// Fire-and-forget invocation
    pub fn invoke_oneway(&self, op_name: &str, payload: Bytes) -> Result<()> {
        self.check_mode(RequestMode::Oneway, op_name)?;
        trace!("oneway {} -> {}", op_name, self.target);
        self.invoker
            .invoke_oneway(&self.endpoint, &self.request(RequestMode::Oneway, op_name, payload))
    }

    /// Request/response invocation; returns the result payload or the error
    /// the remote side raised
    pub async fn invoke_twoway(&self, op_name: &str, payload: Bytes) -> Result<Bytes> {
        self.check_mode(RequestMode::Twoway, op_name)?;
        trace!("twoway {} -> {}", op_name, self.target);
        self.invoker
            .invoke_twoway(
                &self.endpoint,
                &self.request(RequestMode::Twoway, op_name, payload),
                self.timeout(),
            )
            .await
    }

    /// Check that the target exists. For oneway proxies this only checks
    /// that the request could be queued.
    pub async fn ping(&self) -> Result<()> {
        match self.target.mode {
            RequestMode::Oneway => self.invoke_oneway(PING_OP, Bytes::new()),
            RequestMode::Twoway => self.invoke_twoway(PING_OP, Bytes::new()).await.map(|_| ()),
        }
    }
}

impl fmt::Display for ObjectProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.target.fmt(f)
    }
}

impl fmt::Debug for ObjectProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectProxy")
            .field("target", &self.target.to_string())
            .finish()
    }
}

impl PartialEq for ObjectProxy {
    fn eq(&self, other: &Self) -> bool {
        self.target == other.target
    }
}
