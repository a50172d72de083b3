//! Server-side query object
//!
//! One query object exists per query. It is created by the scope servant,
//! kept alive by its own self reference until `run` arrives, and from then
//! on by the reply channel that refers to it.
//!
//! ```text
//!  set_self ──► adapter "-q" ──run──► ReplyImpl ──► user run()
//!      │                                 │
//!      └── self reference dropped ◄──────┘
//! ```

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use scopes_rpc::{
    panic_message, AdapterBinding, Current, DispatchFuture, Invoker, MiddlewareError, ObjectProxy,
    Servant, UNKNOWN_EXCEPTION,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use super::base::QueryHandle;
use super::op;
use crate::error::{BoxError, Result, ScopesError};
use crate::proxies::{QueryCtrlProxy, ReplyProxy};
use crate::reply::{PreviewReply, QueryStatus, ReplyImpl, ReplySink, SearchReply};
use crate::types::{from_payload, get_str, ActivationResponse, CompletionDetails, VariantMap};

pub struct QueryObject {
    query: QueryHandle,
    cardinality: usize,
    pushable: AtomicBool,
    cancelled: AtomicBool,
    token: CancellationToken,
    self_ref: Mutex<Option<Arc<QueryObject>>>,
    reply: Mutex<Weak<ReplyImpl>>,
    ctrl: Option<QueryCtrlProxy>,
    binding: Mutex<Option<AdapterBinding>>,
    invoker: Invoker,
    finish_timeout: Duration,
}

impl QueryObject {
    /// `ctrl` is told to go away when this object is dropped
    pub fn new(
        query: QueryHandle,
        cardinality: usize,
        ctrl: Option<QueryCtrlProxy>,
        invoker: Invoker,
        finish_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            query,
            cardinality,
            pushable: AtomicBool::new(true),
            cancelled: AtomicBool::new(false),
            token: CancellationToken::new(),
            self_ref: Mutex::new(None),
            reply: Mutex::new(Weak::new()),
            ctrl,
            binding: Mutex::new(None),
            invoker,
            finish_timeout,
        })
    }

    pub fn kind(&self) -> &'static str {
        self.query.kind()
    }

    pub fn set_binding(&self, binding: AdapterBinding) {
        *self.binding.lock() = Some(binding);
    }

    /// Keep this object alive until `run` is dispatched.
    ///
    /// # Panics
    ///
    /// Panics if called more than once.
    pub fn set_self(self: &Arc<Self>) {
        let mut slot = self.self_ref.lock();
        assert!(slot.is_none(), "QueryObject::set_self() called twice");
        *slot = Some(Arc::clone(self));
    }

    /// Undo `set_self` and leave the adapter; used when `run` cannot be sent
    pub(crate) fn abandon(&self) {
        let keep_alive = self.self_ref.lock().take();
        let binding = self.binding.lock().take();
        if let Some(binding) = binding {
            binding.disconnect();
        }
        drop(keep_alive);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Hand the query to user code. Results go to `reply`; user code runs
    /// on a blocking thread and this returns immediately.
    pub fn run(self: &Arc<Self>, reply: ReplyProxy) {
        self.run_with_sink(Arc::new(reply));
    }

    pub(crate) fn run_with_sink(self: &Arc<Self>, sink: Arc<dyn ReplySink>) {
        let keep_alive = self.self_ref.lock().take();
        if keep_alive.is_none() {
            warn!("QueryObject: run() without self reference");
        }
        let binding = self.binding.lock().take();
        if let Some(binding) = binding {
            binding.disconnect();
        }

        if !self.pushable() {
            debug!("QueryObject: {} query cancelled before run", self.kind());
            return;
        }

        let reply = Arc::new(ReplyImpl::new(
            sink,
            Arc::clone(self) as Arc<dyn QueryStatus>,
            self.finish_timeout,
        ));
        *self.reply.lock() = Arc::downgrade(&reply);

        let this = Arc::clone(self);
        let token = self.token.clone();
        tokio::task::spawn_blocking(move || this.run_user(reply, token));
        drop(keep_alive);
    }

    fn run_user(&self, reply: Arc<ReplyImpl>, token: CancellationToken) {
        trace!("QueryObject: running {} query", self.kind());
        let outcome = catch_unwind(AssertUnwindSafe(|| -> std::result::Result<(), BoxError> {
            match &self.query {
                QueryHandle::Search(q) => q.run(SearchReply::new(Arc::clone(&reply)), token),
                QueryHandle::Preview(q) => q.run(PreviewReply::new(Arc::clone(&reply)), token),
                QueryHandle::Activation(q) => {
                    let response = q.activate()?;
                    reply.push(activation_payload(&response));
                    Ok(())
                }
            }
        }));

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let mut message = e.to_string();
                if message.is_empty() {
                    message = UNKNOWN_EXCEPTION.to_string();
                }
                warn!("QueryObject: {} query failed: {}", self.kind(), message);
                reply.error(&message);
            }
            Err(panic) => {
                let message = panic_message(&*panic);
                error!("QueryObject: {} query panicked: {}", self.kind(), message);
                reply.error(&message);
            }
        }
    }

    /// Cancel the query. Only the first call has an effect.
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.pushable.store(false, Ordering::SeqCst);
        self.token.cancel();

        let reply = self.reply.lock().upgrade();
        if let Some(reply) = reply {
            reply.finished_with(CompletionDetails::cancelled());
        }

        debug!("QueryObject: {} query cancelled", self.kind());
        if catch_unwind(AssertUnwindSafe(|| self.query.cancelled())).is_err() {
            error!("QueryObject: cancelled() hook panicked");
        }
    }

    fn reply_proxy(&self, payload: &[u8]) -> Result<ReplyProxy> {
        let params: VariantMap = from_payload(payload)?;
        let proxy = ObjectProxy::from_string(&self.invoker, get_str(&params, "reply_proxy")?)?
            .ok_or_else(|| ScopesError::Logic("QueryObject::run(): reply proxy is null".to_string()))?;
        Ok(ReplyProxy::new(proxy))
    }

    async fn serve(self: Arc<Self>, current: Current, payload: Bytes) -> scopes_rpc::Result<Bytes> {
        match current.op_name.as_str() {
            op::RUN => {
                let reply = self.reply_proxy(&payload).map_err(MiddlewareError::from)?;
                self.run(reply);
                Ok(Bytes::new())
            }
            _ => Err(current.operation_not_exist()),
        }
    }
}

impl QueryStatus for QueryObject {
    fn pushable(&self) -> bool {
        self.pushable.load(Ordering::SeqCst)
    }

    fn cardinality(&self) -> usize {
        self.cardinality
    }
}

impl Servant for QueryObject {
    fn dispatch(self: Arc<Self>, current: Current, payload: Bytes) -> DispatchFuture {
        Box::pin(self.serve(current, payload))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for QueryObject {
    fn drop(&mut self) {
        if let Some(ctrl) = &self.ctrl {
            trace!("QueryObject: destroying control object {}", ctrl);
            if let Err(e) = ctrl.destroy() {
                debug!("QueryObject: could not destroy {}: {}", ctrl, e);
            }
        }
    }
}

fn activation_payload(response: &ActivationResponse) -> VariantMap {
    let mut payload = VariantMap::new();
    payload.insert("act_response".into(), json!(response.serialize()));
    payload
}
