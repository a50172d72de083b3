//! Scope servant
//!
//! Turns search, preview, activate and perform_action requests into a
//! running query. The twoway call returns the proxy of the new query
//! control object; results travel separately to the caller's reply object.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use scopes_rpc::{panic_message, Current, DispatchFuture, MiddlewareError, ObjectProxy, Servant};
use serde_json::json;
use tracing::{debug, warn};

use crate::canned_query::CannedQuery;
use crate::error::{BoxError, Result, ScopesError};
use crate::middleware::Middleware;
use crate::proxies::{QueryCtrlProxy, QueryProxy, ReplyProxy};
use crate::query::{
    ActionMetadata, QueryCtrlObject, QueryHandle, QueryObject, ScopeBase, SearchMetadata,
};
use crate::reply::ReplySink;
use crate::types::{from_payload, get, get_map, get_str, to_payload, CompletionDetails, ScopeResult, VariantMap};

/// Operation names of scope objects
pub mod op {
    pub const SEARCH: &str = "search";
    pub const PREVIEW: &str = "preview";
    pub const ACTIVATE: &str = "activate";
    pub const PERFORM_ACTION: &str = "perform_action";

    pub(crate) const ALL: [&str; 4] = [SEARCH, PREVIEW, ACTIVATE, PERFORM_ACTION];
}

pub struct ScopeObject {
    scope_id: String,
    scope: Arc<dyn ScopeBase>,
    middleware: Weak<Middleware>,
}

impl ScopeObject {
    pub fn new(scope_id: &str, scope: Arc<dyn ScopeBase>, middleware: &Arc<Middleware>) -> Arc<Self> {
        Arc::new(Self {
            scope_id: scope_id.to_string(),
            scope,
            middleware: Arc::downgrade(middleware),
        })
    }

    pub fn scope_id(&self) -> &str {
        &self.scope_id
    }

    fn middleware(&self) -> Result<Arc<Middleware>> {
        self.middleware
            .upgrade()
            .ok_or_else(|| ScopesError::Logic(format!("scope {}: middleware is gone", self.scope_id)))
    }

    fn reply_proxy(&self, middleware: &Middleware, params: &VariantMap) -> Result<ReplyProxy> {
        let proxy = ObjectProxy::from_string(middleware.invoker(), get_str(params, "reply_proxy")?)?
            .ok_or_else(|| {
                ScopesError::Logic(format!(
                    "ScopeObject: scope {}: reply proxy cannot be null",
                    self.scope_id
                ))
            })?;
        Ok(ReplyProxy::new(proxy))
    }

    /// Build the query object, link it to a new control object and send
    /// it `run`. Returns the control proxy.
    async fn create_query(
        &self,
        middleware: &Arc<Middleware>,
        op_name: &str,
        params: VariantMap,
        reply: &ReplyProxy,
    ) -> Result<QueryCtrlProxy> {
        let scope = Arc::clone(&self.scope);
        let scope_id = self.scope_id.clone();
        let op_owned = op_name.to_string();
        let (query, cardinality) = tokio::task::spawn_blocking(move || {
            make_query(&scope_id, scope.as_ref(), &op_owned, &params)
        })
        .await
        .map_err(MiddlewareError::from)??;

        let ctrl = QueryCtrlObject::new();
        let (ctrl_proxy, ctrl_binding) = middleware.add_ctrl_object(ctrl.clone()).await?;
        ctrl.set_binding(ctrl_binding);
        let ctrl_proxy = QueryCtrlProxy::new(ctrl_proxy);

        let qo = QueryObject::new(
            query,
            cardinality,
            Some(ctrl_proxy.clone()),
            middleware.invoker().clone(),
            middleware.config().reply_finish_timeout(),
        );
        let (query_proxy, query_binding) = match middleware.add_query_object(qo.clone()).await {
            Ok(added) => added,
            Err(e) => {
                ctrl.destroy();
                return Err(e);
            }
        };
        qo.set_binding(query_binding);
        ctrl.set_query(&qo);
        qo.set_self();

        if let Err(e) = QueryProxy::new(query_proxy).run(reply) {
            qo.abandon();
            return Err(e);
        }
        debug!(
            "ScopeObject: scope {}: {} query started",
            self.scope_id,
            qo.kind()
        );
        Ok(ctrl_proxy)
    }

    async fn serve(self: Arc<Self>, current: Current, payload: Bytes) -> scopes_rpc::Result<Bytes> {
        if !op::ALL.contains(&current.op_name.as_str()) {
            return Err(current.operation_not_exist());
        }
        let params: VariantMap = from_payload(&payload)?;
        let middleware = self.middleware()?;
        let reply = self.reply_proxy(&middleware, &params)?;

        match self
            .create_query(&middleware, &current.op_name, params, &reply)
            .await
        {
            Ok(ctrl) => Ok(to_payload(&json!({ "ctrl_proxy": ctrl.to_string() }))?),
            Err(e) => {
                warn!(
                    "ScopeObject: scope {}: {} failed: {}",
                    self.scope_id, current.op_name, e
                );
                if let Err(e) = reply.finished(&CompletionDetails::error(e.to_string())) {
                    debug!("ScopeObject: could not notify reply: {}", e);
                }
                Err(e.into())
            }
        }
    }
}

impl Servant for ScopeObject {
    fn dispatch(self: Arc<Self>, current: Current, payload: Bytes) -> DispatchFuture {
        Box::pin(self.serve(current, payload))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Decode the request and call the scope's factory for `op_name`.
/// Factory errors and panics become resource errors.
fn make_query(
    scope_id: &str,
    scope: &dyn ScopeBase,
    op_name: &str,
    params: &VariantMap,
) -> Result<(QueryHandle, usize)> {
    let factory_error = |e: BoxError| {
        ScopesError::Resource(format!("scope {}: {}() failed: {}", scope_id, op_name, e))
    };

    let created = match op_name {
        op::SEARCH => {
            let query = CannedQuery::deserialize(get_map(params, "query")?)?;
            let metadata: SearchMetadata = serde_json::from_value(get(params, "metadata")?.clone())?;
            let cardinality = metadata.cardinality;
            catch_unwind(AssertUnwindSafe(|| scope.search(&query, &metadata))).map(|r| {
                r.map(|q| (QueryHandle::Search(q), cardinality))
            })
        }
        _ => {
            let result = ScopeResult::deserialize(get_map(params, "result")?)?;
            let metadata: ActionMetadata = serde_json::from_value(get(params, "metadata")?.clone())?;
            match op_name {
                op::PREVIEW => catch_unwind(AssertUnwindSafe(|| scope.preview(&result, &metadata)))
                    .map(|r| r.map(|q| (QueryHandle::Preview(q), 0))),
                op::ACTIVATE => catch_unwind(AssertUnwindSafe(|| scope.activate(&result, &metadata)))
                    .map(|r| r.map(|q| (QueryHandle::Activation(q), 0))),
                _ => {
                    let widget_id = get_str(params, "widget_id")?;
                    let action_id = get_str(params, "action_id")?;
                    catch_unwind(AssertUnwindSafe(|| {
                        scope.perform_action(&result, &metadata, widget_id, action_id)
                    }))
                    .map(|r| r.map(|q| (QueryHandle::Activation(q), 0)))
                }
            }
        }
    };

    match created {
        Ok(Ok(created)) => Ok(created),
        Ok(Err(e)) => Err(factory_error(e)),
        Err(panic) => Err(factory_error(panic_message(&*panic).into())),
    }
}
