//! Client-side scope proxy

use std::fmt;
use std::sync::Arc;

use scopes_rpc::{Invoker, ObjectProxy, Reaper};
use serde_json::json;
use tracing::{debug, warn};

use crate::canned_query::CannedQuery;
use crate::error::{Result, ScopesError};
use crate::middleware::Middleware;
use crate::proxies::QueryCtrlProxy;
use crate::query::{ActionMetadata, SearchMetadata};
use crate::reply::{
    ActivationListener, PreviewListener, QueryCtrl, ReplyListener, ReplyObject, SearchListener,
};
use crate::scope_object::op;
use crate::types::{from_payload, get_str, to_payload, CompletionDetails, ScopeResult, VariantMap};

/// Handle to a scope, local or remote.
///
/// Each call creates a reply object for `listener`, sends the request and
/// returns at once with a [`QueryCtrl`]; the listener is called as results
/// arrive.
#[derive(Clone)]
pub struct ScopeProxy {
    scope_id: String,
    proxy: ObjectProxy,
    middleware: Arc<Middleware>,
    reply_reaper: Arc<Reaper>,
}

impl ScopeProxy {
    pub fn new(
        scope_id: &str,
        proxy: ObjectProxy,
        middleware: Arc<Middleware>,
        reply_reaper: Arc<Reaper>,
    ) -> Self {
        Self {
            scope_id: scope_id.to_string(),
            proxy,
            middleware,
            reply_reaper,
        }
    }

    pub fn scope_id(&self) -> &str {
        &self.scope_id
    }

    pub fn proxy(&self) -> &ObjectProxy {
        &self.proxy
    }

    pub async fn search(
        &self,
        query: &CannedQuery,
        metadata: &SearchMetadata,
        listener: Arc<dyn SearchListener>,
    ) -> Result<Arc<QueryCtrl>> {
        let params = json!({ "query": query.serialize(), "metadata": metadata });
        self.invoke(
            op::SEARCH,
            params,
            ReplyListener::Search(listener),
            metadata.cardinality,
        )
        .await
    }

    pub async fn preview(
        &self,
        result: &ScopeResult,
        metadata: &ActionMetadata,
        listener: Arc<dyn PreviewListener>,
    ) -> Result<Arc<QueryCtrl>> {
        let params = json!({ "result": result.serialize(), "metadata": metadata });
        self.invoke(op::PREVIEW, params, ReplyListener::Preview(listener), 0)
            .await
    }

    pub async fn activate(
        &self,
        result: &ScopeResult,
        metadata: &ActionMetadata,
        listener: Arc<dyn ActivationListener>,
    ) -> Result<Arc<QueryCtrl>> {
        let params = json!({ "result": result.serialize(), "metadata": metadata });
        self.invoke(op::ACTIVATE, params, ReplyListener::Activation(listener), 0)
            .await
    }

    pub async fn perform_action(
        &self,
        result: &ScopeResult,
        metadata: &ActionMetadata,
        widget_id: &str,
        action_id: &str,
        listener: Arc<dyn ActivationListener>,
    ) -> Result<Arc<QueryCtrl>> {
        let params = json!({
            "result": result.serialize(),
            "metadata": metadata,
            "widget_id": widget_id,
            "action_id": action_id,
        });
        self.invoke(
            op::PERFORM_ACTION,
            params,
            ReplyListener::Activation(listener),
            0,
        )
        .await
    }

    async fn invoke(
        &self,
        op_name: &'static str,
        params: serde_json::Value,
        listener: ReplyListener,
        cardinality: usize,
    ) -> Result<Arc<QueryCtrl>> {
        let reply = ReplyObject::new(
            listener,
            &self.reply_reaper,
            &self.scope_id,
            cardinality,
            self.middleware.config().reply_finish_timeout(),
        )?;
        let (reply_proxy, binding) = self.middleware.add_reply_object(reply.clone()).await?;
        reply.set_binding(binding);
        let ctrl = QueryCtrl::new(&reply);

        let mut params = match params {
            serde_json::Value::Object(map) => map,
            _ => VariantMap::new(),
        };
        params.insert("reply_proxy".into(), json!(reply_proxy.to_string()));

        let proxy = self.proxy.clone();
        let invoker = self.middleware.invoker().clone();
        let pending = Arc::clone(&ctrl);
        tokio::spawn(async move {
            match request_ctrl(&proxy, &invoker, op_name, &params).await {
                Ok(ctrl_proxy) => {
                    debug!("ScopeProxy: {} on {} accepted", op_name, proxy);
                    pending.set_proxy(ctrl_proxy);
                }
                Err(e) => {
                    warn!("ScopeProxy: {} on {} failed: {}", op_name, proxy, e);
                    let details = CompletionDetails::error(e.to_string());
                    // listener code runs off the async workers
                    if let Err(e) = tokio::task::spawn_blocking(move || reply.finished(details)).await {
                        warn!(
                            "ScopeProxy: delivering the failure of {} on {}: {}",
                            op_name, proxy, e
                        );
                    }
                }
            }
        });
        Ok(ctrl)
    }
}

async fn request_ctrl(
    proxy: &ObjectProxy,
    invoker: &Invoker,
    op_name: &str,
    params: &VariantMap,
) -> Result<QueryCtrlProxy> {
    let out = proxy
        .invoke_twoway(op_name, to_payload(params)?)
        .await
        .map_err(ScopesError::from_remote)?;
    let response: VariantMap = from_payload(&out)?;
    let ctrl = ObjectProxy::from_string(invoker, get_str(&response, "ctrl_proxy")?)?
        .ok_or_else(|| ScopesError::Logic(format!("{}: scope returned a null control proxy", op_name)))?;
    Ok(QueryCtrlProxy::new(ctrl))
}

impl fmt::Display for ScopeProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.proxy.fmt(f)
    }
}

impl fmt::Debug for ScopeProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeProxy")
            .field("scope_id", &self.scope_id)
            .field("proxy", &self.proxy.to_string())
            .finish()
    }
}
