//! Typed proxies
//!
//! Each proxy wraps an [`ObjectProxy`] and marshals its parameters into a
//! JSON payload. Errors raised by the remote servant come back as
//! [`ScopesError`]s of the same kind.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use scopes_rpc::{ObjectProxy, ProxyString};
use serde_json::json;

use crate::error::{Result, ScopesError};
use crate::query::op as query_op;
use crate::registry::{
    deserialize_map, op as registry_op, MetadataMap, Registry, ScopeMetadata, ScopeState,
};
use crate::reply::{op as reply_op, ReplySink};
use crate::types::{from_payload, get_str, to_payload, CompletionDetails, OperationInfo, Variant, VariantMap};

/// Oneway proxy to a client's reply object
#[derive(Clone)]
pub struct ReplyProxy {
    proxy: ObjectProxy,
}

impl ReplyProxy {
    pub fn new(proxy: ObjectProxy) -> Self {
        Self { proxy }
    }

    pub fn proxy(&self) -> &ObjectProxy {
        &self.proxy
    }
}

impl ReplySink for ReplyProxy {
    fn push(&self, payload: VariantMap) -> Result<()> {
        Ok(self
            .proxy
            .invoke_oneway(reply_op::PUSH, to_payload(&payload)?)?)
    }

    fn finished(&self, details: &CompletionDetails) -> Result<()> {
        Ok(self
            .proxy
            .invoke_oneway(reply_op::FINISHED, to_payload(details)?)?)
    }

    fn info(&self, info: &OperationInfo) -> Result<()> {
        Ok(self.proxy.invoke_oneway(reply_op::INFO, to_payload(info)?)?)
    }
}

impl fmt::Display for ReplyProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.proxy.fmt(f)
    }
}

/// Oneway proxy to a server-side query object
#[derive(Clone)]
pub struct QueryProxy {
    proxy: ObjectProxy,
}

impl QueryProxy {
    pub fn new(proxy: ObjectProxy) -> Self {
        Self { proxy }
    }

    /// Start the query; results go to `reply`
    pub fn run(&self, reply: &ReplyProxy) -> Result<()> {
        let params = json!({ "reply_proxy": reply.proxy().to_string() });
        Ok(self.proxy.invoke_oneway(query_op::RUN, to_payload(&params)?)?)
    }
}

/// Oneway proxy to a server-side query control object
#[derive(Clone)]
pub struct QueryCtrlProxy {
    proxy: ObjectProxy,
}

impl QueryCtrlProxy {
    pub fn new(proxy: ObjectProxy) -> Self {
        Self { proxy }
    }

    pub fn proxy(&self) -> &ObjectProxy {
        &self.proxy
    }

    pub fn cancel(&self) -> Result<()> {
        Ok(self.proxy.invoke_oneway(query_op::CANCEL, Bytes::new())?)
    }

    pub fn destroy(&self) -> Result<()> {
        Ok(self.proxy.invoke_oneway(query_op::DESTROY, Bytes::new())?)
    }
}

impl fmt::Display for QueryCtrlProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.proxy.fmt(f)
    }
}

/// Twoway proxy to a registry
pub struct RegistryProxy {
    proxy: ObjectProxy,
    locate_timeout_ms: i64,
}

impl RegistryProxy {
    /// `locate` uses its own, usually longer, timeout
    pub fn new(proxy: ObjectProxy, locate_timeout_ms: i64) -> Self {
        Self {
            proxy,
            locate_timeout_ms,
        }
    }

    pub fn proxy(&self) -> &ObjectProxy {
        &self.proxy
    }

    async fn call(&self, proxy: &ObjectProxy, op_name: &str, params: Variant) -> Result<Variant> {
        let out = proxy
            .invoke_twoway(op_name, to_payload(&params)?)
            .await
            .map_err(ScopesError::from_remote)?;
        from_payload(&out)
    }

    /// Report the state of a scope process
    pub async fn set_scope_state(&self, scope_id: &str, state: ScopeState) -> Result<()> {
        self.call(
            &self.proxy,
            registry_op::SET_SCOPE_STATE,
            json!({ "scope_id": scope_id, "state": state }),
        )
        .await?;
        Ok(())
    }

    pub async fn ping(&self) -> Result<()> {
        Ok(self.proxy.ping().await?)
    }
}

fn expect_map(value: Variant, what: &str) -> Result<VariantMap> {
    match value {
        Variant::Object(map) => Ok(map),
        other => Err(ScopesError::Registry(format!(
            "{}: expected a dictionary, got {}",
            what, other
        ))),
    }
}

#[async_trait]
impl Registry for RegistryProxy {
    async fn get_metadata(&self, scope_id: &str) -> Result<ScopeMetadata> {
        let value = self
            .call(
                &self.proxy,
                registry_op::GET_METADATA,
                json!({ "scope_id": scope_id }),
            )
            .await?;
        ScopeMetadata::deserialize(&expect_map(value, "get_metadata")?)
    }

    async fn list(&self) -> Result<MetadataMap> {
        let value = self.call(&self.proxy, registry_op::LIST, json!({})).await?;
        deserialize_map(&expect_map(value, "list")?)
    }

    async fn locate(&self, scope_id: &str) -> Result<ProxyString> {
        let proxy = self.proxy.clone().with_timeout(self.locate_timeout_ms);
        let value = self
            .call(&proxy, registry_op::LOCATE, json!({ "scope_id": scope_id }))
            .await?;
        let map = expect_map(value, "locate")?;
        ProxyString::parse(get_str(&map, "proxy")?)?.ok_or_else(|| {
            ScopesError::Registry(format!("locate(\"{}\") returned a null proxy", scope_id))
        })
    }

    async fn is_scope_running(&self, scope_id: &str) -> Result<bool> {
        let value = self
            .call(
                &self.proxy,
                registry_op::IS_SCOPE_RUNNING,
                json!({ "scope_id": scope_id }),
            )
            .await?;
        value
            .get("running")
            .and_then(Variant::as_bool)
            .ok_or_else(|| ScopesError::Registry("is_scope_running: bad response".to_string()))
    }
}

impl fmt::Display for RegistryProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.proxy.fmt(f)
    }
}
