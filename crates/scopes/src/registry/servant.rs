//! Registry servant
//!
//! Operations (parameters and results are JSON dictionaries):
//!
//! | op                 | parameters             | result                  |
//! |--------------------|------------------------|-------------------------|
//! | `get_metadata`     | `scope_id`             | metadata dictionary     |
//! | `list`             |                        | `{ scope_id: metadata }`|
//! | `locate`           | `scope_id`             | `{ "proxy": string }`   |
//! | `is_scope_running` | `scope_id`             | `{ "running": bool }`   |
//! | `set_scope_state`  | `scope_id`, `state`    | `{}`                    |

use std::any::Any;
use std::sync::Arc;

use bytes::Bytes;
use scopes_rpc::{Current, DispatchFuture, MiddlewareError, Servant};
use serde_json::json;
use tracing::trace;

use super::metadata::serialize_map;
use super::registry_object::RegistryObject;
use super::{Registry, ScopeState};
use crate::error::Result;
use crate::types::{from_payload, get, get_str, to_payload, Variant, VariantMap};

pub mod op {
    pub const GET_METADATA: &str = "get_metadata";
    pub const LIST: &str = "list";
    pub const LOCATE: &str = "locate";
    pub const IS_SCOPE_RUNNING: &str = "is_scope_running";
    pub const SET_SCOPE_STATE: &str = "set_scope_state";
}

/// Serves a [`RegistryObject`] over the middleware
pub struct RegistryServant {
    registry: Arc<RegistryObject>,
}

impl RegistryServant {
    pub fn new(registry: Arc<RegistryObject>) -> Arc<Self> {
        Arc::new(Self { registry })
    }

    pub fn registry(&self) -> &Arc<RegistryObject> {
        &self.registry
    }

    async fn serve(&self, current: &Current, payload: &[u8]) -> scopes_rpc::Result<Bytes> {
        trace!("Registry: {}", current.op_name);
        let params: VariantMap = if payload.is_empty() {
            VariantMap::new()
        } else {
            from_payload(payload)?
        };

        let result = match current.op_name.as_str() {
            op::GET_METADATA => self.get_metadata(&params).await,
            op::LIST => self.list().await,
            op::LOCATE => self.locate(&params).await,
            op::IS_SCOPE_RUNNING => self.is_scope_running(&params).await,
            op::SET_SCOPE_STATE => self.set_scope_state(&params),
            _ => return Err(current.operation_not_exist()),
        };
        result.map_err(MiddlewareError::from)
    }

    async fn get_metadata(&self, params: &VariantMap) -> Result<Bytes> {
        let meta = self.registry.get_metadata(get_str(params, "scope_id")?).await?;
        to_payload(&Variant::Object(meta.serialize()))
    }

    async fn list(&self) -> Result<Bytes> {
        let scopes = self.registry.list().await?;
        to_payload(&Variant::Object(serialize_map(&scopes)))
    }

    async fn locate(&self, params: &VariantMap) -> Result<Bytes> {
        let proxy = self.registry.locate(get_str(params, "scope_id")?).await?;
        to_payload(&json!({ "proxy": proxy.to_string() }))
    }

    async fn is_scope_running(&self, params: &VariantMap) -> Result<Bytes> {
        let running = self
            .registry
            .is_scope_running(get_str(params, "scope_id")?)
            .await?;
        to_payload(&json!({ "running": running }))
    }

    fn set_scope_state(&self, params: &VariantMap) -> Result<Bytes> {
        let state: ScopeState = serde_json::from_value(get(params, "state")?.clone())?;
        self.registry
            .on_state_received(get_str(params, "scope_id")?, state)?;
        to_payload(&json!({}))
    }
}

impl Servant for RegistryServant {
    fn dispatch(self: Arc<Self>, current: Current, payload: Bytes) -> DispatchFuture {
        Box::pin(async move { self.serve(&current, &payload).await })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
