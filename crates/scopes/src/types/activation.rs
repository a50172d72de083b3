//! Activation responses

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::variant::{get, Variant, VariantMap};
use crate::canned_query::CannedQuery;
use crate::error::{Result, ScopesError};

/// What the shell should do after a result was activated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationStatus {
    NotHandled,
    ShowDash,
    HideDash,
    ShowPreview,
    PerformQuery,
    UpdateResult,
}

/// Answer of an activation or preview-action query
#[derive(Debug, Clone, PartialEq)]
pub struct ActivationResponse {
    pub status: ActivationStatus,
    pub scope_data: Variant,
    query: Option<CannedQuery>,
}

impl ActivationResponse {
    /// Response with any status except `PerformQuery`
    pub fn new(status: ActivationStatus) -> Result<Self> {
        if status == ActivationStatus::PerformQuery {
            return Err(ScopesError::InvalidArgument(
                "ActivationResponse(): PerformQuery status requires a query".to_string(),
            ));
        }
        Ok(Self {
            status,
            scope_data: Variant::Null,
            query: None,
        })
    }

    /// Response that asks the shell to run `query`
    pub fn perform_query(query: CannedQuery) -> Self {
        Self {
            status: ActivationStatus::PerformQuery,
            scope_data: Variant::Null,
            query: Some(query),
        }
    }

    pub fn not_handled() -> Self {
        Self {
            status: ActivationStatus::NotHandled,
            scope_data: Variant::Null,
            query: None,
        }
    }

    pub fn query(&self) -> Option<&CannedQuery> {
        self.query.as_ref()
    }

    pub fn serialize(&self) -> VariantMap {
        let mut map = VariantMap::new();
        map.insert("status".into(), json!(self.status));
        map.insert("scope_data".into(), self.scope_data.clone());
        if let Some(query) = &self.query {
            map.insert("query".into(), Variant::Object(query.serialize()));
        }
        map
    }

    pub fn deserialize(map: &VariantMap) -> Result<Self> {
        let status: ActivationStatus = serde_json::from_value(get(map, "status")?.clone())?;
        let scope_data = map.get("scope_data").cloned().unwrap_or(Variant::Null);
        let query = match map.get("query").and_then(Variant::as_object) {
            Some(q) => Some(CannedQuery::deserialize(q)?),
            None => None,
        };
        if status == ActivationStatus::PerformQuery && query.is_none() {
            return Err(ScopesError::InvalidArgument(
                "ActivationResponse: PerformQuery status without a query".to_string(),
            ));
        }
        Ok(Self {
            status,
            scope_data,
            query,
        })
    }
}
