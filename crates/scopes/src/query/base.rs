//! Traits implemented by scope authors

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::canned_query::CannedQuery;
use crate::error::BoxError;
use crate::reply::{PreviewReply, SearchReply};
use crate::types::{ActivationResponse, ScopeResult, Variant, VariantMap};

/// Common to every query
pub trait QueryBase: Send + Sync {
    /// Called once when the client cancels the query. `run` should stop
    /// soon after; pushes are rejected from now on.
    fn cancelled(&self) {}
}

pub trait SearchQueryBase: QueryBase {
    /// Produce results. Returning does not finish the reply; it finishes
    /// when the last clone of `reply` is dropped.
    fn run(&self, reply: SearchReply, token: CancellationToken) -> Result<(), BoxError>;
}

pub trait PreviewQueryBase: QueryBase {
    fn run(&self, reply: PreviewReply, token: CancellationToken) -> Result<(), BoxError>;
}

pub trait ActivationQueryBase: QueryBase {
    fn activate(&self) -> Result<ActivationResponse, BoxError>;
}

/// Activation that leaves the result to the shell
pub struct NotHandledActivation;

impl QueryBase for NotHandledActivation {}

impl ActivationQueryBase for NotHandledActivation {
    fn activate(&self) -> Result<ActivationResponse, BoxError> {
        Ok(ActivationResponse::not_handled())
    }
}

/// A scope. One instance serves every query sent to the scope, from any
/// number of threads.
pub trait ScopeBase: Send + Sync {
    fn start(&self, _scope_id: &str) -> Result<(), BoxError> {
        Ok(())
    }

    fn stop(&self) {}

    fn search(
        &self,
        query: &CannedQuery,
        metadata: &SearchMetadata,
    ) -> Result<Box<dyn SearchQueryBase>, BoxError>;

    fn preview(
        &self,
        result: &ScopeResult,
        metadata: &ActionMetadata,
    ) -> Result<Box<dyn PreviewQueryBase>, BoxError>;

    fn activate(
        &self,
        _result: &ScopeResult,
        _metadata: &ActionMetadata,
    ) -> Result<Box<dyn ActivationQueryBase>, BoxError> {
        Ok(Box::new(NotHandledActivation))
    }

    /// A preview widget action was triggered
    fn perform_action(
        &self,
        _result: &ScopeResult,
        _metadata: &ActionMetadata,
        _widget_id: &str,
        _action_id: &str,
    ) -> Result<Box<dyn ActivationQueryBase>, BoxError> {
        Ok(Box::new(NotHandledActivation))
    }
}

/// The user query behind a query object
pub enum QueryHandle {
    Search(Box<dyn SearchQueryBase>),
    Preview(Box<dyn PreviewQueryBase>),
    Activation(Box<dyn ActivationQueryBase>),
}

impl QueryHandle {
    pub fn kind(&self) -> &'static str {
        match self {
            QueryHandle::Search(_) => "search",
            QueryHandle::Preview(_) => "preview",
            QueryHandle::Activation(_) => "activation",
        }
    }

    pub(crate) fn cancelled(&self) {
        match self {
            QueryHandle::Search(q) => q.cancelled(),
            QueryHandle::Preview(q) => q.cancelled(),
            QueryHandle::Activation(q) => q.cancelled(),
        }
    }
}

impl std::fmt::Debug for QueryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("QueryHandle").field(&self.kind()).finish()
    }
}

/// Parameters of a search request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchMetadata {
    /// Maximum number of results, 0 for no limit
    pub cardinality: usize,
    pub locale: String,
    pub form_factor: String,
    pub hints: VariantMap,
}

impl SearchMetadata {
    pub fn new(locale: impl Into<String>, form_factor: impl Into<String>) -> Self {
        Self {
            locale: locale.into(),
            form_factor: form_factor.into(),
            ..Default::default()
        }
    }

    pub fn with_cardinality(mut self, cardinality: usize) -> Self {
        self.cardinality = cardinality;
        self
    }

    pub fn set_hint(&mut self, key: impl Into<String>, value: Variant) {
        self.hints.insert(key.into(), value);
    }
}

/// Parameters of preview, activation and action requests
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionMetadata {
    pub locale: String,
    pub form_factor: String,
    pub scope_data: Variant,
    pub hints: VariantMap,
}

impl ActionMetadata {
    pub fn new(locale: impl Into<String>, form_factor: impl Into<String>) -> Self {
        Self {
            locale: locale.into(),
            form_factor: form_factor.into(),
            ..Default::default()
        }
    }

    pub fn with_scope_data(mut self, scope_data: Variant) -> Self {
        self.scope_data = scope_data;
        self
    }
}
