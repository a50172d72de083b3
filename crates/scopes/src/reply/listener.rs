//! Client-side listeners
//!
//! A listener receives what a scope pushes for one query, then exactly one
//! `finished` call. Listener methods run on a blocking thread of the
//! client runtime and are called in push order.

use std::sync::Arc;

use crate::canned_query::FilterState;
use crate::types::{
    ActivationResponse, CategorisedResult, Category, CompletionDetails, OperationInfo, Variant,
    VariantArray, VariantMap,
};

/// Calls common to every listener kind
pub trait ListenerBase: Send + Sync {
    /// The query ended; called exactly once
    fn finished(&self, details: &CompletionDetails);

    /// A condition reported by the scope while the query runs
    fn info(&self, _info: &OperationInfo) {}
}

pub trait SearchListener: ListenerBase {
    fn push_result(&self, result: CategorisedResult);

    fn push_category(&self, _category: Arc<Category>) {}

    fn push_departments(&self, _departments: &Variant, _current_department_id: &str) {}

    fn push_filters(&self, _filters: &VariantArray, _filter_state: &FilterState) {}

    fn push_annotation(&self, _annotation: &VariantMap) {}
}

pub trait PreviewListener: ListenerBase {
    fn push_layouts(&self, _layouts: &VariantArray) {}

    fn push_widgets(&self, widgets: &VariantArray);

    fn push_data(&self, _key: &str, _value: &Variant) {}
}

pub trait ActivationListener: ListenerBase {
    fn activated(&self, response: ActivationResponse);
}

/// The listener of one reply object, tagged by kind
#[derive(Clone)]
pub enum ReplyListener {
    Search(Arc<dyn SearchListener>),
    Preview(Arc<dyn PreviewListener>),
    Activation(Arc<dyn ActivationListener>),
}

impl ReplyListener {
    pub fn kind(&self) -> &'static str {
        match self {
            ReplyListener::Search(_) => "search",
            ReplyListener::Preview(_) => "preview",
            ReplyListener::Activation(_) => "activation",
        }
    }

    pub(crate) fn finished(&self, details: &CompletionDetails) {
        match self {
            ReplyListener::Search(l) => l.finished(details),
            ReplyListener::Preview(l) => l.finished(details),
            ReplyListener::Activation(l) => l.finished(details),
        }
    }

    pub(crate) fn info(&self, info: &OperationInfo) {
        match self {
            ReplyListener::Search(l) => l.info(info),
            ReplyListener::Preview(l) => l.info(info),
            ReplyListener::Activation(l) => l.info(info),
        }
    }
}

impl std::fmt::Debug for ReplyListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReplyListener({})", self.kind())
    }
}
