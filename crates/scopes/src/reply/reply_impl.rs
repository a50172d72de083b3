//! Server side of a reply channel
//!
//! A [`ReplyImpl`] forwards what a running query produces to the client's
//! reply object through a [`ReplySink`] (normally a oneway reply proxy).
//!
//! ```text
//!   push ─► enter in-flight ─► pushable? finished? ─► cardinality slot ─► sink.push
//!   finished/error ─► swap(finished) ─► wait in-flight (bounded) ─► sink.finished
//! ```
//!
//! Exactly one terminal call reaches the sink. A push that was admitted
//! before the terminal call is always delivered before it; a push that
//! arrives after it returns `false`.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, trace, warn};

use super::in_flight::InFlight;
use crate::canned_query::FilterState;
use crate::error::{Result, ScopesError};
use crate::types::{
    CategorisedResult, Category, CategoryRegistry, CompletionDetails, OperationInfo, Variant,
    VariantArray, VariantMap,
};

/// Receiver of reply traffic
pub trait ReplySink: Send + Sync {
    fn push(&self, payload: VariantMap) -> Result<()>;

    fn finished(&self, details: &CompletionDetails) -> Result<()>;

    fn info(&self, info: &OperationInfo) -> Result<()>;
}

/// What a reply needs to know about its query
pub trait QueryStatus: Send + Sync {
    /// False once the query was cancelled or failed
    fn pushable(&self) -> bool;

    /// Maximum number of results, 0 for no limit
    fn cardinality(&self) -> usize;
}

pub struct ReplyImpl {
    sink: Arc<dyn ReplySink>,
    query: Arc<dyn QueryStatus>,
    cardinality: usize,
    finished: AtomicBool,
    in_flight: InFlight,
    categories: CategoryRegistry,
    num_pushes: AtomicUsize,
    layouts_push_disallowed: AtomicBool,
    finish_timeout: Duration,
}

impl ReplyImpl {
    /// `finish_timeout` bounds how long a terminal call waits for pushes
    /// that are still being delivered
    pub fn new(
        sink: Arc<dyn ReplySink>,
        query: Arc<dyn QueryStatus>,
        finish_timeout: Duration,
    ) -> Self {
        let cardinality = query.cardinality();
        Self {
            sink,
            query,
            cardinality,
            finished: AtomicBool::new(false),
            in_flight: InFlight::new(),
            categories: CategoryRegistry::new(),
            num_pushes: AtomicUsize::new(0),
            layouts_push_disallowed: AtomicBool::new(false),
            finish_timeout,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn cardinality(&self) -> usize {
        self.cardinality
    }

    /// Number of results accepted so far
    pub fn num_pushes(&self) -> usize {
        let pushes = self.num_pushes.load(Ordering::SeqCst);
        if self.cardinality == 0 {
            pushes
        } else {
            pushes.min(self.cardinality)
        }
    }

    /// Forward an arbitrary payload
    pub fn push(&self, payload: VariantMap) -> bool {
        self.deliver(payload, false)
    }

    fn deliver(&self, payload: VariantMap, is_result: bool) -> bool {
        let guard = self.in_flight.enter();
        if !self.query.pushable() || self.finished.load(Ordering::SeqCst) {
            return false;
        }

        let last = if is_result && self.cardinality > 0 {
            let slot = self.num_pushes.fetch_add(1, Ordering::SeqCst) + 1;
            if slot > self.cardinality {
                return false;
            }
            slot == self.cardinality
        } else {
            if is_result {
                self.num_pushes.fetch_add(1, Ordering::SeqCst);
            }
            false
        };

        if let Err(e) = self.sink.push(payload) {
            drop(guard);
            warn!("Reply: push failed: {}", e);
            self.error(&e.to_string());
            return false;
        }
        drop(guard);

        if last {
            debug!("Reply: cardinality limit of {} reached", self.cardinality);
            self.finished();
        }
        true
    }

    pub fn register_category(&self, category: Category) -> Result<Arc<Category>> {
        let category = self.categories.register_category(category)?;
        self.push_category(&category);
        Ok(category)
    }

    pub fn lookup_category(&self, id: &str) -> Option<Arc<Category>> {
        self.categories.lookup_category(id)
    }

    fn push_category(&self, category: &Category) -> bool {
        let mut payload = VariantMap::new();
        payload.insert("category".into(), Variant::Object(category.serialize()));
        self.push(payload)
    }

    /// Push a result. A result whose category was never registered on this
    /// reply (as happens when forwarding results from another scope)
    /// registers the category first.
    pub fn push_result(&self, result: &CategorisedResult) -> bool {
        if self.categories.lookup_category(&result.category.id).is_none() {
            if let Ok(category) = self.categories.register_category((*result.category).clone()) {
                self.push_category(&category);
            }
        }

        let mut payload = VariantMap::new();
        payload.insert("result".into(), Variant::Object(result.serialize()));
        self.deliver(payload, true)
    }

    pub fn register_departments(&self, departments: Variant, current_department_id: &str) -> Result<bool> {
        if !departments.is_array() {
            return Err(ScopesError::Logic(
                "Reply::register_departments(): Failed to validate departments".to_string(),
            ));
        }
        let mut payload = VariantMap::new();
        payload.insert("departments".into(), departments);
        payload.insert("current_department".into(), json!(current_department_id));
        Ok(self.push(payload))
    }

    pub fn push_filters(&self, filters: VariantArray, filter_state: FilterState) -> bool {
        let mut payload = VariantMap::new();
        payload.insert("filters".into(), Variant::Array(filters));
        payload.insert("filter_state".into(), Variant::Object(filter_state));
        self.push(payload)
    }

    pub fn register_annotation(&self, annotation: VariantMap) -> bool {
        let mut payload = VariantMap::new();
        payload.insert("annotation".into(), Variant::Object(annotation));
        self.push(payload)
    }

    /// Column layouts can be registered once, before any widget
    pub fn register_layout(&self, layouts: VariantArray) -> Result<bool> {
        if self.layouts_push_disallowed.load(Ordering::SeqCst) {
            return Err(ScopesError::Logic(
                "Reply::register_layout(): column layouts can only be registered once and before pushing preview widgets"
                    .to_string(),
            ));
        }
        if layouts.is_empty() {
            return Err(ScopesError::Logic(
                "Reply::register_layout(): Failed to validate layouts".to_string(),
            ));
        }
        let mut payload = VariantMap::new();
        payload.insert("columns".into(), Variant::Array(layouts));
        let pushed = self.push(payload);
        if pushed {
            self.layouts_push_disallowed.store(true, Ordering::SeqCst);
        }
        Ok(pushed)
    }

    pub fn push_widgets(&self, widgets: VariantArray) -> bool {
        self.layouts_push_disallowed.store(true, Ordering::SeqCst);
        let mut payload = VariantMap::new();
        payload.insert("widgets".into(), Variant::Array(widgets));
        self.push(payload)
    }

    pub fn push_data(&self, key: &str, value: Variant) -> bool {
        let mut nested = VariantMap::new();
        nested.insert(key.to_string(), value);
        let mut payload = VariantMap::new();
        payload.insert("preview-data".into(), Variant::Object(nested));
        self.push(payload)
    }

    /// Report a condition to the client; ignored once finished
    pub fn info(&self, info: OperationInfo) -> bool {
        let _guard = self.in_flight.enter();
        if self.finished.load(Ordering::SeqCst) {
            return false;
        }
        match self.sink.info(&info) {
            Ok(()) => true,
            Err(e) => {
                warn!("Reply: info failed: {}", e);
                false
            }
        }
    }

    pub fn finished(&self) {
        self.finished_with(CompletionDetails::ok());
    }

    pub fn error(&self, message: &str) {
        self.finished_with(CompletionDetails::error(message));
    }

    /// Deliver `details` unless a terminal call was already made
    pub fn finished_with(&self, details: CompletionDetails) {
        if self.finished.swap(true, Ordering::SeqCst) {
            trace!("Reply: ignoring repeated terminal call ({})", details);
            return;
        }
        if !self.in_flight.wait_idle(self.finish_timeout) {
            warn!(
                "Reply: {} push(es) still in flight after {:?}, finishing anyway",
                self.in_flight.count(),
                self.finish_timeout
            );
        }
        debug!("Reply: finished ({})", details);
        if let Err(e) = self.sink.finished(&details) {
            warn!("Reply: could not deliver finished ({}): {}", details, e);
        }
    }
}

impl Drop for ReplyImpl {
    fn drop(&mut self) {
        self.finished();
    }
}
