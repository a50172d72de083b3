//! Client side of a reply channel
//!
//! A [`ReplyObject`] is registered on the client's reply adapter for the
//! duration of one query. The scope's reply proxy invokes `push`, `info`
//! and `finished` on it; it decodes each payload according to the kind of
//! its listener and forwards the typed values.
//!
//! The object finishes exactly once: when the scope says so, when the
//! client cancels, when decoding fails, when the client-side cardinality
//! is exceeded, or when the reply reaper finds it idle for too long.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use scopes_rpc::{
    panic_message, AdapterBinding, Current, DispatchFuture, MiddlewareError, ReapItem, Reaper,
    Servant,
};
use tracing::{debug, error, trace, warn};

use super::in_flight::InFlight;
use super::listener::{ActivationListener, PreviewListener, ReplyListener, SearchListener};
use crate::error::Result;
use crate::types::{
    from_payload, get, get_map, ActivationResponse, CategorisedResult, CategoryRegistry,
    CompletionDetails, OperationInfo, Variant, VariantMap,
};

/// Operations of a reply object
pub mod op {
    pub const PUSH: &str = "push";
    pub const FINISHED: &str = "finished";
    pub const INFO: &str = "info";
}

/// Decoders return `Ok(false)` when the query should finish now
type SearchDecoder = fn(&ReplyObject, &dyn SearchListener, &VariantMap) -> Result<bool>;
type PreviewDecoder = fn(&ReplyObject, &dyn PreviewListener, &VariantMap) -> Result<bool>;
type ActivationDecoder = fn(&ReplyObject, &dyn ActivationListener, &VariantMap) -> Result<bool>;

const SEARCH_DECODERS: &[(&str, SearchDecoder)] = &[
    ("category", decode_category),
    ("departments", decode_departments),
    ("filters", decode_filters),
    ("annotation", decode_annotation),
    ("result", decode_result),
];

const PREVIEW_DECODERS: &[(&str, PreviewDecoder)] = &[
    ("columns", decode_columns),
    ("widgets", decode_widgets),
    ("preview-data", decode_preview_data),
];

const ACTIVATION_DECODERS: &[(&str, ActivationDecoder)] = &[("act_response", decode_act_response)];

fn decode_category(obj: &ReplyObject, l: &dyn SearchListener, payload: &VariantMap) -> Result<bool> {
    let category = obj.categories.register_variant(get_map(payload, "category")?)?;
    l.push_category(category);
    Ok(true)
}

fn decode_departments(_obj: &ReplyObject, l: &dyn SearchListener, payload: &VariantMap) -> Result<bool> {
    let current = payload
        .get("current_department")
        .and_then(Variant::as_str)
        .unwrap_or_default();
    l.push_departments(get(payload, "departments")?, current);
    Ok(true)
}

fn decode_filters(_obj: &ReplyObject, l: &dyn SearchListener, payload: &VariantMap) -> Result<bool> {
    let filters = get(payload, "filters")?
        .as_array()
        .cloned()
        .unwrap_or_default();
    let state = payload
        .get("filter_state")
        .and_then(Variant::as_object)
        .cloned()
        .unwrap_or_default();
    l.push_filters(&filters, &state);
    Ok(true)
}

fn decode_annotation(_obj: &ReplyObject, l: &dyn SearchListener, payload: &VariantMap) -> Result<bool> {
    l.push_annotation(get_map(payload, "annotation")?);
    Ok(true)
}

fn decode_result(obj: &ReplyObject, l: &dyn SearchListener, payload: &VariantMap) -> Result<bool> {
    if obj.cardinality != 0 && obj.num_pushes.fetch_add(1, Ordering::SeqCst) >= obj.cardinality {
        debug!(
            "ReplyObject: scope {} exceeded cardinality {}",
            obj.scope_id, obj.cardinality
        );
        return Ok(false);
    }
    let result = CategorisedResult::deserialize(get_map(payload, "result")?, &obj.categories)?;
    l.push_result(result);
    Ok(true)
}

fn decode_columns(_obj: &ReplyObject, l: &dyn PreviewListener, payload: &VariantMap) -> Result<bool> {
    let layouts = get(payload, "columns")?.as_array().cloned().unwrap_or_default();
    l.push_layouts(&layouts);
    Ok(true)
}

fn decode_widgets(_obj: &ReplyObject, l: &dyn PreviewListener, payload: &VariantMap) -> Result<bool> {
    let widgets = get(payload, "widgets")?.as_array().cloned().unwrap_or_default();
    l.push_widgets(&widgets);
    Ok(true)
}

fn decode_preview_data(_obj: &ReplyObject, l: &dyn PreviewListener, payload: &VariantMap) -> Result<bool> {
    for (key, value) in get_map(payload, "preview-data")? {
        l.push_data(key, value);
    }
    Ok(true)
}

fn decode_act_response(
    _obj: &ReplyObject,
    l: &dyn ActivationListener,
    payload: &VariantMap,
) -> Result<bool> {
    l.activated(ActivationResponse::deserialize(get_map(payload, "act_response")?)?);
    Ok(true)
}

/// Run every decoder of `table` whose key is present in `payload`
fn run_decoders<D>(
    table: &[(&str, D)],
    payload: &VariantMap,
    mut decode: impl FnMut(&D) -> Result<bool>,
) -> Result<bool> {
    let mut handled = false;
    for (key, decoder) in table {
        if payload.contains_key(*key) {
            handled = true;
            if !decode(decoder)? {
                return Ok(false);
            }
        }
    }
    if !handled {
        debug!(
            "ReplyObject: ignoring push with keys {:?}",
            payload.keys().collect::<Vec<_>>()
        );
    }
    Ok(true)
}

pub struct ReplyObject {
    listener: ReplyListener,
    scope_id: String,
    cardinality: usize,
    num_pushes: AtomicUsize,
    finished: AtomicBool,
    in_flight: InFlight,
    categories: CategoryRegistry,
    info: Mutex<Vec<OperationInfo>>,
    reap_item: Mutex<Option<ReapItem>>,
    binding: Mutex<Option<AdapterBinding>>,
    finish_timeout: Duration,
}

impl ReplyObject {
    /// Create a reply object and register it with `reaper`. `cardinality`
    /// limits the number of results passed to a search listener (0 for no
    /// limit).
    pub fn new(
        listener: ReplyListener,
        reaper: &Reaper,
        scope_id: &str,
        cardinality: usize,
        finish_timeout: Duration,
    ) -> Result<Arc<Self>> {
        let obj = Arc::new(Self {
            listener,
            scope_id: scope_id.to_string(),
            cardinality,
            num_pushes: AtomicUsize::new(0),
            finished: AtomicBool::new(false),
            in_flight: InFlight::new(),
            categories: CategoryRegistry::new(),
            info: Mutex::new(Vec::new()),
            reap_item: Mutex::new(None),
            binding: Mutex::new(None),
            finish_timeout,
        });

        let weak = Arc::downgrade(&obj);
        let scope = scope_id.to_string();
        let item = reaper.add(move || {
            if let Some(obj) = weak.upgrade() {
                obj.finished(CompletionDetails::error(format!(
                    "No activity on ReplyObject for scope {}: ReplyObject destroyed",
                    scope
                )));
            }
        })?;
        *obj.reap_item.lock() = Some(item);
        Ok(obj)
    }

    pub fn scope_id(&self) -> &str {
        &self.scope_id
    }

    pub fn listener(&self) -> &ReplyListener {
        &self.listener
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Remove the object from its adapter once finished
    pub fn set_binding(&self, binding: AdapterBinding) {
        if self.is_finished() {
            binding.disconnect();
        } else {
            *self.binding.lock() = Some(binding);
        }
    }

    fn refresh(&self) {
        if let Some(item) = self.reap_item.lock().as_ref() {
            item.refresh();
        }
    }

    fn decode(&self, payload: &VariantMap) -> Result<bool> {
        match &self.listener {
            ReplyListener::Search(l) => {
                run_decoders(SEARCH_DECODERS, payload, |d| d(self, l.as_ref(), payload))
            }
            ReplyListener::Preview(l) => {
                run_decoders(PREVIEW_DECODERS, payload, |d| d(self, l.as_ref(), payload))
            }
            ReplyListener::Activation(l) => {
                run_decoders(ACTIVATION_DECODERS, payload, |d| d(self, l.as_ref(), payload))
            }
        }
    }

    pub fn push(&self, payload: VariantMap) {
        let outcome = {
            let _guard = self.in_flight.enter();
            if self.is_finished() {
                trace!("ReplyObject: push after finished ignored");
                return;
            }
            self.refresh();
            catch_unwind(AssertUnwindSafe(|| self.decode(&payload)))
        };

        match outcome {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => self.finished(CompletionDetails::ok()),
            Ok(Err(e)) => {
                warn!("ReplyObject: bad push from scope {}: {}", self.scope_id, e);
                self.finished(CompletionDetails::error(e.to_string()));
            }
            Err(panic) => {
                let message = panic_message(&*panic);
                error!("ReplyObject: listener panicked: {}", message);
                self.finished(CompletionDetails::error(message));
            }
        }
    }

    pub fn info(&self, info: OperationInfo) {
        let _guard = self.in_flight.enter();
        if self.is_finished() {
            return;
        }
        self.refresh();
        self.info.lock().push(info.clone());
        if catch_unwind(AssertUnwindSafe(|| self.listener.info(&info))).is_err() {
            error!("ReplyObject: listener panicked in info()");
        }
    }

    /// Deliver the terminal notification unless one was delivered already.
    /// Diagnostics received through `info` are attached to `details`.
    pub fn finished(&self, mut details: CompletionDetails) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        let item = self.reap_item.lock().take();
        drop(item);

        if !self.in_flight.wait_idle(self.finish_timeout) {
            warn!(
                "ReplyObject: finishing with {} push(es) still in progress",
                self.in_flight.count()
            );
        }

        let mut info = std::mem::take(&mut *self.info.lock());
        info.append(&mut details.info);
        details.info = info;

        debug!(
            "ReplyObject: {} query on scope {} finished ({})",
            self.listener.kind(),
            self.scope_id,
            details
        );
        if catch_unwind(AssertUnwindSafe(|| self.listener.finished(&details))).is_err() {
            error!("ReplyObject: listener panicked in finished()");
        }

        let binding = self.binding.lock().take();
        if let Some(binding) = binding {
            binding.disconnect();
        }
    }

    fn handle(&self, op_name: &str, payload: &[u8]) -> Result<()> {
        match op_name {
            op::PUSH => self.push(from_payload(payload)?),
            op::FINISHED => self.finished(from_payload(payload)?),
            _ => self.info(from_payload(payload)?),
        }
        Ok(())
    }

    async fn serve(self: Arc<Self>, current: Current, payload: Bytes) -> scopes_rpc::Result<Bytes> {
        if ![op::PUSH, op::FINISHED, op::INFO].contains(&current.op_name.as_str()) {
            return Err(current.operation_not_exist());
        }
        let op_name = current.op_name;
        tokio::task::spawn_blocking(move || self.handle(&op_name, &payload))
            .await?
            .map_err(MiddlewareError::from)?;
        Ok(Bytes::new())
    }
}

impl Servant for ReplyObject {
    fn dispatch(self: Arc<Self>, current: Current, payload: Bytes) -> DispatchFuture {
        Box::pin(self.serve(current, payload))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for ReplyObject {
    fn drop(&mut self) {
        self.finished(CompletionDetails::ok());
    }
}
