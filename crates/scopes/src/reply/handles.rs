//! Reply handles given to query code

use std::sync::Arc;

use crate::canned_query::FilterState;
use crate::error::Result;
use crate::types::{
    CategorisedResult, Category, OperationInfo, Variant, VariantArray, VariantMap,
};

use super::reply_impl::ReplyImpl;

/// Operations shared by every reply handle
pub trait Reply {
    fn reply_impl(&self) -> &ReplyImpl;

    /// Finish normally. Dropping the last handle does the same.
    fn finished(&self) {
        self.reply_impl().finished();
    }

    /// Finish with an error
    fn error(&self, message: &str) {
        self.reply_impl().error(message);
    }

    fn info(&self, info: OperationInfo) -> bool {
        self.reply_impl().info(info)
    }

    fn is_finished(&self) -> bool {
        self.reply_impl().is_finished()
    }
}

/// Reply of a search query. Clones share one channel; the channel
/// finishes when the last clone is dropped.
#[derive(Clone)]
pub struct SearchReply {
    inner: Arc<ReplyImpl>,
}

impl SearchReply {
    pub fn new(inner: Arc<ReplyImpl>) -> Self {
        Self { inner }
    }

    /// Register a category; an id can be registered once per reply
    pub fn register_category(
        &self,
        id: &str,
        title: &str,
        icon: &str,
        renderer_template: &str,
    ) -> Result<Arc<Category>> {
        let mut category = Category::new(id, title);
        category.icon = icon.to_string();
        category.renderer_template = renderer_template.to_string();
        self.inner.register_category(category)
    }

    pub fn lookup_category(&self, id: &str) -> Option<Arc<Category>> {
        self.inner.lookup_category(id)
    }

    pub fn register_departments(&self, departments: Variant, current_department_id: &str) -> Result<bool> {
        self.inner.register_departments(departments, current_department_id)
    }

    /// Push a result. Returns `false` once the query is cancelled, finished
    /// or has reached its cardinality; the caller should stop producing.
    pub fn push(&self, result: &CategorisedResult) -> bool {
        self.inner.push_result(result)
    }

    pub fn push_filters(&self, filters: VariantArray, filter_state: FilterState) -> bool {
        self.inner.push_filters(filters, filter_state)
    }

    pub fn register_annotation(&self, annotation: VariantMap) -> bool {
        self.inner.register_annotation(annotation)
    }
}

impl Reply for SearchReply {
    fn reply_impl(&self) -> &ReplyImpl {
        &self.inner
    }
}

/// Reply of a preview query
#[derive(Clone)]
pub struct PreviewReply {
    inner: Arc<ReplyImpl>,
}

impl PreviewReply {
    pub fn new(inner: Arc<ReplyImpl>) -> Self {
        Self { inner }
    }

    pub fn register_layout(&self, layouts: VariantArray) -> Result<bool> {
        self.inner.register_layout(layouts)
    }

    pub fn push_widgets(&self, widgets: VariantArray) -> bool {
        self.inner.push_widgets(widgets)
    }

    pub fn push_data(&self, key: &str, value: Variant) -> bool {
        self.inner.push_data(key, value)
    }
}

impl Reply for PreviewReply {
    fn reply_impl(&self) -> &ReplyImpl {
        &self.inner
    }
}
