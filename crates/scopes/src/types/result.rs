//! Search results

use std::sync::Arc;

use serde_json::json;

use super::category::{Category, CategoryRegistry};
use super::variant::{get_str, opt_str, Variant, VariantMap};
use crate::error::{Result, ScopesError};

/// A single result item
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeResult {
    pub uri: String,
    pub title: String,
    pub art: String,
    pub dnd_uri: String,
    /// Id of the scope that produced the result; filled in by the
    /// receiving side when empty
    pub origin: String,
    pub attributes: VariantMap,
}

impl ScopeResult {
    pub fn new(uri: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: Variant) {
        self.attributes.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Variant> {
        self.attributes.get(key)
    }

    pub fn serialize(&self) -> VariantMap {
        let mut map = VariantMap::new();
        map.insert("uri".into(), json!(self.uri));
        map.insert("title".into(), json!(self.title));
        if !self.art.is_empty() {
            map.insert("art".into(), json!(self.art));
        }
        if !self.dnd_uri.is_empty() {
            map.insert("dnd_uri".into(), json!(self.dnd_uri));
        }
        if !self.origin.is_empty() {
            map.insert("origin".into(), json!(self.origin));
        }
        map.insert("attrs".into(), Variant::Object(self.attributes.clone()));
        map
    }

    pub fn deserialize(map: &VariantMap) -> Result<Self> {
        let uri = get_str(map, "uri")?;
        if uri.is_empty() {
            return Err(ScopesError::InvalidArgument(
                "Result: uri must not be empty".to_string(),
            ));
        }
        Ok(Self {
            uri: uri.to_string(),
            title: opt_str(map, "title").unwrap_or_default(),
            art: opt_str(map, "art").unwrap_or_default(),
            dnd_uri: opt_str(map, "dnd_uri").unwrap_or_default(),
            origin: opt_str(map, "origin").unwrap_or_default(),
            attributes: map
                .get("attrs")
                .and_then(Variant::as_object)
                .cloned()
                .unwrap_or_default(),
        })
    }
}

/// A result assigned to a category
#[derive(Debug, Clone, PartialEq)]
pub struct CategorisedResult {
    pub result: ScopeResult,
    pub category: Arc<Category>,
}

impl CategorisedResult {
    pub fn new(category: Arc<Category>, result: ScopeResult) -> Self {
        Self { result, category }
    }

    pub fn serialize(&self) -> VariantMap {
        let mut map = self.result.serialize();
        map.insert("cat_id".into(), json!(self.category.id));
        map
    }

    /// Decode a result whose category must already be registered
    pub fn deserialize(map: &VariantMap, categories: &CategoryRegistry) -> Result<Self> {
        let cat_id = get_str(map, "cat_id")?;
        let category = categories.lookup_category(cat_id).ok_or_else(|| {
            ScopesError::InvalidArgument(format!(
                "CategorisedResult: category \"{}\" not registered",
                cat_id
            ))
        })?;
        Ok(Self {
            result: ScopeResult::deserialize(map)?,
            category,
        })
    }
}
