//! Result categories

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::json;

use super::variant::{get_str, Variant, VariantMap};
use crate::error::{Result, ScopesError};

/// A group of results rendered together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub id: String,
    pub title: String,
    pub icon: String,
    /// Renderer definition, JSON text
    pub renderer_template: String,
}

impl Category {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            icon: String::new(),
            renderer_template: "{}".to_string(),
        }
    }

    pub fn serialize(&self) -> VariantMap {
        let mut map = VariantMap::new();
        map.insert("id".into(), json!(self.id));
        map.insert("title".into(), json!(self.title));
        map.insert("icon".into(), json!(self.icon));
        map.insert("renderer_template".into(), json!(self.renderer_template));
        map
    }

    pub fn deserialize(map: &VariantMap) -> Result<Self> {
        let id = get_str(map, "id")?;
        if id.is_empty() {
            return Err(ScopesError::InvalidArgument(
                "Category: id must not be empty".to_string(),
            ));
        }
        Ok(Self {
            id: id.to_string(),
            title: get_str(map, "title")?.to_string(),
            icon: map
                .get("icon")
                .and_then(Variant::as_str)
                .unwrap_or_default()
                .to_string(),
            renderer_template: map
                .get("renderer_template")
                .and_then(Variant::as_str)
                .unwrap_or("{}")
                .to_string(),
        })
    }
}

/// Categories known to one reply, keyed by id
#[derive(Debug, Default)]
pub struct CategoryRegistry {
    categories: RwLock<HashMap<String, Arc<Category>>>,
}

impl CategoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a category; an id can be registered only once
    pub fn register_category(&self, category: Category) -> Result<Arc<Category>> {
        let mut categories = self.categories.write();
        if categories.contains_key(&category.id) {
            return Err(ScopesError::InvalidArgument(format!(
                "Category \"{}\" already defined",
                category.id
            )));
        }
        let category = Arc::new(category);
        categories.insert(category.id.clone(), Arc::clone(&category));
        Ok(category)
    }

    /// Add a category received in wire form
    pub fn register_variant(&self, map: &VariantMap) -> Result<Arc<Category>> {
        self.register_category(Category::deserialize(map)?)
    }

    pub fn lookup_category(&self, id: &str) -> Option<Arc<Category>> {
        self.categories.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.categories.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_once() {
        let registry = CategoryRegistry::new();
        let cat = registry.register_category(Category::new("news", "News")).unwrap();
        assert_eq!(cat.title, "News");
        assert!(registry.lookup_category("news").is_some());
        assert!(registry.lookup_category("sports").is_none());

        let err = registry
            .register_category(Category::new("news", "Other"))
            .unwrap_err();
        assert!(err.to_string().contains("\"news\" already defined"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_wire_form() {
        let mut cat = Category::new("apps", "Apps");
        cat.icon = "file:///icon.png".into();
        let back = Category::deserialize(&cat.serialize()).unwrap();
        assert_eq!(back, cat);

        let mut bad = cat.serialize();
        bad.insert("id".into(), serde_json::json!(""));
        assert!(Category::deserialize(&bad).is_err());
    }
}
