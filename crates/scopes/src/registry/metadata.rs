//! Scope metadata

use std::collections::BTreeMap;

use scopes_rpc::{ProxyString, RequestMode};
use serde_json::json;

use crate::error::{Result, ScopesError};
use crate::types::{get_map, get_str, opt_str, Variant, VariantMap};

/// Proxy category of scope objects
pub const SCOPE_CATEGORY: &str = "Scope";

/// Snapshot of scopes, keyed by scope id
pub type MetadataMap = BTreeMap<String, ScopeMetadata>;

/// Everything the registry knows about one scope
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeMetadata {
    pub scope_id: String,
    pub display_name: String,
    pub description: String,
    pub author: String,
    /// Where the scope object lives
    pub proxy: ProxyString,
    pub art: Option<String>,
    pub icon: Option<String>,
    pub search_hint: Option<String>,
    pub hot_key: Option<String>,
    pub invisible: bool,
    pub appearance_attributes: VariantMap,
}

impl ScopeMetadata {
    /// Metadata with the mandatory fields; the optional ones are unset
    pub fn new(
        scope_id: impl Into<String>,
        display_name: impl Into<String>,
        proxy: ProxyString,
    ) -> Self {
        Self {
            scope_id: scope_id.into(),
            display_name: display_name.into(),
            description: String::new(),
            author: String::new(),
            proxy,
            art: None,
            icon: None,
            search_hint: None,
            hot_key: None,
            invisible: false,
            appearance_attributes: VariantMap::new(),
        }
    }

    pub fn serialize(&self) -> VariantMap {
        let mut map = VariantMap::new();
        map.insert("scope_id".into(), json!(self.scope_id));
        map.insert("display_name".into(), json!(self.display_name));
        map.insert("description".into(), json!(self.description));
        map.insert("author".into(), json!(self.author));
        map.insert(
            "proxy".into(),
            json!({
                "identity": self.proxy.identity,
                "endpoint": self.proxy.endpoint,
            }),
        );

        let optional = [
            ("art", &self.art),
            ("icon", &self.icon),
            ("search_hint", &self.search_hint),
            ("hot_key", &self.hot_key),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                map.insert(key.into(), json!(value));
            }
        }
        if self.invisible {
            map.insert("invisible".into(), json!(true));
        }
        if !self.appearance_attributes.is_empty() {
            map.insert(
                "appearance_attributes".into(),
                Variant::Object(self.appearance_attributes.clone()),
            );
        }
        map
    }

    pub fn deserialize(map: &VariantMap) -> Result<Self> {
        let mandatory = |key: &str| -> Result<String> {
            get_str(map, key).map(str::to_string).map_err(|_| {
                ScopesError::InvalidArgument(format!(
                    "ScopeMetadata::deserialize(): required attribute '{}' is missing",
                    key
                ))
            })
        };

        let scope_id = mandatory("scope_id")?;
        if scope_id.is_empty() {
            return Err(ScopesError::InvalidArgument(
                "ScopeMetadata::deserialize(): scope_id cannot be empty".to_string(),
            ));
        }

        let proxy_map = get_map(map, "proxy").map_err(|_| {
            ScopesError::InvalidArgument(
                "ScopeMetadata::deserialize(): required attribute 'proxy' is missing".to_string(),
            )
        })?;
        let identity = get_str(proxy_map, "identity")?;
        let endpoint = get_str(proxy_map, "endpoint")?;
        if identity.is_empty() || endpoint.is_empty() {
            return Err(ScopesError::InvalidArgument(
                "ScopeMetadata::deserialize(): invalid empty proxy identity or endpoint".to_string(),
            ));
        }

        Ok(Self {
            display_name: mandatory("display_name")?,
            description: mandatory("description")?,
            author: mandatory("author")?,
            proxy: scope_proxy_string(endpoint, identity),
            art: opt_str(map, "art"),
            icon: opt_str(map, "icon"),
            search_hint: opt_str(map, "search_hint"),
            hot_key: opt_str(map, "hot_key"),
            invisible: map
                .get("invisible")
                .and_then(Variant::as_bool)
                .unwrap_or(false),
            appearance_attributes: map
                .get("appearance_attributes")
                .and_then(Variant::as_object)
                .cloned()
                .unwrap_or_default(),
            scope_id,
        })
    }
}

/// Twoway proxy string of a scope object
pub fn scope_proxy_string(endpoint: &str, identity: &str) -> ProxyString {
    ProxyString::new(endpoint, identity)
        .with_category(SCOPE_CATEGORY)
        .with_mode(RequestMode::Twoway)
}

/// Encode a snapshot as `{ scope_id: metadata, ... }`
pub fn serialize_map(scopes: &MetadataMap) -> VariantMap {
    scopes
        .iter()
        .map(|(id, meta)| (id.clone(), Variant::Object(meta.serialize())))
        .collect()
}

pub fn deserialize_map(map: &VariantMap) -> Result<MetadataMap> {
    map.iter()
        .map(|(id, value)| {
            let meta = value.as_object().ok_or_else(|| {
                ScopesError::InvalidArgument(format!("metadata for \"{}\" is not a dictionary", id))
            })?;
            Ok((id.clone(), ScopeMetadata::deserialize(meta)?))
        })
        .collect()
}
