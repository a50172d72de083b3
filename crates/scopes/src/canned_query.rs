//! Canned queries
//!
//! A canned query captures everything needed to re-run a search: target
//! scope, query text, department and filter selections. It has a dictionary
//! form (used on the wire) and a URI form for embedding in links:
//!
//! ```text
//! scope://<scope-id>?q=<query>[&department=<dep-id>][&filters=<json>]
//! ```
//!
//! Every component is percent-encoded; all bytes other than ASCII letters
//! and digits are escaped.

use std::fmt;
use std::str::FromStr;

use serde_json::json;

use crate::error::{Result, ScopesError};
use crate::types::{get_str, Variant, VariantMap};

/// URI scheme of canned queries
pub const SCOPE_URI_SCHEME: &str = "scope://";

/// Filter selections of a query, keyed by filter id
pub type FilterState = VariantMap;

/// A complete, replayable query
#[derive(Debug, Clone, PartialEq)]
pub struct CannedQuery {
    scope_id: String,
    query_string: String,
    department_id: String,
    filter_state: FilterState,
}

impl CannedQuery {
    pub fn new(scope_id: impl Into<String>) -> Result<Self> {
        let scope_id = scope_id.into();
        if scope_id.is_empty() {
            return Err(ScopesError::InvalidArgument(
                "CannedQuery(): scope id cannot be empty".to_string(),
            ));
        }
        Ok(Self {
            scope_id,
            query_string: String::new(),
            department_id: String::new(),
            filter_state: FilterState::new(),
        })
    }

    pub fn with_query_string(mut self, query_string: impl Into<String>) -> Self {
        self.query_string = query_string.into();
        self
    }

    pub fn with_department_id(mut self, department_id: impl Into<String>) -> Self {
        self.department_id = department_id.into();
        self
    }

    pub fn with_filter_state(mut self, filter_state: FilterState) -> Self {
        self.filter_state = filter_state;
        self
    }

    pub fn scope_id(&self) -> &str {
        &self.scope_id
    }

    pub fn query_string(&self) -> &str {
        &self.query_string
    }

    pub fn department_id(&self) -> &str {
        &self.department_id
    }

    pub fn filter_state(&self) -> &FilterState {
        &self.filter_state
    }

    pub fn set_query_string(&mut self, query_string: impl Into<String>) {
        self.query_string = query_string.into();
    }

    pub fn set_department_id(&mut self, department_id: impl Into<String>) {
        self.department_id = department_id.into();
    }

    pub fn set_filter_state(&mut self, filter_state: FilterState) {
        self.filter_state = filter_state;
    }

    pub fn serialize(&self) -> VariantMap {
        let mut map = VariantMap::new();
        map.insert("scope".into(), json!(self.scope_id));
        map.insert("query_string".into(), json!(self.query_string));
        map.insert("department_id".into(), json!(self.department_id));
        map.insert("filter_state".into(), Variant::Object(self.filter_state.clone()));
        map
    }

    pub fn deserialize(map: &VariantMap) -> Result<Self> {
        let scope_id = get_str(map, "scope")
            .map_err(|_| ScopesError::InvalidArgument("CannedQuery(): scope id not set".to_string()))?;
        let filter_state = map
            .get("filter_state")
            .ok_or_else(|| {
                ScopesError::InvalidArgument("CannedQuery(): filter_state is missing".to_string())
            })?
            .as_object()
            .cloned()
            .ok_or_else(|| {
                ScopesError::InvalidArgument(
                    "CannedQuery(): filter_state is not a dictionary".to_string(),
                )
            })?;

        let string_of = |key: &str| {
            map.get(key)
                .and_then(Variant::as_str)
                .unwrap_or_default()
                .to_string()
        };

        Ok(Self {
            query_string: string_of("query_string"),
            department_id: string_of("department_id"),
            filter_state,
            ..Self::new(scope_id)?
        })
    }

    /// URI form of this query
    pub fn to_uri(&self) -> String {
        let mut uri = String::from(SCOPE_URI_SCHEME);
        uri.push_str(&percent_encode(&self.scope_id));
        uri.push_str("?q=");
        uri.push_str(&percent_encode(&self.query_string));
        if !self.department_id.is_empty() {
            uri.push_str("&department=");
            uri.push_str(&percent_encode(&self.department_id));
        }
        if !self.filter_state.is_empty() {
            uri.push_str("&filters=");
            uri.push_str(&percent_encode(
                &Variant::Object(self.filter_state.clone()).to_string(),
            ));
        }
        uri
    }

    /// Parse the URI form. Unknown parameters are ignored.
    pub fn from_uri(uri: &str) -> Result<Self> {
        let rest = uri.strip_prefix(SCOPE_URI_SCHEME).ok_or_else(|| {
            ScopesError::InvalidArgument(format!(
                "CannedQuery::from_uri(): unsupported scheme in \"{}\"",
                uri
            ))
        })?;

        let (raw_id, raw_params) = match rest.split_once('?') {
            Some((id, params)) => (id, params),
            None => (rest, ""),
        };

        let scope_id = percent_decode(raw_id)?;
        if scope_id.is_empty() {
            return Err(ScopesError::InvalidArgument(format!(
                "CannedQuery::from_uri(): scope id is empty in \"{}\"",
                uri
            )));
        }
        let mut query = CannedQuery::new(scope_id)?;

        for param in raw_params.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = param.split_once('=').unwrap_or((param, ""));
            match key {
                "q" => query.query_string = percent_decode(value)?,
                "department" => query.department_id = percent_decode(value)?,
                "filters" => {
                    let text = percent_decode(value)?;
                    let parsed: Variant = serde_json::from_str(&text).map_err(|e| {
                        ScopesError::InvalidArgument(format!(
                            "CannedQuery::from_uri(): invalid filters: {}",
                            e
                        ))
                    })?;
                    query.filter_state = match parsed {
                        Variant::Object(map) => map,
                        _ => {
                            return Err(ScopesError::InvalidArgument(
                                "CannedQuery::from_uri(): filters must be a JSON object"
                                    .to_string(),
                            ))
                        }
                    };
                }
                _ => {}
            }
        }
        Ok(query)
    }
}

impl fmt::Display for CannedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_uri())
    }
}

impl FromStr for CannedQuery {
    type Err = ScopesError;

    fn from_str(s: &str) -> Result<Self> {
        CannedQuery::from_uri(s)
    }
}

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// Escape every byte that is not an ASCII letter or digit as `%XX`
pub fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        if b.is_ascii_alphanumeric() {
            out.push(b as char);
        } else {
            out.push('%');
            out.push(HEX_DIGITS[(b >> 4) as usize] as char);
            out.push(HEX_DIGITS[(b & 0x0f) as usize] as char);
        }
    }
    out
}

/// Reverse of [`percent_encode`]; accepts escapes in either case
pub fn percent_decode(s: &str) -> Result<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hi = bytes.get(i + 1).and_then(|b| hex_value(*b));
            let lo = bytes.get(i + 2).and_then(|b| hex_value(*b));
            match (hi, lo) {
                (Some(hi), Some(lo)) => out.push(hi << 4 | lo),
                _ => {
                    return Err(ScopesError::InvalidArgument(format!(
                        "malformed percent escape at offset {} in \"{}\"",
                        i, s
                    )))
                }
            }
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| {
        ScopesError::InvalidArgument(format!("percent-decoded text is not UTF-8: \"{}\"", s))
    })
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
