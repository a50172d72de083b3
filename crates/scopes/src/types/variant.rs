//! Dynamically typed values

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, ScopesError};

/// A dynamically typed value
pub type Variant = serde_json::Value;

/// String-keyed dictionary of variants
pub type VariantMap = serde_json::Map<String, Variant>;

pub type VariantArray = Vec<Variant>;

/// Encode a value as a request/response payload
pub fn to_payload<T: Serialize + ?Sized>(value: &T) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(value)?))
}

/// Decode a request/response payload
pub fn from_payload<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(payload)?)
}

/// Look up a mandatory key
pub fn get<'a>(map: &'a VariantMap, key: &str) -> Result<&'a Variant> {
    map.get(key)
        .ok_or_else(|| ScopesError::InvalidArgument(format!("missing key \"{}\"", key)))
}

/// Look up a mandatory string
pub fn get_str<'a>(map: &'a VariantMap, key: &str) -> Result<&'a str> {
    get(map, key)?
        .as_str()
        .ok_or_else(|| ScopesError::InvalidArgument(format!("key \"{}\" is not a string", key)))
}

/// Look up a mandatory dictionary
pub fn get_map<'a>(map: &'a VariantMap, key: &str) -> Result<&'a VariantMap> {
    get(map, key)?
        .as_object()
        .ok_or_else(|| ScopesError::InvalidArgument(format!("key \"{}\" is not a dictionary", key)))
}

/// Look up an optional string; missing and empty are the same
pub fn opt_str(map: &VariantMap, key: &str) -> Option<String> {
    map.get(key)
        .and_then(Variant::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_accessors() {
        let map = json!({"a": "x", "b": {"c": 1}, "d": "", "e": 3})
            .as_object()
            .cloned()
            .unwrap();

        assert_eq!(get_str(&map, "a").unwrap(), "x");
        assert_eq!(get_map(&map, "b").unwrap()["c"], 1);
        assert_eq!(opt_str(&map, "d"), None);
        assert_eq!(opt_str(&map, "a").as_deref(), Some("x"));

        let err = get_str(&map, "missing").unwrap_err();
        assert_eq!(err.to_string(), "invalid argument: missing key \"missing\"");
        assert!(get_str(&map, "e").is_err());
        assert!(get_map(&map, "a").is_err());
    }

    #[test]
    fn test_payload() {
        let map = json!({"k": [1, 2]}).as_object().cloned().unwrap();
        let bytes = to_payload(&map).unwrap();
        let back: VariantMap = from_payload(&bytes).unwrap();
        assert_eq!(back, map);
        assert!(from_payload::<VariantMap>(b"[1").is_err());
    }
}
