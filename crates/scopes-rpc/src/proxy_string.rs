//! Stringified proxies
//!
//! A proxy travels between processes as a string:
//!
//! ```text
//! ipc:///tmp/scopes/scope-A#scope-A!c=Scope!m=t!t=300
//! \_______ endpoint ______/ \_id__/ \___ options ___/
//! ```
//!
//! Options are `!`-separated `letter=value` pairs:
//! - `c` - category of the target object (default `Scope`)
//! - `m` - request mode, `o` (oneway) or `t` (twoway, default)
//! - `t` - twoway timeout in milliseconds, `-1` for the middleware default
//!
//! The literal `nullproxy:` stands for "no proxy".

use std::fmt;
use std::str::FromStr;

use crate::error::{MiddlewareError, Result};

/// String form of a null proxy
pub const NULL_PROXY: &str = "nullproxy:";

/// Category assumed when a proxy string has no `c=` field
pub const DEFAULT_CATEGORY: &str = "Scope";

/// Timeout value meaning "use the middleware default"
pub const DEFAULT_TIMEOUT: i64 = -1;

const SCHEMES: [&str; 2] = ["ipc://", "tcp://"];

/// Invocation mode of a proxy or an object adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RequestMode {
    /// Fire-and-forget, no response frame
    Oneway = 0,
    /// Request/response
    Twoway = 1,
}

impl RequestMode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Oneway),
            1 => Some(Self::Twoway),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestMode::Oneway => "oneway",
            RequestMode::Twoway => "twoway",
        }
    }
}

impl fmt::Display for RequestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed proxy string
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyString {
    /// Transport endpoint, including the scheme
    pub endpoint: String,
    /// Object identity within the target adapter
    pub identity: String,
    /// Object category
    pub category: String,
    /// Request mode
    pub mode: RequestMode,
    /// Twoway timeout in milliseconds, -1 for the default
    pub timeout: i64,
}

impl ProxyString {
    pub fn new(endpoint: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            identity: identity.into(),
            category: DEFAULT_CATEGORY.to_string(),
            mode: RequestMode::Twoway,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_timeout(mut self, timeout: i64) -> Self {
        self.timeout = timeout;
        self
    }

    /// Parse a proxy string. `nullproxy:` yields `None`.
    pub fn parse(s: &str) -> Result<Option<Self>> {
        if s == NULL_PROXY {
            return Ok(None);
        }

        let bad = |reason: String| MiddlewareError::BadProxyString {
            proxy: s.to_string(),
            reason,
        };

        let scheme = SCHEMES
            .iter()
            .find(|scheme| s.starts_with(*scheme))
            .ok_or_else(|| bad("invalid proxy scheme (expected ipc:// or tcp://)".to_string()))?;

        let hash = s
            .find('#')
            .ok_or_else(|| bad("missing '#' separator".to_string()))?;
        if hash < scheme.len() {
            return Err(bad("missing '#' separator".to_string()));
        }

        let endpoint = &s[..hash];
        if endpoint.len() == scheme.len() {
            return Err(bad("empty endpoint path".to_string()));
        }

        let mut parts = s[hash + 1..].split('!');
        let identity = parts.next().unwrap_or_default();
        if identity.is_empty() {
            return Err(bad("empty identity".to_string()));
        }

        let mut proxy = ProxyString::new(endpoint, identity);
        let mut seen = Vec::with_capacity(3);

        for field in parts {
            if field.is_empty() {
                return Err(bad("invalid empty field specification".to_string()));
            }
            let mut chars = field.chars();
            let letter = chars.next().unwrap_or_default();
            if field.len() < 3 || chars.next() != Some('=') {
                return Err(bad(format!("bad field specification (\"{}\")", field)));
            }
            if !matches!(letter, 'c' | 'm' | 't') {
                return Err(bad(format!("invalid field identifier ('{}')", letter)));
            }
            if seen.contains(&letter) {
                return Err(bad(format!("duplicate field specification ('{}=')", letter)));
            }
            seen.push(letter);

            let value = &field[2..];
            match letter {
                'c' => proxy.category = value.to_string(),
                'm' => {
                    proxy.mode = match value {
                        "o" => RequestMode::Oneway,
                        "t" => RequestMode::Twoway,
                        _ => {
                            return Err(bad(format!(
                                "bad mode (\"{}\"): legal values are \"o\" and \"t\"",
                                value
                            )))
                        }
                    }
                }
                _ => {
                    proxy.timeout = match value.parse::<i64>() {
                        Ok(t) if t >= DEFAULT_TIMEOUT => t,
                        _ => {
                            return Err(bad(format!(
                                "bad timeout value (\"{}\"): value must be >= -1",
                                value
                            )))
                        }
                    }
                }
            }
        }

        Ok(Some(proxy))
    }
}

impl FromStr for ProxyString {
    type Err = MiddlewareError;

    fn from_str(s: &str) -> Result<Self> {
        ProxyString::parse(s)?.ok_or_else(|| MiddlewareError::BadProxyString {
            proxy: s.to_string(),
            reason: "null proxy where a proxy is required".to_string(),
        })
    }
}

impl fmt::Display for ProxyString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.endpoint, self.identity)?;
        if self.category != DEFAULT_CATEGORY {
            write!(f, "!c={}", self.category)?;
        }
        if self.mode == RequestMode::Oneway {
            f.write_str("!m=o")?;
        }
        if self.timeout != DEFAULT_TIMEOUT {
            write!(f, "!t={}", self.timeout)?;
        }
        Ok(())
    }
}
