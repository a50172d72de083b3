//! Runtime configuration
//!
//! Loaded from TOML:
//!
//! ```toml
//! [runtime]
//! registry_identity = "Registry"
//! reap_interval_secs = 10
//! reap_expiry_secs = 45
//! reply_finish_timeout_ms = 1000
//!
//! [middleware]
//! endpoint_dir = "/run/user/1000/scopes"
//! twoway_timeout_ms = 1000
//! ```
//!
//! Every key is optional. Values are checked by [`RuntimeConfig::validate`]
//! before a runtime is created.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScopesError};

fn default_registry_identity() -> String {
    "Registry".to_string()
}

fn default_reap_interval() -> u64 {
    10
}

fn default_reap_expiry() -> u64 {
    45
}

fn default_reply_finish_timeout() -> u64 {
    1000
}

fn default_endpoint_dir() -> PathBuf {
    std::env::temp_dir().join("scopes")
}

fn default_twoway_timeout() -> u64 {
    1000
}

fn default_locate_timeout() -> u64 {
    5000
}

fn default_registry_timeout() -> u64 {
    5000
}

fn default_oneway_pool_size() -> usize {
    1
}

fn default_twoway_pool_size() -> usize {
    8
}

fn default_max_frame_size() -> usize {
    scopes_rpc::DEFAULT_MAX_FRAME_SIZE
}

fn default_connection_idle() -> u64 {
    30
}

/// `[runtime]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// Identity of the registry object
    #[serde(default = "default_registry_identity")]
    pub registry_identity: String,

    /// How often the reply reaper scans for idle replies (seconds)
    #[serde(default = "default_reap_interval")]
    pub reap_interval_secs: u64,

    /// Idle time after which a reply is reaped (seconds)
    #[serde(default = "default_reap_expiry")]
    pub reap_expiry_secs: u64,

    /// Upper bound on how long `finished()` waits for in-flight pushes
    #[serde(default = "default_reply_finish_timeout")]
    pub reply_finish_timeout_ms: u64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            registry_identity: default_registry_identity(),
            reap_interval_secs: default_reap_interval(),
            reap_expiry_secs: default_reap_expiry(),
            reply_finish_timeout_ms: default_reply_finish_timeout(),
        }
    }
}

/// `[middleware]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiddlewareConfig {
    /// Directory holding the `ipc://` socket files
    #[serde(default = "default_endpoint_dir")]
    pub endpoint_dir: PathBuf,

    #[serde(default = "default_twoway_timeout")]
    pub twoway_timeout_ms: u64,

    #[serde(default = "default_locate_timeout")]
    pub locate_timeout_ms: u64,

    #[serde(default = "default_registry_timeout")]
    pub registry_timeout_ms: u64,

    /// Workers per oneway adapter (query and control adapters)
    #[serde(default = "default_oneway_pool_size")]
    pub oneway_pool_size: usize,

    /// Workers per twoway adapter (scope and registry adapters)
    #[serde(default = "default_twoway_pool_size")]
    pub twoway_pool_size: usize,

    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Idle time after which pooled outbound connections are closed (seconds)
    #[serde(default = "default_connection_idle")]
    pub connection_idle_secs: u64,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            endpoint_dir: default_endpoint_dir(),
            twoway_timeout_ms: default_twoway_timeout(),
            locate_timeout_ms: default_locate_timeout(),
            registry_timeout_ms: default_registry_timeout(),
            oneway_pool_size: default_oneway_pool_size(),
            twoway_pool_size: default_twoway_pool_size(),
            max_frame_size: default_max_frame_size(),
            connection_idle_secs: default_connection_idle(),
        }
    }
}

impl MiddlewareConfig {
    pub fn twoway_timeout(&self) -> Duration {
        Duration::from_millis(self.twoway_timeout_ms)
    }

    pub fn connection_idle(&self) -> Duration {
        Duration::from_secs(self.connection_idle_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.endpoint_dir.as_os_str().is_empty() {
            return Err(invalid("middleware.endpoint_dir cannot be empty"));
        }
        if self.twoway_timeout_ms == 0 {
            return Err(invalid("middleware.twoway_timeout_ms must be > 0"));
        }
        if self.locate_timeout_ms == 0 {
            return Err(invalid("middleware.locate_timeout_ms must be > 0"));
        }
        if self.registry_timeout_ms == 0 {
            return Err(invalid("middleware.registry_timeout_ms must be > 0"));
        }
        if self.oneway_pool_size == 0 {
            return Err(invalid("middleware.oneway_pool_size must be >= 1"));
        }
        if self.twoway_pool_size == 0 {
            return Err(invalid("middleware.twoway_pool_size must be >= 1"));
        }
        if self.max_frame_size < 1024 {
            return Err(invalid("middleware.max_frame_size must be >= 1024"));
        }
        if self.connection_idle_secs == 0 {
            return Err(invalid("middleware.connection_idle_secs must be > 0"));
        }
        Ok(())
    }
}

/// Complete runtime configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub runtime: RuntimeSettings,
    #[serde(default)]
    pub middleware: MiddlewareConfig,
}

impl RuntimeConfig {
    /// Load and validate a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ScopesError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: RuntimeConfig =
            toml::from_str(content).map_err(|e| ScopesError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::default()
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.runtime.reap_interval_secs)
    }

    pub fn reap_expiry(&self) -> Duration {
        Duration::from_secs(self.runtime.reap_expiry_secs)
    }

    pub fn reply_finish_timeout(&self) -> Duration {
        Duration::from_millis(self.runtime.reply_finish_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        let rt = &self.runtime;
        if rt.registry_identity.is_empty() {
            return Err(invalid("runtime.registry_identity cannot be empty"));
        }
        if rt.registry_identity.contains('/') {
            return Err(invalid("runtime.registry_identity cannot contain '/'"));
        }
        if rt.reap_interval_secs == 0 {
            return Err(invalid("runtime.reap_interval_secs must be >= 1"));
        }
        if rt.reap_expiry_secs < rt.reap_interval_secs {
            return Err(invalid(
                "runtime.reap_expiry_secs must be >= runtime.reap_interval_secs",
            ));
        }
        if rt.reply_finish_timeout_ms == 0 {
            return Err(invalid("runtime.reply_finish_timeout_ms must be > 0"));
        }
        self.middleware.validate()
    }
}

fn invalid(msg: &str) -> ScopesError {
    ScopesError::Config(msg.to_string())
}

/// Fluent construction of a [`RuntimeConfig`]
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfigBuilder {
    config: RuntimeConfig,
}

impl RuntimeConfigBuilder {
    pub fn registry_identity(mut self, identity: impl Into<String>) -> Self {
        self.config.runtime.registry_identity = identity.into();
        self
    }

    pub fn reap_interval_secs(mut self, secs: u64) -> Self {
        self.config.runtime.reap_interval_secs = secs;
        self
    }

    pub fn reap_expiry_secs(mut self, secs: u64) -> Self {
        self.config.runtime.reap_expiry_secs = secs;
        self
    }

    pub fn reply_finish_timeout_ms(mut self, ms: u64) -> Self {
        self.config.runtime.reply_finish_timeout_ms = ms;
        self
    }

    pub fn endpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.middleware.endpoint_dir = dir.into();
        self
    }

    pub fn twoway_timeout_ms(mut self, ms: u64) -> Self {
        self.config.middleware.twoway_timeout_ms = ms;
        self
    }

    pub fn locate_timeout_ms(mut self, ms: u64) -> Self {
        self.config.middleware.locate_timeout_ms = ms;
        self
    }

    pub fn registry_timeout_ms(mut self, ms: u64) -> Self {
        self.config.middleware.registry_timeout_ms = ms;
        self
    }

    pub fn oneway_pool_size(mut self, size: usize) -> Self {
        self.config.middleware.oneway_pool_size = size;
        self
    }

    pub fn twoway_pool_size(mut self, size: usize) -> Self {
        self.config.middleware.twoway_pool_size = size;
        self
    }

    pub fn connection_idle_secs(mut self, secs: u64) -> Self {
        self.config.middleware.connection_idle_secs = secs;
        self
    }

    pub fn build(self) -> Result<RuntimeConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
