//! Query completion and diagnostics

use std::fmt;

use serde::{Deserialize, Serialize};

/// How a query ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    Ok,
    Cancelled,
    Error,
}

impl fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionStatus::Ok => f.write_str("ok"),
            CompletionStatus::Cancelled => f.write_str("cancelled"),
            CompletionStatus::Error => f.write_str("error"),
        }
    }
}

/// Condition reported by a scope alongside its results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfoCode {
    Unknown,
    NoInternet,
    PoorInternet,
    NoLocationData,
    InaccurateLocationData,
    ResultsIncomplete,
    DefaultSettingsUsed,
    SettingsProblem,
}

/// One diagnostic entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationInfo {
    pub code: InfoCode,
    #[serde(default)]
    pub message: String,
}

impl OperationInfo {
    pub fn new(code: InfoCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Terminal notification for a query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionDetails {
    pub status: CompletionStatus,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub info: Vec<OperationInfo>,
}

impl CompletionDetails {
    pub fn new(status: CompletionStatus) -> Self {
        Self {
            status,
            message: String::new(),
            info: Vec::new(),
        }
    }

    pub fn ok() -> Self {
        Self::new(CompletionStatus::Ok)
    }

    pub fn cancelled() -> Self {
        Self::new(CompletionStatus::Cancelled)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: CompletionStatus::Error,
            message: message.into(),
            info: Vec::new(),
        }
    }

    pub fn add_info(&mut self, info: OperationInfo) {
        self.info.push(info);
    }
}

impl fmt::Display for CompletionDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.status)
        } else {
            write!(f, "{}: {}", self.status, self.message)
        }
    }
}
