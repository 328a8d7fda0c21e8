use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::LogError;

/// Severity of a single entry, ordered from least to most severe.
///
/// The set mirrors the classic structured-logger ladder, including the two
/// terminal levels (`Panic`, `Fatal`) and the developer-panic level
/// (`DPanic`) which only panics when the backend runs in development mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
    DPanic,
    Panic,
    Fatal,
}

impl Severity {
    /// Parse a severity token as it appears at index 0 of a key/value call.
    ///
    /// Recognized tokens: `info`, `err`, `error`, `debug`, `warn`, `fatal`,
    /// `panic`, `dpanic`. Matching is exact; `"INFO"` is not a token.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "info" => Some(Severity::Info),
            "err" | "error" => Some(Severity::Error),
            "debug" => Some(Severity::Debug),
            "warn" => Some(Severity::Warn),
            "fatal" => Some(Severity::Fatal),
            "panic" => Some(Severity::Panic),
            "dpanic" => Some(Severity::DPanic),
            _ => None,
        }
    }

    /// Canonical token for this severity.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
            Severity::DPanic => "dpanic",
            Severity::Panic => "panic",
            Severity::Fatal => "fatal",
        }
    }

    /// Severity name used by Google Cloud Logging's `severity` field.
    pub fn cloud_severity(&self) -> &'static str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARNING",
            Severity::Error => "ERROR",
            Severity::DPanic => "CRITICAL",
            Severity::Panic => "ALERT",
            Severity::Fatal => "EMERGENCY",
        }
    }

    /// Inverse of [`Severity::cloud_severity`].
    pub fn from_cloud_severity(name: &str) -> Option<Self> {
        match name {
            "DEBUG" => Some(Severity::Debug),
            "INFO" => Some(Severity::Info),
            "WARNING" => Some(Severity::Warn),
            "ERROR" => Some(Severity::Error),
            "CRITICAL" => Some(Severity::DPanic),
            "ALERT" => Some(Severity::Panic),
            "EMERGENCY" => Some(Severity::Fatal),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Severity::from_token(s).ok_or(LogError::LevelNotFound)
    }
}
