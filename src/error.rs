//! Error taxonomy for workflow execution.
//!
//! Activity-level errors are classified at the executor boundary so the
//! retry engine can decide on them without inspecting messages.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of error classes, as recorded in durable history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or incomplete request (never retried)
    Validation,

    /// Network failure, timeout, 5xx, rate limiting
    TransientExternal,

    /// 4xx or otherwise permanent rejection by a collaborator
    PermanentExternal,

    /// Customer identity could not be resolved for billing
    BillingLookup,

    /// Process-level misconfiguration (startup only)
    Configuration,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::TransientExternal => "transient_external",
            Self::PermanentExternal => "permanent_external",
            Self::BillingLookup => "billing_lookup",
            Self::Configuration => "configuration",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified workflow error
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Transient external error: {0}")]
    TransientExternal(String),

    #[error("Permanent external error: {0}")]
    PermanentExternal(String),

    #[error("Billing lookup failed: {0}")]
    BillingLookup(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::TransientExternal(_) => ErrorKind::TransientExternal,
            Self::PermanentExternal(_) => ErrorKind::PermanentExternal,
            Self::BillingLookup(_) => ErrorKind::BillingLookup,
            Self::Configuration(_) => ErrorKind::Configuration,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Validation(m)
            | Self::TransientExternal(m)
            | Self::PermanentExternal(m)
            | Self::BillingLookup(m)
            | Self::Configuration(m) => m,
        }
    }

    /// Classify an HTTP status returned by an external collaborator.
    ///
    /// 400/422 mean the payload itself was rejected; other client errors are
    /// permanent; 408, 429 and 5xx are worth retrying.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = format!("status {}: {}", status, body.trim());
        match status {
            400 | 422 => Self::Validation(message),
            408 | 429 => Self::TransientExternal(message),
            400..=499 => Self::PermanentExternal(message),
            _ => Self::TransientExternal(message),
        }
    }

    /// Classify a transport-level failure from `reqwest`
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_builder() {
            return Self::Configuration(err.to_string());
        }
        if err.is_decode() {
            return Self::PermanentExternal(format!("malformed response: {}", err));
        }
        Self::TransientExternal(err.to_string())
    }
}
