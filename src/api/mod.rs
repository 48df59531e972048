//! JSON payloads exchanged between the inference service and its clients.
//!
//! Result types are untagged unions: a payload is either the success shape or
//! `{"error": "..."}`, never both, so callers branch on one thing.

use serde::{Deserialize, Serialize};

/// `max_length` used when a request omits it.
pub const DEFAULT_MAX_LENGTH: usize = 100;

/// Port the service binds and the client targets by default.
pub const DEFAULT_PORT: u16 = 8000;

/// Message the client reports for health and info calls that fail for any reason.
pub const CONNECTION_FAILED: &str = "Connection failed";

fn default_max_length() -> usize {
    DEFAULT_MAX_LENGTH
}

/// Body of `POST /generate`.
///
/// A missing `prompt` is an empty prompt, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    #[serde(default)]
    pub prompt: String,
    #[serde(default = "default_max_length")]
    pub max_length: usize,
}

impl Default for GenerationRequest {
    fn default() -> Self {
        Self::new("", DEFAULT_MAX_LENGTH)
    }
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, max_length: usize) -> Self {
        Self {
            prompt: prompt.into(),
            max_length,
        }
    }

    /// `max_length` forced into `1..=limit`.
    pub fn bounded_max_length(&self, limit: usize) -> usize {
        self.max_length.clamp(1, limit.max(1))
    }
}

/// Outcome of a generation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GenerationResult {
    Generated { generated_text: String },
    Failed { error: String },
}

impl GenerationResult {
    pub fn failed(error: impl ToString) -> Self {
        Self::Failed {
            error: error.to_string(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// The generated text, if generation succeeded.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Generated { generated_text } => Some(generated_text),
            Self::Failed { .. } => None,
        }
    }

    /// The error message, if generation failed.
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Generated { .. } => None,
            Self::Failed { error } => Some(error),
        }
    }
}

/// What `GET /info` reports. Built fresh for every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfoSnapshot {
    pub status: String,
    pub host: String,
    /// Accelerator name such as `cuda:0`, or `none`.
    pub gpu: String,
    pub gpu_available: bool,
    pub model: String,
}

/// Outcome of an info call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InfoResult {
    Info(ServiceInfoSnapshot),
    Failed { error: String },
}

impl InfoResult {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn info(&self) -> Option<&ServiceInfoSnapshot> {
        match self {
            Self::Info(info) => Some(info),
            Self::Failed { .. } => None,
        }
    }
}

/// Body of `GET /health`, or the client's stand-in when the service is unreachable.
///
/// Reflects process liveness only, never model readiness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthStatus {
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_owned(),
            error: None,
        }
    }

    pub fn unhealthy(error: impl Into<String>) -> Self {
        Self {
            status: "unhealthy".to_owned(),
            error: Some(error.into()),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == "healthy" && self.error.is_none()
    }
}
