//! Portable value types shared across the engine and every backend.

use serde::{Deserialize, Serialize};

/// One frame: its start instant and its accumulated value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub dt: chrono::DateTime<chrono::Utc>,
    pub value: i64,
}

/// A snapshot of a storage backend's ring and cached sum. Returned by
/// `Storage::state` in one lock acquisition so `data` and `sum` are read
/// as of the same instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateState {
    pub data: Vec<i64>,
    pub sum: i64,
}

/// Gate and frame ceilings, bundled for callers that want both (the
/// original's `CallGateLimits` named tuple).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateLimits {
    pub gate_limit: i64,
    pub frame_limit: i64,
}

/// Tag identifying which `Storage` implementation backs a gate. Replaces the
/// source's runtime-type dispatch with a plain enum used purely for
/// serialization and error messages — dispatch itself happens through the
/// `Storage` trait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    Simple,
    Shared,
    Redis,
}

impl StorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Shared => "shared",
            Self::Redis => "redis",
        }
    }
}

/// The portable dictionary shape used by `as_dict`, file persistence, and
/// debug formatting. Backend-specific keys are carried in `extra` and
/// re-emitted verbatim on serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateDict {
    pub name: String,
    pub gate_size: f64,
    pub frame_step: f64,
    pub gate_limit: i64,
    pub frame_limit: i64,
    pub timezone: Option<String>,
    pub storage: StorageKind,
    #[serde(rename = "_data")]
    pub data: Vec<i64>,
    #[serde(rename = "_current_dt")]
    pub current_dt: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}
