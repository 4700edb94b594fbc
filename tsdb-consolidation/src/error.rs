//! Error types shared by the consolidation pipeline.

use thiserror::Error;

use crate::graph::SummaryKind;

/// Errors raised by a [`crate::store::GraphStore`] backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("Serialization error: {0}")]
    Serde(String),
    #[error("Node not found: {0}")]
    NotFound(String),
    #[error("Store lock poisoned")]
    LockPoisoned,
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serde(e.to_string())
    }
}

/// Errors raised while consolidating, linking, cleaning or compressing.
#[derive(Debug, Error)]
pub enum ConsolidationError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Failed to write {kind} summary {summary_id}: {reason}")]
    WriteFailed {
        kind: SummaryKind,
        summary_id: String,
        reason: String,
    },
    #[error("Invalid attributes on node {node_id}: {reason}")]
    InvalidAttributes { node_id: String, reason: String },
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<serde_json::Error> for ConsolidationError {
    fn from(e: serde_json::Error) -> Self {
        ConsolidationError::Store(StoreError::Serde(e.to_string()))
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e.to_string())
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
pub type ConsolidationResult<T> = Result<T, ConsolidationError>;
