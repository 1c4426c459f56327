use std::path::PathBuf;

use thiserror::Error;

/// Library-level error type for every causeway subsystem.
///
/// Recoverability is part of the contract, not just documentation: the run loop
/// matches on [`OrchestratorError::AcquireTransient`] to decide whether to retry an
/// action later versus failing it outright.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("config error: {0}")]
    Config(String),

    #[error("cycle detected in action graph; unresolved nodes: {nodes:?}")]
    Cycle { nodes: Vec<String> },

    #[error("host {host} is missing environment {environment:?} required by action {action}")]
    EnvironmentMissing {
        host: String,
        environment: String,
        action: String,
    },

    #[error("resource overcommit: action {action} requested {requested} of {resource}, host total is {total}")]
    ResourceOvercommit {
        action: String,
        resource: String,
        requested: String,
        total: String,
    },

    #[error("resource {resource} temporarily unavailable for action {action}: requested {requested}, {available} free")]
    AcquireTransient {
        action: String,
        resource: String,
        requested: String,
        available: String,
    },

    #[error("action {action} cannot run: {reason}")]
    RequirementUnmet { action: String, reason: String },

    #[error("failed to launch action {action}: {source}")]
    LaunchError {
        action: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse resource amount {input:?}")]
    ResourceParse { input: String },

    #[error("unknown resource {0:?}")]
    UnknownResource(String),

    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no factory registered for type {0:?}")]
    UnknownType(String),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

impl OrchestratorError {
    /// True when the run loop should leave the action pending and retry it later
    /// rather than marking it as failed.
    pub fn is_transient(&self) -> bool {
        matches!(self, OrchestratorError::AcquireTransient { .. })
    }
}
