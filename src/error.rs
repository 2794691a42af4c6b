//! Error types for the StorageCluster operator
//!
//! Provides structured error types for every stage of the convergence
//! pipeline: startup preconditions, event routing, dependent-resource
//! apply, and status write-back.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    // =========================================================================
    // Startup / Configuration Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{variable} environment variable not found")]
    MissingImage { variable: String },

    #[error("Failed to determine server version: {0}")]
    VersionProbe(String),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Failed to list {kind}: {reason}")]
    ListFailed { kind: String, reason: String },

    #[error("Lookup of {kind} timed out after {timeout:?}")]
    LookupTimeout { kind: String, timeout: Duration },

    #[error("Failed to update status of {target}: {reason}")]
    StatusUpdate { target: String, reason: String },

    // =========================================================================
    // Convergence Errors
    // =========================================================================
    #[error("Apply failed for {kind}/{name}: {reason}")]
    ApplyFailed {
        kind: String,
        name: String,
        reason: String,
    },

    #[error("Invalid StorageCluster spec: {0}")]
    InvalidSpec(String),

    #[error("Platform detection failed: {0}")]
    PlatformDetection(String),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes (or the periodic resync)
    NoRequeue,
    /// Stop the whole engine
    Fatal,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient errors - retry with backoff
            Error::Kube(_)
            | Error::ListFailed { .. }
            | Error::LookupTimeout { .. }
            | Error::StatusUpdate { .. }
            | Error::ApplyFailed { .. }
            | Error::PlatformDetection(_) => ErrorAction::RequeueWithBackoff,

            // Cache not warmed up yet
            Error::ResourceNotFound { .. } => ErrorAction::RequeueAfter(Duration::from_secs(10)),

            // Configuration/validation errors - retrying cannot fix them
            Error::Configuration(_)
            | Error::MissingImage { .. }
            | Error::VersionProbe(_)
            | Error::InvalidSpec(_) => ErrorAction::NoRequeue,

            Error::InvariantViolation(_) => ErrorAction::Fatal,

            // All other errors - retry with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.action(),
            ErrorAction::RequeueWithBackoff | ErrorAction::RequeueAfter(_)
        )
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Kube(_)
                | Error::ListFailed { .. }
                | Error::LookupTimeout { .. }
                | Error::StatusUpdate { .. }
                | Error::ApplyFailed { .. }
        )
    }
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;
