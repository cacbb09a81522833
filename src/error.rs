//! Error types for the Pool Topology Operator
//!
//! Errors are scoped: device-level errors are absorbed by the expansion
//! engine, pool-spec-level errors abort only their pool spec, and only
//! infrastructure errors reach the controller's error policy.

use std::time::Duration;
use thiserror::Error;

/// Why a node selector did not resolve to exactly one node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeResolutionFailure {
    /// No node carries all the selector labels
    NoMatch,
    /// More than one node matches; carries the match count
    Ambiguous(usize),
}

impl std::fmt::Display for NodeResolutionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeResolutionFailure::NoMatch => write!(f, "no node matches"),
            NodeResolutionFailure::Ambiguous(n) => write!(f, "{} nodes match", n),
        }
    }
}

/// Unified error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    // =========================================================================
    // Pool Spec Errors (abort one pool spec)
    // =========================================================================
    #[error("Could not resolve node for selector {{{selector}}}: {failure}")]
    NodeResolution {
        selector: String,
        failure: NodeResolutionFailure,
    },

    #[error("Expected one pool of topology {topology} on node {node}, found {found}")]
    PoolLookup {
        topology: String,
        node: String,
        found: usize,
    },

    #[error("Invalid pool spec: {0}")]
    InvalidPoolSpec(String),

    // =========================================================================
    // Device Errors (skip one device or group)
    // =========================================================================
    #[error("Block device {device} cannot be used: {reason}")]
    DeviceUnusable { device: String, reason: String },

    // =========================================================================
    // Persistence Errors
    // =========================================================================
    #[error("Could not update pool {pool}: {reason}")]
    Persist {
        pool: String,
        reason: String,
        conflict: bool,
    },

    // =========================================================================
    // Operation Errors
    // =========================================================================
    #[error("Operation not supported yet: {0}")]
    UnsupportedOperation(String),

    #[error("Pool {pool} is leased by {holder}")]
    LeaseHeld { pool: String, holder: String },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient errors - retry with backoff
            Error::Kube(_) | Error::Persist { .. } | Error::DeviceUnusable { .. } => {
                ErrorAction::RequeueWithBackoff
            }

            // Another operation owns the pool - wait for it
            Error::LeaseHeld { .. } => ErrorAction::RequeueAfter(Duration::from_secs(30)),

            // Cluster shape issues - nodes or pools may appear later
            Error::NodeResolution { .. }
            | Error::PoolLookup { .. }
            | Error::ResourceNotFound { .. } => {
                ErrorAction::RequeueAfter(Duration::from_secs(60))
            }

            // Configuration/validation errors - don't retry automatically
            Error::Configuration(_)
            | Error::InvalidPoolSpec(_)
            | Error::UnsupportedOperation(_)
            | Error::YamlParse(_) => ErrorAction::NoRequeue,

            // All other errors - retry with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Kube(_) | Error::Persist { conflict: true, .. })
    }

    /// Short machine-readable kind, used for metric labels and status
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Internal(_) => "internal",
            Error::Configuration(_) => "configuration",
            Error::Kube(_) => "kube",
            Error::ResourceNotFound { .. } => "not_found",
            Error::NodeResolution { .. } => "node_resolution",
            Error::PoolLookup { .. } => "pool_lookup",
            Error::InvalidPoolSpec(_) => "invalid_pool_spec",
            Error::DeviceUnusable { .. } => "device_unusable",
            Error::Persist { .. } => "persist",
            Error::UnsupportedOperation(_) => "unsupported",
            Error::LeaseHeld { .. } => "lease_held",
            Error::JsonParse(_) => "json",
            Error::YamlParse(_) => "yaml",
            Error::Io(_) => "io",
        }
    }

    /// Build a device error from any displayable cause
    pub fn device_unusable(device: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::DeviceUnusable {
            device: device.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;
