//! Error types for the autoscaler.

use thiserror::Error;

/// Errors raised by autoscaler components.
///
/// Components log and swallow these at their own boundary; only startup
/// failures propagate to the binary.
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API call failed
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Node pool provider call failed
    #[error("Cloud provider error: {0}")]
    Cloud(#[from] ack_cloud::CloudProviderError),

    /// Configuration value is missing or invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Resource quantity could not be parsed
    #[error("Invalid quantity '{value}': {reason}")]
    Quantity { value: String, reason: String },

    /// Cluster identity could not be discovered at startup
    #[error("Discovery failed: {0}")]
    Discovery(String),

    /// Pod object cannot be tracked (e.g. it has no name)
    #[error("Invalid pod: {0}")]
    InvalidPod(String),

    /// A wait was cancelled by shutdown
    #[error("Operation cancelled")]
    Cancelled,
}

/// Result type alias for autoscaler operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
