//! Error types for the Stratoform reconciliation engine.
//!
//! This module provides a comprehensive error hierarchy for all operations
//! in the provisioning lifecycle: configuration, state management, cloud
//! provider calls, planning, reconciliation, and autoscaling.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the Stratoform engine.
#[derive(Debug, Error)]
pub enum StratoformError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Cloud provider errors.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Reconciliation errors.
    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// Autoscaling errors.
    #[error("Autoscaling error: {0}")]
    Scale(#[from] ScaleError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
///
/// These are fatal: no partial apply is ever attempted against a
/// configuration that fails to load or validate.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },

    /// Duplicate resource definition.
    #[error("Duplicate {kind} name: {name}")]
    DuplicateName {
        /// Kind of resource (security_group, scaling_group, etc.).
        kind: String,
        /// The duplicated name.
        name: String,
    },

    /// An attribute references a resource that is not declared.
    #[error("Unresolved reference in '{resource}': no resource named '{target}'")]
    UnresolvedReference {
        /// Resource containing the reference.
        resource: String,
        /// The referenced name that does not exist.
        target: String,
    },

    /// Circular dependency detected between resources.
    #[error("Circular dependency detected: {cycle}")]
    CircularDependency {
        /// The cycle members, in reference order.
        cycle: String,
    },

    /// Capacity bounds are inconsistent.
    #[error("Invalid capacity bounds for '{group}': min {min} <= desired {desired} <= max {max} must hold")]
    InvalidCapacityBounds {
        /// Scaling group name.
        group: String,
        /// Minimum size.
        min: u32,
        /// Desired capacity.
        desired: u32,
        /// Maximum size.
        max: u32,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State file not found.
    #[error("State file not found: {path}")]
    NotFound {
        /// Path to the missing state file.
        path: PathBuf,
    },

    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Backend IO error.
    #[error("State backend error: {message}")]
    Backend {
        /// Description of the backend error.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },
}

/// Cloud provider errors.
///
/// Transient variants are retried by the executor with exponential backoff;
/// permanent variants surface immediately and halt only the dependent
/// subtree of the failed resource.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Rate limited by the provider.
    #[error("Provider rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// The provider is temporarily unavailable or still propagating a
    /// previous change (eventual consistency).
    #[error("Provider temporarily unavailable: {message}")]
    Unavailable {
        /// Description of the transient condition.
        message: String,
    },

    /// The request was rejected as invalid.
    #[error("Provider rejected request for '{resource}': {message}")]
    InvalidRequest {
        /// Resource the request was for.
        resource: String,
        /// Rejection reason.
        message: String,
    },

    /// The caller lacks permission for the operation.
    #[error("Provider permission denied: {message}")]
    PermissionDenied {
        /// Description of the denied operation.
        message: String,
    },

    /// Resource not found at the provider.
    #[error("Resource not found: {resource_id}")]
    NotFound {
        /// Provider-assigned ID of the missing resource.
        resource_id: String,
    },

    /// Timeout waiting for a resource to reach a ready state.
    #[error("Timeout waiting for resource {resource} to reach state {expected_state}")]
    Timeout {
        /// Name of the resource.
        resource: String,
        /// Expected state that was not reached.
        expected_state: String,
    },

    /// Invalid response from the provider.
    #[error("Invalid response from provider: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// A plan item depends on an item that does not exist.
    #[error("Plan item for '{resource}' depends on unknown item index {index}")]
    UnresolvedDependency {
        /// Resource with the broken dependency.
        resource: String,
        /// The unknown item index.
        index: usize,
    },

    /// Conflicting operations in plan.
    #[error("Conflicting operations in plan: {message}")]
    ConflictingOperations {
        /// Description of the conflict.
        message: String,
    },
}

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Reconciliation failed for a specific resource.
    #[error("Failed to reconcile {kind} '{name}': {reason}")]
    ResourceFailed {
        /// Kind of resource.
        kind: String,
        /// Name of the resource.
        name: String,
        /// Reason for failure.
        reason: String,
    },

    /// Maximum retry attempts exceeded.
    #[error("Maximum retry attempts ({attempts}) exceeded for {resource}")]
    MaxRetriesExceeded {
        /// Number of attempts made.
        attempts: u32,
        /// Resource that failed.
        resource: String,
    },

    /// Reconciliation was aborted.
    #[error("Reconciliation aborted: {reason}")]
    Aborted {
        /// Reason for abort.
        reason: String,
    },
}

/// Autoscaling errors.
#[derive(Debug, Error)]
pub enum ScaleError {
    /// The metric could not be read this interval.
    ///
    /// Non-fatal: the controller holds desired capacity and retries on the
    /// next evaluation.
    #[error("Metric unavailable for group '{group}': {reason}")]
    MetricUnavailable {
        /// Scaling group name.
        group: String,
        /// Why the metric could not be read.
        reason: String,
    },

    /// A concurrent capacity change is in flight for the same group.
    #[error("Capacity change already in progress for group '{group}'")]
    CapacityConflict {
        /// Scaling group name.
        group: String,
    },

    /// The requested capacity violates the group bounds.
    #[error("Requested capacity {requested} outside bounds [{min}, {max}] for group '{group}'")]
    CapacityOutOfBounds {
        /// Scaling group name.
        group: String,
        /// Requested capacity.
        requested: u32,
        /// Minimum size.
        min: u32,
        /// Maximum size.
        max: u32,
    },
}

/// Result type alias for Stratoform operations.
pub type Result<T> = std::result::Result<T, StratoformError>;

impl StratoformError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is retryable.
    ///
    /// Retryable errors are transient provider conditions (rate limits,
    /// eventual-consistency propagation, readiness timeouts) and lock
    /// acquisition failures.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Provider(
                ProviderError::RateLimited { .. }
                    | ProviderError::Unavailable { .. }
                    | ProviderError::Timeout { .. }
            ) | Self::State(StateError::LockFailed { .. })
        )
    }

    /// Returns the suggested retry delay in seconds, if applicable.
    #[must_use]
    pub const fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::Provider(ProviderError::RateLimited { retry_after_secs }) => {
                Some(*retry_after_secs)
            }
            Self::Provider(ProviderError::Unavailable { .. } | ProviderError::Timeout { .. }) => {
                Some(5)
            }
            Self::State(StateError::LockFailed { .. }) => Some(2),
            _ => None,
        }
    }

    /// Returns true if this error is a fatal configuration error.
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }
}

impl StateError {
    /// Creates a backend error with the given message.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl ProviderError {
    /// Creates a transient unavailability error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates an invalid-request error.
    #[must_use]
    pub fn invalid_request(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            resource: resource.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_provider_errors_are_retryable() {
        let rate_limited =
            StratoformError::Provider(ProviderError::RateLimited { retry_after_secs: 30 });
        assert!(rate_limited.is_retryable());
        assert_eq!(rate_limited.retry_delay_secs(), Some(30));

        let unavailable = StratoformError::Provider(ProviderError::unavailable("propagating"));
        assert!(unavailable.is_retryable());

        let timeout = StratoformError::Provider(ProviderError::Timeout {
            resource: String::from("web-asg"),
            expected_state: String::from("ready"),
        });
        assert!(timeout.is_retryable());
    }

    #[test]
    fn permanent_errors_are_not_retryable() {
        let denied = StratoformError::Provider(ProviderError::PermissionDenied {
            message: String::from("missing role"),
        });
        assert!(!denied.is_retryable());

        let cycle = StratoformError::Config(ConfigError::CircularDependency {
            cycle: String::from("a -> b -> a"),
        });
        assert!(!cycle.is_retryable());
        assert!(cycle.is_config_error());
    }
}
