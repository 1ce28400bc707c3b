//! Provider-side resource types.
//!
//! These types describe resources as the cloud provider reports them,
//! as opposed to the desired-state types in [`crate::config`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::ResourceKind;

/// A resource as known to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResource {
    /// Provider-assigned identifier.
    pub provider_id: String,
    /// Logical name the resource was created under.
    pub name: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Attributes as applied, with references already resolved.
    pub attributes: BTreeMap<String, String>,
    /// Current lifecycle status.
    pub status: ResourceStatus,
    /// When the resource was created.
    pub created_at: DateTime<Utc>,
}

/// Lifecycle status of a provider resource.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    /// Resource is being created or converging.
    Pending,
    /// Resource is ready and serving.
    Ready,
    /// Resource exists but is unhealthy.
    Degraded,
    /// Resource is being deleted.
    Deleting,
    /// Status could not be determined.
    Unknown,
}

/// Request to create a resource.
#[derive(Debug, Clone)]
pub struct CreateResourceRequest {
    /// Logical name.
    pub name: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Resolved attributes.
    pub attributes: BTreeMap<String, String>,
}

/// Request to update a resource in place.
#[derive(Debug, Clone)]
pub struct UpdateResourceRequest {
    /// Provider-assigned identifier of the resource to update.
    pub provider_id: String,
    /// Full set of resolved attributes after the update.
    pub attributes: BTreeMap<String, String>,
}

impl ProviderResource {
    /// Returns true if the resource is ready to serve.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self.status, ResourceStatus::Ready)
    }
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Degraded => "degraded",
            Self::Deleting => "deleting",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}
