//! Cloud provider integration module.
//!
//! The engine treats the provider as an at-least-once, eventually-consistent
//! backend behind the [`CloudProvider`] trait: create may succeed after a
//! reported transient failure, reads may lag writes, and readiness arrives
//! some time after creation. All retry and timeout policy lives in the
//! planner's executor, not here.

mod types;
mod memory;

pub use types::{CreateResourceRequest, ProviderResource, ResourceStatus, UpdateResourceRequest};
pub use memory::{FailureKind, MemoryProvider};

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Interface to a cloud resource provider.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Creates a resource and returns it with its provider-assigned ID.
    ///
    /// The resource may still be converging when this returns; use
    /// [`CloudProvider::wait_ready`] before treating it as serving.
    async fn create(&self, request: &CreateResourceRequest) -> Result<ProviderResource>;

    /// Reads a resource by provider-assigned ID.
    async fn get(&self, provider_id: &str) -> Result<ProviderResource>;

    /// Updates a resource's mutable attributes in place.
    async fn update(&self, request: &UpdateResourceRequest) -> Result<ProviderResource>;

    /// Deletes a resource. Deleting an already-deleted resource succeeds.
    async fn delete(&self, provider_id: &str) -> Result<()>;

    /// Lists all resources owned by this deployment.
    async fn list(&self) -> Result<Vec<ProviderResource>>;

    /// Waits until the resource reports ready, up to `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Timeout` if the resource does not become
    /// ready in time; the executor treats that as retryable.
    async fn wait_ready(&self, provider_id: &str, timeout: Duration) -> Result<ProviderResource>;

    /// Gets the provider type name.
    fn provider_type(&self) -> &'static str;
}
