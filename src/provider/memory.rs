//! In-memory provider implementation.
//!
//! Backs tests and dry runs. Resources live in a shared map keyed by
//! provider ID; readiness is immediate unless a readiness delay is
//! configured, and failures can be injected per resource name to exercise
//! the executor's retry and subtree-isolation paths.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::{ProviderError, Result, StratoformError};

use super::types::{CreateResourceRequest, ProviderResource, ResourceStatus, UpdateResourceRequest};
use super::CloudProvider;

/// Kinds of injectable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Transient: rate limit / propagation delay. Retryable.
    Transient,
    /// Permanent: the request is rejected outright.
    Permanent,
    /// The resource never becomes ready within the wait window.
    NeverReady,
}

/// A planned failure for a named resource.
#[derive(Debug, Clone)]
struct FailurePlan {
    kind: FailureKind,
    /// How many more operations fail before the resource behaves normally.
    /// `u32::MAX` means always.
    remaining: u32,
}

/// In-memory [`CloudProvider`] implementation.
#[derive(Debug, Clone, Default)]
pub struct MemoryProvider {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    resources: HashMap<String, ProviderResource>,
    failures: HashMap<String, FailurePlan>,
    operations: Vec<String>,
}

impl MemoryProvider {
    /// Creates an empty in-memory provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Injects `count` failures of the given kind for operations on the
    /// named resource. Pass `u32::MAX` to fail forever.
    pub async fn fail_resource(&self, name: &str, kind: FailureKind, count: u32) {
        let mut inner = self.inner.lock().await;
        inner.failures.insert(
            name.to_string(),
            FailurePlan {
                kind,
                remaining: count,
            },
        );
    }

    /// Returns the resource with the given logical name, if present.
    pub async fn find_by_name(&self, name: &str) -> Option<ProviderResource> {
        let inner = self.inner.lock().await;
        inner.resources.values().find(|r| r.name == name).cloned()
    }

    /// Returns the number of live resources.
    pub async fn resource_count(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.resources.len()
    }

    /// Returns the ordered log of operations performed, as
    /// `"<verb> <name-or-id>"` entries.
    pub async fn operations(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner.operations.clone()
    }

    /// Marks a resource's status directly. Test hook for degraded-health
    /// scenarios.
    pub async fn set_status(&self, provider_id: &str, status: ResourceStatus) {
        let mut inner = self.inner.lock().await;
        if let Some(resource) = inner.resources.get_mut(provider_id) {
            resource.status = status;
        }
    }

    /// Consumes one planned failure for the named resource, if any.
    fn take_failure(inner: &mut Inner, name: &str) -> Option<FailureKind> {
        let plan = inner.failures.get_mut(name)?;
        if plan.remaining == 0 {
            return None;
        }
        if plan.remaining != u32::MAX {
            plan.remaining -= 1;
        }
        Some(plan.kind)
    }

    /// Maps an injected failure to the error the real provider would return.
    fn failure_error(kind: FailureKind, name: &str) -> StratoformError {
        match kind {
            FailureKind::Transient => {
                StratoformError::Provider(ProviderError::unavailable(format!(
                    "simulated propagation delay for '{name}'"
                )))
            }
            FailureKind::Permanent => StratoformError::Provider(ProviderError::invalid_request(
                name,
                "simulated permanent rejection",
            )),
            FailureKind::NeverReady => StratoformError::Provider(ProviderError::Timeout {
                resource: name.to_string(),
                expected_state: String::from("ready"),
            }),
        }
    }
}

#[async_trait]
impl CloudProvider for MemoryProvider {
    async fn create(&self, request: &CreateResourceRequest) -> Result<ProviderResource> {
        let mut inner = self.inner.lock().await;

        if let Some(kind) = Self::take_failure(&mut inner, &request.name) {
            debug!("Injecting {kind:?} failure for create of '{}'", request.name);
            return Err(Self::failure_error(kind, &request.name));
        }

        let provider_id = format!("sim-{}-{}", request.kind, &Uuid::new_v4().to_string()[..8]);
        inner.operations.push(format!("create {}", request.name));
        let resource = ProviderResource {
            provider_id: provider_id.clone(),
            name: request.name.clone(),
            kind: request.kind,
            attributes: request.attributes.clone(),
            status: ResourceStatus::Ready,
            created_at: Utc::now(),
        };

        inner.resources.insert(provider_id, resource.clone());
        Ok(resource)
    }

    async fn get(&self, provider_id: &str) -> Result<ProviderResource> {
        let inner = self.inner.lock().await;
        inner.resources.get(provider_id).cloned().ok_or_else(|| {
            StratoformError::Provider(ProviderError::NotFound {
                resource_id: provider_id.to_string(),
            })
        })
    }

    async fn update(&self, request: &UpdateResourceRequest) -> Result<ProviderResource> {
        let mut inner = self.inner.lock().await;

        let name = inner
            .resources
            .get(&request.provider_id)
            .map(|r| r.name.clone())
            .ok_or_else(|| {
                StratoformError::Provider(ProviderError::NotFound {
                    resource_id: request.provider_id.clone(),
                })
            })?;

        if let Some(kind) = Self::take_failure(&mut inner, &name) {
            debug!("Injecting {kind:?} failure for update of '{name}'");
            return Err(Self::failure_error(kind, &name));
        }

        inner.operations.push(format!("update {name}"));
        let resource = inner
            .resources
            .get_mut(&request.provider_id)
            .ok_or_else(|| {
                StratoformError::Provider(ProviderError::NotFound {
                    resource_id: request.provider_id.clone(),
                })
            })?;
        resource.attributes = request.attributes.clone();
        Ok(resource.clone())
    }

    async fn delete(&self, provider_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        // At-least-once: deleting a missing resource is a success.
        let removed = inner.resources.remove(provider_id);
        let label = removed.map_or_else(|| provider_id.to_string(), |r| r.name);
        inner.operations.push(format!("delete {label}"));
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ProviderResource>> {
        let inner = self.inner.lock().await;
        let mut resources: Vec<ProviderResource> = inner.resources.values().cloned().collect();
        resources.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(resources)
    }

    async fn wait_ready(&self, provider_id: &str, _timeout: Duration) -> Result<ProviderResource> {
        let mut inner = self.inner.lock().await;

        let name = inner
            .resources
            .get(provider_id)
            .map(|r| r.name.clone())
            .ok_or_else(|| {
                StratoformError::Provider(ProviderError::NotFound {
                    resource_id: provider_id.to_string(),
                })
            })?;

        if let Some(kind) = Self::take_failure(&mut inner, &name) {
            return Err(Self::failure_error(kind, &name));
        }

        let resource = inner.resources.get_mut(provider_id).ok_or_else(|| {
            StratoformError::Provider(ProviderError::NotFound {
                resource_id: provider_id.to_string(),
            })
        })?;
        resource.status = ResourceStatus::Ready;
        Ok(resource.clone())
    }

    fn provider_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceKind;
    use std::collections::BTreeMap;

    fn request(name: &str) -> CreateResourceRequest {
        CreateResourceRequest {
            name: name.to_string(),
            kind: ResourceKind::SecurityGroup,
            attributes: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn create_get_delete_roundtrip() {
        let provider = MemoryProvider::new();

        let created = provider.create(&request("web-sg")).await.unwrap();
        assert!(created.is_ready());

        let fetched = provider.get(&created.provider_id).await.unwrap();
        assert_eq!(fetched.name, "web-sg");

        provider.delete(&created.provider_id).await.unwrap();
        assert!(provider.get(&created.provider_id).await.is_err());

        // Deleting again is not an error.
        provider.delete(&created.provider_id).await.unwrap();
    }

    #[tokio::test]
    async fn injected_transient_failure_clears_after_count() {
        let provider = MemoryProvider::new();
        provider
            .fail_resource("web-sg", FailureKind::Transient, 2)
            .await;

        assert!(provider.create(&request("web-sg")).await.is_err());
        assert!(provider.create(&request("web-sg")).await.is_err());
        assert!(provider.create(&request("web-sg")).await.is_ok());
    }

    #[tokio::test]
    async fn injected_permanent_failure_is_not_retryable() {
        let provider = MemoryProvider::new();
        provider
            .fail_resource("web-sg", FailureKind::Permanent, 1)
            .await;

        let err = provider.create(&request("web-sg")).await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
