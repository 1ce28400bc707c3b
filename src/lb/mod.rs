//! Load-balancing layer integration.
//!
//! The engine never manages traffic itself; it consumes per-member health
//! from the load-balancing layer through the [`HealthSource`] trait. Health
//! signals are transient: produced each evaluation, consumed by the
//! autoscaling controller's filtering, never persisted.

mod probe;

pub use probe::{HttpHealthSource, HttpProber, ProbeSet};

use async_trait::async_trait;

use crate::error::Result;

/// Where a health signal originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalSource {
    /// Reported by the load balancer's own target health.
    LoadBalancer,
    /// Observed by probing the instance directly.
    InstanceProbe,
}

/// A transient per-member health observation.
#[derive(Debug, Clone)]
pub struct HealthSignal {
    /// Logical member identifier.
    pub member_id: String,
    /// Whether the member is passing health checks.
    pub healthy: bool,
    /// Where the signal came from.
    pub source: SignalSource,
}

/// Read-only source of per-member health for a scaling group.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HealthSource: Send + Sync {
    /// Returns the current health signal for every known member of the
    /// group. Members without a signal are treated as unhealthy by callers.
    async fn member_health(&self, group: &str) -> Result<Vec<HealthSignal>>;
}

impl std::fmt::Display for SignalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::LoadBalancer => "load-balancer",
            Self::InstanceProbe => "instance-probe",
        };
        write!(f, "{s}")
    }
}
