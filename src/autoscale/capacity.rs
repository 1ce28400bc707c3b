//! The authoritative capacity-setter seam.
//!
//! Both writers of a group's desired capacity — user-initiated applies and
//! the autoscaling controller — go through [`CapacityActuator`]. The
//! implementation (the reconciler) serializes changes per group, so
//! concurrent requests can never interleave conflicting desired-capacity
//! writes.

use async_trait::async_trait;

use crate::error::Result;
use crate::state::MemberRecord;

/// A request to change a group's desired capacity.
#[derive(Debug, Clone)]
pub struct CapacityRequest {
    /// Scaling group name.
    pub group: String,
    /// New desired capacity. Must lie within the group's bounds.
    pub desired: u32,
    /// Preferred members to remove when scaling in, in removal order.
    /// When empty, the actuator falls back to oldest-first.
    pub preferred_victims: Vec<String>,
}

/// The observed capacity of a group.
#[derive(Debug, Clone)]
pub struct GroupCapacity {
    /// Current desired capacity.
    pub desired: u32,
    /// Current members in launch order.
    pub members: Vec<MemberRecord>,
}

/// Result of a capacity change.
#[derive(Debug, Clone)]
pub struct CapacityChange {
    /// Scaling group name.
    pub group: String,
    /// Desired capacity before the change.
    pub previous: u32,
    /// Desired capacity after the change.
    pub desired: u32,
    /// Member IDs added.
    pub added: Vec<String>,
    /// Member IDs removed.
    pub removed: Vec<String>,
}

/// The single authoritative interface for reading and writing a scaling
/// group's capacity.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CapacityActuator: Send + Sync {
    /// Returns the group's current desired capacity and membership.
    async fn current_capacity(&self, group: &str) -> Result<GroupCapacity>;

    /// Sets the group's desired capacity, converging membership through the
    /// reconciler's apply path (member adds/removes are plan items).
    ///
    /// Implementations serialize concurrent calls for the same group.
    async fn set_desired_capacity(&self, request: CapacityRequest) -> Result<CapacityChange>;
}

impl CapacityChange {
    /// Returns true if membership actually changed.
    #[must_use]
    pub fn changed(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty() || self.previous != self.desired
    }
}
