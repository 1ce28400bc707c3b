//! State types for tracking applied resources.
//!
//! These types represent the recorded state of the last successful apply,
//! used for diffing, destroy ordering, and idempotent operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::config::ResourceKind;

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// The complete recorded state of a deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierState {
    /// State format version.
    pub version: String,
    /// Project name.
    pub project: String,
    /// Environment name.
    pub environment: String,
    /// Hash of the last applied configuration.
    pub config_hash: String,
    /// Per-resource records, keyed by resource name.
    pub resources: HashMap<String, ResourceRecord>,
    /// Runtime records for scaling groups, keyed by group name.
    ///
    /// Kept separately from `resources` because capacity and membership are
    /// owned by the capacity actuator, not by the configuration diff.
    #[serde(default)]
    pub groups: HashMap<String, GroupRecord>,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
    /// Apply history (recent entries).
    #[serde(default)]
    pub history: Vec<ApplyHistoryEntry>,
}

/// Record of a single applied resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Resource name (from config).
    pub name: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Provider-assigned identifier.
    pub provider_id: String,
    /// Attributes as last applied, references resolved.
    pub attributes: BTreeMap<String, String>,
    /// Hash of the desired attributes at apply time.
    pub attributes_hash: String,
    /// When the resource was first created.
    pub created_at: DateTime<Utc>,
    /// When the record was last updated.
    pub updated_at: DateTime<Utc>,
}

/// Runtime record for a scaling group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupRecord {
    /// Group name.
    pub name: String,
    /// Current desired capacity.
    pub desired_capacity: u32,
    /// Current members, in launch order.
    pub members: Vec<MemberRecord>,
    /// When the record was last updated.
    pub updated_at: DateTime<Utc>,
}

/// A single scaling-group member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberRecord {
    /// Logical member identifier.
    pub member_id: String,
    /// Provider-assigned identifier of the backing instance.
    pub provider_id: String,
    /// When the member was launched. Drives grace-period exclusion.
    pub launched_at: DateTime<Utc>,
}

/// A single entry in the apply history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyHistoryEntry {
    /// When the operation occurred.
    pub timestamp: DateTime<Utc>,
    /// Type of operation.
    pub operation: ApplyOperation,
    /// Configuration hash at time of the operation.
    pub config_hash: String,
    /// Resources affected.
    pub resources: Vec<String>,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Optional error message.
    #[serde(default)]
    pub error: Option<String>,
}

/// Types of recorded operations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOperation {
    /// Plan application.
    Apply,
    /// Capacity change issued by the autoscaling controller.
    Scale,
    /// Reconciliation run.
    Reconcile,
    /// Destruction.
    Destroy,
}

impl TierState {
    /// Creates a new empty state.
    #[must_use]
    pub fn new(project: &str, environment: &str) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            project: project.to_string(),
            environment: environment.to_string(),
            config_hash: String::new(),
            resources: HashMap::new(),
            groups: HashMap::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Gets a resource record by name.
    #[must_use]
    pub fn get_resource(&self, name: &str) -> Option<&ResourceRecord> {
        self.resources.get(name)
    }

    /// Adds or updates a resource record.
    pub fn set_resource(&mut self, record: ResourceRecord) {
        self.resources.insert(record.name.clone(), record);
        self.last_updated = Utc::now();
    }

    /// Removes a resource record by name.
    pub fn remove_resource(&mut self, name: &str) -> Option<ResourceRecord> {
        let result = self.resources.remove(name);
        if result.is_some() {
            self.last_updated = Utc::now();
        }
        result
    }

    /// Gets a group record by name.
    #[must_use]
    pub fn get_group(&self, name: &str) -> Option<&GroupRecord> {
        self.groups.get(name)
    }

    /// Adds or updates a group record.
    pub fn set_group(&mut self, group: GroupRecord) {
        self.groups.insert(group.name.clone(), group);
        self.last_updated = Utc::now();
    }

    /// Removes a group record by name.
    pub fn remove_group(&mut self, name: &str) -> Option<GroupRecord> {
        let result = self.groups.remove(name);
        if result.is_some() {
            self.last_updated = Utc::now();
        }
        result
    }

    /// Adds a history entry.
    pub fn add_history(&mut self, entry: ApplyHistoryEntry) {
        // Keep only the last 100 entries
        const MAX_HISTORY: usize = 100;
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
    }

    /// Returns all recorded resource names.
    #[must_use]
    pub fn resource_names(&self) -> Vec<&str> {
        self.resources.keys().map(String::as_str).collect()
    }
}

impl ResourceRecord {
    /// Creates a new resource record.
    #[must_use]
    pub fn new(
        name: &str,
        kind: ResourceKind,
        provider_id: &str,
        attributes: BTreeMap<String, String>,
        attributes_hash: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.to_string(),
            kind,
            provider_id: provider_id.to_string(),
            attributes,
            attributes_hash: attributes_hash.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Updates the applied attributes and hash.
    pub fn record_apply(&mut self, attributes: BTreeMap<String, String>, attributes_hash: &str) {
        self.attributes = attributes;
        self.attributes_hash = attributes_hash.to_string();
        self.updated_at = Utc::now();
    }
}

impl GroupRecord {
    /// Creates a new group record with no members.
    #[must_use]
    pub fn new(name: &str, desired_capacity: u32) -> Self {
        Self {
            name: name.to_string(),
            desired_capacity,
            members: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Current member count.
    #[must_use]
    pub const fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Appends a member in launch order.
    pub fn add_member(&mut self, member: MemberRecord) {
        self.members.push(member);
        self.updated_at = Utc::now();
    }

    /// Removes a member by logical ID.
    pub fn remove_member(&mut self, member_id: &str) -> Option<MemberRecord> {
        let pos = self.members.iter().position(|m| m.member_id == member_id)?;
        self.updated_at = Utc::now();
        Some(self.members.remove(pos))
    }
}

impl ApplyHistoryEntry {
    /// Creates a new history entry.
    #[must_use]
    pub fn new(operation: ApplyOperation, config_hash: &str, resources: Vec<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            config_hash: config_hash.to_string(),
            resources,
            success: true,
            error: None,
        }
    }

    /// Creates a failed history entry.
    #[must_use]
    pub fn failed(
        operation: ApplyOperation,
        config_hash: &str,
        resources: Vec<String>,
        error: &str,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            config_hash: config_hash.to_string(),
            resources,
            success: false,
            error: Some(error.to_string()),
        }
    }
}

impl std::fmt::Display for ApplyOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Apply => "apply",
            Self::Scale => "scale",
            Self::Reconcile => "reconcile",
            Self::Destroy => "destroy",
        };
        write!(f, "{op}")
    }
}
