//! Diff engine for comparing desired vs. recorded state.
//!
//! This module computes the difference between the desired configuration
//! and the state recorded by the last apply, at attribute granularity.
//! Whether a changed attribute yields an in-place update or a replacement
//! is decided by the per-kind immutability tables here.

use std::collections::HashMap;
use tracing::debug;

use crate::config::{ConfigHasher, Resource, ResourceKind};
use crate::provider::ProviderResource;
use crate::state::TierState;

/// Engine for computing diffs between desired and recorded states.
#[derive(Debug, Default)]
pub struct DiffEngine {
    /// Configuration hasher.
    hasher: ConfigHasher,
}

/// Difference for a single resource.
#[derive(Debug, Clone)]
pub struct ResourceDiff {
    /// Resource name.
    pub name: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Type of difference.
    pub diff_type: DiffType,
    /// Details about the difference, in attribute key order.
    pub details: Vec<DiffDetail>,
    /// Previous hash (if applicable).
    pub old_hash: Option<String>,
    /// New hash (if applicable).
    pub new_hash: Option<String>,
}

/// Type of difference detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffType {
    /// Resource needs to be created.
    Create,
    /// A mutable attribute changed; resource is updated in place.
    Update,
    /// An immutable attribute changed; resource is replaced
    /// (create-new, rewire dependents, destroy-old).
    Replace,
    /// Resource needs to be destroyed.
    Destroy,
    /// Resource is unchanged.
    NoChange,
    /// Resource has drifted provider-side (missing or diverged); recreated.
    Drift,
}

/// Detail about a specific attribute difference.
#[derive(Debug, Clone)]
pub struct DiffDetail {
    /// Attribute key that differs.
    pub field: String,
    /// Old value.
    pub old_value: Option<String>,
    /// New value.
    pub new_value: Option<String>,
}

/// Complete diff result.
#[derive(Debug)]
pub struct DiffResult {
    /// All resource diffs.
    pub diffs: Vec<ResourceDiff>,
    /// Number of resources to create.
    pub creates: usize,
    /// Number of resources to update in place.
    pub updates: usize,
    /// Number of resources to replace.
    pub replaces: usize,
    /// Number of resources to destroy.
    pub destroys: usize,
    /// Number of unchanged resources.
    pub unchanged: usize,
}

/// Attribute key prefixes that cannot be changed in place, per kind.
///
/// A changed attribute whose key starts with one of these forces
/// destroy-and-recreate. Scaling groups have none: template, subnets and
/// bounds are all provider-mutable.
const fn immutable_prefixes(kind: ResourceKind) -> &'static [&'static str] {
    match kind {
        ResourceKind::Image => &["family", "architecture", "most_recent"],
        ResourceKind::SecurityGroup => &["network", "ingress"],
        ResourceKind::LaunchTemplate => &["image"],
        ResourceKind::LoadBalancer => &["internal"],
        ResourceKind::TargetGroup => &["port", "protocol", "network", "load_balancer"],
        ResourceKind::ScalingGroup => &[],
        ResourceKind::Instance => &["launch_template", "image"],
    }
}

/// Returns true if the attribute key is immutable for the kind.
fn is_immutable(kind: ResourceKind, key: &str) -> bool {
    immutable_prefixes(kind)
        .iter()
        .any(|prefix| key == *prefix || key.starts_with(&format!("{prefix}.")))
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hasher: ConfigHasher::new(),
        }
    }

    /// Computes the diff between desired resources and recorded state.
    ///
    /// `observed` is the provider's current view; when given, resources that
    /// are recorded but missing provider-side are marked [`DiffType::Drift`]
    /// and recreated.
    pub fn compute_diff(
        &self,
        desired: &[Resource],
        state: Option<&TierState>,
        observed: Option<&[ProviderResource]>,
    ) -> DiffResult {
        let mut diffs = Vec::new();

        let observed_ids: Option<HashMap<&str, &ProviderResource>> = observed.map(|list| {
            list.iter()
                .map(|r| (r.provider_id.as_str(), r))
                .collect()
        });

        // Check each desired resource against its record.
        for resource in desired {
            let new_hash = self.hasher.hash_resource(resource);
            let record = state.and_then(|s| s.get_resource(&resource.name));

            let diff = match record {
                None => {
                    debug!("Resource {} needs to be created", resource.name);
                    ResourceDiff {
                        name: resource.name.clone(),
                        kind: resource.kind,
                        diff_type: DiffType::Create,
                        details: vec![DiffDetail {
                            field: String::from("resource"),
                            old_value: None,
                            new_value: Some(resource.name.clone()),
                        }],
                        old_hash: None,
                        new_hash: Some(new_hash),
                    }
                }
                Some(record) => {
                    // Recorded but gone provider-side: drift, recreate.
                    let gone = observed_ids
                        .as_ref()
                        .is_some_and(|ids| !ids.contains_key(record.provider_id.as_str()));

                    if gone {
                        debug!(
                            "Resource {} recorded but missing at provider, recreating",
                            resource.name
                        );
                        ResourceDiff {
                            name: resource.name.clone(),
                            kind: resource.kind,
                            diff_type: DiffType::Drift,
                            details: vec![DiffDetail {
                                field: String::from("resource"),
                                old_value: Some(format!("missing (was {})", record.provider_id)),
                                new_value: Some(resource.name.clone()),
                            }],
                            old_hash: Some(record.attributes_hash.clone()),
                            new_hash: Some(new_hash),
                        }
                    } else if record.attributes_hash == new_hash {
                        debug!("Resource {} is up to date", resource.name);
                        ResourceDiff {
                            name: resource.name.clone(),
                            kind: resource.kind,
                            diff_type: DiffType::NoChange,
                            details: vec![],
                            old_hash: Some(record.attributes_hash.clone()),
                            new_hash: Some(new_hash),
                        }
                    } else {
                        let details = attribute_diff(&record.attributes, &resource.attributes);
                        let forces_replace = details
                            .iter()
                            .any(|d| is_immutable(resource.kind, &d.field));
                        let diff_type = if forces_replace {
                            DiffType::Replace
                        } else {
                            DiffType::Update
                        };

                        debug!("Resource {} needs {:?}", resource.name, diff_type);
                        ResourceDiff {
                            name: resource.name.clone(),
                            kind: resource.kind,
                            diff_type,
                            details,
                            old_hash: Some(record.attributes_hash.clone()),
                            new_hash: Some(new_hash),
                        }
                    }
                }
            };

            diffs.push(diff);
        }

        // Recorded resources absent from the desired set are destroyed.
        // Sorted by name so repeated plans list destroys identically.
        if let Some(state) = state {
            let mut orphaned: Vec<(&String, &crate::state::ResourceRecord)> =
                state.resources.iter().collect();
            orphaned.sort_by(|a, b| a.0.cmp(b.0));

            for (name, record) in orphaned {
                let in_config = desired.iter().any(|r| r.name == *name);
                if !in_config {
                    debug!("Found orphaned resource: {name}");
                    diffs.push(ResourceDiff {
                        name: name.clone(),
                        kind: record.kind,
                        diff_type: DiffType::Destroy,
                        details: vec![DiffDetail {
                            field: String::from("resource"),
                            old_value: Some(record.provider_id.clone()),
                            new_value: None,
                        }],
                        old_hash: Some(record.attributes_hash.clone()),
                        new_hash: None,
                    });
                }
            }
        }

        let creates = diffs.iter().filter(|d| d.diff_type == DiffType::Create).count();
        let updates = diffs.iter().filter(|d| d.diff_type == DiffType::Update).count();
        let replaces = diffs
            .iter()
            .filter(|d| matches!(d.diff_type, DiffType::Replace | DiffType::Drift))
            .count();
        let destroys = diffs.iter().filter(|d| d.diff_type == DiffType::Destroy).count();
        let unchanged = diffs.iter().filter(|d| d.diff_type == DiffType::NoChange).count();

        DiffResult {
            diffs,
            creates,
            updates,
            replaces,
            destroys,
            unchanged,
        }
    }
}

/// Computes per-attribute differences between two attribute maps.
fn attribute_diff(
    old: &std::collections::BTreeMap<String, String>,
    new: &std::collections::BTreeMap<String, String>,
) -> Vec<DiffDetail> {
    let mut details = Vec::new();

    for (key, new_value) in new {
        match old.get(key) {
            Some(old_value) if old_value == new_value => {}
            Some(old_value) => details.push(DiffDetail {
                field: key.clone(),
                old_value: Some(old_value.clone()),
                new_value: Some(new_value.clone()),
            }),
            None => details.push(DiffDetail {
                field: key.clone(),
                old_value: None,
                new_value: Some(new_value.clone()),
            }),
        }
    }

    for (key, old_value) in old {
        if !new.contains_key(key) {
            details.push(DiffDetail {
                field: key.clone(),
                old_value: Some(old_value.clone()),
                new_value: None,
            });
        }
    }

    details
}

impl DiffResult {
    /// Returns true if there are any changes.
    #[must_use]
    pub const fn has_changes(&self) -> bool {
        self.creates > 0 || self.updates > 0 || self.replaces > 0 || self.destroys > 0
    }

    /// Returns the total number of changes.
    #[must_use]
    pub const fn total_changes(&self) -> usize {
        self.creates + self.updates + self.replaces + self.destroys
    }

    /// Filters to only diffs that require action.
    #[must_use]
    pub fn actionable_diffs(&self) -> Vec<&ResourceDiff> {
        self.diffs
            .iter()
            .filter(|d| d.diff_type != DiffType::NoChange)
            .collect()
    }
}

impl std::fmt::Display for DiffType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Destroy => "destroy",
            Self::NoChange => "no change",
            Self::Drift => "drift",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ResourceDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.diff_type)?;
        if !self.details.is_empty() {
            write!(f, " (")?;
            for (i, detail) in self.details.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", detail.field)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ResourceRecord;

    fn resource(name: &str, kind: ResourceKind, attrs: &[(&str, &str)]) -> Resource {
        Resource {
            name: name.to_string(),
            kind,
            attributes: attrs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        }
    }

    fn state_with(resources: &[Resource]) -> TierState {
        let hasher = ConfigHasher::new();
        let mut state = TierState::new("web-tier", "dev");
        for r in resources {
            let hash = hasher.hash_resource(r);
            state.set_resource(ResourceRecord::new(
                &r.name,
                r.kind,
                &format!("sim-{}", r.name),
                r.attributes.clone(),
                &hash,
            ));
        }
        state
    }

    #[test]
    fn missing_resource_is_created() {
        let engine = DiffEngine::new();
        let desired = vec![resource("web-sg", ResourceKind::SecurityGroup, &[])];

        let result = engine.compute_diff(&desired, None, None);
        assert_eq!(result.creates, 1);
        assert!(result.has_changes());
    }

    #[test]
    fn unchanged_resource_is_noop() {
        let engine = DiffEngine::new();
        let desired = vec![resource(
            "web-sg",
            ResourceKind::SecurityGroup,
            &[("network", "vpc-1")],
        )];
        let state = state_with(&desired);

        let result = engine.compute_diff(&desired, Some(&state), None);
        assert_eq!(result.unchanged, 1);
        assert!(!result.has_changes());
    }

    #[test]
    fn mutable_change_is_update() {
        let engine = DiffEngine::new();
        let old = vec![resource(
            "web-lt",
            ResourceKind::LaunchTemplate,
            &[("image", "ami-1"), ("instance_type", "m6i.large")],
        )];
        let state = state_with(&old);

        let desired = vec![resource(
            "web-lt",
            ResourceKind::LaunchTemplate,
            &[("image", "ami-1"), ("instance_type", "m6i.xlarge")],
        )];

        let result = engine.compute_diff(&desired, Some(&state), None);
        assert_eq!(result.updates, 1);
        assert_eq!(result.replaces, 0);
        assert_eq!(result.diffs[0].details.len(), 1);
        assert_eq!(result.diffs[0].details[0].field, "instance_type");
    }

    #[test]
    fn immutable_change_is_replace() {
        let engine = DiffEngine::new();
        let old = vec![resource(
            "web-lt",
            ResourceKind::LaunchTemplate,
            &[("image", "ami-1")],
        )];
        let state = state_with(&old);

        let desired = vec![resource(
            "web-lt",
            ResourceKind::LaunchTemplate,
            &[("image", "ami-2")],
        )];

        let result = engine.compute_diff(&desired, Some(&state), None);
        assert_eq!(result.replaces, 1);
        assert_eq!(result.diffs[0].diff_type, DiffType::Replace);
    }

    #[test]
    fn ingress_identity_change_is_replace() {
        let engine = DiffEngine::new();
        let old = vec![resource(
            "web-sg",
            ResourceKind::SecurityGroup,
            &[("ingress.0.cidr", "0.0.0.0/0")],
        )];
        let state = state_with(&old);

        let desired = vec![resource(
            "web-sg",
            ResourceKind::SecurityGroup,
            &[("ingress.0.cidr", "10.0.0.0/8")],
        )];

        let result = engine.compute_diff(&desired, Some(&state), None);
        assert_eq!(result.diffs[0].diff_type, DiffType::Replace);
    }

    #[test]
    fn orphaned_record_is_destroyed() {
        let engine = DiffEngine::new();
        let old = vec![resource("stale-sg", ResourceKind::SecurityGroup, &[])];
        let state = state_with(&old);

        let result = engine.compute_diff(&[], Some(&state), None);
        assert_eq!(result.destroys, 1);
        assert_eq!(result.diffs[0].diff_type, DiffType::Destroy);
    }

    #[test]
    fn provider_missing_resource_is_drift() {
        let engine = DiffEngine::new();
        let desired = vec![resource("web-sg", ResourceKind::SecurityGroup, &[])];
        let state = state_with(&desired);

        // Observed list does not contain the recorded provider id.
        let result = engine.compute_diff(&desired, Some(&state), Some(&[]));
        assert_eq!(result.diffs[0].diff_type, DiffType::Drift);
        assert_eq!(result.replaces, 1);
    }
}
