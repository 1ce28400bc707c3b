//! Deployment plan types and construction.
//!
//! This module converts a diff into an executable, dependency-annotated
//! sequence of plan items. Replacements are decomposed here into
//! create-new -> rewire-dependents -> destroy-old so that a resource feeding
//! a load balancer never loses its serving copy before the replacement is
//! healthy and every dependent points at it.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::config::{DeployConfig, Resource, ResourceKind};
use crate::error::{PlanError, Result, StratoformError};
use crate::graph::{scan_references, DependencyGraph};
use crate::state::TierState;

use super::diff::{DiffDetail, DiffResult, DiffType};

/// A complete deployment plan.
#[derive(Debug)]
pub struct DeploymentPlan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Configuration hash this plan is based on.
    pub config_hash: String,
    /// Plan items; `dependencies` are indices into this vector.
    pub items: Vec<PlanItem>,
}

/// A single plan item. Immutable once computed.
#[derive(Debug, Clone)]
pub struct PlanItem {
    /// Action type.
    pub action: ActionType,
    /// Resource name.
    pub resource_name: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Desired attributes, references unresolved. `None` for pure destroys.
    pub desired_attributes: Option<BTreeMap<String, String>>,
    /// Provider ID of the copy being destroyed (RetireOld and Destroy).
    pub old_provider_id: Option<String>,
    /// Initial desired capacity, set on scaling-group creations.
    pub initial_capacity: Option<u32>,
    /// Reason for this action.
    pub reason: String,
    /// Hash of the desired attributes (if applicable).
    pub new_hash: Option<String>,
    /// Attribute-level changes that produced this item.
    pub diff: Vec<DiffDetail>,
    /// Item indices that must reach terminal success first.
    pub dependencies: Vec<usize>,
}

/// Types of actions in a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    /// Create a new resource.
    Create,
    /// Update a resource's mutable attributes in place.
    Update,
    /// Create the replacement copy of a resource.
    Replace,
    /// Destroy the old copy left behind by a replacement.
    RetireOld,
    /// Destroy a resource.
    Destroy,
    /// No operation (for tracking).
    Noop,
}

impl DeploymentPlan {
    /// Builds a plan from a diff, using the dependency graph for ordering.
    ///
    /// Destroys come first (reverse dependency order among themselves), then
    /// creates/updates/replacements in apply order, then retire items for
    /// replaced resources.
    ///
    /// # Errors
    ///
    /// Returns an error if the constructed item dependencies are
    /// inconsistent; with a valid graph this indicates a planner bug.
    pub fn from_diff(
        diff: &DiffResult,
        config: &DeployConfig,
        graph: &DependencyGraph,
        state: Option<&TierState>,
        config_hash: &str,
    ) -> Result<Self> {
        let desired: HashMap<String, Resource> = config
            .resources()
            .into_iter()
            .map(|r| (r.name.clone(), r))
            .collect();

        let mut items: Vec<PlanItem> = Vec::new();
        // Main item index per resource name (create/update/replace).
        let mut main_item: HashMap<String, usize> = HashMap::new();

        // --- destroys first ---
        let destroy_names: Vec<&str> = diff
            .diffs
            .iter()
            .filter(|d| d.diff_type == DiffType::Destroy)
            .map(|d| d.name.as_str())
            .collect();

        let mut destroy_item: HashMap<&str, usize> = HashMap::new();
        for resource_diff in &diff.diffs {
            if resource_diff.diff_type != DiffType::Destroy {
                continue;
            }

            let old_provider_id = state
                .and_then(|s| s.get_resource(&resource_diff.name))
                .map(|r| r.provider_id.clone());

            destroy_item.insert(resource_diff.name.as_str(), items.len());
            items.push(PlanItem {
                action: ActionType::Destroy,
                resource_name: resource_diff.name.clone(),
                kind: resource_diff.kind,
                desired_attributes: None,
                old_provider_id,
                initial_capacity: None,
                reason: String::from("Resource removed from configuration"),
                new_hash: None,
                diff: resource_diff.details.clone(),
                dependencies: vec![],
            });
        }

        // Destroy a resource only after destroying everything that referenced
        // it, per the recorded attributes of the departing resources.
        if let Some(state) = state {
            for name in &destroy_names {
                let Some(record) = state.get_resource(name) else {
                    continue;
                };
                for value in record.attributes.values() {
                    for reference in scan_references(value) {
                        if let (Some(&target_item), Some(&this_item)) = (
                            destroy_item.get(reference.resource.as_str()),
                            destroy_item.get(name),
                        ) {
                            items[target_item].dependencies.push(this_item);
                        }
                    }
                }
            }
        }

        // --- creates, updates, replacements in apply order ---
        let diff_by_name: HashMap<&str, &super::diff::ResourceDiff> =
            diff.diffs.iter().map(|d| (d.name.as_str(), d)).collect();

        // Only the changed subset is ordered; unchanged resources keep
        // their records and impose no sequencing of their own.
        let changed: BTreeSet<String> = diff
            .diffs
            .iter()
            .filter(|d| {
                matches!(
                    d.diff_type,
                    DiffType::Create | DiffType::Update | DiffType::Replace | DiffType::Drift
                )
            })
            .map(|d| d.name.clone())
            .collect();

        for name in graph.subgraph_order(&changed) {
            let Some(resource_diff) = diff_by_name.get(name) else {
                continue;
            };

            let (action, reason) = match resource_diff.diff_type {
                DiffType::Create => (
                    ActionType::Create,
                    String::from("Resource defined in configuration"),
                ),
                DiffType::Update => (
                    ActionType::Update,
                    format!("Attributes changed: {}", summarize_fields(&resource_diff.details)),
                ),
                DiffType::Replace => (
                    ActionType::Replace,
                    format!(
                        "Immutable attributes changed: {}",
                        summarize_fields(&resource_diff.details)
                    ),
                ),
                DiffType::Drift => (
                    ActionType::Replace,
                    String::from("Recreating drifted resource"),
                ),
                DiffType::NoChange | DiffType::Destroy => continue,
            };

            let Some(resource) = desired.get(name) else {
                continue;
            };

            let dependencies: Vec<usize> = graph
                .depends_on(name)
                .iter()
                .filter_map(|dep| main_item.get(*dep).copied())
                .collect();

            let old_provider_id = if action == ActionType::Replace {
                state
                    .and_then(|s| s.get_resource(name))
                    .map(|r| r.provider_id.clone())
            } else {
                None
            };

            let initial_capacity = if resource.kind == ResourceKind::ScalingGroup
                && action == ActionType::Create
            {
                config.scaling_group(name).map(|g| g.desired_capacity)
            } else {
                None
            };

            main_item.insert(name.to_string(), items.len());
            items.push(PlanItem {
                action,
                resource_name: name.to_string(),
                kind: resource.kind,
                desired_attributes: Some(resource.attributes.clone()),
                old_provider_id,
                initial_capacity,
                reason,
                new_hash: resource_diff.new_hash.clone(),
                diff: resource_diff.details.clone(),
                dependencies,
            });
        }

        // --- rewires and retire items for replacements ---
        let replaced: Vec<String> = diff
            .diffs
            .iter()
            .filter(|d| matches!(d.diff_type, DiffType::Replace | DiffType::Drift))
            .map(|d| d.name.clone())
            .collect();

        for name in &replaced {
            let Some(&replace_idx) = main_item.get(name) else {
                continue;
            };

            // Every direct dependent must point at the new copy before the
            // old one goes away.
            let mut rewire_indices: Vec<usize> = Vec::new();
            for dependent in graph.dependents_of(name) {
                if let Some(&existing) = main_item.get(dependent) {
                    // The dependent already has its own item, which depends
                    // on the replacement through the graph edge.
                    rewire_indices.push(existing);
                    continue;
                }

                let Some(resource) = desired.get(dependent) else {
                    continue;
                };

                let rewire_idx = items.len();
                main_item.insert(dependent.to_string(), rewire_idx);
                items.push(PlanItem {
                    action: ActionType::Update,
                    resource_name: dependent.to_string(),
                    kind: resource.kind,
                    desired_attributes: Some(resource.attributes.clone()),
                    old_provider_id: None,
                    initial_capacity: None,
                    reason: format!("Rewiring after replacement of '{name}'"),
                    new_hash: diff_by_name
                        .get(dependent)
                        .and_then(|d| d.new_hash.clone()),
                    diff: vec![],
                    dependencies: vec![replace_idx],
                });
                rewire_indices.push(rewire_idx);
            }

            let mut retire_deps = vec![replace_idx];
            retire_deps.extend(rewire_indices);

            let old_provider_id = items[replace_idx].old_provider_id.clone();
            let replaced_kind = items[replace_idx].kind;
            items.push(PlanItem {
                action: ActionType::RetireOld,
                resource_name: name.clone(),
                kind: replaced_kind,
                desired_attributes: None,
                old_provider_id,
                initial_capacity: None,
                reason: format!("Destroying replaced copy of '{name}'"),
                new_hash: None,
                diff: vec![],
                dependencies: retire_deps,
            });
        }

        let plan = Self {
            created_at: Utc::now(),
            config_hash: config_hash.to_string(),
            items,
        };
        plan.validate()?;
        Ok(plan)
    }

    /// Creates an empty plan (no changes needed).
    #[must_use]
    pub fn empty(config_hash: &str) -> Self {
        Self {
            created_at: Utc::now(),
            config_hash: config_hash.to_string(),
            items: vec![],
        }
    }

    /// Creates a plan from pre-built items. Used by the capacity actuator
    /// for member add/remove plans.
    ///
    /// # Errors
    ///
    /// Returns an error if item dependencies are inconsistent.
    pub fn from_items(config_hash: &str, items: Vec<PlanItem>) -> Result<Self> {
        let plan = Self {
            created_at: Utc::now(),
            config_hash: config_hash.to_string(),
            items,
        };
        plan.validate()?;
        Ok(plan)
    }

    /// Checks that every dependency index points at an existing item.
    fn validate(&self) -> Result<()> {
        for item in &self.items {
            for &dep in &item.dependencies {
                if dep >= self.items.len() {
                    return Err(StratoformError::Plan(PlanError::UnresolvedDependency {
                        resource: item.resource_name.clone(),
                        index: dep,
                    }));
                }
            }
        }
        Ok(())
    }

    /// Returns true if the plan is empty (no changes).
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the number of items.
    #[must_use]
    pub const fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Returns the number of items with the given action.
    #[must_use]
    pub fn count_of(&self, action: ActionType) -> usize {
        self.items.iter().filter(|i| i.action == action).count()
    }

    /// Returns items that can start immediately (no dependencies).
    #[must_use]
    pub fn ready_items(&self) -> Vec<&PlanItem> {
        self.items
            .iter()
            .filter(|i| i.dependencies.is_empty())
            .collect()
    }
}

/// Joins the changed field names for a reason string.
fn summarize_fields(details: &[DiffDetail]) -> String {
    details
        .iter()
        .map(|d| d.field.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl PlanItem {
    /// Returns a human-readable description of the item.
    #[must_use]
    pub fn description(&self) -> String {
        match self.action {
            ActionType::Create => format!("Create {} '{}'", self.kind, self.resource_name),
            ActionType::Update => format!("Update {} '{}'", self.kind, self.resource_name),
            ActionType::Replace => format!("Replace {} '{}'", self.kind, self.resource_name),
            ActionType::RetireOld => {
                format!("Retire old copy of {} '{}'", self.kind, self.resource_name)
            }
            ActionType::Destroy => format!("Destroy {} '{}'", self.kind, self.resource_name),
            ActionType::Noop => format!("No change for '{}'", self.resource_name),
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::RetireOld => "retire",
            Self::Destroy => "destroy",
            Self::Noop => "noop",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for PlanItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.action, self.resource_name)?;
        if !self.reason.is_empty() {
            write!(f, " ({})", self.reason)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for DeploymentPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.items.is_empty() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Deployment Plan ({} items):", self.items.len())?;
        for (i, item) in self.items.iter().enumerate() {
            writeln!(f, "  {i}. {item}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        ConfigHasher, ImageLookupConfig, LaunchTemplateConfig, ProjectConfig, ScalingGroupConfig,
        StateConfig,
    };
    use crate::planner::DiffEngine;
    use crate::state::ResourceRecord;

    /// image -> launch template -> scaling group chain.
    fn chain_config(image_family: &str) -> DeployConfig {
        DeployConfig {
            project: ProjectConfig {
                name: String::from("web-tier"),
                environment: String::from("dev"),
                region: None,
            },
            state: StateConfig::default(),
            images: vec![ImageLookupConfig {
                name: String::from("web-image"),
                family: image_family.to_string(),
                architecture: String::from("x86_64"),
                most_recent: true,
            }],
            security_groups: vec![],
            launch_templates: vec![LaunchTemplateConfig {
                name: String::from("web-lt"),
                image: String::from("${resource.web-image.id}"),
                instance_type: String::from("m6i.large"),
                security_groups: vec![],
                user_data: None,
            }],
            load_balancers: vec![],
            target_groups: vec![],
            scaling_groups: vec![ScalingGroupConfig {
                name: String::from("web-asg"),
                launch_template: String::from("${resource.web-lt.id}"),
                target_group: None,
                min_size: 1,
                max_size: 4,
                desired_capacity: 2,
                health_check_grace_secs: 60,
                subnets: vec![String::from("subnet-a")],
                scaling: None,
            }],
        }
    }

    fn applied_state(config: &DeployConfig) -> TierState {
        let hasher = ConfigHasher::new();
        let mut state = TierState::new("web-tier", "dev");
        for resource in config.resources() {
            let hash = hasher.hash_resource(&resource);
            state.set_resource(ResourceRecord::new(
                &resource.name,
                resource.kind,
                &format!("sim-{}", resource.name),
                resource.attributes.clone(),
                &hash,
            ));
        }
        state
    }

    fn build_plan(config: &DeployConfig, state: Option<&TierState>) -> DeploymentPlan {
        let resources = config.resources();
        let graph = DependencyGraph::build(&resources).unwrap();
        let diff = DiffEngine::new().compute_diff(&resources, state, None);
        DeploymentPlan::from_diff(&diff, config, &graph, state, "hash").unwrap()
    }

    #[test]
    fn fresh_apply_orders_creates_by_dependency() {
        let config = chain_config("al2023-ami-*");
        let plan = build_plan(&config, None);

        assert_eq!(plan.item_count(), 3);
        assert_eq!(plan.items[0].resource_name, "web-image");
        assert_eq!(plan.items[1].resource_name, "web-lt");
        assert_eq!(plan.items[2].resource_name, "web-asg");
        assert!(plan.items[2].dependencies.contains(&1));
        assert_eq!(plan.items[2].initial_capacity, Some(2));
    }

    #[test]
    fn converged_state_yields_empty_plan() {
        let config = chain_config("al2023-ami-*");
        let state = applied_state(&config);
        let plan = build_plan(&config, Some(&state));
        assert!(plan.is_empty());
    }

    #[test]
    fn image_change_replaces_and_rewires_consumers() {
        let old_config = chain_config("al2023-ami-*");
        let state = applied_state(&old_config);

        let new_config = chain_config("al2023-ami-2025.*");
        let plan = build_plan(&new_config, Some(&state));

        // Replacing the image lookup rewires the launch template (an update
        // re-resolving its reference) before the old lookup is retired.
        let replace_image = plan
            .items
            .iter()
            .position(|i| i.resource_name == "web-image" && i.action == ActionType::Replace)
            .expect("image replacement item");
        let rewire_lt = plan
            .items
            .iter()
            .position(|i| {
                i.resource_name == "web-lt"
                    && i.action == ActionType::Update
                    && i.reason.contains("Rewiring")
            })
            .expect("launch template rewire item");
        let retire_image = plan
            .items
            .iter()
            .position(|i| i.resource_name == "web-image" && i.action == ActionType::RetireOld)
            .expect("image retire item");

        // The retire item must wait for the replacement and for every
        // dependent's rewire.
        let retire = &plan.items[retire_image];
        assert!(retire.dependencies.contains(&replace_image));
        assert!(retire.dependencies.contains(&rewire_lt));

        // Old copy's provider id is carried for the retire.
        assert_eq!(
            retire.old_provider_id.as_deref(),
            Some("sim-web-image")
        );
    }

    #[test]
    fn removed_resources_destroy_dependents_first() {
        let config = chain_config("al2023-ami-*");
        let state = applied_state(&config);

        // Empty desired config: everything is destroyed.
        let empty = DeployConfig {
            images: vec![],
            launch_templates: vec![],
            scaling_groups: vec![],
            ..config
        };

        let resources = empty.resources();
        let graph = DependencyGraph::build(&resources).unwrap();
        let diff = DiffEngine::new().compute_diff(&resources, Some(&state), None);
        let plan = DeploymentPlan::from_diff(&diff, &empty, &graph, Some(&state), "hash").unwrap();

        assert_eq!(plan.count_of(ActionType::Destroy), 3);

        // web-image's destroy must depend on web-lt's destroy (web-lt
        // references web-image), and web-lt's on web-asg's.
        let idx = |name: &str| {
            plan.items
                .iter()
                .position(|i| i.resource_name == name)
                .unwrap()
        };
        assert!(plan.items[idx("web-image")].dependencies.contains(&idx("web-lt")));
        assert!(plan.items[idx("web-lt")].dependencies.contains(&idx("web-asg")));
    }

    #[test]
    fn mutable_change_is_a_single_update_item() {
        let old_config = chain_config("al2023-ami-*");
        let state = applied_state(&old_config);

        let mut new_config = chain_config("al2023-ami-*");
        new_config.launch_templates[0].instance_type = String::from("m6i.xlarge");

        let plan = build_plan(&new_config, Some(&state));
        assert_eq!(plan.item_count(), 1);
        assert_eq!(plan.items[0].action, ActionType::Update);
        assert_eq!(plan.items[0].resource_name, "web-lt");
    }
}
