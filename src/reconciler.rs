//! Reconciler for converging recorded state toward the declaration.
//!
//! This module ties the engine together: it diffs desired configuration
//! against the state store, builds dependency-ordered plans, executes them,
//! and converges scaling-group membership. It is also the single
//! authoritative capacity setter: both user-initiated applies and the
//! autoscaling controller change desired capacity through
//! [`CapacityActuator`], serialized per group.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::autoscale::{CapacityActuator, CapacityChange, CapacityRequest, GroupCapacity};
use crate::config::{ConfigHasher, DeployConfig, ResourceKind};
use crate::error::{Result, ScaleError, StratoformError};
use crate::graph::DependencyGraph;
use crate::planner::{
    ActionType, DeploymentPlan, DiffEngine, DiffResult, ExecutionResult, PlanExecutor, PlanItem,
};
use crate::provider::CloudProvider;
use crate::state::{ApplyHistoryEntry, ApplyOperation, MemberRecord, TierState};

/// Reconciler for a single deployment.
pub struct Reconciler<P: CloudProvider + 'static> {
    /// Desired configuration.
    config: DeployConfig,
    /// Cloud provider.
    provider: Arc<P>,
    /// Shared recorded state.
    state: Arc<RwLock<TierState>>,
    /// Configuration hasher.
    hasher: ConfigHasher,
    /// Diff engine.
    diff_engine: DiffEngine,
    /// Worker pool size for applies.
    max_parallel: usize,
    /// Maximum attempts per plan item.
    max_attempts: u32,
    /// Base backoff delay between attempts.
    backoff_base: Duration,
    /// Per-group mutexes serializing capacity changes.
    group_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// Result of a reconciliation run.
#[derive(Debug, serde::Serialize)]
pub struct ReconciliationResult {
    /// Whether the run succeeded completely.
    pub success: bool,
    /// Number of resources created.
    pub created: usize,
    /// Number of resources updated in place.
    pub updated: usize,
    /// Number of resources replaced.
    pub replaced: usize,
    /// Number of resources destroyed.
    pub destroyed: usize,
    /// Number of unchanged resources.
    pub unchanged: usize,
    /// Per-resource outcome lines (success / failed / skipped).
    pub outcomes: Vec<String>,
    /// Errors encountered.
    pub errors: Vec<String>,
}

/// Report of drift detection.
#[derive(Debug, serde::Serialize)]
pub struct DriftReport {
    /// Whether drift was detected.
    pub has_drift: bool,
    /// Resources that have drifted.
    pub drifted_resources: Vec<String>,
    /// Total number of resources in config.
    pub total_resources: usize,
    /// Number of resources observed at the provider.
    pub observed_count: usize,
}

impl<P: CloudProvider + 'static> Reconciler<P> {
    /// Creates a new reconciler.
    #[must_use]
    pub fn new(config: DeployConfig, provider: Arc<P>, state: Arc<RwLock<TierState>>) -> Self {
        Self {
            config,
            provider,
            state,
            hasher: ConfigHasher::new(),
            diff_engine: DiffEngine::new(),
            max_parallel: 4,
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
            group_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Sets the worker pool size.
    #[must_use]
    pub const fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    /// Sets the maximum attempts per plan item.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the base backoff delay.
    #[must_use]
    pub const fn with_backoff_base(mut self, backoff_base: Duration) -> Self {
        self.backoff_base = backoff_base;
        self
    }

    /// Returns a handle to the shared state.
    #[must_use]
    pub fn state(&self) -> Arc<RwLock<TierState>> {
        Arc::clone(&self.state)
    }

    /// Computes the current diff and plan without applying anything.
    ///
    /// # Errors
    ///
    /// Returns a fatal configuration error for unresolved references or
    /// dependency cycles.
    pub async fn plan(&self) -> Result<(DiffResult, DeploymentPlan)> {
        let resources = self.config.resources();
        let graph = DependencyGraph::build(&resources)?;
        let config_hash = self.hasher.hash_config(&self.config);

        let state = self.state.read().await;
        let diff = self
            .diff_engine
            .compute_diff(&resources, Some(&state), None);
        let plan = DeploymentPlan::from_diff(&diff, &self.config, &graph, Some(&state), &config_hash)?;

        Ok((diff, plan))
    }

    /// Plans and applies, then converges scaling-group membership.
    ///
    /// # Errors
    ///
    /// Returns fatal configuration errors; per-resource failures are
    /// reported in the result instead.
    pub async fn apply(
        &self,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<ReconciliationResult> {
        info!(
            "Reconciling {}/{}",
            self.config.project.name, self.config.project.environment
        );

        let (diff, plan) = self.plan().await?;

        info!(
            "Diff: {} creates, {} updates, {} replaces, {} destroys, {} unchanged",
            diff.creates, diff.updates, diff.replaces, diff.destroys, diff.unchanged
        );

        if plan.is_empty() {
            info!("No changes required - state is converged");
            let converge = self.converge_groups().await;
            return Ok(Self::summarize(&diff, None, converge));
        }

        let mut executor = PlanExecutor::new(Arc::clone(&self.provider), Arc::clone(&self.state))
            .with_max_parallel(self.max_parallel)
            .with_max_attempts(self.max_attempts)
            .with_backoff_base(self.backoff_base);
        if let Some(cancel) = cancel {
            executor = executor.with_cancellation(cancel);
        }

        let execution = executor.execute(&plan).await?;

        // Record the run before membership convergence so a crash there
        // still leaves the apply visible in history.
        {
            let mut state = self.state.write().await;
            let resources: Vec<String> =
                plan.items.iter().map(|i| i.resource_name.clone()).collect();
            let entry = if execution.success {
                ApplyHistoryEntry::new(ApplyOperation::Apply, &plan.config_hash, resources)
            } else {
                ApplyHistoryEntry::failed(
                    ApplyOperation::Apply,
                    &plan.config_hash,
                    resources,
                    &format!("{} items failed", execution.failed),
                )
            };
            state.add_history(entry);
            state.config_hash.clone_from(&plan.config_hash);
        }

        let converge = if execution.success {
            self.converge_groups().await
        } else {
            vec![]
        };

        Ok(Self::summarize(&diff, Some(&execution), converge))
    }

    /// Destroys everything: scaling-group members first, then all resources
    /// in reverse dependency order.
    ///
    /// # Errors
    ///
    /// Returns fatal errors; per-resource failures are reported in the
    /// result.
    pub async fn destroy(&self, cancel: Option<watch::Receiver<bool>>) -> Result<ReconciliationResult> {
        info!(
            "Destroying {}/{}",
            self.config.project.name, self.config.project.environment
        );

        // Members go first so groups are empty when their turn comes.
        let group_names: Vec<String> = {
            let state = self.state.read().await;
            state.groups.keys().cloned().collect()
        };
        let mut errors = Vec::new();
        for group in group_names {
            if let Err(e) = self.teardown_members(&group).await {
                warn!("Failed to tear down members of '{group}': {e}");
                errors.push(format!("{group}: {e}"));
            }
        }

        // An empty desired set turns every record into a destroy.
        let empty: Vec<crate::config::Resource> = Vec::new();
        let graph = DependencyGraph::build(&empty)?;
        let config_hash = self.hasher.hash_config(&self.config);

        let (diff, plan) = {
            let state = self.state.read().await;
            let diff = self.diff_engine.compute_diff(&empty, Some(&state), None);
            let plan = Self::destroy_plan(&diff, &graph, &state, &config_hash)?;
            (diff, plan)
        };

        let mut executor = PlanExecutor::new(Arc::clone(&self.provider), Arc::clone(&self.state))
            .with_max_parallel(self.max_parallel)
            .with_max_attempts(self.max_attempts)
            .with_backoff_base(self.backoff_base);
        if let Some(cancel) = cancel {
            executor = executor.with_cancellation(cancel);
        }
        let execution = executor.execute(&plan).await?;

        {
            let mut state = self.state.write().await;
            let resources: Vec<String> =
                plan.items.iter().map(|i| i.resource_name.clone()).collect();
            let entry = if execution.success {
                ApplyHistoryEntry::new(ApplyOperation::Destroy, &config_hash, resources)
            } else {
                ApplyHistoryEntry::failed(
                    ApplyOperation::Destroy,
                    &config_hash,
                    resources,
                    &format!("{} items failed", execution.failed),
                )
            };
            state.add_history(entry);
        }

        let mut result = Self::summarize(&diff, Some(&execution), vec![]);
        result.errors.extend(errors);
        result.success = result.success && result.errors.is_empty();
        Ok(result)
    }

    /// Builds the destroy plan against an empty desired set. The generic
    /// builder needs a config to look up resources; destroys don't, so this
    /// thin variant avoids requiring one.
    fn destroy_plan(
        diff: &DiffResult,
        graph: &DependencyGraph,
        state: &TierState,
        config_hash: &str,
    ) -> Result<DeploymentPlan> {
        let empty_config = DeployConfig {
            project: crate::config::ProjectConfig {
                name: state.project.clone(),
                environment: state.environment.clone(),
                region: None,
            },
            state: crate::config::StateConfig::default(),
            images: vec![],
            security_groups: vec![],
            launch_templates: vec![],
            load_balancers: vec![],
            target_groups: vec![],
            scaling_groups: vec![],
        };
        DeploymentPlan::from_diff(diff, &empty_config, graph, Some(state), config_hash)
    }

    /// Checks for drift between config, state, and the provider without
    /// applying changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot be queried.
    pub async fn check_drift(&self) -> Result<DriftReport> {
        info!(
            "Checking for drift in {}/{}",
            self.config.project.name, self.config.project.environment
        );

        let resources = self.config.resources();
        let observed = self.provider.list().await?;

        let state = self.state.read().await;
        let diff = self
            .diff_engine
            .compute_diff(&resources, Some(&state), Some(&observed));

        let drifted_resources: Vec<String> = diff
            .actionable_diffs()
            .iter()
            .map(|d| d.name.clone())
            .collect();

        Ok(DriftReport {
            has_drift: diff.has_changes(),
            drifted_resources,
            total_resources: resources.len(),
            observed_count: observed.len(),
        })
    }

    /// Converges every scaling group's membership to its recorded desired
    /// capacity. Called after successful applies; failures are reported as
    /// outcome strings rather than aborting the run.
    async fn converge_groups(&self) -> Vec<String> {
        let mut outcomes = Vec::new();

        let targets: Vec<(String, u32, usize)> = {
            let state = self.state.read().await;
            self.config
                .scaling_groups
                .iter()
                .filter_map(|g| {
                    state
                        .get_group(&g.name)
                        .map(|r| (g.name.clone(), r.desired_capacity, r.member_count()))
                })
                .collect()
        };

        for (group, desired, members) in targets {
            if members == desired as usize {
                continue;
            }

            debug!("Converging group '{group}' membership: {members} -> {desired}");
            match self
                .set_desired_capacity(CapacityRequest {
                    group: group.clone(),
                    desired,
                    preferred_victims: vec![],
                })
                .await
            {
                Ok(change) => outcomes.push(format!(
                    "scale {group} = success (+{} -{})",
                    change.added.len(),
                    change.removed.len()
                )),
                Err(e) => outcomes.push(format!("scale {group} = failed ({e})")),
            }
        }

        outcomes
    }

    /// Destroys every member of a group through the apply path.
    async fn teardown_members(&self, group: &str) -> Result<()> {
        let lock = self.group_lock(group).await;
        let _guard = lock.lock().await;

        let members: Vec<MemberRecord> = {
            let state = self.state.read().await;
            state
                .get_group(group)
                .map(|g| g.members.clone())
                .unwrap_or_default()
        };

        if members.is_empty() {
            return Ok(());
        }

        let items: Vec<PlanItem> = members
            .iter()
            .map(|m| Self::member_destroy_item(group, m))
            .collect();
        let plan = DeploymentPlan::from_items("", items)?;

        let executor = PlanExecutor::new(Arc::clone(&self.provider), Arc::clone(&self.state))
            .with_max_parallel(self.max_parallel)
            .with_max_attempts(self.max_attempts)
            .with_backoff_base(self.backoff_base);
        let execution = executor.execute(&plan).await?;

        let mut state = self.state.write().await;
        if let Some(record) = state.groups.get_mut(group) {
            for result in execution.results.iter().filter(|r| r.success) {
                record.remove_member(&result.resource_name);
            }
            record.desired_capacity = 0;
        }

        if execution.success {
            Ok(())
        } else {
            Err(StratoformError::internal(format!(
                "{} member teardown items failed for '{group}'",
                execution.failed
            )))
        }
    }

    /// Builds the create item for one new member of a group.
    fn member_create_item(group: &str, launch_template: &str, member_id: &str) -> PlanItem {
        let mut attributes = BTreeMap::new();
        attributes.insert(String::from("group"), group.to_string());
        attributes.insert(String::from("launch_template"), launch_template.to_string());

        PlanItem {
            action: ActionType::Create,
            resource_name: member_id.to_string(),
            kind: ResourceKind::Instance,
            desired_attributes: Some(attributes),
            old_provider_id: None,
            initial_capacity: None,
            reason: format!("Scaling group '{group}' member"),
            new_hash: None,
            diff: vec![],
            dependencies: vec![],
        }
    }

    /// Builds the destroy item for one departing member.
    fn member_destroy_item(group: &str, member: &MemberRecord) -> PlanItem {
        PlanItem {
            action: ActionType::Destroy,
            resource_name: member.member_id.clone(),
            kind: ResourceKind::Instance,
            desired_attributes: None,
            old_provider_id: Some(member.provider_id.clone()),
            initial_capacity: None,
            reason: format!("Removing member from scaling group '{group}'"),
            new_hash: None,
            diff: vec![],
            dependencies: vec![],
        }
    }

    /// Returns the mutex serializing capacity changes for a group.
    async fn group_lock(&self, group: &str) -> Arc<Mutex<()>> {
        let mut locks = self.group_locks.lock().await;
        Arc::clone(
            locks
                .entry(group.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Folds a diff and execution into the user-facing result.
    fn summarize(
        diff: &DiffResult,
        execution: Option<&ExecutionResult>,
        converge_outcomes: Vec<String>,
    ) -> ReconciliationResult {
        let mut outcomes = execution.map_or_else(Vec::new, ExecutionResult::outcome_lines);
        outcomes.extend(converge_outcomes);

        let errors: Vec<String> = execution.map_or_else(Vec::new, |e| {
            e.results
                .iter()
                .filter(|r| !r.success)
                .filter_map(|r| r.error.as_ref().map(|err| format!("{}: {err}", r.resource_name)))
                .collect()
        });

        let scale_failed = outcomes.iter().any(|o| o.contains("= failed"));

        ReconciliationResult {
            success: execution.is_none_or(|e| e.success) && !scale_failed,
            created: diff.creates,
            updated: diff.updates,
            replaced: diff.replaces,
            destroyed: diff.destroys,
            unchanged: diff.unchanged,
            outcomes,
            errors,
        }
    }
}

#[async_trait]
impl<P: CloudProvider + 'static> CapacityActuator for Reconciler<P> {
    async fn current_capacity(&self, group: &str) -> Result<GroupCapacity> {
        let state = self.state.read().await;
        let record = state.get_group(group).ok_or_else(|| {
            StratoformError::internal(format!("unknown scaling group '{group}'"))
        })?;

        Ok(GroupCapacity {
            desired: record.desired_capacity,
            members: record.members.clone(),
        })
    }

    async fn set_desired_capacity(&self, request: CapacityRequest) -> Result<CapacityChange> {
        let group_config = self.config.scaling_group(&request.group).ok_or_else(|| {
            StratoformError::internal(format!("unknown scaling group '{}'", request.group))
        })?;

        if request.desired < group_config.min_size || request.desired > group_config.max_size {
            return Err(StratoformError::Scale(ScaleError::CapacityOutOfBounds {
                group: request.group.clone(),
                requested: request.desired,
                min: group_config.min_size,
                max: group_config.max_size,
            }));
        }

        // One capacity change per group at a time: the controller and
        // user-initiated applies are both clients of this path.
        let lock = self.group_lock(&request.group).await;
        let _guard = lock.lock().await;

        let (previous, members) = {
            let state = self.state.read().await;
            let record = state.get_group(&request.group).ok_or_else(|| {
                StratoformError::internal(format!(
                    "scaling group '{}' has not been applied yet",
                    request.group
                ))
            })?;
            (record.desired_capacity, record.members.clone())
        };

        let current = members.len();
        let target = request.desired as usize;

        let mut items = Vec::new();
        let mut removed = Vec::new();

        if target > current {
            for _ in current..target {
                let member_id = format!("{}-{}", request.group, &Uuid::new_v4().to_string()[..8]);
                items.push(Self::member_create_item(
                    &request.group,
                    &group_config.launch_template,
                    &member_id,
                ));
            }
        } else if target < current {
            let mut victims: Vec<String> = request
                .preferred_victims
                .iter()
                .filter(|v| members.iter().any(|m| &m.member_id == *v))
                .cloned()
                .collect();

            // Oldest-first fallback for any remainder.
            let mut by_age = members.clone();
            by_age.sort_by_key(|m| m.launched_at);
            for member in &by_age {
                if victims.len() >= current - target {
                    break;
                }
                if !victims.contains(&member.member_id) {
                    victims.push(member.member_id.clone());
                }
            }
            victims.truncate(current - target);

            for victim in &victims {
                if let Some(member) = members.iter().find(|m| &m.member_id == victim) {
                    items.push(Self::member_destroy_item(&request.group, member));
                }
            }
            removed = victims;
        }

        if items.is_empty() && previous == request.desired {
            debug!("Group '{}' already at capacity {}", request.group, request.desired);
            return Ok(CapacityChange {
                group: request.group,
                previous,
                desired: request.desired,
                added: vec![],
                removed: vec![],
            });
        }

        let plan = DeploymentPlan::from_items("", items)?;
        let executor = PlanExecutor::new(Arc::clone(&self.provider), Arc::clone(&self.state))
            .with_max_parallel(self.max_parallel)
            .with_max_attempts(self.max_attempts)
            .with_backoff_base(self.backoff_base);
        let execution = executor.execute(&plan).await?;

        // Membership reflects exactly what succeeded; desired capacity
        // records the request so the next convergence pass can finish the
        // job after partial failures.
        let mut added = Vec::new();
        {
            let mut state = self.state.write().await;
            let now = Utc::now();
            let config_hash = state.config_hash.clone();
            if let Some(record) = state.groups.get_mut(&request.group) {
                for result in execution.results.iter().filter(|r| r.success) {
                    match result.action {
                        ActionType::Create => {
                            if let Some(provider_id) = &result.provider_id {
                                record.add_member(MemberRecord {
                                    member_id: result.resource_name.clone(),
                                    provider_id: provider_id.clone(),
                                    launched_at: now,
                                });
                                added.push(result.resource_name.clone());
                            }
                        }
                        ActionType::Destroy => {
                            record.remove_member(&result.resource_name);
                        }
                        _ => {}
                    }
                }
                record.desired_capacity = request.desired;
                record.updated_at = now;
            }

            let removed_ok: Vec<String> = removed
                .iter()
                .filter(|v| {
                    execution
                        .results
                        .iter()
                        .any(|r| r.success && &r.resource_name == *v)
                })
                .cloned()
                .collect();
            removed = removed_ok;

            state.add_history(ApplyHistoryEntry::new(
                ApplyOperation::Scale,
                &config_hash,
                vec![request.group.clone()],
            ));
        }

        if !execution.success {
            warn!(
                "Capacity change for '{}' partially failed: {} of {} items",
                request.group,
                execution.failed,
                execution.results.len()
            );
        }

        Ok(CapacityChange {
            group: request.group,
            previous,
            desired: request.desired,
            added,
            removed,
        })
    }
}

impl DriftReport {
    /// Returns true if the state is converged (no drift).
    #[must_use]
    pub const fn is_converged(&self) -> bool {
        !self.has_drift
    }
}

impl std::fmt::Display for DriftReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.has_drift {
            writeln!(f, "Drift detected:")?;
            for resource in &self.drifted_resources {
                writeln!(f, "  - {resource}")?;
            }
        } else {
            write!(f, "No drift detected - state is converged")?;
        }
        Ok(())
    }
}

impl std::fmt::Display for ReconciliationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = if self.success { "successful" } else { "failed" };
        writeln!(f, "Reconciliation {status}:")?;
        writeln!(f, "  Created: {}", self.created)?;
        writeln!(f, "  Updated: {}", self.updated)?;
        writeln!(f, "  Replaced: {}", self.replaced)?;
        writeln!(f, "  Destroyed: {}", self.destroyed)?;
        writeln!(f, "  Unchanged: {}", self.unchanged)?;

        if !self.outcomes.is_empty() {
            writeln!(f, "  Outcomes:")?;
            for outcome in &self.outcomes {
                writeln!(f, "    - {outcome}")?;
            }
        }

        if !self.errors.is_empty() {
            writeln!(f, "  Errors:")?;
            for error in &self.errors {
                writeln!(f, "    - {error}")?;
            }
        }

        Ok(())
    }
}
