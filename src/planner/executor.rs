//! Plan executor.
//!
//! Walks a [`DeploymentPlan`] in dependency order, running independent
//! subtrees in parallel under a bounded worker pool. Each item is retried
//! with exponential backoff on transient provider errors; a permanently
//! failed item halts only its dependent subtree. The state store is updated
//! for each resource before any of its dependents start, so a crash
//! mid-apply leaves state consistent with the last completed resource.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, RwLock, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::ResourceKind;
use crate::error::{ReconcileError, Result, StratoformError};
use crate::graph::scan_references;
use crate::provider::{CloudProvider, CreateResourceRequest, UpdateResourceRequest};
use crate::state::{GroupRecord, ResourceRecord, TierState};

use super::plan::{ActionType, DeploymentPlan, PlanItem};

/// Skip reason recorded when an ancestor failed.
const SKIP_DEPENDENCY: &str = "Skipped due to dependency failure";

/// Skip reason recorded when the apply was cancelled.
const SKIP_CANCELLED: &str = "Skipped due to cancellation";

/// Executor for deployment plans.
pub struct PlanExecutor<P: CloudProvider + 'static> {
    /// Cloud provider.
    provider: Arc<P>,
    /// Shared recorded state, committed per item.
    state: Arc<RwLock<TierState>>,
    /// Maximum concurrently running items.
    max_parallel: usize,
    /// Maximum attempts per item.
    max_attempts: u32,
    /// Base delay for exponential backoff.
    backoff_base: Duration,
    /// Bounded wait for a resource to become ready.
    ready_timeout: Duration,
    /// Cooperative cancellation signal, checked between items.
    cancel: Option<watch::Receiver<bool>>,
}

/// Result of executing a single item.
#[derive(Debug)]
pub struct ItemResult {
    /// Item index in the plan.
    pub index: usize,
    /// Resource the item was for.
    pub resource_name: String,
    /// Action that was executed.
    pub action: ActionType,
    /// Whether the item succeeded.
    pub success: bool,
    /// Provider ID (if created or updated).
    pub provider_id: Option<String>,
    /// Attempts made.
    pub attempts: u32,
    /// Error message (if failed or skipped).
    pub error: Option<String>,
}

/// Result of executing the entire plan.
#[derive(Debug)]
pub struct ExecutionResult {
    /// Individual item results, in completion order.
    pub results: Vec<ItemResult>,
    /// Number of successful items.
    pub successful: usize,
    /// Number of failed items.
    pub failed: usize,
    /// Number of skipped items (failed ancestor or cancellation).
    pub skipped: usize,
    /// Whether the entire plan succeeded.
    pub success: bool,
    /// Whether the apply was cancelled before completion.
    pub cancelled: bool,
}

/// Outcome of a successfully applied item.
#[derive(Debug)]
struct ItemOutcome {
    /// Provider ID of the affected resource, when one exists afterwards.
    provider_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl<P: CloudProvider + 'static> PlanExecutor<P> {
    /// Creates a new plan executor.
    #[must_use]
    pub fn new(provider: Arc<P>, state: Arc<RwLock<TierState>>) -> Self {
        Self {
            provider,
            state,
            max_parallel: 4,
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
            ready_timeout: Duration::from_secs(300),
            cancel: None,
        }
    }

    /// Sets the worker pool size.
    #[must_use]
    pub const fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    /// Sets the maximum attempts per item.
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

    /// Sets the readiness timeout per item.
    #[must_use]
    pub const fn with_ready_timeout(mut self, ready_timeout: Duration) -> Self {
        self.ready_timeout = ready_timeout;
        self
    }

    /// Attaches a cancellation signal. Cancellation takes effect between
    /// items: in-flight items always run to completion.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Executes a deployment plan.
    ///
    /// # Errors
    ///
    /// Returns an error only for internal scheduling faults; per-item
    /// failures are reported in the [`ExecutionResult`].
    pub async fn execute(&self, plan: &DeploymentPlan) -> Result<ExecutionResult> {
        info!("Executing plan with {} items", plan.items.len());

        let mut status = vec![ItemStatus::Pending; plan.items.len()];
        let mut results: Vec<ItemResult> = Vec::with_capacity(plan.items.len());
        let mut cancelled = false;

        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut running: JoinSet<(usize, u32, Result<ItemOutcome>)> = JoinSet::new();

        loop {
            if !cancelled && self.cancel.as_ref().is_some_and(|rx| *rx.borrow()) {
                warn!("Apply cancelled; letting in-flight items finish");
                cancelled = true;
            }

            // Propagate failures: anything depending on a failed or skipped
            // item is skipped, transitively.
            loop {
                let mut changed = false;
                for idx in 0..plan.items.len() {
                    if status[idx] != ItemStatus::Pending {
                        continue;
                    }
                    let blocked = plan.items[idx].dependencies.iter().any(|&d| {
                        matches!(status[d], ItemStatus::Failed | ItemStatus::Skipped)
                    });
                    if blocked {
                        status[idx] = ItemStatus::Skipped;
                        results.push(Self::skip_result(idx, &plan.items[idx], SKIP_DEPENDENCY));
                        changed = true;
                    }
                }
                if !changed {
                    break;
                }
            }

            // On cancellation, everything not yet started is skipped.
            if cancelled {
                for idx in 0..plan.items.len() {
                    if status[idx] == ItemStatus::Pending {
                        status[idx] = ItemStatus::Skipped;
                        results.push(Self::skip_result(idx, &plan.items[idx], SKIP_CANCELLED));
                    }
                }
            }

            // Start every pending item whose dependencies have all succeeded.
            for idx in 0..plan.items.len() {
                if status[idx] != ItemStatus::Pending {
                    continue;
                }
                let ready = plan.items[idx]
                    .dependencies
                    .iter()
                    .all(|&d| status[d] == ItemStatus::Succeeded);
                if !ready {
                    continue;
                }

                status[idx] = ItemStatus::Running;
                self.spawn_item(idx, &plan.items[idx], &semaphore, &mut running)
                    .await;
            }

            // Nothing running and nothing startable: done.
            let Some(joined) = running.join_next().await else {
                break;
            };

            let (idx, attempts, outcome) = joined
                .map_err(|e| StratoformError::internal(format!("apply task panicked: {e}")))?;

            match outcome {
                Ok(outcome) => {
                    // Commit state before unblocking dependents.
                    self.commit_item(&plan.items[idx], outcome.provider_id.as_deref())
                        .await;
                    status[idx] = ItemStatus::Succeeded;
                    results.push(ItemResult {
                        index: idx,
                        resource_name: plan.items[idx].resource_name.clone(),
                        action: plan.items[idx].action,
                        success: true,
                        provider_id: outcome.provider_id,
                        attempts,
                        error: None,
                    });
                }
                Err(e) => {
                    error!(
                        "Item {} ({}) failed after {} attempts: {}",
                        idx, plan.items[idx].resource_name, attempts, e
                    );
                    status[idx] = ItemStatus::Failed;
                    results.push(ItemResult {
                        index: idx,
                        resource_name: plan.items[idx].resource_name.clone(),
                        action: plan.items[idx].action,
                        success: false,
                        provider_id: None,
                        attempts,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        let successful = results.iter().filter(|r| r.success).count();
        let skipped = results
            .iter()
            .filter(|r| {
                r.error.as_deref() == Some(SKIP_DEPENDENCY)
                    || r.error.as_deref() == Some(SKIP_CANCELLED)
            })
            .count();
        let failed = results.len() - successful - skipped;

        Ok(ExecutionResult {
            successful,
            failed,
            skipped,
            success: failed == 0 && skipped == 0,
            cancelled,
            results,
        })
    }

    /// Spawns one item onto the worker pool.
    async fn spawn_item(
        &self,
        idx: usize,
        item: &PlanItem,
        semaphore: &Arc<Semaphore>,
        running: &mut JoinSet<(usize, u32, Result<ItemOutcome>)>,
    ) {
        debug!("Starting item {idx}: {}", item.description());

        // Resolve references and look up provider ids against the state as
        // of this moment: every dependency has already been committed.
        let context = {
            let state = self.state.read().await;
            Self::prepare(item, &state)
        };

        let provider = Arc::clone(&self.provider);
        let semaphore = Arc::clone(semaphore);
        let item = item.clone();
        let max_attempts = self.max_attempts;
        let backoff_base = self.backoff_base;
        let ready_timeout = self.ready_timeout;

        running.spawn(async move {
            let _permit = semaphore.acquire_owned().await;

            let context = match context {
                Ok(c) => c,
                Err(e) => return (idx, 0, Err(e)),
            };

            let mut attempt = 0;
            loop {
                attempt += 1;
                match Self::apply_once(&provider, &item, &context, ready_timeout).await {
                    Ok(outcome) => return (idx, attempt, Ok(outcome)),
                    Err(e) if e.is_retryable() && attempt < max_attempts => {
                        let delay = backoff_base * 2_u32.saturating_pow(attempt - 1);
                        warn!(
                            "Item '{}' attempt {attempt}/{max_attempts} failed ({e}), retrying in {delay:?}",
                            item.resource_name
                        );
                        tokio::time::sleep(delay).await;
                    }
                    Err(e) if e.is_retryable() => {
                        return (
                            idx,
                            attempt,
                            Err(StratoformError::Reconcile(ReconcileError::MaxRetriesExceeded {
                                attempts: attempt,
                                resource: item.resource_name.clone(),
                            })),
                        );
                    }
                    Err(e) => return (idx, attempt, Err(e)),
                }
            }
        });
    }

    /// Pre-computed per-item context: resolved attributes and the provider
    /// ID the action targets.
    fn prepare(item: &PlanItem, state: &TierState) -> Result<PreparedItem> {
        let resolved = item
            .desired_attributes
            .as_ref()
            .map(|attrs| resolve_attributes(attrs, state))
            .transpose()?;

        let target_id = match item.action {
            ActionType::Update => state
                .get_resource(&item.resource_name)
                .map(|r| r.provider_id.clone()),
            ActionType::Destroy | ActionType::RetireOld => item.old_provider_id.clone().or_else(|| {
                state
                    .get_resource(&item.resource_name)
                    .map(|r| r.provider_id.clone())
            }),
            ActionType::Create | ActionType::Replace | ActionType::Noop => None,
        };

        Ok(PreparedItem {
            resolved_attributes: resolved,
            target_id,
        })
    }

    /// Applies a single item once.
    async fn apply_once(
        provider: &Arc<P>,
        item: &PlanItem,
        context: &PreparedItem,
        ready_timeout: Duration,
    ) -> Result<ItemOutcome> {
        match item.action {
            ActionType::Create | ActionType::Replace => {
                let attributes = context.resolved_attributes.clone().ok_or_else(|| {
                    StratoformError::internal(format!(
                        "missing attributes for create of '{}'",
                        item.resource_name
                    ))
                })?;

                let created = provider
                    .create(&CreateResourceRequest {
                        name: item.resource_name.clone(),
                        kind: item.kind,
                        attributes,
                    })
                    .await?;

                let ready = provider
                    .wait_ready(&created.provider_id, ready_timeout)
                    .await?;

                Ok(ItemOutcome {
                    provider_id: Some(ready.provider_id),
                })
            }
            ActionType::Update => {
                let provider_id = context.target_id.clone().ok_or_else(|| {
                    StratoformError::internal(format!(
                        "no recorded provider id for update of '{}'",
                        item.resource_name
                    ))
                })?;
                let attributes = context.resolved_attributes.clone().ok_or_else(|| {
                    StratoformError::internal(format!(
                        "missing attributes for update of '{}'",
                        item.resource_name
                    ))
                })?;

                let updated = provider
                    .update(&UpdateResourceRequest {
                        provider_id,
                        attributes,
                    })
                    .await?;

                Ok(ItemOutcome {
                    provider_id: Some(updated.provider_id),
                })
            }
            ActionType::Destroy | ActionType::RetireOld => {
                if let Some(provider_id) = &context.target_id {
                    match provider.delete(provider_id).await {
                        Ok(()) => {}
                        // Already gone provider-side counts as destroyed.
                        Err(StratoformError::Provider(
                            crate::error::ProviderError::NotFound { .. },
                        )) => {
                            debug!(
                                "Resource '{}' already absent at provider",
                                item.resource_name
                            );
                        }
                        Err(e) => return Err(e),
                    }
                } else {
                    debug!(
                        "No provider id recorded for '{}', treating destroy as complete",
                        item.resource_name
                    );
                }
                Ok(ItemOutcome { provider_id: None })
            }
            ActionType::Noop => Ok(ItemOutcome { provider_id: None }),
        }
    }

    /// Writes the state record for a completed item.
    ///
    /// Scaling-group members are not recorded here: the capacity actuator
    /// owns membership through the group records, and a member entry in the
    /// resource map would read as an orphan on the next diff.
    async fn commit_item(&self, item: &PlanItem, provider_id: Option<&str>) {
        if item.kind == ResourceKind::Instance {
            return;
        }

        let mut state = self.state.write().await;

        match item.action {
            ActionType::Create | ActionType::Replace => {
                let Some(provider_id) = provider_id else {
                    return;
                };
                let attributes = item.desired_attributes.clone().unwrap_or_default();
                let hash = item.new_hash.clone().unwrap_or_default();
                state.set_resource(ResourceRecord::new(
                    &item.resource_name,
                    item.kind,
                    provider_id,
                    attributes,
                    &hash,
                ));

                if let Some(capacity) = item.initial_capacity {
                    state.set_group(GroupRecord::new(&item.resource_name, capacity));
                }
            }
            ActionType::Update => {
                let attributes = item.desired_attributes.clone().unwrap_or_default();
                let hash = item.new_hash.clone().unwrap_or_default();
                if let Some(record) = state.resources.get_mut(&item.resource_name) {
                    record.record_apply(attributes, &hash);
                }
                state.last_updated = chrono::Utc::now();
            }
            ActionType::Destroy => {
                state.remove_resource(&item.resource_name);
                if item.kind == ResourceKind::ScalingGroup {
                    state.remove_group(&item.resource_name);
                }
            }
            ActionType::RetireOld | ActionType::Noop => {}
        }
    }

    fn skip_result(idx: usize, item: &PlanItem, reason: &str) -> ItemResult {
        warn!("Skipping item {idx} ({}): {reason}", item.resource_name);
        ItemResult {
            index: idx,
            resource_name: item.resource_name.clone(),
            action: item.action,
            success: false,
            provider_id: None,
            attempts: 0,
            error: Some(reason.to_string()),
        }
    }
}

/// Per-item context computed under the state read lock at start time.
#[derive(Debug)]
struct PreparedItem {
    resolved_attributes: Option<BTreeMap<String, String>>,
    target_id: Option<String>,
}

/// Substitutes `${resource.NAME.ATTR}` placeholders with values from the
/// recorded state: `id` resolves to the provider-assigned ID, any other
/// attribute to the referenced record's value.
fn resolve_attributes(
    attributes: &BTreeMap<String, String>,
    state: &TierState,
) -> Result<BTreeMap<String, String>> {
    let mut resolved = BTreeMap::new();

    for (key, value) in attributes {
        let mut new_value = value.clone();
        for reference in scan_references(value) {
            let record = state.get_resource(&reference.resource).ok_or_else(|| {
                StratoformError::internal(format!(
                    "reference to '{}' cannot be resolved: not yet applied",
                    reference.resource
                ))
            })?;

            let substitution = if reference.attribute == "id" {
                record.provider_id.clone()
            } else {
                record
                    .attributes
                    .get(&reference.attribute)
                    .cloned()
                    .unwrap_or_else(|| record.provider_id.clone())
            };

            let placeholder = format!(
                "${{resource.{}.{}}}",
                reference.resource, reference.attribute
            );
            new_value = new_value.replace(&placeholder, &substitution);
        }
        resolved.insert(key.clone(), new_value);
    }

    Ok(resolved)
}

impl ExecutionResult {
    /// Returns true if all items succeeded.
    #[must_use]
    pub const fn all_successful(&self) -> bool {
        self.success && self.failed == 0 && self.skipped == 0
    }

    /// Returns per-resource outcome lines for user-facing summaries.
    #[must_use]
    pub fn outcome_lines(&self) -> Vec<String> {
        self.results
            .iter()
            .map(|r| {
                let outcome = if r.success {
                    "success"
                } else if r.error.as_deref() == Some(SKIP_DEPENDENCY)
                    || r.error.as_deref() == Some(SKIP_CANCELLED)
                {
                    "skipped"
                } else {
                    "failed"
                };
                format!("{} {} = {outcome}", r.action, r.resource_name)
            })
            .collect()
    }
}

impl std::fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Executed {} items: {} successful, {} failed, {} skipped",
            self.results.len(),
            self.successful,
            self.failed,
            self.skipped
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        ConfigHasher, DeployConfig, ImageLookupConfig, LaunchTemplateConfig, ProjectConfig,
        ScalingGroupConfig, StateConfig,
    };
    use crate::graph::DependencyGraph;
    use crate::planner::{DeploymentPlan, DiffEngine};
    use crate::provider::{FailureKind, MemoryProvider};

    fn item(name: &str, action: ActionType, deps: Vec<usize>) -> PlanItem {
        PlanItem {
            action,
            resource_name: name.to_string(),
            kind: crate::config::ResourceKind::SecurityGroup,
            desired_attributes: Some(BTreeMap::new()),
            old_provider_id: None,
            initial_capacity: None,
            reason: String::new(),
            new_hash: Some(String::from("hash")),
            diff: vec![],
            dependencies: deps,
        }
    }

    fn executor(provider: &MemoryProvider) -> (PlanExecutor<MemoryProvider>, Arc<RwLock<TierState>>) {
        let state = Arc::new(RwLock::new(TierState::new("web-tier", "dev")));
        let exec = PlanExecutor::new(Arc::new(provider.clone()), Arc::clone(&state))
            .with_backoff_base(Duration::from_millis(1));
        (exec, state)
    }

    #[tokio::test]
    async fn independent_subtree_survives_permanent_failure() {
        let provider = MemoryProvider::new();
        provider.fail_resource("c", FailureKind::Permanent, 1).await;

        // C depends on A; B is independent.
        let plan = DeploymentPlan::from_items(
            "hash",
            vec![
                item("a", ActionType::Create, vec![]),
                item("b", ActionType::Create, vec![]),
                item("c", ActionType::Create, vec![0]),
            ],
        )
        .unwrap();

        let (exec, _state) = executor(&provider);
        let result = exec.execute(&plan).await.unwrap();

        assert_eq!(result.successful, 2);
        assert_eq!(result.failed, 1);
        assert_eq!(result.skipped, 0);
        assert!(!result.success);

        let by_name = |n: &str| result.results.iter().find(|r| r.resource_name == n).unwrap();
        assert!(by_name("a").success);
        assert!(by_name("b").success);
        assert!(!by_name("c").success);
    }

    #[tokio::test]
    async fn dependents_of_failed_item_are_skipped() {
        let provider = MemoryProvider::new();
        provider.fail_resource("a", FailureKind::Permanent, 1).await;

        let plan = DeploymentPlan::from_items(
            "hash",
            vec![
                item("a", ActionType::Create, vec![]),
                item("b", ActionType::Create, vec![0]),
                item("c", ActionType::Create, vec![1]),
            ],
        )
        .unwrap();

        let (exec, _state) = executor(&provider);
        let result = exec.execute(&plan).await.unwrap();

        assert_eq!(result.failed, 1);
        assert_eq!(result.skipped, 2);
        let skipped: Vec<&str> = result
            .results
            .iter()
            .filter(|r| r.error.as_deref() == Some(SKIP_DEPENDENCY))
            .map(|r| r.resource_name.as_str())
            .collect();
        assert!(skipped.contains(&"b"));
        assert!(skipped.contains(&"c"));
    }

    #[tokio::test]
    async fn transient_failures_are_retried_to_success() {
        let provider = MemoryProvider::new();
        provider.fail_resource("a", FailureKind::Transient, 2).await;

        let plan =
            DeploymentPlan::from_items("hash", vec![item("a", ActionType::Create, vec![])]).unwrap();

        let (exec, _state) = executor(&provider);
        let result = exec.execute(&plan).await.unwrap();

        assert!(result.success);
        assert_eq!(result.results[0].attempts, 3);
        assert_eq!(provider.resource_count().await, 1);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_max_retries() {
        let provider = MemoryProvider::new();
        provider
            .fail_resource("a", FailureKind::Transient, u32::MAX)
            .await;

        let plan =
            DeploymentPlan::from_items("hash", vec![item("a", ActionType::Create, vec![])]).unwrap();

        let (exec, _state) = executor(&provider);
        let result = exec.execute(&plan).await.unwrap();

        assert_eq!(result.failed, 1);
        let error = result.results[0].error.as_deref().unwrap();
        assert!(error.contains("Maximum retry attempts"), "got: {error}");
    }

    #[tokio::test]
    async fn state_is_committed_per_resource() {
        let provider = MemoryProvider::new();
        let plan = DeploymentPlan::from_items(
            "hash",
            vec![
                item("a", ActionType::Create, vec![]),
                item("b", ActionType::Create, vec![0]),
            ],
        )
        .unwrap();

        let (exec, state) = executor(&provider);
        let result = exec.execute(&plan).await.unwrap();
        assert!(result.success);

        let state = state.read().await;
        let record = state.get_resource("a").expect("record for a");
        assert!(record.provider_id.starts_with("sim-"));
        assert!(state.get_resource("b").is_some());
    }

    #[tokio::test]
    async fn cancellation_skips_unstarted_items() {
        let provider = MemoryProvider::new();
        let plan = DeploymentPlan::from_items(
            "hash",
            vec![
                item("a", ActionType::Create, vec![]),
                item("b", ActionType::Create, vec![0]),
            ],
        )
        .unwrap();

        let (tx, rx) = watch::channel(true);
        drop(tx);

        let state = Arc::new(RwLock::new(TierState::new("web-tier", "dev")));
        let exec = PlanExecutor::new(Arc::new(provider.clone()), state)
            .with_backoff_base(Duration::from_millis(1))
            .with_cancellation(rx);

        let result = exec.execute(&plan).await.unwrap();
        assert!(result.cancelled);
        assert_eq!(result.skipped, 2);
        assert_eq!(provider.resource_count().await, 0);
    }

    /// image -> launch template -> scaling group chain used for the
    /// end-to-end replacement ordering check.
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
                desired_capacity: 1,
                health_check_grace_secs: 60,
                subnets: vec![String::from("subnet-a")],
                scaling: None,
            }],
        }
    }

    async fn apply(
        config: &DeployConfig,
        provider: &MemoryProvider,
        state: &Arc<RwLock<TierState>>,
    ) -> ExecutionResult {
        let resources = config.resources();
        let graph = DependencyGraph::build(&resources).unwrap();
        let hash = ConfigHasher::new().hash_config(config);
        let diff = {
            let state = state.read().await;
            DiffEngine::new().compute_diff(&resources, Some(&state), None)
        };
        let plan = {
            let state = state.read().await;
            DeploymentPlan::from_diff(&diff, config, &graph, Some(&state), &hash).unwrap()
        };

        let exec = PlanExecutor::new(Arc::new(provider.clone()), Arc::clone(state))
            .with_backoff_base(Duration::from_millis(1));
        exec.execute(&plan).await.unwrap()
    }

    #[tokio::test]
    async fn replacement_destroys_old_copy_only_after_rewire() {
        let provider = MemoryProvider::new();
        let state = Arc::new(RwLock::new(TierState::new("web-tier", "dev")));

        // Initial apply.
        let result = apply(&chain_config("al2023-ami-*"), &provider, &state).await;
        assert!(result.success);

        // Change the image family: forces replacement of the lookup.
        let result = apply(&chain_config("al2023-ami-2025.*"), &provider, &state).await;
        assert!(result.success);

        let ops = provider.operations().await;
        let second_create = ops
            .iter()
            .enumerate()
            .filter(|(_, op)| op.as_str() == "create web-image")
            .nth(1)
            .map(|(i, _)| i)
            .expect("replacement create");
        let rewire = ops
            .iter()
            .position(|op| op == "update web-lt")
            .expect("rewire update");
        let delete_old = ops
            .iter()
            .position(|op| op == "delete web-image")
            .expect("old copy delete");

        assert!(second_create < delete_old, "old copy destroyed before replacement existed: {ops:?}");
        assert!(rewire < delete_old, "old copy destroyed before dependents rewired: {ops:?}");

        // Convergence: a third plan against the same config is empty.
        let resources = chain_config("al2023-ami-2025.*").resources();
        let state_guard = state.read().await;
        let diff = DiffEngine::new().compute_diff(&resources, Some(&state_guard), None);
        assert!(!diff.has_changes());
    }
}
