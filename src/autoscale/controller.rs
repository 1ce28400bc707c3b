//! The per-group target-tracking control loop.
//!
//! Each scaling group with a policy gets one long-lived controller task,
//! decoupled from user-initiated applies. The loop cycles through
//! `Idle -> Evaluating -> Scaling -> Cooling -> Idle`, waking on a fixed
//! evaluation interval and exiting on the shutdown signal.
//!
//! Fail-safe rule: the controller never scales on missing data. A failed
//! metric or health read logs, holds desired capacity, and retries next
//! interval.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::{MetricKind, ScalingGroupConfig};
use crate::error::Result;
use crate::lb::HealthSource;
use crate::metrics::{average_over, MetricSource};

use super::capacity::{CapacityActuator, CapacityRequest};
use super::policy::{
    desired_capacity, eligible_members, select_victims, CooldownTracker, ScaleDecision,
    ScaleDirection,
};

/// Controller configuration derived from a scaling group's policy.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Scaling group name.
    pub group: String,
    /// Metric the policy tracks.
    pub metric: MetricKind,
    /// Target metric value.
    pub target_value: f64,
    /// Minimum group size.
    pub min_size: u32,
    /// Maximum group size.
    pub max_size: u32,
    /// Launch grace period during which members are excluded from
    /// evaluation.
    pub grace_period: Duration,
    /// Interval between evaluations.
    pub evaluation_interval: Duration,
    /// Cooldown after a scale-out.
    pub scale_out_cooldown: Duration,
    /// Cooldown after a scale-in. Kept longer than the scale-out cooldown
    /// to favor availability over cost under load spikes.
    pub scale_in_cooldown: Duration,
}

impl ControllerConfig {
    /// Derives a controller config from a scaling group, if it carries a
    /// policy.
    #[must_use]
    pub fn from_group(group: &ScalingGroupConfig) -> Option<Self> {
        let policy = group.scaling.as_ref()?;
        Some(Self {
            group: group.name.clone(),
            metric: policy.metric,
            target_value: policy.target_value,
            min_size: group.min_size,
            max_size: group.max_size,
            grace_period: Duration::from_secs(group.health_check_grace_secs),
            evaluation_interval: Duration::from_secs(policy.evaluation_interval_secs),
            scale_out_cooldown: Duration::from_secs(policy.scale_out_cooldown_secs),
            scale_in_cooldown: Duration::from_secs(policy.scale_in_cooldown_secs),
        })
    }
}

/// Phase of the controller's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerPhase {
    /// Waiting for the next evaluation interval.
    Idle,
    /// Reading health and metrics.
    Evaluating,
    /// A capacity change is being applied.
    Scaling,
    /// A capacity change was applied recently; holding.
    Cooling,
}

/// Target-tracking controller for one scaling group.
pub struct AutoscaleController<A, M, H>
where
    A: CapacityActuator,
    M: MetricSource,
    H: HealthSource,
{
    config: ControllerConfig,
    actuator: Arc<A>,
    metrics: Arc<M>,
    health: Arc<H>,
    cooldowns: CooldownTracker,
    phase: ControllerPhase,
}

impl<A, M, H> AutoscaleController<A, M, H>
where
    A: CapacityActuator,
    M: MetricSource,
    H: HealthSource,
{
    /// Creates a controller for one group.
    #[must_use]
    pub fn new(config: ControllerConfig, actuator: Arc<A>, metrics: Arc<M>, health: Arc<H>) -> Self {
        Self {
            config,
            actuator,
            metrics,
            health,
            cooldowns: CooldownTracker::new(),
            phase: ControllerPhase::Idle,
        }
    }

    /// Returns the controller's current phase.
    #[must_use]
    pub const fn phase(&self) -> ControllerPhase {
        self.phase
    }

    /// Runs the control loop until the shutdown signal fires.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            group = %self.config.group,
            interval_secs = self.config.evaluation_interval.as_secs(),
            target = self.config.target_value,
            "autoscale controller started"
        );

        loop {
            tokio::select! {
                () = tokio::time::sleep(self.config.evaluation_interval) => {
                    if let Err(e) = self.evaluate_once(Utc::now()).await {
                        error!(group = %self.config.group, error = %e, "evaluation failed");
                        self.phase = ControllerPhase::Idle;
                    }
                }
                _ = shutdown.changed() => {
                    info!(group = %self.config.group, "autoscale controller shutting down");
                    break;
                }
            }
        }
    }

    /// Performs one evaluation cycle at the given instant.
    ///
    /// # Errors
    ///
    /// Returns an error for capacity read or apply failures. Metric and
    /// health read failures are absorbed: they log and yield a no-op cycle.
    pub async fn evaluate_once(&mut self, now: DateTime<Utc>) -> Result<ScaleDecision> {
        self.phase = ControllerPhase::Evaluating;

        let capacity = self.actuator.current_capacity(&self.config.group).await?;

        let signals = match self.health.member_health(&self.config.group).await {
            Ok(signals) => signals,
            Err(e) => {
                warn!(
                    group = %self.config.group,
                    error = %e,
                    "health signals unavailable, holding capacity"
                );
                self.phase = ControllerPhase::Idle;
                return Ok(ScaleDecision::NoChange);
            }
        };

        let eligible = eligible_members(
            &capacity.members,
            &signals,
            self.config.grace_period,
            now,
        );

        let samples = match self.metrics.samples(&self.config.group, self.config.metric).await {
            Ok(samples) => samples,
            Err(e) => {
                warn!(
                    group = %self.config.group,
                    error = %e,
                    "metric unavailable, holding capacity"
                );
                self.phase = ControllerPhase::Idle;
                return Ok(ScaleDecision::NoChange);
            }
        };

        let Some(observed) = average_over(&samples, &eligible) else {
            warn!(
                group = %self.config.group,
                "no eligible member reported the metric, holding capacity"
            );
            self.phase = ControllerPhase::Idle;
            return Ok(ScaleDecision::NoChange);
        };

        debug!(
            group = %self.config.group,
            observed,
            target = self.config.target_value,
            eligible = eligible.len(),
            capacity = capacity.desired,
            "evaluated metric"
        );

        let decision = desired_capacity(
            capacity.desired,
            observed,
            self.config.target_value,
            self.config.min_size,
            self.config.max_size,
        );

        let ScaleDecision::ScaleTo(new_desired) = decision else {
            self.phase = ControllerPhase::Idle;
            return Ok(ScaleDecision::NoChange);
        };

        let direction = if new_desired > capacity.desired {
            ScaleDirection::Out
        } else {
            ScaleDirection::In
        };
        let cooldown = match direction {
            ScaleDirection::Out => self.config.scale_out_cooldown,
            ScaleDirection::In => self.config.scale_in_cooldown,
        };

        if !self.cooldowns.allows(direction, now, cooldown) {
            debug!(
                group = %self.config.group,
                ?direction,
                "in cooldown window, holding capacity"
            );
            self.phase = ControllerPhase::Cooling;
            return Ok(ScaleDecision::NoChange);
        }

        self.phase = ControllerPhase::Scaling;

        let preferred_victims = if direction == ScaleDirection::In {
            let count = (capacity.desired - new_desired) as usize;
            select_victims(&capacity.members, &signals, count)
        } else {
            Vec::new()
        };

        let change = self
            .actuator
            .set_desired_capacity(CapacityRequest {
                group: self.config.group.clone(),
                desired: new_desired,
                preferred_victims,
            })
            .await?;

        self.cooldowns.record(direction, now);
        self.phase = ControllerPhase::Cooling;

        info!(
            group = %self.config.group,
            from = change.previous,
            to = change.desired,
            observed,
            target = self.config.target_value,
            added = change.added.len(),
            removed = change.removed.len(),
            "capacity changed"
        );

        Ok(ScaleDecision::ScaleTo(new_desired))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autoscale::capacity::{CapacityChange, GroupCapacity, MockCapacityActuator};
    use crate::error::{ScaleError, StratoformError};
    use crate::lb::{HealthSignal, MockHealthSource, SignalSource};
    use crate::metrics::{MetricSample, MockMetricSource};
    use crate::state::MemberRecord;
    use chrono::Duration as ChronoDuration;

    fn test_config() -> ControllerConfig {
        ControllerConfig {
            group: String::from("web-asg"),
            metric: MetricKind::CpuUtilization,
            target_value: 10.0,
            min_size: 2,
            max_size: 10,
            grace_period: Duration::from_secs(300),
            evaluation_interval: Duration::from_secs(60),
            scale_out_cooldown: Duration::from_secs(60),
            scale_in_cooldown: Duration::from_secs(300),
        }
    }

    fn member(id: &str, age_secs: i64) -> MemberRecord {
        MemberRecord {
            member_id: id.to_string(),
            provider_id: format!("sim-{id}"),
            launched_at: Utc::now() - ChronoDuration::seconds(age_secs),
        }
    }

    fn signal(id: &str, healthy: bool) -> HealthSignal {
        HealthSignal {
            member_id: id.to_string(),
            healthy,
            source: SignalSource::LoadBalancer,
        }
    }

    fn samples(values: &[(&str, f64)]) -> Vec<MetricSample> {
        values
            .iter()
            .map(|(id, value)| MetricSample {
                member_id: (*id).to_string(),
                value: *value,
            })
            .collect()
    }

    #[tokio::test]
    async fn scales_out_per_target_tracking_formula_and_respects_cooldown() {
        let mut actuator = MockCapacityActuator::new();
        actuator.expect_current_capacity().returning(|_| {
            Ok(GroupCapacity {
                desired: 2,
                members: vec![member("m-0", 3600), member("m-1", 3600)],
            })
        });
        // Exactly one capacity change: the second evaluation lands inside
        // the scale-out cooldown window.
        actuator
            .expect_set_desired_capacity()
            .withf(|req| req.group == "web-asg" && req.desired == 8)
            .times(1)
            .returning(|req| {
                Ok(CapacityChange {
                    group: req.group,
                    previous: 2,
                    desired: req.desired,
                    added: vec![],
                    removed: vec![],
                })
            });

        let mut health = MockHealthSource::new();
        health
            .expect_member_health()
            .returning(|_| Ok(vec![signal("m-0", true), signal("m-1", true)]));

        let mut metrics = MockMetricSource::new();
        metrics
            .expect_samples()
            .returning(|_, _| Ok(samples(&[("m-0", 40.0), ("m-1", 40.0)])));

        let mut controller = AutoscaleController::new(
            test_config(),
            Arc::new(actuator),
            Arc::new(metrics),
            Arc::new(health),
        );

        let now = Utc::now();
        let decision = controller.evaluate_once(now).await.unwrap();
        assert_eq!(decision, ScaleDecision::ScaleTo(8));
        assert_eq!(controller.phase(), ControllerPhase::Cooling);

        // 30 seconds later the metric still reads high, but the cooldown
        // suppresses any further change.
        let decision = controller
            .evaluate_once(now + ChronoDuration::seconds(30))
            .await
            .unwrap();
        assert_eq!(decision, ScaleDecision::NoChange);
        assert_eq!(controller.phase(), ControllerPhase::Cooling);
    }

    #[tokio::test]
    async fn grace_period_members_do_not_dilute_the_average() {
        let mut actuator = MockCapacityActuator::new();
        actuator.expect_current_capacity().returning(|_| {
            Ok(GroupCapacity {
                desired: 4,
                members: vec![
                    member("mature-0", 3600),
                    member("mature-1", 3600),
                    member("fresh-0", 10),
                    member("fresh-1", 10),
                ],
            })
        });
        // No set_desired_capacity expectation: calling it fails the test.

        let mut health = MockHealthSource::new();
        health.expect_member_health().returning(|_| {
            Ok(vec![
                signal("mature-0", true),
                signal("mature-1", true),
                signal("fresh-0", true),
                signal("fresh-1", true),
            ])
        });

        // Mature members at 50%, fresh at 0%. With grace filtering the
        // average is 50, not 25, and 50 == target means no change.
        let mut metrics = MockMetricSource::new();
        metrics.expect_samples().returning(|_, _| {
            Ok(samples(&[
                ("mature-0", 50.0),
                ("mature-1", 50.0),
                ("fresh-0", 0.0),
                ("fresh-1", 0.0),
            ]))
        });

        let mut config = test_config();
        config.target_value = 50.0;

        let mut controller = AutoscaleController::new(
            config,
            Arc::new(actuator),
            Arc::new(metrics),
            Arc::new(health),
        );

        let decision = controller.evaluate_once(Utc::now()).await.unwrap();
        assert_eq!(decision, ScaleDecision::NoChange);
        assert_eq!(controller.phase(), ControllerPhase::Idle);
    }

    #[tokio::test]
    async fn missing_metric_holds_capacity() {
        let mut actuator = MockCapacityActuator::new();
        actuator.expect_current_capacity().returning(|_| {
            Ok(GroupCapacity {
                desired: 2,
                members: vec![member("m-0", 3600), member("m-1", 3600)],
            })
        });

        let mut health = MockHealthSource::new();
        health
            .expect_member_health()
            .returning(|_| Ok(vec![signal("m-0", true), signal("m-1", true)]));

        let mut metrics = MockMetricSource::new();
        metrics.expect_samples().returning(|_, _| {
            Err(StratoformError::Scale(ScaleError::MetricUnavailable {
                group: String::from("web-asg"),
                reason: String::from("collector offline"),
            }))
        });

        let mut controller = AutoscaleController::new(
            test_config(),
            Arc::new(actuator),
            Arc::new(metrics),
            Arc::new(health),
        );

        let decision = controller.evaluate_once(Utc::now()).await.unwrap();
        assert_eq!(decision, ScaleDecision::NoChange);
    }

    #[tokio::test]
    async fn scale_in_prefers_unhealthy_then_oldest_victims() {
        let mut actuator = MockCapacityActuator::new();
        actuator.expect_current_capacity().returning(|_| {
            Ok(GroupCapacity {
                desired: 4,
                members: vec![
                    member("old-healthy", 3600),
                    member("mid-healthy", 1800),
                    member("unhealthy", 1200),
                    member("young-healthy", 600),
                ],
            })
        });
        actuator
            .expect_set_desired_capacity()
            .withf(|req| {
                req.desired == 2
                    && req.preferred_victims == vec!["unhealthy", "old-healthy"]
            })
            .times(1)
            .returning(|req| {
                Ok(CapacityChange {
                    group: req.group,
                    previous: 4,
                    desired: req.desired,
                    added: vec![],
                    removed: req.preferred_victims,
                })
            });

        let mut health = MockHealthSource::new();
        health.expect_member_health().returning(|_| {
            Ok(vec![
                signal("old-healthy", true),
                signal("mid-healthy", true),
                signal("unhealthy", false),
                signal("young-healthy", true),
            ])
        });

        // Healthy mature members around 10% CPU with a 50% target: the
        // formula wants ceil(4 * 0.2) = 1, clamped to min 2.
        let mut metrics = MockMetricSource::new();
        metrics.expect_samples().returning(|_, _| {
            Ok(samples(&[
                ("old-healthy", 10.0),
                ("mid-healthy", 10.0),
                ("young-healthy", 10.0),
            ]))
        });

        let mut config = test_config();
        config.target_value = 50.0;
        config.grace_period = Duration::from_secs(60);

        let mut controller = AutoscaleController::new(
            config,
            Arc::new(actuator),
            Arc::new(metrics),
            Arc::new(health),
        );

        let decision = controller.evaluate_once(Utc::now()).await.unwrap();
        assert_eq!(decision, ScaleDecision::ScaleTo(2));
    }
}
