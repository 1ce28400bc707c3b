//! Target-tracking policy math.
//!
//! Pure decision logic for the autoscaling controller: eligibility
//! filtering, the capacity formula, cooldown accounting, and scale-in
//! victim selection. Everything here is synchronous and deterministic so
//! the controller's behavior can be tested without a running loop.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

use crate::lb::HealthSignal;
use crate::state::MemberRecord;

/// A scaling decision for a single group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Change desired capacity to the given value.
    ScaleTo(u32),
    /// No change needed.
    NoChange,
}

/// Direction of a capacity change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDirection {
    /// Adding capacity.
    Out,
    /// Removing capacity.
    In,
}

/// Computes the target-tracking capacity decision.
///
/// `desired' = ceil(current × observed / target)`, clamped to
/// `[min_size, max_size]`. Equal to current means no change.
#[must_use]
pub fn desired_capacity(
    current: u32,
    observed: f64,
    target: f64,
    min_size: u32,
    max_size: u32,
) -> ScaleDecision {
    if target <= 0.0 || current == 0 {
        return ScaleDecision::NoChange;
    }

    let ratio = observed / target;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let raw = (f64::from(current) * ratio).ceil().max(0.0) as u32;
    let clamped = raw.clamp(min_size, max_size);

    if clamped == current {
        ScaleDecision::NoChange
    } else {
        ScaleDecision::ScaleTo(clamped)
    }
}

/// Returns the member IDs that count toward metric and health evaluation:
/// healthy per the signals, and past the launch grace period.
///
/// Members with no signal at all are treated as unhealthy.
#[must_use]
pub fn eligible_members(
    members: &[MemberRecord],
    signals: &[HealthSignal],
    grace_period: Duration,
    now: DateTime<Utc>,
) -> Vec<String> {
    let grace = ChronoDuration::from_std(grace_period).unwrap_or_else(|_| ChronoDuration::zero());

    members
        .iter()
        .filter(|m| m.launched_at + grace <= now)
        .filter(|m| {
            signals
                .iter()
                .any(|s| s.member_id == m.member_id && s.healthy)
        })
        .map(|m| m.member_id.clone())
        .collect()
}

/// Selects `count` members to remove when scaling in: unhealthy members
/// first (in launch order), then oldest-first among the healthy, biasing
/// removal toward stale capacity.
#[must_use]
pub fn select_victims(
    members: &[MemberRecord],
    signals: &[HealthSignal],
    count: usize,
) -> Vec<String> {
    let is_healthy = |m: &MemberRecord| {
        signals
            .iter()
            .any(|s| s.member_id == m.member_id && s.healthy)
    };

    let mut ordered: Vec<&MemberRecord> = Vec::with_capacity(members.len());
    ordered.extend(members.iter().filter(|m| !is_healthy(m)));

    let mut healthy: Vec<&MemberRecord> = members.iter().filter(|m| is_healthy(m)).collect();
    healthy.sort_by_key(|m| m.launched_at);
    ordered.extend(healthy);

    ordered
        .into_iter()
        .take(count)
        .map(|m| m.member_id.clone())
        .collect()
}

/// Tracks the last capacity change per direction and enforces the
/// per-direction cooldown windows.
#[derive(Debug, Default)]
pub struct CooldownTracker {
    last_scale_out: Option<DateTime<Utc>>,
    last_scale_in: Option<DateTime<Utc>>,
}

impl CooldownTracker {
    /// Creates a tracker with no history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            last_scale_out: None,
            last_scale_in: None,
        }
    }

    /// Returns true if a change in the given direction is allowed at `now`.
    #[must_use]
    pub fn allows(&self, direction: ScaleDirection, now: DateTime<Utc>, cooldown: Duration) -> bool {
        let last = match direction {
            ScaleDirection::Out => self.last_scale_out,
            ScaleDirection::In => self.last_scale_in,
        };

        last.is_none_or(|t| {
            let elapsed = ChronoDuration::from_std(cooldown)
                .map_or(true, |cd| t + cd <= now);
            elapsed
        })
    }

    /// Records a capacity change in the given direction at `now`.
    pub fn record(&mut self, direction: ScaleDirection, now: DateTime<Utc>) {
        match direction {
            ScaleDirection::Out => self.last_scale_out = Some(now),
            ScaleDirection::In => self.last_scale_in = Some(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lb::SignalSource;

    fn member(id: &str, age_secs: i64, now: DateTime<Utc>) -> MemberRecord {
        MemberRecord {
            member_id: id.to_string(),
            provider_id: format!("sim-{id}"),
            launched_at: now - ChronoDuration::seconds(age_secs),
        }
    }

    fn signal(id: &str, healthy: bool) -> HealthSignal {
        HealthSignal {
            member_id: id.to_string(),
            healthy,
            source: SignalSource::LoadBalancer,
        }
    }

    #[test]
    fn doubles_capacity_when_metric_is_four_times_target() {
        // min=2, max=10, target=10.0, capacity=2, observed=40 -> ceil(2*4)=8.
        assert_eq!(
            desired_capacity(2, 40.0, 10.0, 2, 10),
            ScaleDecision::ScaleTo(8)
        );
    }

    #[test]
    fn clamps_to_max_size() {
        assert_eq!(
            desired_capacity(2, 400.0, 10.0, 2, 10),
            ScaleDecision::ScaleTo(10)
        );
    }

    #[test]
    fn clamps_to_min_size() {
        assert_eq!(
            desired_capacity(4, 1.0, 50.0, 2, 10),
            ScaleDecision::ScaleTo(2)
        );
    }

    #[test]
    fn on_target_is_no_change() {
        assert_eq!(desired_capacity(4, 50.0, 50.0, 2, 10), ScaleDecision::NoChange);
    }

    #[test]
    fn zero_capacity_holds() {
        assert_eq!(desired_capacity(0, 90.0, 50.0, 0, 10), ScaleDecision::NoChange);
    }

    #[test]
    fn eligibility_excludes_grace_period_members() {
        let now = Utc::now();
        let members = vec![
            member("mature-0", 600, now),
            member("mature-1", 600, now),
            member("fresh-0", 10, now),
        ];
        let signals = vec![
            signal("mature-0", true),
            signal("mature-1", true),
            signal("fresh-0", true),
        ];

        let eligible = eligible_members(&members, &signals, Duration::from_secs(300), now);
        assert_eq!(eligible, vec!["mature-0", "mature-1"]);
    }

    #[test]
    fn eligibility_excludes_unhealthy_and_unreported_members() {
        let now = Utc::now();
        let members = vec![
            member("m-0", 600, now),
            member("m-1", 600, now),
            member("m-2", 600, now),
        ];
        // m-1 unhealthy, m-2 has no signal at all.
        let signals = vec![signal("m-0", true), signal("m-1", false)];

        let eligible = eligible_members(&members, &signals, Duration::from_secs(60), now);
        assert_eq!(eligible, vec!["m-0"]);
    }

    #[test]
    fn victims_prefer_unhealthy_then_oldest() {
        let now = Utc::now();
        let members = vec![
            member("old-healthy", 3600, now),
            member("young-healthy", 60, now),
            member("unhealthy", 600, now),
        ];
        let signals = vec![
            signal("old-healthy", true),
            signal("young-healthy", true),
            signal("unhealthy", false),
        ];

        let victims = select_victims(&members, &signals, 2);
        assert_eq!(victims, vec!["unhealthy", "old-healthy"]);
    }

    #[test]
    fn cooldown_blocks_within_window_and_releases_after() {
        let now = Utc::now();
        let mut tracker = CooldownTracker::new();
        let cooldown = Duration::from_secs(60);

        assert!(tracker.allows(ScaleDirection::Out, now, cooldown));
        tracker.record(ScaleDirection::Out, now);

        assert!(!tracker.allows(ScaleDirection::Out, now + ChronoDuration::seconds(30), cooldown));
        assert!(tracker.allows(ScaleDirection::Out, now + ChronoDuration::seconds(61), cooldown));

        // Directions are independent: a scale-out does not delay a scale-in.
        assert!(tracker.allows(ScaleDirection::In, now + ChronoDuration::seconds(1), cooldown));
    }
}
