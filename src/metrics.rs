//! Metric source integration.
//!
//! The autoscaling controller reads per-member utilization through the
//! [`MetricSource`] trait once per evaluation interval. A failed read is a
//! [`crate::error::ScaleError::MetricUnavailable`] and results in a no-op
//! cycle, never a crash.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::MetricKind;
use crate::error::{Result, ScaleError, StratoformError};

/// A single per-member metric observation.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricSample {
    /// Logical member identifier.
    pub member_id: String,
    /// Observed value (e.g., CPU percent).
    pub value: f64,
}

/// Source of scalar utilization values per group member.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Returns the latest sample for every reporting member of the group.
    ///
    /// Members without a sample are simply absent from the result; the
    /// caller decides how to treat them.
    async fn samples(&self, group: &str, metric: MetricKind) -> Result<Vec<MetricSample>>;
}

/// Metric source reading from an HTTP collector endpoint.
///
/// Expects `GET {base_url}/groups/{group}/metrics/{metric}` to return a JSON
/// array of `{"member_id": ..., "value": ...}` objects. Any transport or
/// decode failure becomes [`ScaleError::MetricUnavailable`], which the
/// controller treats as a no-op cycle.
#[derive(Debug)]
pub struct HttpMetricSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMetricSource {
    /// Creates a metric source against the given collector base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| {
                StratoformError::internal(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn unavailable(group: &str, reason: impl std::fmt::Display) -> StratoformError {
        StratoformError::Scale(ScaleError::MetricUnavailable {
            group: group.to_string(),
            reason: reason.to_string(),
        })
    }
}

#[async_trait]
impl MetricSource for HttpMetricSource {
    async fn samples(&self, group: &str, metric: MetricKind) -> Result<Vec<MetricSample>> {
        let url = format!("{}/groups/{group}/metrics/{metric}", self.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Self::unavailable(group, e))?;

        if !response.status().is_success() {
            return Err(Self::unavailable(
                group,
                format!("collector returned {}", response.status()),
            ));
        }

        response
            .json::<Vec<MetricSample>>()
            .await
            .map_err(|e| Self::unavailable(group, e))
    }
}

/// Averages samples over the given eligible member IDs.
///
/// Returns `None` when no eligible member reported a sample, which callers
/// must treat as "metric unavailable" rather than zero.
#[must_use]
pub fn average_over(samples: &[MetricSample], eligible: &[String]) -> Option<f64> {
    let values: Vec<f64> = samples
        .iter()
        .filter(|s| eligible.contains(&s.member_id))
        .map(|s| s.value)
        .collect();

    if values.is_empty() {
        return None;
    }

    #[allow(clippy::cast_precision_loss)]
    let average = values.iter().sum::<f64>() / values.len() as f64;
    Some(average)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str, value: f64) -> MetricSample {
        MetricSample {
            member_id: id.to_string(),
            value,
        }
    }

    #[test]
    fn average_ignores_ineligible_members() {
        let samples = vec![
            sample("mature-0", 50.0),
            sample("mature-1", 50.0),
            sample("fresh-0", 0.0),
            sample("fresh-1", 0.0),
        ];
        let eligible = vec![String::from("mature-0"), String::from("mature-1")];

        let avg = average_over(&samples, &eligible).unwrap();
        assert!((avg - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_eligible_set_is_unavailable() {
        let samples = vec![sample("m-0", 40.0)];
        assert!(average_over(&samples, &[]).is_none());
    }

    #[test]
    fn missing_samples_are_unavailable() {
        let eligible = vec![String::from("m-0")];
        assert!(average_over(&[], &eligible).is_none());
    }

    mod http {
        use super::super::*;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        #[tokio::test]
        async fn reads_samples_from_collector() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/groups/web-asg/metrics/cpu_utilization"))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                    {"member_id": "m-0", "value": 42.5},
                    {"member_id": "m-1", "value": 37.5},
                ])))
                .mount(&server)
                .await;

            let source = HttpMetricSource::new(server.uri()).unwrap();
            let samples = source
                .samples("web-asg", MetricKind::CpuUtilization)
                .await
                .unwrap();

            assert_eq!(samples.len(), 2);
            assert!((samples[0].value - 42.5).abs() < f64::EPSILON);
        }

        #[tokio::test]
        async fn collector_failure_is_metric_unavailable() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(500))
                .mount(&server)
                .await;

            let source = HttpMetricSource::new(server.uri()).unwrap();
            let err = source
                .samples("web-asg", MetricKind::CpuUtilization)
                .await
                .unwrap_err();

            assert!(matches!(
                err,
                StratoformError::Scale(ScaleError::MetricUnavailable { .. })
            ));
        }
    }
}
