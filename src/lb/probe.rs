//! HTTP instance probing.
//!
//! This module provides direct instance health probing over HTTP, used when
//! load-balancer target health is not available or as a second opinion
//! during replacement waits.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use crate::error::{Result, StratoformError};

use super::{HealthSignal, HealthSource, SignalSource};

/// Default probe timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default connection timeout in seconds.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// HTTP prober for instance endpoints.
#[derive(Debug)]
pub struct HttpProber {
    /// HTTP client for probes.
    client: Client,
    /// Path probed on each instance.
    path: String,
}

impl HttpProber {
    /// Creates a new prober for the given health path.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(path: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                StratoformError::internal(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            path: path.into(),
        })
    }

    /// Probes a single member endpoint.
    pub async fn probe(&self, member_id: &str, base_url: &str) -> HealthSignal {
        let url = format!("{base_url}{}", self.path);
        debug!("Probing member {member_id} at {url}");

        let healthy = match self.client.get(&url).send().await {
            Ok(response) => {
                let status = response.status();
                if !status.is_success() {
                    debug!("Probe of {url} returned status {status}");
                }
                status.is_success()
            }
            Err(e) => {
                warn!("Probe failed for {url}: {e}");
                false
            }
        };

        HealthSignal {
            member_id: member_id.to_string(),
            healthy,
            source: SignalSource::InstanceProbe,
        }
    }
}

/// A fixed set of probe targets implementing [`HealthSource`].
///
/// Maps logical member IDs to base URLs; the group argument is ignored
/// because the mapping is already scoped to one group.
#[derive(Debug)]
pub struct ProbeSet {
    prober: HttpProber,
    targets: HashMap<String, String>,
}

impl ProbeSet {
    /// Creates a probe set over the given member -> base URL mapping.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be created.
    pub fn new(path: impl Into<String>, targets: HashMap<String, String>) -> Result<Self> {
        Ok(Self {
            prober: HttpProber::new(path)?,
            targets,
        })
    }
}

#[async_trait]
impl HealthSource for ProbeSet {
    async fn member_health(&self, _group: &str) -> Result<Vec<HealthSignal>> {
        let mut signals = Vec::with_capacity(self.targets.len());
        for (member_id, base_url) in &self.targets {
            signals.push(self.prober.probe(member_id, base_url).await);
        }
        Ok(signals)
    }
}

/// Target-health row as reported by the balancer's admin endpoint.
#[derive(Debug, serde::Deserialize)]
struct TargetHealthRow {
    member_id: String,
    healthy: bool,
}

/// Health source reading load-balancer target health over HTTP.
///
/// Expects `GET {base_url}/groups/{group}/health` to return a JSON array of
/// `{"member_id": ..., "healthy": ...}` objects.
#[derive(Debug)]
pub struct HttpHealthSource {
    client: Client,
    base_url: String,
}

impl HttpHealthSource {
    /// Creates a health source against the balancer's admin base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                StratoformError::internal(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl HealthSource for HttpHealthSource {
    async fn member_health(&self, group: &str) -> Result<Vec<HealthSignal>> {
        let url = format!("{}/groups/{group}/health", self.base_url);

        let rows: Vec<TargetHealthRow> = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| StratoformError::internal(format!("health endpoint unreachable: {e}")))?
            .error_for_status()
            .map_err(|e| StratoformError::internal(format!("health endpoint error: {e}")))?
            .json()
            .await
            .map_err(|e| StratoformError::internal(format!("invalid health payload: {e}")))?;

        Ok(rows
            .into_iter()
            .map(|row| HealthSignal {
                member_id: row.member_id,
                healthy: row.healthy,
                source: SignalSource::LoadBalancer,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn healthy_endpoint_reports_healthy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let prober = HttpProber::new("/health").unwrap();
        let signal = prober.probe("web-asg-0", &server.uri()).await;

        assert!(signal.healthy);
        assert_eq!(signal.source, SignalSource::InstanceProbe);
    }

    #[tokio::test]
    async fn failing_endpoint_reports_unhealthy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let prober = HttpProber::new("/health").unwrap();
        let signal = prober.probe("web-asg-0", &server.uri()).await;

        assert!(!signal.healthy);
    }

    #[tokio::test]
    async fn http_health_source_maps_target_rows() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/groups/web-asg/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"member_id": "m-0", "healthy": true},
                {"member_id": "m-1", "healthy": false},
            ])))
            .mount(&server)
            .await;

        let source = HttpHealthSource::new(server.uri()).unwrap();
        let signals = source.member_health("web-asg").await.unwrap();

        assert_eq!(signals.len(), 2);
        assert!(signals[0].healthy);
        assert!(!signals[1].healthy);
        assert_eq!(signals[0].source, SignalSource::LoadBalancer);
    }

    #[tokio::test]
    async fn probe_set_covers_all_targets() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let mut targets = HashMap::new();
        targets.insert(String::from("m-0"), server.uri());
        targets.insert(String::from("m-1"), server.uri());

        let set = ProbeSet::new("/health", targets).unwrap();
        let signals = set.member_health("web-asg").await.unwrap();

        assert_eq!(signals.len(), 2);
        assert!(signals.iter().all(|s| s.healthy));
    }
}
