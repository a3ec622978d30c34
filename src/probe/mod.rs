//! Probe module for endpoint monitoring.
//!
//! Defines the prober boundary and the [`CheckResult`] every probe produces.
//! The scheduler only sees this module's types; how latency is measured is up
//! to the [`Prober`] implementation.

mod http;

pub use http::*;

use crate::config::TargetSpec;
use crate::registry::TargetKey;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;

/// Probe error types.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Outcome of the optional body assertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AssertionOutcome {
    NotConfigured,
    Passed,
    Failed,
}

/// Where the time of one request went. Phases a prober cannot observe stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencyBreakdown {
    pub wait: Option<Duration>,
    pub dns: Option<Duration>,
    pub tcp: Option<Duration>,
    pub ttfb: Option<Duration>,
    pub download: Option<Duration>,
}

/// Result of a single check against one stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckResult {
    pub timestamp: DateTime<Utc>,
    /// Registry name of the stream this result belongs to.
    pub target_name: String,
    pub region: String,
    pub success: bool,
    pub status_code: Option<u16>,
    pub ip: Option<IpAddr>,
    pub latency: Duration,
    pub breakdown: LatencyBreakdown,
    pub assertion: AssertionOutcome,
    pub request_headers: Option<BTreeMap<String, String>>,
    pub request_body: Option<String>,
    pub response_headers: Option<BTreeMap<String, String>>,
    pub response_body: Option<String>,
    pub error: Option<String>,
}

impl CheckResult {
    /// An empty result tagged with `key`, for probers to fill in.
    pub fn for_key(key: &TargetKey) -> Self {
        Self {
            timestamp: Utc::now(),
            target_name: key.target_name().to_string(),
            region: key.region().to_string(),
            success: false,
            status_code: None,
            ip: None,
            latency: Duration::ZERO,
            breakdown: LatencyBreakdown::default(),
            assertion: AssertionOutcome::NotConfigured,
            request_headers: None,
            request_body: None,
            response_headers: None,
            response_body: None,
            error: None,
        }
    }

    /// Result for a probe that did not complete.
    ///
    /// A target configured with `should_fail` counts the failure as a pass.
    pub fn from_error(key: &TargetKey, spec: &TargetSpec, err: &ProbeError, latency: Duration) -> Self {
        Self {
            success: spec.should_fail,
            latency,
            error: Some(err.to_string()),
            ..Self::for_key(key)
        }
    }

    /// Overwrite the stream identity with `key`.
    pub fn stamp(&mut self, key: &TargetKey) {
        self.target_name = key.target_name().to_string();
        self.region = key.region().to_string();
    }

    pub fn belongs_to(&self, key: &TargetKey) -> bool {
        self.target_name == key.target_name() && self.region == key.region()
    }

    pub fn latency_ms(&self) -> f64 {
        self.latency.as_secs_f64() * 1000.0
    }
}

/// Something that can check a target once.
///
/// Implementations should honour `spec.timeout()` themselves; the scheduler
/// also enforces it as an outer bound.
pub trait Prober: Send + Sync + 'static {
    fn probe(
        &self,
        key: &TargetKey,
        spec: &TargetSpec,
    ) -> impl Future<Output = Result<CheckResult, ProbeError>> + Send;
}

/// Certificate expiry lookup for HTTPS targets.
pub trait SslLookup: Send + Sync + 'static {
    /// Days until the certificate served at `url` expires, `None` if unknown.
    fn days_until_expiry(&self, url: &str) -> impl Future<Output = Option<i64>> + Send;
}

/// Lookup used when no certificate inspection backend is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableSslLookup;

impl SslLookup for UnavailableSslLookup {
    async fn days_until_expiry(&self, url: &str) -> Option<i64> {
        tracing::debug!("SSL lookup unavailable for {}", url);
        None
    }
}

/// Run one probe under the target's timeout and always produce a result.
pub async fn run_probe<P: Prober>(prober: &P, key: &TargetKey, spec: &TargetSpec) -> CheckResult {
    let timeout = spec.timeout();
    let started = std::time::Instant::now();

    let outcome = match tokio::time::timeout(timeout, prober.probe(key, spec)).await {
        Ok(result) => result,
        Err(_) => Err(ProbeError::Timeout(timeout)),
    };

    let mut result = match outcome {
        Ok(result) => result,
        Err(e) => {
            tracing::debug!("Probe failed for {}: {}", key, e);
            CheckResult::from_error(key, spec, &e, started.elapsed())
        }
    };

    // The prober may not know the registry name.
    result.stamp(key);
    result
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedProber;
    use super::*;

    fn spec() -> TargetSpec {
        let mut spec = TargetSpec::new("api", "http://127.0.0.1:9");
        spec.timeout_secs = 0.05;
        spec
    }

    #[tokio::test]
    async fn test_run_probe_stamps_key() {
        let prober = ScriptedProber::new(vec![Ok(Duration::from_millis(5))]);
        let key = TargetKey::regional("api", "eu-west-1");
        let result = run_probe(&prober, &key, &spec()).await;

        assert!(result.success);
        assert!(result.belongs_to(&key));
        assert_eq!(result.latency, Duration::from_millis(5));
    }

    #[tokio::test]
    async fn test_run_probe_converts_errors() {
        let prober = ScriptedProber::new(vec![Err(ProbeError::Network("refused".to_string()))]);
        let key = TargetKey::local("api");
        let result = run_probe(&prober, &key, &spec()).await;

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("network error: refused"));
    }

    #[tokio::test]
    async fn test_run_probe_enforces_timeout() {
        let mut prober = ScriptedProber::new(vec![Ok(Duration::from_millis(1))]);
        prober.delay = Duration::from_secs(5);
        let key = TargetKey::local("api");
        let result = run_probe(&prober, &key, &spec()).await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_should_fail_inverts_errors() {
        let prober = ScriptedProber::new(vec![Err(ProbeError::Network("refused".to_string()))]);
        let key = TargetKey::local("api");
        let mut spec = spec();
        spec.should_fail = true;

        let result = run_probe(&prober, &key, &spec).await;
        assert!(result.success);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_unavailable_ssl_lookup() {
        assert_eq!(UnavailableSslLookup.days_until_expiry("https://example.com").await, None);
    }
}
