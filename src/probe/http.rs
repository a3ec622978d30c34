//! HTTP probe implementation.

use std::collections::BTreeMap;
use std::time::Instant;

use reqwest::redirect::Policy;
use reqwest::Method;

use super::{AssertionOutcome, CheckResult, ProbeError, Prober};
use crate::config::TargetSpec;
use crate::registry::TargetKey;

/// Maximum redirects followed when a target allows them.
const MAX_REDIRECTS: usize = 10;

/// Probes targets with a plain HTTP request from this host.
///
/// Regional streams are probed from here as well; running the request inside
/// a region is the job of a region-aware [`Prober`].
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpProber;

impl Prober for HttpProber {
    async fn probe(&self, key: &TargetKey, spec: &TargetSpec) -> Result<CheckResult, ProbeError> {
        run_http_probe(key, spec).await
    }
}

/// Run an HTTP probe against the target's URL.
pub async fn run_http_probe(key: &TargetKey, spec: &TargetSpec) -> Result<CheckResult, ProbeError> {
    let timeout = spec.timeout();
    let redirect = if spec.follow_redirects {
        Policy::limited(MAX_REDIRECTS)
    } else {
        Policy::none()
    };

    let client = reqwest::Client::builder()
        .timeout(timeout)
        .redirect(redirect)
        .danger_accept_invalid_certs(spec.skip_ssl_verify)
        .build()
        .map_err(|e| ProbeError::Network(e.to_string()))?;

    let method = Method::from_bytes(spec.method.as_bytes())
        .map_err(|_| ProbeError::Config(format!("unsupported method {:?}", spec.method)))?;

    let mut request = client.request(method, &spec.url);
    for (name, value) in &spec.headers {
        request = request.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &spec.body {
        request = request.body(body.clone());
    }

    let start = Instant::now();

    let response = request.send().await.map_err(|e| map_reqwest_error(e, spec))?;
    let ttfb = start.elapsed();

    let status = response.status();
    let ip = response.remote_addr().map(|addr| addr.ip());
    let response_headers = spec.capture.then(|| header_map(response.headers()));

    // Read the full body to measure complete transfer time
    let body = response.text().await.map_err(|e| map_reqwest_error(e, spec))?;
    let latency = start.elapsed();

    let assertion = match &spec.assert_text {
        Some(text) if body.contains(text.as_str()) => AssertionOutcome::Passed,
        Some(_) => AssertionOutcome::Failed,
        None => AssertionOutcome::NotConfigured,
    };

    let status_ok = status.is_success() || (!spec.follow_redirects && status.is_redirection());
    let passed = status_ok && assertion != AssertionOutcome::Failed;

    let mut result = CheckResult::for_key(key);
    result.success = passed != spec.should_fail;
    result.status_code = Some(status.as_u16());
    result.ip = ip;
    result.latency = latency;
    result.breakdown.ttfb = Some(ttfb);
    result.breakdown.download = Some(latency.saturating_sub(ttfb));
    result.assertion = assertion;

    if !status_ok {
        result.error = Some(format!("unexpected status {}", status));
    } else if assertion == AssertionOutcome::Failed {
        result.error = Some("response body did not contain the asserted text".to_string());
    }

    if spec.capture {
        result.request_headers = Some(spec.headers.clone());
        result.request_body = spec.body.clone();
        result.response_headers = response_headers;
        result.response_body = Some(body);
    }

    Ok(result)
}

fn map_reqwest_error(e: reqwest::Error, spec: &TargetSpec) -> ProbeError {
    if e.is_timeout() {
        ProbeError::Timeout(spec.timeout())
    } else if e.is_builder() {
        ProbeError::Config(e.to_string())
    } else {
        ProbeError::Network(e.to_string())
    }
}

fn header_map(headers: &reqwest::header::HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let value = value.to_str().unwrap_or("<binary>").to_string();
            (name.as_str().to_string(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_http_probe_invalid_url() {
        let mut spec = TargetSpec::new("bad", "http://256.256.256.256");
        spec.timeout_secs = 0.1;
        let result = run_http_probe(&TargetKey::local("bad"), &spec).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_http_probe_invalid_method() {
        let mut spec = TargetSpec::new("bad", "http://127.0.0.1:9");
        spec.method = "NOT A METHOD".to_string();
        let err = run_http_probe(&TargetKey::local("bad"), &spec).await.unwrap_err();
        assert!(matches!(err, ProbeError::Config(_)));
    }
}
