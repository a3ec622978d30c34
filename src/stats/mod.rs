//! Online statistics for one monitored stream.
//!
//! [`RunningStats`] is owned by a single probe task and folds every
//! [`CheckResult`] into constant-size accumulators. [`Stats`] is the copy that
//! gets published to readers.

mod digest;

pub use digest::StreamingDigest;

use crate::probe::CheckResult;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Default TDigest compression.
pub const DEFAULT_COMPRESSION: usize = 100;

#[derive(Error, Debug, PartialEq)]
pub enum StatsError {
    #[error("digest compression must be positive, got {0}")]
    InvalidCompression(usize),
}

/// Point-in-time view of a stream's statistics. Latencies are in milliseconds.
///
/// `stddev_ms` and `p95_ms` are only defined from the second check onwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Stats {
    pub count: u64,
    pub success_count: u64,
    pub uptime_percent: f64,
    pub avg_ms: Option<f64>,
    pub min_ms: Option<f64>,
    pub max_ms: Option<f64>,
    pub stddev_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub last_ip: Option<IpAddr>,
    pub last_status: Option<u16>,
    pub is_up: bool,
    pub last_check: Option<DateTime<Utc>>,
}

/// Streaming accumulator for one (target, region) stream.
#[derive(Debug)]
pub struct RunningStats {
    process_start: Instant,
    count: u64,
    success_count: u64,
    total: Duration,
    min: Option<Duration>,
    max: Option<Duration>,
    // Welford accumulators, milliseconds
    mean_ms: f64,
    m2_ms: f64,
    digest: StreamingDigest,
    last_ip: Option<IpAddr>,
    last_status: Option<u16>,
    up_time: Duration,
    last_check: Option<Instant>,
    last_check_wall: Option<DateTime<Utc>>,
    is_up: bool,
}

impl RunningStats {
    pub fn new(process_start: Instant) -> Result<Self, StatsError> {
        Self::with_compression(process_start, DEFAULT_COMPRESSION)
    }

    pub fn with_compression(process_start: Instant, compression: usize) -> Result<Self, StatsError> {
        if compression == 0 {
            return Err(StatsError::InvalidCompression(compression));
        }

        Ok(Self {
            process_start,
            count: 0,
            success_count: 0,
            total: Duration::ZERO,
            min: None,
            max: None,
            mean_ms: 0.0,
            m2_ms: 0.0,
            digest: StreamingDigest::new(compression),
            last_ip: None,
            last_status: None,
            up_time: Duration::ZERO,
            last_check: None,
            last_check_wall: None,
            is_up: false,
        })
    }

    pub fn add_result(&mut self, result: &CheckResult) {
        self.add_result_at(result, Instant::now());
    }

    /// Fold `result` into the accumulators as if it arrived at `now`.
    pub fn add_result_at(&mut self, result: &CheckResult, now: Instant) {
        self.count += 1;

        let last = *self.last_check.get_or_insert(now);
        if self.is_up {
            self.up_time += now.saturating_duration_since(last);
        }
        self.last_check = Some(now);
        self.last_check_wall = Some(result.timestamp);
        self.is_up = result.success;

        if result.success {
            self.success_count += 1;
        }

        let latency = result.latency;
        self.total += latency;
        self.min = Some(self.min.map_or(latency, |m| m.min(latency)));
        self.max = Some(self.max.map_or(latency, |m| m.max(latency)));

        self.digest.add(latency.as_secs_f64());

        let ms = latency.as_secs_f64() * 1000.0;
        let delta = ms - self.mean_ms;
        self.mean_ms += delta / self.count as f64;
        self.m2_ms += delta * (ms - self.mean_ms);

        if result.ip.is_some() {
            self.last_ip = result.ip;
        }
        if result.status_code.is_some() {
            self.last_status = result.status_code;
        }
    }

    pub fn snapshot(&self) -> Stats {
        self.snapshot_at(Instant::now())
    }

    pub fn snapshot_at(&self, now: Instant) -> Stats {
        let defined = self.count >= 2;

        Stats {
            count: self.count,
            success_count: self.success_count,
            uptime_percent: self.uptime_percent_at(now),
            avg_ms: (self.count > 0).then(|| to_ms(self.total) / self.count as f64),
            min_ms: self.min.map(to_ms),
            max_ms: self.max.map(to_ms),
            stddev_ms: defined.then(|| (self.m2_ms / (self.count - 1) as f64).max(0.0).sqrt()),
            p95_ms: if defined {
                self.digest.quantile(0.95).map(|secs| (secs * 1000.0).max(0.0))
            } else {
                None
            },
            last_ip: self.last_ip,
            last_status: self.last_status,
            is_up: self.is_up,
            last_check: self.last_check_wall,
        }
    }

    fn uptime_percent_at(&self, now: Instant) -> f64 {
        let Some(last) = self.last_check else {
            return 0.0;
        };

        let mut up = self.up_time;
        if self.is_up {
            up += now.saturating_duration_since(last);
        }

        let elapsed = now.saturating_duration_since(self.process_start);
        if elapsed.is_zero() {
            return if self.is_up { 100.0 } else { 0.0 };
        }

        (100.0 * up.as_secs_f64() / elapsed.as_secs_f64()).clamp(0.0, 100.0)
    }
}

fn to_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TargetKey;

    fn check(success: bool, ms: u64) -> CheckResult {
        CheckResult {
            success,
            latency: Duration::from_millis(ms),
            status_code: Some(if success { 200 } else { 503 }),
            ..CheckResult::for_key(&TargetKey::local("api"))
        }
    }

    fn secs(start: Instant, s: u64) -> Instant {
        start + Duration::from_secs(s)
    }

    #[test]
    fn test_zero_compression_rejected() {
        let err = RunningStats::with_compression(Instant::now(), 0).unwrap_err();
        assert_eq!(err, StatsError::InvalidCompression(0));
    }

    #[test]
    fn test_empty_snapshot() {
        let start = Instant::now();
        let stats = RunningStats::new(start).unwrap().snapshot_at(secs(start, 1));
        assert_eq!(stats.count, 0);
        assert_eq!(stats.uptime_percent, 0.0);
        assert!(stats.avg_ms.is_none());
        assert!(stats.min_ms.is_none());
        assert!(stats.stddev_ms.is_none());
        assert!(stats.p95_ms.is_none());
    }

    #[test]
    fn test_three_successful_checks() {
        let start = Instant::now();
        let mut rs = RunningStats::new(start).unwrap();
        rs.add_result_at(&check(true, 100), start);
        rs.add_result_at(&check(true, 200), secs(start, 1));
        rs.add_result_at(&check(true, 300), secs(start, 2));

        let stats = rs.snapshot_at(secs(start, 2));
        assert_eq!(stats.count, 3);
        assert_eq!(stats.success_count, 3);
        assert!((stats.avg_ms.unwrap() - 200.0).abs() < 1e-9);
        assert!((stats.min_ms.unwrap() - 100.0).abs() < 1e-9);
        assert!((stats.max_ms.unwrap() - 300.0).abs() < 1e-9);
        assert!((stats.stddev_ms.unwrap() - 100.0).abs() < 1e-6);
        assert!((stats.uptime_percent - 100.0).abs() < 1e-9);
        assert!(stats.p95_ms.unwrap() >= 0.0);
        assert_eq!(stats.last_status, Some(200));
        assert!(stats.is_up);
    }

    #[test]
    fn test_down_then_up() {
        let start = Instant::now();
        let mut rs = RunningStats::new(start).unwrap();
        rs.add_result_at(&check(false, 50), secs(start, 1));
        rs.add_result_at(&check(true, 50), secs(start, 2));

        let stats = rs.snapshot_at(secs(start, 3));
        assert_eq!(stats.count, 2);
        assert_eq!(stats.success_count, 1);
        assert!(stats.uptime_percent > 0.0 && stats.uptime_percent < 100.0);
        assert!((stats.uptime_percent - 100.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_up_then_down_stops_accumulating() {
        let start = Instant::now();
        let mut rs = RunningStats::new(start).unwrap();
        rs.add_result_at(&check(true, 10), start);
        rs.add_result_at(&check(false, 10), secs(start, 2));

        // Two seconds up, then two seconds down.
        let stats = rs.snapshot_at(secs(start, 4));
        assert!((stats.uptime_percent - 50.0).abs() < 1e-6);
        assert!(!stats.is_up);
        assert_eq!(stats.last_status, Some(503));
    }

    #[test]
    fn test_single_check_hides_spread() {
        let start = Instant::now();
        let mut rs = RunningStats::new(start).unwrap();
        rs.add_result_at(&check(true, 120), start);

        let stats = rs.snapshot_at(start);
        assert!((stats.min_ms.unwrap() - 120.0).abs() < 1e-9);
        assert!((stats.max_ms.unwrap() - 120.0).abs() < 1e-9);
        assert!(stats.stddev_ms.is_none());
        assert!(stats.p95_ms.is_none());
        assert_eq!(stats.uptime_percent, 100.0);
    }

    #[test]
    fn test_invariants_over_mixed_sequence() {
        let start = Instant::now();
        let mut rs = RunningStats::new(start).unwrap();
        let latencies = [30u64, 5, 900, 42, 42, 17, 250, 1, 64, 128];

        for (i, ms) in latencies.iter().enumerate() {
            rs.add_result_at(&check(i % 3 != 0, *ms), secs(start, i as u64 + 1));
            let stats = rs.snapshot_at(secs(start, i as u64 + 2));

            assert!(stats.success_count <= stats.count);
            assert!((0.0..=100.0).contains(&stats.uptime_percent));
            let (min, max) = (stats.min_ms.unwrap(), stats.max_ms.unwrap());
            for seen in &latencies[..=i] {
                let seen = *seen as f64;
                assert!(min <= seen && seen <= max);
            }
            if stats.count >= 2 {
                assert!(stats.stddev_ms.unwrap() >= 0.0);
                assert!(stats.p95_ms.unwrap() >= 0.0);
            }
        }
    }
}
