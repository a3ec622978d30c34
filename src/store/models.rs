//! Store model types.

use crate::config::TargetSpec;
use crate::probe::CheckResult;
use crate::registry::TargetKey;
use crate::stats::Stats;

use serde::Serialize;
use std::collections::VecDeque;

/// Everything published for a stream after one probe completes.
#[derive(Debug, Clone, Serialize)]
pub struct TargetData {
    pub key: TargetKey,
    pub spec: TargetSpec,
    pub result: CheckResult,
    pub stats: Stats,
}

impl TargetData {
    /// True when the embedded result was produced for `key`.
    pub fn matches(&self, key: &TargetKey) -> bool {
        &self.key == key && self.result.belongs_to(key)
    }
}

/// Recent samples for a stream's sparklines.
///
/// Both series hold at most `window_for(width)` points, newest last.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlotHistory {
    /// 1.0 for a passing check, 0.0 for a failing one.
    pub uptime: VecDeque<f64>,
    /// Latency in seconds.
    pub latency: VecDeque<f64>,
}

impl PlotHistory {
    /// Number of points kept for a terminal `width` columns wide.
    pub fn window_for(width: u16) -> usize {
        usize::from(width / 2).max(1)
    }

    pub fn push(&mut self, result: &CheckResult, width: u16) {
        self.uptime.push_back(if result.success { 1.0 } else { 0.0 });
        self.latency.push_back(result.latency.as_secs_f64());
        self.trim(width);
    }

    pub fn trim(&mut self, width: u16) {
        let window = Self::window_for(width);
        while self.uptime.len() > window {
            self.uptime.pop_front();
        }
        while self.latency.len() > window {
            self.latency.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.latency.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latency.is_empty()
    }
}
