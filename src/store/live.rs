//! Thread-safe live data store.
//!
//! Three maps, each behind its own lock, so a probe writing one stream's
//! result never blocks the render loop reading another stream's plot history.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::models::{PlotHistory, TargetData};
use crate::probe::CheckResult;
use crate::registry::TargetKey;
use crate::stats::Stats;

/// Latest state for every stream, shared behind an `Arc`.
#[derive(Debug, Default)]
pub struct LiveDataStore {
    target_data: RwLock<HashMap<TargetKey, TargetData>>,
    plot_history: RwLock<HashMap<TargetKey, PlotHistory>>,
    ssl_days: RwLock<HashMap<String, i64>>,
}

impl LiveDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    // --- Target data ---

    /// Store `data` under `key`.
    ///
    /// Returns false and leaves the store untouched when the payload was
    /// produced for a different stream.
    pub fn update_target_data(&self, key: &TargetKey, data: TargetData) -> bool {
        if !data.matches(key) {
            tracing::debug!(
                "LiveDataStore: rejected data for {} tagged {}/{}",
                key,
                data.result.target_name,
                data.result.region
            );
            return false;
        }

        write(&self.target_data).insert(key.clone(), data);
        true
    }

    pub fn get_target_data(&self, key: &TargetKey) -> Option<TargetData> {
        read(&self.target_data).get(key).cloned()
    }

    pub fn current_stats(&self, key: &TargetKey) -> Option<Stats> {
        read(&self.target_data).get(key).map(|d| d.stats.clone())
    }

    /// Keys that have published at least one result.
    pub fn keys_present(&self) -> Vec<TargetKey> {
        let mut keys: Vec<TargetKey> = read(&self.target_data).keys().cloned().collect();
        keys.sort();
        keys
    }

    // --- Plot history ---

    pub fn update_plot_history(&self, key: &TargetKey, result: &CheckResult, width: u16) {
        write(&self.plot_history)
            .entry(key.clone())
            .or_default()
            .push(result, width);
    }

    pub fn get_plot_history(&self, key: &TargetKey) -> Option<PlotHistory> {
        read(&self.plot_history).get(key).cloned()
    }

    /// Re-trim every history after the terminal changed width.
    pub fn resize_plot_histories(&self, width: u16) {
        for history in write(&self.plot_history).values_mut() {
            history.trim(width);
        }
    }

    // --- SSL ---

    /// Record certificate expiry for `url`; negative values mean unknown.
    pub fn update_ssl_days(&self, url: &str, days: i64) {
        let mut ssl = write(&self.ssl_days);
        if days < 0 {
            ssl.remove(url);
        } else {
            ssl.insert(url.to_string(), days);
        }
    }

    pub fn ssl_days(&self, url: &str) -> Option<i64> {
        read(&self.ssl_days).get(url).copied()
    }
}

// A panicking writer cannot leave these maps half-updated, so poisoning is ignored.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TargetSpec;
    use std::sync::Arc;
    use std::time::Duration;

    fn data_for(key: &TargetKey, ms: u64) -> TargetData {
        let mut result = CheckResult::for_key(key);
        result.success = true;
        result.latency = Duration::from_millis(ms);
        TargetData {
            key: key.clone(),
            spec: TargetSpec::new(key.target_name(), "https://example.com"),
            result,
            stats: Stats {
                count: 1,
                ..Stats::default()
            },
        }
    }

    #[test]
    fn test_update_and_read_back() {
        let store = LiveDataStore::new();
        let key = TargetKey::local("web");

        assert!(store.update_target_data(&key, data_for(&key, 20)));
        let data = store.get_target_data(&key).unwrap();
        assert_eq!(data.result.latency, Duration::from_millis(20));
        assert_eq!(store.current_stats(&key).unwrap().count, 1);
        assert_eq!(store.keys_present(), vec![key]);
    }

    #[test]
    fn test_mismatched_region_is_rejected() {
        let store = LiveDataStore::new();
        let key = TargetKey::regional("api", "us-east-1");
        let other = TargetKey::regional("api", "eu-west-1");

        // Payload tagged with a different region, filed under `key`.
        let mut data = data_for(&key, 10);
        data.result.stamp(&other);

        assert!(!store.update_target_data(&key, data));
        assert!(store.get_target_data(&key).is_none());
        assert!(store.keys_present().is_empty());
    }

    #[test]
    fn test_mismatched_key_is_rejected() {
        let store = LiveDataStore::new();
        let key = TargetKey::local("api");
        let data = data_for(&TargetKey::local("web"), 10);

        assert!(!store.update_target_data(&key, data));
        assert!(store.get_target_data(&key).is_none());
    }

    #[test]
    fn test_reads_are_copies() {
        let store = LiveDataStore::new();
        let key = TargetKey::local("web");
        store.update_target_data(&key, data_for(&key, 20));

        let mut copy = store.get_target_data(&key).unwrap();
        copy.result.latency = Duration::from_secs(9);
        assert_eq!(
            store.get_target_data(&key).unwrap().result.latency,
            Duration::from_millis(20)
        );
    }

    #[test]
    fn test_plot_history_resize() {
        let store = LiveDataStore::new();
        let key = TargetKey::local("web");
        let result = data_for(&key, 5).result;

        for _ in 0..30 {
            store.update_plot_history(&key, &result, 40);
        }
        assert_eq!(store.get_plot_history(&key).unwrap().len(), 20);

        store.resize_plot_histories(10);
        assert_eq!(store.get_plot_history(&key).unwrap().len(), 5);
    }

    #[test]
    fn test_ssl_days() {
        let store = LiveDataStore::new();
        store.update_ssl_days("https://example.com", 42);
        assert_eq!(store.ssl_days("https://example.com"), Some(42));

        store.update_ssl_days("https://example.com", -1);
        assert_eq!(store.ssl_days("https://example.com"), None);
    }

    #[test]
    fn test_concurrent_writers() {
        let store = Arc::new(LiveDataStore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let key = TargetKey::regional("api", format!("region-{}", i));
                    for ms in 0..50 {
                        let data = data_for(&key, ms);
                        store.update_plot_history(&key, &data.result, 200);
                        store.update_target_data(&key, data);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.keys_present().len(), 8);
        for key in store.keys_present() {
            let data = store.get_target_data(&key).unwrap();
            assert_eq!(data.result.latency, Duration::from_millis(49));
            assert_eq!(store.get_plot_history(&key).unwrap().len(), 50);
        }
    }
}
