//! Scheduler module for running probes.
//!
//! Every stream gets its own task that probes on the target's interval, folds
//! the result into the task-owned [`RunningStats`] and dispatches it on the
//! [`EventBus`]. Tasks share nothing but the bus and the stop signal.

use crate::config::TargetSpec;
use crate::events::{Event, EventBus};
use crate::probe::{run_probe, Prober, SslLookup};
use crate::registry::{Registry, TargetKey};
use crate::stats::{RunningStats, StatsError};
use crate::store::TargetData;

use std::collections::HashSet;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

/// Upper bound for the random delay before a stream's first probe.
const MAX_START_JITTER_MS: u64 = 100;

/// Runs one probe loop per registry key.
pub struct ProbeScheduler {
    registry: Arc<Registry>,
    bus: Arc<EventBus>,
    terminal_width: Arc<AtomicU16>,
    stop_tx: broadcast::Sender<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    process_start: Instant,
}

impl ProbeScheduler {
    /// Create a scheduler. `terminal_width` is read on every publish to size plot history.
    pub fn new(registry: Arc<Registry>, bus: Arc<EventBus>, terminal_width: Arc<AtomicU16>) -> Self {
        let (stop_tx, _) = broadcast::channel(1);
        Self {
            registry,
            bus,
            terminal_width,
            stop_tx,
            handles: Mutex::new(Vec::new()),
            process_start: Instant::now(),
        }
    }

    /// Start monitoring every stream in the registry.
    ///
    /// All statistics engines are built before the first task is spawned, so a
    /// construction failure leaves nothing running.
    pub async fn start<P: Prober>(&self, prober: Arc<P>) -> Result<(), StatsError> {
        let mut streams = Vec::with_capacity(self.registry.len());
        for entry in self.registry.entries() {
            let stats = RunningStats::new(self.process_start)?;
            streams.push((entry.key.clone(), entry.spec.clone(), stats));
        }

        tracing::info!("Starting scheduler with {} streams", streams.len());

        let mut handles = self.handles.lock().await;
        for (key, spec, stats) in streams {
            tracing::info!("Scheduler: Adding stream {} every {:?}", key, spec.interval());

            let task = ProbeTask {
                key,
                spec,
                stats,
                bus: self.bus.clone(),
                terminal_width: self.terminal_width.clone(),
            };
            let prober = prober.clone();
            let stop_rx = self.stop_tx.subscribe();

            handles.push(tokio::spawn(async move {
                task.run(prober, stop_rx).await;
            }));
        }

        Ok(())
    }

    /// Number of probe tasks started and not yet shut down.
    pub async fn task_count(&self) -> usize {
        self.handles.lock().await.len()
    }

    /// Signal every task to stop and wait for them, aborting any still running after `grace`.
    pub async fn shutdown(&self, grace: Duration) {
        let _ = self.stop_tx.send(());

        let handles = std::mem::take(&mut *self.handles.lock().await);
        let deadline = tokio::time::Instant::now() + grace;
        let mut aborted = 0;

        for mut handle in handles {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                handle.abort();
                aborted += 1;
            }
        }

        if aborted > 0 {
            tracing::warn!("Scheduler: aborted {} probe tasks after {:?}", aborted, grace);
        } else {
            tracing::info!("Scheduler: all probe tasks stopped");
        }
    }
}

/// State owned by a single stream's loop.
struct ProbeTask {
    key: TargetKey,
    spec: TargetSpec,
    stats: RunningStats,
    bus: Arc<EventBus>,
    terminal_width: Arc<AtomicU16>,
}

impl ProbeTask {
    async fn run<P: Prober>(mut self, prober: Arc<P>, mut stop_rx: broadcast::Receiver<()>) {
        // Add jitter to avoid thundering herd
        let jitter = Duration::from_millis(rand::random::<u64>() % MAX_START_JITTER_MS);
        tokio::select! {
            _ = stop_rx.recv() => return,
            _ = tokio::time::sleep(jitter) => {}
        }

        let mut interval = tokio::time::interval(self.spec.interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            if stop_requested(&mut stop_rx) {
                break;
            }

            tokio::select! {
                _ = stop_rx.recv() => break,
                _ = interval.tick() => {}
            }

            let result = tokio::select! {
                _ = stop_rx.recv() => break,
                result = run_probe(prober.as_ref(), &self.key, &self.spec) => result,
            };

            if !result.success {
                tracing::debug!(
                    "Check failed for {}: {}",
                    self.key,
                    result.error.as_deref().unwrap_or("unsuccessful response")
                );
            }

            self.stats.add_result(&result);
            let data = TargetData {
                key: self.key.clone(),
                spec: self.spec.clone(),
                result,
                stats: self.stats.snapshot(),
            };

            self.bus.dispatch(&Event::TargetDataUpdated {
                key: self.key.clone(),
                data,
                terminal_width: self.terminal_width.load(Ordering::Relaxed),
            });
        }

        tracing::debug!("Scheduler: stream {} stopped", self.key);
    }
}

fn stop_requested(stop_rx: &mut broadcast::Receiver<()>) -> bool {
    !matches!(
        stop_rx.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    )
}

/// Look up certificate expiry once for every distinct HTTPS url in the registry.
pub async fn lookup_ssl_expiry<L: SslLookup>(lookup: &L, registry: &Registry, bus: &EventBus) {
    let mut seen = HashSet::new();

    for entry in registry.entries() {
        let spec = &entry.spec;
        if !spec.is_https() || !seen.insert(spec.url.clone()) {
            continue;
        }

        let days_remaining = lookup.days_until_expiry(&spec.url).await;
        match days_remaining {
            Some(days) => tracing::info!("Certificate for {} expires in {} days", spec.url, days),
            None => tracing::debug!("Certificate expiry unknown for {}", spec.url),
        }

        bus.dispatch(&Event::SslDataUpdated {
            url: spec.url.clone(),
            days_remaining,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventHandler;
    use crate::probe::testing::ScriptedProber;
    use crate::probe::{CheckResult, ProbeError};
    use crate::store::LiveDataStore;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    /// Records the check count of every published snapshot per stream.
    #[derive(Default)]
    struct CountRecorder {
        counts: StdMutex<HashMap<TargetKey, Vec<u64>>>,
        ssl: StdMutex<Vec<String>>,
    }

    impl EventHandler for CountRecorder {
        fn handle(&self, event: &Event) {
            match event {
                Event::TargetDataUpdated { key, data, .. } => {
                    self.counts
                        .lock()
                        .unwrap()
                        .entry(key.clone())
                        .or_default()
                        .push(data.stats.count);
                }
                Event::SslDataUpdated { url, .. } => self.ssl.lock().unwrap().push(url.clone()),
            }
        }
    }

    impl CountRecorder {
        fn total(&self) -> usize {
            self.counts.lock().unwrap().values().map(Vec::len).sum()
        }
    }

    fn registry(interval_secs: f64) -> Arc<Registry> {
        let mut api = TargetSpec::new("api", "https://api.example.com");
        api.interval_secs = interval_secs;
        api.regions = vec!["us-east-1".to_string(), "eu-west-1".to_string()];
        let mut web = TargetSpec::new("web", "http://web.example.com");
        web.interval_secs = interval_secs;
        Arc::new(Registry::build(&[api, web], &[]).unwrap())
    }

    async fn wait_for(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_every_stream_publishes_in_order() {
        let recorder = Arc::new(CountRecorder::default());
        let store = Arc::new(LiveDataStore::new());
        let mut bus = EventBus::new();
        bus.subscribe(store.clone());
        bus.subscribe(recorder.clone());

        let registry = registry(0.02);
        let scheduler = ProbeScheduler::new(registry.clone(), Arc::new(bus), Arc::new(AtomicU16::new(80)));
        let prober = Arc::new(ScriptedProber::new(vec![
            Ok(Duration::from_millis(3)),
            Err(ProbeError::Network("refused".to_string())),
        ]));
        scheduler.start(prober).await.unwrap();
        assert_eq!(scheduler.task_count().await, 3);

        wait_for(|| {
            let counts = recorder.counts.lock().unwrap();
            counts.len() == 3 && counts.values().all(|c| c.len() >= 3)
        })
        .await;
        scheduler.shutdown(Duration::from_secs(1)).await;

        for (key, counts) in recorder.counts.lock().unwrap().iter() {
            let expected: Vec<u64> = (1..=counts.len() as u64).collect();
            assert_eq!(counts, &expected, "out of order for {}", key);
        }
        for key in registry.all_keys() {
            let stats = store.current_stats(&key).unwrap();
            assert!(stats.success_count <= stats.count);
            assert!(store.get_plot_history(&key).unwrap().len() <= 40);
        }
    }

    #[tokio::test]
    async fn test_shutdown_stops_publishing() {
        let recorder = Arc::new(CountRecorder::default());
        let mut bus = EventBus::new();
        bus.subscribe(recorder.clone());

        let scheduler = ProbeScheduler::new(registry(0.01), Arc::new(bus), Arc::new(AtomicU16::new(80)));
        scheduler.start(Arc::new(ScriptedProber::new(vec![]))).await.unwrap();

        wait_for(|| recorder.total() >= 3).await;
        scheduler.shutdown(Duration::from_secs(1)).await;
        assert_eq!(scheduler.task_count().await, 0);

        let after_shutdown = recorder.total();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(recorder.total(), after_shutdown);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_slow_probe() {
        let bus = Arc::new(EventBus::new());
        let scheduler = ProbeScheduler::new(registry(1.0), bus, Arc::new(AtomicU16::new(80)));
        let mut prober = ScriptedProber::new(vec![Ok(Duration::from_millis(1))]);
        prober.delay = Duration::from_secs(30);
        scheduler.start(Arc::new(prober)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        let started = Instant::now();
        scheduler.shutdown(Duration::from_secs(5)).await;
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    /// Hangs on one region and answers every other stream immediately.
    struct StalledRegionProber {
        region: &'static str,
    }

    impl Prober for StalledRegionProber {
        async fn probe(&self, key: &TargetKey, _spec: &TargetSpec) -> Result<CheckResult, ProbeError> {
            if key.region() == self.region {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            Ok(CheckResult {
                success: true,
                status_code: Some(200),
                latency: Duration::from_millis(1),
                ..CheckResult::for_key(key)
            })
        }
    }

    #[tokio::test]
    async fn test_stalled_stream_does_not_delay_others() {
        let recorder = Arc::new(CountRecorder::default());
        let mut bus = EventBus::new();
        bus.subscribe(recorder.clone());

        let scheduler = ProbeScheduler::new(registry(0.02), Arc::new(bus), Arc::new(AtomicU16::new(80)));
        scheduler
            .start(Arc::new(StalledRegionProber { region: "us-east-1" }))
            .await
            .unwrap();

        let west = TargetKey::regional("api", "eu-west-1");
        let web = TargetKey::local("web");
        wait_for(|| {
            let counts = recorder.counts.lock().unwrap();
            [&west, &web]
                .iter()
                .all(|key| counts.get(*key).map_or(0, Vec::len) >= 5)
        })
        .await;

        let stalled = TargetKey::regional("api", "us-east-1");
        assert!(!recorder.counts.lock().unwrap().contains_key(&stalled));

        let started = Instant::now();
        scheduler.shutdown(Duration::from_secs(5)).await;
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    struct FixedLookup(i64);

    impl SslLookup for FixedLookup {
        async fn days_until_expiry(&self, _url: &str) -> Option<i64> {
            Some(self.0)
        }
    }

    #[tokio::test]
    async fn test_ssl_lookup_once_per_https_url() {
        let recorder = Arc::new(CountRecorder::default());
        let store = Arc::new(LiveDataStore::new());
        let mut bus = EventBus::new();
        bus.subscribe(store.clone());
        bus.subscribe(recorder.clone());

        lookup_ssl_expiry(&FixedLookup(45), &registry(1.0), &bus).await;

        assert_eq!(*recorder.ssl.lock().unwrap(), vec!["https://api.example.com".to_string()]);
        assert_eq!(store.ssl_days("https://api.example.com"), Some(45));
        assert_eq!(store.ssl_days("http://web.example.com"), None);
    }
}
