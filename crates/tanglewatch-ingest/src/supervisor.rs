//! Endpoint supervisor.
//!
//! Owns the registry of upstream endpoints and keeps one worker alive per
//! endpoint. A fixed-interval scan launches a worker for every `Idle`
//! endpoint; a worker that exits (always via a transport error) puts its
//! endpoint back to `Idle`, so the next scan relaunches it. There is no
//! backoff and no permanent abandonment: a continuously failing endpoint
//! is retried at the same cadence as a healthy one, indefinitely.
//!
//! The supervisor also runs the periodic purge loop for the shared dedup
//! cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tanglewatch_core::{subscription_topics, Category};
use tracing::{debug, info, warn};

use crate::counters::CounterSink;
use crate::dedup::DedupCache;
use crate::error::Result;
use crate::transport::{validate_endpoint_uri, Subscription, Transport};
use crate::worker::StreamWorker;

/// Run state of one registered endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Not running; eligible for launch on the next scan.
    Idle,
    /// A launch is in flight (dialing, setting filters).
    Starting,
    /// The worker is receiving frames.
    Reading,
}

/// Registry of endpoints and their run state.
///
/// Internally synchronized; callers never see the lock. Endpoints are
/// never removed — a failing endpoint stays registered as `Idle` and is
/// retried forever.
#[derive(Debug, Default)]
pub struct EndpointRegistry {
    inner: Mutex<HashMap<String, RunState>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint. Idempotent: re-registering a known URI is a
    /// no-op and does not reset its run state. Returns `true` if the URI
    /// was new.
    pub fn add(&self, uri: &str) -> bool {
        let mut inner = self.inner.lock();
        if inner.contains_key(uri) {
            return false;
        }
        inner.insert(uri.to_string(), RunState::Idle);
        true
    }

    /// Endpoints currently eligible for launch.
    pub fn idle_endpoints(&self) -> Vec<String> {
        self.inner
            .lock()
            .iter()
            .filter(|(_, state)| **state == RunState::Idle)
            .map(|(uri, _)| uri.clone())
            .collect()
    }

    /// Current state of one endpoint.
    pub fn state(&self, uri: &str) -> Option<RunState> {
        self.inner.lock().get(uri).copied()
    }

    /// Transition an endpoint. Unknown URIs are ignored.
    pub fn set_state(&self, uri: &str, state: RunState) {
        if let Some(entry) = self.inner.lock().get_mut(uri) {
            *entry = state;
        }
    }

    /// Number of registered endpoints.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Endpoints currently in the `Reading` state.
    pub fn reading_count(&self) -> usize {
        self.inner
            .lock()
            .values()
            .filter(|state| **state == RunState::Reading)
            .count()
    }
}

/// Supervisor loop intervals.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// How often the scan loop looks for idle endpoints.
    pub scan_interval: Duration,
    /// How often the dedup purge runs.
    pub purge_interval: Duration,
    /// How often each worker emits its counter summary.
    pub report_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(5),
            purge_interval: Duration::from_secs(30),
            report_interval: Duration::from_secs(60),
        }
    }
}

/// Keeps one stream worker alive per registered endpoint.
pub struct Supervisor<T: Transport, C: CounterSink> {
    config: SupervisorConfig,
    transport: Arc<T>,
    cache: Arc<DedupCache>,
    counters: Arc<C>,
    registry: Arc<EndpointRegistry>,
    running: Arc<AtomicBool>,
}

impl<T: Transport, C: CounterSink> Supervisor<T, C> {
    pub fn new(
        config: SupervisorConfig,
        transport: Arc<T>,
        cache: Arc<DedupCache>,
        counters: Arc<C>,
    ) -> Self {
        Self {
            config,
            transport,
            cache,
            counters,
            registry: Arc::new(EndpointRegistry::new()),
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Register an endpoint URI. Idempotent; safe to call concurrently
    /// with the scan loop. A malformed URI is a configuration error.
    pub fn add_endpoint(&self, uri: &str) -> Result<()> {
        validate_endpoint_uri(uri)?;
        if self.registry.add(uri) {
            info!(endpoint = %uri, "endpoint registered");
        }
        Ok(())
    }

    /// The endpoint registry, for diagnostics.
    pub fn registry(&self) -> Arc<EndpointRegistry> {
        Arc::clone(&self.registry)
    }

    /// The shared run flag. Clearing it drains the scan loop, the purge
    /// loop, and every worker.
    pub fn run_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Signal all loops to stop.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Run the scan and purge loops until the run flag is cleared.
    ///
    /// Every tick, each `Idle` endpoint transitions to `Starting` and a
    /// worker task is launched for it. `Starting` and `Reading` endpoints
    /// are left untouched, so one endpoint never has two workers.
    pub async fn run(&self) {
        let purge_task = tokio::spawn(purge_loop(
            Arc::clone(&self.cache),
            Arc::clone(&self.running),
            self.config.purge_interval,
        ));

        info!(
            endpoints = self.registry.len(),
            scan_interval = ?self.config.scan_interval,
            "supervisor running"
        );

        while self.running.load(Ordering::SeqCst) {
            for uri in self.registry.idle_endpoints() {
                self.registry.set_state(&uri, RunState::Starting);
                metrics::counter!("endpoint_launches_total").increment(1);
                tokio::spawn(launch(
                    uri,
                    Arc::clone(&self.transport),
                    Arc::clone(&self.cache),
                    Arc::clone(&self.counters),
                    Arc::clone(&self.registry),
                    Arc::clone(&self.running),
                    self.config.report_interval,
                ));
            }

            metrics::gauge!("endpoint_workers_active").set(self.registry.reading_count() as f64);
            tokio::time::sleep(self.config.scan_interval).await;
        }

        purge_task.abort();
        info!("supervisor stopped");
    }
}

/// Dial one endpoint and run its worker to completion.
///
/// Any failure along the way — dial, filter setup, or a later receive
/// error inside the worker — ends with the endpoint back at `Idle`,
/// eligible for the next scan. Worker failures are never fatal to the
/// process.
async fn launch<T: Transport, C: CounterSink>(
    uri: String,
    transport: Arc<T>,
    cache: Arc<DedupCache>,
    counters: Arc<C>,
    registry: Arc<EndpointRegistry>,
    running: Arc<AtomicBool>,
    report_interval: Duration,
) {
    let mut sub = match transport.dial(&uri).await {
        Ok(sub) => sub,
        Err(e) => {
            warn!(endpoint = %uri, error = %e, "dial failed");
            metrics::counter!("transport_errors_total", "stage" => "dial").increment(1);
            registry.set_state(&uri, RunState::Idle);
            return;
        }
    };

    for topic in subscription_topics() {
        if let Err(e) = sub.set_filter(topic).await {
            warn!(endpoint = %uri, topic, error = %e, "subscription filter failed");
            metrics::counter!("transport_errors_total", "stage" => "subscribe").increment(1);
            registry.set_state(&uri, RunState::Idle);
            return;
        }
    }

    registry.set_state(&uri, RunState::Reading);
    info!(endpoint = %uri, "endpoint reading");

    let worker = StreamWorker::new(uri.clone(), cache, counters, running, report_interval);
    let stats = worker.run(sub).await;

    info!(
        endpoint = %uri,
        frames = stats.total_frames(),
        duplicates = stats.duplicates,
        dropped = stats.dropped,
        "worker exited"
    );
    registry.set_state(&uri, RunState::Idle);
}

/// Periodic dedup purge, independent of insert traffic.
async fn purge_loop(cache: Arc<DedupCache>, running: Arc<AtomicBool>, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        if !running.load(Ordering::SeqCst) {
            return;
        }

        let dropped = cache.purge();
        if dropped > 0 {
            metrics::counter!("dedup_segments_purged_total").increment(dropped as u64);
            debug!(segments = dropped, "purged dedup segments");
        }

        for category in Category::all() {
            let stats = cache.stats(category);
            metrics::gauge!("dedup_segments", "category" => category.as_str())
                .set(stats.segments as f64);
            metrics::gauge!("dedup_identifiers", "category" => category.as_str())
                .set(stats.identifiers as f64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::MemoryCounters;
    use crate::dedup::DedupConfig;
    use crate::transport::testing::{ScriptedTransport, Step};

    fn test_config() -> SupervisorConfig {
        SupervisorConfig {
            scan_interval: Duration::from_millis(10),
            purge_interval: Duration::from_secs(3600),
            report_interval: Duration::from_secs(60),
        }
    }

    fn supervisor_with(
        transport: Arc<ScriptedTransport>,
    ) -> (Arc<Supervisor<ScriptedTransport, MemoryCounters>>, Arc<MemoryCounters>) {
        let counters = Arc::new(MemoryCounters::new());
        let supervisor = Arc::new(Supervisor::new(
            test_config(),
            transport,
            Arc::new(DedupCache::new(DedupConfig::default()).unwrap()),
            Arc::clone(&counters),
        ));
        (supervisor, counters)
    }

    #[test]
    fn test_registry_add_is_idempotent() {
        let registry = EndpointRegistry::new();

        assert!(registry.add("node-a:5556"));
        assert!(!registry.add("node-a:5556"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.state("node-a:5556"), Some(RunState::Idle));
    }

    #[test]
    fn test_registry_ignores_unknown_transitions() {
        let registry = EndpointRegistry::new();
        registry.set_state("never-registered:1", RunState::Reading);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_add_endpoint_rejects_bad_uri() {
        let (supervisor, _) = supervisor_with(Arc::new(ScriptedTransport::always_failing()));
        assert!(supervisor.add_endpoint("no-port").is_err());
        assert!(supervisor.registry().is_empty());
    }

    #[tokio::test]
    async fn test_failing_endpoint_is_retried_every_tick() {
        let transport = Arc::new(ScriptedTransport::always_failing());
        let (supervisor, _) = supervisor_with(Arc::clone(&transport));
        supervisor.add_endpoint("node-a:5556").unwrap();

        let handle = tokio::spawn({
            let supervisor = Arc::clone(&supervisor);
            async move { supervisor.run().await }
        });

        tokio::time::sleep(Duration::from_millis(80)).await;
        supervisor.shutdown();
        handle.await.unwrap();

        // Several scan ticks elapsed; each one redialed the endpoint
        assert!(transport.dial_count() >= 2, "dials: {}", transport.dial_count());
        assert_eq!(
            supervisor.registry().state("node-a:5556"),
            Some(RunState::Idle)
        );
    }

    #[tokio::test]
    async fn test_worker_relaunched_after_exit_without_duplicates() {
        // First session fails after one frame; the relaunch then stays up
        let transport = Arc::new(ScriptedTransport::new(vec![
            Some(vec![Step::Frame("tx HASH9A ADDR 1"), Step::Fail("reset")]),
            Some(Vec::new()),
        ]));
        let (supervisor, counters) = supervisor_with(Arc::clone(&transport));
        supervisor.add_endpoint("node-a:5556").unwrap();

        let handle = tokio::spawn({
            let supervisor = Arc::clone(&supervisor);
            async move { supervisor.run().await }
        });

        tokio::time::sleep(Duration::from_millis(150)).await;

        // Exactly two launches: the original and one relaunch. The live
        // worker's Reading state shields it from further scans.
        assert_eq!(transport.dial_count(), 2);
        assert_eq!(
            supervisor.registry().state("node-a:5556"),
            Some(RunState::Reading)
        );
        assert_eq!(counters.get(Category::Transaction, "node-a:5556"), 1);

        supervisor.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_workers_subscribe_all_topics() {
        let transport = Arc::new(ScriptedTransport::new(vec![Some(Vec::new())]));
        let (supervisor, _) = supervisor_with(Arc::clone(&transport));
        supervisor.add_endpoint("node-a:5556").unwrap();

        let handle = tokio::spawn({
            let supervisor = Arc::clone(&supervisor);
            async move { supervisor.run().await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            supervisor.registry().state("node-a:5556"),
            Some(RunState::Reading)
        );
        assert_eq!(transport.filters(), vec!["tx", "sn", "lmi"]);

        supervisor.shutdown();
        handle.await.unwrap();
    }
}
