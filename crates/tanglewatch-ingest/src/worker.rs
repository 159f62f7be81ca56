//! Per-endpoint stream worker.
//!
//! A worker owns one open subscription and runs until the transport
//! reports an error. Each received frame is classified against the static
//! tag table; recognized frames update the dedup cache and the counter
//! sink, unrecognized or truncated ones are dropped silently. There is no
//! per-frame retry: the supervisor redials the endpoint after the worker
//! exits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tanglewatch_core::{classify, Category, CATEGORY_COUNT};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::counters::CounterSink;
use crate::dedup::DedupCache;
use crate::transport::Subscription;

/// How long a single `recv` may block before the shutdown flag is polled.
const RECV_POLL: Duration = Duration::from_secs(1);

/// Totals accumulated over one worker's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Classified frames, per category (indexed by [`Category::index`]).
    pub frames: [u64; CATEGORY_COUNT],
    /// Frames dropped for an unrecognized or truncated tag.
    pub dropped: u64,
    /// Classified frames whose identifier was already in the cache.
    pub duplicates: u64,
}

impl WorkerStats {
    pub fn total_frames(&self) -> u64 {
        self.frames.iter().sum()
    }
}

/// One endpoint's receive loop.
pub struct StreamWorker<C: CounterSink> {
    endpoint: String,
    cache: Arc<DedupCache>,
    counters: Arc<C>,
    running: Arc<AtomicBool>,
    report_interval: Duration,
}

impl<C: CounterSink> StreamWorker<C> {
    pub fn new(
        endpoint: String,
        cache: Arc<DedupCache>,
        counters: Arc<C>,
        running: Arc<AtomicBool>,
        report_interval: Duration,
    ) -> Self {
        Self {
            endpoint,
            cache,
            counters,
            running,
            report_interval,
        }
    }

    /// Run until the transport fails or the run flag is cleared.
    ///
    /// The subscription is released on return; the caller reports the
    /// endpoint as no longer running.
    pub async fn run<S: Subscription>(self, mut sub: S) -> WorkerStats {
        let mut stats = WorkerStats::default();
        let mut delta = [0u64; CATEGORY_COUNT];
        let mut last_report = Instant::now();

        while self.running.load(Ordering::SeqCst) {
            let frame = match timeout(RECV_POLL, sub.recv()).await {
                // Timeout: nothing arrived, poll the run flag again
                Err(_) => {
                    self.maybe_report(&stats, &mut delta, &mut last_report);
                    continue;
                }
                Ok(Err(e)) => {
                    warn!(endpoint = %self.endpoint, error = %e, "receive failed, worker exiting");
                    metrics::counter!("transport_errors_total", "stage" => "recv").increment(1);
                    break;
                }
                Ok(Ok(frame)) => frame,
            };

            match classify(&frame) {
                None => {
                    stats.dropped += 1;
                    metrics::counter!("feed_frames_dropped_total").increment(1);
                    debug!(endpoint = %self.endpoint, frame = %frame, "unrecognized frame dropped");
                }
                Some(classified) => {
                    if let Some(id) = classified.id {
                        if self.cache.seen(classified.category, id) {
                            stats.duplicates += 1;
                            metrics::counter!(
                                "feed_duplicates_total",
                                "category" => classified.category.as_str(),
                            )
                            .increment(1);
                        }
                    }

                    // The counter increments for every classified frame;
                    // the dedup result feeds the duplicates metric only.
                    self.counters.increment(classified.category, &self.endpoint);
                    metrics::counter!(
                        "feed_frames_total",
                        "category" => classified.category.as_str(),
                        "endpoint" => self.endpoint.clone(),
                    )
                    .increment(1);

                    stats.frames[classified.category.index()] += 1;
                    delta[classified.category.index()] += 1;
                }
            }

            self.maybe_report(&stats, &mut delta, &mut last_report);
        }

        stats
    }

    /// Emit the periodic cumulative/delta summary when the interval is up.
    fn maybe_report(
        &self,
        stats: &WorkerStats,
        delta: &mut [u64; CATEGORY_COUNT],
        last_report: &mut Instant,
    ) {
        if last_report.elapsed() < self.report_interval {
            return;
        }

        info!(
            endpoint = %self.endpoint,
            tx = stats.frames[Category::Transaction.index()],
            tx_delta = delta[Category::Transaction.index()],
            sn = stats.frames[Category::Confirmation.index()],
            sn_delta = delta[Category::Confirmation.index()],
            lmi = stats.frames[Category::Milestone.index()],
            lmi_delta = delta[Category::Milestone.index()],
            duplicates = stats.duplicates,
            dropped = stats.dropped,
            "endpoint counters"
        );

        *delta = [0; CATEGORY_COUNT];
        *last_report = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::MemoryCounters;
    use crate::dedup::DedupConfig;
    use crate::transport::testing::{ScriptedSubscription, ScriptedTransport, Step};
    use crate::transport::Transport;

    fn worker_parts() -> (Arc<DedupCache>, Arc<MemoryCounters>, Arc<AtomicBool>) {
        (
            Arc::new(DedupCache::new(DedupConfig::default()).unwrap()),
            Arc::new(MemoryCounters::new()),
            Arc::new(AtomicBool::new(true)),
        )
    }

    async fn scripted_sub(steps: Vec<Step>) -> ScriptedSubscription {
        ScriptedTransport::new(vec![Some(steps)])
            .dial("node:5556")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_worker_classifies_counts_and_dedups() {
        let (cache, counters, running) = worker_parts();

        let sub = scripted_sub(vec![
            Step::Frame("tx HASH9A ADDR 1"),
            Step::Frame("tx HASH9A ADDR 1"), // duplicate identifier
            Step::Frame("sn 42 HASH9B ADDR"),
            Step::Frame("mctn 17"), // unrecognized tag
            Step::Frame("lmi 41 42"),
            Step::Fail("connection reset"),
        ])
        .await;

        let worker = StreamWorker::new(
            "node:5556".to_string(),
            Arc::clone(&cache),
            Arc::clone(&counters),
            running,
            Duration::from_secs(60),
        );
        let stats = worker.run(sub).await;

        // Counters increment for every classified frame, duplicates included
        assert_eq!(counters.get(Category::Transaction, "node:5556"), 2);
        assert_eq!(counters.get(Category::Confirmation, "node:5556"), 1);
        assert_eq!(counters.get(Category::Milestone, "node:5556"), 1);

        assert_eq!(stats.total_frames(), 4);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.dropped, 1);
    }

    #[tokio::test]
    async fn test_worker_exits_on_transport_error() {
        let (cache, counters, running) = worker_parts();

        let sub = scripted_sub(vec![Step::Fail("connection reset")]).await;
        let worker = StreamWorker::new(
            "node:5556".to_string(),
            cache,
            counters,
            running,
            Duration::from_secs(60),
        );

        let stats = worker.run(sub).await;
        assert_eq!(stats.total_frames(), 0);
    }

    #[tokio::test]
    async fn test_worker_honors_shutdown_flag() {
        let (cache, counters, running) = worker_parts();
        running.store(false, Ordering::SeqCst);

        // No steps: recv would pend forever if the flag were ignored
        let sub = scripted_sub(Vec::new()).await;
        let worker = StreamWorker::new(
            "node:5556".to_string(),
            cache,
            counters,
            running,
            Duration::from_secs(60),
        );

        let stats = worker.run(sub).await;
        assert_eq!(stats.total_frames(), 0);
    }

    #[tokio::test]
    async fn test_duplicates_shared_across_workers() {
        let (cache, counters, running) = worker_parts();

        // Two endpoints deliver the same transaction
        let sub_a = scripted_sub(vec![
            Step::Frame("tx HASH9A ADDR 1"),
            Step::Fail("done"),
        ])
        .await;
        let sub_b = scripted_sub(vec![
            Step::Frame("tx HASH9A ADDR 1"),
            Step::Fail("done"),
        ])
        .await;

        let stats_a = StreamWorker::new(
            "node-a:5556".to_string(),
            Arc::clone(&cache),
            Arc::clone(&counters),
            Arc::clone(&running),
            Duration::from_secs(60),
        )
        .run(sub_a)
        .await;

        let stats_b = StreamWorker::new(
            "node-b:5556".to_string(),
            Arc::clone(&cache),
            Arc::clone(&counters),
            running,
            Duration::from_secs(60),
        )
        .run(sub_b)
        .await;

        assert_eq!(stats_a.duplicates, 0);
        assert_eq!(stats_b.duplicates, 1);

        // Both endpoints still counted the frame (observed behavior)
        assert_eq!(counters.get(Category::Transaction, "node-a:5556"), 1);
        assert_eq!(counters.get(Category::Transaction, "node-b:5556"), 1);
    }
}
