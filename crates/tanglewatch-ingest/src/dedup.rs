//! Time-windowed deduplication cache.
//!
//! Redundant upstream feeds deliver the same event several times; this
//! module answers "have I seen this identifier recently?" with bounded
//! memory. Each category owns a chain of segments ordered newest-first.
//! Only the newest segment is ever written; older segments are read-only
//! until the purge loop discards them wholesale.
//!
//! # Precision trade-off
//!
//! Eviction is coarse: whole segments are dropped, never individual
//! identifiers. After a segment is purged, identifiers it held can be
//! reported as new again. Within the retention horizon a `seen` lookup
//! never produces a false "not seen"; beyond it, detection is not
//! guaranteed.
//!
//! # Concurrency
//!
//! Each chain is guarded by its own mutex, held only across the
//! lookup-or-insert critical section. The purge loop takes the same lock
//! per chain it visits, independently of insert traffic.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tanglewatch_core::Category;

use crate::error::{Error, Result};

/// Dedup window and retention settings.
#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// Maximum age of a chain's head segment before the next insert rolls
    /// a new head.
    pub window: Duration,
    /// Maximum idle age of a segment before purge discards it. Must be
    /// greater than `window`; bounds total memory.
    pub retention: Duration,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            retention: Duration::from_secs(180),
        }
    }
}

impl DedupConfig {
    fn validate(&self) -> Result<()> {
        if self.window.is_zero() {
            return Err(Error::Config("dedup window must be non-zero".into()));
        }
        if self.retention <= self.window {
            return Err(Error::Config(format!(
                "dedup retention ({:?}) must exceed the window ({:?})",
                self.retention, self.window
            )));
        }
        Ok(())
    }
}

/// One time-bounded partition of a chain.
#[derive(Debug)]
struct Segment {
    created: Instant,
    updated: Instant,
    ids: HashSet<String>,
}

impl Segment {
    fn new(now: Instant) -> Self {
        Self {
            created: now,
            updated: now,
            ids: HashSet::new(),
        }
    }
}

/// A category's full chain, newest segment at the front.
#[derive(Debug, Default)]
struct Chain {
    segments: VecDeque<Segment>,
}

/// Diagnostic chain statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainStats {
    /// Retained segments in the chain.
    pub segments: usize,
    /// Identifiers held across all retained segments.
    pub identifiers: usize,
}

/// Per-category time-windowed deduplication cache.
///
/// Thread-safe: share via `Arc<DedupCache>` across workers and the purge
/// loop.
pub struct DedupCache {
    config: DedupConfig,
    chains: RwLock<HashMap<Category, Arc<Mutex<Chain>>>>,
}

impl DedupCache {
    /// Create a cache, validating the window/retention relationship.
    pub fn new(config: DedupConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            chains: RwLock::new(HashMap::new()),
        })
    }

    /// Check-and-record an identifier.
    ///
    /// Returns `true` if `id` is in any retained segment of `category`'s
    /// chain (no mutation). Otherwise records it in the head segment —
    /// rolling a new head first if none exists or the current head is
    /// older than the window — and returns `false`.
    pub fn seen(&self, category: Category, id: &str) -> bool {
        self.seen_at(category, id, Instant::now())
    }

    /// [`seen`](Self::seen) with an explicit timestamp, for deterministic
    /// replay and tests.
    pub fn seen_at(&self, category: Category, id: &str, now: Instant) -> bool {
        let chain = self.chain(category);
        let mut chain = chain.lock();

        // Duplicates cluster temporally, so scan newest to oldest: the
        // expected depth for a true duplicate is small.
        if chain.segments.iter().any(|segment| segment.ids.contains(id)) {
            return true;
        }

        let head_expired = match chain.segments.front() {
            None => true,
            Some(head) => now.duration_since(head.created) > self.config.window,
        };
        if head_expired {
            chain.segments.push_front(Segment::new(now));
        }
        if let Some(head) = chain.segments.front_mut() {
            head.ids.insert(id.to_string());
            head.updated = now;
        }

        false
    }

    /// Discard idle segments. Returns the number of segments dropped.
    pub fn purge(&self) -> usize {
        self.purge_at(Instant::now())
    }

    /// [`purge`](Self::purge) with an explicit timestamp.
    ///
    /// Per chain, walks newest to oldest and stops at the first segment
    /// whose idle age exceeds retention; that segment and everything older
    /// is cut off in a single truncation, without inspecting the rest.
    pub fn purge_at(&self, now: Instant) -> usize {
        let chains: Vec<Arc<Mutex<Chain>>> = self.chains.read().values().cloned().collect();

        let mut dropped = 0;
        for chain in chains {
            let mut chain = chain.lock();
            let cut = chain
                .segments
                .iter()
                .position(|segment| now.duration_since(segment.updated) > self.config.retention);
            if let Some(index) = cut {
                dropped += chain.segments.len() - index;
                chain.segments.truncate(index);
            }
        }
        dropped
    }

    /// Diagnostic read over one chain. Walks the full chain.
    pub fn stats(&self, category: Category) -> ChainStats {
        let chain = self.chains.read().get(&category).cloned();
        match chain {
            None => ChainStats {
                segments: 0,
                identifiers: 0,
            },
            Some(chain) => {
                let chain = chain.lock();
                ChainStats {
                    segments: chain.segments.len(),
                    identifiers: chain.segments.iter().map(|s| s.ids.len()).sum(),
                }
            }
        }
    }

    /// The configured window/retention.
    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    /// Get or lazily create the chain for a category.
    fn chain(&self, category: Category) -> Arc<Mutex<Chain>> {
        if let Some(chain) = self.chains.read().get(&category) {
            return Arc::clone(chain);
        }
        let mut chains = self.chains.write();
        Arc::clone(chains.entry(category).or_default())
    }
}
