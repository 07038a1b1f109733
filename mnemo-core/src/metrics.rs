//! Runtime Metrics & Instrumentation
//!
//! Lightweight counters and a latency histogram for the search pipeline and
//! the optimizer, exportable as Prometheus text.
//!
//! Counters are `AtomicU64` and live in a [`SearchCounters`] value that the
//! caller owns and injects (usually as `Arc<SearchCounters>`); nothing here
//! is process-global. The latency ring buffer sits behind a
//! `parking_lot::Mutex` because it is only read on export.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

// ---------------------------------------------------------------------------
// Counters (lock-free)
// ---------------------------------------------------------------------------

/// Atomic counters for search and optimizer events.
#[derive(Debug)]
pub struct SearchCounters {
    /// Search requests served (cache hits included).
    pub queries: AtomicU64,
    /// Lexical channel calls that returned an error.
    pub lexical_failures: AtomicU64,
    /// Lexical channel calls that exceeded the deadline.
    pub lexical_timeouts: AtomicU64,
    /// Vector channel (embed + search) calls that returned an error.
    pub vector_failures: AtomicU64,
    /// Vector channel calls that exceeded the deadline.
    pub vector_timeouts: AtomicU64,
    /// Judge orderings applied.
    pub judge_applied: AtomicU64,
    /// Judge calls that failed open.
    pub judge_failed_open: AtomicU64,
    /// Responses served from the result cache.
    pub cache_hits: AtomicU64,
    /// Cache lookups that missed.
    pub cache_misses: AtomicU64,
    /// Completed optimizer runs.
    pub optimizer_runs: AtomicU64,
    /// Generations evaluated across all optimizer runs.
    pub optimizer_generations: AtomicU64,
}

impl SearchCounters {
    /// Create a new set of zeroed counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            queries: AtomicU64::new(0),
            lexical_failures: AtomicU64::new(0),
            lexical_timeouts: AtomicU64::new(0),
            vector_failures: AtomicU64::new(0),
            vector_timeouts: AtomicU64::new(0),
            judge_applied: AtomicU64::new(0),
            judge_failed_open: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            optimizer_runs: AtomicU64::new(0),
            optimizer_generations: AtomicU64::new(0),
        }
    }

    /// Increment one counter by one.
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot all counters for export.
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            queries: self.queries.load(Ordering::Relaxed),
            lexical_failures: self.lexical_failures.load(Ordering::Relaxed),
            lexical_timeouts: self.lexical_timeouts.load(Ordering::Relaxed),
            vector_failures: self.vector_failures.load(Ordering::Relaxed),
            vector_timeouts: self.vector_timeouts.load(Ordering::Relaxed),
            judge_applied: self.judge_applied.load(Ordering::Relaxed),
            judge_failed_open: self.judge_failed_open.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            optimizer_runs: self.optimizer_runs.load(Ordering::Relaxed),
            optimizer_generations: self.optimizer_generations.load(Ordering::Relaxed),
        }
    }
}

impl Default for SearchCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// A snapshot of counter values at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Search requests served.
    pub queries: u64,
    /// Lexical channel errors.
    pub lexical_failures: u64,
    /// Lexical channel timeouts.
    pub lexical_timeouts: u64,
    /// Vector channel errors.
    pub vector_failures: u64,
    /// Vector channel timeouts.
    pub vector_timeouts: u64,
    /// Judge orderings applied.
    pub judge_applied: u64,
    /// Judge fail-opens.
    pub judge_failed_open: u64,
    /// Cache hits.
    pub cache_hits: u64,
    /// Cache misses.
    pub cache_misses: u64,
    /// Optimizer runs.
    pub optimizer_runs: u64,
    /// Optimizer generations.
    pub optimizer_generations: u64,
}

impl CounterSnapshot {
    /// Format as Prometheus-compatible text.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        format!(
            "# HELP mnemo_queries_total Search requests served\n\
             # TYPE mnemo_queries_total counter\n\
             mnemo_queries_total {}\n\
             # HELP mnemo_channel_failures_total Retrieval channel errors\n\
             # TYPE mnemo_channel_failures_total counter\n\
             mnemo_channel_failures_total{{channel=\"lexical\"}} {}\n\
             mnemo_channel_failures_total{{channel=\"vector\"}} {}\n\
             # HELP mnemo_channel_timeouts_total Retrieval channel deadline misses\n\
             # TYPE mnemo_channel_timeouts_total counter\n\
             mnemo_channel_timeouts_total{{channel=\"lexical\"}} {}\n\
             mnemo_channel_timeouts_total{{channel=\"vector\"}} {}\n\
             # HELP mnemo_judge_total Relevance judge outcomes\n\
             # TYPE mnemo_judge_total counter\n\
             mnemo_judge_total{{outcome=\"applied\"}} {}\n\
             mnemo_judge_total{{outcome=\"failed_open\"}} {}\n\
             # HELP mnemo_cache_lookups_total Result cache lookups\n\
             # TYPE mnemo_cache_lookups_total counter\n\
             mnemo_cache_lookups_total{{result=\"hit\"}} {}\n\
             mnemo_cache_lookups_total{{result=\"miss\"}} {}\n\
             # HELP mnemo_optimizer_runs_total Completed optimizer runs\n\
             # TYPE mnemo_optimizer_runs_total counter\n\
             mnemo_optimizer_runs_total {}\n\
             # HELP mnemo_optimizer_generations_total Generations evaluated\n\
             # TYPE mnemo_optimizer_generations_total counter\n\
             mnemo_optimizer_generations_total {}\n",
            self.queries,
            self.lexical_failures,
            self.vector_failures,
            self.lexical_timeouts,
            self.vector_timeouts,
            self.judge_applied,
            self.judge_failed_open,
            self.cache_hits,
            self.cache_misses,
            self.optimizer_runs,
            self.optimizer_generations,
        )
    }
}

// ---------------------------------------------------------------------------
// Latency Tracker
// ---------------------------------------------------------------------------

const LATENCY_WINDOW: usize = 256;

/// Ring buffer of recent search latencies against a soft budget.
///
/// ```rust
/// # use mnemo_core::metrics::LatencyTracker;
/// let tracker = LatencyTracker::new(50.0);
/// {
///     let _guard = tracker.start();
///     // ... run a search ...
/// }
/// assert_eq!(tracker.count(), 1);
/// ```
pub struct LatencyTracker {
    budget_ms: f64,
    history: Mutex<LatencyHistory>,
}

struct LatencyHistory {
    samples: Vec<f64>,
    write_idx: usize,
    count: u64,
}

impl LatencyTracker {
    /// Create a tracker with the given budget (milliseconds).
    #[must_use]
    pub fn new(budget_ms: f64) -> Self {
        Self {
            budget_ms,
            history: Mutex::new(LatencyHistory {
                samples: vec![0.0; LATENCY_WINDOW],
                write_idx: 0,
                count: 0,
            }),
        }
    }

    /// Start timing; the guard records the elapsed time on drop.
    pub fn start(&self) -> LatencyGuard<'_> {
        LatencyGuard {
            tracker: self,
            start: Instant::now(),
        }
    }

    /// Record one sample (milliseconds).
    pub fn record(&self, ms: f64) {
        let mut h = self.history.lock();
        let idx = h.write_idx;
        h.samples[idx] = ms;
        h.write_idx = (idx + 1) % LATENCY_WINDOW;
        h.count += 1;
    }

    /// Total samples recorded (including ones rotated out of the window).
    #[must_use]
    pub fn count(&self) -> u64 {
        self.history.lock().count
    }

    /// P50 / P95 / P99 / max over the current window.
    #[must_use]
    pub fn percentiles(&self) -> LatencyPercentiles {
        let h = self.history.lock();
        let n = usize::try_from(h.count).map_or(LATENCY_WINDOW, |c| c.min(LATENCY_WINDOW));
        if n == 0 {
            return LatencyPercentiles::default();
        }

        let mut sorted = h.samples[..n].to_vec();
        drop(h);
        sorted.sort_by(f64::total_cmp);

        let at = |q: f64| sorted[((n as f64 * q) as usize).min(n - 1)];
        let over = sorted.iter().filter(|&&t| t > self.budget_ms).count();

        LatencyPercentiles {
            p50: sorted[n / 2],
            p95: at(0.95),
            p99: at(0.99),
            max: sorted[n - 1],
            over_budget_ratio: over as f64 / n as f64,
        }
    }

    /// The configured budget in milliseconds.
    #[must_use]
    pub fn budget_ms(&self) -> f64 {
        self.budget_ms
    }
}

/// RAII guard that records elapsed time when dropped.
pub struct LatencyGuard<'a> {
    tracker: &'a LatencyTracker,
    start: Instant,
}

impl Drop for LatencyGuard<'_> {
    fn drop(&mut self) {
        self.tracker.record(self.start.elapsed().as_secs_f64() * 1000.0);
    }
}

/// Percentile statistics for search latency.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencyPercentiles {
    /// Median in milliseconds.
    pub p50: f64,
    /// 95th percentile in milliseconds.
    pub p95: f64,
    /// 99th percentile in milliseconds.
    pub p99: f64,
    /// Maximum in the window.
    pub max: f64,
    /// Fraction of samples over budget (0.0–1.0).
    pub over_budget_ratio: f64,
}

impl LatencyPercentiles {
    /// Format as a human-readable summary.
    #[must_use]
    pub fn summary(&self, budget_ms: f64) -> String {
        format!(
            "P50={:.2}ms  P95={:.2}ms  P99={:.2}ms  Max={:.2}ms  Budget={budget_ms:.1}ms  \
             Over-budget={:.1}%",
            self.p50,
            self.p95,
            self.p99,
            self.max,
            self.over_budget_ratio * 100.0,
        )
    }
}

// ---------------------------------------------------------------------------
// Tracing Span Names
// ---------------------------------------------------------------------------

/// Span names used with `tracing::span!`.
pub mod spans {
    /// One hybrid search request.
    pub const SEARCH: &str = "mnemo::search";
    /// Lexical channel call.
    pub const LEXICAL: &str = "mnemo::search::lexical";
    /// Embedding + vector channel call.
    pub const VECTOR: &str = "mnemo::search::vector";
    /// Relevance judge call.
    pub const JUDGE: &str = "mnemo::judge";
    /// One optimizer run.
    pub const OPTIMIZE: &str = "mnemo::optimize";
}
