//! Hybrid Search Pipeline — lexical + vector fan-out, fusion, rerank, judge.
//!
//! ```text
//!   query ──┬── lexical engine ───────────────┐
//!           └── embed ── vector engine ───────┴── fuse ── rerank ── judge ── top_k
//! ```
//!
//! Both channels run concurrently under one deadline each. A channel that
//! fails or times out contributes an empty list and the query still
//! answers from the other one; degradations are reported in the response,
//! counted, and logged, never raised.

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{Instrument, debug, debug_span, warn};

use crate::config::{CacheConfig, SearchConfig};
use crate::error::Result;
use crate::fusion::fuse_with_params;
use crate::judge::{JudgeOutcome, RelevanceJudge, RerankerConfig, maybe_rerank};
use crate::metrics::{LatencyTracker, SearchCounters, spans};
use crate::optimizer::fitness::LabeledQuery;
use crate::params::SearchParameters;
use crate::retrieval::{RetrievalResult, rerank};
use crate::types::{MemoryId, MemoryType, RankedList};

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Failure of a retrieval collaborator. Degrades the query, never fails it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The engine is down or refused the request.
    #[error("engine unavailable: {0}")]
    Unavailable(String),
    /// The engine reported its own timeout.
    #[error("engine timed out")]
    Timeout,
    /// Any other engine-side failure.
    #[error("engine error: {0}")]
    Internal(String),
}

/// Lexical (BM25-style) retrieval over stored memories.
#[async_trait]
pub trait LexicalEngine: Send + Sync {
    /// Up to `limit` candidates for `query`, best first.
    async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> std::result::Result<RankedList, ChannelError>;
}

/// Approximate nearest-neighbour retrieval over memory embeddings.
#[async_trait]
pub trait VectorEngine: Send + Sync {
    /// Up to `limit` candidates nearest to `embedding`, best first.
    async fn search(
        &self,
        embedding: &[f32],
        filters: &SearchFilters,
        limit: usize,
    ) -> std::result::Result<RankedList, ChannelError>;
}

/// Turns query text into a dense vector.
#[async_trait]
pub trait EmbeddingGenerator: Send + Sync {
    /// Embed `text`.
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, ChannelError>;
}

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

/// Hard filters both engines apply.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchFilters {
    /// Player the memories are about.
    pub player_id: String,
    /// NPC that owns the memories.
    pub npc_id: String,
    /// Only memories formed within this many days.
    #[serde(default)]
    pub time_range_days: Option<u32>,
}

/// One search request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Conversation scope.
    pub filters: SearchFilters,
    /// Query text.
    pub query: String,
    /// Results wanted.
    pub top_k: usize,
    /// Types exempt from the mismatch penalty; `None` disables it.
    #[serde(default)]
    pub preferred_types: Option<HashSet<MemoryType>>,
}

impl SearchRequest {
    /// A request scoped to one player/NPC pair.
    #[must_use]
    pub fn new(player_id: &str, npc_id: &str, query: &str, top_k: usize) -> Self {
        Self {
            filters: SearchFilters {
                player_id: player_id.to_string(),
                npc_id: npc_id.to_string(),
                time_range_days: None,
            },
            query: query.to_string(),
            top_k,
            preferred_types: None,
        }
    }

    /// Prefer these memory types.
    #[must_use]
    pub fn with_preferred_types<I: IntoIterator<Item = MemoryType>>(mut self, types: I) -> Self {
        self.preferred_types = Some(types.into_iter().collect());
        self
    }

    /// Restrict to memories formed in the last `days` days.
    #[must_use]
    pub fn within_days(mut self, days: u32) -> Self {
        self.filters.time_range_days = Some(days);
        self
    }
}

/// Health of one retrieval channel for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    /// Returned a list.
    Ok,
    /// Returned an error; contributed nothing.
    Failed,
    /// Missed the deadline; contributed nothing.
    TimedOut,
}

/// One search response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResponse {
    /// Final ranked results (at most `top_k`).
    pub results: Vec<RetrievalResult>,
    /// Lexical channel health.
    pub lexical: ChannelStatus,
    /// Vector channel health.
    pub vector: ChannelStatus,
    /// Judge stage outcome.
    pub judge: JudgeOutcome,
    /// Whether the response came from the result cache.
    pub cached: bool,
}

impl SearchResponse {
    fn empty() -> Self {
        Self {
            results: Vec::new(),
            lexical: ChannelStatus::Ok,
            vector: ChannelStatus::Ok,
            judge: JudgeOutcome::Skipped,
            cached: false,
        }
    }

    /// Both channels answered.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.lexical == ChannelStatus::Ok && self.vector == ChannelStatus::Ok
    }

    /// Identifiers of the results, in order.
    #[must_use]
    pub fn ids(&self) -> Vec<MemoryId> {
        self.results.iter().map(|r| r.id.clone()).collect()
    }
}

/// Candidates requested from each channel: `top_k × multiplier`, capped,
/// never below `top_k`; 0 for `top_k == 0`.
#[must_use]
pub fn candidate_pool_size(top_k: usize, multiplier: usize, cap: usize) -> usize {
    if top_k == 0 {
        return 0;
    }
    top_k.saturating_mul(multiplier).min(cap).max(top_k)
}

// ---------------------------------------------------------------------------
// Result cache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    filters: SearchFilters,
    query: String,
    top_k: usize,
    preferred_types: Option<Vec<MemoryType>>,
}

impl CacheKey {
    fn new(request: &SearchRequest) -> Self {
        let preferred_types = request.preferred_types.as_ref().map(|set| {
            let mut types: Vec<MemoryType> = set.iter().copied().collect();
            types.sort_unstable();
            types
        });
        Self {
            filters: request.filters.clone(),
            query: request.query.clone(),
            top_k: request.top_k,
            preferred_types,
        }
    }
}

struct CacheEntry {
    response: SearchResponse,
    inserted: Instant,
    ranked_at: DateTime<Utc>,
}

/// LRU of recent responses with a time-to-live.
///
/// An entry is fresh while both its wall age and the distance between the
/// caller's `now` and the `now` it was ranked at stay under the TTL.
struct ResultCache {
    entries: Mutex<LruCache<CacheKey, CacheEntry>>,
    ttl: Duration,
}

impl ResultCache {
    fn from_config(config: &CacheConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        let capacity = NonZeroUsize::new(config.capacity)?;
        Some(Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl: Duration::from_secs(config.ttl_seconds),
        })
    }

    fn get(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<SearchResponse> {
        let mut entries = self.entries.lock();
        let (inserted, ranked_at) = entries.peek(key).map(|e| (e.inserted, e.ranked_at))?;
        if inserted.elapsed() >= self.ttl {
            entries.pop(key);
            return None;
        }
        let skew = (now - ranked_at).abs().to_std().unwrap_or(Duration::MAX);
        if skew >= self.ttl {
            return None;
        }
        entries.get(key).map(|e| e.response.clone())
    }

    fn put(&self, key: CacheKey, response: SearchResponse, ranked_at: DateTime<Utc>) {
        self.entries.lock().put(
            key,
            CacheEntry {
                response,
                inserted: Instant::now(),
                ranked_at,
            },
        );
    }

    fn invalidate(&self, player_id: &str, npc_id: &str) -> usize {
        let mut entries = self.entries.lock();
        let stale: Vec<CacheKey> = entries
            .iter()
            .filter(|(k, _)| k.filters.player_id == player_id && k.filters.npc_id == npc_id)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &stale {
            entries.pop(key);
        }
        stale.len()
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

// ---------------------------------------------------------------------------
// Searcher
// ---------------------------------------------------------------------------

/// The composed retrieval pipeline.
pub struct HybridSearcher {
    lexical: Arc<dyn LexicalEngine>,
    vector: Arc<dyn VectorEngine>,
    embedder: Arc<dyn EmbeddingGenerator>,
    judge: Option<Arc<dyn RelevanceJudge>>,
    counters: Arc<SearchCounters>,
    latency: Option<Arc<LatencyTracker>>,
    config: SearchConfig,
    reranker: RerankerConfig,
    params: RwLock<SearchParameters>,
    /// Bumped under the `params` write lock on every swap.
    params_epoch: AtomicU64,
    cache: Option<ResultCache>,
}

impl HybridSearcher {
    /// Build a searcher over the given engines with default parameters and no judge.
    #[must_use]
    pub fn new(
        lexical: Arc<dyn LexicalEngine>,
        vector: Arc<dyn VectorEngine>,
        embedder: Arc<dyn EmbeddingGenerator>,
        config: SearchConfig,
    ) -> Self {
        let cache = ResultCache::from_config(&config.cache);
        Self {
            lexical,
            vector,
            embedder,
            judge: None,
            counters: Arc::new(SearchCounters::new()),
            latency: None,
            config,
            reranker: RerankerConfig::default(),
            params: RwLock::new(SearchParameters::default()),
            params_epoch: AtomicU64::new(0),
            cache,
        }
    }

    /// Attach a relevance judge.
    #[must_use]
    pub fn with_judge(mut self, judge: Arc<dyn RelevanceJudge>, reranker: RerankerConfig) -> Self {
        self.judge = Some(judge);
        self.reranker = reranker;
        self
    }

    /// Share a counter set with other components.
    #[must_use]
    pub fn with_counters(mut self, counters: Arc<SearchCounters>) -> Self {
        self.counters = counters;
        self
    }

    /// Record the latency of every [`search_at`](Self::search_at) call, cache hits included.
    #[must_use]
    pub fn with_latency_tracker(mut self, tracker: Arc<LatencyTracker>) -> Self {
        self.latency = Some(tracker);
        self
    }

    /// Start from these ranking parameters.
    #[must_use]
    pub fn with_parameters(self, params: SearchParameters) -> Self {
        *self.params.write() = params;
        self
    }

    /// The counters this searcher increments.
    #[must_use]
    pub fn counters(&self) -> &Arc<SearchCounters> {
        &self.counters
    }

    /// The ranking parameters currently in effect.
    #[must_use]
    pub fn parameters(&self) -> SearchParameters {
        *self.params.read()
    }

    /// Swap in new ranking parameters and drop every cached response.
    ///
    /// Searches already in flight finish with the parameters they started
    /// with, but their responses are not cached.
    pub fn set_parameters(&self, params: SearchParameters) {
        let mut current = self.params.write();
        *current = params;
        self.params_epoch.fetch_add(1, Ordering::AcqRel);
        self.clear();
        drop(current);
        debug!(parameters = ?params.to_map(), "Search parameters replaced");
    }

    /// Drop cached responses for one conversation. Returns how many were dropped.
    pub fn invalidate(&self, player_id: &str, npc_id: &str) -> usize {
        self.cache
            .as_ref()
            .map_or(0, |c| c.invalidate(player_id, npc_id))
    }

    /// Drop every cached response.
    pub fn clear(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }

    /// Number of cached responses.
    #[must_use]
    pub fn cached_len(&self) -> usize {
        self.cache.as_ref().map_or(0, ResultCache::len)
    }

    /// Search at the current wall-clock time.
    ///
    /// # Errors
    /// Only on invalid ranking parameters; collaborator failures degrade the response.
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        self.search_at(request, Utc::now()).await
    }

    /// Search with decay measured against `now`, using the cache.
    ///
    /// A cached response is reused only while `now` stays within the cache
    /// TTL of the `now` it was ranked at.
    ///
    /// # Errors
    /// Only on invalid ranking parameters.
    pub async fn search_at(&self, request: &SearchRequest, now: DateTime<Utc>) -> Result<SearchResponse> {
        let _timer = self.latency.as_deref().map(LatencyTracker::start);
        SearchCounters::incr(&self.counters.queries);
        let key = CacheKey::new(request);

        if let Some(cache) = &self.cache {
            if let Some(mut hit) = cache.get(&key, now) {
                SearchCounters::incr(&self.counters.cache_hits);
                debug!(query = %request.query, "Search served from cache");
                hit.cached = true;
                return Ok(hit);
            }
            SearchCounters::incr(&self.counters.cache_misses);
        }

        let (params, epoch) = {
            let current = self.params.read();
            (*current, self.params_epoch.load(Ordering::Acquire))
        };
        let response = self.execute(request, &params, now).await?;
        if let Some(cache) = &self.cache {
            if response.is_healthy() {
                let current = self.params.read();
                if self.params_epoch.load(Ordering::Acquire) == epoch {
                    cache.put(key, response.clone(), now);
                } else {
                    debug!(query = %request.query, "Parameters changed mid-search; response not cached");
                }
                drop(current);
            }
        }
        Ok(response)
    }

    /// Search with explicit parameters, bypassing the cache (the optimizer's hook).
    ///
    /// # Errors
    /// Only on invalid ranking parameters.
    pub async fn search_with_params(
        &self,
        request: &SearchRequest,
        params: &SearchParameters,
        now: DateTime<Utc>,
    ) -> Result<SearchResponse> {
        SearchCounters::incr(&self.counters.queries);
        self.execute(request, params, now).await
    }

    /// A blocking search callback for [`crate::optimizer::fitness`] builders.
    ///
    /// Each call blocks on `handle`, so it must run outside the runtime's
    /// worker threads (a rayon pool or `spawn_blocking`).
    pub fn labeled_search(
        self: &Arc<Self>,
        handle: tokio::runtime::Handle,
        now: DateTime<Utc>,
    ) -> impl Fn(&LabeledQuery, &SearchParameters) -> Result<Vec<MemoryId>> + Send + Sync + 'static {
        let searcher = Arc::clone(self);
        let top_k = self.config.top_k;
        move |query: &LabeledQuery, params: &SearchParameters| {
            let request = SearchRequest::new(&query.player_id, &query.npc_id, &query.query, top_k);
            handle
                .block_on(searcher.search_with_params(&request, params, now))
                .map(|response| response.ids())
        }
    }

    async fn execute(
        &self,
        request: &SearchRequest,
        params: &SearchParameters,
        now: DateTime<Utc>,
    ) -> Result<SearchResponse> {
        if request.top_k == 0 {
            return Ok(SearchResponse::empty());
        }
        let span = debug_span!(
            spans::SEARCH,
            player = %request.filters.player_id,
            npc = %request.filters.npc_id,
            top_k = request.top_k
        );
        self.run_stages(request, params, now).instrument(span).await
    }

    async fn run_stages(
        &self,
        request: &SearchRequest,
        params: &SearchParameters,
        now: DateTime<Utc>,
    ) -> Result<SearchResponse> {
        let top_k = request.top_k;
        let pool = self.config.pool_size(top_k);
        let deadline = Duration::from_millis(self.config.channel_timeout_ms);

        let (lexical, vector) = tokio::join!(
            bounded(deadline, self.lexical.search(&request.query, &request.filters, pool))
                .instrument(debug_span!(spans::LEXICAL, pool)),
            bounded(deadline, async {
                match self.embedder.embed(&request.query).await {
                    Ok(embedding) => self.vector.search(&embedding, &request.filters, pool).await,
                    Err(e) => Err(e),
                }
            })
            .instrument(debug_span!(spans::VECTOR, pool)),
        );
        let (lexical, lexical_status) = self.settle(Channel::Lexical, lexical);
        let (vector, vector_status) = self.settle(Channel::Vector, vector);
        debug!(pool, lexical = lexical.len(), vector = vector.len(), "Channels returned");

        let fused = fuse_with_params(&lexical, &vector, pool, params, self.config.fusion_mode)?;
        let reranked = rerank(&fused, pool, request.preferred_types.as_ref(), params, now);
        let judge_span = debug_span!(spans::JUDGE, candidates = reranked.len());
        let (results, judge) = maybe_rerank(
            &request.query,
            reranked,
            top_k,
            self.judge.as_deref(),
            &self.reranker,
        )
        .instrument(judge_span)
        .await;

        match &judge {
            JudgeOutcome::Applied => SearchCounters::incr(&self.counters.judge_applied),
            JudgeOutcome::FailedOpen(_) => SearchCounters::incr(&self.counters.judge_failed_open),
            JudgeOutcome::Skipped => {}
        }
        debug!(fused = fused.len(), returned = results.len(), "Search complete");

        Ok(SearchResponse {
            results,
            lexical: lexical_status,
            vector: vector_status,
            judge,
            cached: false,
        })
    }

    /// Turn a channel result into a list plus status, recording degradations.
    fn settle(
        &self,
        channel: Channel,
        result: std::result::Result<RankedList, ChannelError>,
    ) -> (RankedList, ChannelStatus) {
        let (failures, timeouts) = match channel {
            Channel::Lexical => (&self.counters.lexical_failures, &self.counters.lexical_timeouts),
            Channel::Vector => (&self.counters.vector_failures, &self.counters.vector_timeouts),
        };
        match result {
            Ok(list) => (list, ChannelStatus::Ok),
            Err(ChannelError::Timeout) => {
                SearchCounters::incr(timeouts);
                warn!(channel = channel.name(), "Retrieval channel timed out; continuing without it");
                (RankedList::empty(), ChannelStatus::TimedOut)
            }
            Err(e) => {
                SearchCounters::incr(failures);
                warn!(channel = channel.name(), error = %e, "Retrieval channel failed; continuing without it");
                (RankedList::empty(), ChannelStatus::Failed)
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Channel {
    Lexical,
    Vector,
}

impl Channel {
    fn name(self) -> &'static str {
        match self {
            Self::Lexical => "lexical",
            Self::Vector => "vector",
        }
    }
}

/// Bound a channel call by `deadline`; a miss reads as [`ChannelError::Timeout`].
async fn bounded<F>(deadline: Duration, call: F) -> std::result::Result<RankedList, ChannelError>
where
    F: std::future::Future<Output = std::result::Result<RankedList, ChannelError>>,
{
    tokio::time::timeout(deadline, call)
        .await
        .unwrap_or(Err(ChannelError::Timeout))
}
