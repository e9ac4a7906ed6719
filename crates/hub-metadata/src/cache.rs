//! Per-run memoization of hub lookups.
//!
//! [`CachedSource`] wraps any [`MetadataSource`] and guarantees that each
//! question is asked at most once per key for the lifetime of the wrapper.
//! Build a fresh one for every resolution run; it is never shared across runs.
//!
//! Each key owns a `OnceCell`. The map lock is held only long enough to
//! insert-if-absent the cell; the remote call happens outside the lock, and
//! concurrent callers for the same key await the same cell. Failures are
//! memoized as well, so a dead endpoint costs one retry budget per key.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::OnceCell;

use crate::retry::RetryPolicy;
use crate::{MetadataSource, Result};

/// Cache key: a model at a revision (`None` = default branch).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LookupKey {
    pub model_id: String,
    pub revision: Option<String>,
}

impl LookupKey {
    pub fn new(model_id: &str, revision: Option<&str>) -> Self {
        Self {
            model_id: model_id.to_string(),
            revision: revision.map(str::to_string),
        }
    }
}

/// Lookup counters for one run.
#[derive(Debug, Default)]
pub struct LookupStats {
    requests: AtomicU64,
    queries: AtomicU64,
    failures: AtomicU64,
}

impl LookupStats {
    fn inc_requests(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_queries(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "hub_queries", "counter incremented");
    }

    fn inc_failures(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Lookups asked of the cache.
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Lookups that reached the underlying source.
    pub fn queries(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    /// Lookups answered from the cache.
    pub fn cache_hits(&self) -> u64 {
        self.requests().saturating_sub(self.queries())
    }

    /// Queries that failed after retries.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Emit all counters as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            lookup_requests = self.requests(),
            hub_queries = self.queries(),
            cache_hits = self.cache_hits(),
            lookup_failures = self.failures(),
        );
    }
}

type Slot<V> = Arc<OnceCell<V>>;

/// One `OnceCell` per key, created on first use.
pub(crate) struct Memo<K, V> {
    cells: Mutex<HashMap<K, Slot<V>>>,
}

impl<K: Eq + Hash, V> Default for Memo<K, V> {
    fn default() -> Self {
        Self {
            cells: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash, V> Memo<K, V> {
    pub(crate) fn slot(&self, key: K) -> Slot<V> {
        let mut cells = self.cells.lock().unwrap_or_else(PoisonError::into_inner);
        cells.entry(key).or_default().clone()
    }
}

/// Memoizing, retrying decorator over a [`MetadataSource`].
pub struct CachedSource<S> {
    inner: S,
    policy: RetryPolicy,
    stats: LookupStats,
    revisions: Memo<String, Result<String>>,
    licenses: Memo<LookupKey, Result<Option<String>>>,
    gating: Memo<LookupKey, Result<bool>>,
    files: Memo<(LookupKey, String), Result<Option<String>>>,
}

impl<S: MetadataSource> CachedSource<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            stats: LookupStats::default(),
            revisions: Memo::default(),
            licenses: Memo::default(),
            gating: Memo::default(),
            files: Memo::default(),
        }
    }

    pub fn stats(&self) -> &LookupStats {
        &self.stats
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn memoized<K, T, F, Fut>(
        &self,
        memo: &Memo<K, Result<T>>,
        key: K,
        operation: &str,
        fetch: F,
    ) -> Result<T>
    where
        K: Eq + Hash,
        T: Clone,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.stats.inc_requests();
        let slot = memo.slot(key);
        slot.get_or_init(|| async move {
            self.stats.inc_queries();
            let result = self.policy.run(operation, fetch).await;
            if result.is_err() {
                self.stats.inc_failures();
            }
            result
        })
        .await
        .clone()
    }
}

#[async_trait]
impl<S: MetadataSource> MetadataSource for CachedSource<S> {
    async fn resolve_revision(&self, model_id: &str) -> Result<String> {
        self.memoized(
            &self.revisions,
            model_id.to_string(),
            "resolve_revision",
            || self.inner.resolve_revision(model_id),
        )
        .await
    }

    async fn license(&self, model_id: &str, revision: Option<&str>) -> Result<Option<String>> {
        self.memoized(
            &self.licenses,
            LookupKey::new(model_id, revision),
            "license",
            || self.inner.license(model_id, revision),
        )
        .await
    }

    async fn gated(&self, model_id: &str, revision: Option<&str>) -> Result<bool> {
        self.memoized(
            &self.gating,
            LookupKey::new(model_id, revision),
            "gated",
            || self.inner.gated(model_id, revision),
        )
        .await
    }

    async fn fetch_file(
        &self,
        model_id: &str,
        revision: Option<&str>,
        filename: &str,
    ) -> Result<Option<String>> {
        self.memoized(
            &self.files,
            (LookupKey::new(model_id, revision), filename.to_string()),
            "fetch_file",
            || self.inner.fetch_file(model_id, revision, filename),
        )
        .await
    }
}
