//! Cache-then-network loading for one named resource.
//!
//! A load first serves whatever the persistent cache holds, then revalidates
//! against the backend:
//!
//! ```text
//! INIT -> CACHE_LOOKUP -> (emit cached) -> NETWORK_FETCH
//!      -> SUCCESS: compare -> commit if newer -> emit
//!      -> FAILURE: re-emit last known value with an error flag
//!      -> IDLE
//! ```
//!
//! Per key there is at most one fetch in flight; concurrent loads attach to
//! it. Commits are serialized behind one lock. A dated payload older than one
//! already emitted is refused until [`SyncedResource::invalidate`] is called;
//! undated payloads are ordered by store time.
//!
//! Errors are reported as data on each [`Snapshot`]; nothing here returns
//! `Err` to the caller.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex as StdMutex, PoisonError,
};

use futures_util::future::{BoxFuture, FutureExt, Shared, WeakShared};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{watch, Mutex, OnceCell};

use super::api::{FetchError, Fetcher};
use super::cache::{CacheError, PersistentCache};
use super::scope::ScopeToken;
use crate::domain::{Resource, ResourceKey};
use crate::util::dates::{now_millis, unix_millis};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("network error: {0}")]
    Network(#[from] FetchError),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl SyncError {
    /// Classification reported on snapshots.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Cache(_) => ErrorKind::Cache,
            Self::Network(_) => ErrorKind::Network,
            Self::MalformedResponse(_) => ErrorKind::MalformedResponse,
        }
    }
}

/// Error classification carried on snapshots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Cache,
    Network,
    MalformedResponse,
}

/// Where the value in a snapshot came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    Empty,
    Default,
    Cache,
    Network,
}

/// What a load did to the resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Change {
    /// A newer value was committed and emitted.
    Updated,
    /// The backend returned what we already had.
    Unchanged,
    /// The backend returned something older than what we already had.
    Outdated,
    /// The fetch failed; the last known value is still served.
    Failed(ErrorKind),
    /// The resource was invalidated while the fetch was in flight.
    Superseded,
}

/// The persisted form of one resource, stored as JSON text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<R> {
    pub key: String,
    /// Unix millis; never decreases for a key.
    pub stored_at: i64,
    /// Unix millis of the payload's own timestamp, when it has one.
    #[serde(default)]
    pub freshness: Option<i64>,
    /// URL the payload was fetched from.
    #[serde(default)]
    pub source: Option<String>,
    pub data: R,
}

/// `(value, is_stale, error)` as seen by subscribers.
#[derive(Clone, Debug)]
pub struct Snapshot<R> {
    pub value: Option<Arc<R>>,
    /// True until the value has been confirmed by the backend, and again
    /// after a failed refresh.
    pub is_stale: bool,
    pub error: Option<ErrorKind>,
    pub origin: Origin,
    /// Payload time in unix millis, when the payload carries one.
    pub freshness: Option<i64>,
    pub stored_at: Option<i64>,
}

impl<R> Snapshot<R> {
    fn initial(default: Option<Arc<R>>) -> Self {
        let origin = if default.is_some() {
            Origin::Default
        } else {
            Origin::Empty
        };
        Self {
            value: default,
            is_stale: true,
            error: None,
            origin,
            freshness: None,
            stored_at: None,
        }
    }

    fn from_entry(entry: &CacheEntry<R>, origin: Origin) -> Self
    where
        R: Clone,
    {
        Self {
            value: Some(Arc::new(entry.data.clone())),
            is_stale: origin != Origin::Network,
            error: None,
            origin,
            freshness: entry.freshness,
            stored_at: Some(entry.stored_at),
        }
    }

    pub fn value(&self) -> Option<&R> {
        self.value.as_deref()
    }

    /// The value, or a consumer-local fallback when nothing is known yet.
    pub fn value_or<'a>(&'a self, fallback: &'a R) -> &'a R {
        self.value.as_deref().unwrap_or(fallback)
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Clone, Debug)]
pub struct LoadOutcome<R> {
    pub snapshot: Snapshot<R>,
    pub change: Change,
}

type FetchFuture<R> = BoxFuture<'static, LoadOutcome<R>>;

struct InFlight<R> {
    id: u64,
    fetch: WeakShared<FetchFuture<R>>,
}

/// Last committed entry and the newest payload time emitted since the last
/// invalidation. Undated payloads are ordered by `stored_at` alone.
struct Committed<R> {
    entry: Option<CacheEntry<R>>,
    newest: Option<i64>,
}

impl<R> Committed<R> {
    fn empty() -> Self {
        Self {
            entry: None,
            newest: None,
        }
    }

    fn accept(&mut self, entry: CacheEntry<R>) {
        self.newest = self.newest.max(entry.freshness);
        self.entry = Some(entry);
    }

    /// True for a dated payload older than one already emitted.
    fn regresses(&self, freshness: Option<i64>) -> bool {
        matches!((freshness, self.newest), (Some(fetched), Some(newest)) if fetched < newest)
    }
}

struct Inner<R: Resource> {
    key: ResourceKey,
    cache: Arc<dyn PersistentCache>,
    fetcher: Arc<dyn Fetcher>,
    source: StdMutex<Url>,
    default: Option<Arc<R>>,
    /// Commit lock and the last committed entry.
    committed: Mutex<Committed<R>>,
    /// Bumped by invalidation; fetches from an older epoch may not commit.
    epoch: AtomicU64,
    hydrated: OnceCell<()>,
    inflight: StdMutex<Option<InFlight<R>>>,
    next_fetch_id: AtomicU64,
    state: watch::Sender<Snapshot<R>>,
}

/// Builder for [`SyncedResource`].
pub struct ResourceBuilder<R> {
    key: ResourceKey,
    source: Url,
    default: Option<R>,
}

impl<R: Resource> ResourceBuilder<R> {
    /// Value served when nothing is cached and the fetch fails.
    pub fn default_value(mut self, value: R) -> Self {
        self.default = Some(value);
        self
    }

    /// Resource reading and writing through `cache`, fetching through `fetcher`.
    pub fn build(
        self,
        cache: Arc<dyn PersistentCache>,
        fetcher: Arc<dyn Fetcher>,
    ) -> SyncedResource<R> {
        let default = self.default.map(Arc::new);
        let (state, _) = watch::channel(Snapshot::initial(default.clone()));
        SyncedResource {
            inner: Arc::new(Inner {
                key: self.key,
                cache,
                fetcher,
                source: StdMutex::new(self.source),
                default,
                committed: Mutex::new(Committed::empty()),
                epoch: AtomicU64::new(0),
                hydrated: OnceCell::new(),
                inflight: StdMutex::new(None),
                next_fetch_id: AtomicU64::new(0),
                state,
            }),
        }
    }
}

/// Stale-while-revalidate handle for one [`ResourceKey`]. Cheap to clone;
/// clones share state, the in-flight fetch and subscribers.
pub struct SyncedResource<R: Resource> {
    inner: Arc<Inner<R>>,
}

impl<R: Resource> Clone for SyncedResource<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: Resource> SyncedResource<R> {
    /// Start building a resource for `key`, fetched from `source`.
    pub fn builder(key: ResourceKey, source: Url) -> ResourceBuilder<R> {
        ResourceBuilder {
            key,
            source,
            default: None,
        }
    }

    pub fn key(&self) -> ResourceKey {
        self.inner.key
    }

    /// URL the next fetch goes to.
    pub fn source(&self) -> Url {
        self.inner.source_url()
    }

    /// Latest emitted snapshot.
    pub fn snapshot(&self) -> Snapshot<R> {
        self.inner.snapshot()
    }

    /// Receiver of every snapshot emitted from now on.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot<R>> {
        self.inner.state.subscribe()
    }

    /// Subscription that goes quiet once `scope` ends.
    pub fn subscribe_scoped(&self, scope: &ScopeToken) -> Subscription<R> {
        Subscription {
            rx: self.subscribe(),
            scope: scope.clone(),
        }
    }

    /// Serve the cache (first call only), then revalidate against the backend.
    pub async fn load(&self) -> LoadOutcome<R> {
        self.hydrate().await;
        self.join_fetch().await
    }

    /// [`load`](Self::load), abandoned when `scope` ends first. When every
    /// consumer of an in-flight fetch has gone, the fetch itself is dropped.
    pub async fn load_scoped(&self, scope: &ScopeToken) -> Option<LoadOutcome<R>> {
        let mut scope = scope.clone();
        if scope.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = scope.cancelled() => {
                tracing::debug!(key = %self.inner.key, "consumer scope ended, abandoning load");
                None
            }
            outcome = self.load() => Some(outcome),
        }
    }

    /// Drop the cached value. The next emission may carry any freshness.
    pub async fn invalidate(&self) {
        let inner = &self.inner;
        let mut committed = inner.committed.lock().await;
        inner.epoch.fetch_add(1, Ordering::AcqRel);
        *committed = Committed::empty();
        *inner.inflight.lock().unwrap_or_else(PoisonError::into_inner) = None;

        if let Err(err) = inner.cache.remove(inner.key.storage_key()).await {
            tracing::warn!(key = %inner.key, error = %err, "failed to remove cache entry");
        }
        inner
            .state
            .send_replace(Snapshot::initial(inner.default.clone()));
        tracing::info!(key = %inner.key, "resource invalidated");
    }

    /// Point the resource at a new URL. Invalidates when the URL changed.
    pub async fn retarget(&self, source: Url) -> bool {
        {
            let mut current = self
                .inner
                .source
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if *current == source {
                return false;
            }
            *current = source;
        }
        self.invalidate().await;
        true
    }

    async fn hydrate(&self) {
        let inner = &self.inner;
        inner
            .hydrated
            .get_or_init(|| async {
                let mut committed = inner.committed.lock().await;
                if committed.entry.is_some() {
                    return;
                }
                if let Some(entry) = inner.read_cached().await {
                    tracing::debug!(key = %inner.key, stored_at = entry.stored_at, "serving cached value");
                    inner
                        .state
                        .send_replace(Snapshot::from_entry(&entry, Origin::Cache));
                    committed.accept(entry);
                }
            })
            .await;
    }

    fn join_fetch(&self) -> Shared<FetchFuture<R>> {
        let mut slot = self
            .inner
            .inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(fetch) = slot.as_ref().and_then(|f| f.fetch.upgrade()) {
            tracing::debug!(key = %self.inner.key, "attaching to in-flight fetch");
            return fetch;
        }

        let id = self.inner.next_fetch_id.fetch_add(1, Ordering::Relaxed);
        let epoch = self.inner.epoch.load(Ordering::Acquire);
        let inner = Arc::clone(&self.inner);
        let fetch = async move { inner.revalidate(id, epoch).await }
            .boxed()
            .shared();
        *slot = fetch.downgrade().map(|fetch| InFlight { id, fetch });
        fetch
    }
}

impl<R: Resource> Inner<R> {
    fn snapshot(&self) -> Snapshot<R> {
        self.state.borrow().clone()
    }

    fn source_url(&self) -> Url {
        self.source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn revalidate(&self, id: u64, epoch: u64) -> LoadOutcome<R> {
        let url = self.source_url();
        let outcome = match self.fetch_validated(&url).await {
            Ok(value) => self.commit(epoch, &url, value).await,
            Err(err) => self.record_failure(epoch, &err).await,
        };
        self.release(id);
        outcome
    }

    async fn fetch_validated(&self, url: &Url) -> Result<R, SyncError> {
        let json = self.fetcher.fetch(url).await?;
        let value: R = serde_json::from_value(json)
            .map_err(|err| SyncError::MalformedResponse(err.to_string()))?;
        value.validate().map_err(SyncError::MalformedResponse)?;
        Ok(value)
    }

    async fn commit(&self, epoch: u64, url: &Url, value: R) -> LoadOutcome<R> {
        let mut committed = self.committed.lock().await;
        if self.epoch.load(Ordering::Acquire) != epoch {
            tracing::debug!(key = %self.key, "discarding fetch started before invalidation");
            return self.outcome(Change::Superseded);
        }

        let now = now_millis();
        let stored_at = committed
            .entry
            .as_ref()
            .map_or(now, |current| current.stored_at.max(now));
        let candidate = CacheEntry {
            key: self.key.storage_key().to_string(),
            stored_at,
            freshness: value.freshness().map(unix_millis),
            source: Some(url.to_string()),
            data: value,
        };

        if let Some(current) = committed.entry.as_ref() {
            let change = if current.data == candidate.data {
                Some(Change::Unchanged)
            } else if committed.regresses(candidate.freshness) {
                Some(Change::Outdated)
            } else {
                None
            };
            if let Some(change) = change {
                tracing::debug!(
                    key = %self.key,
                    ?change,
                    newest = ?committed.newest,
                    fetched = ?candidate.freshness,
                    "keeping current value"
                );
                self.state.send_if_modified(|snapshot| {
                    let flagged = snapshot.is_stale || snapshot.error.is_some();
                    snapshot.is_stale = false;
                    snapshot.error = None;
                    flagged
                });
                return self.outcome(change);
            }
        }

        self.persist(&candidate).await;
        let snapshot = Snapshot::from_entry(&candidate, Origin::Network);
        tracing::info!(key = %self.key, stored_at, "committed fresh value");
        committed.accept(candidate);
        self.state.send_replace(snapshot.clone());
        LoadOutcome {
            snapshot,
            change: Change::Updated,
        }
    }

    async fn record_failure(&self, epoch: u64, err: &SyncError) -> LoadOutcome<R> {
        let _committed = self.committed.lock().await;
        if self.epoch.load(Ordering::Acquire) != epoch {
            return self.outcome(Change::Superseded);
        }

        let kind = err.kind();
        tracing::warn!(key = %self.key, error = %err, "refresh failed, serving last known value");
        self.state.send_modify(|snapshot| {
            snapshot.is_stale = true;
            snapshot.error = Some(kind);
            if snapshot.value.is_none() {
                if let Some(default) = &self.default {
                    snapshot.value = Some(Arc::clone(default));
                    snapshot.origin = Origin::Default;
                }
            }
        });
        self.outcome(Change::Failed(kind))
    }

    fn outcome(&self, change: Change) -> LoadOutcome<R> {
        LoadOutcome {
            snapshot: self.snapshot(),
            change,
        }
    }

    fn release(&self, id: u64) {
        let mut slot = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|f| f.id == id) {
            *slot = None;
        }
    }

    /// Read and check the cached entry. Every failure is a miss.
    async fn read_cached(&self) -> Option<CacheEntry<R>> {
        let storage_key = self.key.storage_key();
        let bytes = match self.cache.get(storage_key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(err) => {
                let err = SyncError::from(err);
                tracing::warn!(key = %self.key, error = %err, "cache read failed, treating as miss");
                return None;
            }
        };

        let entry: CacheEntry<R> = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(key = %self.key, error = %err, "unreadable cache entry, treating as miss");
                return None;
            }
        };

        if entry.key != storage_key {
            tracing::warn!(key = %self.key, found = %entry.key, "cache entry stored under wrong key");
            return None;
        }
        let source = self.source_url();
        if entry.source.as_deref().is_some_and(|s| s != source.as_str()) {
            tracing::debug!(key = %self.key, "cached value belongs to another source");
            return None;
        }
        if let Err(reason) = entry.data.validate() {
            tracing::warn!(key = %self.key, %reason, "cached value fails validation");
            return None;
        }
        Some(entry)
    }

    /// Write-through. Failures are logged and swallowed.
    async fn persist(&self, entry: &CacheEntry<R>) {
        let bytes = match serde_json::to_vec(entry) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(key = %self.key, error = %err, "could not serialize cache entry");
                return;
            }
        };
        if let Err(err) = self.cache.set(self.key.storage_key(), &bytes).await {
            tracing::warn!(key = %self.key, error = %err, "cache write failed, keeping in-memory value");
        }
    }
}

/// Snapshot stream bound to a consumer scope.
pub struct Subscription<R> {
    rx: watch::Receiver<Snapshot<R>>,
    scope: ScopeToken,
}

impl<R: Clone> Subscription<R> {
    pub fn current(&self) -> Snapshot<R> {
        self.rx.borrow().clone()
    }

    /// Next emission, or `None` once the scope has ended or the resource is gone.
    pub async fn changed(&mut self) -> Option<Snapshot<R>> {
        if self.scope.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.scope.cancelled() => None,
            changed = self.rx.changed() => match changed {
                Ok(()) => Some(self.rx.borrow_and_update().clone()),
                Err(_) => None,
            },
        }
    }
}
