//! Storage, network and the stale-while-revalidate loader built on them.

pub mod api;
pub mod cache;
pub mod scope;
pub mod service;
pub mod synced;

pub use api::{Endpoints, FetchError, Fetcher, HttpFetcher};
pub use cache::{CacheError, FileCache, MemoryCache, PersistentCache};
pub use scope::{ConsumerScope, ScopeToken};
pub use service::{ServiceError, SyncService};
pub use synced::{
    CacheEntry, Change, ErrorKind, LoadOutcome, Origin, ResourceBuilder, Snapshot, Subscription,
    SyncError, SyncedResource,
};
