//! Offline-first data layer for a farm companion app.
//!
//! - [`infra`]: persistent cache, JSON fetcher and [`SyncedResource`], which
//!   serves the cached copy first and then revalidates against the backend.
//! - [`domain`]: farm boundary area, feed/local listing reconciliation and the
//!   payload schemas for each [`ResourceKey`].
//! - [`util`]: configuration, logging setup and date parsing.

pub mod domain;
pub mod infra;
pub mod util;

pub use domain::{area_acres, reconcile, BoundaryPoint, FarmBoundary, ResourceKey, SourceRecord};
pub use infra::{
    ConsumerScope, PersistentCache, ScopeToken, Snapshot, SyncService, SyncedResource,
};
pub use util::config::CoreConfig;
