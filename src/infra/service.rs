//! One shared [`SyncedResource`] per [`ResourceKey`].
//!
//! Screens ask the service for a resource instead of building their own, so
//! every consumer of a key shares one fetch, one state and one subscriber
//! list. The first caller to register a key decides its default value.

use std::{
    any::Any,
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use futures_util::future::{BoxFuture, FutureExt};
use reqwest::Url;
use thiserror::Error;

use super::api::{Endpoints, FetchError, Fetcher, HttpFetcher};
use super::cache::{FileCache, PersistentCache};
use super::synced::SyncedResource;
use crate::domain::{
    AirQualityReport, CropIntelligence, ForecastReport, MarketPriceFeed, Resource, ResourceKey,
    WeatherReport,
};
use crate::util::config::CoreConfig;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("{0} is already registered with a different payload type")]
    TypeMismatch(ResourceKey),
}

trait Registered: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn invalidate(&self) -> BoxFuture<'_, ()>;
}

impl<R: Resource> Registered for SyncedResource<R> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn invalidate(&self) -> BoxFuture<'_, ()> {
        SyncedResource::invalidate(self).boxed()
    }
}

pub struct SyncService {
    cache: Arc<dyn PersistentCache>,
    fetcher: Arc<dyn Fetcher>,
    endpoints: Endpoints,
    resources: Mutex<HashMap<ResourceKey, Arc<dyn Registered>>>,
}

impl SyncService {
    /// Registry over explicit cache, fetcher and endpoints.
    pub fn new(
        cache: Arc<dyn PersistentCache>,
        fetcher: Arc<dyn Fetcher>,
        endpoints: Endpoints,
    ) -> Self {
        Self {
            cache,
            fetcher,
            endpoints,
            resources: Mutex::new(HashMap::new()),
        }
    }

    /// File-backed cache and HTTP fetcher, both configured from `config`.
    pub fn from_config(config: &CoreConfig) -> Result<Self, ServiceError> {
        let cache_dir = config.resolved_cache_dir();
        tracing::info!(cache_dir = %cache_dir.display(), "starting sync service");
        Ok(Self::new(
            Arc::new(FileCache::new(cache_dir)),
            Arc::new(HttpFetcher::from_config(config)?),
            Endpoints::from_config(config)?,
        ))
    }

    /// URL builder shared by every resource.
    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// The shared resource for `key`, created against `source` on first use.
    pub fn resource<R: Resource>(
        &self,
        key: ResourceKey,
        source: Url,
    ) -> Result<SyncedResource<R>, ServiceError> {
        self.register(key, source, None)
    }

    /// Like [`resource`](Self::resource). `default` only applies when this
    /// call is the one that creates the resource.
    pub fn resource_with_default<R: Resource>(
        &self,
        key: ResourceKey,
        source: Url,
        default: R,
    ) -> Result<SyncedResource<R>, ServiceError> {
        self.register(key, source, Some(default))
    }

    /// Current weather for a location; moving the location invalidates it.
    pub async fn weather(&self, lat: f64, lon: f64) -> Result<SyncedResource<WeatherReport>, ServiceError> {
        let url = self.endpoints.weather(lat, lon)?;
        self.targeted(ResourceKey::Weather, url).await
    }

    /// Forecast for a location.
    pub async fn forecast(&self, lat: f64, lon: f64) -> Result<SyncedResource<ForecastReport>, ServiceError> {
        let url = self.endpoints.forecast(lat, lon)?;
        self.targeted(ResourceKey::Forecast, url).await
    }

    /// Air quality for a location.
    pub async fn air_quality(
        &self,
        lat: f64,
        lon: f64,
    ) -> Result<SyncedResource<AirQualityReport>, ServiceError> {
        let url = self.endpoints.air_quality(lat, lon)?;
        self.targeted(ResourceKey::AirQuality, url).await
    }

    /// Mandi price feed, optionally for one state.
    pub async fn market_prices(
        &self,
        state: Option<&str>,
    ) -> Result<SyncedResource<MarketPriceFeed>, ServiceError> {
        let url = self.endpoints.market_prices(state)?;
        self.targeted(ResourceKey::MarketPrices, url).await
    }

    /// Crop combination advice, optionally for one crop.
    pub async fn crop_intelligence(
        &self,
        crop: Option<&str>,
    ) -> Result<SyncedResource<CropIntelligence>, ServiceError> {
        let url = self.endpoints.crop_intelligence(crop)?;
        self.targeted(ResourceKey::CropIntelligence, url).await
    }

    /// Drop every cached value, registered or not.
    pub async fn invalidate_all(&self) {
        let registered: Vec<_> = self.registry().values().cloned().collect();
        for resource in &registered {
            resource.invalidate().await;
        }
        for key in ResourceKey::ALL {
            if let Err(err) = self.cache.remove(key.storage_key()).await {
                tracing::warn!(%key, error = %err, "failed to clear cache entry");
            }
        }
    }

    /// Shared resource for `key`, moved to `url` if it pointed elsewhere.
    async fn targeted<R: Resource>(
        &self,
        key: ResourceKey,
        url: Url,
    ) -> Result<SyncedResource<R>, ServiceError> {
        let resource = self.resource::<R>(key, url.clone())?;
        if resource.retarget(url).await {
            tracing::debug!(%key, "resource moved to a new source");
        }
        Ok(resource)
    }

    fn register<R: Resource>(
        &self,
        key: ResourceKey,
        source: Url,
        default: Option<R>,
    ) -> Result<SyncedResource<R>, ServiceError> {
        let mut resources = self.registry();
        if let Some(existing) = resources.get(&key) {
            return existing
                .as_any()
                .downcast_ref::<SyncedResource<R>>()
                .cloned()
                .ok_or(ServiceError::TypeMismatch(key));
        }

        let mut builder = SyncedResource::builder(key, source);
        if let Some(default) = default {
            builder = builder.default_value(default);
        }
        let resource = builder.build(Arc::clone(&self.cache), Arc::clone(&self.fetcher));
        resources.insert(key, Arc::new(resource.clone()));
        tracing::debug!(%key, "registered resource");
        Ok(resource)
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, HashMap<ResourceKey, Arc<dyn Registered>>> {
        self.resources.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
