//! Opaque JSON fetches against the weather, market and crop backends.
//!
//! The data layer never interprets a response beyond "it is JSON"; shape
//! checks happen against the typed schemas in [`crate::domain::resources`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use thiserror::Error;

use crate::util::config::{CoreConfig, DEFAULT_TIMEOUT_SECS};
use crate::util::version::user_agent;

/// Dataset id of the daily mandi price feed on the market backend.
const MARKET_DATASET: &str = "9ef84268-d588-465a-a308-a864a43d0070";
const MARKET_PAGE_LIMIT: &str = "500";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("http request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server responded with status {0}")]
    Status(u16),
    #[error("response is not valid JSON: {0}")]
    Decode(String),
}

/// `fetch(url) -> JSON | error`. One attempt, no retries.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<serde_json::Value, FetchError>;
}

#[derive(Clone, Debug)]
pub struct HttpFetcher {
    http: Client,
}

impl HttpFetcher {
    /// Client with the default request timeout.
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Client that gives up on a request after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        let http = Client::builder()
            .user_agent(user_agent())
            .timeout(timeout)
            .build()?;
        Ok(Self { http })
    }

    pub fn from_config(config: &CoreConfig) -> Result<Self, FetchError> {
        Self::with_timeout(Duration::from_secs(config.request_timeout_secs))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<serde_json::Value, FetchError> {
        tracing::debug!(url = %redacted(url), "fetching");
        let response = self.http.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|err| FetchError::Decode(err.to_string()))
    }
}

/// Strip credentials from a URL before it is logged.
fn redacted(url: &Url) -> Url {
    let mut clean = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "appid" && key != "api-key")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if pairs.is_empty() {
        clean.set_query(None);
    } else {
        clean.query_pairs_mut().clear().extend_pairs(pairs);
    }
    clean
}

/// URL builder for every [`ResourceKey`].
#[derive(Clone, Debug)]
pub struct Endpoints {
    weather_base: Url,
    market_base: Url,
    crop_base: Url,
    api_key: Option<String>,
}

impl Endpoints {
    /// Base URLs must end in `/` for paths to join under them.
    pub fn new(weather_base: &str, market_base: &str, crop_base: &str) -> Result<Self, FetchError> {
        Ok(Self {
            weather_base: Url::parse(weather_base)?,
            market_base: Url::parse(market_base)?,
            crop_base: Url::parse(crop_base)?,
            api_key: None,
        })
    }

    pub fn from_config(config: &CoreConfig) -> Result<Self, FetchError> {
        let endpoints = Self::new(
            &config.weather_base_url,
            &config.market_base_url,
            &config.crop_base_url,
        )?;
        Ok(match &config.api_key {
            Some(key) => endpoints.with_api_key(key),
            None => endpoints,
        })
    }

    /// Key appended to every URL that takes one.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Current conditions at `lat`, `lon`.
    pub fn weather(&self, lat: f64, lon: f64) -> Result<Url, FetchError> {
        self.weather_url("weather", lat, lon)
    }

    pub fn forecast(&self, lat: f64, lon: f64) -> Result<Url, FetchError> {
        self.weather_url("forecast", lat, lon)
    }

    /// Pollution samples at `lat`, `lon`.
    pub fn air_quality(&self, lat: f64, lon: f64) -> Result<Url, FetchError> {
        self.weather_url("air_pollution", lat, lon)
    }

    /// Daily mandi prices, optionally narrowed to one state.
    pub fn market_prices(&self, state: Option<&str>) -> Result<Url, FetchError> {
        let mut url = self.market_base.join(MARKET_DATASET)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("format", "json");
            query.append_pair("limit", MARKET_PAGE_LIMIT);
            if let Some(key) = &self.api_key {
                query.append_pair("api-key", key);
            }
            if let Some(state) = state.map(str::trim).filter(|s| !s.is_empty()) {
                query.append_pair("filters[state]", state);
            }
        }
        Ok(url)
    }

    pub fn crop_intelligence(&self, crop: Option<&str>) -> Result<Url, FetchError> {
        let mut url = self.crop_base.join("crop-combinations")?;
        if let Some(crop) = crop.map(str::trim).filter(|c| !c.is_empty()) {
            url.query_pairs_mut().append_pair("crop", crop);
        }
        Ok(url)
    }

    fn weather_url(&self, path: &str, lat: f64, lon: f64) -> Result<Url, FetchError> {
        let mut url = self.weather_base.join(path)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("lat", &format!("{lat:.4}"));
            query.append_pair("lon", &format!("{lon:.4}"));
            query.append_pair("units", "metric");
            if let Some(key) = &self.api_key {
                query.append_pair("appid", key);
            }
        }
        Ok(url)
    }
}
