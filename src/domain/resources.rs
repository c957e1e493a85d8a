//! Typed resource names and the payload schemas cached under them.
//!
//! Every payload is checked with [`Resource::validate`] before it is trusted,
//! cached, or shown. Optional fields fall back to serde defaults.

use std::fmt;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use time::OffsetDateTime;

use super::market::FeedPrice;
use crate::util::dates;

/// Logical resources the app keeps offline copies of.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKey {
    Weather,
    Forecast,
    AirQuality,
    MarketPrices,
    CropIntelligence,
}

impl ResourceKey {
    pub const ALL: [ResourceKey; 5] = [
        ResourceKey::Weather,
        ResourceKey::Forecast,
        ResourceKey::AirQuality,
        ResourceKey::MarketPrices,
        ResourceKey::CropIntelligence,
    ];

    /// Persistent cache key.
    pub fn storage_key(&self) -> &'static str {
        match self {
            Self::Weather => "weather-cache",
            Self::Forecast => "forecast-cache",
            Self::AirQuality => "air-quality-cache",
            Self::MarketPrices => "market-prices-cache",
            Self::CropIntelligence => "crop-intel-cache",
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.storage_key())
    }
}

/// A payload that can be fetched, validated, cached and ordered.
pub trait Resource:
    Serialize + DeserializeOwned + Clone + PartialEq + fmt::Debug + Send + Sync + 'static
{
    /// Minimal shape check. `Err` carries a short reason for logs.
    fn validate(&self) -> Result<(), String>;

    /// Point in time the payload describes, if it says. Used to refuse
    /// replacing a newer value with an older one.
    fn freshness(&self) -> Option<OffsetDateTime> {
        None
    }
}

// ============================================================================
// Weather
// ============================================================================

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    #[serde(default)]
    pub lat: f64,
    #[serde(default)]
    pub lon: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WeatherCondition {
    #[serde(default)]
    pub main: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Atmosphere {
    pub temp: f64,
    #[serde(default)]
    pub feels_like: Option<f64>,
    #[serde(default)]
    pub humidity: Option<f64>,
    #[serde(default)]
    pub pressure: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Wind {
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub deg: Option<f64>,
}

/// Current conditions for one location.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WeatherReport {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub coord: Coordinates,
    /// Observation time, unix seconds.
    pub dt: i64,
    pub main: Atmosphere,
    #[serde(default)]
    pub weather: Vec<WeatherCondition>,
    #[serde(default)]
    pub wind: Wind,
}

impl Resource for WeatherReport {
    fn validate(&self) -> Result<(), String> {
        if self.dt <= 0 {
            return Err("missing observation time".into());
        }
        if !self.main.temp.is_finite() {
            return Err("temperature is not a number".into());
        }
        Ok(())
    }

    fn freshness(&self) -> Option<OffsetDateTime> {
        dates::from_unix_secs(self.dt)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastSlot {
    pub dt: i64,
    pub main: Atmosphere,
    #[serde(default)]
    pub weather: Vec<WeatherCondition>,
    /// Probability of precipitation, 0..=1.
    #[serde(default)]
    pub pop: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastReport {
    pub list: Vec<ForecastSlot>,
}

impl Resource for ForecastReport {
    fn validate(&self) -> Result<(), String> {
        if self.list.is_empty() {
            return Err("forecast has no slots".into());
        }
        if self.list.iter().any(|slot| slot.dt <= 0) {
            return Err("forecast slot without time".into());
        }
        Ok(())
    }

    /// The first slot; the backend issues slots from "now" forward.
    fn freshness(&self) -> Option<OffsetDateTime> {
        self.list
            .iter()
            .map(|slot| slot.dt)
            .min()
            .and_then(dates::from_unix_secs)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AirQualityIndex {
    /// 1 (good) ..= 5 (very poor).
    pub aqi: u8,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AirQualitySample {
    pub dt: i64,
    pub main: AirQualityIndex,
    #[serde(default)]
    pub components: std::collections::BTreeMap<String, f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AirQualityReport {
    pub list: Vec<AirQualitySample>,
}

impl AirQualityReport {
    pub fn current(&self) -> Option<&AirQualitySample> {
        self.list.iter().max_by_key(|sample| sample.dt)
    }
}

impl Resource for AirQualityReport {
    fn validate(&self) -> Result<(), String> {
        let Some(sample) = self.current() else {
            return Err("no air quality samples".into());
        };
        if !(1..=5).contains(&sample.main.aqi) {
            return Err(format!("aqi {} out of range", sample.main.aqi));
        }
        Ok(())
    }

    fn freshness(&self) -> Option<OffsetDateTime> {
        self.current().and_then(|sample| dates::from_unix_secs(sample.dt))
    }
}

// ============================================================================
// Market prices
// ============================================================================

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketPriceFeed {
    pub records: Vec<FeedPrice>,
    #[serde(default)]
    pub total: Option<u64>,
    /// Feed publication time, if the backend sends one.
    #[serde(default, alias = "updated_date")]
    pub updated: Option<String>,
}

impl Resource for MarketPriceFeed {
    fn validate(&self) -> Result<(), String> {
        if self.records.iter().any(|row| row.commodity.trim().is_empty()) {
            return Err("feed row without commodity".into());
        }
        Ok(())
    }

    /// Publication time, else the newest arrival date in the rows.
    fn freshness(&self) -> Option<OffsetDateTime> {
        self.updated.as_deref().and_then(dates::parse_any).or_else(|| {
            self.records
                .iter()
                .filter_map(|row| row.arrival_date.as_deref().and_then(dates::parse_any))
                .max()
        })
    }
}

// ============================================================================
// Crop intelligence
// ============================================================================

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CropCombination {
    pub primary: String,
    #[serde(default)]
    pub companions: Vec<String>,
    #[serde(default)]
    pub season: Option<String>,
    /// Expected gain from intercropping, 0..=100.
    #[serde(default)]
    pub benefit_score: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CropIntelligence {
    pub combinations: Vec<CropCombination>,
    /// RFC 3339.
    #[serde(default)]
    pub generated_at: Option<String>,
}

impl Resource for CropIntelligence {
    fn validate(&self) -> Result<(), String> {
        if self.combinations.is_empty() {
            return Err("no crop combinations".into());
        }
        if let Some(bad) = self
            .combinations
            .iter()
            .find(|c| c.primary.trim().is_empty())
        {
            return Err(format!("combination without primary crop: {bad:?}"));
        }
        Ok(())
    }

    fn freshness(&self) -> Option<OffsetDateTime> {
        self.generated_at.as_deref().and_then(dates::parse_rfc3339)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn storage_keys_are_unique() {
        let mut keys: Vec<_> = ResourceKey::ALL.iter().map(|k| k.storage_key()).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), ResourceKey::ALL.len());
        assert_eq!(ResourceKey::Weather.to_string(), "weather-cache");
        assert_eq!(ResourceKey::MarketPrices.storage_key(), "market-prices-cache");
    }

    #[test]
    fn weather_parses_with_defaults_and_validates() {
        let report: WeatherReport = serde_json::from_value(json!({
            "dt": 1_704_153_600,
            "main": { "temp": 27.5 }
        }))
        .unwrap();

        assert!(report.validate().is_ok());
        assert!(report.weather.is_empty());
        assert_eq!(
            report.freshness(),
            Some(time::macros::datetime!(2024-01-02 0:00 UTC))
        );
    }

    #[test]
    fn weather_without_time_is_malformed() {
        let report: WeatherReport =
            serde_json::from_value(json!({ "dt": 0, "main": { "temp": 20.0 } })).unwrap();
        assert!(report.validate().is_err());
    }

    #[test]
    fn air_quality_range_is_checked() {
        let report: AirQualityReport = serde_json::from_value(json!({
            "list": [{ "dt": 10, "main": { "aqi": 9 } }]
        }))
        .unwrap();
        assert!(report.validate().is_err());
    }

    #[test]
    fn market_feed_freshness_falls_back_to_rows() {
        let feed: MarketPriceFeed = serde_json::from_value(json!({
            "records": [
                { "commodity": "Wheat", "arrival_date": "01/01/2024" },
                { "commodity": "Rice", "arrival_date": "03/01/2024" }
            ]
        }))
        .unwrap();

        assert!(feed.validate().is_ok());
        assert_eq!(
            feed.freshness(),
            Some(time::macros::datetime!(2024-01-03 0:00 UTC))
        );
    }

    #[test]
    fn crop_intelligence_requires_combinations() {
        let empty = CropIntelligence::default();
        assert!(empty.validate().is_err());

        let intel: CropIntelligence = serde_json::from_value(json!({
            "combinations": [{ "primary": "Maize", "companions": ["Beans"] }],
            "generated_at": "2024-02-01T06:00:00Z"
        }))
        .unwrap();
        assert!(intel.validate().is_ok());
        assert!(intel.freshness().is_some());
    }
}
