//! Pure data-layer logic: farm area, record reconciliation, payload schemas.

pub mod geo;
pub mod market;
pub mod reconcile;
pub mod resources;

pub use geo::{area_acres, BoundaryPoint, BoundarySelection, FarmBoundary};
pub use market::{FeedPrice, LocalListing, MarketBoard, MarketListing};
pub use reconcile::{
    filter, group_by, merge, normalize, reconcile, Groupable, RecordSource, Searchable,
    SourceRecord, SourceTag, FALLBACK_GROUP,
};
pub use resources::{
    AirQualityReport, CropIntelligence, ForecastReport, MarketPriceFeed, Resource, ResourceKey,
    WeatherReport,
};
