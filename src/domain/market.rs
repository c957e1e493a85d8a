//! Market price rows from the mandi feed and listings authored on-device.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::reconcile::{
    filter, group_by, reconcile, Groupable, RecordSource, Searchable, SourceRecord, SourceTag,
};
use crate::util::dates;

/// One row of the remote market price feed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedPrice {
    #[serde(alias = "Commodity")]
    pub commodity: String,
    #[serde(default, alias = "Variety")]
    pub variety: Option<String>,
    #[serde(default, alias = "Market")]
    pub market: Option<String>,
    #[serde(default, alias = "District")]
    pub district: Option<String>,
    #[serde(default, alias = "State")]
    pub state: Option<String>,
    #[serde(default, alias = "Min_x0020_Price", deserialize_with = "f64_from_json")]
    pub min_price: Option<f64>,
    #[serde(default, alias = "Max_x0020_Price", deserialize_with = "f64_from_json")]
    pub max_price: Option<f64>,
    #[serde(default, alias = "Modal_x0020_Price", deserialize_with = "f64_from_json")]
    pub modal_price: Option<f64>,
    /// `dd/mm/yyyy` on the public feed, RFC 3339 on the mirror.
    #[serde(default, alias = "Arrival_Date", alias = "arrivalDate")]
    pub arrival_date: Option<String>,
}

/// A sale listing the farmer created locally.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocalListing {
    pub id: Uuid,
    pub crop: String,
    #[serde(default)]
    pub variety: Option<String>,
    #[serde(default)]
    pub market: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    /// Asking price per quintal.
    pub price: f64,
    #[serde(default)]
    pub quantity_quintals: Option<f64>,
    #[serde(default)]
    pub seller: Option<String>,
    /// RFC 3339.
    #[serde(default)]
    pub created_at: Option<String>,
}

impl LocalListing {
    /// A listing stamped with a fresh id and the current time.
    pub fn new(crop: impl Into<String>, market: Option<String>, price: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            crop: crop.into(),
            variety: None,
            market,
            state: None,
            price,
            quantity_quintals: None,
            seller: None,
            created_at: OffsetDateTime::now_utc()
                .format(&time::format_description::well_known::Rfc3339)
                .ok(),
        }
    }
}

/// Shared shape both sources normalize into.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarketListing {
    pub crop: String,
    pub variety: Option<String>,
    pub market: Option<String>,
    pub state: Option<String>,
    /// Modal price for feed rows, asking price for local listings.
    pub price: Option<f64>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub quantity_quintals: Option<f64>,
    pub seller: Option<String>,
}

fn identity_key(crop: &str, market: Option<&str>) -> String {
    format!("{}|{}", crop.trim(), market.unwrap_or_default().trim())
}

impl RecordSource for FeedPrice {
    type Payload = MarketListing;

    const TAG: SourceTag = SourceTag::Feed;

    fn identity_key(&self) -> String {
        identity_key(&self.commodity, self.market.as_deref())
    }

    fn record_date(&self) -> Option<OffsetDateTime> {
        self.arrival_date.as_deref().and_then(dates::parse_any)
    }

    fn into_payload(self) -> MarketListing {
        MarketListing {
            crop: self.commodity,
            variety: self.variety,
            market: self.market,
            state: self.state,
            price: self.modal_price,
            min_price: self.min_price,
            max_price: self.max_price,
            quantity_quintals: None,
            seller: None,
        }
    }
}

impl RecordSource for LocalListing {
    type Payload = MarketListing;

    const TAG: SourceTag = SourceTag::Local;

    fn identity_key(&self) -> String {
        identity_key(&self.crop, self.market.as_deref())
    }

    fn record_date(&self) -> Option<OffsetDateTime> {
        self.created_at.as_deref().and_then(dates::parse_rfc3339)
    }

    fn into_payload(self) -> MarketListing {
        MarketListing {
            crop: self.crop,
            variety: self.variety,
            market: self.market,
            state: self.state,
            price: Some(self.price),
            min_price: None,
            max_price: None,
            quantity_quintals: self.quantity_quintals,
            seller: self.seller,
        }
    }
}

impl Searchable for MarketListing {
    fn search_fields(&self) -> Vec<&str> {
        let mut fields = vec![self.crop.as_str()];
        fields.extend(self.variety.as_deref());
        fields.extend(self.market.as_deref());
        fields.extend(self.state.as_deref());
        fields
    }
}

impl Groupable for MarketListing {
    fn group_field(&self) -> Option<&str> {
        self.market.as_deref()
    }
}

/// The reconciled market screen: one row per crop and market.
#[derive(Clone, Debug, Default)]
pub struct MarketBoard {
    records: Vec<SourceRecord<MarketListing>>,
}

impl MarketBoard {
    /// Reconcile the feed with local listings.
    pub fn build(feed: Vec<FeedPrice>, local: Vec<LocalListing>) -> Self {
        Self {
            records: reconcile(feed, local),
        }
    }

    pub fn records(&self) -> &[SourceRecord<MarketListing>] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Rows whose crop, variety, market or state contains `term`.
    pub fn search(&self, term: Option<&str>) -> Vec<&SourceRecord<MarketListing>> {
        filter(&self.records, term)
    }

    /// Search, then bucket by market name.
    pub fn by_market(
        &self,
        term: Option<&str>,
    ) -> BTreeMap<String, Vec<&SourceRecord<MarketListing>>> {
        group_by(self.search(term))
    }
}

fn f64_from_json<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct NumberOrString;

    impl<'de> serde::de::Visitor<'de> for NumberOrString {
        type Value = Option<f64>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a number, numeric string, or null")
        }

        fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(Some(value))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(Some(value as f64))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(Some(value as f64))
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(value.trim().parse::<f64>().ok())
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(None)
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(None)
        }
    }

    deserializer.deserialize_any(NumberOrString)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::reconcile::FALLBACK_GROUP;
    use serde_json::json;

    fn feed_row(commodity: &str, market: Option<&str>, date: &str) -> FeedPrice {
        FeedPrice {
            commodity: commodity.to_string(),
            variety: None,
            market: market.map(str::to_string),
            district: None,
            state: Some("Maharashtra".to_string()),
            min_price: Some(1800.0),
            max_price: Some(2200.0),
            modal_price: Some(2000.0),
            arrival_date: Some(date.to_string()),
        }
    }

    fn local(crop: &str, market: Option<&str>, created_at: &str) -> LocalListing {
        LocalListing {
            created_at: Some(created_at.to_string()),
            ..LocalListing::new(crop, market.map(str::to_string), 2100.0)
        }
    }

    #[test]
    fn feed_row_parses_numeric_strings_and_aliases() {
        let row: FeedPrice = serde_json::from_value(json!({
            "Commodity": "Wheat",
            "Market": "Pune",
            "Modal_x0020_Price": "2150",
            "min_price": 2000,
            "max_price": null,
            "Arrival_Date": "02/01/2024"
        }))
        .unwrap();

        assert_eq!(row.modal_price, Some(2150.0));
        assert_eq!(row.min_price, Some(2000.0));
        assert_eq!(row.max_price, None);
        assert_eq!(row.identity_key(), "Wheat|Pune");
        assert!(row.record_date().is_some());
    }

    #[test]
    fn newer_local_listing_replaces_feed_row() {
        let board = MarketBoard::build(
            vec![feed_row("Wheat", Some("MarketA"), "01/01/2024")],
            vec![local("Wheat", Some("MarketA"), "2024-01-02T00:00:00Z")],
        );

        assert_eq!(board.len(), 1);
        let record = &board.records()[0];
        assert_eq!(record.source, SourceTag::Local);
        assert_eq!(record.date, time::macros::datetime!(2024-01-02 0:00 UTC));
        assert_eq!(record.payload.price, Some(2100.0));
    }

    #[test]
    fn search_and_group_board() {
        let board = MarketBoard::build(
            vec![
                feed_row("Tomato", Some("Azadpur"), "03/01/2024"),
                feed_row("Onion", Some("Lasalgaon"), "03/01/2024"),
            ],
            vec![local("Tomato Cherry", None, "2024-01-04T08:00:00Z")],
        );

        let hits = board.search(Some("tom"));
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|r| r.payload.crop.starts_with("Tomato")));

        let groups = board.by_market(Some("TOM"));
        assert_eq!(groups["Azadpur"].len(), 1);
        assert_eq!(groups[FALLBACK_GROUP].len(), 1);
        assert!(!groups.contains_key("Lasalgaon"));
    }

    #[test]
    fn undated_rows_sort_last() {
        let mut undated = feed_row("Garlic", Some("Indore"), "");
        undated.arrival_date = None;
        let board = MarketBoard::build(
            vec![undated, feed_row("Potato", Some("Agra"), "05/01/2024")],
            vec![],
        );
        assert_eq!(board.records()[1].payload.crop, "Garlic");
        assert_eq!(board.records()[1].date, dates::EPOCH);
        assert!(!board.records()[1].dated);
        assert!(board.records()[0].dated);
    }
}
