//! Merge a remote feed with locally authored records into one view.
//!
//! Both sides are normalized into [`SourceRecord`]s keyed by an identity key.
//! On collision the newest record wins; on an exact date tie the local record
//! wins, since the user authored it on this device.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::util::dates::EPOCH;

/// Bucket for records that have no value in the group field.
pub const FALLBACK_GROUP: &str = "Other Markets";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceTag {
    Feed,
    Local,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SourceRecord<P> {
    pub source: SourceTag,
    pub identity_key: String,
    /// The Unix epoch when the source carried no usable date.
    pub date: OffsetDateTime,
    /// False when `date` is the epoch placeholder. Undated records lose every
    /// collision with dated ones and sort after them.
    pub dated: bool,
    pub payload: P,
}

impl<P> SourceRecord<P> {
    fn recency(&self) -> (bool, OffsetDateTime) {
        (self.dated, self.date)
    }
}

/// Source-specific normalization: identity key, date, and the shared payload.
pub trait RecordSource {
    type Payload;

    const TAG: SourceTag;

    fn identity_key(&self) -> String;

    /// `None` when the source carried no usable date; normalized to the epoch.
    fn record_date(&self) -> Option<OffsetDateTime>;

    fn into_payload(self) -> Self::Payload;
}

/// Text fields matched by [`filter`].
pub trait Searchable {
    fn search_fields(&self) -> Vec<&str>;
}

/// Field used by [`group_by`]; `None` or blank lands in [`FALLBACK_GROUP`].
pub trait Groupable {
    fn group_field(&self) -> Option<&str>;
}

pub fn normalize<S, I>(items: I) -> Vec<SourceRecord<S::Payload>>
where
    S: RecordSource,
    I: IntoIterator<Item = S>,
{
    items
        .into_iter()
        .map(|item| {
            let date = item.record_date();
            SourceRecord {
                source: S::TAG,
                identity_key: item.identity_key(),
                date: date.unwrap_or(EPOCH),
                dated: date.is_some(),
                payload: item.into_payload(),
            }
        })
        .collect()
}

/// Union both sides, keep the newest record per identity key, newest first.
pub fn merge<P>(
    feed: Vec<SourceRecord<P>>,
    local: Vec<SourceRecord<P>>,
) -> Vec<SourceRecord<P>> {
    let mut winners: HashMap<String, SourceRecord<P>> = HashMap::new();

    for record in feed.into_iter().chain(local) {
        let keep_existing = winners
            .get(&record.identity_key)
            .is_some_and(|existing| !supersedes(&record, existing));
        if !keep_existing {
            winners.insert(record.identity_key.clone(), record);
        }
    }

    let mut merged: Vec<_> = winners.into_values().collect();
    merged.sort_by(display_order);
    merged
}

fn supersedes<P>(candidate: &SourceRecord<P>, existing: &SourceRecord<P>) -> bool {
    match candidate.recency().cmp(&existing.recency()) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => {
            candidate.source == SourceTag::Local && existing.source == SourceTag::Feed
        }
    }
}

fn display_order<P>(a: &SourceRecord<P>, b: &SourceRecord<P>) -> Ordering {
    b.recency()
        .cmp(&a.recency())
        .then_with(|| a.identity_key.cmp(&b.identity_key))
}

/// Convenience: normalize both sides and merge.
pub fn reconcile<F, L, P>(feed: Vec<F>, local: Vec<L>) -> Vec<SourceRecord<P>>
where
    F: RecordSource<Payload = P>,
    L: RecordSource<Payload = P>,
{
    merge(normalize(feed), normalize(local))
}

/// Case-insensitive substring filter. A missing or blank term keeps everything.
pub fn filter<'a, P: Searchable>(
    records: &'a [SourceRecord<P>],
    term: Option<&str>,
) -> Vec<&'a SourceRecord<P>> {
    let needle = match term.map(str::trim) {
        Some(t) if !t.is_empty() => t.to_lowercase(),
        _ => return records.iter().collect(),
    };

    records
        .iter()
        .filter(|record| {
            record
                .payload
                .search_fields()
                .iter()
                .any(|field| field.to_lowercase().contains(&needle))
        })
        .collect()
}

/// Bucket records by their group field. Order within a bucket is preserved.
pub fn group_by<'a, P: Groupable>(
    records: impl IntoIterator<Item = &'a SourceRecord<P>>,
) -> BTreeMap<String, Vec<&'a SourceRecord<P>>>
where
    P: 'a,
{
    let mut groups: BTreeMap<String, Vec<&'a SourceRecord<P>>> = BTreeMap::new();
    for record in records {
        let name = record
            .payload
            .group_field()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(FALLBACK_GROUP);
        groups.entry(name.to_string()).or_default().push(record);
    }
    groups
}
