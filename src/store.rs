//! Storage boundary: per-cell queries against a partition/range store.
//!
//! The engine never talks to storage directly; it hands a [`CellQuery`] to
//! a [`SpatialStore`] implementation and consumes opaque pages back. Any
//! store with partition-key lookup and native pagination fits behind the
//! trait. An in-process [`MemoryStore`] is included for tests and
//! embedders.

use crate::error::{StoreError, StoreResult};
use crate::geom::GeoPoint;
use crate::grid::CellId;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;

/// Condition on the range (sort) key of a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortKeyCondition {
    /// Sort key starts with the given prefix.
    BeginsWith(String),
    /// Sort key lies within the inclusive range.
    Between { low: String, high: String },
}

impl SortKeyCondition {
    fn matches(&self, sort_key: &str) -> bool {
        match self {
            SortKeyCondition::BeginsWith(prefix) => sort_key.starts_with(prefix.as_str()),
            SortKeyCondition::Between { low, high } => {
                sort_key >= low.as_str() && sort_key <= high.as_str()
            }
        }
    }
}

/// One cell's worth of work for the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellQuery {
    /// Partition to read. Defaults to the cell id string.
    pub partition_key: String,
    /// Optional range-key condition narrowing the partition.
    pub sort_key: Option<SortKeyCondition>,
    /// Optional store-native filter expression, passed through opaquely.
    pub filter: Option<String>,
}

impl CellQuery {
    /// The default layout: one partition per cell, no narrowing.
    pub fn for_partition(cell: &CellId) -> Self {
        Self {
            partition_key: cell.as_str().to_string(),
            sort_key: None,
            filter: None,
        }
    }

    pub fn with_sort_key(mut self, condition: SortKeyCondition) -> Self {
        self.sort_key = Some(condition);
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

/// Opaque native pagination cursor. Produced and consumed only by the
/// store that minted it; the engine just carries it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCursor(pub Vec<u8>);

/// A store-native record: a flat attribute map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRecord {
    pub attributes: BTreeMap<String, Bytes>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: impl Into<String>, value: impl Into<Bytes>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Bytes> {
        self.attributes.get(name)
    }
}

/// One native page of results.
#[derive(Debug, Clone, Default)]
pub struct StorePage {
    pub records: Vec<RawRecord>,
    /// Cursor to the next page, `None` when the cell is exhausted.
    pub cursor: Option<StoreCursor>,
}

/// A partition/range key-value store queried one cell at a time.
///
/// `limit` caps how many records the page may carry; the returned cursor
/// must then resume exactly after the last returned record, not after the
/// store's own page boundary. Implementations report failures through
/// [`StoreError`], marking throttling and timeouts transient so the engine
/// can retry them.
#[async_trait]
pub trait SpatialStore: Send + Sync {
    async fn query(
        &self,
        query: &CellQuery,
        cursor: Option<&StoreCursor>,
        limit: Option<usize>,
    ) -> StoreResult<StorePage>;
}

/// A decoded geospatial record.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoRecord {
    /// Domain identity. Two raw records with equal keys are the same item
    /// (one may be a boundary duplicate) and are deduplicated.
    pub key: Bytes,
    pub position: GeoPoint,
    pub payload: Bytes,
}

/// Translates between store-native attribute maps and [`GeoRecord`]s.
pub trait RecordMapper: Send + Sync {
    fn to_record(&self, raw: &RawRecord) -> StoreResult<GeoRecord>;
    fn to_raw(&self, record: &GeoRecord) -> RawRecord;
}

/// Default mapper over the attributes `id`, `lat`, `lng`, and `payload`,
/// with coordinates stored as decimal strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicMapper;

impl BasicMapper {
    fn f64_attr(raw: &RawRecord, name: &str) -> StoreResult<f64> {
        let bytes = raw
            .get(name)
            .ok_or_else(|| StoreError::fatal(format!("record missing attribute {name:?}")))?;
        let text = std::str::from_utf8(bytes)
            .map_err(|_| StoreError::fatal(format!("attribute {name:?} is not utf-8")))?;
        text.parse::<f64>()
            .map_err(|_| StoreError::fatal(format!("attribute {name:?} is not a number: {text}")))
    }
}

impl RecordMapper for BasicMapper {
    fn to_record(&self, raw: &RawRecord) -> StoreResult<GeoRecord> {
        let key = raw
            .get("id")
            .cloned()
            .ok_or_else(|| StoreError::fatal("record missing attribute \"id\""))?;
        let lat = Self::f64_attr(raw, "lat")?;
        let lng = Self::f64_attr(raw, "lng")?;
        let position = GeoPoint::new(lat, lng)
            .map_err(|e| StoreError::fatal(format!("record has invalid position: {e}")))?;
        let payload = raw.get("payload").cloned().unwrap_or_default();
        Ok(GeoRecord {
            key,
            position,
            payload,
        })
    }

    fn to_raw(&self, record: &GeoRecord) -> RawRecord {
        RawRecord::new()
            .set("id", record.key.clone())
            .set("lat", record.position.lat.to_string())
            .set("lng", record.position.lng.to_string())
            .set("payload", record.payload.clone())
    }
}

/// In-process partition/range store.
///
/// Partitions map to sorted ranges of records keyed by sort key, so query
/// order matches what a real range store would return. The native page
/// size is small by real-store standards and configurable so tests can
/// force multi-page cells.
pub struct MemoryStore {
    partitions: RwLock<BTreeMap<String, BTreeMap<String, RawRecord>>>,
    page_size: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            partitions: RwLock::new(BTreeMap::new()),
            page_size: 100,
        }
    }

    /// Override the native page size. Useful for exercising pagination
    /// with small data sets.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn insert(&self, partition: impl Into<String>, sort_key: impl Into<String>, raw: RawRecord) {
        self.partitions
            .write()
            .entry(partition.into())
            .or_default()
            .insert(sort_key.into(), raw);
    }

    pub fn len(&self) -> usize {
        self.partitions.read().values().map(|p| p.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpatialStore for MemoryStore {
    async fn query(
        &self,
        query: &CellQuery,
        cursor: Option<&StoreCursor>,
        limit: Option<usize>,
    ) -> StoreResult<StorePage> {
        if query.filter.is_some() {
            // A filter expression is store-native syntax this store does
            // not speak; dropping it would return unfiltered rows as if
            // they matched.
            return Err(StoreError::fatal(
                "MemoryStore does not support filter expressions",
            ));
        }

        let page_size = match limit {
            Some(limit) if limit > 0 => limit.min(self.page_size),
            Some(_) => return Ok(StorePage::default()),
            None => self.page_size,
        };

        let partitions = self.partitions.read();
        let Some(partition) = partitions.get(&query.partition_key) else {
            return Ok(StorePage::default());
        };

        // Cursor is the sort key of the last returned record; resume
        // strictly after it.
        let start: Bound<String> = match cursor {
            Some(StoreCursor(bytes)) => {
                let key = String::from_utf8(bytes.clone())
                    .map_err(|_| StoreError::fatal("malformed cursor"))?;
                Bound::Excluded(key)
            }
            None => Bound::Unbounded,
        };

        let mut records = Vec::new();
        let mut last_key: Option<&str> = None;
        let mut more = false;
        for (sort_key, raw) in partition.range((start, Bound::Unbounded)) {
            if let Some(condition) = &query.sort_key {
                if !condition.matches(sort_key) {
                    continue;
                }
            }
            if records.len() == page_size {
                more = true;
                break;
            }
            records.push(raw.clone());
            last_key = Some(sort_key);
        }

        let cursor = if more {
            last_key.map(|k| StoreCursor(k.as_bytes().to_vec()))
        } else {
            None
        };
        Ok(StorePage { records, cursor })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, lat: f64, lng: f64) -> RawRecord {
        BasicMapper.to_raw(&GeoRecord {
            key: Bytes::copy_from_slice(id.as_bytes()),
            position: GeoPoint::new(lat, lng).unwrap(),
            payload: Bytes::from_static(b"{}"),
        })
    }

    fn query(partition: &str) -> CellQuery {
        CellQuery {
            partition_key: partition.to_string(),
            sort_key: None,
            filter: None,
        }
    }

    #[tokio::test]
    async fn test_query_missing_partition_is_empty() {
        let store = MemoryStore::new();
        let page = store.query(&query("nowhere"), None, None).await.unwrap();
        assert!(page.records.is_empty());
        assert!(page.cursor.is_none());
    }

    #[tokio::test]
    async fn test_pagination_drains_partition_exactly_once() {
        let store = MemoryStore::new().with_page_size(3);
        for i in 0..8 {
            store.insert("cell", format!("k{i}"), record(&format!("r{i}"), 1.0, 2.0));
        }

        let mut seen = Vec::new();
        let mut cursor: Option<StoreCursor> = None;
        let mut pages = 0;
        loop {
            let page = store.query(&query("cell"), cursor.as_ref(), None).await.unwrap();
            pages += 1;
            seen.extend(page.records);
            match page.cursor {
                Some(c) => cursor = Some(c),
                None => break,
            }
        }
        assert_eq!(pages, 3);
        assert_eq!(seen.len(), 8);
    }

    #[tokio::test]
    async fn test_limit_caps_page_and_cursor_resumes_after_it() {
        let store = MemoryStore::new().with_page_size(10);
        for i in 0..5 {
            store.insert("cell", format!("k{i}"), record(&format!("r{i}"), 1.0, 2.0));
        }

        let first = store.query(&query("cell"), None, Some(2)).await.unwrap();
        assert_eq!(first.records.len(), 2);
        let cursor = first.cursor.unwrap();

        let rest = store.query(&query("cell"), Some(&cursor), None).await.unwrap();
        assert_eq!(rest.records.len(), 3);
        assert!(rest.cursor.is_none());
    }

    #[tokio::test]
    async fn test_sort_key_condition_filters() {
        let store = MemoryStore::new();
        store.insert("cell", "a:1", record("r1", 1.0, 2.0));
        store.insert("cell", "a:2", record("r2", 1.0, 2.0));
        store.insert("cell", "b:1", record("r3", 1.0, 2.0));

        let q = query("cell").with_sort_key(SortKeyCondition::BeginsWith("a:".into()));
        let page = store.query(&q, None, None).await.unwrap();
        assert_eq!(page.records.len(), 2);

        let q = query("cell").with_sort_key(SortKeyCondition::Between {
            low: "a:2".into(),
            high: "b:1".into(),
        });
        let page = store.query(&q, None, None).await.unwrap();
        assert_eq!(page.records.len(), 2);
    }

    #[tokio::test]
    async fn test_filter_expression_rejected() {
        let store = MemoryStore::new();
        store.insert("cell", "k0", record("r0", 1.0, 2.0));

        let q = query("cell").with_filter("attribute_exists(flag)");
        let err = store.query(&q, None, None).await.unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("filter"));
    }

    #[test]
    fn test_basic_mapper_round_trip() {
        let original = GeoRecord {
            key: Bytes::from_static(b"venue-42"),
            position: GeoPoint::new(37.7749, -122.4194).unwrap(),
            payload: Bytes::from_static(b"{\"name\":\"pier\"}"),
        };
        let raw = BasicMapper.to_raw(&original);
        let decoded = BasicMapper.to_record(&raw).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_basic_mapper_rejects_bad_records() {
        assert!(BasicMapper.to_record(&RawRecord::new()).is_err());

        let missing_lng = RawRecord::new()
            .set("id", &b"x"[..])
            .set("lat", &b"1.0"[..]);
        assert!(BasicMapper.to_record(&missing_lng).is_err());

        let bad_lat = RawRecord::new()
            .set("id", &b"x"[..])
            .set("lat", &b"oops"[..])
            .set("lng", &b"2.0"[..]);
        assert!(BasicMapper.to_record(&bad_lat).is_err());
    }
}
