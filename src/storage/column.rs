//! Typed Metadata Columns
//!
//! Per-partition storage for scalar columns. Insertion happens during bulk
//! build only; once the partition is sealed every column is read-only.
//! Indexed variants maintain a dense `value-id -> row-id-bitmap` index plus
//! an explicit null bitmap backing `IsNull` filters.

use std::sync::Arc;

use chrono::NaiveDate;
use parking_lot::RwLock;
use roaring::RoaringBitmap;

use crate::common::BidirectionalMap;
use crate::error::{QueryError, StorageError};

/// Table-global string interning shared by every partition of an indexed
/// column. Writes only happen while partitions are being built; at query
/// time the dictionary is frozen and reads are uncontended.
#[derive(Debug, Default)]
pub struct Dictionary {
    inner: RwLock<BidirectionalMap<String>>,
}

impl Dictionary {
    pub fn new() -> Self {
        Dictionary {
            inner: RwLock::new(BidirectionalMap::new()),
        }
    }

    pub fn intern(&self, value: &str) -> u32 {
        self.inner.write().get_or_insert(&value.to_string())
    }

    pub fn id_of(&self, value: &str) -> Option<u32> {
        self.inner.read().id_of(&value.to_string())
    }

    pub fn value(&self, id: u32) -> String {
        self.inner.read().value(id).clone()
    }

    /// Snapshot of all `(id, value)` pairs, in id order.
    pub fn entries(&self) -> Vec<(u32, String)> {
        self.inner
            .read()
            .iter()
            .map(|(id, value)| (id, value.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

/// Raw string column: dense, no index.
#[derive(Debug, Default)]
pub struct StringColumn {
    values: Vec<Option<String>>,
}

impl StringColumn {
    pub fn new() -> Self {
        StringColumn { values: Vec::new() }
    }

    pub fn insert(&mut self, value: &str) {
        self.values.push(Some(value.to_string()));
    }

    pub fn insert_null(&mut self) {
        self.values.push(None);
    }

    pub fn value(&self, row: u32) -> Option<&str> {
        self.values[row as usize].as_deref()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Indexed string column: interned value ids plus per-value bitmaps.
#[derive(Debug, Default)]
pub struct IndexedStringColumn {
    value_ids: Vec<Option<u32>>,
    index: Vec<RoaringBitmap>,
    nulls: RoaringBitmap,
}

impl IndexedStringColumn {
    pub fn new() -> Self {
        IndexedStringColumn::default()
    }

    pub fn insert(&mut self, value_id: u32) {
        let row = self.value_ids.len() as u32;
        self.value_ids.push(Some(value_id));
        if self.index.len() <= value_id as usize {
            self.index
                .resize_with(value_id as usize + 1, RoaringBitmap::new);
        }
        self.index[value_id as usize].insert(row);
    }

    pub fn insert_null(&mut self) {
        let row = self.value_ids.len() as u32;
        self.value_ids.push(None);
        self.nulls.insert(row);
    }

    pub fn value_id(&self, row: u32) -> Option<u32> {
        self.value_ids[row as usize]
    }

    /// Rows holding exactly `value_id`; empty for ids this partition never saw.
    pub fn row_ids_equal(&self, value_id: u32) -> Option<&RoaringBitmap> {
        self.index.get(value_id as usize)
    }

    pub fn row_ids_is_null(&self) -> &RoaringBitmap {
        &self.nulls
    }

    /// Per-value bitmaps, for regex search over the indexed value table.
    pub fn index(&self) -> &[RoaringBitmap] {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.value_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value_ids.is_empty()
    }
}

/// Nullable 32-bit integer column.
#[derive(Debug, Default)]
pub struct IntColumn {
    values: Vec<Option<i32>>,
}

impl IntColumn {
    pub fn new() -> Self {
        IntColumn { values: Vec::new() }
    }

    pub fn insert(&mut self, value: i32) {
        self.values.push(Some(value));
    }

    pub fn insert_null(&mut self) {
        self.values.push(None);
    }

    pub fn value(&self, row: u32) -> Option<i32> {
        self.values[row as usize]
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Nullable 64-bit float column.
#[derive(Debug, Default)]
pub struct FloatColumn {
    values: Vec<Option<f64>>,
}

impl FloatColumn {
    pub fn new() -> Self {
        FloatColumn { values: Vec::new() }
    }

    pub fn insert(&mut self, value: f64) {
        self.values.push(Some(value));
    }

    pub fn insert_null(&mut self) {
        self.values.push(None);
    }

    pub fn value(&self, row: u32) -> Option<f64> {
        self.values[row as usize]
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Nullable boolean column.
#[derive(Debug, Default)]
pub struct BoolColumn {
    values: Vec<Option<bool>>,
}

impl BoolColumn {
    pub fn new() -> Self {
        BoolColumn { values: Vec::new() }
    }

    pub fn insert(&mut self, value: bool) {
        self.values.push(Some(value));
    }

    pub fn insert_null(&mut self) {
        self.values.push(None);
    }

    pub fn value(&self, row: u32) -> Option<bool> {
        self.values[row as usize]
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Nullable date column. With `sorted` set, insertion must be monotonic
/// non-decreasing (nulls sort below every date, so they may only form a
/// prefix); range filters then compile to a contiguous row-id range.
#[derive(Debug, Default)]
pub struct DateColumn {
    values: Vec<Option<NaiveDate>>,
    sorted: bool,
}

impl DateColumn {
    pub fn new(sorted: bool) -> Self {
        DateColumn {
            values: Vec::new(),
            sorted,
        }
    }

    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    pub fn insert(&mut self, value: NaiveDate) {
        if self.sorted {
            assert!(
                self.values.last().map_or(true, |last| *last <= Some(value)),
                "sorted date column received out-of-order value {value}"
            );
        }
        self.values.push(Some(value));
    }

    pub fn insert_null(&mut self) {
        if self.sorted {
            assert!(
                self.values.last().map_or(true, Option::is_none),
                "sorted date column received null after a date"
            );
        }
        self.values.push(None);
    }

    pub fn value(&self, row: u32) -> Option<NaiveDate> {
        self.values[row as usize]
    }

    /// The contiguous row-id range of dates within `[from, to]`. Only valid
    /// on sorted columns; an unbounded `from` still starts past the null
    /// prefix, so nulls never satisfy a range filter.
    pub fn range_of(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> std::ops::Range<u32> {
        debug_assert!(self.sorted, "range_of requires a sorted column");
        let start = match from {
            Some(from) => self.values.partition_point(|value| *value < Some(from)),
            None => self.values.partition_point(Option::is_none),
        };
        let end = match to {
            Some(to) => self.values.partition_point(|value| *value <= Some(to)),
            None => self.values.len(),
        };
        start as u32..end.max(start) as u32
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Raw blob column, zstd-compressed with a shared dictionary. The builder
/// owns the compression context; this column stores frames plus original
/// lengths and decompresses on demand.
#[derive(Debug)]
pub struct ZstdStringColumn {
    dictionary: Arc<Vec<u8>>,
    frames: Vec<Option<Vec<u8>>>,
    uncompressed_lengths: Vec<u32>,
}

impl ZstdStringColumn {
    pub fn new(dictionary: Arc<Vec<u8>>) -> Self {
        ZstdStringColumn {
            dictionary,
            frames: Vec::new(),
            uncompressed_lengths: Vec::new(),
        }
    }

    pub fn dictionary(&self) -> &Arc<Vec<u8>> {
        &self.dictionary
    }

    pub fn insert_frame(&mut self, frame: Vec<u8>, uncompressed_length: u32) {
        self.frames.push(Some(frame));
        self.uncompressed_lengths.push(uncompressed_length);
    }

    pub fn insert_null(&mut self) {
        self.frames.push(None);
        self.uncompressed_lengths.push(0);
    }

    pub fn is_null(&self, row: u32) -> bool {
        self.frames[row as usize].is_none()
    }

    /// Decompress one row with a caller-provided context, so batch readers
    /// amortise dictionary loading.
    pub fn decompress_with(
        &self,
        decompressor: &mut zstd::bulk::Decompressor<'_>,
        row: u32,
    ) -> Result<Option<String>, QueryError> {
        let Some(frame) = &self.frames[row as usize] else {
            return Ok(None);
        };
        let capacity = self.uncompressed_lengths[row as usize] as usize;
        let bytes = decompressor
            .decompress(frame, capacity)
            .map_err(|error| QueryError::Internal(format!("corrupted blob column: {error}")))?;
        let text = String::from_utf8(bytes)
            .map_err(|error| QueryError::Internal(format!("corrupted blob column: {error}")))?;
        Ok(Some(text))
    }

    pub fn decompress(&self, row: u32) -> Result<Option<String>, QueryError> {
        let mut decompressor = self.decompressor()?;
        self.decompress_with(&mut decompressor, row)
    }

    pub fn decompressor(&self) -> Result<zstd::bulk::Decompressor<'static>, QueryError> {
        zstd::bulk::Decompressor::with_dictionary(&self.dictionary)
            .map_err(|error| QueryError::Internal(format!("zstd context: {error}")))
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Compression context used by partition builders for blob columns.
pub struct BlobCompressor {
    compressor: zstd::bulk::Compressor<'static>,
}

impl BlobCompressor {
    pub fn new(dictionary: &[u8]) -> Result<Self, StorageError> {
        let compressor = zstd::bulk::Compressor::with_dictionary(3, dictionary)?;
        Ok(BlobCompressor { compressor })
    }

    pub fn compress(&mut self, value: &str) -> Result<(Vec<u8>, u32), StorageError> {
        let frame = self.compressor.compress(value.as_bytes())?;
        Ok((frame, value.len() as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indexed_column_builds_disjoint_bitmaps() {
        let dictionary = Dictionary::new();
        let mut column = IndexedStringColumn::new();
        for value in ["Switzerland", "Germany", "Switzerland"] {
            column.insert(dictionary.intern(value));
        }
        column.insert_null();

        let switzerland = dictionary.id_of("Switzerland").expect("interned");
        let germany = dictionary.id_of("Germany").expect("interned");
        let swiss_rows = column.row_ids_equal(switzerland).expect("indexed");
        let german_rows = column.row_ids_equal(germany).expect("indexed");
        assert_eq!(swiss_rows.len(), 2);
        assert_eq!(german_rows.len(), 1);
        assert_eq!(swiss_rows & german_rows, RoaringBitmap::new());
        assert!(column.row_ids_is_null().contains(3));
        assert_eq!(column.value_id(1), Some(germany));
    }

    #[test]
    fn sorted_date_range_scan_matches_linear_scan() {
        let mut column = DateColumn::new(true);
        column.insert_null();
        for day in [1, 4, 7, 7, 12, 28] {
            column.insert(NaiveDate::from_ymd_opt(2021, 1, day).expect("valid date"));
        }
        let from = NaiveDate::from_ymd_opt(2021, 1, 4);
        let to = NaiveDate::from_ymd_opt(2021, 1, 12);
        assert_eq!(column.range_of(from, to), 2..6);
        assert_eq!(column.range_of(None, to), 1..6);
        assert_eq!(column.range_of(from, None), 2..7);
        assert_eq!(column.range_of(None, None), 1..7);
        // empty intersection collapses to an empty range
        let past_end = NaiveDate::from_ymd_opt(2022, 1, 1);
        assert!(column.range_of(past_end, None).is_empty());
    }

    #[test]
    #[should_panic(expected = "out-of-order")]
    fn sorted_date_column_rejects_regression() {
        let mut column = DateColumn::new(true);
        column.insert(NaiveDate::from_ymd_opt(2021, 5, 1).expect("valid date"));
        column.insert(NaiveDate::from_ymd_opt(2021, 4, 1).expect("valid date"));
    }

    #[test]
    fn blob_column_round_trips() {
        let dictionary = Arc::new(b"ATGCNATGCN".to_vec());
        let mut compressor = BlobCompressor::new(&dictionary).expect("zstd context");
        let mut column = ZstdStringColumn::new(dictionary);
        let (frame, length) = compressor.compress("ATGCATGCATGC").expect("compresses");
        column.insert_frame(frame, length);
        column.insert_null();

        assert_eq!(
            column.decompress(0).expect("decompresses").as_deref(),
            Some("ATGCATGCATGC")
        );
        assert_eq!(column.decompress(1).expect("null row"), None);
    }
}
