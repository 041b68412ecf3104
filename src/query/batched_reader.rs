//! Batched Bitmap Reader
//!
//! Lazily partitions a filter bitmap into batches of at most `batch_size`
//! rows, so streaming actions never materialise a full result set. Each
//! step selects the row-ids of the next rank window via the select-by-rank
//! primitive, then intersects the covering `[start, end]` interval with the
//! filter; intersecting the over-wide interval is cheaper than slicing a
//! copy of the filter.

use roaring::RoaringBitmap;

/// Yields bitmaps of at most `batch_size` rows that partition the filter.
#[derive(Debug)]
pub struct BatchedBitmapReader {
    bitmap: RoaringBitmap,
    batch_size: u32,
    cardinality: u64,
    rows_produced: u64,
}

impl BatchedBitmapReader {
    /// # Panics
    /// Panics if `batch_size` is zero.
    pub fn new(bitmap: RoaringBitmap, batch_size: u32) -> Self {
        assert!(batch_size > 0, "batch size must be positive");
        let cardinality = bitmap.len();
        BatchedBitmapReader {
            bitmap,
            batch_size,
            cardinality,
            rows_produced: 0,
        }
    }

    /// The next batch, or `None` once all rows have been produced.
    pub fn next_batch(&mut self) -> Option<RoaringBitmap> {
        if self.rows_produced >= self.cardinality {
            return None;
        }

        let start_of_batch = self
            .bitmap
            .select(self.rows_produced as u32)
            .expect("an element with this rank exists while rows_produced < cardinality");

        let proposed_end_rank = self.rows_produced + u64::from(self.batch_size) - 1;
        let end_of_batch = match self.bitmap.select(proposed_end_rank as u32) {
            Some(end) => {
                self.rows_produced += u64::from(self.batch_size);
                end
            }
            None => {
                // fill the final batch with the remainder
                let end = self
                    .bitmap
                    .select(self.cardinality as u32 - 1)
                    .expect("the filter is non-empty here");
                self.rows_produced = self.cardinality;
                end
            }
        };

        let mut batch = RoaringBitmap::new();
        batch.insert_range(start_of_batch..=end_of_batch);
        batch &= &self.bitmap;
        Some(batch)
    }
}

impl Iterator for BatchedBitmapReader {
    type Item = RoaringBitmap;

    fn next(&mut self) -> Option<RoaringBitmap> {
        self.next_batch()
    }
}
