//! Sequence Store
//!
//! Per-partition storage for one aligned sequence column: a position table
//! of per-symbol row-id bitmaps, the zstd-compressed raw sequence blob used
//! for reconstruction, and the insertion index.
//!
//! At every position at most one symbol is stored *flipped*: its bitmap
//! holds the rows that do NOT carry the symbol. The flip candidate is the
//! most frequent symbol at the position (typically the reference symbol),
//! which keeps the total bitmap size small. `bitmap()` resolves flipping
//! internally, so callers always observe plain membership semantics.

use std::borrow::Cow;
use std::collections::HashMap;

use rayon::prelude::*;
use roaring::RoaringBitmap;

use crate::common::bitmap::complement;
use crate::error::StorageError;
use crate::storage::column::{BlobCompressor, ZstdStringColumn};
use crate::storage::insertion_index::InsertionIndex;
use crate::storage::SequenceInput;
use crate::symbols::Symbol;

/// One position of the table: `|Σ|` bitmaps and the flipped symbol, if any.
#[derive(Debug)]
pub struct PositionEntry<S: Symbol> {
    bitmaps: Vec<RoaringBitmap>,
    flipped: Option<S>,
}

impl<S: Symbol> PositionEntry<S> {
    fn new() -> Self {
        PositionEntry {
            bitmaps: (0..S::COUNT).map(|_| RoaringBitmap::new()).collect(),
            flipped: None,
        }
    }

    pub fn flipped(&self) -> Option<S> {
        self.flipped
    }

    /// The stored bitmap, flipped or not.
    pub fn stored(&self, symbol: S) -> &RoaringBitmap {
        &self.bitmaps[symbol.index()]
    }

    fn optimize(&mut self, row_count: u32) {
        let mut best: Option<(S, u64)> = None;
        for &symbol in S::ALL {
            let cardinality = self.bitmaps[symbol.index()].len();
            if best.map_or(true, |(_, best_cardinality)| cardinality > best_cardinality) {
                best = Some((symbol, cardinality));
            }
        }
        if let Some((symbol, cardinality)) = best {
            // flipping pays off once the symbol covers more than half the rows
            if cardinality * 2 > u64::from(row_count) {
                let flipped = complement(&self.bitmaps[symbol.index()], row_count);
                self.bitmaps[symbol.index()] = flipped;
                self.flipped = Some(symbol);
            }
        }
        for bitmap in &mut self.bitmaps {
            bitmap.optimize();
        }
    }
}

/// The per-partition store for one sequence column.
#[derive(Debug)]
pub struct SequenceStore<S: Symbol> {
    name: String,
    reference: Vec<S>,
    positions: Vec<PositionEntry<S>>,
    row_count: u32,
    blob: ZstdStringColumn,
    insertions: InsertionIndex<S>,
}

impl<S: Symbol> SequenceStore<S> {
    pub fn new(name: &str, reference: Vec<S>, blob: ZstdStringColumn) -> Self {
        let length = reference.len();
        SequenceStore {
            name: name.to_string(),
            reference,
            positions: (0..length).map(|_| PositionEntry::new()).collect(),
            row_count: 0,
            blob,
            insertions: InsertionIndex::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn reference(&self) -> &[S] {
        &self.reference
    }

    /// Reference symbol at a 0-based position.
    pub fn reference_symbol(&self, position: usize) -> S {
        self.reference[position]
    }

    pub fn length(&self) -> usize {
        self.reference.len()
    }

    pub fn row_count(&self) -> u32 {
        self.row_count
    }

    pub fn blob(&self) -> &ZstdStringColumn {
        &self.blob
    }

    pub fn insertions(&self) -> &InsertionIndex<S> {
        &self.insertions
    }

    pub fn position(&self, position: usize) -> &PositionEntry<S> {
        &self.positions[position]
    }

    /// Ingest one record's sequence data.
    pub fn insert(
        &mut self,
        compressor: &mut BlobCompressor,
        input: &SequenceInput,
    ) -> Result<(), StorageError> {
        let row = self.row_count;

        let aligned = S::parse_sequence(&input.aligned).map_err(|character| {
            StorageError::IllegalCharacter {
                sequence: self.name.clone(),
                character,
            }
        })?;
        if aligned.len() != self.reference.len() {
            return Err(StorageError::LengthMismatch {
                sequence: self.name.clone(),
                expected: self.reference.len(),
                actual: aligned.len(),
            });
        }
        for (entry, symbol) in self.positions.iter_mut().zip(&aligned) {
            entry.bitmaps[symbol.index()].insert(row);
        }

        let raw = input.unaligned.as_deref().unwrap_or(&input.aligned);
        let (frame, length) = compressor.compress(raw)?;
        self.blob.insert_frame(frame, length);

        for entry in &input.insertions {
            let Some((position, symbols)) = entry.split_once(':') else {
                return Err(StorageError::MalformedInsertion(entry.clone()));
            };
            let position: u32 = position
                .parse()
                .map_err(|_| StorageError::MalformedInsertion(entry.clone()))?;
            self.insertions.stage(position, symbols, row)?;
        }

        self.row_count += 1;
        Ok(())
    }

    /// Ingest a record without data for this sequence: the row reads as
    /// missing (N/X) at every position and has no raw sequence.
    pub fn insert_missing(&mut self) {
        let row = self.row_count;
        let missing = S::missing().index();
        for entry in &mut self.positions {
            entry.bitmaps[missing].insert(row);
        }
        self.blob.insert_null();
        self.row_count += 1;
    }

    /// Seal the partition: pick flip symbols, run-compress every bitmap and
    /// finalize the insertion index.
    pub fn optimize(&mut self) {
        let row_count = self.row_count;
        self.positions
            .par_iter_mut()
            .for_each(|entry| entry.optimize(row_count));
        self.insertions.build();
    }

    /// Rows carrying exactly `symbol` at the 0-based `position`, resolving
    /// the flip transparently.
    pub fn bitmap(&self, position: usize, symbol: S) -> Cow<'_, RoaringBitmap> {
        let entry = &self.positions[position];
        if entry.flipped == Some(symbol) {
            Cow::Owned(complement(entry.stored(symbol), self.row_count))
        } else {
            Cow::Borrowed(entry.stored(symbol))
        }
    }

    /// Rows whose stored symbol is `symbol` or any ambiguity code covering
    /// it: the upper-bound ("could match") reading.
    pub fn approximate_bitmap(&self, position: usize, symbol: S) -> Cow<'_, RoaringBitmap> {
        let codes = symbol.containing_codes();
        if codes.is_empty() {
            return self.bitmap(position, symbol);
        }
        let mut result = self.bitmap(position, symbol).into_owned();
        for &code in codes {
            result |= &*self.bitmap(position, code);
        }
        Cow::Owned(result)
    }

    /// `|filter ∩ bitmap(position, symbol)|` without materialising the
    /// flipped complement: a flipped symbol counts as
    /// `|filter| - |filter ∩ stored|`.
    pub fn count_in_filter(&self, position: usize, symbol: S, filter: &RoaringBitmap) -> u64 {
        let entry = &self.positions[position];
        let stored_overlap = filter.intersection_len(entry.stored(symbol));
        if entry.flipped == Some(symbol) {
            filter.len() - stored_overlap
        } else {
            stored_overlap
        }
    }

    /// `|bitmap(position, symbol)|` for fully-included partitions.
    pub fn count_total(&self, position: usize, symbol: S) -> u64 {
        let entry = &self.positions[position];
        let stored = entry.stored(symbol).len();
        if entry.flipped == Some(symbol) {
            u64::from(self.row_count) - stored
        } else {
            stored
        }
    }

    /// Reconstruct the aligned sequences of `rows` (ascending row-id order)
    /// from the position table.
    pub fn reconstruct_aligned(&self, rows: &RoaringBitmap) -> Vec<String> {
        let row_list: Vec<u32> = rows.iter().collect();
        let slot_of: HashMap<u32, usize> = row_list
            .iter()
            .enumerate()
            .map(|(slot, &row)| (row, slot))
            .collect();

        let length = self.reference.len();
        let mut sequences = vec![vec![b'?'; length]; row_list.len()];

        for (position, entry) in self.positions.iter().enumerate() {
            if let Some(flipped) = entry.flipped {
                let character = flipped.to_char() as u8;
                for sequence in &mut sequences {
                    sequence[position] = character;
                }
            }
            for &symbol in S::ALL {
                if entry.flipped == Some(symbol) {
                    continue;
                }
                let stored = entry.stored(symbol);
                if stored.is_empty() {
                    continue;
                }
                let character = symbol.to_char() as u8;
                let hits = rows & stored;
                for row in hits.iter() {
                    sequences[slot_of[&row]][position] = character;
                }
            }
        }

        sequences
            .into_iter()
            .map(|bytes| String::from_utf8(bytes).expect("symbol characters are ASCII"))
            .collect()
    }
}
