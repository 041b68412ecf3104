//! Insertion Index
//!
//! For every position where insertions occur, the index holds the distinct
//! inserted strings with their row-id bitmaps, plus a 3-mer map from every
//! contiguous symbol triple appearing in any inserted string to the
//! insertions containing it. Regex search intersects the candidate sets of
//! the pattern's literal-prefix 3-mers, then verifies each surviving
//! insertion with a full regex match.

use std::collections::HashMap;

use regex::Regex;
use roaring::RoaringBitmap;
use tracing::warn;

use crate::error::StorageError;
use crate::symbols::Symbol;

/// One distinct inserted string at a position.
#[derive(Debug, Clone)]
pub struct Insertion {
    pub value: String,
    pub row_ids: RoaringBitmap,
}

/// All insertions at one position, with the finalized 3-mer map.
#[derive(Debug, Default)]
pub struct InsertionPosition<S: Symbol> {
    pub insertions: Vec<Insertion>,
    three_mer_index: HashMap<[S; 3], Vec<u32>>,
}

impl<S: Symbol> InsertionPosition<S> {
    fn build_three_mer_index(&mut self) {
        for (insertion_id, insertion) in self.insertions.iter().enumerate() {
            let symbols = S::parse_sequence(&insertion.value)
                .expect("insertion values are validated at staging time");
            for window in symbols.windows(3) {
                let key = [window[0], window[1], window[2]];
                let ids = self.three_mer_index.entry(key).or_default();
                if ids.last() != Some(&(insertion_id as u32)) {
                    ids.push(insertion_id as u32);
                }
            }
        }
    }

    fn search_with_three_mers(&self, three_mers: &[[S; 3]], pattern: &Regex) -> RoaringBitmap {
        // candidate ids are the intersection of the per-3-mer id lists,
        // which are sorted by construction
        let mut candidates: Option<Vec<u32>> = None;
        for three_mer in three_mers {
            let Some(ids) = self.three_mer_index.get(three_mer) else {
                return RoaringBitmap::new();
            };
            candidates = Some(match candidates {
                None => ids.clone(),
                Some(current) => intersect_sorted(&current, ids),
            });
        }
        let candidates = candidates.unwrap_or_default();

        let mut row_ids = RoaringBitmap::new();
        for insertion_id in candidates {
            let insertion = &self.insertions[insertion_id as usize];
            if pattern.is_match(&insertion.value) {
                row_ids |= &insertion.row_ids;
            }
        }
        row_ids
    }

    fn search_with_regex(&self, pattern: &Regex) -> RoaringBitmap {
        let mut row_ids = RoaringBitmap::new();
        for insertion in &self.insertions {
            if pattern.is_match(&insertion.value) {
                row_ids |= &insertion.row_ids;
            }
        }
        row_ids
    }

    /// Search this position for insertions matching `pattern`.
    pub fn search(&self, pattern: &Regex) -> RoaringBitmap {
        let prefix: Vec<S> = literal_prefix(pattern.as_str());
        if prefix.len() >= 3 {
            let three_mers: Vec<[S; 3]> = prefix
                .windows(3)
                .map(|window| [window[0], window[1], window[2]])
                .collect();
            self.search_with_three_mers(&three_mers, pattern)
        } else {
            warn!(
                pattern = pattern.as_str(),
                "insertion search pattern has no usable 3-mer prefix, scanning"
            );
            self.search_with_regex(pattern)
        }
    }
}

/// Per-partition insertion index for one sequence column. Entries are
/// staged row by row during ingestion; `build` finalizes the per-position
/// tables and their 3-mer maps.
#[derive(Debug)]
pub struct InsertionIndex<S: Symbol> {
    staged: HashMap<u32, HashMap<String, RoaringBitmap>>,
    positions: HashMap<u32, InsertionPosition<S>>,
}

impl<S: Symbol> Default for InsertionIndex<S> {
    fn default() -> Self {
        InsertionIndex {
            staged: HashMap::new(),
            positions: HashMap::new(),
        }
    }
}

impl<S: Symbol> InsertionIndex<S> {
    pub fn new() -> Self {
        InsertionIndex::default()
    }

    /// Stage one `position:symbols` insertion for `row_id`.
    pub fn stage(&mut self, position: u32, value: &str, row_id: u32) -> Result<(), StorageError> {
        if S::parse_sequence(value).is_err() || value.is_empty() {
            return Err(StorageError::MalformedInsertion(format!(
                "{position}:{value}"
            )));
        }
        self.staged
            .entry(position)
            .or_default()
            .entry(value.to_string())
            .or_default()
            .insert(row_id);
        Ok(())
    }

    /// Finalize: move staged entries into per-position tables (ordered by
    /// inserted string for determinism) and build the 3-mer maps.
    pub fn build(&mut self) {
        for (position, values) in self.staged.drain() {
            let mut insertions: Vec<Insertion> = values
                .into_iter()
                .map(|(value, row_ids)| Insertion { value, row_ids })
                .collect();
            insertions.sort_by(|left, right| left.value.cmp(&right.value));
            let mut entry = InsertionPosition {
                insertions,
                three_mer_index: HashMap::new(),
            };
            entry.build_three_mer_index();
            self.positions.insert(position, entry);
        }
    }

    /// Row-ids whose insertion at `position` matches `pattern`.
    pub fn search(&self, position: u32, pattern: &Regex) -> RoaringBitmap {
        self.positions
            .get(&position)
            .map_or_else(RoaringBitmap::new, |entry| entry.search(pattern))
    }

    /// Iterate all positions carrying insertions, in unspecified order.
    pub fn iter_positions(&self) -> impl Iterator<Item = (u32, &InsertionPosition<S>)> {
        self.positions.iter().map(|(position, entry)| (*position, entry))
    }
}

/// The leading run of plain symbol characters of a regex pattern, stopping
/// at the first metacharacter. Only this prefix is guaranteed to be a
/// required literal of every match.
fn literal_prefix<S: Symbol>(pattern: &str) -> Vec<S> {
    const META: &str = ".*+?()[]{}|\\^$";
    let mut symbols = Vec::new();
    for character in pattern.chars() {
        if META.contains(character) {
            break;
        }
        match S::from_char(character) {
            Some(symbol) => symbols.push(symbol),
            None => break,
        }
    }
    symbols
}

fn intersect_sorted(left: &[u32], right: &[u32]) -> Vec<u32> {
    let mut result = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < left.len() && j < right.len() {
        match left[i].cmp(&right[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                result.push(left[i]);
                i += 1;
                j += 1;
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::Nucleotide;

    fn index_with(entries: &[(u32, &str, u32)]) -> InsertionIndex<Nucleotide> {
        let mut index = InsertionIndex::new();
        for &(position, value, row) in entries {
            index.stage(position, value, row).expect("valid insertion");
        }
        index.build();
        index
    }

    #[test]
    fn exact_search_uses_three_mers() {
        let index = index_with(&[
            (123, "ATGCN", 0),
            (123, "ATGCN", 1),
            (123, "NNNNNNNN", 2),
            (1, "CCC", 3),
        ]);
        let pattern = Regex::new("ATGCN").expect("valid regex");
        let hits = index.search(123, &pattern);
        assert_eq!(hits.iter().collect::<Vec<_>>(), vec![0, 1]);
        assert!(index.search(1, &pattern).is_empty());
    }

    #[test]
    fn short_pattern_falls_back_to_scanning() {
        let index = index_with(&[(1, "CCC", 0), (1, "ACG", 1)]);
        let pattern = Regex::new("CC").expect("valid regex");
        let hits = index.search(1, &pattern);
        assert_eq!(hits.iter().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn metacharacter_truncates_the_literal_prefix() {
        let index = index_with(&[(7, "ATGGGG", 0), (7, "ATGCCC", 1)]);
        // prefix "ATG" narrows candidates; the tail still matches via regex
        let pattern = Regex::new("ATG.*C").expect("valid regex");
        let hits = index.search(7, &pattern);
        assert_eq!(hits.iter().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn unmatched_three_mer_short_circuits() {
        let index = index_with(&[(7, "ATGATG", 0)]);
        let pattern = Regex::new("CCCCC").expect("valid regex");
        assert!(index.search(7, &pattern).is_empty());
    }

    #[test]
    fn malformed_insertions_are_rejected() {
        let mut index = InsertionIndex::<Nucleotide>::new();
        assert!(index.stage(3, "AXQ", 0).is_err());
        assert!(index.stage(3, "", 0).is_err());
    }
}
