//! Filter Operators
//!
//! The bitmap-producing operator tree a filter expression compiles into,
//! one tree per partition. Every operator evaluates to a
//! [`CowBitmap`]: index scans hand out zero-copy views into the store,
//! combining operators materialise an owned bitmap on first write. The
//! copy-on-write discipline lets `Intersection` fold into a child's buffer
//! when that child already produced an owned bitmap.
//!
//! Negation is an inherent per-variant rewrite (`negate`), so
//! `negate(Complement(c))` collapses to `c` and exact-complement
//! selections flip their comparator instead of wrapping.

use std::borrow::Cow;
use std::fmt;
use std::ops::Range;

use chrono::NaiveDate;
use roaring::{MultiOps, RoaringBitmap};

use crate::common::bitmap::complement;
use crate::storage::column::{BoolColumn, DateColumn, FloatColumn, IntColumn, StringColumn};

/// A bitmap handle that is either a borrow of stored data or an owned
/// buffer; mutation materialises a copy (`Cow::to_mut`).
pub type CowBitmap<'a> = Cow<'a, RoaringBitmap>;

/// Scan comparators for non-indexed column filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Equals,
    NotEquals,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    IsNull,
    IsNotNull,
}

impl Comparator {
    /// The comparator computing the exact set complement, where one exists.
    /// Ordering comparators return `None`: their complement must also admit
    /// null rows, which no single comparator expresses.
    fn exact_negation(self) -> Option<Comparator> {
        match self {
            Comparator::Equals => Some(Comparator::NotEquals),
            Comparator::NotEquals => Some(Comparator::Equals),
            Comparator::IsNull => Some(Comparator::IsNotNull),
            Comparator::IsNotNull => Some(Comparator::IsNull),
            _ => None,
        }
    }
}

fn compare<T: PartialOrd>(stored: Option<T>, value: &T, comparator: Comparator) -> bool {
    match comparator {
        Comparator::IsNull => stored.is_none(),
        Comparator::IsNotNull => stored.is_some(),
        // NotEquals admits nulls so that it is the exact complement of Equals
        Comparator::NotEquals => stored.map_or(true, |inner| inner != *value),
        Comparator::Equals => stored.map_or(false, |inner| inner == *value),
        Comparator::Less => stored.map_or(false, |inner| inner < *value),
        Comparator::LessOrEqual => stored.map_or(false, |inner| inner <= *value),
        Comparator::Greater => stored.map_or(false, |inner| inner > *value),
        Comparator::GreaterOrEqual => stored.map_or(false, |inner| inner >= *value),
    }
}

/// The column a `Selection` scans.
pub enum ScanColumn<'a> {
    Int(&'a IntColumn),
    Float(&'a FloatColumn),
    Bool(&'a BoolColumn),
    Date(&'a DateColumn),
    String(&'a StringColumn),
}

/// The comparison value of a `Selection`. `None` is only meaningful with
/// the null comparators.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanValue {
    None,
    Int(i32),
    Float(f64),
    Bool(bool),
    Date(NaiveDate),
    String(String),
}

/// Predicate direction of a `BitmapSelection`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitmapComparator {
    Contains,
    NotContains,
}

/// The operator tree. `row_count` is the cardinality of the partition the
/// tree was compiled against.
pub enum Operator<'a> {
    /// Zero-copy view of an immutable stored bitmap
    IndexScan {
        bitmap: CowBitmap<'a>,
        row_count: u32,
    },
    /// Escape hatch for filters whose evaluation is not a table lookup
    /// (regex search, insertion search)
    BitmapProducer {
        producer: Box<dyn FnOnce() -> RoaringBitmap + 'a>,
        row_count: u32,
    },
    /// Rows whose per-row bitmap does (not) contain a value
    BitmapSelection {
        bitmaps: &'a [RoaringBitmap],
        comparator: BitmapComparator,
        value: u32,
        row_count: u32,
    },
    /// Union of half-open row-id ranges
    RangeSelection {
        ranges: Vec<Range<u32>>,
        row_count: u32,
    },
    /// Full column scan into a fresh bitmap
    Selection {
        column: ScanColumn<'a>,
        comparator: Comparator,
        value: ScanValue,
        row_count: u32,
    },
    Complement {
        child: Box<Operator<'a>>,
        row_count: u32,
    },
    Intersection {
        children: Vec<Operator<'a>>,
        negated_children: Vec<Operator<'a>>,
        row_count: u32,
    },
    Union {
        children: Vec<Operator<'a>>,
        row_count: u32,
    },
    /// At least (exactly) `number_of_matchers` of the children hold
    Threshold {
        non_negated_children: Vec<Operator<'a>>,
        negated_children: Vec<Operator<'a>>,
        number_of_matchers: u32,
        match_exactly: bool,
        row_count: u32,
    },
}

impl fmt::Debug for Operator<'_> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::IndexScan { bitmap, .. } => {
                write!(formatter, "IndexScan(|b|={})", bitmap.len())
            }
            Operator::BitmapProducer { .. } => write!(formatter, "BitmapProducer"),
            Operator::BitmapSelection {
                comparator, value, ..
            } => write!(formatter, "BitmapSelection({comparator:?}, {value})"),
            Operator::RangeSelection { ranges, .. } => {
                write!(formatter, "RangeSelection({ranges:?})")
            }
            Operator::Selection {
                comparator, value, ..
            } => write!(formatter, "Selection({comparator:?}, {value:?})"),
            Operator::Complement { child, .. } => write!(formatter, "Complement({child:?})"),
            Operator::Intersection {
                children,
                negated_children,
                ..
            } => write!(
                formatter,
                "Intersection({children:?}, negated: {negated_children:?})"
            ),
            Operator::Union { children, .. } => write!(formatter, "Union({children:?})"),
            Operator::Threshold {
                non_negated_children,
                negated_children,
                number_of_matchers,
                match_exactly,
                ..
            } => write!(
                formatter,
                "Threshold({}{number_of_matchers} of {non_negated_children:?}, negated: {negated_children:?})",
                if *match_exactly { "=" } else { ">=" },
            ),
        }
    }
}

impl<'a> Operator<'a> {
    /// The always-empty operator.
    pub fn empty(row_count: u32) -> Operator<'a> {
        Operator::RangeSelection {
            ranges: Vec::new(),
            row_count,
        }
    }

    /// The operator matching every row of the partition.
    pub fn full(row_count: u32) -> Operator<'a> {
        Operator::RangeSelection {
            ranges: vec![0..row_count],
            row_count,
        }
    }

    /// Whether this operator is statically known to match nothing.
    pub fn is_empty_constant(&self) -> bool {
        matches!(
            self,
            Operator::RangeSelection { ranges, .. } if ranges.iter().all(Range::is_empty)
        )
    }

    /// Whether this operator is statically known to match every row.
    pub fn is_full_constant(&self) -> bool {
        matches!(
            self,
            Operator::RangeSelection { ranges, row_count }
                if ranges.len() == 1 && ranges[0] == (0..*row_count)
        )
    }

    pub fn row_count(&self) -> u32 {
        match self {
            Operator::IndexScan { row_count, .. }
            | Operator::BitmapProducer { row_count, .. }
            | Operator::BitmapSelection { row_count, .. }
            | Operator::RangeSelection { row_count, .. }
            | Operator::Selection { row_count, .. }
            | Operator::Complement { row_count, .. }
            | Operator::Intersection { row_count, .. }
            | Operator::Union { row_count, .. }
            | Operator::Threshold { row_count, .. } => *row_count,
        }
    }

    /// Evaluate the tree to a row-id bitmap.
    pub fn evaluate(self) -> CowBitmap<'a> {
        match self {
            Operator::IndexScan { bitmap, .. } => bitmap,
            Operator::BitmapProducer { producer, .. } => Cow::Owned(producer()),
            Operator::BitmapSelection {
                bitmaps,
                comparator,
                value,
                ..
            } => {
                let mut result = RoaringBitmap::new();
                for (row, bitmap) in bitmaps.iter().enumerate() {
                    let contains = bitmap.contains(value);
                    let selected = match comparator {
                        BitmapComparator::Contains => contains,
                        BitmapComparator::NotContains => !contains,
                    };
                    if selected {
                        result.insert(row as u32);
                    }
                }
                Cow::Owned(result)
            }
            Operator::RangeSelection { ranges, .. } => {
                let mut result = RoaringBitmap::new();
                for range in ranges {
                    result.insert_range(range);
                }
                Cow::Owned(result)
            }
            Operator::Selection {
                column,
                comparator,
                value,
                row_count,
            } => Cow::Owned(evaluate_selection(&column, comparator, &value, row_count)),
            Operator::Complement { child, row_count } => {
                Cow::Owned(complement(&child.evaluate(), row_count))
            }
            Operator::Intersection {
                children,
                negated_children,
                ..
            } => evaluate_intersection(children, negated_children),
            Operator::Union { children, .. } => {
                let results: Vec<CowBitmap<'a>> =
                    children.into_iter().map(Operator::evaluate).collect();
                Cow::Owned(results.iter().map(|cow| &**cow).union())
            }
            Operator::Threshold {
                non_negated_children,
                negated_children,
                number_of_matchers,
                match_exactly,
                row_count,
            } => Cow::Owned(evaluate_threshold(
                non_negated_children,
                negated_children,
                number_of_matchers,
                match_exactly,
                row_count,
            )),
        }
    }

    /// The operator computing this operator's complement, using the
    /// cheapest specialised form available before falling back to a
    /// wrapping `Complement`.
    pub fn negate(self) -> Operator<'a> {
        let row_count = self.row_count();
        match self {
            // double negation collapses
            Operator::Complement { child, .. } => *child,
            Operator::RangeSelection { ranges, row_count } => Operator::RangeSelection {
                ranges: invert_ranges(&ranges, row_count),
                row_count,
            },
            Operator::BitmapSelection {
                bitmaps,
                comparator,
                value,
                row_count,
            } => Operator::BitmapSelection {
                bitmaps,
                comparator: match comparator {
                    BitmapComparator::Contains => BitmapComparator::NotContains,
                    BitmapComparator::NotContains => BitmapComparator::Contains,
                },
                value,
                row_count,
            },
            Operator::Selection {
                column,
                comparator,
                value,
                row_count,
            } => match comparator.exact_negation() {
                Some(negated) => Operator::Selection {
                    column,
                    comparator: negated,
                    value,
                    row_count,
                },
                None => Operator::Complement {
                    child: Box::new(Operator::Selection {
                        column,
                        comparator,
                        value,
                        row_count,
                    }),
                    row_count,
                },
            },
            // De Morgan: the negated conjunction becomes a union
            Operator::Intersection {
                children,
                negated_children,
                row_count,
            } => {
                let mut union_children: Vec<Operator<'a>> =
                    children.into_iter().map(Operator::negate).collect();
                union_children.extend(negated_children);
                Operator::Union {
                    children: union_children,
                    row_count,
                }
            }
            other => Operator::Complement {
                child: Box::new(other),
                row_count,
            },
        }
    }
}

fn evaluate_selection(
    column: &ScanColumn<'_>,
    comparator: Comparator,
    value: &ScanValue,
    row_count: u32,
) -> RoaringBitmap {
    let mut result = RoaringBitmap::new();
    for row in 0..row_count {
        let matches = match (column, value) {
            (ScanColumn::Int(column), ScanValue::Int(value)) => {
                compare(column.value(row), value, comparator)
            }
            (ScanColumn::Float(column), ScanValue::Float(value)) => {
                compare(column.value(row), value, comparator)
            }
            (ScanColumn::Bool(column), ScanValue::Bool(value)) => {
                compare(column.value(row), value, comparator)
            }
            (ScanColumn::Date(column), ScanValue::Date(value)) => {
                compare(column.value(row), value, comparator)
            }
            (ScanColumn::String(column), ScanValue::String(value)) => {
                compare(column.value(row), &value.as_str(), comparator)
            }
            // null comparators ignore the value entirely
            (ScanColumn::Int(column), ScanValue::None) => {
                compare(column.value(row), &0, comparator)
            }
            (ScanColumn::Float(column), ScanValue::None) => {
                compare(column.value(row), &0.0, comparator)
            }
            (ScanColumn::Bool(column), ScanValue::None) => {
                compare(column.value(row), &false, comparator)
            }
            (ScanColumn::Date(column), ScanValue::None) => compare(
                column.value(row),
                &NaiveDate::from_ymd_opt(1970, 1, 1).expect("epoch is a valid date"),
                comparator,
            ),
            (ScanColumn::String(column), ScanValue::None) => {
                compare(column.value(row), &"", comparator)
            }
            _ => unreachable!("compilation pairs scan columns with matching value types"),
        };
        if matches {
            result.insert(row);
        }
    }
    result
}

fn evaluate_intersection<'a>(
    children: Vec<Operator<'a>>,
    negated_children: Vec<Operator<'a>>,
) -> CowBitmap<'a> {
    assert!(
        !children.is_empty(),
        "Intersection with no non-negated children must be rewritten via De Morgan before evaluation"
    );

    let mut results: Vec<CowBitmap<'a>> = children.into_iter().map(Operator::evaluate).collect();
    // fold the smallest bitmaps first for early pruning
    results.sort_by_key(|bitmap| bitmap.len());

    let mut iterator = results.into_iter();
    let first = iterator
        .next()
        .expect("children verified non-empty above");
    // reuses the child's buffer when it is already owned
    let mut working = first.into_owned();
    for bitmap in iterator {
        if working.is_empty() {
            break;
        }
        working &= &*bitmap;
    }

    if !working.is_empty() {
        let mut negated_results: Vec<CowBitmap<'a>> = negated_children
            .into_iter()
            .map(Operator::evaluate)
            .collect();
        // largest negated bitmaps first prune the most
        negated_results.sort_by_key(|bitmap| std::cmp::Reverse(bitmap.len()));
        for bitmap in negated_results {
            if working.is_empty() {
                break;
            }
            working -= &*bitmap;
        }
    }

    Cow::Owned(working)
}

/// Dynamic-programming sweep: `table[j]` holds the rows satisfying at least
/// `j + 1` of the children processed so far. Children are folded one at a
/// time, updating levels top-down; levels that can no longer influence the
/// result (too few children left to climb to `n`) are pruned.
fn evaluate_threshold(
    non_negated_children: Vec<Operator<'_>>,
    negated_children: Vec<Operator<'_>>,
    number_of_matchers: u32,
    match_exactly: bool,
    row_count: u32,
) -> RoaringBitmap {
    let n = number_of_matchers as usize;
    assert!(n >= 1, "trivial thresholds must be simplified at compile time");
    let child_count = non_negated_children.len() + negated_children.len();
    let table_size = if match_exactly { n + 1 } else { n };
    let mut table: Vec<RoaringBitmap> = vec![RoaringBitmap::new(); table_size];

    let children = non_negated_children
        .into_iter()
        .map(|child| (child, false))
        .chain(negated_children.into_iter().map(|child| (child, true)));

    for (index, (child, is_negated)) in children.enumerate() {
        let bitmap = child.evaluate();
        // level j is only useful if the children left can still lift it to n-1
        let lowest_useful_level = n as i64 - child_count as i64 + index as i64;
        let highest_reachable_level = table_size.saturating_sub(1).min(index);
        for level in (1..=highest_reachable_level).rev() {
            if (level as i64) < lowest_useful_level {
                break;
            }
            let promoted = if is_negated {
                &table[level - 1] - &*bitmap
            } else {
                &table[level - 1] & &*bitmap
            };
            table[level] |= &promoted;
        }
        if lowest_useful_level <= 0 {
            if is_negated {
                table[0] |= &complement(&bitmap, row_count);
            } else {
                table[0] |= &*bitmap;
            }
        }
    }

    if match_exactly {
        // rows that reached n but not n+1
        let overshoot = table.pop().expect("table has n+1 levels");
        let mut result = table.pop().expect("table has at least n levels");
        result -= &overshoot;
        result
    } else {
        table.pop().expect("table has n levels")
    }
}

fn invert_ranges(ranges: &[Range<u32>], row_count: u32) -> Vec<Range<u32>> {
    let mut inverted = Vec::new();
    let mut cursor = 0;
    for range in ranges {
        if range.is_empty() {
            continue;
        }
        if range.start > cursor {
            inverted.push(cursor..range.start);
        }
        cursor = cursor.max(range.end);
    }
    if cursor < row_count {
        inverted.push(cursor..row_count);
    }
    inverted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::bitmap::full;

    fn scan<'a>(bitmap: &'a RoaringBitmap, row_count: u32) -> Operator<'a> {
        Operator::IndexScan {
            bitmap: Cow::Borrowed(bitmap),
            row_count,
        }
    }

    fn bitmap_of(rows: &[u32]) -> RoaringBitmap {
        rows.iter().copied().collect()
    }

    #[test]
    fn index_scan_is_zero_copy() {
        let stored = bitmap_of(&[1, 2, 3]);
        let result = scan(&stored, 8).evaluate();
        assert!(matches!(result, Cow::Borrowed(_)));
        assert_eq!(*result, stored);
    }

    #[test]
    fn intersection_folds_and_subtracts() {
        let a = bitmap_of(&[0, 1, 2, 3, 4]);
        let b = bitmap_of(&[1, 2, 3]);
        let negated = bitmap_of(&[2]);
        let operator = Operator::Intersection {
            children: vec![scan(&a, 8), scan(&b, 8)],
            negated_children: vec![scan(&negated, 8)],
            row_count: 8,
        };
        assert_eq!(*operator.evaluate(), bitmap_of(&[1, 3]));
    }

    #[test]
    #[should_panic(expected = "De Morgan")]
    fn intersection_without_positive_children_panics() {
        let negated = bitmap_of(&[2]);
        let operator = Operator::Intersection {
            children: Vec::new(),
            negated_children: vec![scan(&negated, 8)],
            row_count: 8,
        };
        let _ = operator.evaluate();
    }

    #[test]
    fn union_of_many() {
        let a = bitmap_of(&[0]);
        let b = bitmap_of(&[3]);
        let c = bitmap_of(&[3, 7]);
        let operator = Operator::Union {
            children: vec![scan(&a, 8), scan(&b, 8), scan(&c, 8)],
            row_count: 8,
        };
        assert_eq!(*operator.evaluate(), bitmap_of(&[0, 3, 7]));
    }

    #[test]
    fn complement_against_row_count() {
        let a = bitmap_of(&[0, 2]);
        let operator = Operator::Complement {
            child: Box::new(scan(&a, 4)),
            row_count: 4,
        };
        assert_eq!(*operator.evaluate(), bitmap_of(&[1, 3]));
    }

    #[test]
    fn negate_collapses_double_complement() {
        let a = bitmap_of(&[0, 2]);
        let operator = Operator::Complement {
            child: Box::new(scan(&a, 4)),
            row_count: 4,
        };
        let negated = operator.negate();
        assert!(matches!(negated, Operator::IndexScan { .. }));
        assert_eq!(*negated.evaluate(), a);
    }

    #[test]
    fn negate_inverts_ranges() {
        let operator = Operator::RangeSelection {
            ranges: vec![1..3, 5..6],
            row_count: 8,
        };
        let negated = operator.negate();
        assert_eq!(*negated.evaluate(), bitmap_of(&[0, 3, 4, 6, 7]));
    }

    #[test]
    fn negate_intersection_applies_de_morgan() {
        let a = bitmap_of(&[0, 1]);
        let b = bitmap_of(&[1, 2]);
        let operator = Operator::Intersection {
            children: vec![scan(&a, 4)],
            negated_children: vec![scan(&b, 4)],
            row_count: 4,
        };
        // ¬(a ∧ ¬b) = ¬a ∨ b
        assert_eq!(*operator.negate().evaluate(), bitmap_of(&[1, 2, 3]));
    }

    #[test]
    fn bitmap_selection_scans_per_row_bitmaps() {
        let bitmaps = vec![
            bitmap_of(&[7]),
            bitmap_of(&[1, 7]),
            bitmap_of(&[]),
            bitmap_of(&[7, 9]),
        ];
        let operator = Operator::BitmapSelection {
            bitmaps: &bitmaps,
            comparator: BitmapComparator::Contains,
            value: 7,
            row_count: 4,
        };
        assert_eq!(*operator.evaluate(), bitmap_of(&[0, 1, 3]));

        let operator = Operator::BitmapSelection {
            bitmaps: &bitmaps,
            comparator: BitmapComparator::Contains,
            value: 7,
            row_count: 4,
        };
        assert_eq!(*operator.negate().evaluate(), bitmap_of(&[2]));
    }

    fn brute_force_threshold(
        children: &[RoaringBitmap],
        negated: &[RoaringBitmap],
        n: u32,
        exactly: bool,
        row_count: u32,
    ) -> RoaringBitmap {
        let mut result = RoaringBitmap::new();
        for row in 0..row_count {
            let mut satisfied = 0;
            for child in children {
                if child.contains(row) {
                    satisfied += 1;
                }
            }
            for child in negated {
                if !child.contains(row) {
                    satisfied += 1;
                }
            }
            let accepted = if exactly {
                satisfied == n
            } else {
                satisfied >= n
            };
            if accepted {
                result.insert(row);
            }
        }
        result
    }

    #[test]
    fn threshold_matches_brute_force() {
        let row_count = 16;
        let children = vec![
            bitmap_of(&[0, 1, 2, 3, 8, 9]),
            bitmap_of(&[1, 3, 5, 7, 9, 11]),
            bitmap_of(&[2, 3, 6, 7, 10, 11]),
            bitmap_of(&[4, 5, 6, 7, 12, 13]),
        ];
        let negated = vec![bitmap_of(&[0, 4, 8, 12]), bitmap_of(&[1, 5, 9, 13])];

        for n in 1..=5u32 {
            for exactly in [false, true] {
                let operator = Operator::Threshold {
                    non_negated_children: children
                        .iter()
                        .map(|bitmap| scan(bitmap, row_count))
                        .collect(),
                    negated_children: negated
                        .iter()
                        .map(|bitmap| scan(bitmap, row_count))
                        .collect(),
                    number_of_matchers: n,
                    match_exactly: exactly,
                    row_count,
                };
                let expected =
                    brute_force_threshold(&children, &negated, n, exactly, row_count);
                assert_eq!(
                    *operator.evaluate(),
                    expected,
                    "n={n} exactly={exactly}"
                );
            }
        }
    }

    #[test]
    fn threshold_with_only_negated_children() {
        let row_count = 6;
        let negated = vec![bitmap_of(&[0, 1]), bitmap_of(&[0, 2])];
        let operator = Operator::Threshold {
            non_negated_children: Vec::new(),
            negated_children: negated.iter().map(|bitmap| scan(bitmap, row_count)).collect(),
            number_of_matchers: 2,
            match_exactly: false,
            row_count,
        };
        let expected = brute_force_threshold(&[], &negated, 2, false, row_count);
        assert_eq!(*operator.evaluate(), expected);
    }

    #[test]
    fn selection_negation_is_exact_for_equality() {
        let mut column = IntColumn::new();
        for value in [Some(1), Some(2), None, Some(1)] {
            match value {
                Some(inner) => column.insert(inner),
                None => column.insert_null(),
            }
        }
        let operator = Operator::Selection {
            column: ScanColumn::Int(&column),
            comparator: Comparator::Equals,
            value: ScanValue::Int(1),
            row_count: 4,
        };
        let positive = operator.evaluate().into_owned();
        assert_eq!(positive, bitmap_of(&[0, 3]));

        let operator = Operator::Selection {
            column: ScanColumn::Int(&column),
            comparator: Comparator::Equals,
            value: ScanValue::Int(1),
            row_count: 4,
        };
        let negated = operator.negate();
        // flipped comparator, not a wrapping complement
        assert!(matches!(
            negated,
            Operator::Selection {
                comparator: Comparator::NotEquals,
                ..
            }
        ));
        let negative = negated.evaluate().into_owned();
        assert_eq!(&positive | &negative, full(4));
        assert_eq!(&positive & &negative, RoaringBitmap::new());
    }

    #[test]
    fn ordering_selection_negates_via_complement() {
        let mut column = IntColumn::new();
        column.insert(5);
        column.insert_null();
        column.insert(9);
        let operator = Operator::Selection {
            column: ScanColumn::Int(&column),
            comparator: Comparator::Less,
            value: ScanValue::Int(9),
            row_count: 3,
        };
        let negated = operator.negate();
        assert!(matches!(negated, Operator::Complement { .. }));
        // null row is in the complement of `< 9`
        assert_eq!(*negated.evaluate(), bitmap_of(&[1, 2]));
    }
}
