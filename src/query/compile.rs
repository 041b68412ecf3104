//! Expression Compilation
//!
//! Rewrites a filter expression into a per-partition operator tree against
//! the partition's storage handles. The key rewrites:
//!
//! - `And` splits children that compile to a `Complement` into the
//!   intersection's AND-NOT set; an all-negated conjunction materialises
//!   De Morgan as `Complement(Union(..))`.
//! - `NOf` walks a simplification ladder (constant children, degenerate
//!   thresholds) before falling back to the `Threshold` operator.
//! - Symbol equality picks the exact or approximate position bitmap based
//!   on the inherited ambiguity mode; `"."` reads as the reference symbol.
//! - Range filters on a sorted date column compile to a contiguous
//!   `RangeSelection` found by binary search; all other non-indexed
//!   column filters become full scans.

use std::borrow::Cow;

use regex::Regex;
use roaring::{MultiOps, RoaringBitmap};

use crate::error::QueryError;
use crate::schema::ColumnType;
use crate::storage::sequence_store::SequenceStore;
use crate::storage::{ColumnStorage, Partition, SequenceAlphabet, Table};
use crate::symbols::Symbol;

use super::expression::{AmbiguityMode, Expression};
use super::operators::{Comparator, Operator, ScanColumn, ScanValue};

/// Everything a partition-local compilation needs to see.
pub(crate) struct CompileContext<'a> {
    pub table: &'a Table,
    pub partition: &'a Partition,
}

impl<'a> CompileContext<'a> {
    fn row_count(&self) -> u32 {
        self.partition.row_count()
    }

    fn column_type(&self, name: &str) -> Result<ColumnType, QueryError> {
        self.table
            .schema()
            .column(name)
            .map(|column| column.column_type)
            .ok_or_else(|| QueryError::UnknownColumn(name.to_string()))
    }

    fn column_storage(&self, name: &str) -> Result<(&'a ColumnStorage, ColumnType), QueryError> {
        let column_type = self.column_type(name)?;
        let storage = self
            .partition
            .column(name)
            .expect("partitions store every declared column");
        Ok((storage, column_type))
    }
}

fn wrong_column_type(filter: &str, column: &str, column_type: ColumnType) -> QueryError {
    QueryError::BadRequest(format!(
        "filter {filter} cannot be applied to column '{column}' of type {}",
        column_type.type_name()
    ))
}

fn resolve_store<'a, S: SequenceAlphabet>(
    ctx: &CompileContext<'a>,
    sequence_name: Option<&str>,
) -> Result<&'a SequenceStore<S>, QueryError> {
    let name = match sequence_name {
        Some(name) => name,
        None => S::default_sequence(ctx.table.schema())
            .ok_or_else(|| {
                QueryError::BadRequest(format!(
                    "no sequenceName given and no default {} sequence declared",
                    S::NAME
                ))
            })?
            .as_str(),
    };
    S::stores(ctx.partition)
        .get(name)
        .ok_or_else(|| QueryError::UnknownSequence(name.to_string()))
}

fn validate_position<S: Symbol>(
    store: &SequenceStore<S>,
    position: u32,
) -> Result<usize, QueryError> {
    let length = store.length();
    if position as usize > length {
        return Err(QueryError::OutOfRange(format!(
            "position {position} exceeds the reference length {length} of sequence '{}'",
            store.name()
        )));
    }
    Ok(position as usize - 1)
}

fn parse_symbol<S: SequenceAlphabet>(
    store: &SequenceStore<S>,
    position: usize,
    symbol_text: &str,
) -> Result<S, QueryError> {
    if symbol_text == "." {
        return Ok(store.reference_symbol(position));
    }
    let mut characters = symbol_text.chars();
    match (characters.next(), characters.next()) {
        (Some(character), None) => S::from_char(character).ok_or_else(|| {
            QueryError::QueryParse(format!(
                "'{symbol_text}' is not a {} symbol",
                S::NAME
            ))
        }),
        _ => Err(QueryError::QueryParse(format!(
            "symbol must be a single character, got '{symbol_text}'"
        ))),
    }
}

fn compile_symbol_equals<'a, S: SequenceAlphabet>(
    ctx: &CompileContext<'a>,
    mode: AmbiguityMode,
    sequence_name: Option<&str>,
    position: u32,
    symbol_text: &str,
) -> Result<Operator<'a>, QueryError> {
    let store = resolve_store::<S>(ctx, sequence_name)?;
    let position = validate_position(store, position)?;
    let symbol = parse_symbol(store, position, symbol_text)?;
    let bitmap = match mode {
        AmbiguityMode::UpperBound => store.approximate_bitmap(position, symbol),
        AmbiguityMode::None | AmbiguityMode::LowerBound => store.bitmap(position, symbol),
    };
    Ok(Operator::IndexScan {
        bitmap,
        row_count: ctx.row_count(),
    })
}

fn compile_has_mutation<'a, S: SequenceAlphabet>(
    ctx: &CompileContext<'a>,
    mode: AmbiguityMode,
    sequence_name: Option<&str>,
    position: u32,
    make_equals: impl Fn(Option<String>, u32, String) -> Expression,
) -> Result<Operator<'a>, QueryError> {
    let store = resolve_store::<S>(ctx, sequence_name)?;
    let position_index = validate_position(store, position)?;
    let reference_symbol = store.reference_symbol(position_index);
    let name = sequence_name.map(str::to_string);

    // a row has a mutation if it carries neither the reference symbol nor
    // the missing symbol; negation keeps the ambiguity bounds sound
    let desugared = Expression::And(vec![
        Expression::Not(Box::new(make_equals(
            name.clone(),
            position,
            reference_symbol.to_char().to_string(),
        ))),
        Expression::Not(Box::new(make_equals(
            name,
            position,
            S::missing().to_char().to_string(),
        ))),
    ]);
    desugared.compile(ctx, mode)
}

fn compile_insertion_contains<'a, S: SequenceAlphabet>(
    ctx: &CompileContext<'a>,
    sequence_name: Option<&str>,
    position: u32,
    pattern: &str,
) -> Result<Operator<'a>, QueryError> {
    let store = resolve_store::<S>(ctx, sequence_name)?;
    let regex = Regex::new(pattern).map_err(|error| QueryError::InvalidRegex {
        pattern: pattern.to_string(),
        message: error.to_string(),
    })?;
    Ok(Operator::BitmapProducer {
        producer: Box::new(move || store.insertions().search(position, &regex)),
        row_count: ctx.row_count(),
    })
}

impl Expression {
    /// Compile this expression for one partition under the given inherited
    /// ambiguity mode.
    pub(crate) fn compile<'a>(
        &self,
        ctx: &CompileContext<'a>,
        mode: AmbiguityMode,
    ) -> Result<Operator<'a>, QueryError> {
        let row_count = ctx.row_count();
        match self {
            Expression::True => Ok(Operator::full(row_count)),

            Expression::And(children) => {
                let mut positive = Vec::new();
                let mut negated = Vec::new();
                for child in children {
                    let operator = child.compile(ctx, mode)?;
                    if operator.is_full_constant() {
                        continue;
                    }
                    if operator.is_empty_constant() {
                        return Ok(Operator::empty(row_count));
                    }
                    match operator {
                        Operator::Complement { child, .. } => negated.push(*child),
                        Operator::Intersection {
                            children: inner,
                            negated_children: inner_negated,
                            ..
                        } => {
                            positive.extend(inner);
                            negated.extend(inner_negated);
                        }
                        other => positive.push(other),
                    }
                }
                Ok(match (positive.is_empty(), negated.is_empty()) {
                    (true, true) => Operator::full(row_count),
                    // all children negated: materialise De Morgan
                    (true, false) => Operator::Complement {
                        child: Box::new(Operator::Union {
                            children: negated,
                            row_count,
                        }),
                        row_count,
                    },
                    _ if positive.len() == 1 && negated.is_empty() => {
                        positive.pop().expect("length checked")
                    }
                    _ => Operator::Intersection {
                        children: positive,
                        negated_children: negated,
                        row_count,
                    },
                })
            }

            Expression::Or(children) => {
                let mut compiled = Vec::new();
                for child in children {
                    let operator = child.compile(ctx, mode)?;
                    if operator.is_empty_constant() {
                        continue;
                    }
                    if operator.is_full_constant() {
                        return Ok(Operator::full(row_count));
                    }
                    match operator {
                        Operator::Union {
                            children: inner, ..
                        } => compiled.extend(inner),
                        other => compiled.push(other),
                    }
                }
                Ok(match compiled.len() {
                    0 => Operator::empty(row_count),
                    1 => compiled.pop().expect("length checked"),
                    _ => Operator::Union {
                        children: compiled,
                        row_count,
                    },
                })
            }

            Expression::Not(child) => Ok(child.compile(ctx, mode.inverted())?.negate()),

            Expression::Maybe(child) => child.compile(ctx, AmbiguityMode::UpperBound),

            Expression::NOf {
                children,
                number_of_matchers,
                match_exactly,
            } => compile_n_of(ctx, mode, children, *number_of_matchers, *match_exactly),

            Expression::NucleotideEquals {
                sequence_name,
                position,
                symbol,
            } => compile_symbol_equals::<crate::symbols::Nucleotide>(
                ctx,
                mode,
                sequence_name.as_deref(),
                *position,
                symbol,
            ),

            Expression::AminoAcidEquals {
                sequence_name,
                position,
                symbol,
            } => compile_symbol_equals::<crate::symbols::AminoAcid>(
                ctx,
                mode,
                sequence_name.as_deref(),
                *position,
                symbol,
            ),

            Expression::HasNucleotideMutation {
                sequence_name,
                position,
            } => compile_has_mutation::<crate::symbols::Nucleotide>(
                ctx,
                mode,
                sequence_name.as_deref(),
                *position,
                |sequence_name, position, symbol| Expression::NucleotideEquals {
                    sequence_name,
                    position,
                    symbol,
                },
            ),

            Expression::HasAminoAcidMutation {
                sequence_name,
                position,
            } => compile_has_mutation::<crate::symbols::AminoAcid>(
                ctx,
                mode,
                sequence_name.as_deref(),
                *position,
                |sequence_name, position, symbol| Expression::AminoAcidEquals {
                    sequence_name,
                    position,
                    symbol,
                },
            ),

            Expression::InsertionContains {
                sequence_name,
                position,
                value,
            } => compile_insertion_contains::<crate::symbols::Nucleotide>(
                ctx,
                sequence_name.as_deref(),
                *position,
                value,
            ),

            Expression::AminoAcidInsertionContains {
                sequence_name,
                position,
                value,
            } => compile_insertion_contains::<crate::symbols::AminoAcid>(
                ctx,
                sequence_name.as_deref(),
                *position,
                value,
            ),

            Expression::IntEquals { column, value } => {
                let (storage, column_type) = ctx.column_storage(column)?;
                let ColumnStorage::Int(int_column) = storage else {
                    return Err(wrong_column_type("IntEquals", column, column_type));
                };
                Ok(make_selection(
                    ScanColumn::Int(int_column),
                    value.map(ScanValue::Int),
                    Comparator::Equals,
                    row_count,
                ))
            }

            Expression::IntBetween { column, from, to } => {
                let (storage, column_type) = ctx.column_storage(column)?;
                let ColumnStorage::Int(int_column) = storage else {
                    return Err(wrong_column_type("IntBetween", column, column_type));
                };
                Ok(make_range_scan(
                    || ScanColumn::Int(int_column),
                    from.map(ScanValue::Int),
                    to.map(ScanValue::Int),
                    row_count,
                ))
            }

            Expression::FloatEquals { column, value } => {
                let (storage, column_type) = ctx.column_storage(column)?;
                let ColumnStorage::Float(float_column) = storage else {
                    return Err(wrong_column_type("FloatEquals", column, column_type));
                };
                Ok(make_selection(
                    ScanColumn::Float(float_column),
                    value.map(ScanValue::Float),
                    Comparator::Equals,
                    row_count,
                ))
            }

            Expression::FloatBetween { column, from, to } => {
                let (storage, column_type) = ctx.column_storage(column)?;
                let ColumnStorage::Float(float_column) = storage else {
                    return Err(wrong_column_type("FloatBetween", column, column_type));
                };
                Ok(make_range_scan(
                    || ScanColumn::Float(float_column),
                    from.map(ScanValue::Float),
                    to.map(ScanValue::Float),
                    row_count,
                ))
            }

            Expression::DateEquals { column, value } => {
                let (storage, column_type) = ctx.column_storage(column)?;
                let ColumnStorage::Date(date_column) = storage else {
                    return Err(wrong_column_type("DateEquals", column, column_type));
                };
                Ok(make_selection(
                    ScanColumn::Date(date_column),
                    value.map(ScanValue::Date),
                    Comparator::Equals,
                    row_count,
                ))
            }

            Expression::DateBetween { column, from, to } => {
                let (storage, column_type) = ctx.column_storage(column)?;
                let ColumnStorage::Date(date_column) = storage else {
                    return Err(wrong_column_type("DateBetween", column, column_type));
                };
                if date_column.is_sorted() {
                    // the sorted range collapses to one contiguous row-id span
                    Ok(Operator::RangeSelection {
                        ranges: vec![date_column.range_of(*from, *to)],
                        row_count,
                    })
                } else {
                    Ok(make_range_scan(
                        || ScanColumn::Date(date_column),
                        from.map(ScanValue::Date),
                        to.map(ScanValue::Date),
                        row_count,
                    ))
                }
            }

            Expression::StringEquals { column, value } => {
                compile_string_equals(ctx, column, value.as_deref())
            }

            Expression::StringInSet { column, values } => {
                let mut children = Vec::new();
                for value in values {
                    let operator = compile_string_equals(ctx, column, Some(value))?;
                    if !operator.is_empty_constant() {
                        children.push(operator);
                    }
                }
                Ok(match children.len() {
                    0 => Operator::empty(row_count),
                    1 => children.pop().expect("length checked"),
                    _ => Operator::Union {
                        children,
                        row_count,
                    },
                })
            }

            Expression::StringSearch {
                column,
                search_expression,
            } => compile_string_search(ctx, column, search_expression),

            Expression::IsNull { column } => compile_is_null(ctx, column),

            Expression::IsNotNull { column } => Ok(compile_is_null(ctx, column)?.negate()),

            Expression::LineageEquals {
                column,
                value,
                include_sublineages,
                mode: edge_mode,
            } => compile_lineage_equals(
                ctx,
                column,
                value.as_deref(),
                *include_sublineages,
                *edge_mode,
            ),
        }
    }
}

fn make_selection<'a>(
    column: ScanColumn<'a>,
    value: Option<ScanValue>,
    comparator: Comparator,
    row_count: u32,
) -> Operator<'a> {
    // a null comparison value means "rows where the column is null"
    match value {
        Some(value) => Operator::Selection {
            column,
            comparator,
            value,
            row_count,
        },
        None => Operator::Selection {
            column,
            comparator: Comparator::IsNull,
            value: ScanValue::None,
            row_count,
        },
    }
}

fn make_range_scan<'a>(
    column: impl Fn() -> ScanColumn<'a>,
    from: Option<ScanValue>,
    to: Option<ScanValue>,
    row_count: u32,
) -> Operator<'a> {
    match (from, to) {
        (None, None) => Operator::Selection {
            column: column(),
            comparator: Comparator::IsNotNull,
            value: ScanValue::None,
            row_count,
        },
        (Some(from), None) => Operator::Selection {
            column: column(),
            comparator: Comparator::GreaterOrEqual,
            value: from,
            row_count,
        },
        (None, Some(to)) => Operator::Selection {
            column: column(),
            comparator: Comparator::LessOrEqual,
            value: to,
            row_count,
        },
        (Some(from), Some(to)) => Operator::Intersection {
            children: vec![
                Operator::Selection {
                    column: column(),
                    comparator: Comparator::GreaterOrEqual,
                    value: from,
                    row_count,
                },
                Operator::Selection {
                    column: column(),
                    comparator: Comparator::LessOrEqual,
                    value: to,
                    row_count,
                },
            ],
            negated_children: Vec::new(),
            row_count,
        },
    }
}

fn compile_n_of<'a>(
    ctx: &CompileContext<'a>,
    mode: AmbiguityMode,
    children: &[Expression],
    number_of_matchers: u32,
    match_exactly: bool,
) -> Result<Operator<'a>, QueryError> {
    let row_count = ctx.row_count();
    let mut needed = i64::from(number_of_matchers);
    let mut compiled = Vec::new();
    for child in children {
        let operator = child.compile(ctx, mode)?;
        if operator.is_full_constant() {
            // an always-true child consumes one required match
            needed -= 1;
            continue;
        }
        if operator.is_empty_constant() {
            continue;
        }
        compiled.push(operator);
    }

    if needed < 0 {
        // more always-true children than allowed matches
        return Ok(if match_exactly {
            Operator::empty(row_count)
        } else {
            Operator::full(row_count)
        });
    }
    if needed == 0 {
        if !match_exactly {
            return Ok(Operator::full(row_count));
        }
        // exactly met already: none of the remaining children may hold
        return Ok(if compiled.is_empty() {
            Operator::full(row_count)
        } else {
            Operator::Complement {
                child: Box::new(Operator::Union {
                    children: compiled,
                    row_count,
                }),
                row_count,
            }
        });
    }
    if needed > compiled.len() as i64 {
        return Ok(Operator::empty(row_count));
    }
    if needed == compiled.len() as i64 {
        // all remaining children must hold: an intersection
        let mut positive = Vec::new();
        let mut negated = Vec::new();
        for operator in compiled {
            match operator {
                Operator::Complement { child, .. } => negated.push(*child),
                other => positive.push(other),
            }
        }
        return Ok(if positive.is_empty() {
            Operator::Complement {
                child: Box::new(Operator::Union {
                    children: negated,
                    row_count,
                }),
                row_count,
            }
        } else {
            Operator::Intersection {
                children: positive,
                negated_children: negated,
                row_count,
            }
        });
    }
    if needed == 1 && !match_exactly {
        return Ok(Operator::Union {
            children: compiled,
            row_count,
        });
    }

    let mut non_negated = Vec::new();
    let mut negated = Vec::new();
    for operator in compiled {
        match operator {
            Operator::Complement { child, .. } => negated.push(*child),
            other => non_negated.push(other),
        }
    }
    Ok(Operator::Threshold {
        non_negated_children: non_negated,
        negated_children: negated,
        number_of_matchers: needed as u32,
        match_exactly,
        row_count,
    })
}

fn compile_string_equals<'a>(
    ctx: &CompileContext<'a>,
    column: &str,
    value: Option<&str>,
) -> Result<Operator<'a>, QueryError> {
    let row_count = ctx.row_count();
    let (storage, column_type) = ctx.column_storage(column)?;
    match storage {
        ColumnStorage::String(string_column) => Ok(make_selection(
            ScanColumn::String(string_column),
            value.map(|text| ScanValue::String(text.to_string())),
            Comparator::Equals,
            row_count,
        )),
        ColumnStorage::Indexed(indexed) => {
            let Some(value) = value else {
                return Ok(Operator::IndexScan {
                    bitmap: Cow::Borrowed(indexed.row_ids_is_null()),
                    row_count,
                });
            };
            let dictionary = ctx
                .table
                .dictionary(column)
                .expect("indexed columns always carry a dictionary");
            let bitmap = dictionary
                .id_of(value)
                .and_then(|id| indexed.row_ids_equal(id));
            Ok(match bitmap {
                Some(bitmap) => Operator::IndexScan {
                    bitmap: Cow::Borrowed(bitmap),
                    row_count,
                },
                None => Operator::empty(row_count),
            })
        }
        _ => Err(wrong_column_type("StringEquals", column, column_type)),
    }
}

fn compile_string_search<'a>(
    ctx: &CompileContext<'a>,
    column: &str,
    pattern: &str,
) -> Result<Operator<'a>, QueryError> {
    let row_count = ctx.row_count();
    let (storage, column_type) = ctx.column_storage(column)?;
    let regex = Regex::new(pattern).map_err(|error| QueryError::InvalidRegex {
        pattern: pattern.to_string(),
        message: error.to_string(),
    })?;
    match storage {
        ColumnStorage::String(string_column) => Ok(Operator::BitmapProducer {
            producer: Box::new(move || {
                let mut result = RoaringBitmap::new();
                for row in 0..row_count {
                    if string_column
                        .value(row)
                        .is_some_and(|text| regex.is_match(text))
                    {
                        result.insert(row);
                    }
                }
                result
            }),
            row_count,
        }),
        ColumnStorage::Indexed(indexed) => {
            let dictionary = ctx
                .table
                .dictionary(column)
                .expect("indexed columns always carry a dictionary");
            Ok(Operator::BitmapProducer {
                producer: Box::new(move || {
                    // scan the distinct value table, not the rows
                    let matching: Vec<&RoaringBitmap> = dictionary
                        .entries()
                        .into_iter()
                        .filter(|(_, value)| regex.is_match(value))
                        .filter_map(|(id, _)| indexed.row_ids_equal(id))
                        .collect();
                    matching.union()
                }),
                row_count,
            })
        }
        _ => Err(wrong_column_type("StringSearch", column, column_type)),
    }
}

fn compile_is_null<'a>(ctx: &CompileContext<'a>, column: &str) -> Result<Operator<'a>, QueryError> {
    let row_count = ctx.row_count();
    let (storage, _) = ctx.column_storage(column)?;
    let null_scan = |column| Operator::Selection {
        column,
        comparator: Comparator::IsNull,
        value: ScanValue::None,
        row_count,
    };
    Ok(match storage {
        ColumnStorage::Indexed(indexed) => Operator::IndexScan {
            bitmap: Cow::Borrowed(indexed.row_ids_is_null()),
            row_count,
        },
        ColumnStorage::String(string_column) => null_scan(ScanColumn::String(string_column)),
        ColumnStorage::Int(int_column) => null_scan(ScanColumn::Int(int_column)),
        ColumnStorage::Float(float_column) => null_scan(ScanColumn::Float(float_column)),
        ColumnStorage::Bool(bool_column) => null_scan(ScanColumn::Bool(bool_column)),
        ColumnStorage::Date(date_column) => null_scan(ScanColumn::Date(date_column)),
        ColumnStorage::Zstd(blob_column) => Operator::BitmapProducer {
            producer: Box::new(move || {
                (0..row_count).filter(|row| blob_column.is_null(*row)).collect()
            }),
            row_count,
        },
    })
}

fn compile_lineage_equals<'a>(
    ctx: &CompileContext<'a>,
    column: &str,
    value: Option<&str>,
    include_sublineages: bool,
    edge_mode: crate::lineage::SublineageMode,
) -> Result<Operator<'a>, QueryError> {
    let row_count = ctx.row_count();
    let (storage, column_type) = ctx.column_storage(column)?;
    if column_type != ColumnType::Lineage {
        return Err(wrong_column_type("LineageEquals", column, column_type));
    }
    let ColumnStorage::Indexed(indexed) = storage else {
        unreachable!("lineage columns are stored indexed");
    };
    let Some(value) = value else {
        return Ok(Operator::IndexScan {
            bitmap: Cow::Borrowed(indexed.row_ids_is_null()),
            row_count,
        });
    };

    let tree = ctx
        .table
        .lineage_tree()
        .expect("tables with lineage columns always carry a lineage tree");
    let dictionary = ctx
        .table
        .dictionary(column)
        .expect("indexed columns always carry a dictionary");

    let Some(canonical) = tree.resolve(value) else {
        // closed world: an undefined lineage matches nothing
        return Ok(Operator::empty(row_count));
    };

    let nodes = if include_sublineages {
        tree.clade_of(canonical, edge_mode)
    } else {
        vec![canonical]
    };

    let mut children: Vec<Operator<'a>> = Vec::new();
    for node in nodes {
        let Some(id) = dictionary.id_of(tree.name_of(node)) else {
            continue;
        };
        if let Some(bitmap) = indexed.row_ids_equal(id) {
            children.push(Operator::IndexScan {
                bitmap: Cow::Borrowed(bitmap),
                row_count,
            });
        }
    }
    Ok(match children.len() {
        0 => Operator::empty(row_count),
        1 => children.pop().expect("length checked"),
        _ => Operator::Union {
            children,
            row_count,
        },
    })
}
