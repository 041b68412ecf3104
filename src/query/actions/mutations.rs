//! Mutations Action
//!
//! Per-position symbol counts restricted to the filter, emitted as
//! mutation rows where the proportion reaches the threshold. The count
//! arithmetic never materialises flipped bitmaps: a flipped symbol counts
//! as `|F| - |F ∧ stored|`, and partitions fully covered by the filter
//! short-circuit to plain cardinalities.
//!
//! The position sweep is split into chunks on the rayon pool; cancellation
//! is checked between chunks.

use rayon::prelude::*;
use roaring::RoaringBitmap;

use crate::error::QueryError;
use crate::query::result::QueryResult;
use crate::storage::sequence_store::SequenceStore;
use crate::storage::SequenceAlphabet;
use crate::symbols::Symbol;
use crate::value::{Field, Row, RowSchema, Value, ValueKind};

use super::{apply_ordering, Action, ExecutionContext};

/// The emittable fields, in canonical order.
pub(crate) const FIELD_ORDER: [&str; 8] = [
    "mutation",
    "mutationFrom",
    "mutationTo",
    "position",
    "sequenceName",
    "proportion",
    "coverage",
    "count",
];

fn field_kind(name: &str) -> ValueKind {
    match name {
        "position" => ValueKind::Int,
        "proportion" => ValueKind::Float,
        "coverage" | "count" => ValueKind::Long,
        _ => ValueKind::String,
    }
}

pub(crate) fn output_schema(fields: Option<&[String]>) -> RowSchema {
    let selected: Vec<&str> = match fields {
        Some(requested) => FIELD_ORDER
            .iter()
            .copied()
            .filter(|name| requested.iter().any(|field| field == name))
            .collect(),
        None => FIELD_ORDER.to_vec(),
    };
    RowSchema::new(
        selected
            .into_iter()
            .map(|name| Field::new(name, field_kind(name)))
            .collect(),
    )
}

pub(crate) fn resolve_sequence_names<S: SequenceAlphabet>(
    table: &crate::storage::Table,
    sequence_names: Option<&[String]>,
) -> Result<Vec<String>, QueryError> {
    match sequence_names {
        Some(requested) => {
            for name in requested {
                if !S::declared(table.schema()).contains(name) {
                    return Err(QueryError::UnknownSequence(name.clone()));
                }
            }
            Ok(requested.to_vec())
        }
        None => Ok(S::declared(table.schema()).to_vec()),
    }
}

pub(crate) fn execute<'a, S: SequenceAlphabet>(
    ctx: &ExecutionContext<'a>,
    action: &Action,
    min_proportion: f64,
    sequence_names: Option<&[String]>,
    fields: Option<&[String]>,
    filters: &[RoaringBitmap],
) -> Result<QueryResult<'a>, QueryError> {
    let schema = output_schema(fields);
    let names = resolve_sequence_names::<S>(ctx.table, sequence_names)?;

    let mut rows: Vec<Row> = Vec::new();
    for name in &names {
        // split partitions: fully-included filters use cardinality
        // arithmetic, partial filters intersect
        let mut partial: Vec<(&SequenceStore<S>, &RoaringBitmap)> = Vec::new();
        let mut fully_included: Vec<&SequenceStore<S>> = Vec::new();
        for (partition, filter) in ctx.table.partitions().iter().zip(filters) {
            if filter.is_empty() {
                continue;
            }
            let store = S::stores(partition)
                .get(name)
                .expect("declared sequences exist in every partition");
            if filter.len() == u64::from(partition.row_count()) {
                fully_included.push(store);
            } else {
                partial.push((store, filter));
            }
        }
        let Some(reference_store) = partial
            .first()
            .map(|(store, _)| *store)
            .or_else(|| fully_included.first().copied())
        else {
            continue;
        };
        let length = reference_store.length();

        let positions: Vec<usize> = (0..length).collect();
        let grain = ctx.config.mutation_sweep_grain.max(1);
        let counted: Vec<Vec<(usize, Vec<u64>)>> = positions
            .par_chunks(grain)
            .map(|chunk| {
                ctx.deadline.check()?;
                Ok(chunk
                    .iter()
                    .map(|&position| {
                        let counts: Vec<u64> = S::MUTATION_SYMBOLS
                            .iter()
                            .map(|&symbol| {
                                let partial_count: u64 = partial
                                    .iter()
                                    .map(|(store, filter)| {
                                        store.count_in_filter(position, symbol, filter)
                                    })
                                    .sum();
                                let full_count: u64 = fully_included
                                    .iter()
                                    .map(|store| store.count_total(position, symbol))
                                    .sum();
                                partial_count + full_count
                            })
                            .collect();
                        (position, counts)
                    })
                    .collect())
            })
            .collect::<Result<_, QueryError>>()?;

        for chunk in counted {
            for (position, counts) in chunk {
                let coverage: u64 = counts.iter().sum();
                if coverage == 0 {
                    continue;
                }
                let reference_symbol = reference_store.reference_symbol(position);
                for (symbol_index, &symbol) in S::MUTATION_SYMBOLS.iter().enumerate() {
                    if symbol == reference_symbol {
                        continue;
                    }
                    let count = counts[symbol_index];
                    if count == 0 {
                        continue;
                    }
                    let proportion = count as f64 / coverage as f64;
                    if proportion < min_proportion {
                        continue;
                    }
                    rows.push(make_row(
                        &schema,
                        name,
                        position,
                        reference_symbol,
                        symbol,
                        count,
                        coverage,
                        proportion,
                    ));
                }
            }
        }
    }

    apply_ordering(&mut rows, &schema, action)?;
    Ok(QueryResult::materialized(schema, rows))
}

#[allow(clippy::too_many_arguments)]
fn make_row<S: Symbol>(
    schema: &RowSchema,
    sequence_name: &str,
    position: usize,
    reference_symbol: S,
    symbol: S,
    count: u64,
    coverage: u64,
    proportion: f64,
) -> Row {
    let position_one_based = position + 1;
    let values = schema
        .fields
        .iter()
        .map(|field| match field.name.as_str() {
            "mutation" => Value::String(format!(
                "{}{position_one_based}{}",
                reference_symbol.to_char(),
                symbol.to_char()
            )),
            "mutationFrom" => Value::String(reference_symbol.to_char().to_string()),
            "mutationTo" => Value::String(symbol.to_char().to_string()),
            "position" => Value::Int(position_one_based as i32),
            "sequenceName" => Value::String(sequence_name.to_string()),
            "proportion" => Value::Float(proportion),
            "coverage" => Value::Long(coverage as i64),
            "count" => Value::Long(count as i64),
            other => unreachable!("mutations schema only contains known fields, got {other}"),
        })
        .collect();
    Row::new(values)
}
