//! Insertions Action
//!
//! Emits one row per distinct `(sequence, position, inserted string)`
//! carried by any filtered row, with the filtered occurrence count.

use std::collections::HashMap;

use roaring::RoaringBitmap;

use crate::error::QueryError;
use crate::query::result::QueryResult;
use crate::storage::SequenceAlphabet;
use crate::value::{Field, Row, RowSchema, Value, ValueKind};

use super::mutations::resolve_sequence_names;
use super::{apply_ordering, Action, ExecutionContext};

pub(crate) fn output_schema() -> RowSchema {
    RowSchema::new(vec![
        Field::new("sequenceName", ValueKind::String),
        Field::new("position", ValueKind::Int),
        Field::new("insertedSymbols", ValueKind::String),
        Field::new("insertion", ValueKind::String),
        Field::new("count", ValueKind::Long),
    ])
}

/// The formatted insertion label, e.g. `ins_123:AY`. The sequence name is
/// carried by its own field, never folded into the label.
fn insertion_label(position: u32, value: &str) -> String {
    format!("ins_{position}:{value}")
}

pub(crate) fn execute<'a, S: SequenceAlphabet>(
    ctx: &ExecutionContext<'a>,
    action: &Action,
    sequence_names: Option<&[String]>,
    filters: &[RoaringBitmap],
) -> Result<QueryResult<'a>, QueryError> {
    let schema = output_schema();
    let names = resolve_sequence_names::<S>(ctx.table, sequence_names)?;

    let mut rows: Vec<Row> = Vec::new();
    for name in &names {
        ctx.deadline.check()?;
        // (position, inserted string) -> count across partitions
        let mut counts: HashMap<(u32, &str), u64> = HashMap::new();
        for (partition, filter) in ctx.table.partitions().iter().zip(filters) {
            if filter.is_empty() {
                continue;
            }
            let store = S::stores(partition)
                .get(name)
                .expect("declared sequences exist in every partition");
            for (position, entry) in store.insertions().iter_positions() {
                for insertion in &entry.insertions {
                    let count = filter.intersection_len(&insertion.row_ids);
                    if count > 0 {
                        *counts
                            .entry((position, insertion.value.as_str()))
                            .or_default() += count;
                    }
                }
            }
        }

        let mut entries: Vec<((u32, &str), u64)> = counts.into_iter().collect();
        entries.sort_by(|left, right| left.0.cmp(&right.0));
        for ((position, value), count) in entries {
            rows.push(Row::new(vec![
                Value::String(name.clone()),
                Value::Int(position as i32),
                Value::String(value.to_string()),
                Value::String(insertion_label(position, value)),
                Value::Long(count as i64),
            ]));
        }
    }

    apply_ordering(&mut rows, &schema, action)?;
    Ok(QueryResult::materialized(schema, rows))
}
