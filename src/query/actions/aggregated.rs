//! Aggregated Action
//!
//! Counts rows per distinct combination of group-by values. Partitions
//! aggregate independently into per-partition dictionaries; the final
//! merge sums counts. Without group-by fields the action collapses to a
//! single global count summed from the filter cardinalities.

use std::collections::HashMap;

use rayon::prelude::*;
use roaring::RoaringBitmap;

use crate::error::QueryError;
use crate::query::result::QueryResult;
use crate::value::{Field, GroupKey, Row, RowSchema, Value, ValueKind};

use super::{apply_ordering, column_kind, Action, ExecutionContext};

pub(crate) const COUNT_FIELD: &str = "count";

pub(crate) fn output_schema(
    table: &crate::storage::Table,
    group_by_fields: &[String],
) -> Result<RowSchema, QueryError> {
    let mut fields = Vec::with_capacity(group_by_fields.len() + 1);
    for name in group_by_fields {
        fields.push(Field::new(name.clone(), column_kind(table, name)?));
    }
    fields.push(Field::new(COUNT_FIELD, ValueKind::Long));
    Ok(RowSchema::new(fields))
}

pub(crate) fn execute<'a>(
    ctx: &ExecutionContext<'a>,
    action: &Action,
    group_by_fields: &[String],
    filters: &[RoaringBitmap],
) -> Result<QueryResult<'a>, QueryError> {
    let schema = output_schema(ctx.table, group_by_fields)?;

    if group_by_fields.is_empty() {
        let count: u64 = filters.par_iter().map(RoaringBitmap::len).sum();
        let mut rows = vec![Row::new(vec![Value::Long(count as i64)])];
        apply_ordering(&mut rows, &schema, action)?;
        return Ok(QueryResult::materialized(schema, rows));
    }

    let partition_maps: Vec<HashMap<GroupKey, (Vec<Value>, u64)>> = ctx
        .table
        .partitions()
        .par_iter()
        .zip(filters.par_iter())
        .map(|(partition, filter)| {
            ctx.deadline.check()?;
            let views: Vec<_> = group_by_fields
                .iter()
                .map(|name| ctx.table.column_view(partition, name))
                .collect::<Result<_, _>>()?;

            let mut groups: HashMap<GroupKey, (Vec<Value>, u64)> = HashMap::new();
            for row in filter.iter() {
                let values: Vec<Value> = views
                    .iter()
                    .map(|view| view.value(row))
                    .collect::<Result<_, _>>()?;
                let key = GroupKey::new(&values);
                groups
                    .entry(key)
                    .or_insert_with(|| (values, 0))
                    .1 += 1;
            }
            Ok(groups)
        })
        .collect::<Result<_, QueryError>>()?;

    let mut merged: HashMap<GroupKey, (Vec<Value>, u64)> = HashMap::new();
    for partition_map in partition_maps {
        for (key, (values, count)) in partition_map {
            merged.entry(key).or_insert_with(|| (values, 0)).1 += count;
        }
    }

    let mut rows: Vec<Row> = merged
        .into_values()
        .map(|(mut values, count)| {
            values.push(Value::Long(count as i64));
            Row::new(values)
        })
        .collect();
    // deterministic emission order before the explicit ordering stage
    rows.sort_by(|left, right| {
        for index in 0..left.values.len() {
            let ordering = left.values[index].compare(&right.values[index]);
            if ordering != std::cmp::Ordering::Equal {
                return ordering;
            }
        }
        std::cmp::Ordering::Equal
    });

    apply_ordering(&mut rows, &schema, action)?;
    Ok(QueryResult::materialized(schema, rows))
}
