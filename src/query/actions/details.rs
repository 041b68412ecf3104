//! Details Action
//!
//! Projects the requested metadata columns for every filtered row. With no
//! field list, every metadata column is projected; sequence blobs are not
//! metadata columns and never appear here.

use roaring::RoaringBitmap;

use crate::error::QueryError;
use crate::query::result::QueryResult;
use crate::storage::Table;
use crate::value::{Field, Row, RowSchema};

use super::{column_kind, execute_row_emitter, Action, ExecutionContext};

fn projected_columns(table: &Table, fields: Option<&[String]>) -> Result<Vec<String>, QueryError> {
    match fields {
        Some(requested) => {
            for name in requested {
                if table.schema().column(name).is_none() {
                    return Err(QueryError::UnknownColumn(name.clone()));
                }
            }
            Ok(requested.to_vec())
        }
        None => Ok(table
            .schema()
            .columns
            .iter()
            .map(|column| column.name.clone())
            .collect()),
    }
}

pub(crate) fn output_schema(
    table: &Table,
    fields: Option<&[String]>,
) -> Result<RowSchema, QueryError> {
    let names = projected_columns(table, fields)?;
    let mut schema_fields = Vec::with_capacity(names.len());
    for name in names {
        let kind = column_kind(table, &name)?;
        schema_fields.push(Field::new(name, kind));
    }
    Ok(RowSchema::new(schema_fields))
}

pub(crate) fn execute<'a>(
    ctx: &ExecutionContext<'a>,
    action: &Action,
    fields: Option<&[String]>,
    filters: Vec<RoaringBitmap>,
) -> Result<QueryResult<'a>, QueryError> {
    let schema = output_schema(ctx.table, fields)?;
    let names: Vec<String> = schema.field_names().map(str::to_string).collect();
    let table = ctx.table;

    let materialize = move |partition_index: usize, batch: &RoaringBitmap| {
        let partition = &table.partitions()[partition_index];
        let views: Vec<_> = names
            .iter()
            .map(|name| table.column_view(partition, name))
            .collect::<Result<_, _>>()?;
        batch
            .iter()
            .map(|row| {
                let values = views
                    .iter()
                    .map(|view| view.value(row))
                    .collect::<Result<_, _>>()?;
                Ok(Row::new(values))
            })
            .collect()
    };

    execute_row_emitter(ctx, action, schema, filters, materialize)
}
