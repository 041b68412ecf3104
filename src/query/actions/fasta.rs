//! Fasta and FastaAligned Actions
//!
//! Sequence reconstruction for the filtered rows. `Fasta` decompresses the
//! raw blob column; `FastaAligned` rebuilds aligned sequences from the
//! reference and the per-position symbol bitmaps. Both emit the primary
//! key, one column per requested sequence, and any additional metadata
//! fields, streaming past the materialization cutoff.

use roaring::RoaringBitmap;

use crate::error::QueryError;
use crate::query::result::QueryResult;
use crate::storage::sequence_store::SequenceStore;
use crate::storage::Table;
use crate::symbols::Symbol;
use crate::value::{Field, Row, RowSchema, Value, ValueKind};

use super::{column_kind, execute_row_emitter, Action, ExecutionContext};

pub(crate) fn output_schema(
    table: &Table,
    sequence_names: &[String],
    additional_fields: Option<&[String]>,
) -> Result<RowSchema, QueryError> {
    for name in sequence_names {
        if !table.schema().has_nucleotide_sequence(name)
            && !table.schema().has_amino_acid_sequence(name)
        {
            return Err(QueryError::UnknownSequence(name.clone()));
        }
    }

    let primary_key = &table.schema().primary_key;
    let mut fields = vec![Field::new(
        primary_key.clone(),
        column_kind(table, primary_key)?,
    )];
    for name in sequence_names {
        fields.push(Field::new(name.clone(), ValueKind::String));
    }
    if let Some(additional) = additional_fields {
        for name in additional {
            fields.push(Field::new(name.clone(), column_kind(table, name)?));
        }
    }
    Ok(RowSchema::new(fields))
}

fn sequences_of<S: Symbol>(
    store: &SequenceStore<S>,
    batch: &RoaringBitmap,
    row_ids: &[u32],
    aligned: bool,
) -> Result<Vec<Option<String>>, QueryError> {
    if aligned {
        Ok(store
            .reconstruct_aligned(batch)
            .into_iter()
            .map(Some)
            .collect())
    } else {
        let blob = store.blob();
        let mut decompressor = blob.decompressor()?;
        row_ids
            .iter()
            .map(|&row| blob.decompress_with(&mut decompressor, row))
            .collect()
    }
}

pub(crate) fn execute<'a>(
    ctx: &ExecutionContext<'a>,
    action: &Action,
    sequence_names: &[String],
    additional_fields: Option<&[String]>,
    filters: Vec<RoaringBitmap>,
    aligned: bool,
) -> Result<QueryResult<'a>, QueryError> {
    let schema = output_schema(ctx.table, sequence_names, additional_fields)?;
    let table = ctx.table;
    let sequence_names: Vec<String> = sequence_names.to_vec();
    let additional: Vec<String> = additional_fields.unwrap_or_default().to_vec();
    let primary_key = table.schema().primary_key.clone();

    let materialize = move |partition_index: usize, batch: &RoaringBitmap| {
        let partition = &table.partitions()[partition_index];
        let key_view = table.column_view(partition, &primary_key)?;
        let additional_views: Vec<_> = additional
            .iter()
            .map(|name| table.column_view(partition, name))
            .collect::<Result<_, _>>()?;

        let row_ids: Vec<u32> = batch.iter().collect();
        let mut sequence_columns: Vec<Vec<Option<String>>> =
            Vec::with_capacity(sequence_names.len());
        for name in &sequence_names {
            if let Some(store) = partition.nucleotide(name) {
                sequence_columns.push(sequences_of(store, batch, &row_ids, aligned)?);
            } else if let Some(store) = partition.amino_acid(name) {
                sequence_columns.push(sequences_of(store, batch, &row_ids, aligned)?);
            } else {
                return Err(QueryError::UnknownSequence(name.clone()));
            }
        }

        let mut rows = Vec::with_capacity(row_ids.len());
        for (slot, &row) in row_ids.iter().enumerate() {
            let mut values = Vec::with_capacity(schema_width(&sequence_columns, &additional_views));
            values.push(key_view.value(row)?);
            for column in &sequence_columns {
                values.push(
                    column[slot]
                        .clone()
                        .map_or(Value::Null, Value::String),
                );
            }
            for view in &additional_views {
                values.push(view.value(row)?);
            }
            rows.push(Row::new(values));
        }
        Ok(rows)
    };

    execute_row_emitter(ctx, action, schema, filters, materialize)
}

fn schema_width(
    sequence_columns: &[Vec<Option<String>>],
    additional_views: &[crate::storage::ColumnView<'_>],
) -> usize {
    1 + sequence_columns.len() + additional_views.len()
}
