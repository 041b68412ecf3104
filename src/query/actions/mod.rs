//! Actions
//!
//! The consumer side of the pipeline: an action receives the per-partition
//! filter bitmaps and the table, and produces the result rows. Every
//! action carries the shared ordering controls (`orderByFields`, `limit`,
//! `offset`, `randomize`), applied after the action emits.
//!
//! Row-emitting actions (Details, Fasta, FastaAligned) switch to lazy
//! batch streaming once the result set exceeds the materialization cutoff;
//! sorting is then unavailable.

pub mod aggregated;
pub mod details;
pub mod fasta;
pub mod insertions;
pub mod mutations;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use roaring::RoaringBitmap;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value as Json;
use tracing::debug;

use crate::common::QueryDeadline;
use crate::config::RuntimeConfig;
use crate::error::QueryError;
use crate::query::batched_reader::BatchedBitmapReader;
use crate::query::result::QueryResult;
use crate::schema::ColumnType;
use crate::storage::Table;
use crate::symbols::{AminoAcid, Nucleotide};
use crate::value::{Row, RowSchema, ValueKind};

/// One entry of `orderByFields`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderByField {
    pub field: String,
    pub ascending: bool,
}

/// A parsed action: the kind plus the shared ordering controls.
#[derive(Debug, Clone)]
pub struct Action {
    pub kind: ActionKind,
    pub order_by_fields: Vec<OrderByField>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub randomize_seed: Option<u64>,
}

/// The closed action vocabulary.
#[derive(Debug, Clone)]
pub enum ActionKind {
    Aggregated {
        group_by_fields: Vec<String>,
    },
    Details {
        fields: Option<Vec<String>>,
    },
    NucleotideMutations {
        min_proportion: f64,
        sequence_names: Option<Vec<String>>,
        fields: Option<Vec<String>>,
    },
    AminoAcidMutations {
        min_proportion: f64,
        sequence_names: Option<Vec<String>>,
        fields: Option<Vec<String>>,
    },
    NucleotideInsertions {
        sequence_names: Option<Vec<String>>,
    },
    AminoAcidInsertions {
        sequence_names: Option<Vec<String>>,
    },
    Fasta {
        sequence_names: Vec<String>,
        additional_fields: Option<Vec<String>>,
    },
    FastaAligned {
        sequence_names: Vec<String>,
        additional_fields: Option<Vec<String>>,
    },
}

impl ActionKind {
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::Aggregated { .. } => "Aggregated",
            ActionKind::Details { .. } => "Details",
            ActionKind::NucleotideMutations { .. } => "Mutations",
            ActionKind::AminoAcidMutations { .. } => "AminoAcidMutations",
            ActionKind::NucleotideInsertions { .. } => "Insertions",
            ActionKind::AminoAcidInsertions { .. } => "AminoAcidInsertions",
            ActionKind::Fasta { .. } => "Fasta",
            ActionKind::FastaAligned { .. } => "FastaAligned",
        }
    }
}

/// Shared state of one query execution.
pub(crate) struct ExecutionContext<'a> {
    pub table: &'a Table,
    pub config: &'a RuntimeConfig,
    pub deadline: QueryDeadline,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct AggregatedPayload {
    group_by_fields: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct DetailsPayload {
    fields: Option<Vec<String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct MutationsPayload {
    min_proportion: f64,
    sequence_names: Option<Vec<String>>,
    fields: Option<Vec<String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct InsertionsPayload {
    sequence_names: Option<Vec<String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct FastaPayload {
    sequence_names: Vec<String>,
    additional_fields: Option<Vec<String>>,
}

fn parse_payload<T: DeserializeOwned>(
    kind: &str,
    fields: serde_json::Map<String, Json>,
) -> Result<T, QueryError> {
    serde_json::from_value(Json::Object(fields))
        .map_err(|error| QueryError::QueryParse(format!("in {kind} action: {error}")))
}

fn parse_order_by(json: Option<Json>) -> Result<Vec<OrderByField>, QueryError> {
    let Some(json) = json else {
        return Ok(Vec::new());
    };
    let Json::Array(entries) = json else {
        return Err(QueryError::QueryParse(
            "orderByFields must be an array".to_string(),
        ));
    };
    let mut fields = Vec::with_capacity(entries.len());
    for entry in entries {
        match entry {
            Json::String(field) => fields.push(OrderByField {
                field,
                ascending: true,
            }),
            Json::Object(object) => {
                #[derive(Deserialize)]
                #[serde(rename_all = "camelCase", deny_unknown_fields)]
                struct Entry {
                    field: String,
                    order: Option<String>,
                }
                let entry: Entry = serde_json::from_value(Json::Object(object)).map_err(
                    |error| QueryError::QueryParse(format!("in orderByFields: {error}")),
                )?;
                let ascending = match entry.order.as_deref() {
                    None | Some("ascending") => true,
                    Some("descending") => false,
                    Some(other) => {
                        return Err(QueryError::QueryParse(format!(
                            "orderByFields order must be 'ascending' or 'descending', got '{other}'"
                        )))
                    }
                };
                fields.push(OrderByField {
                    field: entry.field,
                    ascending,
                });
            }
            _ => {
                return Err(QueryError::QueryParse(
                    "orderByFields entries must be strings or objects".to_string(),
                ))
            }
        }
    }
    Ok(fields)
}

fn parse_randomize(json: Option<Json>) -> Result<Option<u64>, QueryError> {
    match json {
        None | Some(Json::Bool(false)) => Ok(None),
        Some(Json::Object(object)) => {
            #[derive(Deserialize)]
            #[serde(deny_unknown_fields)]
            struct Randomize {
                seed: u64,
            }
            let randomize: Randomize = serde_json::from_value(Json::Object(object))
                .map_err(|error| QueryError::QueryParse(format!("in randomize: {error}")))?;
            Ok(Some(randomize.seed))
        }
        Some(Json::Bool(true)) => Err(QueryError::QueryParse(
            "randomize requires an explicit seed: {\"seed\": <number>}".to_string(),
        )),
        Some(_) => Err(QueryError::QueryParse(
            "randomize must be false or {\"seed\": <number>}".to_string(),
        )),
    }
}

fn parse_count(name: &str, json: Option<Json>) -> Result<Option<u32>, QueryError> {
    match json {
        None | Some(Json::Null) => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|error| QueryError::QueryParse(format!("in {name}: {error}"))),
    }
}

impl Action {
    /// Parse an action from its JSON representation.
    pub fn from_json(json: &Json) -> Result<Action, QueryError> {
        let Json::Object(object) = json else {
            return Err(QueryError::QueryParse(
                "action must be a JSON object".to_string(),
            ));
        };
        let mut fields = object.clone();
        let kind_tag = match fields.remove("type") {
            Some(Json::String(kind)) => kind,
            Some(_) => {
                return Err(QueryError::QueryParse(
                    "action field 'type' must be a string".to_string(),
                ))
            }
            None => {
                return Err(QueryError::QueryParse(
                    "action is missing the field 'type'".to_string(),
                ))
            }
        };

        let order_by_fields = parse_order_by(fields.remove("orderByFields"))?;
        let limit = parse_count("limit", fields.remove("limit"))?;
        let offset = parse_count("offset", fields.remove("offset"))?;
        let randomize_seed = parse_randomize(fields.remove("randomize"))?;
        if randomize_seed.is_some() && !order_by_fields.is_empty() {
            return Err(QueryError::QueryParse(
                "randomize and orderByFields are mutually exclusive".to_string(),
            ));
        }

        let kind = match kind_tag.as_str() {
            "Aggregated" => {
                let payload: AggregatedPayload = parse_payload(&kind_tag, fields)?;
                ActionKind::Aggregated {
                    group_by_fields: payload.group_by_fields,
                }
            }
            "Details" => {
                let payload: DetailsPayload = parse_payload(&kind_tag, fields)?;
                ActionKind::Details {
                    fields: payload.fields,
                }
            }
            "Mutations" | "NucleotideMutations" | "AminoAcidMutations" => {
                let payload: MutationsPayload = parse_payload(&kind_tag, fields)?;
                if !(0.0..=1.0).contains(&payload.min_proportion) {
                    return Err(QueryError::QueryParse(format!(
                        "minProportion must be within [0, 1], got {}",
                        payload.min_proportion
                    )));
                }
                if let Some(requested) = &payload.fields {
                    for field in requested {
                        if !mutations::FIELD_ORDER.contains(&field.as_str()) {
                            return Err(QueryError::QueryParse(format!(
                                "unknown mutations field '{field}'"
                            )));
                        }
                    }
                }
                if kind_tag == "AminoAcidMutations" {
                    ActionKind::AminoAcidMutations {
                        min_proportion: payload.min_proportion,
                        sequence_names: payload.sequence_names,
                        fields: payload.fields,
                    }
                } else {
                    ActionKind::NucleotideMutations {
                        min_proportion: payload.min_proportion,
                        sequence_names: payload.sequence_names,
                        fields: payload.fields,
                    }
                }
            }
            "Insertions" | "NucleotideInsertions" => {
                let payload: InsertionsPayload = parse_payload(&kind_tag, fields)?;
                ActionKind::NucleotideInsertions {
                    sequence_names: payload.sequence_names,
                }
            }
            "AminoAcidInsertions" => {
                let payload: InsertionsPayload = parse_payload(&kind_tag, fields)?;
                ActionKind::AminoAcidInsertions {
                    sequence_names: payload.sequence_names,
                }
            }
            "Fasta" => {
                let payload: FastaPayload = parse_payload(&kind_tag, fields)?;
                ActionKind::Fasta {
                    sequence_names: payload.sequence_names,
                    additional_fields: payload.additional_fields,
                }
            }
            "FastaAligned" => {
                let payload: FastaPayload = parse_payload(&kind_tag, fields)?;
                ActionKind::FastaAligned {
                    sequence_names: payload.sequence_names,
                    additional_fields: payload.additional_fields,
                }
            }
            unknown => {
                return Err(QueryError::QueryParse(format!(
                    "unknown action type '{unknown}'"
                )))
            }
        };

        Ok(Action {
            kind,
            order_by_fields,
            limit,
            offset,
            randomize_seed,
        })
    }

    /// The schema of the rows this action emits against `table`.
    pub fn output_schema(&self, table: &Table) -> Result<RowSchema, QueryError> {
        match &self.kind {
            ActionKind::Aggregated { group_by_fields } => {
                aggregated::output_schema(table, group_by_fields)
            }
            ActionKind::Details { fields } => details::output_schema(table, fields.as_deref()),
            ActionKind::NucleotideMutations { fields, .. }
            | ActionKind::AminoAcidMutations { fields, .. } => {
                Ok(mutations::output_schema(fields.as_deref()))
            }
            ActionKind::NucleotideInsertions { .. } | ActionKind::AminoAcidInsertions { .. } => {
                Ok(insertions::output_schema())
            }
            ActionKind::Fasta {
                sequence_names,
                additional_fields,
            }
            | ActionKind::FastaAligned {
                sequence_names,
                additional_fields,
            } => fasta::output_schema(table, sequence_names, additional_fields.as_deref()),
        }
    }

    /// Validate that every order-by field is part of the output schema.
    pub fn validate_order_by(&self, table: &Table) -> Result<(), QueryError> {
        let schema = self.output_schema(table)?;
        for order_by in &self.order_by_fields {
            if schema.index_of(&order_by.field).is_none() {
                return Err(QueryError::QueryParse(format!(
                    "orderByFields entry '{}' is not a field of this action's result",
                    order_by.field
                )));
            }
        }
        Ok(())
    }

    /// Run the action over the per-partition filter bitmaps.
    pub(crate) fn execute<'a>(
        &self,
        ctx: &ExecutionContext<'a>,
        filters: Vec<RoaringBitmap>,
    ) -> Result<QueryResult<'a>, QueryError> {
        debug!(action = self.kind.name(), "executing action");
        match &self.kind {
            ActionKind::Aggregated { group_by_fields } => {
                aggregated::execute(ctx, self, group_by_fields, &filters)
            }
            ActionKind::Details { fields } => {
                details::execute(ctx, self, fields.as_deref(), filters)
            }
            ActionKind::NucleotideMutations {
                min_proportion,
                sequence_names,
                fields,
            } => mutations::execute::<Nucleotide>(
                ctx,
                self,
                *min_proportion,
                sequence_names.as_deref(),
                fields.as_deref(),
                &filters,
            ),
            ActionKind::AminoAcidMutations {
                min_proportion,
                sequence_names,
                fields,
            } => mutations::execute::<AminoAcid>(
                ctx,
                self,
                *min_proportion,
                sequence_names.as_deref(),
                fields.as_deref(),
                &filters,
            ),
            ActionKind::NucleotideInsertions { sequence_names } => {
                insertions::execute::<Nucleotide>(ctx, self, sequence_names.as_deref(), &filters)
            }
            ActionKind::AminoAcidInsertions { sequence_names } => {
                insertions::execute::<AminoAcid>(ctx, self, sequence_names.as_deref(), &filters)
            }
            ActionKind::Fasta {
                sequence_names,
                additional_fields,
            } => fasta::execute(
                ctx,
                self,
                sequence_names,
                additional_fields.as_deref(),
                filters,
                false,
            ),
            ActionKind::FastaAligned {
                sequence_names,
                additional_fields,
            } => fasta::execute(
                ctx,
                self,
                sequence_names,
                additional_fields.as_deref(),
                filters,
                true,
            ),
        }
    }
}

/// Result-field kind of a metadata column.
pub(crate) fn column_kind(table: &Table, name: &str) -> Result<ValueKind, QueryError> {
    let column = table
        .schema()
        .column(name)
        .ok_or_else(|| QueryError::UnknownColumn(name.to_string()))?;
    Ok(match column.column_type {
        ColumnType::String
        | ColumnType::IndexedString
        | ColumnType::Lineage
        | ColumnType::ZstdCompressedString => ValueKind::String,
        ColumnType::Int => ValueKind::Int,
        ColumnType::Float => ValueKind::Float,
        ColumnType::Bool => ValueKind::Bool,
        ColumnType::Date { .. } => ValueKind::Date,
    })
}

/// Ordering stage: seeded shuffle or stable multi-field sort, then offset
/// and limit. Applies to materialised results only.
pub(crate) fn apply_ordering(
    rows: &mut Vec<Row>,
    schema: &RowSchema,
    action: &Action,
) -> Result<(), QueryError> {
    if let Some(seed) = action.randomize_seed {
        let mut rng = StdRng::seed_from_u64(seed);
        rows.shuffle(&mut rng);
    } else if !action.order_by_fields.is_empty() {
        let mut sort_keys = Vec::with_capacity(action.order_by_fields.len());
        for order_by in &action.order_by_fields {
            let index = schema.index_of(&order_by.field).ok_or_else(|| {
                QueryError::QueryParse(format!(
                    "orderByFields entry '{}' is not a field of this action's result",
                    order_by.field
                ))
            })?;
            sort_keys.push((index, order_by.ascending));
        }
        // Vec::sort_by is stable, so equal keys keep their emission order
        rows.sort_by(|left, right| {
            for &(index, ascending) in &sort_keys {
                let ordering = left.values[index].compare(&right.values[index]);
                let ordering = if ascending { ordering } else { ordering.reverse() };
                if ordering != std::cmp::Ordering::Equal {
                    return ordering;
                }
            }
            std::cmp::Ordering::Equal
        });
    }

    if let Some(offset) = action.offset {
        let offset = (offset as usize).min(rows.len());
        rows.drain(..offset);
    }
    if let Some(limit) = action.limit {
        rows.truncate(limit as usize);
    }
    Ok(())
}

/// Shared execution path for row-emitting actions (Details, Fasta,
/// FastaAligned): materialise below the cutoff, stream lazy batches above
/// it. `materialize` turns one batch of row-ids of one partition into rows.
pub(crate) fn execute_row_emitter<'a, F>(
    ctx: &ExecutionContext<'a>,
    action: &Action,
    schema: RowSchema,
    filters: Vec<RoaringBitmap>,
    materialize: F,
) -> Result<QueryResult<'a>, QueryError>
where
    F: Fn(usize, &RoaringBitmap) -> Result<Vec<Row>, QueryError> + 'a,
{
    let total: u64 = filters.iter().map(RoaringBitmap::len).sum();

    if total <= ctx.config.materialization_cutoff {
        let mut rows = Vec::new();
        for (partition_index, filter) in filters.iter().enumerate() {
            ctx.deadline.check()?;
            if filter.is_empty() {
                continue;
            }
            rows.extend(materialize(partition_index, filter)?);
        }
        apply_ordering(&mut rows, &schema, action)?;
        return Ok(QueryResult::materialized(schema, rows));
    }

    if action.randomize_seed.is_some() || !action.order_by_fields.is_empty() {
        return Err(QueryError::BadRequest(format!(
            "result set of {total} rows exceeds the materialization cutoff of {}; \
             sorting and randomization are unavailable on streamed results",
            ctx.config.materialization_cutoff
        )));
    }

    debug!(total, "streaming result set past the materialization cutoff");
    let readers: Vec<(usize, BatchedBitmapReader)> = filters
        .into_iter()
        .enumerate()
        .filter(|(_, filter)| !filter.is_empty())
        .map(|(partition_index, filter)| {
            (
                partition_index,
                BatchedBitmapReader::new(filter, ctx.config.result_batch_size.max(1)),
            )
        })
        .collect();

    let stream = BatchStream {
        readers: readers.into_iter(),
        current: None,
        materialize,
        deadline: ctx.deadline.clone(),
        skip: action.offset.map_or(0, u64::from),
        take: action.limit.map(u64::from),
        finished: false,
    };
    Ok(QueryResult::streaming(schema, stream))
}

/// Lazy batch iterator over the per-partition batched readers, preserving
/// partition order. Applies offset/limit at row granularity and checks the
/// deadline at every batch boundary.
struct BatchStream<F> {
    readers: std::vec::IntoIter<(usize, BatchedBitmapReader)>,
    current: Option<(usize, BatchedBitmapReader)>,
    materialize: F,
    deadline: QueryDeadline,
    skip: u64,
    take: Option<u64>,
    finished: bool,
}

impl<F> Iterator for BatchStream<F>
where
    F: Fn(usize, &RoaringBitmap) -> Result<Vec<Row>, QueryError>,
{
    type Item = Result<Vec<Row>, QueryError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if let Err(error) = self.deadline.check() {
            self.finished = true;
            return Some(Err(error));
        }
        if self.take == Some(0) {
            self.finished = true;
            return None;
        }

        loop {
            if self.current.is_none() {
                self.current = self.readers.next();
            }
            let (partition_index, batch) = match self.current.as_mut() {
                None => {
                    self.finished = true;
                    return None;
                }
                Some((partition_index, reader)) => (*partition_index, reader.next_batch()),
            };
            let Some(batch) = batch else {
                self.current = None;
                continue;
            };

            let mut rows = match (self.materialize)(partition_index, &batch) {
                Ok(rows) => rows,
                Err(error) => {
                    self.finished = true;
                    return Some(Err(error));
                }
            };

            if self.skip > 0 {
                let dropped = (self.skip as usize).min(rows.len());
                rows.drain(..dropped);
                self.skip -= dropped as u64;
            }
            if let Some(take) = self.take.as_mut() {
                if rows.len() as u64 > *take {
                    rows.truncate(*take as usize);
                }
                *take -= rows.len() as u64;
            }
            if rows.is_empty() {
                continue;
            }
            return Some(Ok(rows));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Field, Value};

    fn parse(json: &str) -> Result<Action, QueryError> {
        let value: Json = serde_json::from_str(json).expect("test input is valid JSON");
        Action::from_json(&value)
    }

    #[test]
    fn parses_ordering_controls() {
        let action = parse(
            r#"{"type": "Aggregated", "groupByFields": ["country"],
                "orderByFields": ["country", {"field": "count", "order": "descending"}],
                "limit": 10, "offset": 2}"#,
        )
        .expect("valid action");
        assert_eq!(action.order_by_fields.len(), 2);
        assert!(action.order_by_fields[0].ascending);
        assert!(!action.order_by_fields[1].ascending);
        assert_eq!(action.limit, Some(10));
        assert_eq!(action.offset, Some(2));
    }

    #[test]
    fn randomize_excludes_order_by() {
        let error = parse(
            r#"{"type": "Details", "orderByFields": ["country"], "randomize": {"seed": 7}}"#,
        )
        .expect_err("must be mutually exclusive");
        assert!(error.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn randomize_true_requires_a_seed() {
        let error =
            parse(r#"{"type": "Details", "randomize": true}"#).expect_err("must require a seed");
        assert!(error.to_string().contains("seed"));
    }

    #[test]
    fn unknown_action_field_is_rejected() {
        let error = parse(r#"{"type": "Aggregated", "groupByFields": [], "groupBy": []}"#)
            .expect_err("unknown field must fail");
        assert!(error.to_string().contains("groupBy"), "{error}");
    }

    #[test]
    fn min_proportion_is_range_checked() {
        let error = parse(r#"{"type": "Mutations", "minProportion": 1.5}"#)
            .expect_err("out-of-range proportion must fail");
        assert!(error.to_string().contains("minProportion"));
    }

    #[test]
    fn unknown_mutations_field_is_rejected() {
        let error = parse(
            r#"{"type": "Mutations", "minProportion": 0.05, "fields": ["mutation", "frequency"]}"#,
        )
        .expect_err("unknown field must fail");
        assert!(error.to_string().contains("frequency"));
    }

    #[test]
    fn ordering_sorts_then_slices() {
        let schema = RowSchema::new(vec![
            Field::new("country", ValueKind::String),
            Field::new("count", ValueKind::Long),
        ]);
        let mut rows = vec![
            Row::new(vec![Value::String("b".into()), Value::Long(1)]),
            Row::new(vec![Value::String("a".into()), Value::Long(3)]),
            Row::new(vec![Value::String("c".into()), Value::Long(2)]),
        ];
        let action = Action {
            kind: ActionKind::Details { fields: None },
            order_by_fields: vec![OrderByField {
                field: "country".to_string(),
                ascending: true,
            }],
            limit: Some(1),
            offset: Some(1),
            randomize_seed: None,
        };
        apply_ordering(&mut rows, &schema, &action).expect("valid fields");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].values[0], Value::String("b".into()));
    }

    #[test]
    fn seeded_shuffle_is_deterministic() {
        let schema = RowSchema::new(vec![Field::new("count", ValueKind::Long)]);
        let base: Vec<Row> = (0..20).map(|n| Row::new(vec![Value::Long(n)])).collect();
        let action = Action {
            kind: ActionKind::Details { fields: None },
            order_by_fields: Vec::new(),
            limit: None,
            offset: None,
            randomize_seed: Some(42),
        };
        let mut first = base.clone();
        let mut second = base.clone();
        apply_ordering(&mut first, &schema, &action).expect("no fields to resolve");
        apply_ordering(&mut second, &schema, &action).expect("no fields to resolve");
        assert_eq!(first, second);
        assert_ne!(first, base);
    }
}
