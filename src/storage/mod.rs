//! Indexed Store
//!
//! The frozen, read-optimized table: typed metadata columns, per-position
//! sequence bitmaps and the lineage tree, partitioned into disjoint shards
//! for parallel query evaluation.
//!
//! Tables are built bulk, partition by partition, through
//! [`PartitionBuilder`]; once a partition is finished it is sealed
//! (bitmaps flip-optimized and run-compressed, insertion indexes built) and
//! never mutated again. Queries see a consistent snapshot with no
//! synchronisation.

pub mod column;
pub mod insertion_index;
pub mod sequence_store;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;

use crate::error::{QueryError, StorageError};
use crate::lineage::LineageTree;
use crate::schema::{ColumnType, ReferenceGenomes, TableSchema};
use crate::symbols::{AminoAcid, Nucleotide, Symbol};
use crate::value::{Value, ValueKind};
use column::{
    BlobCompressor, BoolColumn, DateColumn, Dictionary, FloatColumn, IndexedStringColumn,
    IntColumn, StringColumn, ZstdStringColumn,
};
use sequence_store::SequenceStore;

/// Sequence data of one record at ingestion time.
#[derive(Debug, Clone)]
pub struct SequenceInput {
    /// Aligned sequence, exactly reference length.
    pub aligned: String,
    /// Raw sequence for reconstruction; defaults to the aligned one.
    pub unaligned: Option<String>,
    /// Insertions of the form `position:symbols`.
    pub insertions: Vec<String>,
}

impl SequenceInput {
    pub fn aligned(sequence: impl Into<String>) -> Self {
        SequenceInput {
            aligned: sequence.into(),
            unaligned: None,
            insertions: Vec::new(),
        }
    }

    pub fn with_insertions(mut self, insertions: Vec<String>) -> Self {
        self.insertions = insertions;
        self
    }
}

/// One typed metadata value of a record at ingestion time.
#[derive(Debug, Clone)]
pub enum MetadataValue {
    Null,
    String(String),
    Int(i32),
    Float(f64),
    Bool(bool),
    Date(NaiveDate),
}

impl MetadataValue {
    fn type_name(&self) -> &'static str {
        match self {
            MetadataValue::Null => "null",
            MetadataValue::String(_) => "string",
            MetadataValue::Int(_) => "int32",
            MetadataValue::Float(_) => "float64",
            MetadataValue::Bool(_) => "bool",
            MetadataValue::Date(_) => "date",
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::String(value.to_string())
    }
}

impl From<i32> for MetadataValue {
    fn from(value: i32) -> Self {
        MetadataValue::Int(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Float(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

impl From<NaiveDate> for MetadataValue {
    fn from(value: NaiveDate) -> Self {
        MetadataValue::Date(value)
    }
}

/// One record handed to the builder by the ingestion collaborator.
/// Missing metadata columns and sequences read as null/missing.
#[derive(Debug, Clone, Default)]
pub struct IngestRecord {
    pub metadata: HashMap<String, MetadataValue>,
    pub sequences: HashMap<String, SequenceInput>,
}

impl IngestRecord {
    pub fn new() -> Self {
        IngestRecord::default()
    }

    pub fn set(mut self, column: &str, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(column.to_string(), value.into());
        self
    }

    pub fn set_null(mut self, column: &str) -> Self {
        self.metadata
            .insert(column.to_string(), MetadataValue::Null);
        self
    }

    pub fn set_sequence(mut self, name: &str, input: SequenceInput) -> Self {
        self.sequences.insert(name.to_string(), input);
        self
    }
}

/// Per-partition storage of one metadata column.
#[derive(Debug)]
pub enum ColumnStorage {
    String(StringColumn),
    Indexed(IndexedStringColumn),
    Int(IntColumn),
    Float(FloatColumn),
    Bool(BoolColumn),
    Date(DateColumn),
    Zstd(ZstdStringColumn),
}

/// One shard of a table. Row-ids are contiguous `[0, row_count)`.
#[derive(Debug, Default)]
pub struct Partition {
    pub(crate) row_count: u32,
    pub(crate) columns: HashMap<String, ColumnStorage>,
    pub(crate) nucleotide: HashMap<String, SequenceStore<Nucleotide>>,
    pub(crate) amino_acid: HashMap<String, SequenceStore<AminoAcid>>,
}

impl Partition {
    pub fn row_count(&self) -> u32 {
        self.row_count
    }

    pub fn column(&self, name: &str) -> Option<&ColumnStorage> {
        self.columns.get(name)
    }

    pub fn nucleotide(&self, name: &str) -> Option<&SequenceStore<Nucleotide>> {
        self.nucleotide.get(name)
    }

    pub fn amino_acid(&self, name: &str) -> Option<&SequenceStore<AminoAcid>> {
        self.amino_acid.get(name)
    }
}

/// Read access to one column of one partition, with values decoded into
/// result [`Value`]s.
#[derive(Clone, Copy)]
pub enum ColumnView<'a> {
    String(&'a StringColumn),
    Indexed {
        column: &'a IndexedStringColumn,
        dictionary: &'a Dictionary,
    },
    Int(&'a IntColumn),
    Float(&'a FloatColumn),
    Bool(&'a BoolColumn),
    Date(&'a DateColumn),
    Zstd(&'a ZstdStringColumn),
}

impl ColumnView<'_> {
    pub fn kind(&self) -> ValueKind {
        match self {
            ColumnView::String(_) | ColumnView::Indexed { .. } | ColumnView::Zstd(_) => {
                ValueKind::String
            }
            ColumnView::Int(_) => ValueKind::Int,
            ColumnView::Float(_) => ValueKind::Float,
            ColumnView::Bool(_) => ValueKind::Bool,
            ColumnView::Date(_) => ValueKind::Date,
        }
    }

    pub fn value(&self, row: u32) -> Result<Value, QueryError> {
        Ok(match self {
            ColumnView::String(column) => column
                .value(row)
                .map_or(Value::Null, |text| Value::String(text.to_string())),
            ColumnView::Indexed { column, dictionary } => column
                .value_id(row)
                .map_or(Value::Null, |id| Value::String(dictionary.value(id))),
            ColumnView::Int(column) => column.value(row).map_or(Value::Null, Value::Int),
            ColumnView::Float(column) => column.value(row).map_or(Value::Null, Value::Float),
            ColumnView::Bool(column) => column.value(row).map_or(Value::Null, Value::Bool),
            ColumnView::Date(column) => column.value(row).map_or(Value::Null, Value::Date),
            ColumnView::Zstd(column) => column
                .decompress(row)?
                .map_or(Value::Null, Value::String),
        })
    }
}

/// Alphabet-generic access to a partition's sequence stores, so filter
/// compilation and the mutation/insertion actions are written once.
pub trait SequenceAlphabet: Symbol {
    fn stores(partition: &Partition) -> &HashMap<String, SequenceStore<Self>>;
    fn declared(schema: &TableSchema) -> &[String];
    fn default_sequence(schema: &TableSchema) -> Option<&String>;
}

impl SequenceAlphabet for Nucleotide {
    fn stores(partition: &Partition) -> &HashMap<String, SequenceStore<Nucleotide>> {
        &partition.nucleotide
    }

    fn declared(schema: &TableSchema) -> &[String] {
        &schema.nucleotide_sequences
    }

    fn default_sequence(schema: &TableSchema) -> Option<&String> {
        schema.default_nucleotide_sequence.as_ref()
    }
}

impl SequenceAlphabet for AminoAcid {
    fn stores(partition: &Partition) -> &HashMap<String, SequenceStore<AminoAcid>> {
        &partition.amino_acid
    }

    fn declared(schema: &TableSchema) -> &[String] {
        &schema.amino_acid_sequences
    }

    fn default_sequence(schema: &TableSchema) -> Option<&String> {
        schema.default_amino_acid_sequence.as_ref()
    }
}

/// The frozen table: schema, table-wide metadata and all partitions.
#[derive(Debug)]
pub struct Table {
    schema: TableSchema,
    lineage_tree: Option<LineageTree>,
    dictionaries: HashMap<String, Dictionary>,
    nucleotide_references: HashMap<String, Arc<Vec<Nucleotide>>>,
    amino_acid_references: HashMap<String, Arc<Vec<AminoAcid>>>,
    partitions: Vec<Partition>,
}

impl Table {
    /// Validate the schema against the reference genomes and lineage tree
    /// and create an empty table.
    pub fn new(
        schema: TableSchema,
        references: &ReferenceGenomes,
        lineage_tree: Option<LineageTree>,
    ) -> Result<Self, StorageError> {
        if schema.column(&schema.primary_key).is_none() {
            return Err(StorageError::UndeclaredColumn(schema.primary_key.clone()));
        }

        let mut dictionaries = HashMap::new();
        for column in &schema.columns {
            if column.column_type.is_indexed() {
                dictionaries.insert(column.name.clone(), Dictionary::new());
            }
            if column.column_type == ColumnType::Lineage && lineage_tree.is_none() {
                return Err(StorageError::MissingLineageTree(column.name.clone()));
            }
        }

        let mut nucleotide_references = HashMap::new();
        for name in &schema.nucleotide_sequences {
            let reference = references
                .nucleotide_reference(name)
                .ok_or_else(|| StorageError::MissingReference(name.clone()))?;
            let parsed = Nucleotide::parse_sequence(reference).map_err(|character| {
                StorageError::IllegalCharacter {
                    sequence: name.clone(),
                    character,
                }
            })?;
            nucleotide_references.insert(name.clone(), Arc::new(parsed));
        }

        let mut amino_acid_references = HashMap::new();
        for name in &schema.amino_acid_sequences {
            let reference = references
                .amino_acid_reference(name)
                .ok_or_else(|| StorageError::MissingReference(name.clone()))?;
            let parsed = AminoAcid::parse_sequence(reference).map_err(|character| {
                StorageError::IllegalCharacter {
                    sequence: name.clone(),
                    character,
                }
            })?;
            amino_acid_references.insert(name.clone(), Arc::new(parsed));
        }

        Ok(Table {
            schema,
            lineage_tree,
            dictionaries,
            nucleotide_references,
            amino_acid_references,
            partitions: Vec::new(),
        })
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn lineage_tree(&self) -> Option<&LineageTree> {
        self.lineage_tree.as_ref()
    }

    pub fn dictionary(&self, column: &str) -> Option<&Dictionary> {
        self.dictionaries.get(column)
    }

    pub fn nucleotide_reference(&self, name: &str) -> Option<&Arc<Vec<Nucleotide>>> {
        self.nucleotide_references.get(name)
    }

    pub fn amino_acid_reference(&self, name: &str) -> Option<&Arc<Vec<AminoAcid>>> {
        self.amino_acid_references.get(name)
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn total_row_count(&self) -> u64 {
        self.partitions
            .iter()
            .map(|partition| u64::from(partition.row_count))
            .sum()
    }

    /// Begin building the next partition.
    pub fn start_partition(&self) -> Result<PartitionBuilder<'_>, StorageError> {
        PartitionBuilder::new(self)
    }

    /// Attach a finished partition.
    pub fn add_partition(&mut self, partition: Partition) {
        self.partitions.push(partition);
    }

    /// Convenience for the common bulk path: build one partition from an
    /// iterator of records.
    pub fn build_partition<I>(&mut self, records: I) -> Result<(), StorageError>
    where
        I: IntoIterator<Item = IngestRecord>,
    {
        let mut builder = self.start_partition()?;
        for record in records {
            builder.insert(&record)?;
        }
        let partition = builder.finish();
        self.add_partition(partition);
        Ok(())
    }

    /// Resolve a column of a partition into a typed read view.
    pub fn column_view<'a>(
        &'a self,
        partition: &'a Partition,
        name: &str,
    ) -> Result<ColumnView<'a>, QueryError> {
        let storage = partition
            .column(name)
            .ok_or_else(|| QueryError::UnknownColumn(name.to_string()))?;
        Ok(match storage {
            ColumnStorage::String(column) => ColumnView::String(column),
            ColumnStorage::Indexed(column) => ColumnView::Indexed {
                column,
                dictionary: self
                    .dictionaries
                    .get(name)
                    .expect("indexed columns always carry a dictionary"),
            },
            ColumnStorage::Int(column) => ColumnView::Int(column),
            ColumnStorage::Float(column) => ColumnView::Float(column),
            ColumnStorage::Bool(column) => ColumnView::Bool(column),
            ColumnStorage::Date(column) => ColumnView::Date(column),
            ColumnStorage::Zstd(column) => ColumnView::Zstd(column),
        })
    }
}

/// Builds one partition. Holds the zstd compression contexts, which are
/// dropped when the partition is sealed.
pub struct PartitionBuilder<'a> {
    table: &'a Table,
    partition: Partition,
    sequence_compressors: HashMap<String, BlobCompressor>,
    column_compressors: HashMap<String, BlobCompressor>,
}

impl<'a> PartitionBuilder<'a> {
    fn new(table: &'a Table) -> Result<Self, StorageError> {
        let mut partition = Partition::default();
        let mut column_compressors = HashMap::new();

        for column in &table.schema.columns {
            let storage = match column.column_type {
                ColumnType::String => ColumnStorage::String(StringColumn::new()),
                ColumnType::IndexedString | ColumnType::Lineage => {
                    ColumnStorage::Indexed(IndexedStringColumn::new())
                }
                ColumnType::Int => ColumnStorage::Int(IntColumn::new()),
                ColumnType::Float => ColumnStorage::Float(FloatColumn::new()),
                ColumnType::Bool => ColumnStorage::Bool(BoolColumn::new()),
                ColumnType::Date { sorted } => ColumnStorage::Date(DateColumn::new(sorted)),
                ColumnType::ZstdCompressedString => {
                    let dictionary = Arc::new(Vec::new());
                    column_compressors
                        .insert(column.name.clone(), BlobCompressor::new(&dictionary)?);
                    ColumnStorage::Zstd(ZstdStringColumn::new(dictionary))
                }
            };
            partition.columns.insert(column.name.clone(), storage);
        }

        let mut sequence_compressors = HashMap::new();
        for (name, reference) in &table.nucleotide_references {
            let dictionary: Arc<Vec<u8>> = Arc::new(
                reference
                    .iter()
                    .map(|symbol| symbol.to_char() as u8)
                    .collect(),
            );
            sequence_compressors.insert(name.clone(), BlobCompressor::new(&dictionary)?);
            partition.nucleotide.insert(
                name.clone(),
                SequenceStore::new(
                    name,
                    reference.as_ref().clone(),
                    ZstdStringColumn::new(dictionary),
                ),
            );
        }
        for (name, reference) in &table.amino_acid_references {
            let dictionary: Arc<Vec<u8>> = Arc::new(
                reference
                    .iter()
                    .map(|symbol| symbol.to_char() as u8)
                    .collect(),
            );
            sequence_compressors.insert(name.clone(), BlobCompressor::new(&dictionary)?);
            partition.amino_acid.insert(
                name.clone(),
                SequenceStore::new(
                    name,
                    reference.as_ref().clone(),
                    ZstdStringColumn::new(dictionary),
                ),
            );
        }

        Ok(PartitionBuilder {
            table,
            partition,
            sequence_compressors,
            column_compressors,
        })
    }

    /// Insert one record. Ingest-time only; the record's row-id is the
    /// current partition cardinality.
    pub fn insert(&mut self, record: &IngestRecord) -> Result<(), StorageError> {
        for name in record.metadata.keys() {
            if self.table.schema.column(name).is_none() {
                return Err(StorageError::UndeclaredColumn(name.clone()));
            }
        }
        for name in record.sequences.keys() {
            if !self.table.schema.has_nucleotide_sequence(name)
                && !self.table.schema.has_amino_acid_sequence(name)
            {
                return Err(StorageError::UndeclaredSequence(name.clone()));
            }
        }

        for column_def in &self.table.schema.columns {
            let value = record
                .metadata
                .get(&column_def.name)
                .unwrap_or(&MetadataValue::Null);
            let storage = self
                .partition
                .columns
                .get_mut(&column_def.name)
                .expect("builder created storage for every declared column");
            insert_metadata_value(
                self.table,
                &column_def.name,
                column_def.column_type,
                storage,
                &mut self.column_compressors,
                value,
            )?;
        }

        for (name, store) in &mut self.partition.nucleotide {
            match record.sequences.get(name) {
                Some(input) => {
                    let compressor = self
                        .sequence_compressors
                        .get_mut(name)
                        .expect("builder created a compressor per sequence");
                    store.insert(compressor, input)?;
                }
                None => store.insert_missing(),
            }
        }
        for (name, store) in &mut self.partition.amino_acid {
            match record.sequences.get(name) {
                Some(input) => {
                    let compressor = self
                        .sequence_compressors
                        .get_mut(name)
                        .expect("builder created a compressor per sequence");
                    store.insert(compressor, input)?;
                }
                None => store.insert_missing(),
            }
        }

        self.partition.row_count += 1;
        Ok(())
    }

    /// Seal the partition: flip-optimize and run-compress all sequence
    /// bitmaps and finalize the insertion indexes.
    pub fn finish(mut self) -> Partition {
        for store in self.partition.nucleotide.values_mut() {
            store.optimize();
        }
        for store in self.partition.amino_acid.values_mut() {
            store.optimize();
        }
        self.partition
    }
}

fn insert_metadata_value(
    table: &Table,
    column_name: &str,
    column_type: ColumnType,
    storage: &mut ColumnStorage,
    column_compressors: &mut HashMap<String, BlobCompressor>,
    value: &MetadataValue,
) -> Result<(), StorageError> {
    let mismatch = |expected: &'static str| StorageError::TypeMismatch {
        column: column_name.to_string(),
        expected,
        actual: value.type_name(),
    };

    match (storage, value) {
        (ColumnStorage::String(column), MetadataValue::String(text)) => column.insert(text),
        (ColumnStorage::String(column), MetadataValue::Null) => column.insert_null(),
        (ColumnStorage::String(_), _) => return Err(mismatch("string")),

        (ColumnStorage::Indexed(column), MetadataValue::String(text)) => {
            let dictionary = table
                .dictionaries
                .get(column_name)
                .expect("indexed columns always carry a dictionary");
            let interned = if column_type == ColumnType::Lineage {
                let tree = table
                    .lineage_tree
                    .as_ref()
                    .expect("lineage columns require a lineage tree");
                let canonical = tree
                    .resolve(text)
                    .ok_or_else(|| StorageError::UnknownLineage(text.clone()))?;
                dictionary.intern(tree.name_of(canonical))
            } else {
                dictionary.intern(text)
            };
            column.insert(interned);
        }
        (ColumnStorage::Indexed(column), MetadataValue::Null) => column.insert_null(),
        (ColumnStorage::Indexed(_), _) => return Err(mismatch("string")),

        (ColumnStorage::Int(column), MetadataValue::Int(number)) => column.insert(*number),
        (ColumnStorage::Int(column), MetadataValue::Null) => column.insert_null(),
        (ColumnStorage::Int(_), _) => return Err(mismatch("int32")),

        (ColumnStorage::Float(column), MetadataValue::Float(number)) => column.insert(*number),
        (ColumnStorage::Float(column), MetadataValue::Int(number)) => {
            column.insert(f64::from(*number));
        }
        (ColumnStorage::Float(column), MetadataValue::Null) => column.insert_null(),
        (ColumnStorage::Float(_), _) => return Err(mismatch("float64")),

        (ColumnStorage::Bool(column), MetadataValue::Bool(flag)) => column.insert(*flag),
        (ColumnStorage::Bool(column), MetadataValue::Null) => column.insert_null(),
        (ColumnStorage::Bool(_), _) => return Err(mismatch("bool")),

        (ColumnStorage::Date(column), MetadataValue::Date(date)) => column.insert(*date),
        (ColumnStorage::Date(column), MetadataValue::String(text)) => {
            let date = NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .map_err(|_| StorageError::InvalidDate(text.clone()))?;
            column.insert(date);
        }
        (ColumnStorage::Date(column), MetadataValue::Null) => column.insert_null(),
        (ColumnStorage::Date(_), _) => return Err(mismatch("date")),

        (ColumnStorage::Zstd(column), MetadataValue::String(text)) => {
            let compressor = column_compressors
                .get_mut(column_name)
                .expect("builder created a compressor per blob column");
            let (frame, length) = compressor.compress(text)?;
            column.insert_frame(frame, length);
        }
        (ColumnStorage::Zstd(column), MetadataValue::Null) => column.insert_null(),
        (ColumnStorage::Zstd(_), _) => return Err(mismatch("string")),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnDef;

    fn test_schema() -> TableSchema {
        TableSchema {
            table_name: "surveillance".to_string(),
            primary_key: "accession".to_string(),
            columns: vec![
                ColumnDef::new("accession", ColumnType::String),
                ColumnDef::new("country", ColumnType::IndexedString),
                ColumnDef::new("age", ColumnType::Int),
                ColumnDef::new("date", ColumnType::Date { sorted: false }),
            ],
            nucleotide_sequences: vec!["main".to_string()],
            amino_acid_sequences: vec![],
            default_nucleotide_sequence: Some("main".to_string()),
            default_amino_acid_sequence: None,
        }
    }

    fn references() -> ReferenceGenomes {
        ReferenceGenomes::from_json_str(
            r#"{"nucleotide_sequences": [{"name": "main", "sequence": "ATGCN"}],
                "amino_acid_sequences": []}"#,
        )
        .expect("valid reference file")
    }

    #[test]
    fn builds_and_freezes_partitions() {
        let mut table = Table::new(test_schema(), &references(), None).expect("valid schema");
        table
            .build_partition(vec![
                IngestRecord::new()
                    .set("accession", "id_0")
                    .set("country", "Switzerland")
                    .set("age", 52)
                    .set("date", "2021-03-18")
                    .set_sequence("main", SequenceInput::aligned("ATGCN")),
                IngestRecord::new()
                    .set("accession", "id_1")
                    .set_null("country")
                    .set_sequence("main", SequenceInput::aligned("CTGCN")),
            ])
            .expect("records match the schema");

        assert_eq!(table.partitions().len(), 1);
        let partition = &table.partitions()[0];
        assert_eq!(partition.row_count(), 2);

        let country = table
            .column_view(partition, "country")
            .expect("declared column");
        assert_eq!(
            country.value(0).expect("readable"),
            Value::String("Switzerland".to_string())
        );
        assert_eq!(country.value(1).expect("readable"), Value::Null);

        let store = partition.nucleotide("main").expect("declared sequence");
        assert_eq!(store.row_count(), 2);
        assert!(store.bitmap(0, Nucleotide::C).contains(1));
    }

    #[test]
    fn record_missing_a_sequence_reads_as_missing() {
        let mut table = Table::new(test_schema(), &references(), None).expect("valid schema");
        table
            .build_partition(vec![IngestRecord::new().set("accession", "id_0")])
            .expect("record matches the schema");
        let store = table.partitions()[0]
            .nucleotide("main")
            .expect("declared sequence");
        assert!(store.bitmap(2, Nucleotide::N).contains(0));
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let mut table = Table::new(test_schema(), &references(), None).expect("valid schema");
        let result = table.build_partition(vec![IngestRecord::new().set("age", "fifty")]);
        assert!(matches!(result, Err(StorageError::TypeMismatch { .. })));
    }

    #[test]
    fn undeclared_column_is_rejected() {
        let mut table = Table::new(test_schema(), &references(), None).expect("valid schema");
        let result = table.build_partition(vec![IngestRecord::new().set("region", "Europe")]);
        assert!(matches!(result, Err(StorageError::UndeclaredColumn(name)) if name == "region"));
    }

    #[test]
    fn missing_reference_fails_construction() {
        let mut schema = test_schema();
        schema.nucleotide_sequences.push("second".to_string());
        assert!(matches!(
            Table::new(schema, &references(), None),
            Err(StorageError::MissingReference(name)) if name == "second"
        ));
    }
}
