//! Table Schema
//!
//! A table's schema is declared once: an ordered list of typed metadata
//! columns, the sequence columns with their reference genomes, the primary
//! key, and optional default sequence names consulted when a query omits
//! `sequenceName`.

use std::path::Path;

use serde::Deserialize;

use crate::error::StorageError;

/// Declared type of a metadata column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Raw per-row byte strings, no index
    String,
    /// Strings with a value -> row-id-bitmap index
    IndexedString,
    /// Nullable 32-bit integers
    Int,
    /// Nullable 64-bit floats
    Float,
    /// Nullable booleans
    Bool,
    /// Nullable dates; `sorted` enables contiguous-range scans
    Date { sorted: bool },
    /// Indexed strings whose values are nodes of the lineage tree
    Lineage,
    /// Raw blobs compressed with a table-global zstd dictionary
    ZstdCompressedString,
}

impl ColumnType {
    pub fn type_name(self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::IndexedString => "indexed_string",
            ColumnType::Int => "int32",
            ColumnType::Float => "float64",
            ColumnType::Bool => "bool",
            ColumnType::Date { .. } => "date",
            ColumnType::Lineage => "lineage",
            ColumnType::ZstdCompressedString => "zstd_compressed_string",
        }
    }

    /// Columns carrying a value -> bitmap index.
    pub fn is_indexed(self) -> bool {
        matches!(self, ColumnType::IndexedString | ColumnType::Lineage)
    }
}

/// One declared metadata column.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        ColumnDef {
            name: name.into(),
            column_type,
        }
    }
}

/// The fixed schema of one table.
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub table_name: String,
    /// Metadata column holding the user-visible primary key.
    pub primary_key: String,
    pub columns: Vec<ColumnDef>,
    pub nucleotide_sequences: Vec<String>,
    pub amino_acid_sequences: Vec<String>,
    pub default_nucleotide_sequence: Option<String>,
    pub default_amino_acid_sequence: Option<String>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn has_nucleotide_sequence(&self, name: &str) -> bool {
        self.nucleotide_sequences.iter().any(|entry| entry == name)
    }

    pub fn has_amino_acid_sequence(&self, name: &str) -> bool {
        self.amino_acid_sequences.iter().any(|entry| entry == name)
    }
}

/// One named reference sequence of the reference genome file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NamedSequence {
    pub name: String,
    pub sequence: String,
}

/// The reference genome file: the reference string for every declared
/// sequence column of either alphabet.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReferenceGenomes {
    #[serde(default)]
    pub nucleotide_sequences: Vec<NamedSequence>,
    #[serde(default)]
    pub amino_acid_sequences: Vec<NamedSequence>,
}

impl ReferenceGenomes {
    pub fn from_file(path: &Path) -> Result<Self, StorageError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn from_json_str(json: &str) -> Result<Self, StorageError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn nucleotide_reference(&self, name: &str) -> Option<&str> {
        self.nucleotide_sequences
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.sequence.as_str())
    }

    pub fn amino_acid_reference(&self, name: &str) -> Option<&str> {
        self.amino_acid_sequences
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.sequence.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_genomes_parse_from_json() {
        let json = r#"{
            "nucleotide_sequences": [{"name": "main", "sequence": "ATGCN"}],
            "amino_acid_sequences": [{"name": "S", "sequence": "M*"}]
        }"#;
        let references = ReferenceGenomes::from_json_str(json).expect("valid reference file");
        assert_eq!(references.nucleotide_reference("main"), Some("ATGCN"));
        assert_eq!(references.amino_acid_reference("S"), Some("M*"));
        assert_eq!(references.nucleotide_reference("other"), None);
    }

    #[test]
    fn unknown_reference_fields_are_rejected() {
        let json = r#"{"nucleotide_sequences": [], "genes": []}"#;
        assert!(ReferenceGenomes::from_json_str(json).is_err());
    }

    #[test]
    fn column_lookup_by_name() {
        let schema = TableSchema {
            table_name: "surveillance".to_string(),
            primary_key: "accession".to_string(),
            columns: vec![
                ColumnDef::new("accession", ColumnType::String),
                ColumnDef::new("country", ColumnType::IndexedString),
                ColumnDef::new("date", ColumnType::Date { sorted: true }),
            ],
            nucleotide_sequences: vec!["main".to_string()],
            amino_acid_sequences: vec![],
            default_nucleotide_sequence: Some("main".to_string()),
            default_amino_acid_sequence: None,
        };
        assert!(schema.column("country").is_some());
        assert!(schema.column("region").is_none());
        assert!(schema.has_nucleotide_sequence("main"));
    }
}
