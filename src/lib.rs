//! # VariantStore
//!
//! A read-optimized, in-memory analytical engine for genomic surveillance
//! data: a columnar store over nucleotide and amino-acid sequences plus
//! typed per-record metadata, with an expression-tree query engine
//! answering aggregation, mutation-proportion, insertion,
//! sequence-reconstruction and detail queries over tens of millions of
//! records.
//!
//! ## Architecture
//!
//! ```text
//! Query JSON
//!     ↓
//! [Expression parser]        → logical filter tree
//!     ↓  per partition
//! [Compiler]                 → bitmap operator tree
//!     ↓
//! [Operator runtime]         → copy-on-write row-id bitmaps
//!     ↓
//! [Action]                   → aggregation / mutations / FASTA / details
//!     ↓
//! Record batches (JSON or Arrow IPC stream)
//! ```
//!
//! ## Module Organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `symbols` | IUPAC nucleotide / amino-acid alphabets and ambiguity tables |
//! | `schema` | Table schema and reference genome files |
//! | `lineage` | Lineage tree with aliases, recombinants and cycle detection |
//! | `storage` | Frozen columnar store: typed columns, sequence bitmaps, insertions |
//! | `query` | Expression parsing, compilation, operators, actions, results |
//! | `config` | Runtime tunables (cutoffs, batch sizes, deadlines) |
//!
//! ## Usage
//!
//! ```rust,ignore
//! use variantstore::{IngestRecord, ReferenceGenomes, RuntimeConfig, SequenceInput, Table};
//!
//! let references = ReferenceGenomes::from_json_str(reference_json)?;
//! let mut table = Table::new(schema, &references, None)?;
//! table.build_partition(records)?;
//!
//! let config = RuntimeConfig::default();
//! let result = table.query(
//!     r#"{"action": {"type": "Aggregated", "groupByFields": ["country"]},
//!         "filterExpression": {"type": "NucleotideEquals", "position": 1, "symbol": "C"}}"#,
//!     &config,
//! )?;
//! println!("{}", result.into_json()?);
//! ```

pub mod common;
pub mod config;
pub mod error;
pub mod lineage;
pub mod query;
pub mod schema;
pub mod storage;
pub mod symbols;
pub mod value;

// Re-export the primary API surface
pub use config::RuntimeConfig;
pub use error::{ErrorKind, QueryError, StorageError};
pub use lineage::{LineageTree, SublineageMode};
pub use query::{Action, AmbiguityMode, Expression, Query, QueryResult};
pub use schema::{ColumnDef, ColumnType, NamedSequence, ReferenceGenomes, TableSchema};
pub use storage::{IngestRecord, MetadataValue, Partition, SequenceInput, Table};
pub use symbols::{AminoAcid, Nucleotide, Symbol};
pub use value::{Row, RowSchema, Value};
