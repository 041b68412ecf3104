//! Query benchmarks over a synthetic surveillance table.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use variantstore::schema::ColumnDef;
use variantstore::{
    ColumnType, IngestRecord, ReferenceGenomes, RuntimeConfig, SequenceInput, Table, TableSchema,
};

const ROWS_PER_PARTITION: usize = 20_000;
const PARTITIONS: usize = 4;
const REFERENCE_LENGTH: usize = 200;

fn reference_sequence() -> String {
    "ATGC".chars().cycle().take(REFERENCE_LENGTH).collect()
}

fn build_table() -> Table {
    let reference = reference_sequence();
    let references = ReferenceGenomes::from_json_str(&format!(
        r#"{{"nucleotide_sequences": [{{"name": "main", "sequence": "{reference}"}}],
            "amino_acid_sequences": []}}"#,
    ))
    .expect("valid references");

    let schema = TableSchema {
        table_name: "bench".to_string(),
        primary_key: "primaryKey".to_string(),
        columns: vec![
            ColumnDef::new("primaryKey", ColumnType::String),
            ColumnDef::new("country", ColumnType::IndexedString),
        ],
        nucleotide_sequences: vec!["main".to_string()],
        amino_acid_sequences: vec![],
        default_nucleotide_sequence: Some("main".to_string()),
        default_amino_acid_sequence: None,
    };
    let mut table = Table::new(schema, &references, None).expect("valid schema");

    let countries = ["Switzerland", "Germany", "France", "Austria"];
    for partition in 0..PARTITIONS {
        let records: Vec<IngestRecord> = (0..ROWS_PER_PARTITION)
            .map(|row| {
                // every 17th row mutates position 42 to T, every 31st is unsequenced there
                let mut sequence: Vec<u8> = reference.bytes().collect();
                if row % 17 == 0 {
                    sequence[41] = b'T';
                }
                if row % 31 == 0 {
                    sequence[41] = b'N';
                }
                let sequence = String::from_utf8(sequence).expect("ASCII");
                IngestRecord::new()
                    .set(
                        "primaryKey",
                        format!("id_{partition}_{row}").as_str(),
                    )
                    .set("country", countries[row % countries.len()])
                    .set_sequence("main", SequenceInput::aligned(sequence.as_str()))
            })
            .collect();
        table.build_partition(records).expect("valid records");
    }
    table
}

fn bench_queries(criterion: &mut Criterion) {
    let table = build_table();
    let config = RuntimeConfig::default();

    criterion.bench_function("symbol_filter_aggregated", |bencher| {
        bencher.iter(|| {
            let result = table
                .query(
                    r#"{"action": {"type": "Aggregated", "groupByFields": ["country"]},
                        "filterExpression": {"type": "NucleotideEquals",
                                             "position": 42, "symbol": "T"}}"#,
                    &config,
                )
                .expect("query succeeds");
            black_box(result.into_rows().expect("materialized"))
        });
    });

    criterion.bench_function("threshold_filter_count", |bencher| {
        bencher.iter(|| {
            let result = table
                .query(
                    r#"{"action": {"type": "Aggregated", "groupByFields": []},
                        "filterExpression": {"type": "NOf", "numberOfMatchers": 2,
                            "matchExactly": false, "children": [
                            {"type": "NucleotideEquals", "position": 42, "symbol": "T"},
                            {"type": "NucleotideEquals", "position": 1, "symbol": "A"},
                            {"type": "NucleotideEquals", "position": 2, "symbol": "T"}
                        ]}}"#,
                    &config,
                )
                .expect("query succeeds");
            black_box(result.into_rows().expect("materialized"))
        });
    });

    criterion.bench_function("mutation_sweep", |bencher| {
        bencher.iter(|| {
            let result = table
                .query(
                    r#"{"action": {"type": "Mutations", "minProportion": 0.01},
                        "filterExpression": {"type": "StringEquals",
                                             "column": "country", "value": "Germany"}}"#,
                    &config,
                )
                .expect("query succeeds");
            black_box(result.into_rows().expect("materialized"))
        });
    });
}

criterion_group!(benches, bench_queries);
criterion_main!(benches);
