//! Loading of the declarative definition files (lineage YAML, reference
//! genome JSON) from disk.

use std::io::Write;

use tempfile::NamedTempFile;

use variantstore::lineage::LineageError;
use variantstore::{LineageTree, ReferenceGenomes, SublineageMode};

fn write_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(contents.as_bytes()).expect("writable");
    file
}

#[test]
fn loads_a_lineage_definition_file() {
    let file = write_file(
        "\
- lineage_name: A
- lineage_name: A.1
  parents: [A]
- lineage_name: XBB
  parents: [A, A.1]
",
    );
    let tree = LineageTree::from_file(file.path()).expect("valid definitions");
    let root = tree.resolve("A").expect("A defined");
    let clade = tree.clade_of(root, SublineageMode::AlwaysFollow);
    assert_eq!(clade.len(), 3);
    assert!(tree.is_recombinant(tree.resolve("XBB").expect("XBB defined")));
}

#[test]
fn cycle_witness_closes_the_loop() {
    let file = write_file(
        "\
- lineage_name: alpha
  parents: [gamma]
- lineage_name: beta
  parents: [alpha]
- lineage_name: gamma
  parents: [beta]
",
    );
    match LineageTree::from_file(file.path()) {
        Err(LineageError::Cycle(witness)) => {
            let names: Vec<&str> = witness.split(" -> ").collect();
            assert_eq!(names.first(), names.last());
            assert_eq!(names.len(), 4);
        }
        other => panic!("expected a cycle error, got {other:?}"),
    }
}

#[test]
fn malformed_yaml_is_an_error() {
    let file = write_file("lineages: {broken");
    assert!(matches!(
        LineageTree::from_file(file.path()),
        Err(LineageError::Yaml(_))
    ));
}

#[test]
fn missing_file_is_an_io_error() {
    let path = std::path::Path::new("/nonexistent/lineages.yaml");
    assert!(matches!(
        LineageTree::from_file(path),
        Err(LineageError::Io(_))
    ));
}

#[test]
fn loads_a_reference_genome_file() {
    let file = write_file(
        r#"{
            "nucleotide_sequences": [
                {"name": "main", "sequence": "ATGCN"},
                {"name": "segment2", "sequence": "GGCC"}
            ],
            "amino_acid_sequences": [{"name": "S", "sequence": "MSKV*"}]
        }"#,
    );
    let references = ReferenceGenomes::from_file(file.path()).expect("valid reference file");
    assert_eq!(references.nucleotide_reference("segment2"), Some("GGCC"));
    assert_eq!(references.amino_acid_reference("S"), Some("MSKV*"));
}
