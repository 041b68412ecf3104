//! Algebraic laws of filter compilation, checked against brute force on
//! randomly generated small datasets.

use std::collections::BTreeSet;

use chrono::{Days, NaiveDate};
use proptest::prelude::*;

use variantstore::query::{Action, ActionKind, Query};
use variantstore::schema::ColumnDef;
use variantstore::{
    ColumnType, Expression, IngestRecord, ReferenceGenomes, RuntimeConfig, SequenceInput, Table,
    TableSchema,
};

const REFERENCE: &str = "ATGCN";

fn schema(sorted_dates: bool) -> TableSchema {
    TableSchema {
        table_name: "laws".to_string(),
        primary_key: "primaryKey".to_string(),
        columns: vec![
            ColumnDef::new("primaryKey", ColumnType::String),
            ColumnDef::new("date", ColumnType::Date { sorted: sorted_dates }),
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
    .expect("valid references")
}

fn sequence_table(rows: &[String]) -> Table {
    let mut table = Table::new(schema(false), &references(), None).expect("valid schema");
    let records: Vec<IngestRecord> = rows
        .iter()
        .enumerate()
        .map(|(index, sequence)| {
            IngestRecord::new()
                .set("primaryKey", format!("id_{index:04}").as_str())
                .set_sequence("main", SequenceInput::aligned(sequence.as_str()))
        })
        .collect();
    table.build_partition(records).expect("valid records");
    table
}

fn date_table(dates: &[NaiveDate], sorted_flag: bool) -> Table {
    let mut table = Table::new(schema(sorted_flag), &references(), None).expect("valid schema");
    let records: Vec<IngestRecord> = dates
        .iter()
        .enumerate()
        .map(|(index, date)| {
            IngestRecord::new()
                .set("primaryKey", format!("id_{index:04}").as_str())
                .set("date", *date)
        })
        .collect();
    table.build_partition(records).expect("valid records");
    table
}

fn matching_set(table: &Table, expression: Expression) -> BTreeSet<String> {
    let config = RuntimeConfig::default();
    let action = Action {
        kind: ActionKind::Details {
            fields: Some(vec!["primaryKey".to_string()]),
        },
        order_by_fields: Vec::new(),
        limit: None,
        offset: None,
        randomize_seed: None,
    };
    let query = Query { expression, action };
    let json = query
        .execute(table, &config)
        .expect("query succeeds")
        .into_json()
        .expect("result serializes");
    json.as_array()
        .expect("array result")
        .iter()
        .map(|row| row["primaryKey"].as_str().expect("primary key").to_string())
        .collect()
}

fn all_keys(count: usize) -> BTreeSet<String> {
    (0..count).map(|index| format!("id_{index:04}")).collect()
}

fn symbol_equals(position: u32, symbol: char) -> Expression {
    Expression::NucleotideEquals {
        sequence_name: None,
        position,
        symbol: symbol.to_string(),
    }
}

fn arbitrary_sequences() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(
        prop::collection::vec(
            prop::sample::select(vec!['A', 'C', 'G', 'T', 'N', '-', 'R', 'Y']),
            REFERENCE.len(),
        )
        .prop_map(|characters| characters.into_iter().collect::<String>()),
        1..24,
    )
}

fn arbitrary_symbol() -> impl Strategy<Value = char> {
    prop::sample::select(vec!['A', 'C', 'G', 'T', 'N', '-'])
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn complement_law(
        rows in arbitrary_sequences(),
        position in 1u32..=5,
        symbol in arbitrary_symbol(),
    ) {
        let table = sequence_table(&rows);
        let expression = symbol_equals(position, symbol);

        let matched = matching_set(&table, expression.clone());
        prop_assert!(matched.len() <= rows.len());

        let negated = matching_set(&table, Expression::Not(Box::new(expression.clone())));
        let universe = all_keys(rows.len());
        let expected: BTreeSet<String> = universe.difference(&matched).cloned().collect();
        prop_assert_eq!(negated, expected);

        let doubled = matching_set(
            &table,
            Expression::Not(Box::new(Expression::Not(Box::new(expression)))),
        );
        prop_assert_eq!(doubled, matched);
    }

    #[test]
    fn conjunction_and_disjunction_laws(
        rows in arbitrary_sequences(),
        left_position in 1u32..=5,
        left_symbol in arbitrary_symbol(),
        right_position in 1u32..=5,
        right_symbol in arbitrary_symbol(),
    ) {
        let table = sequence_table(&rows);
        let left = symbol_equals(left_position, left_symbol);
        let right = symbol_equals(right_position, right_symbol);

        let left_set = matching_set(&table, left.clone());
        let right_set = matching_set(&table, right.clone());

        let and_set = matching_set(
            &table,
            Expression::And(vec![left.clone(), right.clone()]),
        );
        let expected_and: BTreeSet<String> =
            left_set.intersection(&right_set).cloned().collect();
        prop_assert_eq!(and_set, expected_and);

        let or_set = matching_set(&table, Expression::Or(vec![left, right]));
        let expected_or: BTreeSet<String> = left_set.union(&right_set).cloned().collect();
        prop_assert_eq!(or_set, expected_or);
    }

    #[test]
    fn ambiguity_bounds_are_nested(
        rows in arbitrary_sequences(),
        position in 1u32..=5,
        symbol in arbitrary_symbol(),
    ) {
        let table = sequence_table(&rows);
        let expression = symbol_equals(position, symbol);

        let plain = matching_set(&table, expression.clone());
        let upper = matching_set(&table, Expression::Maybe(Box::new(expression.clone())));
        // the lower bound is what survives "definitely not" negation
        let negated = matching_set(&table, Expression::Not(Box::new(expression)));
        let universe = all_keys(rows.len());
        let lower: BTreeSet<String> = universe.difference(&negated).cloned().collect();

        prop_assert!(lower.is_subset(&plain));
        prop_assert!(plain.is_subset(&upper));
    }

    #[test]
    fn threshold_matches_brute_force(
        rows in arbitrary_sequences(),
        specs in prop::collection::vec(
            (1u32..=5, prop::sample::select(vec!['A', 'C', 'G', 'T', 'N', '-']), any::<bool>()),
            2..6,
        ),
        number_of_matchers in 0u32..7,
        match_exactly in any::<bool>(),
    ) {
        let table = sequence_table(&rows);
        let children: Vec<Expression> = specs
            .iter()
            .map(|&(position, symbol, negated)| {
                let leaf = symbol_equals(position, symbol);
                if negated {
                    Expression::Not(Box::new(leaf))
                } else {
                    leaf
                }
            })
            .collect();

        let child_sets: Vec<BTreeSet<String>> = children
            .iter()
            .map(|child| matching_set(&table, child.clone()))
            .collect();

        let threshold_set = matching_set(
            &table,
            Expression::NOf {
                children,
                number_of_matchers,
                match_exactly,
            },
        );

        let expected: BTreeSet<String> = all_keys(rows.len())
            .into_iter()
            .filter(|key| {
                let satisfied = child_sets
                    .iter()
                    .filter(|child_set| child_set.contains(key))
                    .count() as u32;
                if match_exactly {
                    satisfied == number_of_matchers
                } else {
                    satisfied >= number_of_matchers
                }
            })
            .collect();
        prop_assert_eq!(threshold_set, expected);
    }

    #[test]
    fn sorted_and_unsorted_date_scans_agree(
        day_offsets in prop::collection::vec(0u64..120, 1..24),
        from_offset in prop::option::of(0u64..120),
        to_offset in prop::option::of(0u64..120),
    ) {
        let epoch = NaiveDate::from_ymd_opt(2021, 1, 1).expect("valid date");
        let mut offsets = day_offsets;
        offsets.sort_unstable();
        let dates: Vec<NaiveDate> = offsets
            .iter()
            .map(|&offset| epoch.checked_add_days(Days::new(offset)).expect("in range"))
            .collect();

        let sorted_table = date_table(&dates, true);
        let scan_table = date_table(&dates, false);

        let expression = Expression::DateBetween {
            column: "date".to_string(),
            from: from_offset
                .map(|offset| epoch.checked_add_days(Days::new(offset)).expect("in range")),
            to: to_offset
                .map(|offset| epoch.checked_add_days(Days::new(offset)).expect("in range")),
        };

        let from_range = matching_set(&sorted_table, expression.clone());
        let from_scan = matching_set(&scan_table, expression);
        prop_assert_eq!(from_range, from_scan);
    }
}

#[test]
fn n_of_boundary_identities() {
    let rows: Vec<String> = ["ATGCN", "CTGCN", "NNNNN"]
        .iter()
        .map(|sequence| (*sequence).to_string())
        .collect();
    let table = sequence_table(&rows);
    let child = symbol_equals(1, 'A');
    let everything = all_keys(rows.len());

    // NOf{n=0, exactly=false} ≡ True
    let zero = matching_set(
        &table,
        Expression::NOf {
            children: vec![child.clone()],
            number_of_matchers: 0,
            match_exactly: false,
        },
    );
    assert_eq!(zero, everything);

    // NOf{n=0, exactly=true} ≡ Not(Or(children))
    let none_of = matching_set(
        &table,
        Expression::NOf {
            children: vec![child.clone()],
            number_of_matchers: 0,
            match_exactly: true,
        },
    );
    let complement = matching_set(&table, Expression::Not(Box::new(child.clone())));
    assert_eq!(none_of, complement);

    // n beyond the child count is unsatisfiable
    let too_many = matching_set(
        &table,
        Expression::NOf {
            children: vec![child],
            number_of_matchers: 2,
            match_exactly: false,
        },
    );
    assert!(too_many.is_empty());
}

#[test]
fn empty_connectives() {
    let rows: Vec<String> = vec!["ATGCN".to_string(), "CTGCN".to_string()];
    let table = sequence_table(&rows);

    // And() ≡ True, Or() ≡ empty
    assert_eq!(
        matching_set(&table, Expression::And(Vec::new())),
        all_keys(rows.len())
    );
    assert!(matching_set(&table, Expression::Or(Vec::new())).is_empty());
}

#[test]
fn empty_table_and_zero_limit() {
    let table = sequence_table(&[]);
    assert!(matching_set(&table, Expression::True).is_empty());

    let rows: Vec<String> = vec!["ATGCN".to_string()];
    let table = sequence_table(&rows);
    let config = RuntimeConfig::default();
    let result = table
        .query(
            r#"{"action": {"type": "Details", "limit": 0},
                "filterExpression": {"type": "True"}}"#,
            &config,
        )
        .expect("query succeeds")
        .into_json()
        .expect("serializes");
    assert_eq!(result, serde_json::json!([]));
}
