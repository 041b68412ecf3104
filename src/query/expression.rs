//! Filter Expressions
//!
//! The closed logical expression vocabulary of the query language and its
//! JSON parser. Parsing is a hand dispatch over the `type` tag so that
//! unknown fields fail with an error naming the field: every variant
//! payload is a `deny_unknown_fields` struct.
//!
//! Regexes and dates are validated here; positions are checked to be
//! 1-indexed. Everything needing the schema (column and sequence names,
//! reference lengths) is validated at compile time instead.

use chrono::NaiveDate;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value as Json;

use crate::error::QueryError;
use crate::lineage::SublineageMode;

/// How ambiguity codes participate in symbol matching. Inherited down the
/// expression tree: `Not` inverts the mode, `Maybe` forces `UpperBound`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AmbiguityMode {
    /// Ambiguity codes do not match; plain symbol equality.
    #[default]
    None,
    /// Ambiguity codes covering the symbol match ("could have").
    UpperBound,
    /// Ambiguity codes excluded ("definitely has"); used under an odd
    /// number of negations.
    LowerBound,
}

impl AmbiguityMode {
    pub fn inverted(self) -> AmbiguityMode {
        match self {
            AmbiguityMode::None => AmbiguityMode::None,
            AmbiguityMode::UpperBound => AmbiguityMode::LowerBound,
            AmbiguityMode::LowerBound => AmbiguityMode::UpperBound,
        }
    }
}

/// A parsed filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    True,
    And(Vec<Expression>),
    Or(Vec<Expression>),
    Not(Box<Expression>),
    Maybe(Box<Expression>),
    NOf {
        children: Vec<Expression>,
        number_of_matchers: u32,
        match_exactly: bool,
    },
    NucleotideEquals {
        sequence_name: Option<String>,
        position: u32,
        symbol: String,
    },
    AminoAcidEquals {
        sequence_name: Option<String>,
        position: u32,
        symbol: String,
    },
    HasNucleotideMutation {
        sequence_name: Option<String>,
        position: u32,
    },
    HasAminoAcidMutation {
        sequence_name: Option<String>,
        position: u32,
    },
    InsertionContains {
        sequence_name: Option<String>,
        position: u32,
        value: String,
    },
    AminoAcidInsertionContains {
        sequence_name: Option<String>,
        position: u32,
        value: String,
    },
    IntEquals {
        column: String,
        value: Option<i32>,
    },
    IntBetween {
        column: String,
        from: Option<i32>,
        to: Option<i32>,
    },
    FloatEquals {
        column: String,
        value: Option<f64>,
    },
    FloatBetween {
        column: String,
        from: Option<f64>,
        to: Option<f64>,
    },
    DateEquals {
        column: String,
        value: Option<NaiveDate>,
    },
    DateBetween {
        column: String,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    },
    StringEquals {
        column: String,
        value: Option<String>,
    },
    StringInSet {
        column: String,
        values: Vec<String>,
    },
    StringSearch {
        column: String,
        search_expression: String,
    },
    IsNull {
        column: String,
    },
    IsNotNull {
        column: String,
    },
    LineageEquals {
        column: String,
        value: Option<String>,
        include_sublineages: bool,
        mode: SublineageMode,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ChildrenPayload {
    children: Vec<Json>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ChildPayload {
    child: Json,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct NOfPayload {
    children: Vec<Json>,
    number_of_matchers: u32,
    match_exactly: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SymbolEqualsPayload {
    sequence_name: Option<String>,
    position: u32,
    symbol: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct HasMutationPayload {
    sequence_name: Option<String>,
    position: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct InsertionPayload {
    sequence_name: Option<String>,
    position: u32,
    value: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ColumnValuePayload<T> {
    column: String,
    value: Option<T>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ColumnRangePayload<T> {
    column: String,
    from: Option<T>,
    to: Option<T>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct StringInSetPayload {
    column: String,
    values: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct StringSearchPayload {
    column: String,
    search_expression: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ColumnOnlyPayload {
    column: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct LineagePayload {
    column: String,
    value: Option<String>,
    include_sublineages: bool,
    recombinant_edge_mode: Option<SublineageMode>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PhyloDescendantPayload {
    column: String,
    value: Option<String>,
    recombinant_edge_mode: Option<SublineageMode>,
}

fn parse_payload<T: DeserializeOwned>(
    kind: &str,
    fields: serde_json::Map<String, Json>,
) -> Result<T, QueryError> {
    serde_json::from_value(Json::Object(fields))
        .map_err(|error| QueryError::QueryParse(format!("in {kind} expression: {error}")))
}

fn parse_position(kind: &str, position: u32) -> Result<u32, QueryError> {
    if position == 0 {
        return Err(QueryError::OutOfRange(format!(
            "in {kind} expression: positions are 1-indexed, got 0"
        )));
    }
    Ok(position)
}

fn parse_date(kind: &str, text: &str) -> Result<NaiveDate, QueryError> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|_| {
        QueryError::QueryParse(format!(
            "in {kind} expression: invalid date '{text}', expected YYYY-MM-DD"
        ))
    })
}

fn validate_regex(pattern: &str) -> Result<(), QueryError> {
    Regex::new(pattern)
        .map(|_| ())
        .map_err(|error| QueryError::InvalidRegex {
            pattern: pattern.to_string(),
            message: error.to_string(),
        })
}

impl Expression {
    /// Parse an expression from its JSON representation.
    pub fn from_json(json: &Json) -> Result<Expression, QueryError> {
        let Json::Object(object) = json else {
            return Err(QueryError::QueryParse(
                "filter expression must be a JSON object".to_string(),
            ));
        };
        let mut fields = object.clone();
        let kind = match fields.remove("type") {
            Some(Json::String(kind)) => kind,
            Some(_) => {
                return Err(QueryError::QueryParse(
                    "expression field 'type' must be a string".to_string(),
                ))
            }
            None => {
                return Err(QueryError::QueryParse(
                    "expression is missing the field 'type'".to_string(),
                ))
            }
        };

        match kind.as_str() {
            "True" => {
                if let Some(unknown) = fields.keys().next() {
                    return Err(QueryError::QueryParse(format!(
                        "in True expression: unknown field `{unknown}`"
                    )));
                }
                Ok(Expression::True)
            }
            "And" => {
                let payload: ChildrenPayload = parse_payload(&kind, fields)?;
                Ok(Expression::And(Self::from_json_children(&payload.children)?))
            }
            "Or" => {
                let payload: ChildrenPayload = parse_payload(&kind, fields)?;
                Ok(Expression::Or(Self::from_json_children(&payload.children)?))
            }
            "Not" => {
                let payload: ChildPayload = parse_payload(&kind, fields)?;
                Ok(Expression::Not(Box::new(Self::from_json(&payload.child)?)))
            }
            "Maybe" => {
                let payload: ChildPayload = parse_payload(&kind, fields)?;
                Ok(Expression::Maybe(Box::new(Self::from_json(&payload.child)?)))
            }
            "NOf" | "N-Of" => {
                let payload: NOfPayload = parse_payload(&kind, fields)?;
                Ok(Expression::NOf {
                    children: Self::from_json_children(&payload.children)?,
                    number_of_matchers: payload.number_of_matchers,
                    match_exactly: payload.match_exactly,
                })
            }
            "NucleotideEquals" | "AminoAcidEquals" => {
                let payload: SymbolEqualsPayload = parse_payload(&kind, fields)?;
                let position = parse_position(&kind, payload.position)?;
                if kind == "NucleotideEquals" {
                    Ok(Expression::NucleotideEquals {
                        sequence_name: payload.sequence_name,
                        position,
                        symbol: payload.symbol,
                    })
                } else {
                    Ok(Expression::AminoAcidEquals {
                        sequence_name: payload.sequence_name,
                        position,
                        symbol: payload.symbol,
                    })
                }
            }
            "HasNucleotideMutation" | "HasAminoAcidMutation" => {
                let payload: HasMutationPayload = parse_payload(&kind, fields)?;
                let position = parse_position(&kind, payload.position)?;
                if kind == "HasNucleotideMutation" {
                    Ok(Expression::HasNucleotideMutation {
                        sequence_name: payload.sequence_name,
                        position,
                    })
                } else {
                    Ok(Expression::HasAminoAcidMutation {
                        sequence_name: payload.sequence_name,
                        position,
                    })
                }
            }
            "InsertionContains" | "AminoAcidInsertionContains" => {
                let payload: InsertionPayload = parse_payload(&kind, fields)?;
                let position = parse_position(&kind, payload.position)?;
                validate_regex(&payload.value)?;
                if kind == "InsertionContains" {
                    Ok(Expression::InsertionContains {
                        sequence_name: payload.sequence_name,
                        position,
                        value: payload.value,
                    })
                } else {
                    Ok(Expression::AminoAcidInsertionContains {
                        sequence_name: payload.sequence_name,
                        position,
                        value: payload.value,
                    })
                }
            }
            "IntEquals" => {
                let payload: ColumnValuePayload<i32> = parse_payload(&kind, fields)?;
                Ok(Expression::IntEquals {
                    column: payload.column,
                    value: payload.value,
                })
            }
            "IntBetween" => {
                let payload: ColumnRangePayload<i32> = parse_payload(&kind, fields)?;
                Ok(Expression::IntBetween {
                    column: payload.column,
                    from: payload.from,
                    to: payload.to,
                })
            }
            "FloatEquals" => {
                let payload: ColumnValuePayload<f64> = parse_payload(&kind, fields)?;
                Ok(Expression::FloatEquals {
                    column: payload.column,
                    value: payload.value,
                })
            }
            "FloatBetween" => {
                let payload: ColumnRangePayload<f64> = parse_payload(&kind, fields)?;
                Ok(Expression::FloatBetween {
                    column: payload.column,
                    from: payload.from,
                    to: payload.to,
                })
            }
            "DateEquals" => {
                let payload: ColumnValuePayload<String> = parse_payload(&kind, fields)?;
                Ok(Expression::DateEquals {
                    column: payload.column,
                    value: payload
                        .value
                        .map(|text| parse_date(&kind, &text))
                        .transpose()?,
                })
            }
            "DateBetween" => {
                let payload: ColumnRangePayload<String> = parse_payload(&kind, fields)?;
                Ok(Expression::DateBetween {
                    column: payload.column,
                    from: payload
                        .from
                        .map(|text| parse_date(&kind, &text))
                        .transpose()?,
                    to: payload.to.map(|text| parse_date(&kind, &text)).transpose()?,
                })
            }
            "StringEquals" => {
                let payload: ColumnValuePayload<String> = parse_payload(&kind, fields)?;
                Ok(Expression::StringEquals {
                    column: payload.column,
                    value: payload.value,
                })
            }
            "StringInSet" => {
                let payload: StringInSetPayload = parse_payload(&kind, fields)?;
                Ok(Expression::StringInSet {
                    column: payload.column,
                    values: payload.values,
                })
            }
            "StringSearch" => {
                let payload: StringSearchPayload = parse_payload(&kind, fields)?;
                validate_regex(&payload.search_expression)?;
                Ok(Expression::StringSearch {
                    column: payload.column,
                    search_expression: payload.search_expression,
                })
            }
            "IsNull" => {
                let payload: ColumnOnlyPayload = parse_payload(&kind, fields)?;
                Ok(Expression::IsNull {
                    column: payload.column,
                })
            }
            "IsNotNull" => {
                let payload: ColumnOnlyPayload = parse_payload(&kind, fields)?;
                Ok(Expression::IsNotNull {
                    column: payload.column,
                })
            }
            "LineageEquals" | "PangoLineage" => {
                let payload: LineagePayload = parse_payload(&kind, fields)?;
                Ok(Expression::LineageEquals {
                    column: payload.column,
                    value: payload.value,
                    include_sublineages: payload.include_sublineages,
                    mode: payload.recombinant_edge_mode.unwrap_or_default(),
                })
            }
            "PhyloDescendantOf" => {
                let payload: PhyloDescendantPayload = parse_payload(&kind, fields)?;
                Ok(Expression::LineageEquals {
                    column: payload.column,
                    value: payload.value,
                    include_sublineages: true,
                    mode: payload.recombinant_edge_mode.unwrap_or_default(),
                })
            }
            unknown => Err(QueryError::QueryParse(format!(
                "unknown expression type '{unknown}'"
            ))),
        }
    }

    fn from_json_children(children: &[Json]) -> Result<Vec<Expression>, QueryError> {
        children.iter().map(Self::from_json).collect()
    }
}
