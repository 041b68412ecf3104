//! Query Pipeline
//!
//! A query is a (filter expression, action) pair. Execution fans the
//! expression out across partitions on the rayon pool (compile, then
//! evaluate to a row-id bitmap per partition), hands the bitmaps to the
//! action, and applies the ordering stage to the merged result.
//!
//! ```text
//! Query JSON
//!     ↓
//! [Parse]                 → Expression + Action
//!     ↓  per partition
//! [Compile]               → Operator tree
//!     ↓
//! [Evaluate]              → row-id bitmap (copy-on-write)
//!     ↓
//! [Action]                → result rows / lazy batches
//!     ↓
//! [Order / limit / offset]
//!     ↓
//! QueryResult (JSON array or Arrow IPC stream)
//! ```

pub mod actions;
pub mod batched_reader;
mod compile;
pub mod expression;
pub mod operators;
pub mod result;

use rayon::prelude::*;
use roaring::RoaringBitmap;
use serde_json::Value as Json;
use tracing::debug;

use crate::common::QueryDeadline;
use crate::config::RuntimeConfig;
use crate::error::QueryError;
use crate::storage::Table;

pub use actions::{Action, ActionKind, OrderByField};
pub use batched_reader::BatchedBitmapReader;
pub use expression::{AmbiguityMode, Expression};
pub use result::{QueryResult, QueryRows};

use actions::ExecutionContext;
use compile::CompileContext;

/// A parsed query: what to match and what to compute over the matches.
#[derive(Debug, Clone)]
pub struct Query {
    pub expression: Expression,
    pub action: Action,
}

impl Query {
    pub fn from_json_str(request: &str) -> Result<Query, QueryError> {
        let json: Json = serde_json::from_str(request)
            .map_err(|error| QueryError::QueryParse(format!("malformed query JSON: {error}")))?;
        Self::from_json(&json)
    }

    pub fn from_json(json: &Json) -> Result<Query, QueryError> {
        let Json::Object(object) = json else {
            return Err(QueryError::QueryParse(
                "query must be a JSON object".to_string(),
            ));
        };
        for key in object.keys() {
            if key != "action" && key != "filterExpression" {
                return Err(QueryError::QueryParse(format!(
                    "unknown query field `{key}`"
                )));
            }
        }
        let action_json = object.get("action").ok_or_else(|| {
            QueryError::QueryParse("query is missing the field 'action'".to_string())
        })?;
        let expression_json = object.get("filterExpression").ok_or_else(|| {
            QueryError::QueryParse("query is missing the field 'filterExpression'".to_string())
        })?;
        Ok(Query {
            expression: Expression::from_json(expression_json)?,
            action: Action::from_json(action_json)?,
        })
    }

    /// Execute against a frozen table. Fails as a whole on the first
    /// per-partition error; partial results are never returned.
    pub fn execute<'a>(
        &self,
        table: &'a Table,
        config: &'a RuntimeConfig,
    ) -> Result<QueryResult<'a>, QueryError> {
        let deadline = QueryDeadline::new(config.query_timeout());
        self.action.validate_order_by(table)?;

        let filters: Vec<RoaringBitmap> = table
            .partitions()
            .par_iter()
            .map(|partition| {
                deadline.check()?;
                let ctx = CompileContext { table, partition };
                let operator = self.expression.compile(&ctx, AmbiguityMode::default())?;
                Ok(operator.evaluate().into_owned())
            })
            .collect::<Result<_, QueryError>>()?;

        debug!(
            matched = filters.iter().map(RoaringBitmap::len).sum::<u64>(),
            partitions = filters.len(),
            elapsed = ?deadline.elapsed(),
            "filter evaluation complete"
        );

        let ctx = ExecutionContext {
            table,
            config,
            deadline,
        };
        self.action.execute(&ctx, filters)
    }
}

impl Table {
    /// The query-over-database entry point: parse and execute one request.
    pub fn query<'a>(
        &'a self,
        request: &str,
        config: &'a RuntimeConfig,
    ) -> Result<QueryResult<'a>, QueryError> {
        let query = Query::from_json_str(request)?;
        debug!(action = query.action.kind.name(), "parsed query");
        query.execute(self, config)
    }
}
