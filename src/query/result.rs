//! Query Results
//!
//! An action produces a [`QueryResult`]: a result schema plus either fully
//! materialised rows or a lazy stream of row batches (for result sets past
//! the materialization cutoff). Results serialize as one JSON array or as
//! an Arrow IPC stream.

use std::io::Write;

use arrow::ipc::writer::StreamWriter;

use crate::error::QueryError;
use crate::value::{arrow_convert, Row, RowSchema};

/// Row storage of a result: eager or streamed.
pub enum QueryRows<'a> {
    Materialized(Vec<Row>),
    Batches(Box<dyn Iterator<Item = Result<Vec<Row>, QueryError>> + 'a>),
}

/// The outcome of one query.
pub struct QueryResult<'a> {
    schema: RowSchema,
    rows: QueryRows<'a>,
}

impl<'a> QueryResult<'a> {
    pub fn materialized(schema: RowSchema, rows: Vec<Row>) -> Self {
        QueryResult {
            schema,
            rows: QueryRows::Materialized(rows),
        }
    }

    pub fn streaming<I>(schema: RowSchema, batches: I) -> Self
    where
        I: Iterator<Item = Result<Vec<Row>, QueryError>> + 'a,
    {
        QueryResult {
            schema,
            rows: QueryRows::Batches(Box::new(batches)),
        }
    }

    pub fn schema(&self) -> &RowSchema {
        &self.schema
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.rows, QueryRows::Batches(_))
    }

    /// Drain into a flat row vector. Streaming results are pulled to
    /// completion; a failing batch aborts with its error.
    pub fn into_rows(self) -> Result<Vec<Row>, QueryError> {
        match self.rows {
            QueryRows::Materialized(rows) => Ok(rows),
            QueryRows::Batches(batches) => {
                let mut rows = Vec::new();
                for batch in batches {
                    rows.extend(batch?);
                }
                Ok(rows)
            }
        }
    }

    /// Serialize as a single JSON array of objects, one per result row.
    pub fn into_json(self) -> Result<serde_json::Value, QueryError> {
        let schema = self.schema.clone();
        let rows = self.into_rows()?;
        Ok(serde_json::Value::Array(
            rows.iter().map(|row| row.to_json(&schema)).collect(),
        ))
    }

    /// Serialize as an Arrow IPC stream of record batches of at most
    /// `batch_size` rows.
    pub fn write_arrow_ipc<W: Write>(self, writer: W, batch_size: u32) -> Result<(), QueryError> {
        let internal = |error: String| QueryError::Internal(error);
        let QueryResult { schema, rows } = self;
        let arrow_schema = arrow_convert::arrow_schema(&schema);
        let mut stream = StreamWriter::try_new(writer, &arrow_schema)
            .map_err(|error| internal(format!("Arrow stream: {error}")))?;

        let mut write_rows = |rows: &[Row]| -> Result<(), QueryError> {
            for chunk in rows.chunks(batch_size.max(1) as usize) {
                let batch = arrow_convert::rows_to_record_batch(&schema, chunk)
                    .map_err(|error| internal(format!("Arrow conversion: {error}")))?;
                stream
                    .write(&batch)
                    .map_err(|error| internal(format!("Arrow stream: {error}")))?;
            }
            Ok(())
        };

        match rows {
            QueryRows::Materialized(rows) => write_rows(&rows)?,
            QueryRows::Batches(batches) => {
                for batch in batches {
                    write_rows(&batch?)?;
                }
            }
        }
        stream
            .finish()
            .map_err(|error| internal(format!("Arrow stream: {error}")))?;
        Ok(())
    }
}
