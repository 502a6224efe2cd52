//! Batched insert-or-ignore writer.
//!
//! Rows are buffered and written as multi-row
//! `INSERT ... ON CONFLICT ("key") DO NOTHING` statements. Existing rows
//! are never updated and a conflict is never an error, so replaying the
//! same input is a no-op.

use std::fmt::Write as _;

use chrono::NaiveTime;
use csv_ingest_models::{TargetRow, TargetValue};
use switchy_database::{Database, DatabaseValue};

use crate::{DbError, SinkError, quote_ident};

/// Upper bound on bind parameters in one statement: the `SQLite` default,
/// which is below the Postgres limit of 65 535.
pub const MAX_PARAMS_PER_STATEMENT: usize = 32_766;

/// Rows handed to the sink and rows the store reports as new.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkCounts {
    pub submitted: u64,
    pub inserted: u64,
}

/// Buffers [`TargetRow`]s for one table and flushes them in batches.
pub struct UpsertSink<'a> {
    db: &'a dyn Database,
    table: String,
    width: usize,
    insert_prefix: String,
    conflict_clause: String,
    batch_size: Option<usize>,
    buffer: Vec<TargetRow>,
    counts: SinkCounts,
}

impl std::fmt::Debug for UpsertSink<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpsertSink")
            .field("table", &self.table)
            .field("width", &self.width)
            .field("batch_size", &self.batch_size)
            .field("buffered", &self.buffer.len())
            .field("counts", &self.counts)
            .finish_non_exhaustive()
    }
}

impl<'a> UpsertSink<'a> {
    /// Creates a sink writing `columns` of `table`, ignoring rows whose
    /// `conflict_key` already exists. Without a batch size every row is
    /// buffered until [`Self::finish`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidIdentifier`] if a name cannot be quoted,
    /// and [`DbError::Conversion`] if there are no columns or the conflict
    /// key is not one of them.
    pub fn new(
        db: &'a dyn Database,
        table: &str,
        columns: &[&str],
        conflict_key: &str,
    ) -> Result<Self, DbError> {
        if columns.is_empty() {
            return Err(DbError::Conversion {
                message: format!("no columns given for table '{table}'"),
            });
        }
        if !columns.contains(&conflict_key) {
            return Err(DbError::Conversion {
                message: format!("conflict key '{conflict_key}' is not a column of '{table}'"),
            });
        }

        let quoted = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            db,
            table: table.to_string(),
            width: columns.len(),
            insert_prefix: format!(
                "INSERT INTO {} ({}) VALUES ",
                quote_ident(table)?,
                quoted.join(", ")
            ),
            conflict_clause: format!(" ON CONFLICT ({}) DO NOTHING", quote_ident(conflict_key)?),
            batch_size: None,
            buffer: Vec::new(),
            counts: SinkCounts::default(),
        })
    }

    /// Flushes every `batch_size` rows. `None` (or `Some(0)`) keeps the
    /// whole load in one batch.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: Option<usize>) -> Self {
        self.batch_size = batch_size.filter(|&n| n > 0);
        self
    }

    /// Counts so far. Rows still in the buffer are not included.
    #[must_use]
    pub const fn counts(&self) -> SinkCounts {
        self.counts
    }

    /// Buffers `row`, flushing if the buffer reached the batch size.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::RowArity`] if the row width does not match the
    /// column list, or [`SinkError::Unavailable`] if a flush fails.
    pub async fn push(&mut self, row: TargetRow) -> Result<(), SinkError> {
        if row.len() != self.width {
            return Err(SinkError::RowArity {
                table: self.table.clone(),
                expected: self.width,
                actual: row.len(),
            });
        }

        self.buffer.push(row);

        if self.batch_size.is_some_and(|n| self.buffer.len() >= n) {
            self.flush().await?;
        }
        Ok(())
    }

    /// Writes all buffered rows and returns how many the store inserted.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Unavailable`] if the store rejects a statement.
    /// The failed rows are dropped from the buffer.
    pub async fn flush(&mut self) -> Result<u64, SinkError> {
        if self.buffer.is_empty() {
            return Ok(0);
        }

        let rows = std::mem::take(&mut self.buffer);
        let rows_per_statement = (MAX_PARAMS_PER_STATEMENT / self.width).max(1);
        let mut inserted = 0;

        for chunk in rows.chunks(rows_per_statement) {
            let sql = self.insert_sql(chunk.len());
            let params: Vec<DatabaseValue> = chunk
                .iter()
                .flat_map(|row| row.values().iter().map(to_database_value))
                .collect();

            inserted += self
                .db
                .exec_raw_params(&sql, &params)
                .await
                .map_err(|source| SinkError::Unavailable {
                    table: self.table.clone(),
                    source,
                })?;
        }

        self.counts.submitted += rows.len() as u64;
        self.counts.inserted += inserted;

        log::debug!(
            "Flushed {} rows into {} ({inserted} new)",
            rows.len(),
            self.table
        );

        Ok(inserted)
    }

    /// Flushes what is left and returns the final counts.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Unavailable`] if the final flush fails.
    pub async fn finish(mut self) -> Result<SinkCounts, SinkError> {
        self.flush().await?;
        Ok(self.counts)
    }

    fn insert_sql(&self, rows: usize) -> String {
        let mut sql = self.insert_prefix.clone();
        let mut param = 1;

        for r in 0..rows {
            if r > 0 {
                sql.push_str(", ");
            }
            sql.push('(');
            for c in 0..self.width {
                if c > 0 {
                    sql.push_str(", ");
                }
                let _ = write!(sql, "${param}");
                param += 1;
            }
            sql.push(')');
        }

        sql.push_str(&self.conflict_clause);
        sql
    }
}

/// Converts a mapped value to its bind parameter. Dates are bound as
/// midnight timestamps.
#[must_use]
pub fn to_database_value(value: &TargetValue) -> DatabaseValue {
    match value {
        TargetValue::Null => DatabaseValue::Null,
        TargetValue::Integer(v) => DatabaseValue::Int64(*v),
        TargetValue::Decimal(v) => DatabaseValue::Real64(*v),
        TargetValue::Boolean(v) => DatabaseValue::Bool(*v),
        TargetValue::Text(v) => DatabaseValue::String(v.clone()),
        TargetValue::Date(d) => DatabaseValue::DateTime(d.and_time(NaiveTime::MIN)),
        TargetValue::Timestamp(t) => DatabaseValue::DateTime(*t),
    }
}
