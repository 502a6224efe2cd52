#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Store access for CSV ingestion.
//!
//! Uses `switchy_database` for every statement, against either Postgres
//! (`postgres-raw`) or `SQLite` (`sqlite-rusqlite`). The schema is an opaque
//! SQL blob applied statement by statement, since the `SQLite` driver runs
//! one statement per call; rows are written through the
//! batched insert-or-ignore [`sink::UpsertSink`].

pub mod db;
pub mod queries;
pub mod sink;

use switchy_database::Database;

/// Schema applied when the caller supplies none.
pub const DEFAULT_SCHEMA: &str = include_str!("../../../schema.sql");

/// Errors from reading the store configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is unset or empty.
    #[error("Missing required configuration value {var}")]
    Missing {
        /// Environment variable name.
        var: &'static str,
    },

    /// `DB_PORT` is not a valid port number.
    #[error("Invalid port '{value}': {reason}")]
    InvalidPort {
        /// Offending value.
        value: String,
        /// Parser message.
        reason: String,
    },
}

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// Database query error.
    #[error("Database error: {0}")]
    Database(#[from] switchy_database::DatabaseError),

    /// The store could not be reached or refused the credentials.
    #[error("Connection failed: {message}")]
    Connect {
        /// Driver message.
        message: String,
    },

    /// A schema statement failed.
    #[error("Schema statement {index} failed: {source}")]
    Schema {
        /// 1-based position of the statement in the schema.
        index: usize,
        /// Driver error.
        source: switchy_database::DatabaseError,
    },

    /// A table or column name cannot be safely quoted.
    #[error("Invalid identifier '{name}'")]
    InvalidIdentifier {
        /// Offending name.
        name: String,
    },

    /// Data conversion error.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },
}

/// Errors from flushing rows into the store.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The store rejected or could not execute a batch. Not retried.
    #[error("Sink for table '{table}' is unavailable: {source}")]
    Unavailable {
        /// Target table.
        table: String,
        /// Driver error.
        source: switchy_database::DatabaseError,
    },

    /// A row's width does not match the sink's column list.
    #[error("Row has {actual} values but table '{table}' expects {expected}")]
    RowArity {
        /// Target table.
        table: String,
        /// Column count.
        expected: usize,
        /// Value count.
        actual: usize,
    },
}

/// Applies `schema` to the store, one statement at a time, in order.
///
/// The text is not interpreted beyond splitting it into statements, so it
/// must be idempotent on its own (`CREATE ... IF NOT EXISTS`).
///
/// # Errors
///
/// Returns [`DbError::Schema`] for the first statement that fails; later
/// statements are not attempted.
pub async fn apply_schema(db: &dyn Database, schema: &str) -> Result<usize, DbError> {
    let statements = split_statements(schema);

    for (i, statement) in statements.iter().enumerate() {
        log::debug!("Applying schema statement {}/{}", i + 1, statements.len());
        db.exec_raw(statement)
            .await
            .map_err(|source| DbError::Schema {
                index: i + 1,
                source,
            })?;
    }

    log::info!("Schema ensured ({} statements)", statements.len());
    Ok(statements.len())
}

/// Splits a SQL script on `;` terminators outside quotes, dollar-quoted
/// bodies (`$$ ... $$`, `$tag$ ... $tag$`) and comments. Comments are
/// dropped along with empty statements.
#[must_use]
pub fn split_statements(sql: &str) -> Vec<String> {
    let chars: Vec<char> = sql.chars().collect();
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut i = 0;

    while i < chars.len() {
        let end = match chars[i] {
            q @ ('\'' | '"') => closing(&chars, i + 1, &[q]),
            '$' => dollar_tag(&chars, i).map_or(i + 1, |tag| closing(&chars, i + tag.len(), tag)),
            '-' if chars.get(i + 1) == Some(&'-') => {
                i = chars[i..]
                    .iter()
                    .position(|&c| c == '\n')
                    .map_or(chars.len(), |n| i + n);
                continue;
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i = block_comment_end(&chars, i);
                current.push(' ');
                continue;
            }
            ';' => {
                push_statement(&mut statements, &mut current);
                i += 1;
                continue;
            }
            _ => i + 1,
        };
        current.extend(&chars[i..end]);
        i = end;
    }
    push_statement(&mut statements, &mut current);

    statements
}

/// Index just past the first `delimiter` at or after `from`, or the end of
/// input if it never closes.
fn closing(chars: &[char], from: usize, delimiter: &[char]) -> usize {
    (from..chars.len())
        .find(|&j| chars[j..].starts_with(delimiter))
        .map_or(chars.len(), |j| j + delimiter.len())
}

/// The `$tag$` opening a dollar-quoted body at `start`, if there is one.
/// `$1` style parameters are not tags.
fn dollar_tag(chars: &[char], start: usize) -> Option<&[char]> {
    let body = chars[start + 1..]
        .iter()
        .take_while(|c| c.is_alphanumeric() || **c == '_')
        .count();
    let close = start + 1 + body;

    if chars.get(close) != Some(&'$') || chars.get(start + 1).is_some_and(char::is_ascii_digit) {
        return None;
    }
    Some(&chars[start..=close])
}

/// Index just past the `*/` matching the `/*` at `start`. Block comments
/// nest.
fn block_comment_end(chars: &[char], start: usize) -> usize {
    let mut depth = 0usize;
    let mut j = start;

    while j < chars.len() {
        if chars[j..].starts_with(&['/', '*']) {
            depth += 1;
            j += 2;
        } else if chars[j..].starts_with(&['*', '/']) {
            depth -= 1;
            j += 2;
            if depth == 0 {
                return j;
            }
        } else {
            j += 1;
        }
    }
    chars.len()
}

fn push_statement(statements: &mut Vec<String>, current: &mut String) {
    let statement = current.trim();
    if !statement.is_empty() {
        statements.push(statement.to_string());
    }
    current.clear();
}

/// Double-quotes a table or column name.
///
/// # Errors
///
/// Returns [`DbError::InvalidIdentifier`] for empty names or names that
/// contain a double quote or NUL.
pub fn quote_ident(name: &str) -> Result<String, DbError> {
    if name.is_empty() || name.contains('"') || name.contains('\0') {
        return Err(DbError::InvalidIdentifier {
            name: name.to_string(),
        });
    }
    Ok(format!("\"{name}\""))
}
