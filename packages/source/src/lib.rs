#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Reading and mapping side of the ingestion pipeline.
//!
//! [`record_source::RecordSource`] turns a delimited file into a lazy
//! stream of [`RawRecord`](csv_ingest_models::RawRecord)s, and
//! [`field_mapper::FieldMapper`] turns each record into a
//! [`TargetRow`](csv_ingest_models::TargetRow) according to a
//! [`TableLoadPlan`](csv_ingest_models::TableLoadPlan). Plans themselves
//! are declarative TOML, parsed and validated in [`plan`] and shipped as
//! embedded defaults in [`registry`].

pub mod coerce;
pub mod field_mapper;
pub mod plan;
pub mod progress;
pub mod record_source;
pub mod registry;

use std::path::PathBuf;

use csv_ingest_models::Coercion;

/// Errors raised while opening or reading a source file.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The source path does not exist.
    #[error("Source file not found: {}", path.display())]
    NotFound {
        /// Path that was requested.
        path: PathBuf,
    },

    /// The header row is missing, blank, or declares a name twice.
    #[error("Malformed header in {}: {reason}", path.display())]
    MalformedHeader {
        /// Source file.
        path: PathBuf,
        /// What is wrong with the header.
        reason: String,
    },

    /// A single data record could not be decoded. Reading continues with
    /// the next record.
    #[error("Malformed record at line {line}: {reason}")]
    MalformedRecord {
        /// Line the record started on.
        line: u64,
        /// Decoder message.
        reason: String,
    },

    /// I/O error while reading the file.
    #[error("I/O error reading {}: {source}", path.display())]
    Io {
        /// Source file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Row-scoped failures while mapping a record onto a plan's columns.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    /// None of the column's source fields is present (or all are blank)
    /// and no default is declared.
    #[error("missing field for column '{column}' (looked for {fields})")]
    MissingField {
        /// Target column.
        column: String,
        /// Source field names that were tried.
        fields: String,
    },

    /// The value is present but does not parse.
    #[error("cannot coerce '{value}' to {coercion} for column '{column}': {reason}")]
    Coercion {
        /// Target column.
        column: String,
        /// Offending raw value.
        value: String,
        /// Coercion that was attempted.
        coercion: Coercion,
        /// Parser message.
        reason: String,
    },
}

/// Errors from parsing or validating load plans.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// The plan file could not be read.
    #[error("Failed to read plan file {}: {source}", path.display())]
    Io {
        /// Plan file path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The TOML is not a valid plan.
    #[error("Failed to parse plan: {0}")]
    Parse(#[from] toml::de::Error),

    /// The plan parsed but is inconsistent.
    #[error("Invalid plan '{plan}': {message}")]
    Invalid {
        /// Plan identifier.
        plan: String,
        /// What is wrong.
        message: String,
    },
}
