#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Library for loading CSV files into relational tables.
//!
//! [`runner::IngestionRunner`] drives one run: connect, apply the schema,
//! load every plan inside a single transaction, then commit or roll back.
//! [`check`] runs the same read-and-map path without a store.

pub mod check;
pub mod runner;

use std::path::{Path, PathBuf};

use csv_ingest_database::db::{ConnectionProvider, DbConfig, SqliteStore};
use csv_ingest_database::{ConfigError, DbError};
use csv_ingest_models::TableLoadPlan;
use csv_ingest_source::PlanError;

/// Environment variable holding a comma-separated list of plan ids to run.
pub const PLANS_ENV_VAR: &str = "CSV_INGEST_PLANS";

/// Errors that end a run before it produces a report.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Store configuration is missing or invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The store could not be reached. Nothing was written.
    #[error("Failed to connect to {target}: {source}")]
    ConnectFailed {
        /// Store description (no credentials).
        target: String,
        /// Underlying error.
        source: DbError,
    },

    /// A schema statement failed. No rows were loaded.
    #[error("Failed to apply schema: {0}")]
    Schema(#[source] DbError),

    /// The plans could not be read or are invalid.
    #[error(transparent)]
    Plan(#[from] PlanError),
}

/// Returns the configured plans: those in `plans_file` if given, else the
/// embedded defaults.
///
/// # Errors
///
/// Returns [`IngestError::Plan`] if the file cannot be read or holds an
/// invalid plan set.
pub fn all_plans(plans_file: Option<&Path>) -> Result<Vec<TableLoadPlan>, IngestError> {
    Ok(match plans_file {
        Some(path) => csv_ingest_source::plan::load_plan_set(path)?,
        None => csv_ingest_source::registry::default_plans(),
    })
}

/// Returns the plans to run, filtered by the `--only` CLI flag or the
/// `CSV_INGEST_PLANS` environment variable. If neither is set, all plans
/// are returned. Configured order is kept either way.
#[must_use]
pub fn enabled_plans(plans: Vec<TableLoadPlan>, cli_filter: Option<String>) -> Vec<TableLoadPlan> {
    let filter = cli_filter.or_else(|| std::env::var(PLANS_ENV_VAR).ok());

    let Some(filter_str) = filter else {
        return plans;
    };

    let ids: Vec<&str> = filter_str
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    let available = plans
        .iter()
        .map(|p| p.id.clone())
        .collect::<Vec<_>>()
        .join(", ");

    let filtered = csv_ingest_source::registry::filter_plans(plans, &ids);

    if filtered.is_empty() {
        log::warn!("No matching plans found for filter {ids:?}. Available: {available}");
    }

    filtered
}

/// Picks the store: an `SQLite` file when `sqlite` is given, otherwise
/// Postgres configured from the `DB_*` environment variables.
///
/// # Errors
///
/// Returns [`IngestError::Config`] if Postgres is selected and its
/// configuration is incomplete.
pub fn store_provider(sqlite: Option<PathBuf>) -> Result<Box<dyn ConnectionProvider>, IngestError> {
    if let Some(path) = sqlite {
        return Ok(Box::new(SqliteStore::file(path)));
    }

    let config = DbConfig::from_env()?;
    log::debug!("Store config: {config:?}");
    Ok(Box::new(config))
}
