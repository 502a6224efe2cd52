#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Load plan, record, and result types shared by the ingestion crates.
//!
//! A [`TableLoadPlan`] declares how one delimited source file becomes rows
//! of one target table: which source fields feed which target columns
//! ([`ColumnSpec`]), how raw strings are coerced ([`Coercion`]), and which
//! column is the conflict key for idempotent upserts.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// One data line of a source file, keyed by (trimmed) header name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawRecord {
    /// 1-based physical line the record starts on (the header is line 1).
    pub line: u64,
    /// Field values keyed by header name.
    pub fields: BTreeMap<String, String>,
}

impl RawRecord {
    /// Returns the raw value of the named field, if the header declared it.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }
}

/// A typed value destined for a single target column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TargetValue {
    /// SQL `NULL`.
    Null,
    /// 64-bit signed integer.
    Integer(i64),
    /// Double-precision decimal.
    Decimal(f64),
    /// Boolean flag.
    Boolean(bool),
    /// Text, passed through unchanged.
    Text(String),
    /// Calendar date without a time component.
    Date(NaiveDate),
    /// Date and time of day, without a time zone.
    Timestamp(NaiveDateTime),
}

/// A fully mapped row, aligned positionally with its plan's column list.
///
/// Rows are immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetRow {
    values: Vec<TargetValue>,
}

impl TargetRow {
    /// Wraps an ordered list of values into a row.
    #[must_use]
    pub const fn new(values: Vec<TargetValue>) -> Self {
        Self { values }
    }

    /// Returns the values in column order.
    #[must_use]
    pub fn values(&self) -> &[TargetValue] {
        &self.values
    }

    /// Number of values in the row.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if the row has no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// How a raw string is converted into a [`TargetValue`].
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Coercion {
    /// Pass the string through unchanged.
    #[default]
    Text,
    /// Parse a signed 64-bit integer.
    Integer,
    /// Parse a finite floating point number.
    Decimal,
    /// Parse `true`/`false`, `yes`/`no`, `1`/`0` and friends.
    Boolean,
    /// Parse a date using the column's `format`.
    Date,
    /// Parse a date and time using the column's `format`. A value holding
    /// only a date is read as midnight.
    Timestamp,
}

/// What to do when a present value fails its coercion.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InvalidPolicy {
    /// Skip the whole row and record the reason.
    #[default]
    Skip,
    /// Substitute the column's declared default.
    UseDefault,
}

/// Source field(s) feeding a column.
///
/// Accepts either a bare string (`source = "user_id"`) or a list of
/// aliases tried in order (`source = ["user_id", "id", "User Id"]`), which
/// is how one plan absorbs header drift between file releases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceField {
    /// A single header name.
    Single(String),
    /// Header names tried in order; the first one present wins.
    Aliases(Vec<String>),
}

impl SourceField {
    /// Returns the candidate header names in lookup order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        match self {
            Self::Single(name) => std::slice::from_ref(name),
            Self::Aliases(names) => names,
        }
    }
}

/// Declares how one target column is produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Target column name.
    pub target: String,
    /// Source header name(s) to read.
    #[serde(default)]
    pub source: Option<SourceField>,
    /// Coercion applied to the raw value.
    #[serde(default)]
    pub coerce: Coercion,
    /// `chrono` format string for [`Coercion::Date`] (default `%Y-%m-%d`)
    /// and [`Coercion::Timestamp`] (default: ISO-style date with optional
    /// time).
    #[serde(default)]
    pub format: Option<String>,
    /// Raw default used when the value is missing (and, with
    /// [`InvalidPolicy::UseDefault`], when it fails coercion).
    #[serde(default)]
    pub default: Option<String>,
    /// Policy for values that are present but fail coercion.
    #[serde(default)]
    pub on_invalid: InvalidPolicy,
    /// Raw constant used unconditionally, ignoring any source field.
    #[serde(default)]
    pub constant: Option<String>,
    /// Produce `NULL` for a missing value when no default is declared.
    #[serde(default)]
    pub nullable: bool,
}

impl ColumnSpec {
    /// A pass-through text column read from the same-named source field.
    #[must_use]
    pub fn text(target: &str) -> Self {
        Self::from_source(target, target, Coercion::Text)
    }

    /// A column read from `source` with the given coercion.
    #[must_use]
    pub fn from_source(target: &str, source: &str, coerce: Coercion) -> Self {
        Self {
            target: target.to_string(),
            source: Some(SourceField::Single(source.to_string())),
            coerce,
            format: None,
            default: None,
            on_invalid: InvalidPolicy::Skip,
            constant: None,
            nullable: false,
        }
    }
}

/// Text encoding of a source file.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Encoding {
    /// UTF-8, optionally BOM-prefixed.
    #[default]
    Utf8,
    /// ISO-8859-1; every byte maps to the code point of the same value.
    Latin1,
}

/// Binds one source file to one target table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableLoadPlan {
    /// Unique plan identifier used in logs and reports (e.g. `"users"`).
    pub id: String,
    /// Path of the source file. Relative paths resolve against the data
    /// directory given at run time.
    pub source: PathBuf,
    /// Target table name.
    pub table: String,
    /// Column whose uniqueness makes the load idempotent.
    pub conflict_key: String,
    /// Source file encoding.
    #[serde(default)]
    pub encoding: Encoding,
    /// Rows per insert statement. `None` sends the whole plan as one batch.
    #[serde(default)]
    pub batch_size: Option<usize>,
    /// Target columns in insert order.
    pub columns: Vec<ColumnSpec>,
}

impl TableLoadPlan {
    /// Returns the target column names in insert order.
    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.target.as_str()).collect()
    }

    /// Resolves the plan's source path against `data_dir`.
    #[must_use]
    pub fn source_path(&self, data_dir: &Path) -> PathBuf {
        if self.source.is_absolute() {
            self.source.clone()
        } else {
            data_dir.join(&self.source)
        }
    }
}

/// An ordered list of plans, loaded in sequence.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlanSet {
    /// Plans in load order.
    pub plans: Vec<TableLoadPlan>,
}

/// A row that was read but not loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRow {
    /// Line the record started on.
    pub line: u64,
    /// Human-readable reason.
    pub reason: String,
}

/// Outcome of loading one plan. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadResult {
    /// Plan identifier.
    pub plan_id: String,
    /// Target table.
    pub table: String,
    /// Source file that was read.
    pub source: PathBuf,
    /// Records read from the source file.
    pub attempted: u64,
    /// Rows handed to the sink.
    pub submitted: u64,
    /// Rows the store reported as newly inserted.
    pub inserted: u64,
    /// Rows dropped by row-scoped failures.
    pub skipped: Vec<SkippedRow>,
    /// Reason the plan stopped early, if it did.
    pub aborted: Option<String>,
}

impl LoadResult {
    /// Creates an empty result for `plan`, reading from `source`.
    #[must_use]
    pub fn new(plan: &TableLoadPlan, source: PathBuf) -> Self {
        Self {
            plan_id: plan.id.clone(),
            table: plan.table.clone(),
            source,
            attempted: 0,
            submitted: 0,
            inserted: 0,
            skipped: Vec::new(),
            aborted: None,
        }
    }

    /// Number of skipped rows.
    #[must_use]
    pub fn skipped_count(&self) -> u64 {
        self.skipped.len() as u64
    }

    /// Rows submitted but ignored by the store as already present.
    #[must_use]
    pub const fn duplicates(&self) -> u64 {
        self.submitted.saturating_sub(self.inserted)
    }
}

/// Terminal state of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunOutcome {
    /// Every accepted row from every plan was committed.
    Committed,
    /// Nothing from this run was persisted.
    RolledBack {
        /// Why the run was rolled back.
        reason: String,
    },
    /// Dry run: rows were mapped but no store was touched.
    Checked,
}

/// Aggregate result of a run: one [`LoadResult`] per attempted plan plus
/// the terminal outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// How the run ended.
    pub outcome: RunOutcome,
    /// Per-plan results in load order.
    pub results: Vec<LoadResult>,
}

impl RunReport {
    /// Total rows inserted across all plans.
    #[must_use]
    pub fn total_inserted(&self) -> u64 {
        self.results.iter().map(|r| r.inserted).sum()
    }

    /// Total rows skipped across all plans.
    #[must_use]
    pub fn total_skipped(&self) -> u64 {
        self.results.iter().map(LoadResult::skipped_count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_single_and_aliased_sources() {
        let plan: TableLoadPlan = toml::from_str(
            r#"
            id = "users"
            source = "users.csv"
            table = "users"
            conflict_key = "user_id"

            [[columns]]
            target = "user_id"
            source = ["user_id", "id", "User Id"]
            coerce = "integer"

            [[columns]]
            target = "first_name"
            source = "first_name"
            "#,
        )
        .unwrap();

        assert_eq!(plan.encoding, Encoding::Utf8);
        assert_eq!(plan.batch_size, None);
        assert_eq!(plan.column_names(), vec!["user_id", "first_name"]);
        assert_eq!(
            plan.columns[0].source.as_ref().unwrap().names(),
            ["user_id", "id", "User Id"]
        );
        assert_eq!(plan.columns[0].coerce, Coercion::Integer);
        assert_eq!(plan.columns[1].source.as_ref().unwrap().names(), ["first_name"]);
        assert_eq!(plan.columns[1].coerce, Coercion::Text);
        assert_eq!(plan.columns[1].on_invalid, InvalidPolicy::Skip);
    }

    #[test]
    fn source_path_resolves_relative_to_data_dir() {
        let mut plan = TableLoadPlan {
            id: "orders".to_string(),
            source: PathBuf::from("orders.csv"),
            table: "orders".to_string(),
            conflict_key: "order_id".to_string(),
            encoding: Encoding::Utf8,
            batch_size: None,
            columns: vec![ColumnSpec::text("order_id")],
        };
        assert_eq!(
            plan.source_path(Path::new("/data")),
            PathBuf::from("/data/orders.csv")
        );

        plan.source = PathBuf::from("/elsewhere/orders.csv");
        assert_eq!(
            plan.source_path(Path::new("/data")),
            PathBuf::from("/elsewhere/orders.csv")
        );
    }

    #[test]
    fn report_totals() {
        let plan = TableLoadPlan {
            id: "users".to_string(),
            source: PathBuf::from("users.csv"),
            table: "users".to_string(),
            conflict_key: "user_id".to_string(),
            encoding: Encoding::Utf8,
            batch_size: None,
            columns: vec![ColumnSpec::text("user_id")],
        };
        let mut first = LoadResult::new(&plan, PathBuf::from("users.csv"));
        first.submitted = 3;
        first.inserted = 2;
        first.skipped.push(SkippedRow {
            line: 4,
            reason: "bad".to_string(),
        });
        let mut second = first.clone();
        second.inserted = 3;

        let report = RunReport {
            outcome: RunOutcome::Committed,
            results: vec![first.clone(), second],
        };
        assert_eq!(report.total_inserted(), 5);
        assert_eq!(report.total_skipped(), 2);
        assert_eq!(first.duplicates(), 1);
    }

    #[test]
    fn coercion_names_round_trip_through_strum() {
        assert_eq!("use_default".parse::<InvalidPolicy>().unwrap(), InvalidPolicy::UseDefault);
        assert_eq!(Coercion::Decimal.as_ref(), "decimal");
        assert_eq!(Encoding::Latin1.to_string(), "latin1");
    }
}
