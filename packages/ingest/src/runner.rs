//! Orchestrates one ingestion run.
//!
//! ```text
//! Idle -> ConnectionOpen -> SchemaEnsured -> Loading(1..N) -> Committed | RolledBack -> Closed
//! ```
//!
//! Plans are loaded strictly in order inside one transaction. Row-scoped
//! failures are recorded and skipped; plan-scoped failures (missing file,
//! bad header, I/O) end that plan only; a sink failure rolls back the whole
//! run.

use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use csv_ingest_database::db::ConnectionProvider;
use csv_ingest_database::sink::UpsertSink;
use csv_ingest_database::{DEFAULT_SCHEMA, SinkError, apply_schema};
use csv_ingest_models::{LoadResult, RunOutcome, RunReport, SkippedRow, TableLoadPlan, TargetRow};
use csv_ingest_source::SourceError;
use csv_ingest_source::field_mapper::FieldMapper;
use csv_ingest_source::plan::validate_plan_set;
use csv_ingest_source::progress::{ProgressCallback, null_progress};
use csv_ingest_source::record_source::RecordSource;
use switchy_database::Database;

use crate::IngestError;

/// Where a run currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Idle,
    ConnectionOpen,
    SchemaEnsured,
    /// Loading the `index`-th plan (1-based).
    Loading {
        index: usize,
        plan: String,
    },
    Committed,
    RolledBack,
    Closed,
}

impl RunState {
    fn advance(&mut self, next: Self) {
        log::debug!("Run state: {self:?} -> {next:?}");
        *self = next;
    }
}

/// Loads a list of plans into one store, all or nothing.
pub struct IngestionRunner<'a> {
    provider: &'a dyn ConnectionProvider,
    plans: Vec<TableLoadPlan>,
    schema: String,
    data_dir: PathBuf,
    batch_size: Option<usize>,
    plan_progress: Arc<dyn ProgressCallback>,
    row_progress: Arc<dyn ProgressCallback>,
}

impl<'a> IngestionRunner<'a> {
    /// Creates a runner for `plans`, in the given order, using the default
    /// schema and the current directory for relative source paths.
    #[must_use]
    pub fn new(provider: &'a dyn ConnectionProvider, plans: Vec<TableLoadPlan>) -> Self {
        Self {
            provider,
            plans,
            schema: DEFAULT_SCHEMA.to_string(),
            data_dir: PathBuf::from("."),
            batch_size: None,
            plan_progress: null_progress(),
            row_progress: null_progress(),
        }
    }

    #[must_use]
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    #[must_use]
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    /// Overrides every plan's batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: Option<usize>) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn with_progress(
        mut self,
        plans: Arc<dyn ProgressCallback>,
        rows: Arc<dyn ProgressCallback>,
    ) -> Self {
        self.plan_progress = plans;
        self.row_progress = rows;
        self
    }

    /// Runs every plan and returns the per-plan results with the terminal
    /// outcome. A sink failure is not an `Err`: it comes back as
    /// [`RunOutcome::RolledBack`] so the partial results stay visible.
    ///
    /// # Errors
    ///
    /// * [`IngestError::Plan`] if the plans are inconsistent
    /// * [`IngestError::ConnectFailed`] if the store is unreachable
    /// * [`IngestError::Schema`] if a schema statement fails
    pub async fn run(&self) -> Result<RunReport, IngestError> {
        validate_plan_set(&self.plans)?;

        let start = Instant::now();
        let target = self.provider.describe();
        let mut state = RunState::Idle;

        log::info!("Connecting to {target}");
        let db = self
            .provider
            .connect()
            .await
            .map_err(|source| IngestError::ConnectFailed {
                target: target.clone(),
                source,
            })?;
        state.advance(RunState::ConnectionOpen);

        let report = self.run_connected(db.as_ref(), &mut state).await;

        drop(db);
        state.advance(RunState::Closed);

        if let Ok(report) = &report {
            log::info!(
                "Run finished in {:.1}s: {} inserted, {} skipped ({:?})",
                start.elapsed().as_secs_f64(),
                report.total_inserted(),
                report.total_skipped(),
                report.outcome,
            );
        }

        report
    }

    async fn run_connected(
        &self,
        db: &dyn Database,
        state: &mut RunState,
    ) -> Result<RunReport, IngestError> {
        apply_schema(db, &self.schema)
            .await
            .map_err(IngestError::Schema)?;
        state.advance(RunState::SchemaEnsured);

        let txn = match db.begin_transaction().await {
            Ok(txn) => txn,
            Err(e) => {
                let reason = format!("Failed to open transaction: {e}");
                log::error!("{reason}");
                state.advance(RunState::RolledBack);
                return Ok(RunReport {
                    outcome: RunOutcome::RolledBack { reason },
                    results: Vec::new(),
                });
            }
        };

        self.plan_progress.set_total(self.plans.len() as u64);

        let mut results = Vec::with_capacity(self.plans.len());
        let mut failure = None;

        for (i, plan) in self.plans.iter().enumerate() {
            state.advance(RunState::Loading {
                index: i + 1,
                plan: plan.id.clone(),
            });
            self.plan_progress.set_message(format!("Loading {}", plan.id));

            let mut result = LoadResult::new(plan, plan.source_path(&self.data_dir));
            let loaded = load_plan(
                txn.as_ref(),
                plan,
                self.batch_size.or(plan.batch_size),
                &mut result,
                self.row_progress.as_ref(),
            )
            .await;

            self.plan_progress.inc(1);
            results.push(result);

            if let Err(e) = loaded {
                failure = Some(e);
                break;
            }
        }

        let outcome = if let Some(e) = failure {
            log::error!("Rolling back: {e}");
            if let Err(rollback) = txn.rollback().await {
                log::error!("Rollback failed: {rollback}");
            }
            state.advance(RunState::RolledBack);
            RunOutcome::RolledBack {
                reason: e.to_string(),
            }
        } else {
            match txn.commit().await {
                Ok(()) => {
                    log::info!("Committed {} plan(s)", results.len());
                    state.advance(RunState::Committed);
                    RunOutcome::Committed
                }
                Err(e) => {
                    log::error!("Commit failed: {e}");
                    state.advance(RunState::RolledBack);
                    RunOutcome::RolledBack {
                        reason: format!("Commit failed: {e}"),
                    }
                }
            }
        };

        self.plan_progress.finish(format!("{} plan(s) done", results.len()));
        self.row_progress.finish(String::new());

        Ok(RunReport { outcome, results })
    }
}

/// Streams one plan's file through the mapper into a sink on `db`,
/// filling in `result` as it goes.
///
/// Plan-scoped problems are recorded in `result.aborted` and return `Ok`.
///
/// # Errors
///
/// Returns [`SinkError`] if the store rejects a batch. `result` still holds
/// the counts up to that point.
pub async fn load_plan(
    db: &dyn Database,
    plan: &TableLoadPlan,
    batch_size: Option<usize>,
    result: &mut LoadResult,
    progress: &dyn ProgressCallback,
) -> Result<(), SinkError> {
    let start = Instant::now();
    log::info!(
        "{}: loading {} into {}",
        plan.id,
        result.source.display(),
        plan.table
    );

    let mut source = match RecordSource::open(&result.source, plan.encoding) {
        Ok(source) => source,
        Err(e) => {
            abort(result, &e);
            return Ok(());
        }
    };

    let columns = plan.column_names();
    let mut sink = match UpsertSink::new(db, &plan.table, &columns, &plan.conflict_key) {
        Ok(sink) => sink.with_batch_size(batch_size),
        Err(e) => {
            abort(result, &e);
            return Ok(());
        }
    };

    let mapper = FieldMapper::new(plan);
    progress.set_message(plan.id.clone());

    while let Some(row) = next_row(&mut source, &mapper, result, progress) {
        if let Err(e) = sink.push(row).await {
            let counts = sink.counts();
            result.submitted = counts.submitted;
            result.inserted = counts.inserted;
            return Err(e);
        }
    }

    let flushed = sink.flush().await;
    let counts = sink.counts();
    result.submitted = counts.submitted;
    result.inserted = counts.inserted;
    flushed?;

    log::info!(
        "{}: {} read, {} inserted, {} duplicate, {} skipped in {:.1}s",
        plan.id,
        result.attempted,
        result.inserted,
        result.duplicates(),
        result.skipped_count(),
        start.elapsed().as_secs_f64(),
    );

    Ok(())
}

/// Pulls records until one maps to a row. Skips are recorded in `result`;
/// a plan-scoped read error sets `result.aborted` and ends the stream.
pub(crate) fn next_row<R: std::io::Read>(
    source: &mut RecordSource<R>,
    mapper: &FieldMapper<'_>,
    result: &mut LoadResult,
    progress: &dyn ProgressCallback,
) -> Option<TargetRow> {
    for record in source.by_ref() {
        let record = match record {
            Ok(record) => record,
            Err(SourceError::MalformedRecord { line, reason }) => {
                result.attempted += 1;
                progress.inc(1);
                skip(result, line, format!("malformed record: {reason}"));
                continue;
            }
            Err(e) => {
                abort(result, &e);
                return None;
            }
        };

        result.attempted += 1;
        progress.inc(1);

        match mapper.map(&record) {
            Ok(row) => return Some(row),
            Err(e) => skip(result, record.line, e.to_string()),
        }
    }
    None
}

fn skip(result: &mut LoadResult, line: u64, reason: String) {
    log::warn!("{}: skipping line {line}: {reason}", result.plan_id);
    result.skipped.push(SkippedRow { line, reason });
}

pub(crate) fn abort(result: &mut LoadResult, reason: &impl Display) {
    log::error!("{}: plan aborted: {reason}", result.plan_id);
    result.aborted = Some(reason.to_string());
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use async_trait::async_trait;
    use csv_ingest_database::DbError;
    use csv_ingest_database::db::SqliteStore;
    use csv_ingest_database::queries::count_rows;
    use csv_ingest_source::registry::default_plans;
    use moosicbox_json_utils::database::ToValue as _;
    use switchy_database::DatabaseValue;

    use super::*;

    const USERS_CSV: &str = "\
user_id,first_name,last_name,email,gender,address,city,state,country,postal_code
1,Ann,Lee,ann@example.com,F,1 Elm St,Springfield,IL,US,62701
2,Bob,Ray,bob@example.com,M,2 Oak St,Springfield,IL,US,62702
3,Cy,Dee,cy@example.com,,3 Ash St,Springfield,IL,US,62703
";

    const ORDERS_CSV: &str = "\
order_id,user_id,product,quantity,price,status,order_date
10,1,Lamp,2,19.99,shipped,2024-01-05
11,2,Desk,1,120.00,pending,2024-01-06
12,3,Chair,4,45.50,,2024-01-07
";

    struct Fixture {
        dir: PathBuf,
    }

    impl Fixture {
        fn new(name: &str) -> Self {
            let dir = std::env::temp_dir().join(format!("csv_ingest_runner_{name}"));
            let _ = std::fs::remove_dir_all(&dir);
            std::fs::create_dir_all(&dir).unwrap();
            Self { dir }
        }

        fn write(&self, file: &str, contents: &str) {
            std::fs::write(self.dir.join(file), contents).unwrap();
        }

        fn store(&self) -> SqliteStore {
            SqliteStore::file(self.dir.join("store.db"))
        }

        fn store_at(&self, file: &str) -> SqliteStore {
            SqliteStore::file(self.dir.join(file))
        }

        fn path(&self) -> &Path {
            &self.dir
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    fn plans(ids: &[&str]) -> Vec<TableLoadPlan> {
        let all = default_plans();
        ids.iter()
            .map(|id| all.iter().find(|p| p.id == *id).unwrap().clone())
            .collect()
    }

    async fn count(store: &SqliteStore, table: &str) -> i64 {
        let db = store.connect().await.unwrap();
        count_rows(db.as_ref(), table).await.unwrap()
    }

    async fn run(fixture: &Fixture, store: &SqliteStore, plans: Vec<TableLoadPlan>) -> RunReport {
        IngestionRunner::new(store, plans)
            .with_data_dir(fixture.path())
            .run()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn loading_twice_keeps_one_copy_of_each_row() {
        let fixture = Fixture::new("idempotent");
        fixture.write("users.csv", USERS_CSV);
        let store = fixture.store();

        let first = run(&fixture, &store, plans(&["users"])).await;
        assert_eq!(first.outcome, RunOutcome::Committed);
        assert_eq!(first.results[0].inserted, 3);

        let second = run(&fixture, &store, plans(&["users"])).await;
        assert_eq!(second.outcome, RunOutcome::Committed);
        assert_eq!(second.results[0].submitted, 3);
        assert_eq!(second.results[0].inserted, 0);
        assert_eq!(second.results[0].duplicates(), 3);

        assert_eq!(count(&store, "users").await, 3);
    }

    #[tokio::test]
    async fn one_bad_row_is_skipped_and_the_rest_commit() {
        let fixture = Fixture::new("row_isolation");
        fixture.write(
            "orders.csv",
            "order_id,user_id,product,quantity,price,status,order_date
10,1,Lamp,2,19.99,shipped,2024-01-05
11,2,Desk,three,120.00,pending,2024-01-06
12,3,Chair,4,45.50,,2024-01-07
13,3,Rug,1,80.00,,2024-01-08
",
        );
        let store = fixture.store();

        let report = run(&fixture, &store, plans(&["orders"])).await;
        let orders = &report.results[0];

        assert_eq!(report.outcome, RunOutcome::Committed);
        assert_eq!(orders.attempted, 4);
        assert_eq!(orders.inserted, 3);
        assert_eq!(orders.skipped.len(), 1);
        assert_eq!(orders.skipped[0].line, 3);
        assert!(orders.skipped[0].reason.contains("cannot coerce 'three'"));
        assert_eq!(count(&store, "orders").await, 3);
    }

    #[tokio::test]
    async fn missing_file_aborts_only_its_plan() {
        let fixture = Fixture::new("missing_file");
        fixture.write("orders.csv", ORDERS_CSV);
        let store = fixture.store();

        let report = run(&fixture, &store, plans(&["users", "orders"])).await;

        assert_eq!(report.outcome, RunOutcome::Committed);
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.results[0].inserted, 0);
        assert!(
            report.results[0]
                .aborted
                .as_deref()
                .is_some_and(|r| r.contains("not found"))
        );
        assert_eq!(report.results[1].inserted, 3);
        assert_eq!(count(&store, "orders").await, 3);
    }

    #[tokio::test]
    async fn renamed_headers_load_the_same_rows() {
        let fixture = Fixture::new("remapping");
        fixture.write("users.csv", USERS_CSV);
        fixture.write(
            "titled.csv",
            "Postal Code,Country,State,City,Address,Gender,Email,Last Name,First Name,User Id
62701,US,IL,Springfield,1 Elm St,F,ann@example.com,Lee,Ann,1
",
        );

        let snake = fixture.store_at("snake.db");
        run(&fixture, &snake, plans(&["users"])).await;

        let mut titled_plans = plans(&["users"]);
        titled_plans[0].source = PathBuf::from("titled.csv");
        let titled = fixture.store_at("titled.db");
        run(&fixture, &titled, titled_plans).await;

        let mut rows = Vec::new();
        for store in [&snake, &titled] {
            let db = store.connect().await.unwrap();
            let found = db
                .query_raw_params(
                    "SELECT first_name, last_name, postal_code FROM users WHERE user_id = $1",
                    &[DatabaseValue::Int64(1)],
                )
                .await
                .unwrap();
            let row = &found[0];
            let first_name: String = row.to_value("first_name").unwrap();
            let last_name: String = row.to_value("last_name").unwrap();
            let postal_code: String = row.to_value("postal_code").unwrap();
            rows.push((first_name, last_name, postal_code));
        }

        assert_eq!(rows[0], rows[1]);
        assert_eq!(rows[0].0, "Ann");
    }

    #[tokio::test]
    async fn plan_order_does_not_block_either_table() {
        for (name, order) in [("users_first", ["users", "orders"]), ("orders_first", ["orders", "users"])] {
            let fixture = Fixture::new(name);
            fixture.write("users.csv", USERS_CSV);
            fixture.write("orders.csv", ORDERS_CSV);
            let store = fixture.store();

            let report = run(&fixture, &store, plans(&order)).await;
            let ids: Vec<&str> = report.results.iter().map(|r| r.plan_id.as_str()).collect();

            assert_eq!(report.outcome, RunOutcome::Committed);
            assert_eq!(ids, order);
            assert_eq!(count(&store, "users").await, 3);
            assert_eq!(count(&store, "orders").await, 3);
        }
    }

    #[tokio::test]
    async fn sink_failure_in_second_plan_rolls_back_everything() {
        let fixture = Fixture::new("rollback");
        fixture.write("users.csv", USERS_CSV);
        fixture.write("orders.csv", ORDERS_CSV);
        let store = fixture.store();

        let mut broken = plans(&["orders"]).remove(0);
        broken.id = "broken".to_string();
        broken.table = "no_such_table".to_string();
        let all = vec![
            plans(&["users"]).remove(0),
            broken,
            plans(&["orders"]).remove(0),
        ];

        let report = IngestionRunner::new(&store, all)
            .with_data_dir(fixture.path())
            .with_batch_size(Some(1))
            .run()
            .await
            .unwrap();

        assert!(matches!(report.outcome, RunOutcome::RolledBack { .. }));
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.results[0].inserted, 3);
        assert_eq!(count(&store, "users").await, 0);
        assert_eq!(count(&store, "orders").await, 0);
    }

    #[tokio::test]
    async fn sink_failure_after_partial_flush_rolls_back_both_tables() {
        let fixture = Fixture::new("rollback_mid_plan");
        fixture.write("users.csv", USERS_CSV);
        fixture.write(
            "orders.csv",
            "order_id,user_id,product,quantity,price,status,order_date
10,1,Lamp,2,19.99,shipped,2024-01-05
11,2,Desk,1,120.00,pending,2024-01-06
12,3,Chair,-4,45.50,,2024-01-07
13,3,Rug,1,80.00,,2024-01-08
",
        );
        let store = fixture.store();
        let schema = DEFAULT_SCHEMA.replace(
            "quantity   BIGINT,",
            "quantity   BIGINT CHECK (quantity > 0),",
        );
        assert_ne!(schema, DEFAULT_SCHEMA);

        let report = IngestionRunner::new(&store, plans(&["users", "orders"]))
            .with_data_dir(fixture.path())
            .with_schema(schema)
            .with_batch_size(Some(1))
            .run()
            .await
            .unwrap();

        assert!(matches!(report.outcome, RunOutcome::RolledBack { .. }));
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.results[0].inserted, 3);
        let orders = &report.results[1];
        assert_eq!(orders.attempted, 3);
        assert_eq!(orders.inserted, 2);
        assert_eq!(count(&store, "users").await, 0);
        assert_eq!(count(&store, "orders").await, 0);
    }

    #[tokio::test]
    async fn order_dates_with_time_of_day_load() {
        let fixture = Fixture::new("timestamps");
        fixture.write(
            "orders.csv",
            "order_id,user_id,product,quantity,price,status,order_date
10,1,Lamp,2,19.99,shipped,2024-01-05 10:30:00
11,2,Desk,1,120.00,pending,2024-01-06T08:15
12,3,Chair,4,45.50,,2024-01-07
",
        );
        let store = fixture.store();

        let report = run(&fixture, &store, plans(&["orders"])).await;

        assert_eq!(report.outcome, RunOutcome::Committed);
        assert!(report.results[0].skipped.is_empty());
        assert_eq!(report.results[0].inserted, 3);
        assert_eq!(count(&store, "orders").await, 3);
    }

    #[tokio::test]
    async fn schema_failure_stops_before_loading() {
        let fixture = Fixture::new("schema_failure");
        fixture.write("users.csv", USERS_CSV);
        let store = fixture.store();

        let err = IngestionRunner::new(&store, plans(&["users"]))
            .with_data_dir(fixture.path())
            .with_schema("CREATE TABLE users (;")
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Schema(DbError::Schema { index: 1, .. })));
    }

    struct Unreachable;

    #[async_trait]
    impl ConnectionProvider for Unreachable {
        fn describe(&self) -> String {
            "nowhere".to_string()
        }

        async fn connect(&self) -> Result<Box<dyn Database>, DbError> {
            Err(DbError::Connect {
                message: "connection refused".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn unreachable_store_is_connect_failed() {
        let err = IngestionRunner::new(&Unreachable, plans(&["users"]))
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::ConnectFailed { ref target, .. } if target == "nowhere"));
    }

    #[tokio::test]
    async fn inconsistent_plans_are_rejected_before_connecting() {
        let plans = vec![plans(&["users"]).remove(0), plans(&["users"]).remove(0)];
        let err = IngestionRunner::new(&Unreachable, plans)
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Plan(_)));
    }
}
