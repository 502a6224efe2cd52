//! Dry run: read and map every plan without touching a store.

use std::path::Path;

use csv_ingest_models::{LoadResult, RunOutcome, RunReport, TableLoadPlan};
use csv_ingest_source::field_mapper::FieldMapper;
use csv_ingest_source::progress::ProgressCallback;
use csv_ingest_source::record_source::RecordSource;

use crate::runner::{abort, next_row};

/// Reads and maps one plan. `submitted` counts rows that mapped cleanly;
/// `inserted` stays zero.
#[must_use]
pub fn check_plan(
    plan: &TableLoadPlan,
    data_dir: &Path,
    progress: &dyn ProgressCallback,
) -> LoadResult {
    let mut result = LoadResult::new(plan, plan.source_path(data_dir));

    let mut source = match RecordSource::open(&result.source, plan.encoding) {
        Ok(source) => source,
        Err(e) => {
            abort(&mut result, &e);
            return result;
        }
    };

    let mapper = FieldMapper::new(plan);
    progress.set_message(plan.id.clone());

    while next_row(&mut source, &mapper, &mut result, progress).is_some() {
        result.submitted += 1;
    }

    log::info!(
        "{}: {} read, {} would be submitted, {} skipped",
        plan.id,
        result.attempted,
        result.submitted,
        result.skipped_count(),
    );

    result
}

/// Checks every plan in order.
#[must_use]
pub fn check_plans(
    plans: &[TableLoadPlan],
    data_dir: &Path,
    progress: &dyn ProgressCallback,
) -> RunReport {
    RunReport {
        outcome: RunOutcome::Checked,
        results: plans
            .iter()
            .map(|plan| check_plan(plan, data_dir, progress))
            .collect(),
    }
}
