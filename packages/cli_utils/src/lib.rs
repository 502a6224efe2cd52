#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Terminal output for the `csv_ingest` binary.
//!
//! A plans bar and a rows spinner implement [`ProgressCallback`] for the
//! runner. [`init_logger`] routes log lines through the same
//! [`MultiProgress`] so skip warnings do not tear the bars.

use std::sync::Arc;
use std::time::Duration;

use csv_ingest_source::progress::ProgressCallback;
use indicatif::{ProgressBar, ProgressStyle};

pub use indicatif::MultiProgress;

/// One terminal bar fed by the runner.
pub struct IndicatifProgress {
    bar: ProgressBar,
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

impl IndicatifProgress {
    /// Spinner counting records read from the current file, with a rate.
    /// Files are streamed, so there is no total to show.
    #[must_use]
    pub fn rows_bar(multi: &MultiProgress, label: &str) -> Arc<dyn ProgressCallback> {
        let bar = multi.add(ProgressBar::new_spinner());
        bar.set_style(style("{spinner:.cyan} {prefix}: {msg} {human_pos} rows ({per_sec})"));
        bar.set_prefix(label.to_string());
        bar.enable_steady_tick(Duration::from_millis(120));

        Arc::new(Self { bar })
    }

    /// Bar over the plans of a run, e.g. `1/2` after users loads.
    #[must_use]
    pub fn plans_bar(multi: &MultiProgress, label: &str, plans: u64) -> Arc<dyn ProgressCallback> {
        let bar = multi.add(ProgressBar::new(plans));
        bar.set_style(style(
            "{prefix:.bold} [{bar:30.green/dim}] {pos}/{len} {msg} ({elapsed})",
        ));
        bar.set_prefix(label.to_string());

        Arc::new(Self { bar })
    }
}

impl ProgressCallback for IndicatifProgress {
    fn set_total(&self, total: u64) {
        self.bar.set_length(total);
    }

    fn inc(&self, delta: u64) {
        self.bar.inc(delta);
    }

    fn set_message(&self, msg: String) {
        self.bar.set_message(msg);
    }

    fn finish(&self, msg: String) {
        if msg.is_empty() {
            self.bar.finish_and_clear();
        } else {
            self.bar.finish_with_message(msg);
        }
    }
}

/// Installs `pretty_env_logger` (filtered by `RUST_LOG`) behind
/// `indicatif-log-bridge` and returns the [`MultiProgress`] the bars of this
/// run must be added to.
#[must_use]
pub fn init_logger() -> MultiProgress {
    let multi = MultiProgress::new();

    let logger = pretty_env_logger::formatted_builder()
        .parse_env("RUST_LOG")
        .build();
    let level = logger.filter();

    indicatif_log_bridge::LogWrapper::new(multi.clone(), logger)
        .try_init()
        .ok(); // already installed

    log::set_max_level(level);

    multi
}
