#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the CSV ingestion tool.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use csv_ingest::check::check_plans;
use csv_ingest::runner::IngestionRunner;
use csv_ingest::{all_plans, enabled_plans, store_provider};
use csv_ingest_cli_utils::{IndicatifProgress, init_logger};
use csv_ingest_database::{DEFAULT_SCHEMA, queries};
use csv_ingest_models::{RunOutcome, RunReport, SourceField};

#[derive(Parser)]
#[command(name = "csv_ingest", about = "Load CSV files into relational tables")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Plan-set TOML file (`[[plans]]` entries). Defaults to the built-in
    /// `users` and `orders` plans.
    #[arg(long, global = true)]
    plans: Option<PathBuf>,

    /// Comma-separated plan ids to run (overrides `CSV_INGEST_PLANS` env var)
    #[arg(long, global = true)]
    only: Option<String>,

    /// Directory that relative plan source paths resolve against
    #[arg(long, global = true, default_value = ".")]
    data_dir: PathBuf,

    /// Use this `SQLite` file instead of the Postgres `DB_*` settings
    #[arg(long, global = true)]
    sqlite: Option<PathBuf>,

    /// Schema SQL applied before loading. Defaults to the built-in schema.
    #[arg(long, global = true)]
    schema: Option<PathBuf>,

    /// Rows per insert batch for every plan. 0 loads each plan in one batch.
    #[arg(long, global = true)]
    batch_size: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Load every enabled plan in one transaction (default)
    Load,
    /// Read and map every enabled plan without touching the store
    Check,
    /// List configured plans
    Plans,
    /// Show row counts in the store
    Summary,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    let multi = init_logger();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Load) {
        Commands::Load => {
            let plans = enabled_plans(all_plans(cli.plans.as_deref())?, cli.only);
            let schema = match cli.schema {
                Some(path) => std::fs::read_to_string(&path)
                    .map_err(|e| format!("Failed to read schema {}: {e}", path.display()))?,
                None => DEFAULT_SCHEMA.to_string(),
            };
            let provider = store_provider(cli.sqlite)?;

            let plans_bar = IndicatifProgress::plans_bar(&multi, "Plans", plans.len() as u64);
            let rows_bar = IndicatifProgress::rows_bar(&multi, "Rows");

            let report = IngestionRunner::new(provider.as_ref(), plans)
                .with_schema(schema)
                .with_data_dir(cli.data_dir)
                .with_batch_size(cli.batch_size)
                .with_progress(plans_bar, rows_bar)
                .run()
                .await?;

            print_report(&report);

            if let RunOutcome::RolledBack { reason } = report.outcome {
                return Err(format!("Run rolled back, nothing was persisted: {reason}").into());
            }
        }
        Commands::Check => {
            let plans = enabled_plans(all_plans(cli.plans.as_deref())?, cli.only);
            let rows_bar = IndicatifProgress::rows_bar(&multi, "Checking");
            let report = check_plans(&plans, &cli.data_dir, rows_bar.as_ref());
            rows_bar.finish(String::new());
            print_report(&report);
        }
        Commands::Plans => {
            let plans = all_plans(cli.plans.as_deref())?;
            println!("{:<12} {:<12} {:<12} SOURCE", "ID", "TABLE", "KEY");
            println!("{}", "-".repeat(60));
            for plan in &plans {
                println!(
                    "{:<12} {:<12} {:<12} {}",
                    plan.id,
                    plan.table,
                    plan.conflict_key,
                    plan.source_path(&cli.data_dir).display()
                );
                for column in &plan.columns {
                    let from = match (&column.constant, &column.source) {
                        (Some(constant), _) => format!("= '{constant}'"),
                        (None, Some(SourceField::Single(name))) => format!("<- {name}"),
                        (None, Some(SourceField::Aliases(names))) => {
                            format!("<- {}", names.join(" | "))
                        }
                        (None, None) => String::new(),
                    };
                    println!("    {:<16} {:<8} {from}", column.target, column.coerce.as_ref());
                }
            }
        }
        Commands::Summary => {
            let provider = store_provider(cli.sqlite)?;
            let db = provider.connect().await?;
            let summary = queries::summary(db.as_ref()).await?;
            println!("users:           {}", summary.users);
            println!("orders:          {}", summary.orders);
            println!("orphaned orders: {}", summary.orphaned_orders);
        }
    }

    Ok(())
}

fn print_report(report: &RunReport) {
    println!(
        "{:<12} {:<12} {:>8} {:>9} {:>10} {:>8}  STATUS",
        "PLAN", "TABLE", "READ", "INSERTED", "DUPLICATE", "SKIPPED"
    );
    println!("{}", "-".repeat(80));

    for result in &report.results {
        println!(
            "{:<12} {:<12} {:>8} {:>9} {:>10} {:>8}  {}",
            result.plan_id,
            result.table,
            result.attempted,
            result.inserted,
            result.duplicates(),
            result.skipped_count(),
            result
                .aborted
                .as_ref()
                .map_or_else(|| "ok".to_string(), |reason| format!("aborted: {reason}")),
        );
    }

    for result in &report.results {
        for skipped in &result.skipped {
            println!(
                "  {} line {}: {}",
                result.source.display(),
                skipped.line,
                skipped.reason
            );
        }
    }

    println!();
    match &report.outcome {
        RunOutcome::Committed => println!(
            "Committed: {} inserted, {} skipped",
            report.total_inserted(),
            report.total_skipped()
        ),
        RunOutcome::RolledBack { reason } => println!("Rolled back: {reason}"),
        RunOutcome::Checked => println!(
            "Checked: {} rows would be submitted, {} skipped",
            report.results.iter().map(|r| r.submitted).sum::<u64>(),
            report.total_skipped()
        ),
    }
}
