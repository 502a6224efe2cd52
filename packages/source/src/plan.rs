//! Plan parsing and validation.
//!
//! Plans are plain TOML. A single plan file holds one [`TableLoadPlan`];
//! a plan-set file holds a `[[plans]]` array loaded in order.

use std::collections::BTreeSet;
use std::path::Path;

use csv_ingest_models::{InvalidPolicy, PlanSet, TableLoadPlan};

use crate::PlanError;
use crate::coerce::coerce;

/// Parses a single plan from a TOML string.
///
/// # Errors
///
/// Returns [`PlanError`] if the TOML is malformed or the plan is invalid.
pub fn parse_plan_toml(toml_str: &str) -> Result<TableLoadPlan, PlanError> {
    let plan: TableLoadPlan = toml::de::from_str(toml_str)?;
    validate_plan(&plan)?;
    Ok(plan)
}

/// Parses a `[[plans]]` plan set from a TOML string.
///
/// # Errors
///
/// Returns [`PlanError`] if the TOML is malformed, any plan is invalid, or
/// two plans share an id.
pub fn parse_plan_set_toml(toml_str: &str) -> Result<Vec<TableLoadPlan>, PlanError> {
    let set: PlanSet = toml::de::from_str(toml_str)?;
    validate_plan_set(&set.plans)?;
    Ok(set.plans)
}

/// Reads and parses a plan-set file.
///
/// # Errors
///
/// Returns [`PlanError`] if the file cannot be read or does not hold a
/// valid plan set.
pub fn load_plan_set(path: &Path) -> Result<Vec<TableLoadPlan>, PlanError> {
    let contents = std::fs::read_to_string(path).map_err(|e| PlanError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let plans = parse_plan_set_toml(&contents)?;
    log::debug!("Loaded {} plan(s) from {}", plans.len(), path.display());
    Ok(plans)
}

/// Validates every plan and checks that plan ids are unique.
///
/// # Errors
///
/// Returns the first [`PlanError::Invalid`] found.
pub fn validate_plan_set(plans: &[TableLoadPlan]) -> Result<(), PlanError> {
    let mut ids = BTreeSet::new();
    for plan in plans {
        validate_plan(plan)?;
        if !ids.insert(plan.id.as_str()) {
            return Err(invalid(plan, "plan id is used more than once"));
        }
    }
    Ok(())
}

/// Checks a plan for internal consistency.
///
/// # Errors
///
/// Returns [`PlanError::Invalid`] describing the first problem found.
pub fn validate_plan(plan: &TableLoadPlan) -> Result<(), PlanError> {
    if plan.id.trim().is_empty() {
        return Err(invalid(plan, "plan id is empty"));
    }
    if plan.table.trim().is_empty() {
        return Err(invalid(plan, "target table is empty"));
    }
    if plan.columns.is_empty() {
        return Err(invalid(plan, "no columns declared"));
    }
    if plan.batch_size == Some(0) {
        return Err(invalid(plan, "batch_size must be at least 1"));
    }

    let mut targets = BTreeSet::new();
    for spec in &plan.columns {
        let column = &spec.target;
        if column.trim().is_empty() {
            return Err(invalid(plan, "a column has an empty target name"));
        }
        if !targets.insert(column.as_str()) {
            return Err(invalid(plan, &format!("column '{column}' is declared twice")));
        }

        let has_source = spec.source.as_ref().is_some_and(|s| !s.names().is_empty());
        if spec.constant.is_none() && !has_source {
            return Err(invalid(
                plan,
                &format!("column '{column}' needs a source field or a constant"),
            ));
        }
        if spec.on_invalid == InvalidPolicy::UseDefault && spec.default.is_none() {
            return Err(invalid(
                plan,
                &format!("column '{column}' uses on_invalid = \"use_default\" without a default"),
            ));
        }

        for (what, raw) in [("default", &spec.default), ("constant", &spec.constant)] {
            if let Some(raw) = raw
                && let Err(reason) = coerce(raw, spec.coerce, spec.format.as_deref())
            {
                return Err(invalid(
                    plan,
                    &format!(
                        "{what} '{raw}' of column '{column}' is not a valid {}: {reason}",
                        spec.coerce
                    ),
                ));
            }
        }
    }

    if !targets.contains(plan.conflict_key.as_str()) {
        return Err(invalid(
            plan,
            &format!(
                "conflict key '{}' is not one of the plan's columns",
                plan.conflict_key
            ),
        ));
    }

    Ok(())
}

fn invalid(plan: &TableLoadPlan, message: &str) -> PlanError {
    PlanError::Invalid {
        plan: plan.id.clone(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USERS: &str = r#"
        id = "users"
        source = "users.csv"
        table = "users"
        conflict_key = "user_id"

        [[columns]]
        target = "user_id"
        source = ["user_id", "id"]
        coerce = "integer"

        [[columns]]
        target = "email"
        source = "email"
    "#;

    fn message(err: PlanError) -> String {
        match err {
            PlanError::Invalid { message, .. } => message,
            other => panic!("expected an invalid plan, got {other}"),
        }
    }

    #[test]
    fn parses_valid_plan() {
        let plan = parse_plan_toml(USERS).unwrap();
        assert_eq!(plan.id, "users");
        assert_eq!(plan.columns.len(), 2);
    }

    #[test]
    fn rejects_conflict_key_outside_columns() {
        let toml = USERS.replace("conflict_key = \"user_id\"", "conflict_key = \"uid\"");
        let err = parse_plan_toml(&toml).unwrap_err();
        assert!(message(err).contains("conflict key 'uid'"));
    }

    #[test]
    fn rejects_duplicate_target_columns() {
        let toml = USERS.replace("target = \"email\"", "target = \"user_id\"");
        assert!(message(parse_plan_toml(&toml).unwrap_err()).contains("declared twice"));
    }

    #[test]
    fn rejects_column_without_source_or_constant() {
        let toml = USERS.replace("source = \"email\"", "");
        assert!(message(parse_plan_toml(&toml).unwrap_err()).contains("source field or a constant"));
    }

    #[test]
    fn rejects_use_default_without_default() {
        let toml = USERS.replace(
            "coerce = \"integer\"",
            "coerce = \"integer\"\non_invalid = \"use_default\"",
        );
        assert!(message(parse_plan_toml(&toml).unwrap_err()).contains("without a default"));
    }

    #[test]
    fn rejects_default_that_does_not_coerce() {
        let toml = USERS.replace("coerce = \"integer\"", "coerce = \"integer\"\ndefault = \"n/a\"");
        assert!(message(parse_plan_toml(&toml).unwrap_err()).contains("default 'n/a'"));
    }

    #[test]
    fn rejects_zero_batch_size() {
        let toml = USERS.replace("table = \"users\"", "table = \"users\"\nbatch_size = 0");
        assert!(message(parse_plan_toml(&toml).unwrap_err()).contains("batch_size"));
    }

    #[test]
    fn rejects_unknown_coercion() {
        let toml = USERS.replace("coerce = \"integer\"", "coerce = \"money\"");
        assert!(matches!(parse_plan_toml(&toml), Err(PlanError::Parse(_))));
    }

    #[test]
    fn parses_plan_set_in_order() {
        let set = r#"
            [[plans]]
            id = "users"
            source = "users.csv"
            table = "users"
            conflict_key = "user_id"
            columns = [{ target = "user_id", source = "user_id", coerce = "integer" }]

            [[plans]]
            id = "orders"
            source = "orders.csv"
            table = "orders"
            conflict_key = "order_id"
            batch_size = 500
            columns = [{ target = "order_id", source = "Order Id", coerce = "integer" }]
        "#;
        let plans = parse_plan_set_toml(set).unwrap();
        let ids: Vec<&str> = plans.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["users", "orders"]);
        assert_eq!(plans[1].batch_size, Some(500));
    }

    #[test]
    fn rejects_duplicate_plan_ids() {
        let plan = parse_plan_toml(USERS).unwrap();
        let err = validate_plan_set(&[plan.clone(), plan]).unwrap_err();
        assert!(message(err).contains("more than once"));
    }

    #[test]
    fn load_plan_set_reports_missing_file() {
        let path = std::env::temp_dir().join("csv_ingest_missing_plans.toml");
        let _ = std::fs::remove_file(&path);
        assert!(matches!(load_plan_set(&path), Err(PlanError::Io { .. })));
    }
}
