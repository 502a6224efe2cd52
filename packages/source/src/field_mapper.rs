//! Maps source records onto a plan's target columns.
//!
//! Each [`ColumnSpec`] is resolved independently:
//!
//! 1. a declared `constant` wins unconditionally;
//! 2. otherwise the first source alias holding a value is read (for
//!    non-text columns a blank value does not count); a missing value
//!    takes the declared `default`, then
//!    `NULL` if the column is `nullable`, else fails with
//!    [`MapError::MissingField`];
//! 3. the value is coerced; a failure takes the `default` when the column's
//!    policy is [`InvalidPolicy::UseDefault`], else fails with
//!    [`MapError::Coercion`].
//!
//! Failures are per row: the caller records the skip and moves on.

use csv_ingest_models::{ColumnSpec, InvalidPolicy, RawRecord, TableLoadPlan, TargetRow, TargetValue};

use crate::MapError;
use crate::coerce::{coerce, is_blank};

/// Maps [`RawRecord`]s to [`TargetRow`]s for one plan.
#[derive(Debug, Clone, Copy)]
pub struct FieldMapper<'a> {
    plan: &'a TableLoadPlan,
}

impl<'a> FieldMapper<'a> {
    /// Creates a mapper for `plan`.
    #[must_use]
    pub const fn new(plan: &'a TableLoadPlan) -> Self {
        Self { plan }
    }

    /// Builds the target row for `record`. The row always has exactly one
    /// value per plan column.
    ///
    /// # Errors
    ///
    /// Returns the first [`MapError`] hit while resolving the columns.
    pub fn map(&self, record: &RawRecord) -> Result<TargetRow, MapError> {
        let values = self
            .plan
            .columns
            .iter()
            .map(|spec| resolve_column(spec, record))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TargetRow::new(values))
    }
}

fn resolve_column(spec: &ColumnSpec, record: &RawRecord) -> Result<TargetValue, MapError> {
    if let Some(constant) = &spec.constant {
        return coerce_declared(spec, constant);
    }

    let names = spec.source.as_ref().map_or(&[][..], |s| s.names());
    let raw = names
        .iter()
        .filter_map(|name| record.get(name))
        .find(|raw| !is_blank(raw, spec.coerce));

    let Some(raw) = raw else {
        return missing_value(spec, names);
    };

    match coerce(raw, spec.coerce, spec.format.as_deref()) {
        Ok(value) => Ok(value),
        Err(reason) => match (&spec.default, spec.on_invalid) {
            (Some(default), InvalidPolicy::UseDefault) => {
                log::debug!(
                    "column '{}': '{raw}' is not a valid {}, using default '{default}'",
                    spec.target,
                    spec.coerce
                );
                coerce_declared(spec, default)
            }
            _ => Err(MapError::Coercion {
                column: spec.target.clone(),
                value: raw.to_string(),
                coercion: spec.coerce,
                reason,
            }),
        },
    }
}

fn missing_value(spec: &ColumnSpec, names: &[String]) -> Result<TargetValue, MapError> {
    if let Some(default) = &spec.default {
        return coerce_declared(spec, default);
    }
    if spec.nullable {
        return Ok(TargetValue::Null);
    }

    Err(MapError::MissingField {
        column: spec.target.clone(),
        fields: names
            .iter()
            .map(|n| format!("'{n}'"))
            .collect::<Vec<_>>()
            .join(", "),
    })
}

/// Coerces a default or constant declared in the plan itself.
fn coerce_declared(spec: &ColumnSpec, raw: &str) -> Result<TargetValue, MapError> {
    coerce(raw, spec.coerce, spec.format.as_deref()).map_err(|reason| MapError::Coercion {
        column: spec.target.clone(),
        value: raw.to_string(),
        coercion: spec.coerce,
        reason,
    })
}
