//! Read-only queries used by the `summary` command.

use moosicbox_json_utils::database::ToValue as _;
use switchy_database::Database;

use crate::{DbError, quote_ident};

/// Row counts of the default tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreSummary {
    pub users: i64,
    pub orders: i64,
    /// Orders whose `user_id` has no matching row in `users`.
    pub orphaned_orders: i64,
}

/// Counts the rows of `table`.
///
/// # Errors
///
/// Returns [`DbError`] if the table name is invalid or the query fails.
pub async fn count_rows(db: &dyn Database, table: &str) -> Result<i64, DbError> {
    let sql = format!("SELECT COUNT(*) AS n FROM {}", quote_ident(table)?);
    let rows = db.query_raw_params(&sql, &[]).await?;
    single_count(&rows)
}

/// Counts orders that reference a user id not present in `users`.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub async fn count_orphaned_orders(db: &dyn Database) -> Result<i64, DbError> {
    let rows = db
        .query_raw_params(
            "SELECT COUNT(*) AS n FROM orders o
             WHERE NOT EXISTS (SELECT 1 FROM users u WHERE u.user_id = o.user_id)",
            &[],
        )
        .await?;
    single_count(&rows)
}

/// Collects the [`StoreSummary`] for the default schema.
///
/// # Errors
///
/// Returns [`DbError`] if any query fails.
pub async fn summary(db: &dyn Database) -> Result<StoreSummary, DbError> {
    Ok(StoreSummary {
        users: count_rows(db, "users").await?,
        orders: count_rows(db, "orders").await?,
        orphaned_orders: count_orphaned_orders(db).await?,
    })
}

fn single_count(rows: &[switchy_database::Row]) -> Result<i64, DbError> {
    let row = rows.first().ok_or_else(|| DbError::Conversion {
        message: "COUNT query returned no rows".to_string(),
    })?;
    row.to_value("n").map_err(|e| DbError::Conversion {
        message: format!("Failed to parse row count: {e}"),
    })
}
