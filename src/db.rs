//! Database module
//!
//! Database connection and schema checks. The schema itself lives in the
//! raw SQL files under `migrations/`.

use sqlx::PgPool;

/// Tables the service reads and writes
pub const REQUIRED_TABLES: &[&str] = &["users", "invoices", "payments", "api_statuses"];

/// Verify database connectivity
pub async fn verify_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Check if required tables exist
pub async fn check_schema(pool: &PgPool) -> Result<bool, sqlx::Error> {
    for table in REQUIRED_TABLES {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = 'public' AND table_name = $1
            )
            "#,
        )
        .bind(*table)
        .fetch_one(pool)
        .await?;

        if !exists {
            tracing::error!("Required table '{}' does not exist", table);
            return Ok(false);
        }
    }

    let has_credit: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM information_schema.columns
            WHERE table_schema = 'public' AND table_name = 'users' AND column_name = 'credit_balance'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    if !has_credit {
        tracing::error!("Column users.credit_balance does not exist");
        return Ok(false);
    }

    tracing::info!(tables = ?REQUIRED_TABLES, "Database schema verified");
    Ok(true)
}
