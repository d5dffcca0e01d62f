//! Database migration runner with advisory lock support, so the control
//! plane and every worker can start concurrently against a shared,
//! not-yet-migrated database without racing each other.

use sqlx::{PgPool, Row};

use crate::error::{DatabaseError, DatabaseOperation, DatabaseResult};

const MIGRATION_LOCK_ID: i64 = 8417;

/// Run all pending migrations under a Postgres advisory lock.
///
/// # Errors
/// Returns `DatabaseError::MigrationFailed` if a migration statement fails,
/// or `DatabaseError::QueryFailed` if the lock/bookkeeping queries fail.
pub async fn run_migrations(pool: &PgPool) -> DatabaseResult<()> {
    sqlx::query("SELECT pg_advisory_lock($1)")
        .bind(MIGRATION_LOCK_ID)
        .execute(pool)
        .await
        .map_err(|e| DatabaseError::from_sqlx(DatabaseOperation::Query { description: "advisory_lock".to_string() }, e, None))?;

    let result = run_migrations_inner(pool).await;

    sqlx::query("SELECT pg_advisory_unlock($1)")
        .bind(MIGRATION_LOCK_ID)
        .execute(pool)
        .await
        .map_err(|e| DatabaseError::from_sqlx(DatabaseOperation::Query { description: "advisory_unlock".to_string() }, e, None))?;

    result
}

async fn run_migrations_inner(pool: &PgPool) -> DatabaseResult<()> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TIMESTAMPTZ DEFAULT NOW()
        )
        ",
    )
    .execute(pool)
    .await
    .map_err(|e| DatabaseError::from_sqlx(DatabaseOperation::Query { description: "create schema_migrations".to_string() }, e, None))?;

    let applied: Vec<i32> = sqlx::query("SELECT version FROM schema_migrations ORDER BY version")
        .fetch_all(pool)
        .await
        .map_err(|e| DatabaseError::from_sqlx(DatabaseOperation::Query { description: "fetch applied migrations".to_string() }, e, None))?
        .iter()
        .map(|row| row.get(0))
        .collect();

    let migrations: [(i32, &str, &str); 3] = [
        (1, "initial_schema", include_str!("../migrations/001_initial_schema.sql")),
        (2, "indexes", include_str!("../migrations/002_indexes.sql")),
        (3, "functions", include_str!("../migrations/003_functions.sql")),
    ];

    for (version, name, sql) in migrations {
        if applied.contains(&version) {
            tracing::debug!(version, name, "migration already applied");
            continue;
        }

        tracing::info!(version, name, "applying migration");

        let mut tx = pool.begin().await.map_err(|e| {
            DatabaseError::from_sqlx(DatabaseOperation::Migration { version: version.to_string() }, e, None)
        })?;

        sqlx::query(sql).execute(&mut *tx).await.map_err(|e| DatabaseError::MigrationFailed {
            version: version.to_string(),
            message: format!("failed to execute migration {version} ({name})"),
            source: sqlx::migrate::MigrateError::Execute(e),
        })?;

        sqlx::query("INSERT INTO schema_migrations (version, name) VALUES ($1, $2)")
            .bind(version)
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                DatabaseError::from_sqlx(DatabaseOperation::Migration { version: version.to_string() }, e, None)
            })?;

        tx.commit().await.map_err(|e| {
            DatabaseError::from_sqlx(DatabaseOperation::Migration { version: version.to_string() }, e, None)
        })?;

        tracing::info!(version, name, "migration complete");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_migration_sql_embedded() {
        let sql1 = include_str!("../migrations/001_initial_schema.sql");
        assert!(sql1.contains("CREATE TABLE"));

        let sql2 = include_str!("../migrations/002_indexes.sql");
        assert!(sql2.contains("CREATE INDEX"));

        let sql3 = include_str!("../migrations/003_functions.sql");
        assert!(sql3.contains("CREATE OR REPLACE FUNCTION"));
    }
}
