//! Source introspection: discovering a table's single-column primary key
//! and its row-count/PK-range statistics. This is the abstraction point
//! called for by the "PK integer assumption" design note — everything
//! downstream (planner, executor) talks to `i64` PK values and this
//! trait's output, never to the source driver directly, so composite or
//! non-integer keys are a matter of adding an implementation later, not
//! restructuring the planner.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::error::{EngineError, EngineResult};

/// Row-count and PK-range statistics for one table (SPEC_FULL.md §4.1 step 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableStats {
    pub total_rows: i64,
    pub min_pk: i64,
    pub max_pk: i64,
}

#[async_trait]
pub trait SourceIntrospector: Send + Sync {
    /// List user tables in the source database.
    async fn list_tables(&self) -> EngineResult<Vec<String>>;

    /// The table's single-column primary key, if it has exactly one.
    /// Tables with no PK or a composite PK return `Ok(None)` — the
    /// planner skips them (SPEC_FULL.md §4.1 step 1).
    async fn primary_key_column(&self, table: &str) -> EngineResult<Option<String>>;

    /// `COUNT`/`MIN`/`MAX` over the PK column. Returns `Ok(None)` for an
    /// empty table.
    async fn table_stats(&self, table: &str, pk_column: &str) -> EngineResult<Option<TableStats>>;
}

/// Postgres-backed introspector. Source tables are assumed to live in a
/// Postgres database reachable via `PgPool`, per SPEC_FULL.md §1's
/// "relational driver" assumption; driver internals beyond that are out
/// of scope.
pub struct PgIntrospector {
    pool: PgPool,
}

impl PgIntrospector {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SourceIntrospector for PgIntrospector {
    async fn list_tables(&self) -> EngineResult<Vec<String>> {
        let rows = sqlx::query(
            r"
            SELECT table_name FROM information_schema.tables
            WHERE table_schema = 'public' AND table_type = 'BASE TABLE'
            ORDER BY table_name
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EngineError::from_source_sqlx("list_tables", e))?;

        Ok(rows.iter().map(|r| r.get("table_name")).collect())
    }

    async fn primary_key_column(&self, table: &str) -> EngineResult<Option<String>> {
        let rows = sqlx::query(
            r"
            SELECT kcu.column_name
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
              ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema
            WHERE tc.table_name = $1 AND tc.constraint_type = 'PRIMARY KEY' AND tc.table_schema = 'public'
            ",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EngineError::from_source_sqlx("primary_key_column", e))?;

        if rows.len() != 1 {
            return Ok(None);
        }
        let column: String = rows[0].get("column_name");
        Ok(if column.is_empty() { None } else { Some(column) })
    }

    async fn table_stats(&self, table: &str, pk_column: &str) -> EngineResult<Option<TableStats>> {
        let query = format!(
            r#"SELECT COUNT(*) AS total_rows, MIN("{pk_column}") AS min_pk, MAX("{pk_column}") AS max_pk FROM "{table}""#
        );

        let row = sqlx::query(&query)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| EngineError::from_source_sqlx("table_stats", e))?;

        let total_rows: i64 = row.get("total_rows");
        let min_pk: Option<i64> = row.get("min_pk");
        let max_pk: Option<i64> = row.get("max_pk");

        Ok(match (min_pk, max_pk) {
            (Some(min_pk), Some(max_pk)) if total_rows > 0 => Some(TableStats { total_rows, min_pk, max_pk }),
            _ => None,
        })
    }
}
