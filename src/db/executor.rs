//! Statement execution.
//!
//! Runs compiled statements against the shared pool. Every call is wrapped
//! in `tokio::time::timeout`; row fetches stream and stop at the row limit
//! plus one, so oversized results cost one extra row, not a full scan
//! buffered in memory.
//!
//! # Architecture
//!
//! Database-specific implementations live in parallel submodules (`mysql`,
//! `postgres`, `sqlite`) with identical shapes, so differences between the
//! backends stay obvious.

use crate::db::provider::DbPool;
use crate::db::types::RowToJson;
use crate::error::{EngineError, EngineResult};
use crate::models::{DEFAULT_QUERY_TIMEOUT_SECS, RowSet};
use crate::sqlgen::{SqlValue, Statement};
use futures_util::StreamExt;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// Per-rule outcome of a savepointed batch. The error text is what the
/// backend reported for that rule alone.
pub type RuleResult = Result<u64, String>;

/// Executes compiled statements with timeouts.
#[derive(Debug, Clone, Copy)]
pub struct StatementExecutor {
    default_timeout: Duration,
}

impl StatementExecutor {
    pub fn new() -> Self {
        Self {
            default_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
        }
    }

    pub fn with_default_timeout(timeout_secs: u64) -> Self {
        Self {
            default_timeout: Duration::from_secs(timeout_secs),
        }
    }

    fn effective_timeout(&self, override_secs: Option<u64>) -> Duration {
        override_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout)
    }

    /// Run a row-returning statement. At most `max_rows` rows come back;
    /// `truncated` is set when more were available.
    pub async fn fetch(
        &self,
        pool: &DbPool,
        stmt: &Statement,
        max_rows: u32,
        timeout_secs: Option<u64>,
    ) -> EngineResult<RowSet> {
        let deadline = self.effective_timeout(timeout_secs);
        debug!(sql = %stmt.sql, params = stmt.params.len(), max_rows, "Fetching rows");

        match pool {
            DbPool::MySql(p) => {
                let rows = mysql::fetch_rows(p, stmt, max_rows, deadline).await?;
                Ok(build_row_set(rows, max_rows))
            }
            DbPool::Postgres(p) => {
                let rows = postgres::fetch_rows(p, stmt, max_rows, deadline).await?;
                Ok(build_row_set(rows, max_rows))
            }
            DbPool::SQLite(p) => {
                let rows = sqlite::fetch_rows(p, stmt, max_rows, deadline).await?;
                Ok(build_row_set(rows, max_rows))
            }
        }
    }

    /// Run a single mutating statement, returning affected rows.
    pub async fn execute(
        &self,
        pool: &DbPool,
        stmt: &Statement,
        timeout_secs: Option<u64>,
    ) -> EngineResult<u64> {
        let deadline = self.effective_timeout(timeout_secs);
        debug!(sql = %stmt.sql, params = stmt.params.len(), "Executing statement");

        match pool {
            DbPool::MySql(p) => mysql::execute_one(p, stmt, deadline).await,
            DbPool::Postgres(p) => postgres::execute_one(p, stmt, deadline).await,
            DbPool::SQLite(p) => sqlite::execute_one(p, stmt, deadline).await,
        }
    }

    /// Run a group of statements inside one transaction and commit it.
    /// Any failure rolls the whole group back.
    pub async fn execute_chunk(
        &self,
        pool: &DbPool,
        stmts: &[Statement],
        timeout_secs: Option<u64>,
    ) -> EngineResult<u64> {
        let deadline = self.effective_timeout(timeout_secs);
        debug!(statements = stmts.len(), "Executing transactional chunk");

        match pool {
            DbPool::MySql(p) => mysql::execute_chunk(p, stmts, deadline).await,
            DbPool::Postgres(p) => postgres::execute_chunk(p, stmts, deadline).await,
            DbPool::SQLite(p) => sqlite::execute_chunk(p, stmts, deadline).await,
        }
    }

    /// Run statements in one shared transaction, each under its own
    /// savepoint: a failing statement is rolled back to its savepoint and
    /// captured, the rest proceed, and a single commit finishes the batch.
    pub async fn execute_savepointed(
        &self,
        pool: &DbPool,
        stmts: &[Statement],
        timeout_secs: Option<u64>,
    ) -> EngineResult<Vec<RuleResult>> {
        let deadline = self.effective_timeout(timeout_secs);
        debug!(statements = stmts.len(), "Executing savepointed batch");

        match pool {
            DbPool::MySql(p) => mysql::execute_savepointed(p, stmts, deadline).await,
            DbPool::Postgres(p) => postgres::execute_savepointed(p, stmts, deadline).await,
            DbPool::SQLite(p) => sqlite::execute_savepointed(p, stmts, deadline).await,
        }
    }
}

impl Default for StatementExecutor {
    fn default() -> Self {
        Self::new()
    }
}

fn build_row_set<R: RowToJson>(rows: Vec<R>, max_rows: u32) -> RowSet {
    if rows.is_empty() {
        return RowSet::empty();
    }
    let truncated = rows.len() > max_rows as usize;
    let columns = rows[0].column_metadata();
    let json_rows = rows
        .iter()
        .take(max_rows as usize)
        .map(|r| r.to_json_map())
        .collect();
    RowSet {
        columns,
        rows: json_rows,
        truncated,
    }
}

fn collect_rows<R>(results: Vec<Result<R, sqlx::Error>>) -> EngineResult<Vec<R>> {
    let mut rows = Vec::with_capacity(results.len());
    for result in results {
        rows.push(result.map_err(EngineError::from)?);
    }
    Ok(rows)
}

fn timeout_error(operation: &str, deadline: Duration) -> EngineError {
    EngineError::timeout(operation, deadline.as_secs() as u32)
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================

mod mysql {
    use super::*;
    use sqlx::MySqlPool;
    use sqlx::mysql::{MySqlArguments, MySqlRow};

    pub async fn fetch_rows(
        pool: &MySqlPool,
        stmt: &Statement,
        max_rows: u32,
        deadline: Duration,
    ) -> EngineResult<Vec<MySqlRow>> {
        let fetch_limit = max_rows as usize + 1;
        let mut query = sqlx::query(&stmt.sql);
        for param in &stmt.params {
            query = bind_value(query, &param.value);
        }
        let rows_future = query.fetch(pool).take(fetch_limit).collect::<Vec<_>>();
        match timeout(deadline, rows_future).await {
            Ok(results) => collect_rows(results),
            Err(_) => Err(timeout_error("row fetch", deadline)),
        }
    }

    pub async fn execute_one(
        pool: &MySqlPool,
        stmt: &Statement,
        deadline: Duration,
    ) -> EngineResult<u64> {
        let mut query = sqlx::query(&stmt.sql);
        for param in &stmt.params {
            query = bind_value(query, &param.value);
        }
        match timeout(deadline, query.execute(pool)).await {
            Ok(Ok(r)) => Ok(r.rows_affected()),
            Ok(Err(e)) => Err(EngineError::from(e)),
            Err(_) => Err(timeout_error("statement execution", deadline)),
        }
    }

    pub async fn execute_chunk(
        pool: &MySqlPool,
        stmts: &[Statement],
        deadline: Duration,
    ) -> EngineResult<u64> {
        let work = async {
            let mut tx = pool.begin().await?;
            let mut affected = 0u64;
            for stmt in stmts {
                let mut query = sqlx::query(&stmt.sql);
                for param in &stmt.params {
                    query = bind_value(query, &param.value);
                }
                affected += query.execute(&mut *tx).await?.rows_affected();
            }
            tx.commit().await?;
            Ok::<u64, sqlx::Error>(affected)
        };
        match timeout(deadline, work).await {
            Ok(result) => result.map_err(EngineError::from),
            Err(_) => Err(timeout_error("chunk execution", deadline)),
        }
    }

    pub async fn execute_savepointed(
        pool: &MySqlPool,
        stmts: &[Statement],
        deadline: Duration,
    ) -> EngineResult<Vec<RuleResult>> {
        let work = async {
            let mut tx = pool.begin().await?;
            let mut outcomes = Vec::with_capacity(stmts.len());
            for (i, stmt) in stmts.iter().enumerate() {
                let savepoint = format!("sp_{}", i);
                sqlx::query(&format!("SAVEPOINT {}", savepoint))
                    .execute(&mut *tx)
                    .await?;
                let mut query = sqlx::query(&stmt.sql);
                for param in &stmt.params {
                    query = bind_value(query, &param.value);
                }
                match query.execute(&mut *tx).await {
                    Ok(r) => {
                        sqlx::query(&format!("RELEASE SAVEPOINT {}", savepoint))
                            .execute(&mut *tx)
                            .await?;
                        outcomes.push(Ok(r.rows_affected()));
                    }
                    Err(e) => {
                        sqlx::query(&format!("ROLLBACK TO SAVEPOINT {}", savepoint))
                            .execute(&mut *tx)
                            .await?;
                        outcomes.push(Err(e.to_string()));
                    }
                }
            }
            tx.commit().await?;
            Ok::<Vec<RuleResult>, sqlx::Error>(outcomes)
        };
        match timeout(deadline, work).await {
            Ok(result) => result.map_err(EngineError::from),
            Err(_) => Err(timeout_error("savepointed batch", deadline)),
        }
    }

    fn bind_value<'q>(
        query: sqlx::query::Query<'q, sqlx::MySql, MySqlArguments>,
        value: &'q SqlValue,
    ) -> sqlx::query::Query<'q, sqlx::MySql, MySqlArguments> {
        match value {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Bool(v) => query.bind(*v),
            SqlValue::Int(v) => query.bind(*v),
            SqlValue::Float(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.as_str()),
        }
    }
}

mod postgres {
    use super::*;
    use sqlx::PgPool;
    use sqlx::postgres::{PgArguments, PgRow};

    pub async fn fetch_rows(
        pool: &PgPool,
        stmt: &Statement,
        max_rows: u32,
        deadline: Duration,
    ) -> EngineResult<Vec<PgRow>> {
        let fetch_limit = max_rows as usize + 1;
        let mut query = sqlx::query(&stmt.sql);
        for param in &stmt.params {
            query = bind_value(query, &param.value);
        }
        let rows_future = query.fetch(pool).take(fetch_limit).collect::<Vec<_>>();
        match timeout(deadline, rows_future).await {
            Ok(results) => collect_rows(results),
            Err(_) => Err(timeout_error("row fetch", deadline)),
        }
    }

    pub async fn execute_one(
        pool: &PgPool,
        stmt: &Statement,
        deadline: Duration,
    ) -> EngineResult<u64> {
        let mut query = sqlx::query(&stmt.sql);
        for param in &stmt.params {
            query = bind_value(query, &param.value);
        }
        match timeout(deadline, query.execute(pool)).await {
            Ok(Ok(r)) => Ok(r.rows_affected()),
            Ok(Err(e)) => Err(EngineError::from(e)),
            Err(_) => Err(timeout_error("statement execution", deadline)),
        }
    }

    pub async fn execute_chunk(
        pool: &PgPool,
        stmts: &[Statement],
        deadline: Duration,
    ) -> EngineResult<u64> {
        let work = async {
            let mut tx = pool.begin().await?;
            let mut affected = 0u64;
            for stmt in stmts {
                let mut query = sqlx::query(&stmt.sql);
                for param in &stmt.params {
                    query = bind_value(query, &param.value);
                }
                affected += query.execute(&mut *tx).await?.rows_affected();
            }
            tx.commit().await?;
            Ok::<u64, sqlx::Error>(affected)
        };
        match timeout(deadline, work).await {
            Ok(result) => result.map_err(EngineError::from),
            Err(_) => Err(timeout_error("chunk execution", deadline)),
        }
    }

    pub async fn execute_savepointed(
        pool: &PgPool,
        stmts: &[Statement],
        deadline: Duration,
    ) -> EngineResult<Vec<RuleResult>> {
        let work = async {
            let mut tx = pool.begin().await?;
            let mut outcomes = Vec::with_capacity(stmts.len());
            for (i, stmt) in stmts.iter().enumerate() {
                let savepoint = format!("sp_{}", i);
                sqlx::query(&format!("SAVEPOINT {}", savepoint))
                    .execute(&mut *tx)
                    .await?;
                let mut query = sqlx::query(&stmt.sql);
                for param in &stmt.params {
                    query = bind_value(query, &param.value);
                }
                match query.execute(&mut *tx).await {
                    Ok(r) => {
                        sqlx::query(&format!("RELEASE SAVEPOINT {}", savepoint))
                            .execute(&mut *tx)
                            .await?;
                        outcomes.push(Ok(r.rows_affected()));
                    }
                    Err(e) => {
                        // Postgres aborts the transaction on error; rolling
                        // back to the savepoint clears the aborted state
                        sqlx::query(&format!("ROLLBACK TO SAVEPOINT {}", savepoint))
                            .execute(&mut *tx)
                            .await?;
                        outcomes.push(Err(e.to_string()));
                    }
                }
            }
            tx.commit().await?;
            Ok::<Vec<RuleResult>, sqlx::Error>(outcomes)
        };
        match timeout(deadline, work).await {
            Ok(result) => result.map_err(EngineError::from),
            Err(_) => Err(timeout_error("savepointed batch", deadline)),
        }
    }

    fn bind_value<'q>(
        query: sqlx::query::Query<'q, sqlx::Postgres, PgArguments>,
        value: &'q SqlValue,
    ) -> sqlx::query::Query<'q, sqlx::Postgres, PgArguments> {
        match value {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Bool(v) => query.bind(*v),
            SqlValue::Int(v) => query.bind(*v),
            SqlValue::Float(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.as_str()),
        }
    }
}

mod sqlite {
    use super::*;
    use sqlx::SqlitePool;
    use sqlx::sqlite::{SqliteArguments, SqliteRow};

    pub async fn fetch_rows(
        pool: &SqlitePool,
        stmt: &Statement,
        max_rows: u32,
        deadline: Duration,
    ) -> EngineResult<Vec<SqliteRow>> {
        let fetch_limit = max_rows as usize + 1;
        let mut query = sqlx::query(&stmt.sql);
        for param in &stmt.params {
            query = bind_value(query, &param.value);
        }
        let rows_future = query.fetch(pool).take(fetch_limit).collect::<Vec<_>>();
        match timeout(deadline, rows_future).await {
            Ok(results) => collect_rows(results),
            Err(_) => Err(timeout_error("row fetch", deadline)),
        }
    }

    pub async fn execute_one(
        pool: &SqlitePool,
        stmt: &Statement,
        deadline: Duration,
    ) -> EngineResult<u64> {
        let mut query = sqlx::query(&stmt.sql);
        for param in &stmt.params {
            query = bind_value(query, &param.value);
        }
        match timeout(deadline, query.execute(pool)).await {
            Ok(Ok(r)) => Ok(r.rows_affected()),
            Ok(Err(e)) => Err(EngineError::from(e)),
            Err(_) => Err(timeout_error("statement execution", deadline)),
        }
    }

    pub async fn execute_chunk(
        pool: &SqlitePool,
        stmts: &[Statement],
        deadline: Duration,
    ) -> EngineResult<u64> {
        let work = async {
            let mut tx = pool.begin().await?;
            let mut affected = 0u64;
            for stmt in stmts {
                let mut query = sqlx::query(&stmt.sql);
                for param in &stmt.params {
                    query = bind_value(query, &param.value);
                }
                affected += query.execute(&mut *tx).await?.rows_affected();
            }
            tx.commit().await?;
            Ok::<u64, sqlx::Error>(affected)
        };
        match timeout(deadline, work).await {
            Ok(result) => result.map_err(EngineError::from),
            Err(_) => Err(timeout_error("chunk execution", deadline)),
        }
    }

    pub async fn execute_savepointed(
        pool: &SqlitePool,
        stmts: &[Statement],
        deadline: Duration,
    ) -> EngineResult<Vec<RuleResult>> {
        let work = async {
            let mut tx = pool.begin().await?;
            let mut outcomes = Vec::with_capacity(stmts.len());
            for (i, stmt) in stmts.iter().enumerate() {
                let savepoint = format!("sp_{}", i);
                sqlx::query(&format!("SAVEPOINT {}", savepoint))
                    .execute(&mut *tx)
                    .await?;
                let mut query = sqlx::query(&stmt.sql);
                for param in &stmt.params {
                    query = bind_value(query, &param.value);
                }
                match query.execute(&mut *tx).await {
                    Ok(r) => {
                        sqlx::query(&format!("RELEASE SAVEPOINT {}", savepoint))
                            .execute(&mut *tx)
                            .await?;
                        outcomes.push(Ok(r.rows_affected()));
                    }
                    Err(e) => {
                        sqlx::query(&format!("ROLLBACK TO SAVEPOINT {}", savepoint))
                            .execute(&mut *tx)
                            .await?;
                        outcomes.push(Err(e.to_string()));
                    }
                }
            }
            tx.commit().await?;
            Ok::<Vec<RuleResult>, sqlx::Error>(outcomes)
        };
        match timeout(deadline, work).await {
            Ok(result) => result.map_err(EngineError::from),
            Err(_) => Err(timeout_error("savepointed batch", deadline)),
        }
    }

    fn bind_value<'q>(
        query: sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>>,
        value: &'q SqlValue,
    ) -> sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>> {
        match value {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Bool(v) => query.bind(*v),
            SqlValue::Int(v) => query.bind(*v),
            SqlValue::Float(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executor_default_timeout() {
        let executor = StatementExecutor::new();
        assert_eq!(
            executor.default_timeout,
            Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS)
        );
    }

    #[test]
    fn test_effective_timeout_override() {
        let executor = StatementExecutor::with_default_timeout(30);
        assert_eq!(
            executor.effective_timeout(Some(5)),
            Duration::from_secs(5)
        );
        assert_eq!(executor.effective_timeout(None), Duration::from_secs(30));
    }
}
