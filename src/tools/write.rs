//! Write tools: `insert_row` and `update_rows`.
//!
//! Updates are guarded: the matching rows are counted and previewed before
//! the UPDATE runs, and an empty match skips the UPDATE entirely. Both tools
//! support `validate_only`, which compiles and checks everything but never
//! touches the data.

use crate::db::executor::StatementExecutor;
use crate::db::introspect::SchemaIntrospector;
use crate::db::provider::ConnectionProvider;
use crate::error::EngineResult;
use crate::models::DEFAULT_SAMPLE_LIMIT;
use crate::sqlgen::QueryBuilder;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::sync::Arc;
use tracing::info;

/// Input for the insert_row tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct InsertRowInput {
    /// Table name, optionally schema-qualified as `schema.table`.
    pub table: String,
    /// Column values for the new row.
    pub values: JsonMap<String, JsonValue>,
    /// Compile and validate without writing. Default: false.
    #[serde(default)]
    pub validate_only: bool,
    /// Execution timeout in seconds. Default: 30.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Output from the insert_row tool.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct InsertRowOutput {
    /// The resolved table name.
    pub table: String,
    /// True when the row was written.
    pub inserted: bool,
    /// Rows affected; 0 in validate_only mode.
    pub rows_affected: u64,
    /// Echoes the validate_only flag.
    pub validate_only: bool,
}

/// Input for the update_rows tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct UpdateRowsInput {
    /// Table name, optionally schema-qualified as `schema.table`.
    pub table: String,
    /// Column values to set.
    pub set: JsonMap<String, JsonValue>,
    /// Filter selecting the rows to update. Must not be empty.
    #[serde(rename = "where")]
    pub filters: JsonMap<String, JsonValue>,
    /// Preview and validate without writing. Default: false.
    #[serde(default)]
    pub validate_only: bool,
    /// Execution timeout in seconds. Default: 30.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Output from the update_rows tool.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct UpdateRowsOutput {
    /// The resolved table name.
    pub table: String,
    /// Rows the filter matched before the update.
    pub matched_rows: u64,
    /// Up to five of the matched rows as they were before the update.
    pub preview: Vec<JsonMap<String, JsonValue>>,
    /// True when the UPDATE actually ran.
    pub applied: bool,
    /// Rows changed by the UPDATE; 0 when it did not run.
    pub rows_affected: u64,
    /// Echoes the validate_only flag.
    pub validate_only: bool,
}

/// Handler for guarded writes.
pub struct WriteToolHandler {
    provider: Arc<ConnectionProvider>,
    executor: StatementExecutor,
}

impl WriteToolHandler {
    pub fn new(provider: Arc<ConnectionProvider>, executor: StatementExecutor) -> Self {
        Self { provider, executor }
    }

    pub async fn insert_row(&self, input: InsertRowInput) -> EngineResult<InsertRowOutput> {
        let pool = self.provider.acquire().await?;
        let table = SchemaIntrospector::new()
            .resolve_table(pool, &input.table)
            .await?;
        let stmt = QueryBuilder::new(pool.db_type()).insert(&table, &input.values)?;

        if input.validate_only {
            info!(table = %table.name(), "Insert validated without writing");
            return Ok(InsertRowOutput {
                table: table.name(),
                inserted: false,
                rows_affected: 0,
                validate_only: true,
            });
        }

        let rows_affected = self.executor.execute(pool, &stmt, input.timeout_secs).await?;
        info!(table = %table.name(), rows_affected, "Inserted row");
        Ok(InsertRowOutput {
            table: table.name(),
            inserted: rows_affected > 0,
            rows_affected,
            validate_only: false,
        })
    }

    pub async fn update_rows(&self, input: UpdateRowsInput) -> EngineResult<UpdateRowsOutput> {
        let pool = self.provider.acquire().await?;
        let table = SchemaIntrospector::new()
            .resolve_table(pool, &input.table)
            .await?;
        let builder = QueryBuilder::new(pool.db_type());
        let pair = builder.update(&table, &input.set, &input.filters)?;

        // Preview first: exact match count plus a small sample
        let count_stmt = builder.count(&table, &input.filters)?;
        let count_rows = self
            .executor
            .fetch(pool, &count_stmt, 1, input.timeout_secs)
            .await?;
        let matched_rows = count_rows.scalar().and_then(JsonValue::as_u64).unwrap_or(0);

        let preview = if matched_rows > 0 {
            self.executor
                .fetch(pool, &pair.preview, DEFAULT_SAMPLE_LIMIT, input.timeout_secs)
                .await?
                .rows
        } else {
            Vec::new()
        };

        // Nothing matched or dry run: skip the UPDATE
        if matched_rows == 0 || input.validate_only {
            info!(
                table = %table.name(),
                matched_rows,
                validate_only = input.validate_only,
                "Update previewed without writing"
            );
            return Ok(UpdateRowsOutput {
                table: table.name(),
                matched_rows,
                preview,
                applied: false,
                rows_affected: 0,
                validate_only: input.validate_only,
            });
        }

        let rows_affected = self
            .executor
            .execute(pool, &pair.apply, input.timeout_secs)
            .await?;
        info!(table = %table.name(), matched_rows, rows_affected, "Updated rows");
        Ok(UpdateRowsOutput {
            table: table.name(),
            matched_rows,
            preview,
            applied: true,
            rows_affected,
            validate_only: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insert_row_input_defaults() {
        let input: InsertRowInput = serde_json::from_value(json!({
            "table": "users",
            "values": {"name": "ada"}
        }))
        .unwrap();
        assert!(!input.validate_only);
        assert_eq!(input.values.len(), 1);
    }

    #[test]
    fn test_update_rows_input_uses_where_key() {
        let input: UpdateRowsInput = serde_json::from_value(json!({
            "table": "users",
            "set": {"active": false},
            "where": {"id": 7},
            "validate_only": true
        }))
        .unwrap();
        assert!(input.validate_only);
        assert!(input.filters.contains_key("id"));
    }
}
