//! Batch tools: `batch_insert` and `bulk_update`.

use crate::db::executor::StatementExecutor;
use crate::db::introspect::SchemaIntrospector;
use crate::db::provider::ConnectionProvider;
use crate::engine::{BatchExecutor, FailedChunk, RuleOutcome, RuleStatus, UpdateRule};
use crate::error::EngineResult;
use crate::models::DEFAULT_BATCH_CHUNK;
use crate::sqlgen::QueryBuilder;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::sync::Arc;
use tracing::info;

/// Input for the batch_insert tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct BatchInsertInput {
    /// Table name, optionally schema-qualified as `schema.table`.
    pub table: String,
    /// Rows to insert. Every row in a chunk must share the column set of
    /// the chunk's first row.
    pub rows: Vec<JsonMap<String, JsonValue>>,
    /// Rows per transaction. Default: 100, max: 1000.
    #[serde(default)]
    pub chunk_size: Option<usize>,
    /// Per-chunk timeout in seconds. Default: 30.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Output from the batch_insert tool.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct BatchInsertOutput {
    /// The resolved table name.
    pub table: String,
    /// Rows submitted.
    pub total_rows: usize,
    /// Rows inserted across committed chunks.
    pub inserted_rows: u64,
    /// Chunk size after clamping.
    pub chunk_size_used: usize,
    /// Chunks that failed and were rolled back.
    pub failed_chunks: Vec<FailedChunk>,
}

/// Input for the bulk_update tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct BulkUpdateInput {
    /// Table name, optionally schema-qualified as `schema.table`.
    pub table: String,
    /// Update rules, applied in order within one unit of work.
    pub rules: Vec<UpdateRule>,
    /// Timeout for the whole batch in seconds. Default: 30.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Output from the bulk_update tool.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct BulkUpdateOutput {
    /// The resolved table name.
    pub table: String,
    /// Per-rule outcomes in submission order.
    pub outcomes: Vec<RuleOutcome>,
    /// Rules that applied.
    pub applied_rules: usize,
    /// Rules that failed.
    pub failed_rules: usize,
    /// Rows changed across all applied rules.
    pub total_rows_affected: u64,
}

/// Handler for batch writes.
pub struct BatchToolHandler {
    provider: Arc<ConnectionProvider>,
    executor: StatementExecutor,
}

impl BatchToolHandler {
    pub fn new(provider: Arc<ConnectionProvider>, executor: StatementExecutor) -> Self {
        Self { provider, executor }
    }

    pub async fn batch_insert(&self, input: BatchInsertInput) -> EngineResult<BatchInsertOutput> {
        let pool = self.provider.acquire().await?;
        let table = SchemaIntrospector::new()
            .resolve_table(pool, &input.table)
            .await?;
        let batch = BatchExecutor::new(QueryBuilder::new(pool.db_type()), self.executor);

        let report = batch
            .insert_rows(
                pool,
                &table,
                &input.rows,
                input.chunk_size.unwrap_or(DEFAULT_BATCH_CHUNK),
                input.timeout_secs,
            )
            .await?;

        Ok(BatchInsertOutput {
            table: table.name(),
            total_rows: report.total_rows,
            inserted_rows: report.inserted_rows,
            chunk_size_used: report.chunk_size_used,
            failed_chunks: report.failed_chunks,
        })
    }

    pub async fn bulk_update(&self, input: BulkUpdateInput) -> EngineResult<BulkUpdateOutput> {
        let pool = self.provider.acquire().await?;
        let table = SchemaIntrospector::new()
            .resolve_table(pool, &input.table)
            .await?;
        let batch = BatchExecutor::new(QueryBuilder::new(pool.db_type()), self.executor);

        let outcomes = batch
            .apply_rules(pool, &table, &input.rules, input.timeout_secs)
            .await?;

        let applied_rules = outcomes
            .iter()
            .filter(|o| o.status == RuleStatus::Applied)
            .count();
        let total_rows_affected = outcomes.iter().filter_map(|o| o.rows_affected).sum();

        info!(
            table = %table.name(),
            rules = outcomes.len(),
            applied = applied_rules,
            "Bulk update finished"
        );
        Ok(BulkUpdateOutput {
            table: table.name(),
            failed_rules: outcomes.len() - applied_rules,
            applied_rules,
            total_rows_affected,
            outcomes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_batch_insert_input() {
        let input: BatchInsertInput = serde_json::from_value(json!({
            "table": "events",
            "rows": [{"kind": "click"}, {"kind": "view"}],
            "chunk_size": 500
        }))
        .unwrap();
        assert_eq!(input.rows.len(), 2);
        assert_eq!(input.chunk_size, Some(500));
    }

    #[test]
    fn test_bulk_update_input_rule_shape() {
        let input: BulkUpdateInput = serde_json::from_value(json!({
            "table": "orders",
            "rules": [
                {"where": {"status": "stale"}, "set": {"status": "closed"},
                 "description": "close stale orders"}
            ]
        }))
        .unwrap();
        assert_eq!(input.rules.len(), 1);
        assert_eq!(
            input.rules[0].description.as_deref(),
            Some("close stale orders")
        );
    }
}
