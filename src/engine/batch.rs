//! Batch writes.
//!
//! Two shapes with deliberately different transaction boundaries:
//!
//! - `insert_rows`: one transaction per chunk, committed independently, so a
//!   bad chunk costs only itself. Failures are recorded and processing
//!   continues.
//! - `apply_rules`: every rule in one shared transaction with a savepoint
//!   per rule and a single final commit, so the batch lands atomically while
//!   individual rule failures are still captured.

use crate::db::executor::StatementExecutor;
use crate::db::introspect::ValidatedTable;
use crate::db::provider::DbPool;
use crate::error::{EngineError, EngineResult};
use crate::models::MAX_BATCH_CHUNK;
use crate::sqlgen::{QueryBuilder, Statement};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing::{info, warn};

/// One failed chunk: where it started, how many rows it carried and what
/// the backend said.
#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct FailedChunk {
    /// Index of the chunk's first row within the submitted batch.
    pub start_index: usize,
    /// Rows in the chunk.
    pub size: usize,
    /// Backend error for this chunk.
    pub error: String,
}

/// Outcome of a chunked insert.
#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct BatchReport {
    /// Rows submitted.
    pub total_rows: usize,
    /// Rows actually inserted across committed chunks.
    pub inserted_rows: u64,
    /// Chunk size after clamping.
    pub chunk_size_used: usize,
    /// Chunks that failed; their rows were rolled back.
    pub failed_chunks: Vec<FailedChunk>,
}

/// One bulk-update rule: a filter and the values to set where it matches.
#[derive(Debug, Clone, Deserialize, schemars::JsonSchema)]
pub struct UpdateRule {
    /// Filter selecting the rows this rule touches. Must not be empty.
    #[serde(rename = "where")]
    pub filters: JsonMap<String, JsonValue>,
    /// Column values to set.
    pub set: JsonMap<String, JsonValue>,
    /// Optional label echoed back in the outcome.
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RuleStatus {
    Applied,
    Failed,
}

/// Per-rule outcome of a bulk update.
#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct RuleOutcome {
    /// 0-based index of the rule in the submitted list.
    pub rule: usize,
    /// Label from the rule, if given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: RuleStatus,
    /// Rows the rule changed, when it applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,
    /// Error captured for this rule alone, when it failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Runs chunked inserts and savepointed bulk updates.
#[derive(Debug, Clone, Copy)]
pub struct BatchExecutor {
    builder: QueryBuilder,
    executor: StatementExecutor,
}

impl BatchExecutor {
    pub fn new(builder: QueryBuilder, executor: StatementExecutor) -> Self {
        Self { builder, executor }
    }

    /// Insert `rows` in chunks of `chunk_size` (clamped to 1000), one
    /// committed transaction per chunk. A failed chunk is recorded and the
    /// rest keep going.
    pub async fn insert_rows(
        &self,
        pool: &DbPool,
        table: &ValidatedTable,
        rows: &[JsonMap<String, JsonValue>],
        chunk_size: usize,
        timeout_secs: Option<u64>,
    ) -> EngineResult<BatchReport> {
        if rows.is_empty() {
            return Err(EngineError::invalid_input("No rows to insert"));
        }
        let chunk_size = chunk_size.clamp(1, MAX_BATCH_CHUNK);

        let mut inserted_rows = 0u64;
        let mut failed_chunks = Vec::new();

        for (chunk_index, chunk) in rows.chunks(chunk_size).enumerate() {
            let start_index = chunk_index * chunk_size;
            match self.chunk_statements(table, chunk) {
                Ok(stmts) => {
                    match self.executor.execute_chunk(pool, &stmts, timeout_secs).await {
                        Ok(affected) => inserted_rows += affected,
                        Err(e) => {
                            warn!(
                                start_index,
                                size = chunk.len(),
                                error = %e,
                                "Insert chunk failed, continuing with remaining chunks"
                            );
                            failed_chunks.push(FailedChunk {
                                start_index,
                                size: chunk.len(),
                                error: e.to_string(),
                            });
                        }
                    }
                }
                // Compilation failure (bad column, non-scalar value): the
                // chunk is recorded without touching the database
                Err(e) => {
                    warn!(
                        start_index,
                        size = chunk.len(),
                        error = %e,
                        "Insert chunk rejected before execution"
                    );
                    failed_chunks.push(FailedChunk {
                        start_index,
                        size: chunk.len(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            total_rows = rows.len(),
            inserted_rows,
            failed = failed_chunks.len(),
            "Batch insert finished"
        );

        Ok(BatchReport {
            total_rows: rows.len(),
            inserted_rows,
            chunk_size_used: chunk_size,
            failed_chunks,
        })
    }

    /// Apply update rules in one shared unit of work: a savepoint per rule,
    /// one final commit. Rules that fail to compile are captured without
    /// executing; the rest run in order.
    pub async fn apply_rules(
        &self,
        pool: &DbPool,
        table: &ValidatedTable,
        rules: &[UpdateRule],
        timeout_secs: Option<u64>,
    ) -> EngineResult<Vec<RuleOutcome>> {
        if rules.is_empty() {
            return Err(EngineError::invalid_input("No update rules given"));
        }

        let mut outcomes: Vec<RuleOutcome> = Vec::with_capacity(rules.len());
        let mut statements: Vec<Statement> = Vec::new();
        // Maps each executed statement back to its rule index
        let mut executed_rules: Vec<usize> = Vec::new();

        for (index, rule) in rules.iter().enumerate() {
            match self.builder.update(table, &rule.set, &rule.filters) {
                Ok(pair) => {
                    statements.push(pair.apply);
                    executed_rules.push(index);
                    outcomes.push(RuleOutcome {
                        rule: index,
                        description: rule.description.clone(),
                        status: RuleStatus::Applied,
                        rows_affected: None,
                        error: None,
                    });
                }
                Err(e) => outcomes.push(RuleOutcome {
                    rule: index,
                    description: rule.description.clone(),
                    status: RuleStatus::Failed,
                    rows_affected: None,
                    error: Some(e.to_string()),
                }),
            }
        }

        if !statements.is_empty() {
            let results = self
                .executor
                .execute_savepointed(pool, &statements, timeout_secs)
                .await?;
            for (rule_index, result) in executed_rules.into_iter().zip(results) {
                let outcome = &mut outcomes[rule_index];
                match result {
                    Ok(affected) => outcome.rows_affected = Some(affected),
                    Err(error) => {
                        outcome.status = RuleStatus::Failed;
                        outcome.error = Some(error);
                    }
                }
            }
        }

        Ok(outcomes)
    }

    /// Build the INSERT statements for one chunk. The first row defines the
    /// chunk's column set; every other row must match it exactly.
    fn chunk_statements(
        &self,
        table: &ValidatedTable,
        chunk: &[JsonMap<String, JsonValue>],
    ) -> EngineResult<Vec<Statement>> {
        let first = &chunk[0];
        let columns: Vec<&String> = first.keys().collect();

        let mut statements = Vec::with_capacity(chunk.len());
        for row in chunk {
            if row.len() != columns.len() || !columns.iter().all(|c| row.contains_key(*c)) {
                return Err(EngineError::invalid_input(
                    "All rows in a chunk must share the column set of the chunk's first row",
                ));
            }
            statements.push(self.builder.insert(table, row)?);
        }
        Ok(statements)
    }
}
