//! Schema tools: `list_tables`, `describe_table` and `sample_rows`.

use crate::db::executor::StatementExecutor;
use crate::db::introspect::{ColumnInfo, SchemaIntrospector, TableEntry};
use crate::db::provider::ConnectionProvider;
use crate::error::EngineResult;
use crate::models::{ColumnMetadata, DEFAULT_SAMPLE_LIMIT, MAX_SAMPLE_LIMIT};
use crate::sqlgen::QueryBuilder;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::sync::Arc;
use tracing::info;

/// Input for the list_tables tool.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct ListTablesInput {}

/// Output from the list_tables tool.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ListTablesOutput {
    /// Base tables, ordered by schema then name.
    pub tables: Vec<TableEntry>,
    /// Number of tables.
    pub count: usize,
}

/// Input for the describe_table tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DescribeTableInput {
    /// Table name, optionally schema-qualified as `schema.table`.
    pub table: String,
}

/// Output from the describe_table tool.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct DescribeTableOutput {
    /// The resolved table name.
    pub table: String,
    /// Columns in declaration order.
    pub columns: Vec<ColumnInfo>,
    /// Number of columns.
    pub column_count: usize,
}

/// Input for the sample_rows tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SampleRowsInput {
    /// Table name, optionally schema-qualified as `schema.table`.
    pub table: String,
    /// Maximum rows to return. Default: 5, max: 100.
    #[serde(default)]
    pub limit: Option<u32>,
    /// Query timeout in seconds. Default: 30.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Output from the sample_rows tool.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct SampleRowsOutput {
    /// The resolved table name.
    pub table: String,
    /// Result columns in select order.
    pub columns: Vec<ColumnMetadata>,
    /// Sampled rows as JSON objects.
    pub rows: Vec<JsonMap<String, JsonValue>>,
    /// Rows returned.
    pub row_count: usize,
    /// True when the table holds more rows than the limit.
    pub truncated: bool,
}

/// Handler for schema tools.
pub struct SchemaToolHandler {
    provider: Arc<ConnectionProvider>,
    executor: StatementExecutor,
}

impl SchemaToolHandler {
    pub fn new(provider: Arc<ConnectionProvider>, executor: StatementExecutor) -> Self {
        Self { provider, executor }
    }

    pub async fn list_tables(&self, _input: ListTablesInput) -> EngineResult<ListTablesOutput> {
        let pool = self.provider.acquire().await?;
        let tables = SchemaIntrospector::new().list_tables(pool).await?;
        let count = tables.len();
        info!(count, "Listed tables");
        Ok(ListTablesOutput { tables, count })
    }

    pub async fn describe_table(
        &self,
        input: DescribeTableInput,
    ) -> EngineResult<DescribeTableOutput> {
        let pool = self.provider.acquire().await?;
        let table = SchemaIntrospector::new()
            .resolve_table(pool, &input.table)
            .await?;
        let columns = table.columns().to_vec();
        info!(table = %table.name(), columns = columns.len(), "Described table");
        Ok(DescribeTableOutput {
            table: table.name(),
            column_count: columns.len(),
            columns,
        })
    }

    pub async fn sample_rows(&self, input: SampleRowsInput) -> EngineResult<SampleRowsOutput> {
        let pool = self.provider.acquire().await?;
        let table = SchemaIntrospector::new()
            .resolve_table(pool, &input.table)
            .await?;

        let limit = input
            .limit
            .unwrap_or(DEFAULT_SAMPLE_LIMIT)
            .clamp(1, MAX_SAMPLE_LIMIT);
        let builder = QueryBuilder::new(pool.db_type());
        let stmt = builder.select(&table, None, &JsonMap::new(), None, None, Some(limit + 1))?;
        let rows = self
            .executor
            .fetch(pool, &stmt, limit, input.timeout_secs)
            .await?;

        info!(table = %table.name(), rows = rows.row_count(), "Sampled rows");
        Ok(SampleRowsOutput {
            table: table.name(),
            columns: rows.columns,
            row_count: rows.rows.len(),
            rows: rows.rows,
            truncated: rows.truncated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_rows_input_defaults() {
        let input: SampleRowsInput = serde_json::from_str(r#"{"table": "users"}"#).unwrap();
        assert_eq!(input.table, "users");
        assert_eq!(input.limit, None);
        assert_eq!(input.timeout_secs, None);
    }

    #[test]
    fn test_list_tables_output_serialization() {
        let output = ListTablesOutput {
            tables: vec![TableEntry {
                schema: Some("public".to_string()),
                name: "users".to_string(),
            }],
            count: 1,
        };
        let json = serde_json::to_string(&output).unwrap();
        assert!(json.contains("\"count\":1"));
        assert!(json.contains("\"schema\":\"public\""));
    }
}
