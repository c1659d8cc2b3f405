//! Row retrieval tools: `search_rows` and `range_search`.
//!
//! Both compile caller filters through the allow-list path; no SQL text is
//! ever accepted from the caller.

use crate::db::executor::StatementExecutor;
use crate::db::introspect::SchemaIntrospector;
use crate::db::provider::ConnectionProvider;
use crate::error::EngineResult;
use crate::models::{
    ColumnMetadata, DEFAULT_PAGE_SIZE, DEFAULT_RANGE_LIMIT, MAX_PAGE_SIZE, MAX_RANGE_LIMIT,
    PageInfo,
};
use crate::sqlgen::{OrderSpec, PageSpec, QueryBuilder};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::sync::Arc;
use tracing::info;

fn default_page() -> u32 {
    1
}

/// Input for the search_rows tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SearchRowsInput {
    /// Table name, optionally schema-qualified as `schema.table`.
    pub table: String,
    /// Columns to return. Omit to return all columns.
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    /// Filters keyed by column. A scalar value means equality; an object
    /// like `{"gt": 5}` selects an operator (eq, like, gt, lt, gte, lte, in).
    #[serde(default)]
    pub filters: JsonMap<String, JsonValue>,
    /// Column to order by. Omit for backend default ordering.
    #[serde(default)]
    pub order_by: Option<String>,
    /// Sort descending. Default: false.
    #[serde(default)]
    pub descending: bool,
    /// 1-based page number. Default: 1.
    #[serde(default = "default_page")]
    pub page: u32,
    /// Rows per page. Default: 20, max: 100.
    #[serde(default)]
    pub page_size: Option<u32>,
    /// Also run a COUNT over the same filter to report exact totals.
    #[serde(default)]
    pub count_total: bool,
    /// Query timeout in seconds. Default: 30.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Output from the search_rows tool.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct SearchRowsOutput {
    /// The resolved table name.
    pub table: String,
    /// Result columns in select order.
    pub columns: Vec<ColumnMetadata>,
    /// Matching rows for the requested page.
    pub rows: Vec<JsonMap<String, JsonValue>>,
    /// Pagination details.
    pub page_info: PageInfo,
}

/// Input for the range_search tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RangeSearchInput {
    /// Table name, optionally schema-qualified as `schema.table`.
    pub table: String,
    /// Column the range applies to.
    pub column: String,
    /// Inclusive lower bound.
    pub min: JsonValue,
    /// Inclusive upper bound.
    pub max: JsonValue,
    /// Additional filters ANDed with the range.
    #[serde(default)]
    pub filters: JsonMap<String, JsonValue>,
    /// Maximum rows to return. Default: 50, max: 200.
    #[serde(default)]
    pub limit: Option<u32>,
    /// Query timeout in seconds. Default: 30.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Output from the range_search tool.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct RangeSearchOutput {
    /// The resolved table name.
    pub table: String,
    /// Result columns in select order.
    pub columns: Vec<ColumnMetadata>,
    /// Rows inside the range, ordered by the range column.
    pub rows: Vec<JsonMap<String, JsonValue>>,
    /// Rows returned.
    pub row_count: usize,
    /// True when the limit cut the result short.
    pub truncated: bool,
}

/// Handler for filtered row retrieval.
pub struct QueryToolHandler {
    provider: Arc<ConnectionProvider>,
    executor: StatementExecutor,
}

impl QueryToolHandler {
    pub fn new(provider: Arc<ConnectionProvider>, executor: StatementExecutor) -> Self {
        Self { provider, executor }
    }

    pub async fn search_rows(&self, input: SearchRowsInput) -> EngineResult<SearchRowsOutput> {
        let pool = self.provider.acquire().await?;
        let table = SchemaIntrospector::new()
            .resolve_table(pool, &input.table)
            .await?;
        let builder = QueryBuilder::new(pool.db_type());

        let page = PageSpec::clamped(
            input.page,
            input.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
            MAX_PAGE_SIZE,
        );
        let order = input.order_by.as_ref().map(|column| OrderSpec {
            column: column.clone(),
            descending: input.descending,
        });

        let stmt = builder.select(
            &table,
            input.columns.as_deref(),
            &input.filters,
            order.as_ref(),
            Some(page),
            None,
        )?;
        let rows = self
            .executor
            .fetch(pool, &stmt, page.page_size, input.timeout_secs)
            .await?;

        let total_records = if input.count_total {
            let count_stmt = builder.count(&table, &input.filters)?;
            let count_rows = self
                .executor
                .fetch(pool, &count_stmt, 1, input.timeout_secs)
                .await?;
            count_rows.scalar().and_then(JsonValue::as_u64)
        } else {
            None
        };

        let records_on_page = rows.row_count();
        let has_next_page = match total_records {
            Some(total) => page.offset() + (records_on_page as u64) < total,
            None => records_on_page as u32 == page.page_size,
        };

        info!(
            table = %table.name(),
            page = page.page,
            rows = records_on_page,
            "Searched rows"
        );
        Ok(SearchRowsOutput {
            table: table.name(),
            columns: rows.columns,
            rows: rows.rows,
            page_info: PageInfo::new(page, records_on_page, has_next_page, total_records),
        })
    }

    pub async fn range_search(&self, input: RangeSearchInput) -> EngineResult<RangeSearchOutput> {
        let pool = self.provider.acquire().await?;
        let table = SchemaIntrospector::new()
            .resolve_table(pool, &input.table)
            .await?;
        let builder = QueryBuilder::new(pool.db_type());

        let limit = input
            .limit
            .unwrap_or(DEFAULT_RANGE_LIMIT)
            .clamp(1, MAX_RANGE_LIMIT);
        let stmt = builder.range(
            &table,
            &input.column,
            &input.min,
            &input.max,
            &input.filters,
            limit + 1,
        )?;
        let rows = self
            .executor
            .fetch(pool, &stmt, limit, input.timeout_secs)
            .await?;

        info!(
            table = %table.name(),
            column = %input.column,
            rows = rows.row_count(),
            "Range search"
        );
        Ok(RangeSearchOutput {
            table: table.name(),
            columns: rows.columns,
            row_count: rows.rows.len(),
            rows: rows.rows,
            truncated: rows.truncated,
        })
    }
}
