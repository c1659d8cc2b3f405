//! Analysis tools: `aggregate_rows`, `profile_table` and `suggest_queries`.

use crate::db::executor::StatementExecutor;
use crate::db::introspect::SchemaIntrospector;
use crate::db::provider::ConnectionProvider;
use crate::engine::{ColumnProfile, Profiler, QuerySuggestion, SuggestionEngine};
use crate::error::EngineResult;
use crate::models::{ColumnMetadata, DEFAULT_AGGREGATE_LIMIT, MAX_AGGREGATE_LIMIT};
use crate::sqlgen::{AggregateSpec, OrderSpec, QueryBuilder};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Input for the aggregate_rows tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct AggregateRowsInput {
    /// Table name, optionally schema-qualified as `schema.table`.
    pub table: String,
    /// Columns to group by. Omit for a single aggregate row.
    #[serde(default)]
    pub group_by: Vec<String>,
    /// Aggregates keyed by output alias, e.g.
    /// `{"order_count": {"func": "count"}}`.
    pub aggregates: BTreeMap<String, AggregateSpec>,
    /// Filters applied before grouping.
    #[serde(default)]
    pub filters: JsonMap<String, JsonValue>,
    /// Keep only groups where the named aggregate exceeds the threshold.
    #[serde(default)]
    pub having_gt: BTreeMap<String, f64>,
    /// Column or alias to order by. Defaults to the first group column,
    /// else the first aggregate alias.
    #[serde(default)]
    pub order_by: Option<String>,
    /// Sort descending. Default: false.
    #[serde(default)]
    pub descending: bool,
    /// Maximum groups to return. Default: 100, max: 1000.
    #[serde(default)]
    pub limit: Option<u32>,
    /// Query timeout in seconds. Default: 30.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Output from the aggregate_rows tool.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct AggregateRowsOutput {
    /// The resolved table name.
    pub table: String,
    /// Result columns: group columns then aggregate aliases.
    pub columns: Vec<ColumnMetadata>,
    /// One row per group.
    pub rows: Vec<JsonMap<String, JsonValue>>,
    /// Groups returned.
    pub row_count: usize,
    /// True when the limit cut the result short.
    pub truncated: bool,
}

/// Input for the profile_table tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ProfileTableInput {
    /// Table name, optionally schema-qualified as `schema.table`.
    pub table: String,
    /// Columns to profile. Omit to profile every column; names that match
    /// no column are skipped, so a fully unmatched list yields an empty
    /// report.
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    /// Per-statement timeout in seconds. Default: 30.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Output from the profile_table tool.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ProfileTableOutput {
    /// The resolved table name.
    pub table: String,
    /// One profile per selected column, in declaration order.
    pub profiles: Vec<ColumnProfile>,
    /// Columns profiled.
    pub column_count: usize,
}

/// Input for the suggest_queries tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SuggestQueriesInput {
    /// Free-text description of what the caller wants to know.
    pub context: String,
    /// Table to focus on. Omit for schema-level suggestions.
    #[serde(default)]
    pub table: Option<String>,
}

/// Output from the suggest_queries tool.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct SuggestQueriesOutput {
    /// Ready-to-run tool invocations.
    pub suggestions: Vec<QuerySuggestion>,
    /// Number of suggestions.
    pub count: usize,
}

/// Handler for aggregation, profiling and suggestions.
pub struct AnalyzeToolHandler {
    provider: Arc<ConnectionProvider>,
    executor: StatementExecutor,
}

impl AnalyzeToolHandler {
    pub fn new(provider: Arc<ConnectionProvider>, executor: StatementExecutor) -> Self {
        Self { provider, executor }
    }

    pub async fn aggregate_rows(
        &self,
        input: AggregateRowsInput,
    ) -> EngineResult<AggregateRowsOutput> {
        let pool = self.provider.acquire().await?;
        let table = SchemaIntrospector::new()
            .resolve_table(pool, &input.table)
            .await?;
        let builder = QueryBuilder::new(pool.db_type());

        let aggregates: Vec<(String, AggregateSpec)> = input
            .aggregates
            .iter()
            .map(|(alias, spec)| (alias.clone(), spec.clone()))
            .collect();
        let having: Vec<(String, f64)> = input
            .having_gt
            .iter()
            .map(|(alias, threshold)| (alias.clone(), *threshold))
            .collect();
        let order = input.order_by.as_ref().map(|column| OrderSpec {
            column: column.clone(),
            descending: input.descending,
        });
        let limit = input
            .limit
            .unwrap_or(DEFAULT_AGGREGATE_LIMIT)
            .clamp(1, MAX_AGGREGATE_LIMIT);

        let stmt = builder.aggregate(
            &table,
            &input.group_by,
            &aggregates,
            &input.filters,
            &having,
            order.as_ref(),
            Some(limit + 1),
        )?;
        let rows = self
            .executor
            .fetch(pool, &stmt, limit, input.timeout_secs)
            .await?;

        info!(
            table = %table.name(),
            groups = rows.row_count(),
            "Aggregated rows"
        );
        Ok(AggregateRowsOutput {
            table: table.name(),
            columns: rows.columns,
            row_count: rows.rows.len(),
            rows: rows.rows,
            truncated: rows.truncated,
        })
    }

    pub async fn profile_table(
        &self,
        input: ProfileTableInput,
    ) -> EngineResult<ProfileTableOutput> {
        let pool = self.provider.acquire().await?;
        let table = SchemaIntrospector::new()
            .resolve_table(pool, &input.table)
            .await?;
        let builder = QueryBuilder::new(pool.db_type());

        let profiler = Profiler::new(builder.dialect(), self.executor);
        let profiles = profiler
            .profile(pool, &table, input.columns.as_deref(), input.timeout_secs)
            .await?;

        info!(
            table = %table.name(),
            columns = profiles.len(),
            "Profiled table"
        );
        Ok(ProfileTableOutput {
            table: table.name(),
            column_count: profiles.len(),
            profiles,
        })
    }

    pub async fn suggest_queries(
        &self,
        input: SuggestQueriesInput,
    ) -> EngineResult<SuggestQueriesOutput> {
        let pool = self.provider.acquire().await?;
        let introspector = SchemaIntrospector::new();
        let engine = SuggestionEngine::new(pool.db_type());

        let suggestions = match &input.table {
            Some(raw) => {
                let table = introspector.resolve_table(pool, raw).await?;
                engine.suggest(&input.context, &[], Some(&table))
            }
            None => {
                let tables = introspector.list_tables(pool).await?;
                engine.suggest(&input.context, &tables, None)
            }
        };

        Ok(SuggestQueriesOutput {
            count: suggestions.len(),
            suggestions,
        })
    }
}
