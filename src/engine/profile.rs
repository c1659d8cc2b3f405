//! Column profiling.
//!
//! Builds one statistics query per profiled column, dispatched on the
//! column's profile category, plus a top-5 value frequency query. All
//! identifiers come from the resolved table, so the generated SQL contains
//! only validated, quoted names and no caller data.

use crate::db::executor::StatementExecutor;
use crate::db::introspect::ValidatedTable;
use crate::db::provider::DbPool;
use crate::db::types::{ProfileCategory, profile_category};
use crate::error::EngineResult;
use crate::models::TOP_VALUES_LIMIT;
use crate::sqlgen::Dialect;
use crate::sqlgen::Statement;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::debug;

/// Statistics block. Which fields are present depends on the category:
/// numeric columns get min/max/avg values, textual columns get length
/// statistics, everything else gets total/non-null/null/distinct counts.
#[derive(Debug, Clone, Default, Serialize, schemars::JsonSchema)]
pub struct ProfileStats {
    pub total_count: u64,
    pub non_null_count: u64,
    pub null_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distinct_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_value: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_value: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_length: Option<f64>,
}

/// One of the most frequent values in a column.
#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct ValueFrequency {
    pub value: JsonValue,
    pub frequency: u64,
}

/// Full profile for one column.
#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct ColumnProfile {
    pub column: String,
    /// Declared type from the catalog.
    pub data_type: String,
    pub category: ProfileCategory,
    pub statistics: ProfileStats,
    /// Up to five most frequent non-null values.
    pub top_values: Vec<ValueFrequency>,
}

/// Profiles table columns.
#[derive(Debug, Clone, Copy)]
pub struct Profiler {
    dialect: Dialect,
    executor: StatementExecutor,
}

impl Profiler {
    pub fn new(dialect: Dialect, executor: StatementExecutor) -> Self {
        Self { dialect, executor }
    }

    /// Profile the requested columns, or every column when `columns` is
    /// None. A filter that matches nothing yields an empty report.
    pub async fn profile(
        &self,
        pool: &DbPool,
        table: &ValidatedTable,
        columns: Option<&[String]>,
        timeout_secs: Option<u64>,
    ) -> EngineResult<Vec<ColumnProfile>> {
        let db_type = pool.db_type();
        let selected: Vec<_> = table
            .columns()
            .iter()
            .filter(|col| match columns {
                Some(requested) => requested.iter().any(|r| r == &col.name),
                None => true,
            })
            .collect();

        let mut profiles = Vec::with_capacity(selected.len());
        for col in selected {
            let category = profile_category(&col.data_type, db_type);
            debug!(column = %col.name, ?category, "Profiling column");

            let stats_sql = self.stats_sql(table, &col.name, category);
            let stats_rows = self
                .executor
                .fetch(pool, &Statement { sql: stats_sql, params: Vec::new() }, 1, timeout_secs)
                .await?;
            let statistics = stats_rows
                .rows
                .first()
                .map(|row| decode_stats(row, category))
                .unwrap_or_default();

            let top_sql = self.top_values_sql(table, &col.name);
            let top_rows = self
                .executor
                .fetch(
                    pool,
                    &Statement { sql: top_sql, params: Vec::new() },
                    TOP_VALUES_LIMIT,
                    timeout_secs,
                )
                .await?;
            let top_values = top_rows
                .rows
                .iter()
                .map(|row| ValueFrequency {
                    value: row.get("value").cloned().unwrap_or(JsonValue::Null),
                    frequency: row.get("frequency").and_then(JsonValue::as_u64).unwrap_or(0),
                })
                .collect();

            profiles.push(ColumnProfile {
                column: col.name.clone(),
                data_type: col.data_type.clone(),
                category,
                statistics,
                top_values,
            });
        }

        Ok(profiles)
    }

    fn stats_sql(&self, table: &ValidatedTable, column: &str, category: ProfileCategory) -> String {
        let col = self.dialect.quote_ident(column);
        let from = table.qualified(self.dialect);
        match category {
            ProfileCategory::Numeric => format!(
                "SELECT COUNT(*) AS total_count, COUNT({col}) AS non_null_count, \
                 COUNT(DISTINCT {col}) AS distinct_count, MIN({col}) AS min_value, \
                 MAX({col}) AS max_value, AVG({cast}) AS avg_value FROM {from}",
                col = col,
                cast = self.dialect.cast_to_float(&col),
                from = from
            ),
            ProfileCategory::Textual => format!(
                "SELECT COUNT(*) AS total_count, COUNT({col}) AS non_null_count, \
                 COUNT(DISTINCT {col}) AS distinct_count, \
                 MIN(LENGTH({col})) AS min_length, MAX(LENGTH({col})) AS max_length, \
                 AVG({cast}) AS avg_length FROM {from}",
                col = col,
                cast = self.dialect.cast_to_float(&format!("LENGTH({})", col)),
                from = from
            ),
            ProfileCategory::Other => format!(
                "SELECT COUNT(*) AS total_count, COUNT({col}) AS non_null_count, \
                 COUNT(DISTINCT {col}) AS distinct_count FROM {from}",
                col = col,
                from = from
            ),
        }
    }

    fn top_values_sql(&self, table: &ValidatedTable, column: &str) -> String {
        let col = self.dialect.quote_ident(column);
        format!(
            "SELECT {col} AS value, COUNT(*) AS frequency FROM {from} \
             WHERE {col} IS NOT NULL GROUP BY {col} \
             ORDER BY COUNT(*) DESC LIMIT {limit}",
            col = col,
            from = table.qualified(self.dialect),
            limit = TOP_VALUES_LIMIT
        )
    }
}

fn decode_stats(
    row: &serde_json::Map<String, JsonValue>,
    category: ProfileCategory,
) -> ProfileStats {
    let total_count = get_u64(row, "total_count");
    let non_null_count = get_u64(row, "non_null_count");
    let mut stats = ProfileStats {
        total_count,
        non_null_count,
        null_count: total_count.saturating_sub(non_null_count),
        ..ProfileStats::default()
    };
    match category {
        ProfileCategory::Numeric => {
            stats.distinct_count = opt_u64(row, "distinct_count");
            stats.min_value = row.get("min_value").filter(|v| !v.is_null()).cloned();
            stats.max_value = row.get("max_value").filter(|v| !v.is_null()).cloned();
            stats.avg_value = row.get("avg_value").and_then(json_f64);
        }
        ProfileCategory::Textual => {
            stats.distinct_count = opt_u64(row, "distinct_count");
            stats.min_length = opt_u64(row, "min_length");
            stats.max_length = opt_u64(row, "max_length");
            stats.avg_length = row.get("avg_length").and_then(json_f64);
        }
        ProfileCategory::Other => {
            stats.distinct_count = opt_u64(row, "distinct_count");
        }
    }
    stats
}

fn get_u64(row: &serde_json::Map<String, JsonValue>, key: &str) -> u64 {
    row.get(key).and_then(JsonValue::as_u64).unwrap_or(0)
}

fn opt_u64(row: &serde_json::Map<String, JsonValue>, key: &str) -> Option<u64> {
    row.get(key).and_then(JsonValue::as_u64)
}

// Decimal averages come back as strings on MySQL; accept both shapes
fn json_f64(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::introspect::{ColumnInfo, TableRef};
    use serde_json::json;

    fn profiler() -> Profiler {
        Profiler::new(Dialect::SQLite, StatementExecutor::new())
    }

    fn table() -> ValidatedTable {
        ValidatedTable::new(
            TableRef::parse("metrics").unwrap(),
            vec![ColumnInfo::named("score", "INTEGER")],
        )
    }

    #[test]
    fn test_numeric_stats_sql() {
        let sql = profiler().stats_sql(&table(), "score", ProfileCategory::Numeric);
        assert!(sql.contains("COUNT(DISTINCT \"score\")"));
        assert!(sql.contains("AVG(CAST(\"score\" AS REAL))"));
        assert!(sql.contains("FROM \"metrics\""));
    }

    #[test]
    fn test_other_stats_sql_keeps_distinct_count() {
        let sql = profiler().stats_sql(&table(), "score", ProfileCategory::Other);
        assert!(sql.contains("COUNT(DISTINCT \"score\")"));
        assert!(!sql.contains("MIN("));
    }

    #[test]
    fn test_decode_stats_other_keeps_distinct_count() {
        let row = json!({
            "total_count": 6,
            "non_null_count": 4,
            "distinct_count": 2
        });
        let stats = decode_stats(row.as_object().unwrap(), ProfileCategory::Other);
        assert_eq!(stats.null_count, 2);
        assert_eq!(stats.distinct_count, Some(2));
        assert_eq!(stats.min_value, None);
        assert_eq!(stats.min_length, None);
    }

    #[test]
    fn test_textual_stats_sql_uses_length() {
        let sql = profiler().stats_sql(&table(), "score", ProfileCategory::Textual);
        assert!(sql.contains("MIN(LENGTH(\"score\"))"));
        assert!(sql.contains("AVG(CAST(LENGTH(\"score\") AS REAL))"));
    }

    #[test]
    fn test_top_values_sql() {
        let sql = profiler().top_values_sql(&table(), "score");
        assert!(sql.contains("GROUP BY \"score\""));
        assert!(sql.contains("ORDER BY COUNT(*) DESC LIMIT 5"));
        assert!(sql.contains("IS NOT NULL"));
    }

    #[test]
    fn test_decode_stats_numeric() {
        let row = json!({
            "total_count": 10,
            "non_null_count": 8,
            "distinct_count": 4,
            "min_value": 1,
            "max_value": 9,
            "avg_value": 4.5
        });
        let stats = decode_stats(row.as_object().unwrap(), ProfileCategory::Numeric);
        assert_eq!(stats.null_count, 2);
        assert_eq!(stats.avg_value, Some(4.5));
        assert_eq!(stats.min_value, Some(json!(1)));
    }

    #[test]
    fn test_decode_stats_accepts_string_average() {
        let row = json!({
            "total_count": 3,
            "non_null_count": 3,
            "distinct_count": 3,
            "min_value": 1,
            "max_value": 3,
            "avg_value": "2.0000"
        });
        let stats = decode_stats(row.as_object().unwrap(), ProfileCategory::Numeric);
        assert_eq!(stats.avg_value, Some(2.0));
    }
}
