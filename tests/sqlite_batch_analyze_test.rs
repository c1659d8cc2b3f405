//! Integration tests for the batch and analysis tools over SQLite.
//!
//! Tests verify that:
//! - batch_insert commits good chunks and isolates failed ones
//! - bulk_update captures per-rule failures while the rest commit
//! - aggregate_rows groups, filters with HAVING and orders deterministically
//! - profile_table produces category-appropriate statistics and top values

use sqlkit_mcp_server::db::executor::StatementExecutor;
use sqlkit_mcp_server::db::provider::{AuthSpec, ConnectionProvider, ConnectionTarget, DbPool};
use sqlkit_mcp_server::db::types::ProfileCategory;
use sqlkit_mcp_server::engine::RuleStatus;
use sqlkit_mcp_server::tools::analyze::{
    AggregateRowsInput, AnalyzeToolHandler, ProfileTableInput, SuggestQueriesInput,
};
use sqlkit_mcp_server::tools::batch::{BatchInsertInput, BatchToolHandler, BulkUpdateInput};
use serde_json::{Map as JsonMap, Value as JsonValue, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

/// Create a SQLite test database with an empty `events` table.
async fn setup() -> (Arc<ConnectionProvider>, StatementExecutor) {
    let temp_file = NamedTempFile::new().unwrap();
    // Keep the temp file alive - prevent deletion when function returns
    let db_path = temp_file
        .into_temp_path()
        .keep()
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    let target = ConnectionTarget::from_url(
        format!("sqlite:{}", db_path),
        AuthSpec::Trusted,
        1,
        Duration::from_secs(5),
    )
    .unwrap();
    let provider = Arc::new(ConnectionProvider::new(target));

    let DbPool::SQLite(pool) = provider.acquire().await.unwrap() else {
        panic!("expected a SQLite pool");
    };
    sqlx::query("CREATE TABLE events (id INTEGER PRIMARY KEY, kind TEXT, amount REAL)")
        .execute(pool)
        .await
        .unwrap();

    (provider, StatementExecutor::new())
}

fn row(id: i64, kind: &str, amount: f64) -> JsonMap<String, JsonValue> {
    json!({"id": id, "kind": kind, "amount": amount})
        .as_object()
        .unwrap()
        .clone()
}

async fn seed_events(provider: &ConnectionProvider, count: i64) {
    let DbPool::SQLite(pool) = provider.acquire().await.unwrap() else {
        panic!("expected a SQLite pool");
    };
    for i in 1..=count {
        let kind = if i % 2 == 0 { "click" } else { "view" };
        sqlx::query("INSERT INTO events (id, kind, amount) VALUES (?, ?, ?)")
            .bind(i)
            .bind(kind)
            .bind(i as f64)
            .execute(pool)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_batch_insert_commits_all_chunks() {
    let (provider, executor) = setup().await;
    let handler = BatchToolHandler::new(provider, executor);

    let rows: Vec<_> = (1..=250).map(|i| row(i, "click", i as f64)).collect();
    let report = handler
        .batch_insert(BatchInsertInput {
            table: "events".to_string(),
            rows,
            chunk_size: Some(100),
            timeout_secs: None,
        })
        .await
        .unwrap();

    assert_eq!(report.total_rows, 250);
    assert_eq!(report.inserted_rows, 250);
    assert_eq!(report.chunk_size_used, 100);
    assert!(report.failed_chunks.is_empty());
}

#[tokio::test]
async fn test_batch_insert_isolates_failed_chunk() {
    let (provider, executor) = setup().await;
    let handler = BatchToolHandler::new(provider, executor);

    // Row at index 150 duplicates id 1, so the second chunk (rows 100..200)
    // hits a UNIQUE violation and rolls back; chunks one and three commit.
    let mut rows: Vec<_> = (1..=250).map(|i| row(i, "click", i as f64)).collect();
    rows[150] = row(1, "dup", 0.0);

    let report = handler
        .batch_insert(BatchInsertInput {
            table: "events".to_string(),
            rows,
            chunk_size: Some(100),
            timeout_secs: None,
        })
        .await
        .unwrap();

    assert_eq!(report.total_rows, 250);
    assert_eq!(report.inserted_rows, 150);
    assert_eq!(report.failed_chunks.len(), 1);
    assert_eq!(report.failed_chunks[0].start_index, 100);
    assert_eq!(report.failed_chunks[0].size, 100);
    assert!(!report.failed_chunks[0].error.is_empty());
}

#[tokio::test]
async fn test_batch_insert_records_compile_failure_without_executing() {
    let (provider, executor) = setup().await;
    let handler = BatchToolHandler::new(provider, executor);

    // Second chunk references an unknown column and is rejected before any
    // SQL runs; the first chunk still commits.
    let mut rows: Vec<_> = (1..=10).map(|i| row(i, "click", i as f64)).collect();
    rows.push(
        json!({"id": 11, "ghost": true})
            .as_object()
            .unwrap()
            .clone(),
    );

    let report = handler
        .batch_insert(BatchInsertInput {
            table: "events".to_string(),
            rows,
            chunk_size: Some(10),
            timeout_secs: None,
        })
        .await
        .unwrap();

    assert_eq!(report.inserted_rows, 10);
    assert_eq!(report.failed_chunks.len(), 1);
    assert_eq!(report.failed_chunks[0].start_index, 10);
    assert_eq!(report.failed_chunks[0].size, 1);
    assert!(report.failed_chunks[0].error.contains("ghost"));
}

#[tokio::test]
async fn test_bulk_update_applies_rules_in_order() {
    let (provider, executor) = setup().await;
    seed_events(&provider, 10).await;
    let handler = BatchToolHandler::new(provider, executor);

    let input: BulkUpdateInput = serde_json::from_value(json!({
        "table": "events",
        "rules": [
            {"where": {"id": {"lte": 4}}, "set": {"kind": "early"},
             "description": "mark early events"},
            {"where": {"kind": "early"}, "set": {"amount": 0}}
        ]
    }))
    .unwrap();

    let result = handler.bulk_update(input).await.unwrap();
    assert_eq!(result.applied_rules, 2);
    assert_eq!(result.failed_rules, 0);
    // Rule two sees rule one's changes inside the same unit of work
    assert_eq!(result.outcomes[0].rows_affected, Some(4));
    assert_eq!(result.outcomes[1].rows_affected, Some(4));
    assert_eq!(result.total_rows_affected, 8);
    assert_eq!(
        result.outcomes[0].description.as_deref(),
        Some("mark early events")
    );
}

#[tokio::test]
async fn test_bulk_update_isolates_failed_rule() {
    let (provider, executor) = setup().await;
    seed_events(&provider, 5).await;
    let handler = BatchToolHandler::new(provider.clone(), executor);

    // Rule two collides with the primary key and is rolled back to its
    // savepoint; rules one and three still commit.
    let input: BulkUpdateInput = serde_json::from_value(json!({
        "table": "events",
        "rules": [
            {"where": {"id": 5}, "set": {"kind": "last"}},
            {"where": {"id": 2}, "set": {"id": 1}},
            {"where": {"id": 3}, "set": {"kind": "third"}}
        ]
    }))
    .unwrap();

    let result = handler.bulk_update(input).await.unwrap();
    assert_eq!(result.applied_rules, 2);
    assert_eq!(result.failed_rules, 1);
    assert_eq!(result.outcomes[1].status, RuleStatus::Failed);
    assert!(result.outcomes[1].error.is_some());
    assert_eq!(result.outcomes[1].rows_affected, None);
    assert_eq!(result.total_rows_affected, 2);

    // The committed rules are visible afterwards, the failed one is not
    let DbPool::SQLite(pool) = provider.acquire().await.unwrap() else {
        panic!("expected a SQLite pool");
    };
    let kinds: Vec<(i64, String)> =
        sqlx::query_as("SELECT id, kind FROM events WHERE id IN (2, 3, 5) ORDER BY id")
            .fetch_all(pool)
            .await
            .unwrap();
    assert_eq!(kinds[0].1, "click"); // id 2 untouched
    assert_eq!(kinds[1].1, "third");
    assert_eq!(kinds[2].1, "last");
}

#[tokio::test]
async fn test_bulk_update_captures_compile_failure() {
    let (provider, executor) = setup().await;
    seed_events(&provider, 3).await;
    let handler = BatchToolHandler::new(provider, executor);

    let input: BulkUpdateInput = serde_json::from_value(json!({
        "table": "events",
        "rules": [
            {"where": {"id": 1}, "set": {"ghost": 1}},
            {"where": {"id": 2}, "set": {"kind": "ok"}}
        ]
    }))
    .unwrap();

    let result = handler.bulk_update(input).await.unwrap();
    assert_eq!(result.outcomes[0].status, RuleStatus::Failed);
    assert!(
        result.outcomes[0]
            .error
            .as_deref()
            .unwrap()
            .contains("ghost")
    );
    assert_eq!(result.outcomes[1].status, RuleStatus::Applied);
    assert_eq!(result.outcomes[1].rows_affected, Some(1));
}

#[tokio::test]
async fn test_aggregate_rows_group_by_with_having() {
    let (provider, executor) = setup().await;
    seed_events(&provider, 9).await; // 4 clicks, 5 views
    let handler = AnalyzeToolHandler::new(provider, executor);

    let mut aggregates = BTreeMap::new();
    aggregates.insert(
        "event_count".to_string(),
        serde_json::from_value(json!({"func": "count"})).unwrap(),
    );
    aggregates.insert(
        "total_amount".to_string(),
        serde_json::from_value(json!({"func": "sum", "column": "amount"})).unwrap(),
    );
    let mut having_gt = BTreeMap::new();
    having_gt.insert("event_count".to_string(), 4.0);

    let result = handler
        .aggregate_rows(AggregateRowsInput {
            table: "events".to_string(),
            group_by: vec!["kind".to_string()],
            aggregates,
            filters: JsonMap::new(),
            having_gt,
            order_by: Some("kind".to_string()),
            descending: false,
            limit: None,
            timeout_secs: None,
        })
        .await
        .unwrap();

    // Only "view" has more than 4 events
    assert_eq!(result.row_count, 1);
    let group = &result.rows[0];
    assert_eq!(group.get("kind").and_then(JsonValue::as_str), Some("view"));
    assert_eq!(group.get("event_count").and_then(JsonValue::as_i64), Some(5));
    // views carry odd amounts 1+3+5+7+9
    assert_eq!(
        group.get("total_amount").and_then(JsonValue::as_f64),
        Some(25.0)
    );
    assert!(!result.truncated);
}

#[tokio::test]
async fn test_aggregate_rows_without_group_by() {
    let (provider, executor) = setup().await;
    seed_events(&provider, 6).await;
    let handler = AnalyzeToolHandler::new(provider, executor);

    let mut aggregates = BTreeMap::new();
    aggregates.insert(
        "max_amount".to_string(),
        serde_json::from_value(json!({"func": "max", "column": "amount"})).unwrap(),
    );

    let result = handler
        .aggregate_rows(AggregateRowsInput {
            table: "events".to_string(),
            group_by: Vec::new(),
            aggregates,
            filters: JsonMap::new(),
            having_gt: BTreeMap::new(),
            order_by: None,
            descending: false,
            limit: None,
            timeout_secs: None,
        })
        .await
        .unwrap();

    assert_eq!(result.row_count, 1);
    assert_eq!(
        result.rows[0].get("max_amount").and_then(JsonValue::as_f64),
        Some(6.0)
    );
}

#[tokio::test]
async fn test_profile_table_statistics_and_top_values() {
    let (provider, executor) = setup().await;
    let handler = AnalyzeToolHandler::new(provider.clone(), executor);

    let DbPool::SQLite(pool) = provider.acquire().await.unwrap() else {
        panic!("expected a SQLite pool");
    };
    // 8 rows: amount null on two of them, "click" dominates kind
    for i in 1..=8 {
        let kind = if i <= 5 { "click" } else { "view" };
        let amount: Option<f64> = if i <= 6 { Some(i as f64) } else { None };
        sqlx::query("INSERT INTO events (id, kind, amount) VALUES (?, ?, ?)")
            .bind(i)
            .bind(kind)
            .bind(amount)
            .execute(pool)
            .await
            .unwrap();
    }

    let result = handler
        .profile_table(ProfileTableInput {
            table: "events".to_string(),
            columns: None,
            timeout_secs: None,
        })
        .await
        .unwrap();
    assert_eq!(result.column_count, 3);

    let amount = result
        .profiles
        .iter()
        .find(|p| p.column == "amount")
        .unwrap();
    assert_eq!(amount.category, ProfileCategory::Numeric);
    assert_eq!(amount.statistics.total_count, 8);
    assert_eq!(amount.statistics.non_null_count, 6);
    assert_eq!(amount.statistics.null_count, 2);
    assert_eq!(amount.statistics.avg_value, Some(3.5));

    let kind = result.profiles.iter().find(|p| p.column == "kind").unwrap();
    assert_eq!(kind.category, ProfileCategory::Textual);
    assert_eq!(kind.statistics.distinct_count, Some(2));
    assert_eq!(kind.statistics.min_length, Some(4));
    assert_eq!(kind.statistics.max_length, Some(5));
    // Most frequent value first, nulls never listed
    assert_eq!(kind.top_values[0].value, json!("click"));
    assert_eq!(kind.top_values[0].frequency, 5);
}

#[tokio::test]
async fn test_profile_table_unmatched_columns_yield_empty_report() {
    let (provider, executor) = setup().await;
    seed_events(&provider, 3).await;
    let handler = AnalyzeToolHandler::new(provider, executor);

    let result = handler
        .profile_table(ProfileTableInput {
            table: "events".to_string(),
            columns: Some(vec!["no_such_column".to_string()]),
            timeout_secs: None,
        })
        .await
        .unwrap();
    assert_eq!(result.column_count, 0);
    assert!(result.profiles.is_empty());
}

#[tokio::test]
async fn test_suggest_queries_for_counting() {
    let (provider, executor) = setup().await;
    seed_events(&provider, 3).await;
    let handler = AnalyzeToolHandler::new(provider, executor);

    let result = handler
        .suggest_queries(SuggestQueriesInput {
            context: "how many events are there".to_string(),
            table: Some("events".to_string()),
        })
        .await
        .unwrap();
    assert!(result.count > 0);
    let counting = result
        .suggestions
        .iter()
        .find(|s| s.tool == "aggregate_rows")
        .unwrap();
    assert_eq!(
        counting.arguments.get("table").and_then(JsonValue::as_str),
        Some("events")
    );
}

#[tokio::test]
async fn test_suggest_queries_without_focus_table() {
    let (provider, executor) = setup().await;
    let handler = AnalyzeToolHandler::new(provider, executor);

    let result = handler
        .suggest_queries(SuggestQueriesInput {
            context: "what is in this database".to_string(),
            table: None,
        })
        .await
        .unwrap();
    assert!(result.suggestions.iter().any(|s| s.tool == "list_tables"));
}
