//! Query suggestions.
//!
//! Matches free-text intent against the schema and proposes concrete tool
//! invocations. Suggestions are structured `{tool, arguments}` pairs, never
//! SQL text, so a client can run them directly through the same validated
//! path as any other call.

use crate::db::DatabaseType;
use crate::db::introspect::{TableEntry, ValidatedTable};
use crate::db::types::{ProfileCategory, profile_category};
use serde::Serialize;
use serde_json::json;

/// One suggested follow-up call.
#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct QuerySuggestion {
    /// What the suggested call answers.
    pub description: String,
    /// Tool to invoke.
    pub tool: String,
    /// Ready-to-use arguments for the tool.
    pub arguments: serde_json::Value,
}

/// Builds suggestions from intent keywords plus whatever schema context is
/// available.
#[derive(Debug, Clone, Copy)]
pub struct SuggestionEngine {
    db_type: DatabaseType,
}

impl SuggestionEngine {
    pub fn new(db_type: DatabaseType) -> Self {
        Self { db_type }
    }

    pub fn suggest(
        &self,
        context: &str,
        tables: &[TableEntry],
        focus: Option<&ValidatedTable>,
    ) -> Vec<QuerySuggestion> {
        let lower = context.to_lowercase();
        let mut suggestions = Vec::new();

        if let Some(table) = focus {
            let name = table.name();
            let numeric = self.first_column(table, ProfileCategory::Numeric);
            let textual = self.first_column(table, ProfileCategory::Textual);

            if contains_any(&lower, &["count", "how many", "total"]) {
                suggestions.push(QuerySuggestion {
                    description: format!("Count all rows in {}", name),
                    tool: "aggregate_rows".to_string(),
                    arguments: json!({
                        "table": name,
                        "aggregates": {"row_count": {"func": "count"}}
                    }),
                });
            }

            if contains_any(&lower, &["average", "mean", "sum", "avg"]) {
                if let Some(column) = &numeric {
                    suggestions.push(QuerySuggestion {
                        description: format!("Average of {} in {}", column, name),
                        tool: "aggregate_rows".to_string(),
                        arguments: json!({
                            "table": name,
                            "aggregates": {
                                format!("avg_{}", column): {"func": "avg", "column": column}
                            }
                        }),
                    });
                }
            }

            if contains_any(&lower, &["distribution", "group", "breakdown", "by "]) {
                if let Some(column) = &textual {
                    suggestions.push(QuerySuggestion {
                        description: format!("Row counts grouped by {} in {}", column, name),
                        tool: "aggregate_rows".to_string(),
                        arguments: json!({
                            "table": name,
                            "group_by": [column],
                            "aggregates": {"row_count": {"func": "count"}}
                        }),
                    });
                }
            }

            if contains_any(&lower, &["profile", "quality", "statistics", "stats", "nulls"]) {
                suggestions.push(QuerySuggestion {
                    description: format!("Profile the columns of {}", name),
                    tool: "profile_table".to_string(),
                    arguments: json!({"table": name}),
                });
            }

            if contains_any(&lower, &["search", "find", "filter", "where", "lookup"]) {
                suggestions.push(QuerySuggestion {
                    description: format!("Search {} with filters and pagination", name),
                    tool: "search_rows".to_string(),
                    arguments: json!({"table": name, "filters": {}, "page": 1}),
                });
            }

            // Always worth a look at the data itself
            if suggestions.is_empty() || contains_any(&lower, &["sample", "example", "look"]) {
                suggestions.push(QuerySuggestion {
                    description: format!("Sample a few rows from {}", name),
                    tool: "sample_rows".to_string(),
                    arguments: json!({"table": name}),
                });
            }
        } else {
            suggestions.push(QuerySuggestion {
                description: "List the available tables".to_string(),
                tool: "list_tables".to_string(),
                arguments: json!({}),
            });
            if let Some(first) = tables.first() {
                suggestions.push(QuerySuggestion {
                    description: format!("Inspect the structure of {}", first.full_name()),
                    tool: "describe_table".to_string(),
                    arguments: json!({"table": first.full_name()}),
                });
            }
        }

        suggestions
    }

    fn first_column(&self, table: &ValidatedTable, category: ProfileCategory) -> Option<String> {
        table
            .columns()
            .iter()
            .find(|col| profile_category(&col.data_type, self.db_type) == category)
            .map(|col| col.name.clone())
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}
