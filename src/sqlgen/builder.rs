//! Statement construction.
//!
//! Builds SELECT / INSERT / UPDATE / range / aggregate statements from
//! validated inputs. Identifiers are quoted after allow-list validation,
//! values are always bound through the `ParamSink`.

use crate::db::DatabaseType;
use crate::db::introspect::ValidatedTable;
use crate::error::{EngineError, EngineResult};
use crate::sqlgen::filter::FilterCompiler;
use crate::sqlgen::value::{ParamSink, SqlValue};
use crate::sqlgen::{Dialect, is_safe_ident};
use serde::Deserialize;
use serde_json::{Map as JsonMap, Value as JsonValue};

/// A rendered statement: SQL text plus bound parameters in splice order.
#[derive(Debug, Clone)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<crate::sqlgen::BoundParam>,
}

/// Pagination request. `page` is 1-based; the offset is
/// `(page - 1) * page_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSpec {
    pub page: u32,
    pub page_size: u32,
}

impl PageSpec {
    /// Clamp caller-supplied paging into a valid window.
    pub fn clamped(page: u32, page_size: u32, max_page_size: u32) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.clamp(1, max_page_size),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }
}

/// Explicit sort request.
#[derive(Debug, Clone)]
pub struct OrderSpec {
    pub column: String,
    pub descending: bool,
}

/// The closed set of aggregate shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFunc {
    Count,
    CountDistinct,
    Sum,
    Avg,
    Min,
    Max,
}

/// One aggregate: a function applied to a column. `count` may omit the
/// column (COUNT(*)); every other function requires one.
#[derive(Debug, Clone, Deserialize, schemars::JsonSchema)]
pub struct AggregateSpec {
    /// Aggregate function.
    pub func: AggregateFunc,
    /// Column to aggregate over. Optional only for `count`.
    #[serde(default)]
    pub column: Option<String>,
}

impl AggregateSpec {
    fn render(&self, alias: &str, table: &ValidatedTable, dialect: Dialect) -> EngineResult<String> {
        let quoted_column = match &self.column {
            Some(column) => {
                table.require_columns([column.as_str()])?;
                Some(dialect.quote_ident(column))
            }
            None => None,
        };
        let expr = match (self.func, quoted_column) {
            (AggregateFunc::Count, None) => "COUNT(*)".to_string(),
            (AggregateFunc::Count, Some(col)) => format!("COUNT({})", col),
            (AggregateFunc::CountDistinct, Some(col)) => format!("COUNT(DISTINCT {})", col),
            (AggregateFunc::Sum, Some(col)) => format!("SUM({})", col),
            (AggregateFunc::Avg, Some(col)) => format!("AVG({})", dialect.cast_to_float(&col)),
            (AggregateFunc::Min, Some(col)) => format!("MIN({})", col),
            (AggregateFunc::Max, Some(col)) => format!("MAX({})", col),
            (func, None) => {
                return Err(EngineError::invalid_input(format!(
                    "Aggregate '{}' ({:?}) requires a column",
                    alias, func
                )));
            }
        };
        Ok(expr)
    }
}

/// Preview SELECT plus the UPDATE it guards. The preview must run first;
/// the update may only execute after the preview succeeds.
#[derive(Debug, Clone)]
pub struct UpdatePair {
    pub preview: Statement,
    pub apply: Statement,
}

/// Compiles validated tool arguments into statements for one dialect.
#[derive(Debug, Clone, Copy)]
pub struct QueryBuilder {
    dialect: Dialect,
}

impl QueryBuilder {
    pub fn new(db_type: DatabaseType) -> Self {
        Self {
            dialect: Dialect::from(db_type),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Plain SELECT with optional projection, filter, ordering and paging.
    /// `limit` applies when no page is given.
    pub fn select(
        &self,
        table: &ValidatedTable,
        columns: Option<&[String]>,
        filters: &JsonMap<String, JsonValue>,
        order: Option<&OrderSpec>,
        page: Option<PageSpec>,
        limit: Option<u32>,
    ) -> EngineResult<Statement> {
        let projection = self.projection(table, columns)?;
        let mut sink = ParamSink::new(self.dialect);
        let filter = FilterCompiler::new(table).compile(filters, &mut sink)?;

        let mut sql = format!(
            "SELECT {} FROM {} WHERE {}",
            projection,
            table.qualified(self.dialect),
            filter.predicate()
        );

        if let Some(order) = order {
            table.require_columns([order.column.as_str()])?;
            sql.push_str(&format!(
                " ORDER BY {}{}",
                self.dialect.quote_ident(&order.column),
                if order.descending { " DESC" } else { "" }
            ));
        }

        match (page, limit) {
            (Some(page), _) => {
                sql.push_str(&format!(
                    " LIMIT {} OFFSET {}",
                    page.page_size,
                    page.offset()
                ));
            }
            (None, Some(limit)) => {
                sql.push_str(&format!(" LIMIT {}", limit));
            }
            (None, None) => {}
        }

        Ok(Statement {
            sql,
            params: sink.into_params(),
        })
    }

    /// COUNT(*) over the same filter, for `count_total`.
    pub fn count(
        &self,
        table: &ValidatedTable,
        filters: &JsonMap<String, JsonValue>,
    ) -> EngineResult<Statement> {
        let mut sink = ParamSink::new(self.dialect);
        let filter = FilterCompiler::new(table).compile(filters, &mut sink)?;
        Ok(Statement {
            sql: format!(
                "SELECT COUNT(*) AS total FROM {} WHERE {}",
                table.qualified(self.dialect),
                filter.predicate()
            ),
            params: sink.into_params(),
        })
    }

    /// Grouped aggregate query. HAVING supports only `alias > threshold`,
    /// compiled against the aggregate expression so it also works where
    /// aliases are not visible in HAVING.
    pub fn aggregate(
        &self,
        table: &ValidatedTable,
        group_by: &[String],
        aggregates: &[(String, AggregateSpec)],
        filters: &JsonMap<String, JsonValue>,
        having: &[(String, f64)],
        order: Option<&OrderSpec>,
        limit: Option<u32>,
    ) -> EngineResult<Statement> {
        if aggregates.is_empty() {
            return Err(EngineError::invalid_input(
                "At least one aggregate is required",
            ));
        }
        table.require_columns(group_by.iter().map(String::as_str))?;

        let mut select_parts: Vec<String> = group_by
            .iter()
            .map(|c| self.dialect.quote_ident(c))
            .collect();
        let mut rendered: Vec<(String, String)> = Vec::with_capacity(aggregates.len());
        for (alias, spec) in aggregates {
            if !is_safe_ident(alias) {
                return Err(EngineError::invalid_identifier(
                    table.name(),
                    vec![alias.clone()],
                ));
            }
            let expr = spec.render(alias, table, self.dialect)?;
            select_parts.push(format!("{} AS {}", expr, self.dialect.quote_ident(alias)));
            rendered.push((alias.clone(), expr));
        }

        let mut sink = ParamSink::new(self.dialect);
        let filter = FilterCompiler::new(table).compile(filters, &mut sink)?;

        let mut sql = format!(
            "SELECT {} FROM {} WHERE {}",
            select_parts.join(", "),
            table.qualified(self.dialect),
            filter.predicate()
        );

        if !group_by.is_empty() {
            let grouped: Vec<String> = group_by
                .iter()
                .map(|c| self.dialect.quote_ident(c))
                .collect();
            sql.push_str(&format!(" GROUP BY {}", grouped.join(", ")));
        }

        if !having.is_empty() {
            let mut conditions = Vec::with_capacity(having.len());
            for (n, (alias, threshold)) in having.iter().enumerate() {
                let Some((_, expr)) = rendered.iter().find(|(a, _)| a == alias) else {
                    return Err(EngineError::invalid_input(format!(
                        "HAVING references unknown aggregate alias '{}'",
                        alias
                    )));
                };
                let placeholder =
                    sink.bind(format!("having_{}", n), SqlValue::Float(*threshold));
                // gt is the only supported comparator
                conditions.push(format!("{} > {}", expr, placeholder));
            }
            sql.push_str(&format!(" HAVING {}", conditions.join(" AND ")));
        }

        let order_clause = match order {
            Some(order) => {
                let target = if group_by.iter().any(|c| c == &order.column) {
                    Some(self.dialect.quote_ident(&order.column))
                } else if rendered.iter().any(|(a, _)| a == &order.column) {
                    Some(self.dialect.quote_ident(&order.column))
                } else {
                    return Err(EngineError::invalid_input(format!(
                        "Order column '{}' is neither a group column nor an aggregate alias",
                        order.column
                    )));
                };
                target.map(|t| (t, order.descending))
            }
            // Default: first group column, else first aggregate alias
            None => group_by
                .first()
                .map(|c| (self.dialect.quote_ident(c), false))
                .or_else(|| {
                    rendered
                        .first()
                        .map(|(a, _)| (self.dialect.quote_ident(a), false))
                }),
        };
        if let Some((target, descending)) = order_clause {
            sql.push_str(&format!(
                " ORDER BY {}{}",
                target,
                if descending { " DESC" } else { "" }
            ));
        }

        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        Ok(Statement {
            sql,
            params: sink.into_params(),
        })
    }

    /// Single-row INSERT. Record keys are validated against the allow-list;
    /// values are bound in key order.
    pub fn insert(
        &self,
        table: &ValidatedTable,
        record: &JsonMap<String, JsonValue>,
    ) -> EngineResult<Statement> {
        if record.is_empty() {
            return Err(EngineError::invalid_input("Record must not be empty"));
        }
        table.require_columns(record.keys().map(String::as_str))?;

        let mut sink = ParamSink::new(self.dialect);
        let mut columns = Vec::with_capacity(record.len());
        let mut placeholders = Vec::with_capacity(record.len());
        for (column, value) in record {
            columns.push(self.dialect.quote_ident(column));
            placeholders.push(sink.bind(column.clone(), SqlValue::from_json(value)?));
        }

        Ok(Statement {
            sql: format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table.qualified(self.dialect),
                columns.join(", "),
                placeholders.join(", ")
            ),
            params: sink.into_params(),
        })
    }

    /// Guarded UPDATE: a preview SELECT over the same WHERE plus the UPDATE
    /// itself. An empty filter is refused; updating every row must be
    /// spelled out some other way than an accidental empty map.
    pub fn update(
        &self,
        table: &ValidatedTable,
        set: &JsonMap<String, JsonValue>,
        filters: &JsonMap<String, JsonValue>,
    ) -> EngineResult<UpdatePair> {
        if set.is_empty() {
            return Err(EngineError::invalid_input("SET values must not be empty"));
        }
        if filters.is_empty() {
            return Err(EngineError::invalid_input(
                "update requires a non-empty filter; refusing to touch every row",
            ));
        }
        table.require_columns(set.keys().map(String::as_str))?;

        // Preview: its own sink, placeholders start at 1
        let mut preview_sink = ParamSink::new(self.dialect);
        let preview_filter =
            FilterCompiler::new(table).compile(filters, &mut preview_sink)?;
        let preview = Statement {
            sql: format!(
                "SELECT * FROM {} WHERE {}",
                table.qualified(self.dialect),
                preview_filter.predicate()
            ),
            params: preview_sink.into_params(),
        };

        // Apply: SET binds first so positional placeholders line up
        let mut apply_sink = ParamSink::new(self.dialect);
        let mut assignments = Vec::with_capacity(set.len());
        for (i, (column, value)) in set.iter().enumerate() {
            let placeholder = apply_sink.bind(
                format!("set_{}_{}", column, i),
                SqlValue::from_json(value)?,
            );
            assignments.push(format!(
                "{} = {}",
                self.dialect.quote_ident(column),
                placeholder
            ));
        }
        let apply_filter = FilterCompiler::new(table).compile(filters, &mut apply_sink)?;
        let apply = Statement {
            sql: format!(
                "UPDATE {} SET {} WHERE {}",
                table.qualified(self.dialect),
                assignments.join(", "),
                apply_filter.predicate()
            ),
            params: apply_sink.into_params(),
        };

        Ok(UpdatePair { preview, apply })
    }

    /// BETWEEN range query with optional extra filters.
    pub fn range(
        &self,
        table: &ValidatedTable,
        column: &str,
        min: &JsonValue,
        max: &JsonValue,
        extra_filters: &JsonMap<String, JsonValue>,
        limit: u32,
    ) -> EngineResult<Statement> {
        table.require_columns([column])?;

        let mut sink = ParamSink::new(self.dialect);
        let min_placeholder = sink.bind(format!("{}_min", column), SqlValue::from_json(min)?);
        let max_placeholder = sink.bind(format!("{}_max", column), SqlValue::from_json(max)?);
        let mut predicate = format!(
            "{} BETWEEN {} AND {}",
            self.dialect.quote_ident(column),
            min_placeholder,
            max_placeholder
        );

        let filter = FilterCompiler::new(table).compile(extra_filters, &mut sink)?;
        if !filter.is_empty() {
            predicate.push_str(&format!(" AND {}", filter.predicate()));
        }

        Ok(Statement {
            sql: format!(
                "SELECT * FROM {} WHERE {} ORDER BY {} LIMIT {}",
                table.qualified(self.dialect),
                predicate,
                self.dialect.quote_ident(column),
                limit
            ),
            params: sink.into_params(),
        })
    }

    fn projection(
        &self,
        table: &ValidatedTable,
        columns: Option<&[String]>,
    ) -> EngineResult<String> {
        match columns {
            None => Ok("*".to_string()),
            Some([]) => Err(EngineError::invalid_input(
                "Column projection must not be empty; omit it to select all columns",
            )),
            Some(columns) => {
                table.require_columns(columns.iter().map(String::as_str))?;
                Ok(columns
                    .iter()
                    .map(|c| self.dialect.quote_ident(c))
                    .collect::<Vec<_>>()
                    .join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::introspect::{ColumnInfo, TableRef};
    use serde_json::json;

    fn table() -> ValidatedTable {
        ValidatedTable::new(
            TableRef::parse("orders").unwrap(),
            vec![
                ColumnInfo::named("id", "INTEGER"),
                ColumnInfo::named("status", "TEXT"),
                ColumnInfo::named("total", "REAL"),
                ColumnInfo::named("placed_at", "TEXT"),
            ],
        )
    }

    fn builder() -> QueryBuilder {
        QueryBuilder::new(DatabaseType::SQLite)
    }

    fn obj(v: serde_json::Value) -> JsonMap<String, JsonValue> {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn test_page_offset_math() {
        let page = PageSpec::clamped(3, 25, 100);
        assert_eq!(page.offset(), 50);
        assert_eq!(page.page_size, 25);
    }

    #[test]
    fn test_page_clamping() {
        let page = PageSpec::clamped(0, 500, 100);
        assert_eq!(page.page, 1);
        assert_eq!(page.page_size, 100);
        assert_eq!(page.offset(), 0);
        let tiny = PageSpec::clamped(2, 0, 100);
        assert_eq!(tiny.page_size, 1);
    }

    #[test]
    fn test_select_with_page() {
        let t = table();
        let stmt = builder()
            .select(
                &t,
                None,
                &obj(json!({"status": "open"})),
                None,
                Some(PageSpec::clamped(3, 25, 100)),
                None,
            )
            .unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT * FROM \"orders\" WHERE \"status\" = ? LIMIT 25 OFFSET 50"
        );
        assert_eq!(stmt.params.len(), 1);
    }

    #[test]
    fn test_select_projection_and_order() {
        let t = table();
        let stmt = builder()
            .select(
                &t,
                Some(&["id".to_string(), "total".to_string()]),
                &obj(json!({})),
                Some(&OrderSpec {
                    column: "total".to_string(),
                    descending: true,
                }),
                None,
                Some(10),
            )
            .unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT \"id\", \"total\" FROM \"orders\" WHERE 1=1 ORDER BY \"total\" DESC LIMIT 10"
        );
    }

    #[test]
    fn test_select_rejects_unknown_projection() {
        let t = table();
        let err = builder()
            .select(&t, Some(&["ghost".to_string()]), &obj(json!({})), None, None, None)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidIdentifier { .. }));
    }

    #[test]
    fn test_select_rejects_unknown_order_column() {
        let t = table();
        let err = builder()
            .select(
                &t,
                None,
                &obj(json!({})),
                Some(&OrderSpec {
                    column: "ghost".to_string(),
                    descending: false,
                }),
                None,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidIdentifier { .. }));
    }

    #[test]
    fn test_count_shares_filter() {
        let t = table();
        let stmt = builder()
            .count(&t, &obj(json!({"status": "open"})))
            .unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT COUNT(*) AS total FROM \"orders\" WHERE \"status\" = ?"
        );
        assert_eq!(stmt.params[0].name, "status_eq_0");
    }

    #[test]
    fn test_aggregate_with_group_and_having() {
        let t = table();
        let aggregates = vec![(
            "order_count".to_string(),
            AggregateSpec {
                func: AggregateFunc::Count,
                column: None,
            },
        )];
        let having = vec![("order_count".to_string(), 5.0)];
        let stmt = builder()
            .aggregate(
                &t,
                &["status".to_string()],
                &aggregates,
                &obj(json!({})),
                &having,
                None,
                None,
            )
            .unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT \"status\", COUNT(*) AS \"order_count\" FROM \"orders\" WHERE 1=1 \
             GROUP BY \"status\" HAVING COUNT(*) > ? ORDER BY \"status\""
        );
        assert_eq!(stmt.params[0].name, "having_0");
        assert_eq!(stmt.params[0].value, SqlValue::Float(5.0));
    }

    #[test]
    fn test_aggregate_default_order_falls_back_to_alias() {
        let t = table();
        let aggregates = vec![(
            "revenue".to_string(),
            AggregateSpec {
                func: AggregateFunc::Sum,
                column: Some("total".to_string()),
            },
        )];
        let stmt = builder()
            .aggregate(&t, &[], &aggregates, &obj(json!({})), &[], None, None)
            .unwrap();
        assert!(stmt.sql.contains("SUM(\"total\") AS \"revenue\""));
        assert!(stmt.sql.ends_with("ORDER BY \"revenue\""));
        assert!(!stmt.sql.contains("GROUP BY"));
    }

    #[test]
    fn test_aggregate_having_unknown_alias() {
        let t = table();
        let aggregates = vec![(
            "n".to_string(),
            AggregateSpec {
                func: AggregateFunc::Count,
                column: None,
            },
        )];
        let err = builder()
            .aggregate(
                &t,
                &[],
                &aggregates,
                &obj(json!({})),
                &[("missing".to_string(), 1.0)],
                None,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput { .. }));
    }

    #[test]
    fn test_aggregate_rejects_unsafe_alias() {
        let t = table();
        let aggregates = vec![(
            "n; DROP TABLE orders".to_string(),
            AggregateSpec {
                func: AggregateFunc::Count,
                column: None,
            },
        )];
        let err = builder()
            .aggregate(&t, &[], &aggregates, &obj(json!({})), &[], None, None)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidIdentifier { .. }));
    }

    #[test]
    fn test_avg_casts_to_float() {
        let t = table();
        let aggregates = vec![(
            "avg_total".to_string(),
            AggregateSpec {
                func: AggregateFunc::Avg,
                column: Some("total".to_string()),
            },
        )];
        let stmt = QueryBuilder::new(DatabaseType::Postgres)
            .aggregate(&t, &[], &aggregates, &obj(json!({})), &[], None, None)
            .unwrap();
        assert!(stmt.sql.contains("AVG(CAST(\"total\" AS DOUBLE PRECISION))"));
    }

    #[test]
    fn test_insert_binds_every_value() {
        let t = table();
        let stmt = builder()
            .insert(&t, &obj(json!({"id": 1, "status": "open"})))
            .unwrap();
        assert_eq!(
            stmt.sql,
            "INSERT INTO \"orders\" (\"id\", \"status\") VALUES (?, ?)"
        );
        assert_eq!(stmt.params.len(), 2);
    }

    #[test]
    fn test_insert_rejects_unknown_column() {
        let t = table();
        let err = builder()
            .insert(&t, &obj(json!({"ghost": 1})))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidIdentifier { .. }));
    }

    #[test]
    fn test_update_preview_shares_where() {
        let t = table();
        let pair = builder()
            .update(
                &t,
                &obj(json!({"status": "closed"})),
                &obj(json!({"id": {"in": [1, 2]}})),
            )
            .unwrap();
        assert_eq!(
            pair.preview.sql,
            "SELECT * FROM \"orders\" WHERE \"id\" IN (?, ?)"
        );
        assert_eq!(
            pair.apply.sql,
            "UPDATE \"orders\" SET \"status\" = ? WHERE \"id\" IN (?, ?)"
        );
        // Same WHERE params, shifted after the SET bind
        assert_eq!(pair.preview.params.len(), 2);
        assert_eq!(pair.apply.params.len(), 3);
        assert_eq!(pair.apply.params[0].name, "set_status_0");
        assert_eq!(pair.apply.params[1].name, pair.preview.params[0].name);
    }

    #[test]
    fn test_update_postgres_placeholder_positions() {
        let t = table();
        let pair = QueryBuilder::new(DatabaseType::Postgres)
            .update(
                &t,
                &obj(json!({"status": "closed"})),
                &obj(json!({"id": 7})),
            )
            .unwrap();
        assert_eq!(pair.preview.sql, "SELECT * FROM \"orders\" WHERE \"id\" = $1");
        assert_eq!(
            pair.apply.sql,
            "UPDATE \"orders\" SET \"status\" = $1 WHERE \"id\" = $2"
        );
    }

    #[test]
    fn test_update_refuses_empty_filter() {
        let t = table();
        let err = builder()
            .update(&t, &obj(json!({"status": "x"})), &obj(json!({})))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput { .. }));
    }

    #[test]
    fn test_range_between() {
        let t = table();
        let stmt = builder()
            .range(
                &t,
                "placed_at",
                &json!("2024-01-01"),
                &json!("2024-12-31"),
                &obj(json!({"status": "open"})),
                50,
            )
            .unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT * FROM \"orders\" WHERE \"placed_at\" BETWEEN ? AND ? AND \"status\" = ? \
             ORDER BY \"placed_at\" LIMIT 50"
        );
        assert_eq!(stmt.params[0].name, "placed_at_min");
        assert_eq!(stmt.params[1].name, "placed_at_max");
    }
}
