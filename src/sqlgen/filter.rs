//! Filter compilation.
//!
//! Filters arrive as a JSON map: `{"column": scalar}` is equality shorthand,
//! `{"column": {"op": operand}}` selects an operator from the closed set
//! eq / like / gt / lt / gte / lte / in. Column names are checked against
//! the table allow-list before anything is compiled; operands are always
//! bound, never spliced. `serde_json::Map` iterates keys in sorted order, so
//! compilation is deterministic for identical inputs.

use crate::db::introspect::ValidatedTable;
use crate::error::{EngineError, EngineResult};
use crate::sqlgen::value::{ParamSink, SqlValue};
use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing::warn;

/// WHERE fragments produced from one filter map, joined with AND.
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    fragments: Vec<String>,
}

impl CompiledFilter {
    /// The WHERE predicate. An empty filter is always-true.
    pub fn predicate(&self) -> String {
        if self.fragments.is_empty() {
            "1=1".to_string()
        } else {
            self.fragments.join(" AND ")
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

/// Compiles filter maps against one table's column allow-list.
pub struct FilterCompiler<'a> {
    table: &'a ValidatedTable,
}

impl<'a> FilterCompiler<'a> {
    pub fn new(table: &'a ValidatedTable) -> Self {
        Self { table }
    }

    /// Compile a filter map, appending bound parameters to `sink`.
    pub fn compile(
        &self,
        filters: &JsonMap<String, JsonValue>,
        sink: &mut ParamSink,
    ) -> EngineResult<CompiledFilter> {
        let unknown: Vec<String> = filters
            .keys()
            .filter(|column| !self.table.has_column(column))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(EngineError::invalid_identifier(
                self.table.name().to_string(),
                unknown,
            ));
        }

        let mut fragments = Vec::new();
        let mut index = 0usize;
        for (column, condition) in filters {
            match condition {
                JsonValue::Object(operators) => {
                    for (operator, operand) in operators {
                        if let Some(fragment) =
                            self.compile_predicate(column, operator, operand, index, sink)?
                        {
                            fragments.push(fragment);
                            index += 1;
                        }
                    }
                }
                // Scalar shorthand for equality
                scalar => {
                    if let Some(fragment) =
                        self.compile_predicate(column, "eq", scalar, index, sink)?
                    {
                        fragments.push(fragment);
                        index += 1;
                    }
                }
            }
        }

        Ok(CompiledFilter { fragments })
    }

    fn compile_predicate(
        &self,
        column: &str,
        operator: &str,
        operand: &JsonValue,
        index: usize,
        sink: &mut ParamSink,
    ) -> EngineResult<Option<String>> {
        let quoted = sink.dialect().quote_ident(column);
        let fragment = match operator {
            "eq" => {
                let placeholder = sink.bind(
                    format!("{}_eq_{}", column, index),
                    SqlValue::from_json(operand)?,
                );
                format!("{} = {}", quoted, placeholder)
            }
            "like" => {
                let pattern = format!("%{}%", SqlValue::as_pattern_text(operand)?);
                let placeholder =
                    sink.bind(format!("{}_like_{}", column, index), SqlValue::Text(pattern));
                format!("{} LIKE {}", quoted, placeholder)
            }
            "gt" | "lt" | "gte" | "lte" => {
                let comparator = match operator {
                    "gt" => ">",
                    "lt" => "<",
                    "gte" => ">=",
                    _ => "<=",
                };
                let placeholder = sink.bind(
                    format!("{}_{}_{}", column, operator, index),
                    SqlValue::from_json(operand)?,
                );
                format!("{} {} {}", quoted, comparator, placeholder)
            }
            "in" => {
                let JsonValue::Array(elements) = operand else {
                    return Err(EngineError::invalid_input(format!(
                        "'in' operand for column '{}' must be an array",
                        column
                    )));
                };
                if elements.is_empty() {
                    return Err(EngineError::invalid_input(format!(
                        "'in' operand for column '{}' must not be empty",
                        column
                    )));
                }
                let mut placeholders = Vec::with_capacity(elements.len());
                for (k, element) in elements.iter().enumerate() {
                    placeholders.push(sink.bind(
                        format!("{}_in_{}_{}", column, index, k),
                        SqlValue::from_json(element)?,
                    ));
                }
                format!("{} IN ({})", quoted, placeholders.join(", "))
            }
            unsupported => {
                // Closed operator set: anything else is skipped, never spliced
                warn!(
                    column = %column,
                    operator = %unsupported,
                    "Ignoring unsupported filter operator"
                );
                return Ok(None);
            }
        };
        Ok(Some(fragment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::introspect::{ColumnInfo, TableRef, ValidatedTable};
    use crate::sqlgen::Dialect;
    use serde_json::json;

    fn table() -> ValidatedTable {
        ValidatedTable::new(
            TableRef::parse("orders").unwrap(),
            vec![
                ColumnInfo::named("id", "INTEGER"),
                ColumnInfo::named("status", "TEXT"),
                ColumnInfo::named("total", "REAL"),
            ],
        )
    }

    fn compile(filters: JsonValue) -> (CompiledFilter, Vec<crate::sqlgen::BoundParam>) {
        let table = table();
        let compiler = FilterCompiler::new(&table);
        let mut sink = ParamSink::new(Dialect::SQLite);
        let filter = compiler
            .compile(filters.as_object().unwrap(), &mut sink)
            .unwrap();
        (filter, sink.into_params())
    }

    #[test]
    fn test_empty_filter_is_always_true() {
        let (filter, params) = compile(json!({}));
        assert_eq!(filter.predicate(), "1=1");
        assert!(params.is_empty());
    }

    #[test]
    fn test_scalar_is_eq_shorthand() {
        let (filter, params) = compile(json!({"status": "open"}));
        assert_eq!(filter.predicate(), "\"status\" = ?");
        assert_eq!(params[0].name, "status_eq_0");
        assert_eq!(params[0].value, SqlValue::Text("open".to_string()));
    }

    #[test]
    fn test_operator_object() {
        let (filter, params) = compile(json!({"total": {"gte": 10, "lt": 100}}));
        assert_eq!(filter.predicate(), "\"total\" >= ? AND \"total\" < ?");
        assert_eq!(params[0].name, "total_gte_0");
        assert_eq!(params[1].name, "total_lt_1");
    }

    #[test]
    fn test_like_wraps_pattern() {
        let (_, params) = compile(json!({"status": {"like": "pen"}}));
        assert_eq!(params[0].value, SqlValue::Text("%pen%".to_string()));
    }

    #[test]
    fn test_in_expands_one_placeholder_per_element() {
        let (filter, params) = compile(json!({"id": {"in": [1, 2, 3]}}));
        assert_eq!(filter.predicate(), "\"id\" IN (?, ?, ?)");
        assert_eq!(params.len(), 3);
        assert_eq!(params[0].name, "id_in_0_0");
        assert_eq!(params[1].name, "id_in_0_1");
        assert_eq!(params[2].name, "id_in_0_2");
    }

    #[test]
    fn test_in_rejects_non_array() {
        let table = table();
        let compiler = FilterCompiler::new(&table);
        let mut sink = ParamSink::new(Dialect::SQLite);
        let filters = json!({"id": {"in": 5}});
        let err = compiler
            .compile(filters.as_object().unwrap(), &mut sink)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput { .. }));
    }

    #[test]
    fn test_unknown_operator_is_skipped() {
        let (filter, params) = compile(json!({"status": {"regex": ".*", "eq": "open"}}));
        // "eq" sorts before "regex"; the unsupported operator leaves no trace
        assert_eq!(filter.predicate(), "\"status\" = ?");
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].name, "status_eq_0");
    }

    #[test]
    fn test_unknown_column_rejected_with_all_names() {
        let table = table();
        let compiler = FilterCompiler::new(&table);
        let mut sink = ParamSink::new(Dialect::SQLite);
        let filters = json!({"ghost": 1, "phantom": 2, "status": "x"});
        let err = compiler
            .compile(filters.as_object().unwrap(), &mut sink)
            .unwrap_err();
        match err {
            EngineError::InvalidIdentifier { names, .. } => {
                assert_eq!(names, vec!["ghost".to_string(), "phantom".to_string()]);
            }
            other => panic!("expected InvalidIdentifier, got {:?}", other),
        }
        // Nothing was bound before the rejection
        assert!(sink.is_empty());
    }

    #[test]
    fn test_deterministic_across_compilations() {
        let (a, params_a) = compile(json!({"status": "open", "total": {"gt": 5}}));
        let (b, params_b) = compile(json!({"status": "open", "total": {"gt": 5}}));
        assert_eq!(a.predicate(), b.predicate());
        assert_eq!(params_a, params_b);
    }

    #[test]
    fn test_postgres_placeholders_are_ordinal() {
        let table = table();
        let compiler = FilterCompiler::new(&table);
        let mut sink = ParamSink::new(Dialect::Postgres);
        let filters = json!({"id": {"in": [7, 8]}, "status": "open"});
        let filter = compiler
            .compile(filters.as_object().unwrap(), &mut sink)
            .unwrap();
        assert_eq!(
            filter.predicate(),
            "\"id\" IN ($1, $2) AND \"status\" = $3"
        );
    }
}
