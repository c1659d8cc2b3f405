//! Schema introspection and identifier allow-lists.
//!
//! Every tool call resolves its target table here first. The resulting
//! `ValidatedTable` carries the column allow-list that all identifier
//! validation runs against; nothing reaches the SQL layer unvalidated.

use crate::db::provider::DbPool;
use crate::error::{EngineError, EngineResult};
use crate::sqlgen::{Dialect, is_safe_ident};
use serde::Serialize;
use sqlx::Row;
use tracing::debug;

/// A `schema.name` table reference. The schema part is optional; both parts
/// pass the lexical identifier check at parse time, before any catalog
/// access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub schema: Option<String>,
    pub name: String,
}

impl TableRef {
    /// Split on the first dot and lexically validate both parts.
    pub fn parse(raw: &str) -> EngineResult<Self> {
        let (schema, name) = match raw.split_once('.') {
            Some((schema, name)) => (Some(schema), name),
            None => (None, raw),
        };
        let mut bad = Vec::new();
        if let Some(s) = schema {
            if !is_safe_ident(s) {
                bad.push(s.to_string());
            }
        }
        if !is_safe_ident(name) {
            bad.push(name.to_string());
        }
        if !bad.is_empty() {
            return Err(EngineError::invalid_identifier(raw.to_string(), bad));
        }
        Ok(Self {
            schema: schema.map(String::from),
            name: name.to_string(),
        })
    }

    /// Quoted, schema-qualified form for splicing into SQL.
    pub fn qualified(&self, dialect: Dialect) -> String {
        match &self.schema {
            Some(schema) => format!(
                "{}.{}",
                dialect.quote_ident(schema),
                dialect.quote_ident(&self.name)
            ),
            None => dialect.quote_ident(&self.name),
        }
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// One table entry from the catalog listing.
#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct TableEntry {
    /// Schema the table lives in, when the backend has schemas.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    /// Table name.
    pub name: String,
}

impl TableEntry {
    /// The `schema.name` form accepted by the other tools.
    pub fn full_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", schema, self.name),
            None => self.name.clone(),
        }
    }
}

/// Column metadata from the catalog.
#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,
    /// Declared type as reported by the backend.
    pub data_type: String,
    /// Whether NULL is allowed.
    pub nullable: bool,
    /// Default expression, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// Character length limit for text columns, if declared.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<i64>,
}

impl ColumnInfo {
    /// Minimal constructor, mostly useful in tests.
    pub fn named(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            default: None,
            max_length: None,
        }
    }
}

/// A table reference plus its column allow-list.
#[derive(Debug, Clone)]
pub struct ValidatedTable {
    table: TableRef,
    columns: Vec<ColumnInfo>,
}

impl ValidatedTable {
    pub fn new(table: TableRef, columns: Vec<ColumnInfo>) -> Self {
        Self { table, columns }
    }

    /// The unquoted `schema.name` form, for messages.
    pub fn name(&self) -> String {
        self.table.to_string()
    }

    /// Quoted form for SQL text.
    pub fn qualified(&self, dialect: Dialect) -> String {
        self.table.qualified(dialect)
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Check a batch of column names, reporting every unknown one at once.
    pub fn require_columns<'a, I>(&self, names: I) -> EngineResult<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let unknown: Vec<String> = names
            .into_iter()
            .filter(|name| !self.has_column(name))
            .map(String::from)
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(EngineError::invalid_identifier(self.name(), unknown))
        }
    }
}

/// Reads table and column metadata from the backend catalog.
pub struct SchemaIntrospector;

impl SchemaIntrospector {
    pub fn new() -> Self {
        Self
    }

    /// List base tables, ordered by schema then name.
    pub async fn list_tables(&self, pool: &DbPool) -> EngineResult<Vec<TableEntry>> {
        let entries = match pool {
            DbPool::Postgres(p) => {
                let rows = sqlx::query(queries::postgres::LIST_TABLES)
                    .fetch_all(p)
                    .await?;
                rows.iter()
                    .map(|row| {
                        Ok(TableEntry {
                            schema: Some(row.try_get::<String, _>(0)?),
                            name: row.try_get::<String, _>(1)?,
                        })
                    })
                    .collect::<Result<Vec<_>, sqlx::Error>>()?
            }
            DbPool::MySql(p) => {
                let rows = sqlx::query(queries::mysql::LIST_TABLES)
                    .fetch_all(p)
                    .await?;
                rows.iter()
                    .map(|row| {
                        Ok(TableEntry {
                            schema: None,
                            name: row.try_get::<String, _>(0)?,
                        })
                    })
                    .collect::<Result<Vec<_>, sqlx::Error>>()?
            }
            DbPool::SQLite(p) => {
                let rows = sqlx::query(queries::sqlite::LIST_TABLES)
                    .fetch_all(p)
                    .await?;
                rows.iter()
                    .map(|row| {
                        Ok(TableEntry {
                            schema: None,
                            name: row.try_get::<String, _>(0)?,
                        })
                    })
                    .collect::<Result<Vec<_>, sqlx::Error>>()?
            }
        };
        debug!(count = entries.len(), "Listed tables");
        Ok(entries)
    }

    /// Column metadata for one table, in declaration order. Empty when the
    /// table does not exist.
    pub async fn table_columns(
        &self,
        pool: &DbPool,
        table: &TableRef,
    ) -> EngineResult<Vec<ColumnInfo>> {
        match pool {
            DbPool::Postgres(p) => {
                let rows = sqlx::query(queries::postgres::TABLE_COLUMNS)
                    .bind(&table.name)
                    .bind(table.schema.as_deref())
                    .fetch_all(p)
                    .await?;
                rows.iter()
                    .map(|row| {
                        Ok(ColumnInfo {
                            name: row.try_get(0)?,
                            data_type: row.try_get(1)?,
                            nullable: row.try_get::<String, _>(2)? == "YES",
                            default: row.try_get(3)?,
                            max_length: row.try_get::<Option<i32>, _>(4)?.map(i64::from),
                        })
                    })
                    .collect::<Result<Vec<_>, sqlx::Error>>()
                    .map_err(EngineError::from)
            }
            DbPool::MySql(p) => {
                let rows = sqlx::query(queries::mysql::TABLE_COLUMNS)
                    .bind(&table.name)
                    .bind(table.schema.as_deref())
                    .fetch_all(p)
                    .await?;
                rows.iter()
                    .map(|row| {
                        Ok(ColumnInfo {
                            name: row.try_get(0)?,
                            data_type: row.try_get(1)?,
                            nullable: row.try_get::<String, _>(2)? == "YES",
                            default: row.try_get(3)?,
                            max_length: row.try_get(4)?,
                        })
                    })
                    .collect::<Result<Vec<_>, sqlx::Error>>()
                    .map_err(EngineError::from)
            }
            DbPool::SQLite(p) => {
                // PRAGMA takes no bind parameters; the name passed the
                // lexical check in TableRef::parse and is quoted here.
                let sql = format!(
                    "PRAGMA table_info({})",
                    Dialect::SQLite.quote_ident(&table.name)
                );
                let rows = sqlx::query(&sql).fetch_all(p).await?;
                rows.iter()
                    .map(|row| {
                        Ok(ColumnInfo {
                            name: row.try_get("name")?,
                            data_type: row.try_get("type")?,
                            nullable: row.try_get::<i64, _>("notnull")? == 0,
                            default: row.try_get("dflt_value")?,
                            max_length: None,
                        })
                    })
                    .collect::<Result<Vec<_>, sqlx::Error>>()
                    .map_err(EngineError::from)
            }
        }
    }

    /// Parse, look up and validate a table in one step. This is the fail-fast
    /// gate every tool goes through before compiling SQL.
    pub async fn resolve_table(&self, pool: &DbPool, raw: &str) -> EngineResult<ValidatedTable> {
        let table = TableRef::parse(raw)?;
        let columns = self.table_columns(pool, &table).await?;
        if columns.is_empty() {
            return Err(EngineError::schema("Table not found", table.to_string()));
        }
        Ok(ValidatedTable::new(table, columns))
    }
}

impl Default for SchemaIntrospector {
    fn default() -> Self {
        Self::new()
    }
}

/// Catalog queries per backend.
mod queries {
    pub mod postgres {
        pub const LIST_TABLES: &str = "\
            SELECT table_schema, table_name \
            FROM information_schema.tables \
            WHERE table_type = 'BASE TABLE' \
              AND table_schema NOT IN ('pg_catalog', 'information_schema') \
            ORDER BY table_schema, table_name";

        pub const TABLE_COLUMNS: &str = "\
            SELECT column_name, data_type, is_nullable, column_default, \
                   character_maximum_length \
            FROM information_schema.columns \
            WHERE table_name = $1 \
              AND table_schema = COALESCE($2, 'public') \
            ORDER BY ordinal_position";
    }

    pub mod mysql {
        pub const LIST_TABLES: &str = "\
            SELECT table_name \
            FROM information_schema.tables \
            WHERE table_type = 'BASE TABLE' \
              AND table_schema = DATABASE() \
            ORDER BY table_name";

        // information_schema values come back as binary strings on some
        // MySQL versions; CAST keeps the decode predictable.
        pub const TABLE_COLUMNS: &str = "\
            SELECT CAST(column_name AS CHAR), CAST(data_type AS CHAR), \
                   CAST(is_nullable AS CHAR), CAST(column_default AS CHAR), \
                   CAST(character_maximum_length AS SIGNED) \
            FROM information_schema.columns \
            WHERE table_name = ? \
              AND table_schema = COALESCE(?, DATABASE()) \
            ORDER BY ordinal_position";
    }

    pub mod sqlite {
        pub const LIST_TABLES: &str = "\
            SELECT name FROM sqlite_master \
            WHERE type = 'table' AND name NOT LIKE 'sqlite_%' \
            ORDER BY name";
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_ref_plain() {
        let t = TableRef::parse("orders").unwrap();
        assert_eq!(t.schema, None);
        assert_eq!(t.name, "orders");
        assert_eq!(t.to_string(), "orders");
    }

    #[test]
    fn test_table_ref_schema_qualified() {
        let t = TableRef::parse("sales.orders").unwrap();
        assert_eq!(t.schema.as_deref(), Some("sales"));
        assert_eq!(t.name, "orders");
        assert_eq!(t.qualified(Dialect::Postgres), "\"sales\".\"orders\"");
        assert_eq!(t.qualified(Dialect::MySql), "`sales`.`orders`");
    }

    #[test]
    fn test_table_ref_splits_on_first_dot_only() {
        // Second dot lands in the name part and fails the lexical check
        assert!(TableRef::parse("a.b.c").is_err());
    }

    #[test]
    fn test_table_ref_rejects_unsafe_names() {
        assert!(TableRef::parse("orders; DROP TABLE x").is_err());
        assert!(TableRef::parse("bad schema.orders").is_err());
        assert!(TableRef::parse("").is_err());
    }

    #[test]
    fn test_validated_table_require_columns() {
        let table = ValidatedTable::new(
            TableRef::parse("t").unwrap(),
            vec![ColumnInfo::named("a", "INT"), ColumnInfo::named("b", "TEXT")],
        );
        assert!(table.require_columns(["a", "b"]).is_ok());
        let err = table.require_columns(["a", "x", "y"]).unwrap_err();
        match err {
            EngineError::InvalidIdentifier { names, .. } => {
                assert_eq!(names, vec!["x".to_string(), "y".to_string()]);
            }
            other => panic!("expected InvalidIdentifier, got {:?}", other),
        }
    }

    #[test]
    fn test_table_entry_full_name() {
        let entry = TableEntry {
            schema: Some("sales".to_string()),
            name: "orders".to_string(),
        };
        assert_eq!(entry.full_name(), "sales.orders");
        let plain = TableEntry {
            schema: None,
            name: "orders".to_string(),
        };
        assert_eq!(plain.full_name(), "orders");
    }
}
