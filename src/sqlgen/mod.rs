//! SQL generation.
//!
//! Callers never supply SQL text. Tool arguments are compiled into
//! parameterized statements here: identifiers are validated against the
//! table's column allow-list and spliced quoted, values are always bound.

pub mod builder;
pub mod filter;
pub mod value;

pub use builder::{
    AggregateFunc, AggregateSpec, OrderSpec, PageSpec, QueryBuilder, Statement, UpdatePair,
};
pub use filter::{CompiledFilter, FilterCompiler};
pub use value::{BoundParam, ParamSink, SqlValue};

use crate::db::DatabaseType;

/// Differences in SQL text between the supported backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    MySql,
    Postgres,
    SQLite,
}

impl Dialect {
    /// Positional placeholder for the given 1-based ordinal.
    pub fn placeholder(&self, ordinal: usize) -> String {
        match self {
            Dialect::Postgres => format!("${}", ordinal),
            Dialect::MySql | Dialect::SQLite => "?".to_string(),
        }
    }

    /// Quote an already-validated identifier.
    pub fn quote_ident(&self, ident: &str) -> String {
        match self {
            Dialect::MySql => format!("`{}`", ident),
            Dialect::Postgres | Dialect::SQLite => format!("\"{}\"", ident),
        }
    }

    /// Cast an expression to the backend's float type (AVG over integer
    /// columns truncates on MySQL/SQLite otherwise).
    pub fn cast_to_float(&self, expr: &str) -> String {
        match self {
            Dialect::MySql => format!("CAST({} AS DOUBLE)", expr),
            Dialect::Postgres => format!("CAST({} AS DOUBLE PRECISION)", expr),
            Dialect::SQLite => format!("CAST({} AS REAL)", expr),
        }
    }
}

impl From<DatabaseType> for Dialect {
    fn from(db_type: DatabaseType) -> Self {
        match db_type {
            DatabaseType::MySql => Dialect::MySql,
            DatabaseType::Postgres => Dialect::Postgres,
            DatabaseType::SQLite => Dialect::SQLite,
        }
    }
}

/// Lexical identifier check applied before any catalog or schema lookup.
/// ASCII letters, digits and underscore; must not start with a digit.
pub fn is_safe_ident(ident: &str) -> bool {
    let mut chars = ident.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
