//! Database access layer.
//!
//! - Lazy single-handle connection provider
//! - Statement execution with per-call timeouts
//! - Schema introspection and identifier allow-lists
//! - Row-to-JSON type mappings
//! - Access-token credential handling

pub mod executor;
pub mod introspect;
pub mod provider;
pub mod token;
pub mod types;

pub use executor::StatementExecutor;
pub use introspect::{ColumnInfo, SchemaIntrospector, TableEntry, TableRef, ValidatedTable};
pub use provider::{ConnectionProvider, ConnectionTarget, DbPool};
pub use token::{AccessToken, TokenSource};

use serde::Serialize;

/// Database backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    MySql,
    Postgres,
    SQLite,
}

impl DatabaseType {
    /// Determine the backend from a connection URL scheme.
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "mysql" | "mariadb" => Some(Self::MySql),
            "postgres" | "postgresql" => Some(Self::Postgres),
            "sqlite" => Some(Self::SQLite),
            _ => None,
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MySql => write!(f, "mysql"),
            Self::Postgres => write!(f, "postgresql"),
            Self::SQLite => write!(f, "sqlite"),
        }
    }
}
