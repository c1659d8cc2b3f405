//! Configuration handling for the SQLKit MCP Server.
//!
//! This module provides configuration management via CLI arguments and
//! environment variables. The server serves exactly one database; its URL
//! and authentication mode are fixed at startup while the connection itself
//! is established lazily on first use.

use crate::db::provider::{AuthSpec, ConnectionTarget};
use crate::db::token::TokenSource;
use crate::error::{EngineError, EngineResult};
use crate::models::DEFAULT_QUERY_TIMEOUT_SECS;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_MCP_ENDPOINT: &str = "/";
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_TOKEN_ENV: &str = "MCP_ACCESS_TOKEN";

/// Transport mode for the MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum TransportMode {
    /// Standard input/output (for CLI integration)
    #[default]
    Stdio,
    /// Streamable HTTP (for web clients)
    Http,
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::Http => write!(f, "http"),
        }
    }
}

/// How the database connection authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum AuthMode {
    /// Credentials, if any, come from the connection URL.
    #[default]
    Trusted,
    /// An access token fetched at connect time replaces the URL password.
    AccessToken,
}

impl std::fmt::Display for AuthMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trusted => write!(f, "trusted"),
            Self::AccessToken => write!(f, "access-token"),
        }
    }
}

/// Configuration for the SQLKit MCP Server.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "sqlkit-mcp-server",
    about = "MCP server exposing structured SQL tools over one database",
    version,
    author
)]
pub struct Config {
    /// Database connection URL (mysql://, postgres:// or sqlite:).
    /// The connection is established lazily on the first tool call.
    #[arg(short = 'd', long = "database", value_name = "URL", env = "MCP_DATABASE")]
    pub database: String,

    /// Database authentication mode
    #[arg(long, value_enum, default_value = "trusted", env = "MCP_AUTH_MODE")]
    pub auth_mode: AuthMode,

    /// Environment variable holding the access token (access-token mode)
    #[arg(long, value_name = "VAR", default_value = DEFAULT_TOKEN_ENV, env = "MCP_TOKEN_ENV")]
    pub token_env: String,

    /// File holding the access token (access-token mode; takes precedence
    /// over --token-env)
    #[arg(long, value_name = "PATH", env = "MCP_TOKEN_FILE")]
    pub token_file: Option<PathBuf>,

    /// Transport mode (stdio or http)
    #[arg(short, long, value_enum, default_value = "stdio", env = "MCP_TRANSPORT")]
    pub transport: TransportMode,

    /// HTTP host to bind to (only used with http transport)
    #[arg(long, default_value = DEFAULT_HTTP_HOST, env = "MCP_HTTP_HOST")]
    pub http_host: String,

    /// HTTP port to bind to (only used with http transport)
    #[arg(long, default_value_t = DEFAULT_HTTP_PORT, env = "MCP_HTTP_PORT")]
    pub http_port: u16,

    /// MCP endpoint path (only used with http transport)
    #[arg(long, default_value = DEFAULT_MCP_ENDPOINT, env = "MCP_ENDPOINT")]
    pub mcp_endpoint: String,

    /// Default query timeout in seconds; individual calls may override it
    #[arg(long, default_value_t = DEFAULT_QUERY_TIMEOUT_SECS, env = "MCP_QUERY_TIMEOUT")]
    pub query_timeout: u64,

    /// Connection acquire timeout in seconds
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS, env = "MCP_CONNECT_TIMEOUT")]
    pub connect_timeout: u64,

    /// Maximum connections in the pool
    #[arg(long, default_value_t = DEFAULT_MAX_CONNECTIONS, env = "MCP_MAX_CONNECTIONS")]
    pub max_connections: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "MCP_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "MCP_JSON_LOGS")]
    pub json_logs: bool,

    /// Enable logging output (disabled by default to avoid interfering with
    /// stdio transport)
    #[arg(long, env = "MCP_ENABLE_LOGS")]
    pub enable_logs: bool,

    /// Authentication tokens for HTTP transport.
    /// Can be specified multiple times or as comma-separated values.
    /// When set, all HTTP requests must include a valid Bearer token.
    #[arg(
        long = "auth-token",
        value_name = "TOKEN",
        env = "MCP_AUTH_TOKENS",
        value_delimiter = ','
    )]
    pub auth_tokens: Vec<String>,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            database: String::new(),
            auth_mode: AuthMode::Trusted,
            token_env: DEFAULT_TOKEN_ENV.to_string(),
            token_file: None,
            transport: TransportMode::Stdio,
            http_host: DEFAULT_HTTP_HOST.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            mcp_endpoint: DEFAULT_MCP_ENDPOINT.to_string(),
            query_timeout: DEFAULT_QUERY_TIMEOUT_SECS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_SECS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            log_level: "info".to_string(),
            json_logs: false,
            enable_logs: false,
            auth_tokens: Vec::new(),
        }
    }

    /// Build the connection target from the configured URL and auth mode.
    pub fn connection_target(&self) -> EngineResult<ConnectionTarget> {
        if self.database.trim().is_empty() {
            return Err(EngineError::configuration(
                "No database configured",
                "Pass --database <URL> or set MCP_DATABASE",
            ));
        }
        let auth = match self.auth_mode {
            AuthMode::Trusted => AuthSpec::Trusted,
            AuthMode::AccessToken => {
                let source = match &self.token_file {
                    Some(path) => TokenSource::File(path.clone()),
                    None => TokenSource::Env(self.token_env.clone()),
                };
                AuthSpec::AccessToken(source)
            }
        };
        ConnectionTarget::from_url(
            self.database.clone(),
            auth,
            self.max_connections,
            self.connect_timeout_duration(),
        )
    }

    /// Get the HTTP bind address.
    pub fn http_bind_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }

    /// Get the query timeout as a Duration.
    pub fn query_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.query_timeout)
    }

    /// Get the connection timeout as a Duration.
    pub fn connect_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DatabaseType;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.transport, TransportMode::Stdio);
        assert_eq!(config.auth_mode, AuthMode::Trusted);
        assert_eq!(config.http_host, DEFAULT_HTTP_HOST);
        assert_eq!(config.http_port, DEFAULT_HTTP_PORT);
        // Shares the executor's default so the two cannot drift apart
        assert_eq!(config.query_timeout, DEFAULT_QUERY_TIMEOUT_SECS);
    }

    #[test]
    fn test_http_bind_addr() {
        let config = Config {
            http_host: "0.0.0.0".to_string(),
            http_port: 3000,
            ..Config::default()
        };
        assert_eq!(config.http_bind_addr(), "0.0.0.0:3000");
    }

    #[test]
    fn test_timeout_durations() {
        let config = Config {
            query_timeout: 60,
            connect_timeout: 15,
            ..Config::default()
        };
        assert_eq!(config.query_timeout_duration(), Duration::from_secs(60));
        assert_eq!(config.connect_timeout_duration(), Duration::from_secs(15));
    }

    #[test]
    fn test_connection_target_trusted() {
        let config = Config {
            database: "postgres://u:p@localhost/db".to_string(),
            ..Config::default()
        };
        let target = config.connection_target().unwrap();
        assert_eq!(target.db_type, DatabaseType::Postgres);
        assert!(matches!(target.auth, AuthSpec::Trusted));
    }

    #[test]
    fn test_connection_target_requires_database() {
        let config = Config::default();
        let err = config.connection_target().unwrap_err();
        assert!(matches!(err, EngineError::Configuration { .. }));
    }

    #[test]
    fn test_connection_target_token_file_wins_over_env() {
        let config = Config {
            database: "mysql://u@localhost/db".to_string(),
            auth_mode: AuthMode::AccessToken,
            token_file: Some(PathBuf::from("/run/secrets/token")),
            ..Config::default()
        };
        let target = config.connection_target().unwrap();
        assert!(matches!(
            target.auth,
            AuthSpec::AccessToken(TokenSource::File(_))
        ));
    }

    #[test]
    fn test_connection_target_token_env_default() {
        let config = Config {
            database: "mysql://u@localhost/db".to_string(),
            auth_mode: AuthMode::AccessToken,
            ..Config::default()
        };
        let target = config.connection_target().unwrap();
        match target.auth {
            AuthSpec::AccessToken(TokenSource::Env(var)) => {
                assert_eq!(var, DEFAULT_TOKEN_ENV);
            }
            other => panic!("expected env token source, got {:?}", other),
        }
    }

    #[test]
    fn test_connection_target_rejects_token_auth_for_sqlite() {
        let config = Config {
            database: "sqlite:data.db".to_string(),
            auth_mode: AuthMode::AccessToken,
            ..Config::default()
        };
        assert!(config.connection_target().is_err());
    }
}
