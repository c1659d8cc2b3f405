//! HTTP transport with Streamable HTTP support for the MCP server.
//!
//! This transport uses HTTP with SSE streaming responses,
//! which is suitable for web-based MCP integrations. When Bearer tokens are
//! configured, every request passes through the auth middleware first.

use crate::auth::{AuthConfig, auth_middleware};
use crate::db::executor::StatementExecutor;
use crate::db::provider::ConnectionProvider;
use crate::error::{EngineError, EngineResult};
use crate::mcp::SqlkitService;
use crate::transport::Transport;
use rmcp::transport::streamable_http_server::{
    StreamableHttpService, session::local::LocalSessionManager,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

/// HTTP transport implementation with Streamable HTTP support.
///
/// This transport provides:
/// - HTTP endpoints for MCP protocol messages
/// - Server-Sent Events for streaming responses
/// - Session management for stateful connections
/// - Optional Bearer token authentication
pub struct HttpTransport {
    provider: Arc<ConnectionProvider>,
    executor: StatementExecutor,
    auth: Arc<AuthConfig>,
    /// Host to bind to
    host: String,
    /// Port to bind to
    port: u16,
    /// MCP endpoint path
    endpoint: String,
}

impl HttpTransport {
    pub fn new(
        provider: Arc<ConnectionProvider>,
        executor: StatementExecutor,
        auth: AuthConfig,
        host: impl Into<String>,
        port: u16,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            executor,
            auth: Arc::new(auth),
            host: host.into(),
            port,
            endpoint: endpoint.into(),
        }
    }

    /// Get the bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Get the MCP endpoint path.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Transport for HttpTransport {
    async fn run(&self) -> EngineResult<()> {
        let bind_addr = self.bind_addr();
        info!("Starting MCP server with HTTP transport on {}", bind_addr);

        // Clone Arc references for the service factory closure
        let provider = self.provider.clone();
        let executor = self.executor;

        let service = StreamableHttpService::new(
            move || Ok(SqlkitService::new(provider.clone(), executor)),
            LocalSessionManager::default().into(),
            Default::default(),
        );

        // Build the axum router with configurable endpoint
        // Note: nest_service doesn't support root path "/", use fallback_service instead
        let mut app = if self.endpoint == "/" {
            axum::Router::new().fallback_service(service)
        } else {
            axum::Router::new().nest_service(&self.endpoint, service)
        };

        if self.auth.is_enabled() {
            info!(tokens = self.auth.token_count(), "Bearer authentication enabled");
            app = app.layer(axum::middleware::from_fn_with_state(
                self.auth.clone(),
                auth_middleware,
            ));
        }

        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            EngineError::connection(
                format!("Failed to bind to {}: {}", bind_addr, e),
                "Check that the port is available",
            )
        })?;

        info!(endpoint = %self.endpoint, "MCP endpoint ready");

        // Graceful shutdown: SSE connections may keep the server alive indefinitely,
        // so we force exit after a timeout once shutdown signal is received
        const GRACEFUL_TIMEOUT: Duration = Duration::from_secs(30);

        let shutdown_notify = Arc::new(tokio::sync::Notify::new());
        let shutdown_notify_clone = shutdown_notify.clone();

        let shutdown_signal = async move {
            wait_for_signal().await;
            shutdown_notify_clone.notify_one();
        };

        let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal);

        // Race between: server completing normally vs forced timeout/second signal after shutdown
        tokio::select! {
            result = server => {
                match result {
                    Ok(()) => info!("HTTP server stopped"),
                    Err(e) => {
                        error!(error = %e, "HTTP server error");
                        return Err(EngineError::internal(format!(
                            "HTTP server error: {}",
                            e
                        )));
                    }
                }
            }
            _ = async {
                // Wait for shutdown signal, then wait for either timeout or second signal
                shutdown_notify.notified().await;
                info!(
                    timeout_secs = GRACEFUL_TIMEOUT.as_secs(),
                    "Waiting for connections to close (send signal again to force exit)..."
                );

                tokio::select! {
                    _ = tokio::time::sleep(GRACEFUL_TIMEOUT) => {
                        warn!("Graceful shutdown timeout, forcing exit");
                    }
                    _ = wait_for_signal() => {
                        warn!("Received second signal, forcing immediate exit");
                    }
                }
            } => {
                // Timeout or second signal reached - server will be dropped
            }
        }

        info!("Closing database connection");
        self.provider.close().await;

        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_signal() {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::provider::{AuthSpec, ConnectionTarget};

    fn transport(host: &str, port: u16, endpoint: &str) -> HttpTransport {
        let target = ConnectionTarget::from_url(
            "sqlite::memory:",
            AuthSpec::Trusted,
            1,
            Duration::from_secs(5),
        )
        .unwrap();
        HttpTransport::new(
            Arc::new(ConnectionProvider::new(target)),
            StatementExecutor::new(),
            AuthConfig::disabled(),
            host,
            port,
            endpoint,
        )
    }

    #[test]
    fn test_http_transport_creation() {
        let t = transport("127.0.0.1", 8080, "/mcp");
        assert_eq!(t.name(), "http");
        assert_eq!(t.bind_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_http_transport_bind_addr() {
        let t = transport("0.0.0.0", 3000, "/api/mcp");
        assert_eq!(t.bind_addr(), "0.0.0.0:3000");
    }

    #[test]
    fn test_http_transport_custom_endpoint() {
        let t = transport("127.0.0.1", 8080, "/custom/path");
        assert_eq!(t.endpoint(), "/custom/path");
    }

    #[test]
    fn test_http_transport_root_endpoint() {
        let t = transport("127.0.0.1", 8080, "/");
        assert_eq!(t.endpoint(), "/");
    }
}
