//! SQLKit MCP Server Library
//!
//! This library provides MCP (Model Context Protocol) tools for AI assistants
//! to query and modify one SQL database (SQLite, PostgreSQL, MySQL) through
//! structured, validated arguments instead of raw SQL.

pub mod auth;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod mcp;
pub mod models;
pub mod sqlgen;
pub mod tools;
pub mod transport;

pub use config::Config;
pub use error::EngineError;
pub use mcp::SqlkitService;
