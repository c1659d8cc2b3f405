//! MCP service implementation using rmcp.
//!
//! This module defines the SqlkitService struct with all tools exposed via
//! the MCP protocol using the rmcp framework's macros. Every tool builds
//! its SQL from structured arguments; raw SQL is never accepted.

use crate::db::executor::StatementExecutor;
use crate::db::provider::ConnectionProvider;
use crate::tools::analyze::{
    AggregateRowsInput, AggregateRowsOutput, AnalyzeToolHandler, ProfileTableInput,
    ProfileTableOutput, SuggestQueriesInput, SuggestQueriesOutput,
};
use crate::tools::batch::{
    BatchInsertInput, BatchInsertOutput, BatchToolHandler, BulkUpdateInput, BulkUpdateOutput,
};
use crate::tools::query::{
    QueryToolHandler, RangeSearchInput, RangeSearchOutput, SearchRowsInput, SearchRowsOutput,
};
use crate::tools::schema::{
    DescribeTableInput, DescribeTableOutput, ListTablesInput, ListTablesOutput, SampleRowsInput,
    SampleRowsOutput, SchemaToolHandler,
};
use crate::tools::write::{
    InsertRowInput, InsertRowOutput, UpdateRowsInput, UpdateRowsOutput, WriteToolHandler,
};
use rmcp::Json;
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::{Implementation, ProtocolVersion, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct SqlkitService {
    /// Shared lazy connection provider for all tools
    provider: Arc<ConnectionProvider>,
    /// Executor carrying the configured default timeout
    executor: StatementExecutor,
    /// Tool router for MCP tool dispatch (auto-generated)
    tool_router: ToolRouter<Self>,
}

impl SqlkitService {
    pub fn new(provider: Arc<ConnectionProvider>, executor: StatementExecutor) -> Self {
        Self {
            provider,
            executor,
            tool_router: Self::tool_router(),
        }
    }

    fn schema_handler(&self) -> SchemaToolHandler {
        SchemaToolHandler::new(self.provider.clone(), self.executor)
    }

    fn query_handler(&self) -> QueryToolHandler {
        QueryToolHandler::new(self.provider.clone(), self.executor)
    }

    fn write_handler(&self) -> WriteToolHandler {
        WriteToolHandler::new(self.provider.clone(), self.executor)
    }

    fn batch_handler(&self) -> BatchToolHandler {
        BatchToolHandler::new(self.provider.clone(), self.executor)
    }

    fn analyze_handler(&self) -> AnalyzeToolHandler {
        AnalyzeToolHandler::new(self.provider.clone(), self.executor)
    }
}

#[tool_router]
impl SqlkitService {
    #[tool(
        description = "List all base tables in the connected database.\nReturns schema-qualified names usable with the other tools."
    )]
    async fn list_tables(
        &self,
        Parameters(input): Parameters<ListTablesInput>,
    ) -> Result<Json<ListTablesOutput>, McpError> {
        self.schema_handler()
            .list_tables(input)
            .await
            .map(Json)
            .map_err(McpError::from)
    }

    #[tool(
        description = "Get column metadata for a table.\nReturns name, declared type, nullability, default and length limit per column."
    )]
    async fn describe_table(
        &self,
        Parameters(input): Parameters<DescribeTableInput>,
    ) -> Result<Json<DescribeTableOutput>, McpError> {
        self.schema_handler()
            .describe_table(input)
            .await
            .map(Json)
            .map_err(McpError::from)
    }

    #[tool(
        description = "Fetch a few example rows from a table.\nDefault 5 rows, max 100. Useful for understanding the data before querying."
    )]
    async fn sample_rows(
        &self,
        Parameters(input): Parameters<SampleRowsInput>,
    ) -> Result<Json<SampleRowsOutput>, McpError> {
        self.schema_handler()
            .sample_rows(input)
            .await
            .map(Json)
            .map_err(McpError::from)
    }

    #[tool(
        description = "Search rows with structured filters and pagination.\nFilters: scalar means equality, `{\"op\": value}` selects eq/like/gt/lt/gte/lte/in.\nAll values are bound as parameters; identifiers are checked against the table's columns.\nSet count_total for exact totals at the cost of an extra COUNT query."
    )]
    async fn search_rows(
        &self,
        Parameters(input): Parameters<SearchRowsInput>,
    ) -> Result<Json<SearchRowsOutput>, McpError> {
        self.query_handler()
            .search_rows(input)
            .await
            .map(Json)
            .map_err(McpError::from)
    }

    #[tool(
        description = "Fetch rows where a column falls in an inclusive range (BETWEEN).\nExtra filters are ANDed with the range. Results are ordered by the range column.\nDefault 50 rows, max 200."
    )]
    async fn range_search(
        &self,
        Parameters(input): Parameters<RangeSearchInput>,
    ) -> Result<Json<RangeSearchOutput>, McpError> {
        self.query_handler()
            .range_search(input)
            .await
            .map(Json)
            .map_err(McpError::from)
    }

    #[tool(
        description = "Run grouped aggregates over a table.\nSupported functions: count, count_distinct, sum, avg, min, max.\nOptional group_by, filters, having_gt (alias > threshold) and ordering.\nDefault 100 groups, max 1000."
    )]
    async fn aggregate_rows(
        &self,
        Parameters(input): Parameters<AggregateRowsInput>,
    ) -> Result<Json<AggregateRowsOutput>, McpError> {
        self.analyze_handler()
            .aggregate_rows(input)
            .await
            .map(Json)
            .map_err(McpError::from)
    }

    #[tool(
        description = "Insert a single row.\nColumn names are validated against the table; values are always bound.\nSet validate_only to check the row without writing."
    )]
    async fn insert_row(
        &self,
        Parameters(input): Parameters<InsertRowInput>,
    ) -> Result<Json<InsertRowOutput>, McpError> {
        self.write_handler()
            .insert_row(input)
            .await
            .map(Json)
            .map_err(McpError::from)
    }

    #[tool(
        description = "Update rows matching a filter, with a mandatory preview.\nThe filter must not be empty. Matching rows are counted and sampled first;\nwhen nothing matches, or validate_only is set, the UPDATE is skipped."
    )]
    async fn update_rows(
        &self,
        Parameters(input): Parameters<UpdateRowsInput>,
    ) -> Result<Json<UpdateRowsOutput>, McpError> {
        self.write_handler()
            .update_rows(input)
            .await
            .map(Json)
            .map_err(McpError::from)
    }

    #[tool(
        description = "Insert many rows in committed chunks.\nEach chunk is one transaction; a failed chunk is rolled back and reported\nwhile the remaining chunks continue. Default chunk 100 rows, max 1000."
    )]
    async fn batch_insert(
        &self,
        Parameters(input): Parameters<BatchInsertInput>,
    ) -> Result<Json<BatchInsertOutput>, McpError> {
        self.batch_handler()
            .batch_insert(input)
            .await
            .map(Json)
            .map_err(McpError::from)
    }

    #[tool(
        description = "Apply several update rules in one unit of work.\nEach rule is `{where, set, description?}`. Failed rules are captured\nindividually; the successful ones commit together."
    )]
    async fn bulk_update(
        &self,
        Parameters(input): Parameters<BulkUpdateInput>,
    ) -> Result<Json<BulkUpdateOutput>, McpError> {
        self.batch_handler()
            .bulk_update(input)
            .await
            .map(Json)
            .map_err(McpError::from)
    }

    #[tool(
        description = "Profile table columns: null/distinct counts, min/max/avg for numeric\ncolumns, length statistics for text columns, plus the five most frequent\nvalues per column. Restrict with `columns` to profile a subset."
    )]
    async fn profile_table(
        &self,
        Parameters(input): Parameters<ProfileTableInput>,
    ) -> Result<Json<ProfileTableOutput>, McpError> {
        self.analyze_handler()
            .profile_table(input)
            .await
            .map(Json)
            .map_err(McpError::from)
    }

    #[tool(
        description = "Suggest tool invocations for a free-text question.\nReturns structured `{tool, arguments}` pairs ready to run, based on the\nquestion and the table's columns."
    )]
    async fn suggest_queries(
        &self,
        Parameters(input): Parameters<SuggestQueriesInput>,
    ) -> Result<Json<SuggestQueriesOutput>, McpError> {
        self.analyze_handler()
            .suggest_queries(input)
            .await
            .map(Json)
            .map_err(McpError::from)
    }
}

#[tool_handler]
impl ServerHandler for SqlkitService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_03_26,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "sqlkit-mcp-server".to_owned(),
                title: Some("SQLKit MCP Server".to_owned()),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Structured SQL tools over a single configured database.\n\
                \n\
                ## Workflow\n\
                1. Call `list_tables` to see what is available\n\
                2. Call `describe_table` or `sample_rows` to learn a table's shape\n\
                3. Query with `search_rows`, `range_search` or `aggregate_rows`\n\
                4. Write with `insert_row`, `update_rows`, `batch_insert` or `bulk_update`\n\
                \n\
                ## Filters\n\
                Filters are JSON objects keyed by column name. A scalar value means\n\
                equality; an object selects an operator:\n\
                `{\"total\": {\"gte\": 100}, \"status\": {\"in\": [\"open\", \"held\"]}}`\n\
                Operators: eq, like, gt, lt, gte, lte, in. Values are always bound as\n\
                parameters; there is no way to inject SQL text through a filter.\n\
                \n\
                ## Safety\n\
                - `update_rows` refuses an empty filter and previews matches first\n\
                - `validate_only` on writes checks everything without writing\n\
                - Unknown tables and columns fail before any SQL is generated\n\
                \n\
                ## Exploration\n\
                `profile_table` summarizes column statistics and frequent values.\n\
                `suggest_queries` turns a free-text question into runnable tool calls."
                    .to_string(),
            ),
        }
    }
}
