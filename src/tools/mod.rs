//! MCP tool implementations.
//!
//! This module contains all tool handlers:
//! - `schema`: list tables, describe a table, sample rows
//! - `query`: filtered search with pagination, range search
//! - `write`: guarded single-row insert and previewed update
//! - `batch`: chunked batch insert, savepointed bulk update
//! - `analyze`: grouped aggregates, column profiling, query suggestions

pub mod analyze;
pub mod batch;
pub mod query;
pub mod schema;
pub mod write;

pub use analyze::{
    AggregateRowsInput, AggregateRowsOutput, AnalyzeToolHandler, ProfileTableInput,
    ProfileTableOutput, SuggestQueriesInput, SuggestQueriesOutput,
};
pub use batch::{
    BatchInsertInput, BatchInsertOutput, BatchToolHandler, BulkUpdateInput, BulkUpdateOutput,
};
pub use query::{
    QueryToolHandler, RangeSearchInput, RangeSearchOutput, SearchRowsInput, SearchRowsOutput,
};
pub use schema::{
    DescribeTableInput, DescribeTableOutput, ListTablesInput, ListTablesOutput, SampleRowsInput,
    SampleRowsOutput, SchemaToolHandler,
};
pub use write::{
    InsertRowInput, InsertRowOutput, UpdateRowsInput, UpdateRowsOutput, WriteToolHandler,
};
