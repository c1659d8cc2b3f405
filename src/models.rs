//! Shared result envelopes and operation limits.

use serde::Serialize;
use serde_json::Value as JsonValue;

/// Default timeout for statement execution.
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;

/// Sampling limits.
pub const DEFAULT_SAMPLE_LIMIT: u32 = 5;
pub const MAX_SAMPLE_LIMIT: u32 = 100;

/// Pagination limits for `search_rows`.
pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Row limits for range queries.
pub const DEFAULT_RANGE_LIMIT: u32 = 50;
pub const MAX_RANGE_LIMIT: u32 = 200;

/// Row limits for aggregate queries.
pub const DEFAULT_AGGREGATE_LIMIT: u32 = 100;
pub const MAX_AGGREGATE_LIMIT: u32 = 1000;

/// Batch insert chunking.
pub const DEFAULT_BATCH_CHUNK: usize = 100;
pub const MAX_BATCH_CHUNK: usize = 1000;

/// How many of the most frequent values a column profile reports.
pub const TOP_VALUES_LIMIT: u32 = 5;

/// Column descriptor attached to every row set.
#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct ColumnMetadata {
    /// Column name.
    pub name: String,
    /// Backend-reported type of the result column.
    pub data_type: String,
}

impl ColumnMetadata {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// Decoded result rows plus column metadata. The shared shape every
/// row-returning tool builds its output from.
#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct RowSet {
    /// Result columns in select order.
    pub columns: Vec<ColumnMetadata>,
    /// Rows as JSON objects keyed by column name.
    pub rows: Vec<serde_json::Map<String, JsonValue>>,
    /// True when the row limit cut the result short.
    pub truncated: bool,
}

impl RowSet {
    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            truncated: false,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// First value of the first row, for single-scalar queries like COUNT.
    pub fn scalar(&self) -> Option<&JsonValue> {
        let row = self.rows.first()?;
        row.values().next()
    }
}

/// Pagination block attached to paged results.
#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct PageInfo {
    /// 1-based page number actually used (after clamping).
    pub page: u32,
    /// Page size actually used (after clamping).
    pub page_size: u32,
    /// Rows on this page.
    pub records_on_page: usize,
    /// Whether another page exists after this one.
    pub has_next_page: bool,
    /// Total matching rows, present when `count_total` was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_records: Option<u64>,
    /// Total pages, present when `count_total` was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u64>,
}

impl PageInfo {
    pub fn new(
        page: crate::sqlgen::PageSpec,
        records_on_page: usize,
        has_next_page: bool,
        total_records: Option<u64>,
    ) -> Self {
        let total_pages = total_records.map(|total| total.div_ceil(u64::from(page.page_size)));
        Self {
            page: page.page,
            page_size: page.page_size,
            records_on_page,
            has_next_page,
            total_records,
            total_pages,
        }
    }
}
