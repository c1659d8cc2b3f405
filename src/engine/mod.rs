//! Higher-level operations built on the SQL generator and executor:
//! chunked batch writes, column profiling and query suggestions.

pub mod batch;
pub mod profile;
pub mod suggest;

pub use batch::{BatchExecutor, BatchReport, FailedChunk, RuleOutcome, RuleStatus, UpdateRule};
pub use profile::{ColumnProfile, ProfileStats, Profiler, ValueFrequency};
pub use suggest::{QuerySuggestion, SuggestionEngine};
