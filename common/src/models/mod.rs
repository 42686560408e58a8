//! Shared data models for all crates.

pub mod database;
pub mod query;

// Re-export commonly used types
pub use database::{DatabaseInfo, TableSummary};
pub use query::{QueryOptions, QueryParams, QueryRequest, QueryResult, Row, SqlValue};
