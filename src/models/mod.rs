//! Data models for the structured query server.
//!
//! This module re-exports all model types used throughout the application.

pub mod query;
pub mod schema;

// Re-export commonly used types
pub use query::{
    Condition, ConflictPolicy, DEFAULT_BATCH_SIZE, DEFAULT_MAX_ROWS, DEFAULT_QUERY_TIMEOUT_SECS,
    InsertBatchRequest, InsertRequest, JoinSpec, JoinType, MAX_QUERY_TIMEOUT_SECS, MAX_ROW_LIMIT,
    Operator, OrderSpec, QueryParam, QueryResult, SelectRequest, SortDirection,
};
pub use schema::{
    ColumnInfo, ConstraintInfo, DatabaseHealth, DbObject, ObjectKind, SchemaInfo, SlowQuery,
    TableInfo, TableSchema, preview,
};
