//! MCP tool implementations.
//!
//! This module contains all tool handlers:
//! - `select`: structured_select
//! - `insert`: structured_insert, structured_insert_batch
//! - `sql`: execute_sql, explain_query
//! - `schema`: list_schemas, list_tables, list_objects, describe_table,
//!   get_table_sizes, analyze_db_health, get_slow_queries, test_connection
//! - `guard`: restricted-mode statement classification
//!
//! Every handler acquires its own session and releases it before returning.

pub mod guard;
pub mod insert;
pub mod schema;
pub mod select;
pub mod sql;

pub use insert::{InsertBatchInput, InsertInput, InsertToolHandler};
pub use schema::{
    DescribeTableInput, DescribeTableOutput, ListObjectsInput, ListObjectsOutput,
    ListSchemasOutput, ListTablesInput, ListTablesOutput, SchemaToolHandler, SlowQueriesInput,
    SlowQueriesOutput, TableSizesInput, TableSizesOutput, TestConnectionOutput,
};
pub use select::{ConditionInput, JoinInput, OrderInput, SelectInput, SelectToolHandler};
pub use sql::{ExecuteSqlInput, ExplainInput, SqlToolHandler};

use tracing::warn;

use crate::db::{Connection, PgSession};

/// Return a session to the pool, rolling back anything left open.
pub(crate) async fn release(session: PgSession) {
    if let Err(e) = session.close().await {
        warn!(error = %e, "Failed to release session cleanly");
    }
}
