//! Structured INSERT tools.
//!
//! Implements `structured_insert` for one row and `structured_insert_batch`
//! for many rows sharing a column set.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use tracing::info;

use crate::db::{ConnectionManager, QueryExecutor};
use crate::models::{
    ConflictPolicy, DEFAULT_BATCH_SIZE, InsertBatchRequest, InsertRequest, QueryResult,
};
use crate::tools::release;

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

/// Input for the structured_insert tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct InsertInput {
    /// Target table
    pub table: String,
    /// Column name to value mapping for the new row
    pub data: Map<String, JsonValue>,
    /// "ignore" skips conflicting rows, "update" overwrites them. Default: none
    #[serde(default)]
    pub on_conflict: ConflictPolicy,
    /// Columns of the unique constraint to check; required for "update"
    #[serde(default)]
    pub conflict_target: Vec<String>,
    /// Columns to overwrite on conflict. Default: every inserted column except the conflict target
    #[serde(default)]
    pub update_columns: Option<Vec<String>>,
    /// Columns to return from the inserted row, e.g. ["id"]
    #[serde(default)]
    pub returning: Vec<String>,
}

impl From<InsertInput> for InsertRequest {
    fn from(input: InsertInput) -> Self {
        Self {
            table: input.table,
            row: input.data,
            on_conflict: input.on_conflict,
            conflict_target: input.conflict_target,
            update_columns: input.update_columns,
            returning: input.returning,
        }
    }
}

/// Input for the structured_insert_batch tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct InsertBatchInput {
    /// Target table
    pub table: String,
    /// Rows to insert; every row must have the same columns as the first
    pub rows: Vec<Map<String, JsonValue>>,
    #[serde(default)]
    pub on_conflict: ConflictPolicy,
    #[serde(default)]
    pub conflict_target: Vec<String>,
    #[serde(default)]
    pub update_columns: Option<Vec<String>>,
    #[serde(default)]
    pub returning: Vec<String>,
    /// Rows per transaction. Default: 1000, max: 10000
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl From<InsertBatchInput> for InsertBatchRequest {
    fn from(input: InsertBatchInput) -> Self {
        Self {
            table: input.table,
            rows: input.rows,
            on_conflict: input.on_conflict,
            conflict_target: input.conflict_target,
            update_columns: input.update_columns,
            returning: input.returning,
            batch_size: input.batch_size,
        }
    }
}

/// Handler for the INSERT tools.
pub struct InsertToolHandler {
    connection_manager: Arc<ConnectionManager>,
    executor: QueryExecutor,
}

impl InsertToolHandler {
    pub fn new(connection_manager: Arc<ConnectionManager>, executor: QueryExecutor) -> Self {
        Self {
            connection_manager,
            executor,
        }
    }

    pub async fn insert(&self, input: InsertInput) -> QueryResult {
        let request = InsertRequest::from(input);
        info!(
            table = %request.table,
            columns = request.row.len(),
            on_conflict = ?request.on_conflict,
            "structured_insert"
        );

        let mut session = match self.connection_manager.acquire().await {
            Ok(session) => session,
            Err(e) => return QueryResult::failure(&e, None),
        };
        let result = self.executor.execute_insert(&mut session, &request).await;
        release(session).await;
        result
    }

    pub async fn insert_batch(&self, input: InsertBatchInput) -> QueryResult {
        let request = InsertBatchRequest::from(input);
        info!(
            table = %request.table,
            rows = request.rows.len(),
            batch_size = request.batch_size,
            "structured_insert_batch"
        );

        let mut session = match self.connection_manager.acquire().await {
            Ok(session) => session,
            Err(e) => return QueryResult::failure(&e, None),
        };
        let result = self
            .executor
            .execute_insert_batch(&mut session, &request)
            .await;
        release(session).await;
        result
    }
}
