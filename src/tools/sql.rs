//! Raw SQL tools.
//!
//! `execute_sql` runs one caller-written statement; `explain_query` returns
//! its PostgreSQL plan as JSON. In restricted mode both only admit
//! read-only statements, except that a plain EXPLAIN (which does not run
//! the statement) is always allowed.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;
use tracing::info;

use crate::db::{ConnectionManager, QueryExecutor};
use crate::error::{DbError, DbResult};
use crate::models::{QueryParam, QueryResult};
use crate::tools::{guard, release};

/// Input for the execute_sql tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ExecuteSqlInput {
    /// A single SQL statement. Use $1, $2, ... for parameters.
    pub sql: String,
    /// Positional parameter values
    #[serde(default)]
    pub params: Vec<serde_json::Value>,
}

/// Input for the explain_query tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ExplainInput {
    /// Statement to explain
    pub sql: String,
    /// Run the statement and report actual timings (EXPLAIN ANALYZE)
    #[serde(default)]
    pub analyze: bool,
}

/// Trimmed SQL without a trailing semicolon.
fn normalize_sql(sql: &str) -> DbResult<&str> {
    let sql = sql.trim().trim_end_matches(';').trim_end();
    if sql.is_empty() {
        return Err(DbError::invalid_input("SQL statement is empty"));
    }
    Ok(sql)
}

/// Check a statement before execution and report whether it returns rows.
pub fn prepare_statement(sql: &str, restricted: bool) -> DbResult<bool> {
    if restricted {
        guard::check_restricted(sql)?;
    }
    if let Ok(statements) = guard::analyze_sql(sql) {
        if statements.len() > 1 {
            return Err(DbError::invalid_input(
                "Only one statement per call is supported",
            ));
        }
    }
    Ok(guard::returns_rows(sql))
}

/// Wrap `sql` in an EXPLAIN with JSON output.
pub fn explain_sql(sql: &str, analyze: bool, restricted: bool) -> DbResult<String> {
    // ANALYZE executes the statement.
    if analyze && restricted {
        guard::check_restricted(sql)?;
    }
    let options = if analyze {
        "FORMAT JSON, ANALYZE"
    } else {
        "FORMAT JSON"
    };
    Ok(format!("EXPLAIN ({}) {}", options, sql))
}

/// Handler for the raw SQL tools.
pub struct SqlToolHandler {
    connection_manager: Arc<ConnectionManager>,
    executor: QueryExecutor,
}

impl SqlToolHandler {
    pub fn new(connection_manager: Arc<ConnectionManager>, executor: QueryExecutor) -> Self {
        Self {
            connection_manager,
            executor,
        }
    }

    pub async fn execute_sql(&self, input: ExecuteSqlInput) -> QueryResult {
        let restricted = self.executor.mode().restricted;
        let prepared = normalize_sql(&input.sql)
            .and_then(|sql| prepare_statement(sql, restricted).map(|rows| (sql, rows)));
        let (sql, returns_rows) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => return QueryResult::failure(&e, Some(input.sql.clone())),
        };
        info!(
            restricted,
            returns_rows,
            params = input.params.len(),
            "execute_sql"
        );

        let params: Vec<QueryParam> = input.params.into_iter().map(QueryParam::from).collect();
        let mut session = match self.connection_manager.acquire().await {
            Ok(session) => session,
            Err(e) => return QueryResult::failure(&e, None),
        };
        let result = self
            .executor
            .execute_raw(&mut session, sql, &params, returns_rows)
            .await;
        release(session).await;
        result
    }

    pub async fn explain_query(&self, input: ExplainInput) -> QueryResult {
        let restricted = self.executor.mode().restricted;
        let explain = normalize_sql(&input.sql)
            .and_then(|sql| explain_sql(sql, input.analyze, restricted));
        let explain = match explain {
            Ok(explain) => explain,
            Err(e) => return QueryResult::failure(&e, Some(input.sql.clone())),
        };
        info!(analyze = input.analyze, "explain_query");

        let mut session = match self.connection_manager.acquire().await {
            Ok(session) => session,
            Err(e) => return QueryResult::failure(&e, None),
        };
        let result = self
            .executor
            .execute_raw(&mut session, &explain, &[], true)
            .await;
        release(session).await;
        result
    }
}
