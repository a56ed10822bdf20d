//! Query execution engine.
//!
//! [`QueryExecutor`] runs validated statements on a caller-owned
//! [`Connection`] and marshals the outcome into a [`QueryResult`]. It never
//! returns an error: every failure becomes an envelope with `success: false`
//! and an `error_type` tag.
//!
//! Validation always completes before the first statement reaches the
//! database. Writes run inside a transaction that is rolled back on failure.
//! Bound values are never logged, only their count.

use std::collections::BTreeSet;
use std::time::Instant;

use serde_json::{Map, Value as JsonValue};
use tracing::{debug, info, warn};

use crate::config::ServerMode;
use crate::db::connection::{Connection, RowSet};
use crate::db::schema::SchemaCatalog;
use crate::error::{DbError, DbResult, Violation};
use crate::models::{
    InsertBatchRequest, InsertRequest, MAX_ROW_LIMIT, QueryParam, QueryResult, SelectRequest,
};
use crate::query::{
    BuiltQuery, InsertBuilder, PlaceholderStyle, build_and_validate_insert,
    build_and_validate_select, validate_insert,
};

/// PostgreSQL accepts at most this many bind parameters per statement.
const MAX_BIND_PARAMS: usize = 65_535;

/// A failure together with the SQL it happened on, if any was built.
#[derive(Debug)]
struct Failed {
    error: DbError,
    sql: Option<String>,
}

impl Failed {
    fn on(sql: &str) -> impl FnOnce(DbError) -> Failed + '_ {
        move |error| Failed {
            error,
            sql: Some(sql.to_string()),
        }
    }

    fn into_result(self) -> QueryResult {
        QueryResult::failure(&self.error, self.sql)
    }
}

impl From<DbError> for Failed {
    fn from(error: DbError) -> Self {
        Self { error, sql: None }
    }
}

/// Roll back after a failed write. A rollback failure is only logged; the
/// session is discarded rather than reused in that case.
async fn rollback_quietly<C: Connection>(conn: &mut C) {
    if let Err(e) = conn.rollback().await {
        warn!(error = %e, "Rollback failed");
    }
}

fn inserted_id(data: &[Map<String, JsonValue>]) -> Option<JsonValue> {
    data.first().and_then(|row| row.get("id")).cloned()
}

/// Executes structured and raw statements under one immutable [`ServerMode`].
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryExecutor {
    mode: ServerMode,
}

impl QueryExecutor {
    pub fn new(mode: ServerMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> ServerMode {
        self.mode
    }

    fn row_cap(&self) -> usize {
        self.mode.max_rows as usize
    }

    /// Validate, build and run a structured SELECT.
    pub async fn execute_select<C: Connection>(
        &self,
        conn: &mut C,
        request: &SelectRequest,
    ) -> QueryResult {
        let start = Instant::now();
        match self.run_select(conn, request).await {
            Ok(result) => result.with_execution_time(start.elapsed().as_millis() as u64),
            Err(failed) => {
                warn!(
                    table = %request.table,
                    error_type = failed.error.error_type(),
                    "SELECT failed"
                );
                failed.into_result()
            }
        }
    }

    async fn run_select<C: Connection>(
        &self,
        conn: &mut C,
        request: &SelectRequest,
    ) -> Result<QueryResult, Failed> {
        conn.set_statement_timeout(self.mode.query_timeout_secs).await?;
        let built = {
            let mut catalog = SchemaCatalog::new(&mut *conn);
            build_and_validate_select(&mut catalog, request, PlaceholderStyle::Numbered).await?
        };

        debug!(
            sql = %built.sql,
            params = built.params.len(),
            max_rows = self.mode.max_rows,
            "Executing SELECT"
        );
        let rows = conn
            .fetch(&built.sql, &built.params, Some(self.row_cap()))
            .await
            .map_err(Failed::on(&built.sql))?;

        Ok(self.rows_result(rows, built))
    }

    fn rows_result(&self, rows: RowSet, built: BuiltQuery) -> QueryResult {
        let truncated = rows.truncated;
        let mut result = QueryResult::rows(rows.columns.clone(), rows.records(), built.sql)
            .with_warnings(built.warnings);
        if truncated {
            result.truncated = true;
            result.message = Some(format!(
                "Query returned {} row(s); more rows were available (max_rows = {})",
                result.row_count, self.mode.max_rows
            ));
        }
        result
    }

    /// Validate, build and run a single-row INSERT inside a transaction.
    pub async fn execute_insert<C: Connection>(
        &self,
        conn: &mut C,
        request: &InsertRequest,
    ) -> QueryResult {
        let start = Instant::now();
        match self.run_insert(conn, request).await {
            Ok(result) => result.with_execution_time(start.elapsed().as_millis() as u64),
            Err(failed) => {
                warn!(
                    table = %request.table,
                    error_type = failed.error.error_type(),
                    "INSERT failed"
                );
                failed.into_result()
            }
        }
    }

    async fn run_insert<C: Connection>(
        &self,
        conn: &mut C,
        request: &InsertRequest,
    ) -> Result<QueryResult, Failed> {
        conn.set_statement_timeout(self.mode.query_timeout_secs).await?;
        let built = {
            let mut catalog = SchemaCatalog::new(&mut *conn);
            build_and_validate_insert(&mut catalog, request, PlaceholderStyle::Numbered).await?
        };

        debug!(sql = %built.sql, params = built.params.len(), "Executing INSERT");
        let returning = !request.returning.is_empty();

        conn.begin().await.map_err(Failed::on(&built.sql))?;
        let outcome = Self::write_chunk(conn, &built, returning).await;
        let (affected, rows) = match outcome {
            Ok(done) => done,
            Err(e) => {
                rollback_quietly(conn).await;
                return Err(Failed::on(&built.sql)(e));
            }
        };
        conn.commit().await.map_err(Failed::on(&built.sql))?;

        info!(table = %request.table, rows = affected, "INSERT committed");

        let mut result = match rows {
            Some(rows) => {
                let mut result =
                    QueryResult::rows(rows.columns.clone(), rows.records(), built.sql);
                result.inserted_id = inserted_id(&result.data);
                result
            }
            None => QueryResult::affected(affected, built.sql),
        };
        result.message = Some(if affected == 0 {
            format!("No row inserted into {} (conflict ignored)", request.table)
        } else {
            format!("Inserted {} row(s) into {}", affected, request.table)
        });
        Ok(result)
    }

    /// Run one built INSERT. With RETURNING the rows come back too.
    async fn write_chunk<C: Connection>(
        conn: &mut C,
        built: &BuiltQuery,
        returning: bool,
    ) -> DbResult<(u64, Option<RowSet>)> {
        if returning {
            let rows = conn.fetch(&built.sql, &built.params, None).await?;
            Ok((rows.len() as u64, Some(rows)))
        } else {
            let affected = conn.execute(&built.sql, &built.params).await?;
            Ok((affected, None))
        }
    }

    /// Insert many rows in chunks, one transaction per chunk.
    ///
    /// Stops at the first failing chunk. Chunks committed before it stay
    /// committed and are reported in `row_count`; the failing chunk index is
    /// reported in `failed_batch`.
    pub async fn execute_insert_batch<C: Connection>(
        &self,
        conn: &mut C,
        request: &InsertBatchRequest,
    ) -> QueryResult {
        let start = Instant::now();
        match self.run_insert_batch(conn, request).await {
            Ok(result) => result.with_execution_time(start.elapsed().as_millis() as u64),
            Err(failed) => {
                warn!(
                    table = %request.table,
                    error_type = failed.error.error_type(),
                    "Batch INSERT rejected"
                );
                failed.into_result()
            }
        }
    }

    async fn run_insert_batch<C: Connection>(
        &self,
        conn: &mut C,
        request: &InsertBatchRequest,
    ) -> Result<QueryResult, Failed> {
        let template = request
            .template()
            .ok_or_else(|| DbError::invalid_input("rows must contain at least one row"))?;
        if request.batch_size == 0 {
            return Err(DbError::invalid_input("batch_size must be greater than 0").into());
        }
        let columns: Vec<String> = template.row.keys().cloned().collect();
        check_column_sets(&columns, &request.rows)?;

        conn.set_statement_timeout(self.mode.query_timeout_secs).await?;
        let schema = {
            let mut catalog = SchemaCatalog::new(&mut *conn);
            if !catalog.table_exists(&request.table).await? {
                return Err(
                    DbError::validation(vec![Violation::unknown_table(&request.table)]).into(),
                );
            }
            catalog.get_table_schema(&request.table).await?
        };
        validate_insert(&template, &schema)?;

        let per_statement = MAX_BIND_PARAMS / columns.len().max(1);
        let chunk_size = request
            .batch_size
            .min(MAX_ROW_LIMIT as usize)
            .min(per_statement)
            .max(1);

        // Build every chunk before sending anything.
        let chunks = request
            .rows
            .chunks(chunk_size)
            .map(|chunk| {
                InsertBuilder::new(request.table.clone(), columns.clone())
                    .with_schema(&schema)
                    .rows(chunk)
                    .on_conflict(request.on_conflict)
                    .conflict_target(request.conflict_target.clone())
                    .update_columns(request.update_columns.clone())
                    .returning(request.returning.clone())
                    .build(PlaceholderStyle::Numbered)
            })
            .collect::<DbResult<Vec<_>>>()?;

        info!(
            table = %request.table,
            rows = request.rows.len(),
            batches = chunks.len(),
            chunk_size,
            "Starting batch INSERT"
        );

        let returning = !request.returning.is_empty();
        let mut committed: u64 = 0;
        let mut returned: Option<RowSet> = None;

        for (index, built) in chunks.iter().enumerate() {
            debug!(batch = index, params = built.params.len(), "Executing batch");
            match Self::commit_chunk(conn, built, returning).await {
                Ok((affected, rows)) => {
                    committed += affected;
                    if let Some(rows) = rows {
                        match returned.as_mut() {
                            Some(all) => all.rows.extend(rows.rows),
                            None => returned = Some(rows),
                        }
                    }
                }
                Err(error) => {
                    warn!(
                        table = %request.table,
                        batch = index,
                        committed,
                        error_type = error.error_type(),
                        "Batch failed, stopping"
                    );
                    let mut result = QueryResult::failure(&error, Some(built.sql.clone()));
                    result.row_count = committed;
                    result.failed_batch = Some(index);
                    result.message = Some(format!(
                        "Batch {} of {} failed after {} row(s) were committed: {}",
                        index + 1,
                        chunks.len(),
                        committed,
                        error
                    ));
                    return Ok(result);
                }
            }
        }

        info!(table = %request.table, rows = committed, "Batch INSERT committed");

        let summary = chunks
            .first()
            .map(|built| built.sql.clone())
            .unwrap_or_default();
        let mut result = match returned {
            Some(rows) => {
                let mut result = QueryResult::rows(rows.columns.clone(), rows.records(), summary);
                result.inserted_id = inserted_id(&result.data);
                result
            }
            None => QueryResult::affected(committed, summary),
        };
        result.row_count = committed;
        result.message = Some(format!(
            "Inserted {} row(s) into {} in {} batch(es)",
            committed,
            request.table,
            chunks.len()
        ));
        Ok(result)
    }

    async fn commit_chunk<C: Connection>(
        conn: &mut C,
        built: &BuiltQuery,
        returning: bool,
    ) -> DbResult<(u64, Option<RowSet>)> {
        conn.begin().await?;
        match Self::write_chunk(conn, built, returning).await {
            Ok(done) => {
                conn.commit().await?;
                Ok(done)
            }
            Err(e) => {
                rollback_quietly(conn).await;
                Err(e)
            }
        }
    }

    /// Run caller-supplied SQL.
    ///
    /// Row-returning statements are capped at `max_rows`; anything else
    /// reports the affected-row count. Permission checks happen before this.
    pub async fn execute_raw<C: Connection>(
        &self,
        conn: &mut C,
        sql: &str,
        params: &[QueryParam],
        returns_rows: bool,
    ) -> QueryResult {
        let start = Instant::now();
        debug!(
            sql = %sql,
            params = params.len(),
            returns_rows,
            "Executing raw SQL"
        );
        let outcome = self.run_raw(conn, sql, params, returns_rows).await;

        match outcome {
            Ok(result) => result.with_execution_time(start.elapsed().as_millis() as u64),
            Err(failed) => {
                warn!(error_type = failed.error.error_type(), "Raw SQL failed");
                failed.into_result()
            }
        }
    }

    async fn run_raw<C: Connection>(
        &self,
        conn: &mut C,
        sql: &str,
        params: &[QueryParam],
        returns_rows: bool,
    ) -> Result<QueryResult, Failed> {
        conn.set_statement_timeout(self.mode.query_timeout_secs).await?;
        if returns_rows {
            let rows = conn
                .fetch(sql, params, Some(self.row_cap()))
                .await
                .map_err(Failed::on(sql))?;
            let built = BuiltQuery {
                sql: sql.to_string(),
                ..BuiltQuery::default()
            };
            Ok(self.rows_result(rows, built))
        } else {
            let affected = conn.execute(sql, params).await.map_err(Failed::on(sql))?;
            Ok(QueryResult::affected(affected, sql))
        }
    }
}

/// Every row must carry exactly the first row's columns.
fn check_column_sets(columns: &[String], rows: &[Map<String, JsonValue>]) -> DbResult<()> {
    let expected: BTreeSet<&str> = columns.iter().map(String::as_str).collect();
    for (index, row) in rows.iter().enumerate().skip(1) {
        let actual: BTreeSet<&str> = row.keys().map(String::as_str).collect();
        if actual != expected {
            let missing: Vec<&str> = expected.difference(&actual).copied().collect();
            let extra: Vec<&str> = actual.difference(&expected).copied().collect();
            return Err(DbError::invalid_input(format!(
                "Row {} does not match the columns of the first row (missing: [{}], unexpected: [{}])",
                index,
                missing.join(", "),
                extra.join(", ")
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: JsonValue) -> Map<String, JsonValue> {
        match value {
            JsonValue::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_column_sets_match_regardless_of_order() {
        let rows = vec![
            row(json!({"title": "Heat", "rating": 8.3})),
            row(json!({"rating": 7.1, "title": "Ronin"})),
        ];
        let columns = vec!["title".to_string(), "rating".to_string()];
        assert!(check_column_sets(&columns, &rows).is_ok());
    }

    #[test]
    fn test_column_set_mismatch_names_the_row() {
        let rows = vec![
            row(json!({"title": "Heat", "rating": 8.3})),
            row(json!({"title": "Ronin", "year": 1998})),
        ];
        let columns = vec!["title".to_string(), "rating".to_string()];
        let err = check_column_sets(&columns, &rows).unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, DbError::InvalidInput { .. }));
        assert!(msg.contains("Row 1"));
        assert!(msg.contains("missing: [rating]"));
        assert!(msg.contains("unexpected: [year]"));
    }

    #[test]
    fn test_inserted_id_reads_id_column() {
        let data = vec![row(json!({"id": 42, "title": "Heat"}))];
        assert_eq!(inserted_id(&data), Some(json!(42)));
        assert_eq!(inserted_id(&[row(json!({"title": "Heat"}))]), None);
        assert_eq!(inserted_id(&[]), None);
    }

    #[test]
    fn test_failure_keeps_sql() {
        let failed = Failed::on("SELECT 1")(DbError::execution("boom", Some("XX000".into())));
        let result = failed.into_result();
        assert!(!result.success);
        assert_eq!(result.error_type.as_deref(), Some("ExecutionError"));
        assert_eq!(result.query_executed.as_deref(), Some("SELECT 1"));
    }
}
