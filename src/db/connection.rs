//! Connection boundary.
//!
//! [`Connection`] is the narrow interface the catalog and executor talk to.
//! [`PgSession`] implements it over one pooled sqlx connection; tests plug in
//! scripted implementations.

use std::future::Future;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::{Map, Value as JsonValue};
use sqlx::pool::PoolConnection;
use sqlx::{Column, Executor, Postgres, Statement};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::db::params::bind_postgres_param;
use crate::db::types;
use crate::error::{DbError, DbResult};
use crate::models::{DEFAULT_QUERY_TIMEOUT_SECS, QueryParam};

/// Extra time the client waits beyond the server-side statement timeout.
const CLIENT_TIMEOUT_GRACE: Duration = Duration::from_secs(5);

/// Rows fetched by one statement, values in column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<JsonValue>>,
    /// True if rows beyond the requested cap were dropped.
    pub truncated: bool,
}

impl RowSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<JsonValue>>) -> Self {
        Self {
            columns,
            rows,
            truncated: false,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows as column-name keyed records, fields in column order.
    pub fn records(&self) -> Vec<Map<String, JsonValue>> {
        self.rows
            .iter()
            .map(|row| self.columns.iter().cloned().zip(row.iter().cloned()).collect())
            .collect()
    }
}

/// A single database session.
///
/// Statements on one connection run sequentially. Implementations must roll
/// back an open transaction in [`close`](Connection::close).
pub trait Connection: Send {
    /// Run a row-returning statement. With `max_rows`, at most that many rows
    /// are kept and [`RowSet::truncated`] reports whether more existed.
    fn fetch(
        &mut self,
        sql: &str,
        params: &[QueryParam],
        max_rows: Option<usize>,
    ) -> impl Future<Output = DbResult<RowSet>> + Send;

    /// Run a statement and return the number of affected rows.
    fn execute(
        &mut self,
        sql: &str,
        params: &[QueryParam],
    ) -> impl Future<Output = DbResult<u64>> + Send;

    fn begin(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    fn commit(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    fn rollback(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    /// Pass a statement timeout through to the server for this session.
    fn set_statement_timeout(&mut self, secs: u32) -> impl Future<Output = DbResult<()>> + Send {
        async move {
            let sql = format!("SET statement_timeout = {}", u64::from(secs) * 1000);
            self.execute(&sql, &[]).await.map(|_| ())
        }
    }

    /// Release the session, rolling back any open transaction.
    fn close(self) -> impl Future<Output = DbResult<()>> + Send
    where
        Self: Sized;
}

/// A pooled PostgreSQL connection.
pub struct PgSession {
    conn: PoolConnection<Postgres>,
    in_transaction: bool,
    client_timeout: Duration,
}

impl PgSession {
    pub fn new(conn: PoolConnection<Postgres>) -> Self {
        Self {
            conn,
            in_transaction: false,
            client_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS as u64)
                + CLIENT_TIMEOUT_GRACE,
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    async fn run_raw(&mut self, sql: &str) -> DbResult<()> {
        (&mut *self.conn).execute(sqlx::raw_sql(sql)).await?;
        Ok(())
    }

    /// Column names of a statement that returned no rows.
    async fn describe_columns(&mut self, sql: &str) -> DbResult<Vec<String>> {
        let statement = (&mut *self.conn).prepare(sql).await?;
        Ok(statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect())
    }

    fn timeout_error(&self) -> DbError {
        DbError::timeout("query execution", self.client_timeout.as_secs() as u32)
    }
}

impl Connection for PgSession {
    async fn fetch(
        &mut self,
        sql: &str,
        params: &[QueryParam],
        max_rows: Option<usize>,
    ) -> DbResult<RowSet> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_postgres_param(query, param);
        }
        let fetch_limit = max_rows.map_or(usize::MAX, |n| n.saturating_add(1));
        let rows_future = query
            .fetch(&mut *self.conn)
            .take(fetch_limit)
            .collect::<Vec<_>>();

        let results = match timeout(self.client_timeout, rows_future).await {
            Ok(results) => results,
            Err(_) => return Err(self.timeout_error()),
        };
        let mut rows = Vec::with_capacity(results.len());
        for result in results {
            rows.push(result?);
        }

        let truncated = max_rows.is_some_and(|n| rows.len() > n);
        if let Some(n) = max_rows {
            rows.truncate(n);
        }
        if truncated {
            warn!(limit = ?max_rows, "Query result truncated");
        }

        let columns = match rows.first() {
            Some(row) => types::column_names(row),
            None => self.describe_columns(sql).await?,
        };
        Ok(RowSet {
            columns,
            rows: rows.iter().map(types::row_to_values).collect(),
            truncated,
        })
    }

    async fn execute(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_postgres_param(query, param);
        }
        match timeout(self.client_timeout, query.execute(&mut *self.conn)).await {
            Ok(result) => Ok(result?.rows_affected()),
            Err(_) => Err(self.timeout_error()),
        }
    }

    async fn begin(&mut self) -> DbResult<()> {
        if self.in_transaction {
            return Err(DbError::internal("Transaction already open on this session"));
        }
        self.run_raw("BEGIN").await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.run_raw("COMMIT").await?;
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.run_raw("ROLLBACK").await?;
        self.in_transaction = false;
        Ok(())
    }

    async fn set_statement_timeout(&mut self, secs: u32) -> DbResult<()> {
        // SET does not accept bind parameters; secs is an integer.
        self.run_raw(&format!("SET statement_timeout = {}", u64::from(secs) * 1000))
            .await?;
        self.client_timeout = Duration::from_secs(u64::from(secs)) + CLIENT_TIMEOUT_GRACE;
        debug!(timeout_secs = secs, "Statement timeout set");
        Ok(())
    }

    async fn close(mut self) -> DbResult<()> {
        if self.in_transaction {
            warn!("Closing session with open transaction, rolling back");
            self.rollback().await?;
        }
        Ok(())
    }
}

impl Drop for PgSession {
    fn drop(&mut self) {
        // An open transaction cannot be rolled back here; never hand it back to the pool.
        if self.in_transaction {
            self.conn.close_on_drop();
        }
    }
}
