//! Shared test fixtures.
//!
//! [`ScriptedConnection`] stands in for a PostgreSQL session: catalog queries
//! are answered from in-memory table definitions, every statement is
//! recorded, and data statements can be scripted to fail.

#![allow(dead_code)]

use std::collections::HashMap;

use pg_structured_mcp::db::{Connection, RowSet};
use pg_structured_mcp::error::{DbError, DbResult};
use pg_structured_mcp::models::{ColumnInfo, QueryParam};
use serde_json::{Value as JsonValue, json};

/// One statement as the connection saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct Recorded {
    pub sql: String,
    pub params: Vec<QueryParam>,
    pub max_rows: Option<usize>,
}

#[derive(Debug, Default)]
pub struct ScriptedConnection {
    tables: HashMap<String, Vec<ColumnInfo>>,
    /// Rows served to any SELECT that is not a catalog query.
    pub result_columns: Vec<String>,
    pub result_rows: Vec<Vec<JsonValue>>,
    /// Zero-based index of the data statement that should fail.
    fail_on_write: Option<usize>,
    fail_catalog: bool,
    views: Vec<(String, String)>,
    extensions: Vec<String>,
    statement_stats: Vec<Vec<JsonValue>>,
    writes: usize,
    next_id: i64,
    pub log: Vec<Recorded>,
}

impl ScriptedConnection {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    /// `movies` and `directors`, the tables most tests run against.
    pub fn with_film_tables() -> Self {
        Self::new()
            .with_table(
                "movies",
                vec![
                    ColumnInfo::new("id", "integer")
                        .not_null()
                        .with_default("nextval('movies_id_seq'::regclass)"),
                    ColumnInfo::new("title", "text").not_null(),
                    ColumnInfo::new("release_year", "integer"),
                    ColumnInfo::new("rating", "numeric"),
                    ColumnInfo::new("director_id", "integer"),
                ],
            )
            .with_table(
                "directors",
                vec![
                    ColumnInfo::new("id", "integer")
                        .not_null()
                        .with_default("nextval('directors_id_seq'::regclass)"),
                    ColumnInfo::new("name", "text").not_null(),
                ],
            )
    }

    pub fn with_table(mut self, name: &str, columns: Vec<ColumnInfo>) -> Self {
        self.tables.insert(name.to_string(), columns);
        self
    }

    pub fn with_rows(mut self, columns: &[&str], rows: Vec<Vec<JsonValue>>) -> Self {
        self.result_columns = columns.iter().map(|c| c.to_string()).collect();
        self.result_rows = rows;
        self
    }

    pub fn fail_on_write(mut self, index: usize) -> Self {
        self.fail_on_write = Some(index);
        self
    }

    pub fn with_view(mut self, name: &str, definition: &str) -> Self {
        self.views.push((name.to_string(), definition.to_string()));
        self
    }

    /// Install pg_stat_statements with rows of (query, calls, total ms, mean ms, rows).
    pub fn with_statement_stats(mut self, stats: Vec<Vec<JsonValue>>) -> Self {
        self.extensions.push("pg_stat_statements".to_string());
        self.statement_stats = stats;
        self
    }

    pub fn fail_catalog(mut self) -> Self {
        self.fail_catalog = true;
        self
    }

    /// Every recorded SQL text, in order.
    pub fn statements(&self) -> Vec<&str> {
        self.log.iter().map(|r| r.sql.as_str()).collect()
    }

    /// Statements other than catalog lookups and session settings.
    pub fn user_statements(&self) -> Vec<&Recorded> {
        self.log
            .iter()
            .filter(|r| !is_catalog(&r.sql) && !r.sql.starts_with("SET "))
            .collect()
    }

    /// Transaction control and data statements, reduced to their first word.
    pub fn transaction_trace(&self) -> Vec<String> {
        self.user_statements()
            .iter()
            .filter_map(|r| r.sql.split_whitespace().next())
            .map(str::to_string)
            .collect()
    }

    fn record(&mut self, sql: &str, params: &[QueryParam], max_rows: Option<usize>) {
        self.log.push(Recorded {
            sql: sql.to_string(),
            params: params.to_vec(),
            max_rows,
        });
    }

    fn table_param(params: &[QueryParam]) -> String {
        match params.get(1) {
            Some(QueryParam::String(name)) => name.clone(),
            _ => String::new(),
        }
    }

    fn catalog_rows(&self, sql: &str, params: &[QueryParam]) -> DbResult<RowSet> {
        if self.fail_catalog {
            return Err(DbError::execution("permission denied for schema", Some("42501".into())));
        }
        let table = Self::table_param(params);
        if sql.contains("pg_extension") {
            let installed = matches!(
                params.first(),
                Some(QueryParam::String(name)) if self.extensions.contains(name)
            );
            return Ok(RowSet::new(vec!["installed".into()], vec![vec![json!(installed)]]));
        }
        if sql.contains("FROM pg_stat_statements") {
            let limit = limit_param(params.first());
            return Ok(RowSet::new(
                ["query", "calls", "total_time_ms", "mean_time_ms", "rows"]
                    .map(String::from)
                    .to_vec(),
                self.statement_stats.iter().take(limit).cloned().collect(),
            ));
        }
        if sql.contains("pg_database_size") {
            return Ok(RowSet::new(
                ["size_bytes", "connections", "table_count", "cache_hit_ratio"]
                    .map(String::from)
                    .to_vec(),
                vec![vec![
                    json!(7_864_320),
                    json!(4),
                    json!(self.tables.len()),
                    json!(99.12),
                ]],
            ));
        }
        if sql.contains("pg_indexes") {
            let mut names: Vec<&String> = self.tables.keys().collect();
            names.sort();
            let rows = names
                .into_iter()
                .map(|name| {
                    vec![
                        json!(format!("{}_pkey", name)),
                        json!(name),
                        json!(format!(
                            "CREATE UNIQUE INDEX {0}_pkey ON public.{0} USING btree (id)",
                            name
                        )),
                    ]
                })
                .collect();
            return Ok(RowSet::new(
                vec!["name".into(), "table_name".into(), "definition".into()],
                rows,
            ));
        }
        if sql.contains("information_schema.views") {
            let rows = self
                .views
                .iter()
                .map(|(name, definition)| vec![json!(name), json!(definition)])
                .collect();
            return Ok(RowSet::new(vec!["name".into(), "definition".into()], rows));
        }
        if sql.contains("information_schema.tables") && sql.contains("LIMIT") {
            // 8 kB per column so that wider tables sort first
            let mut sized: Vec<(&String, usize)> = self
                .tables
                .iter()
                .map(|(name, columns)| (name, columns.len() * 8192))
                .collect();
            sized.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
            let rows = sized
                .into_iter()
                .take(limit_param(params.get(1)))
                .map(|(name, size)| vec![json!(name), json!("BASE TABLE"), json!(size)])
                .collect();
            return Ok(RowSet::new(
                vec!["name".into(), "table_type".into(), "size_bytes".into()],
                rows,
            ));
        }
        if sql.contains("information_schema.columns") {
            let rows = self
                .tables
                .get(&table)
                .map(|columns| {
                    columns
                        .iter()
                        .map(|c| {
                            vec![
                                json!(c.name),
                                json!(c.data_type),
                                json!(c.nullable),
                                json!(c.default),
                                json!(c.udt_name),
                            ]
                        })
                        .collect()
                })
                .unwrap_or_default();
            return Ok(RowSet::new(
                ["name", "data_type", "nullable", "column_default", "udt_name"]
                    .map(String::from)
                    .to_vec(),
                rows,
            ));
        }
        if sql.contains("information_schema.tables") && sql.contains("EXISTS") {
            return Ok(RowSet::new(
                vec!["table_exists".into()],
                vec![vec![json!(self.tables.contains_key(&table))]],
            ));
        }
        if sql.contains("pg_constraint") {
            let rows = if self.tables.contains_key(&table) {
                vec![vec![
                    json!(format!("{}_pkey", table)),
                    json!("PRIMARY KEY"),
                    json!(["id"]),
                    JsonValue::Null,
                    json!([]),
                    JsonValue::Null,
                ]]
            } else {
                vec![]
            };
            return Ok(RowSet::new(
                [
                    "name",
                    "constraint_type",
                    "columns",
                    "referenced_table",
                    "referenced_columns",
                    "check_clause",
                ]
                .map(String::from)
                .to_vec(),
                rows,
            ));
        }
        if sql.contains("information_schema.schemata") {
            return Ok(RowSet::new(
                vec!["name".into(), "owner".into()],
                vec![
                    vec![json!("analytics"), json!("etl")],
                    vec![json!("public"), json!("postgres")],
                ],
            ));
        }
        if sql.contains("information_schema.tables") {
            let mut names: Vec<&String> = self.tables.keys().collect();
            names.sort();
            let rows = names
                .into_iter()
                .map(|name| vec![json!(name), json!("BASE TABLE"), json!(16384)])
                .collect();
            return Ok(RowSet::new(
                vec!["name".into(), "table_type".into(), "size_bytes".into()],
                rows,
            ));
        }
        // version() and friends
        Ok(RowSet::new(
            vec!["version".into(), "database".into(), "user".into()],
            vec![vec![
                json!("PostgreSQL 16.2 on x86_64-pc-linux-gnu"),
                json!("films"),
                json!("reader"),
            ]],
        ))
    }

    /// Run a scripted data statement; returns the number of VALUES tuples.
    fn write(&mut self, sql: &str) -> DbResult<u64> {
        let index = self.writes;
        self.writes += 1;
        if self.fail_on_write == Some(index) {
            return Err(DbError::execution(
                "duplicate key value violates unique constraint \"movies_pkey\"",
                Some("23505".into()),
            ));
        }
        Ok(tuple_count(sql))
    }
}

fn is_catalog(sql: &str) -> bool {
    [
        "information_schema",
        "pg_constraint",
        "version()",
        "pg_indexes",
        "pg_extension",
        "pg_stat_statements",
        "pg_database_size",
    ]
    .iter()
    .any(|marker| sql.contains(marker))
}

fn limit_param(param: Option<&QueryParam>) -> usize {
    match param {
        Some(QueryParam::Int(n)) => *n as usize,
        _ => usize::MAX,
    }
}

fn tuple_count(sql: &str) -> u64 {
    match sql.find(" VALUES ") {
        Some(_) => sql.matches("), (").count() as u64 + 1,
        None if sql.contains("DEFAULT VALUES") => 1,
        None => 0,
    }
}

impl Connection for ScriptedConnection {
    async fn fetch(
        &mut self,
        sql: &str,
        params: &[QueryParam],
        max_rows: Option<usize>,
    ) -> DbResult<RowSet> {
        self.record(sql, params, max_rows);
        if is_catalog(sql) {
            return self.catalog_rows(sql, params);
        }
        if sql.starts_with("INSERT") {
            let inserted = self.write(sql)?;
            let rows = (0..inserted)
                .map(|_| {
                    let id = self.next_id;
                    self.next_id += 1;
                    vec![json!(id)]
                })
                .collect();
            return Ok(RowSet::new(vec!["id".into()], rows));
        }

        let mut rows = RowSet::new(self.result_columns.clone(), self.result_rows.clone());
        if let Some(cap) = max_rows {
            if rows.rows.len() > cap {
                rows.rows.truncate(cap);
                rows.truncated = true;
            }
        }
        Ok(rows)
    }

    async fn execute(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        self.record(sql, params, None);
        if sql.starts_with("SET ") {
            return Ok(0);
        }
        if sql.starts_with("INSERT") {
            return self.write(sql);
        }
        let index = self.writes;
        self.writes += 1;
        if self.fail_on_write == Some(index) {
            return Err(DbError::execution("relation is locked", Some("55P03".into())));
        }
        Ok(3)
    }

    async fn begin(&mut self) -> DbResult<()> {
        self.record("BEGIN", &[], None);
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.record("COMMIT", &[], None);
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.record("ROLLBACK", &[], None);
        Ok(())
    }

    async fn close(self) -> DbResult<()> {
        Ok(())
    }
}

/// Build a JSON object row from `json!` syntax.
pub fn row(value: JsonValue) -> serde_json::Map<String, JsonValue> {
    match value {
        JsonValue::Object(map) => map,
        other => panic!("expected a JSON object, got {}", other),
    }
}
