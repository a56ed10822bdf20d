//! Schema catalog.
//!
//! Reads table existence and column metadata from PostgreSQL's
//! `information_schema` and `pg_catalog`, plus the statistics views behind the
//! health and size listings. Nothing is cached: every call is a
//! round trip, so a request always validates against current metadata.
//!
//! Any data-access failure is reported as a schema lookup error.

use serde_json::{Map, Value as JsonValue};
use tracing::debug;

use crate::db::connection::Connection;
use crate::error::{DbError, DbResult};
use crate::models::{
    ColumnInfo, ConstraintInfo, DatabaseHealth, DbObject, ObjectKind, QueryParam, SchemaInfo,
    SlowQuery, TableInfo, TableSchema, preview,
};

pub const DEFAULT_SCHEMA: &str = "public";

/// Upper bound for the `limit` of the size and statistics listings.
pub const MAX_LISTING_LIMIT: u32 = 1000;

mod queries {
    pub const TABLE_EXISTS: &str = r#"
        SELECT EXISTS (
            SELECT 1
            FROM information_schema.tables
            WHERE table_schema = $1
            AND table_name = $2
        ) AS table_exists
        "#;

    pub const TABLE_COLUMNS: &str = r#"
        SELECT
            column_name::text AS name,
            data_type::text AS data_type,
            (is_nullable = 'YES') AS nullable,
            column_default::text AS column_default,
            udt_name::text AS udt_name
        FROM information_schema.columns
        WHERE table_schema = $1
        AND table_name = $2
        ORDER BY ordinal_position
        "#;

    pub const LIST_SCHEMAS: &str = r#"
        SELECT
            schema_name::text AS name,
            schema_owner::text AS owner
        FROM information_schema.schemata
        WHERE schema_name NOT IN ('information_schema', 'pg_catalog', 'pg_toast')
        AND schema_name NOT LIKE 'pg\_temp\_%'
        AND schema_name NOT LIKE 'pg\_toast\_temp\_%'
        ORDER BY schema_name
        "#;

    pub const LIST_TABLES: &str = r#"
        SELECT
            t.table_name::text AS name,
            t.table_type::text AS table_type,
            CASE
                WHEN t.table_type = 'BASE TABLE'
                THEN pg_total_relation_size(format('%I.%I', t.table_schema, t.table_name)::regclass)
            END AS size_bytes
        FROM information_schema.tables t
        WHERE t.table_schema = $1
        ORDER BY t.table_name
        "#;

    pub const TABLE_CONSTRAINTS: &str = r#"
        SELECT
            con.conname::text AS name,
            CASE con.contype
                WHEN 'p' THEN 'PRIMARY KEY'
                WHEN 'u' THEN 'UNIQUE'
                WHEN 'f' THEN 'FOREIGN KEY'
                WHEN 'c' THEN 'CHECK'
                WHEN 'x' THEN 'EXCLUDE'
                ELSE con.contype::text
            END AS constraint_type,
            to_jsonb(ARRAY(
                SELECT a.attname::text
                FROM unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
                JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum
                ORDER BY k.ord
            )) AS columns,
            ref.relname::text AS referenced_table,
            to_jsonb(ARRAY(
                SELECT a.attname::text
                FROM unnest(con.confkey) WITH ORDINALITY AS k(attnum, ord)
                JOIN pg_attribute a ON a.attrelid = con.confrelid AND a.attnum = k.attnum
                ORDER BY k.ord
            )) AS referenced_columns,
            CASE WHEN con.contype = 'c' THEN pg_get_constraintdef(con.oid) END AS check_clause
        FROM pg_constraint con
        JOIN pg_class rel ON rel.oid = con.conrelid
        JOIN pg_namespace nsp ON nsp.oid = rel.relnamespace
        LEFT JOIN pg_class ref ON ref.oid = con.confrelid
        WHERE nsp.nspname = $1
        AND rel.relname = $2
        ORDER BY con.conname
        "#;

    pub const LIST_VIEWS: &str = r#"
        SELECT
            table_name::text AS name,
            view_definition::text AS definition
        FROM information_schema.views
        WHERE table_schema = $1
        ORDER BY table_name
        "#;

    pub const LIST_INDEXES: &str = r#"
        SELECT
            indexname::text AS name,
            tablename::text AS table_name,
            indexdef::text AS definition
        FROM pg_indexes
        WHERE schemaname = $1
        ORDER BY indexname
        "#;

    pub const TABLE_SIZES: &str = r#"
        SELECT
            t.table_name::text AS name,
            t.table_type::text AS table_type,
            pg_total_relation_size(format('%I.%I', t.table_schema, t.table_name)::regclass) AS size_bytes
        FROM information_schema.tables t
        WHERE t.table_schema = $1
        AND t.table_type = 'BASE TABLE'
        ORDER BY size_bytes DESC, t.table_name
        LIMIT $2
        "#;

    pub const DATABASE_HEALTH: &str = r#"
        SELECT
            pg_database_size(current_database()) AS size_bytes,
            (SELECT count(*) FROM pg_stat_activity) AS connections,
            (SELECT count(*) FROM information_schema.tables WHERE table_schema = $1) AS table_count,
            (
                SELECT round(100 * sum(blks_hit)::numeric / nullif(sum(blks_hit) + sum(blks_read), 0), 2)::float8
                FROM pg_stat_database
                WHERE datname = current_database()
            ) AS cache_hit_ratio
        "#;

    pub const EXTENSION_INSTALLED: &str = r#"
        SELECT EXISTS (
            SELECT 1 FROM pg_extension WHERE extname = $1
        ) AS installed
        "#;

    pub const SLOW_QUERIES: &str = r#"
        SELECT
            query::text AS query,
            calls,
            total_exec_time::float8 AS total_time_ms,
            mean_exec_time::float8 AS mean_time_ms,
            rows
        FROM pg_stat_statements
        ORDER BY total_exec_time DESC
        LIMIT $1
        "#;
}

const STAT_STATEMENTS: &str = "pg_stat_statements";

fn text(record: &Map<String, JsonValue>, key: &str) -> Option<String> {
    record.get(key).and_then(JsonValue::as_str).map(str::to_string)
}

fn int(record: &Map<String, JsonValue>, key: &str) -> i64 {
    record.get(key).and_then(JsonValue::as_i64).unwrap_or(0)
}

fn float(record: &Map<String, JsonValue>, key: &str) -> f64 {
    record.get(key).and_then(JsonValue::as_f64).unwrap_or(0.0)
}

fn text_list(record: &Map<String, JsonValue>, key: &str) -> Vec<String> {
    record
        .get(key)
        .and_then(JsonValue::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(JsonValue::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn table_info(record: &Map<String, JsonValue>) -> Option<TableInfo> {
    let info = TableInfo::new(text(record, "name")?, text(record, "table_type")?);
    Some(match record.get("size_bytes").and_then(JsonValue::as_u64) {
        Some(bytes) => info.with_size(bytes),
        None => info,
    })
}

/// Catalog reader bound to one session and one schema (default `public`).
pub struct SchemaCatalog<'c, C: Connection> {
    conn: &'c mut C,
    schema: String,
}

impl<'c, C: Connection> SchemaCatalog<'c, C> {
    pub fn new(conn: &'c mut C) -> Self {
        Self {
            conn,
            schema: DEFAULT_SCHEMA.to_string(),
        }
    }

    pub fn in_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    async fn lookup(
        &mut self,
        sql: &str,
        params: &[QueryParam],
        object: &str,
    ) -> DbResult<Vec<Map<String, JsonValue>>> {
        self.conn
            .fetch(sql, params, None)
            .await
            .map(|rows| rows.records())
            .map_err(|e| DbError::schema_lookup(e.to_string(), object))
    }

    fn schema_and(&self, table: &str) -> [QueryParam; 2] {
        [
            QueryParam::String(self.schema.clone()),
            QueryParam::String(table.to_string()),
        ]
    }

    /// True if a table or view called `table` exists in the schema.
    pub async fn table_exists(&mut self, table: &str) -> DbResult<bool> {
        let params = self.schema_and(table);
        let records = self.lookup(queries::TABLE_EXISTS, &params, table).await?;
        let exists = records
            .first()
            .and_then(|r| r.get("table_exists"))
            .and_then(JsonValue::as_bool)
            .unwrap_or(false);
        debug!(table, exists, "Checked table existence");
        Ok(exists)
    }

    /// Column metadata in declaration order. Empty for an unknown table.
    pub async fn get_table_schema(&mut self, table: &str) -> DbResult<TableSchema> {
        let params = self.schema_and(table);
        let records = self.lookup(queries::TABLE_COLUMNS, &params, table).await?;

        let columns: Vec<ColumnInfo> = records
            .iter()
            .filter_map(|r| {
                let name = text(r, "name")?;
                Some(ColumnInfo {
                    name,
                    data_type: text(r, "data_type").unwrap_or_default(),
                    nullable: r.get("nullable").and_then(JsonValue::as_bool).unwrap_or(true),
                    default: text(r, "column_default"),
                    udt_name: text(r, "udt_name"),
                })
            })
            .collect();

        debug!(table, columns = columns.len(), "Loaded table schema");
        Ok(TableSchema::new(table, columns))
    }

    /// User schemas, excluding PostgreSQL's internal ones.
    pub async fn list_schemas(&mut self) -> DbResult<Vec<SchemaInfo>> {
        let records = self.lookup(queries::LIST_SCHEMAS, &[], "schemata").await?;
        let schemas: Vec<SchemaInfo> = records
            .iter()
            .filter_map(|r| {
                Some(SchemaInfo {
                    name: text(r, "name")?,
                    owner: text(r, "owner"),
                })
            })
            .collect();
        debug!(count = schemas.len(), "Listed schemas");
        Ok(schemas)
    }

    /// Tables and views of the schema with their total on-disk size.
    pub async fn list_tables(&mut self) -> DbResult<Vec<TableInfo>> {
        let params = [QueryParam::String(self.schema.clone())];
        let schema = self.schema.clone();
        let records = self.lookup(queries::LIST_TABLES, &params, &schema).await?;
        let tables: Vec<TableInfo> = records.iter().filter_map(table_info).collect();
        debug!(schema = %self.schema, count = tables.len(), "Listed tables");
        Ok(tables)
    }

    /// The `limit` largest base tables of the schema, largest first.
    pub async fn table_sizes(&mut self, limit: u32) -> DbResult<Vec<TableInfo>> {
        let limit = limit.clamp(1, MAX_LISTING_LIMIT);
        let params = [
            QueryParam::String(self.schema.clone()),
            QueryParam::Int(i64::from(limit)),
        ];
        let schema = self.schema.clone();
        let records = self.lookup(queries::TABLE_SIZES, &params, &schema).await?;
        let tables: Vec<TableInfo> = records.iter().filter_map(table_info).collect();
        debug!(schema = %self.schema, limit, count = tables.len(), "Measured table sizes");
        Ok(tables)
    }

    /// Tables, views or indexes of the schema, ordered by name.
    pub async fn list_objects(&mut self, kind: ObjectKind) -> DbResult<Vec<DbObject>> {
        let objects: Vec<DbObject> = match kind {
            ObjectKind::Tables => self
                .list_tables()
                .await?
                .into_iter()
                .map(|t| DbObject {
                    object_type: Some(t.table_type),
                    ..DbObject::new(t.name)
                })
                .collect(),
            ObjectKind::Views => {
                let params = [QueryParam::String(self.schema.clone())];
                let records = self.lookup(queries::LIST_VIEWS, &params, "views").await?;
                records
                    .iter()
                    .filter_map(|r| {
                        Some(DbObject {
                            definition: text(r, "definition").map(|d| preview(&d)),
                            ..DbObject::new(text(r, "name")?)
                        })
                    })
                    .collect()
            }
            ObjectKind::Indexes => {
                let params = [QueryParam::String(self.schema.clone())];
                let records = self.lookup(queries::LIST_INDEXES, &params, "indexes").await?;
                records
                    .iter()
                    .filter_map(|r| {
                        Some(DbObject {
                            table: text(r, "table_name"),
                            definition: text(r, "definition"),
                            ..DbObject::new(text(r, "name")?)
                        })
                    })
                    .collect()
            }
        };
        debug!(schema = %self.schema, kind = kind.as_str(), count = objects.len(), "Listed objects");
        Ok(objects)
    }

    /// Database size, session count, table count and buffer cache hit ratio.
    pub async fn database_health(&mut self) -> DbResult<DatabaseHealth> {
        let params = [QueryParam::String(self.schema.clone())];
        let records = self
            .lookup(queries::DATABASE_HEALTH, &params, "pg_stat_database")
            .await?;
        let record = records.into_iter().next().unwrap_or_default();

        let size_bytes = record.get("size_bytes").and_then(JsonValue::as_u64).unwrap_or(0);
        Ok(DatabaseHealth {
            database_size_bytes: size_bytes,
            database_size: humansize::format_size(size_bytes, humansize::WINDOWS),
            active_connections: int(&record, "connections"),
            table_count: int(&record, "table_count"),
            cache_hit_ratio_percent: float(&record, "cache_hit_ratio"),
            checked_at: chrono::Utc::now().to_rfc3339(),
        })
    }

    /// True if `extension` is installed in the current database.
    pub async fn extension_installed(&mut self, extension: &str) -> DbResult<bool> {
        let params = [QueryParam::String(extension.to_string())];
        let records = self
            .lookup(queries::EXTENSION_INSTALLED, &params, extension)
            .await?;
        Ok(records
            .first()
            .and_then(|r| r.get("installed"))
            .and_then(JsonValue::as_bool)
            .unwrap_or(false))
    }

    /// Statements with the highest total execution time.
    ///
    /// Needs the pg_stat_statements extension; without it this is a schema
    /// lookup error naming the extension.
    pub async fn slow_queries(&mut self, limit: u32) -> DbResult<Vec<SlowQuery>> {
        if !self.extension_installed(STAT_STATEMENTS).await? {
            return Err(DbError::schema_lookup(
                "pg_stat_statements extension is not installed",
                STAT_STATEMENTS,
            ));
        }
        let limit = limit.clamp(1, MAX_LISTING_LIMIT);
        let params = [QueryParam::Int(i64::from(limit))];
        let records = self
            .lookup(queries::SLOW_QUERIES, &params, STAT_STATEMENTS)
            .await?;
        let slow: Vec<SlowQuery> = records
            .iter()
            .filter_map(|r| {
                Some(SlowQuery {
                    query: preview(&text(r, "query")?),
                    calls: int(r, "calls"),
                    total_time_ms: float(r, "total_time_ms"),
                    mean_time_ms: float(r, "mean_time_ms"),
                    rows: int(r, "rows"),
                })
            })
            .collect();
        debug!(limit, count = slow.len(), "Read pg_stat_statements");
        Ok(slow)
    }

    /// Primary key, unique, foreign key, check and exclusion constraints.
    pub async fn table_constraints(&mut self, table: &str) -> DbResult<Vec<ConstraintInfo>> {
        let params = self.schema_and(table);
        let records = self.lookup(queries::TABLE_CONSTRAINTS, &params, table).await?;
        Ok(records
            .iter()
            .filter_map(|r| {
                Some(ConstraintInfo {
                    name: text(r, "name")?,
                    constraint_type: text(r, "constraint_type")?,
                    columns: text_list(r, "columns"),
                    referenced_table: text(r, "referenced_table"),
                    referenced_columns: text_list(r, "referenced_columns"),
                    check_clause: text(r, "check_clause"),
                })
            })
            .collect())
    }
}
