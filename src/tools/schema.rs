//! Schema introspection tools.
//!
//! Implements `list_schemas`, `list_tables`, `list_objects`, `describe_table`,
//! `get_table_sizes`, `analyze_db_health`, `get_slow_queries` and
//! `test_connection`. Unlike the query tools these report failures as MCP
//! errors rather than result envelopes.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::info;

use crate::config::ServerMode;
use crate::db::{Connection, ConnectionManager, DEFAULT_SCHEMA, SchemaCatalog};
use crate::error::{DbError, DbResult, Violation};
use crate::models::{
    ColumnInfo, ConstraintInfo, DatabaseHealth, DbObject, ObjectKind, SchemaInfo, SlowQuery,
    TableInfo,
};
use crate::tools::release;

fn default_schema() -> String {
    DEFAULT_SCHEMA.to_string()
}

fn default_size_limit() -> u32 {
    20
}

fn default_slow_query_limit() -> u32 {
    10
}

/// Input for the list_tables tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ListTablesInput {
    /// Schema to list. Default: "public"
    #[serde(default = "default_schema")]
    pub schema: String,
}

/// Input for the list_objects tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ListObjectsInput {
    /// "tables", "views" or "indexes". Default: "tables"
    #[serde(default)]
    pub object_type: ObjectKind,
    /// Schema to list. Default: "public"
    #[serde(default = "default_schema")]
    pub schema: String,
}

/// Input for the get_table_sizes tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct TableSizesInput {
    /// Schema to measure. Default: "public"
    #[serde(default = "default_schema")]
    pub schema: String,
    /// Number of tables to return, largest first (1-1000). Default: 20
    #[serde(default = "default_size_limit")]
    pub limit: u32,
}

/// Input for the get_slow_queries tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SlowQueriesInput {
    /// Number of statements to return (1-1000). Default: 10
    #[serde(default = "default_slow_query_limit")]
    pub limit: u32,
}

/// Input for the describe_table tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DescribeTableInput {
    pub table: String,
    /// Schema containing the table. Default: "public"
    #[serde(default = "default_schema")]
    pub schema: String,
}

/// Output for the list_schemas tool.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ListSchemasOutput {
    pub schemas: Vec<SchemaInfo>,
    pub count: usize,
}

/// Output from the list_tables tool.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ListTablesOutput {
    pub schema: String,
    /// Tables and views with their total size
    pub tables: Vec<TableInfo>,
    pub count: usize,
}

/// Output from the list_objects tool.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ListObjectsOutput {
    pub schema: String,
    pub object_type: ObjectKind,
    pub objects: Vec<DbObject>,
    pub count: usize,
}

/// Output from the get_table_sizes tool.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct TableSizesOutput {
    pub schema: String,
    /// Base tables, largest first
    pub tables: Vec<TableInfo>,
    pub count: usize,
}

/// Output from the get_slow_queries tool.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct SlowQueriesOutput {
    /// Statements ordered by total execution time
    pub queries: Vec<SlowQuery>,
    pub count: usize,
}

/// Output from the describe_table tool.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct DescribeTableOutput {
    pub table: String,
    pub schema: String,
    /// Columns in declaration order
    pub columns: Vec<ColumnInfo>,
    /// Columns an INSERT must supply (NOT NULL without a default)
    pub required_columns: Vec<String>,
    pub constraints: Vec<ConstraintInfo>,
}

/// Output from the test_connection tool.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct TestConnectionOutput {
    pub connected: bool,
    pub version: Option<String>,
    pub database: Option<String>,
    pub user: Option<String>,
    pub restricted: bool,
    pub query_timeout_secs: u32,
    pub max_rows: u32,
}

const CONNECTION_DETAILS: &str =
    "SELECT version() AS version, current_database()::text AS database, current_user::text AS user";

/// Columns and constraints of one table.
pub async fn describe<C: Connection>(
    conn: &mut C,
    schema: &str,
    table: &str,
) -> DbResult<DescribeTableOutput> {
    let mut catalog = SchemaCatalog::new(conn).in_schema(schema);
    if !catalog.table_exists(table).await? {
        return Err(DbError::validation(vec![Violation::unknown_table(table)]));
    }
    let table_schema = catalog.get_table_schema(table).await?;
    let constraints = catalog.table_constraints(table).await?;
    let required_columns = table_schema
        .required_columns()
        .map(|c| c.name.clone())
        .collect();

    Ok(DescribeTableOutput {
        table: table.to_string(),
        schema: schema.to_string(),
        columns: table_schema.columns,
        required_columns,
        constraints,
    })
}

/// Server version, database and role of the session.
pub async fn connection_details<C: Connection>(
    conn: &mut C,
    mode: ServerMode,
) -> DbResult<TestConnectionOutput> {
    let rows = conn.fetch(CONNECTION_DETAILS, &[], Some(1)).await?;
    let record = rows.records().into_iter().next().unwrap_or_default();
    let text = |key: &str| record.get(key).and_then(JsonValue::as_str).map(String::from);

    Ok(TestConnectionOutput {
        connected: true,
        version: text("version"),
        database: text("database"),
        user: text("user"),
        restricted: mode.restricted,
        query_timeout_secs: mode.query_timeout_secs,
        max_rows: mode.max_rows,
    })
}

/// Handler for the schema tools.
pub struct SchemaToolHandler {
    connection_manager: Arc<ConnectionManager>,
    mode: ServerMode,
}

impl SchemaToolHandler {
    pub fn new(connection_manager: Arc<ConnectionManager>, mode: ServerMode) -> Self {
        Self {
            connection_manager,
            mode,
        }
    }

    pub async fn list_schemas(&self) -> DbResult<ListSchemasOutput> {
        let mut session = self.connection_manager.acquire().await?;
        let schemas = SchemaCatalog::new(&mut session).list_schemas().await;
        release(session).await;

        let schemas = schemas?;
        let count = schemas.len();
        info!(count, "list_schemas");
        Ok(ListSchemasOutput { schemas, count })
    }

    pub async fn list_tables(&self, input: ListTablesInput) -> DbResult<ListTablesOutput> {
        let mut session = self.connection_manager.acquire().await?;
        let tables = SchemaCatalog::new(&mut session)
            .in_schema(input.schema.as_str())
            .list_tables()
            .await;
        release(session).await;

        let tables = tables?;
        let count = tables.len();
        info!(schema = %input.schema, count, "list_tables");
        Ok(ListTablesOutput {
            schema: input.schema,
            tables,
            count,
        })
    }

    pub async fn list_objects(&self, input: ListObjectsInput) -> DbResult<ListObjectsOutput> {
        let mut session = self.connection_manager.acquire().await?;
        let objects = SchemaCatalog::new(&mut session)
            .in_schema(input.schema.as_str())
            .list_objects(input.object_type)
            .await;
        release(session).await;

        let objects = objects?;
        let count = objects.len();
        info!(schema = %input.schema, object_type = input.object_type.as_str(), count, "list_objects");
        Ok(ListObjectsOutput {
            schema: input.schema,
            object_type: input.object_type,
            objects,
            count,
        })
    }

    pub async fn table_sizes(&self, input: TableSizesInput) -> DbResult<TableSizesOutput> {
        let mut session = self.connection_manager.acquire().await?;
        let tables = SchemaCatalog::new(&mut session)
            .in_schema(input.schema.as_str())
            .table_sizes(input.limit)
            .await;
        release(session).await;

        let tables = tables?;
        let count = tables.len();
        info!(schema = %input.schema, count, "get_table_sizes");
        Ok(TableSizesOutput {
            schema: input.schema,
            tables,
            count,
        })
    }

    pub async fn database_health(&self) -> DbResult<DatabaseHealth> {
        let mut session = self.connection_manager.acquire().await?;
        let health = SchemaCatalog::new(&mut session).database_health().await;
        release(session).await;

        let health = health?;
        info!(
            size = %health.database_size,
            connections = health.active_connections,
            cache_hit_ratio = health.cache_hit_ratio_percent,
            "analyze_db_health"
        );
        Ok(health)
    }

    pub async fn slow_queries(&self, input: SlowQueriesInput) -> DbResult<SlowQueriesOutput> {
        let mut session = self.connection_manager.acquire().await?;
        let queries = SchemaCatalog::new(&mut session).slow_queries(input.limit).await;
        release(session).await;

        let queries = queries?;
        let count = queries.len();
        info!(count, "get_slow_queries");
        Ok(SlowQueriesOutput { queries, count })
    }

    pub async fn describe_table(&self, input: DescribeTableInput) -> DbResult<DescribeTableOutput> {
        let mut session = self.connection_manager.acquire().await?;
        let output = describe(&mut session, &input.schema, &input.table).await;
        release(session).await;

        info!(schema = %input.schema, table = %input.table, ok = output.is_ok(), "describe_table");
        output
    }

    pub async fn test_connection(&self) -> DbResult<TestConnectionOutput> {
        let mut session = self.connection_manager.acquire().await?;
        let output = connection_details(&mut session, self.mode).await;
        release(session).await;
        output
    }
}
