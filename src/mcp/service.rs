//! MCP service implementation using rmcp.
//!
//! This module defines the PgStructuredService struct with all tools
//! exposed via the MCP protocol using the rmcp framework's macros.
//!
//! The query tools (`structured_select`, `structured_insert`,
//! `structured_insert_batch`, `execute_sql`, `explain_query`) always answer
//! with a [`QueryResult`] envelope, failures included. The schema tools
//! report failures as MCP errors.

use crate::config::ServerMode;
use crate::db::{ConnectionManager, QueryExecutor};
use crate::models::QueryResult;
use crate::tools::insert::{InsertBatchInput, InsertInput, InsertToolHandler};
use crate::models::DatabaseHealth;
use crate::tools::schema::{
    DescribeTableInput, DescribeTableOutput, ListObjectsInput, ListObjectsOutput,
    ListSchemasOutput, ListTablesInput, ListTablesOutput, SchemaToolHandler, SlowQueriesInput,
    SlowQueriesOutput, TableSizesInput, TableSizesOutput, TestConnectionOutput,
};
use crate::tools::select::{SelectInput, SelectToolHandler};
use crate::tools::sql::{ExecuteSqlInput, ExplainInput, SqlToolHandler};
use rmcp::Json;
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::{Implementation, ProtocolVersion, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct PgStructuredService {
    /// Shared pool for all database operations
    connection_manager: Arc<ConnectionManager>,
    /// Executor carrying the immutable server mode
    executor: QueryExecutor,
    /// Tool router for MCP tool dispatch (auto-generated)
    tool_router: ToolRouter<Self>,
}

impl PgStructuredService {
    pub fn new(connection_manager: Arc<ConnectionManager>, mode: ServerMode) -> Self {
        Self {
            connection_manager,
            executor: QueryExecutor::new(mode),
            tool_router: Self::tool_router(),
        }
    }

    pub fn mode(&self) -> ServerMode {
        self.executor.mode()
    }

    fn schema_handler(&self) -> SchemaToolHandler {
        SchemaToolHandler::new(self.connection_manager.clone(), self.mode())
    }
}

#[tool_router]
impl PgStructuredService {
    #[tool(
        description = "Run a SELECT described as JSON.\nEvery table and column is checked against the live schema before anything is sent to the database; all problems are reported at once.\nSupports joins, WHERE/HAVING conditions, GROUP BY, ORDER BY, LIMIT/OFFSET and DISTINCT.\nResults are capped at the server's max_rows; `truncated` tells you when more rows exist."
    )]
    async fn structured_select(&self, Parameters(input): Parameters<SelectInput>) -> Json<QueryResult> {
        let handler = SelectToolHandler::new(self.connection_manager.clone(), self.executor);
        Json(handler.select(input).await)
    }

    #[tool(
        description = "Insert one row described as a column/value map.\nColumns are checked against the table and required columns must be present.\non_conflict: \"none\" (default), \"ignore\" or \"update\" (needs conflict_target).\nUse `returning` to get generated values such as the new id."
    )]
    async fn structured_insert(&self, Parameters(input): Parameters<InsertInput>) -> Json<QueryResult> {
        let handler = InsertToolHandler::new(self.connection_manager.clone(), self.executor);
        Json(handler.insert(input).await)
    }

    #[tool(
        description = "Insert many rows that share the same columns.\nRows are written in chunks of batch_size (default 1000), one transaction per chunk.\nOn failure, earlier chunks stay committed; `failed_batch` and `row_count` report where it stopped."
    )]
    async fn structured_insert_batch(
        &self,
        Parameters(input): Parameters<InsertBatchInput>,
    ) -> Json<QueryResult> {
        let handler = InsertToolHandler::new(self.connection_manager.clone(), self.executor);
        Json(handler.insert_batch(input).await)
    }

    #[tool(
        description = "Execute a single SQL statement with optional $1, $2, ... parameters.\nIn restricted mode only read-only statements are allowed."
    )]
    async fn execute_sql(&self, Parameters(input): Parameters<ExecuteSqlInput>) -> Json<QueryResult> {
        let handler = SqlToolHandler::new(self.connection_manager.clone(), self.executor);
        Json(handler.execute_sql(input).await)
    }

    #[tool(
        description = "Show the PostgreSQL execution plan of a statement as JSON.\nWith analyze=true the statement is executed; in restricted mode that is only allowed for read-only statements."
    )]
    async fn explain_query(&self, Parameters(input): Parameters<ExplainInput>) -> Json<QueryResult> {
        let handler = SqlToolHandler::new(self.connection_manager.clone(), self.executor);
        Json(handler.explain_query(input).await)
    }

    #[tool(description = "List the non-system schemas of the database.")]
    async fn list_schemas(&self) -> Result<Json<ListSchemasOutput>, McpError> {
        self.schema_handler()
            .list_schemas()
            .await
            .map(Json)
            .map_err(McpError::from)
    }

    #[tool(description = "List tables and views in a schema (default \"public\") with their total size.")]
    async fn list_tables(
        &self,
        Parameters(input): Parameters<ListTablesInput>,
    ) -> Result<Json<ListTablesOutput>, McpError> {
        self.schema_handler()
            .list_tables(input)
            .await
            .map(Json)
            .map_err(McpError::from)
    }

    #[tool(
        description = "List tables, views or indexes in a schema (default \"public\").\nobject_type: \"tables\" (default), \"views\" or \"indexes\". View definitions are cut to 200 characters."
    )]
    async fn list_objects(
        &self,
        Parameters(input): Parameters<ListObjectsInput>,
    ) -> Result<Json<ListObjectsOutput>, McpError> {
        self.schema_handler()
            .list_objects(input)
            .await
            .map(Json)
            .map_err(McpError::from)
    }

    #[tool(description = "List the largest tables of a schema (default \"public\"), largest first.")]
    async fn get_table_sizes(
        &self,
        Parameters(input): Parameters<TableSizesInput>,
    ) -> Result<Json<TableSizesOutput>, McpError> {
        self.schema_handler()
            .table_sizes(input)
            .await
            .map(Json)
            .map_err(McpError::from)
    }

    #[tool(
        description = "Report basic health metrics: database size, open connections, table count in \"public\" and buffer cache hit ratio."
    )]
    async fn analyze_db_health(&self) -> Result<Json<DatabaseHealth>, McpError> {
        self.schema_handler()
            .database_health()
            .await
            .map(Json)
            .map_err(McpError::from)
    }

    #[tool(
        description = "List the statements with the highest total execution time.\nRequires the pg_stat_statements extension."
    )]
    async fn get_slow_queries(
        &self,
        Parameters(input): Parameters<SlowQueriesInput>,
    ) -> Result<Json<SlowQueriesOutput>, McpError> {
        self.schema_handler()
            .slow_queries(input)
            .await
            .map(Json)
            .map_err(McpError::from)
    }

    #[tool(
        description = "Describe a table: columns with types, nullability and defaults, the columns an INSERT must supply, and constraints."
    )]
    async fn describe_table(
        &self,
        Parameters(input): Parameters<DescribeTableInput>,
    ) -> Result<Json<DescribeTableOutput>, McpError> {
        self.schema_handler()
            .describe_table(input)
            .await
            .map(Json)
            .map_err(McpError::from)
    }

    #[tool(
        description = "Check the database connection.\nReturns the server version, database, user and the server's restricted/timeout/max_rows settings."
    )]
    async fn test_connection(&self) -> Result<Json<TestConnectionOutput>, McpError> {
        self.schema_handler()
            .test_connection()
            .await
            .map(Json)
            .map_err(McpError::from)
    }
}

#[tool_handler]
impl ServerHandler for PgStructuredService {
    fn get_info(&self) -> ServerInfo {
        let mode = self.mode();
        let access = if mode.restricted {
            "Restricted mode is ON: `execute_sql` and `explain_query` with analyze only accept read-only statements."
        } else {
            "Restricted mode is OFF: `execute_sql` accepts any single statement."
        };
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_03_26,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "pg-structured-mcp".to_owned(),
                title: Some("PostgreSQL Structured Query Server".to_owned()),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                icons: None,
                website_url: None,
            },
            instructions: Some(format!(
                "Schema-validated query tools for PostgreSQL.\n\
                \n\
                ## Workflow\n\
                1. Call `list_tables` and `describe_table` to learn the schema\n\
                2. Prefer `structured_select` and `structured_insert` over raw SQL\n\
                3. Fix every reported violation before retrying; they are listed together\n\
                \n\
                ## Results\n\
                Query tools return `success`, `data`, `row_count` and `query_executed`.\n\
                On failure they return `error`, `error_type` and `message` instead.\n\
                Numeric values are returned as JSON numbers and may lose precision.\n\
                \n\
                ## Limits\n\
                Statements time out after {}s. At most {} rows are returned per query.\n\
                {}",
                mode.query_timeout_secs, mode.max_rows, access
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    fn create_test_service(mode: ServerMode) -> PgStructuredService {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://postgres@localhost/postgres")
            .unwrap();
        PgStructuredService::new(Arc::new(ConnectionManager::from_pool(pool)), mode)
    }

    #[tokio::test]
    async fn test_registers_all_tools() {
        let service = create_test_service(ServerMode::default());
        let mut names: Vec<String> = service
            .tool_router
            .list_all()
            .into_iter()
            .map(|tool| tool.name.to_string())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "analyze_db_health",
                "describe_table",
                "execute_sql",
                "explain_query",
                "get_slow_queries",
                "get_table_sizes",
                "list_objects",
                "list_schemas",
                "list_tables",
                "structured_insert",
                "structured_insert_batch",
                "structured_select",
                "test_connection",
            ]
        );
    }

    #[tokio::test]
    async fn test_server_info_reflects_mode() {
        let service = create_test_service(ServerMode::new(true, 12, 50));
        let info = service.get_info();
        assert_eq!(info.server_info.name, "pg-structured-mcp");
        assert!(info.capabilities.tools.is_some());

        let instructions = info.instructions.unwrap();
        assert!(instructions.contains("12s"));
        assert!(instructions.contains("At most 50 rows"));
        assert!(instructions.contains("Restricted mode is ON"));
    }
}
