//! Integration tests for the schema catalog and the introspection helpers.

mod common;

use common::ScriptedConnection;
use pg_structured_mcp::config::ServerMode;
use pg_structured_mcp::db::SchemaCatalog;
use pg_structured_mcp::error::DbError;
use pg_structured_mcp::models::{ObjectKind, QueryParam};
use serde_json::json;
use pg_structured_mcp::tools::schema::{connection_details, describe};

#[tokio::test]
async fn test_table_exists() {
    let mut conn = ScriptedConnection::with_film_tables();
    let mut catalog = SchemaCatalog::new(&mut conn);

    assert!(catalog.table_exists("movies").await.unwrap());
    assert!(!catalog.table_exists("films").await.unwrap());
}

#[tokio::test]
async fn test_table_schema_keeps_declaration_order() {
    let mut conn = ScriptedConnection::with_film_tables();
    let schema = SchemaCatalog::new(&mut conn)
        .get_table_schema("movies")
        .await
        .unwrap();

    let names: Vec<&str> = schema.column_names().collect();
    assert_eq!(names, vec!["id", "title", "release_year", "rating", "director_id"]);

    let title = schema.get("title").unwrap();
    assert_eq!(title.data_type, "text");
    assert!(!title.nullable);

    let required: Vec<&str> = schema.required_columns().map(|c| c.name.as_str()).collect();
    assert_eq!(required, vec!["title"]);
}

#[tokio::test]
async fn test_unknown_table_has_no_columns() {
    let mut conn = ScriptedConnection::with_film_tables();
    let schema = SchemaCatalog::new(&mut conn)
        .get_table_schema("films")
        .await
        .unwrap();
    assert!(schema.columns.is_empty());
}

#[tokio::test]
async fn test_lookups_are_scoped_to_schema() {
    let mut conn = ScriptedConnection::with_film_tables();
    SchemaCatalog::new(&mut conn)
        .in_schema("archive")
        .table_exists("movies")
        .await
        .unwrap();

    assert_eq!(
        conn.log[0].params,
        vec![
            QueryParam::String("archive".into()),
            QueryParam::String("movies".into())
        ]
    );
}

#[tokio::test]
async fn test_catalog_failure_is_schema_lookup_error() {
    let mut conn = ScriptedConnection::with_film_tables().fail_catalog();
    let err = SchemaCatalog::new(&mut conn)
        .table_exists("movies")
        .await
        .unwrap_err();

    assert!(matches!(err, DbError::SchemaLookup { .. }));
    assert!(err.to_string().contains("movies"));
}

#[tokio::test]
async fn test_catalog_is_not_cached() {
    let mut conn = ScriptedConnection::with_film_tables();
    {
        let mut catalog = SchemaCatalog::new(&mut conn);
        catalog.get_table_schema("movies").await.unwrap();
        catalog.get_table_schema("movies").await.unwrap();
    }
    assert_eq!(conn.log.len(), 2);
}

#[tokio::test]
async fn test_list_schemas_and_tables() {
    let mut conn = ScriptedConnection::with_film_tables();
    let mut catalog = SchemaCatalog::new(&mut conn);

    let schemas = catalog.list_schemas().await.unwrap();
    let names: Vec<&str> = schemas.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["analytics", "public"]);

    let tables = catalog.list_tables().await.unwrap();
    let names: Vec<&str> = tables.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["directors", "movies"]);
    assert_eq!(tables[0].size_bytes, Some(16384));
    assert!(tables[0].size_formatted.is_some());
}

#[tokio::test]
async fn test_describe_table() {
    let mut conn = ScriptedConnection::with_film_tables();
    let output = describe(&mut conn, "public", "movies").await.unwrap();

    assert_eq!(output.table, "movies");
    assert_eq!(output.columns.len(), 5);
    assert_eq!(output.required_columns, vec!["title"]);
    assert_eq!(output.constraints[0].name, "movies_pkey");
    assert_eq!(output.constraints[0].constraint_type, "PRIMARY KEY");
    assert_eq!(output.constraints[0].columns, vec!["id"]);
}

#[tokio::test]
async fn test_describe_unknown_table() {
    let mut conn = ScriptedConnection::with_film_tables();
    let err = describe(&mut conn, "public", "films").await.unwrap_err();
    assert_eq!(err.error_type(), "UnknownTableError");
}

#[tokio::test]
async fn test_connection_details_report_mode() {
    let mut conn = ScriptedConnection::new();
    let output = connection_details(&mut conn, ServerMode::new(true, 60, 250))
        .await
        .unwrap();

    assert!(output.connected);
    assert!(output.version.unwrap().starts_with("PostgreSQL 16"));
    assert_eq!(output.database.as_deref(), Some("films"));
    assert_eq!(output.user.as_deref(), Some("reader"));
    assert!(output.restricted);
    assert_eq!(output.query_timeout_secs, 60);
    assert_eq!(output.max_rows, 250);
}

#[tokio::test]
async fn test_list_objects_by_kind() {
    let long_definition = format!(" SELECT {} FROM movies;", "title, ".repeat(60));
    let mut conn = ScriptedConnection::with_film_tables()
        .with_view("recent_movies", " SELECT id, title FROM movies WHERE release_year > 2000;")
        .with_view("wide_movies", &long_definition);
    let mut catalog = SchemaCatalog::new(&mut conn);

    let tables = catalog.list_objects(ObjectKind::Tables).await.unwrap();
    assert_eq!(tables.len(), 2);
    assert_eq!(tables[1].name, "movies");
    assert_eq!(tables[1].object_type.as_deref(), Some("BASE TABLE"));

    let views = catalog.list_objects(ObjectKind::Views).await.unwrap();
    assert_eq!(views[0].name, "recent_movies");
    assert!(views[0].definition.as_deref().unwrap().contains("release_year > 2000"));
    let wide = views[1].definition.as_deref().unwrap();
    assert!(wide.ends_with("..."));
    assert_eq!(wide.chars().count(), 203);

    let indexes = catalog.list_objects(ObjectKind::Indexes).await.unwrap();
    assert_eq!(indexes[1].name, "movies_pkey");
    assert_eq!(indexes[1].table.as_deref(), Some("movies"));
    assert!(indexes[1].definition.as_deref().unwrap().starts_with("CREATE UNIQUE INDEX"));
}

#[tokio::test]
async fn test_list_objects_passes_schema() {
    let mut conn = ScriptedConnection::with_film_tables();
    SchemaCatalog::new(&mut conn)
        .in_schema("archive")
        .list_objects(ObjectKind::Indexes)
        .await
        .unwrap();
    assert!(conn.log[0].sql.contains("pg_indexes"));
    assert_eq!(conn.log[0].params, vec![QueryParam::String("archive".into())]);
}

#[tokio::test]
async fn test_table_sizes_largest_first_with_limit() {
    let mut conn = ScriptedConnection::with_film_tables();
    let tables = SchemaCatalog::new(&mut conn).table_sizes(1).await.unwrap();

    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].name, "movies");
    assert_eq!(tables[0].size_bytes, Some(5 * 8192));
    assert_eq!(
        conn.log[0].params,
        vec![QueryParam::String("public".into()), QueryParam::Int(1)]
    );
}

#[tokio::test]
async fn test_table_sizes_limit_is_clamped() {
    let mut conn = ScriptedConnection::with_film_tables();
    let mut catalog = SchemaCatalog::new(&mut conn);
    catalog.table_sizes(0).await.unwrap();
    catalog.table_sizes(1_000_000).await.unwrap();

    assert_eq!(conn.log[0].params[1], QueryParam::Int(1));
    assert_eq!(conn.log[1].params[1], QueryParam::Int(1000));
}

#[tokio::test]
async fn test_database_health() {
    let mut conn = ScriptedConnection::with_film_tables();
    let health = SchemaCatalog::new(&mut conn).database_health().await.unwrap();

    assert_eq!(health.database_size_bytes, 7_864_320);
    assert_eq!(health.database_size, "7.50 MB");
    assert_eq!(health.active_connections, 4);
    assert_eq!(health.table_count, 2);
    assert!((health.cache_hit_ratio_percent - 99.12).abs() < f64::EPSILON);
    assert!(chrono::DateTime::parse_from_rfc3339(&health.checked_at).is_ok());
}

#[tokio::test]
async fn test_slow_queries_need_extension() {
    let mut conn = ScriptedConnection::with_film_tables();
    let err = SchemaCatalog::new(&mut conn).slow_queries(10).await.unwrap_err();

    assert!(matches!(err, DbError::SchemaLookup { .. }));
    assert!(err.to_string().contains("pg_stat_statements"));
    // only the extension check ran
    assert_eq!(conn.log.len(), 1);
}

#[tokio::test]
async fn test_slow_queries_ordered_and_limited() {
    let long_query = format!("SELECT {} FROM movies", "title, ".repeat(60));
    let mut conn = ScriptedConnection::with_film_tables().with_statement_stats(vec![
        vec![json!(long_query), json!(12), json!(5400.5), json!(450.04), json!(120)],
        vec![json!("SELECT * FROM directors WHERE id = $1"), json!(900), json!(81.0), json!(0.09), json!(900)],
        vec![json!("SELECT 1"), json!(3), json!(0.3), json!(0.1), json!(3)],
    ]);
    let queries = SchemaCatalog::new(&mut conn).slow_queries(2).await.unwrap();

    assert_eq!(queries.len(), 2);
    assert!(queries[0].query.ends_with("..."));
    assert_eq!(queries[0].calls, 12);
    assert!((queries[0].total_time_ms - 5400.5).abs() < f64::EPSILON);
    assert_eq!(queries[1].rows, 900);
    assert_eq!(conn.log[1].params, vec![QueryParam::Int(2)]);
}

#[tokio::test]
async fn test_statistics_failure_is_schema_lookup_error() {
    let mut conn = ScriptedConnection::with_film_tables().fail_catalog();
    let err = SchemaCatalog::new(&mut conn).database_health().await.unwrap_err();
    assert!(matches!(err, DbError::SchemaLookup { .. }));
}
