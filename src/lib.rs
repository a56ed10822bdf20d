//! Structured PostgreSQL query server library.
//!
//! Callers describe SELECT and INSERT statements as JSON. Every table and
//! column reference is checked against the live catalog before any SQL is
//! sent, then the statement is built with bound parameters and executed
//! under a statement timeout and row cap. Results come back in a uniform
//! JSON envelope ([`models::QueryResult`]).
//!
//! The pieces can be used without the MCP layer:
//!
//! - [`db::SchemaCatalog`] reads table and column metadata
//! - [`query`] validates requests and builds parameterized SQL
//! - [`db::QueryExecutor`] runs requests over any [`db::Connection`]

pub mod config;
pub mod db;
pub mod error;
pub mod mcp;
pub mod models;
pub mod query;
pub mod tools;
pub mod transport;

pub use config::{Config, ServerMode};
pub use db::{Connection, ConnectionManager, QueryExecutor, SchemaCatalog};
pub use error::{DbError, DbResult};
pub use mcp::PgStructuredService;
pub use models::QueryResult;
