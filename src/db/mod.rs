//! Database access layer.
//!
//! This module provides:
//! - The [`Connection`] session boundary and its sqlx implementation
//! - Connection pool management
//! - Schema catalog lookups
//! - Statement execution into result envelopes
//! - Parameter binding and row decoding

pub mod connection;
pub mod executor;
pub mod params;
pub mod pool;
pub mod schema;
pub mod types;

pub use connection::{Connection, PgSession, RowSet};
pub use executor::QueryExecutor;
pub use pool::ConnectionManager;
pub use schema::{DEFAULT_SCHEMA, MAX_LISTING_LIMIT, SchemaCatalog};
