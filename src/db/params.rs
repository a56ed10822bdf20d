//! Parameter binding for PostgreSQL queries.

use crate::models::QueryParam;
use sqlx::Postgres;
use sqlx::postgres::PgArguments;
use sqlx::types::Json;

/// Bind a parameter to a PostgreSQL query.
///
/// NULL is bound as a text-typed null; the builders add a `::type` cast when
/// the target column is known.
pub(crate) fn bind_postgres_param<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Json(v) => query.bind(Json(v)),
    }
}
