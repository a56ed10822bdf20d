//! Error types for the structured query server.
//!
//! Every failure that can happen while turning a request into SQL, or while
//! running that SQL, is a [`DbError`]. The core tools never let these escape as
//! protocol errors: they are folded into a [`QueryResult`](crate::models::QueryResult)
//! envelope tagged with [`DbError::error_type`]. Introspection tools map them to
//! MCP error data instead.

use std::fmt;

use thiserror::Error;

/// A single reference problem found while validating a request.
///
/// Validation collects all of these before failing, so a caller sees every
/// bad table and column in one round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    UnknownTable {
        table: String,
    },
    UnknownColumn {
        column: String,
        /// Closest schema column or the list of available columns.
        hint: Option<String>,
    },
    MissingRequiredColumn {
        column: String,
    },
}

impl Violation {
    pub fn unknown_table(table: impl Into<String>) -> Self {
        Self::UnknownTable {
            table: table.into(),
        }
    }

    pub fn unknown_column(column: impl Into<String>, hint: Option<String>) -> Self {
        Self::UnknownColumn {
            column: column.into(),
            hint,
        }
    }

    pub fn missing_required(column: impl Into<String>) -> Self {
        Self::MissingRequiredColumn {
            column: column.into(),
        }
    }

    /// Tag of the most specific error kind this violation represents.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::UnknownTable { .. } => "UnknownTableError",
            Self::UnknownColumn { .. } => "UnknownColumnError",
            Self::MissingRequiredColumn { .. } => "ValidationError",
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownTable { table } => write!(f, "Table '{}' does not exist", table),
            Self::UnknownColumn { column, hint } => {
                write!(f, "Invalid column reference '{}'", column)?;
                if let Some(hint) = hint {
                    write!(f, " ({})", hint)?;
                }
                Ok(())
            }
            Self::MissingRequiredColumn { column } => {
                write!(f, "Missing required column '{}'", column)
            }
        }
    }
}

/// Ways an INSERT conflict policy can be inconsistent with its row.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConflictPolicyViolation {
    #[error("conflict_target is required when on_conflict is 'update'")]
    MissingConflictTarget,

    #[error("Cannot update columns that were not inserted: {}", .0.join(", "))]
    InvalidUpdateColumns(Vec<String>),

    #[error("No columns specified to update on conflict")]
    NoUpdateColumns,
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Schema lookup failed: {message} (object: {object})")]
    SchemaLookup { message: String, object: String },

    #[error("Validation errors: {}", join_violations(.violations))]
    Validation { violations: Vec<Violation> },

    #[error("Invalid arguments for operator {operator}: {message}")]
    InvalidOperatorArguments { operator: String, message: String },

    #[error("Conflict policy error: {0}")]
    ConflictPolicy(#[from] ConflictPolicyViolation),

    #[error("Execution failed: {message}")]
    Execution {
        message: String,
        /// e.g., "23505" for unique violation
        sql_state: Option<String>,
    },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Permission denied: {operation} - {reason}")]
    Permission { operation: String, reason: String },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u32,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a schema lookup error for a catalog access fault.
    pub fn schema_lookup(message: impl Into<String>, object: impl Into<String>) -> Self {
        Self::SchemaLookup {
            message: message.into(),
            object: object.into(),
        }
    }

    /// Create a validation error from the collected violations.
    pub fn validation(violations: Vec<Violation>) -> Self {
        Self::Validation { violations }
    }

    pub fn invalid_operator_arguments(
        operator: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidOperatorArguments {
            operator: operator.into(),
            message: message.into(),
        }
    }

    /// Create an execution error with optional SQL state.
    pub fn execution(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Execution {
            message: message.into(),
            sql_state,
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a permission error.
    pub fn permission(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Permission {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u32) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Tag reported in the `error_type` field of a failed result envelope.
    ///
    /// A validation error whose violations are all of one kind reports that
    /// kind (`UnknownTableError`, `UnknownColumnError`); mixed sets report
    /// the generic `ValidationError`.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::SchemaLookup { .. } => "SchemaLookupError",
            Self::Validation { violations } => {
                let mut kinds = violations.iter().map(Violation::error_type);
                match kinds.next() {
                    Some(first) if kinds.all(|k| k == first) => first,
                    _ => "ValidationError",
                }
            }
            Self::InvalidOperatorArguments { .. } => "InvalidOperatorArgumentsError",
            Self::ConflictPolicy(ConflictPolicyViolation::InvalidUpdateColumns(_)) => {
                "InvalidUpdateColumnsError"
            }
            Self::ConflictPolicy(ConflictPolicyViolation::NoUpdateColumns) => {
                "NoUpdateColumnsError"
            }
            Self::ConflictPolicy(_) => "ConflictPolicyError",
            Self::Execution { .. } => "ExecutionError",
            Self::Connection { .. } => "ConnectionError",
            Self::Permission { .. } => "PermissionError",
            Self::Timeout { .. } => "TimeoutError",
            Self::InvalidInput { .. } => "InvalidInputError",
            Self::Internal { .. } => "InternalError",
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Validation { .. } => Some("Use describe_table to inspect the available columns"),
            Self::Permission { .. } => {
                Some("The server runs in restricted mode; only read-only statements are allowed")
            }
            _ => None,
        }
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                database_error(db_err.message(), db_err.code().map(|c| c.to_string()))
            }
            sqlx::Error::RowNotFound => DbError::execution("No rows returned", None),
            sqlx::Error::PoolTimedOut => DbError::timeout("connection pool acquire", 30),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Restart the server")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Map a server-reported error to an execution error.
///
/// Data exceptions (SQLSTATE class 22) quote the offending input in their
/// message, so only a description of the code is kept for those.
fn database_error(message: &str, code: Option<String>) -> DbError {
    let message = match code.as_deref() {
        // statement_timeout fired
        Some("57014") => "Query cancelled by statement timeout",
        Some(c) if c.starts_with("22") => data_exception(c),
        _ => message,
    };
    DbError::execution(message, code)
}

fn data_exception(code: &str) -> &'static str {
    match code {
        "22001" => "Value too long for the column type",
        "22003" => "Numeric value out of range for the column type",
        "22007" | "22008" => "Invalid date or time value",
        "22012" => "Division by zero",
        "22P02" => "Invalid input syntax for the column type",
        "22P05" => "Untranslatable character in value",
        _ => "Invalid data value",
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

/// Build suggestion data as JSON value.
fn suggestion_data(suggestion: Option<&str>) -> Option<serde_json::Value> {
    suggestion.map(|s| serde_json::json!({ "suggestion": s }))
}

/// Convert DbError to MCP ErrorData for the introspection tools.
impl From<DbError> for rmcp::ErrorData {
    fn from(err: DbError) -> Self {
        let data = suggestion_data(err.suggestion());
        match &err {
            DbError::SchemaLookup { .. } => rmcp::ErrorData::resource_not_found(err.to_string(), data),
            DbError::Execution { message, sql_state } => {
                let msg = match sql_state {
                    Some(code) => format!("{} (SQLSTATE: {})", message, code),
                    None => message.clone(),
                };
                rmcp::ErrorData::invalid_params(msg, data)
            }
            DbError::Connection { .. } | DbError::Timeout { .. } | DbError::Internal { .. } => {
                rmcp::ErrorData::internal_error(err.to_string(), data)
            }
            _ => rmcp::ErrorData::invalid_params(err.to_string(), data),
        }
    }
}
