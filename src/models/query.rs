//! Query-related data models.
//!
//! Structured SELECT and INSERT requests, the parameter values they bind, and
//! the result envelope every core tool returns.

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::{DbError, DbResult};

/// Default cap on rows returned by a SELECT.
pub const DEFAULT_MAX_ROWS: u32 = 1000;

/// Maximum allowed row cap.
pub const MAX_ROW_LIMIT: u32 = 10000;

/// Default statement timeout in seconds.
pub const DEFAULT_QUERY_TIMEOUT_SECS: u32 = 30;

/// Maximum statement timeout in seconds.
pub const MAX_QUERY_TIMEOUT_SECS: u32 = 300;

/// Default number of rows per batch-insert chunk.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// A parameter value for parameterized queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Arrays and objects, bound as JSONB
    Json(JsonValue),
}

impl QueryParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Json(_) => "json",
        }
    }
}

impl From<JsonValue> for QueryParam {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => Self::String(s),
            other => Self::Json(other),
        }
    }
}

impl From<i64> for QueryParam {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for QueryParam {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

/// Comparison operator of a WHERE or HAVING condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    NotEq,
    /// `<>`, kept distinct from `!=` so the SQL echoes the caller's spelling
    LtGt,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Like,
    NotLike,
    ILike,
    NotILike,
    In,
    NotIn,
    Between,
    IsNull,
    IsNotNull,
}

impl Operator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::LtGt => "<>",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::Like => "LIKE",
            Self::NotLike => "NOT LIKE",
            Self::ILike => "ILIKE",
            Self::NotILike => "NOT ILIKE",
            Self::In => "IN",
            Self::NotIn => "NOT IN",
            Self::Between => "BETWEEN",
            Self::IsNull => "IS NULL",
            Self::IsNotNull => "IS NOT NULL",
        }
    }

    /// True for operators that compare against exactly one bound value.
    pub fn is_single_value(&self) -> bool {
        !matches!(
            self,
            Self::In | Self::NotIn | Self::Between | Self::IsNull | Self::IsNotNull
        )
    }

    /// Resolve an operator string together with its value.
    ///
    /// `IS` and `IS NOT` are only accepted with a NULL value (JSON null or the
    /// string `"NULL"`) and resolve to [`Operator::IsNull`] / [`Operator::IsNotNull`].
    pub fn resolve(operator: &str, value: &JsonValue) -> DbResult<Self> {
        let normalized = operator.split_whitespace().collect::<Vec<_>>().join(" ");
        match normalized.to_ascii_uppercase().as_str() {
            "IS" | "IS NOT" => {
                let is_null = match value {
                    JsonValue::Null => true,
                    JsonValue::String(s) => s.eq_ignore_ascii_case("NULL"),
                    _ => false,
                };
                if !is_null {
                    return Err(DbError::invalid_operator_arguments(
                        normalized,
                        "IS and IS NOT only accept NULL",
                    ));
                }
                if normalized.eq_ignore_ascii_case("IS") {
                    Ok(Self::IsNull)
                } else {
                    Ok(Self::IsNotNull)
                }
            }
            _ => normalized.parse(),
        }
    }
}

impl FromStr for Operator {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ");
        let op = match normalized.to_ascii_uppercase().as_str() {
            "=" => Self::Eq,
            "!=" => Self::NotEq,
            "<>" => Self::LtGt,
            "<" => Self::Lt,
            "<=" => Self::LtEq,
            ">" => Self::Gt,
            ">=" => Self::GtEq,
            "LIKE" => Self::Like,
            "NOT LIKE" => Self::NotLike,
            "ILIKE" => Self::ILike,
            "NOT ILIKE" => Self::NotILike,
            "IN" => Self::In,
            "NOT IN" => Self::NotIn,
            "BETWEEN" => Self::Between,
            "IS NULL" => Self::IsNull,
            "IS NOT NULL" => Self::IsNotNull,
            _ => {
                return Err(DbError::invalid_operator_arguments(
                    s,
                    "unsupported operator",
                ));
            }
        };
        Ok(op)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinType {
    #[default]
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

impl JoinType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Inner => "INNER JOIN",
            Self::Left => "LEFT JOIN",
            Self::Right => "RIGHT JOIN",
            Self::Full => "FULL JOIN",
            Self::Cross => "CROSS JOIN",
        }
    }
}

impl FromStr for JoinType {
    type Err = DbError;

    /// Accepts `INNER`, `LEFT OUTER JOIN`, `full`, ... in any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_ascii_uppercase();
        let words: Vec<&str> = upper
            .split_whitespace()
            .filter(|w| *w != "JOIN" && *w != "OUTER")
            .collect();
        match words.as_slice() {
            [] | ["INNER"] => Ok(Self::Inner),
            ["LEFT"] => Ok(Self::Left),
            ["RIGHT"] => Ok(Self::Right),
            ["FULL"] => Ok(Self::Full),
            ["CROSS"] => Ok(Self::Cross),
            _ => Err(DbError::invalid_input(format!("Unsupported join type '{}'", s))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

impl FromStr for SortDirection {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "" | "ASC" => Ok(Self::Asc),
            "DESC" => Ok(Self::Desc),
            _ => Err(DbError::invalid_input(format!(
                "Sort direction must be ASC or DESC, got '{}'",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinSpec {
    pub table: String,
    pub join_type: JoinType,
    pub alias: Option<String>,
    /// Raw join predicate, e.g. `m.director_id = d.id`. Emitted verbatim.
    pub on_condition: String,
}

impl JoinSpec {
    pub fn new(table: impl Into<String>, on_condition: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            join_type: JoinType::default(),
            alias: None,
            on_condition: on_condition.into(),
        }
    }

    pub fn with_type(mut self, join_type: JoinType) -> Self {
        self.join_type = join_type;
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Name the joined table is reachable under in the query.
    pub fn reference_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }
}

/// A WHERE or HAVING predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub column: String,
    pub operator: Operator,
    /// Scalar for single-value operators, array for IN and BETWEEN,
    /// ignored for IS NULL / IS NOT NULL.
    pub value: JsonValue,
    pub table_alias: Option<String>,
}

impl Condition {
    pub fn new(column: impl Into<String>, operator: Operator, value: JsonValue) -> Self {
        Self {
            column: column.into(),
            operator,
            value,
            table_alias: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.table_alias = Some(alias.into());
        self
    }

    /// Column reference as written in SQL: `alias.column` or `column`.
    pub fn reference(&self) -> String {
        qualify(self.table_alias.as_deref(), &self.column)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderSpec {
    pub column: String,
    pub direction: SortDirection,
    pub table_alias: Option<String>,
}

impl OrderSpec {
    pub fn new(column: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            column: column.into(),
            direction,
            table_alias: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.table_alias = Some(alias.into());
        self
    }

    pub fn reference(&self) -> String {
        qualify(self.table_alias.as_deref(), &self.column)
    }
}

pub(crate) fn qualify(alias: Option<&str>, column: &str) -> String {
    match alias {
        Some(alias) => format!("{}.{}", alias, column),
        None => column.to_string(),
    }
}

/// A structured SELECT.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectRequest {
    pub table: String,
    /// Column references; `["*"]` selects everything and skips validation.
    pub columns: Vec<String>,
    pub alias: Option<String>,
    pub distinct: bool,
    pub joins: Vec<JoinSpec>,
    pub where_conditions: Vec<Condition>,
    pub group_by: Vec<String>,
    pub having: Vec<Condition>,
    pub order_by: Vec<OrderSpec>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl SelectRequest {
    /// Select every column of `table`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: vec!["*".to_string()],
            alias: None,
            distinct: false,
            joins: Vec::new(),
            where_conditions: Vec::new(),
            group_by: Vec::new(),
            having: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_distinct(mut self, distinct: bool) -> Self {
        self.distinct = distinct;
        self
    }

    pub fn with_join(mut self, join: JoinSpec) -> Self {
        self.joins.push(join);
        self
    }

    pub fn with_where(mut self, condition: Condition) -> Self {
        self.where_conditions.push(condition);
        self
    }

    pub fn with_group_by<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group_by = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_having(mut self, condition: Condition) -> Self {
        self.having.push(condition);
        self
    }

    pub fn with_order_by(mut self, order: OrderSpec) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// True when the request selects `*` and column validation is skipped.
    pub fn selects_all(&self) -> bool {
        self.columns.is_empty() || (self.columns.len() == 1 && self.columns[0].trim() == "*")
    }
}

/// What to do when an INSERT collides with a uniqueness constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// No ON CONFLICT clause (default)
    #[default]
    None,
    /// ON CONFLICT DO NOTHING
    Ignore,
    /// ON CONFLICT (target) DO UPDATE SET ...
    Update,
}

/// A structured single-row INSERT.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertRequest {
    pub table: String,
    /// Column to value mapping, in the order the columns are inserted.
    pub row: Map<String, JsonValue>,
    pub on_conflict: ConflictPolicy,
    pub conflict_target: Vec<String>,
    /// Overrides the default update set (inserted columns minus the target).
    pub update_columns: Option<Vec<String>>,
    pub returning: Vec<String>,
}

impl InsertRequest {
    pub fn new(table: impl Into<String>, row: Map<String, JsonValue>) -> Self {
        Self {
            table: table.into(),
            row,
            on_conflict: ConflictPolicy::None,
            conflict_target: Vec::new(),
            update_columns: None,
            returning: Vec::new(),
        }
    }

    pub fn on_conflict_ignore(mut self) -> Self {
        self.on_conflict = ConflictPolicy::Ignore;
        self
    }

    pub fn on_conflict_update<I, S>(mut self, target: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.on_conflict = ConflictPolicy::Update;
        self.conflict_target = target.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_update_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.update_columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_returning<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.returning = columns.into_iter().map(Into::into).collect();
        self
    }
}

/// Many rows sharing one column set, inserted in chunks.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertBatchRequest {
    pub table: String,
    pub rows: Vec<Map<String, JsonValue>>,
    pub on_conflict: ConflictPolicy,
    pub conflict_target: Vec<String>,
    pub update_columns: Option<Vec<String>>,
    pub returning: Vec<String>,
    pub batch_size: usize,
}

impl InsertBatchRequest {
    pub fn new(table: impl Into<String>, rows: Vec<Map<String, JsonValue>>) -> Self {
        Self {
            table: table.into(),
            rows,
            on_conflict: ConflictPolicy::None,
            conflict_target: Vec::new(),
            update_columns: None,
            returning: Vec::new(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// The single-row request describing the shared column set and policy.
    pub fn template(&self) -> Option<InsertRequest> {
        let first = self.rows.first()?;
        Some(InsertRequest {
            table: self.table.clone(),
            row: first.clone(),
            on_conflict: self.on_conflict,
            conflict_target: self.conflict_target.clone(),
            update_columns: self.update_columns.clone(),
            returning: self.returning.clone(),
        })
    }
}

/// Result envelope returned by every core operation.
///
/// NUMERIC/DECIMAL values in `data` are converted to `f64` for transport. The
/// conversion is lossy: callers needing exact decimal semantics should cast
/// such columns to text in their query.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct QueryResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Error kind tag, e.g. "ValidationError" or "ExecutionError"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    /// Result rows with fields in column order
    pub data: Vec<Map<String, JsonValue>>,
    /// Rows returned for SELECT, rows affected for writes
    pub row_count: u64,
    /// SQL text that was (or would have been) executed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_executed: Option<String>,
    pub columns: Vec<String>,
    /// True if rows beyond the configured cap were dropped
    #[serde(default)]
    pub truncated: bool,
    #[serde(default)]
    pub execution_time_ms: u64,
    /// Non-fatal findings such as ambiguous column references
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Value of the `id` column when it was requested via RETURNING
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inserted_id: Option<JsonValue>,
    /// Zero-based index of the batch chunk that failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_batch: Option<usize>,
}

impl QueryResult {
    /// Successful result carrying rows.
    pub fn rows(
        columns: Vec<String>,
        data: Vec<Map<String, JsonValue>>,
        query_executed: impl Into<String>,
    ) -> Self {
        let row_count = data.len() as u64;
        Self {
            success: true,
            message: Some(format!("Query returned {} row(s)", row_count)),
            data,
            row_count,
            query_executed: Some(query_executed.into()),
            columns,
            ..Self::default()
        }
    }

    /// Successful write without returned rows.
    pub fn affected(rows_affected: u64, query_executed: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(format!("{} row(s) affected", rows_affected)),
            row_count: rows_affected,
            query_executed: Some(query_executed.into()),
            ..Self::default()
        }
    }

    /// Failed result tagged with the error kind.
    pub fn failure(err: &DbError, query_executed: Option<String>) -> Self {
        Self {
            success: false,
            message: Some(format!("Failed: {}", err)),
            error: Some(err.to_string()),
            error_type: Some(err.error_type().to_string()),
            query_executed,
            ..Self::default()
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }

    pub fn with_execution_time(mut self, execution_time_ms: u64) -> Self {
        self.execution_time_ms = execution_time_ms;
        self
    }
}
