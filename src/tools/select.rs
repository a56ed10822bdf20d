//! Structured SELECT tool.
//!
//! Implements `structured_select`: the caller describes the query as JSON,
//! every table and column reference is checked against the live catalog,
//! and only then is the statement built and run.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::info;

use crate::db::{ConnectionManager, QueryExecutor};
use crate::error::DbError;
use crate::models::{
    Condition, JoinSpec, JoinType, Operator, OrderSpec, QueryResult, SelectRequest, SortDirection,
};
use crate::tools::release;

fn default_operator() -> String {
    "=".to_string()
}

/// One JOIN of a structured SELECT.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct JoinInput {
    /// Table to join
    pub table: String,
    /// INNER (default), LEFT, RIGHT or FULL; "LEFT JOIN" and "LEFT OUTER JOIN" are accepted too
    #[serde(default)]
    pub join_type: Option<String>,
    /// Alias for the joined table
    #[serde(default)]
    pub alias: Option<String>,
    /// Join predicate, e.g. "m.director_id = d.id". No placeholders or comments.
    pub on_condition: String,
}

impl TryFrom<JoinInput> for JoinSpec {
    type Error = DbError;

    fn try_from(input: JoinInput) -> Result<Self, Self::Error> {
        let join_type = match input.join_type.as_deref() {
            Some(s) => s.parse::<JoinType>()?,
            None => JoinType::default(),
        };
        let spec = JoinSpec::new(input.table, input.on_condition).with_type(join_type);
        Ok(match input.alias {
            Some(alias) => spec.with_alias(alias),
            None => spec,
        })
    }
}

/// A WHERE or HAVING condition.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ConditionInput {
    /// Column reference; aggregates such as "COUNT(*)" are allowed in HAVING
    pub column: String,
    /// One of =, !=, <>, <, <=, >, >=, LIKE, NOT LIKE, ILIKE, NOT ILIKE, IN, NOT IN,
    /// BETWEEN, IS NULL, IS NOT NULL. Default: "="
    #[serde(default = "default_operator")]
    pub operator: String,
    /// Value to compare with; a list for IN / NOT IN, exactly two values for BETWEEN
    #[serde(default)]
    pub value: JsonValue,
    /// Table name or alias qualifying the column
    #[serde(default)]
    pub table_alias: Option<String>,
}

impl TryFrom<ConditionInput> for Condition {
    type Error = DbError;

    fn try_from(input: ConditionInput) -> Result<Self, Self::Error> {
        let operator = Operator::resolve(&input.operator, &input.value)?;
        let condition = Condition::new(input.column, operator, input.value);
        Ok(match input.table_alias {
            Some(alias) => condition.with_alias(alias),
            None => condition,
        })
    }
}

/// One ORDER BY entry.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct OrderInput {
    pub column: String,
    /// ASC (default) or DESC
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub table_alias: Option<String>,
}

impl TryFrom<OrderInput> for OrderSpec {
    type Error = DbError;

    fn try_from(input: OrderInput) -> Result<Self, Self::Error> {
        let direction = match input.direction.as_deref() {
            Some(s) => s.parse::<SortDirection>()?,
            None => SortDirection::default(),
        };
        let order = OrderSpec::new(input.column, direction);
        Ok(match input.table_alias {
            Some(alias) => order.with_alias(alias),
            None => order,
        })
    }
}

/// Input for the structured_select tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SelectInput {
    /// Main table to query
    pub table: String,
    /// Columns or expressions to select, e.g. "title", "m.title", "COUNT(*) AS total".
    /// Default: ["*"]
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    /// Alias for the main table
    #[serde(default)]
    pub table_alias: Option<String>,
    #[serde(default)]
    pub joins: Vec<JoinInput>,
    /// Conditions combined with AND
    #[serde(default)]
    pub where_conditions: Vec<ConditionInput>,
    #[serde(default)]
    pub group_by: Vec<String>,
    /// Conditions on groups; ignored without group_by
    #[serde(default)]
    pub having_conditions: Vec<ConditionInput>,
    #[serde(default)]
    pub order_by: Vec<OrderInput>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
    /// Use SELECT DISTINCT
    #[serde(default)]
    pub distinct: bool,
}

impl TryFrom<SelectInput> for SelectRequest {
    type Error = DbError;

    fn try_from(input: SelectInput) -> Result<Self, Self::Error> {
        let mut request = SelectRequest::new(input.table).with_distinct(input.distinct);
        if let Some(columns) = input.columns.filter(|c| !c.is_empty()) {
            request = request.with_columns(columns);
        }
        if let Some(alias) = input.table_alias {
            request = request.with_alias(alias);
        }
        request.joins = input
            .joins
            .into_iter()
            .map(JoinSpec::try_from)
            .collect::<Result<_, _>>()?;
        request.where_conditions = input
            .where_conditions
            .into_iter()
            .map(Condition::try_from)
            .collect::<Result<_, _>>()?;
        request.group_by = input.group_by;
        request.having = input
            .having_conditions
            .into_iter()
            .map(Condition::try_from)
            .collect::<Result<_, _>>()?;
        request.order_by = input
            .order_by
            .into_iter()
            .map(OrderSpec::try_from)
            .collect::<Result<_, _>>()?;
        request.limit = input.limit;
        request.offset = input.offset;
        Ok(request)
    }
}

/// Handler for the structured_select tool.
pub struct SelectToolHandler {
    connection_manager: Arc<ConnectionManager>,
    executor: QueryExecutor,
}

impl SelectToolHandler {
    pub fn new(connection_manager: Arc<ConnectionManager>, executor: QueryExecutor) -> Self {
        Self {
            connection_manager,
            executor,
        }
    }

    pub async fn select(&self, input: SelectInput) -> QueryResult {
        let request = match SelectRequest::try_from(input) {
            Ok(request) => request,
            Err(e) => return QueryResult::failure(&e, None),
        };
        info!(
            table = %request.table,
            joins = request.joins.len(),
            conditions = request.where_conditions.len(),
            "structured_select"
        );

        let mut session = match self.connection_manager.acquire().await {
            Ok(session) => session,
            Err(e) => return QueryResult::failure(&e, None),
        };
        let result = self.executor.execute_select(&mut session, &request).await;
        release(session).await;
        result
    }
}
