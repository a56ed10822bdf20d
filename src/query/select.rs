//! SELECT statement assembly.
//!
//! Clauses are always emitted in the order SELECT, FROM, JOIN, WHERE,
//! GROUP BY, HAVING, ORDER BY, LIMIT, OFFSET, whatever order the builder
//! methods were called in.

use serde_json::Value as JsonValue;

use super::validator::SchemaRegistry;
use super::{BuiltQuery, ParamList, PlaceholderStyle, contains_placeholder, is_identifier};
use crate::error::{DbError, DbResult};
use crate::models::{Condition, JoinSpec, Operator, OrderSpec, QueryParam, SelectRequest};

/// Builder with one method per clause kind.
#[derive(Debug, Clone, Default)]
pub struct SelectBuilder<'r> {
    distinct: bool,
    columns: Vec<String>,
    table: Option<String>,
    alias: Option<String>,
    joins: Vec<JoinSpec>,
    where_conditions: Vec<Condition>,
    group_by: Vec<String>,
    having: Vec<Condition>,
    order_by: Vec<OrderSpec>,
    limit: Option<u64>,
    offset: Option<u64>,
    registry: Option<&'r SchemaRegistry>,
}

impl<'r> SelectBuilder<'r> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder pre-filled with every clause of the request.
    pub fn from_request(request: &SelectRequest) -> Self {
        Self {
            distinct: request.distinct,
            columns: request.columns.clone(),
            table: Some(request.table.clone()),
            alias: request.alias.clone(),
            joins: request.joins.clone(),
            where_conditions: request.where_conditions.clone(),
            group_by: request.group_by.clone(),
            having: request.having.clone(),
            order_by: request.order_by.clone(),
            limit: request.limit,
            offset: request.offset,
            registry: None,
        }
    }

    /// Use column types from `registry` to cast numbered placeholders.
    pub fn with_registry(mut self, registry: &'r SchemaRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn distinct(mut self, distinct: bool) -> Self {
        self.distinct = distinct;
        self
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn from(mut self, table: impl Into<String>, alias: Option<&str>) -> Self {
        self.table = Some(table.into());
        self.alias = alias.map(str::to_string);
        self
    }

    pub fn join(mut self, join: JoinSpec) -> Self {
        self.joins.push(join);
        self
    }

    pub fn and_where(mut self, condition: Condition) -> Self {
        self.where_conditions.push(condition);
        self
    }

    pub fn group_by(mut self, column: impl Into<String>) -> Self {
        self.group_by.push(column.into());
        self
    }

    pub fn having(mut self, condition: Condition) -> Self {
        self.having.push(condition);
        self
    }

    pub fn order_by(mut self, order: OrderSpec) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Render the statement.
    ///
    /// References are not validated here; see
    /// [`validate_select`](super::validate_select). Structural problems
    /// (missing FROM, malformed aliases or join predicates, operator arity)
    /// are rejected.
    pub fn build(self, style: PlaceholderStyle) -> DbResult<BuiltQuery> {
        let table = self
            .table
            .as_deref()
            .ok_or_else(|| DbError::invalid_input("SELECT requires a table"))?;
        self.check_structure()?;

        let mut params = ParamList::new(style);
        let mut warnings = Vec::new();
        let mut parts = Vec::new();

        let columns = if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns.join(", ")
        };
        parts.push(if self.distinct {
            format!("SELECT DISTINCT {}", columns)
        } else {
            format!("SELECT {}", columns)
        });

        parts.push(match &self.alias {
            Some(alias) => format!("FROM {} AS {}", table, alias),
            None => format!("FROM {}", table),
        });

        for join in &self.joins {
            let target = match &join.alias {
                Some(alias) => format!("{} AS {}", join.table, alias),
                None => join.table.clone(),
            };
            parts.push(format!(
                "{} {} ON {}",
                join.join_type.as_sql(),
                target,
                join.on_condition.trim()
            ));
        }

        if !self.where_conditions.is_empty() {
            let rendered = self
                .where_conditions
                .iter()
                .map(|c| self.render_condition(c, &mut params))
                .collect::<DbResult<Vec<_>>>()?;
            parts.push(format!("WHERE {}", rendered.join(" AND ")));
        }

        if !self.group_by.is_empty() {
            parts.push(format!("GROUP BY {}", self.group_by.join(", ")));

            if !self.having.is_empty() {
                let rendered = self
                    .having
                    .iter()
                    .map(|c| {
                        if !c.operator.is_single_value() {
                            return Err(DbError::invalid_operator_arguments(
                                c.operator.as_sql(),
                                "HAVING supports single-value comparisons only",
                            ));
                        }
                        self.render_condition(c, &mut params)
                    })
                    .collect::<DbResult<Vec<_>>>()?;
                parts.push(format!("HAVING {}", rendered.join(" AND ")));
            }
        } else if !self.having.is_empty() {
            warnings.push("HAVING conditions ignored because GROUP BY is empty".to_string());
        }

        if !self.order_by.is_empty() {
            let rendered: Vec<String> = self
                .order_by
                .iter()
                .map(|o| format!("{} {}", o.reference(), o.direction.as_sql()))
                .collect();
            parts.push(format!("ORDER BY {}", rendered.join(", ")));
        }

        // Literal integers: u64 cannot carry anything but digits.
        if let Some(limit) = self.limit {
            parts.push(format!("LIMIT {}", limit));
        }
        if let Some(offset) = self.offset {
            parts.push(format!("OFFSET {}", offset));
        }

        Ok(BuiltQuery {
            sql: parts.join(" "),
            params: params.into_values(),
            warnings,
        })
    }

    fn check_structure(&self) -> DbResult<()> {
        let aliases = self
            .alias
            .iter()
            .chain(self.joins.iter().filter_map(|j| j.alias.as_ref()));
        for alias in aliases {
            if !is_identifier(alias) {
                return Err(DbError::invalid_input(format!(
                    "Alias '{}' must be a plain identifier",
                    alias
                )));
            }
        }

        for join in &self.joins {
            let on = join.on_condition.trim();
            if on.is_empty() {
                return Err(DbError::invalid_input(format!(
                    "Join on '{}' requires an on_condition",
                    join.table
                )));
            }
            if contains_placeholder(on) {
                return Err(DbError::invalid_input(format!(
                    "on_condition for '{}' must not contain parameter placeholders",
                    join.table
                )));
            }
            if on.contains(';') || on.contains("--") || on.contains("/*") {
                return Err(DbError::invalid_input(format!(
                    "on_condition for '{}' must be a single join predicate",
                    join.table
                )));
            }
        }

        for condition in self.where_conditions.iter().chain(&self.having) {
            if let Some(alias) = &condition.table_alias {
                if !is_identifier(alias) {
                    return Err(DbError::invalid_input(format!(
                        "Table alias '{}' must be a plain identifier",
                        alias
                    )));
                }
            }
        }
        Ok(())
    }

    fn render_condition(&self, condition: &Condition, params: &mut ParamList) -> DbResult<String> {
        let reference = condition.reference();
        let cast = self
            .registry
            .and_then(|r| r.column(&reference))
            .map(|c| c.cast_type());
        let op = condition.operator;

        match op {
            Operator::IsNull | Operator::IsNotNull => Ok(format!("{} {}", reference, op)),
            Operator::In | Operator::NotIn => {
                let placeholders = match &condition.value {
                    JsonValue::Array(values) if values.is_empty() => {
                        return Err(DbError::invalid_operator_arguments(
                            op.as_sql(),
                            "requires at least one value",
                        ));
                    }
                    JsonValue::Array(values) => values
                        .iter()
                        .map(|v| params.push(QueryParam::from(v.clone()), cast))
                        .collect::<Vec<_>>(),
                    scalar => vec![params.push(QueryParam::from(scalar.clone()), cast)],
                };
                Ok(format!("{} {} ({})", reference, op, placeholders.join(", ")))
            }
            Operator::Between => match &condition.value {
                JsonValue::Array(values) if values.len() == 2 => {
                    let low = params.push(QueryParam::from(values[0].clone()), cast);
                    let high = params.push(QueryParam::from(values[1].clone()), cast);
                    Ok(format!("{} BETWEEN {} AND {}", reference, low, high))
                }
                JsonValue::Array(values) => Err(DbError::invalid_operator_arguments(
                    "BETWEEN",
                    format!("requires exactly two values, got {}", values.len()),
                )),
                _ => Err(DbError::invalid_operator_arguments(
                    "BETWEEN",
                    "requires a list of exactly two values",
                )),
            },
            _ => {
                if condition.value.is_array() {
                    return Err(DbError::invalid_operator_arguments(
                        op.as_sql(),
                        "expects a single value; use IN for lists",
                    ));
                }
                let placeholder = params.push(QueryParam::from(condition.value.clone()), cast);
                Ok(format!("{} {} {}", reference, op, placeholder))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnInfo, JoinType, SortDirection, TableSchema};
    use serde_json::json;
    use std::sync::Arc;

    fn build(request: &SelectRequest) -> DbResult<BuiltQuery> {
        SelectBuilder::from_request(request).build(PlaceholderStyle::Format)
    }

    #[test]
    fn test_simple_select_with_where() {
        let request = SelectRequest::new("movies")
            .with_columns(["title", "release_year"])
            .with_where(Condition::new("release_year", Operator::GtEq, json!(2000)));
        let built = build(&request).unwrap();
        assert_eq!(
            built.sql,
            "SELECT title, release_year FROM movies WHERE release_year >= %s"
        );
        assert_eq!(built.params, vec![QueryParam::Int(2000)]);
    }

    #[test]
    fn test_full_clause_order() {
        let request = SelectRequest::new("movies")
            .with_alias("m")
            .with_distinct(true)
            .with_columns(["d.name", "COUNT(*) AS films"])
            .with_join(
                JoinSpec::new("directors", "m.director_id = d.id")
                    .with_alias("d")
                    .with_type(JoinType::Left),
            )
            .with_where(Condition::new("release_year", Operator::Gt, json!(1990)).with_alias("m"))
            .with_group_by(["d.name"])
            .with_having(Condition::new("COUNT(*)", Operator::GtEq, json!(3)))
            .with_order_by(OrderSpec::new("films", SortDirection::Desc))
            .with_limit(10)
            .with_offset(20);
        let built = build(&request).unwrap();
        assert_eq!(
            built.sql,
            "SELECT DISTINCT d.name, COUNT(*) AS films FROM movies AS m \
             LEFT JOIN directors AS d ON m.director_id = d.id \
             WHERE m.release_year > %s GROUP BY d.name HAVING COUNT(*) >= %s \
             ORDER BY films DESC LIMIT 10 OFFSET 20"
        );
        assert_eq!(built.params, vec![QueryParam::Int(1990), QueryParam::Int(3)]);
    }

    #[test]
    fn test_in_list_and_scalar() {
        let request = SelectRequest::new("movies")
            .with_where(Condition::new("id", Operator::In, json!([1, 2, 3])))
            .with_where(Condition::new("director_id", Operator::NotIn, json!(7)));
        let built = build(&request).unwrap();
        assert_eq!(
            built.sql,
            "SELECT * FROM movies WHERE id IN (%s, %s, %s) AND director_id NOT IN (%s)"
        );
        assert_eq!(built.params.len(), 4);
    }

    #[test]
    fn test_in_empty_list_rejected() {
        let request =
            SelectRequest::new("movies").with_where(Condition::new("id", Operator::In, json!([])));
        let err = build(&request).unwrap_err();
        assert_eq!(err.error_type(), "InvalidOperatorArgumentsError");
    }

    #[test]
    fn test_between_two_values() {
        let request = SelectRequest::new("movies").with_where(Condition::new(
            "release_year",
            Operator::Between,
            json!([1990, 1999]),
        ));
        let built = build(&request).unwrap();
        assert_eq!(
            built.sql,
            "SELECT * FROM movies WHERE release_year BETWEEN %s AND %s"
        );
        assert_eq!(built.params, vec![QueryParam::Int(1990), QueryParam::Int(1999)]);
    }

    #[test]
    fn test_between_wrong_arity() {
        for value in [json!([1990]), json!([1, 2, 3]), json!(1990)] {
            let request = SelectRequest::new("movies")
                .with_where(Condition::new("release_year", Operator::Between, value));
            let err = build(&request).unwrap_err();
            assert_eq!(err.error_type(), "InvalidOperatorArgumentsError");
        }
    }

    #[test]
    fn test_is_null_binds_nothing() {
        let request = SelectRequest::new("movies")
            .with_where(Condition::new("director_id", Operator::IsNull, JsonValue::Null))
            .with_where(Condition::new("title", Operator::IsNotNull, json!("ignored")));
        let built = build(&request).unwrap();
        assert_eq!(
            built.sql,
            "SELECT * FROM movies WHERE director_id IS NULL AND title IS NOT NULL"
        );
        assert!(built.params.is_empty());
    }

    #[test]
    fn test_having_without_group_by_is_dropped() {
        let request = SelectRequest::new("movies")
            .with_having(Condition::new("COUNT(*)", Operator::Gt, json!(1)));
        let built = build(&request).unwrap();
        assert_eq!(built.sql, "SELECT * FROM movies");
        assert!(built.params.is_empty());
        assert_eq!(built.warnings.len(), 1);
    }

    #[test]
    fn test_having_rejects_multi_value_operators() {
        let request = SelectRequest::new("movies")
            .with_columns(["director_id"])
            .with_group_by(["director_id"])
            .with_having(Condition::new("COUNT(*)", Operator::In, json!([1, 2])));
        let err = build(&request).unwrap_err();
        assert_eq!(err.error_type(), "InvalidOperatorArgumentsError");
    }

    #[test]
    fn test_single_value_operator_rejects_list() {
        let request = SelectRequest::new("movies")
            .with_where(Condition::new("id", Operator::Eq, json!([1, 2])));
        assert!(build(&request).is_err());
    }

    #[test]
    fn test_order_by_default_ascending() {
        let request = SelectRequest::new("movies")
            .with_order_by(OrderSpec::new("title", SortDirection::default()).with_alias("m"))
            .with_alias("m");
        let built = build(&request).unwrap();
        assert_eq!(built.sql, "SELECT * FROM movies AS m ORDER BY m.title ASC");
    }

    #[test]
    fn test_on_condition_placeholder_rejected() {
        let request = SelectRequest::new("movies")
            .with_join(JoinSpec::new("directors", "directors.id = %s"));
        let err = build(&request).unwrap_err();
        assert_eq!(err.error_type(), "InvalidInputError");
    }

    #[test]
    fn test_on_condition_placeholder_in_literal_rejected() {
        let request = SelectRequest::new("movies")
            .with_join(JoinSpec::new("directors", "d.name <> '%s'").with_alias("d"));
        let err = build(&request).unwrap_err();
        assert_eq!(err.error_type(), "InvalidInputError");
    }

    #[test]
    fn test_on_condition_statement_break_rejected() {
        let request = SelectRequest::new("movies")
            .with_join(JoinSpec::new("directors", "true; DELETE FROM movies"));
        assert!(build(&request).is_err());
    }

    #[test]
    fn test_alias_must_be_identifier() {
        let request = SelectRequest::new("movies").with_alias("m JOIN secrets s ON true");
        let err = build(&request).unwrap_err();
        assert_eq!(err.error_type(), "InvalidInputError");
    }

    #[test]
    fn test_builder_methods_any_order() {
        let built = SelectBuilder::new()
            .limit(5)
            .order_by(OrderSpec::new("title", SortDirection::Asc))
            .and_where(Condition::new("title", Operator::ILike, json!("%star%")))
            .columns(["title"])
            .from("movies", None)
            .build(PlaceholderStyle::Format)
            .unwrap();
        assert_eq!(
            built.sql,
            "SELECT title FROM movies WHERE title ILIKE %s ORDER BY title ASC LIMIT 5"
        );
    }

    #[test]
    fn test_missing_table_rejected() {
        let err = SelectBuilder::new().build(PlaceholderStyle::Format).unwrap_err();
        assert_eq!(err.error_type(), "InvalidInputError");
    }

    #[test]
    fn test_numbered_placeholders_cast_known_columns() {
        let mut registry = SchemaRegistry::new();
        registry.add_source(
            "events",
            None,
            Arc::new(TableSchema::new(
                "events",
                vec![
                    ColumnInfo::new("happened_on", "date"),
                    ColumnInfo::new("kind", "USER-DEFINED").with_udt_name("event_kind"),
                ],
            )),
        );
        let request = SelectRequest::new("events")
            .with_where(Condition::new(
                "happened_on",
                Operator::Between,
                json!(["2024-01-01", "2024-12-31"]),
            ))
            .with_where(Condition::new("kind", Operator::Eq, json!("launch")))
            .with_having(Condition::new("COUNT(*)", Operator::Gt, json!(1)))
            .with_group_by(["kind"]);
        let built = SelectBuilder::from_request(&request)
            .with_registry(&registry)
            .build(PlaceholderStyle::Numbered)
            .unwrap();
        assert_eq!(
            built.sql,
            "SELECT * FROM events WHERE happened_on BETWEEN $1::date AND $2::date \
             AND kind = $3::event_kind GROUP BY kind HAVING COUNT(*) > $4"
        );
        assert_eq!(built.params.len(), 4);
    }
}
