//! INSERT statement assembly and row validation.

use serde_json::{Map, Value as JsonValue};

use super::{BuiltQuery, ParamList, PlaceholderStyle};
use crate::error::{ConflictPolicyViolation, DbError, DbResult, Violation};
use crate::models::{ConflictPolicy, InsertRequest, QueryParam, TableSchema};

/// Lowercase with underscores removed, so `releaseYear` matches `release_year`.
fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

fn column_hint(column: &str, schema: &TableSchema) -> String {
    let wanted = normalize(column);
    match schema.column_names().find(|c| normalize(c) == wanted) {
        Some(close) => format!("did you mean '{}'?", close),
        None => format!(
            "available columns: {}",
            schema.column_names().collect::<Vec<_>>().join(", ")
        ),
    }
}

/// Check an INSERT row against the table schema.
///
/// Every supplied column must exist (with a suggestion for near misses),
/// every NOT NULL column without a default must be supplied, and conflict
/// target and RETURNING columns must exist. All problems are reported at once.
pub fn validate_insert(request: &InsertRequest, schema: &TableSchema) -> DbResult<()> {
    let mut violations = Vec::new();

    for column in request.row.keys() {
        if !schema.contains(column) {
            violations.push(Violation::unknown_column(
                column,
                Some(column_hint(column, schema)),
            ));
        }
    }

    for required in schema.required_columns() {
        if !request.row.contains_key(&required.name) {
            violations.push(Violation::missing_required(&required.name));
        }
    }

    for column in request.conflict_target.iter().chain(&request.returning) {
        if !schema.contains(column) {
            let violation = Violation::unknown_column(column, Some(column_hint(column, schema)));
            if !violations.contains(&violation) {
                violations.push(violation);
            }
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(DbError::validation(violations))
    }
}

/// Builder for single- and multi-row INSERT statements sharing one column list.
#[derive(Debug, Clone)]
pub struct InsertBuilder<'s> {
    table: String,
    columns: Vec<String>,
    rows: Vec<Vec<JsonValue>>,
    on_conflict: ConflictPolicy,
    conflict_target: Vec<String>,
    update_columns: Option<Vec<String>>,
    returning: Vec<String>,
    schema: Option<&'s TableSchema>,
}

impl<'s> InsertBuilder<'s> {
    pub fn new(table: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            table: table.into(),
            columns,
            rows: Vec::new(),
            on_conflict: ConflictPolicy::None,
            conflict_target: Vec::new(),
            update_columns: None,
            returning: Vec::new(),
            schema: None,
        }
    }

    /// Builder for the request's single row, columns in row order.
    pub fn from_request(request: &InsertRequest) -> Self {
        let columns: Vec<String> = request.row.keys().cloned().collect();
        let values = request.row.values().cloned().collect();
        Self {
            rows: vec![values],
            on_conflict: request.on_conflict,
            conflict_target: request.conflict_target.clone(),
            update_columns: request.update_columns.clone(),
            returning: request.returning.clone(),
            ..Self::new(request.table.clone(), columns)
        }
    }

    /// Use column types from `schema` to cast numbered placeholders.
    pub fn with_schema(mut self, schema: &'s TableSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Add a row, taking values in this builder's column order.
    ///
    /// Missing keys become NULL; callers check column sets beforehand.
    pub fn row(mut self, row: &Map<String, JsonValue>) -> Self {
        let values = self
            .columns
            .iter()
            .map(|c| row.get(c).cloned().unwrap_or(JsonValue::Null))
            .collect();
        self.rows.push(values);
        self
    }

    /// Replace all rows.
    pub fn rows<'a>(mut self, rows: impl IntoIterator<Item = &'a Map<String, JsonValue>>) -> Self {
        self.rows.clear();
        rows.into_iter().fold(self, |builder, row| builder.row(row))
    }

    pub fn on_conflict(mut self, policy: ConflictPolicy) -> Self {
        self.on_conflict = policy;
        self
    }

    pub fn conflict_target(mut self, target: Vec<String>) -> Self {
        self.conflict_target = target;
        self
    }

    pub fn update_columns(mut self, columns: Option<Vec<String>>) -> Self {
        self.update_columns = columns;
        self
    }

    pub fn returning(mut self, columns: Vec<String>) -> Self {
        self.returning = columns;
        self
    }

    /// Columns assigned in `DO UPDATE SET`.
    fn update_set(&self) -> DbResult<Vec<String>> {
        if self.conflict_target.is_empty() {
            return Err(ConflictPolicyViolation::MissingConflictTarget.into());
        }
        let set = match &self.update_columns {
            Some(explicit) => {
                let invalid: Vec<String> = explicit
                    .iter()
                    .filter(|c| !self.columns.contains(c))
                    .cloned()
                    .collect();
                if !invalid.is_empty() {
                    return Err(ConflictPolicyViolation::InvalidUpdateColumns(invalid).into());
                }
                explicit.clone()
            }
            None => self
                .columns
                .iter()
                .filter(|c| !self.conflict_target.contains(c))
                .cloned()
                .collect(),
        };
        if set.is_empty() {
            return Err(ConflictPolicyViolation::NoUpdateColumns.into());
        }
        Ok(set)
    }

    pub fn build(self, style: PlaceholderStyle) -> DbResult<BuiltQuery> {
        if self.rows.is_empty() {
            return Err(DbError::invalid_input("INSERT requires at least one row"));
        }

        let mut params = ParamList::new(style);
        let mut sql = format!("INSERT INTO {}", self.table);

        if self.columns.is_empty() {
            if self.rows.len() > 1 {
                return Err(DbError::invalid_input(
                    "Multi-row INSERT requires at least one column",
                ));
            }
            sql.push_str(" DEFAULT VALUES");
        } else {
            let casts: Vec<Option<&str>> = self
                .columns
                .iter()
                .map(|c| self.schema.and_then(|s| s.get(c)).map(|info| info.cast_type()))
                .collect();
            let tuples: Vec<String> = self
                .rows
                .iter()
                .map(|values| {
                    let placeholders: Vec<String> = values
                        .iter()
                        .zip(&casts)
                        .map(|(v, cast)| params.push(QueryParam::from(v.clone()), *cast))
                        .collect();
                    format!("({})", placeholders.join(", "))
                })
                .collect();
            sql.push_str(&format!(
                " ({}) VALUES {}",
                self.columns.join(", "),
                tuples.join(", ")
            ));
        }

        match self.on_conflict {
            ConflictPolicy::None => {}
            ConflictPolicy::Ignore => sql.push_str(" ON CONFLICT DO NOTHING"),
            ConflictPolicy::Update => {
                let assignments: Vec<String> = self
                    .update_set()?
                    .iter()
                    .map(|c| format!("{} = EXCLUDED.{}", c, c))
                    .collect();
                sql.push_str(&format!(
                    " ON CONFLICT ({}) DO UPDATE SET {}",
                    self.conflict_target.join(", "),
                    assignments.join(", ")
                ));
            }
        }

        if !self.returning.is_empty() {
            sql.push_str(&format!(" RETURNING {}", self.returning.join(", ")));
        }

        Ok(BuiltQuery {
            sql,
            params: params.into_values(),
            warnings: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ColumnInfo;
    use serde_json::json;

    fn movies() -> TableSchema {
        TableSchema::new(
            "movies",
            vec![
                ColumnInfo::new("id", "integer")
                    .not_null()
                    .with_default("nextval('movies_id_seq'::regclass)"),
                ColumnInfo::new("title", "text").not_null(),
                ColumnInfo::new("release_year", "integer"),
                ColumnInfo::new("rating", "numeric").not_null(),
                ColumnInfo::new("email", "text"),
            ],
        )
    }

    fn row(value: JsonValue) -> Map<String, JsonValue> {
        value.as_object().cloned().unwrap()
    }

    fn build(request: &InsertRequest) -> DbResult<BuiltQuery> {
        InsertBuilder::from_request(request).build(PlaceholderStyle::Format)
    }

    #[test]
    fn test_missing_required_column() {
        let request = InsertRequest::new(
            "movies",
            row(json!({"title": "Inception", "release_year": 2010})),
        );
        let err = validate_insert(&request, &movies()).unwrap_err();
        let DbError::Validation { violations } = &err else {
            panic!("expected validation error, got {err:?}");
        };
        assert_eq!(violations, &vec![Violation::missing_required("rating")]);
    }

    #[test]
    fn test_unknown_column_suggestion() {
        let request = InsertRequest::new(
            "movies",
            row(json!({"title": "Inception", "releaseYear": 2010, "rating": 8.8, "genre": "x"})),
        );
        let err = validate_insert(&request, &movies()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("'releaseYear' (did you mean 'release_year'?)"));
        assert!(msg.contains("'genre' (available columns: id, title, release_year, rating, email)"));
    }

    #[test]
    fn test_unknown_conflict_target_and_returning() {
        let request = InsertRequest::new("movies", row(json!({"title": "A", "rating": 1})))
            .on_conflict_update(["slug"])
            .with_returning(["id", "slug"]);
        let err = validate_insert(&request, &movies()).unwrap_err();
        let DbError::Validation { violations } = &err else {
            panic!("expected validation error");
        };
        assert_eq!(violations.len(), 1);
    }

    #[test]
    fn test_plain_insert() {
        let request = InsertRequest::new(
            "movies",
            row(json!({"title": "Inception", "release_year": 2010, "rating": 8.8})),
        );
        assert!(validate_insert(&request, &movies()).is_ok());
        let built = build(&request).unwrap();
        assert_eq!(
            built.sql,
            "INSERT INTO movies (title, release_year, rating) VALUES (%s, %s, %s)"
        );
        assert_eq!(
            built.params,
            vec![
                QueryParam::String("Inception".into()),
                QueryParam::Int(2010),
                QueryParam::Float(8.8)
            ]
        );
    }

    #[test]
    fn test_on_conflict_ignore() {
        let request = InsertRequest::new("movies", row(json!({"title": "A", "rating": 1})))
            .on_conflict_ignore();
        let built = build(&request).unwrap();
        assert!(built.sql.ends_with("VALUES (%s, %s) ON CONFLICT DO NOTHING"));
    }

    #[test]
    fn test_on_conflict_update_requires_target() {
        let mut request = InsertRequest::new("movies", row(json!({"title": "A", "rating": 1})));
        request.on_conflict = ConflictPolicy::Update;
        let err = build(&request).unwrap_err();
        assert!(matches!(
            err,
            DbError::ConflictPolicy(ConflictPolicyViolation::MissingConflictTarget)
        ));
    }

    #[test]
    fn test_on_conflict_update_default_set() {
        let request = InsertRequest::new(
            "movies",
            row(json!({"email": "a@b.c", "title": "A", "rating": 1})),
        )
        .on_conflict_update(["email"]);
        let built = build(&request).unwrap();
        assert_eq!(
            built.sql,
            "INSERT INTO movies (email, title, rating) VALUES (%s, %s, %s) \
             ON CONFLICT (email) DO UPDATE SET title = EXCLUDED.title, rating = EXCLUDED.rating"
        );
    }

    #[test]
    fn test_on_conflict_update_explicit_set() {
        let request = InsertRequest::new(
            "movies",
            row(json!({"email": "a@b.c", "title": "A", "rating": 1})),
        )
        .on_conflict_update(["email"])
        .with_update_columns(["rating"]);
        let built = build(&request).unwrap();
        assert!(built.sql.ends_with("DO UPDATE SET rating = EXCLUDED.rating"));
    }

    #[test]
    fn test_on_conflict_update_columns_not_inserted() {
        let request = InsertRequest::new("movies", row(json!({"email": "a@b.c", "title": "A"})))
            .on_conflict_update(["email"])
            .with_update_columns(["rating", "title"]);
        let err = build(&request).unwrap_err();
        assert_eq!(err.error_type(), "InvalidUpdateColumnsError");
        assert!(err.to_string().contains("rating"));
    }

    #[test]
    fn test_on_conflict_update_empty_set() {
        let request = InsertRequest::new("movies", row(json!({"email": "a@b.c"})))
            .on_conflict_update(["email"]);
        let err = build(&request).unwrap_err();
        assert_eq!(err.error_type(), "NoUpdateColumnsError");
    }

    #[test]
    fn test_returning() {
        let request = InsertRequest::new("movies", row(json!({"title": "A", "rating": 1})))
            .with_returning(["id", "title"]);
        let built = build(&request).unwrap();
        assert!(built.sql.ends_with("VALUES (%s, %s) RETURNING id, title"));
    }

    #[test]
    fn test_empty_row_uses_default_values() {
        let request = InsertRequest::new("counters", Map::new()).with_returning(["id"]);
        let built = build(&request).unwrap();
        assert_eq!(built.sql, "INSERT INTO counters DEFAULT VALUES RETURNING id");
        assert!(built.params.is_empty());
    }

    #[test]
    fn test_multi_row_numbered_with_casts() {
        let schema = movies();
        let rows = vec![
            row(json!({"title": "A", "rating": 1})),
            row(json!({"rating": 2, "title": "B"})),
        ];
        let built = InsertBuilder::new("movies", vec!["title".into(), "rating".into()])
            .with_schema(&schema)
            .rows(&rows)
            .build(PlaceholderStyle::Numbered)
            .unwrap();
        assert_eq!(
            built.sql,
            "INSERT INTO movies (title, rating) VALUES ($1::text, $2::numeric), ($3::text, $4::numeric)"
        );
        assert_eq!(built.params[2], QueryParam::String("B".into()));
        assert_eq!(built.params[3], QueryParam::Int(2));
    }
}
