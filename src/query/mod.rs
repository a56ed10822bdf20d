//! Schema-aware SQL construction.
//!
//! Requests are validated against a [`SchemaRegistry`] snapshot and then
//! rendered to SQL text plus an ordered parameter list. Everything in here is
//! pure: the only database access happens in [`build_and_validate_select`] and
//! [`build_and_validate_insert`], which read catalog metadata first.
//!
//! Two placeholder spellings are supported. [`PlaceholderStyle::Format`]
//! renders `%s` and is the canonical, human-readable form.
//! [`PlaceholderStyle::Numbered`] renders `$1, $2, ...` with a `::type` cast
//! when the target column is known, which is what the PostgreSQL driver binds.

pub mod insert;
pub mod select;
pub mod validator;

pub use insert::{InsertBuilder, validate_insert};
pub use select::SelectBuilder;
pub use validator::{
    Resolution, SchemaRegistry, build_registry, resolve_column_reference,
    validate_column_reference, validate_select,
};

use tracing::debug;

use crate::db::{Connection, SchemaCatalog};
use crate::error::{DbError, DbResult, Violation};
use crate::models::{InsertRequest, QueryParam, SelectRequest};

/// How bound parameters are spelled in generated SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaceholderStyle {
    /// `%s`
    #[default]
    Format,
    /// `$1`, `$2`, ... optionally followed by `::type`
    Numbered,
}

/// Generated SQL and the values to bind, in placeholder order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BuiltQuery {
    pub sql: String,
    pub params: Vec<QueryParam>,
    /// Non-fatal findings, e.g. ambiguous column references.
    pub warnings: Vec<String>,
}

/// Accumulates bound values and hands out their placeholders.
#[derive(Debug)]
pub(crate) struct ParamList {
    style: PlaceholderStyle,
    values: Vec<QueryParam>,
}

impl ParamList {
    pub(crate) fn new(style: PlaceholderStyle) -> Self {
        Self {
            style,
            values: Vec::new(),
        }
    }

    /// Record a value and return the placeholder that binds it.
    pub(crate) fn push(&mut self, value: QueryParam, cast: Option<&str>) -> String {
        self.values.push(value);
        match (self.style, cast) {
            (PlaceholderStyle::Format, _) => "%s".to_string(),
            (PlaceholderStyle::Numbered, None) => format!("${}", self.values.len()),
            (PlaceholderStyle::Numbered, Some(ty)) => format!("${}::{}", self.values.len(), ty),
        }
    }

    pub(crate) fn into_values(self) -> Vec<QueryParam> {
        self.values
    }
}

/// Count the placeholders of the given style in `sql`.
///
/// `%s`-style drivers substitute every `%s`, literals included, so format
/// placeholders are counted wherever they appear. Numbered placeholders inside
/// single-quoted literals are not counted, and each occurrence counts once.
pub fn count_placeholders(sql: &str, style: PlaceholderStyle) -> usize {
    match style {
        PlaceholderStyle::Format => sql.matches("%s").count(),
        PlaceholderStyle::Numbered => count_numbered(sql),
    }
}

fn count_numbered(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut count = 0;
    let mut in_literal = false;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\'' {
            in_literal = !in_literal;
        } else if !in_literal && b == b'$' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit) {
            count += 1;
            i += 1;
            while bytes.get(i + 1).is_some_and(u8::is_ascii_digit) {
                i += 1;
            }
        }
        i += 1;
    }
    count
}

/// True if `text` contains anything a driver could read as a placeholder.
///
/// Literals are not exempt and any `%` counts, since a `%s`-style driver
/// interprets `%` sequences everywhere.
pub(crate) fn contains_placeholder(text: &str) -> bool {
    let bytes = text.as_bytes();
    text.contains('%')
        || text.contains('?')
        || bytes
            .windows(2)
            .any(|pair| pair[0] == b'$' && pair[1].is_ascii_digit())
}

/// True for a plain SQL identifier: letter or underscore, then letters, digits, underscores.
pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Validate a SELECT against live catalog metadata, then build it.
///
/// Tables are checked first; column references are only checked once every
/// referenced table is known to exist.
pub async fn build_and_validate_select<C: Connection>(
    catalog: &mut SchemaCatalog<'_, C>,
    request: &SelectRequest,
    style: PlaceholderStyle,
) -> DbResult<BuiltQuery> {
    let registry = build_registry(
        catalog,
        &request.table,
        request.alias.as_deref(),
        &request.joins,
    )
    .await?;
    build_select(request, &registry, style)
}

/// Validate a SELECT against an already-built registry, then build it.
pub fn build_select(
    request: &SelectRequest,
    registry: &SchemaRegistry,
    style: PlaceholderStyle,
) -> DbResult<BuiltQuery> {
    let mut warnings = validate_select(request, registry)?;
    let mut built = SelectBuilder::from_request(request)
        .with_registry(registry)
        .build(style)?;
    warnings.append(&mut built.warnings);
    built.warnings = warnings;

    debug!(
        sql = %built.sql,
        params = built.params.len(),
        warnings = built.warnings.len(),
        "Built SELECT"
    );
    Ok(built)
}

/// Validate an INSERT against live catalog metadata, then build it.
pub async fn build_and_validate_insert<C: Connection>(
    catalog: &mut SchemaCatalog<'_, C>,
    request: &InsertRequest,
    style: PlaceholderStyle,
) -> DbResult<BuiltQuery> {
    if !catalog.table_exists(&request.table).await? {
        return Err(DbError::validation(vec![Violation::unknown_table(
            &request.table,
        )]));
    }
    let schema = catalog.get_table_schema(&request.table).await?;
    validate_insert(request, &schema)?;
    let built = InsertBuilder::from_request(request)
        .with_schema(&schema)
        .build(style)?;

    debug!(
        sql = %built.sql,
        params = built.params.len(),
        "Built INSERT"
    );
    Ok(built)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_format_placeholders() {
        assert_eq!(
            count_placeholders("SELECT a FROM t WHERE a = %s AND b IN (%s, %s)", PlaceholderStyle::Format),
            3
        );
        // a format-style driver substitutes inside literals too
        assert_eq!(count_placeholders("SELECT '%s' FROM t", PlaceholderStyle::Format), 1);
    }

    #[test]
    fn test_count_numbered_placeholders() {
        assert_eq!(
            count_placeholders("WHERE a = $1::date AND b = $12", PlaceholderStyle::Numbered),
            2
        );
        assert_eq!(count_placeholders("SELECT '$1', $ FROM t", PlaceholderStyle::Numbered), 0);
    }

    #[test]
    fn test_param_list_styles() {
        let mut format = ParamList::new(PlaceholderStyle::Format);
        assert_eq!(format.push(QueryParam::Int(1), Some("integer")), "%s");

        let mut numbered = ParamList::new(PlaceholderStyle::Numbered);
        assert_eq!(numbered.push(QueryParam::Int(1), None), "$1");
        assert_eq!(numbered.push(QueryParam::from("2024-01-01"), Some("date")), "$2::date");
        assert_eq!(numbered.into_values().len(), 2);
    }

    #[test]
    fn test_contains_placeholder() {
        assert!(contains_placeholder("a.id = %s"));
        assert!(contains_placeholder("a.id = $1"));
        assert!(contains_placeholder("a.id = ?"));
        assert!(contains_placeholder("d.name <> '%s'"));
        assert!(contains_placeholder("d.name LIKE 'A%'"));
        assert!(contains_placeholder("d.code = '$1'"));
        assert!(!contains_placeholder("m.director_id = d.id"));
        assert!(!contains_placeholder("d.price > $"));
    }

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("movies"));
        assert!(is_identifier("_m2"));
        assert!(!is_identifier("2m"));
        assert!(!is_identifier("m; DROP"));
        assert!(!is_identifier(""));
    }
}
