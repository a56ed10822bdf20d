//! Column and table reference validation.
//!
//! A [`SchemaRegistry`] maps every name a query may use as a qualifier (real
//! table names and aliases) to the column metadata of that table. References
//! are then checked against it:
//!
//! 1. `COUNT(...)`, `SUM(...)`, `AVG(...)`, `MIN(...)`, `MAX(...)`,
//!    `STDDEV(...)`, `VARIANCE(...)`: the inner expression is checked, with
//!    `COUNT(*)` always valid and a leading `DISTINCT` ignored.
//! 2. `expr AS name`: only `expr` is checked; `name` must be a plain identifier.
//!    `AS` is only accepted outside aggregate calls.
//! 3. `qualifier.column`: the qualifier must be registered and own the column
//!    (`qualifier.*` is accepted).
//! 4. Bare `column`: valid if any FROM item has it. A column found in several
//!    FROM items is still valid but reported as ambiguous.

use std::sync::Arc;

use tracing::{debug, warn};

use super::is_identifier;
use crate::db::{Connection, SchemaCatalog};
use crate::error::{DbError, DbResult, Violation};
use crate::models::{ColumnInfo, JoinSpec, SelectRequest, TableSchema};

const AGGREGATES: [&str; 7] = ["COUNT", "SUM", "AVG", "MIN", "MAX", "STDDEV", "VARIANCE"];

/// Per-request mapping from table name or alias to column metadata.
///
/// Each FROM item (the main table and every join) is one source. A source is
/// registered under its real name and, when given, its alias; both names share
/// the same `Arc<TableSchema>`. When two sources claim the same name the first
/// registration is kept.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    sources: Vec<Arc<TableSchema>>,
    names: Vec<(String, usize)>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one FROM item under its table name and optional alias.
    pub fn add_source(&mut self, table: &str, alias: Option<&str>, schema: Arc<TableSchema>) {
        let source = self.sources.len();
        self.sources.push(schema);
        for name in std::iter::once(table).chain(alias) {
            if !self.contains(name) {
                self.names.push((name.to_string(), source));
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&TableSchema> {
        self.names
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, source)| self.sources[*source].as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|(n, _)| n == name)
    }

    /// Registered names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(|(n, _)| n.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Number of FROM items.
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Tables of every FROM item that has a column called `column`.
    fn sources_with(&self, column: &str) -> Vec<&TableSchema> {
        self.sources
            .iter()
            .filter(|s| s.contains(column))
            .map(Arc::as_ref)
            .collect()
    }

    /// Metadata of the column a plain or qualified reference points at.
    ///
    /// Bare names resolve to the first FROM item that has the column.
    pub fn column(&self, reference: &str) -> Option<&ColumnInfo> {
        match reference.split_once('.') {
            Some((qualifier, column)) => self.get(qualifier.trim())?.get(column.trim()),
            None => self
                .sources
                .iter()
                .find_map(|s| s.get(reference.trim())),
        }
    }
}

/// Outcome of checking one reference against a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Valid,
    /// Bare column present in more than one FROM item.
    Ambiguous { tables: Vec<String> },
    Invalid { hint: Option<String> },
}

impl Resolution {
    pub fn is_valid(&self) -> bool {
        !matches!(self, Self::Invalid { .. })
    }

    fn invalid(hint: impl Into<String>) -> Self {
        Self::Invalid {
            hint: Some(hint.into()),
        }
    }
}

/// Check a column reference; see the module docs for the rules.
pub fn validate_column_reference(reference: &str, registry: &SchemaRegistry) -> bool {
    resolve_column_reference(reference, registry).is_valid()
}

/// Check a column reference and report why it failed or whether it is ambiguous.
pub fn resolve_column_reference(reference: &str, registry: &SchemaRegistry) -> Resolution {
    let reference = reference.trim();

    if let Some((function, inner)) = split_aggregate(reference) {
        let inner = strip_distinct(inner.trim());
        if inner == "*" {
            return if function == "COUNT" {
                Resolution::Valid
            } else {
                Resolution::invalid(format!("{}(*) is not allowed", function))
            };
        }
        if split_alias(inner).is_some() {
            return Resolution::invalid(format!(
                "{}(...) cannot contain an output name",
                function
            ));
        }
        return resolve_column_reference(inner, registry);
    }

    if let Some((expr, name)) = split_alias(reference) {
        if !is_identifier(name) {
            return Resolution::invalid(format!("'{}' is not a valid output name", name));
        }
        return resolve_column_reference(expr, registry);
    }

    if let Some((qualifier, column)) = reference.split_once('.') {
        let (qualifier, column) = (qualifier.trim(), column.trim());
        let Some(schema) = registry.get(qualifier) else {
            return Resolution::invalid(format!("unknown table or alias '{}'", qualifier));
        };
        if column == "*" || schema.contains(column) {
            return Resolution::Valid;
        }
        return Resolution::invalid(format!("no column '{}' in '{}'", column, schema.table));
    }

    match registry.sources_with(reference).as_slice() {
        [] => Resolution::Invalid { hint: None },
        [_] => Resolution::Valid,
        many => Resolution::Ambiguous {
            tables: many.iter().map(|s| s.table.clone()).collect(),
        },
    }
}

/// `NAME(inner)` where NAME is a known aggregate and the parentheses wrap the
/// whole remainder.
fn split_aggregate(reference: &str) -> Option<(&'static str, &str)> {
    let upper = reference.to_ascii_uppercase();
    AGGREGATES.iter().find_map(|name| {
        if !upper.starts_with(name) {
            return None;
        }
        let inner = reference[name.len()..]
            .trim_start()
            .strip_prefix('(')?
            .trim_end()
            .strip_suffix(')')?;
        balanced(inner).then_some((*name, inner))
    })
}

fn balanced(text: &str) -> bool {
    let mut depth = 0i32;
    for c in text.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

fn strip_distinct(inner: &str) -> &str {
    match inner.get(..9) {
        Some(prefix) if prefix.eq_ignore_ascii_case("DISTINCT ") => inner[9..].trim_start(),
        _ => inner,
    }
}

/// Split `expr AS name` on the last case-insensitive ` AS `.
pub(crate) fn split_alias(reference: &str) -> Option<(&str, &str)> {
    let upper = reference.to_ascii_uppercase();
    let idx = upper.rfind(" AS ")?;
    Some((reference[..idx].trim(), reference[idx + 4..].trim()))
}

/// Look up every table of a SELECT and register it under its name and alias.
///
/// All missing tables are reported together. Each distinct table is fetched
/// from the catalog once, even when joined several times.
pub async fn build_registry<C: Connection>(
    catalog: &mut SchemaCatalog<'_, C>,
    table: &str,
    alias: Option<&str>,
    joins: &[JoinSpec],
) -> DbResult<SchemaRegistry> {
    let mut registry = SchemaRegistry::new();
    let mut fetched: Vec<(String, Option<Arc<TableSchema>>)> = Vec::new();
    let mut missing = Vec::new();

    let items = std::iter::once((table, alias))
        .chain(joins.iter().map(|j| (j.table.as_str(), j.alias.as_deref())));

    for (name, alias) in items {
        let schema = match fetched.iter().find(|(n, _)| n == name) {
            Some((_, schema)) => schema.clone(),
            None => {
                let schema = if catalog.table_exists(name).await? {
                    Some(Arc::new(catalog.get_table_schema(name).await?))
                } else {
                    None
                };
                fetched.push((name.to_string(), schema.clone()));
                schema
            }
        };

        match schema {
            Some(schema) => registry.add_source(name, alias, schema),
            None if !missing.contains(&Violation::unknown_table(name)) => {
                missing.push(Violation::unknown_table(name));
            }
            None => {}
        }
    }

    if !missing.is_empty() {
        return Err(DbError::validation(missing));
    }

    debug!(
        names = ?registry.names().collect::<Vec<_>>(),
        sources = registry.source_count(),
        "Built schema registry"
    );
    Ok(registry)
}

/// Check every column reference of a SELECT.
///
/// Returns the ambiguity warnings on success; fails with one validation error
/// listing every invalid reference. ORDER BY may also name output columns
/// introduced with `expr AS name`; HAVING is evaluated before the select list,
/// so it may not.
pub fn validate_select(request: &SelectRequest, registry: &SchemaRegistry) -> DbResult<Vec<String>> {
    let mut violations = Vec::new();
    let mut warnings = Vec::new();

    let output_names: Vec<&str> = request
        .columns
        .iter()
        .filter_map(|c| split_alias(c).map(|(_, name)| name))
        .collect();

    let mut check = |reference: &str, allow_output_name: bool| {
        if allow_output_name && output_names.contains(&reference.trim()) {
            return;
        }
        match resolve_column_reference(reference, registry) {
            Resolution::Valid => {}
            Resolution::Ambiguous { tables } => {
                let warning = format!(
                    "Column reference '{}' is ambiguous; it exists in: {}",
                    reference,
                    tables.join(", ")
                );
                if !warnings.contains(&warning) {
                    warn!(reference, tables = ?tables, "Ambiguous column reference");
                    warnings.push(warning);
                }
            }
            Resolution::Invalid { hint } => {
                let violation = Violation::unknown_column(reference, hint);
                if !violations.contains(&violation) {
                    violations.push(violation);
                }
            }
        }
    };

    if !request.selects_all() {
        for column in &request.columns {
            check(column, false);
        }
    }
    for condition in &request.where_conditions {
        check(&condition.reference(), false);
    }
    for column in &request.group_by {
        check(column, false);
    }
    for condition in &request.having {
        check(&condition.reference(), false);
    }
    for order in &request.order_by {
        check(&order.reference(), order.table_alias.is_none());
    }

    if violations.is_empty() {
        Ok(warnings)
    } else {
        Err(DbError::validation(violations))
    }
}
