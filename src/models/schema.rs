//! Schema-related data models.
//!
//! Column metadata snapshots used by the reference validator, plus the
//! catalog listings returned by the introspection tools.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Metadata for one column, as read from `information_schema.columns`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ColumnInfo {
    pub name: String,
    /// Database type, e.g. "integer", "character varying", "numeric"
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
    /// Default expression, e.g. "nextval('movies_id_seq'::regclass)"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// Underlying type name for user-defined and array types, e.g. "mood", "_int4"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub udt_name: Option<String>,
}

impl ColumnInfo {
    /// Create a nullable column without a default.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            default: None,
            udt_name: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_udt_name(mut self, udt_name: impl Into<String>) -> Self {
        self.udt_name = Some(udt_name.into());
        self
    }

    /// Type name usable in a `::type` cast of a bound parameter.
    pub fn cast_type(&self) -> &str {
        match (self.data_type.as_str(), self.udt_name.as_deref()) {
            ("USER-DEFINED" | "ARRAY", Some(udt)) => udt,
            (data_type, _) => data_type,
        }
    }

    /// NOT NULL without a default: an INSERT must supply it.
    pub fn is_required(&self) -> bool {
        !self.nullable && self.default.is_none()
    }
}

/// Column metadata for one table, in declaration order.
///
/// Built once by the catalog and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<ColumnInfo>,
}

impl TableSchema {
    pub fn new(table: impl Into<String>, columns: Vec<ColumnInfo>) -> Self {
        Self {
            table: table.into(),
            columns,
        }
    }

    pub fn get(&self, column: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn required_columns(&self) -> impl Iterator<Item = &ColumnInfo> {
        self.columns.iter().filter(|c| c.is_required())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SchemaInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TableInfo {
    pub name: String,
    /// "BASE TABLE" or "VIEW"
    pub table_type: String,
    /// Bytes (data + indexes + toast)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    /// Human-readable size, e.g. "16 kB"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_formatted: Option<String>,
}

impl TableInfo {
    pub fn new(name: impl Into<String>, table_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table_type: table_type.into(),
            size_bytes: None,
            size_formatted: None,
        }
    }

    /// Set the total relation size, formatted with 1024-based units.
    pub fn with_size(mut self, bytes: u64) -> Self {
        self.size_bytes = Some(bytes);
        self.size_formatted = Some(humansize::format_size(bytes, humansize::WINDOWS));
        self
    }
}

/// A table-level constraint (primary key, unique, foreign key, check).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ConstraintInfo {
    pub name: String,
    /// "PRIMARY KEY", "UNIQUE", "FOREIGN KEY" or "CHECK"
    pub constraint_type: String,
    pub columns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referenced_table: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub referenced_columns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_clause: Option<String>,
}

/// Longest definition or query text returned by the listing tools.
pub const PREVIEW_CHARS: usize = 200;

/// Cut `text` to [`PREVIEW_CHARS`] characters, marking the cut with `...`.
pub fn preview(text: &str) -> String {
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Kinds of schema objects `list_objects` can enumerate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    #[default]
    Tables,
    Views,
    Indexes,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tables => "tables",
            Self::Views => "views",
            Self::Indexes => "indexes",
        }
    }
}

/// A table, view or index as listed by `list_objects`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DbObject {
    pub name: String,
    /// Table type for tables ("BASE TABLE", "VIEW")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,
    /// Indexed table, for indexes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    /// View query or index DDL; view definitions are cut to 200 characters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
}

impl DbObject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            object_type: None,
            table: None,
            definition: None,
        }
    }
}

/// Point-in-time database statistics.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DatabaseHealth {
    pub database_size_bytes: u64,
    /// Human-readable size, e.g. "7.5 MB"
    pub database_size: String,
    /// Sessions in pg_stat_activity
    pub active_connections: i64,
    /// Tables and views in the inspected schema
    pub table_count: i64,
    /// Buffer cache hits over all block reads, 0 when nothing was read yet
    pub cache_hit_ratio_percent: f64,
    /// RFC 3339 timestamp of the measurement
    pub checked_at: String,
}

/// One statement from pg_stat_statements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SlowQuery {
    /// Normalized statement text, cut to 200 characters
    pub query: String,
    pub calls: i64,
    pub total_time_ms: f64,
    pub mean_time_ms: f64,
    pub rows: i64,
}
