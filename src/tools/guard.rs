//! Restricted-mode guard for raw SQL.
//!
//! Statements are parsed with sqlparser's PostgreSQL dialect and classified
//! from the AST, so formatting tricks and comments cannot disguise a write.
//! In restricted mode only read-only statements pass, and calls to the
//! backend-signalling functions are rejected wherever they appear.

use sqlparser::ast::{Query, SetExpr, Statement};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};

use crate::error::{DbError, DbResult};

/// Functions that act on other sessions.
const BLOCKED_FUNCTIONS: &[&str] = &["pg_terminate_backend", "pg_cancel_backend"];

/// Broad category of a parsed statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// SELECT, VALUES, SHOW, EXPLAIN of a read-only statement
    ReadOnly,
    /// INSERT, UPDATE, DELETE, MERGE, COPY
    DmlWrite,
    /// CREATE, ALTER, DROP, TRUNCATE, COMMENT
    Ddl,
    /// BEGIN, COMMIT, ROLLBACK, SAVEPOINT
    Transaction,
    /// CALL, EXECUTE, PREPARE
    ProcedureCall,
    /// GRANT, REVOKE, SET, VACUUM, LISTEN and friends
    Administrative,
    Unknown,
}

impl StatementKind {
    fn reason(&self) -> &'static str {
        match self {
            Self::ReadOnly => "",
            Self::DmlWrite => "Data modification is not allowed in restricted mode",
            Self::Ddl => "Schema changes are not allowed in restricted mode",
            Self::Transaction => "Transaction control is not allowed in restricted mode",
            Self::ProcedureCall => "Procedure calls are not allowed in restricted mode",
            Self::Administrative => "Administrative statements are not allowed in restricted mode",
            Self::Unknown => "Only read-only statements are allowed in restricted mode",
        }
    }
}

/// Classification of one statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqlAnalysis {
    pub kind: StatementKind,
    pub operation: &'static str,
    /// True if running it produces a result set.
    pub returns_rows: bool,
}

/// Parse and classify every statement in `sql`.
pub fn analyze_sql(sql: &str) -> DbResult<Vec<SqlAnalysis>> {
    let statements = Parser::parse_sql(&PostgreSqlDialect {}, sql)
        .map_err(|e| DbError::invalid_input(format!("Failed to parse SQL statement: {}", e)))?;

    if statements.is_empty() {
        return Err(DbError::invalid_input("Empty SQL statement"));
    }

    Ok(statements.iter().map(analyze_statement).collect())
}

/// Reject anything that is not read-only.
///
/// Statements that cannot be parsed are rejected as well.
pub fn check_restricted(sql: &str) -> DbResult<()> {
    if let Some(function) = blocked_function(sql) {
        return Err(DbError::permission(
            function,
            "Signalling other backends is not allowed in restricted mode",
        ));
    }
    for analysis in analyze_sql(sql)? {
        if analysis.kind != StatementKind::ReadOnly {
            return Err(DbError::permission(
                analysis.operation,
                analysis.kind.reason(),
            ));
        }
    }
    Ok(())
}

/// First blocked function called in `sql`, ignoring string literals and comments.
pub fn blocked_function(sql: &str) -> Option<&'static str> {
    let tokens = Tokenizer::new(&PostgreSqlDialect {}, sql).tokenize().ok()?;
    tokens.iter().find_map(|token| match token {
        Token::Word(word) => BLOCKED_FUNCTIONS
            .iter()
            .copied()
            .find(|f| word.value.eq_ignore_ascii_case(f)),
        _ => None,
    })
}

/// Whether `sql` produces rows.
///
/// SQL the parser does not understand falls back to its leading keyword.
pub fn returns_rows(sql: &str) -> bool {
    match analyze_sql(sql) {
        Ok(analyses) => analyses.last().is_some_and(|a| a.returns_rows),
        Err(_) => {
            let first = sql
                .trim_start_matches(|c: char| c.is_whitespace() || c == '(')
                .split(|c: char| !c.is_ascii_alphabetic())
                .next()
                .unwrap_or_default()
                .to_ascii_uppercase();
            matches!(
                first.as_str(),
                "SELECT" | "WITH" | "VALUES" | "TABLE" | "SHOW" | "EXPLAIN"
            )
        }
    }
}

fn analyze_statement(stmt: &Statement) -> SqlAnalysis {
    let (kind, operation) = classify_statement(stmt);
    let returns_rows = match (stmt, kind) {
        (Statement::Query(query), _) => query_returns_rows(query),
        (_, StatementKind::ReadOnly) => true,
        (_, StatementKind::DmlWrite) => stmt.to_string().contains(" RETURNING "),
        _ => matches!(stmt, Statement::Explain { .. }),
    };
    SqlAnalysis {
        kind,
        operation,
        returns_rows,
    }
}

fn classify_statement(stmt: &Statement) -> (StatementKind, &'static str) {
    match stmt {
        Statement::Query(query) => classify_query(query),
        Statement::ShowVariable { .. } => (StatementKind::ReadOnly, "SHOW"),
        Statement::ShowTables { .. } => (StatementKind::ReadOnly, "SHOW TABLES"),
        Statement::ShowColumns { .. } => (StatementKind::ReadOnly, "SHOW COLUMNS"),

        // EXPLAIN ANALYZE runs the statement, so it inherits its category.
        Statement::Explain { statement, .. } => match classify_statement(statement) {
            (StatementKind::ReadOnly, _) => (StatementKind::ReadOnly, "EXPLAIN"),
            inner => inner,
        },

        Statement::Insert(_) => (StatementKind::DmlWrite, "INSERT"),
        Statement::Update { .. } => (StatementKind::DmlWrite, "UPDATE"),
        Statement::Delete(_) => (StatementKind::DmlWrite, "DELETE"),
        Statement::Merge { .. } => (StatementKind::DmlWrite, "MERGE"),
        Statement::Copy { .. } => (StatementKind::DmlWrite, "COPY"),

        Statement::CreateTable { .. } => (StatementKind::Ddl, "CREATE TABLE"),
        Statement::CreateView { .. } => (StatementKind::Ddl, "CREATE VIEW"),
        Statement::CreateIndex(_) => (StatementKind::Ddl, "CREATE INDEX"),
        Statement::CreateSchema { .. } => (StatementKind::Ddl, "CREATE SCHEMA"),
        Statement::CreateDatabase { .. } => (StatementKind::Ddl, "CREATE DATABASE"),
        Statement::CreateSequence { .. } => (StatementKind::Ddl, "CREATE SEQUENCE"),
        Statement::CreateType { .. } => (StatementKind::Ddl, "CREATE TYPE"),
        Statement::CreateFunction { .. } => (StatementKind::Ddl, "CREATE FUNCTION"),
        Statement::CreateProcedure { .. } => (StatementKind::Ddl, "CREATE PROCEDURE"),
        Statement::CreateTrigger { .. } => (StatementKind::Ddl, "CREATE TRIGGER"),
        Statement::CreateRole { .. } => (StatementKind::Ddl, "CREATE ROLE"),
        Statement::CreateExtension { .. } => (StatementKind::Ddl, "CREATE EXTENSION"),
        Statement::CreatePolicy { .. } => (StatementKind::Ddl, "CREATE POLICY"),
        Statement::AlterTable { .. } => (StatementKind::Ddl, "ALTER TABLE"),
        Statement::AlterView { .. } => (StatementKind::Ddl, "ALTER VIEW"),
        Statement::AlterIndex { .. } => (StatementKind::Ddl, "ALTER INDEX"),
        Statement::AlterRole { .. } => (StatementKind::Ddl, "ALTER ROLE"),
        Statement::AlterType { .. } => (StatementKind::Ddl, "ALTER TYPE"),
        Statement::Drop { .. } => (StatementKind::Ddl, "DROP"),
        Statement::DropFunction { .. } => (StatementKind::Ddl, "DROP FUNCTION"),
        Statement::Truncate { .. } => (StatementKind::Ddl, "TRUNCATE"),
        Statement::Comment { .. } => (StatementKind::Ddl, "COMMENT"),

        Statement::StartTransaction { .. } => (StatementKind::Transaction, "BEGIN"),
        Statement::Commit { .. } => (StatementKind::Transaction, "COMMIT"),
        Statement::Rollback { .. } => (StatementKind::Transaction, "ROLLBACK"),
        Statement::Savepoint { .. } => (StatementKind::Transaction, "SAVEPOINT"),
        Statement::ReleaseSavepoint { .. } => (StatementKind::Transaction, "RELEASE SAVEPOINT"),

        Statement::Call { .. } => (StatementKind::ProcedureCall, "CALL"),
        Statement::Execute { .. } => (StatementKind::ProcedureCall, "EXECUTE"),
        Statement::Prepare { .. } => (StatementKind::ProcedureCall, "PREPARE"),
        Statement::Deallocate { .. } => (StatementKind::ProcedureCall, "DEALLOCATE"),

        Statement::Grant { .. } => (StatementKind::Administrative, "GRANT"),
        Statement::Revoke { .. } => (StatementKind::Administrative, "REVOKE"),
        Statement::Set(_) => (StatementKind::Administrative, "SET"),
        Statement::Vacuum { .. } => (StatementKind::Administrative, "VACUUM"),
        Statement::Analyze { .. } => (StatementKind::Administrative, "ANALYZE"),
        Statement::Discard { .. } => (StatementKind::Administrative, "DISCARD"),
        Statement::LISTEN { .. } => (StatementKind::Administrative, "LISTEN"),
        Statement::UNLISTEN { .. } => (StatementKind::Administrative, "UNLISTEN"),
        Statement::NOTIFY { .. } => (StatementKind::Administrative, "NOTIFY"),

        _ => (StatementKind::Unknown, "Unknown"),
    }
}

/// A query writes through data-modifying CTEs, `SELECT ... INTO` or row locks.
fn classify_query(query: &Query) -> (StatementKind, &'static str) {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            match classify_query(&cte.query) {
                (StatementKind::ReadOnly, _) => {}
                write => return write,
            }
        }
    }
    if !query.locks.is_empty() {
        return (StatementKind::DmlWrite, "SELECT FOR UPDATE");
    }
    classify_set_expr(&query.body)
}

fn classify_set_expr(body: &SetExpr) -> (StatementKind, &'static str) {
    match body {
        SetExpr::Select(select) if select.into.is_some() => (StatementKind::Ddl, "SELECT INTO"),
        SetExpr::Query(query) => classify_query(query),
        SetExpr::SetOperation { left, right, .. } => match classify_set_expr(left) {
            (StatementKind::ReadOnly, _) => classify_set_expr(right),
            write => write,
        },
        SetExpr::Insert(_) => (StatementKind::DmlWrite, "INSERT"),
        SetExpr::Update(_) => (StatementKind::DmlWrite, "UPDATE"),
        SetExpr::Delete(_) => (StatementKind::DmlWrite, "DELETE"),
        SetExpr::Merge(_) => (StatementKind::DmlWrite, "MERGE"),
        _ => (StatementKind::ReadOnly, "SELECT"),
    }
}

fn query_returns_rows(query: &Query) -> bool {
    match query.body.as_ref() {
        SetExpr::Select(select) => select.into.is_none(),
        SetExpr::Insert(stmt) | SetExpr::Update(stmt) | SetExpr::Delete(stmt) | SetExpr::Merge(stmt) => {
            stmt.to_string().contains(" RETURNING ")
        }
        _ => true,
    }
}
