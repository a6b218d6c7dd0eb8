//! Executable SQL statements with their bind values and kind.

use super::value::{SqlValue, to_arguments};
use sqlx::sqlite::SqliteArguments;

/// Leading verb of a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Other,
}

impl StatementKind {
    fn of(sql: &str) -> Self {
        let verb = sql
            .trim_start()
            .split(|c: char| c.is_whitespace() || c == '(')
            .next()
            .unwrap_or("")
            .to_ascii_uppercase();

        match verb.as_str() {
            "SELECT" => StatementKind::Select,
            "INSERT" | "REPLACE" => StatementKind::Insert,
            "UPDATE" => StatementKind::Update,
            "DELETE" => StatementKind::Delete,
            _ => StatementKind::Other,
        }
    }
}

/// SQL text plus positional bind values
#[derive(Debug, Clone)]
pub struct Statement {
    sql: String,
    args: Vec<SqlValue>,
    kind: StatementKind,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        let sql = sql.into();
        let kind = StatementKind::of(&sql);
        Self {
            sql,
            args: Vec::new(),
            kind,
        }
    }

    /// Append the next positional parameter
    pub fn bind(mut self, value: impl Into<SqlValue>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn args(&self) -> &[SqlValue] {
        &self.args
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    pub fn is_update(&self) -> bool {
        self.kind == StatementKind::Update
    }

    pub(crate) fn arguments<'q>(&self) -> Result<SqliteArguments<'q>, sqlx::Error> {
        to_arguments(&self.args)
    }
}
