//! Capability trait for relational entities and their shared audit columns.

use super::value::SqlValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, sqlite::SqliteRow};
use uuid::Uuid;

/// Audit columns carried by every entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct AuditFields {
    pub active: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_by: Option<Uuid>,
    pub edited_by: Option<Uuid>,
    pub deleted_by: Option<Uuid>,
}

impl Default for AuditFields {
    fn default() -> Self {
        Self {
            active: true,
            created_at: None,
            edited_at: None,
            deleted_at: None,
            created_by: None,
            edited_by: None,
            deleted_by: None,
        }
    }
}

impl AuditFields {
    pub const COLUMNS: [&'static str; 7] = [
        "active",
        "created_at",
        "edited_at",
        "deleted_at",
        "created_by",
        "edited_by",
        "deleted_by",
    ];

    /// Column definitions to splice into a `CREATE TABLE`
    pub const COLUMNS_DDL: &'static str = "active BOOLEAN NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL,
        edited_at TEXT,
        deleted_at TEXT,
        created_by BLOB,
        edited_by BLOB,
        deleted_by BLOB";

    /// Values aligned with [`AuditFields::COLUMNS`]
    pub fn values(&self) -> Vec<SqlValue> {
        vec![
            self.active.into(),
            self.created_at.into(),
            self.edited_at.into(),
            self.deleted_at.into(),
            self.created_by.into(),
            self.edited_by.into(),
            self.deleted_by.into(),
        ]
    }
}

/// A row type the data manager can persist and query.
///
/// Implementors own an identity (`id`, immutable once assigned) and the
/// [`AuditFields`]. Rows are decoded with `FromRow`, so the struct usually
/// derives it and flattens the audit fields:
///
/// ```rust,ignore
/// #[derive(Debug, Clone, Serialize, sqlx::FromRow)]
/// struct Book {
///     id: Option<Uuid>,
///     title: String,
///     #[sqlx(flatten)]
///     #[serde(flatten)]
///     audit: AuditFields,
/// }
/// ```
pub trait Entity: for<'r> FromRow<'r, SqliteRow> + Serialize + Send + Unpin + 'static {
    /// Table (or table-valued function) name
    fn table_name() -> &'static str;

    /// Schema the table lives in, when not the default one
    fn schema() -> Option<&'static str> {
        None
    }

    /// Domain columns, excluding `id` and the audit columns
    fn columns() -> &'static [&'static str];

    /// Values aligned with [`Entity::columns`]
    fn values(&self) -> Vec<SqlValue>;

    fn id(&self) -> Option<Uuid>;

    /// Set the identity of a row that does not have one yet
    fn assign_id(&mut self, id: Uuid);

    fn audit(&self) -> &AuditFields;

    fn audit_mut(&mut self) -> &mut AuditFields;

    /// Every column name: identity, domain columns, audit columns
    fn fields() -> Vec<&'static str> {
        let mut fields = vec!["id"];
        fields.extend_from_slice(Self::columns());
        fields.extend_from_slice(&AuditFields::COLUMNS);
        fields
    }

    /// `schema.table`, or just `table` without a schema
    fn qualified_name() -> String {
        match Self::schema() {
            Some(schema) => format!("{}.{}", schema, Self::table_name()),
            None => Self::table_name().to_string(),
        }
    }

    /// The row as a JSON object keyed by field name
    fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}
