//! # Data Manager
//!
//! Generic create, seed, update and query operations for any [`Entity`],
//! executed inside a caller-owned [`Session`].
//!
//! ## Features
//!
//! - **Insert**: single rows and all-or-nothing batches, with server-side
//!   values refreshed from `RETURNING *`
//! - **Seed**: idempotent insert-or-ignore keyed on the row identity
//! - **Update**: runs a caller-supplied UPDATE, then stamps `edited_at`
//! - **Query**: first row, exactly-one row, by identity, all rows with optional
//!   de-duplication, and table-valued function lookups

use super::{Entity, Session, SqlValue, Statement};
use crate::error::{Error, Result};
use crate::util::timestamp_aware;
use futures::TryStreamExt;
use sqlx::{Connection, SqliteConnection};
use std::collections::HashSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

///////////////////////////////////////////////////////////////////////////////
//****                         Public Structs                            ****//
///////////////////////////////////////////////////////////////////////////////

/// Entity-agnostic data access bound to one session
pub struct DataManager<'s> {
    session: &'s mut Session,
}

impl<'s> DataManager<'s> {
    pub fn new(session: &'s mut Session) -> Self {
        Self { session }
    }

    /// Insert one row and return it with server-assigned values populated
    pub async fn add_one<E: Entity>(&mut self, mut entity: E) -> Result<E> {
        prepare_insert(&mut entity);
        let conn = self.session.connection().await?;
        let stored = insert_returning(conn, &entity).await?;
        debug!(table = E::table_name(), id = ?stored.id(), "Row added");
        Ok(stored)
    }

    /// Insert every row or none of them.
    ///
    /// The batch runs in a savepoint inside the session's transaction, so a
    /// failure rolls back only this batch. With `refresh`, the returned rows
    /// carry the values the store assigned; otherwise they are the inputs with
    /// identity and creation time filled in. Input order is preserved.
    pub async fn add_all<E: Entity>(&mut self, entities: Vec<E>, refresh: bool) -> Result<Vec<E>> {
        if entities.is_empty() {
            return Ok(entities);
        }

        let conn = self.session.connection().await?;
        let mut batch = conn.begin().await?;
        let mut stored = Vec::with_capacity(entities.len());

        for mut entity in entities {
            prepare_insert(&mut entity);
            let row = insert_returning(&mut batch, &entity).await?;
            stored.push(if refresh { row } else { entity });
        }

        batch.commit().await?;
        debug!(table = E::table_name(), count = stored.len(), "Rows added");
        Ok(stored)
    }

    /// Idempotently seed rows, then return every row of the table.
    ///
    /// Rows whose identity already exists are skipped. This commits the
    /// session, including anything the caller had pending.
    pub async fn add_or_ignore_all<E: Entity>(&mut self, rows: Vec<E>) -> Result<Vec<E>> {
        let conn = self.session.connection().await?;
        let mut inserted = 0u64;

        for mut row in rows {
            prepare_insert(&mut row);
            let statement = insert_statement(&row, " ON CONFLICT(id) DO NOTHING", "");
            let result = sqlx::query_with(statement.sql(), statement.arguments()?)
                .execute(&mut *conn)
                .await?;
            inserted += result.rows_affected();
        }

        self.session.commit().await?;
        info!(table = E::table_name(), inserted, "Seed rows committed");

        let all = Statement::new(format!("SELECT * FROM {}", E::qualified_name()));
        Ok(self.get_all(&all, false, false).await?.unwrap_or_default())
    }

    /// Run an UPDATE statement against `entity` and return the refreshed row.
    ///
    /// The statement runs first and `edited_at` is stamped only once it has
    /// succeeded, so a failing statement leaves the row untouched. Any
    /// statement other than an UPDATE is rejected before the store is touched.
    pub async fn update_one<E: Entity>(&mut self, statement: &Statement, mut entity: E) -> Result<E> {
        if !statement.is_update() {
            return Err(Error::PreconditionRequired(format!(
                "update_one expects an UPDATE statement, got {:?}",
                statement.kind()
            )));
        }
        let id = entity.id().ok_or_else(|| {
            Error::PreconditionRequired(format!(
                "{} row has no identity, add it before updating",
                E::table_name()
            ))
        })?;

        let conn = self.session.connection().await?;
        sqlx::query_with(statement.sql(), statement.arguments()?)
            .execute(&mut *conn)
            .await?;

        let now = timestamp_aware();
        entity.audit_mut().edited_at = Some(now);
        sqlx::query(&format!(
            "UPDATE {} SET edited_at = ? WHERE id = ?",
            E::qualified_name()
        ))
        .bind(now)
        .bind(id)
        .execute(&mut *conn)
        .await?;

        fetch_by_id::<E>(conn, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("{} row {} vanished during update", E::table_name(), id)))
    }

    /// First row of the result, if any
    pub async fn get_first<E: Entity>(&mut self, statement: &Statement, raise_if_missing: bool) -> Result<Option<E>> {
        let conn = self.session.connection().await?;
        let row = sqlx::query_as_with::<_, E, _>(statement.sql(), statement.arguments()?)
            .fetch_optional(conn)
            .await?;

        if row.is_none() && raise_if_missing {
            return Err(Error::NotFound(format!("No data found in {}", E::table_name())));
        }
        Ok(row)
    }

    /// The single row of the result.
    ///
    /// Zero rows and more than one row both yield `None`; the second case is
    /// logged since it usually means the statement is missing a filter.
    pub async fn get_only_one<E: Entity>(&mut self, statement: &Statement) -> Result<Option<E>> {
        let conn = self.session.connection().await?;
        let mut rows = sqlx::query_as_with::<_, E, _>(statement.sql(), statement.arguments()?).fetch(conn);

        let first = rows.try_next().await?;
        if first.is_none() {
            return Ok(None);
        }
        if rows.try_next().await?.is_some() {
            warn!(
                table = E::table_name(),
                sql = statement.sql(),
                "Expected exactly one row, found several"
            );
            return Ok(None);
        }
        Ok(first)
    }

    /// Row with the given identity
    pub async fn get_by_id<E: Entity>(&mut self, id: Uuid) -> Result<Option<E>> {
        let statement = Statement::new(format!("SELECT * FROM {} WHERE id = ?", E::qualified_name())).bind(id);
        self.get_only_one(&statement).await
    }

    /// Every row of the result.
    ///
    /// With `unique`, repeated identities (as produced by joins) are collapsed
    /// to their first occurrence. An empty result is `None`, or `NotFound`
    /// with `raise_if_missing`.
    pub async fn get_all<E: Entity>(
        &mut self,
        statement: &Statement,
        unique: bool,
        raise_if_missing: bool,
    ) -> Result<Option<Vec<E>>> {
        let conn = self.session.connection().await?;
        let rows = sqlx::query_as_with::<_, E, _>(statement.sql(), statement.arguments()?)
            .fetch_all(conn)
            .await?;

        let rows = if unique { unique_by_identity(rows) } else { rows };

        if !rows.is_empty() {
            return Ok(Some(rows));
        }
        if raise_if_missing {
            return Err(Error::NotFound(format!("No data found in {}", E::table_name())));
        }
        Ok(None)
    }

    /// Rows produced by the entity's table-valued function.
    ///
    /// The call is `SELECT <fields> FROM <schema>.<table>(?, ...)`. SQLite only
    /// offers built-in table-valued functions and eponymous virtual tables,
    /// not user-defined ones, so against a SQLite store this is limited to
    /// functions the engine or a loaded extension provides.
    pub async fn get_from_tvf<E: Entity>(&mut self, args: Vec<SqlValue>) -> Result<Option<Vec<E>>> {
        let statement = select_from_tvf::<E>(args)?;
        self.get_all(&statement, false, false).await
    }
}

///////////////////////////////////////////////////////////////////////////////
//****                        Public Functions                           ****//
///////////////////////////////////////////////////////////////////////////////

/// `SELECT <fields> FROM <schema>.<name>(?, ...)` with `args` bound in order
pub fn select_from_tvf<E: Entity>(args: Vec<SqlValue>) -> Result<Statement> {
    let schema = E::schema().ok_or(Error::MissingSchema(E::table_name()))?;
    let placeholders = vec!["?"; args.len()].join(", ");
    let sql = format!(
        "SELECT {} FROM {}.{}({})",
        E::fields().join(", "),
        schema,
        E::table_name(),
        placeholders
    );
    Ok(args.into_iter().fold(Statement::new(sql), |stmt, arg| stmt.bind(arg)))
}

///////////////////////////////////////////////////////////////////////////////
//****                        Private Helpers                            ****//
///////////////////////////////////////////////////////////////////////////////

fn prepare_insert<E: Entity>(entity: &mut E) {
    if entity.id().is_none() {
        entity.assign_id(Uuid::new_v4());
    }
    let audit = entity.audit_mut();
    if audit.created_at.is_none() {
        audit.created_at = Some(timestamp_aware());
    }
}

fn insert_statement<E: Entity>(entity: &E, on_conflict: &str, returning: &str) -> Statement {
    let fields = E::fields();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({}){}{}",
        E::qualified_name(),
        fields.join(", "),
        vec!["?"; fields.len()].join(", "),
        on_conflict,
        returning
    );

    std::iter::once(SqlValue::from(entity.id()))
        .chain(entity.values())
        .chain(entity.audit().values())
        .fold(Statement::new(sql), |stmt, value| stmt.bind(value))
}

async fn insert_returning<E: Entity>(conn: &mut SqliteConnection, entity: &E) -> Result<E> {
    let statement = insert_statement(entity, "", " RETURNING *");
    let row = sqlx::query_as_with::<_, E, _>(statement.sql(), statement.arguments()?)
        .fetch_one(conn)
        .await?;
    Ok(row)
}

async fn fetch_by_id<E: Entity>(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<E>> {
    let row = sqlx::query_as::<_, E>(&format!("SELECT * FROM {} WHERE id = ?", E::qualified_name()))
        .bind(id)
        .fetch_optional(conn)
        .await?;
    Ok(row)
}

fn unique_by_identity<E: Entity>(rows: Vec<E>) -> Vec<E> {
    let mut seen = HashSet::new();
    rows.into_iter()
        .filter(|row| row.id().is_none_or(|id| seen.insert(id)))
        .collect()
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////
