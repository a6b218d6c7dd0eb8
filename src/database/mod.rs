//!
//! # Database Module
//!
//! Generic data access over a relational store, parameterized by entity type.
//!
//! ## Features
//!
//! - **Sessions**: a caller-owned unit of work that opens its transaction on
//!   first use and is committed or rolled back by the caller.
//! - **Data Manager**: insert, seed, update and query operations for any
//!   [`Entity`], all running inside the caller's session.
//! - **Statements**: SQL text with dynamically typed bind values.
//! - **Connection**: opens the SQLite pool, creating the database file if needed.
//!
//! ## Transactions
//!
//! The data manager never commits the caller's session, with one exception:
//! [`DataManager::add_or_ignore_all`] commits so that seed rows are durable
//! before it returns. Anything pending in the session is committed with them.

pub mod entity;
pub mod manager;
pub mod statement;
pub mod value;

pub use entity::{AuditFields, Entity};
pub use manager::{DataManager, select_from_tvf};
pub use statement::{Statement, StatementKind};
pub use value::SqlValue;

use crate::error::Result;
use sqlx::{
    Sqlite, SqliteConnection, Transaction, migrate::MigrateDatabase, sqlite::SqlitePool,
};
use tracing::info;

///////////////////////////////////////////////////////////////////////////////
//****                        Public Functions                           ****//
///////////////////////////////////////////////////////////////////////////////

/// Open a pool on `database_url`, creating the database file if it doesn't exist
pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    info!("Connecting to relational store at {}", database_url);

    if !database_url.contains(":memory:")
        && !Sqlite::database_exists(database_url).await.unwrap_or(false)
    {
        info!("Database does not exist at {}, creating it", database_url);
        Sqlite::create_database(database_url).await?;
    }

    let pool = SqlitePool::connect(database_url).await?;
    sqlx::query("SELECT 1").execute(&pool).await?;
    Ok(pool)
}

///////////////////////////////////////////////////////////////////////////////
//****                         Public Structs                            ****//
///////////////////////////////////////////////////////////////////////////////

/// A unit of work against the relational store.
///
/// The transaction begins lazily on first use. Dropping a session with an
/// open transaction rolls it back.
pub struct Session {
    pool: SqlitePool,
    tx: Option<Transaction<'static, Sqlite>>,
}

impl Session {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool, tx: None }
    }

    /// The connection of the current transaction, beginning one if needed
    pub async fn connection(&mut self) -> Result<&mut SqliteConnection> {
        let tx = match self.tx.take() {
            Some(tx) => tx,
            None => self.pool.begin().await?,
        };
        Ok(&mut **self.tx.insert(tx))
    }

    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    /// Commit the current transaction, if any
    pub async fn commit(&mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await?;
        }
        Ok(())
    }

    /// Roll back the current transaction, if any
    pub async fn rollback(&mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }
}
