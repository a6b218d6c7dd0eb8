//! # Document Store Module
//!
//! Connection lifecycle and scoped sessions for the document store that keeps
//! application and request logs.
//!
//! Documents are schema-free JSON bodies grouped by database name and
//! collection. They live in a single SQLite `documents` table so the store
//! can be pointed at a file next to the service or at an in-memory database
//! in tests.
//!
//! ## Lifecycle
//!
//! ```rust,ignore
//! let manager = ConnectionManager::new("sqlite://logs.db", "service");
//! manager.initialize().await?;
//!
//! manager
//!     .session(|db| async move {
//!         db.collection("logs").insert_one(&json!({"message": "hello"})).await
//!     })
//!     .await?;
//!
//! manager.close().await;
//! ```

use crate::error::{Error, Result};
use chrono::Utc;
use serde_json::Value;
use sqlx::{
    Row,
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions},
};
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// Backing table for every collection of every database
const DOCUMENTS_DDL: &str = r#"
    CREATE TABLE IF NOT EXISTS documents (
        id TEXT PRIMARY KEY,
        database_name TEXT NOT NULL,
        collection TEXT NOT NULL,
        body TEXT NOT NULL,
        inserted_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_documents_collection
        ON documents (database_name, collection);
"#;

///////////////////////////////////////////////////////////////////////////////
//****                         Public Structs                            ****//
///////////////////////////////////////////////////////////////////////////////

/// Owns the document-store client and hands out scoped database handles
pub struct ConnectionManager {
    uri: String,
    db_name: String,
    client: Mutex<Option<SqlitePool>>,
}

/// Database handle yielded by [`ConnectionManager::session`]
///
/// The handle is only live inside the session block. Using it after the
/// block returned fails with [`Error::SessionClosed`].
pub struct Database {
    pool: SqlitePool,
    name: String,
    lease: Arc<AtomicBool>,
}

/// A named collection inside a [`Database`]
pub struct Collection<'a> {
    db: &'a Database,
    name: String,
}

/// Options for [`Collection::find`]
#[derive(Debug, Clone, Copy, Default)]
pub struct FindOptions {
    /// Maximum number of documents; `None` reads the whole collection
    pub limit: Option<u32>,
    pub newest_first: bool,
}

impl ConnectionManager {
    /// Create a manager; no connection is opened until [`initialize`](Self::initialize)
    pub fn new(uri: impl Into<String>, db_name: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            db_name: db_name.into(),
            client: Mutex::new(None),
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    /// Build the client if it does not exist yet. Calling this again is a no-op.
    pub async fn initialize(&self) -> Result<()> {
        let mut client = self.client.lock().await;
        if client.is_some() {
            return Ok(());
        }

        let options = SqliteConnectOptions::from_str(&self.uri)?.create_if_missing(true);
        let mut pool_options = SqlitePoolOptions::new();
        if self.uri.contains(":memory:") {
            // every in-memory connection is a separate database
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options.connect_with(options).await?;
        sqlx::query(DOCUMENTS_DDL).execute(&pool).await?;

        info!(uri = %self.uri, database = %self.db_name, "Document store client initialized");
        *client = Some(pool);
        Ok(())
    }

    /// Release the client. Safe to call repeatedly and before `initialize()`.
    pub async fn close(&self) {
        let pool = self.client.lock().await.take();
        if let Some(pool) = pool {
            pool.close().await;
            info!(database = %self.db_name, "Document store connection closed");
        }
    }

    pub async fn is_initialized(&self) -> bool {
        self.client.lock().await.is_some()
    }

    /// Run `f` with a handle to the target database.
    ///
    /// Errors returned from inside the block are propagated once the handle
    /// has been released. No transaction wraps the block; each document
    /// operation is atomic on its own.
    pub async fn session<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Database) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let pool = self
            .client
            .lock()
            .await
            .clone()
            .ok_or(Error::NotInitialized)?;

        let lease = Arc::new(AtomicBool::new(true));
        let db = Database {
            pool,
            name: self.db_name.clone(),
            lease: lease.clone(),
        };

        let result = f(db).await;
        lease.store(false, Ordering::Release);
        result
    }
}

impl Database {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn collection(&self, name: &str) -> Collection<'_> {
        Collection {
            db: self,
            name: name.to_string(),
        }
    }

    fn pool(&self) -> Result<&SqlitePool> {
        if self.lease.load(Ordering::Acquire) {
            Ok(&self.pool)
        } else {
            Err(Error::SessionClosed)
        }
    }
}

impl Collection<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store one document verbatim and return its generated id
    pub async fn insert_one(&self, document: &Value) -> Result<Uuid> {
        let pool = self.db.pool()?;
        let id = Uuid::new_v4();
        let body = serde_json::to_string(document)?;

        sqlx::query(
            "INSERT INTO documents (id, database_name, collection, body, inserted_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(&self.db.name)
        .bind(&self.name)
        .bind(body)
        .bind(Utc::now().to_rfc3339())
        .execute(pool)
        .await?;

        debug!(collection = %self.name, id = %id, "Inserted document");
        Ok(id)
    }

    /// Fetch documents in insertion order (or newest first)
    pub async fn find(&self, options: FindOptions) -> Result<Vec<Value>> {
        let pool = self.db.pool()?;
        let order = if options.newest_first { "DESC" } else { "ASC" };
        let sql = format!(
            "SELECT body FROM documents
             WHERE database_name = ? AND collection = ?
             ORDER BY rowid {} LIMIT ?",
            order
        );

        let rows = sqlx::query(&sql)
            .bind(&self.db.name)
            .bind(&self.name)
            .bind(options.limit.map(i64::from).unwrap_or(-1))
            .fetch_all(pool)
            .await?;

        rows.iter()
            .map(|row| {
                let body: String = row.get("body");
                serde_json::from_str(&body).map_err(Error::from)
            })
            .collect()
    }

    pub async fn count_documents(&self) -> Result<i64> {
        let pool = self.db.pool()?;
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM documents WHERE database_name = ? AND collection = ?",
        )
        .bind(&self.db.name)
        .bind(&self.name)
        .fetch_one(pool)
        .await?;
        Ok(count)
    }
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////
