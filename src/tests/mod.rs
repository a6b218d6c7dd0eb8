//! End-to-end tests across the store, logging, capture, server and data layers
use crate::auth::AuthClient;
use crate::database::{AuditFields, DataManager, Entity, Session, SqlValue, Statement};
use crate::logging::LogSink;
use crate::server::{AppState, create_router, serve};
use crate::store::{ConnectionManager, FindOptions};
use serde::Serialize;
use serde_json::{Value, json};
use sqlx::FromRow;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::time::{Duration, sleep};
use tracing_subscriber::layer::SubscriberExt;
use uuid::Uuid;

fn log_store_uri(dir: &tempfile::TempDir) -> String {
    format!("sqlite://{}", dir.path().join("logs.db").display())
}

async fn documents(manager: &ConnectionManager, collection: &str) -> Vec<Value> {
    let collection = collection.to_string();
    manager
        .session(|db| async move { db.collection(&collection).find(FindOptions::default()).await })
        .await
        .expect("Failed to read documents")
}

async fn wait_for_documents(manager: &ConnectionManager, collection: &str, expected: usize) -> Vec<Value> {
    for _ in 0..250 {
        let docs = documents(manager, collection).await;
        if docs.len() >= expected {
            return docs;
        }
        sleep(Duration::from_millis(20)).await;
    }
    documents(manager, collection).await
}

#[tokio::test]
async fn captured_exchange_is_persisted_through_running_server() {
    let dir = tempfile::tempdir().unwrap();
    let log_store = Arc::new(ConnectionManager::new(log_store_uri(&dir), "library"));
    log_store.initialize().await.unwrap();
    let sink = LogSink::new(log_store.clone(), Some("audit"));

    let state = AppState {
        project_name: Arc::from("Library Service"),
        auth: AuthClient::new("http://127.0.0.1:9").unwrap(),
    };
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(serve(listener, create_router(state, Some(sink)), async move {
        rx.await.ok();
    }));

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{}/echo/7?page=2", addr))
        .json(&json!({"a": 1}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);
    let client_body = response.text().await.unwrap();

    let docs = wait_for_documents(&log_store, "request_audit", 1).await;
    assert_eq!(docs.len(), 1);
    let doc = &docs[0];
    assert_eq!(doc["url"], format!("http://{}/echo/7?page=2", addr));
    assert_eq!(doc["method"], "POST");
    assert_eq!(doc["path_params"], json!({"id": "7"}));
    assert_eq!(doc["query_params"], json!({"page": "2"}));
    assert_eq!(doc["request_body"], json!({"a": 1}));
    assert_eq!(doc["client_host"], "127.0.0.1");
    assert_eq!(doc["status_code"], 201);
    assert_eq!(doc["response_body"], client_body);

    tx.send(()).unwrap();
    server.await.unwrap().unwrap();
    log_store.close().await;
}

#[tokio::test]
async fn tracing_events_reach_the_log_collection() {
    let dir = tempfile::tempdir().unwrap();
    let log_store = Arc::new(ConnectionManager::new(log_store_uri(&dir), "library"));
    log_store.initialize().await.unwrap();

    let sink = LogSink::new(log_store.clone(), None);
    let subscriber = tracing_subscriber::registry().with(sink);
    let guard = tracing::subscriber::set_default(subscriber);

    tracing::info!(k = "v", "hello");
    tracing::debug!("filtered out");

    drop(guard);

    let docs = wait_for_documents(&log_store, "logs", 1).await;
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["level"], "INFO");
    assert_eq!(docs[0]["message"], "hello");
    assert_eq!(docs[0]["extra"], json!({"k": "v"}));
    assert_eq!(docs[0]["module"], module_path!());

    let requests = documents(&log_store, "request_logs").await;
    assert!(requests.is_empty());
}

#[derive(Debug, Clone, Serialize, FromRow)]
struct Book {
    id: Option<Uuid>,
    title: String,
    copies: i64,
    #[sqlx(flatten)]
    #[serde(flatten)]
    audit: AuditFields,
}

impl Book {
    fn seed(n: u128, title: &str) -> Self {
        Self {
            id: Some(Uuid::from_u128(n)),
            title: title.to_string(),
            copies: 1,
            audit: AuditFields::default(),
        }
    }
}

impl Entity for Book {
    fn table_name() -> &'static str {
        "books"
    }

    fn columns() -> &'static [&'static str] {
        &["title", "copies"]
    }

    fn values(&self) -> Vec<SqlValue> {
        vec![self.title.clone().into(), self.copies.into()]
    }

    fn id(&self) -> Option<Uuid> {
        self.id
    }

    fn assign_id(&mut self, id: Uuid) {
        self.id = Some(id);
    }

    fn audit(&self) -> &AuditFields {
        &self.audit
    }

    fn audit_mut(&mut self) -> &mut AuditFields {
        &mut self.audit
    }
}

#[tokio::test]
async fn library_catalog_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("library.db").display());
    let pool = crate::database::connect(&url).await.unwrap();
    sqlx::query(&format!(
        "CREATE TABLE books (id BLOB PRIMARY KEY NOT NULL, title TEXT NOT NULL, copies INTEGER NOT NULL, {})",
        AuditFields::COLUMNS_DDL
    ))
    .execute(&pool)
    .await
    .unwrap();

    // seeding twice leaves one row per identity
    let mut session = Session::new(pool.clone());
    let seeds = || vec![Book::seed(1, "Dune"), Book::seed(2, "Emma")];
    DataManager::new(&mut session).add_or_ignore_all(seeds()).await.unwrap();
    let catalog = DataManager::new(&mut session).add_or_ignore_all(seeds()).await.unwrap();
    assert_eq!(catalog.len(), 2);

    // caller-owned unit of work: nothing is visible until commit
    let added = DataManager::new(&mut session)
        .add_all(vec![Book::seed(3, "Ulysses")], true)
        .await
        .unwrap();
    let id = added[0].id.unwrap();

    let mut reader = Session::new(pool.clone());
    let before: Option<Book> = DataManager::new(&mut reader).get_by_id(id).await.unwrap();
    assert!(before.is_none());
    reader.rollback().await.unwrap();

    session.commit().await.unwrap();

    let update = Statement::new("UPDATE books SET copies = copies + 2 WHERE id = ?").bind(id);
    let updated = DataManager::new(&mut session)
        .update_one(&update, added[0].clone())
        .await
        .unwrap();
    assert_eq!(updated.copies, 3);
    assert!(updated.audit.edited_at.is_some());
    session.commit().await.unwrap();

    let after: Book = DataManager::new(&mut reader).get_by_id(id).await.unwrap().unwrap();
    assert_eq!(after.copies, 3);
    assert_eq!(after.to_json().unwrap()["title"], "Ulysses");

    let all: Vec<Book> = DataManager::new(&mut reader)
        .get_all(&Statement::new("SELECT * FROM books ORDER BY title"), true, true)
        .await
        .unwrap()
        .unwrap();
    let titles: Vec<_> = all.iter().map(|b| b.title.as_str()).collect();
    assert_eq!(titles, vec!["Dune", "Emma", "Ulysses"]);
}

#[tokio::test]
async fn memory_pool_sessions_share_one_connection() {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create test database pool");
    sqlx::query(&format!(
        "CREATE TABLE books (id BLOB PRIMARY KEY NOT NULL, title TEXT NOT NULL, copies INTEGER NOT NULL, {})",
        AuditFields::COLUMNS_DDL
    ))
    .execute(&pool)
    .await
    .unwrap();

    {
        let mut session = Session::new(pool.clone());
        DataManager::new(&mut session)
            .add_one(Book::seed(9, "Walden"))
            .await
            .unwrap();
        // dropped without commit
    }

    let mut session = Session::new(pool);
    let missing: Option<Book> = DataManager::new(&mut session)
        .get_by_id(Uuid::from_u128(9))
        .await
        .unwrap();
    assert!(missing.is_none());
}
