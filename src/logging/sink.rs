//! # Log Sink
//!
//! Bridges synchronous log call sites to the asynchronous document store.
//!
//! [`LogSink::emit`] never blocks on I/O when a tokio runtime drives the
//! calling context: the write is spawned on that runtime and the caller moves
//! on (best effort, a crash before the task runs loses the entry). Outside a
//! runtime, e.g. during startup or shutdown, the sink drives a private
//! current-thread runtime to completion and the caller waits for the write.
//!
//! The sink is also a [`tracing_subscriber::Layer`], so every `tracing` event
//! at or above its level is persisted:
//!
//! ```rust,ignore
//! let sink = LogSink::new(connection.clone(), None);
//! tracing_subscriber::registry()
//!     .with(tracing_subscriber::fmt::layer())
//!     .with(sink)
//!     .init();
//!
//! tracing::info!(order_id = 7, "order created");
//! ```

use super::record::{DEFAULT_COLLECTION, LogRecord, REQUEST_COLLECTION_PREFIX, route_record};
use crate::store::ConnectionManager;
use crate::util::timestamp_aware;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::{Builder, Handle};
use tracing::{Event, Level, Metadata, Subscriber, field::Field, field::Visit};
use tracing_subscriber::{Layer, layer::Context, registry::LookupSpan};

/// Target of the sink's own diagnostics, matched exactly
pub const SINK_TARGET: &str = "commonground_log_sink";

/// Module paths whose events are never persisted, since writing them would
/// log the write itself. Matched on whole path segments.
const INTERNAL_MODULES: &[&str] = &["commonground::store", "sqlx"];

///////////////////////////////////////////////////////////////////////////////
//****                         Public Types                              ****//
///////////////////////////////////////////////////////////////////////////////

/// Failure while formatting or writing a record. Never surfaces to the caller
/// of [`LogSink::emit`]; it is handed to the sink's error handler instead.
#[derive(Debug, Error)]
pub enum LogSinkError {
    #[error("Failed to format log record: {0}")]
    Format(#[from] serde_json::Error),

    #[error("Failed to write log record: {0}")]
    Write(#[from] crate::error::Error),

    #[error("Failed to start a runtime for the log write: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("Log write thread panicked")]
    Panicked,
}

/// Callback receiving sink failures
pub type ErrorHandler = Arc<dyn Fn(&LogSinkError) + Send + Sync>;

/// Reports whether a tokio runtime is driving the calling context
pub trait RuntimeProbe: Send + Sync + 'static {
    fn active(&self) -> Option<Handle>;
}

/// Probe backed by [`Handle::try_current`]
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioProbe;

impl RuntimeProbe for TokioProbe {
    fn active(&self) -> Option<Handle> {
        Handle::try_current().ok()
    }
}

/// Logging handler persisting records through a [`ConnectionManager`]
#[derive(Clone)]
pub struct LogSink {
    connection: Arc<ConnectionManager>,
    base_collection: Arc<str>,
    max_level: Level,
    probe: Arc<dyn RuntimeProbe>,
    on_error: ErrorHandler,
}

impl LogSink {
    /// Create a sink writing to `collection` (default `logs`) and
    /// `request_<collection>` for request records
    pub fn new(connection: Arc<ConnectionManager>, collection: Option<&str>) -> Self {
        Self {
            connection,
            base_collection: Arc::from(collection.unwrap_or(DEFAULT_COLLECTION)),
            max_level: Level::INFO,
            probe: Arc::new(TokioProbe),
            on_error: Arc::new(report_to_tracing),
        }
    }

    /// Most verbose level persisted by the layer (default INFO)
    pub fn with_max_level(mut self, level: Level) -> Self {
        self.max_level = level;
        self
    }

    pub fn with_probe(mut self, probe: impl RuntimeProbe) -> Self {
        self.probe = Arc::new(probe);
        self
    }

    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&LogSinkError) + Send + Sync + 'static,
    {
        self.on_error = Arc::new(handler);
        self
    }

    pub fn base_collection(&self) -> &str {
        &self.base_collection
    }

    pub fn request_collection(&self) -> String {
        format!("{}{}", REQUEST_COLLECTION_PREFIX, self.base_collection)
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    /// Persist a record. Never fails and never waits on I/O while a runtime
    /// is active.
    pub fn emit(&self, record: LogRecord) {
        if let Err(e) = self.dispatch(record) {
            (self.on_error)(&e);
        }
    }

    fn dispatch(&self, record: LogRecord) -> Result<(), LogSinkError> {
        let (collection, document) = route_record(&record, &self.base_collection)?;
        let connection = self.connection.clone();
        let write = async move { write_document(&connection, &collection, document).await };

        match self.probe.active() {
            Some(handle) => {
                let on_error = self.on_error.clone();
                handle.spawn(async move {
                    if let Err(e) = write.await {
                        on_error(&LogSinkError::Write(e));
                    }
                });
                Ok(())
            }
            None => {
                // a helper thread keeps block_on off any runtime-owned thread
                std::thread::scope(|scope| {
                    scope
                        .spawn(move || -> Result<(), LogSinkError> {
                            let runtime = Builder::new_current_thread().enable_all().build()?;
                            runtime.block_on(write)?;
                            Ok(())
                        })
                        .join()
                        .unwrap_or(Err(LogSinkError::Panicked))
                })
            }
        }
    }

    fn accepts(&self, metadata: &Metadata<'_>) -> bool {
        *metadata.level() <= self.max_level && !is_internal_target(metadata.target())
    }
}

impl<S> Layer<S> for LogSink
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if !self.accepts(metadata) {
            return;
        }

        let mut fields = FieldCollector::default();
        event.record(&mut fields);

        let function = fields
            .function
            .or_else(|| ctx.event_span(event).map(|span| span.name().to_string()));

        self.emit(LogRecord {
            timestamp: timestamp_aware(),
            level: *metadata.level(),
            message: fields.message.unwrap_or_default(),
            module: metadata.module_path().map(str::to_string),
            function,
            line: metadata.line(),
            extra: fields.extra,
            is_request: fields.is_request,
        });
    }
}

///////////////////////////////////////////////////////////////////////////////
//****                        Private Helpers                            ****//
///////////////////////////////////////////////////////////////////////////////

async fn write_document(
    connection: &ConnectionManager,
    collection: &str,
    document: Value,
) -> crate::error::Result<()> {
    connection
        .session(|db| async move {
            db.collection(collection).insert_one(&document).await?;
            Ok(())
        })
        .await
}

fn is_internal_target(target: &str) -> bool {
    target == SINK_TARGET
        || INTERNAL_MODULES.iter().any(|module| {
            target
                .strip_prefix(module)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
        })
}

fn report_to_tracing(err: &LogSinkError) {
    tracing::warn!(target: SINK_TARGET, error = %err, "Failed to persist log record");
}

/// Splits event fields into message, call-site function, request flag and extras
#[derive(Default)]
struct FieldCollector {
    message: Option<String>,
    function: Option<String>,
    is_request: bool,
    extra: Map<String, Value>,
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = Some(value.to_string()),
            "function" => self.function = Some(value.to_string()),
            name => {
                self.extra.insert(name.to_string(), Value::from(value));
            }
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        if field.name() == "is_request" {
            self.is_request = value;
        } else {
            self.extra.insert(field.name().to_string(), Value::from(value));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.extra.insert(field.name().to_string(), Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.extra.insert(field.name().to_string(), Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.extra.insert(field.name().to_string(), Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let rendered = format!("{:?}", value);
        match field.name() {
            "message" => self.message = Some(rendered),
            "function" => self.function = Some(rendered),
            name => {
                self.extra.insert(name.to_string(), Value::from(rendered));
            }
        }
    }
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FindOptions;
    use serde_json::json;
    use crate::logging::RequestLogRecord;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::runtime::Runtime;
    use tokio::time::{Duration, sleep};
    use tracing_subscriber::layer::SubscriberExt;

    struct FixedProbe(Option<Handle>);

    impl RuntimeProbe for FixedProbe {
        fn active(&self) -> Option<Handle> {
            self.0.clone()
        }
    }

    fn file_uri(dir: &tempfile::TempDir) -> String {
        format!("sqlite://{}", dir.path().join("logs.db").display())
    }

    async fn documents(manager: &ConnectionManager, collection: &str) -> Vec<Value> {
        let collection = collection.to_string();
        manager
            .session(|db| async move { db.collection(&collection).find(FindOptions::default()).await })
            .await
            .expect("Failed to read documents")
    }

    async fn wait_for_documents(
        manager: &ConnectionManager,
        collection: &str,
        expected: usize,
    ) -> Vec<Value> {
        for _ in 0..250 {
            let docs = documents(manager, collection).await;
            if docs.len() >= expected {
                return docs;
            }
            sleep(Duration::from_millis(20)).await;
        }
        documents(manager, collection).await
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_emit_with_active_runtime_writes_in_background() {
        let manager = Arc::new(ConnectionManager::new("sqlite::memory:", "test"));
        manager.initialize().await.unwrap();
        let sink = LogSink::new(manager.clone(), None);

        let record = LogRecord::new(Level::INFO, "hello")
            .with_location("svc::orders", "create_order", 12)
            .with_extra("k", "v");
        sink.emit(record);

        let docs = wait_for_documents(&manager, "logs", 1).await;
        assert_eq!(docs.len(), 1);
        let doc = &docs[0];
        assert_eq!(doc["level"], "INFO");
        assert_eq!(doc["message"], "hello");
        assert_eq!(doc["module"], "svc::orders");
        assert_eq!(doc["function"], "create_order");
        assert_eq!(doc["line"], 12);
        assert_eq!(doc["extra"], json!({"k": "v"}));
        assert!(doc["timestamp"].is_string());
    }

    #[test]
    fn test_emit_without_runtime_blocks_until_written() {
        let dir = tempfile::tempdir().unwrap();
        let rt = Runtime::new().unwrap();
        let manager = Arc::new(ConnectionManager::new(file_uri(&dir), "test"));
        rt.block_on(manager.initialize()).unwrap();

        let sink = LogSink::new(manager.clone(), Some("startup"));
        sink.emit(LogRecord::new(Level::WARN, "booting"));

        // no waiting: the write finished before emit returned
        let docs = rt.block_on(documents(&manager, "startup"));
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["message"], "booting");
        assert_eq!(docs[0]["level"], "WARN");
    }

    #[test]
    fn test_injected_probe_selects_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let rt = Runtime::new().unwrap();
        let manager = Arc::new(ConnectionManager::new(file_uri(&dir), "test"));
        rt.block_on(manager.initialize()).unwrap();

        // called from a plain thread, but the probe points at `rt`
        let sink = LogSink::new(manager.clone(), None)
            .with_probe(FixedProbe(Some(rt.handle().clone())));
        sink.emit(LogRecord::new(Level::INFO, "spawned"));

        let docs = rt.block_on(wait_for_documents(&manager, "logs", 1));
        assert_eq!(docs[0]["message"], "spawned");
    }

    #[test]
    fn test_write_failure_is_swallowed_in_blocking_mode() {
        let failures = Arc::new(AtomicUsize::new(0));
        let counter = failures.clone();
        let manager = Arc::new(ConnectionManager::new("sqlite::memory:", "test"));

        let sink = LogSink::new(manager, None).with_error_handler(move |err| {
            assert!(matches!(
                err,
                LogSinkError::Write(crate::error::Error::NotInitialized)
            ));
            counter.fetch_add(1, Ordering::SeqCst);
        });

        sink.emit(LogRecord::new(Level::ERROR, "lost"));
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_write_failure_is_swallowed_in_background_mode() {
        let failures = Arc::new(AtomicUsize::new(0));
        let counter = failures.clone();
        let manager = Arc::new(ConnectionManager::new("sqlite::memory:", "test"));

        let sink = LogSink::new(manager, None).with_error_handler(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        sink.emit(LogRecord::new(Level::ERROR, "lost"));

        for _ in 0..250 {
            if failures.load(Ordering::SeqCst) == 1 {
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_malformed_request_record_reports_format_error() {
        let failures = Arc::new(AtomicUsize::new(0));
        let counter = failures.clone();
        let manager = Arc::new(ConnectionManager::new("sqlite::memory:", "test"));
        let sink = LogSink::new(manager, None).with_error_handler(move |err| {
            assert!(matches!(err, LogSinkError::Format(_)));
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let mut record = LogRecord::new(Level::INFO, "{not json");
        record.is_request = true;
        sink.emit(record);
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_layer_keeps_call_site_information() {
        let dir = tempfile::tempdir().unwrap();
        let rt = Runtime::new().unwrap();
        let manager = Arc::new(ConnectionManager::new(file_uri(&dir), "test"));
        rt.block_on(manager.initialize()).unwrap();

        let sink = LogSink::new(manager.clone(), None);
        let subscriber = tracing_subscriber::registry().with(sink);

        let mut expected_line = 0;
        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("create_order");
            let _entered = span.enter();
            expected_line = line!() + 1;
            tracing::info!(k = "v", attempt = 3, "hello");
            tracing::info!(function = "explicit_fn", "named");
            tracing::debug!("too verbose");
            tracing::info!(target: "sqlx::query", "driver noise");
        });

        let docs = rt.block_on(documents(&manager, "logs"));
        assert_eq!(docs.len(), 2);

        let doc = &docs[0];
        assert_eq!(doc["message"], "hello");
        assert_eq!(doc["module"], module_path!());
        assert_eq!(doc["function"], "create_order");
        assert_eq!(doc["line"], expected_line);
        assert_eq!(doc["extra"], json!({"k": "v", "attempt": 3}));

        assert_eq!(docs[1]["function"], "explicit_fn");
    }

    #[test]
    fn test_layer_routes_request_events() {
        let dir = tempfile::tempdir().unwrap();
        let rt = Runtime::new().unwrap();
        let manager = Arc::new(ConnectionManager::new(file_uri(&dir), "test"));
        rt.block_on(manager.initialize()).unwrap();

        let sink = LogSink::new(manager.clone(), None);
        let subscriber = tracing_subscriber::registry().with(sink);

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(is_request = true, "{}", r#"{"url":"/ping","status_code":200}"#);
        });

        let requests = rt.block_on(documents(&manager, "request_logs"));
        assert_eq!(requests, vec![json!({"url": "/ping", "status_code": 200})]);
        assert!(rt.block_on(documents(&manager, "logs")).is_empty());
    }

    #[test]
    fn test_internal_targets_match_whole_segments() {
        assert!(is_internal_target(SINK_TARGET));
        assert!(is_internal_target("sqlx"));
        assert!(is_internal_target("sqlx::query"));
        assert!(is_internal_target("commonground::store"));
        assert!(is_internal_target("commonground::store::tests"));

        assert!(!is_internal_target("sqlxtended_app::orders"));
        assert!(!is_internal_target("commonground::storefront"));
        assert!(!is_internal_target("commonground::logging::sink::tests"));
        assert!(!is_internal_target("commonground_log_sink_extra"));
    }

    #[test]
    fn test_layer_persists_targets_that_only_share_a_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let rt = Runtime::new().unwrap();
        let manager = Arc::new(ConnectionManager::new(file_uri(&dir), "test"));
        rt.block_on(manager.initialize()).unwrap();

        let sink = LogSink::new(manager.clone(), None);
        let subscriber = tracing_subscriber::registry().with(sink);

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "sqlxtended_app::orders", "order placed");
            tracing::info!(target: "other_app::orders", "order shipped");
            tracing::info!(target: "sqlx::query", "driver noise");
            tracing::warn!(target: SINK_TARGET, "sink diagnostics");
        });

        let docs = rt.block_on(documents(&manager, "logs"));
        let messages: Vec<_> = docs.iter().map(|d| d["message"].as_str().unwrap()).collect();
        assert_eq!(messages, vec!["order placed", "order shipped"]);
    }

    fn request_record(n: usize) -> RequestLogRecord {
        RequestLogRecord {
            url: format!("http://svc.local/items/{}", n),
            method: "POST".to_string(),
            path_params: BTreeMap::from([("id".to_string(), n.to_string())]),
            request_body: Some(json!({"n": n})),
            query_params: BTreeMap::new(),
            request_headers: BTreeMap::new(),
            client_host: None,
            status_code: 201,
            response_headers: BTreeMap::new(),
            response_body: String::new(),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_mixed_emission_keeps_collections_apart() {
        let manager = Arc::new(ConnectionManager::new("sqlite::memory:", "test"));
        manager.initialize().await.unwrap();
        let sink = LogSink::new(manager.clone(), None);

        let emitters: Vec<_> = (0..8)
            .map(|task| {
                let sink = sink.clone();
                tokio::spawn(async move {
                    for i in 0..25 {
                        let n = task * 100 + i;
                        sink.emit(LogRecord::new(Level::INFO, format!("app {}", n)));
                        sink.emit(LogRecord::request(&request_record(n)).unwrap());
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        for emitter in emitters {
            emitter.await.unwrap();
        }

        let logs = wait_for_documents(&manager, "logs", 200).await;
        let requests = wait_for_documents(&manager, "request_logs", 200).await;
        assert_eq!(logs.len(), 200);
        assert_eq!(requests.len(), 200);

        assert!(logs.iter().all(|doc| {
            doc["level"] == "INFO" && doc["message"].as_str().unwrap().starts_with("app ") && doc.get("url").is_none()
        }));
        assert!(requests.iter().all(|doc| {
            doc["method"] == "POST" && doc["status_code"] == 201 && doc.get("level").is_none()
        }));
    }
}
