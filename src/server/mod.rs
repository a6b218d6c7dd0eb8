//! Server module for CommonGround services.
//!
//! Runs a small HTTP service wired with the shared stack: request capture into
//! the log store, HTTP tracing, the auth client and graceful shutdown.
//!
//! # Routes
//!
//! - `GET /health`: service name and current time
//! - `POST /echo/{id}`: echoes the JSON body, path id and query parameters
//! - `GET /whoami`: resolves the bearer token through the auth service and
//!   answers with the success envelope
//!
//! # Usage
//!
//! ```rust,ignore
//! let sink = LogSink::new(log_store.clone(), Some(&config.log_collection));
//! start_server(config, Some(sink), ShutdownCoordinator::new()).await?;
//! ```

pub mod shutdown;

use self::shutdown::ShutdownCoordinator;
use crate::auth::{AuthClient, bearer_token};
use crate::env::AppConfig;
use crate::error::Result;
use crate::logging::LogSink;
use crate::middleware::with_request_capture;
use crate::response::Success;
use crate::util::{iso8601, timestamp_aware};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use function_name::named;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

///////////////////////////////////////////////////////////////////////////////
//****                         Public Structs                            ****//
///////////////////////////////////////////////////////////////////////////////

/// Shared state handed to every route
#[derive(Clone)]
pub struct AppState {
    pub project_name: Arc<str>,
    pub auth: AuthClient,
}

impl AppState {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            project_name: Arc::from(config.project_name.as_str()),
            auth: AuthClient::new(&config.auth_url)?,
        })
    }
}

///////////////////////////////////////////////////////////////////////////////
//****                       Public Functions                            ****//
///////////////////////////////////////////////////////////////////////////////

/// Build the service router; every exchange is captured when `sink` is given
pub fn create_router(state: AppState, sink: Option<LogSink>) -> Router {
    let router = Router::new()
        .route("/health", get(health))
        .route("/echo/{id}", post(echo))
        .route("/whoami", get(whoami))
        .with_state(state);

    let router = match sink {
        Some(sink) => with_request_capture(router, sink),
        None => router,
    };

    router.layer(TraceLayer::new_for_http())
}

/// Bind to the configured address and serve until shutdown is signalled
pub async fn start_server(
    config: AppConfig,
    sink: Option<LogSink>,
    shutdown: ShutdownCoordinator,
) -> Result<()> {
    let state = AppState::from_config(&config)?;
    let app = create_router(state, sink);

    let listener = TcpListener::bind(config.bind_address).await?;
    info!("{} running on http://{}", config.project_name, listener.local_addr()?);

    serve(listener, app, async move {
        shutdown.wait_for_shutdown_signal().await;
    })
    .await?;

    info!("{} shutdown complete", config.project_name);
    Ok(())
}

/// Serve `app` on `listener` until `signal` resolves
pub async fn serve<F>(listener: TcpListener, app: Router, signal: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(signal);

    if let Err(err) = server.await {
        error!("Server error: {}", err);
        return Err(err.into());
    }
    Ok(())
}

///////////////////////////////////////////////////////////////////////////////
//****                            Handlers                               ****//
///////////////////////////////////////////////////////////////////////////////

#[named]
async fn health(State(state): State<AppState>) -> Json<Value> {
    debug!(function = function_name!(), "Health check");
    Json(json!({
        "status": "ok",
        "service": &*state.project_name,
        "timestamp": iso8601(&timestamp_aware()),
    }))
}

#[named]
async fn echo(
    Path(id): Path<String>,
    Query(query): Query<BTreeMap<String, String>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    info!(function = function_name!(), id = %id, "Echo request");
    (
        StatusCode::CREATED,
        Json(json!({ "id": id, "query": query, "received": body })),
    )
}

#[named]
async fn whoami(State(state): State<AppState>, headers: HeaderMap) -> Result<Success<Value>> {
    let token = bearer_token(&headers).unwrap_or_default();
    let user_id = state.auth.require_user(token, &[]).await?;
    info!(function = function_name!(), user_id = %user_id, "Resolved caller");
    Ok(Success::ok(json!({ "userId": user_id })))
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////
