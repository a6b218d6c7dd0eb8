//! # Request Capture Middleware
//!
//! Buffers every request and response body, hands the client an unmodified
//! copy of the response, and emits the exchange as a request record through
//! the [`LogSink`].
//!
//! The full response is held in memory before it is forwarded, so the
//! largest response bounds the memory each in-flight request can take while
//! capture is enabled.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let app = Router::new()
//!     .route("/items/{id}", post(create_item));
//! let app = with_request_capture(app, sink);
//! ```

use crate::logging::{LogRecord, LogSink, RequestLogRecord};
use axum::{
    Router,
    body::{Body, Bytes, to_bytes},
    extract::{ConnectInfo, Query, RawPathParams, Request, State, rejection::RawPathParamsRejection},
    http::{HeaderMap, StatusCode, Uri, header::HOST},
    middleware::{Next, from_fn_with_state},
    response::Response,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use tracing::warn;

///////////////////////////////////////////////////////////////////////////////
//****                       Public Functions                            ****//
///////////////////////////////////////////////////////////////////////////////

/// Wrap every route of `router` with request capture
pub fn with_request_capture<S>(router: Router<S>, sink: LogSink) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(from_fn_with_state(sink, capture_requests))
}

/// Request/response capture middleware
pub async fn capture_requests(
    State(sink): State<LogSink>,
    path_params: Result<RawPathParams, RawPathParamsRejection>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let (parts, body) = request.into_parts();

    let request_bytes = to_bytes(body, usize::MAX).await.map_err(|e| {
        warn!(error = %e, "Failed to read request body");
        StatusCode::BAD_REQUEST
    })?;

    let url = full_url(&parts.uri, &parts.headers);
    let method = parts.method.to_string();
    let query_params = Query::<BTreeMap<String, String>>::try_from_uri(&parts.uri)
        .map(|Query(params)| params)
        .unwrap_or_default();
    let request_headers = header_map(&parts.headers);
    let client_host = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());
    let path_params = path_params
        .map(|params| {
            params
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect()
        })
        .unwrap_or_default();
    let request_body = decode_body(&request_bytes);

    let request = Request::from_parts(parts, Body::from(request_bytes));
    let response = next.run(request).await;

    // drain the downstream body and replay it from memory
    let (parts, body) = response.into_parts();
    let response_bytes = to_bytes(body, usize::MAX).await.map_err(|e| {
        warn!(error = %e, "Failed to read response body");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let record = RequestLogRecord {
        url,
        method,
        path_params,
        request_body,
        query_params,
        request_headers,
        client_host,
        status_code: parts.status.as_u16(),
        response_headers: header_map(&parts.headers),
        response_body: String::from_utf8_lossy(&response_bytes).into_owned(),
    };

    match LogRecord::request(&record) {
        Ok(log) => sink.emit(log),
        Err(e) => warn!(error = %e, url = %record.url, "Failed to serialize request record"),
    }

    Ok(Response::from_parts(parts, Body::from(response_bytes)))
}

///////////////////////////////////////////////////////////////////////////////
//****                        Private Helpers                            ****//
///////////////////////////////////////////////////////////////////////////////

/// JSON body, `None` when empty, raw text when it is not JSON
fn decode_body(bytes: &Bytes) -> Option<Value> {
    if bytes.is_empty() {
        return None;
    }
    match serde_json::from_slice(bytes) {
        Ok(value) => Some(value),
        Err(_) => Some(Value::String(String::from_utf8_lossy(bytes).into_owned())),
    }
}

/// Header values by name; repeated headers are joined with ", "
fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut map: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        map.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    map
}

/// Server-side URIs are usually origin-form; rebuild the absolute URL from Host
fn full_url(uri: &Uri, headers: &HeaderMap) -> String {
    if uri.scheme().is_some() {
        return uri.to_string();
    }
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    match headers.get(HOST).and_then(|h| h.to_str().ok()) {
        Some(host) => format!("http://{}{}", host, path_and_query),
        None => path_and_query.to_string(),
    }
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////
