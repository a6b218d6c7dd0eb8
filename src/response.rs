//! Success envelope for JSON responses.
//!
//! Mirrors [`ErrorBody`](crate::error::ErrorBody): every successful answer
//! carries `success: true` and its `statusCode` next to the payload fields.
//!
//! ```rust,ignore
//! async fn whoami() -> Success<Value> {
//!     Success::ok(json!({ "userId": user_id }))
//! }
//! ```

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// JSON body of a successful response. The payload must serialize to a map;
/// its fields sit beside `success` and `statusCode`.
#[derive(Debug, Serialize)]
pub struct SuccessBody<T> {
    pub success: bool,
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    #[serde(flatten)]
    pub payload: T,
}

/// Handler return type producing a [`SuccessBody`]
#[derive(Debug)]
pub struct Success<T> {
    status: StatusCode,
    payload: T,
}

impl<T: Serialize> Success<T> {
    pub fn ok(payload: T) -> Self {
        Self::with_status(StatusCode::OK, payload)
    }

    pub fn created(payload: T) -> Self {
        Self::with_status(StatusCode::CREATED, payload)
    }

    pub fn with_status(status: StatusCode, payload: T) -> Self {
        Self { status, payload }
    }

    pub fn body(self) -> SuccessBody<T> {
        SuccessBody {
            success: true,
            status_code: self.status.as_u16(),
            payload: self.payload,
        }
    }
}

impl<T: Serialize> IntoResponse for Success<T> {
    fn into_response(self) -> Response {
        let status = self.status;
        (status, Json(self.body())).into_response()
    }
}
