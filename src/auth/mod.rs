//! # Authentication Module
//!
//! Client for the remote auth service that turns an access token into a user
//! identity.
//!
//! ## Features
//!
//! - Bearer token extraction from request headers
//! - Token plus required permissions posted to `<auth_url>/auth/require-user`
//! - Failures mapped to `Unauthorized` (rejected token) or
//!   `ServiceUnavailable` (auth service unreachable)
//!
//! ## Sub-modules
//!
//! - `types`: request and response bodies of the auth service

pub mod types;

use crate::error::{Error, Result};
use axum::http::{HeaderMap, header::AUTHORIZATION};
use std::time::Duration;
use tracing::{debug, warn};
use types::{RequireUserRequest, RequireUserResponse};
use uuid::Uuid;

pub const REQUIRE_USER_PATH: &str = "/auth/require-user";

///////////////////////////////////////////////////////////////////////////////
//****                         Public Structs                            ****//
///////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone)]
pub struct AuthClient {
    client: reqwest::Client,
    base_url: String,
}

impl AuthClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::ServiceUnavailable(format!("Failed to build auth client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, REQUIRE_USER_PATH)
    }

    /// Resolve `token` to a user id, requiring every permission in `permissions`
    pub async fn require_user(&self, token: &str, permissions: &[String]) -> Result<Uuid> {
        if token.is_empty() {
            return Err(Error::Unauthorized("Token not provided".to_string()));
        }

        let body = RequireUserRequest {
            access_token: token.to_string(),
            permissions: permissions.to_vec(),
        };

        let response = self
            .client
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, url = %self.endpoint(), "Auth service unreachable");
                Error::ServiceUnavailable("Authentication service unavailable".to_string())
            })?;

        if !response.status().is_success() {
            debug!(status = %response.status(), "Auth service rejected token");
            return Err(Error::Unauthorized("Invalid or expired token".to_string()));
        }

        let user = response.json::<RequireUserResponse>().await.map_err(|e| {
            debug!(error = %e, "Auth service answered without a user id");
            Error::Unauthorized("Invalid or expired token".to_string())
        })?;

        Ok(user.user_id)
    }
}

///////////////////////////////////////////////////////////////////////////////
//****                       Public Functions                            ****//
///////////////////////////////////////////////////////////////////////////////

/// Token of an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") {
        Some(token.trim())
    } else {
        None
    }
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////
