//! # CommonGround
//!
//! Shared infrastructure for small HTTP services: document-store logging,
//! request/response capture, generic relational data access and an auth
//! client, plus the configuration and tracing setup around them.
//!
//! ## Modules
//!
//! - `store`: document store connection manager and sessions
//! - `logging`: log records, collection routing and the persisting `LogSink`
//! - `middleware`: request/response capture for axum routers
//! - `database`: caller-owned sessions and the generic `DataManager`
//! - `auth`: client for the remote auth service
//! - `env`: environment validation and configuration
//! - `response`: success envelope matching the error body
//! - `server`, `cli`: the `commonground` service binary

pub mod auth;
pub mod cli;
pub mod database;
pub mod env;
pub mod error;
pub mod logging;
pub mod middleware;
pub mod response;
pub mod server;
pub mod store;
pub mod util;

#[cfg(test)]
mod tests;

pub use error::{Error, Result};
