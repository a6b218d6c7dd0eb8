//! # Middleware Module
//!
//! HTTP middleware shared by services.
//!
//! - **Request Capture**: buffers request/response bodies and persists the
//!   exchange to the request log collection

pub mod capture;

pub use capture::{capture_requests, with_request_capture};
