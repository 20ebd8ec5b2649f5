//! HTTP API Module
//!
//! Provides a REST API for file operations and cluster actions.

mod http;

pub use http::{AppState, ErrorResponse, HttpServer};
