//! Axum HTTP API server.
//!
//! This crate provides:
//! - Job submission, status polling and artifact listing over REST
//! - Liveness and readiness probes
//! - Security headers, request IDs and Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
