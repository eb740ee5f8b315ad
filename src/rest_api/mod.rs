//! REST API module for probes and metrics
//!
//! Serves `/health`, `/ready` and, with the `metrics` feature, `/metrics`.

mod handlers;
mod server;

pub use handlers::{HealthResponse, ReadyResponse};
pub use server::{router, run_server, ApiState};
