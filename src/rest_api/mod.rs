//! REST API module for external integrations
//!
//! Provides read-only HTTP endpoints for health, metrics and the load
//! balancers this controller manages.

mod dto;
mod handlers;
mod server;

pub use dto::{HealthResponse, LoadBalancerListResponse, LoadBalancerSummary, TargetGroupSummary};
pub use handlers::summarize;
pub use server::{router, run_server, ApiState, DEFAULT_API_PORT};
