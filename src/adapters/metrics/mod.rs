//! Metrics and Monitoring Adapters
//!
//! Provides Prometheus metrics export on :9090 and the health and quote
//! endpoints (/live, /ready, /markets) via axum 0.7.

pub mod health;
pub mod prometheus;

pub use health::{ApiState, HealthServer, HealthState};
pub use prometheus::MetricsRegistry;
