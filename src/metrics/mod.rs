//! Metrics and monitoring for the quorum coordinator
//!
//! Prometheus metrics grouped by concern, plus the HTTP server that exposes
//! them together with health and statistics endpoints.

pub mod collector;
pub mod health;

pub use collector::{
    AdmissionMetrics, ChannelMetrics, CommandMetrics, MetricsCollector, MetricsTimer,
    ServiceMetrics,
};
pub use health::{encode_metrics, HealthServer, HealthServerConfig};
