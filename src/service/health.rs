//! Service health evaluation
//!
//! Used by the HTTP probes and the periodic health log in `main`.

use crate::coordinator::CoordinatorStats;
use crate::service::app::AppState;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Health check status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Value exported through the `health_status` gauge
    pub fn as_gauge(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 2,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 0,
        }
    }

    fn combine(self, other: HealthStatus) -> HealthStatus {
        match (self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "✅ healthy"),
            HealthStatus::Degraded => write!(f, "⚠️  degraded"),
            HealthStatus::Unhealthy => write!(f, "❌ unhealthy"),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub uptime_seconds: u64,
    pub checks: Vec<ComponentCheck>,
    pub stats: CoordinatorStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    /// Set when the component is not healthy
    pub message: Option<String>,
    pub duration_ms: u64,
}

impl ComponentCheck {
    fn new(name: &str, started: Instant, status: HealthStatus, message: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            message,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

impl HealthCheck {
    /// Full health check including coordinator statistics
    pub async fn check(app_state: &AppState) -> Self {
        let stats = app_state.coordinator().stats().await;
        let checks = vec![
            Self::check_service_running(app_state).await,
            Self::check_admission(&stats),
            Self::check_outbound(app_state),
        ];
        let status = checks
            .iter()
            .fold(HealthStatus::Healthy, |acc, check| acc.combine(check.status));

        HealthCheck {
            status,
            service: app_state.config().service.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            uptime_seconds: app_state.uptime().as_secs(),
            checks,
            stats,
        }
    }

    /// The service is alive while it runs and its outbound queue is open
    pub async fn liveness_check(app_state: &AppState) -> HealthStatus {
        if !app_state.is_running().await {
            return HealthStatus::Unhealthy;
        }
        Self::check_outbound(app_state).status
    }

    /// Ready to accept joins; degraded while channels queue for a slot
    pub async fn readiness_check(app_state: &AppState) -> HealthStatus {
        let liveness = Self::liveness_check(app_state).await;
        if liveness == HealthStatus::Unhealthy {
            return liveness;
        }
        let stats = app_state.coordinator().stats().await;
        liveness.combine(Self::check_admission(&stats).status)
    }

    async fn check_service_running(app_state: &AppState) -> ComponentCheck {
        let started = Instant::now();
        if app_state.is_running().await {
            ComponentCheck::new("service_running", started, HealthStatus::Healthy, None)
        } else {
            ComponentCheck::new(
                "service_running",
                started,
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        }
    }

    fn check_admission(stats: &CoordinatorStats) -> ComponentCheck {
        let started = Instant::now();
        if stats.waiting_for_slot > 0 {
            ComponentCheck::new(
                "admission_queue",
                started,
                HealthStatus::Degraded,
                Some(format!(
                    "{} of {} slots in use, {} channels queued",
                    stats.slots_in_use, stats.slot_capacity, stats.waiting_for_slot
                )),
            )
        } else {
            ComponentCheck::new("admission_queue", started, HealthStatus::Healthy, None)
        }
    }

    fn check_outbound(app_state: &AppState) -> ComponentCheck {
        let started = Instant::now();
        if app_state.outbound_closed() {
            ComponentCheck::new(
                "outbound_transport",
                started,
                HealthStatus::Unhealthy,
                Some("Outbound queue is closed".to_string()),
            )
        } else {
            ComponentCheck::new("outbound_transport", started, HealthStatus::Healthy, None)
        }
    }
}
