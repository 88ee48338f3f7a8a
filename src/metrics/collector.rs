//! Metrics collection using Prometheus
//!
//! This module provides metrics collection for the coordinator: admission
//! queue pressure, per-channel lifecycle counts and command handling.

use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the coordinator
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Admission queue metrics
    admission_metrics: AdmissionMetrics,

    /// Channel lifecycle metrics
    channel_metrics: ChannelMetrics,

    /// Command handling metrics
    command_metrics: CommandMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Outbound messages handed to the transport
    pub messages_published_total: IntCounter,

    /// Outbound messages dropped because the transport was gone
    pub messages_dropped_total: IntCounter,
}

/// Admission queue metrics
#[derive(Clone)]
pub struct AdmissionMetrics {
    /// Games currently waiting for a slot
    pub games_queued: IntGauge,

    /// Slots currently held by running or forming games
    pub slots_in_use: IntGauge,

    /// Time spent waiting for a slot
    pub queue_wait_seconds: Histogram,

    /// Slots handed out, by how they were obtained
    pub slots_acquired_total: IntCounterVec,

    /// Slots given back
    pub slots_released_total: IntCounter,

    /// Channels admitted without a slot because queuing is off for them
    pub queue_bypassed_total: IntCounter,
}

/// Channel lifecycle metrics
#[derive(Clone)]
pub struct ChannelMetrics {
    /// Channels with an entry in the coordinator
    pub active_channels: IntGauge,

    /// Channels admitted and collecting players
    pub channels_awaiting_quorum: IntGauge,

    /// Distinct players committed to forming games
    pub players_joined_total: IntCounter,

    /// Games that reached quorum and started
    pub games_started_total: IntCounter,

    /// Games disbanded because quorum was not reached in time
    pub games_disbanded_total: IntCounter,

    /// Games reported finished by the engine
    pub games_finished_total: IntCounter,

    /// Failed game constructions
    pub game_creation_failures_total: IntCounter,

    /// Reminder messages sent while waiting for quorum
    pub quorum_reminders_total: IntCounter,
}

/// Command handling metrics
#[derive(Clone)]
pub struct CommandMetrics {
    /// Commands received by name
    pub commands_total: IntCounterVec,

    /// Commands rejected by the cooldown
    pub rate_limited_total: IntCounterVec,

    /// Command handling duration
    pub command_duration_seconds: HistogramVec,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let admission_metrics = AdmissionMetrics::new(&registry)?;
        let channel_metrics = ChannelMetrics::new(&registry)?;
        let command_metrics = CommandMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            admission_metrics,
            channel_metrics,
            command_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Get service metrics
    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    /// Get admission metrics
    pub fn admission(&self) -> &AdmissionMetrics {
        &self.admission_metrics
    }

    /// Get channel metrics
    pub fn channel(&self) -> &ChannelMetrics {
        &self.channel_metrics
    }

    /// Get command metrics
    pub fn command(&self) -> &CommandMetrics {
        &self.command_metrics
    }

    pub fn record_slot_acquired(&self, mode: &str) {
        self.admission_metrics
            .slots_acquired_total
            .with_label_values(&[mode])
            .inc();
        self.admission_metrics.slots_in_use.inc();
    }

    pub fn record_slot_released(&self) {
        self.admission_metrics.slots_released_total.inc();
        self.admission_metrics.slots_in_use.dec();
    }

    pub fn record_queue_wait(&self, waited: Duration) {
        self.admission_metrics
            .queue_wait_seconds
            .observe(waited.as_secs_f64());
    }

    /// Record a channel entry being created
    pub fn record_channel_opened(&self) {
        self.channel_metrics.active_channels.inc();
    }

    /// Record a channel entry being removed
    pub fn record_channel_closed(&self) {
        self.channel_metrics.active_channels.dec();
    }

    /// Record a command being handled
    pub fn record_command(&self, command: &str, duration: Duration) {
        self.command_metrics
            .commands_total
            .with_label_values(&[command])
            .inc();
        self.command_metrics
            .command_duration_seconds
            .with_label_values(&[command])
            .observe(duration.as_secs_f64());
    }

    pub fn record_rate_limited(&self, command: &str) {
        self.command_metrics
            .rate_limited_total
            .with_label_values(&[command])
            .inc();
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("trivia_quorum_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let health_status = IntGauge::new(
            "trivia_quorum_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let messages_published_total = IntCounter::new(
            "trivia_quorum_messages_published_total",
            "Outbound messages handed to the transport",
        )?;
        registry.register(Box::new(messages_published_total.clone()))?;

        let messages_dropped_total = IntCounter::new(
            "trivia_quorum_messages_dropped_total",
            "Outbound messages dropped",
        )?;
        registry.register(Box::new(messages_dropped_total.clone()))?;

        Ok(Self {
            uptime_seconds,
            health_status,
            messages_published_total,
            messages_dropped_total,
        })
    }
}

impl AdmissionMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let games_queued = IntGauge::new(
            "trivia_quorum_games_queued",
            "Games currently waiting for an admission slot",
        )?;
        registry.register(Box::new(games_queued.clone()))?;

        let slots_in_use = IntGauge::new(
            "trivia_quorum_slots_in_use",
            "Admission slots currently held",
        )?;
        registry.register(Box::new(slots_in_use.clone()))?;

        let queue_wait_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "trivia_quorum_queue_wait_seconds",
                "Time spent waiting for an admission slot",
            )
            .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
        )?;
        registry.register(Box::new(queue_wait_seconds.clone()))?;

        let slots_acquired_total = IntCounterVec::new(
            Opts::new(
                "trivia_quorum_slots_acquired_total",
                "Admission slots acquired",
            ),
            &["mode"],
        )?;
        registry.register(Box::new(slots_acquired_total.clone()))?;

        let slots_released_total = IntCounter::new(
            "trivia_quorum_slots_released_total",
            "Admission slots released",
        )?;
        registry.register(Box::new(slots_released_total.clone()))?;

        let queue_bypassed_total = IntCounter::new(
            "trivia_quorum_queue_bypassed_total",
            "Games admitted without a slot",
        )?;
        registry.register(Box::new(queue_bypassed_total.clone()))?;

        Ok(Self {
            games_queued,
            slots_in_use,
            queue_wait_seconds,
            slots_acquired_total,
            slots_released_total,
            queue_bypassed_total,
        })
    }
}

impl ChannelMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let active_channels = IntGauge::new(
            "trivia_quorum_active_channels",
            "Channels with a forming, queued or running game",
        )?;
        registry.register(Box::new(active_channels.clone()))?;

        let channels_awaiting_quorum = IntGauge::new(
            "trivia_quorum_channels_awaiting_quorum",
            "Admitted channels collecting players",
        )?;
        registry.register(Box::new(channels_awaiting_quorum.clone()))?;

        let players_joined_total = IntCounter::new(
            "trivia_quorum_players_joined_total",
            "Players committed to forming games",
        )?;
        registry.register(Box::new(players_joined_total.clone()))?;

        let games_started_total = IntCounter::new(
            "trivia_quorum_games_started_total",
            "Games started after reaching quorum",
        )?;
        registry.register(Box::new(games_started_total.clone()))?;

        let games_disbanded_total = IntCounter::new(
            "trivia_quorum_games_disbanded_total",
            "Games disbanded on quorum timeout",
        )?;
        registry.register(Box::new(games_disbanded_total.clone()))?;

        let games_finished_total = IntCounter::new(
            "trivia_quorum_games_finished_total",
            "Games reported finished",
        )?;
        registry.register(Box::new(games_finished_total.clone()))?;

        let game_creation_failures_total = IntCounter::new(
            "trivia_quorum_game_creation_failures_total",
            "Failed game constructions",
        )?;
        registry.register(Box::new(game_creation_failures_total.clone()))?;

        let quorum_reminders_total = IntCounter::new(
            "trivia_quorum_quorum_reminders_total",
            "Quorum reminder messages sent",
        )?;
        registry.register(Box::new(quorum_reminders_total.clone()))?;

        Ok(Self {
            active_channels,
            channels_awaiting_quorum,
            players_joined_total,
            games_started_total,
            games_disbanded_total,
            games_finished_total,
            game_creation_failures_total,
            quorum_reminders_total,
        })
    }
}

impl CommandMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let commands_total = IntCounterVec::new(
            Opts::new("trivia_quorum_commands_total", "Commands received"),
            &["command"],
        )?;
        registry.register(Box::new(commands_total.clone()))?;

        let rate_limited_total = IntCounterVec::new(
            Opts::new(
                "trivia_quorum_rate_limited_total",
                "Commands rejected by the cooldown",
            ),
            &["command"],
        )?;
        registry.register(Box::new(rate_limited_total.clone()))?;

        let command_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "trivia_quorum_command_duration_seconds",
                "Command handling duration",
            )
            .buckets(vec![0.0001, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            &["command"],
        )?;
        registry.register(Box::new(command_duration_seconds.clone()))?;

        Ok(Self {
            commands_total,
            rate_limited_total,
            command_duration_seconds,
        })
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new().expect("Failed to create default metrics collector")
    }
}
