//! Application state and service wiring
//!
//! `AppState` owns every long-lived component of the service and the
//! background tasks that drive them.

use crate::admission::AdmissionQueue;
use crate::commands::{CommandDispatcher, DispatcherSettings};
use crate::config::{validate_config, AppConfig};
use crate::coordinator::{ChannelCoordinator, CoordinatorSettings};
use crate::engine::{GameFinished, TimedGameEngine};
use crate::messaging::{ChannelMessagePublisher, ConsoleTransport};
use crate::metrics::{HealthServer, HealthServerConfig, MetricsCollector};
use crate::rate_limit::RateLimiter;
use crate::service::health::HealthCheck;
use crate::store::InMemoryChannelStore;
use crate::types::{InboundMessage, OutboundMessage};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_stream::StreamExt;
use tracing::{debug, error, info};

const METRICS_UPDATE_INTERVAL: Duration = Duration::from_secs(15);
const RATE_LIMIT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Transport error: {message}")]
    Transport { message: String },
}

/// Main application state containing all service components
pub struct AppState {
    config: AppConfig,
    metrics: Arc<MetricsCollector>,
    store: Arc<InMemoryChannelStore>,
    publisher: ChannelMessagePublisher,
    coordinator: ChannelCoordinator,
    dispatcher: CommandDispatcher,

    /// Receivers handed to the tasks spawned by `start` and `attach_transport`
    outbound_rx: Mutex<Option<mpsc::Receiver<OutboundMessage>>>,
    finished_rx: Mutex<Option<mpsc::UnboundedReceiver<GameFinished>>>,

    health_server: Mutex<Option<Arc<HealthServer>>>,
    background_tasks: Mutex<Vec<JoinHandle<()>>>,
    is_running: Arc<RwLock<bool>>,
    started_at: Instant,
}

impl AppState {
    /// Build every component from `config`. Nothing is spawned yet.
    pub fn new(config: AppConfig) -> Result<Self, ServiceError> {
        validate_config(&config).map_err(|e| ServiceError::Configuration {
            message: e.to_string(),
        })?;

        info!("Initializing {} service", config.service.name);

        let metrics = Arc::new(MetricsCollector::new().map_err(|e| {
            ServiceError::Initialization {
                message: format!("Failed to create metrics collector: {}", e),
            }
        })?);

        let store = Arc::new(InMemoryChannelStore::from_seeds(&config.channels));
        info!("Seeded {} channels from configuration", config.channels.len());

        let (publisher, outbound_rx) =
            ChannelMessagePublisher::channel(config.service.outbound_buffer);
        let publisher = publisher.with_metrics(metrics.clone());

        let admission = Arc::new(AdmissionQueue::new(
            config.game.max_concurrent_games,
            metrics.clone(),
        ));
        let engine = Arc::new(TimedGameEngine::new(config.round_duration()));

        let (coordinator, finished_rx) = ChannelCoordinator::new(
            CoordinatorSettings::from_config(&config),
            admission,
            engine,
            store.clone(),
            Arc::new(publisher.clone()),
            metrics.clone(),
        );
        let dispatcher = CommandDispatcher::new(
            DispatcherSettings::from_config(&config),
            coordinator.clone(),
            store.clone(),
            Arc::new(publisher.clone()),
            metrics.clone(),
        );

        Ok(Self {
            config,
            metrics,
            store,
            publisher,
            coordinator,
            dispatcher,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            finished_rx: Mutex::new(Some(finished_rx)),
            health_server: Mutex::new(None),
            background_tasks: Mutex::new(Vec::new()),
            is_running: Arc::new(RwLock::new(false)),
            started_at: Instant::now(),
        })
    }

    /// Start the health server, the game lifecycle listener and maintenance
    pub async fn start(self: &Arc<Self>) -> Result<(), ServiceError> {
        info!("Starting {} service", self.config.service.name);
        *self.is_running.write().await = true;

        self.start_health_server().await;
        self.start_lifecycle_listener().await?;
        self.start_background_tasks().await;

        info!("✅ {} service started", self.config.service.name);
        Ok(())
    }

    /// Connect the chat transport: inbound JSON lines from `reader`, outbound
    /// JSON lines to `writer`. Each inbound message is handled in its own task.
    pub async fn attach_transport<R, W>(
        self: &Arc<Self>,
        reader: R,
        writer: W,
    ) -> Result<(), ServiceError>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let outbound_rx = self
            .outbound_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| ServiceError::Transport {
                message: "transport already attached".to_string(),
            })?;

        let transport = ConsoleTransport::new(self.metrics.clone());
        let writer_task = tokio::spawn(async move {
            if let Err(e) = transport.write_outbound(writer, outbound_rx).await {
                error!("Outbound writer failed: {}", e);
            }
        });

        let dispatcher = self.dispatcher.clone();
        let reader_task = tokio::spawn(async move {
            let mut inbound = Box::pin(ConsoleTransport::inbound(reader));
            while let Some(message) = inbound.next().await {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    dispatcher.handle(message).await;
                });
            }
            info!("Inbound stream closed");
        });

        let mut tasks = self.background_tasks.lock().await;
        tasks.push(writer_task);
        tasks.push(reader_task);
        info!("Chat transport attached");
        Ok(())
    }

    /// Handle one inbound message on the calling task
    pub async fn handle_inbound(&self, message: InboundMessage) -> bool {
        self.dispatcher.handle(message).await
    }

    /// Tear down every channel and stop all tasks
    pub async fn shutdown(&self) {
        info!("Starting graceful shutdown of {}", self.config.service.name);
        *self.is_running.write().await = false;

        self.coordinator.shutdown().await;

        if let Some(server) = self.health_server.lock().await.take() {
            server.stop();
        }

        let tasks: Vec<JoinHandle<()>> = self.background_tasks.lock().await.drain(..).collect();
        info!("Stopping {} background tasks...", tasks.len());
        for task in tasks {
            task.abort();
        }

        let stats = self.coordinator.stats().await;
        info!(
            "Final statistics: {} games started, {} disbanded, {} finished",
            stats.games_started, stats.games_disbanded, stats.games_finished
        );
        info!("✅ {} shutdown completed", self.config.service.name);
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    pub fn store(&self) -> Arc<InMemoryChannelStore> {
        self.store.clone()
    }

    pub fn coordinator(&self) -> &ChannelCoordinator {
        &self.coordinator
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    /// Whether the outbound queue lost its reader
    pub fn outbound_closed(&self) -> bool {
        self.publisher.is_closed()
    }

    /// Router of the monitoring endpoints bound to this state
    pub fn health_router(self: &Arc<Self>) -> axum::Router {
        self.build_health_server().router()
    }

    fn build_health_server(self: &Arc<Self>) -> HealthServer {
        let config = HealthServerConfig {
            port: self.config.service.health_port,
            host: "0.0.0.0".to_string(),
        };
        HealthServer::new(config, self.metrics.clone()).with_app_state(self.clone())
    }

    async fn start_health_server(self: &Arc<Self>) {
        let server = Arc::new(self.build_health_server());
        *self.health_server.lock().await = Some(server.clone());

        let handle = tokio::spawn(async move {
            if let Err(e) = server.start().await {
                error!("Health server failed: {:#}", e);
            }
        });
        self.background_tasks.lock().await.push(handle);
        info!(
            "Health endpoints starting on port {}",
            self.config.service.health_port
        );
    }

    async fn start_lifecycle_listener(&self) -> Result<(), ServiceError> {
        let finished_rx = self
            .finished_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| ServiceError::Initialization {
                message: "service already started".to_string(),
            })?;

        let coordinator = self.coordinator.clone();
        let handle = tokio::spawn(async move {
            coordinator.run_lifecycle(finished_rx).await;
        });
        self.background_tasks.lock().await.push(handle);
        Ok(())
    }

    async fn start_background_tasks(self: &Arc<Self>) {
        let metrics_task = {
            let app_state = self.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(METRICS_UPDATE_INTERVAL);
                while app_state.is_running().await {
                    interval.tick().await;

                    let health = HealthCheck::check(&app_state).await;
                    let metrics = app_state.metrics();
                    metrics
                        .service()
                        .uptime_seconds
                        .set(health.uptime_seconds as i64);
                    metrics.update_health_status(health.status.as_gauge());
                    debug!(
                        "Health {} - {} channels, {}/{} slots in use",
                        health.status,
                        health.stats.active_channels,
                        health.stats.slots_in_use,
                        health.stats.slot_capacity
                    );
                }
                info!("Metrics update task stopped");
            })
        };

        let cleanup_task = {
            let limiter: Arc<RateLimiter> = self.dispatcher.rate_limiter();
            let cooldown = self.config.command_cooldown();
            let is_running = self.is_running.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(RATE_LIMIT_CLEANUP_INTERVAL);
                while *is_running.read().await {
                    interval.tick().await;
                    let removed = limiter.cleanup(cooldown);
                    if removed > 0 {
                        debug!("Evicted {} expired rate limit keys", removed);
                    }
                }
            })
        };

        let mut tasks = self.background_tasks.lock().await;
        tasks.push(metrics_task);
        tasks.push(cleanup_task);
    }
}
