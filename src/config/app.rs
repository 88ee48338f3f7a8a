//! Main application configuration
//!
//! This module defines the configuration structures for the coordinator,
//! including TOML file loading, environment variable overrides and
//! validation.

use crate::types::{ChannelId, RankEntry};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceSettings,
    pub game: GameSettings,
    pub commands: CommandSettings,
    /// Channels known at startup
    pub channels: Vec<ChannelSeed>,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Service name for logging and metrics
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Port for the health and metrics endpoints
    pub health_port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,
    /// Name the bot answers to in `/command@name`
    pub bot_name: String,
    /// Player ids allowed to run admin commands
    pub admin_ids: Vec<String>,
    /// Capacity of the outbound message queue
    pub outbound_buffer: usize,
}

/// Game admission and quorum settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GameSettings {
    /// Distinct players needed before a game starts
    pub min_quorum: usize,
    /// How long a channel may wait for quorum once admitted
    pub quorum_wait_seconds: u64,
    /// Delay before the "still waiting" reminder
    pub quorum_notify_seconds: u64,
    /// Games that may run at the same time
    pub max_concurrent_games: usize,
    /// Chat lines buffered per running game
    pub game_input_buffer: usize,
    /// Length of a demo round
    pub round_duration_seconds: u64,
}

/// Chat command settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSettings {
    /// Cooldown of rate limited commands, per channel
    pub cooldown_seconds: u64,
    /// Lifetime of short transient notices
    pub notice_lifetime_seconds: u64,
    /// Lifetime of the ranking message
    pub score_lifetime_seconds: u64,
    pub ranking_limit: usize,
    /// Pause between two broadcast messages
    pub broadcast_interval_ms: u64,
    /// Maximum size in bytes of a channel listing
    pub listing_limit: usize,
    pub faq_url: String,
    pub score_url: String,
}

/// A channel seeded into the in-memory store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSeed {
    pub id: ChannelId,
    pub name: String,
    /// Message shown instead of playing, if the channel is disabled
    #[serde(default)]
    pub disabled: Option<String>,
    /// Whether the channel may wait for a slot when the server is full
    #[serde(default = "default_true")]
    pub queued: bool,
    #[serde(default)]
    pub ranking: Vec<RankEntry>,
}

fn default_true() -> bool {
    true
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "trivia-quorum".to_string(),
            log_level: "info".to_string(),
            health_port: 8080,
            shutdown_timeout_seconds: 30,
            bot_name: "triviabot".to_string(),
            admin_ids: Vec::new(),
            outbound_buffer: 1024,
        }
    }
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            min_quorum: 3,
            quorum_wait_seconds: 120, // 2 minutes
            quorum_notify_seconds: 5,
            max_concurrent_games: 100,
            game_input_buffer: 100,
            round_duration_seconds: 60,
        }
    }
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            cooldown_seconds: 30,
            notice_lifetime_seconds: 5,
            score_lifetime_seconds: 20,
            ranking_limit: 20,
            broadcast_interval_ms: 1000,
            listing_limit: 3000,
            faq_url: "https://example.org/trivia/faq".to_string(),
            score_url: "https://example.org/trivia/score".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration from a TOML file, then apply environment overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: AppConfig = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.apply_env()?;
        validate_config(&config)?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        // Service settings
        if let Ok(name) = env::var("SERVICE_NAME") {
            self.service.name = name;
        }
        if let Ok(log_level) = env::var("LOG_LEVEL") {
            self.service.log_level = log_level;
        }
        if let Ok(port) = env::var("HEALTH_PORT") {
            self.service.health_port = port
                .parse()
                .map_err(|_| anyhow!("Invalid HEALTH_PORT value: {}", port))?;
        }
        if let Ok(timeout) = env::var("SHUTDOWN_TIMEOUT_SECONDS") {
            self.service.shutdown_timeout_seconds = timeout
                .parse()
                .map_err(|_| anyhow!("Invalid SHUTDOWN_TIMEOUT_SECONDS value: {}", timeout))?;
        }
        if let Ok(bot_name) = env::var("BOT_NAME") {
            self.service.bot_name = bot_name;
        }
        if let Ok(admins) = env::var("ADMIN_IDS") {
            self.service.admin_ids = admins
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(String::from)
                .collect();
        }

        // Game settings
        if let Ok(quorum) = env::var("MIN_QUORUM") {
            self.game.min_quorum = quorum
                .parse()
                .map_err(|_| anyhow!("Invalid MIN_QUORUM value: {}", quorum))?;
        }
        if let Ok(wait) = env::var("QUORUM_WAIT_SECONDS") {
            self.game.quorum_wait_seconds = wait
                .parse()
                .map_err(|_| anyhow!("Invalid QUORUM_WAIT_SECONDS value: {}", wait))?;
        }
        if let Ok(notify) = env::var("QUORUM_NOTIFY_SECONDS") {
            self.game.quorum_notify_seconds = notify
                .parse()
                .map_err(|_| anyhow!("Invalid QUORUM_NOTIFY_SECONDS value: {}", notify))?;
        }
        if let Ok(max_games) = env::var("MAX_CONCURRENT_GAMES") {
            self.game.max_concurrent_games = max_games
                .parse()
                .map_err(|_| anyhow!("Invalid MAX_CONCURRENT_GAMES value: {}", max_games))?;
        }
        if let Ok(round) = env::var("ROUND_DURATION_SECONDS") {
            self.game.round_duration_seconds = round
                .parse()
                .map_err(|_| anyhow!("Invalid ROUND_DURATION_SECONDS value: {}", round))?;
        }

        // Command settings
        if let Ok(cooldown) = env::var("COMMAND_COOLDOWN_SECONDS") {
            self.commands.cooldown_seconds = cooldown
                .parse()
                .map_err(|_| anyhow!("Invalid COMMAND_COOLDOWN_SECONDS value: {}", cooldown))?;
        }
        if let Ok(url) = env::var("FAQ_URL") {
            self.commands.faq_url = url;
        }
        if let Ok(url) = env::var("SCORE_URL") {
            self.commands.score_url = url;
        }

        Ok(())
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.service.shutdown_timeout_seconds)
    }

    pub fn quorum_wait(&self) -> Duration {
        Duration::from_secs(self.game.quorum_wait_seconds)
    }

    pub fn quorum_notify(&self) -> Duration {
        Duration::from_secs(self.game.quorum_notify_seconds)
    }

    pub fn round_duration(&self) -> Duration {
        Duration::from_secs(self.game.round_duration_seconds)
    }

    pub fn command_cooldown(&self) -> Duration {
        Duration::from_secs(self.commands.cooldown_seconds)
    }

    pub fn notice_lifetime(&self) -> Duration {
        Duration::from_secs(self.commands.notice_lifetime_seconds)
    }

    pub fn score_lifetime(&self) -> Duration {
        Duration::from_secs(self.commands.score_lifetime_seconds)
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.commands.broadcast_interval_ms)
    }
}

/// Validate configuration values
pub fn validate_config(config: &AppConfig) -> Result<()> {
    // Validate log level
    match config.service.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => return Err(anyhow!("Invalid log level: {}", config.service.log_level)),
    }

    if config.service.health_port == 0 {
        return Err(anyhow!("Health port cannot be 0"));
    }
    if config.service.shutdown_timeout_seconds == 0 {
        return Err(anyhow!("Shutdown timeout must be greater than 0"));
    }
    if config.service.outbound_buffer == 0 {
        return Err(anyhow!("Outbound buffer must be greater than 0"));
    }

    // Validate game settings
    if config.game.min_quorum == 0 {
        return Err(anyhow!("Minimum quorum must be at least 1"));
    }
    if config.game.max_concurrent_games == 0 {
        return Err(anyhow!("Max concurrent games must be greater than 0"));
    }
    if config.game.quorum_wait_seconds == 0 {
        return Err(anyhow!("Quorum wait must be greater than 0"));
    }
    if config.game.game_input_buffer == 0 {
        return Err(anyhow!("Game input buffer must be greater than 0"));
    }

    // Validate command settings
    if config.commands.ranking_limit == 0 {
        return Err(anyhow!("Ranking limit must be greater than 0"));
    }
    if config.commands.listing_limit == 0 {
        return Err(anyhow!("Listing limit must be greater than 0"));
    }

    for seed in &config.channels {
        if seed.id.is_empty() {
            return Err(anyhow!("Seeded channel '{}' has an empty id", seed.name));
        }
    }

    Ok(())
}
