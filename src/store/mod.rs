//! Channel configuration and ranking lookups
//!
//! Persistent storage is outside this crate; the coordinator and the command
//! layer only see the `ChannelStore` trait. `InMemoryChannelStore` is seeded
//! from configuration and backs the binary and the tests.

use crate::config::ChannelSeed;
use crate::error::Result;
use crate::types::{ChannelId, RankEntry};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Config key holding the message shown when a channel is disabled
pub const DISABLED_KEY: &str = "disabled";

/// Config key controlling whether a channel may wait for an admission slot
pub const QUEUED_KEY: &str = "queued";

/// Lookup interface for per-channel data
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChannelStore: Send + Sync {
    /// Top `limit` ranking lines for a channel, ordered by position
    async fn channel_ranking(&self, channel_id: &str, limit: usize) -> Result<Vec<RankEntry>>;

    /// Config value for `key`, or `default` when unset
    async fn channel_config(&self, channel_id: &str, key: &str, default: &str) -> Result<String>;

    /// All known channels, id to display name
    async fn channels(&self) -> Result<HashMap<ChannelId, String>>;
}

#[derive(Debug, Clone, Default)]
struct ChannelRecord {
    name: String,
    config: HashMap<String, String>,
    ranking: Vec<RankEntry>,
}

/// In-memory store
#[derive(Debug, Default)]
pub struct InMemoryChannelStore {
    channels: RwLock<HashMap<ChannelId, ChannelRecord>>,
}

impl InMemoryChannelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from configured channel seeds
    pub fn from_seeds(seeds: &[ChannelSeed]) -> Self {
        let channels = seeds
            .iter()
            .map(|seed| {
                let mut config = HashMap::new();
                if let Some(message) = &seed.disabled {
                    config.insert(DISABLED_KEY.to_string(), message.clone());
                }
                if !seed.queued {
                    config.insert(QUEUED_KEY.to_string(), "no".to_string());
                }
                let mut ranking = seed.ranking.clone();
                ranking.sort_by_key(|entry| entry.position);
                (
                    seed.id.clone(),
                    ChannelRecord {
                        name: seed.name.clone(),
                        config,
                        ranking,
                    },
                )
            })
            .collect();

        Self {
            channels: RwLock::new(channels),
        }
    }

    /// Add or rename a channel
    pub async fn upsert_channel(&self, channel_id: &str, name: &str) {
        let mut channels = self.channels.write().await;
        channels.entry(channel_id.to_string()).or_default().name = name.to_string();
    }

    pub async fn set_config(&self, channel_id: &str, key: &str, value: &str) {
        let mut channels = self.channels.write().await;
        channels
            .entry(channel_id.to_string())
            .or_default()
            .config
            .insert(key.to_string(), value.to_string());
    }

    /// Replace the ranking of a channel
    pub async fn set_ranking(&self, channel_id: &str, mut ranking: Vec<RankEntry>) {
        ranking.sort_by_key(|entry| entry.position);
        let mut channels = self.channels.write().await;
        channels.entry(channel_id.to_string()).or_default().ranking = ranking;
    }
}

#[async_trait]
impl ChannelStore for InMemoryChannelStore {
    async fn channel_ranking(&self, channel_id: &str, limit: usize) -> Result<Vec<RankEntry>> {
        let channels = self.channels.read().await;
        Ok(channels
            .get(channel_id)
            .map(|record| record.ranking.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn channel_config(&self, channel_id: &str, key: &str, default: &str) -> Result<String> {
        let channels = self.channels.read().await;
        let value = channels
            .get(channel_id)
            .and_then(|record| record.config.get(key))
            .cloned();
        if value.is_none() {
            debug!("No '{}' config for channel {}, using default", key, channel_id);
        }
        Ok(value.unwrap_or_else(|| default.to_string()))
    }

    async fn channels(&self) -> Result<HashMap<ChannelId, String>> {
        let channels = self.channels.read().await;
        Ok(channels
            .iter()
            .map(|(id, record)| (id.clone(), record.name.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rank(position: u32, score: i64, name: &str) -> RankEntry {
        RankEntry {
            position,
            score,
            name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_config_defaults_for_unknown_channel() {
        let store = InMemoryChannelStore::new();
        let value = store.channel_config("nope", QUEUED_KEY, "yes").await.unwrap();
        assert_eq!(value, "yes");
        assert!(store.channel_ranking("nope", 20).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_seeded_channels() {
        let store = InMemoryChannelStore::from_seeds(&[
            ChannelSeed {
                id: "c1".to_string(),
                name: "Quiz Night".to_string(),
                disabled: Some("Trivia is off here".to_string()),
                queued: false,
                ranking: vec![rank(2, 10, "Bob"), rank(1, 42, "Alice")],
            },
            ChannelSeed {
                id: "c2".to_string(),
                name: "Lobby".to_string(),
                disabled: None,
                queued: true,
                ranking: Vec::new(),
            },
        ]);

        assert_eq!(
            store.channel_config("c1", DISABLED_KEY, "").await.unwrap(),
            "Trivia is off here"
        );
        assert_eq!(store.channel_config("c1", QUEUED_KEY, "yes").await.unwrap(), "no");
        assert_eq!(store.channel_config("c2", QUEUED_KEY, "yes").await.unwrap(), "yes");

        let ranking = store.channel_ranking("c1", 20).await.unwrap();
        assert_eq!(ranking[0].name, "Alice");
        assert_eq!(store.channels().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_ranking_limit_and_updates() {
        let store = InMemoryChannelStore::new();
        store.upsert_channel("c1", "One").await;
        store
            .set_ranking("c1", (1..=30).map(|i| rank(i, 100 - i as i64, "p")).collect())
            .await;
        store.set_config("c1", DISABLED_KEY, "off").await;

        assert_eq!(store.channel_ranking("c1", 20).await.unwrap().len(), 20);
        assert_eq!(store.channel_config("c1", DISABLED_KEY, "").await.unwrap(), "off");
        assert_eq!(store.channels().await.unwrap()["c1"], "One");
    }
}
