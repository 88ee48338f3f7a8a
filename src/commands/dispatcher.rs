//! Chat command routing
//!
//! Every inbound chat message passes through `CommandDispatcher::handle`.
//! Messages starting with `/` are parsed as commands; anything else is
//! forwarded to the running game of the channel.

use crate::commands::format::format_rank_text;
use crate::config::AppConfig;
use crate::coordinator::ChannelCoordinator;
use crate::engine::GameInput;
use crate::messaging::MessagePublisher;
use crate::metrics::MetricsCollector;
use crate::rate_limit::RateLimiter;
use crate::store::ChannelStore;
use crate::types::{InboundMessage, JoinRequest, MessageFormat, OutboundMessage};
use crate::utils::{command_key, truncate_on_line};
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Commands understood by the bot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Join,
    Help,
    Score,
    Say,
    Channels,
    Broadcast,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Join => "join",
            Command::Help => "help",
            Command::Score => "score",
            Command::Say => "say",
            Command::Channels => "channels",
            Command::Broadcast => "broadcast",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "join" => Some(Command::Join),
            "help" => Some(Command::Help),
            "score" => Some(Command::Score),
            "say" => Some(Command::Say),
            "channels" => Some(Command::Channels),
            "broadcast" => Some(Command::Broadcast),
            _ => None,
        }
    }

    fn admin_only(&self) -> bool {
        matches!(self, Command::Say | Command::Channels | Command::Broadcast)
    }
}

/// Result of parsing a chat line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedMessage<'a> {
    Command { command: Command, args: &'a str },
    /// A `/command` this bot does not know or that names another bot
    Ignored,
    Text,
}

/// Parse `/command[@bot] args`.
pub fn parse_message<'a>(text: &'a str, bot_name: &str) -> ParsedMessage<'a> {
    let text = text.trim();
    let Some(rest) = text.strip_prefix('/') else {
        return ParsedMessage::Text;
    };

    let (head, args) = match rest.split_once(char::is_whitespace) {
        Some((head, args)) => (head, args.trim()),
        None => (rest, ""),
    };
    let name = match head.split_once('@') {
        Some((name, target)) => {
            if !target.eq_ignore_ascii_case(bot_name) {
                return ParsedMessage::Ignored;
            }
            name
        }
        None => head,
    };

    match Command::from_name(name) {
        Some(command) => ParsedMessage::Command { command, args },
        None => ParsedMessage::Ignored,
    }
}

/// Settings for command handling
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub bot_name: String,
    pub admin_ids: HashSet<String>,
    pub cooldown: Duration,
    pub notice_lifetime: Duration,
    pub score_lifetime: Duration,
    pub ranking_limit: usize,
    pub broadcast_interval: Duration,
    pub listing_limit: usize,
    pub faq_url: String,
    pub score_url: String,
}

impl DispatcherSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            bot_name: config.service.bot_name.clone(),
            admin_ids: config.service.admin_ids.iter().cloned().collect(),
            cooldown: config.command_cooldown(),
            notice_lifetime: config.notice_lifetime(),
            score_lifetime: config.score_lifetime(),
            ranking_limit: config.commands.ranking_limit,
            broadcast_interval: config.broadcast_interval(),
            listing_limit: config.commands.listing_limit,
            faq_url: config.commands.faq_url.clone(),
            score_url: config.commands.score_url.clone(),
        }
    }
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Routes chat messages to command handlers or the running game
#[derive(Clone)]
pub struct CommandDispatcher {
    coordinator: ChannelCoordinator,
    store: Arc<dyn ChannelStore>,
    publisher: Arc<dyn MessagePublisher>,
    rate_limiter: Arc<RateLimiter>,
    metrics: Arc<MetricsCollector>,
    settings: Arc<DispatcherSettings>,
}

impl CommandDispatcher {
    pub fn new(
        settings: DispatcherSettings,
        coordinator: ChannelCoordinator,
        store: Arc<dyn ChannelStore>,
        publisher: Arc<dyn MessagePublisher>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            coordinator,
            store,
            publisher,
            rate_limiter: Arc::new(RateLimiter::new()),
            metrics,
            settings: Arc::new(settings),
        }
    }

    pub fn rate_limiter(&self) -> Arc<RateLimiter> {
        self.rate_limiter.clone()
    }

    /// Handle one inbound message. Returns whether it was consumed.
    pub async fn handle(&self, message: InboundMessage) -> bool {
        let (command, args) = match parse_message(&message.text, &self.settings.bot_name) {
            ParsedMessage::Command { command, args } => (command, args.to_string()),
            ParsedMessage::Ignored => return false,
            ParsedMessage::Text => return self.forward(message).await,
        };

        if command.admin_only() && !self.settings.admin_ids.contains(&message.sender.id) {
            debug!(
                "Ignoring /{} from non-admin '{}'",
                command.name(),
                message.sender.id
            );
            return false;
        }

        let timer = self.metrics.start_timer();
        match command {
            Command::Join => self.cmd_join(&message).await,
            Command::Help => self.cmd_help(&message).await,
            Command::Score => self.cmd_score(&message).await,
            Command::Say => self.cmd_say(&message, &args).await,
            Command::Channels => self.cmd_channels(&message, &args).await,
            Command::Broadcast => self.cmd_broadcast(&message, &args).await,
        }
        self.metrics.record_command(command.name(), timer.stop());
        true
    }

    async fn forward(&self, message: InboundMessage) -> bool {
        let input = GameInput {
            player: message.sender,
            text: message.text,
        };
        self.coordinator
            .forward_to_game(&message.channel_id, input)
            .await
    }

    async fn cmd_join(&self, message: &InboundMessage) {
        let outcome = self.coordinator.join(JoinRequest::from(message)).await;
        debug!(
            "Join by '{}' in {}: {:?}",
            message.sender.id, message.channel_id, outcome
        );
    }

    async fn cmd_help(&self, message: &InboundMessage) {
        if self.coordinator.check_disabled(&message.channel_id).await {
            return;
        }
        if self.rate_limited(Command::Help, &message.channel_id) {
            return;
        }

        let text = format!(
            "How to play and how to add the bot to your own group: <a href=\"{}\">F.A.Q</a>",
            self.settings.faq_url
        );
        self.send(
            OutboundMessage::new(message.channel_id.clone(), text, MessageFormat::Html)
                .discard_after(self.settings.notice_lifetime),
        )
        .await;
    }

    async fn cmd_score(&self, message: &InboundMessage) {
        if self.coordinator.check_disabled(&message.channel_id).await {
            return;
        }
        if self.rate_limited(Command::Score, &message.channel_id) {
            return;
        }

        let dispatcher = self.clone();
        let channel_id = message.channel_id.clone();
        tokio::spawn(async move {
            dispatcher.send_score(channel_id).await;
        });
    }

    async fn send_score(&self, channel_id: String) {
        let ranking = match self
            .store
            .channel_ranking(&channel_id, self.settings.ranking_limit)
            .await
        {
            Ok(ranking) => ranking,
            Err(e) => {
                error!("Getting ranking for channel {} failed: {}", channel_id, e);
                return;
            }
        };

        let text = format!(
            "<b>Top Score:</b>\n{}\n<a href=\"{}?c={}\">Full Score</a>",
            format_rank_text(&ranking),
            self.settings.score_url,
            channel_id
        );
        self.send(
            OutboundMessage::new(channel_id, text, MessageFormat::Html)
                .discard_after(self.settings.score_lifetime),
        )
        .await;
    }

    async fn cmd_say(&self, message: &InboundMessage, args: &str) {
        let target = args
            .split_once(char::is_whitespace)
            .map(|(channel, text)| (channel, text.trim()))
            .filter(|(_, text)| !text.is_empty());

        match target {
            Some((channel, text)) => {
                info!("Admin '{}' says to {}", message.sender.id, channel);
                self.send(OutboundMessage::new(channel, text, MessageFormat::Markdown))
                    .await;
            }
            None => {
                self.reply_usage(message, "usage: `/say [chanID] [message]`")
                    .await
            }
        }
    }

    async fn cmd_channels(&self, message: &InboundMessage, pattern: &str) {
        if pattern.is_empty() {
            self.reply_usage(message, "usage: `/channels [regex pattern]`")
                .await;
            return;
        }

        let channels = match self.store.channels().await {
            Ok(channels) => channels,
            Err(e) => {
                self.reply_usage(message, &format!("channels failed. {}", e))
                    .await;
                return;
            }
        };
        let regex = match Regex::new(pattern) {
            Ok(regex) => regex,
            Err(e) => {
                self.reply_usage(message, &format!("regex failed. {}", e))
                    .await;
                return;
            }
        };

        let mut matches: Vec<(String, String)> = channels
            .into_iter()
            .filter(|(_, name)| regex.is_match(name))
            .collect();
        matches.sort();

        let body: String = matches
            .iter()
            .map(|(id, name)| format!("\n{} {}", id, name))
            .collect();
        let (mut body, truncated) = truncate_on_line(&body, self.settings.listing_limit);
        if truncated {
            body.push_str("\n ... truncated");
        }

        let text = format!("found {} channels:{}", matches.len(), body);
        self.send(OutboundMessage::new(
            message.channel_id.clone(),
            text,
            MessageFormat::Text,
        ))
        .await;
    }

    async fn cmd_broadcast(&self, message: &InboundMessage, text: &str) {
        if text.is_empty() {
            self.reply_usage(message, "usage: `/broadcast [message]`")
                .await;
            return;
        }

        let channels = match self.store.channels().await {
            Ok(channels) => channels,
            Err(e) => {
                self.reply_usage(message, &format!("channels failed. {}", e))
                    .await;
                return;
            }
        };

        let mut targets: Vec<String> = channels.into_keys().collect();
        targets.sort();
        info!(
            "Admin '{}' broadcasting to {} channels",
            message.sender.id,
            targets.len()
        );

        let dispatcher = self.clone();
        let text = text.to_string();
        tokio::spawn(async move {
            dispatcher.run_broadcast(targets, text).await;
        });
    }

    async fn run_broadcast(&self, targets: Vec<String>, text: String) {
        for channel_id in targets {
            self.send(OutboundMessage::new(
                channel_id,
                text.clone(),
                MessageFormat::Text,
            ))
            .await;
            tokio::time::sleep(self.settings.broadcast_interval).await;
        }
        debug!("Broadcast finished");
    }

    fn rate_limited(&self, command: Command, channel_id: &str) -> bool {
        let key = command_key(command.name(), channel_id);
        if self.rate_limiter.allow(&key, self.settings.cooldown) {
            return false;
        }
        self.metrics.record_rate_limited(command.name());
        true
    }

    async fn reply_usage(&self, message: &InboundMessage, text: &str) {
        self.send(OutboundMessage::new(
            message.channel_id.clone(),
            text,
            MessageFormat::Markdown,
        ))
        .await;
    }

    async fn send(&self, message: OutboundMessage) {
        let channel_id = message.channel_id.clone();
        if let Err(e) = self.publisher.publish(message).await {
            warn!("Failed to send reply to channel {}: {}", channel_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::AdmissionQueue;
    use crate::coordinator::{ChannelPhase, CoordinatorSettings};
    use crate::engine::TimedGameEngine;
    use crate::messaging::MockMessagePublisher;
    use crate::store::{InMemoryChannelStore, MockChannelStore, DISABLED_KEY};
    use crate::types::{Player, RankEntry};
    use chrono::Utc;
    use std::collections::HashMap;
    use tokio::time::sleep;

    struct Harness {
        dispatcher: CommandDispatcher,
        coordinator: ChannelCoordinator,
        publisher: Arc<MockMessagePublisher>,
        metrics: Arc<MetricsCollector>,
    }

    fn harness_with_store(store: Arc<dyn ChannelStore>) -> Harness {
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let publisher = Arc::new(MockMessagePublisher::new());
        let settings = CoordinatorSettings {
            min_quorum: 2,
            ..CoordinatorSettings::default()
        };
        let (coordinator, _finished) = ChannelCoordinator::new(
            settings,
            Arc::new(AdmissionQueue::new(4, metrics.clone())),
            Arc::new(TimedGameEngine::new(Duration::from_secs(60))),
            store.clone(),
            publisher.clone(),
            metrics.clone(),
        );
        let dispatcher_settings = DispatcherSettings {
            admin_ids: ["admin".to_string()].into_iter().collect(),
            listing_limit: 40,
            ..DispatcherSettings::default()
        };
        let dispatcher = CommandDispatcher::new(
            dispatcher_settings,
            coordinator.clone(),
            store,
            publisher.clone(),
            metrics.clone(),
        );
        Harness {
            dispatcher,
            coordinator,
            publisher,
            metrics,
        }
    }

    fn harness() -> Harness {
        harness_with_store(Arc::new(InMemoryChannelStore::new()))
    }

    fn message(channel_id: &str, sender: &str, text: &str) -> InboundMessage {
        InboundMessage {
            channel_id: channel_id.to_string(),
            channel_name: "Test".to_string(),
            sender: Player {
                id: sender.to_string(),
                display_name: sender.to_uppercase(),
            },
            text: text.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_parse_message() {
        assert_eq!(
            parse_message("/join", "triviabot"),
            ParsedMessage::Command {
                command: Command::Join,
                args: ""
            }
        );
        assert_eq!(
            parse_message("/say@TriviaBot -100  hello there", "triviabot"),
            ParsedMessage::Command {
                command: Command::Say,
                args: "-100  hello there"
            }
        );
        assert_eq!(parse_message("/join@otherbot", "triviabot"), ParsedMessage::Ignored);
        assert_eq!(parse_message("/unknown", "triviabot"), ParsedMessage::Ignored);
        assert_eq!(parse_message("paris", "triviabot"), ParsedMessage::Text);
    }

    #[tokio::test]
    async fn test_join_command_reaches_coordinator() {
        let h = harness();
        assert!(h.dispatcher.handle(message("c1", "p1", "/join")).await);
        assert!(h.dispatcher.handle(message("c1", "p2", "/join@triviabot")).await);

        let snapshot = h.coordinator.snapshot("c1").await.unwrap();
        assert_eq!(snapshot.phase, ChannelPhase::Running);
        assert_eq!(snapshot.player_names, vec!["P1", "P2"]);
        assert_eq!(
            h.metrics
                .command()
                .commands_total
                .with_label_values(&["join"])
                .get(),
            2
        );
    }

    #[tokio::test]
    async fn test_plain_text_forwarded_only_while_running() {
        let h = harness();
        assert!(!h.dispatcher.handle(message("c1", "p1", "paris")).await);

        h.dispatcher.handle(message("c1", "p1", "/join")).await;
        h.dispatcher.handle(message("c1", "p2", "/join")).await;
        assert!(h.dispatcher.handle(message("c1", "p1", "paris")).await);
    }

    #[tokio::test]
    async fn test_help_rate_limited_per_command() {
        let h = harness();

        h.dispatcher.handle(message("c1", "p1", "/help")).await;
        h.dispatcher.handle(message("c1", "p1", "/help")).await;
        assert_eq!(h.publisher.messages_for("c1").len(), 1);
        assert_eq!(
            h.metrics
                .command()
                .rate_limited_total
                .with_label_values(&["help"])
                .get(),
            1
        );

        // a different command keeps its own cooldown
        h.dispatcher.handle(message("c1", "p1", "/score")).await;
        sleep(Duration::from_millis(50)).await;
        let messages = h.publisher.messages_for("c1");
        assert_eq!(messages.len(), 2);
        assert!(messages[1].text.starts_with("<b>Top Score:</b>"));
    }

    #[tokio::test]
    async fn test_score_renders_ranking() {
        let store = Arc::new(InMemoryChannelStore::new());
        store
            .set_ranking(
                "c1",
                vec![
                    RankEntry {
                        position: 1,
                        score: 30,
                        name: "Alice".to_string(),
                    },
                    RankEntry {
                        position: 3,
                        score: 9,
                        name: "Carol".to_string(),
                    },
                ],
            )
            .await;
        let h = harness_with_store(store);

        h.dispatcher.handle(message("c1", "p1", "/score")).await;
        sleep(Duration::from_millis(50)).await;

        let messages = h.publisher.messages_for("c1");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].format, MessageFormat::Html);
        assert!(messages[0].text.contains("1. (30) Alice\n...\n3. ( 9) Carol"));
        assert!(messages[0].text.contains("?c=c1\">Full Score</a>"));
    }

    #[tokio::test]
    async fn test_score_lookup_failure_is_silent() {
        let mut store = MockChannelStore::new();
        store
            .expect_channel_config()
            .returning(|_, _, default| Ok(default.to_string()));
        store
            .expect_channel_ranking()
            .returning(|_, _| Err(anyhow::anyhow!("ranking table missing")));
        let h = harness_with_store(Arc::new(store));

        assert!(h.dispatcher.handle(message("c1", "p1", "/score")).await);
        sleep(Duration::from_millis(50)).await;
        assert!(h.publisher.messages().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_channel_blocks_help() {
        let store = Arc::new(InMemoryChannelStore::new());
        store.set_config("c1", DISABLED_KEY, "Trivia is off").await;
        let h = harness_with_store(store);

        h.dispatcher.handle(message("c1", "p1", "/help")).await;
        let messages = h.publisher.messages_for("c1");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "Trivia is off");
        assert_eq!(messages[0].format, MessageFormat::Markdown);
    }

    #[tokio::test]
    async fn test_admin_commands_require_admin() {
        let h = harness();
        assert!(!h.dispatcher.handle(message("c1", "p1", "/say c2 hi")).await);
        assert!(h.publisher.messages().is_empty());

        assert!(h.dispatcher.handle(message("c1", "admin", "/say c2 hi all")).await);
        assert_eq!(h.publisher.texts_for("c2"), vec!["hi all".to_string()]);

        h.dispatcher.handle(message("c1", "admin", "/say c2")).await;
        assert!(h.publisher.texts_for("c1")[0].starts_with("usage: `/say"));
    }

    #[tokio::test]
    async fn test_channels_listing_truncated() {
        let store = Arc::new(InMemoryChannelStore::new());
        for i in 0..10 {
            store
                .upsert_channel(&format!("c{}", i), &format!("quiz room {}", i))
                .await;
        }
        store.upsert_channel("x", "music").await;
        let h = harness_with_store(store);

        h.dispatcher
            .handle(message("admin-room", "admin", "/channels ^quiz"))
            .await;

        let texts = h.publisher.texts_for("admin-room");
        assert_eq!(texts.len(), 1);
        assert!(texts[0].starts_with("found 10 channels:\nc0 quiz room 0\n"));
        assert!(texts[0].ends_with("\n ... truncated"));
        assert!(!texts[0].contains("music"));
    }

    #[tokio::test]
    async fn test_channels_errors_reported() {
        let mut store = MockChannelStore::new();
        store
            .expect_channels()
            .returning(|| Err(anyhow::anyhow!("connection reset")));
        let h = harness_with_store(Arc::new(store));

        h.dispatcher
            .handle(message("room", "admin", "/channels quiz"))
            .await;
        h.dispatcher.handle(message("room", "admin", "/channels")).await;

        let texts = h.publisher.texts_for("room");
        assert_eq!(texts[0], "channels failed. connection reset");
        assert!(texts[1].starts_with("usage:"));
    }

    #[tokio::test]
    async fn test_invalid_regex_reported() {
        let h = harness();
        h.dispatcher.handle(message("room", "admin", "/channels (")).await;
        assert!(h.publisher.texts_for("room")[0].starts_with("regex failed."));
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcast_paced() {
        let mut store = MockChannelStore::new();
        store.expect_channels().returning(|| {
            Ok(HashMap::from([
                ("a".to_string(), "A".to_string()),
                ("b".to_string(), "B".to_string()),
                ("c".to_string(), "C".to_string()),
            ]))
        });
        let h = harness_with_store(Arc::new(store));

        h.dispatcher
            .handle(message("room", "admin", "/broadcast maintenance tonight"))
            .await;

        sleep(Duration::from_millis(500)).await;
        assert_eq!(h.publisher.messages().len(), 1);

        sleep(Duration::from_secs(3)).await;
        let messages = h.publisher.messages();
        assert_eq!(messages.len(), 3);
        assert!(messages.iter().all(|m| m.text == "maintenance tonight"));
        assert_eq!(messages[2].channel_id, "c");
    }
}
