use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use nostr_sdk::prelude::*;
use tokio_util::sync::CancellationToken;

use crate::config::BotConfig;
use crate::dedupe::SeenEvents;
use crate::dispatch::{DispatchMode, Dispatcher, ReplyContext, build_encrypted_dm};
use crate::error::{BotError, ConfigError, SupervisorError};
use crate::handlers::RuleHandler;
use crate::pipeline::MessagePipeline;
use crate::plugins::{ChannelNotifierPlugin, LoggingPlugin};
use crate::relay::{KIND_CHANNEL_MESSAGE, KIND_ENCRYPTED_DM, RelayConnector, SubscriptionFilter};
use crate::session::{LinkSlot, ReadyFlag, SessionContext, SubscriptionSession};
use crate::supervisor::ReconnectSupervisor;
use crate::weather::WeatherReporter;

pub const SUPPORT_BACKLOG_LIMIT: usize = 50;
pub const GROUP_BACKLOG_LIMIT: usize = 64;

/// A long-running participant on the relay.
#[async_trait]
pub trait Bot: Send + Sync {
    fn name(&self) -> &str;

    /// Run until stopped or out of retries.
    async fn start(&self) -> Result<(), SupervisorError>;

    /// Ask a running [`start`](Self::start) to wind down. A stopped bot does not
    /// start again.
    fn stop(&self);

    /// Push one event through the pipeline as if it came from the relay.
    async fn handle_event(&self, event: Event) -> Result<(), BotError>;

    /// `true` while live events are being answered.
    fn is_ready(&self) -> bool;

    async fn publish_encrypted(&self, to: &PublicKey, text: &str) -> Result<EventId, BotError>;

    fn keys(&self) -> &Keys;
}

/// Which subscription and rule set a bot runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BotProfile {
    /// Encrypted direct messages addressed to the bot.
    Support,
    /// Messages in the hub's public channel.
    Group,
}

impl BotProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            BotProfile::Support => "dm",
            BotProfile::Group => "group",
        }
    }

    pub fn filter(&self, bot: &PublicKey, channel_id: &str) -> SubscriptionFilter {
        match self {
            BotProfile::Support => SubscriptionFilter::new()
                .kind(KIND_ENCRYPTED_DM)
                .tag('p', bot.to_hex())
                .limit(SUPPORT_BACKLOG_LIMIT),
            BotProfile::Group => SubscriptionFilter::new()
                .kind(KIND_CHANNEL_MESSAGE)
                .tag('e', channel_id)
                .limit(GROUP_BACKLOG_LIMIT),
        }
    }

    pub fn dispatcher(&self, channel_id: &str, weather: Arc<dyn WeatherReporter>) -> Dispatcher {
        match self {
            BotProfile::Support => Dispatcher::new(Arc::new(RuleHandler::support()))
                .with_plugin(Arc::new(LoggingPlugin))
                .with_handler_plugin(Arc::new(ChannelNotifierPlugin::new(channel_id))),
            BotProfile::Group => Dispatcher::new(Arc::new(RuleHandler::group(weather)))
                .with_plugin(Arc::new(LoggingPlugin)),
        }
    }
}

impl FromStr for BotProfile {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dm" | "support" => Ok(BotProfile::Support),
            "group" => Ok(BotProfile::Group),
            other => Err(ConfigError::Invalid {
                field: "bot profile",
                reason: format!("unknown profile {other:?} (expected dm or group)"),
            }),
        }
    }
}

/// A [`Bot`] driven by a [`ReconnectSupervisor`] over relay sessions.
pub struct RelayBot {
    ctx: Arc<SessionContext>,
    config: BotConfig,
    cancel: CancellationToken,
}

impl RelayBot {
    pub fn new(
        config: BotConfig,
        connector: Arc<dyn RelayConnector>,
        weather: Arc<dyn WeatherReporter>,
    ) -> Self {
        let dispatcher = config.profile.dispatcher(&config.channel_id, weather);
        Self::with_dispatcher(config, connector, dispatcher)
    }

    /// Like [`new`](Self::new) but with caller-chosen plugins and handler.
    pub fn with_dispatcher(
        config: BotConfig,
        connector: Arc<dyn RelayConnector>,
        dispatcher: Dispatcher,
    ) -> Self {
        let filter = config
            .profile
            .filter(&config.identity.public_key(), &config.channel_id);
        let ctx = Arc::new(SessionContext {
            name: config.name.clone(),
            identity: config.identity.clone(),
            channel_id: Some(config.channel_id.clone()),
            filter,
            connector,
            pipeline: MessagePipeline::new(config.identity.keys().clone()),
            dispatcher: Arc::new(dispatcher),
            seen: SeenEvents::new(config.seen_capacity),
            max_in_flight: config.max_in_flight,
            ready: ReadyFlag::default(),
            link: LinkSlot::default(),
        });
        Self {
            ctx,
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn profile(&self) -> BotProfile {
        self.config.profile
    }

    pub fn filter(&self) -> &SubscriptionFilter {
        &self.ctx.filter
    }

    pub fn npub(&self) -> String {
        self.config.identity.npub()
    }

    fn reply_context(&self) -> Result<ReplyContext, BotError> {
        let link = self.ctx.link.get().ok_or(BotError::NotConnected)?;
        Ok(ReplyContext::new(
            link,
            self.config.identity.clone(),
            Some(self.config.channel_id.clone()),
        ))
    }
}

#[async_trait]
impl Bot for RelayBot {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn start(&self) -> Result<(), SupervisorError> {
        tracing::info!(
            bot = %self.config.name,
            profile = self.config.profile.as_str(),
            npub = %self.npub(),
            relay = %self.config.identity.relay_url(),
            "starting bot"
        );
        let supervisor =
            ReconnectSupervisor::new(self.config.name.clone(), self.config.retry, self.cancel.clone());
        let result = supervisor
            .run(|| SubscriptionSession::new(self.ctx.clone(), self.cancel.clone()).run())
            .await;
        tracing::info!(bot = %self.config.name, "bot stopped");
        result
    }

    fn stop(&self) {
        self.cancel.cancel();
    }

    async fn handle_event(&self, event: Event) -> Result<(), BotError> {
        let ctx = self.reply_context()?;
        let mode = if self.is_ready() {
            DispatchMode::Live
        } else {
            DispatchMode::Backlog
        };
        self.ctx.handle(&ctx, &event, mode).await;
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ctx.ready.get()
    }

    async fn publish_encrypted(&self, to: &PublicKey, text: &str) -> Result<EventId, BotError> {
        let link = self.ctx.link.get().ok_or(BotError::NotConnected)?;
        let event = build_encrypted_dm(self.config.identity.keys(), to, text)?;
        Ok(link.publish(&event).await?)
    }

    fn keys(&self) -> &Keys {
        self.config.identity.keys()
    }
}
