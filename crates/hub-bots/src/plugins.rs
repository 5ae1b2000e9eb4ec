use async_trait::async_trait;
use nostr_sdk::prelude::*;

use crate::dispatch::{BotPlugin, HandlerPlugin, ReplyContext};
use crate::handlers::ONLINE_NOTICE;
use crate::identity::npub;
use crate::pipeline::Inbound;

/// Logs every message the bot sees.
#[derive(Debug, Default)]
pub struct LoggingPlugin;

#[async_trait]
impl BotPlugin for LoggingPlugin {
    fn name(&self) -> &str {
        "logging"
    }

    async fn on_event(&self, ctx: &ReplyContext, event: &Event, inbound: &Inbound) {
        tracing::info!(
            bot = %ctx.identity().npub(),
            event_id = %event.id,
            sender = %event.pubkey,
            kind = %inbound.message.kind,
            "event received: {}",
            inbound.message.content
        );
    }
}

/// Notes in the log when a user reports themselves online.
#[derive(Debug, Clone)]
pub struct ChannelNotifierPlugin {
    channel_id: String,
}

impl ChannelNotifierPlugin {
    pub fn new(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
        }
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }
}

#[async_trait]
impl HandlerPlugin for ChannelNotifierPlugin {
    fn name(&self) -> &str {
        "channel-notifier"
    }

    async fn on_trigger(&self, _ctx: &ReplyContext, inbound: &Inbound) {
        if inbound.message.content == ONLINE_NOTICE {
            tracing::info!(
                channel = %self.channel_id,
                user = %npub(&inbound.sender),
                "user has come online"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;
    use crate::pipeline::{Channel, Message};
    use crate::relay::{MemoryRelay, RelayConnector};

    #[tokio::test]
    async fn plugins_only_observe() {
        let relay = MemoryRelay::new();
        let identity = Identity::new(Keys::generate(), "wss://relay.example");
        let link = relay.connect(&identity).await.unwrap();
        let ctx = ReplyContext::new(link, identity, Some("cd".repeat(32)));
        let user = Keys::generate();
        let event = EventBuilder::new(Kind::ChannelMessage, "{}")
            .sign_with_keys(&user)
            .unwrap();
        let inbound = Inbound {
            message: Message::new(ONLINE_NOTICE, "message"),
            sender: user.public_key(),
            event_id: event.id,
            channel: Channel::Direct,
        };

        LoggingPlugin.on_event(&ctx, &event, &inbound).await;
        let notifier = ChannelNotifierPlugin::new("cd".repeat(32));
        notifier.on_trigger(&ctx, &inbound).await;

        assert_eq!(notifier.channel_id(), "cd".repeat(32));
        assert!(relay.published().is_empty());
    }
}
