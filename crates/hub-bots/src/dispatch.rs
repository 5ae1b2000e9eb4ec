//! Fan-out of decoded messages to plugins and the bot's handler.

use std::sync::Arc;

use async_trait::async_trait;
use nostr_sdk::prelude::*;

use crate::error::BotError;
use crate::identity::{Identity, npub};
use crate::pipeline::{Channel, Inbound, Message};
use crate::relay::RelayLink;

/// Whether the session was still draining stored events when this one was seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    Backlog,
    Live,
}

/// Result of running a message through a [`MessageHandler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    NoMatch,
    Handled,
    /// Handled, and the handler plugins should run too.
    HandledTrigger,
}

/// Observes every parsed message, stored or live.
#[async_trait]
pub trait BotPlugin: Send + Sync {
    fn name(&self) -> &str;

    async fn on_event(&self, ctx: &ReplyContext, event: &Event, inbound: &Inbound);
}

/// Content matching and replies. Only ever called for live messages.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle_message(&self, ctx: &ReplyContext, inbound: &Inbound) -> HandlerOutcome;
}

/// Runs after a handler rule that asked for it.
#[async_trait]
pub trait HandlerPlugin: Send + Sync {
    fn name(&self) -> &str;

    async fn on_trigger(&self, ctx: &ReplyContext, inbound: &Inbound);
}

/// What a handler or plugin needs to publish on the bot's behalf.
#[derive(Clone)]
pub struct ReplyContext {
    link: Arc<dyn RelayLink>,
    identity: Identity,
    channel_id: Option<String>,
}

impl ReplyContext {
    pub fn new(link: Arc<dyn RelayLink>, identity: Identity, channel_id: Option<String>) -> Self {
        Self {
            link,
            identity,
            channel_id,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn channel_id(&self) -> Option<&str> {
        self.channel_id.as_deref()
    }

    /// Answer `inbound` where it came from: an encrypted DM back to the sender,
    /// or a message in the group channel.
    pub async fn reply(&self, inbound: &Inbound, text: &str) -> Result<EventId, BotError> {
        match inbound.channel {
            Channel::Direct => self.publish_encrypted(&inbound.sender, text).await,
            Channel::Group => self.publish_channel(text).await,
        }
    }

    pub async fn publish_encrypted(&self, to: &PublicKey, text: &str) -> Result<EventId, BotError> {
        let event = build_encrypted_dm(self.identity.keys(), to, text)?;
        Ok(self.link.publish(&event).await?)
    }

    /// Post `content` to the configured channel.
    pub async fn publish_channel(&self, content: &str) -> Result<EventId, BotError> {
        let channel = self
            .channel_id
            .as_deref()
            .ok_or_else(|| BotError::Build("no channel configured".to_string()))?;
        let event = build_channel_message(
            self.identity.keys(),
            channel,
            self.identity.relay_url(),
            content,
        )?;
        Ok(self.link.publish(&event).await?)
    }

    /// Tell the channel that `subscriber` came online.
    pub async fn announce(&self, subscriber: &PublicKey) -> Result<EventId, BotError> {
        let content = Message::new(npub(subscriber), "subscriber").to_json();
        self.publish_channel(&content).await
    }
}

pub fn build_encrypted_dm(keys: &Keys, to: &PublicKey, text: &str) -> Result<Event, BotError> {
    let content =
        nip04::encrypt(keys.secret_key(), to, text).map_err(|e| BotError::Build(e.to_string()))?;
    EventBuilder::new(Kind::EncryptedDirectMessage, content)
        .tag(Tag::public_key(*to))
        .sign_with_keys(keys)
        .map_err(|e| BotError::Build(e.to_string()))
}

/// Kind-42 message rooted at `channel_id`.
pub fn build_channel_message(
    keys: &Keys,
    channel_id: &str,
    relay_url: &str,
    content: &str,
) -> Result<Event, BotError> {
    let root = Tag::parse(["e", channel_id, relay_url, "root"])
        .map_err(|e| BotError::Build(e.to_string()))?;
    EventBuilder::new(Kind::ChannelMessage, content)
        .tag(root)
        .sign_with_keys(keys)
        .map_err(|e| BotError::Build(e.to_string()))
}

/// Global plugins, then the handler, then (on request) handler plugins. All in
/// registration order.
#[derive(Clone)]
pub struct Dispatcher {
    plugins: Vec<Arc<dyn BotPlugin>>,
    handler: Arc<dyn MessageHandler>,
    handler_plugins: Vec<Arc<dyn HandlerPlugin>>,
}

impl Dispatcher {
    pub fn new(handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            plugins: Vec::new(),
            handler,
            handler_plugins: Vec::new(),
        }
    }

    pub fn with_plugin(mut self, plugin: Arc<dyn BotPlugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn with_handler_plugin(mut self, plugin: Arc<dyn HandlerPlugin>) -> Self {
        self.handler_plugins.push(plugin);
        self
    }

    pub async fn dispatch(
        &self,
        ctx: &ReplyContext,
        event: &Event,
        inbound: &Inbound,
        mode: DispatchMode,
    ) -> HandlerOutcome {
        for plugin in &self.plugins {
            plugin.on_event(ctx, event, inbound).await;
        }

        if mode == DispatchMode::Backlog {
            tracing::debug!(event_id = %event.id, "ignoring pending message during startup");
            return HandlerOutcome::NoMatch;
        }

        let outcome = self.handler.handle_message(ctx, inbound).await;
        if outcome == HandlerOutcome::HandledTrigger {
            for plugin in &self.handler_plugins {
                tracing::debug!(plugin = plugin.name(), event_id = %event.id, "trigger");
                plugin.on_trigger(ctx, inbound).await;
            }
        }
        outcome
    }
}
