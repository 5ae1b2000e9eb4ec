//! Connection to a single relay.
//!
//! A [`RelayConnector`] opens a [`RelayLink`]; the link hands out one
//! [`RelayStream`] per subscription. The stream yields the stored backlog, then
//! [`RelayItem::EndOfBacklog`], then live events, and is exhausted when the
//! connection drops. Consumers must treat exhaustion as a reason to reconnect.

mod memory;
mod nostr_link;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use nostr_sdk::prelude::*;
use tokio::sync::mpsc;

use crate::error::RelayError;
use crate::identity::Identity;

pub use memory::MemoryRelay;
pub use nostr_link::{NostrConnector, NostrRelayLink};

/// NIP-04 encrypted direct message.
pub const KIND_ENCRYPTED_DM: u16 = 4;
/// NIP-28 public channel message.
pub const KIND_CHANNEL_MESSAGE: u16 = 42;

/// Buffer between a link's reader and the session consuming its stream.
pub(crate) const STREAM_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum RelayItem {
    Event(Box<Event>),
    EndOfBacklog,
}

pub type RelayStream = mpsc::Receiver<RelayItem>;

/// What a subscription asks the relay for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionFilter {
    pub kinds: BTreeSet<u16>,
    /// Single-letter tag name to accepted values.
    pub tags: BTreeMap<char, BTreeSet<String>>,
    pub limit: usize,
}

impl SubscriptionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: u16) -> Self {
        self.kinds.insert(kind);
        self
    }

    pub fn tag(mut self, name: char, value: impl Into<String>) -> Self {
        self.tags.entry(name).or_default().insert(value.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Whether `event` satisfies every kind and tag constraint.
    pub fn matches(&self, event: &Event) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&event.kind.as_u16()) {
            return false;
        }
        self.tags.iter().all(|(name, values)| {
            event.tags.iter().any(|tag| {
                let parts = tag.as_slice();
                parts.len() >= 2
                    && parts[0].chars().eq(std::iter::once(*name))
                    && values.contains(&parts[1])
            })
        })
    }

    pub fn to_nostr(&self) -> Filter {
        let mut filter = Filter::new().kinds(self.kinds.iter().map(|k| Kind::from(*k)));
        for (name, values) in &self.tags {
            match SingleLetterTag::from_char(*name) {
                Ok(tag) => {
                    filter = filter.custom_tags(tag, values.iter().cloned());
                }
                Err(err) => {
                    tracing::warn!(tag = %name, "skipping unsupported filter tag: {err}");
                }
            }
        }
        if self.limit > 0 {
            filter = filter.limit(self.limit);
        }
        filter
    }
}

/// An open connection to one relay.
#[async_trait]
pub trait RelayLink: Send + Sync {
    fn url(&self) -> &str;

    /// Start a subscription. The returned stream ends when the connection does.
    async fn subscribe(&self, filter: &SubscriptionFilter) -> Result<RelayStream, RelayError>;

    async fn publish(&self, event: &Event) -> Result<EventId, RelayError>;

    /// Close the connection. Idempotent; ends every stream handed out.
    async fn close(&self);
}

#[async_trait]
pub trait RelayConnector: Send + Sync {
    async fn connect(&self, identity: &Identity) -> Result<Arc<dyn RelayLink>, RelayError>;
}
