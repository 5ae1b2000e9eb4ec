//! Event → [`Inbound`] decoding.
//!
//! Direct messages are NIP-04 decrypted with the bot key; channel messages are
//! taken as-is. The plaintext must be a JSON [`Message`]. Every failure is
//! scoped to the one event: it is logged and the event is dropped.

use nostr_sdk::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::identity::{display_name, npub};
use crate::relay::{KIND_CHANNEL_MESSAGE, KIND_ENCRYPTED_DM};

/// Application payload carried in an event's (decrypted) content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub kind: String,
}

impl Message {
    pub fn new(content: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            kind: kind.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Where an inbound message arrived, and therefore where replies go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Direct,
    Group,
}

/// A decoded message and the context needed to answer it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub message: Message,
    pub sender: PublicKey,
    pub event_id: EventId,
    pub channel: Channel,
}

#[derive(Clone)]
pub struct MessagePipeline {
    keys: Keys,
}

impl MessagePipeline {
    pub fn new(keys: Keys) -> Self {
        Self { keys }
    }

    /// Decrypt (if needed) and parse `event`.
    pub fn decode(&self, event: &Event) -> Result<Inbound, PipelineError> {
        let kind = event.kind.as_u16();
        let (plaintext, channel) = match kind {
            KIND_ENCRYPTED_DM => {
                let plaintext = nip04::decrypt(self.keys.secret_key(), &event.pubkey, &event.content)
                    .map_err(|e| PipelineError::Decrypt(e.to_string()))?;
                (plaintext, Channel::Direct)
            }
            KIND_CHANNEL_MESSAGE => (event.content.clone(), Channel::Group),
            other => return Err(PipelineError::UnsupportedKind(other)),
        };

        let message: Message =
            serde_json::from_str(&plaintext).map_err(|e| PipelineError::Parse {
                raw: plaintext.clone(),
                reason: e.to_string(),
            })?;

        Ok(Inbound {
            message,
            sender: event.pubkey,
            event_id: event.id,
            channel,
        })
    }

    /// [`decode`](Self::decode), logging the outcome. `None` means drop.
    pub fn process(&self, event: &Event) -> Option<Inbound> {
        match self.decode(event) {
            Ok(inbound) => {
                match inbound.channel {
                    Channel::Direct => tracing::debug!(
                        event_id = %event.id,
                        sender = %npub(&inbound.sender),
                        kind = %inbound.message.kind,
                        "direct message"
                    ),
                    Channel::Group => tracing::info!(
                        event_id = %event.id,
                        "{}: {}",
                        display_name(&inbound.sender),
                        inbound.message.content
                    ),
                }
                Some(inbound)
            }
            Err(PipelineError::Parse { raw, .. }) => {
                // Free-form text from a client that does not wrap messages.
                tracing::info!(event_id = %event.id, "{} : {}", npub(&event.pubkey), raw);
                None
            }
            Err(err) => {
                tracing::warn!(event_id = %event.id, "dropping event: {err}");
                None
            }
        }
    }
}
