//! Error types for the hub bots.
//!
//! Errors are split by how far they are allowed to travel: per-event errors
//! ([`PipelineError`], publish failures) stay inside the session, connection
//! errors ([`SessionError`]) flow to the supervisor, and only
//! [`SupervisorError`] and [`ConfigError`] ever reach the bot owner.

use std::time::Duration;

use thiserror::Error;

/// Error returned by a [`RelayLink`](crate::relay::RelayLink) or its connector.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// Relay unreachable or never reported connected
    #[error("failed to connect to relay {url}: {reason}")]
    Connect { url: String, reason: String },

    /// Relay refused the subscription
    #[error("subscription rejected: {0}")]
    Subscribe(String),

    /// Relay did not accept a published event
    #[error("publish failed: {0}")]
    Publish(String),

    /// The link was already closed
    #[error("relay link closed")]
    Closed,
}

/// Per-event failure inside the message pipeline. Never fatal to a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// Event kind is neither an encrypted direct message nor a channel message
    #[error("unsupported event kind {0}")]
    UnsupportedKind(u16),

    /// NIP-04 decryption failed
    #[error("decryption failed: {0}")]
    Decrypt(String),

    /// Plaintext is not a structured message
    #[error("payload is not a message: {reason}")]
    Parse { raw: String, reason: String },
}

/// Why a session ended in the `FAILED` state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Connecting to the relay failed
    #[error(transparent)]
    Connection(RelayError),

    /// Subscribing on an open link failed
    #[error(transparent)]
    Subscription(RelayError),

    /// Event stream exhausted, i.e. the connection dropped
    #[error("relay event stream ended")]
    StreamEnded,

    /// The relay replayed its backlog on a stream that was already live
    #[error("relay restarted the backlog on a live stream")]
    BacklogRestarted,
}

/// Terminal failure of a [`ReconnectSupervisor`](crate::supervisor::ReconnectSupervisor).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SupervisorError {
    /// The retry budget was used up; the bot will not be restarted
    #[error("giving up after {attempts} consecutive failures: {last}")]
    RetriesExhausted { attempts: u32, last: SessionError },
}

/// Invalid or missing startup configuration. Fatal: the bot never starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A required setting was not provided
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    /// A setting could not be parsed
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    /// The configured public key does not belong to the configured secret key
    #[error("public key {configured} does not match secret key (expected {derived})")]
    KeyMismatch { configured: String, derived: String },
}

/// Error from a direct call on a [`Bot`](crate::bot::Bot).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BotError {
    /// No relay link is open right now
    #[error("bot is not connected to a relay")]
    NotConnected,

    /// Encrypting or signing the outbound event failed
    #[error("failed to build event: {0}")]
    Build(String),

    /// The relay rejected the event
    #[error(transparent)]
    Relay(#[from] RelayError),
}

/// Error from the weather collaborator.
#[derive(Debug, Error)]
pub enum WeatherError {
    /// HTTP request failed
    #[error("weather request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Upstream answered with a non-success status
    #[error("weather service returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body had no usable value
    #[error("no weather data in response")]
    NoData,

    /// Request timed out
    #[error("weather request timed out after {0:?}")]
    Timeout(Duration),
}
