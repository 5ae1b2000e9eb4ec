//! Relay bots for the SkateConnect hub.
//!
//! Each bot holds one identity, keeps a subscription open on one relay and
//! answers what arrives: encrypted direct messages for the support bot,
//! public channel messages for the group bot. Stored events are replayed once
//! the relay signals the end of its backlog, without replies; live events are
//! answered as they come. Dropped connections are retried with backoff up to
//! a fixed budget.

pub mod bot;
pub mod config;
pub mod dedupe;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod manager;
pub mod pipeline;
pub mod plugins;
pub mod relay;
pub mod session;
pub mod supervisor;
pub mod weather;

pub use bot::{Bot, BotProfile, RelayBot};
pub use config::{BotConfig, HubConfig};
pub use dedupe::SeenEvents;
pub use dispatch::{
    BotPlugin, DispatchMode, Dispatcher, HandlerOutcome, HandlerPlugin, MessageHandler,
    ReplyContext,
};
pub use error::{
    BotError, ConfigError, PipelineError, RelayError, SessionError, SupervisorError, WeatherError,
};
pub use identity::Identity;
pub use manager::{BotManager, BotOutcome, BotReport};
pub use pipeline::{Channel, Inbound, Message, MessagePipeline};
pub use relay::{
    MemoryRelay, NostrConnector, NostrRelayLink, RelayConnector, RelayItem, RelayLink,
    RelayStream, SubscriptionFilter,
};
pub use session::{SessionEnd, SessionPhase, SubscriptionSession};
pub use supervisor::{Backoff, ReconnectSupervisor, RetryPolicy};
pub use weather::{MeteomaticsReporter, StaticReport, WeatherReporter};
