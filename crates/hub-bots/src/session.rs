//! One connection attempt: connect, subscribe, drain the backlog, then serve
//! live events until the stream ends or the bot is stopped.
//!
//! ```text
//! CONNECTING ──► BACKLOG ──(end of backlog)──► LIVE
//!      │            │                           │
//!      └────────────┴────────► FAILED ◄─────────┘   (connect/subscribe error, stream end)
//!                   any state ──► CLOSED                (cancellation)
//! ```
//!
//! Stored events are buffered until the relay signals the end of the backlog,
//! then replayed oldest-first, one at a time, with replies suppressed. Live
//! events each get their own task, bounded by a semaphore.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use nostr_sdk::prelude::*;
use parking_lot::RwLock;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::dedupe::SeenEvents;
use crate::dispatch::{DispatchMode, Dispatcher, ReplyContext};
use crate::error::SessionError;
use crate::identity::Identity;
use crate::pipeline::MessagePipeline;
use crate::relay::{RelayConnector, RelayItem, RelayLink, SubscriptionFilter};

pub const DEFAULT_MAX_IN_FLIGHT: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Connecting,
    Backlog,
    Live,
    Closed,
    Failed,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionPhase::Connecting => "CONNECTING",
            SessionPhase::Backlog => "BACKLOG",
            SessionPhase::Live => "LIVE",
            SessionPhase::Closed => "CLOSED",
            SessionPhase::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// Stopped on request.
    Closed,
    /// Ended by an error; `live_for` is how long it served live traffic, if it
    /// got that far.
    Failed {
        error: SessionError,
        live_for: Option<Duration>,
    },
}

/// Mutable state owned by a running session.
#[derive(Debug)]
pub struct SessionState {
    pub mode: DispatchMode,
    pub backlog: Vec<Event>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            mode: DispatchMode::Backlog,
            backlog: Vec::new(),
        }
    }
}

/// Set while a session is live. Shared with the owning bot.
#[derive(Debug, Clone, Default)]
pub struct ReadyFlag(Arc<AtomicBool>);

impl ReadyFlag {
    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn set(&self, ready: bool) {
        self.0.store(ready, Ordering::Release);
    }
}

/// The link of the currently running session, if any.
#[derive(Clone, Default)]
pub struct LinkSlot(Arc<RwLock<Option<Arc<dyn RelayLink>>>>);

impl LinkSlot {
    pub fn get(&self) -> Option<Arc<dyn RelayLink>> {
        self.0.read().clone()
    }

    fn set(&self, link: Option<Arc<dyn RelayLink>>) {
        *self.0.write() = link;
    }
}

/// Everything a session needs that outlives it. Built once per bot.
pub struct SessionContext {
    pub name: String,
    pub identity: Identity,
    pub channel_id: Option<String>,
    pub filter: SubscriptionFilter,
    pub connector: Arc<dyn RelayConnector>,
    pub pipeline: MessagePipeline,
    pub dispatcher: Arc<Dispatcher>,
    pub seen: SeenEvents,
    pub max_in_flight: usize,
    pub ready: ReadyFlag,
    pub link: LinkSlot,
}

impl SessionContext {
    /// Decode and dispatch one event. Duplicates are skipped.
    pub async fn handle(&self, ctx: &ReplyContext, event: &Event, mode: DispatchMode) {
        if !self.seen.insert(event.id) {
            tracing::debug!(bot = %self.name, event_id = %event.id, "already handled");
            return;
        }
        let Some(inbound) = self.pipeline.process(event) else {
            return;
        };
        self.dispatcher.dispatch(ctx, event, &inbound, mode).await;
    }
}

pub struct SubscriptionSession {
    ctx: Arc<SessionContext>,
    cancel: CancellationToken,
    phase: SessionPhase,
}

impl SubscriptionSession {
    pub fn new(ctx: Arc<SessionContext>, cancel: CancellationToken) -> Self {
        Self {
            ctx,
            cancel,
            phase: SessionPhase::Connecting,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    fn enter(&mut self, phase: SessionPhase) {
        tracing::debug!(bot = %self.ctx.name, from = %self.phase, to = %phase, "session phase");
        self.phase = phase;
    }

    pub async fn run(mut self) -> SessionEnd {
        let relay = self.ctx.identity.relay_url().to_string();
        tracing::info!(bot = %self.ctx.name, relay = %relay, "connecting");

        let link = tokio::select! {
            _ = self.cancel.cancelled() => {
                self.enter(SessionPhase::Closed);
                return SessionEnd::Closed;
            }
            res = self.ctx.connector.connect(&self.ctx.identity) => match res {
                Ok(link) => link,
                Err(err) => {
                    self.enter(SessionPhase::Failed);
                    return SessionEnd::Failed {
                        error: SessionError::Connection(err),
                        live_for: None,
                    };
                }
            }
        };
        self.ctx.link.set(Some(link.clone()));

        let outcome = self.serve(link.clone()).await;

        self.ctx.ready.set(false);
        self.ctx.link.set(None);
        link.close().await;

        match &outcome {
            SessionEnd::Closed => {
                self.enter(SessionPhase::Closed);
                tracing::info!(bot = %self.ctx.name, "session stopped");
            }
            SessionEnd::Failed { error, .. } => {
                self.enter(SessionPhase::Failed);
                tracing::warn!(bot = %self.ctx.name, relay = %relay, "session failed: {error}");
            }
        }
        outcome
    }

    async fn serve(&mut self, link: Arc<dyn RelayLink>) -> SessionEnd {
        let mut stream = tokio::select! {
            _ = self.cancel.cancelled() => return SessionEnd::Closed,
            res = link.subscribe(&self.ctx.filter) => match res {
                Ok(stream) => stream,
                Err(err) => {
                    return SessionEnd::Failed {
                        error: SessionError::Subscription(err),
                        live_for: None,
                    };
                }
            }
        };
        self.enter(SessionPhase::Backlog);
        tracing::info!(bot = %self.ctx.name, "connected, fetching pending events");

        let reply_ctx = ReplyContext::new(
            link,
            self.ctx.identity.clone(),
            self.ctx.channel_id.clone(),
        );
        let permits = Arc::new(Semaphore::new(self.ctx.max_in_flight.max(1)));
        let mut tasks: JoinSet<()> = JoinSet::new();
        let mut state = SessionState::default();
        let mut live_since: Option<Instant> = None;

        let end = loop {
            let item = tokio::select! {
                _ = self.cancel.cancelled() => break SessionEnd::Closed,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(err) = joined
                        && err.is_panic()
                    {
                        tracing::error!(bot = %self.ctx.name, "event task panicked: {err}");
                    }
                    continue;
                }
                item = stream.recv() => item,
            };

            match item {
                None => {
                    break SessionEnd::Failed {
                        error: SessionError::StreamEnded,
                        live_for: live_since.map(|since| since.elapsed()),
                    };
                }
                Some(RelayItem::Event(event)) => match state.mode {
                    DispatchMode::Backlog => state.backlog.push(*event),
                    DispatchMode::Live => {
                        let permit = tokio::select! {
                            _ = self.cancel.cancelled() => break SessionEnd::Closed,
                            permit = permits.clone().acquire_owned() => match permit {
                                Ok(permit) => permit,
                                Err(_) => break SessionEnd::Closed,
                            }
                        };
                        let ctx = self.ctx.clone();
                        let reply_ctx = reply_ctx.clone();
                        tasks.spawn(async move {
                            ctx.handle(&reply_ctx, &event, DispatchMode::Live).await;
                            drop(permit);
                        });
                    }
                },
                Some(RelayItem::EndOfBacklog) => {
                    // A second end-of-backlog means the link resubscribed under us.
                    if state.mode == DispatchMode::Live {
                        break SessionEnd::Failed {
                            error: SessionError::BacklogRestarted,
                            live_for: live_since.map(|since| since.elapsed()),
                        };
                    }
                    if !self.replay(&reply_ctx, &mut state).await {
                        break SessionEnd::Closed;
                    }
                    state.mode = DispatchMode::Live;
                    self.enter(SessionPhase::Live);
                    self.ctx.ready.set(true);
                    live_since = Some(Instant::now());
                    tracing::info!(bot = %self.ctx.name, "now in active listening mode");
                }
            }
        };

        tasks.shutdown().await;
        end
    }

    /// Dispatch the buffered backlog oldest-first. Returns `false` if the bot
    /// was stopped part way through.
    async fn replay(&self, reply_ctx: &ReplyContext, state: &mut SessionState) -> bool {
        let pending = std::mem::take(&mut state.backlog);
        tracing::info!(bot = %self.ctx.name, count = pending.len(), "processing pending events");
        for event in pending.into_iter().rev() {
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = self.ctx.handle(reply_ctx, &event, DispatchMode::Backlog) => {}
            }
        }
        true
    }
}
