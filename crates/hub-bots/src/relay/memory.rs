use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use nostr_sdk::prelude::*;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{RelayConnector, RelayItem, RelayLink, RelayStream, STREAM_CAPACITY, SubscriptionFilter};
use crate::error::RelayError;
use crate::identity::Identity;

/// In-process relay for tests and offline runs.
///
/// Stores every injected or published event, serves matching backlog
/// newest-first followed by end-of-backlog, and forwards later events to open
/// subscriptions. Connection refusal, subscription rejection and connection
/// drops can be triggered on demand.
#[derive(Clone, Default)]
pub struct MemoryRelay {
    state: Arc<Mutex<RelayState>>,
}

#[derive(Default)]
struct RelayState {
    stored: Vec<Event>,
    published: Vec<Event>,
    subscriptions: Vec<MemorySubscription>,
    links: Vec<Arc<LinkShared>>,
    next_link_id: u64,
    connect_attempts: usize,
    refuse_connects: usize,
    reject_subscriptions: usize,
    reject_publishes: bool,
    hold_end_of_backlog: bool,
}

struct MemorySubscription {
    link_id: u64,
    filter: SubscriptionFilter,
    tx: mpsc::Sender<RelayItem>,
    backlog_done: bool,
}

struct LinkShared {
    id: u64,
    closed: AtomicBool,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an event and deliver it to every open subscription it matches.
    pub fn inject(&self, event: Event) {
        let mut state = self.state.lock();
        state.deliver(&event);
        state.stored.push(event);
    }

    /// Refuse the next `count` connection attempts.
    pub fn refuse_connections(&self, count: usize) {
        self.state.lock().refuse_connects = count;
    }

    /// Reject the next `count` subscriptions.
    pub fn reject_subscriptions(&self, count: usize) {
        self.state.lock().reject_subscriptions = count;
    }

    pub fn reject_publishes(&self, reject: bool) {
        self.state.lock().reject_publishes = reject;
    }

    /// Withhold end-of-backlog from new subscriptions until
    /// [`release_end_of_backlog`](Self::release_end_of_backlog).
    pub fn hold_end_of_backlog(&self, hold: bool) {
        self.state.lock().hold_end_of_backlog = hold;
    }

    pub fn release_end_of_backlog(&self) {
        let mut state = self.state.lock();
        state.hold_end_of_backlog = false;
        for sub in state.subscriptions.iter_mut().filter(|s| !s.backlog_done) {
            sub.backlog_done = true;
            let _ = sub.tx.try_send(RelayItem::EndOfBacklog);
        }
    }

    /// Send another end-of-backlog to every subscription already past its
    /// backlog, as a relay does after a silent resubscribe.
    pub fn resend_end_of_backlog(&self) {
        let state = self.state.lock();
        for sub in state.subscriptions.iter().filter(|s| s.backlog_done) {
            let _ = sub.tx.try_send(RelayItem::EndOfBacklog);
        }
    }

    /// Drop every open connection; their streams end.
    pub fn drop_connections(&self) {
        let mut state = self.state.lock();
        for link in state.links.drain(..) {
            link.closed.store(true, Ordering::SeqCst);
        }
        state.subscriptions.clear();
    }

    pub fn connect_attempts(&self) -> usize {
        self.state.lock().connect_attempts
    }

    pub fn open_links(&self) -> usize {
        self.state.lock().links.len()
    }

    pub fn open_subscriptions(&self) -> usize {
        self.state.lock().subscriptions.len()
    }

    /// Events published through any link, in publish order.
    pub fn published(&self) -> Vec<Event> {
        self.state.lock().published.clone()
    }

    /// Wait until at least `count` events were published or `timeout` passes.
    pub async fn wait_for_published(&self, count: usize, timeout: Duration) -> Vec<Event> {
        self.wait_until(timeout, |state| state.published.len() >= count)
            .await;
        self.published()
    }

    /// Wait until a subscription is open and past its backlog.
    pub async fn wait_for_live_subscription(&self, timeout: Duration) -> bool {
        self.wait_until(timeout, |state| {
            state.subscriptions.iter().any(|s| s.backlog_done)
        })
        .await
    }

    async fn wait_until(&self, timeout: Duration, done: impl Fn(&RelayState) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let state = self.state.lock();
                if done(&state) {
                    return true;
                }
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl RelayState {
    fn deliver(&mut self, event: &Event) {
        self.subscriptions.retain(|sub| {
            if !sub.filter.matches(event) {
                return true;
            }
            match sub.tx.try_send(RelayItem::Event(Box::new(event.clone()))) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(event_id = %event.id, "memory relay subscriber full, dropping event");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }

    /// Stored events matching `filter`, newest first, capped at the filter limit.
    fn backlog(&self, filter: &SubscriptionFilter) -> Vec<Event> {
        let mut matched: Vec<Event> = self
            .stored
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if filter.limit > 0 {
            matched.truncate(filter.limit);
        }
        matched
    }
}

#[async_trait]
impl RelayConnector for MemoryRelay {
    async fn connect(&self, identity: &Identity) -> Result<Arc<dyn RelayLink>, RelayError> {
        let mut state = self.state.lock();
        state.connect_attempts += 1;
        if state.refuse_connects > 0 {
            state.refuse_connects -= 1;
            return Err(RelayError::Connect {
                url: identity.relay_url().to_string(),
                reason: "connection refused".to_string(),
            });
        }
        let shared = Arc::new(LinkShared {
            id: state.next_link_id,
            closed: AtomicBool::new(false),
        });
        state.next_link_id += 1;
        state.links.push(shared.clone());
        Ok(Arc::new(MemoryLink {
            relay: self.clone(),
            url: identity.relay_url().to_string(),
            shared,
        }))
    }
}

struct MemoryLink {
    relay: MemoryRelay,
    url: String,
    shared: Arc<LinkShared>,
}

impl MemoryLink {
    fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RelayLink for MemoryLink {
    fn url(&self) -> &str {
        &self.url
    }

    async fn subscribe(&self, filter: &SubscriptionFilter) -> Result<RelayStream, RelayError> {
        if self.is_closed() {
            return Err(RelayError::Closed);
        }
        let mut state = self.relay.state.lock();
        if state.reject_subscriptions > 0 {
            state.reject_subscriptions -= 1;
            return Err(RelayError::Subscribe("blocked: subscription rejected".to_string()));
        }

        let backlog = state.backlog(filter);
        let (tx, rx) = mpsc::channel(STREAM_CAPACITY.max(backlog.len() + 1));
        for event in backlog {
            let _ = tx.try_send(RelayItem::Event(Box::new(event)));
        }
        let backlog_done = !state.hold_end_of_backlog;
        if backlog_done {
            let _ = tx.try_send(RelayItem::EndOfBacklog);
        }
        state.subscriptions.push(MemorySubscription {
            link_id: self.shared.id,
            filter: filter.clone(),
            tx,
            backlog_done,
        });
        Ok(rx)
    }

    async fn publish(&self, event: &Event) -> Result<EventId, RelayError> {
        if self.is_closed() {
            return Err(RelayError::Closed);
        }
        let mut state = self.relay.state.lock();
        if state.reject_publishes {
            return Err(RelayError::Publish("blocked: publishing disabled".to_string()));
        }
        state.published.push(event.clone());
        state.deliver(event);
        state.stored.push(event.clone());
        Ok(event.id)
    }

    async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut state = self.relay.state.lock();
        let id = self.shared.id;
        state.links.retain(|l| l.id != id);
        state.subscriptions.retain(|s| s.link_id != id);
    }
}
