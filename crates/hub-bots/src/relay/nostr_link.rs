use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use nostr_sdk::prelude::*;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{RelayConnector, RelayItem, RelayLink, RelayStream, STREAM_CAPACITY, SubscriptionFilter};
use crate::error::RelayError;
use crate::identity::Identity;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_LIVENESS_INTERVAL: Duration = Duration::from_secs(5);

/// Opens [`NostrRelayLink`]s, one `nostr_sdk::Client` per link.
#[derive(Debug, Clone)]
pub struct NostrConnector {
    connect_timeout: Duration,
    liveness_interval: Duration,
}

impl Default for NostrConnector {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            liveness_interval: DEFAULT_LIVENESS_INTERVAL,
        }
    }
}

impl NostrConnector {
    pub fn new(connect_timeout: Duration, liveness_interval: Duration) -> Self {
        Self {
            connect_timeout,
            liveness_interval,
        }
    }
}

#[async_trait]
impl RelayConnector for NostrConnector {
    async fn connect(&self, identity: &Identity) -> Result<Arc<dyn RelayLink>, RelayError> {
        let raw = identity.relay_url();
        let connect_err = |reason: String| RelayError::Connect {
            url: raw.to_string(),
            reason,
        };

        let url = RelayUrl::parse(raw).map_err(|e| connect_err(e.to_string()))?;
        let client = Client::new(identity.keys().clone());
        // Reconnects are the supervisor's job; a dropped socket must end the stream.
        client
            .pool()
            .add_relay(url.clone(), RelayOptions::new().reconnect(false))
            .await
            .map_err(|e| connect_err(format!("add relay: {e}")))?;

        if let Err(err) = client
            .try_connect_relay(url.clone(), self.connect_timeout)
            .await
        {
            client.shutdown().await;
            return Err(connect_err(err.to_string()));
        }
        info!(relay = %url, "connected to relay");

        Ok(Arc::new(NostrRelayLink {
            raw_url: raw.to_string(),
            url,
            client,
            liveness_interval: self.liveness_interval,
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }))
    }
}

/// A [`RelayLink`] backed by a single-relay `nostr_sdk::Client`.
pub struct NostrRelayLink {
    raw_url: String,
    url: RelayUrl,
    client: Client,
    liveness_interval: Duration,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

#[async_trait]
impl RelayLink for NostrRelayLink {
    fn url(&self) -> &str {
        &self.raw_url
    }

    async fn subscribe(&self, filter: &SubscriptionFilter) -> Result<RelayStream, RelayError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RelayError::Closed);
        }

        let relay = self
            .client
            .relay(self.url.clone())
            .await
            .map_err(|e| RelayError::Subscribe(e.to_string()))?;
        // Take the receiver before subscribing so the first backlog events are not missed.
        let notifications = relay.notifications();
        let nostr_filter = filter.to_nostr();
        debug!(relay = %self.url, ?nostr_filter, "subscribing");
        let out = self
            .client
            .subscribe_to([self.url.clone()], nostr_filter, None)
            .await
            .map_err(|e| RelayError::Subscribe(e.to_string()))?;
        if out.success.is_empty() {
            let reasons: Vec<String> = out.failed.values().cloned().collect();
            return Err(RelayError::Subscribe(format!(
                "no relay accepted subscription: {reasons:?}"
            )));
        }

        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        tokio::spawn(pump_notifications(
            relay,
            out.val,
            notifications,
            tx,
            self.liveness_interval,
            self.shutdown.clone(),
        ));
        Ok(rx)
    }

    async fn publish(&self, event: &Event) -> Result<EventId, RelayError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RelayError::Closed);
        }
        let out = self
            .client
            .send_event_to([self.url.clone()], event)
            .await
            .map_err(|e| RelayError::Publish(e.to_string()))?;
        if out.success.is_empty() {
            let reasons: Vec<String> = out.failed.values().cloned().collect();
            return Err(RelayError::Publish(format!(
                "relay did not accept event: {reasons:?}"
            )));
        }
        Ok(out.val)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.cancel();
        self.client.unsubscribe_all().await;
        self.client.shutdown().await;
        debug!(relay = %self.url, "relay link closed");
    }
}

/// What to do with one relay notification for a given subscription.
#[derive(Debug)]
enum Route {
    Forward(RelayItem),
    Skip,
    End(&'static str),
}

fn route(
    subscription: &SubscriptionId,
    notification: Result<RelayNotification, broadcast::error::RecvError>,
) -> Route {
    let notification = match notification {
        Ok(n) => n,
        // Missed items cannot be recovered on this stream.
        Err(broadcast::error::RecvError::Lagged(_)) => return Route::End("notifications lagged"),
        Err(broadcast::error::RecvError::Closed) => return Route::End("notifications closed"),
    };
    match notification {
        RelayNotification::Event {
            subscription_id,
            event,
        } if subscription_id == *subscription => Route::Forward(RelayItem::Event(event)),
        RelayNotification::Message {
            message: RelayMessage::EndOfStoredEvents(id),
        } if *id == *subscription => Route::Forward(RelayItem::EndOfBacklog),
        RelayNotification::RelayStatus { status } if status != RelayStatus::Connected => {
            Route::End("relay connection lost")
        }
        RelayNotification::Shutdown => Route::End("relay shutdown"),
        _ => Route::Skip,
    }
}

/// Forward one subscription's events and EOSE into the stream until the relay
/// leaves the connected state or the link is closed.
async fn pump_notifications(
    relay: Relay,
    subscription: SubscriptionId,
    mut notifications: broadcast::Receiver<RelayNotification>,
    tx: mpsc::Sender<RelayItem>,
    liveness_interval: Duration,
    shutdown: CancellationToken,
) {
    let url = relay.url().clone();
    let mut liveness = tokio::time::interval(liveness_interval);
    loop {
        let notification = tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tx.closed() => break,
            _ = liveness.tick() => {
                if !relay.is_connected() {
                    warn!(relay = %url, status = %relay.status(), "relay connection lost");
                    break;
                }
                continue;
            }
            notification = notifications.recv() => notification,
        };
        match route(&subscription, notification) {
            Route::Forward(item) => {
                if let RelayItem::Event(event) = &item {
                    trace!(event_id = %event.id, kind = event.kind.as_u16(), "received event");
                }
                if tx.send(item).await.is_err() {
                    break;
                }
            }
            Route::Skip => {}
            Route::End(reason) => {
                warn!(relay = %url, status = %relay.status(), "ending stream: {reason}");
                break;
            }
        }
    }
    debug!(relay = %url, %subscription, "notification pump stopped");
}
