use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use hub_bots::relay::{KIND_CHANNEL_MESSAGE, KIND_ENCRYPTED_DM};
use hub_bots::{
    Identity, NostrConnector, RelayConnector, RelayError, RelayItem, RelayLink, RelayStream,
    SubscriptionFilter,
};
use nostr_relay_builder::builder::{PolicyResult, WritePolicy};
use nostr_relay_builder::{LocalRelay, MockRelay, RelayBuilder};
use nostr_sdk::prelude::*;

const CHANNEL: &str = "22e4dd5d387b8cf8f96fa159af04edf845d6526149e0e93b8a0f6b23c97af4a2";
const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(300);

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn local_builder(port: u16) -> RelayBuilder {
    RelayBuilder::default()
        .addr(IpAddr::V4(Ipv4Addr::LOCALHOST))
        .port(port)
}

async fn open(url: &str, liveness: Duration) -> Arc<dyn RelayLink> {
    let connector = NostrConnector::new(Duration::from_secs(3), liveness);
    match connector.connect(&Identity::new(Keys::generate(), url)).await {
        Ok(link) => link,
        Err(err) => panic!("connect to {url}: {err}"),
    }
}

async fn connect_err(url: &str, timeout: Duration) -> RelayError {
    let connector = NostrConnector::new(timeout, Duration::from_secs(1));
    let identity = Identity::new(Keys::generate(), url);
    let attempt = connector.connect(&identity);
    match tokio::time::timeout(WAIT, attempt).await {
        Ok(Ok(_)) => panic!("connected to {url}"),
        Ok(Err(err)) => err,
        Err(_) => panic!("connect to {url} did not give up in time"),
    }
}

fn channel_filter() -> SubscriptionFilter {
    SubscriptionFilter::new()
        .kind(KIND_CHANNEL_MESSAGE)
        .tag('e', CHANNEL)
}

fn channel_message(author: &Keys, content: &str) -> Event {
    EventBuilder::new(Kind::from(KIND_CHANNEL_MESSAGE), content)
        .tag(Tag::parse(["e", CHANNEL]).unwrap())
        .sign_with_keys(author)
        .unwrap()
}

async fn next_item(stream: &mut RelayStream) -> Option<RelayItem> {
    tokio::time::timeout(WAIT, stream.recv())
        .await
        .expect("stream item in time")
}

async fn expect_event(stream: &mut RelayStream) -> Event {
    match next_item(stream).await {
        Some(RelayItem::Event(event)) => *event,
        other => panic!("expected event, got {other:?}"),
    }
}

async fn expect_end_of_backlog(stream: &mut RelayStream) {
    match next_item(stream).await {
        Some(RelayItem::EndOfBacklog) => {}
        other => panic!("expected end of backlog, got {other:?}"),
    }
}

/// Everything the stream yields until it ends.
async fn drain(stream: &mut RelayStream) -> Vec<RelayItem> {
    let mut items = Vec::new();
    loop {
        match next_item(stream).await {
            Some(item) => items.push(item),
            None => return items,
        }
    }
}

#[derive(Debug)]
struct RejectEverything;

impl WritePolicy for RejectEverything {
    fn admit_event<'a>(
        &'a self,
        _event: &'a Event,
        _addr: &'a SocketAddr,
    ) -> BoxedFuture<'a, PolicyResult> {
        Box::pin(async { PolicyResult::Reject("read-only relay".to_string()) })
    }
}

#[tokio::test]
async fn connect_fails_when_nothing_listens() {
    let url = format!("ws://127.0.0.1:{}", free_port());

    let err = connect_err(&url, Duration::from_secs(1)).await;
    assert!(matches!(err, RelayError::Connect { url: ref u, .. } if *u == url));
}

#[tokio::test]
async fn connect_times_out_on_silent_listener() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    // Accept sockets but never answer the websocket handshake.
    let silent = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let started = tokio::time::Instant::now();
    let err = connect_err(&url, Duration::from_millis(300)).await;
    assert!(matches!(err, RelayError::Connect { .. }));
    assert!(started.elapsed() < Duration::from_secs(3));
    silent.abort();
}

#[tokio::test]
async fn backlog_ends_before_live_events() {
    let relay = MockRelay::run().await.unwrap();
    let url = relay.url().await.to_string();
    let author = Keys::generate();
    let writer = open(&url, Duration::from_secs(1)).await;
    let stored = writer.publish(&channel_message(&author, "stored")).await.unwrap();

    let link = open(&url, Duration::from_secs(1)).await;
    let mut stream = link.subscribe(&channel_filter()).await.unwrap();
    assert_eq!(expect_event(&mut stream).await.id, stored);
    expect_end_of_backlog(&mut stream).await;

    let live = writer.publish(&channel_message(&author, "live")).await.unwrap();
    assert_eq!(expect_event(&mut stream).await.id, live);

    link.close().await;
    writer.close().await;
}

#[tokio::test]
async fn streams_only_carry_their_own_subscription() {
    let relay = MockRelay::run().await.unwrap();
    let url = relay.url().await.to_string();
    let bot = Keys::generate();
    let link = open(&url, Duration::from_secs(1)).await;

    let mut channel = link.subscribe(&channel_filter()).await.unwrap();
    let mut dms = link
        .subscribe(
            &SubscriptionFilter::new()
                .kind(KIND_ENCRYPTED_DM)
                .tag('p', bot.public_key().to_hex()),
        )
        .await
        .unwrap();
    expect_end_of_backlog(&mut channel).await;
    expect_end_of_backlog(&mut dms).await;

    let sent = link
        .publish(&channel_message(&Keys::generate(), "hello"))
        .await
        .unwrap();
    assert_eq!(expect_event(&mut channel).await.id, sent);
    assert!(tokio::time::timeout(QUIET, dms.recv()).await.is_err());

    link.close().await;
}

#[tokio::test]
async fn rejected_publish_is_an_error() {
    let relay = LocalRelay::new(local_builder(free_port()).write_policy(RejectEverything));
    relay.run().await.unwrap();
    let link = open(&relay.url().await.to_string(), Duration::from_secs(1)).await;

    let err = link
        .publish(&channel_message(&Keys::generate(), "nope"))
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::Publish(_)));

    link.close().await;
}

#[tokio::test]
async fn close_ends_stream_and_rejects_further_use() {
    let relay = MockRelay::run().await.unwrap();
    let link = open(&relay.url().await.to_string(), Duration::from_secs(1)).await;
    let mut stream = link.subscribe(&channel_filter()).await.unwrap();
    expect_end_of_backlog(&mut stream).await;

    link.close().await;
    link.close().await;

    assert!(drain(&mut stream).await.is_empty());
    let err = link
        .publish(&channel_message(&Keys::generate(), "late"))
        .await
        .unwrap_err();
    assert_eq!(err, RelayError::Closed);
}

#[tokio::test]
async fn relay_restart_ends_live_stream_without_replay() {
    let port = free_port();
    let relay = LocalRelay::new(local_builder(port));
    relay.run().await.unwrap();
    let url = relay.url().await.to_string();
    let author = Keys::generate();

    let writer = open(&url, Duration::from_secs(1)).await;
    writer.publish(&channel_message(&author, "before")).await.unwrap();
    writer.close().await;

    // Long liveness interval: only the dropped socket can end this stream.
    let link = open(&url, Duration::from_secs(120)).await;
    let mut stream = link.subscribe(&channel_filter()).await.unwrap();
    expect_event(&mut stream).await;
    expect_end_of_backlog(&mut stream).await;

    relay.shutdown();
    drop(relay);

    let mut restarted = None;
    for _ in 0..50 {
        let candidate = LocalRelay::new(local_builder(port));
        if candidate.run().await.is_ok() {
            restarted = Some(candidate);
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    let restarted = restarted.expect("relay restarts on the same port");
    let writer = open(&url, Duration::from_secs(1)).await;
    writer.publish(&channel_message(&author, "after")).await.unwrap();

    let items = drain(&mut stream).await;
    assert!(items.is_empty(), "stream kept going after the drop: {items:?}");

    writer.close().await;
    link.close().await;
    drop(restarted);
}
