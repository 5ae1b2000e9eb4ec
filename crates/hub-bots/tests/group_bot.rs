mod support;

use std::sync::Arc;
use std::time::Duration;

use hub_bots::{Bot, BotProfile, MemoryRelay, RelayBot, StaticReport};
use nostr_sdk::prelude::*;

use support::*;

const REPORT: &str = "Current Temperature in 90291 is 71.3 °F ☀️";

fn group_bot(relay: &MemoryRelay, keys: &Keys, report: &str) -> Arc<RelayBot> {
    Arc::new(RelayBot::new(
        bot_config(BotProfile::Group, keys, fast_retry(5)),
        Arc::new(relay.clone()),
        Arc::new(StaticReport::new(report)),
    ))
}

#[tokio::test]
async fn weather_command_posts_report_to_channel() {
    let relay = MemoryRelay::new();
    let keys = Keys::generate();
    let user = Keys::generate();
    let bot = group_bot(&relay, &keys, REPORT);
    let runner = bot.clone();
    let task = tokio::spawn(async move { runner.start().await });
    wait_ready(bot.as_ref()).await;

    relay.inject(channel_message(&user, &message_json("what's it like out? !weather"), 1_000));

    let published = relay.wait_for_published(1, WAIT).await;
    assert_eq!(published.len(), 1);
    let post = &published[0];
    assert_eq!(post.kind, Kind::ChannelMessage);
    assert_eq!(post.pubkey, keys.public_key());
    assert_eq!(post.content, REPORT);
    assert!(
        post.tags
            .iter()
            .any(|t| t.as_slice() == ["e", CHANNEL, RELAY_URL, "root"])
    );

    // The bot hears its own post; it is plain text and must not loop.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(relay.published().len(), 1);

    bot.stop();
    assert!(task.await.unwrap().is_ok());
}

#[tokio::test]
async fn stored_weather_commands_are_not_answered() {
    let relay = MemoryRelay::new();
    let keys = Keys::generate();
    let user = Keys::generate();
    relay.inject(channel_message(&user, &message_json("!weather"), 100));
    relay.inject(channel_message(&user, "plain chatter", 200));

    let bot = group_bot(&relay, &keys, REPORT);
    let runner = bot.clone();
    let task = tokio::spawn(async move { runner.start().await });
    wait_ready(bot.as_ref()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(relay.published().is_empty());

    bot.stop();
    assert!(task.await.unwrap().is_ok());
}

#[tokio::test]
async fn empty_report_is_not_posted() {
    let relay = MemoryRelay::new();
    let keys = Keys::generate();
    let user = Keys::generate();
    let bot = group_bot(&relay, &keys, "");
    let runner = bot.clone();
    let task = tokio::spawn(async move { runner.start().await });
    wait_ready(bot.as_ref()).await;

    relay.inject(channel_message(&user, &message_json("!weather"), 1_000));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(relay.published().is_empty());

    bot.stop();
    assert!(task.await.unwrap().is_ok());
}

#[tokio::test]
async fn other_channels_are_ignored() {
    let relay = MemoryRelay::new();
    let keys = Keys::generate();
    let user = Keys::generate();
    let bot = group_bot(&relay, &keys, REPORT);
    let runner = bot.clone();
    let task = tokio::spawn(async move { runner.start().await });
    wait_ready(bot.as_ref()).await;

    let other_channel = "ff".repeat(32);
    let elsewhere = EventBuilder::new(Kind::ChannelMessage, message_json("!weather"))
        .tag(Tag::parse(["e", other_channel.as_str(), RELAY_URL, "root"]).unwrap())
        .sign_with_keys(&user)
        .unwrap();
    relay.inject(elsewhere);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(relay.published().is_empty());

    bot.stop();
    assert!(task.await.unwrap().is_ok());
}
