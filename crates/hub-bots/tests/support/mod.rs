#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use hub_bots::{
    Backoff, Bot, BotConfig, BotPlugin, BotProfile, Identity, Inbound, Message, ReplyContext,
    RetryPolicy,
};
use nostr_sdk::prelude::*;
use parking_lot::Mutex;
use tokio::time::Instant;

pub const CHANNEL: &str = "22e4dd5d387b8cf8f96fa159af04edf845d6526149e0e93b8a0f6b23c97af4a2";
pub const RELAY_URL: &str = "wss://relay.example";
pub const WAIT: Duration = Duration::from_secs(3);

pub fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        backoff: Backoff::Fixed(Duration::from_millis(10)),
        reset_after: None,
    }
}

pub fn bot_config(profile: BotProfile, keys: &Keys, retry: RetryPolicy) -> BotConfig {
    BotConfig {
        name: format!("{}-bot", profile.as_str()),
        profile,
        identity: Identity::new(keys.clone(), RELAY_URL),
        channel_id: CHANNEL.to_string(),
        retry,
        max_in_flight: 8,
        seen_capacity: 256,
    }
}

pub fn message_json(content: &str) -> String {
    Message::new(content, "message").to_json()
}

/// Encrypted DM from `from` to `to`, created at `at`.
pub fn dm(from: &Keys, to: &PublicKey, plaintext: &str, at: u64) -> Event {
    let content = nip04::encrypt(from.secret_key(), to, plaintext).unwrap();
    EventBuilder::new(Kind::EncryptedDirectMessage, content)
        .tag(Tag::public_key(*to))
        .custom_created_at(Timestamp::from_secs(at))
        .sign_with_keys(from)
        .unwrap()
}

pub fn channel_message(from: &Keys, plaintext: &str, at: u64) -> Event {
    EventBuilder::new(Kind::ChannelMessage, plaintext)
        .tag(Tag::parse(["e", CHANNEL, RELAY_URL, "root"]).unwrap())
        .custom_created_at(Timestamp::from_secs(at))
        .sign_with_keys(from)
        .unwrap()
}

pub fn decrypt_for(user: &Keys, event: &Event) -> String {
    nip04::decrypt(user.secret_key(), &event.pubkey, &event.content).unwrap()
}

pub fn tagged_p(event: &Event, pubkey: &PublicKey) -> bool {
    event
        .tags
        .iter()
        .any(|t| t.as_slice() == ["p".to_string(), pubkey.to_hex()])
}

pub async fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    done()
}

pub async fn wait_ready(bot: &dyn Bot) {
    assert!(
        wait_until(WAIT, || bot.is_ready()).await,
        "bot {} never became ready",
        bot.name()
    );
}

/// Records message contents in the order plugins saw them.
#[derive(Default)]
pub struct Recorder {
    pub contents: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl BotPlugin for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    async fn on_event(&self, _ctx: &ReplyContext, _event: &Event, inbound: &Inbound) {
        self.contents.lock().push(inbound.message.content.clone());
    }
}

pub fn recorder() -> Arc<Recorder> {
    Arc::new(Recorder::default())
}
