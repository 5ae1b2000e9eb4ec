//! Startup configuration and its validation.

use std::time::Duration;

use nostr_sdk::prelude::*;

use crate::bot::BotProfile;
use crate::dedupe::DEFAULT_SEEN_CAPACITY;
use crate::error::ConfigError;
use crate::identity::Identity;
use crate::session::DEFAULT_MAX_IN_FLIGHT;
use crate::supervisor::{Backoff, DEFAULT_RESET_AFTER, DEFAULT_RETRY_DELAY, RetryPolicy};

/// Raw settings as collected from the environment or command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    pub relay_url: String,
    pub secret_key: String,
    /// Optional public key to cross-check against `secret_key`.
    pub public_key: Option<String>,
    pub channel_id: String,
    pub bots: Vec<BotProfile>,
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Cap for exponential backoff; `None` keeps a fixed delay.
    pub retry_max_delay: Option<Duration>,
    pub reset_after: Option<Duration>,
    pub max_in_flight: usize,
    pub seen_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            relay_url: String::new(),
            secret_key: String::new(),
            public_key: None,
            channel_id: String::new(),
            bots: vec![BotProfile::Support, BotProfile::Group],
            max_retries: RetryPolicy::default().max_retries,
            retry_delay: DEFAULT_RETRY_DELAY,
            retry_max_delay: None,
            reset_after: Some(DEFAULT_RESET_AFTER),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            seen_capacity: DEFAULT_SEEN_CAPACITY,
        }
    }
}

/// Validated settings for one bot.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub name: String,
    pub profile: BotProfile,
    pub identity: Identity,
    pub channel_id: String,
    pub retry: RetryPolicy,
    pub max_in_flight: usize,
    pub seen_capacity: usize,
}

impl HubConfig {
    pub fn retry_policy(&self) -> Result<RetryPolicy, ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::Invalid {
                field: "max retries",
                reason: "must be at least 1".to_string(),
            });
        }
        let backoff = match self.retry_max_delay {
            Some(max) if max < self.retry_delay => {
                return Err(ConfigError::Invalid {
                    field: "retry max delay",
                    reason: format!("{max:?} is shorter than the base delay {:?}", self.retry_delay),
                });
            }
            Some(max) => Backoff::Exponential {
                base: self.retry_delay,
                max,
            },
            None => Backoff::Fixed(self.retry_delay),
        };
        Ok(RetryPolicy {
            max_retries: self.max_retries,
            backoff,
            reset_after: self.reset_after,
        })
    }

    /// Check every setting and produce one [`BotConfig`] per requested bot.
    pub fn validate(&self) -> Result<Vec<BotConfig>, ConfigError> {
        let relay_url = self.relay_url.trim();
        if relay_url.is_empty() {
            return Err(ConfigError::Missing("relay url"));
        }
        RelayUrl::parse(relay_url).map_err(|e| ConfigError::Invalid {
            field: "relay url",
            reason: e.to_string(),
        })?;

        let identity =
            Identity::from_secret(&self.secret_key, self.public_key.as_deref(), relay_url)?;

        let channel_id = self.channel_id.trim();
        if channel_id.is_empty() {
            return Err(ConfigError::Missing("channel id"));
        }
        EventId::parse(channel_id).map_err(|e| ConfigError::Invalid {
            field: "channel id",
            reason: e.to_string(),
        })?;

        if self.bots.is_empty() {
            return Err(ConfigError::Missing("bots"));
        }
        if self.max_in_flight == 0 {
            return Err(ConfigError::Invalid {
                field: "max in flight",
                reason: "must be at least 1".to_string(),
            });
        }
        let retry = self.retry_policy()?;

        let mut configs: Vec<BotConfig> = Vec::with_capacity(self.bots.len());
        for profile in &self.bots {
            if configs.iter().any(|c| c.profile == *profile) {
                return Err(ConfigError::Invalid {
                    field: "bots",
                    reason: format!("{} listed more than once", profile.as_str()),
                });
            }
            configs.push(BotConfig {
                name: format!("{}-bot", profile.as_str()),
                profile: *profile,
                identity: identity.clone(),
                channel_id: channel_id.to_string(),
                retry,
                max_in_flight: self.max_in_flight,
                seen_capacity: self.seen_capacity,
            });
        }
        Ok(configs)
    }
}
