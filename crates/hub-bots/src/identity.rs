use nostr_sdk::prelude::*;

use crate::error::ConfigError;

/// A bot's keypair and the relay it talks to. Immutable once built.
#[derive(Clone, Debug)]
pub struct Identity {
    keys: Keys,
    relay_url: String,
}

impl Identity {
    pub fn new(keys: Keys, relay_url: impl Into<String>) -> Self {
        Self {
            keys,
            relay_url: relay_url.into(),
        }
    }

    /// Build an identity from a secret key (`nsec…` or hex).
    ///
    /// When `expected_public` is given (`npub…` or hex) it must be the public
    /// half of `secret`.
    pub fn from_secret(
        secret: &str,
        expected_public: Option<&str>,
        relay_url: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let secret = secret.trim();
        if secret.is_empty() {
            return Err(ConfigError::Missing("bot secret key"));
        }
        let keys = Keys::parse(secret).map_err(|e| ConfigError::Invalid {
            field: "bot secret key",
            reason: e.to_string(),
        })?;

        if let Some(configured) = expected_public.map(str::trim).filter(|s| !s.is_empty()) {
            let parsed = PublicKey::parse(configured).map_err(|e| ConfigError::Invalid {
                field: "bot public key",
                reason: e.to_string(),
            })?;
            if parsed != keys.public_key() {
                return Err(ConfigError::KeyMismatch {
                    configured: configured.to_string(),
                    derived: npub(&keys.public_key()),
                });
            }
        }

        Ok(Self::new(keys, relay_url))
    }

    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    pub fn public_key(&self) -> PublicKey {
        self.keys.public_key()
    }

    pub fn npub(&self) -> String {
        npub(&self.keys.public_key())
    }

    pub fn relay_url(&self) -> &str {
        &self.relay_url
    }
}

/// Bech32 form of a public key, falling back to hex.
pub fn npub(public_key: &PublicKey) -> String {
    public_key
        .to_bech32()
        .unwrap_or_else(|_| public_key.to_hex())
}

/// Short display handle used for channel participants: `skate-` plus the last
/// three characters of the sender's npub.
pub fn display_name(public_key: &PublicKey) -> String {
    let npub = npub(public_key);
    let suffix: String = {
        let chars: Vec<char> = npub.chars().collect();
        chars[chars.len().saturating_sub(3)..].iter().collect()
    };
    format!("skate-{suffix}")
}
