use std::path::Path;

use anyhow::{Context, Result};
use nostr_sdk::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct IdentityFile {
    secret_key_hex: String,
    public_key_hex: String,
}

/// Read the bot identity from `path`, generating and saving one if the file is missing.
pub fn load_or_create_keys(path: &Path) -> Result<Keys> {
    if path.exists() {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read identity {}", path.display()))?;
        let f: IdentityFile = serde_json::from_str(&raw).context("parse identity json")?;
        let keys = Keys::parse(&f.secret_key_hex).context("parse secret key hex")?;
        let stored = PublicKey::parse(&f.public_key_hex).context("parse public key hex")?;
        anyhow::ensure!(
            stored == keys.public_key(),
            "identity {} has a public key that does not match its secret key",
            path.display()
        );
        return Ok(keys);
    }

    let keys = Keys::generate();
    let f = IdentityFile {
        secret_key_hex: keys.secret_key().to_secret_hex(),
        public_key_hex: keys.public_key().to_hex(),
    };

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create dir {}", parent.display()))?;
    }

    std::fs::write(path, format!("{}\n", serde_json::to_string_pretty(&f)?))
        .context("write identity json")?;
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_then_reloads_same_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("identity.json");

        let created = load_or_create_keys(&path).unwrap();
        assert!(path.exists());
        let loaded = load_or_create_keys(&path).unwrap();
        assert_eq!(created.public_key(), loaded.public_key());
    }

    #[test]
    fn rejects_mismatched_public_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        let keys = Keys::generate();
        let other = Keys::generate();
        let f = IdentityFile {
            secret_key_hex: keys.secret_key().to_secret_hex(),
            public_key_hex: other.public_key().to_hex(),
        };
        std::fs::write(&path, serde_json::to_string(&f).unwrap()).unwrap();

        let err = load_or_create_keys(&path).unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn garbage_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(load_or_create_keys(&path).is_err());
    }
}
