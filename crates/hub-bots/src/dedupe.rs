use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use nostr_sdk::prelude::EventId;
use parking_lot::Mutex;

/// Default number of event ids remembered per bot.
pub const DEFAULT_SEEN_CAPACITY: usize = 2048;

/// Bounded set of event ids a bot already acted on.
///
/// Shared across reconnects so that a relay replaying the same backlog after a
/// drop does not make the bot answer twice. Capacity 0 disables it.
#[derive(Clone)]
pub struct SeenEvents {
    inner: Option<Arc<Mutex<LruCache<EventId, ()>>>>,
}

impl SeenEvents {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: NonZeroUsize::new(capacity).map(|cap| Arc::new(Mutex::new(LruCache::new(cap)))),
        }
    }

    /// Record `id`. Returns `false` if it was already recorded.
    pub fn insert(&self, id: EventId) -> bool {
        let Some(inner) = &self.inner else {
            return true;
        };
        let mut cache = inner.lock();
        if cache.contains(&id) {
            cache.promote(&id);
            return false;
        }
        cache.put(id, ());
        true
    }

    pub fn contains(&self, id: &EventId) -> bool {
        self.inner
            .as_ref()
            .is_some_and(|inner| inner.lock().contains(id))
    }

    pub fn len(&self) -> usize {
        self.inner.as_ref().map_or(0, |inner| inner.lock().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SeenEvents {
    fn default() -> Self {
        Self::new(DEFAULT_SEEN_CAPACITY)
    }
}
