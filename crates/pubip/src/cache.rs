use {
    crate::resolver::ResolvedMetadata,
    parking_lot::Mutex,
    std::time::{Duration, Instant},
};

#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub metadata: ResolvedMetadata,
    pub stored_at: Instant,
}

impl CacheEntry {
    // Age of the entry as seen at `now`. A `now` earlier than the store time
    // counts as zero age.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.stored_at)
    }
}

/// Single-slot store for the last resolved metadata.
///
/// The host has one public address, so there is nothing to key by.
/// Readers always get a full snapshot; a write replaces the slot as a whole.
#[derive(Debug, Default)]
pub struct CacheStore {
    slot: Mutex<Option<CacheEntry>>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry only while it is younger than `ttl`.
    /// An expired entry is left in place until the next [Self::put].
    pub fn get(&self, now: Instant, ttl: Duration) -> Option<CacheEntry> {
        self.slot
            .lock()
            .as_ref()
            .filter(|entry| entry.age(now) < ttl)
            .cloned()
    }

    pub fn put(&self, metadata: ResolvedMetadata, now: Instant) {
        *self.slot.lock() = Some(CacheEntry {
            metadata,
            stored_at: now,
        });
    }
}
