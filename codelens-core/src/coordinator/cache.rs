//! Result cache keyed by fingerprint
//!
//! Entries are never evicted on read; a stale entry is simply ignored.
//! [`ResultCache::purge_older_than`] is there for hosts that want periodic cleanup.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::types::{Fingerprint, ResultEnvelope};

struct CacheEntry {
    envelope: ResultEnvelope,
    stored_at: Instant,
}

#[derive(Default)]
pub struct ResultCache {
    entries: Mutex<HashMap<Fingerprint, CacheEntry>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached envelope if it was stored less than `window` ago.
    pub fn get_fresh(&self, fingerprint: &Fingerprint, window: Duration) -> Option<ResultEnvelope> {
        let entries = self.entries.lock().unwrap();
        entries
            .get(fingerprint)
            .filter(|entry| entry.stored_at.elapsed() < window)
            .map(|entry| entry.envelope.clone())
    }

    pub fn insert(&self, fingerprint: Fingerprint, envelope: ResultEnvelope) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            fingerprint,
            CacheEntry {
                envelope,
                stored_at: Instant::now(),
            },
        );
    }

    /// Drop entries older than `age`. Returns how many were removed.
    pub fn purge_older_than(&self, age: Duration) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, entry| entry.stored_at.elapsed() < age);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
