//! Records learned from the network, with TTL expiry.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::record::{Key, Record};
use crate::scope::{InterfaceIndex, Protocol};

#[derive(Debug, Clone)]
pub(crate) struct CacheEntry {
    pub(crate) interface: InterfaceIndex,
    pub(crate) protocol: Protocol,
    pub(crate) record: Record,
    pub(crate) expires_at: Instant,
}

/// Outcome of feeding a record into the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CacheUpdate {
    /// Not seen before on this interface/protocol.
    Inserted,
    /// Already cached; expiry pushed out.
    Refreshed,
    /// Cache full; record dropped.
    Rejected,
}

#[derive(Debug)]
pub(crate) struct Cache {
    entries: HashMap<Key, Vec<CacheEntry>>,
    len: usize,
    max_entries: usize,
}

impl Cache {
    pub(crate) fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            len: 0,
            max_entries,
        }
    }

    pub(crate) fn update(
        &mut self,
        interface: InterfaceIndex,
        protocol: Protocol,
        record: Record,
        now: Instant,
    ) -> CacheUpdate {
        let expires_at = now + Duration::from_secs(u64::from(record.ttl()));
        let bucket = self.entries.entry(record.key().clone()).or_default();

        if let Some(existing) = bucket
            .iter_mut()
            .find(|e| e.interface == interface && e.protocol == protocol && e.record == record)
        {
            existing.record = existing.record.with_ttl(record.ttl());
            existing.expires_at = expires_at;
            return CacheUpdate::Refreshed;
        }

        if self.len >= self.max_entries {
            if bucket.is_empty() {
                self.entries.remove(record.key());
            }
            return CacheUpdate::Rejected;
        }

        bucket.push(CacheEntry {
            interface,
            protocol,
            record,
            expires_at,
        });
        self.len += 1;
        CacheUpdate::Inserted
    }

    pub(crate) fn remove(
        &mut self,
        interface: InterfaceIndex,
        protocol: Protocol,
        record: &Record,
    ) -> Option<CacheEntry> {
        let bucket = self.entries.get_mut(record.key())?;
        let pos = bucket
            .iter()
            .position(|e| e.interface == interface && e.protocol == protocol && &e.record == record)?;
        let entry = bucket.swap_remove(pos);
        if bucket.is_empty() {
            self.entries.remove(record.key());
        }
        self.len -= 1;
        Some(entry)
    }

    /// Entries whose key is covered by `key` (pattern keys scan everything).
    pub(crate) fn lookup<'a>(&'a self, key: &'a Key) -> Box<dyn Iterator<Item = &'a CacheEntry> + 'a> {
        if key.is_pattern() {
            Box::new(self.iter().filter(move |e| key.matches(e.record.key())))
        } else {
            Box::new(self.entries.get(key).into_iter().flatten())
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values().flatten()
    }

    /// Removes and returns every entry that expired at or before `now`.
    pub(crate) fn expire(&mut self, now: Instant) -> Vec<CacheEntry> {
        let mut expired = Vec::new();
        self.entries.retain(|_, bucket| {
            let mut i = 0;
            while i < bucket.len() {
                if bucket[i].expires_at <= now {
                    expired.push(bucket.swap_remove(i));
                } else {
                    i += 1;
                }
            }
            !bucket.is_empty()
        });
        self.len -= expired.len();
        expired
    }

    pub(crate) fn next_expiry(&self) -> Option<Instant> {
        self.iter().map(|e| e.expires_at).min()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }
}
