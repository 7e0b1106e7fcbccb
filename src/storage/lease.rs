//! Lease-with-skip primitive for polling consumers

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Longest lease any store grants; longer requests are clamped.
pub const MAX_LEASE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Time-bounded reservations over a set of keys.
///
/// `acquire` grants leases on the candidates that are free and silently skips
/// the ones somebody else holds, mirroring `FOR UPDATE SKIP LOCKED`. Expired
/// leases count as free, so work held by a consumer that died is picked up
/// again once its lease runs out.
#[derive(Debug)]
pub struct LeaseTable<K> {
    leases: HashMap<K, Instant>,
}

impl<K: Eq + Hash + Clone> LeaseTable<K> {
    pub fn new() -> Self {
        Self {
            leases: HashMap::new(),
        }
    }

    /// Lease every free candidate until `now + duration`, preserving order.
    ///
    /// `duration` is clamped to [`MAX_LEASE`]. A deadline the clock cannot
    /// represent grants nothing.
    pub fn acquire<I>(&mut self, candidates: I, now: Instant, duration: Duration) -> Vec<K>
    where
        I: IntoIterator<Item = K>,
    {
        let Some(until) = now.checked_add(duration.min(MAX_LEASE)) else {
            return Vec::new();
        };
        let mut granted = Vec::new();
        for key in candidates {
            if self.is_held(&key, now) {
                continue;
            }
            self.leases.insert(key.clone(), until);
            granted.push(key);
        }
        granted
    }

    pub fn is_held(&self, key: &K, now: Instant) -> bool {
        self.leases.get(key).is_some_and(|until| *until > now)
    }

    pub fn release(&mut self, key: &K) {
        self.leases.remove(key);
    }

    /// Drop expired leases
    pub fn purge_expired(&mut self, now: Instant) {
        self.leases.retain(|_, until| *until > now);
    }

    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }
}

impl<K: Eq + Hash + Clone> Default for LeaseTable<K> {
    fn default() -> Self {
        Self::new()
    }
}
