//! In-memory backend backed by a `HashMap` behind a `Mutex`.

use super::KeyValueBackend;
use async_trait::async_trait;
use refresh_flow_types::traits::Result;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Minimum time between two sweeps of expired entries.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Default)]
struct Entries {
    map: HashMap<String, (String, Instant)>,
    next_sweep: Option<Instant>,
}

impl Entries {
    fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.map.len();
        self.map.retain(|_, (_, deadline)| *deadline > now);
        self.next_sweep = Some(now + SWEEP_INTERVAL);
        before - self.map.len()
    }
}

/// An in-memory [`KeyValueBackend`] for tests and single-node deployments.
///
/// A read past the deadline removes that entry. Writes also sweep out every
/// expired entry, at most once per [`SWEEP_INTERVAL`], so tokens that are
/// never redeemed do not accumulate.
#[derive(Default)]
pub struct MemoryBackend {
    data: Mutex<Entries>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries that have not yet expired.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .map
            .values()
            .filter(|(_, deadline)| *deadline > now)
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries held, expired or not.
    #[must_use]
    pub fn held_entries(&self) -> usize {
        self.lock().map.len()
    }

    /// Removes every expired entry and returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        self.lock().purge_expired(Instant::now())
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl KeyValueBackend for MemoryBackend {
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let now = Instant::now();
        let mut entries = self.lock();
        if entries.next_sweep.is_none_or(|at| now >= at) {
            let purged = entries.purge_expired(now);
            if purged > 0 {
                tracing::debug!(purged, "swept expired in-memory entries");
            }
        }
        entries
            .map
            .insert(key.to_string(), (value.to_string(), now + Duration::from_secs(ttl_secs)));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.lock();
        match entries.map.get(key) {
            Some((value, deadline)) if *deadline > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.map.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.lock().map.remove(key);
        Ok(())
    }
}
