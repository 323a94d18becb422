use core::time::Duration;
use std::{collections::HashMap, sync::Arc, time::Instant};

use parking_lot::Mutex;

use crate::allocator::{BackendError, LeaseStoreSettings};

struct CacheEntry {
    settings: Arc<LeaseStoreSettings>,
    loaded_at: Instant,
}

/// Resolved lease-store settings keyed by node name, each kept for `ttl`.
///
/// Caches the parsed endpoints, credentials, and loaded TLS material so that
/// repeated allocations do not re-read certificate files. Allocation results
/// themselves are never cached: every allocation is a fresh round trip.
pub struct SettingsCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl SettingsCache {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the entry for `node_name` if it has not expired. Expired
    /// entries are evicted.
    pub fn get(&self, node_name: &str) -> Option<Arc<LeaseStoreSettings>> {
        let mut entries = self.entries.lock();
        match entries.get(node_name) {
            Some(entry) if entry.loaded_at.elapsed() < self.ttl => {
                Some(Arc::clone(&entry.settings))
            }
            Some(_) => {
                entries.remove(node_name);
                None
            }
            None => None,
        }
    }

    /// Returns the fresh entry for `node_name`, resolving and storing it with
    /// `resolve` on a miss. Failed resolutions are not stored.
    ///
    /// # Errors
    ///
    /// Propagates the error of `resolve`.
    pub fn get_or_try_insert_with<F>(
        &self,
        node_name: &str,
        resolve: F,
    ) -> Result<Arc<LeaseStoreSettings>, BackendError>
    where
        F: FnOnce() -> Result<LeaseStoreSettings, BackendError>,
    {
        if let Some(settings) = self.get(node_name) {
            return Ok(settings);
        }
        let settings = Arc::new(resolve()?);
        self.entries.lock().insert(
            node_name.to_owned(),
            CacheEntry {
                settings: Arc::clone(&settings),
                loaded_at: Instant::now(),
            },
        );
        Ok(settings)
    }

    pub fn invalidate(&self, node_name: &str) {
        self.entries.lock().remove(node_name);
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SettingsCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TTL)
    }
}

impl core::fmt::Debug for SettingsCache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SettingsCache")
            .field("ttl", &self.ttl)
            .field("len", &self.len())
            .finish()
    }
}
