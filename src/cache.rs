//! TTL cache for the service page.
//!
//! The cache is an external collaborator in the design: the loader only
//! relies on `get`/`set`/`delete` with a TTL. The in-process
//! implementation below is all the hub needs.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::ServiceItemResponse;

/// The value cached under the service-page key.
pub type ServicePage = HashMap<u64, ServiceItemResponse>;

/// Key/value cache with per-entry TTL, as consumed by the stats loader.
pub trait StatsCache: Send + Sync {
    /// Returns a clone of the entry, or `None` when absent or expired.
    fn get(&self, key: &str) -> Option<ServicePage>;
    fn set(&self, key: &str, value: ServicePage, ttl: Duration);
    fn delete(&self, key: &str);
}

/// In-memory TTL cache. Expired entries are dropped lazily on access.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (Instant, ServicePage)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatsCache for MemoryCache {
    fn get(&self, key: &str) -> Option<ServicePage> {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        match entries.get(key) {
            Some((expires_at, value)) if *expires_at > Instant::now() => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn set(&self, key: &str, value: ServicePage, ttl: Duration) {
        self.entries
            .lock()
            .expect("cache lock poisoned")
            .insert(key.to_string(), (Instant::now() + ttl, value));
    }

    fn delete(&self, key: &str) {
        self.entries.lock().expect("cache lock poisoned").remove(key);
    }
}
