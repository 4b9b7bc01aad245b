//! In-memory store for tests and cache-less development runs.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::store::{MonitorStore, StoreResult};
use crate::{Monitor, MonitorHistory};

/// A [`MonitorStore`] backed by vectors. Also records the size of every
/// persisted batch so tests can assert on batching behavior.
#[derive(Debug, Default)]
pub struct MemoryStore {
    monitors: Mutex<Vec<Monitor>>,
    histories: Mutex<Vec<MonitorHistory>>,
    batch_sizes: Mutex<Vec<usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_monitor(&self, monitor: Monitor) {
        let mut monitors = self.monitors.lock().expect("store lock poisoned");
        monitors.retain(|m| m.id != monitor.id);
        monitors.push(monitor);
    }

    pub fn remove_monitor(&self, id: u64) {
        self.monitors
            .lock()
            .expect("store lock poisoned")
            .retain(|m| m.id != id);
    }

    pub fn add_history(&self, history: MonitorHistory) {
        self.histories
            .lock()
            .expect("store lock poisoned")
            .push(history);
    }

    /// Sizes of the batches passed to `create_histories`, in order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes
            .lock()
            .expect("store lock poisoned")
            .clone()
    }

    pub fn history_count(&self) -> usize {
        self.histories.lock().expect("store lock poisoned").len()
    }
}

#[async_trait]
impl MonitorStore for MemoryStore {
    async fn monitors(&self) -> StoreResult<Vec<Monitor>> {
        Ok(self.monitors.lock().expect("store lock poisoned").clone())
    }

    async fn histories_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<MonitorHistory>> {
        Ok(self
            .histories
            .lock()
            .expect("store lock poisoned")
            .iter()
            .filter(|h| h.created_at >= since)
            .cloned()
            .collect())
    }

    async fn histories_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<MonitorHistory>> {
        Ok(self
            .histories
            .lock()
            .expect("store lock poisoned")
            .iter()
            .filter(|h| h.created_at >= start && h.created_at < end)
            .cloned()
            .collect())
    }

    async fn create_histories(&self, batch: &[MonitorHistory]) -> StoreResult<()> {
        self.batch_sizes
            .lock()
            .expect("store lock poisoned")
            .push(batch.len());
        self.histories
            .lock()
            .expect("store lock poisoned")
            .extend_from_slice(batch);
        Ok(())
    }
}
