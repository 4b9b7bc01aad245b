//! The 30-day service page.
//!
//! Historic columns (days 0..=28) are built from the store and memoised in
//! the external cache until the end of the local day; the today column
//! (index 29) and the current counters are overlaid live from the
//! sentinel on every call, so the page is always fresh for today while
//! history is served from cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Local, Utc};
use tracing::{instrument, trace};

use crate::cache::StatsCache;
use crate::storage::MonitorStore;
use crate::ServiceItemResponse;

use super::SentinelHandle;

/// The single cache key this loader uses.
pub const CACHE_KEY_SERVICE_PAGE: &str = "service:page";

/// Days of history shown, today included.
const PAGE_DAYS: usize = 30;

pub struct StatsLoader {
    store: Arc<dyn MonitorStore>,
    cache: Arc<dyn StatsCache>,
    sentinel: SentinelHandle,
}

impl StatsLoader {
    pub fn new(
        store: Arc<dyn MonitorStore>,
        cache: Arc<dyn StatsCache>,
        sentinel: SentinelHandle,
    ) -> Self {
        Self {
            store,
            cache,
            sentinel,
        }
    }

    /// Compose the full service page, keyed by monitor id.
    #[instrument(skip(self))]
    pub async fn load_stats(&self) -> Result<HashMap<u64, ServiceItemResponse>> {
        let now = Local::now();
        let midnight = start_of_local_day(now);

        // The overlay below mutates its copy, so the cached value must be
        // handed out by clone; otherwise totals would compound per call.
        let mut page = match self.cache.get(CACHE_KEY_SERVICE_PAGE) {
            Some(cached) => {
                trace!("serving historic columns from cache");
                cached
            }
            None => {
                let built = self.build_historic(midnight).await?;
                self.cache.set(
                    CACHE_KEY_SERVICE_PAGE,
                    built.clone(),
                    ttl_until_end_of_day(now),
                );
                built
            }
        };

        let live = self.sentinel.live_snapshot().await;
        for monitor in live.monitors {
            let id = monitor.id;
            let entry = page.entry(id).or_default();
            entry.monitor = monitor;

            let today = live.today.get(&id).copied().unwrap_or_default();
            entry.up[PAGE_DAYS - 1] = today.up;
            entry.down[PAGE_DAYS - 1] = today.down;
            entry.delay[PAGE_DAYS - 1] = today.delay;
            entry.total_up += today.up as u64;
            entry.total_down += today.down as u64;
        }
        for (id, up) in live.current_up {
            if let Some(entry) = page.get_mut(&id) {
                entry.current_up = up;
            }
        }
        for (id, down) in live.current_down {
            if let Some(entry) = page.get_mut(&id) {
                entry.current_down = down;
            }
        }

        Ok(page)
    }

    /// Build the 29 historic day columns from persisted history.
    async fn build_historic(
        &self,
        midnight: DateTime<Local>,
    ) -> Result<HashMap<u64, ServiceItemResponse>> {
        let monitors = self.store.monitors().await.context("load monitors")?;
        let start = midnight - Duration::days(PAGE_DAYS as i64 - 1);
        let histories = self
            .store
            .histories_between(start.with_timezone(&Utc), midnight.with_timezone(&Utc))
            .await
            .context("load history range")?;

        let mut page: HashMap<u64, ServiceItemResponse> = monitors
            .into_iter()
            .map(|monitor| {
                (
                    monitor.id,
                    ServiceItemResponse {
                        monitor,
                        ..Default::default()
                    },
                )
            })
            .collect();

        let midnight_utc = midnight.with_timezone(&Utc);
        for history in histories {
            let Some(entry) = page.get_mut(&history.monitor_id) else {
                continue;
            };
            let hours = (midnight_utc - history.created_at).num_hours();
            let day_index = 28 - hours / 24;
            let Ok(day_index) = usize::try_from(day_index) else {
                continue;
            };
            if day_index > 28 {
                continue;
            }

            if history.successful {
                entry.total_up += 1;
                entry.delay[day_index] = (entry.delay[day_index] * entry.up[day_index] as f32
                    + history.delay)
                    / (entry.up[day_index] + 1) as f32;
                entry.up[day_index] += 1;
            } else {
                entry.total_down += 1;
                entry.down[day_index] += 1;
            }
        }

        Ok(page)
    }
}

/// Midnight at the start of `now`'s local day.
pub(crate) fn start_of_local_day(now: DateTime<Local>) -> DateTime<Local> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| midnight.and_local_timezone(Local).earliest())
        .unwrap_or(now)
}

/// How long a cached page stays valid: until the local day ends.
pub(crate) fn ttl_until_end_of_day(now: DateTime<Local>) -> StdDuration {
    let next_midnight = start_of_local_day(now) + Duration::days(1);
    (next_midnight - now).to_std().unwrap_or(StdDuration::ZERO)
}
