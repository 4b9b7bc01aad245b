//! The sentinel's state machine, free of I/O.
//!
//! One [`SentinelEngine`] owns every per-monitor map. Feeding it a report
//! yields a [`ReportOutcome`] describing what the shell around it must do:
//! persist a full window batch, emit notifications, or nothing. Keeping
//! the transitions pure makes day rollovers and certificate clocks
//! testable without an actual midnight.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Local, Utc};
use serde::Serialize;

use crate::{Monitor, MonitorHistory, TaskResult};

use super::ssl;

/// Rolling window capacity per monitor; also the persistence batch size.
pub const WINDOW_SIZE: usize = 30;

/// A probe result paired with the reporting agent's session id.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportData {
    pub result: TaskResult,
    pub reporter: u64,
}

/// Aggregate counters for the current local calendar day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TodayStats {
    pub up: u32,
    pub down: u32,
    /// Running arithmetic mean of successful probes' delays.
    pub delay: f32,
}

/// Coarse health derived from the rolling window's success percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServiceState {
    NoData,
    Good,
    LowAvailability,
    Fault,
}

impl ServiceState {
    pub fn from_up_percent(percent: u64) -> Self {
        match percent {
            0 => ServiceState::NoData,
            p if p > 95 => ServiceState::Good,
            p if p > 80 => ServiceState::LowAvailability,
            _ => ServiceState::Fault,
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ServiceState::NoData => "无数据",
            ServiceState::Good => "良好",
            ServiceState::LowAvailability => "低可用",
            ServiceState::Fault => "故障",
        };
        f.write_str(label)
    }
}

/// A message for the notification sink.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub text: String,
    pub urgent: bool,
}

/// Everything a processed report asks the surrounding actor to do.
#[derive(Debug, Default, PartialEq)]
pub struct ReportOutcome {
    /// Bucketed state after this report; `None` when the report was dropped.
    pub state: Option<ServiceState>,
    /// A full window to persist, produced every [`WINDOW_SIZE`] reports.
    pub batch: Option<Vec<MonitorHistory>>,
    pub notifications: Vec<Notification>,
}

/// Read-only view of the live per-monitor numbers, for the stats loader.
#[derive(Debug, Clone, Default)]
pub struct LiveSnapshot {
    /// Catalog sorted ascending by id.
    pub monitors: Vec<Monitor>,
    pub today: HashMap<u64, TodayStats>,
    pub current_up: HashMap<u64, u64>,
    pub current_down: HashMap<u64, u64>,
}

#[derive(Debug, Default)]
pub struct SentinelEngine {
    monitors: BTreeMap<u64, Monitor>,
    today: HashMap<u64, TodayStats>,
    window: HashMap<u64, Vec<MonitorHistory>>,
    cursor: HashMap<u64, usize>,
    latest_day: HashMap<u64, String>,
    last_status: HashMap<u64, ServiceState>,
    current_up: HashMap<u64, u64>,
    current_down: HashMap<u64, u64>,
    ssl_cache: HashMap<u64, String>,
}

/// The locale-independent day tag; stable per local calendar day.
pub(crate) fn day_tag(now: DateTime<Local>) -> String {
    now.format("%Y-%m-%d").to_string()
}

impl SentinelEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the catalog. New monitors get a fresh window and zeroed
    /// today-stats; state for ids still present is preserved.
    pub fn set_monitors(&mut self, monitors: Vec<Monitor>) {
        self.monitors = monitors.into_iter().map(|m| (m.id, m)).collect();
        for id in self.monitors.keys() {
            self.window
                .entry(*id)
                .or_insert_with(|| vec![MonitorHistory::default(); WINDOW_SIZE]);
            self.today.entry(*id).or_default();
        }
    }

    /// Drop every per-monitor entry for `id`.
    pub fn remove_monitor(&mut self, id: u64) {
        self.monitors.remove(&id);
        self.today.remove(&id);
        self.window.remove(&id);
        self.cursor.remove(&id);
        self.latest_day.remove(&id);
        self.last_status.remove(&id);
        self.current_up.remove(&id);
        self.current_down.remove(&id);
        self.ssl_cache.remove(&id);
    }

    pub fn monitors_sorted(&self) -> Vec<Monitor> {
        self.monitors.values().cloned().collect()
    }

    /// Rebuild today-stats from already-persisted rows (startup) and stamp
    /// every monitor with the given day tag.
    pub fn seed_today(&mut self, histories: &[MonitorHistory], day: &str) {
        let mut delay_sums: HashMap<u64, f32> = HashMap::new();
        for history in histories {
            if !self.monitors.contains_key(&history.monitor_id) {
                continue;
            }
            let today = self.today.entry(history.monitor_id).or_default();
            if history.successful {
                today.up += 1;
                *delay_sums.entry(history.monitor_id).or_default() += history.delay;
            } else {
                today.down += 1;
            }
        }
        for (id, sum) in delay_sums {
            if let Some(today) = self.today.get_mut(&id) {
                if today.up > 0 {
                    today.delay = sum / today.up as f32;
                }
            }
        }
        for id in self.monitors.keys() {
            self.latest_day.insert(*id, day.to_string());
        }
    }

    pub fn snapshot(&self) -> LiveSnapshot {
        LiveSnapshot {
            monitors: self.monitors_sorted(),
            today: self.today.clone(),
            current_up: self.current_up.clone(),
            current_down: self.current_down.clone(),
        }
    }

    /// Ingest one report. The sole mutation path for per-monitor state.
    pub fn process_report(&mut self, report: &ReportData, now: DateTime<Local>) -> ReportOutcome {
        let mut outcome = ReportOutcome::default();
        let id = report.result.id;
        let Some(monitor) = self.monitors.get(&id).cloned() else {
            // Unknown monitor: dropped, the catch-all of the pipeline.
            return outcome;
        };

        // Day rollover: today-stats and current counters reset, the window
        // deliberately does not.
        let today_tag = day_tag(now);
        if self.latest_day.get(&id) != Some(&today_tag) {
            self.latest_day.insert(id, today_tag);
            self.current_up.insert(id, 0);
            self.current_down.insert(id, 0);
            self.today.insert(id, TodayStats::default());
        }

        let today = self.today.entry(id).or_default();
        if report.result.successful {
            today.delay = (today.delay * today.up as f32 + report.result.delay)
                / (today.up + 1) as f32;
            today.up += 1;
        } else {
            today.down += 1;
        }

        let history = MonitorHistory {
            monitor_id: id,
            created_at: now.with_timezone(&Utc),
            successful: report.result.successful,
            delay: report.result.delay,
            data: report.result.data.clone(),
        };
        let window = self
            .window
            .entry(id)
            .or_insert_with(|| vec![MonitorHistory::default(); WINDOW_SIZE]);
        let cursor = self.cursor.entry(id).or_insert(0);
        window[*cursor] = history;
        *cursor += 1;

        if *cursor == WINDOW_SIZE {
            *cursor = 0;
            outcome.batch = Some(window.clone());
        }

        // Recount from the window rather than trusting increments.
        let mut up = 0u64;
        let mut down = 0u64;
        for slot in window.iter().filter(|slot| slot.is_filled()) {
            if slot.successful {
                up += 1;
            } else {
                down += 1;
            }
        }
        self.current_up.insert(id, up);
        self.current_down.insert(id, down);

        let up_percent = if up + down > 0 {
            up * 100 / (up + down)
        } else {
            0
        };
        let state = ServiceState::from_up_percent(up_percent);
        outcome.state = Some(state);

        if state == ServiceState::Fault || self.last_status.get(&id) != Some(&state) {
            // The very first transition stays quiet unless it is already a
            // fault; monitors that never alerted before shouldn't page on
            // their maiden "all good" observation.
            let need_notify = (self.last_status.contains_key(&id) || state == ServiceState::Fault)
                && monitor.notify;
            self.last_status.insert(id, state);
            if need_notify {
                outcome.notifications.push(Notification {
                    text: format!("服务监控：{} 服务状态：{}", monitor.name, state),
                    urgent: true,
                });
            }
        }

        let cert = ssl::check(
            self.ssl_cache.get(&id).map(String::as_str),
            &report.result.data,
            now,
        );
        if let Some(seed) = cert.seed {
            self.ssl_cache.insert(id, seed);
        }
        if let Some(alarm) = cert.alarm {
            if monitor.notify {
                outcome.notifications.push(Notification {
                    text: format!("服务监控：{} {}", monitor.name, alarm),
                    urgent: true,
                });
            }
        }

        outcome
    }
}
