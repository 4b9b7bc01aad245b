//! The Service Sentinel: single-writer aggregation of probe reports.
//!
//! One actor task owns a [`SentinelEngine`] and is the only writer to its
//! per-monitor maps. Reports arrive on a bounded queue (`dispatch` blocks
//! when it is full; back-pressure is the contract, dropping reports is
//! not), control messages on a second channel, and everything drains in a
//! single `select!`. Reads go through snapshot messages; collaborators
//! (store, cache, notifier) are injected at construction.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, instrument, trace, warn};

use crate::cache::StatsCache;
use crate::notify::Notifier;
use crate::storage::MonitorStore;
use crate::Monitor;

pub mod engine;
pub mod ssl;
pub mod stats;

pub use engine::{
    LiveSnapshot, Notification, ReportData, ReportOutcome, SentinelEngine, ServiceState,
    TodayStats, WINDOW_SIZE,
};
pub use stats::{StatsLoader, CACHE_KEY_SERVICE_PAGE};

/// Capacity of the report queue. Dispatchers block once 200 reports are
/// in flight; this number is part of the back-pressure contract.
pub const REPORT_QUEUE_CAPACITY: usize = 200;

const COMMAND_QUEUE_CAPACITY: usize = 32;

#[derive(Debug)]
enum SentinelCommand {
    ReloadMonitors {
        respond_to: oneshot::Sender<()>,
    },
    RemoveMonitor {
        id: u64,
        respond_to: oneshot::Sender<()>,
    },
    Monitors {
        respond_to: oneshot::Sender<Vec<Monitor>>,
    },
    LiveSnapshot {
        respond_to: oneshot::Sender<LiveSnapshot>,
    },
    Shutdown,
}

/// The sentinel actor. Constructed and spawned via [`ServiceSentinel::spawn`].
pub struct ServiceSentinel {
    engine: SentinelEngine,
    report_rx: mpsc::Receiver<ReportData>,
    command_rx: mpsc::Receiver<SentinelCommand>,
    store: Arc<dyn MonitorStore>,
    cache: Arc<dyn StatsCache>,
    notifier: Arc<dyn Notifier>,
}

impl ServiceSentinel {
    /// Load the catalog, seed today-stats from rows already persisted for
    /// the current local day, and start the worker.
    pub async fn spawn(
        store: Arc<dyn MonitorStore>,
        cache: Arc<dyn StatsCache>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<SentinelHandle> {
        let (report_tx, report_rx) = mpsc::channel(REPORT_QUEUE_CAPACITY);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);

        let mut engine = SentinelEngine::new();
        let monitors = store.monitors().await.context("load monitor catalog")?;
        engine.set_monitors(monitors);

        let now = Local::now();
        let midnight = stats::start_of_local_day(now).with_timezone(&Utc);
        let todays_rows = store
            .histories_since(midnight)
            .await
            .context("load today's history")?;
        engine.seed_today(&todays_rows, &engine::day_tag(now));

        let actor = Self {
            engine,
            report_rx,
            command_rx,
            store,
            cache,
            notifier,
        };
        tokio::spawn(actor.run());

        Ok(SentinelHandle {
            report_tx,
            command_tx,
        })
    }

    #[instrument(skip(self), name = "sentinel_worker")]
    async fn run(mut self) {
        debug!("starting service sentinel");

        loop {
            tokio::select! {
                // Pending reports drain before commands: snapshots taken
                // after a dispatch see that dispatch applied.
                biased;

                Some(report) = self.report_rx.recv() => {
                    self.handle_report(report).await;
                }

                Some(command) = self.command_rx.recv() => {
                    if self.handle_command(command).await {
                        break;
                    }
                }

                else => {
                    warn!("all sentinel channels closed, shutting down");
                    break;
                }
            }
        }

        debug!("service sentinel stopped");
    }

    async fn handle_report(&mut self, report: ReportData) {
        let reporter = report.reporter;
        let outcome = self.engine.process_report(&report, Local::now());

        if let Some(state) = outcome.state {
            trace!(
                monitor = report.result.id,
                reporter,
                successful = report.result.successful,
                %state,
                data = %report.result.data,
                "report processed"
            );
        }

        if let Some(batch) = outcome.batch {
            // A failed batch is logged and forgotten; the window refills
            // and the next batch retries naturally.
            if let Err(err) = self.store.create_histories(&batch).await {
                error!("failed to persist window batch: {err}");
            }
        }

        for notification in outcome.notifications {
            let notifier = Arc::clone(&self.notifier);
            // A slow sink must not stall ingest.
            tokio::spawn(async move {
                notifier
                    .send_notification(&notification.text, notification.urgent)
                    .await;
            });
        }
    }

    /// Returns true when the actor should stop.
    async fn handle_command(&mut self, command: SentinelCommand) -> bool {
        match command {
            SentinelCommand::ReloadMonitors { respond_to } => {
                match self.store.monitors().await {
                    Ok(monitors) => self.engine.set_monitors(monitors),
                    Err(err) => error!("failed to reload monitor catalog: {err}"),
                }
                let _ = respond_to.send(());
            }

            SentinelCommand::RemoveMonitor { id, respond_to } => {
                self.engine.remove_monitor(id);
                self.cache.delete(CACHE_KEY_SERVICE_PAGE);
                let _ = respond_to.send(());
            }

            SentinelCommand::Monitors { respond_to } => {
                let _ = respond_to.send(self.engine.monitors_sorted());
            }

            SentinelCommand::LiveSnapshot { respond_to } => {
                let _ = respond_to.send(self.engine.snapshot());
            }

            SentinelCommand::Shutdown => {
                debug!("received shutdown command");
                return true;
            }
        }
        false
    }
}

/// Cloneable handle to the sentinel actor.
#[derive(Debug, Clone)]
pub struct SentinelHandle {
    report_tx: mpsc::Sender<ReportData>,
    command_tx: mpsc::Sender<SentinelCommand>,
}

impl SentinelHandle {
    /// Enqueue a report. Blocks when the 200-slot queue is full.
    pub async fn dispatch(&self, report: ReportData) {
        if self.report_tx.send(report).await.is_err() {
            warn!("sentinel is gone, report dropped");
        }
    }

    /// Snapshot of the catalog, sorted ascending by id.
    pub async fn monitors(&self) -> Vec<Monitor> {
        let (tx, rx) = oneshot::channel();
        if self
            .command_tx
            .send(SentinelCommand::Monitors { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Re-read the catalog from the store; new monitors get fresh state.
    pub async fn on_monitor_update(&self) {
        let (tx, rx) = oneshot::channel();
        if self
            .command_tx
            .send(SentinelCommand::ReloadMonitors { respond_to: tx })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    /// Remove all per-monitor state for `id` and invalidate the stats cache.
    pub async fn on_monitor_delete(&self, id: u64) {
        let (tx, rx) = oneshot::channel();
        if self
            .command_tx
            .send(SentinelCommand::RemoveMonitor { id, respond_to: tx })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    /// Live per-monitor numbers for the stats loader.
    pub async fn live_snapshot(&self) -> LiveSnapshot {
        let (tx, rx) = oneshot::channel();
        if self
            .command_tx
            .send(SentinelCommand::LiveSnapshot { respond_to: tx })
            .await
            .is_err()
        {
            return LiveSnapshot::default();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn shutdown(&self) {
        let _ = self.command_tx.send(SentinelCommand::Shutdown).await;
    }
}
