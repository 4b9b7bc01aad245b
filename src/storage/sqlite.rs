//! SQLite store.
//!
//! Embedded, WAL-journaled, pooled. Suitable for a single hub watching up
//! to a few hundred monitors; swap the trait implementation for anything
//! bigger.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument};

use super::store::{MonitorStore, StoreError, StoreResult};
use crate::{Monitor, MonitorHistory, ProbeKind};

pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (creating if missing) and migrate the database at `path`.
    #[instrument(skip_all)]
    pub async fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_string_lossy().to_string();
        info!("opening SQLite store at {path}");

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|err| StoreError::ConnectionFailed(err.to_string()))?;

        debug!("running migrations");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|err| StoreError::MigrationFailed(err.to_string()))?;

        Ok(Self { pool })
    }

    /// Insert a monitor, returning its assigned id. Catalog mutation is
    /// external tooling territory; the sentinel itself never calls this.
    pub async fn create_monitor(&self, monitor: &Monitor) -> StoreResult<u64> {
        let result = sqlx::query(
            "INSERT INTO monitors (name, target, kind, notify) VALUES (?, ?, ?, ?)",
        )
        .bind(&monitor.name)
        .bind(&monitor.target)
        .bind(monitor.kind.as_u32() as i64)
        .bind(monitor.notify)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid() as u64)
    }

    pub async fn delete_monitor(&self, id: u64) -> StoreResult<()> {
        sqlx::query("DELETE FROM monitors WHERE id = ?")
            .bind(id as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn monitor_from_row(row: &SqliteRow) -> Monitor {
        let kind_raw: i64 = row.get("kind");
        Monitor {
            id: row.get::<i64, _>("id") as u64,
            name: row.get("name"),
            target: row.get("target"),
            kind: ProbeKind::try_from(kind_raw as u32).unwrap_or_default(),
            notify: row.get("notify"),
        }
    }

    fn history_from_row(row: &SqliteRow) -> MonitorHistory {
        let millis: i64 = row.get("created_at");
        MonitorHistory {
            monitor_id: row.get::<i64, _>("monitor_id") as u64,
            created_at: DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now),
            successful: row.get("successful"),
            delay: row.get::<f64, _>("delay") as f32,
            data: row.get("data"),
        }
    }
}

#[async_trait]
impl MonitorStore for SqliteStore {
    async fn monitors(&self) -> StoreResult<Vec<Monitor>> {
        let rows = sqlx::query("SELECT id, name, target, kind, notify FROM monitors")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(Self::monitor_from_row).collect())
    }

    async fn histories_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<MonitorHistory>> {
        let rows = sqlx::query(
            "SELECT monitor_id, created_at, successful, delay, data \
             FROM monitor_histories WHERE created_at >= ? ORDER BY created_at",
        )
        .bind(since.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(Self::history_from_row).collect())
    }

    async fn histories_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<MonitorHistory>> {
        let rows = sqlx::query(
            "SELECT monitor_id, created_at, successful, delay, data \
             FROM monitor_histories \
             WHERE created_at >= ? AND created_at < ? ORDER BY created_at",
        )
        .bind(start.timestamp_millis())
        .bind(end.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(Self::history_from_row).collect())
    }

    #[instrument(skip_all, fields(count = batch.len()))]
    async fn create_histories(&self, batch: &[MonitorHistory]) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for history in batch {
            sqlx::query(
                "INSERT INTO monitor_histories \
                 (monitor_id, created_at, successful, delay, data) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(history.monitor_id as i64)
            .bind(history.created_at.timestamp_millis())
            .bind(history.successful)
            .bind(history.delay as f64)
            .bind(&history.data)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!("persisted history batch");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn temp_store() -> (SqliteStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("vigil.db")).await.unwrap();
        (store, dir)
    }

    fn sample_monitor() -> Monitor {
        Monitor {
            id: 0,
            name: "web".to_string(),
            target: "https://example.com".to_string(),
            kind: ProbeKind::HttpGet,
            notify: true,
        }
    }

    #[tokio::test]
    async fn monitor_round_trip() {
        let (store, _dir) = temp_store().await;
        let id = store.create_monitor(&sample_monitor()).await.unwrap();
        assert!(id > 0);

        let monitors = store.monitors().await.unwrap();
        assert_eq!(monitors.len(), 1);
        assert_eq!(monitors[0].id, id);
        assert_eq!(monitors[0].kind, ProbeKind::HttpGet);
        assert!(monitors[0].notify);

        store.delete_monitor(id).await.unwrap();
        assert!(store.monitors().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn history_batch_and_range_queries() {
        let (store, _dir) = temp_store().await;
        let base = Utc::now();

        let batch: Vec<MonitorHistory> = (0..30)
            .map(|i| MonitorHistory {
                monitor_id: 1,
                created_at: base - Duration::hours(i),
                successful: i % 3 != 0,
                delay: 10.0 + i as f32,
                data: String::new(),
            })
            .collect();
        store.create_histories(&batch).await.unwrap();

        let recent = store
            .histories_since(base - Duration::hours(5))
            .await
            .unwrap();
        assert_eq!(recent.len(), 6);

        let ranged = store
            .histories_between(base - Duration::hours(10), base - Duration::hours(5))
            .await
            .unwrap();
        assert_eq!(ranged.len(), 5);

        // Timestamps survive the millisecond round trip.
        assert!(recent
            .iter()
            .any(|h| (h.created_at - base).num_milliseconds().abs() < 2));
    }
}
