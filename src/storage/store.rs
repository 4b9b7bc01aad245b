//! The persistence contract the sentinel and stats loader consume.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;

use crate::{Monitor, MonitorHistory};

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by store implementations.
#[derive(Debug)]
pub enum StoreError {
    ConnectionFailed(String),
    MigrationFailed(String),
    QueryFailed(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::ConnectionFailed(msg) => {
                write!(f, "failed to connect to store: {msg}")
            }
            StoreError::MigrationFailed(msg) => write!(f, "store migration failed: {msg}"),
            StoreError::QueryFailed(msg) => write!(f, "store query failed: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::QueryFailed(err.to_string())
    }
}

/// Relational store for the monitor catalog and probe history.
///
/// Implementations must be `Send + Sync`; the sentinel calls them from a
/// single worker task, the stats loader from request handlers.
#[async_trait]
pub trait MonitorStore: Send + Sync {
    /// The full monitor catalog, in no particular order.
    async fn monitors(&self) -> StoreResult<Vec<Monitor>>;

    /// History rows created at or after `since`.
    async fn histories_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<MonitorHistory>>;

    /// History rows with `start <= created_at < end`.
    async fn histories_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<MonitorHistory>>;

    /// Persist one window batch atomically.
    async fn create_histories(&self, batch: &[MonitorHistory]) -> StoreResult<()>;
}
