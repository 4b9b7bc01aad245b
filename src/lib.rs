use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod agent;
pub mod cache;
pub mod notify;
pub mod probes;
pub mod rpc;
pub mod sentinel;
pub mod storage;

/// The four probe protocols an agent knows how to execute.
///
/// Discriminants are part of the wire format and must not be reordered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum ProbeKind {
    #[default]
    HttpGet = 1,
    IcmpPing = 2,
    TcpPing = 3,
    Command = 4,
}

impl ProbeKind {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for ProbeKind {
    type Error = UnknownProbeKind;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ProbeKind::HttpGet),
            2 => Ok(ProbeKind::IcmpPing),
            3 => Ok(ProbeKind::TcpPing),
            4 => Ok(ProbeKind::Command),
            other => Err(UnknownProbeKind(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownProbeKind(pub u32);

impl std::fmt::Display for UnknownProbeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown probe kind {}", self.0)
    }
}

impl std::error::Error for UnknownProbeKind {}

/// A monitor describes what to probe and whether state changes alert.
///
/// The catalog lives in the store and is CRUDed externally; the sentinel
/// learns of changes through `on_monitor_update` / `on_monitor_delete`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Monitor {
    pub id: u64,
    pub name: String,
    pub target: String,
    pub kind: ProbeKind,
    pub notify: bool,
}

/// One dispatched probe task. Immutable while in flight.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: u64,
    pub kind: ProbeKind,
    pub data: String,
}

/// The agent's answer to a [`Task`].
///
/// `delay` is milliseconds for HTTP/ICMP/TCP probes but *seconds* for
/// command probes; the unit difference is wire compatibility and is
/// preserved end to end.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskResult {
    pub id: u64,
    pub kind: ProbeKind,
    pub delay: f32,
    pub successful: bool,
    pub data: String,
}

/// A persisted probe result. Written in batches of one full rolling window.
///
/// A `monitor_id` of zero marks an empty window slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorHistory {
    pub monitor_id: u64,
    pub created_at: DateTime<Utc>,
    pub successful: bool,
    pub delay: f32,
    pub data: String,
}

impl Default for MonitorHistory {
    fn default() -> Self {
        Self {
            monitor_id: 0,
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            successful: false,
            delay: 0.0,
            data: String::new(),
        }
    }
}

impl MonitorHistory {
    /// Whether this window slot has been written to.
    pub fn is_filled(&self) -> bool {
        self.monitor_id != 0
    }
}

/// One row of the 30-day service page: per-day columns plus running totals
/// and the live current counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceItemResponse {
    pub monitor: Monitor,
    pub up: [u32; 30],
    pub down: [u32; 30],
    pub delay: [f32; 30],
    pub total_up: u64,
    pub total_down: u64,
    pub current_up: u64,
    pub current_down: u64,
}
