//! Probe executors.
//!
//! Four probe kinds share one contract: given a target string, produce
//! `{delay, successful, data}` within the kind's own deadline. Failures
//! are data: they ride back to the coordinator inside the report and are
//! never surfaced as errors to the agent loop.

use std::time::Duration;

use tracing::instrument;

use crate::ProbeKind;

pub mod command;
pub mod exit_group;
pub mod http;
pub mod icmp;
pub mod tcp;
pub mod tls;

pub use exit_group::ExitGroup;

/// Deadline for the TLS handshake that inspects a certificate.
pub const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Echo requests sent per ICMP probe.
pub const ICMP_ECHO_COUNT: u32 = 10;

/// Total deadline for one ICMP probe.
pub const ICMP_DEADLINE: Duration = Duration::from_secs(20);

/// Dial deadline for the TCP probe.
pub const TCP_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Hard ceiling for shell command probes.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);

/// What a probe produced: wall-time delay, verdict, and a payload that is
/// either empty, an error message, or an SSL certificate descriptor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeReport {
    /// Milliseconds with microsecond resolution; seconds for command probes.
    pub delay: f32,
    pub successful: bool,
    pub data: String,
}

impl ProbeReport {
    pub(crate) fn failure(data: impl Into<String>) -> Self {
        Self {
            delay: 0.0,
            successful: false,
            data: data.into(),
        }
    }
}

/// Run one probe of the given kind against `target`.
#[instrument(skip(target), fields(target = %target))]
pub async fn execute(kind: ProbeKind, target: &str) -> ProbeReport {
    match kind {
        ProbeKind::HttpGet => http::probe(target).await,
        ProbeKind::IcmpPing => icmp::probe(target).await,
        ProbeKind::TcpPing => tcp::probe(target).await,
        ProbeKind::Command => command::probe(target).await,
    }
}

/// Elapsed wall time in milliseconds with microsecond resolution.
pub(crate) fn elapsed_ms(start: std::time::Instant) -> f32 {
    start.elapsed().as_micros() as f32 / 1000.0
}
