//! SSL certificate alarm rules.
//!
//! Reports carry either an `SSL证书错误：` prefixed error or an
//! `"<issuer>|<not_after>"` descriptor. The sentinel keeps the first
//! descriptor it saw per monitor and alarms on imminent expiry or on a
//! certificate change. Transient network failures are suppressed so a
//! flaky path does not page anyone.

use chrono::{DateTime, Duration, FixedOffset, Local};

use crate::probes::http::SSL_ERROR_PREFIX;

/// Error suffixes treated as transient and never alarmed on.
const TRANSIENT_SUFFIXES: [&str; 3] = ["timeout", "EOF", "timed out"];

/// Certificates expiring within this many days trigger the expiry alarm.
const EXPIRY_HORIZON_DAYS: i64 = 7;

#[derive(Debug, Default, PartialEq)]
pub(crate) struct CertCheckOutcome {
    /// Descriptor to store as the monitor's baseline (first observation).
    pub seed: Option<String>,
    /// Alarm text, if any.
    pub alarm: Option<String>,
}

/// Evaluate one report's `data` against the cached descriptor.
pub(crate) fn check(cached: Option<&str>, data: &str, now: DateTime<Local>) -> CertCheckOutcome {
    let mut outcome = CertCheckOutcome::default();

    if data.starts_with(SSL_ERROR_PREFIX) {
        if !TRANSIENT_SUFFIXES
            .iter()
            .any(|suffix| data.ends_with(suffix))
        {
            outcome.alarm = Some(data.to_string());
        }
        return outcome;
    }

    let Some((new_issuer, new_raw)) = data.split_once('|') else {
        return outcome;
    };
    let Some(new_expiry) = parse_not_after(new_raw) else {
        return outcome;
    };

    // First observation seeds the baseline; comparisons below then run
    // against the seeded value, so no change alarm fires.
    let baseline = match cached {
        Some(existing) => existing,
        None => {
            outcome.seed = Some(data.to_string());
            data
        }
    };

    if new_expiry.with_timezone(&Local) < now + Duration::days(EXPIRY_HORIZON_DAYS) {
        outcome.alarm = Some(format!(
            "SSL证书将在七天内过期，过期时间：{}。",
            format_expiry(new_expiry)
        ));
    }

    let (old_issuer, old_raw) = baseline.split_once('|').unwrap_or((baseline, ""));
    let old_expiry = parse_not_after(old_raw);
    if old_issuer != new_issuer && old_expiry != Some(new_expiry) {
        outcome.alarm = Some(format!(
            "SSL证书变更，旧：{}, {} 过期；新：{}, {} 过期。",
            old_issuer,
            old_expiry.map(format_expiry).unwrap_or_default(),
            new_issuer,
            format_expiry(new_expiry)
        ));
    }

    outcome
}

/// Parse a not-after stamp like `2099-01-01 00:00:00 +0000 UTC`.
///
/// The trailing zone abbreviation is informational only; the numeric
/// offset decides.
pub(crate) fn parse_not_after(raw: &str) -> Option<DateTime<FixedOffset>> {
    let trimmed = raw.trim();
    let candidate = match trimmed.rsplit_once(' ') {
        Some((head, tail)) if !tail.is_empty() && tail.chars().all(|c| c.is_ascii_alphabetic()) => {
            head
        }
        _ => trimmed,
    };
    DateTime::parse_from_str(candidate, "%Y-%m-%d %H:%M:%S %z").ok()
}

fn format_expiry(at: DateTime<FixedOffset>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}
