//! C7 — timeout and requeue policy. Three provider-tunable requeue
//! tiers, plus the elapsed-phase-time helper exposed to providers via
//! [`crate::operations::OperationContext`] (spec §4.7).

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Requeue tunables for one provider, supplied at registration time
/// (spec §6 "no CLI/env surface is mandated by the core").
#[derive(Debug, Clone, Copy)]
pub struct RequeuePolicy {
    /// Baseline interval, used while waiting on external coordination.
    pub default_requeue: Duration,
    /// Interval for polling Deploy/Delete progress.
    pub status_check_requeue: Duration,
    /// Back-off interval after a transient failure.
    pub error_requeue: Duration,
}

impl Default for RequeuePolicy {
    fn default() -> Self {
        RequeuePolicy {
            default_requeue: Duration::from_secs(12),
            status_check_requeue: Duration::from_secs(5),
            error_requeue: Duration::from_secs(30),
        }
    }
}

/// Computes the time elapsed since `phase_entered_at`. Returns zero if
/// the timestamp cannot be parsed or is in the future (clock skew),
/// rather than failing the reconcile over a cosmetic timing error —
/// the same defensive posture the teacher's reconcile takes toward
/// missing/malformed fields (`unwrap_or_default()` on namespace,
/// `Option`-gated checks throughout `governance.rs`) instead of
/// propagating a hard error.
pub fn elapsed_since(phase_entered_at: Option<&str>) -> Duration {
    let Some(raw) = phase_entered_at else {
        return Duration::ZERO;
    };
    let Ok(entered) = raw.parse::<DateTime<Utc>>() else {
        return Duration::ZERO;
    };
    (Utc::now() - entered).to_std().unwrap_or(Duration::ZERO)
}

/// Parses a Component-scoped timeout string (`spec.deploymentTimeout` /
/// `spec.terminationTimeout`) if present.
pub fn parse_timeout(raw: Option<&str>) -> Option<Duration> {
    raw.and_then(|s| parse_duration::parse(s).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_timestamp_is_zero_elapsed() {
        assert_eq!(elapsed_since(None), Duration::ZERO);
    }

    #[test]
    fn unparseable_timestamp_is_zero_elapsed() {
        assert_eq!(elapsed_since(Some("not-a-date")), Duration::ZERO);
    }

    #[test]
    fn recent_timestamp_has_small_elapsed() {
        let now = Utc::now().to_rfc3339();
        let elapsed = elapsed_since(Some(&now));
        assert!(elapsed < Duration::from_secs(5));
    }
}
