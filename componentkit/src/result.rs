//! C5 — result/error model. Every `Operations` method returns one of
//! these tagged unions. The engine never inspects provider status bytes;
//! it only persists them (spec §4.5).

use serde_json::Value;

/// Outcome of `Deploy`, `Upgrade`, or `Delete`.
#[derive(Debug, Clone)]
pub enum ActionResult {
    /// External work was kicked off (or already satisfied). The engine
    /// persists `updated_status` and the optional message, then requeues
    /// at the `statusCheck` interval to poll for completion.
    Success {
        updated_status: Value,
        details: Option<String>,
    },
    /// The provider reported a retryable failure (e.g. network hiccup,
    /// throttling). Phase is left unchanged; the engine requeues at the
    /// `errorRequeue` interval.
    TransientError { updated_status: Value, err: String },
    /// The provider reported a terminal failure. The engine moves the
    /// Component to `Failed` (deploy path) or `TerminationFailed` (delete
    /// path) and does not requeue.
    PermanentError { updated_status: Value, err: String },
}

/// Outcome of `CheckApplied` or `CheckDeleted`. Check methods are
/// non-blocking probes and must not retry internally (spec §4.4).
#[derive(Debug, Clone)]
pub enum CheckResult {
    /// The operation being checked has completed successfully.
    Success {
        updated_status: Value,
        details: Option<String>,
    },
    /// The operation being checked is still running. The engine persists
    /// `updated_status` and requeues at the `statusCheck` interval
    /// without changing phase.
    InProgress {
        updated_status: Value,
        details: Option<String>,
    },
    /// The underlying operation is retryably stuck (e.g. a transient
    /// probe error). Phase is left unchanged; requeues at `errorRequeue`.
    TransientError { updated_status: Value, err: String },
    /// The operation being checked has permanently failed (e.g. the
    /// deployment timeout was exceeded).
    PermanentError { updated_status: Value, err: String },
}
