//! C6 — deletion coordination. The dual-finalizer protocol between a
//! provider's `<providerName>/lifecycle` finalizer and the external
//! `composition/coordination` finalizer (spec §4.6).

use crate::claim;
use componentkit_types::{Component, ComponentPhase, RETRY_TERMINATION_ANNOTATION};

/// Returns true if the Component has a deletion timestamp and is not yet
/// in the Terminating phase, i.e. this is the reconcile that should
/// transition it into Terminating (subject to `CanDelete`).
pub fn is_terminating_entry(component: &Component) -> bool {
    component.metadata.deletion_timestamp.is_some()
        && component.status.as_ref().and_then(|s| s.phase) != Some(ComponentPhase::Terminating)
}

/// Re-exported for callers that only need the coordination check without
/// pulling in the rest of [`crate::claim`].
pub fn waiting_for_coordination(component: &Component) -> bool {
    claim::can_delete(component).is_err()
}

/// Returns true if an operator has requested a retry out of
/// `TerminationFailed` by changing the retry annotation since the last
/// recorded attempt. `last_seen` is the token the engine persisted
/// (inside `status.message`, by convention `retry-token:<value>`) the
/// last time it observed this annotation.
pub fn retry_requested(component: &Component, last_seen: Option<&str>) -> bool {
    let Some(current) = component
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(RETRY_TERMINATION_ANNOTATION))
    else {
        return false;
    };
    Some(current.as_str()) != last_seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use componentkit_types::{ComponentSpec, ComponentStatus};
    use kube::api::ObjectMeta;

    fn component(deletion_timestamp: bool, phase: Option<ComponentPhase>) -> Component {
        let mut c = Component::new(
            "c1",
            ComponentSpec {
                provider_name: "helm".to_owned(),
                config: serde_json::json!({}),
                deployment_timeout: None,
                termination_timeout: None,
            },
        );
        c.metadata = ObjectMeta {
            name: Some("c1".to_owned()),
            namespace: Some("default".to_owned()),
            deletion_timestamp: deletion_timestamp.then(|| {
                kube::core::Time(chrono::Utc::now())
            }),
            ..Default::default()
        };
        c.status = Some(ComponentStatus {
            phase,
            ..Default::default()
        });
        c
    }

    #[test]
    fn no_deletion_timestamp_is_not_terminating_entry() {
        assert!(!is_terminating_entry(&component(false, Some(ComponentPhase::Ready))));
    }

    #[test]
    fn deletion_timestamp_not_yet_terminating_is_entry() {
        assert!(is_terminating_entry(&component(true, Some(ComponentPhase::Ready))));
    }

    #[test]
    fn already_terminating_is_not_entry_again() {
        assert!(!is_terminating_entry(&component(
            true,
            Some(ComponentPhase::Terminating)
        )));
    }

    #[test]
    fn retry_requires_annotation_change() {
        let mut c = component(true, Some(ComponentPhase::TerminationFailed));
        assert!(!retry_requested(&c, None));
        c.metadata.annotations = Some(
            [(RETRY_TERMINATION_ANNOTATION.to_owned(), "1".to_owned())]
                .into_iter()
                .collect(),
        );
        assert!(retry_requested(&c, None));
        assert!(!retry_requested(&c, Some("1")));
        assert!(retry_requested(&c, Some("0")));
    }
}
