//! C2 — claim validator. Pure, synchronous functions over a `Component`,
//! mirroring the teacher's `has_finalizer` check and deletion-timestamp
//! ordering ahead of any mutation, generalized from a single hardcoded
//! finalizer string to the `<providerName>/lifecycle` family.

use componentkit_types::{
    provider_of_lifecycle_finalizer, Component, COORDINATION_FINALIZER,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimError {
    /// `spec.providerName` does not match this controller's identity.
    NotForUs,
    /// Some other provider's lifecycle finalizer is already present.
    ClaimedByOther,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitingForCoordination;

/// Returns `Ok(())` if `self_name` may claim `component`, or the reason
/// it may not.
pub fn can_claim(component: &Component, self_name: &str) -> Result<(), ClaimError> {
    if component.spec.provider_name != self_name {
        return Err(ClaimError::NotForUs);
    }
    if let Some(owner) = other_lifecycle_owner(component, self_name) {
        let _ = owner;
        return Err(ClaimError::ClaimedByOther);
    }
    Ok(())
}

/// Returns true iff `<self_name>/lifecycle` is present among the
/// Component's finalizers.
pub fn is_claimed_by_us(component: &Component, self_name: &str) -> bool {
    let finalizer = componentkit_types::lifecycle_finalizer(self_name);
    component
        .metadata
        .finalizers
        .as_ref()
        .map(|fs| fs.iter().any(|f| f == &finalizer))
        .unwrap_or(false)
}

/// Returns `Ok(())` if deletion may proceed (the coordination finalizer
/// is absent), or `Err(WaitingForCoordination)` if it is still present.
pub fn can_delete(component: &Component) -> Result<(), WaitingForCoordination> {
    if has_coordination_finalizer(component) {
        return Err(WaitingForCoordination);
    }
    Ok(())
}

pub fn has_coordination_finalizer(component: &Component) -> bool {
    component
        .metadata
        .finalizers
        .as_ref()
        .map(|fs| fs.iter().any(|f| f == COORDINATION_FINALIZER))
        .unwrap_or(false)
}

/// If some provider other than `self_name` already holds a lifecycle
/// finalizer on this Component, returns that provider's name.
fn other_lifecycle_owner<'a>(component: &'a Component, self_name: &str) -> Option<&'a str> {
    component.metadata.finalizers.as_ref()?.iter().find_map(|f| {
        let owner = provider_of_lifecycle_finalizer(f)?;
        if owner != self_name {
            Some(owner)
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use componentkit_types::Component;
    use kube::api::ObjectMeta;

    fn component_with(provider: &str, finalizers: Vec<&str>) -> Component {
        let mut c = Component::new(
            "c1",
            componentkit_types::ComponentSpec {
                provider_name: provider.to_owned(),
                config: serde_json::json!({}),
                deployment_timeout: None,
                termination_timeout: None,
            },
        );
        c.metadata = ObjectMeta {
            name: Some("c1".to_owned()),
            namespace: Some("default".to_owned()),
            finalizers: Some(finalizers.into_iter().map(str::to_owned).collect()),
            ..Default::default()
        };
        c
    }

    #[test]
    fn unclaimed_component_for_us_can_be_claimed() {
        let c = component_with("helm", vec![]);
        assert_eq!(can_claim(&c, "helm"), Ok(()));
    }

    #[test]
    fn not_for_us_is_rejected() {
        let c = component_with("rds", vec![]);
        assert_eq!(can_claim(&c, "helm"), Err(ClaimError::NotForUs));
    }

    #[test]
    fn claimed_by_other_is_rejected() {
        let c = component_with("helm", vec!["other/lifecycle"]);
        assert_eq!(can_claim(&c, "helm"), Err(ClaimError::ClaimedByOther));
    }

    #[test]
    fn claimed_by_self_is_reclaimable_idempotently() {
        let c = component_with("helm", vec!["helm/lifecycle"]);
        assert_eq!(can_claim(&c, "helm"), Ok(()));
        assert!(is_claimed_by_us(&c, "helm"));
    }

    #[test]
    fn coordination_finalizer_is_never_mistaken_for_a_claim() {
        let c = component_with("helm", vec![COORDINATION_FINALIZER]);
        assert_eq!(can_claim(&c, "helm"), Ok(()));
        assert_eq!(can_delete(&c), Err(WaitingForCoordination));
    }
}
