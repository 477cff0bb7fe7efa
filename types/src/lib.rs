mod types;

pub use types::*;

/// Suffix of the finalizer a provider adds to claim a Component. The full
/// finalizer is `<providerName>/lifecycle`; claiming is the act of adding
/// it, and it is only ever removed once `CheckDeleted` reports success.
pub const LIFECYCLE_FINALIZER_SUFFIX: &str = "/lifecycle";

/// Name of the finalizer a higher-level composition controller holds to
/// gate deletion until cross-Component cleanup has completed. Read-only
/// to the engine; never added or removed by it.
pub const COORDINATION_FINALIZER: &str = "composition/coordination";

/// Prefix used to recognize any finalizer, including the coordination
/// finalizer, as belonging to the composition controller rather than to
/// a provider's lifecycle. The engine excludes strings with this prefix
/// when checking whether some *other* provider holds a lifecycle
/// finalizer on a Component (spec §6).
pub const COORDINATION_FINALIZER_PREFIX: &str = "composition.";

/// Annotation that, when its value changes, signals the engine to exit
/// `TerminationFailed` and re-attempt the Terminating sequence. See
/// SPEC_FULL.md's supplemented-features section for the rationale.
pub const RETRY_TERMINATION_ANNOTATION: &str = "componentkit.io/retry-termination";

/// Returns the lifecycle finalizer name for the given provider.
pub fn lifecycle_finalizer(provider_name: &str) -> String {
    format!("{provider_name}{LIFECYCLE_FINALIZER_SUFFIX}")
}

/// Returns the provider name that owns the given finalizer, if it is a
/// lifecycle finalizer (i.e. not the coordination finalizer).
pub fn provider_of_lifecycle_finalizer(finalizer: &str) -> Option<&str> {
    if finalizer.starts_with(COORDINATION_FINALIZER_PREFIX) {
        return None;
    }
    finalizer.strip_suffix(LIFECYCLE_FINALIZER_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_finalizer_roundtrips() {
        let f = lifecycle_finalizer("helm");
        assert_eq!(f, "helm/lifecycle");
        assert_eq!(provider_of_lifecycle_finalizer(&f), Some("helm"));
    }

    #[test]
    fn coordination_finalizer_is_excluded() {
        assert_eq!(
            provider_of_lifecycle_finalizer(COORDINATION_FINALIZER),
            None
        );
    }
}
