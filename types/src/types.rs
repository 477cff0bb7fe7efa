use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt, str::FromStr};

/// `Component` is the sole shared data format between the reconciliation
/// engine and the control plane. Its `spec.config` and `status.providerStatus`
/// fields are opaque JSON to the engine; only the provider named in
/// `spec.providerName` knows their structure. See the componentkit crate
/// for the engine that drives this resource through its lifecycle.
#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "componentkit.io",
    version = "v1",
    kind = "Component",
    plural = "components",
    derive = "PartialEq",
    status = "ComponentStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(printcolumn = "{\"jsonPath\": \".spec.providerName\", \"name\": \"PROVIDER\", \"type\": \"string\" }")]
#[kube(printcolumn = "{\"jsonPath\": \".status.phase\", \"name\": \"PHASE\", \"type\": \"string\" }")]
#[kube(printcolumn = "{\"jsonPath\": \".status.lastUpdated\", \"name\": \"AGE\", \"type\": \"date\" }")]
pub struct ComponentSpec {
    /// Name of the provider that should own this Component. Providers only
    /// ever claim and process Components whose `providerName` matches their
    /// own identity.
    #[serde(rename = "providerName")]
    pub provider_name: String,

    /// Opaque configuration blob. Structure is known only to the named
    /// provider; the engine never inspects it beyond passing it to the
    /// provider's factory.
    pub config: Value,

    /// Maximum duration a Deploy/Upgrade is allowed to run before a
    /// provider's Check methods should treat it as timed out. A duration
    /// string parseable by `parse_duration`.
    #[serde(rename = "deploymentTimeout")]
    pub deployment_timeout: Option<String>,

    /// Maximum duration a Delete is allowed to run before a provider's
    /// CheckDeleted should treat it as timed out. A duration string
    /// parseable by `parse_duration`.
    #[serde(rename = "terminationTimeout")]
    pub termination_timeout: Option<String>,
}

/// Status object for the [`Component`] resource.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ComponentStatus {
    /// The current phase of the Component.
    pub phase: Option<ComponentPhase>,

    /// Provider name that currently owns this Component. Populated only
    /// once claimed; mirrors the presence of the `<providerName>/lifecycle`
    /// finalizer.
    #[serde(rename = "claimedBy")]
    pub claimed_by: Option<String>,

    /// Timestamp of when the Component was claimed.
    #[serde(rename = "claimedAt")]
    pub claimed_at: Option<String>,

    /// Timestamp of when the current phase was entered. Used to compute
    /// elapsed time for timeout enforcement.
    #[serde(rename = "phaseEnteredAt")]
    pub phase_entered_at: Option<String>,

    /// A human-readable message indicating details about why the
    /// Component is in this phase.
    pub message: Option<String>,

    /// Opaque status blob owned by the claiming provider. Round-tripped
    /// byte-equal between reconciles unless the provider rewrites it.
    #[serde(rename = "providerStatus")]
    pub provider_status: Option<Value>,

    /// Derived marker set by upstream when `spec.config` has changed
    /// since the Component was last Ready.
    pub dirty: Option<bool>,

    /// Timestamp of when the status object was last updated.
    #[serde(rename = "lastUpdated")]
    pub last_updated: Option<String>,
}

/// Lifecycle phase of a [`Component`], per the state machine in componentkit.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum ComponentPhase {
    /// The Component first appeared to the controller; not yet claimed.
    Pending,
    /// A provider has added its lifecycle finalizer and recorded ownership.
    Claimed,
    /// A Deploy or Upgrade has been started and not yet reported terminal.
    Deploying,
    /// The external resources are up and no operation is in flight.
    Ready,
    /// The last Deploy/Upgrade reported a permanent error.
    Failed,
    /// Deletion has been accepted and Delete has been invoked.
    Terminating,
    /// Cleanup exhausted its timeout or reported a permanent error; the
    /// provider lifecycle finalizer is retained for inspection.
    TerminationFailed,
}

impl FromStr for ComponentPhase {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(ComponentPhase::Pending),
            "Claimed" => Ok(ComponentPhase::Claimed),
            "Deploying" => Ok(ComponentPhase::Deploying),
            "Ready" => Ok(ComponentPhase::Ready),
            "Failed" => Ok(ComponentPhase::Failed),
            "Terminating" => Ok(ComponentPhase::Terminating),
            "TerminationFailed" => Ok(ComponentPhase::TerminationFailed),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ComponentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentPhase::Pending => write!(f, "Pending"),
            ComponentPhase::Claimed => write!(f, "Claimed"),
            ComponentPhase::Deploying => write!(f, "Deploying"),
            ComponentPhase::Ready => write!(f, "Ready"),
            ComponentPhase::Failed => write!(f, "Failed"),
            ComponentPhase::Terminating => write!(f, "Terminating"),
            ComponentPhase::TerminationFailed => write!(f, "TerminationFailed"),
        }
    }
}
