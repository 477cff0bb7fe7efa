//! C1 — control-plane adapter: a thin façade over the Component store
//! supporting get, conditional update (optimistic concurrency), a
//! status-subresource update, and predicate-filtered watches.
//!
//! [`ComponentStore`] is deliberately a trait rather than the teacher's
//! direct `Api<T>` + `Patch::Merge`/`PatchParams::apply` calls (see its
//! `has_finalizer`/`add_finalizer`/`remove_finalizer` functions) so the
//! state machine in [`crate::state_machine`] can be driven against an
//! in-memory fake in tests without a live API server.

use async_trait::async_trait;
use componentkit_types::Component;
use kube::{
    api::{Patch, PatchParams, Resource},
    Api, Client,
};
use serde::Serialize;
use std::fmt;

/// Identifies a Component independent of any particular store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComponentKey {
    pub name: String,
    pub namespace: String,
}

impl fmt::Display for ComponentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl ComponentKey {
    pub fn of(component: &Component) -> Self {
        ComponentKey {
            name: component.metadata.name.clone().unwrap_or_default(),
            namespace: component.metadata.namespace.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// Optimistic-concurrency conflict on a spec or status update. Engine
    /// policy (§4.1, §7) is to reread and retry on the next reconcile;
    /// this is never surfaced to the user.
    #[error("conflict updating {0}: resource version is stale")]
    Conflict(ComponentKey),

    #[error("{0} not found")]
    NotFound(ComponentKey),

    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

/// Façade the engine drives every Component mutation through.
#[async_trait]
pub trait ComponentStore: Send + Sync {
    async fn fetch(&self, key: &ComponentKey) -> Result<Option<Component>, AdapterError>;

    /// Patches `metadata`/`spec` fields (e.g. finalizers). Returns the
    /// updated Component, or `AdapterError::Conflict` on a resource
    /// version mismatch.
    async fn update_spec(&self, component: &Component) -> Result<Component, AdapterError>;

    /// Patches the `status` subresource.
    async fn update_status(&self, component: &Component) -> Result<Component, AdapterError>;

    /// Removes the Component record entirely. Only meaningful once all
    /// finalizers have been cleared; the control plane itself performs
    /// the actual garbage collection once the last finalizer is gone, so
    /// this is rarely called directly by the engine.
    async fn delete(&self, key: &ComponentKey) -> Result<(), AdapterError>;
}

/// Name of the field manager used for server-side apply patches.
const MANAGER_NAME: &str = "componentkit";

/// Production [`ComponentStore`] backed by a real `kube::Client`.
#[derive(Clone)]
pub struct KubeComponentStore {
    client: Client,
}

impl KubeComponentStore {
    pub fn new(client: Client) -> Self {
        KubeComponentStore { client }
    }

    fn api(&self, namespace: &str) -> Api<Component> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ComponentStore for KubeComponentStore {
    async fn fetch(&self, key: &ComponentKey) -> Result<Option<Component>, AdapterError> {
        match self.api(&key.namespace).get(&key.name).await {
            Ok(component) => Ok(Some(component)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn update_spec(&self, component: &Component) -> Result<Component, AdapterError> {
        let key = ComponentKey::of(component);
        let patch = Patch::Merge(serde_json::json!({
            "metadata": {
                "finalizers": component.metadata.finalizers,
                "resourceVersion": component.meta().resource_version,
            },
        }));
        apply_merge(&self.api(&key.namespace), &key, &patch, false).await
    }

    async fn update_status(&self, component: &Component) -> Result<Component, AdapterError> {
        let key = ComponentKey::of(component);
        let patch = Patch::Merge(serde_json::json!({
            "status": component.status,
        }));
        apply_merge(&self.api(&key.namespace), &key, &patch, true).await
    }

    async fn delete(&self, key: &ComponentKey) -> Result<(), AdapterError> {
        match self.api(&key.namespace).delete(&key.name, &Default::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

async fn apply_merge<P: Serialize + Sync>(
    api: &Api<Component>,
    key: &ComponentKey,
    patch: &Patch<P>,
    status: bool,
) -> Result<Component, AdapterError> {
    let params = PatchParams::apply(MANAGER_NAME);
    let result = if status {
        api.patch_status(&key.name, &params, patch).await
    } else {
        api.patch(&key.name, &params, patch).await
    };
    match result {
        Ok(component) => Ok(component),
        Err(kube::Error::Api(ae)) if ae.code == 409 => Err(AdapterError::Conflict(key.clone())),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Err(AdapterError::NotFound(key.clone())),
        Err(e) => Err(e.into()),
    }
}

/// Selects Components whose `spec.providerName` matches the given
/// provider identity. Used to scope a [`kube_runtime::Controller`]'s
/// watch to the Components one controller instance is responsible for,
/// mirroring the teacher's one-`Controller`-per-CRD-kind pattern
/// generalized to one `Controller` per provider name against a single
/// shared `Component` CRD.
pub fn handler_predicate(provider_name: &str) -> impl Fn(&Component) -> bool + '_ {
    move |component: &Component| component.spec.provider_name == provider_name
}

#[cfg(any(test, feature = "testing"))]
pub mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory [`ComponentStore`] fake used throughout componentkit's
    /// test suite. Tracks a monotonic `resourceVersion` per key to
    /// exercise the same optimistic-concurrency contract as the real
    /// store.
    #[derive(Default)]
    pub struct FakeComponentStore {
        inner: Mutex<HashMap<ComponentKey, (Component, u64)>>,
    }

    impl FakeComponentStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&self, mut component: Component) -> ComponentKey {
            let key = ComponentKey::of(&component);
            component.meta_mut().resource_version = Some("1".to_owned());
            self.inner.lock().unwrap().insert(key.clone(), (component, 1));
            key
        }

        pub fn get(&self, key: &ComponentKey) -> Option<Component> {
            self.inner.lock().unwrap().get(key).map(|(c, _)| c.clone())
        }
    }

    #[async_trait]
    impl ComponentStore for FakeComponentStore {
        async fn fetch(&self, key: &ComponentKey) -> Result<Option<Component>, AdapterError> {
            Ok(self.get(key))
        }

        async fn update_spec(&self, component: &Component) -> Result<Component, AdapterError> {
            let key = ComponentKey::of(component);
            let mut guard = self.inner.lock().unwrap();
            let (stored, version) = guard
                .get_mut(&key)
                .ok_or_else(|| AdapterError::NotFound(key.clone()))?;
            stored.metadata.finalizers = component.metadata.finalizers.clone();
            stored.metadata.deletion_timestamp = component.metadata.deletion_timestamp.clone();
            *version += 1;
            stored.meta_mut().resource_version = Some(version.to_string());
            Ok(stored.clone())
        }

        async fn update_status(&self, component: &Component) -> Result<Component, AdapterError> {
            let key = ComponentKey::of(component);
            let mut guard = self.inner.lock().unwrap();
            let (stored, version) = guard
                .get_mut(&key)
                .ok_or_else(|| AdapterError::NotFound(key.clone()))?;
            stored.status = component.status.clone();
            *version += 1;
            stored.meta_mut().resource_version = Some(version.to_string());
            Ok(stored.clone())
        }

        async fn delete(&self, key: &ComponentKey) -> Result<(), AdapterError> {
            self.inner.lock().unwrap().remove(key);
            Ok(())
        }
    }
}
