//! The Kubernetes surface the engine depends on
//!
//! Every write re-reads the latest object first and only sends what differs, so
//! concurrent edits by other actors are not overwritten. Optimistic concurrency
//! conflicts bubble up and are retried by requeueing.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{LoadBalancerIngress, Node, Service};
use kube::{
    api::{Api, ListParams, Patch, PatchParams},
    Client, ResourceExt,
};
use serde_json::{json, Map, Value};
use tracing::debug;

use super::state::AnnotationPatch;
use crate::error::Result;

pub const FIELD_MANAGER: &str = "ncloud-lb-controller";

#[async_trait]
pub trait ServiceStore: Send + Sync {
    /// `Ok(None)` when the Service no longer exists
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>>;

    /// Apply `changes` against the latest annotations; `None` removes a key
    async fn patch_annotations(
        &self,
        namespace: &str,
        name: &str,
        changes: &AnnotationPatch,
    ) -> Result<()>;

    /// Replace the finalizer list. With `resource_version` set the write is
    /// rejected with a conflict if the object changed since it was read.
    async fn set_finalizers(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
        finalizers: Vec<String>,
    ) -> Result<()>;

    /// Replace `status.loadBalancer.ingress`
    async fn set_ingress(
        &self,
        namespace: &str,
        name: &str,
        ingress: Vec<LoadBalancerIngress>,
    ) -> Result<()>;

    async fn list_nodes(&self) -> Result<Vec<Node>>;
}

/// Keys of `changes` whose value differs from `current`
pub fn annotation_diff(current: &BTreeMap<String, String>, changes: &AnnotationPatch) -> AnnotationPatch {
    changes
        .iter()
        .filter(|(k, v)| current.get(*k) != v.as_ref())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

pub struct KubeServiceStore {
    client: Client,
}

impl KubeServiceStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn services(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ServiceStore for KubeServiceStore {
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        Ok(self.services(namespace).get_opt(name).await?)
    }

    async fn patch_annotations(
        &self,
        namespace: &str,
        name: &str,
        changes: &AnnotationPatch,
    ) -> Result<()> {
        let api = self.services(namespace);
        let Some(latest) = api.get_opt(name).await? else {
            return Ok(());
        };
        let diff = annotation_diff(latest.annotations(), changes);
        if diff.is_empty() {
            return Ok(());
        }

        let annotations: Map<String, Value> = diff
            .into_iter()
            .map(|(k, v)| (k, v.map(Value::String).unwrap_or(Value::Null)))
            .collect();
        let patch = json!({
            "metadata": {
                "annotations": annotations
            }
        });
        api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        debug!(namespace, name, "Patched state annotations");
        Ok(())
    }

    async fn set_finalizers(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
        finalizers: Vec<String>,
    ) -> Result<()> {
        let mut metadata = Map::new();
        metadata.insert("finalizers".to_string(), json!(finalizers));
        if let Some(rv) = resource_version {
            metadata.insert("resourceVersion".to_string(), json!(rv));
        }
        let patch = json!({ "metadata": metadata });
        self.services(namespace)
            .patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn set_ingress(
        &self,
        namespace: &str,
        name: &str,
        ingress: Vec<LoadBalancerIngress>,
    ) -> Result<()> {
        let patch = json!({
            "status": {
                "loadBalancer": {
                    "ingress": ingress
                }
            }
        });
        self.services(namespace)
            .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let api: Api<Node> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }
}

#[cfg(test)]
pub mod fake {
    //! In-memory [`ServiceStore`]

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    use k8s_openapi::api::core::v1::{LoadBalancerStatus, ServiceStatus};
    use kube::core::ErrorResponse;

    use super::*;

    #[derive(Default)]
    pub struct FakeStore {
        services: Mutex<HashMap<(String, String), Service>>,
        nodes: Mutex<Vec<Node>>,
        writes: Mutex<Vec<String>>,
        version: AtomicU64,
    }

    impl FakeStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Store `svc` under a fresh resource version
        pub fn insert_service(&self, mut svc: Service) {
            svc.metadata.resource_version = Some(self.next_version());
            let key = (svc.namespace().unwrap_or_default(), svc.name_any());
            self.services.lock().unwrap().insert(key, svc);
        }

        fn next_version(&self) -> String {
            (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
        }

        pub fn service(&self, namespace: &str, name: &str) -> Option<Service> {
            self.services
                .lock()
                .unwrap()
                .get(&(namespace.to_string(), name.to_string()))
                .cloned()
        }

        pub fn add_node(&self, node: Node) {
            self.nodes.lock().unwrap().push(node);
        }

        /// Writes in order, as `annotations`, `finalizers` or `ingress`
        pub fn writes(&self) -> Vec<String> {
            self.writes.lock().unwrap().clone()
        }

        fn update(&self, namespace: &str, name: &str, kind: &str, f: impl FnOnce(&mut Service)) {
            self.writes.lock().unwrap().push(kind.to_string());
            let mut services = self.services.lock().unwrap();
            let key = (namespace.to_string(), name.to_string());
            if let Some(svc) = services.get_mut(&key) {
                f(svc);
                svc.metadata.resource_version = Some(self.next_version());
                // a deleting object goes away once its last finalizer is removed
                let released = svc.metadata.deletion_timestamp.is_some()
                    && svc.finalizers().is_empty();
                if released {
                    services.remove(&key);
                }
            }
        }
    }

    #[async_trait]
    impl ServiceStore for FakeStore {
        async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
            Ok(self.service(namespace, name))
        }

        async fn patch_annotations(
            &self,
            namespace: &str,
            name: &str,
            changes: &AnnotationPatch,
        ) -> Result<()> {
            let Some(latest) = self.service(namespace, name) else {
                return Ok(());
            };
            let diff = annotation_diff(latest.annotations(), changes);
            if diff.is_empty() {
                return Ok(());
            }
            self.update(namespace, name, "annotations", |svc| {
                let annotations = svc.annotations_mut();
                for (k, v) in diff {
                    match v {
                        Some(v) => annotations.insert(k, v),
                        None => annotations.remove(&k),
                    };
                }
            });
            Ok(())
        }

        async fn set_finalizers(
            &self,
            namespace: &str,
            name: &str,
            resource_version: Option<&str>,
            finalizers: Vec<String>,
        ) -> Result<()> {
            if let (Some(expected), Some(current)) = (resource_version, self.service(namespace, name)) {
                if current.metadata.resource_version.as_deref() != Some(expected) {
                    return Err(kube::Error::Api(ErrorResponse {
                        status: "Failure".to_string(),
                        message: format!("the object has been modified; resourceVersion {expected} is stale"),
                        reason: "Conflict".to_string(),
                        code: 409,
                    })
                    .into());
                }
            }
            self.update(namespace, name, "finalizers", |svc| {
                svc.metadata.finalizers = Some(finalizers);
            });
            Ok(())
        }

        async fn set_ingress(
            &self,
            namespace: &str,
            name: &str,
            ingress: Vec<LoadBalancerIngress>,
        ) -> Result<()> {
            self.update(namespace, name, "ingress", |svc| {
                svc.status = Some(ServiceStatus {
                    load_balancer: Some(LoadBalancerStatus {
                        ingress: Some(ingress),
                    }),
                    ..Default::default()
                });
            });
            Ok(())
        }

        async fn list_nodes(&self) -> Result<Vec<Node>> {
            Ok(self.nodes.lock().unwrap().clone())
        }
    }
}
