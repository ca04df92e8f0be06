//! Finalizer handling for managed Services
//!
//! The finalizer is added before any cloud resource is created and removed only
//! once teardown has released all of them, so a Service can never disappear
//! while it still owns a load balancer or target group.

use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use tracing::info;

use super::store::ServiceStore;
use crate::error::Result;

/// Finalizer name used to protect managed Services
pub const LB_FINALIZER: &str = "naver.k-paas.org/lb-finalizer";

/// Add the finalizer to the latest copy of the Service if missing.
///
/// The write is pinned to the version that was read; a concurrent edit fails
/// it with a conflict and the pass is requeued.
pub async fn add_finalizer(store: &dyn ServiceStore, svc: &Service) -> Result<()> {
    let namespace = svc.namespace().unwrap_or_default();
    let name = svc.name_any();
    let Some(latest) = store.get_service(&namespace, &name).await? else {
        return Ok(());
    };
    if has_finalizer(&latest) {
        return Ok(());
    }

    let mut finalizers: Vec<String> = latest.finalizers().to_vec();
    finalizers.push(LB_FINALIZER.to_string());
    store
        .set_finalizers(&namespace, &name, latest.resource_version().as_deref(), finalizers)
        .await?;
    info!("Added finalizer to Service {}/{}", namespace, name);
    Ok(())
}

/// Remove the finalizer after cleanup is complete
pub async fn remove_finalizer(store: &dyn ServiceStore, svc: &Service) -> Result<()> {
    let namespace = svc.namespace().unwrap_or_default();
    let name = svc.name_any();
    let Some(latest) = store.get_service(&namespace, &name).await? else {
        return Ok(());
    };
    if !has_finalizer(&latest) {
        return Ok(());
    }

    let finalizers: Vec<String> = latest
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != LB_FINALIZER)
        .cloned()
        .collect();
    store
        .set_finalizers(&namespace, &name, latest.resource_version().as_deref(), finalizers)
        .await?;
    info!("Removed finalizer from Service {}/{}", namespace, name);
    Ok(())
}

/// A deletion timestamp means deletion was requested and finalizers are holding it
pub fn is_being_deleted(svc: &Service) -> bool {
    svc.metadata.deletion_timestamp.is_some()
}

pub fn has_finalizer(svc: &Service) -> bool {
    svc.finalizers().iter().any(|f| f == LB_FINALIZER)
}
