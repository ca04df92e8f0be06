//! Cloud resource teardown
//!
//! The load balancer goes first (the provider cascades its listeners), then
//! every target group. A target group that cannot be deleted keeps the
//! finalizer on the Service: the surviving ids are written back and the pass
//! fails with [`Error::PartialTeardown`] so it is retried.

use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use tracing::{info, instrument, warn};

use super::context::Engine;
use super::state::{LoadBalancerState, TARGET_GROUP_PORTS_ANNOTATION};
use crate::cloud::CloudError;
use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TeardownOutcome {
    /// No state annotations, nothing was ever created
    NothingToDo,
    Completed {
        load_balancer: Option<String>,
        target_groups: usize,
    },
}

/// State to tear down; a corrupt port list must not block deletion
fn teardown_state(svc: &Service) -> Result<LoadBalancerState> {
    match LoadBalancerState::from_service(svc) {
        Ok(state) => Ok(state),
        Err(e) => {
            warn!(error = %e, "Ignoring unreadable port bindings during teardown");
            let mut annotations = svc.annotations().clone();
            annotations.remove(TARGET_GROUP_PORTS_ANNOTATION);
            LoadBalancerState::decode(&annotations, &[])
        }
    }
}

fn gone(result: std::result::Result<(), CloudError>) -> std::result::Result<(), CloudError> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

#[instrument(skip(engine, svc), fields(namespace = %svc.namespace().unwrap_or_default(), name = %svc.name_any()))]
pub async fn teardown(engine: &Engine, svc: &Service) -> Result<TeardownOutcome> {
    let state = teardown_state(svc)?;
    if state.is_empty() {
        info!("No cloud resources recorded, nothing to delete");
        return Ok(TeardownOutcome::NothingToDo);
    }

    if let Some(lb_id) = &state.lb_id {
        gone(engine.cloud.delete_load_balancer(lb_id).await)
            .map_err(|e| Error::Teardown(Box::new(e.into())))?;
        info!(lb_id = %lb_id, "Deleted load balancer");
    }

    let mut remaining = Vec::new();
    let target_groups = state.target_group_ids();
    for tg_id in &target_groups {
        match gone(engine.cloud.delete_target_group(tg_id).await) {
            Ok(()) => info!(target_group = %tg_id, "Deleted target group"),
            Err(e) => {
                if e.is_in_use() {
                    warn!(target_group = %tg_id, "Target group still in use, will retry");
                } else {
                    warn!(target_group = %tg_id, error = %e, "Target group deletion failed");
                }
                remaining.push(tg_id.clone());
            }
        }
    }

    if !remaining.is_empty() {
        let mut left = state.clone();
        left.lb_id = None;
        left.retain_target_groups(&remaining);
        engine
            .store
            .patch_annotations(
                &svc.namespace().unwrap_or_default(),
                &svc.name_any(),
                &left.encode(),
            )
            .await?;
        return Err(Error::PartialTeardown { remaining });
    }

    Ok(TeardownOutcome::Completed {
        load_balancer: state.lb_id.clone(),
        target_groups: target_groups.len(),
    })
}
