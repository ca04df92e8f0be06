//! Main reconciler for LoadBalancer Services
//!
//! Implements the controller pattern using kube-rs runtime. Each pass re-reads
//! the Service and walks a small state machine:
//!
//! - gone: nothing to do
//! - deleting with our finalizer: tear down cloud resources, then release
//! - no longer `LoadBalancer` but still carrying state: tear down and release
//! - finalizer missing: add it and come back
//! - otherwise: provision and project the external address

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Service;
use kube::{
    api::Api,
    client::Client,
    runtime::{
        controller::{Action, Controller},
        watcher::Config,
    },
    ResourceExt,
};
use tracing::{debug, error, info, instrument, warn};

use super::context::Engine;
use super::finalizers::{add_finalizer, has_finalizer, is_being_deleted, remove_finalizer};
use super::provisioner::{provision, ProvisioningStatus};
use super::state::{has_state_annotations, is_load_balancer, LoadBalancerState};
use super::status::{clear_ingress, project_address};
use super::teardown::teardown;
use crate::error::{Error, Result};

/// Name used in logs and metric labels
pub const CONTROLLER_NAME: &str = "service";

/// Default deadline for a single reconcile pass
pub const DEFAULT_RECONCILE_TIMEOUT: Duration = Duration::from_secs(600);

const FINALIZER_ADDED_REQUEUE: Duration = Duration::from_secs(1);
const PROVISIONING_REQUEUE: Duration = Duration::from_secs(30);
const RESYNC_INTERVAL: Duration = Duration::from_secs(300);
const NOT_LEADER_REQUEUE: Duration = Duration::from_secs(15);

/// Shared state for the controller
pub struct ControllerState {
    pub engine: Engine,
    /// Set by the leader election loop; reconciles are skipped while false
    pub is_leader: Arc<AtomicBool>,
    pub reconcile_timeout: Duration,
}

impl ControllerState {
    pub fn new(engine: Engine, is_leader: Arc<AtomicBool>) -> Self {
        Self {
            engine,
            is_leader,
            reconcile_timeout: DEFAULT_RECONCILE_TIMEOUT,
        }
    }

    pub fn with_reconcile_timeout(mut self, timeout: Duration) -> Self {
        self.reconcile_timeout = timeout;
        self
    }
}

/// Main entry point to start the controller
pub async fn run_controller(client: Client, state: Arc<ControllerState>) -> Result<()> {
    let services: Api<Service> = Api::all(client);
    let cancel = state.engine.cancel.clone();

    info!("Starting LoadBalancer Service controller");

    // in-flight backoffs stop on the same signal the controller drains on
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, cancelling in-flight reconciles");
        signal_cancel.cancel();
    });

    Controller::new(services, Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, state)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!("Reconciled: {}", obj),
                Err(e) => warn!("Reconcile error: {:?}", e),
            }
        })
        .await;

    cancel.cancel();
    info!("Controller stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                warn!("Could not install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[instrument(skip(ctx), fields(name = %svc.name_any(), namespace = svc.namespace()))]
pub async fn reconcile(svc: Arc<Service>, ctx: Arc<ControllerState>) -> Result<Action> {
    if !ctx.is_leader.load(Ordering::Relaxed) {
        debug!("Not the leader, skipping reconcile");
        return Ok(Action::requeue(NOT_LEADER_REQUEUE));
    }

    #[cfg(feature = "metrics")]
    let started = std::time::Instant::now();

    let engine = ctx.engine.child();
    let result = match tokio::time::timeout(ctx.reconcile_timeout, reconcile_service(&engine, &svc)).await {
        Ok(result) => result,
        Err(_) => {
            warn!(timeout = ?ctx.reconcile_timeout, "Reconcile exceeded its deadline");
            engine.cancel.cancel();
            Err(Error::Cancelled)
        }
    };

    #[cfg(feature = "metrics")]
    super::metrics::observe_reconcile_duration_seconds(CONTROLLER_NAME, started.elapsed().as_secs_f64());

    result
}

async fn reconcile_service(engine: &Engine, obj: &Service) -> Result<Action> {
    let namespace = obj.namespace().unwrap_or_default();
    let name = obj.name_any();

    let Some(svc) = engine.store.get_service(&namespace, &name).await? else {
        debug!("Service {}/{} no longer exists", namespace, name);
        return Ok(Action::await_change());
    };

    if is_being_deleted(&svc) {
        if !has_finalizer(&svc) {
            return Ok(Action::await_change());
        }
        return cleanup_service(engine, &svc).await;
    }

    if !is_load_balancer(&svc) {
        if has_state_annotations(&svc) || has_finalizer(&svc) {
            return release_service(engine, &svc).await;
        }
        return Ok(Action::await_change());
    }

    if !has_finalizer(&svc) {
        add_finalizer(engine.store.as_ref(), &svc).await?;
        return Ok(Action::requeue(FINALIZER_ADDED_REQUEUE));
    }

    apply_service(engine, &svc).await
}

/// Provision and publish the address
async fn apply_service(engine: &Engine, svc: &Service) -> Result<Action> {
    let namespace = svc.namespace().unwrap_or_default();
    let name = svc.name_any();

    let provisioned = match provision(engine, svc).await {
        Ok(provisioned) => provisioned,
        Err(e) => {
            error!(status = %ProvisioningStatus::Error, error = %e, "Provisioning failed for {}/{}", namespace, name);
            return Err(e);
        }
    };

    match provisioned.status {
        ProvisioningStatus::Pending | ProvisioningStatus::Creating => {
            info!(
                status = %provisioned.status,
                lb_id = %provisioned.lb_id,
                "Load balancer for {}/{} not active yet, requeueing",
                namespace,
                name
            );
            Ok(Action::requeue(PROVISIONING_REQUEUE))
        }
        ProvisioningStatus::Active => {
            if !provisioned.address.is_empty() {
                project_address(engine.store.as_ref(), &namespace, &name, &provisioned.address).await?;
            }
            #[cfg(feature = "metrics")]
            super::metrics::set_managed_load_balancer(&namespace, &name, true);
            info!(
                lb_id = %provisioned.lb_id,
                address = %provisioned.address,
                "Load balancer for {}/{} is active",
                namespace,
                name
            );
            Ok(Action::requeue(RESYNC_INTERVAL))
        }
        ProvisioningStatus::Error => Err(Error::LoadBalancerFailed(provisioned.lb_id)),
    }
}

/// Service is being deleted: release cloud resources, then the finalizer
async fn cleanup_service(engine: &Engine, svc: &Service) -> Result<Action> {
    let namespace = svc.namespace().unwrap_or_default();
    let name = svc.name_any();
    info!("Cleaning up load balancer for {}/{}", namespace, name);

    let outcome = teardown(engine, svc).await?;
    info!(?outcome, "Teardown finished for {}/{}", namespace, name);

    remove_finalizer(engine.store.as_ref(), svc).await?;
    #[cfg(feature = "metrics")]
    super::metrics::set_managed_load_balancer(&namespace, &name, false);
    Ok(Action::await_change())
}

/// Service stopped being a LoadBalancer: tear down and forget it
async fn release_service(engine: &Engine, svc: &Service) -> Result<Action> {
    let namespace = svc.namespace().unwrap_or_default();
    let name = svc.name_any();
    info!("Service {}/{} is no longer of type LoadBalancer, releasing it", namespace, name);

    teardown(engine, svc).await?;

    engine
        .store
        .patch_annotations(&namespace, &name, &LoadBalancerState::default().encode())
        .await?;
    remove_finalizer(engine.store.as_ref(), svc).await?;
    clear_ingress(engine.store.as_ref(), &namespace, &name).await?;

    #[cfg(feature = "metrics")]
    super::metrics::set_managed_load_balancer(&namespace, &name, false);
    Ok(Action::await_change())
}

/// Requeue delay for a failed pass
pub fn requeue_after(error: &Error) -> Duration {
    match error {
        e if e.is_teardown() => Duration::from_secs(30),
        Error::LoadBalancerFailed(_) => Duration::from_secs(60),
        Error::KubeError(kube::Error::Api(resp)) if resp.code == 409 => Duration::from_secs(5),
        e if !e.is_retriable() => Duration::from_secs(60),
        _ => Duration::from_secs(30),
    }
}

/// Error policy for the controller
pub fn error_policy(svc: Arc<Service>, error: &Error, _ctx: Arc<ControllerState>) -> Action {
    error!(
        kind = error.kind(),
        "Reconciliation error for {}/{}: {:?}",
        svc.namespace().unwrap_or_default(),
        svc.name_any(),
        error
    );

    #[cfg(feature = "metrics")]
    super::metrics::inc_reconcile_error(CONTROLLER_NAME, error.kind());

    Action::requeue(requeue_after(error))
}
