//! Controller module for LoadBalancer Service reconciliation
//! This module contains the main controller loop, the reconciliation state
//! machine, and the provisioning engine behind it.

pub mod address;
pub mod backoff;
pub mod context;
mod finalizers;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod naming;
pub mod node_resolver;
pub mod provisioner;
mod reconciler;
pub mod state;
pub mod status;
pub mod store;
pub mod targets;
pub mod teardown;

pub use context::Engine;
pub use finalizers::LB_FINALIZER;
pub use provisioner::{provision, Provisioned, ProvisioningStatus};
pub use reconciler::{
    error_policy, reconcile, requeue_after, run_controller, ControllerState, CONTROLLER_NAME,
    DEFAULT_RECONCILE_TIMEOUT,
};
pub use state::{LoadBalancerState, PortKey, TargetGroupBinding};
pub use store::{KubeServiceStore, ServiceStore};
pub use teardown::{teardown, TeardownOutcome};
