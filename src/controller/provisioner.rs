//! Load balancer provisioning
//!
//! Creation order is target groups, load balancer, listeners. Each step is
//! resumable: target group ids are persisted one by one as they are obtained,
//! and name collisions left by an interrupted pass are resolved by adopting the
//! existing resource.

use std::fmt;

use k8s_openapi::api::core::v1::{Service, ServicePort};
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use super::address::{external_address, external_address_with_retry, fallback_address, wait_until_ready};
use super::context::Engine;
use super::naming::{load_balancer_name, target_group_name, target_group_port_name};
use super::node_resolver::resolve_worker_instances;
use super::state::{service_ports, LoadBalancerState, PortKey};
use super::targets::{register_nodes, sync_targets};
use crate::cloud::{CreateListener, CreateLoadBalancer, CreateTargetGroup, ListenerProtocol};
use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProvisioningStatus {
    /// Resources exist but the address is not known yet
    Pending,
    /// Load balancer created but did not settle within the readiness window
    Creating,
    Active,
    Error,
}

impl fmt::Display for ProvisioningStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProvisioningStatus::Pending => "PENDING",
            ProvisioningStatus::Creating => "CREATING",
            ProvisioningStatus::Active => "ACTIVE",
            ProvisioningStatus::Error => "ERROR",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Provisioned {
    pub status: ProvisioningStatus,
    pub lb_id: String,
    pub address: String,
}

/// Drive the cloud side of a LoadBalancer Service towards its spec
#[instrument(skip(engine, svc), fields(namespace = %svc.namespace().unwrap_or_default(), name = %svc.name_any()))]
pub async fn provision(engine: &Engine, svc: &Service) -> Result<Provisioned> {
    let mut state = LoadBalancerState::from_service(svc)?;
    match state.lb_id.clone() {
        None => create(engine, svc, &mut state).await,
        Some(lb_id) => update(engine, svc, &mut state, &lb_id).await,
    }
}

async fn create(engine: &Engine, svc: &Service, state: &mut LoadBalancerState) -> Result<Provisioned> {
    let namespace = svc.namespace().unwrap_or_default();
    let name = svc.name_any();
    let ports = service_ports(svc);

    ensure_target_groups(engine, svc, state, &ports).await?;

    let lb_id = ensure_load_balancer(engine, &load_balancer_name(&namespace, &name)).await?;

    let ready = match wait_until_ready(engine, &lb_id).await {
        Ok(ready) => ready,
        Err(Error::Cancelled) => return Err(Error::Cancelled),
        Err(e @ Error::LoadBalancerFailed(_)) => {
            // keep the id so teardown can still find the broken load balancer
            state.lb_id = Some(lb_id.clone());
            engine
                .store
                .patch_annotations(&namespace, &name, &state.encode())
                .await?;
            return Err(e);
        }
        Err(e) => {
            warn!(lb_id = %lb_id, error = %e, "Readiness check failed, attaching listeners anyway");
            false
        }
    };

    ensure_listeners(engine, &lb_id, state, &ports).await;

    state.lb_id = Some(lb_id.clone());
    engine
        .store
        .patch_annotations(&namespace, &name, &state.encode())
        .await?;
    info!(lb_id = %lb_id, target_groups = ?state.target_group_ids(), "Load balancer provisioned");

    match external_address_with_retry(engine, &lb_id).await? {
        Some(address) => Ok(Provisioned {
            status: ProvisioningStatus::Active,
            lb_id,
            address,
        }),
        None => {
            let address = fallback_address(&lb_id);
            warn!(lb_id = %lb_id, fallback = %address, "External address unresolved");
            Ok(Provisioned {
                status: if ready {
                    ProvisioningStatus::Pending
                } else {
                    ProvisioningStatus::Creating
                },
                lb_id,
                address,
            })
        }
    }
}

async fn update(
    engine: &Engine,
    svc: &Service,
    state: &mut LoadBalancerState,
    lb_id: &str,
) -> Result<Provisioned> {
    let ports = service_ports(svc);
    let live: Vec<PortKey> = ports.iter().map(PortKey::of).collect();

    for stale in state.stale_ports(&live) {
        warn!(
            target_group = %stale.target_group_id,
            port = ?stale.port.as_ref().map(ToString::to_string),
            "Port removed from Service; target group kept until teardown"
        );
    }

    let added = ensure_target_groups(engine, svc, state, &ports).await?;
    if !added.is_empty() {
        info!(lb_id, added = added.len(), "Created target groups for new ports");
    }
    sync_registrations(engine, state, &live, &added).await?;
    ensure_listeners(engine, lb_id, state, &ports).await;

    let address = external_address(engine.cloud.as_ref(), lb_id).await?;
    Ok(Provisioned {
        status: ProvisioningStatus::Active,
        lb_id: lb_id.to_string(),
        address,
    })
}

/// Create or adopt a target group for every port without one. Each new id is
/// persisted before moving on. Returns the ids added.
async fn ensure_target_groups(
    engine: &Engine,
    svc: &Service,
    state: &mut LoadBalancerState,
    ports: &[ServicePort],
) -> Result<Vec<String>> {
    let namespace = svc.namespace().unwrap_or_default();
    let name = svc.name_any();
    let mut added = Vec::new();

    for (index, port) in ports.iter().enumerate() {
        let key = PortKey::of(port);
        if state.target_group_for(&key).is_some() {
            continue;
        }
        let node_port = port.node_port.ok_or_else(|| {
            Error::NotReady(format!("port {key} has no node port allocated yet"))
        })?;

        let mut names = vec![target_group_name(&namespace, &name, index)];
        let keyed = target_group_port_name(&namespace, &name, &key.protocol, key.port);
        if !names.contains(&keyed) {
            names.push(keyed);
        }
        let tg_id = ensure_target_group(engine, state, &names, &key, port, node_port).await?;

        if state.bind(key.clone(), &tg_id)? {
            engine
                .store
                .patch_annotations(&namespace, &name, &state.encode_target_groups())
                .await?;
            added.push(tg_id.clone());
        }
        info!(port = %key, node_port, target_group = %tg_id, "Target group bound");

        match register_nodes(engine, &tg_id).await {
            Ok(outcome) => info!(target_group = %tg_id, outcome = outcome.label(), "Node registration finished"),
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => warn!(target_group = %tg_id, error = %e, "Node registration failed, continuing"),
        }
    }
    Ok(added)
}

/// Create the target group under the first usable name in `names`.
///
/// A name collision adopts the existing group only if it listens on the same
/// node port and no other port is bound to it.
async fn ensure_target_group(
    engine: &Engine,
    state: &LoadBalancerState,
    names: &[String],
    key: &PortKey,
    port: &ServicePort,
    node_port: i32,
) -> Result<String> {
    for tg_name in names {
        let request = CreateTargetGroup {
            name: tg_name.clone(),
            port: node_port,
            health_check_protocol: ListenerProtocol::from_service_protocol(port.protocol.as_deref())
                .as_str()
                .to_string(),
            description: format!("port {} of Service", port.port),
        };

        let create_err = match engine.cloud.create_target_group(&request).await {
            Ok(tg) => {
                info!(target_group = %tg.id, name = %tg_name, "Created target group");
                return Ok(tg.id);
            }
            Err(e) => e,
        };

        // the provider has no distinct code for a taken target group name
        let Some(existing) = engine
            .cloud
            .list_target_groups()
            .await?
            .into_iter()
            .find(|tg| &tg.name == tg_name)
        else {
            return Err(create_err.into());
        };

        let same_node_port = existing.port.map_or(true, |p| p == node_port);
        let free = state.port_of(&existing.id).map_or(true, |bound| bound == key);
        if same_node_port && free {
            info!(target_group = %existing.id, name = %tg_name, "Adopted existing target group");
            return Ok(existing.id);
        }
        warn!(
            target_group = %existing.id,
            name = %tg_name,
            existing_node_port = ?existing.port,
            node_port,
            "Target group name held by another port"
        );
    }
    Err(Error::NameConflict(format!(
        "no free target group name for port {key}, tried {}",
        names.join(",")
    )))
}

/// Bring node registration of every bound live port up to date, skipping
/// groups registered earlier in this pass
async fn sync_registrations(
    engine: &Engine,
    state: &LoadBalancerState,
    live: &[PortKey],
    skip: &[String],
) -> Result<()> {
    let groups: Vec<&str> = live
        .iter()
        .filter_map(|key| state.target_group_for(key))
        .filter(|id| !skip.iter().any(|s| s.as_str() == *id))
        .collect();
    if groups.is_empty() {
        return Ok(());
    }

    let instances = match resolve_worker_instances(engine).await {
        Ok(instances) => instances,
        Err(Error::Cancelled) => return Err(Error::Cancelled),
        Err(e) => {
            warn!(error = %e, "Could not resolve worker instances, skipping registration check");
            return Ok(());
        }
    };

    for tg_id in groups {
        match sync_targets(engine, tg_id, &instances).await {
            Ok(outcome) => debug!(target_group = tg_id, outcome = outcome.label(), "Registration in sync"),
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => warn!(target_group = tg_id, error = %e, "Registration sync failed, continuing"),
        }
    }
    Ok(())
}

async fn ensure_load_balancer(engine: &Engine, lb_name: &str) -> Result<String> {
    let request = CreateLoadBalancer {
        name: lb_name.to_string(),
        description: "Managed by ncloud-lb-controller".to_string(),
    };

    match engine.cloud.create_load_balancer(&request).await {
        Ok(lb) => {
            info!(lb_id = %lb.id, name = lb_name, "Created load balancer");
            Ok(lb.id)
        }
        Err(e) if e.is_duplicate_name() => {
            let existing = engine
                .cloud
                .list_load_balancers()
                .await?
                .into_iter()
                .find(|lb| lb.name == lb_name);
            match existing {
                Some(lb) => {
                    info!(lb_id = %lb.id, name = lb_name, "Adopted existing load balancer");
                    Ok(lb.id)
                }
                None => Err(e.into()),
            }
        }
        Err(e) => Err(e.into()),
    }
}

/// Create listeners for bound ports that have none; failures are per port
async fn ensure_listeners(engine: &Engine, lb_id: &str, state: &LoadBalancerState, ports: &[ServicePort]) -> usize {
    let existing: Vec<(i32, ListenerProtocol)> = match engine.cloud.list_listeners(lb_id).await {
        Ok(listeners) => listeners
            .iter()
            .map(|l| (l.port, ListenerProtocol::from_service_protocol(l.protocol.as_deref())))
            .collect(),
        Err(e) => {
            warn!(lb_id, error = %e, "Could not list listeners");
            Vec::new()
        }
    };

    let mut created = 0;
    for port in ports {
        let protocol = ListenerProtocol::from_service_protocol(port.protocol.as_deref());
        if existing.contains(&(port.port, protocol)) {
            continue;
        }
        let key = PortKey::of(port);
        let Some(tg_id) = state.target_group_for(&key) else {
            warn!(lb_id, port = %key, "No target group bound, skipping listener");
            continue;
        };

        let request = CreateListener {
            load_balancer_id: lb_id.to_string(),
            port: port.port,
            protocol,
            target_group_id: tg_id.to_string(),
        };
        match engine.cloud.create_listener(&request).await {
            Ok(listener) => {
                info!(lb_id, port = port.port, listener = %listener.id, target_group = tg_id, "Created listener");
                created += 1;
            }
            Err(e) => warn!(lb_id, port = port.port, error = %e, "Listener creation failed"),
        }
    }
    created
}
