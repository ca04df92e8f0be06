//! Projection of the external address into `status.loadBalancer.ingress`

use k8s_openapi::api::core::v1::{LoadBalancerIngress, Service};
use tracing::{debug, info};

use super::store::ServiceStore;
use crate::error::Result;

/// Dotted-quad check: four groups of one to three digits
pub fn is_ipv4_literal(address: &str) -> bool {
    let groups: Vec<&str> = address.split('.').collect();
    groups.len() == 4
        && groups
            .iter()
            .all(|g| (1..=3).contains(&g.len()) && g.chars().all(|c| c.is_ascii_digit()))
}

pub fn ingress_for(address: &str) -> LoadBalancerIngress {
    if is_ipv4_literal(address) {
        LoadBalancerIngress {
            ip: Some(address.to_string()),
            ..Default::default()
        }
    } else {
        LoadBalancerIngress {
            hostname: Some(address.to_string()),
            ..Default::default()
        }
    }
}

pub fn current_ingress(svc: &Service) -> Vec<LoadBalancerIngress> {
    svc.status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.clone())
        .unwrap_or_default()
}

/// First ingress entry as a plain address
pub fn ingress_address(svc: &Service) -> Option<String> {
    current_ingress(svc)
        .into_iter()
        .next()
        .and_then(|i| i.ip.or(i.hostname))
}

/// Write `address` as the single ingress entry unless it is already there.
///
/// Compares against a freshly fetched copy; returns whether a write happened.
pub async fn project_address(
    store: &dyn ServiceStore,
    namespace: &str,
    name: &str,
    address: &str,
) -> Result<bool> {
    let Some(latest) = store.get_service(namespace, name).await? else {
        return Ok(false);
    };
    let desired = vec![ingress_for(address)];
    if current_ingress(&latest) == desired {
        debug!(address, "Ingress already up to date");
        return Ok(false);
    }
    store.set_ingress(namespace, name, desired).await?;
    info!(address, "Updated load balancer ingress");
    Ok(true)
}

pub async fn clear_ingress(store: &dyn ServiceStore, namespace: &str, name: &str) -> Result<()> {
    let Some(latest) = store.get_service(namespace, name).await? else {
        return Ok(());
    };
    if current_ingress(&latest).is_empty() {
        return Ok(());
    }
    store.set_ingress(namespace, name, Vec::new()).await
}
