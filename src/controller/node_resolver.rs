//! Maps cluster nodes to cloud server instance ids

use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use super::context::Engine;
use crate::cloud::LoadBalancerApi;
use crate::error::Result;

/// Node annotation that may carry the server instance number
pub const INSTANCE_ID_ANNOTATION: &str = "naver.cloud/instance-id";

const CONTROL_PLANE_KEYS: [&str; 2] = [
    "node-role.kubernetes.io/master",
    "node-role.kubernetes.io/control-plane",
];

pub fn is_control_plane(node: &Node) -> bool {
    let labelled = CONTROL_PLANE_KEYS
        .iter()
        .any(|key| node.labels().contains_key(*key));
    let tainted = node
        .spec
        .as_ref()
        .and_then(|s| s.taints.as_ref())
        .map_or(false, |taints| {
            taints
                .iter()
                .any(|t| CONTROL_PLANE_KEYS.contains(&t.key.as_str()))
        });
    labelled || tainted
}

pub fn internal_ip(node: &Node) -> Option<&str> {
    node.status
        .as_ref()?
        .addresses
        .as_ref()?
        .iter()
        .find(|a| a.type_ == "InternalIP" && !a.address.is_empty())
        .map(|a| a.address.as_str())
}

/// Instance id recorded on the node itself: providerID, then annotation, then a
/// purely numeric node name
pub fn known_instance_id(node: &Node) -> Option<String> {
    let from_provider_id = node
        .spec
        .as_ref()
        .and_then(|s| s.provider_id.as_deref())
        .and_then(|id| id.rsplit('/').next())
        .filter(|id| !id.is_empty());
    if let Some(id) = from_provider_id {
        return Some(id.to_string());
    }

    if let Some(id) = node
        .annotations()
        .get(INSTANCE_ID_ANNOTATION)
        .filter(|id| !id.is_empty())
    {
        return Some(id.clone());
    }

    let name = node.name_any();
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_digit()) {
        return Some(name);
    }
    None
}

/// Find the instance owning `ip`: one VPC-wide interface listing first, then a
/// per-server scan
pub async fn find_instance_by_ip(cloud: &dyn LoadBalancerApi, ip: &str) -> Option<String> {
    match cloud.list_network_interfaces(None).await {
        Ok(interfaces) => {
            let owner = interfaces
                .into_iter()
                .find(|nic| nic.ip.as_deref() == Some(ip))
                .and_then(|nic| nic.instance_id);
            if owner.is_some() {
                return owner;
            }
            debug!(ip, "No interface matched, scanning server instances");
        }
        Err(e) => warn!(ip, error = %e, "Interface listing failed, scanning server instances"),
    }

    let servers = match cloud.list_server_instances().await {
        Ok(servers) => servers,
        Err(e) => {
            warn!(ip, error = %e, "Server instance listing failed");
            return None;
        }
    };

    for server in servers {
        match cloud.list_network_interfaces(Some(&server.id)).await {
            Ok(interfaces) if interfaces.iter().any(|nic| nic.ip.as_deref() == Some(ip)) => {
                return Some(server.id);
            }
            Ok(_) => {}
            Err(e) => debug!(server = %server.id, error = %e, "Interface lookup failed"),
        }
    }
    None
}

/// Instance ids of every schedulable worker node that can be resolved.
/// Unresolvable nodes are skipped.
pub async fn resolve_worker_instances(engine: &Engine) -> Result<Vec<String>> {
    let nodes = engine.store.list_nodes().await?;
    let mut instances: Vec<String> = Vec::new();

    for node in &nodes {
        let name = node.name_any();
        if is_control_plane(node) {
            debug!(node = %name, "Skipping control-plane node");
            continue;
        }
        let Some(ip) = internal_ip(node) else {
            info!(node = %name, "Skipping node without internal IP");
            continue;
        };

        let instance = match known_instance_id(node) {
            Some(id) => Some(id),
            None => find_instance_by_ip(engine.cloud.as_ref(), ip).await,
        };

        match instance {
            Some(id) if !instances.contains(&id) => {
                debug!(node = %name, ip, instance = %id, "Resolved node");
                instances.push(id);
            }
            Some(_) => {}
            None => warn!(node = %name, ip, "Could not resolve cloud instance for node"),
        }
    }

    Ok(instances)
}

#[cfg(test)]
pub(crate) mod test_nodes {
    use std::collections::BTreeMap;

    use k8s_openapi::api::core::v1::{Node, NodeAddress, NodeSpec, NodeStatus, Taint};
    use kube::api::ObjectMeta;

    pub fn worker(name: &str, ip: &str) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(NodeSpec::default()),
            status: Some(NodeStatus {
                addresses: Some(vec![
                    NodeAddress {
                        type_: "Hostname".to_string(),
                        address: name.to_string(),
                    },
                    NodeAddress {
                        type_: "InternalIP".to_string(),
                        address: ip.to_string(),
                    },
                ]),
                ..Default::default()
            }),
        }
    }

    pub fn with_provider_id(mut node: Node, provider_id: &str) -> Node {
        node.spec = Some(NodeSpec {
            provider_id: Some(provider_id.to_string()),
            ..Default::default()
        });
        node
    }

    pub fn with_label(mut node: Node, key: &str) -> Node {
        node.metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), String::new());
        node
    }

    pub fn with_taint(mut node: Node, key: &str) -> Node {
        node.spec = Some(NodeSpec {
            taints: Some(vec![Taint {
                key: key.to_string(),
                effect: "NoSchedule".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        });
        node
    }
}
