//! Typed controller state persisted in Service annotations
//!
//! Annotations are the only durable store. Everything here goes through
//! [`LoadBalancerState::decode`] and [`LoadBalancerState::encode`]; the rest of the
//! engine never touches raw annotation strings.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use k8s_openapi::api::core::v1::{Service, ServicePort};
use kube::ResourceExt;

use crate::error::{Error, Result};

/// Cloud load balancer id
pub const LB_ID_ANNOTATION: &str = "naver.k-paas.org/lb-id";

/// Comma-joined target group ids, index-aligned with the port list
pub const TARGET_GROUPS_ANNOTATION: &str = "naver.k-paas.org/target-groups";

/// Comma-joined `PROTO:port` keys, index-aligned with `target-groups`
pub const TARGET_GROUP_PORTS_ANNOTATION: &str = "naver.k-paas.org/target-group-ports";

/// Annotation patch: `None` removes the key
pub type AnnotationPatch = BTreeMap<String, Option<String>>;

/// Stable identity of a Service port
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortKey {
    pub protocol: String,
    pub port: i32,
}

impl PortKey {
    pub fn of(port: &ServicePort) -> Self {
        Self {
            protocol: port
                .protocol
                .as_deref()
                .unwrap_or("TCP")
                .to_ascii_uppercase(),
            port: port.port,
        }
    }
}

impl fmt::Display for PortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.protocol, self.port)
    }
}

impl FromStr for PortKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (protocol, port) = s
            .split_once(':')
            .ok_or_else(|| Error::InvalidState(format!("malformed port key '{s}'")))?;
        let port = port
            .parse::<i32>()
            .map_err(|_| Error::InvalidState(format!("malformed port in key '{s}'")))?;
        if protocol.is_empty() {
            return Err(Error::InvalidState(format!("missing protocol in key '{s}'")));
        }
        Ok(Self {
            protocol: protocol.to_ascii_uppercase(),
            port,
        })
    }
}

/// A target group and the port it serves; `port` is `None` for ids that no
/// longer map to a live port
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetGroupBinding {
    pub port: Option<PortKey>,
    pub target_group_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadBalancerState {
    pub lb_id: Option<String>,
    pub target_groups: Vec<TargetGroupBinding>,
}

impl LoadBalancerState {
    /// Decode state from a Service's annotations, using its live ports to bind
    /// ids written without a port list
    pub fn from_service(svc: &Service) -> Result<Self> {
        Self::decode(svc.annotations(), &service_ports(svc))
    }

    pub fn decode(annotations: &BTreeMap<String, String>, ports: &[ServicePort]) -> Result<Self> {
        let lb_id = annotations
            .get(LB_ID_ANNOTATION)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let ids: Vec<&str> = annotations
            .get(TARGET_GROUPS_ANNOTATION)
            .map(|v| v.split(',').map(str::trim).collect())
            .unwrap_or_default();

        let keys: Option<Vec<&str>> = annotations
            .get(TARGET_GROUP_PORTS_ANNOTATION)
            .map(|v| v.split(',').map(str::trim).collect());

        let target_groups = match keys {
            Some(keys) => {
                if keys.len() != ids.len() {
                    return Err(Error::InvalidState(format!(
                        "{} has {} entries but {} has {}",
                        TARGET_GROUP_PORTS_ANNOTATION,
                        keys.len(),
                        TARGET_GROUPS_ANNOTATION,
                        ids.len()
                    )));
                }
                ids.iter()
                    .zip(keys)
                    .filter(|(id, _)| !id.is_empty())
                    .map(|(id, key)| {
                        let port = match key {
                            "" => None,
                            k => Some(k.parse::<PortKey>()?),
                        };
                        Ok(TargetGroupBinding {
                            port,
                            target_group_id: id.to_string(),
                        })
                    })
                    .collect::<Result<Vec<_>>>()?
            }
            // written without port keys: bind by position
            None => ids
                .iter()
                .filter(|id| !id.is_empty())
                .enumerate()
                .map(|(i, id)| TargetGroupBinding {
                    port: ports.get(i).map(PortKey::of),
                    target_group_id: id.to_string(),
                })
                .collect(),
        };

        Ok(Self {
            lb_id,
            target_groups,
        })
    }

    /// Full annotation patch for this state; empty state removes every key
    pub fn encode(&self) -> AnnotationPatch {
        let mut patch = AnnotationPatch::new();
        patch.insert(LB_ID_ANNOTATION.to_string(), self.lb_id.clone());

        if self.target_groups.is_empty() {
            patch.insert(TARGET_GROUPS_ANNOTATION.to_string(), None);
            patch.insert(TARGET_GROUP_PORTS_ANNOTATION.to_string(), None);
        } else {
            let ids: Vec<&str> = self
                .target_groups
                .iter()
                .map(|b| b.target_group_id.as_str())
                .collect();
            let keys: Vec<String> = self
                .target_groups
                .iter()
                .map(|b| b.port.as_ref().map(ToString::to_string).unwrap_or_default())
                .collect();
            patch.insert(TARGET_GROUPS_ANNOTATION.to_string(), Some(ids.join(",")));
            patch.insert(TARGET_GROUP_PORTS_ANNOTATION.to_string(), Some(keys.join(",")));
        }
        patch
    }

    /// Patch touching only the target group keys
    pub fn encode_target_groups(&self) -> AnnotationPatch {
        let mut patch = self.encode();
        patch.remove(LB_ID_ANNOTATION);
        patch
    }

    pub fn is_empty(&self) -> bool {
        self.lb_id.is_none() && self.target_groups.is_empty()
    }

    pub fn target_group_ids(&self) -> Vec<String> {
        self.target_groups
            .iter()
            .map(|b| b.target_group_id.clone())
            .collect()
    }

    pub fn target_group_for(&self, port: &PortKey) -> Option<&str> {
        self.target_groups
            .iter()
            .find(|b| b.port.as_ref() == Some(port))
            .map(|b| b.target_group_id.as_str())
    }

    /// Record `id` for `port`; returns false when nothing changed.
    ///
    /// An id already serving a different port is never re-keyed.
    pub fn bind(&mut self, port: PortKey, id: &str) -> Result<bool> {
        if let Some(existing) = self
            .target_groups
            .iter_mut()
            .find(|b| b.target_group_id == id)
        {
            return match &existing.port {
                Some(bound) if *bound == port => Ok(false),
                Some(bound) => Err(Error::InvalidState(format!(
                    "target group {id} already serves {bound}, refusing to bind it to {port}"
                ))),
                None => {
                    existing.port = Some(port);
                    Ok(true)
                }
            };
        }
        self.target_groups.push(TargetGroupBinding {
            port: Some(port),
            target_group_id: id.to_string(),
        });
        Ok(true)
    }

    /// Port served by `id`, if it is bound to one
    pub fn port_of(&self, id: &str) -> Option<&PortKey> {
        self.target_groups
            .iter()
            .find(|b| b.target_group_id == id)
            .and_then(|b| b.port.as_ref())
    }

    /// Bound ports that are no longer on the Service
    pub fn stale_ports<'a>(&'a self, live: &'a [PortKey]) -> impl Iterator<Item = &'a TargetGroupBinding> {
        self.target_groups
            .iter()
            .filter(move |b| b.port.as_ref().map_or(true, |p| !live.contains(p)))
    }

    pub fn retain_target_groups(&mut self, keep: &[String]) {
        self.target_groups
            .retain(|b| keep.contains(&b.target_group_id));
    }
}

pub fn service_ports(svc: &Service) -> Vec<ServicePort> {
    svc.spec
        .as_ref()
        .and_then(|s| s.ports.clone())
        .unwrap_or_default()
}

pub fn is_load_balancer(svc: &Service) -> bool {
    svc.spec.as_ref().and_then(|s| s.type_.as_deref()) == Some("LoadBalancer")
}

/// Carries any annotation this controller writes
pub fn has_state_annotations(svc: &Service) -> bool {
    let annotations = svc.annotations();
    annotations.contains_key(LB_ID_ANNOTATION) || annotations.contains_key(TARGET_GROUPS_ANNOTATION)
}

/// Only actionable Services reach the state machine
pub fn is_managed(svc: &Service) -> bool {
    is_load_balancer(svc) || has_state_annotations(svc)
}
