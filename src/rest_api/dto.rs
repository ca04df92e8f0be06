//! Response bodies for the REST API

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Whether this replica currently holds the leader lease
    pub leader: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TargetGroupSummary {
    /// `PROTOCOL:port`, absent for target groups no longer bound to a port
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    pub target_group_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerSummary {
    pub namespace: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_balancer_id: Option<String>,
    pub target_groups: Vec<TargetGroupSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingress: Option<String>,
    pub deleting: bool,
    /// Set when the persisted annotations could not be decoded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_error: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoadBalancerListResponse {
    pub items: Vec<LoadBalancerSummary>,
    pub total: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
        }
    }
}
