//! Provider-neutral models returned by the cloud gateway

use serde::{Deserialize, Serialize};

/// Load balancer status codes reported by the provider
pub const LB_STATUS_RUN: &str = "RUN";
pub const LB_STATUS_USED: &str = "USED";
pub const LB_STATUS_ERROR: &str = "ERROR";
pub const LB_STATUS_TERMINATING: &str = "TERMINATING";
pub const LB_STATUS_NAME_RUNNING: &str = "Running";
pub const LB_STATUS_NAME_CHANGING: &str = "Changing";

/// Cloud load balancer instance
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancer {
    pub id: String,
    pub name: String,
    /// `INIT`, `RUN`, `USED`, `ERROR`, `TERMINATING`, ...
    pub status_code: Option<String>,
    /// `Running`, `Changing`, ...
    pub status_name: Option<String>,
    pub domain: Option<String>,
    #[serde(default)]
    pub ip_list: Vec<String>,
}

impl LoadBalancer {
    /// Accepting traffic (status `RUN` or `USED`)
    pub fn is_serving(&self) -> bool {
        matches!(
            self.status_code.as_deref(),
            Some(LB_STATUS_RUN) | Some(LB_STATUS_USED)
        )
    }

    /// Serving and not in the middle of a configuration change
    pub fn is_settled(&self) -> bool {
        self.is_serving() && self.status_name.as_deref() == Some(LB_STATUS_NAME_RUNNING)
    }

    /// Terminal states that polling will not recover from
    pub fn is_failed(&self) -> bool {
        matches!(
            self.status_code.as_deref(),
            Some(LB_STATUS_ERROR) | Some(LB_STATUS_TERMINATING)
        )
    }

    pub fn status_label(&self) -> String {
        format!(
            "{} ({})",
            self.status_code.as_deref().unwrap_or("unknown"),
            self.status_name.as_deref().unwrap_or("unknown")
        )
    }
}

/// Target group (backend pool)
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetGroup {
    pub id: String,
    pub name: String,
    pub port: Option<i32>,
    pub protocol: Option<String>,
    pub health_check_protocol: Option<String>,
    pub health_check_port: Option<i32>,
    #[serde(default)]
    pub load_balancer_ids: Vec<String>,
}

/// Listener bound to a load balancer
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listener {
    pub id: String,
    pub port: i32,
    pub protocol: Option<String>,
    pub target_group_id: Option<String>,
}

/// Registered target and its health
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    pub name: Option<String>,
    pub ip: Option<String>,
    pub health_status: Option<String>,
}

impl Target {
    pub fn is_healthy(&self) -> bool {
        matches!(self.health_status.as_deref(), Some("HEALTHY") | Some("UP"))
    }
}

/// Virtual server instance
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInstance {
    pub id: String,
    pub name: Option<String>,
    pub vpc_no: Option<String>,
}

/// Network interface attached to a server
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub id: String,
    pub ip: Option<String>,
    pub instance_id: Option<String>,
}

/// Listener protocol; anything but UDP is proxied as TCP
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ListenerProtocol {
    Tcp,
    Udp,
}

impl ListenerProtocol {
    pub fn from_service_protocol(protocol: Option<&str>) -> Self {
        match protocol {
            Some(p) if p.eq_ignore_ascii_case("UDP") => ListenerProtocol::Udp,
            _ => ListenerProtocol::Tcp,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ListenerProtocol::Tcp => "TCP",
            ListenerProtocol::Udp => "UDP",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateTargetGroup {
    pub name: String,
    /// Node port the targets listen on
    pub port: i32,
    pub health_check_protocol: String,
    pub description: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateLoadBalancer {
    pub name: String,
    pub description: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateListener {
    pub load_balancer_id: String,
    pub port: i32,
    pub protocol: ListenerProtocol,
    pub target_group_id: String,
}
