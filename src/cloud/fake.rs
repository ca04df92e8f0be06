//! In-memory [`LoadBalancerApi`] used by the engine tests
//!
//! Records every call in order and lets tests inject the failure modes the
//! provider is known for: duplicate names, flaky target registration, stale
//! status and "in use" deletes.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use super::error::{CloudError, CloudResult, DUPLICATE_LB_NAME_CODE};
use super::types::*;
use super::LoadBalancerApi;

#[derive(Default)]
struct Inner {
    load_balancers: Vec<LoadBalancer>,
    target_groups: Vec<TargetGroup>,
    listeners: HashMap<String, Vec<Listener>>,
    targets: HashMap<String, Vec<Target>>,
    servers: Vec<ServerInstance>,
    interfaces: Vec<NetworkInterface>,
    calls: Vec<String>,
    next_id: u32,

    add_targets_failures: u32,
    rejected_targets: HashSet<String>,
    failing_deletes: HashSet<String>,
    failing_listener_ports: HashSet<i32>,
    failing_listeners: HashSet<(i32, ListenerProtocol)>,
    fail_interface_listing: bool,
    fail_target_group_create: bool,
    lb_status: Option<(String, String)>,
    lb_domain: Option<String>,
    lb_ips: Vec<String>,
}

impl Inner {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }
}

fn api_error(status: u16, code: &str, message: &str) -> CloudError {
    CloudError::Api {
        status,
        code: code.to_string(),
        message: message.to_string(),
    }
}

pub struct FakeCloud {
    inner: Mutex<Inner>,
}

impl Default for FakeCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCloud {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                lb_status: Some((LB_STATUS_USED.to_string(), LB_STATUS_NAME_RUNNING.to_string())),
                ..Default::default()
            }),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let mut guard = self.inner.lock().unwrap();
        f(&mut guard)
    }

    fn record(&self, call: String) {
        self.with(|s| s.calls.push(call));
    }

    /// Calls in issue order, formatted as `operation` or `operation:arg`
    pub fn calls(&self) -> Vec<String> {
        self.with(|s| s.calls.clone())
    }

    pub fn count_calls(&self, operation: &str) -> usize {
        self.with(|s| {
            s.calls
                .iter()
                .filter(|c| c.split(':').next() == Some(operation))
                .count()
        })
    }

    pub fn clear_calls(&self) {
        self.with(|s| s.calls.clear());
    }

    pub fn add_server(&self, id: &str, ip: &str) {
        self.with(|s| {
            s.servers.push(ServerInstance {
                id: id.to_string(),
                name: Some(format!("server-{id}")),
                vpc_no: Some("vpc-1".to_string()),
            });
            s.interfaces.push(NetworkInterface {
                id: format!("nic-{id}"),
                ip: Some(ip.to_string()),
                instance_id: Some(id.to_string()),
            });
        });
    }

    pub fn seed_load_balancer(&self, id: &str, name: &str) {
        self.with(|s| {
            s.load_balancers.push(LoadBalancer {
                id: id.to_string(),
                name: name.to_string(),
                ..Default::default()
            })
        });
    }

    pub fn seed_target_group(&self, id: &str, name: &str) {
        self.with(|s| {
            s.target_groups.push(TargetGroup {
                id: id.to_string(),
                name: name.to_string(),
                ..Default::default()
            })
        });
    }

    /// The next `n` add_targets calls fail with a 500
    pub fn fail_add_targets(&self, n: u32) {
        self.with(|s| s.add_targets_failures = n);
    }

    /// add_targets succeeds but never registers this target
    pub fn reject_target(&self, id: &str) {
        self.with(|s| {
            s.rejected_targets.insert(id.to_string());
        });
    }

    pub fn fail_delete(&self, id: &str) {
        self.with(|s| {
            s.failing_deletes.insert(id.to_string());
        });
    }

    pub fn fail_listener_port(&self, port: i32) {
        self.with(|s| {
            s.failing_listener_ports.insert(port);
        });
    }

    /// Listener creation fails for this port and protocol only
    pub fn fail_listener(&self, port: i32, protocol: ListenerProtocol) {
        self.with(|s| {
            s.failing_listeners.insert((port, protocol));
        });
    }

    pub fn clear_listener_failures(&self) {
        self.with(|s| {
            s.failing_listener_ports.clear();
            s.failing_listeners.clear();
        });
    }

    pub fn fail_interface_listing(&self) {
        self.with(|s| s.fail_interface_listing = true);
    }

    /// Target group creates fail with a generic error, as when the name is taken
    pub fn fail_target_group_create(&self) {
        self.with(|s| s.fail_target_group_create = true);
    }

    pub fn set_lb_status(&self, code: &str, name: &str) {
        self.with(|s| s.lb_status = Some((code.to_string(), name.to_string())));
    }

    pub fn set_lb_domain(&self, domain: Option<&str>) {
        self.with(|s| s.lb_domain = domain.map(str::to_string));
    }

    pub fn set_lb_ips(&self, ips: &[&str]) {
        self.with(|s| s.lb_ips = ips.iter().map(|ip| ip.to_string()).collect());
    }

    pub fn load_balancers(&self) -> Vec<LoadBalancer> {
        self.with(|s| s.load_balancers.clone())
    }

    pub fn target_groups(&self) -> Vec<TargetGroup> {
        self.with(|s| s.target_groups.clone())
    }

    pub fn listeners(&self, lb_id: &str) -> Vec<Listener> {
        self.with(|s| s.listeners.get(lb_id).cloned().unwrap_or_default())
    }

    pub fn registered_targets(&self, tg_id: &str) -> Vec<String> {
        self.with(|s| {
            s.targets
                .get(tg_id)
                .map(|ts| ts.iter().map(|t| t.id.clone()).collect())
                .unwrap_or_default()
        })
    }

    fn decorate(s: &Inner, lb: &LoadBalancer) -> LoadBalancer {
        let mut lb = lb.clone();
        if let Some((code, name)) = &s.lb_status {
            lb.status_code = Some(code.clone());
            lb.status_name = Some(name.clone());
        }
        lb.domain = s.lb_domain.clone();
        lb.ip_list = s.lb_ips.clone();
        lb
    }
}

#[async_trait]
impl LoadBalancerApi for FakeCloud {
    async fn create_load_balancer(&self, req: &CreateLoadBalancer) -> CloudResult<LoadBalancer> {
        self.record(format!("create_load_balancer:{}", req.name));
        self.with(|s| {
            if s.load_balancers.iter().any(|lb| lb.name == req.name) {
                return Err(api_error(400, DUPLICATE_LB_NAME_CODE, "Duplicate load balancer name"));
            }
            let lb = LoadBalancer {
                id: s.next_id("lb"),
                name: req.name.clone(),
                status_code: Some("INIT".to_string()),
                status_name: Some("Creating".to_string()),
                ..Default::default()
            };
            s.load_balancers.push(lb.clone());
            Ok(lb)
        })
    }

    async fn list_load_balancers(&self) -> CloudResult<Vec<LoadBalancer>> {
        self.record("list_load_balancers".to_string());
        Ok(self.with(|s| s.load_balancers.iter().map(|lb| Self::decorate(s, lb)).collect()))
    }

    async fn get_load_balancer(&self, id: &str) -> CloudResult<Option<LoadBalancer>> {
        self.record(format!("get_load_balancer:{id}"));
        Ok(self.with(|s| {
            s.load_balancers
                .iter()
                .find(|lb| lb.id == id)
                .map(|lb| Self::decorate(s, lb))
        }))
    }

    async fn delete_load_balancer(&self, id: &str) -> CloudResult<()> {
        self.record(format!("delete_load_balancer:{id}"));
        self.with(|s| {
            if s.failing_deletes.contains(id) {
                return Err(api_error(500, "9999", "internal error"));
            }
            s.load_balancers.retain(|lb| lb.id != id);
            s.listeners.remove(id);
            Ok(())
        })
    }

    async fn create_target_group(&self, req: &CreateTargetGroup) -> CloudResult<TargetGroup> {
        self.record(format!("create_target_group:{}", req.name));
        self.with(|s| {
            if s.fail_target_group_create || s.target_groups.iter().any(|tg| tg.name == req.name) {
                return Err(api_error(400, "1250000", "target group creation failed"));
            }
            let tg = TargetGroup {
                id: s.next_id("tg"),
                name: req.name.clone(),
                port: Some(req.port),
                protocol: Some("PROXY_TCP".to_string()),
                health_check_protocol: Some(req.health_check_protocol.clone()),
                health_check_port: Some(req.port),
                load_balancer_ids: Vec::new(),
            };
            s.target_groups.push(tg.clone());
            Ok(tg)
        })
    }

    async fn list_target_groups(&self) -> CloudResult<Vec<TargetGroup>> {
        self.record("list_target_groups".to_string());
        Ok(self.target_groups())
    }

    async fn get_target_group(&self, id: &str) -> CloudResult<Option<TargetGroup>> {
        self.record(format!("get_target_group:{id}"));
        Ok(self.with(|s| s.target_groups.iter().find(|tg| tg.id == id).cloned()))
    }

    async fn delete_target_group(&self, id: &str) -> CloudResult<()> {
        self.record(format!("delete_target_group:{id}"));
        self.with(|s| {
            if s.failing_deletes.contains(id) {
                return Err(api_error(400, "1250010", "Target group is in use"));
            }
            if !s.target_groups.iter().any(|tg| tg.id == id) {
                return Err(api_error(404, "1250404", "Target group not found"));
            }
            s.target_groups.retain(|tg| tg.id != id);
            s.targets.remove(id);
            Ok(())
        })
    }

    async fn create_listener(&self, req: &CreateListener) -> CloudResult<Listener> {
        self.record(format!("create_listener:{}", req.port));
        self.with(|s| {
            if s.failing_listener_ports.contains(&req.port)
                || s.failing_listeners.contains(&(req.port, req.protocol))
            {
                return Err(api_error(400, "1200100", "listener creation failed"));
            }
            let listener = Listener {
                id: s.next_id("ln"),
                port: req.port,
                protocol: Some(req.protocol.as_str().to_string()),
                target_group_id: Some(req.target_group_id.clone()),
            };
            s.listeners
                .entry(req.load_balancer_id.clone())
                .or_default()
                .push(listener.clone());
            Ok(listener)
        })
    }

    async fn list_listeners(&self, load_balancer_id: &str) -> CloudResult<Vec<Listener>> {
        self.record(format!("list_listeners:{load_balancer_id}"));
        Ok(self.listeners(load_balancer_id))
    }

    async fn add_targets(&self, target_group_id: &str, target_ids: &[String]) -> CloudResult<()> {
        self.record(format!("add_targets:{target_group_id}"));
        self.with(|s| {
            if s.add_targets_failures > 0 {
                s.add_targets_failures -= 1;
                return Err(api_error(503, "5000", "service unavailable"));
            }
            let rejected = s.rejected_targets.clone();
            let registered = s.targets.entry(target_group_id.to_string()).or_default();
            for id in target_ids.iter().filter(|id| !rejected.contains(*id)) {
                if !registered.iter().any(|t| &t.id == id) {
                    registered.push(Target {
                        id: id.clone(),
                        health_status: Some("HEALTHY".to_string()),
                        ..Default::default()
                    });
                }
            }
            Ok(())
        })
    }

    async fn list_targets(&self, target_group_id: &str) -> CloudResult<Vec<Target>> {
        self.record(format!("list_targets:{target_group_id}"));
        Ok(self.with(|s| s.targets.get(target_group_id).cloned().unwrap_or_default()))
    }

    async fn list_server_instances(&self) -> CloudResult<Vec<ServerInstance>> {
        self.record("list_server_instances".to_string());
        Ok(self.with(|s| s.servers.clone()))
    }

    async fn list_network_interfaces(
        &self,
        instance_id: Option<&str>,
    ) -> CloudResult<Vec<NetworkInterface>> {
        self.record(format!(
            "list_network_interfaces:{}",
            instance_id.unwrap_or("*")
        ));
        self.with(|s| match instance_id {
            None if s.fail_interface_listing => Err(api_error(500, "9999", "listing failed")),
            None => Ok(s.interfaces.clone()),
            Some(id) => Ok(s
                .interfaces
                .iter()
                .filter(|nic| nic.instance_id.as_deref() == Some(id))
                .cloned()
                .collect()),
        })
    }
}
