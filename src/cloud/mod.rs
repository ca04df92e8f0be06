//! Cloud API gateway
//!
//! The reconciliation engine talks to the provider exclusively through
//! [`LoadBalancerApi`]. [`NcloudClient`] implements it against the Naver Cloud
//! VPC load balancer and server APIs; tests substitute an in-memory fake.
//! Region, VPC and subnet scoping is carried by the client, not by callers.

pub mod error;
pub mod ncloud;
pub mod signature;
pub mod types;

#[cfg(test)]
pub mod fake;

use async_trait::async_trait;

pub use error::{CloudError, CloudResult};
pub use ncloud::{NcloudClient, NcloudConfig, DEFAULT_API_ENDPOINT};
pub use types::{
    CreateListener, CreateLoadBalancer, CreateTargetGroup, Listener, ListenerProtocol,
    LoadBalancer, NetworkInterface, ServerInstance, Target, TargetGroup,
};

#[async_trait]
pub trait LoadBalancerApi: Send + Sync {
    async fn create_load_balancer(&self, req: &CreateLoadBalancer) -> CloudResult<LoadBalancer>;

    async fn list_load_balancers(&self) -> CloudResult<Vec<LoadBalancer>>;

    /// Detail lookup; `Ok(None)` when the provider returns an empty list
    async fn get_load_balancer(&self, id: &str) -> CloudResult<Option<LoadBalancer>>;

    async fn delete_load_balancer(&self, id: &str) -> CloudResult<()>;

    async fn create_target_group(&self, req: &CreateTargetGroup) -> CloudResult<TargetGroup>;

    async fn list_target_groups(&self) -> CloudResult<Vec<TargetGroup>>;

    async fn get_target_group(&self, id: &str) -> CloudResult<Option<TargetGroup>>;

    async fn delete_target_group(&self, id: &str) -> CloudResult<()>;

    async fn create_listener(&self, req: &CreateListener) -> CloudResult<Listener>;

    async fn list_listeners(&self, load_balancer_id: &str) -> CloudResult<Vec<Listener>>;

    /// Bulk registration of server instances into a target group
    async fn add_targets(&self, target_group_id: &str, target_ids: &[String]) -> CloudResult<()>;

    async fn list_targets(&self, target_group_id: &str) -> CloudResult<Vec<Target>>;

    /// Server instances in the configured VPC
    async fn list_server_instances(&self) -> CloudResult<Vec<ServerInstance>>;

    /// Network interfaces, optionally restricted to one server instance
    async fn list_network_interfaces(
        &self,
        instance_id: Option<&str>,
    ) -> CloudResult<Vec<NetworkInterface>>;
}
