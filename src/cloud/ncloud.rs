//! Naver Cloud Platform implementation of [`LoadBalancerApi`]
//!
//! Every operation is a signed `GET {endpoint}/{api}/{operation}?...` returning
//! `{"<operation>Response": {...}}` on success and
//! `{"responseError": {"returnCode", "returnMessage"}}` on failure.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::error::{CloudError, CloudResult};
use super::signature::{RequestSigner, HEADER_ACCESS_KEY, HEADER_SIGNATURE, HEADER_TIMESTAMP};
use super::types::*;
use super::LoadBalancerApi;
use crate::credentials::CloudCredentials;

/// Public-sector API gateway
pub const DEFAULT_API_ENDPOINT: &str = "https://ncloud.apigw.gov-ntruss.com";

const LOAD_BALANCER_API: &str = "vloadbalancer/v2";
const SERVER_API: &str = "vserver/v2";

const TARGET_TYPE_VSVR: &str = "VSVR";
const TARGET_GROUP_PROTOCOL: &str = "PROXY_TCP";
const LOAD_BALANCER_TYPE: &str = "NETWORK_PROXY";

/// Scope and transport settings for [`NcloudClient`]
#[derive(Clone, Debug)]
pub struct NcloudConfig {
    pub endpoint: String,
    pub region: String,
    pub vpc_no: String,
    pub subnet_no: String,
    pub timeout: Duration,
}

impl NcloudConfig {
    pub fn from_credentials(endpoint: impl Into<String>, credentials: &CloudCredentials) -> Self {
        Self {
            endpoint: endpoint.into(),
            region: credentials.region.clone(),
            vpc_no: credentials.vpc_no.clone(),
            subnet_no: credentials.subnet_no.clone(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP client for the VPC load balancer and server APIs
pub struct NcloudClient {
    http: Client,
    config: NcloudConfig,
    signer: RequestSigner,
}

impl NcloudClient {
    pub fn new(config: NcloudConfig, signer: RequestSigner) -> CloudResult<Self> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http,
            config,
            signer,
        })
    }

    pub fn from_credentials(endpoint: &str, credentials: &CloudCredentials) -> CloudResult<Self> {
        let signer = RequestSigner::new(
            credentials.api_key.clone(),
            credentials.api_secret.clone(),
        );
        Self::new(NcloudConfig::from_credentials(endpoint, credentials), signer)
    }

    pub fn config(&self) -> &NcloudConfig {
        &self.config
    }

    /// Issue one signed call and return the `<operation>Response` envelope
    async fn call(&self, api: &str, operation: &str, params: Vec<(String, String)>) -> CloudResult<Value> {
        let result = self.send(api, operation, params).await;

        #[cfg(feature = "metrics")]
        crate::controller::metrics::inc_cloud_call(operation, result.is_ok());

        if let Err(e) = &result {
            debug!(operation, error = %e, "Cloud API call failed");
        }
        result
    }

    async fn send(&self, api: &str, operation: &str, params: Vec<(String, String)>) -> CloudResult<Value> {
        let mut url = Url::parse(&format!(
            "{}/{}/{}",
            self.config.endpoint.trim_end_matches('/'),
            api,
            operation
        ))
        .map_err(|e| CloudError::InvalidRequest(format!("bad endpoint: {e}")))?;

        url.query_pairs_mut()
            .append_pair("regionCode", &self.config.region)
            .extend_pairs(params.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .append_pair("responseFormatType", "json");

        let uri = match url.query() {
            Some(q) => format!("{}?{}", url.path(), q),
            None => url.path().to_string(),
        };
        let timestamp = chrono::Utc::now().timestamp_millis().to_string();
        let signature = self.signer.sign("GET", &uri, &timestamp)?;

        debug!(operation, "Calling Naver Cloud API");

        let response = self
            .http
            .get(url)
            .header(HEADER_TIMESTAMP, &timestamp)
            .header(HEADER_ACCESS_KEY, self.signer.access_key())
            .header(HEADER_SIGNATURE, signature)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        let json: Value = match serde_json::from_str(&body) {
            Ok(v) => v,
            Err(_) if !status.is_success() => {
                return Err(CloudError::Api {
                    status: status.as_u16(),
                    code: String::new(),
                    message: body,
                })
            }
            Err(e) => {
                return Err(CloudError::Decode {
                    operation: operation.to_string(),
                    reason: e.to_string(),
                })
            }
        };

        if let Some(err) = error_from_body(status.as_u16(), &json) {
            warn!(operation, status = status.as_u16(), error = %err, "Naver Cloud API returned an error");
            return Err(err);
        }
        if !status.is_success() {
            return Err(CloudError::Api {
                status: status.as_u16(),
                code: String::new(),
                message: body,
            });
        }

        json.get(format!("{operation}Response"))
            .cloned()
            .ok_or_else(|| CloudError::Decode {
                operation: operation.to_string(),
                reason: format!("missing {operation}Response envelope"),
            })
    }

    async fn call_list<W, T>(
        &self,
        api: &str,
        operation: &str,
        params: Vec<(String, String)>,
        field: &str,
    ) -> CloudResult<Vec<T>>
    where
        W: DeserializeOwned,
        T: From<W>,
    {
        let envelope = self.call(api, operation, params).await?;
        let wire: Vec<W> = decode_list(operation, &envelope, field)?;
        Ok(wire.into_iter().map(T::from).collect())
    }

    fn vpc_param(&self) -> (String, String) {
        ("vpcNo".to_string(), self.config.vpc_no.clone())
    }
}

/// Map an error envelope to [`CloudError::Api`]
fn error_from_body(status: u16, json: &Value) -> Option<CloudError> {
    let err = json.get("responseError")?;
    let code = match err.get("returnCode") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };
    let message = err
        .get("returnMessage")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Some(CloudError::Api {
        status,
        code,
        message,
    })
}

fn decode_list<W: DeserializeOwned>(operation: &str, envelope: &Value, field: &str) -> CloudResult<Vec<W>> {
    match envelope.get(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(v) => serde_json::from_value(v.clone()).map_err(|e| CloudError::Decode {
            operation: operation.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// `name.1=a&name.2=b` list encoding used by the gateway
fn indexed_params(name: &str, values: &[String]) -> Vec<(String, String)> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| (format!("{name}.{}", i + 1), v.clone()))
        .collect()
}

fn param(key: &str, value: impl ToString) -> (String, String) {
    (key.to_string(), value.to_string())
}

fn first<T>(operation: &str, items: Vec<T>) -> CloudResult<T> {
    items
        .into_iter()
        .next()
        .ok_or_else(|| CloudError::EmptyResponse(operation.to_string()))
}

// ── wire models ────────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct CommonCode {
    code: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadBalancerInstanceWire {
    load_balancer_instance_no: String,
    load_balancer_name: Option<String>,
    load_balancer_instance_status: Option<CommonCode>,
    load_balancer_instance_status_name: Option<String>,
    load_balancer_domain: Option<String>,
    load_balancer_ip_list: Option<Vec<String>>,
}

impl From<LoadBalancerInstanceWire> for LoadBalancer {
    fn from(w: LoadBalancerInstanceWire) -> Self {
        LoadBalancer {
            id: w.load_balancer_instance_no,
            name: w.load_balancer_name.unwrap_or_default(),
            status_code: w.load_balancer_instance_status.and_then(|c| c.code),
            status_name: w.load_balancer_instance_status_name,
            domain: w.load_balancer_domain,
            ip_list: w.load_balancer_ip_list.unwrap_or_default(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetGroupWire {
    target_group_no: String,
    target_group_name: Option<String>,
    target_group_port: Option<i32>,
    target_group_protocol_type: Option<CommonCode>,
    health_check_protocol_type: Option<CommonCode>,
    health_check_port: Option<i32>,
    load_balancer_instance_no_list: Option<Vec<String>>,
}

impl From<TargetGroupWire> for TargetGroup {
    fn from(w: TargetGroupWire) -> Self {
        TargetGroup {
            id: w.target_group_no,
            name: w.target_group_name.unwrap_or_default(),
            port: w.target_group_port,
            protocol: w.target_group_protocol_type.and_then(|c| c.code),
            health_check_protocol: w.health_check_protocol_type.and_then(|c| c.code),
            health_check_port: w.health_check_port,
            load_balancer_ids: w.load_balancer_instance_no_list.unwrap_or_default(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListenerWire {
    load_balancer_listener_no: String,
    port: i32,
    protocol_type: Option<CommonCode>,
    target_group_no: Option<String>,
}

impl From<ListenerWire> for Listener {
    fn from(w: ListenerWire) -> Self {
        Listener {
            id: w.load_balancer_listener_no,
            port: w.port,
            protocol: w.protocol_type.and_then(|c| c.code),
            target_group_id: w.target_group_no,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetWire {
    target_no: String,
    target_name: Option<String>,
    target_ip: Option<String>,
    health_check_status: Option<CommonCode>,
}

impl From<TargetWire> for Target {
    fn from(w: TargetWire) -> Self {
        Target {
            id: w.target_no,
            name: w.target_name,
            ip: w.target_ip,
            health_status: w.health_check_status.and_then(|c| c.code),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerInstanceWire {
    server_instance_no: String,
    server_name: Option<String>,
    vpc_no: Option<String>,
}

impl From<ServerInstanceWire> for ServerInstance {
    fn from(w: ServerInstanceWire) -> Self {
        ServerInstance {
            id: w.server_instance_no,
            name: w.server_name,
            vpc_no: w.vpc_no,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NetworkInterfaceWire {
    network_interface_no: String,
    ip: Option<String>,
    instance_no: Option<String>,
}

impl From<NetworkInterfaceWire> for NetworkInterface {
    fn from(w: NetworkInterfaceWire) -> Self {
        NetworkInterface {
            id: w.network_interface_no,
            ip: w.ip,
            instance_id: w.instance_no,
        }
    }
}

#[async_trait]
impl LoadBalancerApi for NcloudClient {
    async fn create_load_balancer(&self, req: &CreateLoadBalancer) -> CloudResult<LoadBalancer> {
        let params = vec![
            self.vpc_param(),
            param("loadBalancerTypeCode", LOAD_BALANCER_TYPE),
            param("loadBalancerName", &req.name),
            param("loadBalancerDescription", &req.description),
            param("subnetNoList.1", &self.config.subnet_no),
        ];
        let items: Vec<LoadBalancer> = self
            .call_list::<LoadBalancerInstanceWire, _>(
                LOAD_BALANCER_API,
                "createLoadBalancerInstance",
                params,
                "loadBalancerInstanceList",
            )
            .await?;
        first("createLoadBalancerInstance", items)
    }

    async fn list_load_balancers(&self) -> CloudResult<Vec<LoadBalancer>> {
        self.call_list::<LoadBalancerInstanceWire, _>(
            LOAD_BALANCER_API,
            "getLoadBalancerInstanceList",
            vec![self.vpc_param()],
            "loadBalancerInstanceList",
        )
        .await
    }

    async fn get_load_balancer(&self, id: &str) -> CloudResult<Option<LoadBalancer>> {
        let items: Vec<LoadBalancer> = self
            .call_list::<LoadBalancerInstanceWire, _>(
                LOAD_BALANCER_API,
                "getLoadBalancerInstanceDetail",
                vec![param("loadBalancerInstanceNo", id)],
                "loadBalancerInstanceList",
            )
            .await?;
        Ok(items.into_iter().next())
    }

    async fn delete_load_balancer(&self, id: &str) -> CloudResult<()> {
        self.call(
            LOAD_BALANCER_API,
            "deleteLoadBalancerInstances",
            indexed_params("loadBalancerInstanceNoList", &[id.to_string()]),
        )
        .await?;
        Ok(())
    }

    async fn create_target_group(&self, req: &CreateTargetGroup) -> CloudResult<TargetGroup> {
        let params = vec![
            self.vpc_param(),
            param("targetGroupName", &req.name),
            param("targetTypeCode", TARGET_TYPE_VSVR),
            param("targetGroupProtocolTypeCode", TARGET_GROUP_PROTOCOL),
            param("targetGroupPort", req.port),
            param("targetGroupDescription", &req.description),
            param("healthCheckProtocolTypeCode", &req.health_check_protocol),
            param("healthCheckPort", req.port),
        ];
        let items: Vec<TargetGroup> = self
            .call_list::<TargetGroupWire, _>(
                LOAD_BALANCER_API,
                "createTargetGroup",
                params,
                "targetGroupList",
            )
            .await?;
        first("createTargetGroup", items)
    }

    async fn list_target_groups(&self) -> CloudResult<Vec<TargetGroup>> {
        self.call_list::<TargetGroupWire, _>(
            LOAD_BALANCER_API,
            "getTargetGroupList",
            vec![self.vpc_param()],
            "targetGroupList",
        )
        .await
    }

    async fn get_target_group(&self, id: &str) -> CloudResult<Option<TargetGroup>> {
        let items: Vec<TargetGroup> = self
            .call_list::<TargetGroupWire, _>(
                LOAD_BALANCER_API,
                "getTargetGroupDetail",
                vec![param("targetGroupNo", id)],
                "targetGroupList",
            )
            .await?;
        Ok(items.into_iter().next())
    }

    async fn delete_target_group(&self, id: &str) -> CloudResult<()> {
        self.call(
            LOAD_BALANCER_API,
            "deleteTargetGroups",
            indexed_params("targetGroupNoList", &[id.to_string()]),
        )
        .await?;
        Ok(())
    }

    async fn create_listener(&self, req: &CreateListener) -> CloudResult<Listener> {
        let params = vec![
            param("loadBalancerInstanceNo", &req.load_balancer_id),
            param("protocolTypeCode", req.protocol.as_str()),
            param("port", req.port),
            param("targetGroupNo", &req.target_group_id),
        ];
        let items: Vec<Listener> = self
            .call_list::<ListenerWire, _>(
                LOAD_BALANCER_API,
                "createLoadBalancerListener",
                params,
                "loadBalancerListenerList",
            )
            .await?;
        first("createLoadBalancerListener", items)
    }

    async fn list_listeners(&self, load_balancer_id: &str) -> CloudResult<Vec<Listener>> {
        self.call_list::<ListenerWire, _>(
            LOAD_BALANCER_API,
            "getLoadBalancerListenerList",
            vec![param("loadBalancerInstanceNo", load_balancer_id)],
            "loadBalancerListenerList",
        )
        .await
    }

    async fn add_targets(&self, target_group_id: &str, target_ids: &[String]) -> CloudResult<()> {
        let mut params = vec![param("targetGroupNo", target_group_id)];
        params.extend(indexed_params("targetNoList", target_ids));
        self.call(LOAD_BALANCER_API, "addTarget", params).await?;
        Ok(())
    }

    async fn list_targets(&self, target_group_id: &str) -> CloudResult<Vec<Target>> {
        self.call_list::<TargetWire, _>(
            LOAD_BALANCER_API,
            "getTargetList",
            vec![param("targetGroupNo", target_group_id)],
            "targetList",
        )
        .await
    }

    async fn list_server_instances(&self) -> CloudResult<Vec<ServerInstance>> {
        self.call_list::<ServerInstanceWire, _>(
            SERVER_API,
            "getServerInstanceList",
            vec![self.vpc_param()],
            "serverInstanceList",
        )
        .await
    }

    async fn list_network_interfaces(
        &self,
        instance_id: Option<&str>,
    ) -> CloudResult<Vec<NetworkInterface>> {
        let params = instance_id
            .map(|id| vec![param("instanceNo", id)])
            .unwrap_or_default();
        self.call_list::<NetworkInterfaceWire, _>(
            SERVER_API,
            "getNetworkInterfaceList",
            params,
            "networkInterfaceList",
        )
        .await
    }
}
