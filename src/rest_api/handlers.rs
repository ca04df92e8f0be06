//! HTTP handlers for the REST API

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use k8s_openapi::api::core::v1::Service;
use kube::{api::Api, ResourceExt};
use tracing::{error, instrument};

use crate::controller::state::{is_managed, LoadBalancerState};
use crate::controller::status::ingress_address;

use super::dto::{
    ErrorResponse, HealthResponse, LoadBalancerListResponse, LoadBalancerSummary,
    TargetGroupSummary,
};
use super::server::ApiState;

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Health check endpoint
#[instrument(skip(state))]
pub async fn health(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        leader: state.is_leader.load(Ordering::Relaxed),
    })
}

/// API view of one managed Service
pub fn summarize(svc: &Service) -> LoadBalancerSummary {
    let (state, state_error) = match LoadBalancerState::from_service(svc) {
        Ok(state) => (state, None),
        Err(e) => (LoadBalancerState::default(), Some(e.to_string())),
    };

    LoadBalancerSummary {
        namespace: svc.namespace().unwrap_or_default(),
        name: svc.name_any(),
        load_balancer_id: state.lb_id.clone(),
        target_groups: state
            .target_groups
            .iter()
            .map(|b| TargetGroupSummary {
                port: b.port.as_ref().map(ToString::to_string),
                target_group_id: b.target_group_id.clone(),
            })
            .collect(),
        ingress: ingress_address(svc),
        deleting: svc.metadata.deletion_timestamp.is_some(),
        state_error,
    }
}

/// List all Services with a managed load balancer
#[instrument(skip(state))]
pub async fn list_load_balancers(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<LoadBalancerListResponse>, ApiError> {
    let api: Api<Service> = Api::all(state.client.clone());

    match api.list(&Default::default()).await {
        Ok(services) => {
            let items: Vec<LoadBalancerSummary> = services
                .items
                .iter()
                .filter(|svc| is_managed(svc))
                .map(summarize)
                .collect();
            let total = items.len();
            Ok(Json(LoadBalancerListResponse { items, total }))
        }
        Err(e) => {
            error!("Failed to list services: {:?}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("list_failed", &e.to_string())),
            ))
        }
    }
}

/// Get the load balancer of a specific Service
#[instrument(skip(state), fields(name = %name, namespace = %namespace))]
pub async fn get_load_balancer(
    State(state): State<Arc<ApiState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<LoadBalancerSummary>, ApiError> {
    let api: Api<Service> = Api::namespaced(state.client.clone(), &namespace);
    let not_found = || {
        (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(
                "not_found",
                &format!("Service {}/{} has no managed load balancer", namespace, name),
            )),
        )
    };

    match api.get_opt(&name).await {
        Ok(Some(svc)) if is_managed(&svc) => Ok(Json(summarize(&svc))),
        Ok(_) => Err(not_found()),
        Err(e) => {
            error!("Failed to get service {}/{}: {:?}", namespace, name, e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("get_failed", &e.to_string())),
            ))
        }
    }
}

/// Metrics endpoint handler
#[cfg(feature = "metrics")]
pub async fn metrics() -> Result<String, StatusCode> {
    use prometheus_client::encoding::text::encode;
    let mut buffer = String::new();
    encode(&mut buffer, &crate::controller::metrics::REGISTRY).map_err(|e| {
        error!("Failed to encode metrics: {:?}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::state::{LB_ID_ANNOTATION, TARGET_GROUPS_ANNOTATION, TARGET_GROUP_PORTS_ANNOTATION};
    use k8s_openapi::api::core::v1::{
        LoadBalancerIngress, LoadBalancerStatus, ServicePort, ServiceSpec, ServiceStatus,
    };
    use kube::api::ObjectMeta;

    fn service(annotations: &[(&str, &str)]) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some("web".into()),
                namespace: Some("shop".into()),
                annotations: Some(
                    annotations
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                type_: Some("LoadBalancer".into()),
                ports: Some(vec![ServicePort {
                    port: 80,
                    protocol: Some("TCP".into()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            status: Some(ServiceStatus {
                load_balancer: Some(LoadBalancerStatus {
                    ingress: Some(vec![LoadBalancerIngress {
                        hostname: Some("slb-1.kr.lb.naverncp.com".into()),
                        ..Default::default()
                    }]),
                }),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_summary_of_managed_service() {
        let svc = service(&[
            (LB_ID_ANNOTATION, "lb-1"),
            (TARGET_GROUPS_ANNOTATION, "tg-1"),
            (TARGET_GROUP_PORTS_ANNOTATION, "TCP:80"),
        ]);
        let summary = summarize(&svc);
        assert_eq!(summary.load_balancer_id.as_deref(), Some("lb-1"));
        assert_eq!(
            summary.target_groups,
            vec![TargetGroupSummary {
                port: Some("TCP:80".into()),
                target_group_id: "tg-1".into(),
            }]
        );
        assert_eq!(summary.ingress.as_deref(), Some("slb-1.kr.lb.naverncp.com"));
        assert!(summary.state_error.is_none());

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["loadBalancerId"], "lb-1");
        assert_eq!(json["targetGroups"][0]["targetGroupId"], "tg-1");
    }

    #[test]
    fn test_summary_reports_corrupt_state() {
        let svc = service(&[
            (TARGET_GROUPS_ANNOTATION, "tg-1,tg-2"),
            (TARGET_GROUP_PORTS_ANNOTATION, "TCP:80"),
        ]);
        let summary = summarize(&svc);
        assert!(summary.state_error.is_some());
        assert!(summary.target_groups.is_empty());
    }
}
