//! Load balancer readiness polling and external address resolution

use tracing::{debug, info, warn};

use super::backoff::sleep_or_cancel;
use super::context::Engine;
use crate::cloud::LoadBalancerApi;
use crate::error::{Error, Result};

/// Suffix of the synthesized hostname used when the provider reports neither
/// a domain nor an IP
pub const FALLBACK_DOMAIN_SUFFIX: &str = "ncloud.com";

pub fn fallback_address(lb_id: &str) -> String {
    format!("lb-{lb_id}.{FALLBACK_DOMAIN_SUFFIX}")
}

/// Address of a serving load balancer: domain, else first IP, else the
/// synthesized hostname. Not serving yet is [`Error::NotReady`].
pub async fn external_address(cloud: &dyn LoadBalancerApi, lb_id: &str) -> Result<String> {
    let lb = cloud
        .get_load_balancer(lb_id)
        .await?
        .ok_or_else(|| Error::NotReady(format!("load balancer {lb_id} not found")))?;

    if !lb.is_serving() {
        return Err(Error::NotReady(format!(
            "load balancer {lb_id} is {}",
            lb.status_label()
        )));
    }

    if let Some(domain) = lb.domain.as_deref().filter(|d| !d.is_empty()) {
        return Ok(domain.to_string());
    }
    if let Some(ip) = lb.ip_list.iter().find(|ip| !ip.is_empty()) {
        return Ok(ip.clone());
    }

    let fallback = fallback_address(lb_id);
    debug!(lb_id, address = %fallback, "Load balancer has no domain or IP, using fallback");
    Ok(fallback)
}

/// Up to `address_attempts` tries; `None` when every attempt failed
pub async fn external_address_with_retry(engine: &Engine, lb_id: &str) -> Result<Option<String>> {
    let attempts = engine.timings.address_attempts.max(1);
    for attempt in 0..attempts {
        match external_address(engine.cloud.as_ref(), lb_id).await {
            Ok(address) => return Ok(Some(address)),
            Err(e) => info!(lb_id, attempt = attempt + 1, error = %e, "External address not available yet"),
        }
        if attempt + 1 < attempts {
            engine
                .timings
                .address_backoff
                .wait(attempt, &engine.cancel)
                .await?;
        }
    }
    Ok(None)
}

/// Poll until the load balancer is settled (`RUN`/`USED` and `Running`).
///
/// Returns `Ok(false)` when attempts run out; a terminal provider status is
/// [`Error::LoadBalancerFailed`].
pub async fn wait_until_ready(engine: &Engine, lb_id: &str) -> Result<bool> {
    let timings = &engine.timings;
    let attempts = timings.readiness_attempts.max(1);

    for attempt in 0..attempts {
        let last = attempt + 1 == attempts;
        match engine.cloud.get_load_balancer(lb_id).await {
            Ok(Some(lb)) if lb.is_settled() => {
                info!(lb_id, status = %lb.status_label(), "Load balancer ready");
                return Ok(true);
            }
            Ok(Some(lb)) if lb.is_failed() => {
                return Err(Error::LoadBalancerFailed(format!(
                    "load balancer {lb_id} is {}",
                    lb.status_label()
                )));
            }
            Ok(Some(lb)) => {
                debug!(lb_id, attempt = attempt + 1, status = %lb.status_label(), "Waiting for load balancer");
            }
            Ok(None) => debug!(lb_id, attempt = attempt + 1, "Load balancer detail empty"),
            Err(e) => {
                warn!(lb_id, attempt = attempt + 1, error = %e, "Load balancer status check failed");
                if !last {
                    sleep_or_cancel(timings.readiness_error_delay, &engine.cancel).await?;
                }
                continue;
            }
        }
        if !last {
            timings.readiness_backoff.wait(attempt, &engine.cancel).await?;
        }
    }

    warn!(lb_id, attempts, "Load balancer not ready after polling");
    Ok(false)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cloud::fake::FakeCloud;
    use crate::cloud::{CreateLoadBalancer, LoadBalancerApi};
    use crate::controller::backoff::RetryTimings;
    use crate::controller::store::fake::FakeStore;

    async fn setup() -> (Arc<FakeCloud>, Engine, String) {
        let cloud = Arc::new(FakeCloud::new());
        let lb = cloud
            .create_load_balancer(&CreateLoadBalancer {
                name: "k8s-lb-web".into(),
                description: String::new(),
            })
            .await
            .unwrap();
        let engine = Engine::new(cloud.clone(), Arc::new(FakeStore::new()))
            .with_timings(RetryTimings::immediate());
        (cloud, engine, lb.id)
    }

    #[tokio::test]
    async fn test_address_priority() {
        let (cloud, _engine, id) = setup().await;
        cloud.set_lb_ips(&["", "203.0.113.7"]);
        assert_eq!(external_address(cloud.as_ref(), &id).await.unwrap(), "203.0.113.7");

        cloud.set_lb_domain(Some("web.lb.ncloud.example"));
        assert_eq!(
            external_address(cloud.as_ref(), &id).await.unwrap(),
            "web.lb.ncloud.example"
        );

        cloud.set_lb_domain(None);
        cloud.set_lb_ips(&[]);
        assert_eq!(
            external_address(cloud.as_ref(), &id).await.unwrap(),
            format!("lb-{id}.ncloud.com")
        );
    }

    #[tokio::test]
    async fn test_address_requires_serving_status() {
        let (cloud, _engine, id) = setup().await;
        cloud.set_lb_status("INIT", "Creating");
        let err = external_address(cloud.as_ref(), &id).await.unwrap_err();
        assert!(matches!(err, Error::NotReady(_)));
    }

    #[tokio::test]
    async fn test_address_retry_exhaustion() {
        let (cloud, engine, id) = setup().await;
        cloud.set_lb_status("INIT", "Creating");
        cloud.clear_calls();
        assert_eq!(external_address_with_retry(&engine, &id).await.unwrap(), None);
        assert_eq!(cloud.count_calls("get_load_balancer"), 5);
    }

    #[tokio::test]
    async fn test_readiness() {
        let (cloud, engine, id) = setup().await;
        assert!(wait_until_ready(&engine, &id).await.unwrap());

        cloud.set_lb_status("USED", "Changing");
        cloud.clear_calls();
        assert!(!wait_until_ready(&engine, &id).await.unwrap());
        assert_eq!(cloud.count_calls("get_load_balancer"), 10);

        cloud.set_lb_status("ERROR", "Error");
        assert!(matches!(
            wait_until_ready(&engine, &id).await,
            Err(Error::LoadBalancerFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_readiness_honours_cancellation() {
        let (cloud, engine, id) = setup().await;
        cloud.set_lb_status("USED", "Changing");
        engine.cancel.cancel();
        assert!(matches!(
            wait_until_ready(&engine, &id).await,
            Err(Error::Cancelled)
        ));
    }
}
