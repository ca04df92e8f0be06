//! Target registration with bounded retry and post-hoc verification
//!
//! A bulk `add_targets` call can succeed while silently dropping some targets,
//! so every round is verified against the target group's registered list and
//! only the unconfirmed remainder is carried into the next round.

use tracing::{debug, info, instrument, warn};

use super::context::Engine;
use super::node_resolver::resolve_worker_instances;
use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// Every target confirmed
    Complete { registered: usize },
    /// Some but not all targets confirmed
    Partial {
        registered: usize,
        unconfirmed: Vec<String>,
    },
    /// Nothing to register
    NoTargets,
}

impl RegistrationOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RegistrationOutcome::Complete { .. } => "complete",
            RegistrationOutcome::Partial { .. } => "partial",
            RegistrationOutcome::NoTargets => "no_targets",
        }
    }
}

/// Register `targets` into `target_group_id`.
///
/// Fails only when not a single target could be confirmed.
#[instrument(skip(engine, targets), fields(target_count = targets.len()))]
pub async fn register_targets(
    engine: &Engine,
    target_group_id: &str,
    targets: &[String],
) -> Result<RegistrationOutcome> {
    let mut pending: Vec<String> = Vec::with_capacity(targets.len());
    for t in targets {
        if !pending.contains(t) {
            pending.push(t.clone());
        }
    }
    let attempted = pending.len();
    if attempted == 0 {
        return Ok(RegistrationOutcome::NoTargets);
    }

    let rounds = engine.timings.registration_rounds.max(1);
    for round in 0..rounds {
        let last_round = round + 1 == rounds;

        match engine.cloud.add_targets(target_group_id, &pending).await {
            Ok(()) => match engine.cloud.list_targets(target_group_id).await {
                Ok(registered) => {
                    pending.retain(|id| !registered.iter().any(|t| &t.id == id));
                    if pending.is_empty() {
                        break;
                    }
                    info!(
                        round = round + 1,
                        unconfirmed = pending.len(),
                        "Targets not yet visible in target group"
                    );
                }
                Err(e) => warn!(round = round + 1, error = %e, "Could not verify target registration"),
            },
            Err(e) => warn!(
                round = round + 1,
                targets = pending.len(),
                error = %e,
                "Target registration call failed"
            ),
        }

        if !last_round {
            engine
                .timings
                .registration_backoff
                .wait(round, &engine.cancel)
                .await?;
        }
    }

    log_target_health(engine, target_group_id).await;

    let outcome = if pending.is_empty() {
        info!(registered = attempted, "All targets registered");
        RegistrationOutcome::Complete {
            registered: attempted,
        }
    } else if pending.len() < attempted {
        warn!(
            registered = attempted - pending.len(),
            unconfirmed = ?pending,
            "Targets partially registered"
        );
        RegistrationOutcome::Partial {
            registered: attempted - pending.len(),
            unconfirmed: pending,
        }
    } else {
        #[cfg(feature = "metrics")]
        super::metrics::inc_target_registration("failed");
        return Err(Error::RegistrationFailed {
            target_group: target_group_id.to_string(),
            attempted,
            unconfirmed: pending.len(),
        });
    };

    #[cfg(feature = "metrics")]
    super::metrics::inc_target_registration(outcome.label());
    Ok(outcome)
}

/// Resolve worker nodes and register them; the node listing is the only hard failure
pub async fn register_nodes(engine: &Engine, target_group_id: &str) -> Result<RegistrationOutcome> {
    let instances = resolve_worker_instances(engine).await?;
    if instances.is_empty() {
        warn!(target_group = target_group_id, "No worker instances resolved for registration");
        return Ok(RegistrationOutcome::NoTargets);
    }
    register_targets(engine, target_group_id, &instances).await
}

/// Register whichever of `instances` the target group does not hold yet.
///
/// Runs on every pass so a registration cut short earlier is completed later.
pub async fn sync_targets(
    engine: &Engine,
    target_group_id: &str,
    instances: &[String],
) -> Result<RegistrationOutcome> {
    if instances.is_empty() {
        return Ok(RegistrationOutcome::NoTargets);
    }
    let registered = engine.cloud.list_targets(target_group_id).await?;
    let missing: Vec<String> = instances
        .iter()
        .filter(|id| !registered.iter().any(|t| &t.id == *id))
        .cloned()
        .collect();
    if missing.is_empty() {
        return Ok(RegistrationOutcome::Complete {
            registered: instances.len(),
        });
    }

    info!(target_group = target_group_id, missing = ?missing, "Registering missing targets");
    register_targets(engine, target_group_id, &missing).await
}

/// Diagnostic only; failures are logged and ignored
async fn log_target_health(engine: &Engine, target_group_id: &str) {
    match engine.cloud.get_target_group(target_group_id).await {
        Ok(Some(tg)) => debug!(
            target_group = %tg.id,
            name = %tg.name,
            port = ?tg.port,
            health_check_protocol = ?tg.health_check_protocol,
            "Target group detail"
        ),
        Ok(None) => warn!(target_group = target_group_id, "Target group detail not found"),
        Err(e) => debug!(target_group = target_group_id, error = %e, "Target group detail unavailable"),
    }

    match engine.cloud.list_targets(target_group_id).await {
        Ok(targets) => {
            let healthy = targets.iter().filter(|t| t.is_healthy()).count();
            for t in &targets {
                debug!(
                    target = %t.id,
                    ip = ?t.ip,
                    health = t.health_status.as_deref().unwrap_or("UNKNOWN"),
                    "Target health"
                );
            }
            info!(
                target_group = target_group_id,
                healthy,
                total = targets.len(),
                "Target health summary"
            );
        }
        Err(e) => debug!(target_group = target_group_id, error = %e, "Target health unavailable"),
    }
}
