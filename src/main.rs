use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use k8s_openapi::api::coordination::v1::Lease;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{Api, ObjectMeta, Patch, PatchParams, PostParams};
use ncloud_lb_controller::cloud::{LoadBalancerApi, NcloudClient, DEFAULT_API_ENDPOINT};
use ncloud_lb_controller::controller::{self, ControllerState, Engine, KubeServiceStore};
use ncloud_lb_controller::credentials::{
    CredentialChain, OpenBaoConfig, SecretConfig, SecretMode, DEFAULT_CONFIG_MAP_NAME,
    DEFAULT_SECRET_NAME,
};
use ncloud_lb_controller::{telemetry, Error};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controller
    Run(RunArgs),
    /// Show version and build information
    Version,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Namespace holding the credentials, ConfigMap and leader lease
    #[arg(long, env = "OPERATOR_NAMESPACE", default_value = "k-paas-system")]
    namespace: String,

    /// Where cloud credentials are read from
    #[arg(long, env = "SECRET_MODE", value_enum, default_value_t = SecretMode::Auto)]
    secret_mode: SecretMode,

    /// Kubernetes Secret with the API key pair
    #[arg(long, env = "SECRET_NAME", default_value = DEFAULT_SECRET_NAME)]
    secret_name: String,

    /// OpenBao address; in auto mode OpenBao is only tried when this is set
    #[arg(long, env = "OPENBAO_ADDR")]
    openbao_address: Option<String>,

    /// KV v2 path of the credentials in OpenBao
    #[arg(long, env = "OPENBAO_PATH")]
    openbao_path: Option<String>,

    /// AppRole role name
    #[arg(long, env = "OPENBAO_ROLE")]
    openbao_role: Option<String>,

    /// Secret holding VAULT_ROLE_ID and VAULT_SECRET_ID
    #[arg(long, env = "OPENBAO_APPROLE_SECRET")]
    openbao_approle_secret: Option<String>,

    /// Secret materialised by the External Secrets Operator
    #[arg(long, env = "ESO_SECRET_NAME", default_value = DEFAULT_SECRET_NAME)]
    eso_secret_name: String,

    /// ConfigMap supplying VPC, subnet and region
    #[arg(long, env = "CONFIG_MAP_NAME", default_value = DEFAULT_CONFIG_MAP_NAME)]
    config_map: String,

    /// Naver Cloud API gateway
    #[arg(long, env = "NCLOUD_API_ENDPOINT", default_value = DEFAULT_API_ENDPOINT)]
    api_endpoint: String,

    /// Deadline for a single reconcile pass
    #[arg(long, env = "RECONCILE_TIMEOUT_SECS", default_value_t = 600)]
    reconcile_timeout_secs: u64,

    /// Log as JSON lines
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Port of the REST API
    #[arg(long, env = "API_PORT", default_value_t = 8080)]
    api_port: u16,
}

impl RunArgs {
    fn secret_config(&self) -> SecretConfig {
        let openbao_wanted =
            self.secret_mode == SecretMode::OpenBao || self.openbao_address.is_some();
        let openbao = openbao_wanted.then(|| {
            let defaults = OpenBaoConfig::default();
            OpenBaoConfig {
                address: self.openbao_address.clone().unwrap_or(defaults.address),
                path: self.openbao_path.clone().unwrap_or(defaults.path),
                role: self.openbao_role.clone().unwrap_or(defaults.role),
                approle_namespace: self.namespace.clone(),
                approle_secret: self
                    .openbao_approle_secret
                    .clone()
                    .unwrap_or(defaults.approle_secret),
                timeout: defaults.timeout,
            }
        });

        SecretConfig {
            mode: self.secret_mode,
            namespace: self.namespace.clone(),
            secret_name: self.secret_name.clone(),
            eso_secret_name: self.eso_secret_name.clone(),
            config_map_name: self.config_map.clone(),
            openbao,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("ncloud-lb-controller v{}", env!("CARGO_PKG_VERSION"));
            println!("Build Date: {}", env!("BUILD_DATE"));
            println!("Git SHA: {}", env!("GIT_SHA"));
            Ok(())
        }
        Commands::Run(run_args) => run_operator(run_args).await,
    }
}

async fn run_operator(args: RunArgs) -> Result<(), Error> {
    if telemetry::init_telemetry(args.log_json)? {
        info!("OpenTelemetry tracing initialized");
    } else {
        info!("OpenTelemetry tracing disabled (OTEL_EXPORTER_OTLP_ENDPOINT not set)");
    }

    info!("Starting ncloud-lb-controller v{}", env!("CARGO_PKG_VERSION"));

    // Initialize Kubernetes client
    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;

    info!("Connected to Kubernetes cluster");

    let chain = CredentialChain::from_config(&args.secret_config());
    let credentials = chain.fetch(&client).await?;
    if credentials.vpc_no.is_empty() {
        return Err(Error::ConfigError(
            "VPC number is not configured (NAVER_CLOUD_VPC_NO)".to_string(),
        ));
    }
    if credentials.subnet_no.is_empty() {
        return Err(Error::ConfigError(
            "subnet number is not configured (NAVER_CLOUD_SUBNET_NO)".to_string(),
        ));
    }
    info!(
        region = %credentials.region,
        vpc_no = %credentials.vpc_no,
        subnet_no = %credentials.subnet_no,
        "Cloud scope resolved"
    );

    let cloud: Arc<dyn LoadBalancerApi> =
        Arc::new(NcloudClient::from_credentials(&args.api_endpoint, &credentials)?);
    let store = Arc::new(KubeServiceStore::new(client.clone()));
    let cancel = CancellationToken::new();
    let engine = Engine::new(cloud, store).with_cancel(cancel.clone());

    // Leader election configuration
    let leader_namespace =
        std::env::var("POD_NAMESPACE").unwrap_or_else(|_| args.namespace.clone());
    let holder_identity = std::env::var("HOSTNAME").unwrap_or_else(|_| {
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown-host".to_string())
    });

    info!("Leader election using holder ID: {}", holder_identity);

    let is_leader = Arc::new(AtomicBool::new(false));

    {
        let lease_client = client.clone();
        let lease_ns = leader_namespace.clone();
        let identity = holder_identity.clone();
        let is_leader_bg = Arc::clone(&is_leader);
        let lease_cancel = cancel.clone();

        tokio::spawn(async move {
            run_leader_election(lease_client, &lease_ns, &identity, is_leader_bg, lease_cancel).await;
        });
    }

    // Create shared controller state
    let state = Arc::new(
        ControllerState::new(engine, Arc::clone(&is_leader))
            .with_reconcile_timeout(Duration::from_secs(args.reconcile_timeout_secs)),
    );

    #[cfg(feature = "rest-api")]
    {
        let api_state = Arc::new(ncloud_lb_controller::rest_api::ApiState {
            client: client.clone(),
            is_leader: Arc::clone(&is_leader),
        });
        let port = args.api_port;
        tokio::spawn(async move {
            if let Err(e) = ncloud_lb_controller::rest_api::run_server(api_state, port).await {
                tracing::error!("REST API server error: {:?}", e);
            }
        });
    }

    // Run the main controller loop
    let result = controller::run_controller(client, state).await;

    // Flush any remaining traces
    telemetry::shutdown_telemetry();

    result
}

const LEASE_NAME: &str = "ncloud-lb-controller-leader";
const LEASE_DURATION_SECS: i32 = 15;
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

async fn run_leader_election(
    client: kube::Client,
    namespace: &str,
    identity: &str,
    is_leader: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    let leases: Api<Lease> = Api::namespaced(client, namespace);

    loop {
        let wait = match try_acquire_or_renew(&leases, namespace, identity).await {
            Ok(true) => {
                if !is_leader.load(Ordering::Relaxed) {
                    info!("Acquired leadership for lease {}", LEASE_NAME);
                }
                is_leader.store(true, Ordering::Relaxed);
                RENEW_INTERVAL
            }
            Ok(false) => {
                if is_leader.load(Ordering::Relaxed) {
                    warn!("Lost leadership for lease {}", LEASE_NAME);
                }
                is_leader.store(false, Ordering::Relaxed);
                RETRY_INTERVAL
            }
            Err(e) => {
                warn!("Leader election error: {:?}", e);
                is_leader.store(false, Ordering::Relaxed);
                RETRY_INTERVAL
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => {
                is_leader.store(false, Ordering::Relaxed);
                return;
            }
            _ = tokio::time::sleep(wait) => {}
        }
    }
}

async fn try_acquire_or_renew(
    leases: &Api<Lease>,
    namespace: &str,
    identity: &str,
) -> Result<bool, kube::Error> {
    let now = Utc::now();

    match leases.get_opt(LEASE_NAME).await? {
        Some(existing) => {
            let spec = existing.spec.as_ref();
            let current_holder = spec.and_then(|s| s.holder_identity.as_deref());

            if current_holder == Some(identity) {
                let patch = serde_json::json!({
                    "spec": {
                        "renewTime": MicroTime(now),
                        "leaseDurationSeconds": LEASE_DURATION_SECS,
                    }
                });
                leases
                    .patch(LEASE_NAME, &PatchParams::default(), &Patch::Merge(&patch))
                    .await?;
                return Ok(true);
            }

            let expired = spec
                .and_then(|s| s.renew_time.as_ref())
                .map(|renew| {
                    let duration = spec
                        .and_then(|s| s.lease_duration_seconds)
                        .unwrap_or(LEASE_DURATION_SECS);
                    let expiry = renew.0 + chrono::Duration::seconds(duration as i64);
                    now > expiry
                })
                .unwrap_or(true);

            if !expired {
                return Ok(false);
            }

            info!("Lease held by {:?} has expired, taking over", current_holder);
            let patch = serde_json::json!({
                "metadata": {
                    "resourceVersion": existing.metadata.resource_version,
                },
                "spec": {
                    "holderIdentity": identity,
                    "acquireTime": MicroTime(now),
                    "renewTime": MicroTime(now),
                    "leaseDurationSeconds": LEASE_DURATION_SECS,
                }
            });
            match leases
                .patch(LEASE_NAME, &PatchParams::default(), &Patch::Merge(&patch))
                .await
            {
                Ok(_) => Ok(true),
                // another replica won the takeover
                Err(kube::Error::Api(err)) if err.code == 409 => Ok(false),
                Err(e) => Err(e),
            }
        }
        None => {
            let lease = Lease {
                metadata: ObjectMeta {
                    name: Some(LEASE_NAME.to_string()),
                    namespace: Some(namespace.to_string()),
                    ..Default::default()
                },
                spec: Some(k8s_openapi::api::coordination::v1::LeaseSpec {
                    holder_identity: Some(identity.to_string()),
                    acquire_time: Some(MicroTime(now)),
                    renew_time: Some(MicroTime(now)),
                    lease_duration_seconds: Some(LEASE_DURATION_SECS),
                    ..Default::default()
                }),
            };
            match leases.create(&PostParams::default(), &lease).await {
                Ok(_) => {
                    info!("Created lease {} with holder {}", LEASE_NAME, identity);
                    Ok(true)
                }
                Err(kube::Error::Api(err)) if err.code == 409 => Ok(false),
                Err(e) => Err(e),
            }
        }
    }
}
