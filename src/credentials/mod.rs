//! Credential supply for the cloud gateway
//!
//! A [`CredentialChain`] is an ordered list of [`CredentialSource`]s. The first
//! source that yields a complete key pair wins; VPC, subnet and region that the
//! winning source leaves empty are filled from the `naver-cloud-config` ConfigMap.

mod kubernetes;
mod openbao;

use std::collections::BTreeMap;

use clap::ValueEnum;
use kube::Client;
use secrecy::SecretString;
use tracing::{info, warn};

use crate::error::{Error, Result};

pub use kubernetes::{read_config_map, read_secret_data};
pub use openbao::{OpenBaoConfig, OpenBaoSource};

pub const KEY_API_KEY: &str = "NAVER_CLOUD_API_KEY";
pub const KEY_API_SECRET: &str = "NAVER_CLOUD_API_SECRET";
pub const KEY_REGION: &str = "NAVER_CLOUD_REGION";
pub const KEY_VPC_NO: &str = "NAVER_CLOUD_VPC_NO";
pub const KEY_SUBNET_NO: &str = "NAVER_CLOUD_SUBNET_NO";

pub const DEFAULT_REGION: &str = "KR";
pub const DEFAULT_SECRET_NAME: &str = "naver-cloud-credentials";
pub const DEFAULT_CONFIG_MAP_NAME: &str = "naver-cloud-config";

/// Resolved provider credentials and network scope
#[derive(Clone, Debug)]
pub struct CloudCredentials {
    pub api_key: String,
    pub api_secret: SecretString,
    pub region: String,
    pub vpc_no: String,
    pub subnet_no: String,
}

impl CloudCredentials {
    /// Build from a flat key/value view of a secret; `origin` names it in errors
    pub fn from_lookup<F>(lookup: F, origin: &str) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).unwrap_or_default();

        let api_key = get(KEY_API_KEY);
        if api_key.is_empty() {
            return Err(Error::CredentialError(format!(
                "{KEY_API_KEY} not found in {origin}"
            )));
        }
        let api_secret = get(KEY_API_SECRET);
        if api_secret.is_empty() {
            return Err(Error::CredentialError(format!(
                "{KEY_API_SECRET} not found in {origin}"
            )));
        }

        let region = match get(KEY_REGION) {
            r if r.is_empty() => DEFAULT_REGION.to_string(),
            r => r,
        };

        Ok(Self {
            api_key,
            api_secret: SecretString::new(api_secret),
            region,
            vpc_no: get(KEY_VPC_NO),
            subnet_no: get(KEY_SUBNET_NO),
        })
    }

    /// Fill empty network scope from ConfigMap data
    pub fn supplement_from(&mut self, data: &BTreeMap<String, String>) {
        if self.vpc_no.is_empty() {
            if let Some(v) = data.get(KEY_VPC_NO) {
                self.vpc_no = v.clone();
            }
        }
        if self.subnet_no.is_empty() {
            if let Some(v) = data.get(KEY_SUBNET_NO) {
                self.subnet_no = v.clone();
            }
        }
        if let Some(v) = data.get(KEY_REGION).filter(|v| !v.is_empty()) {
            if self.region == DEFAULT_REGION {
                self.region = v.clone();
            }
        }
    }

    pub fn is_network_scoped(&self) -> bool {
        !self.vpc_no.is_empty() && !self.subnet_no.is_empty()
    }
}

/// How credentials are looked up
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum SecretMode {
    /// OpenBao when configured, then the Kubernetes Secret
    #[default]
    Auto,
    #[value(name = "openbao")]
    OpenBao,
    /// Secret materialised by the External Secrets Operator
    Eso,
    Kubernetes,
    /// Process environment
    Env,
}

/// Settings the chain is built from
#[derive(Clone, Debug)]
pub struct SecretConfig {
    pub mode: SecretMode,
    pub namespace: String,
    pub secret_name: String,
    pub eso_secret_name: String,
    pub config_map_name: String,
    pub openbao: Option<OpenBaoConfig>,
}

impl Default for SecretConfig {
    fn default() -> Self {
        Self {
            mode: SecretMode::Auto,
            namespace: "k-paas-system".to_string(),
            secret_name: DEFAULT_SECRET_NAME.to_string(),
            eso_secret_name: DEFAULT_SECRET_NAME.to_string(),
            config_map_name: DEFAULT_CONFIG_MAP_NAME.to_string(),
            openbao: None,
        }
    }
}

/// One place credentials can come from
pub enum CredentialSource {
    Environment,
    KubernetesSecret { namespace: String, name: String },
    ExternalSecret { namespace: String, name: String },
    OpenBao(OpenBaoSource),
}

impl CredentialSource {
    pub fn describe(&self) -> String {
        match self {
            CredentialSource::Environment => "environment".to_string(),
            CredentialSource::KubernetesSecret { namespace, name } => {
                format!("secret {namespace}/{name}")
            }
            CredentialSource::ExternalSecret { namespace, name } => {
                format!("external secret {namespace}/{name}")
            }
            CredentialSource::OpenBao(source) => format!("openbao {}", source.config().address),
        }
    }

    pub async fn fetch(&self, client: &Client) -> Result<CloudCredentials> {
        match self {
            CredentialSource::Environment => {
                CloudCredentials::from_lookup(|k| std::env::var(k).ok(), "environment")
            }
            CredentialSource::KubernetesSecret { namespace, name }
            | CredentialSource::ExternalSecret { namespace, name } => {
                let data = read_secret_data(client, namespace, name).await?;
                CloudCredentials::from_lookup(
                    |k| data.get(k).cloned(),
                    &format!("secret {namespace}/{name}"),
                )
            }
            CredentialSource::OpenBao(source) => source.fetch(client).await,
        }
    }
}

/// Ordered fallback list of sources
pub struct CredentialChain {
    sources: Vec<CredentialSource>,
    config_map: Option<(String, String)>,
}

impl CredentialChain {
    pub fn new(sources: Vec<CredentialSource>) -> Self {
        Self {
            sources,
            config_map: None,
        }
    }

    /// Supplement missing network scope from this ConfigMap
    pub fn with_config_map(mut self, namespace: &str, name: &str) -> Self {
        self.config_map = Some((namespace.to_string(), name.to_string()));
        self
    }

    pub fn from_config(config: &SecretConfig) -> Self {
        let k8s_secret = || CredentialSource::KubernetesSecret {
            namespace: config.namespace.clone(),
            name: config.secret_name.clone(),
        };
        let openbao = || config.openbao.clone().map(|c| CredentialSource::OpenBao(OpenBaoSource::new(c)));

        let sources = match config.mode {
            SecretMode::Auto => openbao().into_iter().chain(std::iter::once(k8s_secret())).collect(),
            SecretMode::OpenBao => openbao().into_iter().collect(),
            SecretMode::Eso => vec![CredentialSource::ExternalSecret {
                namespace: config.namespace.clone(),
                name: config.eso_secret_name.clone(),
            }],
            SecretMode::Kubernetes => vec![k8s_secret()],
            SecretMode::Env => vec![CredentialSource::Environment],
        };

        Self::new(sources).with_config_map(&config.namespace, &config.config_map_name)
    }

    pub fn sources(&self) -> &[CredentialSource] {
        &self.sources
    }

    pub async fn fetch(&self, client: &Client) -> Result<CloudCredentials> {
        let mut failures = Vec::new();

        for source in &self.sources {
            match source.fetch(client).await {
                Ok(mut creds) => {
                    info!(source = %source.describe(), "Loaded cloud credentials");
                    if !creds.is_network_scoped() {
                        self.supplement(client, &mut creds).await;
                    }
                    return Ok(creds);
                }
                Err(e) => {
                    warn!(source = %source.describe(), error = %e, "Credential source unavailable, falling back");
                    failures.push(format!("{}: {e}", source.describe()));
                }
            }
        }

        if failures.is_empty() {
            return Err(Error::CredentialError(
                "no credential source configured".to_string(),
            ));
        }
        Err(Error::CredentialError(failures.join("; ")))
    }

    async fn supplement(&self, client: &Client, creds: &mut CloudCredentials) {
        let Some((namespace, name)) = &self.config_map else {
            return;
        };
        match read_config_map(client, namespace, name).await {
            Ok(data) => {
                creds.supplement_from(&data);
                info!(config_map = %name, "Supplemented network scope from ConfigMap");
            }
            Err(e) => warn!(config_map = %name, error = %e, "ConfigMap unavailable, keeping defaults"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_credentials_default_region() {
        let creds = CloudCredentials::from_lookup(
            lookup(&[(KEY_API_KEY, "key"), (KEY_API_SECRET, "secret")]),
            "test",
        )
        .unwrap();
        assert_eq!(creds.region, DEFAULT_REGION);
        assert_eq!(creds.api_secret.expose_secret(), "secret");
        assert!(!creds.is_network_scoped());
    }

    #[test]
    fn test_missing_secret_is_rejected() {
        let err = CloudCredentials::from_lookup(lookup(&[(KEY_API_KEY, "key")]), "secret ns/x")
            .unwrap_err();
        assert!(err.to_string().contains(KEY_API_SECRET));
        assert!(err.to_string().contains("secret ns/x"));
    }

    #[test]
    fn test_supplement_only_fills_gaps() {
        let mut creds = CloudCredentials::from_lookup(
            lookup(&[
                (KEY_API_KEY, "key"),
                (KEY_API_SECRET, "secret"),
                (KEY_VPC_NO, "vpc-1"),
            ]),
            "test",
        )
        .unwrap();
        let data: BTreeMap<String, String> = [
            (KEY_VPC_NO, "vpc-other"),
            (KEY_SUBNET_NO, "subnet-9"),
            (KEY_REGION, "FKR"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        creds.supplement_from(&data);
        assert_eq!(creds.vpc_no, "vpc-1");
        assert_eq!(creds.subnet_no, "subnet-9");
        assert_eq!(creds.region, "FKR");
        assert!(creds.is_network_scoped());
    }

    #[test]
    fn test_chain_order_per_mode() {
        let mut config = SecretConfig::default();
        assert_eq!(CredentialChain::from_config(&config).sources().len(), 1);

        config.openbao = Some(OpenBaoConfig::default());
        let chain = CredentialChain::from_config(&config);
        assert_eq!(chain.sources().len(), 2);
        assert!(matches!(chain.sources()[0], CredentialSource::OpenBao(_)));
        assert!(matches!(
            chain.sources()[1],
            CredentialSource::KubernetesSecret { .. }
        ));

        config.mode = SecretMode::Env;
        let chain = CredentialChain::from_config(&config);
        assert!(matches!(chain.sources()[0], CredentialSource::Environment));

        config.mode = SecretMode::Eso;
        let chain = CredentialChain::from_config(&config);
        assert_eq!(
            chain.sources()[0].describe(),
            format!("external secret k-paas-system/{DEFAULT_SECRET_NAME}")
        );
    }
}
