//! OpenBao (Vault-compatible) credential source using AppRole login

use std::time::{Duration, Instant};

use kube::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::kubernetes::read_secret_data;
use super::CloudCredentials;
use crate::error::{Error, Result};

pub const DEFAULT_OPENBAO_ADDRESS: &str =
    "http://controller-vault.k-paas-system.svc.cluster.local:8200";
pub const DEFAULT_OPENBAO_PATH: &str = "secret/data/csp/naver-cloud";
pub const DEFAULT_OPENBAO_ROLE: &str = "naver-controller";
pub const DEFAULT_APPROLE_SECRET: &str = "controller-manager";

const KEY_ROLE_ID: &str = "VAULT_ROLE_ID";
const KEY_SECRET_ID: &str = "VAULT_SECRET_ID";
const TOKEN_HEADER: &str = "X-Vault-Token";

#[derive(Clone, Debug)]
pub struct OpenBaoConfig {
    pub address: String,
    /// KV v2 path, including the `data/` segment
    pub path: String,
    pub role: String,
    /// Namespace and name of the Secret holding `VAULT_ROLE_ID` / `VAULT_SECRET_ID`
    pub approle_namespace: String,
    pub approle_secret: String,
    pub timeout: Duration,
}

impl Default for OpenBaoConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_OPENBAO_ADDRESS.to_string(),
            path: DEFAULT_OPENBAO_PATH.to_string(),
            role: DEFAULT_OPENBAO_ROLE.to_string(),
            approle_namespace: "k-paas-system".to_string(),
            approle_secret: DEFAULT_APPROLE_SECRET.to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

struct CachedToken {
    token: SecretString,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct LoginResponse {
    auth: LoginAuth,
}

#[derive(Deserialize)]
struct LoginAuth {
    client_token: String,
    #[serde(default)]
    lease_duration: u64,
}

pub struct OpenBaoSource {
    config: OpenBaoConfig,
    http: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
}

impl OpenBaoSource {
    pub fn new(config: OpenBaoConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self {
            config,
            http,
            token: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &OpenBaoConfig {
        &self.config
    }

    pub async fn fetch(&self, client: &Client) -> Result<CloudCredentials> {
        let approle = read_secret_data(
            client,
            &self.config.approle_namespace,
            &self.config.approle_secret,
        )
        .await?;
        let role_id = approle.get(KEY_ROLE_ID).cloned().unwrap_or_default();
        let secret_id = approle.get(KEY_SECRET_ID).cloned().unwrap_or_default();
        if role_id.is_empty() || secret_id.is_empty() {
            return Err(Error::CredentialError(format!(
                "AppRole credentials missing from secret {}/{}",
                self.config.approle_namespace, self.config.approle_secret
            )));
        }
        self.fetch_with_approle(&role_id, &SecretString::new(secret_id))
            .await
    }

    /// Read credentials, logging in first unless a cached token is still valid
    pub async fn fetch_with_approle(
        &self,
        role_id: &str,
        secret_id: &SecretString,
    ) -> Result<CloudCredentials> {
        let token = self.token(role_id, secret_id).await?;
        let data = self.read_secret(&token).await?;
        let origin = format!("openbao {}", self.config.path);
        CloudCredentials::from_lookup(
            |k| data.get(k).and_then(Value::as_str).map(str::to_string),
            &origin,
        )
    }

    async fn token(&self, role_id: &str, secret_id: &SecretString) -> Result<SecretString> {
        let mut cached = self.token.lock().await;
        if let Some(entry) = cached.as_ref() {
            if Instant::now() < entry.expires_at {
                return Ok(entry.token.clone());
            }
            debug!("OpenBao token expired, logging in again");
        }

        let login = self.login(role_id, secret_id).await?;
        // refresh at 80% of the lease
        let ttl = Duration::from_secs(login.lease_duration * 8 / 10);
        let token = SecretString::new(login.client_token);
        *cached = Some(CachedToken {
            token: token.clone(),
            expires_at: Instant::now() + ttl,
        });
        info!(role = %self.config.role, ttl_secs = ttl.as_secs(), "Authenticated to OpenBao");
        Ok(token)
    }

    async fn login(&self, role_id: &str, secret_id: &SecretString) -> Result<LoginAuth> {
        let url = format!(
            "{}/v1/auth/approle/login",
            self.config.address.trim_end_matches('/')
        );
        let response = self
            .http
            .post(&url)
            .json(&json!({
                "role_id": role_id,
                "secret_id": secret_id.expose_secret(),
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::CredentialError(format!(
                "OpenBao login failed with status {status}: {body}"
            )));
        }
        let parsed: LoginResponse = response.json().await?;
        Ok(parsed.auth)
    }

    async fn read_secret(&self, token: &SecretString) -> Result<serde_json::Map<String, Value>> {
        let url = format!(
            "{}/v1/{}",
            self.config.address.trim_end_matches('/'),
            self.config.path.trim_start_matches('/')
        );
        let response = self
            .http
            .get(&url)
            .header(TOKEN_HEADER, token.expose_secret())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::CredentialError(format!(
                "OpenBao read of {} failed with status {status}",
                self.config.path
            )));
        }
        let body: Value = response.json().await?;
        match body.pointer("/data/data") {
            Some(Value::Object(map)) => Ok(map.clone()),
            _ => Err(Error::CredentialError(format!(
                "OpenBao path {} has no data",
                self.config.path
            ))),
        }
    }
}
