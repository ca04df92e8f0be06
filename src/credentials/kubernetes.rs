use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{Api, Client};

use crate::error::{Error, Result};

/// Decoded `data` of a Secret, with `stringData`-style entries taking priority
pub async fn read_secret_data(
    client: &Client,
    namespace: &str,
    name: &str,
) -> Result<BTreeMap<String, String>> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let secret = api.get_opt(name).await?.ok_or_else(|| {
        Error::CredentialError(format!("secret {namespace}/{name} not found"))
    })?;
    Ok(secret_to_map(&secret))
}

pub async fn read_config_map(
    client: &Client,
    namespace: &str,
    name: &str,
) -> Result<BTreeMap<String, String>> {
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    let cm = api.get_opt(name).await?.ok_or_else(|| {
        Error::ConfigError(format!("configmap {namespace}/{name} not found"))
    })?;
    Ok(cm.data.unwrap_or_default())
}

pub(crate) fn secret_to_map(secret: &Secret) -> BTreeMap<String, String> {
    let mut out: BTreeMap<String, String> = secret
        .data
        .iter()
        .flatten()
        .filter_map(|(k, v)| {
            String::from_utf8(v.0.clone())
                .ok()
                .map(|s| (k.clone(), s))
        })
        .collect();
    if let Some(string_data) = &secret.string_data {
        out.extend(string_data.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    out
}
