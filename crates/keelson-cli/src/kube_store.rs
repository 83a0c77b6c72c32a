//! Cluster-side storage backed by a Secret and a ConfigMap
//!
//! The applied configuration lives in the Secret `keelson-<cluster>-config`
//! and the upgrade state in the ConfigMap `keelson-<cluster>-upgrade-state`,
//! both in `kube-system`.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::ByteString;
use kube::api::{Api, DeleteParams, ObjectMeta, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::debug;

use keelson_common::{Error, Result, STATE_NAMESPACE};
use keelson_phases::ConfigStorer;
use keelson_upgrade::{UpgradeState, UpgradeStorer};

const CONFIG_KEY: &str = "config";
const RENDERED_CONFIG_KEY: &str = "rendered-config";
const DISTRIBUTION_KEY: &str = "distribution";
const STATE_KEY: &str = "state";

// Separate field managers so applying one set of keys never prunes the other.
const CONFIG_MANAGER: &str = "keelson-config";
const DISTRIBUTION_MANAGER: &str = "keelson-distribution";
const STATE_MANAGER: &str = "keelson";

/// Name of the Secret holding the applied configuration
pub fn config_secret_name(cluster: &str) -> String {
    format!("keelson-{}-config", cluster)
}

/// Name of the ConfigMap holding the upgrade state
pub fn upgrade_state_name(cluster: &str) -> String {
    format!("keelson-{}-upgrade-state", cluster)
}

/// Build a kube [`Client`] from a kubeconfig path, or kube defaults
pub async fn kube_client(kubeconfig: Option<&Path>) -> crate::Result<Client> {
    let Some(path) = kubeconfig else {
        return Ok(Client::try_default().await?);
    };
    let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
        crate::Error::command_failed(format!(
            "failed to read kubeconfig {}: {}",
            path.display(),
            e
        ))
    })?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| crate::Error::command_failed(e.to_string()))?;
    Ok(Client::try_from(config)?)
}

fn metadata(name: String, cluster: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: Some(STATE_NAMESPACE.to_string()),
        labels: Some(
            [
                (
                    "app.kubernetes.io/managed-by".to_string(),
                    "keelson".to_string(),
                ),
                ("keelson.io/cluster".to_string(), cluster.to_string()),
            ]
            .into(),
        ),
        ..Default::default()
    }
}

fn config_secret(cluster: &str, entries: &[(&str, &[u8])]) -> Secret {
    Secret {
        metadata: metadata(config_secret_name(cluster), cluster),
        data: Some(
            entries
                .iter()
                .map(|(key, value)| (key.to_string(), ByteString(value.to_vec())))
                .collect(),
        ),
        ..Default::default()
    }
}

fn secret_value(secret: &Secret, key: &str) -> Option<Vec<u8>> {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .map(|value| value.0.clone())
}

fn state_config_map(cluster: &str, state: String) -> ConfigMap {
    ConfigMap {
        metadata: metadata(upgrade_state_name(cluster), cluster),
        data: Some(BTreeMap::from([(STATE_KEY.to_string(), state)])),
        ..Default::default()
    }
}

fn config_map_state(config_map: &ConfigMap) -> Option<Vec<u8>> {
    config_map
        .data
        .as_ref()
        .and_then(|data| data.get(STATE_KEY))
        .map(|state| state.as_bytes().to_vec())
}

fn storage_error(context: &str, e: kube::Error) -> Error {
    Error::storage(context, e.to_string())
}

/// Applied configuration stored in a Secret
pub struct KubeConfigStorer {
    api: Api<Secret>,
    cluster: String,
}

impl KubeConfigStorer {
    /// Storer for `cluster`
    pub fn new(client: Client, cluster: impl Into<String>) -> Self {
        Self {
            api: Api::namespaced(client, STATE_NAMESPACE),
            cluster: cluster.into(),
        }
    }

    async fn get_key(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let name = config_secret_name(&self.cluster);
        match self.api.get(&name).await {
            Ok(secret) => Ok(secret_value(&secret, key)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(secret = %name, "configuration secret not found");
                Ok(None)
            }
            Err(e) => Err(storage_error("get-config", e)),
        }
    }

    async fn apply(&self, manager: &str, entries: &[(&str, &[u8])]) -> Result<()> {
        let name = config_secret_name(&self.cluster);
        let secret = config_secret(&self.cluster, entries);
        let params = PatchParams::apply(manager).force();
        self.api
            .patch(&name, &params, &Patch::Apply(&secret))
            .await
            .map_err(|e| storage_error("store-config", e))?;
        debug!(secret = %name, manager = %manager, "stored configuration");
        Ok(())
    }
}

#[async_trait]
impl ConfigStorer for KubeConfigStorer {
    async fn get_config(&self) -> Result<Option<Vec<u8>>> {
        self.get_key(CONFIG_KEY).await
    }

    async fn get_rendered_config(&self) -> Result<Option<Vec<u8>>> {
        self.get_key(RENDERED_CONFIG_KEY).await
    }

    async fn store_config(&self, raw: &[u8], rendered: &[u8]) -> Result<()> {
        self.apply(
            CONFIG_MANAGER,
            &[(CONFIG_KEY, raw), (RENDERED_CONFIG_KEY, rendered)],
        )
        .await
    }

    async fn store_distribution_manifest(&self, manifest: &[u8]) -> Result<()> {
        self.apply(DISTRIBUTION_MANAGER, &[(DISTRIBUTION_KEY, manifest)])
            .await
    }
}

/// Upgrade state stored in a ConfigMap
pub struct KubeUpgradeStorer {
    api: Api<ConfigMap>,
    cluster: String,
}

impl KubeUpgradeStorer {
    /// Storer for `cluster`
    pub fn new(client: Client, cluster: impl Into<String>) -> Self {
        Self {
            api: Api::namespaced(client, STATE_NAMESPACE),
            cluster: cluster.into(),
        }
    }
}

#[async_trait]
impl UpgradeStorer for KubeUpgradeStorer {
    async fn store(&self, state: &UpgradeState) -> Result<()> {
        let name = upgrade_state_name(&self.cluster);
        let json = String::from_utf8(state.to_bytes()?)
            .map_err(|e| Error::serialization(e.to_string()))?;
        let config_map = state_config_map(&self.cluster, json);
        self.api
            .patch(
                &name,
                &PatchParams::apply(STATE_MANAGER).force(),
                &Patch::Apply(&config_map),
            )
            .await
            .map_err(|e| storage_error("store-upgrade-state", e))?;
        Ok(())
    }

    async fn get(&self) -> Result<Option<Vec<u8>>> {
        match self.api.get(&upgrade_state_name(&self.cluster)).await {
            Ok(config_map) => Ok(config_map_state(&config_map)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(storage_error("get-upgrade-state", e)),
        }
    }

    async fn delete(&self) -> Result<()> {
        let name = upgrade_state_name(&self.cluster);
        match self.api.delete(&name, &DeleteParams::default()).await {
            Ok(_) => {
                debug!(config_map = %name, "deleted upgrade state");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(storage_error("delete-upgrade-state", e)),
        }
    }
}
