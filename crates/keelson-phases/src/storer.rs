//! Storage of the applied cluster configuration

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use keelson_common::Result;

/// Cluster-side storage of the last applied configuration.
///
/// Getters return `None` when nothing has been stored yet, which marks a
/// cluster that was never applied.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConfigStorer: Send + Sync {
    /// Raw configuration file as last applied
    async fn get_config(&self) -> Result<Option<Vec<u8>>>;

    /// Configuration after defaults and templating, as last applied
    async fn get_rendered_config(&self) -> Result<Option<Vec<u8>>>;

    /// Persist the raw and rendered configuration of a successful apply
    async fn store_config(&self, raw: &[u8], rendered: &[u8]) -> Result<()>;

    /// Persist the distribution manifest (toolchain) used by the apply
    async fn store_distribution_manifest(&self, manifest: &[u8]) -> Result<()>;
}
