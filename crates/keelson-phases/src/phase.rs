//! The phase abstraction and the upgrade state persistence decorator

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use keelson_common::{Error, Result, Stage};
use keelson_upgrade::{UpgradeState, UpgradeStorer};

/// A unit of orchestration: one lifecycle phase or the plugins phase
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OperationPhase: Send + Sync {
    /// Phase name used in logs and errors
    fn name(&self) -> String;

    /// Run the phase starting at `start` (every sub-phase when `None`),
    /// recording sub-phase outcomes into `state`
    async fn exec(&self, start: Option<Stage>, state: &mut UpgradeState) -> Result<()>;

    /// Stop any in-flight work.
    ///
    /// Must be idempotent, safe on a phase that never started or already
    /// finished, and return promptly.
    async fn stop(&self) -> Result<()>;
}

/// Persists the upgrade state after every `exec` of the wrapped phase,
/// whether it succeeded or not
pub struct PersistingPhase {
    inner: Arc<dyn OperationPhase>,
    storer: Arc<dyn UpgradeStorer>,
}

impl PersistingPhase {
    /// Wrap `inner`, persisting through `storer`
    pub fn new(inner: Arc<dyn OperationPhase>, storer: Arc<dyn UpgradeStorer>) -> Self {
        Self { inner, storer }
    }
}

#[async_trait]
impl OperationPhase for PersistingPhase {
    fn name(&self) -> String {
        self.inner.name()
    }

    async fn exec(&self, start: Option<Stage>, state: &mut UpgradeState) -> Result<()> {
        let result = self.inner.exec(start, state).await;
        let persisted = self.storer.store(state).await;
        if persisted.is_ok() {
            debug!(
                phase = %self.inner.name(),
                resume = ?state.latest_resumable_phase(),
                "persisted upgrade state"
            );
        }

        match (result, persisted) {
            (Ok(()), persisted) => persisted,
            (Err(source), Ok(())) => Err(source),
            (Err(source), Err(persist)) => Err(Error::PersistAfterFailure {
                source: Box::new(source),
                persist: Box::new(persist),
            }),
        }
    }

    async fn stop(&self) -> Result<()> {
        self.inner.stop().await
    }
}
