//! Persistence seam for upgrade state

use async_trait::async_trait;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use keelson_common::Result;

use crate::state::UpgradeState;

/// Cluster-side storage of the upgrade state
///
/// The persisted copy is the source of truth across process restarts; callers
/// must re-fetch it on every invocation.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait UpgradeStorer: Send + Sync {
    /// Persist the whole state, replacing any previous copy
    async fn store(&self, state: &UpgradeState) -> Result<()>;

    /// Raw persisted state, `None` if nothing is stored
    async fn get(&self) -> Result<Option<Vec<u8>>>;

    /// Remove the persisted state; removing nothing is not an error
    async fn delete(&self) -> Result<()>;
}

/// Fetch and decode the persisted state.
///
/// Absent state means a fresh run; malformed state is an error.
pub async fn load_state(storer: &dyn UpgradeStorer) -> Result<Option<UpgradeState>> {
    match storer.get().await? {
        Some(data) => {
            let state = UpgradeState::from_bytes(&data)?;
            debug!(resume = ?state.latest_resumable_phase(), "loaded upgrade state");
            Ok(Some(state))
        }
        None => Ok(None),
    }
}

#[cfg(any(test, feature = "testing"))]
pub mod memory {
    //! In-memory storer for tests

    use std::sync::Mutex;

    use async_trait::async_trait;

    use keelson_common::{Error, Result};

    use super::UpgradeStorer;
    use crate::state::UpgradeState;

    /// Keeps the serialized state in memory and counts writes
    #[derive(Debug, Default)]
    pub struct MemoryUpgradeStorer {
        data: Mutex<Option<Vec<u8>>>,
        stores: Mutex<Vec<UpgradeState>>,
        fail_stores: bool,
    }

    impl MemoryUpgradeStorer {
        /// Empty storer
        pub fn new() -> Self {
            Self::default()
        }

        /// Storer pre-loaded with a state
        pub fn with_state(state: &UpgradeState) -> Self {
            let storer = Self::default();
            *storer.data.lock().unwrap() = Some(state.to_bytes().unwrap());
            storer
        }

        /// Storer whose `store` always fails
        pub fn failing() -> Self {
            Self {
                fail_stores: true,
                ..Self::default()
            }
        }

        /// Currently persisted state
        pub fn current(&self) -> Option<UpgradeState> {
            self.data
                .lock()
                .unwrap()
                .as_deref()
                .map(|d| UpgradeState::from_bytes(d).unwrap())
        }

        /// Every state passed to `store`, in order
        pub fn history(&self) -> Vec<UpgradeState> {
            self.stores.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl UpgradeStorer for MemoryUpgradeStorer {
        async fn store(&self, state: &UpgradeState) -> Result<()> {
            if self.fail_stores {
                return Err(Error::storage("store-state", "storage unavailable"));
            }
            *self.data.lock().unwrap() = Some(state.to_bytes()?);
            self.stores.lock().unwrap().push(state.clone());
            Ok(())
        }

        async fn get(&self) -> Result<Option<Vec<u8>>> {
            Ok(self.data.lock().unwrap().clone())
        }

        async fn delete(&self) -> Result<()> {
            *self.data.lock().unwrap() = None;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keelson_common::{Error, Lifecycle};

    #[tokio::test]
    async fn absent_state_is_a_fresh_run() {
        let mut mock = MockUpgradeStorer::new();
        mock.expect_get().returning(|| Ok(None));
        assert!(load_state(&mock).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stored_state_is_decoded() {
        let state = UpgradeState::new(&[Lifecycle::Kubernetes]);
        let bytes = state.to_bytes().unwrap();
        let mut mock = MockUpgradeStorer::new();
        mock.expect_get().returning(move || Ok(Some(bytes.clone())));

        let loaded = load_state(&mock).await.unwrap().unwrap();
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn corrupted_state_is_surfaced() {
        let mut mock = MockUpgradeStorer::new();
        mock.expect_get()
            .returning(|| Ok(Some(b"not json".to_vec())));
        let err = load_state(&mock).await.unwrap_err();
        assert!(matches!(err, Error::StateCorrupted { .. }));
    }

    #[tokio::test]
    async fn storage_errors_propagate() {
        let mut mock = MockUpgradeStorer::new();
        mock.expect_get()
            .returning(|| Err(Error::storage("get-state", "forbidden")));
        assert!(matches!(
            load_state(&mock).await.unwrap_err(),
            Error::Storage { .. }
        ));
    }

    #[tokio::test]
    async fn memory_storer_round_trips() {
        let storer = memory::MemoryUpgradeStorer::new();
        let state = UpgradeState::new(&Lifecycle::ALL);
        storer.store(&state).await.unwrap();
        assert_eq!(load_state(&storer).await.unwrap(), Some(state));
        storer.delete().await.unwrap();
        assert!(storer.get().await.unwrap().is_none());
    }
}
