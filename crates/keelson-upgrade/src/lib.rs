//! Upgrade state machine for keelson
//!
//! Tracks pending/success/failed for each of the nine sub-phases so an
//! interrupted upgrade resumes at the earliest unfinished one. The state is
//! persisted on the cluster through an [`UpgradeStorer`].

pub mod state;
pub mod store;

pub use state::{PhaseStatus, UpgradePhase, UpgradeState};
pub use store::{load_state, UpgradeStorer};

#[cfg(any(test, feature = "testing"))]
pub use store::memory::MemoryUpgradeStorer;
