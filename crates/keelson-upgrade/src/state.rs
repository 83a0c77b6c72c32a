//! Upgrade state and resumption

use std::fmt;

use serde::{Deserialize, Serialize};

use keelson_common::{Error, Lifecycle, Result, Stage, SubPhase};

/// Status of one sub-phase; `success` and `failed` are terminal for a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    /// Not finished yet
    #[default]
    Pending,
    /// Completed
    Success,
    /// Failed; the next run resumes here
    Failed,
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PhaseStatus::Pending => "pending",
            PhaseStatus::Success => "success",
            PhaseStatus::Failed => "failed",
        })
    }
}

/// One sub-phase slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradePhase {
    /// Current status
    pub status: PhaseStatus,
}

impl UpgradePhase {
    /// Slot with the given status
    pub fn with_status(status: PhaseStatus) -> Self {
        Self { status }
    }
}

/// Status of the nine sub-phases of an upgrade.
///
/// Slots for phases the cluster kind does not run are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pre_infrastructure: Option<UpgradePhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    infrastructure: Option<UpgradePhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    post_infrastructure: Option<UpgradePhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pre_kubernetes: Option<UpgradePhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kubernetes: Option<UpgradePhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    post_kubernetes: Option<UpgradePhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pre_distribution: Option<UpgradePhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    distribution: Option<UpgradePhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    post_distribution: Option<UpgradePhase>,
}

impl UpgradeState {
    /// Fresh state with every sub-phase of `lifecycles` pending
    pub fn new(lifecycles: &[Lifecycle]) -> Self {
        let mut state = Self::default();
        for sub in SubPhase::ORDER
            .into_iter()
            .filter(|s| lifecycles.contains(&s.lifecycle))
        {
            *state.slot_mut(sub) = Some(UpgradePhase::default());
        }
        state
    }

    fn slot_mut(&mut self, sub: SubPhase) -> &mut Option<UpgradePhase> {
        match (sub.lifecycle, sub.stage) {
            (Lifecycle::Infrastructure, Stage::Pre) => &mut self.pre_infrastructure,
            (Lifecycle::Infrastructure, Stage::Core) => &mut self.infrastructure,
            (Lifecycle::Infrastructure, Stage::Post) => &mut self.post_infrastructure,
            (Lifecycle::Kubernetes, Stage::Pre) => &mut self.pre_kubernetes,
            (Lifecycle::Kubernetes, Stage::Core) => &mut self.kubernetes,
            (Lifecycle::Kubernetes, Stage::Post) => &mut self.post_kubernetes,
            (Lifecycle::Distribution, Stage::Pre) => &mut self.pre_distribution,
            (Lifecycle::Distribution, Stage::Core) => &mut self.distribution,
            (Lifecycle::Distribution, Stage::Post) => &mut self.post_distribution,
        }
    }

    /// The slot of a sub-phase, if tracked
    pub fn get(&self, sub: SubPhase) -> Option<UpgradePhase> {
        match (sub.lifecycle, sub.stage) {
            (Lifecycle::Infrastructure, Stage::Pre) => self.pre_infrastructure,
            (Lifecycle::Infrastructure, Stage::Core) => self.infrastructure,
            (Lifecycle::Infrastructure, Stage::Post) => self.post_infrastructure,
            (Lifecycle::Kubernetes, Stage::Pre) => self.pre_kubernetes,
            (Lifecycle::Kubernetes, Stage::Core) => self.kubernetes,
            (Lifecycle::Kubernetes, Stage::Post) => self.post_kubernetes,
            (Lifecycle::Distribution, Stage::Pre) => self.pre_distribution,
            (Lifecycle::Distribution, Stage::Core) => self.distribution,
            (Lifecycle::Distribution, Stage::Post) => self.post_distribution,
        }
    }

    /// Record the status of a sub-phase
    pub fn mark(&mut self, sub: SubPhase, status: PhaseStatus) {
        *self.slot_mut(sub) = Some(UpgradePhase::with_status(status));
    }

    /// Earliest tracked sub-phase, in canonical order, not yet successful.
    ///
    /// `None` when every tracked slot succeeded.
    pub fn latest_resumable_phase(&self) -> Option<SubPhase> {
        SubPhase::ORDER.into_iter().find(|sub| {
            matches!(
                self.get(*sub),
                Some(UpgradePhase {
                    status: PhaseStatus::Pending | PhaseStatus::Failed
                })
            )
        })
    }

    /// Tracked slots in canonical order
    pub fn slots(&self) -> Vec<(SubPhase, UpgradePhase)> {
        SubPhase::ORDER
            .into_iter()
            .filter_map(|sub| self.get(sub).map(|slot| (sub, slot)))
            .collect()
    }

    /// Decode persisted state
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| Error::state_corrupted(e.to_string()))
    }

    /// Encode for persistence
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::serialization(e.to_string()))
    }
}
