//! Lifecycle phase and sub-phase names
//!
//! The three lifecycle phases each split into pre/core/post sub-phases. Their
//! canonical order drives both execution and upgrade resumption.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// A lifecycle phase that owns rules and upgrade sub-phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    /// Cloud or on-premises infrastructure (networks, machines)
    Infrastructure,
    /// Kubernetes control plane and nodes
    Kubernetes,
    /// Distribution modules installed on top of kubernetes
    Distribution,
}

impl Lifecycle {
    /// All lifecycle phases in execution order
    pub const ALL: [Lifecycle; 3] = [
        Lifecycle::Infrastructure,
        Lifecycle::Kubernetes,
        Lifecycle::Distribution,
    ];

    /// Lowercase name used in rule files, state and CLI flags
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::Infrastructure => "infrastructure",
            Lifecycle::Kubernetes => "kubernetes",
            Lifecycle::Distribution => "distribution",
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Lifecycle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Lifecycle::ALL
            .into_iter()
            .find(|l| l.as_str() == s)
            .ok_or_else(|| Error::validation(format!("unknown phase '{}'", s)))
    }
}

/// Position of a sub-phase inside its lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    /// Runs before the main tool invocation
    Pre,
    /// The main tool invocation
    Core,
    /// Runs after the main tool invocation
    Post,
}

impl Stage {
    /// Stages in execution order
    pub const ALL: [Stage; 3] = [Stage::Pre, Stage::Core, Stage::Post];
}

/// One of the nine ordered sub-phases (`pre-kubernetes`, `kubernetes`, ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubPhase {
    /// Owning lifecycle phase
    pub lifecycle: Lifecycle,
    /// Position inside the lifecycle phase
    pub stage: Stage,
}

impl SubPhase {
    /// Canonical resumption order
    pub const ORDER: [SubPhase; 9] = [
        SubPhase::new(Lifecycle::Infrastructure, Stage::Pre),
        SubPhase::new(Lifecycle::Infrastructure, Stage::Core),
        SubPhase::new(Lifecycle::Infrastructure, Stage::Post),
        SubPhase::new(Lifecycle::Kubernetes, Stage::Pre),
        SubPhase::new(Lifecycle::Kubernetes, Stage::Core),
        SubPhase::new(Lifecycle::Kubernetes, Stage::Post),
        SubPhase::new(Lifecycle::Distribution, Stage::Pre),
        SubPhase::new(Lifecycle::Distribution, Stage::Core),
        SubPhase::new(Lifecycle::Distribution, Stage::Post),
    ];

    /// Create a sub-phase
    pub const fn new(lifecycle: Lifecycle, stage: Stage) -> Self {
        Self { lifecycle, stage }
    }

    /// Sub-phase name, e.g. `pre-distribution`
    pub fn name(&self) -> String {
        match self.stage {
            Stage::Pre => format!("pre-{}", self.lifecycle),
            Stage::Core => self.lifecycle.to_string(),
            Stage::Post => format!("post-{}", self.lifecycle),
        }
    }
}

impl fmt::Display for SubPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for SubPhase {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (stage, rest) = if let Some(rest) = s.strip_prefix("pre-") {
            (Stage::Pre, rest)
        } else if let Some(rest) = s.strip_prefix("post-") {
            (Stage::Post, rest)
        } else {
            (Stage::Core, s)
        };
        let lifecycle = rest
            .parse::<Lifecycle>()
            .map_err(|_| Error::validation(format!("unknown sub-phase '{}'", s)))?;
        Ok(SubPhase::new(lifecycle, stage))
    }
}

/// Scope of an orchestrated run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhaseTarget {
    /// A single lifecycle phase
    Lifecycle(Lifecycle),
    /// The plugins phase that follows distribution
    Plugins,
    /// Every phase the cluster kind supports, then plugins
    All,
}

impl fmt::Display for PhaseTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseTarget::Lifecycle(l) => write!(f, "{}", l),
            PhaseTarget::Plugins => f.write_str("plugins"),
            PhaseTarget::All => f.write_str("all"),
        }
    }
}

impl FromStr for PhaseTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "all" => Ok(PhaseTarget::All),
            "plugins" => Ok(PhaseTarget::Plugins),
            other => other.parse().map(PhaseTarget::Lifecycle),
        }
    }
}
