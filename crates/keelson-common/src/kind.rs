//! Supported cluster kinds
//!
//! The set of kinds is closed, so it is modeled as an enum rather than a
//! runtime registry. Each kind knows which lifecycle phases it has and which
//! rules file describes its migration constraints.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::{Error, Lifecycle};

/// A cluster provider kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterKind {
    /// Managed cloud cluster: infrastructure, kubernetes and distribution
    EksCluster,
    /// On-premises machines provisioned elsewhere: kubernetes and distribution
    OnPremises,
    /// Bring-your-own-cluster: distribution only
    KfdDistribution,
    /// Immutable-OS nodes: infrastructure, kubernetes and distribution
    Immutable,
}

impl ClusterKind {
    /// Every supported kind
    pub const ALL: [ClusterKind; 4] = [
        ClusterKind::EksCluster,
        ClusterKind::OnPremises,
        ClusterKind::KfdDistribution,
        ClusterKind::Immutable,
    ];

    /// The `kind` value used in cluster configuration files
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterKind::EksCluster => "EKSCluster",
            ClusterKind::OnPremises => "OnPremises",
            ClusterKind::KfdDistribution => "KFDDistribution",
            ClusterKind::Immutable => "Immutable",
        }
    }

    /// Lifecycle phases this kind runs, in execution order
    pub fn lifecycles(&self) -> &'static [Lifecycle] {
        match self {
            ClusterKind::EksCluster | ClusterKind::Immutable => &Lifecycle::ALL,
            ClusterKind::OnPremises => &[Lifecycle::Kubernetes, Lifecycle::Distribution],
            ClusterKind::KfdDistribution => &[Lifecycle::Distribution],
        }
    }

    /// Whether this kind has the given lifecycle phase
    pub fn supports(&self, lifecycle: Lifecycle) -> bool {
        self.lifecycles().contains(&lifecycle)
    }

    /// File name of this kind's rules inside the rules directory
    pub fn rules_file_name(&self) -> String {
        format!("{}.yaml", self.as_str().to_lowercase())
    }

    /// Read the kind from a parsed cluster configuration's `kind` field
    pub fn from_config(config: &Value) -> Result<Self, Error> {
        config
            .get("kind")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::validation("cluster configuration has no 'kind' field"))?
            .parse()
    }
}

impl fmt::Display for ClusterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClusterKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ClusterKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| Error::validation(format!("unsupported cluster kind '{}'", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_is_read_from_config() {
        let config = json!({"kind": "OnPremises", "spec": {}});
        let kind = ClusterKind::from_config(&config).unwrap();
        assert_eq!(kind, ClusterKind::OnPremises);
        assert!(!kind.supports(Lifecycle::Infrastructure));
        assert_eq!(kind.rules_file_name(), "onpremises.yaml");
    }

    #[test]
    fn missing_or_unknown_kind_is_rejected() {
        assert!(ClusterKind::from_config(&json!({"spec": {}})).is_err());
        assert!(ClusterKind::from_config(&json!({"kind": "GKECluster"})).is_err());
    }

    #[test]
    fn every_kind_runs_distribution() {
        for kind in ClusterKind::ALL {
            assert!(kind.supports(Lifecycle::Distribution), "{}", kind);
        }
        assert_eq!(
            ClusterKind::KfdDistribution.lifecycles(),
            &[Lifecycle::Distribution]
        );
    }
}
