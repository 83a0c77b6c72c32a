//! Rules file model
//!
//! A rules file lists, per lifecycle phase, which configuration paths are
//! immutable, which transitions are unsupported, which transitions are safe
//! exceptions, and which changes need reducers at apply time:
//!
//! ```yaml
//! distribution:
//!   - path: .spec.distribution.modules.logging.type
//!     immutable: true
//!     description: "changing the logging backend requires a migration"
//!     safe:
//!       - from: none
//!     reducers:
//!       - key: distributionModulesLoggingType
//!         lifecycle: pre-apply
//! ```

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use keelson_common::{Error, Lifecycle, Result};

use crate::diff::{Change, Changelog};
use crate::path;

/// Root of a rules file: one optional rule list per lifecycle phase
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSpec {
    /// Rules for the infrastructure phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure: Option<Vec<Rule>>,
    /// Rules for the kubernetes phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes: Option<Vec<Rule>>,
    /// Rules for the distribution phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distribution: Option<Vec<Rule>>,
}

impl RuleSpec {
    /// Parse a rules document; `source` names it in errors
    pub fn from_yaml(content: &str, source: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|e| Error::rules(source, e.to_string()))
    }

    /// Read and parse a rules file, returning `None` if it does not exist
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let source = path.display().to_string();
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_yaml(&content, &source).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::rules(source, e.to_string())),
        }
    }

    /// Rules declared for a phase (empty if the phase has no section)
    pub fn rules(&self, lifecycle: Lifecycle) -> &[Rule] {
        let section = match lifecycle {
            Lifecycle::Infrastructure => &self.infrastructure,
            Lifecycle::Kubernetes => &self.kubernetes,
            Lifecycle::Distribution => &self.distribution,
        };
        section.as_deref().unwrap_or(&[])
    }

    /// Phases that have a section in the file, even an empty one
    pub fn declared_phases(&self) -> Vec<Lifecycle> {
        Lifecycle::ALL
            .into_iter()
            .filter(|l| match l {
                Lifecycle::Infrastructure => self.infrastructure.is_some(),
                Lifecycle::Kubernetes => self.kubernetes.is_some(),
                Lifecycle::Distribution => self.distribution.is_some(),
            })
            .collect()
    }
}

/// A rule about one configuration path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// Dotted path, `*` for list elements (e.g. `.spec.nodePools.*.size`)
    pub path: String,
    /// Whether any change to the path is a violation
    #[serde(default)]
    pub immutable: bool,
    /// Logged when the rule triggers reducers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Transitions that are never allowed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unsupported: Vec<UnsupportedCondition>,
    /// Transitions that exempt the change from immutability and confirmation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub safe: Vec<SafeCondition>,
    /// Reducers to run when the path changes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reducers: Vec<RuleReducer>,
}

impl Rule {
    /// Whether this rule targets the location of `change`
    pub fn targets(&self, change: &Change) -> bool {
        path::normalize_dotted(&self.path) == change.normalized_path()
    }

    /// Whether any safe condition is satisfied by `change` within `changelog`
    pub fn is_safe(&self, change: &Change, changelog: &Changelog) -> bool {
        self.safe.iter().any(|s| s.is_satisfied(change, changelog))
    }
}

/// A transition that is not supported; omitted sides match anything
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnsupportedCondition {
    /// Previous value, `None` matches any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Value>,
    /// Requested value, `None` matches any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Value>,
    /// Message reported instead of the generated one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl UnsupportedCondition {
    /// Whether the change performs this transition
    pub fn matches(&self, change: &Change) -> bool {
        value_matches(self.from.as_ref(), change.from.as_ref())
            && value_matches(self.to.as_ref(), change.to.as_ref())
    }
}

/// A transition that is safe despite the path being immutable
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeCondition {
    /// Previous value, `None` matches any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Value>,
    /// Requested value, `None` matches any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Value>,
    /// Sibling changes that must be present in the same changelog
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub from_nodes: Vec<NodeCondition>,
}

impl SafeCondition {
    /// Satisfied when the triggering change matches from/to and every
    /// `fromNodes` entry is matched by another change in the changelog.
    pub fn is_satisfied(&self, trigger: &Change, changelog: &Changelog) -> bool {
        let own = value_matches(self.from.as_ref(), trigger.from.as_ref())
            && value_matches(self.to.as_ref(), trigger.to.as_ref());

        own && self.from_nodes.iter().all(|node| {
            changelog
                .iter()
                .any(|other| other != trigger && node.matches(other))
        })
    }
}

/// Correlated sibling condition: `path` changed away from `from`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeCondition {
    /// Dotted path of the sibling field
    pub path: String,
    /// Previous value of the sibling, `None` matches any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Value>,
}

impl NodeCondition {
    /// Whether `change` is this sibling transition
    pub fn matches(&self, change: &Change) -> bool {
        path::normalize_dotted(&self.path) == change.normalized_path()
            && value_matches(self.from.as_ref(), change.from.as_ref())
    }
}

/// When a reducer's effect is applied relative to the main tool run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReducerLifecycle {
    /// Before the main tool invocation
    PreApply,
    /// After the main tool invocation
    PostApply,
}

impl ReducerLifecycle {
    /// Tag as written in rules files
    pub fn as_str(&self) -> &'static str {
        match self {
            ReducerLifecycle::PreApply => "pre-apply",
            ReducerLifecycle::PostApply => "post-apply",
        }
    }
}

impl fmt::Display for ReducerLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reducer declaration; `from`/`to` are replaced by observed values on match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleReducer {
    /// Template data key
    pub key: String,
    /// When the reducer applies
    pub lifecycle: ReducerLifecycle,
    /// Observed previous value once matched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Value>,
    /// Observed requested value once matched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Value>,
}

/// Compare a rule value with an observed one.
///
/// `None` on the rule side is a wildcard. Values match when equal, or when
/// the rule holds a string equal to the observed scalar's text (`"3"` vs `3`).
pub fn value_matches(expected: Option<&Value>, observed: Option<&Value>) -> bool {
    let Some(expected) = expected else {
        return true;
    };
    let Some(observed) = observed else {
        return false;
    };
    if expected == observed {
        return true;
    }
    match (expected, observed) {
        (Value::String(e), Value::Number(_) | Value::Bool(_)) => *e == observed.to_string(),
        _ => false,
    }
}
