//! Rule evaluation against a changelog
//!
//! One extractor serves every cluster kind; the kind only decides which
//! lifecycle phases may carry rules.

use std::path::Path;

use tracing::{debug, warn};

use keelson_common::{ClusterKind, Error, Lifecycle, Result, Violation};

use crate::diff::{Change, Changelog};
use crate::spec::{Rule, RuleSpec};

/// A rule matched against one change, reducers filled with observed values
#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch {
    /// The matched rule; reducer `from`/`to` hold the change's values
    pub rule: Rule,
    /// The change that triggered the rule
    pub change: Change,
}

/// Outcome of checking one phase's rules against a changelog
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    /// Immutable paths changed without a satisfied safe exception
    pub immutable_violations: Vec<Violation>,
    /// Unsupported transitions
    pub unsupported_violations: Vec<Violation>,
    /// Reducer rules with no satisfied safe exception; need confirmation
    pub unsafe_reducers: Vec<RuleMatch>,
}

impl Evaluation {
    /// True when neither kind of violation was found
    pub fn is_clean(&self) -> bool {
        self.immutable_violations.is_empty() && self.unsupported_violations.is_empty()
    }
}

/// Rules for one cluster kind
#[derive(Debug, Clone)]
pub struct RuleExtractor {
    kind: ClusterKind,
    spec: RuleSpec,
}

impl RuleExtractor {
    /// Build an extractor, rejecting rules for phases the kind lacks
    pub fn new(kind: ClusterKind, spec: RuleSpec) -> Result<Self> {
        let phases = spec.declared_phases();
        if let Some(phase) = phases.into_iter().find(|l| !kind.supports(*l)) {
            return Err(Error::rules(
                kind.rules_file_name(),
                format!(
                    "rules declared for phase {} which {} does not have",
                    phase, kind
                ),
            ));
        }
        Ok(Self { kind, spec })
    }

    /// Extractor that enforces nothing
    pub fn empty(kind: ClusterKind) -> Self {
        Self {
            kind,
            spec: RuleSpec::default(),
        }
    }

    /// Load `<rules_dir>/<kind>.yaml`.
    ///
    /// A missing file disables enforcement for the run and is only a warning.
    pub fn load(rules_dir: &Path, kind: ClusterKind) -> Result<Self> {
        let path = rules_dir.join(kind.rules_file_name());
        match RuleSpec::load(&path)? {
            Some(spec) => {
                debug!(path = %path.display(), kind = %kind, "loaded rules");
                Self::new(kind, spec)
            }
            None => {
                warn!(
                    path = %path.display(),
                    kind = %kind,
                    "rules file not found, immutability and reducers are not enforced"
                );
                Ok(Self::empty(kind))
            }
        }
    }

    /// Cluster kind the rules belong to
    pub fn kind(&self) -> ClusterKind {
        self.kind
    }

    fn phase_rules(&self, phase: Lifecycle) -> Result<&[Rule]> {
        if !self.kind.supports(phase) {
            return Err(Error::UnsupportedPhase {
                kind: self.kind.to_string(),
                phase: phase.to_string(),
            });
        }
        Ok(self.spec.rules(phase))
    }

    /// Rules of a phase marked immutable
    pub fn immutable_rules(&self, phase: Lifecycle) -> Result<Vec<Rule>> {
        Ok(self
            .phase_rules(phase)?
            .iter()
            .filter(|r| r.immutable)
            .cloned()
            .collect())
    }

    /// Rules of a phase declaring reducers
    pub fn reducer_rules(&self, phase: Lifecycle) -> Result<Vec<Rule>> {
        Ok(self
            .phase_rules(phase)?
            .iter()
            .filter(|r| !r.reducers.is_empty())
            .cloned()
            .collect())
    }

    /// Rules of a phase declaring unsupported transitions
    pub fn unsupported_rules(&self, phase: Lifecycle) -> Result<Vec<Rule>> {
        Ok(self
            .phase_rules(phase)?
            .iter()
            .filter(|r| !r.unsupported.is_empty())
            .cloned()
            .collect())
    }

    /// Run every check of one phase against the changelog
    pub fn evaluate(&self, phase: Lifecycle, changelog: &Changelog) -> Result<Evaluation> {
        let immutable = match_rules_against_diff(&self.immutable_rules(phase)?, changelog);
        let not_exempted = filter_safe_rules(immutable, changelog);
        // Rules sharing a path match the same change; report it once
        let mut remaining: Vec<Change> = Vec::new();
        for m in &not_exempted {
            if !remaining.contains(&m.change) {
                remaining.push(m.change.clone());
            }
        }
        let remaining_log = Changelog::from(remaining);
        let immutable_paths: Vec<String> =
            not_exempted.iter().map(|m| m.rule.path.clone()).collect();

        let unsupported = match_rules_against_diff(&self.unsupported_rules(phase)?, changelog);
        let reducers = match_rules_against_diff(&self.reducer_rules(phase)?, changelog);

        Ok(Evaluation {
            immutable_violations: assert_immutable_violations(&remaining_log, &immutable_paths),
            unsupported_violations: assert_unsupported_violations(&unsupported),
            unsafe_reducers: filter_unsafe_reducers(reducers, changelog),
        })
    }
}

/// Match rules against changes by normalized path.
///
/// A rule is returned once per matching change, with every reducer's
/// `from`/`to` replaced by that change's observed values.
pub fn match_rules_against_diff(rules: &[Rule], changelog: &Changelog) -> Vec<RuleMatch> {
    let mut matches = Vec::new();
    for rule in rules {
        for change in changelog.iter().filter(|c| rule.targets(c)) {
            let mut matched = rule.clone();
            for reducer in &mut matched.reducers {
                reducer.from = change.from.clone();
                reducer.to = change.to.clone();
            }
            matches.push(RuleMatch {
                rule: matched,
                change: change.clone(),
            });
        }
    }
    matches
}

/// One violation per change whose normalized path is in `immutable_paths`
pub fn assert_immutable_violations(
    changelog: &Changelog,
    immutable_paths: &[String],
) -> Vec<Violation> {
    let normalized: Vec<String> = immutable_paths
        .iter()
        .map(|p| crate::path::normalize_dotted(p))
        .collect();

    changelog
        .iter()
        .filter(|c| normalized.contains(&c.normalized_path()))
        .map(|c| Violation::Immutable {
            path: c.dotted_path(),
            from: c.from.clone(),
            to: c.to.clone(),
        })
        .collect()
}

/// One violation per matched rule whose unsupported list covers its change
pub fn assert_unsupported_violations(matches: &[RuleMatch]) -> Vec<Violation> {
    matches
        .iter()
        .filter_map(|m| {
            m.rule
                .unsupported
                .iter()
                .find(|cond| cond.matches(&m.change))
                .map(|cond| Violation::Unsupported {
                    path: m.change.dotted_path(),
                    from: m.change.from.clone(),
                    to: m.change.to.clone(),
                    reason: cond.reason.clone(),
                })
        })
        .collect()
}

/// Drop matches exempted by a satisfied safe condition
pub fn filter_safe_rules(matches: Vec<RuleMatch>, changelog: &Changelog) -> Vec<RuleMatch> {
    matches
        .into_iter()
        .filter(|m| !m.rule.is_safe(&m.change, changelog))
        .collect()
}

/// Reducer matches with no satisfied safe condition; these need confirmation
pub fn filter_unsafe_reducers(matches: Vec<RuleMatch>, changelog: &Changelog) -> Vec<RuleMatch> {
    let reducer_matches = matches
        .into_iter()
        .filter(|m| !m.rule.reducers.is_empty())
        .collect();
    filter_safe_rules(reducer_matches, changelog)
}
