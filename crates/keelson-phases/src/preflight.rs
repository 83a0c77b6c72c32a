//! Preflight: compare the requested configuration with the applied one and
//! enforce the migration rules before any phase runs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use keelson_common::{
    ClusterKind, Error, ForceFlag, ForceFlags, Lifecycle, Result, Violation, Violations,
};
use keelson_rules::{diff, Changelog, Reducers, RuleExtractor, RuleMatch};

use crate::confirm::Confirmer;
use crate::storer::ConfigStorer;

/// Preflight settings
#[derive(Debug, Clone, Default)]
pub struct PreflightConfig {
    /// Force flags from the command line
    pub force: ForceFlags,
    /// Directory holding `<kind>.yaml` rules files
    pub rules_dir: PathBuf,
}

/// What preflight found
#[derive(Debug, Clone, Default)]
pub struct PreflightReport {
    /// Nothing was applied before; no rules were evaluated
    pub fresh: bool,
    /// Changes from the applied configuration to the requested one
    pub changelog: Changelog,
    /// Immutable paths changed without a satisfied safe exception
    pub immutable_violations: Vec<Violation>,
    /// Unsupported transitions
    pub unsupported_violations: Vec<Violation>,
    /// Reducer rules the operator must confirm
    pub unsafe_reducers: Vec<RuleMatch>,
    /// Reducers each lifecycle phase has to apply
    pub reducers: BTreeMap<Lifecycle, Reducers>,
}

impl PreflightReport {
    /// True when any violation was found
    pub fn has_violations(&self) -> bool {
        !self.immutable_violations.is_empty() || !self.unsupported_violations.is_empty()
    }

    /// Every violation of the run, immutable first
    pub fn violations(&self) -> Violations {
        self.immutable_violations
            .iter()
            .chain(&self.unsupported_violations)
            .cloned()
            .collect::<Vec<_>>()
            .into()
    }
}

/// Runs the preflight checks for one cluster
pub struct Preflight {
    extractor: RuleExtractor,
    force: ForceFlags,
    storer: Arc<dyn ConfigStorer>,
    confirmer: Arc<dyn Confirmer>,
}

impl Preflight {
    /// Preflight with an already loaded rule set
    pub fn new(
        extractor: RuleExtractor,
        force: ForceFlags,
        storer: Arc<dyn ConfigStorer>,
        confirmer: Arc<dyn Confirmer>,
    ) -> Self {
        Self {
            extractor,
            force,
            storer,
            confirmer,
        }
    }

    /// Preflight loading the rules for `kind` from the configured directory
    pub fn from_config(
        config: &PreflightConfig,
        kind: ClusterKind,
        storer: Arc<dyn ConfigStorer>,
        confirmer: Arc<dyn Confirmer>,
    ) -> Result<Self> {
        let extractor = RuleExtractor::load(&config.rules_dir, kind)?;
        Ok(Self::new(extractor, config.force.clone(), storer, confirmer))
    }

    /// Rules in use
    pub fn extractor(&self) -> &RuleExtractor {
        &self.extractor
    }

    async fn applied_config(&self) -> Result<Option<Value>> {
        let stored = match self.storer.get_rendered_config().await? {
            Some(rendered) => Some(rendered),
            None => self.storer.get_config().await?,
        };
        stored
            .map(|bytes| serde_yaml::from_slice::<Value>(&bytes))
            .transpose()
            .map_err(|e| {
                Error::state_corrupted(format!("applied configuration is not valid YAML: {}", e))
            })
    }

    /// Evaluate the rules without enforcing them
    pub async fn inspect(&self, config: &Value) -> Result<PreflightReport> {
        let Some(applied) = self.applied_config().await? else {
            info!("no applied configuration found, treating cluster as new");
            return Ok(PreflightReport {
                fresh: true,
                ..PreflightReport::default()
            });
        };

        let mut report = PreflightReport {
            changelog: diff(Some(&applied), Some(config)),
            ..PreflightReport::default()
        };
        debug!(
            changes = report.changelog.len(),
            "computed configuration changes"
        );

        for &lifecycle in self.extractor.kind().lifecycles() {
            let evaluation = self.extractor.evaluate(lifecycle, &report.changelog)?;
            report
                .immutable_violations
                .extend(evaluation.immutable_violations);
            report
                .unsupported_violations
                .extend(evaluation.unsupported_violations);
            report.unsafe_reducers.extend(evaluation.unsafe_reducers);

            let reducers = Reducers::build(&report.changelog, &self.extractor, lifecycle)?;
            report.reducers.insert(lifecycle, reducers);
        }
        Ok(report)
    }

    /// Evaluate and enforce the rules.
    ///
    /// Violations abort unless migrations are forced; unsafe reducers need the
    /// operator's confirmation unless migrations are forced.
    pub async fn run(&self, config: &Value) -> Result<PreflightReport> {
        let report = self.inspect(config).await?;
        let migrations_forced = self.force.allows(ForceFlag::Migrations);

        if report.has_violations() {
            let violations = Error::Violations(report.violations());
            if !migrations_forced {
                return Err(violations);
            }
            warn!("continuing because migrations are forced: {}", violations);
        }

        if !report.unsafe_reducers.is_empty() && !migrations_forced {
            for matched in &report.unsafe_reducers {
                warn!(
                    path = %matched.rule.path,
                    change = %matched.change,
                    "{}",
                    matched.rule.description.as_deref().unwrap_or("change requires a migration")
                );
            }
            let prompt = format!(
                "{} change(s) require a migration that may disrupt running workloads. Continue?",
                report.unsafe_reducers.len()
            );
            if !self.confirmer.confirm(&prompt).await? {
                return Err(Error::UserAborted);
            }
        }
        Ok(report)
    }
}
