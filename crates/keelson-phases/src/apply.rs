//! The apply flow: preflight, confirmation, orchestration, then recording the
//! applied configuration

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use keelson_common::{ClusterKind, Error, ForceFlag, ForceFlags, PhaseTarget, Result};
use keelson_upgrade::UpgradeStorer;

use crate::confirm::Confirmer;
use crate::lifecycle::{PhaseContext, Toolchain};
use crate::orchestrator::{Orchestrator, OrchestratorConfig};
use crate::preflight::{Preflight, PreflightReport};
use crate::storer::ConfigStorer;
use crate::tool::ToolRunner;
use crate::ENV_SKIP_PODS_RUNNING_CHECK;

/// Settings of one apply
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Phases to run
    pub target: PhaseTarget,
    /// Orchestration settings
    pub orchestrator: OrchestratorConfig,
    /// Force flags from the command line
    pub force: ForceFlags,
    /// Base working directory of the phases
    pub workdir: PathBuf,
}

/// Result of a successful apply
#[derive(Debug)]
pub struct ApplyOutcome {
    /// Preflight findings
    pub report: PreflightReport,
    /// Whether the configuration was recorded as applied
    pub stored: bool,
}

/// Applies a cluster configuration
pub struct Apply {
    kind: ClusterKind,
    preflight: Preflight,
    toolchain: Toolchain,
    toolchain_manifest: Vec<u8>,
    runner: Arc<dyn ToolRunner>,
    storer: Arc<dyn ConfigStorer>,
    confirmer: Arc<dyn Confirmer>,
    upgrade_storer: Option<Arc<dyn UpgradeStorer>>,
    options: ApplyOptions,
}

impl Apply {
    /// Apply flow for the kind the preflight rules belong to.
    ///
    /// `toolchain_manifest` is the raw toolchain file; it is parsed here and
    /// stored verbatim after a successful full run.
    pub fn new(
        preflight: Preflight,
        toolchain_manifest: Vec<u8>,
        runner: Arc<dyn ToolRunner>,
        storer: Arc<dyn ConfigStorer>,
        confirmer: Arc<dyn Confirmer>,
        options: ApplyOptions,
    ) -> Result<Self> {
        let kind = preflight.extractor().kind();
        let manifest = std::str::from_utf8(&toolchain_manifest)
            .map_err(|e| Error::validation(format!("toolchain file is not UTF-8: {}", e)))?;
        let toolchain = Toolchain::from_yaml(manifest)?;
        toolchain.validate(kind)?;

        Ok(Self {
            kind,
            preflight,
            toolchain,
            toolchain_manifest,
            runner,
            storer,
            confirmer,
            upgrade_storer: None,
            options,
        })
    }

    /// Storage for the upgrade state, needed in upgrade mode
    pub fn with_upgrade_storer(mut self, storer: Arc<dyn UpgradeStorer>) -> Self {
        self.upgrade_storer = Some(storer);
        self
    }

    fn step_env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        if self.options.force.allows(ForceFlag::PodsRunningCheck) {
            env.insert(ENV_SKIP_PODS_RUNNING_CHECK.to_string(), "true".to_string());
        }
        env
    }

    /// Apply the raw configuration file
    pub async fn run(&self, raw_config: &[u8]) -> Result<ApplyOutcome> {
        let config: Value = serde_yaml::from_slice(raw_config)
            .map_err(|e| Error::validation(format!("invalid cluster configuration: {}", e)))?;
        let kind = ClusterKind::from_config(&config)?;
        if kind != self.kind {
            return Err(Error::validation(format!(
                "configuration is of kind {} but rules were loaded for {}",
                kind, self.kind
            )));
        }

        let report = self.preflight.run(&config).await?;

        if self.options.orchestrator.upgrade
            && !report.fresh
            && !self.options.force.allows(ForceFlag::Upgrades)
        {
            let prompt = format!(
                "An upgrade of this {} cluster is about to start. Continue?",
                self.kind
            );
            if !self.confirmer.confirm(&prompt).await? {
                return Err(Error::UserAborted);
            }
        }

        let ctx = PhaseContext {
            workdir: self.options.workdir.clone(),
            runner: self.runner.clone(),
            template_data: config.clone(),
            reducers: report.reducers.clone(),
            env: self.step_env(),
        };
        let phases = self.toolchain.build_phases(self.kind, &ctx)?;
        let mut orchestrator =
            Orchestrator::new(self.kind, phases, self.options.orchestrator.clone());
        if let Some(storer) = &self.upgrade_storer {
            orchestrator = orchestrator.with_upgrade_storer(storer.clone());
        }

        orchestrator.create(self.options.target).await?;

        let stored = self.options.target == PhaseTarget::All;
        if stored {
            let rendered =
                serde_json::to_vec(&config).map_err(|e| Error::serialization(e.to_string()))?;
            self.storer.store_config(raw_config, &rendered).await?;
            self.storer
                .store_distribution_manifest(&self.toolchain_manifest)
                .await?;
            info!(kind = %self.kind, "stored applied configuration");
        }

        Ok(ApplyOutcome { report, stored })
    }
}
