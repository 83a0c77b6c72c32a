//! Apply command - converge a cluster to its configuration
//!
//! Runs preflight against the configuration last applied, then the lifecycle
//! phases with the tools of the toolchain file, and finally records the
//! configuration on the cluster.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use tracing::info;

use keelson_common::{ForceFlags, PhaseTarget, SubPhase};
use keelson_phases::{
    Apply, ApplyOptions, ConfigStorer, Confirmer, OrchestratorConfig, Preflight, PreflightConfig,
    ProcessRunner, StdinConfirmer,
};

use crate::config::{read_file, ClusterArgs, ClusterConfig};
use crate::kube_store::{kube_client, KubeConfigStorer, KubeUpgradeStorer};
use crate::{Error, Result};

/// Apply a cluster configuration
#[derive(Args, Debug)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub cluster: ClusterArgs,

    /// Toolchain file listing the tools each phase runs
    #[arg(short = 't', long, env = "KEELSON_TOOLCHAIN")]
    pub toolchain: PathBuf,

    /// Phase to run: all, infrastructure, kubernetes, distribution or plugins
    #[arg(long, default_value = "all")]
    pub phase: String,

    /// Start at this sub-phase (e.g. pre-distribution) instead of resuming
    #[arg(long)]
    pub start_from: Option<String>,

    /// Track progress on the cluster so an interrupted upgrade resumes
    #[arg(long)]
    pub upgrade: bool,

    /// Skip checks: all, migrations, upgrades, pods-running-check
    #[arg(long, value_delimiter = ',')]
    pub force: Vec<String>,

    /// Deadline of the whole run, in seconds
    #[arg(long, env = "KEELSON_TIMEOUT", default_value_t = 3600)]
    pub timeout: u64,

    /// Phases re-run after a successful full run, outside upgrade tracking
    #[arg(long, value_delimiter = ',')]
    pub post_apply_phases: Vec<String>,

    /// Base working directory for tool runs
    #[arg(long, default_value = ".keelson")]
    pub workdir: PathBuf,
}

impl ApplyArgs {
    /// Phases selected by `--phase`
    pub fn target(&self) -> Result<PhaseTarget> {
        Ok(self.phase.parse()?)
    }

    /// Flags selected by `--force`
    pub fn force_flags(&self) -> Result<ForceFlags> {
        Ok(ForceFlags::parse(self.force.as_slice())?)
    }

    /// Orchestration settings from the flags
    pub fn orchestrator_config(&self) -> Result<OrchestratorConfig> {
        if self.timeout == 0 {
            return Err(Error::validation("--timeout must be greater than zero"));
        }
        let start_from = self
            .start_from
            .as_deref()
            .map(str::parse::<SubPhase>)
            .transpose()?;
        let post_apply_phases = self
            .post_apply_phases
            .iter()
            .map(|p| p.parse::<PhaseTarget>())
            .collect::<std::result::Result<Vec<_>, _>>()?;
        if post_apply_phases.contains(&PhaseTarget::All) {
            return Err(Error::validation(
                "--post-apply-phases must name single phases",
            ));
        }

        Ok(OrchestratorConfig {
            timeout: Duration::from_secs(self.timeout),
            upgrade: self.upgrade,
            start_from,
            post_apply_phases,
        })
    }
}

pub async fn run(args: ApplyArgs) -> Result<()> {
    let target = args.target()?;
    let force = args.force_flags()?;
    let orchestrator = args.orchestrator_config()?;
    let cluster = ClusterConfig::load(&args.cluster.config)?;
    let manifest = read_file(&args.toolchain)?;
    info!(cluster = %cluster.name, kind = %cluster.kind, phase = %target, "applying configuration");

    let client = kube_client(args.cluster.kube.kubeconfig.as_deref()).await?;
    let storer: Arc<dyn ConfigStorer> =
        Arc::new(KubeConfigStorer::new(client.clone(), &cluster.name));
    let confirmer: Arc<dyn Confirmer> = Arc::new(StdinConfirmer::new());
    let preflight = Preflight::from_config(
        &PreflightConfig {
            force: force.clone(),
            rules_dir: args.cluster.rules_dir.clone(),
        },
        cluster.kind,
        storer.clone(),
        confirmer.clone(),
    )?;

    let options = ApplyOptions {
        target,
        orchestrator,
        force,
        workdir: args.workdir.join(&cluster.name),
    };
    let apply = Apply::new(
        preflight,
        manifest,
        Arc::new(ProcessRunner::new()),
        storer,
        confirmer,
        options,
    )?
    .with_upgrade_storer(Arc::new(KubeUpgradeStorer::new(client, &cluster.name)));

    let outcome = apply.run(&cluster.raw).await?;
    if !outcome.report.changelog.is_empty() {
        info!(
            changes = outcome.report.changelog.len(),
            "applied changes:\n{}",
            outcome.report.changelog.render()
        );
    }
    info!(cluster = %cluster.name, stored = outcome.stored, "apply complete");
    Ok(())
}
