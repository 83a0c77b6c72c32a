//! Phase orchestration
//!
//! Runs lifecycle phases in order (infrastructure, kubernetes, distribution,
//! then plugins) as a spawned task raced against a deadline. In upgrade mode
//! the run resumes at the earliest unfinished sub-phase and persists the
//! upgrade state after every phase.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, warn};

use keelson_common::{ClusterKind, Error, Lifecycle, PhaseTarget, Result, SubPhase};
use keelson_upgrade::{load_state, UpgradeState, UpgradeStorer};

use crate::phase::{OperationPhase, PersistingPhase};

/// Default deadline of a whole run
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3600);

/// Time a stopped run gets to wind down before its task is aborted
const STOP_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// The phases of one cluster
#[derive(Clone, Default)]
pub struct PhaseSet {
    infrastructure: Option<Arc<dyn OperationPhase>>,
    kubernetes: Option<Arc<dyn OperationPhase>>,
    distribution: Option<Arc<dyn OperationPhase>>,
    plugins: Option<Arc<dyn OperationPhase>>,
}

impl PhaseSet {
    /// Set the phase for a lifecycle
    pub fn with_lifecycle(mut self, lifecycle: Lifecycle, phase: Arc<dyn OperationPhase>) -> Self {
        *self.slot_mut(lifecycle) = Some(phase);
        self
    }

    /// Set the plugins phase
    pub fn with_plugins(mut self, phase: Arc<dyn OperationPhase>) -> Self {
        self.plugins = Some(phase);
        self
    }

    fn slot_mut(&mut self, lifecycle: Lifecycle) -> &mut Option<Arc<dyn OperationPhase>> {
        match lifecycle {
            Lifecycle::Infrastructure => &mut self.infrastructure,
            Lifecycle::Kubernetes => &mut self.kubernetes,
            Lifecycle::Distribution => &mut self.distribution,
        }
    }

    /// Phase of a lifecycle, if configured
    pub fn lifecycle(&self, lifecycle: Lifecycle) -> Option<&Arc<dyn OperationPhase>> {
        match lifecycle {
            Lifecycle::Infrastructure => self.infrastructure.as_ref(),
            Lifecycle::Kubernetes => self.kubernetes.as_ref(),
            Lifecycle::Distribution => self.distribution.as_ref(),
        }
    }

    /// Plugins phase, if configured
    pub fn plugins(&self) -> Option<&Arc<dyn OperationPhase>> {
        self.plugins.as_ref()
    }

    /// Phases to stop when a run of `target` is cancelled
    fn in_scope(&self, target: PhaseTarget) -> Vec<Arc<dyn OperationPhase>> {
        match target {
            PhaseTarget::Lifecycle(lifecycle) => {
                self.lifecycle(lifecycle).cloned().into_iter().collect()
            }
            PhaseTarget::Plugins => self.plugins.clone().into_iter().collect(),
            PhaseTarget::All => Lifecycle::ALL
                .into_iter()
                .filter_map(|l| self.lifecycle(l).cloned())
                .chain(self.plugins.clone())
                .collect(),
        }
    }
}

/// Orchestration settings
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Deadline of the whole run
    pub timeout: Duration,
    /// Track and resume progress through the upgrade state
    pub upgrade: bool,
    /// Start here instead of the resumable sub-phase
    pub start_from: Option<SubPhase>,
    /// Phases re-run after a successful full run, outside upgrade tracking
    pub post_apply_phases: Vec<PhaseTarget>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            upgrade: false,
            start_from: None,
            post_apply_phases: Vec::new(),
        }
    }
}

/// How a run ended
#[derive(Debug)]
pub enum RunOutcome {
    /// Every targeted phase succeeded
    Succeeded,
    /// A phase failed
    Failed(Error),
    /// The deadline passed; the targeted phases were stopped
    TimedOut,
}

impl RunOutcome {
    /// Convert into the caller-facing result
    pub fn into_result(self, scope: PhaseTarget, after: Duration) -> Result<()> {
        match self {
            RunOutcome::Succeeded => Ok(()),
            RunOutcome::Failed(err) => Err(err),
            RunOutcome::TimedOut => Err(Error::Timeout {
                scope: scope.to_string(),
                after,
            }),
        }
    }
}

/// Runs the phases of one cluster
#[derive(Clone)]
pub struct Orchestrator {
    kind: ClusterKind,
    phases: PhaseSet,
    upgrade_storer: Option<Arc<dyn UpgradeStorer>>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Orchestrator for `kind` running `phases`
    pub fn new(kind: ClusterKind, phases: PhaseSet, config: OrchestratorConfig) -> Self {
        Self {
            kind,
            phases,
            upgrade_storer: None,
            config,
        }
    }

    /// Storage for the upgrade state; required in upgrade mode
    pub fn with_upgrade_storer(mut self, storer: Arc<dyn UpgradeStorer>) -> Self {
        self.upgrade_storer = Some(storer);
        self
    }

    /// Settings in use
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run `target` within the configured deadline
    pub async fn create(&self, target: PhaseTarget) -> Result<()> {
        self.run_with_deadline(target)
            .await
            .into_result(target, self.config.timeout)
    }

    /// Run `target` as a spawned task raced against the deadline.
    ///
    /// On timeout the phases in scope are stopped concurrently before
    /// returning.
    pub async fn run_with_deadline(&self, target: PhaseTarget) -> RunOutcome {
        let this = self.clone();
        let mut task = tokio::spawn(async move { this.run(target).await });

        match tokio::time::timeout(self.config.timeout, &mut task).await {
            Ok(Ok(Ok(()))) => RunOutcome::Succeeded,
            Ok(Ok(Err(err))) => RunOutcome::Failed(err),
            Ok(Err(join_err)) => RunOutcome::Failed(Error::internal_with_context(
                "orchestrator",
                format!("phase task failed: {}", join_err),
            )),
            Err(_) => {
                warn!(
                    scope = %target,
                    timeout = ?self.config.timeout,
                    "deadline exceeded, stopping phases"
                );
                self.stop(target).await;
                let grace = tokio::time::timeout(STOP_GRACE_PERIOD, &mut task).await;
                if grace.is_err() {
                    warn!(scope = %target, "phases did not wind down, aborting");
                    task.abort();
                }
                RunOutcome::TimedOut
            }
        }
    }

    /// Stop every phase in scope; failures are logged
    pub async fn stop(&self, target: PhaseTarget) {
        let phases = self.phases.in_scope(target);
        let results = join_all(phases.iter().map(|phase| phase.stop())).await;
        for (phase, result) in phases.iter().zip(results) {
            if let Err(e) = result {
                warn!(phase = %phase.name(), error = %e, "failed to stop phase");
            }
        }
    }

    async fn run(&self, target: PhaseTarget) -> Result<()> {
        match target {
            PhaseTarget::All => self.run_all().await,
            PhaseTarget::Lifecycle(lifecycle) => self.run_single(lifecycle).await,
            PhaseTarget::Plugins => self.run_plugins().await,
        }
    }

    fn phase(&self, lifecycle: Lifecycle) -> Result<Arc<dyn OperationPhase>> {
        self.phases
            .lifecycle(lifecycle)
            .cloned()
            .ok_or_else(|| Error::UnsupportedPhase {
                kind: self.kind.to_string(),
                phase: lifecycle.to_string(),
            })
    }

    fn active_storer(&self) -> Result<Option<Arc<dyn UpgradeStorer>>> {
        if !self.config.upgrade {
            return Ok(None);
        }
        self.upgrade_storer
            .clone()
            .map(Some)
            .ok_or_else(|| Error::validation("upgrade mode requires an upgrade state store"))
    }

    /// Load or initialize the upgrade state and pick the starting sub-phase
    async fn prepare_state(&self) -> Result<(UpgradeState, Option<SubPhase>)> {
        let fresh = UpgradeState::new(self.kind.lifecycles());
        let Some(storer) = self.active_storer()? else {
            return Ok((fresh, self.config.start_from));
        };

        match load_state(storer.as_ref()).await? {
            Some(state) => {
                let start = self
                    .config
                    .start_from
                    .or_else(|| state.latest_resumable_phase());
                Ok((state, start))
            }
            None => {
                storer.store(&fresh).await?;
                debug!("initialized upgrade state");
                Ok((fresh, self.config.start_from))
            }
        }
    }

    async fn run_all(&self) -> Result<()> {
        let storer = self.active_storer()?;
        let (mut state, start) = self.prepare_state().await?;
        if let Some(sub) = start {
            if !self.kind.supports(sub.lifecycle) {
                return Err(Error::UnsupportedPhase {
                    kind: self.kind.to_string(),
                    phase: sub.name(),
                });
            }
            info!(sub_phase = %sub, "starting from sub-phase");
        }

        for &lifecycle in self.kind.lifecycles() {
            let stage = match start {
                Some(sub) if sub.lifecycle > lifecycle => {
                    debug!(phase = %lifecycle, "skipping completed phase");
                    continue;
                }
                Some(sub) if sub.lifecycle == lifecycle => Some(sub.stage),
                _ => None,
            };

            let mut phase = self.phase(lifecycle)?;
            if let Some(storer) = &storer {
                phase = Arc::new(PersistingPhase::new(phase, storer.clone()));
            }
            info!(phase = %lifecycle, "running phase");
            phase.exec(stage, &mut state).await?;
        }

        if let Some(plugins) = self.phases.plugins() {
            info!("running plugins");
            plugins.exec(None, &mut state).await?;
        }

        if let Some(storer) = &storer {
            storer.delete().await?;
            debug!("run complete, removed upgrade state");
        }

        self.run_post_apply().await
    }

    async fn run_single(&self, lifecycle: Lifecycle) -> Result<()> {
        let phase = self.phase(lifecycle)?;
        let stage = match self.config.start_from {
            Some(sub) if sub.lifecycle == lifecycle => Some(sub.stage),
            Some(sub) => {
                return Err(Error::validation(format!(
                    "start sub-phase {} is not part of phase {}",
                    sub, lifecycle
                )))
            }
            None => None,
        };

        let mut state = UpgradeState::new(self.kind.lifecycles());
        info!(phase = %lifecycle, "running phase");
        phase.exec(stage, &mut state).await
    }

    async fn run_plugins(&self) -> Result<()> {
        match self.phases.plugins() {
            Some(plugins) => plugins.exec(None, &mut UpgradeState::default()).await,
            None => {
                debug!("no plugins phase configured");
                Ok(())
            }
        }
    }

    /// Re-run the configured extra phases with upgrade tracking off
    async fn run_post_apply(&self) -> Result<()> {
        for target in &self.config.post_apply_phases {
            info!(phase = %target, "running post-apply phase");
            let mut scratch = UpgradeState::new(self.kind.lifecycles());
            match target {
                PhaseTarget::Lifecycle(lifecycle) => {
                    self.phase(*lifecycle)?.exec(None, &mut scratch).await?
                }
                PhaseTarget::Plugins => self.run_plugins().await?,
                PhaseTarget::All => {
                    return Err(Error::validation(
                        "post-apply phases must name a single phase",
                    ))
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use keelson_common::Stage;
    use keelson_upgrade::{MemoryUpgradeStorer, PhaseStatus};

    type Log = Arc<Mutex<Vec<String>>>;

    /// Records the sub-phases it runs; can fail or hang at a chosen stage
    struct ScriptedPhase {
        lifecycle: Option<Lifecycle>,
        log: Log,
        fail_at: Option<Stage>,
        hang_at: Option<Stage>,
        stops: AtomicUsize,
        cancel: CancellationToken,
    }

    impl ScriptedPhase {
        fn new(lifecycle: Option<Lifecycle>, log: &Log) -> Self {
            Self {
                lifecycle,
                log: log.clone(),
                fail_at: None,
                hang_at: None,
                stops: AtomicUsize::new(0),
                cancel: CancellationToken::new(),
            }
        }

        fn failing_at(mut self, stage: Stage) -> Self {
            self.fail_at = Some(stage);
            self
        }

        fn hanging_at(mut self, stage: Stage) -> Self {
            self.hang_at = Some(stage);
            self
        }
    }

    #[async_trait]
    impl OperationPhase for ScriptedPhase {
        fn name(&self) -> String {
            self.lifecycle
                .map(|l| l.to_string())
                .unwrap_or_else(|| "plugins".to_string())
        }

        async fn exec(&self, start: Option<Stage>, state: &mut UpgradeState) -> Result<()> {
            let Some(lifecycle) = self.lifecycle else {
                self.log.lock().unwrap().push("plugins".to_string());
                if self.hang_at.is_some() {
                    self.cancel.cancelled().await;
                    return Err(Error::tool("plugins", "stopped"));
                }
                return Ok(());
            };
            let first = start.unwrap_or(Stage::Pre);
            for stage in Stage::ALL.into_iter().filter(|s| *s >= first) {
                let sub = SubPhase::new(lifecycle, stage);
                self.log.lock().unwrap().push(sub.name());
                if self.hang_at == Some(stage) {
                    self.cancel.cancelled().await;
                    state.mark(sub, PhaseStatus::Failed);
                    return Err(Error::tool("tool", "stopped"));
                }
                if self.fail_at == Some(stage) {
                    state.mark(sub, PhaseStatus::Failed);
                    return Err(Error::in_phase(sub.name(), Error::tool("tool", "exit 1")));
                }
                state.mark(sub, PhaseStatus::Success);
            }
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.cancel.cancel();
            Ok(())
        }
    }

    struct Fixture {
        log: Log,
        infrastructure: Arc<ScriptedPhase>,
        kubernetes: Arc<ScriptedPhase>,
        distribution: Arc<ScriptedPhase>,
        plugins: Arc<ScriptedPhase>,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with(|_, phase| phase)
        }

        fn with(customize: impl Fn(Lifecycle, ScriptedPhase) -> ScriptedPhase) -> Self {
            Self::with_plugins(customize, |phase| phase)
        }

        fn with_plugins(
            customize: impl Fn(Lifecycle, ScriptedPhase) -> ScriptedPhase,
            plugins: impl FnOnce(ScriptedPhase) -> ScriptedPhase,
        ) -> Self {
            let log: Log = Arc::default();
            let build = |l: Lifecycle| Arc::new(customize(l, ScriptedPhase::new(Some(l), &log)));
            Self {
                infrastructure: build(Lifecycle::Infrastructure),
                kubernetes: build(Lifecycle::Kubernetes),
                distribution: build(Lifecycle::Distribution),
                plugins: Arc::new(plugins(ScriptedPhase::new(None, &log))),
                log,
            }
        }

        fn phases(&self, kind: ClusterKind) -> PhaseSet {
            let mut set = PhaseSet::default().with_plugins(self.plugins.clone());
            let all: [(Lifecycle, Arc<ScriptedPhase>); 3] = [
                (Lifecycle::Infrastructure, self.infrastructure.clone()),
                (Lifecycle::Kubernetes, self.kubernetes.clone()),
                (Lifecycle::Distribution, self.distribution.clone()),
            ];
            for (lifecycle, phase) in all {
                if kind.supports(lifecycle) {
                    set = set.with_lifecycle(lifecycle, phase);
                }
            }
            set
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    fn upgrade_config() -> OrchestratorConfig {
        OrchestratorConfig {
            upgrade: true,
            ..OrchestratorConfig::default()
        }
    }

    fn sub(name: &str) -> SubPhase {
        name.parse().unwrap()
    }

    #[tokio::test]
    async fn all_phases_run_in_canonical_order() {
        let fixture = Fixture::new();
        let orchestrator = Orchestrator::new(
            ClusterKind::EksCluster,
            fixture.phases(ClusterKind::EksCluster),
            OrchestratorConfig::default(),
        );

        orchestrator.create(PhaseTarget::All).await.unwrap();
        let expected: Vec<String> = SubPhase::ORDER
            .iter()
            .map(|s| s.name())
            .chain(["plugins".to_string()])
            .collect();
        assert_eq!(fixture.log(), expected);
    }

    #[tokio::test]
    async fn kinds_skip_phases_they_do_not_have() {
        let fixture = Fixture::new();
        let orchestrator = Orchestrator::new(
            ClusterKind::OnPremises,
            fixture.phases(ClusterKind::OnPremises),
            OrchestratorConfig::default(),
        );

        orchestrator.create(PhaseTarget::All).await.unwrap();
        assert_eq!(fixture.log()[0], "pre-kubernetes");
        assert!(!fixture.log().iter().any(|s| s.contains("infrastructure")));
    }

    /// Story: a fresh upgrade initializes the state on the cluster before any
    /// phase runs, persists after each phase and removes it on success.
    #[tokio::test]
    async fn story_upgrade_state_lifecycle() {
        let fixture = Fixture::new();
        let storer = Arc::new(MemoryUpgradeStorer::new());
        let orchestrator = Orchestrator::new(
            ClusterKind::EksCluster,
            fixture.phases(ClusterKind::EksCluster),
            upgrade_config(),
        )
        .with_upgrade_storer(storer.clone());

        orchestrator.create(PhaseTarget::All).await.unwrap();

        let history = storer.history();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0], UpgradeState::new(&Lifecycle::ALL));
        assert_eq!(
            history[1].latest_resumable_phase(),
            Some(sub("pre-kubernetes"))
        );
        assert_eq!(history[3].latest_resumable_phase(), None);
        assert!(storer.current().is_none());
    }

    /// Story: the previous run failed in kubernetes; the next run resumes at
    /// exactly that sub-phase and skips everything already done.
    #[tokio::test]
    async fn story_interrupted_upgrade_resumes() {
        let mut state = UpgradeState::new(&Lifecycle::ALL);
        for name in [
            "pre-infrastructure",
            "infrastructure",
            "post-infrastructure",
            "pre-kubernetes",
        ] {
            state.mark(sub(name), PhaseStatus::Success);
        }
        state.mark(sub("kubernetes"), PhaseStatus::Failed);
        let storer = Arc::new(MemoryUpgradeStorer::with_state(&state));

        let fixture = Fixture::new();
        let orchestrator = Orchestrator::new(
            ClusterKind::EksCluster,
            fixture.phases(ClusterKind::EksCluster),
            upgrade_config(),
        )
        .with_upgrade_storer(storer.clone());

        orchestrator.create(PhaseTarget::All).await.unwrap();
        assert_eq!(
            fixture.log(),
            vec![
                "kubernetes",
                "post-kubernetes",
                "pre-distribution",
                "distribution",
                "post-distribution",
                "plugins"
            ]
        );
        assert!(storer.current().is_none());
    }

    #[tokio::test]
    async fn explicit_start_overrides_resumption() {
        let mut state = UpgradeState::new(&Lifecycle::ALL);
        state.mark(sub("pre-infrastructure"), PhaseStatus::Failed);
        let storer = Arc::new(MemoryUpgradeStorer::with_state(&state));

        let fixture = Fixture::new();
        let config = OrchestratorConfig {
            start_from: Some(sub("post-distribution")),
            ..upgrade_config()
        };
        let orchestrator = Orchestrator::new(
            ClusterKind::EksCluster,
            fixture.phases(ClusterKind::EksCluster),
            config,
        )
        .with_upgrade_storer(storer);

        orchestrator.create(PhaseTarget::All).await.unwrap();
        assert_eq!(fixture.log(), vec!["post-distribution", "plugins"]);
    }

    /// Story: a sub-phase fails; the remaining phases never run and the
    /// failure is left on the cluster for the next invocation.
    #[tokio::test]
    async fn story_failure_aborts_and_keeps_state() {
        let fixture = Fixture::with(|lifecycle, phase| match lifecycle {
            Lifecycle::Kubernetes => phase.failing_at(Stage::Core),
            _ => phase,
        });
        let storer = Arc::new(MemoryUpgradeStorer::new());
        let orchestrator = Orchestrator::new(
            ClusterKind::EksCluster,
            fixture.phases(ClusterKind::EksCluster),
            upgrade_config(),
        )
        .with_upgrade_storer(storer.clone());

        let err = orchestrator.create(PhaseTarget::All).await.unwrap_err();
        assert!(matches!(err, Error::Phase { .. }));
        assert!(!fixture.log().iter().any(|s| s.contains("distribution")));

        let persisted = storer.current().unwrap();
        assert_eq!(persisted.latest_resumable_phase(), Some(sub("kubernetes")));
        assert_eq!(
            persisted.get(sub("kubernetes")).unwrap().status,
            PhaseStatus::Failed
        );
    }

    #[tokio::test]
    async fn upgrade_mode_without_storer_is_rejected() {
        let fixture = Fixture::new();
        let orchestrator = Orchestrator::new(
            ClusterKind::EksCluster,
            fixture.phases(ClusterKind::EksCluster),
            upgrade_config(),
        );
        let err = orchestrator.create(PhaseTarget::All).await.unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        assert!(fixture.log().is_empty());
    }

    /// Story: the distribution tools hang; the deadline passes, every
    /// phase including plugins is stopped and the caller gets a timeout error.
    #[tokio::test]
    async fn story_timeout_stops_all_phases() {
        let fixture = Fixture::with(|lifecycle, phase| match lifecycle {
            Lifecycle::Distribution => phase.hanging_at(Stage::Core),
            _ => phase,
        });
        let config = OrchestratorConfig {
            timeout: Duration::from_millis(200),
            ..OrchestratorConfig::default()
        };
        let orchestrator = Orchestrator::new(
            ClusterKind::EksCluster,
            fixture.phases(ClusterKind::EksCluster),
            config,
        );

        let err = orchestrator.create(PhaseTarget::All).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { ref scope, .. } if scope == "all"));
        assert!(err.is_timeout());
        assert_eq!(fixture.infrastructure.stops.load(Ordering::SeqCst), 1);
        assert_eq!(fixture.kubernetes.stops.load(Ordering::SeqCst), 1);
        assert_eq!(fixture.distribution.stops.load(Ordering::SeqCst), 1);
        assert_eq!(fixture.plugins.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeout_in_plugins_stops_plugins() {
        let fixture =
            Fixture::with_plugins(|_, phase| phase, |phase| phase.hanging_at(Stage::Core));
        let config = OrchestratorConfig {
            timeout: Duration::from_millis(200),
            ..OrchestratorConfig::default()
        };
        let orchestrator = Orchestrator::new(
            ClusterKind::EksCluster,
            fixture.phases(ClusterKind::EksCluster),
            config,
        );

        let outcome = orchestrator.run_with_deadline(PhaseTarget::All).await;
        assert!(matches!(outcome, RunOutcome::TimedOut));
        assert_eq!(fixture.plugins.stops.load(Ordering::SeqCst), 1);
        assert_eq!(fixture.log().last().map(String::as_str), Some("plugins"));
    }

    #[tokio::test]
    async fn timeout_of_single_phase_stops_only_that_phase() {
        let fixture = Fixture::with(|lifecycle, phase| match lifecycle {
            Lifecycle::Kubernetes => phase.hanging_at(Stage::Pre),
            _ => phase,
        });
        let config = OrchestratorConfig {
            timeout: Duration::from_millis(200),
            ..OrchestratorConfig::default()
        };
        let orchestrator = Orchestrator::new(
            ClusterKind::EksCluster,
            fixture.phases(ClusterKind::EksCluster),
            config,
        );

        let outcome = orchestrator
            .run_with_deadline(PhaseTarget::Lifecycle(Lifecycle::Kubernetes))
            .await;
        assert!(matches!(outcome, RunOutcome::TimedOut));
        assert_eq!(fixture.kubernetes.stops.load(Ordering::SeqCst), 1);
        assert_eq!(fixture.infrastructure.stops.load(Ordering::SeqCst), 0);
        assert_eq!(fixture.distribution.stops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn post_apply_phases_rerun_without_tracking() {
        let fixture = Fixture::new();
        let storer = Arc::new(MemoryUpgradeStorer::new());
        let config = OrchestratorConfig {
            post_apply_phases: vec![PhaseTarget::Lifecycle(Lifecycle::Distribution)],
            ..upgrade_config()
        };
        let orchestrator = Orchestrator::new(
            ClusterKind::KfdDistribution,
            fixture.phases(ClusterKind::KfdDistribution),
            config,
        )
        .with_upgrade_storer(storer.clone());

        orchestrator.create(PhaseTarget::All).await.unwrap();
        assert_eq!(
            fixture.log(),
            vec![
                "pre-distribution",
                "distribution",
                "post-distribution",
                "plugins",
                "pre-distribution",
                "distribution",
                "post-distribution"
            ]
        );
        // initial state plus the distribution phase; the re-run is not persisted
        assert_eq!(storer.history().len(), 2);
        assert!(storer.current().is_none());
    }

    #[tokio::test]
    async fn single_phase_honours_start_stage() {
        let fixture = Fixture::new();
        let config = OrchestratorConfig {
            start_from: Some(sub("post-kubernetes")),
            ..OrchestratorConfig::default()
        };
        let orchestrator = Orchestrator::new(
            ClusterKind::OnPremises,
            fixture.phases(ClusterKind::OnPremises),
            config,
        );

        orchestrator
            .create(PhaseTarget::Lifecycle(Lifecycle::Kubernetes))
            .await
            .unwrap();
        assert_eq!(fixture.log(), vec!["post-kubernetes"]);

        let err = orchestrator
            .create(PhaseTarget::Lifecycle(Lifecycle::Distribution))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[tokio::test]
    async fn unsupported_phase_target_is_rejected() {
        let fixture = Fixture::new();
        let orchestrator = Orchestrator::new(
            ClusterKind::KfdDistribution,
            fixture.phases(ClusterKind::KfdDistribution),
            OrchestratorConfig::default(),
        );
        let err = orchestrator
            .create(PhaseTarget::Lifecycle(Lifecycle::Infrastructure))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedPhase { .. }));
    }

    #[tokio::test]
    async fn stop_is_safe_on_idle_phases() {
        let fixture = Fixture::new();
        let orchestrator = Orchestrator::new(
            ClusterKind::EksCluster,
            fixture.phases(ClusterKind::EksCluster),
            OrchestratorConfig::default(),
        );
        orchestrator.stop(PhaseTarget::All).await;
        orchestrator.stop(PhaseTarget::All).await;
        assert_eq!(fixture.kubernetes.stops.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn outcomes_map_to_distinct_errors() {
        let after = Duration::from_secs(5);
        assert!(RunOutcome::Succeeded
            .into_result(PhaseTarget::All, after)
            .is_ok());
        assert!(matches!(
            RunOutcome::TimedOut.into_result(PhaseTarget::Plugins, after),
            Err(Error::Timeout { .. })
        ));
        assert!(matches!(
            RunOutcome::Failed(Error::UserAborted).into_result(PhaseTarget::All, after),
            Err(Error::UserAborted)
        ));
    }
}
