//! Tool-driven lifecycle phases and the toolchain file that configures them

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use keelson_common::{
    ClusterKind, Error, Lifecycle, Result, Stage, SubPhase, REDUCERS_NAMESPACE,
};
use keelson_rules::{ReducerLifecycle, Reducers};
use keelson_upgrade::{PhaseStatus, UpgradeState};

use crate::orchestrator::PhaseSet;
use crate::phase::OperationPhase;
use crate::tool::{Invocation, ToolRunner, ToolStep};
use crate::{ENV_PHASE, ENV_SUB_PHASE, ENV_TEMPLATE_DATA, ENV_WORKDIR};

/// Hook steps run around the core steps when reducers are in flight
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ReducerHooks {
    /// Run before the core steps
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre_apply: Vec<ToolStep>,
    /// Run after the core steps
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_apply: Vec<ToolStep>,
}

impl ReducerHooks {
    /// Steps for a reducer lifecycle tag
    pub fn steps(&self, lifecycle: ReducerLifecycle) -> &[ToolStep] {
        match lifecycle {
            ReducerLifecycle::PreApply => &self.pre_apply,
            ReducerLifecycle::PostApply => &self.post_apply,
        }
    }
}

/// Steps of one lifecycle phase
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LifecycleSteps {
    /// `pre-<phase>` steps
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre: Vec<ToolStep>,
    /// `<phase>` steps
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub core: Vec<ToolStep>,
    /// `post-<phase>` steps
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post: Vec<ToolStep>,
    /// Reducer hooks around the core steps
    #[serde(default)]
    pub reducers: ReducerHooks,
}

impl LifecycleSteps {
    /// Steps of a stage
    pub fn steps(&self, stage: Stage) -> &[ToolStep] {
        match stage {
            Stage::Pre => &self.pre,
            Stage::Core => &self.core,
            Stage::Post => &self.post,
        }
    }
}

/// The toolchain file: which tools each phase runs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Toolchain {
    /// Infrastructure phase steps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure: Option<LifecycleSteps>,
    /// Kubernetes phase steps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes: Option<LifecycleSteps>,
    /// Distribution phase steps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distribution: Option<LifecycleSteps>,
    /// Plugins phase steps
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<ToolStep>,
}

/// Inputs shared by every phase built from a toolchain
#[derive(Clone)]
pub struct PhaseContext {
    /// Base working directory; each phase gets a subdirectory
    pub workdir: PathBuf,
    /// Runner for every step
    pub runner: Arc<dyn ToolRunner>,
    /// Template data the reducers are merged into
    pub template_data: Value,
    /// Reducers triggered for each lifecycle phase
    pub reducers: BTreeMap<Lifecycle, Reducers>,
    /// Environment exported to every step
    pub env: BTreeMap<String, String>,
}

impl Toolchain {
    /// Parse a toolchain file
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| Error::validation(format!("invalid toolchain file: {}", e)))
    }

    /// Steps of a lifecycle phase, if configured
    pub fn lifecycle(&self, lifecycle: Lifecycle) -> Option<&LifecycleSteps> {
        match lifecycle {
            Lifecycle::Infrastructure => self.infrastructure.as_ref(),
            Lifecycle::Kubernetes => self.kubernetes.as_ref(),
            Lifecycle::Distribution => self.distribution.as_ref(),
        }
    }

    /// Reject sections for phases the cluster kind does not run
    pub fn validate(&self, kind: ClusterKind) -> Result<()> {
        match Lifecycle::ALL
            .into_iter()
            .find(|l| self.lifecycle(*l).is_some() && !kind.supports(*l))
        {
            Some(lifecycle) => Err(Error::UnsupportedPhase {
                kind: kind.to_string(),
                phase: lifecycle.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Build one phase per supported lifecycle, plus plugins
    pub fn build_phases(&self, kind: ClusterKind, ctx: &PhaseContext) -> Result<PhaseSet> {
        self.validate(kind)?;

        let mut phases = PhaseSet::default();
        for &lifecycle in kind.lifecycles() {
            let steps = self.lifecycle(lifecycle).cloned().unwrap_or_default();
            let reducers = ctx.reducers.get(&lifecycle).cloned().unwrap_or_default();
            let phase = ToolPhase::new(
                lifecycle,
                steps,
                ctx.workdir.join(lifecycle.as_str()),
                ctx.runner.clone(),
            )
            .with_reducers(reducers, ctx.template_data.clone())
            .with_env(ctx.env.clone());
            phases = phases.with_lifecycle(lifecycle, Arc::new(phase));
        }

        let plugins = PluginsPhase::new(
            self.plugins.clone(),
            ctx.workdir.join("plugins"),
            ctx.runner.clone(),
        )
        .with_env(ctx.env.clone());
        Ok(phases.with_plugins(Arc::new(plugins)))
    }
}

async fn run_steps(
    runner: &dyn ToolRunner,
    cancel: &CancellationToken,
    steps: &[ToolStep],
    workdir: &Path,
    env: &BTreeMap<String, String>,
) -> Result<()> {
    for step in steps {
        let mut invocation = Invocation::from_step(step, workdir);
        for (key, value) in env {
            invocation = invocation.with_env(key, value);
        }
        runner.run(&invocation, cancel).await?;
    }
    Ok(())
}

fn stopped(phase: &str) -> Error {
    Error::internal_with_context(phase, "phase was stopped")
}

/// A lifecycle phase whose sub-phases run configured tool steps
pub struct ToolPhase {
    lifecycle: Lifecycle,
    steps: LifecycleSteps,
    reducers: Reducers,
    template_data: Value,
    workdir: PathBuf,
    env: BTreeMap<String, String>,
    runner: Arc<dyn ToolRunner>,
    cancel: CancellationToken,
}

impl ToolPhase {
    /// Phase running `steps` in `workdir`
    pub fn new(
        lifecycle: Lifecycle,
        steps: LifecycleSteps,
        workdir: impl Into<PathBuf>,
        runner: Arc<dyn ToolRunner>,
    ) -> Self {
        Self {
            lifecycle,
            steps,
            reducers: Reducers::default(),
            template_data: Value::Null,
            workdir: workdir.into(),
            env: BTreeMap::new(),
            runner,
            cancel: CancellationToken::new(),
        }
    }

    /// Reducers to apply around the core steps, merged into `template_data`
    pub fn with_reducers(mut self, reducers: Reducers, template_data: Value) -> Self {
        self.reducers = reducers;
        self.template_data = template_data;
        self
    }

    /// Extra environment for every step
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env.extend(env);
        self
    }

    /// Working directory of the phase
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn step_env(&self, sub: SubPhase) -> BTreeMap<String, String> {
        let mut env = self.env.clone();
        env.insert(ENV_PHASE.to_string(), self.lifecycle.to_string());
        env.insert(ENV_SUB_PHASE.to_string(), sub.name());
        env.insert(
            ENV_WORKDIR.to_string(),
            self.workdir.to_string_lossy().into_owned(),
        );
        env
    }

    async fn run_stage(&self, sub: SubPhase) -> Result<()> {
        let env = self.step_env(sub);
        if sub.stage == Stage::Core {
            self.apply_reducers(ReducerLifecycle::PreApply, &env).await?;
        }
        run_steps(
            self.runner.as_ref(),
            &self.cancel,
            self.steps.steps(sub.stage),
            &self.workdir,
            &env,
        )
        .await?;
        if sub.stage == Stage::Core {
            self.apply_reducers(ReducerLifecycle::PostApply, &env).await?;
        }
        Ok(())
    }

    async fn apply_reducers(
        &self,
        tag: ReducerLifecycle,
        env: &BTreeMap<String, String>,
    ) -> Result<()> {
        let reducers = self.reducers.by_lifecycle(tag);
        if reducers.is_empty() {
            return Ok(());
        }
        let hooks = self.steps.reducers.steps(tag);
        if hooks.is_empty() {
            warn!(
                phase = %self.lifecycle,
                lifecycle = %tag,
                count = reducers.len(),
                "reducers triggered but no hook is configured"
            );
            return Ok(());
        }

        let data = reducers.combine(&self.template_data, REDUCERS_NAMESPACE);
        let path = self.workdir.join(format!("reducers-{}.json", tag));
        let bytes =
            serde_json::to_vec_pretty(&data).map_err(|e| Error::serialization(e.to_string()))?;
        tokio::fs::write(&path, bytes).await?;
        info!(
            phase = %self.lifecycle,
            lifecycle = %tag,
            count = reducers.len(),
            "applying reducers"
        );

        let mut env = env.clone();
        env.insert(
            ENV_TEMPLATE_DATA.to_string(),
            path.to_string_lossy().into_owned(),
        );
        let runner = self.runner.as_ref();
        run_steps(runner, &self.cancel, hooks, &self.workdir, &env).await
    }
}

#[async_trait]
impl OperationPhase for ToolPhase {
    fn name(&self) -> String {
        self.lifecycle.to_string()
    }

    async fn exec(&self, start: Option<Stage>, state: &mut UpgradeState) -> Result<()> {
        tokio::fs::create_dir_all(&self.workdir).await?;
        let first = start.unwrap_or(Stage::Pre);

        for stage in Stage::ALL.into_iter().filter(|s| *s >= first) {
            let sub = SubPhase::new(self.lifecycle, stage);
            if self.cancel.is_cancelled() {
                return Err(Error::in_phase(sub.name(), stopped(&sub.name())));
            }

            info!(sub_phase = %sub, "running sub-phase");
            match self.run_stage(sub).await {
                Ok(()) => state.mark(sub, PhaseStatus::Success),
                Err(e) => {
                    state.mark(sub, PhaseStatus::Failed);
                    return Err(Error::in_phase(sub.name(), e));
                }
            }
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if !self.cancel.is_cancelled() {
            debug!(phase = %self.lifecycle, "stopping phase");
        }
        self.cancel.cancel();
        Ok(())
    }
}

/// The plugins phase; it has no sub-phases and no upgrade slots
pub struct PluginsPhase {
    steps: Vec<ToolStep>,
    workdir: PathBuf,
    env: BTreeMap<String, String>,
    runner: Arc<dyn ToolRunner>,
    cancel: CancellationToken,
}

impl PluginsPhase {
    /// Phase running `steps` in `workdir`
    pub fn new(
        steps: Vec<ToolStep>,
        workdir: impl Into<PathBuf>,
        runner: Arc<dyn ToolRunner>,
    ) -> Self {
        Self {
            steps,
            workdir: workdir.into(),
            env: BTreeMap::new(),
            runner,
            cancel: CancellationToken::new(),
        }
    }

    /// Extra environment for every step
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env.extend(env);
        self
    }
}

#[async_trait]
impl OperationPhase for PluginsPhase {
    fn name(&self) -> String {
        "plugins".to_string()
    }

    async fn exec(&self, _start: Option<Stage>, _state: &mut UpgradeState) -> Result<()> {
        if self.steps.is_empty() {
            debug!("no plugins configured");
            return Ok(());
        }
        if self.cancel.is_cancelled() {
            return Err(Error::in_phase("plugins", stopped("plugins")));
        }
        tokio::fs::create_dir_all(&self.workdir).await?;

        let mut env = self.env.clone();
        env.insert(ENV_PHASE.to_string(), "plugins".to_string());
        env.insert(
            ENV_WORKDIR.to_string(),
            self.workdir.to_string_lossy().into_owned(),
        );
        let runner = self.runner.as_ref();
        run_steps(runner, &self.cancel, &self.steps, &self.workdir, &env)
            .await
            .map_err(|e| Error::in_phase("plugins", e))
    }

    async fn stop(&self) -> Result<()> {
        self.cancel.cancel();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use serde_json::json;

    use crate::tool::MockToolRunner;
    use keelson_rules::Reducer;

    /// Records invocations and fails on a chosen program
    #[derive(Default)]
    struct RecordingRunner {
        calls: Mutex<Vec<Invocation>>,
        fail_on: Option<String>,
    }

    impl RecordingRunner {
        fn failing_on(program: &str) -> Self {
            Self {
                fail_on: Some(program.to_string()),
                ..Self::default()
            }
        }

        fn programs(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|c| c.program.clone())
                .collect()
        }

        fn call(&self, program: &str) -> Invocation {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .find(|c| c.program == program)
                .cloned()
                .unwrap()
        }
    }

    #[async_trait]
    impl ToolRunner for RecordingRunner {
        async fn run(&self, invocation: &Invocation, _cancel: &CancellationToken) -> Result<()> {
            self.calls.lock().unwrap().push(invocation.clone());
            if self.fail_on.as_deref() == Some(invocation.program.as_str()) {
                return Err(Error::tool_exit(&invocation.program, Some(1), "failed"));
            }
            Ok(())
        }
    }

    fn steps() -> LifecycleSteps {
        LifecycleSteps {
            pre: vec![ToolStep::new("pre-check")],
            core: vec![ToolStep::new("apply")],
            post: vec![ToolStep::new("post-check")],
            reducers: ReducerHooks {
                pre_apply: vec![ToolStep::new("pre-reducer")],
                post_apply: vec![ToolStep::new("post-reducer")],
            },
        }
    }

    fn reducer(key: &str, lifecycle: ReducerLifecycle) -> Reducer {
        Reducer {
            key: key.to_string(),
            from: Some(json!("opensearch")),
            to: Some(json!("loki")),
            lifecycle,
            path: ".spec.distribution.modules.logging.type".to_string(),
        }
    }

    fn sub(name: &str) -> SubPhase {
        name.parse().unwrap()
    }

    #[tokio::test]
    async fn sub_phases_run_in_order_and_are_marked() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::default());
        let phase = ToolPhase::new(Lifecycle::Kubernetes, steps(), dir.path(), runner.clone());
        let mut state = UpgradeState::new(&[Lifecycle::Kubernetes]);

        phase.exec(None, &mut state).await.unwrap();

        assert_eq!(runner.programs(), vec!["pre-check", "apply", "post-check"]);
        assert_eq!(state.latest_resumable_phase(), None);
        let apply = runner.call("apply");
        assert_eq!(apply.env[ENV_PHASE], "kubernetes");
        assert_eq!(apply.env[ENV_SUB_PHASE], "kubernetes");
        assert_eq!(
            runner.call("pre-check").env[ENV_SUB_PHASE],
            "pre-kubernetes"
        );
    }

    #[tokio::test]
    async fn start_stage_skips_earlier_sub_phases() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::default());
        let phase = ToolPhase::new(Lifecycle::Distribution, steps(), dir.path(), runner.clone());
        let mut state = UpgradeState::new(&[Lifecycle::Distribution]);
        state.mark(sub("pre-distribution"), PhaseStatus::Success);

        phase.exec(Some(Stage::Core), &mut state).await.unwrap();
        assert_eq!(runner.programs(), vec!["apply", "post-check"]);
        assert_eq!(state.latest_resumable_phase(), None);
    }

    /// Story: the core tool fails; the sub-phase is recorded as failed, the
    /// post steps never run, and the error names the sub-phase.
    #[tokio::test]
    async fn story_failure_marks_slot_and_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::failing_on("apply"));
        let phase = ToolPhase::new(Lifecycle::Kubernetes, steps(), dir.path(), runner.clone());
        let mut state = UpgradeState::new(&[Lifecycle::Kubernetes]);

        let err = phase.exec(None, &mut state).await.unwrap_err();
        match &err {
            Error::Phase { phase, .. } => assert_eq!(phase, "kubernetes"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(runner.programs(), vec!["pre-check", "apply"]);
        assert_eq!(
            state.get(sub("kubernetes")).unwrap().status,
            PhaseStatus::Failed
        );
        assert_eq!(
            state.get(sub("post-kubernetes")).unwrap().status,
            PhaseStatus::Pending
        );
        assert_eq!(state.latest_resumable_phase(), Some(sub("kubernetes")));
    }

    /// Story: switching logging backends triggers reducers; the hooks run
    /// around the main apply and see the reducer values in their template data.
    #[tokio::test]
    async fn story_reducer_hooks_wrap_core_steps() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::default());
        let reducers = Reducers::from(vec![
            reducer("loggingType", ReducerLifecycle::PreApply),
            reducer("loggingCleanup", ReducerLifecycle::PostApply),
        ]);
        let template_data = json!({"spec": {"distributionVersion": "v1.29.0"}});
        let phase = ToolPhase::new(Lifecycle::Distribution, steps(), dir.path(), runner.clone())
            .with_reducers(reducers, template_data);
        let mut state = UpgradeState::new(&[Lifecycle::Distribution]);

        phase.exec(None, &mut state).await.unwrap();
        assert_eq!(
            runner.programs(),
            vec!["pre-check", "pre-reducer", "apply", "post-reducer", "post-check"]
        );

        let data_path = runner.call("pre-reducer").env[ENV_TEMPLATE_DATA].clone();
        assert!(data_path.ends_with("reducers-pre-apply.json"));
        let written = std::fs::read(&data_path).unwrap();
        let data: Value = serde_json::from_slice(&written).unwrap();
        assert_eq!(data["spec"]["distributionVersion"], "v1.29.0");
        assert_eq!(data["reducers"]["loggingType"]["to"], "loki");
        assert!(data["reducers"].get("loggingCleanup").is_none());
    }

    #[tokio::test]
    async fn hooks_are_skipped_without_reducers() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::default());
        let phase = ToolPhase::new(Lifecycle::Distribution, steps(), dir.path(), runner.clone());
        let mut state = UpgradeState::new(&[Lifecycle::Distribution]);

        phase.exec(None, &mut state).await.unwrap();
        assert!(!runner.programs().contains(&"pre-reducer".to_string()));
        assert!(!dir.path().join("reducers-pre-apply.json").exists());
    }

    /// Story: stop is called twice on a phase that never started and then it
    /// is asked to run; nothing panics and no tool is started.
    #[tokio::test]
    async fn story_stop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = MockToolRunner::new();
        runner.expect_run().never();
        let phase = ToolPhase::new(Lifecycle::Kubernetes, steps(), dir.path(), Arc::new(runner));

        phase.stop().await.unwrap();
        phase.stop().await.unwrap();

        let mut state = UpgradeState::new(&[Lifecycle::Kubernetes]);
        assert!(phase.exec(None, &mut state).await.is_err());
        assert_eq!(state.latest_resumable_phase(), Some(sub("pre-kubernetes")));
    }

    #[tokio::test]
    async fn stop_cancels_token_seen_by_runner() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = MockToolRunner::new();
        runner
            .expect_run()
            .returning(|invocation, cancel| {
                if cancel.is_cancelled() {
                    Err(Error::tool(&invocation.program, "stopped"))
                } else {
                    Ok(())
                }
            });
        let phase = Arc::new(ToolPhase::new(
            Lifecycle::Kubernetes,
            steps(),
            dir.path(),
            Arc::new(runner),
        ));

        let mut state = UpgradeState::new(&[Lifecycle::Kubernetes]);
        phase.exec(None, &mut state).await.unwrap();
        phase.stop().await.unwrap();
        phase.stop().await.unwrap();
    }

    #[tokio::test]
    async fn plugins_phase_runs_steps_without_slots() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::default());
        let phase = PluginsPhase::new(
            vec![ToolStep::new("helmfile").arg("apply")],
            dir.path(),
            runner.clone(),
        );
        let mut state = UpgradeState::new(&Lifecycle::ALL);
        let before = state.clone();

        phase.exec(None, &mut state).await.unwrap();
        assert_eq!(runner.programs(), vec!["helmfile"]);
        assert_eq!(runner.call("helmfile").env[ENV_PHASE], "plugins");
        assert_eq!(state, before);
    }

    #[test]
    fn toolchain_parses_camel_case_hooks() {
        let toolchain = Toolchain::from_yaml(
            r#"
kubernetes:
  core:
    - program: ansible-playbook
      args: [create-playbook.yaml]
distribution:
  core:
    - program: kustomize-apply
  reducers:
    preApply:
      - program: reducers-pre
plugins:
  - program: helmfile
    args: [apply]
"#,
        )
        .unwrap();
        assert!(toolchain.infrastructure.is_none());
        let distribution = toolchain.lifecycle(Lifecycle::Distribution).unwrap();
        assert_eq!(distribution.reducers.pre_apply[0].program, "reducers-pre");
        assert_eq!(toolchain.plugins.len(), 1);
    }

    #[test]
    fn toolchain_rejects_unknown_keys() {
        assert!(Toolchain::from_yaml("networking:\n  core: []\n").is_err());
    }

    #[test]
    fn toolchain_sections_must_match_kind() {
        let toolchain = Toolchain {
            infrastructure: Some(steps()),
            ..Toolchain::default()
        };
        assert!(toolchain.validate(ClusterKind::EksCluster).is_ok());
        assert!(matches!(
            toolchain.validate(ClusterKind::OnPremises),
            Err(Error::UnsupportedPhase { .. })
        ));
    }

    #[test]
    fn build_phases_follows_kind_lifecycles() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = PhaseContext {
            workdir: dir.path().to_path_buf(),
            runner: Arc::new(RecordingRunner::default()),
            template_data: Value::Null,
            reducers: BTreeMap::new(),
            env: BTreeMap::new(),
        };

        let phases = Toolchain::default()
            .build_phases(ClusterKind::KfdDistribution, &ctx)
            .unwrap();
        assert!(phases.lifecycle(Lifecycle::Infrastructure).is_none());
        assert!(phases.lifecycle(Lifecycle::Kubernetes).is_none());
        assert_eq!(
            phases.lifecycle(Lifecycle::Distribution).unwrap().name(),
            "distribution"
        );
        assert!(phases.plugins().is_some());
    }
}
