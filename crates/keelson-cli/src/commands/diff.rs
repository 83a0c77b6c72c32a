//! Diff command - show what applying a configuration would change

use std::fmt::Write;
use std::sync::Arc;

use clap::Args;

use keelson_common::{display_value, ForceFlags};
use keelson_phases::{Preflight, PreflightConfig, PreflightReport, StdinConfirmer};

use crate::config::{ClusterArgs, ClusterConfig};
use crate::kube_store::{kube_client, KubeConfigStorer};
use crate::Result;

/// Compare a configuration with the one applied on the cluster
#[derive(Args, Debug)]
pub struct DiffArgs {
    #[command(flatten)]
    pub cluster: ClusterArgs,
}

pub async fn run(args: DiffArgs) -> Result<()> {
    let cluster = ClusterConfig::load(&args.cluster.config)?;
    let client = kube_client(args.cluster.kube.kubeconfig.as_deref()).await?;
    let preflight = Preflight::from_config(
        &PreflightConfig {
            force: ForceFlags::none(),
            rules_dir: args.cluster.rules_dir.clone(),
        },
        cluster.kind,
        Arc::new(KubeConfigStorer::new(client, &cluster.name)),
        Arc::new(StdinConfirmer::new()),
    )?;

    let report = preflight.inspect(&cluster.value).await?;
    print!("{}", render_report(&report));

    // Violations still fail the command so scripts can gate on it
    violation_error(&report).map_or(Ok(()), Err)
}

fn violation_error(report: &PreflightReport) -> Option<crate::Error> {
    report
        .has_violations()
        .then(|| keelson_common::Error::Violations(report.violations()).into())
}

/// Human-readable preflight report
pub fn render_report(report: &PreflightReport) -> String {
    let mut out = String::new();
    if report.fresh {
        out.push_str("Nothing applied yet: the whole configuration is new.\n");
        return out;
    }
    if report.changelog.is_empty() {
        out.push_str("No changes.\n");
        return out;
    }

    out.push_str("Changes:\n");
    for change in &report.changelog {
        let _ = writeln!(out, "  {}", change);
    }

    if !report.immutable_violations.is_empty() {
        out.push_str("\nImmutable fields changed:\n");
        for violation in &report.immutable_violations {
            let _ = writeln!(out, "  - {}", violation);
        }
    }
    if !report.unsupported_violations.is_empty() {
        out.push_str("\nUnsupported changes:\n");
        for violation in &report.unsupported_violations {
            let _ = writeln!(out, "  - {}", violation);
        }
    }
    if !report.unsafe_reducers.is_empty() {
        out.push_str("\nMigrations needing confirmation:\n");
        for matched in &report.unsafe_reducers {
            let _ = match &matched.rule.description {
                Some(description) => writeln!(out, "  - {} ({})", matched.change, description),
                None => writeln!(out, "  - {}", matched.change),
            };
        }
    }

    let reducers: Vec<_> = report
        .reducers
        .iter()
        .flat_map(|(phase, reducers)| reducers.iter().map(move |r| (phase, r)))
        .collect();
    if !reducers.is_empty() {
        out.push_str("\nReducers:\n");
        for (phase, reducer) in reducers {
            let _ = writeln!(
                out,
                "  - {} {} ({}): {} -> {}",
                phase,
                reducer.key,
                reducer.lifecycle,
                display_value(reducer.from.as_ref()),
                display_value(reducer.to.as_ref())
            );
        }
    }
    out
}
