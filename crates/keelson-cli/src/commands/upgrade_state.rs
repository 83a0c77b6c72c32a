//! Upgrade-state command - inspect or reset the persisted upgrade progress

use std::fmt::Write;

use clap::Args;
use tracing::info;

use keelson_upgrade::{load_state, UpgradeState, UpgradeStorer};

use crate::config::KubeArgs;
use crate::kube_store::{kube_client, upgrade_state_name, KubeUpgradeStorer};
use crate::Result;

/// Show or reset the persisted upgrade state of a cluster
#[derive(Args, Debug)]
pub struct UpgradeStateArgs {
    /// Cluster name (`metadata.name` of its configuration)
    #[arg(long)]
    pub cluster: String,

    /// Delete the persisted state so the next upgrade starts over
    #[arg(long)]
    pub reset: bool,

    #[command(flatten)]
    pub kube: KubeArgs,
}

pub async fn run(args: UpgradeStateArgs) -> Result<()> {
    let client = kube_client(args.kube.kubeconfig.as_deref()).await?;
    let storer = KubeUpgradeStorer::new(client, &args.cluster);

    if args.reset {
        storer.delete().await?;
        info!(config_map = %upgrade_state_name(&args.cluster), "upgrade state reset");
        return Ok(());
    }

    match load_state(&storer).await? {
        Some(state) => print!("{}", render_state(&state)),
        None => println!("No upgrade in progress for {}.", args.cluster),
    }
    Ok(())
}

/// Slot table followed by where the next run resumes
pub fn render_state(state: &UpgradeState) -> String {
    let mut out = String::new();
    for (sub, slot) in state.slots() {
        let _ = writeln!(out, "{:<22}{}", sub.name(), slot.status);
    }
    match state.latest_resumable_phase() {
        Some(sub) => {
            let _ = writeln!(out, "\nNext run resumes at {}.", sub);
        }
        None => out.push_str("\nAll sub-phases completed.\n"),
    }
    out
}
