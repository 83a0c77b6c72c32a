//! Cluster configuration and shared command line arguments

use std::path::{Path, PathBuf};

use clap::Args;
use serde_json::Value;

use keelson_common::ClusterKind;

use crate::{Error, Result};

/// Kubernetes connection arguments
#[derive(Args, Debug, Clone)]
pub struct KubeArgs {
    /// Kubeconfig of the target cluster (kube defaults when unset)
    #[arg(long, env = "KEELSON_KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,
}

/// Arguments locating the cluster configuration and its rules
#[derive(Args, Debug, Clone)]
pub struct ClusterArgs {
    /// Path to the cluster configuration file
    #[arg(short = 'c', long = "config", env = "KEELSON_CONFIG")]
    pub config: PathBuf,

    /// Directory holding the per-kind rules files
    #[arg(long, env = "KEELSON_RULES_DIR", default_value = "rules")]
    pub rules_dir: PathBuf,

    #[command(flatten)]
    pub kube: KubeArgs,
}

/// A loaded cluster configuration file
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// File content as read
    pub raw: Vec<u8>,
    /// Parsed tree
    pub value: Value,
    /// Cluster kind from `kind`
    pub kind: ClusterKind,
    /// Cluster name from `metadata.name`
    pub name: String,
}

impl ClusterConfig {
    /// Parse configuration file content
    pub fn parse(raw: Vec<u8>) -> Result<Self> {
        let value: Value = serde_yaml::from_slice(&raw)?;
        let kind = ClusterKind::from_config(&value)?;
        let name = value
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::validation("configuration has no metadata.name"))?
            .to_string();
        Ok(Self {
            raw,
            value,
            kind,
            name,
        })
    }

    /// Read and parse a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        Self::parse(read_file(path)?)
    }
}

/// Read a whole file, naming it in the error
pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|source| Error::ReadFile {
        path: path.to_path_buf(),
        source,
    })
}
