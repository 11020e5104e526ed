//! Filesystem targets of a node installation.

use crate::config::NodeConfig;
use crate::types::AssetRole;
use std::path::{Path, PathBuf};

pub const SIGNING_STATE_FILE: &str = "priv_validator_state.json";
pub const LOCK_FILE: &str = ".storysnap.lock";

/// Every path the apply pipeline reads or writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeLayout {
    /// `.story` under the operator's home.
    pub node_home: PathBuf,
    /// Consensus client home, extraction target for consensus archives.
    pub consensus_dir: PathBuf,
    pub consensus_data_dir: PathBuf,
    /// Validator signing state.
    pub signing_state: PathBuf,
    /// Backup location; must stay outside every directory a provider wipes or
    /// extracts into.
    pub backup: PathBuf,
    /// Root of the execution client tree (`.story/geth`).
    pub execution_root: PathBuf,
    /// Execution chain dir (`.story/geth/<network>/geth`), extraction target
    /// for execution archives.
    pub execution_dir: PathBuf,
    /// Where archives are staged before extraction.
    pub staging_dir: PathBuf,
}

impl NodeLayout {
    /// Standard layout below `home`.
    pub fn standard(home: &Path, network: &str) -> Self {
        let node_home = home.join(".story");
        let consensus_dir = node_home.join("story");
        let consensus_data_dir = consensus_dir.join("data");
        let execution_root = node_home.join("geth");
        Self {
            signing_state: consensus_data_dir.join(SIGNING_STATE_FILE),
            backup: node_home.join(format!("{}.backup", SIGNING_STATE_FILE)),
            execution_dir: execution_root.join(network).join("geth"),
            staging_dir: node_home.clone(),
            node_home,
            consensus_dir,
            consensus_data_dir,
            execution_root,
        }
    }

    /// Standard layout with the overrides from `[node.paths]` applied.
    pub fn from_config(home: &Path, node: &NodeConfig) -> Self {
        let mut layout = Self::standard(home, &node.network);
        let paths = &node.paths;
        let set = |slot: &mut PathBuf, value: &Option<PathBuf>| {
            if let Some(v) = value {
                *slot = v.clone();
            }
        };
        set(&mut layout.node_home, &paths.node_home);
        set(&mut layout.consensus_dir, &paths.consensus_dir);
        set(&mut layout.consensus_data_dir, &paths.consensus_data_dir);
        set(&mut layout.signing_state, &paths.signing_state);
        set(&mut layout.backup, &paths.backup);
        set(&mut layout.execution_root, &paths.execution_root);
        set(&mut layout.execution_dir, &paths.execution_dir);
        set(&mut layout.staging_dir, &paths.staging_dir);
        layout
    }

    /// Extraction target for an archive of the given role.
    pub fn dir_for(&self, role: AssetRole) -> &Path {
        match role {
            AssetRole::Consensus => &self.consensus_dir,
            AssetRole::Execution => &self.execution_dir,
        }
    }

    /// Execution `chaindata` directory wiped by some providers.
    pub fn execution_chaindata(&self) -> PathBuf {
        self.execution_dir.join("chaindata")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.node_home.join(LOCK_FILE)
    }
}
