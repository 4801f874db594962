//! Enclave Configuration

use anyhow::Context;
use l1_integration::Address;
use l2_runtime::{CHAIN_ID, DEFAULT_PRUNE_DEPTH};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Enclave configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnclaveConfig {
    /// Identity of this node, recorded as the producer of its rollups
    pub node_address: Address,
    /// Chain id every accepted transaction must carry
    pub chain_id: u64,
    /// Depth below the head after which included transactions leave the pending pool
    pub prune_depth: u64,
    /// Directory of the sled database (in-memory store when unset)
    pub data_dir: Option<PathBuf>,
    /// Capacity of the speculative executor's queue (0 = unbounded)
    pub speculative_queue_bound: usize,
}

impl Default for EnclaveConfig {
    fn default() -> Self {
        Self {
            node_address: Address::ZERO,
            chain_id: CHAIN_ID,
            prune_depth: DEFAULT_PRUNE_DEPTH,
            data_dir: None,
            speculative_queue_bound: 0,
        }
    }
}

impl EnclaveConfig {
    /// Default configuration for the given node
    pub fn for_node(node_address: Address) -> Self {
        Self {
            node_address,
            ..Self::default()
        }
    }

    /// Load a JSON configuration file. Missing fields take their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading enclave config {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parsing enclave config {}", path.display()))?;

        anyhow::ensure!(config.prune_depth > 0, "prune_depth must be at least 1");
        Ok(config)
    }
}
