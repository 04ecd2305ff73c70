//! Node configuration: identity, network mesh, signing key, and the
//! optional settings listed in spec §6 "Node configuration".

use std::path::PathBuf;

use clap::Parser;
use mpc::transport::NetworkConfig;
use mpc::PartyId;
use serde::Deserialize;

/// Settlement-node configuration, sourced from CLI flags or environment
/// variables (`NODE_*`).
#[derive(Parser, Debug)]
pub struct NodeConfig {
    /// this node's stable name; must appear in `--network-config`
    #[clap(long, env = "NODE_NAME")]
    pub node_name: String,

    /// explicit party_id override; default assigns by lexicographic rank
    /// of node names in the network configuration
    #[clap(long, env = "NODE_PARTY_ID")]
    pub party_id: Option<PartyId>,

    /// path to the network configuration file (peer names and addresses)
    #[clap(long, env = "NODE_NETWORK_CONFIG")]
    pub network_config: PathBuf,

    /// settlement registry contract address
    #[clap(long, env = "NODE_SETTLEMENT_CONTRACT")]
    pub settlement_contract: String,

    /// event transport endpoint for the settlement registry (push
    /// preferred, poll fallback; interpretation is the ledger adapter's)
    #[clap(long, env = "NODE_EVENT_ENDPOINT")]
    pub event_endpoint: String,

    /// path to this node's persisted signing key; generated and written
    /// with owner-only permissions if it doesn't exist yet
    #[clap(long, env = "NODE_SIGNING_KEY_PATH")]
    pub signing_key_path: PathBuf,

    /// path to an optional initial capacity table, a JSON array of
    /// `{"token_address": ..., "amount": ...}` entries
    #[clap(long, env = "NODE_CAPACITY_TABLE")]
    pub capacity_table: Option<PathBuf>,

    /// allow sourcing capacity shortfalls via the external swap venue
    #[clap(long, env = "NODE_ENABLE_EXTERNAL_SWAP")]
    pub enable_external_swap: bool,
}

impl NodeConfig {
    /// Load the network mesh config and resolve this node's `party_id`,
    /// honoring an explicit override or falling back to the default
    /// lexicographic-rank assignment.
    pub fn resolve_network(&self) -> std::io::Result<(NetworkConfig, PartyId)> {
        let network = NetworkConfig::load(&self.network_config)?;
        let party_id = match self.party_id {
            Some(party_id) => party_id,
            None => network.party_id_of(&self.node_name).ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("node name `{}` not present in network config", self.node_name),
                )
            })?,
        };
        Ok((network, party_id))
    }
}

/// One entry of an optional initial capacity table (spec §6).
#[derive(Clone, Debug, Deserialize)]
pub struct CapacityEntry {
    pub token_address: String,
    pub amount: u64,
}

/// Load the optional initial capacity table, if configured.
pub fn load_capacity_table(path: &PathBuf) -> std::io::Result<Vec<CapacityEntry>> {
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw)
        .map_err(|error| std::io::Error::new(std::io::ErrorKind::InvalidData, error))
}
