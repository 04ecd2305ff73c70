//! Static network configuration: who the peers are and how to reach them.
//!
//! Party identity assignment follows the spec's default rule: sort node
//! names lexicographically and assign `party_id` by rank, unless an
//! explicit assignment is given.

use std::collections::BTreeMap;
use std::io;
use std::net::SocketAddr;
use std::path::Path;

use serde::Deserialize;

use crate::PartyId;

/// One peer's static identity and address.
#[derive(Clone, Debug)]
pub struct NetworkPartyConfig {
    pub name: String,
    pub address: SocketAddr,
}

/// The full three-party network configuration.
#[derive(Clone, Debug)]
pub struct NetworkConfig {
    pub parties: Vec<NetworkPartyConfig>,
}

#[derive(Clone, Debug, Deserialize)]
struct RawNetworkConfig {
    parties: Vec<RawNetworkPartyConfig>,
}

#[derive(Clone, Debug, Deserialize)]
struct RawNetworkPartyConfig {
    name: String,
    address: SocketAddr,
}

impl NetworkConfig {
    pub fn load(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = std::fs::File::open(path)?;
        let raw: RawNetworkConfig = serde_json::from_reader(file)
            .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))?;
        Ok(NetworkConfig::from_raw(raw))
    }

    fn from_raw(raw: RawNetworkConfig) -> Self {
        let mut by_name: BTreeMap<String, SocketAddr> = BTreeMap::new();
        for party in raw.parties {
            by_name.insert(party.name, party.address);
        }
        NetworkConfig {
            parties: by_name
                .into_iter()
                .map(|(name, address)| NetworkPartyConfig { name, address })
                .collect(),
        }
    }

    /// The `party_id` assigned to `name` under the default lexicographic
    /// ranking, or `None` if `name` isn't in this configuration.
    pub fn party_id_of(&self, name: &str) -> Option<PartyId> {
        self.parties.iter().position(|party| party.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn party_ids_follow_lexicographic_name_order() {
        let config = NetworkConfig::from_raw(RawNetworkConfig {
            parties: vec![
                RawNetworkPartyConfig {
                    name: "carol".to_string(),
                    address: "127.0.0.1:9003".parse().unwrap(),
                },
                RawNetworkPartyConfig {
                    name: "alice".to_string(),
                    address: "127.0.0.1:9001".parse().unwrap(),
                },
                RawNetworkPartyConfig {
                    name: "bob".to_string(),
                    address: "127.0.0.1:9002".parse().unwrap(),
                },
            ],
        });
        assert_eq!(config.party_id_of("alice"), Some(0));
        assert_eq!(config.party_id_of("bob"), Some(1));
        assert_eq!(config.party_id_of("carol"), Some(2));
    }
}
