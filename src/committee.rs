//! Committee snapshot: which nodes can sign, where to reach them, and their BLS keys.

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SigningError};

/// BLS section of a node's network info entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImaInfo {
    #[serde(default)]
    pub t: i64,
    #[serde(default)]
    pub n: i64,
    /// 1-based.
    #[serde(default)]
    pub this_node_index: i64,
    #[serde(rename = "BLSPublicKey0", default)]
    pub bls_public_key0: String,
    #[serde(rename = "BLSPublicKey1", default)]
    pub bls_public_key1: String,
    #[serde(rename = "BLSPublicKey2", default)]
    pub bls_public_key2: String,
    #[serde(rename = "BLSPublicKey3", default)]
    pub bls_public_key3: String,
    #[serde(rename = "commonBLSPublicKey0", default)]
    pub common_bls_public_key0: String,
    #[serde(rename = "commonBLSPublicKey1", default)]
    pub common_bls_public_key1: String,
    #[serde(rename = "commonBLSPublicKey2", default)]
    pub common_bls_public_key2: String,
    #[serde(rename = "commonBLSPublicKey3", default)]
    pub common_bls_public_key3: String,
}

/// One entry of the chain's network info, as discovered from the nodes themselves.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    #[serde(rename = "nodeID", default)]
    pub node_id: u64,
    #[serde(default)]
    pub name: String,
    pub ip: Option<String>,
    pub ip6: Option<String>,
    pub http_rpc_port: Option<u16>,
    pub https_rpc_port: Option<u16>,
    pub ws_rpc_port: Option<u16>,
    pub wss_rpc_port: Option<u16>,
    pub http_rpc_port6: Option<u16>,
    pub https_rpc_port6: Option<u16>,
    pub ws_rpc_port6: Option<u16>,
    pub wss_rpc_port6: Option<u16>,
    pub ima_agent_rpc_port: Option<u16>,
    pub ima_info: Option<ImaInfo>,
}

impl NodeInfo {
    /// Has a usable threshold, participant count and all eight key components.
    pub fn is_fully_discovered(&self) -> bool {
        match &self.ima_info {
            Some(info) => {
                info.t > 0
                    && info.n > 0
                    && [
                        &info.bls_public_key0,
                        &info.bls_public_key1,
                        &info.bls_public_key2,
                        &info.bls_public_key3,
                        &info.common_bls_public_key0,
                        &info.common_bls_public_key1,
                        &info.common_bls_public_key2,
                        &info.common_bls_public_key3,
                    ]
                    .iter()
                    .all(|key| !key.is_empty())
            }
            None => false,
        }
    }
}

/// `{"network": [...]}` as cached by discovery.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub network: Vec<NodeInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyShare {
    #[serde(rename = "BLSPublicKey0")]
    pub key0: String,
    #[serde(rename = "BLSPublicKey1")]
    pub key1: String,
    #[serde(rename = "BLSPublicKey2")]
    pub key2: String,
    #[serde(rename = "BLSPublicKey3")]
    pub key3: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommonPublicKey {
    #[serde(rename = "commonBLSPublicKey0")]
    pub key0: String,
    #[serde(rename = "commonBLSPublicKey1")]
    pub key1: String,
    #[serde(rename = "commonBLSPublicKey2")]
    pub key2: String,
    #[serde(rename = "commonBLSPublicKey3")]
    pub key3: String,
}

#[derive(Debug, Clone)]
pub struct CommitteeNode {
    /// Position in the network list.
    pub position: usize,
    pub node_id: u64,
    pub url: String,
    /// Zero-based BLS signer index (`thisNodeIndex - 1`).
    pub signer_index: usize,
    pub public_key: Option<PublicKeyShare>,
}

/// Read-only view of the committee for the duration of a round.
#[derive(Debug, Clone)]
pub struct CommitteeView {
    nodes: Vec<CommitteeNode>,
    threshold: usize,
    participants: usize,
    common_public_key: Option<CommonPublicKey>,
}

impl CommitteeView {
    /// Build the view from cached network info. Threshold and participants come from the first
    /// fully discovered node and must satisfy `0 < t <= n`.
    ///
    /// With `cross_ima_mode` nodes are addressed at their IMA agent port and `this_node` (a
    /// position in the list) is reached over loopback.
    pub fn from_network_info(
        info: &NetworkInfo,
        cross_ima_mode: bool,
        this_node: Option<usize>,
    ) -> Result<Self> {
        let (threshold, participants) =
            check_threshold(discover_threshold(info), discover_participants(info), "committee")?;

        let nodes = info
            .network
            .iter()
            .enumerate()
            .map(|(position, node)| {
                let url = if cross_ima_mode {
                    compose_ima_agent_url(node, this_node == Some(position))
                } else {
                    compose_node_url(node)
                };
                let discovered = node.is_fully_discovered();
                let ima = node.ima_info.as_ref().filter(|_| discovered);
                CommitteeNode {
                    position,
                    node_id: node.node_id,
                    url: url.unwrap_or_default(),
                    signer_index: ima
                        .and_then(|ima| usize::try_from(ima.this_node_index - 1).ok())
                        .unwrap_or(position),
                    public_key: ima.map(|ima| PublicKeyShare {
                        key0: ima.bls_public_key0.clone(),
                        key1: ima.bls_public_key1.clone(),
                        key2: ima.bls_public_key2.clone(),
                        key3: ima.bls_public_key3.clone(),
                    }),
                }
            })
            .collect();

        let common_public_key = info
            .network
            .iter()
            .find(|node| node.is_fully_discovered())
            .and_then(|node| node.ima_info.as_ref())
            .map(|ima| CommonPublicKey {
                key0: ima.common_bls_public_key0.clone(),
                key1: ima.common_bls_public_key1.clone(),
                key2: ima.common_bls_public_key2.clone(),
                key3: ima.common_bls_public_key3.clone(),
            });

        Ok(Self {
            nodes,
            threshold,
            participants,
            common_public_key,
        })
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn participants(&self) -> usize {
        self.participants
    }

    pub fn nodes(&self) -> &[CommitteeNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, position: usize) -> Option<&CommitteeNode> {
        self.nodes.get(position)
    }

    /// Public key share of the node signing under `signer_index`.
    pub fn public_key(&self, signer_index: usize) -> Result<&PublicKeyShare> {
        self.nodes
            .iter()
            .find(|node| node.signer_index == signer_index && node.public_key.is_some())
            .and_then(|node| node.public_key.as_ref())
            .ok_or_else(|| {
                SigningError::Verification(format!(
                    "BLS 1/{} public key discovery failed for node #{}",
                    self.nodes.len(),
                    signer_index
                ))
            })
    }

    pub fn common_public_key(&self) -> Option<&CommonPublicKey> {
        self.common_public_key.as_ref()
    }
}

/// Threshold of the first fully discovered node, `-1` when there is none.
pub fn discover_threshold(info: &NetworkInfo) -> i64 {
    info.network
        .iter()
        .find(|node| node.is_fully_discovered())
        .and_then(|node| node.ima_info.as_ref())
        .map_or(-1, |ima| ima.t)
}

/// Participant count of the first fully discovered node, `-1` when there is none.
pub fn discover_participants(info: &NetworkInfo) -> i64 {
    info.network
        .iter()
        .find(|node| node.is_fully_discovered())
        .and_then(|node| node.ima_info.as_ref())
        .map_or(-1, |ima| ima.n)
}

pub fn check_threshold(t: i64, n: i64, operation: &str) -> Result<(usize, usize)> {
    if t <= 0 {
        return Err(SigningError::Config(format!(
            "operation {} will fail because discovered BLS threshold {} is invalid",
            operation, t
        )));
    }
    if n <= 0 {
        return Err(SigningError::Config(format!(
            "operation {} will fail because discovered BLS number of participants {} is invalid",
            operation, n
        )));
    }
    if t > n {
        return Err(SigningError::Config(format!(
            "operation {} will fail because discovered BLS threshold {} is greater than BLS number of participants {}",
            operation, t, n
        )));
    }
    Ok((t as usize, n as usize))
}

/// JSON-RPC endpoint of a node: http, ws, https, wss over IPv4, then the same over IPv6.
pub fn compose_node_url(node: &NodeInfo) -> Option<String> {
    if let Some(ip) = node.ip.as_deref().filter(|ip| !ip.is_empty()) {
        let schemes = [
            ("http", node.http_rpc_port),
            ("ws", node.ws_rpc_port),
            ("https", node.https_rpc_port),
            ("wss", node.wss_rpc_port),
        ];
        if let Some((scheme, port)) = first_port(&schemes) {
            return Some(format!("{}://{}:{}", scheme, ip, port));
        }
    }
    if let Some(ip6) = node.ip6.as_deref().filter(|ip| !ip.is_empty()) {
        let schemes = [
            ("http", node.http_rpc_port6),
            ("ws", node.ws_rpc_port6),
            ("https", node.https_rpc_port6),
            ("wss", node.wss_rpc_port6),
        ];
        if let Some((scheme, port)) = first_port(&schemes) {
            return Some(format!("{}://[{}]:{}", scheme, ip6, port));
        }
    }
    None
}

/// Endpoint of the IMA agent running next to a node. Its port is fixed relative to the node's
/// base port, so any known RPC port is enough to derive it.
pub fn compose_ima_agent_url(node: &NodeInfo, is_this_node: bool) -> Option<String> {
    let derived = [
        (node.http_rpc_port, 3),
        (node.ws_rpc_port, 2),
        (node.https_rpc_port, 8),
        (node.wss_rpc_port, 7),
    ];
    let port = node.ima_agent_rpc_port.filter(|p| *p > 0).or_else(|| {
        derived.iter().find_map(|(port, offset)| {
            port.filter(|p| *p > 0)
                .and_then(|p| p.checked_add(10))
                .and_then(|p| p.checked_sub(*offset))
        })
    })?;
    let ip = if is_this_node {
        "127.0.0.1"
    } else {
        node.ip.as_deref().filter(|ip| !ip.is_empty())?
    };
    Some(format!("http://{}:{}", ip, port))
}

fn first_port(schemes: &[(&'static str, Option<u16>)]) -> Option<(&'static str, u16)> {
    schemes
        .iter()
        .find_map(|(scheme, port)| port.filter(|p| *p > 0).map(|p| (*scheme, p)))
}

/// A chain known to the topology cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainInfo {
    pub name: String,
    #[serde(default)]
    pub chain_id: String,
    pub nodes: Vec<NodeInfo>,
}

/// Last known network topology, refreshed elsewhere.
pub trait TopologyCache: Send + Sync {
    fn cached_chains(&self) -> Vec<ChainInfo>;
}

/// Topology loaded once, e.g. from a file written by the discovery service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticTopology {
    pub chains: Vec<ChainInfo>,
}

impl StaticTopology {
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

impl TopologyCache for StaticTopology {
    fn cached_chains(&self) -> Vec<ChainInfo> {
        self.chains.clone()
    }
}

/// Endpoint of a random node of `chain`.
pub fn pick_random_chain_url(chain: &ChainInfo) -> Option<String> {
    let urls: Vec<String> = chain.nodes.iter().filter_map(compose_node_url).collect();
    urls.choose(&mut rand::thread_rng()).cloned()
}

/// Resolve a live endpoint of the named chain from the cache.
pub fn resolve_chain_url(topology: &dyn TopologyCache, chain_name: &str) -> Result<String> {
    let chains = topology.cached_chains();
    if chains.is_empty() {
        return Err(SigningError::Config(
            "no chains in network observer cache yet, try again later".to_string(),
        ));
    }
    chains
        .iter()
        .find(|chain| chain.name == chain_name)
        .and_then(pick_random_chain_url)
        .ok_or_else(|| {
            SigningError::Config(format!(
                "failed to discover access parameters of chain {}, try again later",
                chain_name
            ))
        })
}
