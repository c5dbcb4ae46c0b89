use crate::cluster::NodeId;
use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_API_PORT: u16 = 9090;
const DEFAULT_UDP_PORT: u16 = 8081;

/// Who this node is; loaded once at startup and never mutated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    pub id: NodeId,
    /// "host:port" other nodes use for RPC
    pub rpc_addr: String,
    /// "host:port" of the UDP ping responder
    pub probe_addr: String,
    /// Personal queue name announced to peers
    pub reply_queue: String,
}

impl NodeIdentity {
    pub fn new(id: impl Into<String>, rpc_addr: impl Into<String>, probe_addr: impl Into<String>) -> Self {
        let id = id.into();
        let reply_queue = format!("node_reply:{}", id);
        Self {
            id,
            rpc_addr: rpc_addr.into(),
            probe_addr: probe_addr.into(),
            reply_queue,
        }
    }
}

/// A statically configured peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSpec {
    pub id: NodeId,
    pub addr: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMode {
    Http,
    Udp,
}

impl FromStr for ProbeMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "udp" => Ok(Self::Udp),
            other => bail!("unknown probe mode '{}', expected http or udp", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timings {
    pub health_interval: Duration,
    /// Bound on every inter-node RPC and probe
    pub request_timeout: Duration,
    pub card_timeout: Duration,
    pub trade_timeout: Duration,
    /// How long a submitted card may wait for a free inbox slot
    pub submit_timeout: Duration,
    pub turn_pacing: Duration,
    pub startup_grace: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            health_interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(2),
            card_timeout: Duration::from_secs(20),
            trade_timeout: Duration::from_secs(30),
            submit_timeout: Duration::from_secs(5),
            turn_pacing: Duration::from_secs(1),
            startup_grace: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub identity: NodeIdentity,
    pub bind_host: String,
    pub api_port: u16,
    pub udp_port: u16,
    /// Every other node, self excluded
    pub peers: Vec<PeerSpec>,
    /// UDP probe targets keyed by node id
    pub probe_addrs: BTreeMap<NodeId, String>,
    pub probe_mode: ProbeMode,
    pub timings: Timings,
    pub initial_stock: u32,
}

impl NodeConfig {
    /// Config with default timings; peers matching our own id are dropped
    pub fn new(identity: NodeIdentity, peers: Vec<PeerSpec>) -> Self {
        let peers: Vec<PeerSpec> = peers.into_iter().filter(|p| p.id != identity.id).collect();
        let probe_addrs = peers
            .iter()
            .map(|p| (p.id.clone(), with_port(&p.addr, DEFAULT_UDP_PORT)))
            .collect();

        Self {
            identity,
            bind_host: "0.0.0.0".to_string(),
            api_port: DEFAULT_API_PORT,
            udp_port: DEFAULT_UDP_PORT,
            peers,
            probe_addrs,
            probe_mode: ProbeMode::Http,
            timings: Timings::default(),
            initial_stock: 10,
        }
    }

    /// Load the node configuration from the environment
    pub fn from_env() -> Result<Self> {
        let id = env::var("SERVER_ID").unwrap_or_else(|_| format!("server-{}", std::process::id()));
        let advertise = env::var("ADVERTISE_HOST").unwrap_or_else(|_| id.clone());
        let api_port: u16 = env_or("API_PORT", DEFAULT_API_PORT)?;
        let udp_port: u16 = env_or("UDP_PORT", DEFAULT_UDP_PORT)?;

        let identity = NodeIdentity::new(
            id,
            format!("{}:{}", advertise, api_port),
            format!("{}:{}", advertise, udp_port),
        );

        let peers = match env::var("SERVER_LIST") {
            Ok(raw) => parse_peer_list(&raw).context("Invalid SERVER_LIST")?,
            Err(_) => Vec::new(),
        };

        let mut config = Self::new(identity, peers);
        config.bind_host = env::var("BIND_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        config.api_port = api_port;
        config.udp_port = udp_port;
        config.probe_mode = env_or("PROBE_MODE", ProbeMode::Http)?;

        config.probe_addrs = match env::var("PROBE_LIST") {
            Ok(raw) => parse_peer_list(&raw)
                .context("Invalid PROBE_LIST")?
                .into_iter()
                .map(|p| (p.id, p.addr))
                .collect(),
            Err(_) => config
                .peers
                .iter()
                .map(|p| (p.id.clone(), with_port(&p.addr, udp_port)))
                .collect(),
        };

        let defaults = Timings::default();
        config.timings = Timings {
            health_interval: Duration::from_secs(env_or("HEALTH_CHECK_INTERVAL_SECS", defaults.health_interval.as_secs())?),
            request_timeout: Duration::from_millis(env_or("REQUEST_TIMEOUT_MS", 2000)?),
            card_timeout: Duration::from_secs(env_or("CARD_TIMEOUT_SECS", defaults.card_timeout.as_secs())?),
            trade_timeout: Duration::from_secs(env_or("TRADE_TIMEOUT_SECS", defaults.trade_timeout.as_secs())?),
            submit_timeout: defaults.submit_timeout,
            turn_pacing: Duration::from_millis(env_or("TURN_PACING_MS", 1000)?),
            startup_grace: Duration::from_secs(env_or("STARTUP_GRACE_SECS", defaults.startup_grace.as_secs())?),
        };
        config.initial_stock = env_or("INITIAL_STOCK", 10)?;

        Ok(config)
    }

    pub fn id(&self) -> &NodeId {
        &self.identity.id
    }

    /// RPC address for a node id, self included
    pub fn addr_of(&self, node: &str) -> Option<&str> {
        if node == self.identity.id {
            return Some(&self.identity.rpc_addr);
        }
        self.peers.iter().find(|p| p.id == node).map(|p| p.addr.as_str())
    }

    pub fn peer_ids(&self) -> Vec<NodeId> {
        self.peers.iter().map(|p| p.id.clone()).collect()
    }
}

/// Parse "id=host:port" or "host:port" entries, comma separated.
/// Without an explicit id the host part is the id.
pub fn parse_peer_list(raw: &str) -> Result<Vec<PeerSpec>> {
    let mut peers = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (id, addr) = match entry.split_once('=') {
            Some((id, addr)) => (id.trim().to_string(), addr.trim().to_string()),
            None => {
                let host = entry.split(':').next().unwrap_or(entry);
                (host.to_string(), entry.to_string())
            }
        };
        let Some((host, port)) = addr.rsplit_once(':') else {
            bail!("peer entry '{}' is missing a port", entry);
        };
        if id.is_empty() || host.is_empty() {
            bail!("peer entry '{}' is missing a host", entry);
        }
        port.parse::<u16>()
            .with_context(|| format!("peer entry '{}' has an invalid port", entry))?;
        peers.push(PeerSpec { id, addr });
    }
    Ok(peers)
}

fn with_port(addr: &str, port: u16) -> String {
    let host = addr.rsplit_once(':').map(|(h, _)| h).unwrap_or(addr);
    format!("{}:{}", host, port)
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{} has an invalid value '{}': {}", key, raw, e)),
        Err(_) => Ok(default),
    }
}
