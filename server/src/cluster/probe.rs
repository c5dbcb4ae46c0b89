use crate::cluster::NodeId;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

const PING: &[u8] = b"ping";
const PONG: &[u8] = b"pong";

/// One bounded liveness check against a peer
#[async_trait]
pub trait Probe: Send + Sync {
    async fn check(&self, peer: &NodeId) -> bool;
}

/// Probe by `GET /health` on the peer's API port
pub struct HttpProbe {
    client: reqwest::Client,
    addrs: BTreeMap<NodeId, String>,
}

impl HttpProbe {
    pub fn new(addrs: BTreeMap<NodeId, String>, request_timeout: Duration) -> Result<Self> {
        // No pooling: a stale keep-alive connection must not answer for a dead node
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .pool_max_idle_per_host(0)
            .build()?;
        Ok(Self { client, addrs })
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn check(&self, peer: &NodeId) -> bool {
        let Some(addr) = self.addrs.get(peer) else {
            return false;
        };
        match self.client.get(format!("http://{}/health", addr)).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(peer = %peer, error = %e, "health probe failed");
                false
            }
        }
    }
}

/// Probe by a "ping" datagram answered with "pong"
pub struct UdpProbe {
    addrs: BTreeMap<NodeId, String>,
    request_timeout: Duration,
}

impl UdpProbe {
    pub fn new(addrs: BTreeMap<NodeId, String>, request_timeout: Duration) -> Self {
        Self { addrs, request_timeout }
    }

    async fn ping(&self, addr: &str) -> Result<bool> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(addr).await?;
        socket.send(PING).await?;

        let mut buf = [0u8; 16];
        let len = timeout(self.request_timeout, socket.recv(&mut buf)).await??;
        Ok(&buf[..len] == PONG)
    }
}

#[async_trait]
impl Probe for UdpProbe {
    async fn check(&self, peer: &NodeId) -> bool {
        let Some(addr) = self.addrs.get(peer) else {
            return false;
        };
        match self.ping(addr).await {
            Ok(alive) => alive,
            Err(e) => {
                tracing::debug!(peer = %peer, error = %e, "udp probe failed");
                false
            }
        }
    }
}

/// UDP responder - answers "ping" with "pong" for peers and client latency checks
pub async fn udp_responder(socket: UdpSocket) -> Result<()> {
    tracing::info!(addr = %socket.local_addr()?, "UDP responder listening");

    let mut buf = [0u8; 64];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, peer)) => {
                if String::from_utf8_lossy(&buf[..len]).trim().as_bytes() == PING {
                    if let Err(e) = socket.send_to(PONG, peer).await {
                        tracing::debug!(peer = %peer, error = %e, "failed to answer ping");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "UDP responder error");
            }
        }
    }
}
