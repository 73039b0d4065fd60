use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use tracing::debug;

/// 256-bit node identifier, rendered as hex everywhere it is visible.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId([u8; 32]);

impl NodeId {
    /// Derives a fresh id from the bind address plus a random nonce, so two
    /// nodes started on the same `host:port` at different times still get
    /// distinct ids.
    pub fn derive(host: &str, port: u16) -> Self {
        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);

        let mut hasher = Sha256::new();
        hasher.update(host.as_bytes());
        hasher.update(port.to_be_bytes());
        hasher.update(nonce);
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self)
    }
}

impl FromStr for NodeId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

// Ids cross the wire as hex strings inside JSON messages.
impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Who this node is and where it can be reached. Built once at `start`,
/// immutable afterwards.
#[derive(Clone, Debug)]
pub struct NodeIdentity {
    pub id: NodeId,
    pub host: String,
    pub port: u16,
    /// Best-effort external address; `None` when resolution failed or was
    /// disabled.
    pub public_ip: Option<IpAddr>,
    /// Non-loopback addresses of the local interfaces.
    pub local_ips: Vec<IpAddr>,
}

impl NodeIdentity {
    /// Assembles the identity for a node binding to `host:port`.
    ///
    /// Public-IP resolution degrades gracefully: on timeout or a garbled
    /// reply the field stays `None` and startup continues.
    pub async fn create(host: &str, port: u16, public_ip_timeout: Option<Duration>) -> Self {
        let public_ip = match public_ip_timeout {
            Some(bound) => resolve_public_ip(bound).await,
            None => None,
        };

        Self {
            id: NodeId::derive(host, port),
            host: host.to_string(),
            port,
            public_ip,
            local_ips: local_interface_ips(),
        }
    }
}

/// Asks an external echo service for our public address.
async fn resolve_public_ip(bound: Duration) -> Option<IpAddr> {
    let client = reqwest::Client::builder().timeout(bound).build().ok()?;

    let body = match client.get("https://api.ipify.org").send().await {
        Ok(resp) => resp.text().await.ok()?,
        Err(err) => {
            debug!("public ip lookup failed: {err}");
            return None;
        }
    };

    match body.trim().parse::<IpAddr>() {
        Ok(ip) => Some(ip),
        Err(_) => {
            debug!("public ip lookup returned a non-address reply");
            None
        }
    }
}

/// Discovers local interface addresses by connecting unbound UDP sockets to
/// well-known resolvers and reading back the chosen source address. No
/// packets are sent; `connect` on a datagram socket only fixes the route.
pub fn local_interface_ips() -> Vec<IpAddr> {
    let probe_targets = ["8.8.8.8:53", "1.1.1.1:53", "9.9.9.9:53"];
    let mut ips = Vec::new();

    for target in probe_targets {
        let Ok(socket) = std::net::UdpSocket::bind("0.0.0.0:0") else {
            continue;
        };
        if socket.connect(target).is_err() {
            continue;
        }
        if let Ok(local) = socket.local_addr() {
            let ip = local.ip();
            if !ip.is_loopback() && !ip.is_unspecified() && !ips.contains(&ip) {
                ips.push(ip);
            }
        }
    }

    ips
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_per_derivation() {
        let a = NodeId::derive("127.0.0.1", 5000);
        let b = NodeId::derive("127.0.0.1", 5000);
        assert_ne!(a, b, "random nonce must separate identical bind addrs");
    }

    #[test]
    fn id_hex_round_trip() {
        let id = NodeId::derive("10.0.0.1", 9000);
        let parsed: NodeId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert_eq!(id.to_string().len(), 64);
    }

    #[test]
    fn id_rejects_bad_hex() {
        assert!("zz".repeat(32).parse::<NodeId>().is_err());
        assert!("abcd".parse::<NodeId>().is_err());
    }

    #[tokio::test]
    async fn identity_without_public_lookup() {
        let identity = NodeIdentity::create("0.0.0.0", 5000, None).await;
        assert_eq!(identity.port, 5000);
        assert!(identity.public_ip.is_none());
    }
}
