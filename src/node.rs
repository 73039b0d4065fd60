use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::identity::NodeIdentity;
use crate::message::Message;
use crate::routing::{PeerRecord, RoutingTable};
use crate::rpc;
use crate::service;
use crate::store::DataStore;

/// Tunables for timeouts and background maintenance. Defaults match the
/// observed protocol: 5 s request bound, 5 s health sweep, three failed
/// probes before a peer is pruned.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Bound on any outbound request round-trip.
    pub request_timeout: Duration,
    /// Tighter bound used for liveness probes.
    pub probe_timeout: Duration,
    /// Period of the health monitor sweep.
    pub health_interval: Duration,
    /// Consecutive probe failures before a peer is removed.
    pub failure_threshold: u32,
    /// Whether to resolve the public IP at start. Off keeps startup fully
    /// offline, e.g. in tests.
    pub resolve_public_ip: bool,
    /// Bound on the public-IP lookup.
    pub public_ip_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(2),
            health_interval: Duration::from_secs(5),
            failure_threshold: 3,
            resolve_public_ip: true,
            public_ip_timeout: Duration::from_secs(3),
        }
    }
}

/// State shared between the caller-facing API and the background tasks.
/// The store and routing table are the only mutable pieces; both sit behind
/// mutexes that are never held across an await on the network.
pub(crate) struct Shared {
    pub identity: NodeIdentity,
    pub config: NodeConfig,
    pub store: Mutex<DataStore>,
    pub routing: Mutex<RoutingTable>,
    /// In-flight replication and sync pushes. Tracked so `stop` can cancel
    /// and drain them; a detached push could otherwise outlive the node.
    pub tasks: Mutex<JoinSet<()>>,
}

impl Shared {
    /// Launches a background push, reaping any already-finished ones so the
    /// set does not grow with every write.
    pub(crate) async fn spawn_push(
        &self,
        fut: impl std::future::Future<Output = ()> + Send + 'static,
    ) {
        let mut tasks = self.tasks.lock().await;
        while tasks.try_join_next().is_some() {}
        tasks.spawn(fut);
    }

    /// The local node's coordinates as peers should record them.
    pub(crate) fn self_info(&self) -> crate::message::PeerInfo {
        crate::message::PeerInfo {
            id: self.identity.id,
            host: self.identity.host.clone(),
            port: self.identity.port,
        }
    }
}

struct Running {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    local_addr: SocketAddr,
    dispatcher: JoinHandle<()>,
    monitor: JoinHandle<()>,
}

/// One node of the distributed store.
///
/// Lifecycle is `new` → [`start`](Node::start) → `put`/`get`/`bootstrap` →
/// [`stop`](Node::stop). All state is process-memory resident and lost on
/// `stop`.
pub struct Node {
    host: String,
    port: u16,
    config: NodeConfig,
    running: Option<Running>,
}

impl Node {
    pub fn new(host: &str, port: u16) -> Self {
        Self::with_config(host, port, NodeConfig::default())
    }

    pub fn with_config(host: &str, port: u16, config: NodeConfig) -> Self {
        Self {
            host: host.to_string(),
            port,
            config,
            running: None,
        }
    }

    /// Binds the socket, resolves the node's identity and launches the
    /// dispatcher and health monitor. A bind failure is the only fatal
    /// startup error; port 0 binds to an OS-assigned port.
    pub async fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Ok(());
        }

        let socket = UdpSocket::bind((self.host.as_str(), self.port)).await?;
        let local_addr = socket.local_addr()?;
        self.port = local_addr.port();

        let public_ip_timeout = self
            .config
            .resolve_public_ip
            .then_some(self.config.public_ip_timeout);
        let identity = NodeIdentity::create(&self.host, self.port, public_ip_timeout).await;
        info!(id = %identity.id, addr = %local_addr, "node starting");

        let shared = Arc::new(Shared {
            routing: Mutex::new(RoutingTable::new(identity.id)),
            store: Mutex::new(DataStore::new()),
            config: self.config.clone(),
            identity,
            tasks: Mutex::new(JoinSet::new()),
        });

        let (shutdown, shutdown_rx) = watch::channel(false);
        let dispatcher = tokio::spawn(service::dispatcher(
            Arc::clone(&shared),
            Arc::new(socket),
            shutdown_rx.clone(),
        ));
        let monitor = tokio::spawn(service::health_monitor(Arc::clone(&shared), shutdown_rx));

        self.running = Some(Running {
            shared,
            shutdown,
            local_addr,
            dispatcher,
            monitor,
        });
        Ok(())
    }

    /// Signals both background tasks, cancels in-flight pushes and waits
    /// for everything to finish. After `stop` returns no handler touches
    /// the store or routing table, no datagram is emitted, and the socket
    /// is closed.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        let _ = running.shutdown.send(true);
        let _ = running.dispatcher.await;
        let _ = running.monitor.await;

        // The dispatcher is gone, so nothing spawns into the set anymore.
        let mut tasks = running.shared.tasks.lock().await;
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}

        info!(addr = %running.local_addr, "node stopped");
    }

    /// Joins an existing network through the node at `addr` (`host:port`).
    ///
    /// On success the reply's peer list is merged into the routing table
    /// and the local data set is pushed to the bootstrap peer; the peer
    /// symmetrically pushes its data back, so both sides converge shortly
    /// after. Failure leaves the node fully usable standalone.
    pub async fn bootstrap(&self, addr: &str) -> Result<()> {
        let shared = self.shared()?;
        let target = rpc::resolve(addr).await?;

        let join = Message::Join {
            id: shared.identity.id,
            host: shared.identity.host.clone(),
            port: shared.identity.port,
        };
        let reply = rpc::request(target, &join, shared.config.request_timeout)
            .await
            .map_err(|err| Error::Bootstrap(err.to_string()))?;

        let peers = match reply {
            Message::JoinAck { peers } => peers,
            other => {
                return Err(Error::Bootstrap(format!(
                    "unexpected reply to join: {other:?}"
                )))
            }
        };

        let mut merged = Vec::new();
        {
            let mut routing = shared.routing.lock().await;
            for peer in &peers {
                // A peer that bound to 0.0.0.0 lists that as its host; the
                // address we just contacted is where it really lives.
                let host = match peer.host.parse::<IpAddr>() {
                    Ok(ip) if ip.is_unspecified() => target.ip().to_string(),
                    _ => peer.host.clone(),
                };
                routing.upsert_peer(peer.id, &host, peer.port);
                merged.push((peer.id, host, peer.port));
            }
        }
        info!(%addr, peers = peers.len(), "joined network");

        // Announce ourselves to the peers we just learned about, so their
        // replication pushes include us without waiting for another round.
        for (id, host, port) in merged {
            if id == shared.identity.id {
                continue;
            }
            let peer_addr = format!("{host}:{port}");
            if let Ok(peer_target) = rpc::resolve(&peer_addr).await {
                if peer_target == target {
                    continue;
                }
                if let Err(err) =
                    rpc::request(peer_target, &join, shared.config.request_timeout).await
                {
                    debug!(peer = %id, "join announcement failed: {err}");
                }
            }
        }

        // Data-sync leg: hand our existing entries to the bootstrap peer.
        let snapshot = shared.store.lock().await.snapshot();
        if !snapshot.is_empty() {
            let push = Message::SyncPush {
                entries: snapshot,
                from: Some(shared.self_info()),
            };
            if let Err(err) = rpc::request(target, &push, shared.config.request_timeout).await {
                debug!(%addr, "data sync to bootstrap peer failed: {err}");
            }
        }

        Ok(())
    }

    /// Stores a key/value pair locally and pushes it to every known peer in
    /// the background. Returns as soon as the local write is durable in
    /// memory; propagation is eventually consistent.
    pub async fn put(&self, key: &str, value: &str) -> Result<()> {
        let shared = self.shared()?;
        shared
            .store
            .lock()
            .await
            .put(key.to_string(), value.to_string());
        shared
            .spawn_push(replicate(
                Arc::clone(shared),
                HashMap::from([(key.to_string(), value.to_string())]),
            ))
            .await;
        Ok(())
    }

    /// Looks a key up in the local store only. A missing key is `None`,
    /// never an error.
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let shared = self.shared()?;
        Ok(shared.store.lock().await.get(key))
    }

    /// Hex form of the node id. `None` before `start`.
    pub fn id(&self) -> Option<String> {
        self.running
            .as_ref()
            .map(|running| running.shared.identity.id.to_string())
    }

    /// Best-effort external address resolved at start.
    pub fn public_ip(&self) -> Option<IpAddr> {
        self.running
            .as_ref()
            .and_then(|running| running.shared.identity.public_ip)
    }

    /// Non-loopback local interface addresses.
    pub fn local_ips(&self) -> Vec<IpAddr> {
        self.running
            .as_ref()
            .map(|running| running.shared.identity.local_ips.clone())
            .unwrap_or_default()
    }

    /// The address the socket is actually bound to.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|running| running.local_addr)
    }

    /// Snapshot of the routing table.
    pub async fn routing_table(&self) -> Vec<PeerRecord> {
        match self.shared() {
            Ok(shared) => shared.routing.lock().await.list_peers(),
            Err(_) => Vec::new(),
        }
    }

    /// Snapshot of the stored key/value pairs.
    pub async fn data(&self) -> HashMap<String, String> {
        match self.shared() {
            Ok(shared) => shared.store.lock().await.snapshot(),
            Err(_) => HashMap::new(),
        }
    }

    /// Number of peers currently considered alive.
    pub async fn peers(&self) -> usize {
        match self.shared() {
            Ok(shared) => shared.routing.lock().await.alive_count(),
            Err(_) => 0,
        }
    }

    fn shared(&self) -> Result<&Arc<Shared>> {
        self.running
            .as_ref()
            .map(|running| &running.shared)
            .ok_or(Error::NotRunning)
    }
}

/// Best-effort push of `entries` to every known peer. A peer that is down
/// simply misses the update until a later sync; no retries, no ordering
/// guarantee across peers.
pub(crate) async fn replicate(shared: Arc<Shared>, entries: HashMap<String, String>) {
    let peers = shared.routing.lock().await.list_peers();
    if peers.is_empty() {
        return;
    }

    let push = Message::SyncPush {
        entries,
        from: Some(shared.self_info()),
    };
    for peer in peers {
        let target = match rpc::resolve(&peer.addr()).await {
            Ok(addr) => addr,
            Err(err) => {
                debug!(peer = %peer.id, "cannot resolve peer for replication: {err}");
                continue;
            }
        };
        if let Err(err) = rpc::request(target, &push, shared.config.request_timeout).await {
            debug!(peer = %peer.id, "replication push failed: {err}");
        }
    }
}
