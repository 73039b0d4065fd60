use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::message::{Message, PeerInfo, MAX_DATAGRAM};
use crate::node::{replicate, Shared};
use crate::rpc;

/// Receive loop bound to the node's socket. Decodes each datagram, refreshes
/// the sender's routing entry, dispatches to a handler and sends back at
/// most one reply. Malformed or unexpected datagrams are dropped without a
/// reply so garbled traffic cannot be amplified.
pub(crate) async fn dispatcher(
    shared: Arc<Shared>,
    socket: Arc<UdpSocket>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (len, src) = tokio::select! {
            received = socket.recv_from(&mut buf) => match received {
                Ok(pair) => pair,
                Err(err) => {
                    warn!("receive error: {err}");
                    continue;
                }
            },
            _ = shutdown.changed() => break,
        };

        let msg = match Message::decode(&buf[..len]) {
            Ok(msg) => msg,
            Err(err) => {
                debug!(%src, "dropping malformed datagram: {err}");
                continue;
            }
        };

        if let Some(reply) = handle(&shared, msg, src).await {
            match reply.encode() {
                Ok(bytes) => {
                    if let Err(err) = socket.send_to(&bytes, src).await {
                        debug!(%src, "failed to send reply: {err}");
                    }
                }
                Err(err) => warn!("failed to encode reply: {err}"),
            }
        }
    }
}

/// Routes one decoded request to its handler. Returns the single reply to
/// send, or `None` for messages that get no reply (response kinds arriving
/// unsolicited are treated like unknown types and dropped). Requests that
/// identify their sender (`join`, `sync_push`) refresh the sender's routing
/// entry; the rest carry no identity to refresh by, since every request
/// arrives from a fresh ephemeral socket.
async fn handle(shared: &Arc<Shared>, msg: Message, src: SocketAddr) -> Option<Message> {
    match msg {
        Message::Store { key, value } => {
            debug!(%src, key, "store request");
            shared
                .store
                .lock()
                .await
                .put(key.clone(), value.clone());
            // A write accepted over the wire propagates exactly like a
            // local put, so any node can be the entry point for a client.
            shared
                .spawn_push(replicate(
                    Arc::clone(shared),
                    std::collections::HashMap::from([(key, value)]),
                ))
                .await;
            Some(Message::StoreAck)
        }

        Message::Get { key } => {
            let value = shared.store.lock().await.get(&key);
            Some(Message::GetResponse { value })
        }

        Message::Join { id, host, port } => {
            // A node bound to 0.0.0.0 reports that as its host; the source
            // address is the one it is actually reachable at.
            let host = reachable_host(&host, &src);
            info!(peer = %id, %host, port, "join request");

            let peers = {
                let mut routing = shared.routing.lock().await;
                let mut peers: Vec<PeerInfo> = routing
                    .list_peers()
                    .iter()
                    .filter(|record| record.id != id)
                    .map(PeerInfo::from)
                    .collect();
                // Listing ourselves is how the joiner learns our id.
                peers.push(PeerInfo {
                    id: shared.identity.id,
                    host: shared.identity.host.clone(),
                    port: shared.identity.port,
                });
                routing.upsert_peer(id, &host, port);
                peers
            };

            // Push our data set to the joiner once the ack is on its way.
            let snapshot = shared.store.lock().await.snapshot();
            if !snapshot.is_empty() {
                let task_shared = Arc::clone(shared);
                let target = format!("{host}:{port}");
                shared
                    .spawn_push(async move {
                        let push = Message::SyncPush {
                            entries: snapshot,
                            from: Some(task_shared.self_info()),
                        };
                        match rpc::resolve(&target).await {
                            Ok(addr) => {
                                if let Err(err) =
                                    rpc::request(addr, &push, task_shared.config.request_timeout)
                                        .await
                                {
                                    debug!(%target, "join-time data sync failed: {err}");
                                }
                            }
                            Err(err) => debug!(%target, "cannot sync to joiner: {err}"),
                        }
                    })
                    .await;
            }

            Some(Message::JoinAck { peers })
        }

        Message::SyncPush { entries, from } => {
            debug!(%src, count = entries.len(), "sync push");
            if let Some(sender) = from {
                let host = reachable_host(&sender.host, &src);
                shared
                    .routing
                    .lock()
                    .await
                    .upsert_peer(sender.id, &host, sender.port);
            }
            shared.store.lock().await.merge(entries);
            Some(Message::SyncAck)
        }

        Message::Ping => Some(Message::Pong),

        // Response kinds are never valid requests.
        Message::StoreAck
        | Message::GetResponse { .. }
        | Message::JoinAck { .. }
        | Message::SyncAck
        | Message::Pong => None,
    }
}

fn reachable_host(reported: &str, src: &SocketAddr) -> String {
    match reported.parse::<std::net::IpAddr>() {
        Ok(ip) if ip.is_unspecified() => src.ip().to_string(),
        Ok(_) => reported.to_string(),
        // Hostnames pass through untouched.
        Err(_) => reported.to_string(),
    }
}

/// Periodic liveness sweep. Pings every known peer with a short bound and
/// prunes peers whose consecutive failures reach the configured threshold,
/// which keeps the routing table honest in long-running networks.
pub(crate) async fn health_monitor(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(shared.config.health_interval);
    // The first tick fires immediately; skip it so a freshly started node
    // does not probe before anyone had a chance to join.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        // Probe concurrently so a sweep over dead peers stays within one
        // probe timeout instead of stacking them.
        let peers = shared.routing.lock().await.list_peers();
        let mut probes = tokio::task::JoinSet::new();
        for peer in peers {
            let probe_timeout = shared.config.probe_timeout;
            probes.spawn(async move {
                let responded = match rpc::resolve(&peer.addr()).await {
                    Ok(addr) => matches!(
                        rpc::request(addr, &Message::Ping, probe_timeout).await,
                        Ok(Message::Pong)
                    ),
                    Err(_) => false,
                };
                (peer.id, responded)
            });
        }
        while let Some(joined) = probes.join_next().await {
            let Ok((id, responded)) = joined else {
                continue;
            };
            if responded {
                shared.routing.lock().await.mark_alive(&id);
            } else {
                let failures = shared.routing.lock().await.record_failure(&id);
                debug!(peer = %id, failures, "liveness probe failed");
            }
        }

        let removed = shared
            .routing
            .lock()
            .await
            .mark_dead_if_stale(shared.config.failure_threshold);
        for record in removed {
            info!(peer = %record.id, addr = %record.addr(), "pruned unreachable peer");
        }
    }
}
