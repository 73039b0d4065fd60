use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{lookup_host, UdpSocket};
use tokio::time::timeout;

use crate::error::Error;
use crate::message::{Message, MAX_DATAGRAM};

/// Client-side bound on a request round-trip, matching the CLI contract.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolves a `host:port` string to a socket address.
pub async fn resolve(addr: &str) -> Result<SocketAddr, Error> {
    lookup_host(addr)
        .await
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| Error::InvalidAddress(addr.to_string()))
}

/// Sends one request datagram and waits for exactly one reply.
///
/// Each call uses a fresh ephemeral socket, so replies can never be
/// confused with traffic on the node's main socket. Timeouts surface as
/// [`Error::Timeout`]; no retry is attempted.
pub async fn request(target: SocketAddr, msg: &Message, bound: Duration) -> Result<Message, Error> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.send_to(&msg.encode()?, target).await?;

    let mut buf = vec![0u8; MAX_DATAGRAM];
    let (len, _) = timeout(bound, socket.recv_from(&mut buf))
        .await
        .map_err(|_| Error::Timeout(bound))??;

    Message::decode(&buf[..len])
}

/// [`request`] against a `host:port` string with the default client timeout.
pub async fn request_addr(addr: &str, msg: &Message) -> Result<Message, Error> {
    let target = resolve(addr).await?;
    request(target, msg, REQUEST_TIMEOUT).await
}
