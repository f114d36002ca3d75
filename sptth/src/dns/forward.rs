use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::Instant;

use super::{MAX_UDP_PAYLOAD, is_response, transaction_id};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("query packet is too short to carry a transaction id")]
    MalformedQuery,

    #[error("all {attempted} upstream dns servers failed")]
    AllUpstreamsFailed { attempted: usize },
}

/// Relays raw queries to upstream resolvers in order.
///
/// Every attempt uses its own ephemeral socket and a fixed deadline. A reply
/// is only accepted when it comes from exactly the upstream socket address
/// that was contacted and carries the outstanding transaction ID; anything
/// else is discarded and the wait continues.
#[derive(Debug, Clone)]
pub struct Forwarder {
    upstreams: Vec<SocketAddr>,
    attempt_timeout: Duration,
}

impl Forwarder {
    pub fn new(upstreams: Vec<SocketAddr>, attempt_timeout: Duration) -> Self {
        Self {
            upstreams,
            attempt_timeout,
        }
    }

    /// Forward `packet` and return the first validated upstream reply, unmodified.
    pub async fn forward(&self, packet: &[u8]) -> Result<Vec<u8>, ResolveError> {
        let id = transaction_id(packet).ok_or(ResolveError::MalformedQuery)?;

        for upstream in &self.upstreams {
            match self.attempt(*upstream, packet, id).await {
                Ok(Some(reply)) => return Ok(reply),
                Ok(None) => {
                    tracing::warn!(id, upstream = %upstream, "upstream dns timed out");
                }
                Err(e) => {
                    tracing::warn!(id, upstream = %upstream, error = %e, "upstream dns attempt failed");
                }
            }
        }

        Err(ResolveError::AllUpstreamsFailed {
            attempted: self.upstreams.len(),
        })
    }

    /// One attempt: `Ok(None)` means the deadline passed without a valid reply.
    async fn attempt(
        &self,
        upstream: SocketAddr,
        packet: &[u8],
        id: u16,
    ) -> std::io::Result<Option<Vec<u8>>> {
        let socket = UdpSocket::bind(ephemeral_bind_addr(upstream)).await?;
        socket.send_to(packet, upstream).await?;
        tracing::debug!(id, upstream = %upstream, "forwarded dns query");

        let deadline = Instant::now() + self.attempt_timeout;
        let mut buf = vec![0u8; MAX_UDP_PAYLOAD];
        loop {
            let received = tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await;
            let (len, from) = match received {
                Err(_) => return Ok(None),
                Ok(result) => result?,
            };

            let reply = &buf[..len];
            if is_valid_reply(reply, from, upstream, id) {
                return Ok(Some(reply.to_vec()));
            }
            tracing::debug!(
                id,
                from = %from,
                expected = %upstream,
                "discarded unexpected dns packet"
            );
        }
    }
}

fn ephemeral_bind_addr(upstream: SocketAddr) -> SocketAddr {
    let ip = match upstream.ip() {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    SocketAddr::new(ip, 0)
}

/// Source IP and port must both match, as must the transaction ID.
fn is_valid_reply(reply: &[u8], from: SocketAddr, expected: SocketAddr, id: u16) -> bool {
    from == expected && transaction_id(reply) == Some(id) && is_response(reply)
}
