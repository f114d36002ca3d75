use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::{Semaphore, watch};

use crate::config::DnsConfig;

use super::{Forwarder, MAX_UDP_PAYLOAD, OverrideTable, Resolver};

/// Bound UDP listener plus the resolver that answers it
pub struct DnsServer {
    socket: Arc<UdpSocket>,
    resolver: Arc<Resolver>,
    inflight: Arc<Semaphore>,
}

impl DnsServer {
    /// Bind the listener. Nothing is served until [`DnsServer::run`].
    pub async fn bind(config: &DnsConfig, overrides: OverrideTable) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(config.listen).await?;
        let forwarder = Forwarder::new(config.upstreams.clone(), config.upstream_timeout);
        Ok(Self {
            socket: Arc::new(socket),
            resolver: Arc::new(Resolver::new(overrides, forwarder)),
            inflight: Arc::new(Semaphore::new(config.max_inflight_queries)),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Serve queries until `shutdown` flips to `true`.
    ///
    /// Each query runs in its own task. When `max_inflight_queries` are
    /// already being resolved, new packets are dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut buf = vec![0u8; MAX_UDP_PAYLOAD];
        loop {
            let (len, peer) = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::debug!("dns server shutting down");
                        return;
                    }
                    continue;
                }
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(error = %e, "dns recv failed");
                        continue;
                    }
                },
            };

            let Ok(permit) = Arc::clone(&self.inflight).try_acquire_owned() else {
                tracing::warn!(peer = %peer, "dns query dropped: too many queries in flight");
                continue;
            };

            let packet = buf[..len].to_vec();
            let socket = Arc::clone(&self.socket);
            let resolver = Arc::clone(&self.resolver);
            tokio::spawn(async move {
                let _permit = permit;
                let Some(response) = resolver.handle(&packet).await else {
                    tracing::debug!(peer = %peer, "dropped unparseable dns packet");
                    return;
                };
                if let Err(e) = socket.send_to(&response, peer).await {
                    tracing::warn!(peer = %peer, error = %e, "dns send failed");
                }
            });
        }
    }
}
