//! Startup orchestration.
//!
//! Order matters: certificates exist and the root is trusted before any
//! socket is bound, and every listener is bound before any of them serves.
//! A failure at any step returns before traffic is accepted.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::{AppConfig, TlsConfig};
use crate::dns::{DnsServer, OverrideTable};
use crate::error::{Error, Result};
use crate::proxy::{ProxyServer, RouteTable};
use crate::tls::{
    CaOrigin, CaStore, CertStore, LocalCA, RenewalPolicy, TrustInstaller, run_renewal,
    server_config,
};

/// Listeners that are bound and serving
pub struct Running {
    dns_addr: SocketAddr,
    proxy_addr: Option<SocketAddr>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Running {
    pub fn dns_addr(&self) -> SocketAddr {
        self.dns_addr
    }

    pub fn proxy_addr(&self) -> Option<SocketAddr> {
        self.proxy_addr
    }

    /// Stop accepting, let open proxy connections drain, and wait for every task.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "task ended abnormally during shutdown");
            }
        }
    }
}

struct Certificates {
    ca: Arc<LocalCA>,
    store: Arc<CertStore>,
}

/// Bring up certificates, DNS and the proxy, then start serving.
pub async fn start(config: &AppConfig, installer: Arc<dyn TrustInstaller>) -> Result<Running> {
    let certificates = match &config.tls {
        Some(tls) => Some(prepare_certificates(config, tls, installer).await?),
        None => None,
    };

    let overrides = OverrideTable::from_config(&config.records);
    let dns = DnsServer::bind(&config.dns, overrides)
        .await
        .map_err(|source| Error::Bind {
            what: "dns",
            addr: config.dns.listen,
            source,
        })?;
    let dns_addr = dns.local_addr()?;

    let proxy = match (config.proxy_listen(), &certificates) {
        (Some(listen), Some(certs)) => {
            let tls = server_config(Arc::clone(&certs.store))?;
            let routes = RouteTable::from_config(&config.proxies);
            let server = ProxyServer::bind(listen, routes, tls, config.limits.clone())
                .await
                .map_err(|source| Error::Bind {
                    what: "proxy",
                    addr: listen,
                    source,
                })?;
            Some(server)
        }
        _ => None,
    };
    let proxy_addr = proxy.as_ref().map(ProxyServer::local_addr).transpose()?;

    log_summary(config, dns_addr, proxy_addr);

    let (shutdown, shutdown_rx) = watch::channel(false);
    let mut tasks = vec![tokio::spawn(dns.run(shutdown_rx.clone()))];
    if let Some(proxy) = proxy {
        tasks.push(tokio::spawn(proxy.run(shutdown_rx.clone())));
    }
    if let (Some(certs), Some(interval)) = (
        certificates,
        config.tls.as_ref().and_then(|t| t.renew_check_interval),
    ) && !certs.store.domains().is_empty()
    {
        tracing::debug!(interval_secs = interval.as_secs(), "certificate renewal scheduled");
        tasks.push(tokio::spawn(run_renewal(
            certs.store,
            certs.ca,
            interval,
            shutdown_rx,
        )));
    }

    Ok(Running {
        dns_addr,
        proxy_addr,
        shutdown,
        tasks,
    })
}

/// Start everything and serve until Ctrl-C or SIGTERM.
pub async fn run(config: &AppConfig, installer: Arc<dyn TrustInstaller>) -> Result<()> {
    let running = start(config, installer).await?;

    shutdown_signal().await?;
    tracing::info!("shutting down");
    running.shutdown().await;
    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = terminate.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

async fn prepare_certificates(
    config: &AppConfig,
    tls: &TlsConfig,
    installer: Arc<dyn TrustInstaller>,
) -> Result<Certificates> {
    let ca_store = CaStore::new(&tls.ca_dir);
    let (ca, origin) = ca_store.load_or_generate(&tls.ca_common_name)?;
    match origin {
        CaOrigin::Loaded => {
            tracing::info!(
                cert = %ca_store.cert_path().display(),
                "loaded existing root CA, skipping trust store install"
            );
        }
        CaOrigin::Generated => {
            tracing::info!(
                common_name = %ca.common_name(),
                cert = %ca_store.cert_path().display(),
                "generated root CA"
            );
            let name = installer.name();
            let cert_path = ca_store.cert_path();
            let installed = match tokio::task::spawn_blocking(move || installer.install(&cert_path))
                .await
            {
                Ok(result) => result.map_err(Error::from),
                Err(e) => Err(Error::Io(std::io::Error::other(e))),
            };
            if let Err(e) = installed {
                // Next start must regenerate and retry the install.
                let _ = std::fs::remove_file(ca_store.cert_path());
                let _ = std::fs::remove_file(ca_store.key_path());
                return Err(e);
            }
            tracing::info!(installer = name, "root CA installed into trust store");
        }
    }

    let domains = config.proxies.iter().map(|p| p.domain.clone()).collect();
    let store = Arc::new(CertStore::new(
        &tls.cert_dir,
        RenewalPolicy::from_config(tls),
        domains,
    ));
    let ca = Arc::new(ca);

    let blocking_store = Arc::clone(&store);
    let blocking_ca = Arc::clone(&ca);
    tokio::task::spawn_blocking(move || blocking_store.ensure_all(&blocking_ca))
        .await
        .map_err(std::io::Error::other)??;

    Ok(Certificates { ca, store })
}

fn log_summary(config: &AppConfig, dns_addr: SocketAddr, proxy_addr: Option<SocketAddr>) {
    let upstreams: Vec<String> = config.dns.upstreams.iter().map(ToString::to_string).collect();
    let overrides: Vec<&str> = config.records.iter().map(|r| r.domain.as_str()).collect();
    tracing::info!(
        listen = %dns_addr,
        upstreams = %upstreams.join(", "),
        overrides = %overrides.join(", "),
        "dns server ready"
    );

    if let Some(addr) = proxy_addr {
        for route in &config.proxies {
            tracing::info!(
                listen = %addr,
                domain = %route.domain,
                upstream = %route.upstream,
                "proxy route ready"
            );
        }
    }
}
