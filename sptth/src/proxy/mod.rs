//! TLS-terminating reverse proxy.
//!
//! Every accepted connection is handshaken with the SNI-selected leaf,
//! served as HTTP/1.1 by hyper, and each request is forwarded to the
//! plaintext upstream configured for its domain.

mod body;
mod headers;
mod io;
mod routes;

pub use body::{BodyIdleTimeout, BoxError, IdleTimeout, ProxyBody, bounded, full};
pub use io::WriteTimeout;
pub use routes::{RouteDecision, RouteTable};

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http::header::{self, HeaderValue};
use http::{Request, Response, StatusCode, Uri, Version};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use rustls::ServerConfig;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio_rustls::TlsAcceptor;

use crate::config::LimitsConfig;

/// How long `run` waits for open connections to finish after shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Bound TLS listener. Nothing is accepted until [`ProxyServer::run`].
pub struct ProxyServer {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    state: Arc<ProxyState>,
    connections: Arc<Semaphore>,
}

struct ProxyState {
    routes: RouteTable,
    client: Client<HttpConnector, ProxyBody>,
    limits: LimitsConfig,
}

impl ProxyServer {
    pub async fn bind(
        listen: SocketAddr,
        routes: RouteTable,
        tls: Arc<ServerConfig>,
        limits: LimitsConfig,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(listen).await?;

        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(limits.upstream_connect_timeout));
        connector.set_nodelay(true);
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .pool_timer(TokioTimer::new())
            .http1_max_buf_size(limits.max_header_bytes)
            .build(connector);

        Ok(Self {
            listener,
            acceptor: TlsAcceptor::from(tls),
            connections: Arc::new(Semaphore::new(limits.max_connections)),
            state: Arc::new(ProxyState {
                routes,
                client,
                limits,
            }),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` flips to `true`, then let open
    /// connections finish their current exchange.
    ///
    /// Connections beyond `max_connections` are accepted and closed at once.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let (tcp, peer) = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(error = %e, "proxy accept failed");
                        continue;
                    }
                },
            };

            let Ok(permit) = Arc::clone(&self.connections).try_acquire_owned() else {
                tracing::warn!(peer = %peer, "connection rejected: too many open connections");
                drop(tcp);
                continue;
            };

            tokio::spawn(serve_connection(
                tcp,
                peer,
                self.acceptor.clone(),
                Arc::clone(&self.state),
                shutdown.clone(),
                permit,
            ));
        }

        tracing::debug!("proxy stopped accepting, draining connections");
        let all = u32::try_from(self.state.limits.max_connections).unwrap_or(u32::MAX);
        if tokio::time::timeout(SHUTDOWN_GRACE, self.connections.acquire_many(all))
            .await
            .is_err()
        {
            tracing::warn!("proxy connections still open after shutdown grace period");
        }
    }
}

async fn serve_connection(
    tcp: TcpStream,
    peer: SocketAddr,
    acceptor: TlsAcceptor,
    state: Arc<ProxyState>,
    mut shutdown: watch::Receiver<bool>,
    _permit: OwnedSemaphorePermit,
) {
    let limits = &state.limits;
    let tls = match tokio::time::timeout(limits.handshake_timeout, acceptor.accept(tcp)).await {
        Ok(Ok(tls)) => tls,
        Ok(Err(e)) => {
            tracing::debug!(peer = %peer, error = %e, "tls handshake failed");
            return;
        }
        Err(_) => {
            tracing::debug!(peer = %peer, "tls handshake timed out");
            return;
        }
    };
    let sni: Option<Arc<str>> = tls.get_ref().1.server_name().map(Arc::from);

    let service_state = Arc::clone(&state);
    let service = service_fn(move |req| {
        let state = Arc::clone(&service_state);
        let sni = sni.clone();
        async move { Ok::<_, Infallible>(state.handle(req, sni.as_deref(), peer).await) }
    });

    // hyper stops polling the response body while the client is not reading,
    // so stalled writes are bounded on the stream itself.
    let stream = WriteTimeout::new(tls, limits.body_idle_timeout);
    let conn = http1::Builder::new()
        .timer(TokioTimer::new())
        .header_read_timeout(limits.header_read_timeout)
        .max_buf_size(limits.max_header_bytes)
        .serve_connection(TokioIo::new(stream), service);
    let mut conn = std::pin::pin!(conn);

    let mut draining = false;
    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    tracing::debug!(peer = %peer, error = %e, "connection closed with error");
                }
                break;
            }
            _ = shutdown_requested(&mut shutdown), if !draining => {
                draining = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    }
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl ProxyState {
    async fn handle(
        &self,
        req: Request<Incoming>,
        sni: Option<&str>,
        peer: SocketAddr,
    ) -> Response<ProxyBody> {
        let host = request_host(&req);
        let (domain, upstream) = match self.routes.select(sni, host.as_deref()) {
            RouteDecision::Forward { domain, upstream } => (domain, upstream),
            RouteDecision::HostMismatch { sni, host } => {
                tracing::warn!(sni = %sni, host = %host, "host does not match tls server name");
                return error_response(StatusCode::BAD_GATEWAY, "host does not match TLS server name");
            }
            RouteDecision::NoRoute { domain } => {
                tracing::warn!(host = %domain, "no proxy route for host");
                return error_response(StatusCode::BAD_GATEWAY, "no route for host");
            }
            RouteDecision::MissingHost => {
                return error_response(StatusCode::BAD_REQUEST, "missing host");
            }
        };

        let limits = &self.limits;
        if declared_length(req.headers()).is_some_and(|len| len > limits.max_request_body_bytes as u64)
        {
            tracing::warn!(host = %domain, "request body exceeds limit");
            return error_response(StatusCode::PAYLOAD_TOO_LARGE, "request body too large");
        }

        let path = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let uri: Uri = match format!("http://{upstream}{path}").parse() {
            Ok(uri) => uri,
            Err(e) => {
                tracing::warn!(host = %domain, error = %e, "cannot build upstream uri");
                return error_response(StatusCode::BAD_GATEWAY, "bad upstream address");
            }
        };

        let original_host = host.unwrap_or_else(|| domain.clone());
        let (parts, body) = req.into_parts();
        let method = parts.method.clone();
        let mut upstream_req = Request::new(bounded(
            body,
            limits.max_request_body_bytes,
            limits.body_idle_timeout,
        ));
        *upstream_req.method_mut() = parts.method;
        *upstream_req.uri_mut() = uri;
        *upstream_req.version_mut() = Version::HTTP_11;
        *upstream_req.headers_mut() =
            headers::upstream_request_headers(&parts.headers, &upstream, &original_host, peer.ip());

        let response = match tokio::time::timeout(
            limits.upstream_response_timeout,
            self.client.request(upstream_req),
        )
        .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                tracing::warn!(host = %domain, upstream = %upstream, error = %e, "upstream request failed");
                return error_response(StatusCode::BAD_GATEWAY, "upstream unavailable");
            }
            Err(_) => {
                tracing::warn!(host = %domain, upstream = %upstream, "upstream response timed out");
                return error_response(StatusCode::GATEWAY_TIMEOUT, "upstream timed out");
            }
        };

        if declared_length(response.headers())
            .is_some_and(|len| len > limits.max_response_body_bytes as u64)
        {
            tracing::warn!(host = %domain, upstream = %upstream, "upstream response body exceeds limit");
            return error_response(StatusCode::BAD_GATEWAY, "upstream response too large");
        }

        tracing::debug!(
            host = %domain,
            method = %method,
            status = response.status().as_u16(),
            "proxied request"
        );

        let (parts, body) = response.into_parts();
        let mut downstream = Response::new(bounded(
            body,
            limits.max_response_body_bytes,
            limits.body_idle_timeout,
        ));
        *downstream.status_mut() = parts.status;
        *downstream.headers_mut() = headers::downstream_response_headers(&parts.headers);
        downstream
    }
}

/// Domain the request addresses: absolute-form authority first, then `Host`.
fn request_host<B>(req: &Request<B>) -> Option<String> {
    if let Some(authority) = req.uri().authority() {
        return Some(authority.as_str().to_string());
    }
    req.headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn declared_length(headers: &http::HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Locally generated failure; the connection is closed after it is sent.
fn error_response(status: StatusCode, message: &'static str) -> Response<ProxyBody> {
    let mut response = Response::new(full(message));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}
