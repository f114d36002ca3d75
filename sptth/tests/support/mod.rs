use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rustls::pki_types::{CertificateDer, ServerName};
use sptth::tls::{TrustError, TrustInstaller};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

pub const DNS_TYPE_A: u16 = 1;
#[allow(dead_code)]
pub const DNS_TYPE_AAAA: u16 = 28;

pub fn build_query(id: u16, host: &str, qtype: u16) -> Vec<u8> {
    let mut q = Vec::new();
    q.extend_from_slice(&id.to_be_bytes());
    q.extend_from_slice(&0x0100u16.to_be_bytes()); // RD
    q.extend_from_slice(&1u16.to_be_bytes());
    q.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
    for label in host.split('.') {
        q.push(label.len() as u8);
        q.extend_from_slice(label.as_bytes());
    }
    q.push(0);
    q.extend_from_slice(&qtype.to_be_bytes());
    q.extend_from_slice(&1u16.to_be_bytes()); // IN
    q
}

pub fn rcode(resp: &[u8]) -> u8 {
    resp[3] & 0x0F
}

pub fn ancount(resp: &[u8]) -> u16 {
    u16::from_be_bytes([resp[6], resp[7]])
}

/// Echo the query back as a NOERROR response with `marker` appended, so
/// tests can tell which upstream answered.
#[allow(dead_code)]
pub fn marked_reply(query: &[u8], marker: &[u8]) -> Vec<u8> {
    let mut reply = query.to_vec();
    reply[2] |= 0x80;
    reply[3] |= 0x80;
    reply.extend_from_slice(marker);
    reply
}

#[allow(dead_code)]
pub async fn dns_exchange(server: SocketAddr, query: &[u8]) -> Option<Vec<u8>> {
    let client = UdpSocket::bind("127.0.0.1:0").await.ok()?;
    client.send_to(query, server).await.ok()?;
    let mut buf = [0u8; 4096];
    let (len, _) = tokio::time::timeout(std::time::Duration::from_secs(5), client.recv_from(&mut buf))
        .await
        .ok()?
        .ok()?;
    Some(buf[..len].to_vec())
}

/// Installer that records every call instead of touching the OS
#[derive(Default)]
pub struct RecordingInstaller {
    pub installed: Mutex<Vec<PathBuf>>,
    pub fail: bool,
}

impl RecordingInstaller {
    #[allow(dead_code)]
    pub fn failing() -> Self {
        Self {
            installed: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn calls(&self) -> Vec<PathBuf> {
        self.installed.lock().unwrap().clone()
    }
}

impl TrustInstaller for RecordingInstaller {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn install(&self, cert_path: &Path) -> Result<(), TrustError> {
        self.installed.lock().unwrap().push(cert_path.to_path_buf());
        if self.fail {
            return Err(TrustError::Unsupported("test"));
        }
        Ok(())
    }
}

pub struct TestDirs {
    pub _temp: tempfile::TempDir,
    pub ca_dir: PathBuf,
    pub cert_dir: PathBuf,
}

pub fn test_dirs() -> TestDirs {
    let temp = tempfile::TempDir::new().unwrap();
    let ca_dir = temp.path().join("ca");
    let cert_dir = temp.path().join("certs");
    TestDirs {
        _temp: temp,
        ca_dir,
        cert_dir,
    }
}

/// Config with DNS on an ephemeral port and one proxied domain per `routes` entry.
pub fn config_toml(dirs: &TestDirs, dns_upstreams: &[SocketAddr], routes: &[(&str, SocketAddr)]) -> String {
    let upstreams: Vec<String> = dns_upstreams.iter().map(|u| format!("\"{u}\"")).collect();
    let mut doc = format!(
        r#"
[dns]
listen = "127.0.0.1:0"
upstream = [{}]
ttl_seconds = 30
upstream_timeout_ms = 300

[[record]]
domain = "jxck.io"
A = ["127.0.0.1"]

[tls]
enabled = true
ca_common_name = "sptth test CA"
ca_dir = "{}"
cert_dir = "{}"
valid_days = 90
renew_before_days = 30
"#,
        upstreams.join(", "),
        dirs.ca_dir.display(),
        dirs.cert_dir.display(),
    );
    for (domain, upstream) in routes {
        doc.push_str(&format!(
            r#"
[[record]]
domain = "{domain}"
A = ["127.0.0.1"]

[[proxy]]
domain = "{domain}"
listen = "127.0.0.1:0"
upstream = "{upstream}"
"#
        ));
    }
    doc
}

/// Plaintext HTTP upstream answering every request with `body`; each
/// request head it receives is sent on the returned channel.
#[allow(dead_code)]
pub async fn spawn_http_upstream(body: &'static str) -> (SocketAddr, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let head = read_head(&mut stream).await;
                let _ = tx.send(head);
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    (addr, rx)
}

/// Upstream that answers every request with the given raw bytes, unmodified.
#[allow(dead_code)]
pub async fn spawn_raw_upstream(response: Vec<u8>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let response = Arc::new(response);
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let response = Arc::clone(&response);
            tokio::spawn(async move {
                read_head(&mut stream).await;
                let _ = stream.write_all(&response).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    addr
}

/// Upstream that streams a `len`-byte body of zeros as fast as the proxy takes it.
#[allow(dead_code)]
pub async fn spawn_bulk_upstream(len: usize) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                read_head(&mut stream).await;
                let head = format!("HTTP/1.1 200 OK\r\ncontent-length: {len}\r\n\r\n");
                if stream.write_all(head.as_bytes()).await.is_err() {
                    return;
                }
                let chunk = vec![0u8; 64 * 1024];
                let mut sent = 0;
                while sent < len {
                    let n = chunk.len().min(len - sent);
                    if stream.write_all(&chunk[..n]).await.is_err() {
                        return;
                    }
                    sent += n;
                }
            });
        }
    });
    addr
}

async fn read_head(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

#[allow(dead_code)]
pub fn tls_connector(ca_cert_pem: &Path) -> TlsConnector {
    let pem = std::fs::read(ca_cert_pem).unwrap();
    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
        let cert: CertificateDer<'static> = cert.unwrap();
        roots.add(cert).unwrap();
    }
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

/// Complete a TLS handshake with `sni` and hand back the open stream.
#[allow(dead_code)]
pub async fn tls_connect(
    connector: &TlsConnector,
    addr: SocketAddr,
    sni: &str,
) -> std::io::Result<TlsStream<TcpStream>> {
    let tcp = TcpStream::connect(addr).await?;
    let server_name = ServerName::try_from(sni.to_string())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    connector.connect(server_name, tcp).await
}

/// Send one raw HTTP/1.1 request over TLS and return the full response text.
#[allow(dead_code)]
pub async fn https_request(
    connector: &TlsConnector,
    addr: SocketAddr,
    sni: &str,
    request: &str,
) -> std::io::Result<String> {
    let mut tls = tls_connect(connector, addr, sni).await?;
    tls.write_all(request.as_bytes()).await?;

    let mut buf = Vec::new();
    // Peers may close without close_notify; whatever arrived is the response.
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), tls.read_to_end(&mut buf)).await;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
