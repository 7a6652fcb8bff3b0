//! SSH-tunneled transport (spec §4.7 "SSH-tunnel transport").
//!
//! Dials an SSH server once at construction, then serves each HTTP request
//! through an on-demand local TCP forward keyed by `(target_host,
//! target_port)`: a loopback listener accepts local connections and relays
//! bytes to a `direct-tcpip` channel opened on the shared session. Requests
//! are rewritten to point at the loopback forward before being handed to a
//! plain HTTP client.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream as StdTcpStream};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use semflow_core::config::SshTransportConfig;
use ssh2::Session;
use tokio::net::TcpListener;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, warn};

use crate::{HttpRequest, HttpResponse, Transport, TransportError};

pub struct SshTransport {
    session: Arc<Mutex<Session>>,
    forwards: AsyncMutex<HashMap<(String, u16), SocketAddr>>,
    http_client: reqwest::Client,
}

impl SshTransport {
    pub fn new(config: &SshTransportConfig) -> Result<Self, TransportError> {
        let tcp = StdTcpStream::connect((config.host.as_str(), config.port))
            .map_err(|e| TransportError::Dial(e.to_string()))?;
        tcp.set_read_timeout(Some(config.timeout)).ok();

        let mut session = Session::new().map_err(|e| TransportError::Dial(e.to_string()))?;
        session.set_tcp_stream(tcp);
        session.handshake().map_err(|e| TransportError::Dial(e.to_string()))?;

        match &config.known_hosts {
            Some(path) => {
                let mut known_hosts = session.known_hosts().map_err(|e| TransportError::Dial(e.to_string()))?;
                known_hosts
                    .read_file(std::path::Path::new(path), ssh2::KnownHostFileKind::OpenSSH)
                    .map_err(|e| TransportError::Dial(e.to_string()))?;
            }
            None => warn!("SSH transport has no known_hosts pinned; accepting host key unverified"),
        }

        if let Some(key_file) = &config.key_file {
            session
                .userauth_pubkey_file(&config.user, None, std::path::Path::new(key_file), None)
                .map_err(|e| TransportError::Dial(e.to_string()))?;
        } else if let Some(password) = &config.password {
            session
                .userauth_password(&config.user, password)
                .map_err(|e| TransportError::Dial(e.to_string()))?;
        } else {
            return Err(TransportError::Dial("SSH transport requires key_file or password".into()));
        }

        if !session.authenticated() {
            return Err(TransportError::Dial("SSH authentication rejected".into()));
        }

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| TransportError::Dial(e.to_string()))?;

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            forwards: AsyncMutex::new(HashMap::new()),
            http_client,
        })
    }

    /// Returns the loopback address of the forward to `(host, port)`, spinning
    /// one up on first use. Forwards are long-lived for the transport's lifetime.
    async fn local_forward_for(&self, host: &str, port: u16) -> Result<SocketAddr, TransportError> {
        let key = (host.to_string(), port);
        if let Some(addr) = self.forwards.lock().await.get(&key) {
            return Ok(*addr);
        }

        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(|e| TransportError::Dial(e.to_string()))?;
        let local_addr = listener.local_addr().map_err(|e| TransportError::Dial(e.to_string()))?;

        let session = Arc::clone(&self.session);
        let target_host = host.to_string();
        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!(error = %e, "ssh forward: accept failed, closing listener");
                        break;
                    }
                };
                let session = Arc::clone(&session);
                let target_host = target_host.clone();
                let std_stream = match stream.into_std() {
                    Ok(s) => s,
                    Err(e) => {
                        error!(error = %e, "ssh forward: could not take ownership of accepted stream");
                        continue;
                    }
                };
                std_stream.set_nonblocking(true).ok();
                tokio::task::spawn_blocking(move || forward_connection(std_stream, session, target_host, port));
            }
        });

        self.forwards.lock().await.insert(key, local_addr);
        Ok(local_addr)
    }
}

fn forward_connection(mut local: StdTcpStream, session: Arc<Mutex<Session>>, target_host: String, target_port: u16) {
    let mut channel = {
        let session = session.lock().unwrap();
        match session.channel_direct_tcpip(&target_host, target_port, None) {
            Ok(channel) => channel,
            Err(e) => {
                error!(error = %e, target_host, target_port, "direct-tcpip channel failed");
                return;
            }
        }
    };

    let mut buf = [0u8; 8192];
    loop {
        let mut made_progress = false;

        match local.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                let result = {
                    let _guard = session.lock().unwrap();
                    channel.write_all(&buf[..n])
                };
                if result.is_err() {
                    break;
                }
                made_progress = true;
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(_) => break,
        }

        let read_result = {
            let _guard = session.lock().unwrap();
            channel.read(&mut buf)
        };
        match read_result {
            Ok(0) => break,
            Ok(n) => {
                if local.write_all(&buf[..n]).is_err() {
                    break;
                }
                made_progress = true;
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(_) => break,
        }

        if channel.eof() {
            break;
        }
        if !made_progress {
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    let _ = channel.close();
}

/// Rewrites `ssh` -> `http` and `ssh+https` -> `https` (spec §4.7), returning
/// the target host/port the tunnel must dial plus the rewritten scheme and
/// the path+query to preserve.
fn rewrite(url: &str) -> Result<(String, u16, String, String), TransportError> {
    let (scheme, rest) = url
        .split_once("://")
        .ok_or_else(|| TransportError::Request(format!("malformed URL: {url}")))?;

    let rewritten_scheme = match scheme {
        "ssh" | "ssh+http" => "http",
        "ssh+https" => "https",
        other => return Err(TransportError::UnsupportedScheme(other.to_string())),
    };

    let (authority, path) = match rest.split_once('/') {
        Some((authority, path)) => (authority, format!("/{path}")),
        None => (rest, "/".to_string()),
    };

    let (host, port) = match authority.split_once(':') {
        Some((host, port)) => {
            let port: u16 = port
                .parse()
                .map_err(|_| TransportError::Request(format!("invalid port in URL: {url}")))?;
            (host.to_string(), port)
        }
        None => (authority.to_string(), if rewritten_scheme == "https" { 443 } else { 80 }),
    };

    Ok((host, port, rewritten_scheme.to_string(), path))
}

#[async_trait]
impl Transport for SshTransport {
    async fn round_trip(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let (target_host, target_port, rewritten_scheme, path) = rewrite(&request.url)?;
        let local_addr = self.local_forward_for(&target_host, target_port).await?;

        let tunneled_url = format!("{rewritten_scheme}://{local_addr}{path}");
        debug!(original = %request.url, tunneled = %tunneled_url, "ssh transport dispatching through local forward");

        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| TransportError::Request(e.to_string()))?;
        let mut builder = self
            .http_client
            .request(method, &tunneled_url)
            .header("host", format!("{target_host}:{target_port}"))
            .body(request.body);
        for (name, value) in &request.headers {
            if name.eq_ignore_ascii_case("host") {
                continue;
            }
            builder = builder.header(name, value);
        }

        let response = builder.send().await.map_err(|e| TransportError::Request(e.to_string()))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.to_string(), v.to_string())))
            .collect();
        let body = response.bytes().await.map_err(|e| TransportError::Request(e.to_string()))?.to_vec();

        Ok(HttpResponse { status, headers, body })
    }

    async fn close(&self) -> Result<(), TransportError> {
        let session = self.session.lock().unwrap();
        session
            .disconnect(None, "transport closing", None)
            .map_err(|e| TransportError::Close(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssh_scheme_rewrites_to_http() {
        let (host, port, scheme, path) = rewrite("ssh://target.internal:8080/api").unwrap();
        assert_eq!(host, "target.internal");
        assert_eq!(port, 8080);
        assert_eq!(scheme, "http");
        assert_eq!(path, "/api");
    }

    #[test]
    fn ssh_plus_https_rewrites_to_https() {
        let (_, _, scheme, _) = rewrite("ssh+https://target.internal:8443/api").unwrap();
        assert_eq!(scheme, "https");
    }

    #[test]
    fn missing_port_defaults_by_scheme() {
        let (_, port, _, _) = rewrite("ssh+https://target.internal/api").unwrap();
        assert_eq!(port, 443);
    }

    #[test]
    fn unsupported_scheme_is_rejected() {
        let err = rewrite("ftp://target.internal/api").unwrap_err();
        assert!(matches!(err, TransportError::UnsupportedScheme(_)));
    }
}
