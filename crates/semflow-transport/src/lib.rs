//! Scheme-routed outbound HTTP transport (spec §4.7).
//!
//! ```text
//!            ┌───────────────────┐
//!  scheme ──▶│  TransportManager  │──▶ Direct (http/https)
//!            │  RwLock<HashMap>   │──▶ SSH    (ssh, ssh+http, ssh+https)
//!            └───────────────────┘──▶ Ziti   (ziti, ziti+http)
//! ```
//!
//! Every transport implements [`Transport`]; the manager owns the
//! scheme→transport map behind a reader/writer lock (`register`/`close` are
//! writers, `round_trip` is a reader) and delegates by the URL's scheme.

pub mod direct;
pub mod manager;
pub mod ssh;
pub mod ziti;

pub use direct::DirectTransport;
pub use manager::TransportManager;
pub use ssh::SshTransport;
pub use ziti::ZitiTransport;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A dispatchable transport kind, distinct from the raw URL scheme string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Direct,
    Ssh,
    Ziti,
}

/// Maps a URL scheme to the transport kind that handles it (spec §4.7 table).
pub fn scheme_to_kind(scheme: &str) -> Option<TransportKind> {
    match scheme {
        "http" | "https" => Some(TransportKind::Direct),
        "ssh" | "ssh+http" | "ssh+https" => Some(TransportKind::Ssh),
        "ziti" | "ziti+http" => Some(TransportKind::Ziti),
        _ => None,
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("transport not registered for {0:?}")]
    NotRegistered(TransportKind),

    #[error("circuit open for {0:?}")]
    CircuitOpen(TransportKind),

    #[error("dial error: {0}")]
    Dial(String),

    #[error("request error: {0}")]
    Request(String),

    #[error("timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("close error: {0}")]
    Close(String),
}

/// A transport-agnostic outbound request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// The URL's scheme, lower-cased, used for transport routing.
    pub fn scheme(&self) -> Option<String> {
        self.url.split_once("://").map(|(scheme, _)| scheme.to_ascii_lowercase())
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Implemented by every concrete transport; selected by scheme at dispatch time.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn round_trip(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_routing_matches_spec_table() {
        assert_eq!(scheme_to_kind("http"), Some(TransportKind::Direct));
        assert_eq!(scheme_to_kind("https"), Some(TransportKind::Direct));
        assert_eq!(scheme_to_kind("ssh"), Some(TransportKind::Ssh));
        assert_eq!(scheme_to_kind("ssh+http"), Some(TransportKind::Ssh));
        assert_eq!(scheme_to_kind("ssh+https"), Some(TransportKind::Ssh));
        assert_eq!(scheme_to_kind("ziti"), Some(TransportKind::Ziti));
        assert_eq!(scheme_to_kind("ziti+http"), Some(TransportKind::Ziti));
        assert_eq!(scheme_to_kind("ftp"), None);
    }

    #[test]
    fn request_scheme_is_extracted_lowercase() {
        let request = HttpRequest::new("GET", "SSH://target.internal:8080/api");
        assert_eq!(request.scheme().as_deref(), Some("ssh"));
    }

    #[test]
    fn response_success_range_is_2xx() {
        let ok = HttpResponse { status: 204, headers: HashMap::new(), body: vec![] };
        let err = HttpResponse { status: 404, headers: HashMap::new(), body: vec![] };
        assert!(ok.is_success());
        assert!(!err.is_success());
    }
}
