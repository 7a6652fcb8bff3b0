//! Transport manager: scheme-routed dispatch over a registered transport set
//! (spec §4.7). `register`/`close` are writers; `round_trip`/`get_transport`
//! are readers (spec §5 shared-resource policy).

use std::collections::HashMap;
use std::sync::Arc;

use semflow_core::reliability::{CircuitBreaker, CircuitBreakerConfig};
use tokio::sync::RwLock;
use tracing::{instrument, warn};

use crate::{scheme_to_kind, HttpRequest, HttpResponse, Transport, TransportError, TransportKind};

#[derive(Default)]
pub struct TransportManager {
    transports: RwLock<HashMap<TransportKind, Arc<dyn Transport>>>,
    breakers: RwLock<HashMap<TransportKind, Arc<CircuitBreaker>>>,
}

impl TransportManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a constructed transport under `kind`, replacing any prior one.
    /// A fresh circuit breaker is installed alongside it so a re-registered
    /// transport (e.g. after reconfiguration) doesn't inherit a tripped state.
    pub async fn register(&self, kind: TransportKind, transport: Arc<dyn Transport>) {
        self.transports.write().await.insert(kind, transport);
        self.breakers.write().await.insert(kind, Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())));
    }

    async fn breaker_for(&self, kind: TransportKind) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().await.get(&kind) {
            return Arc::clone(breaker);
        }
        let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default()));
        self.breakers.write().await.insert(kind, Arc::clone(&breaker));
        breaker
    }

    pub async fn get_transport(&self, kind: TransportKind) -> Option<Arc<dyn Transport>> {
        self.transports.read().await.get(&kind).cloned()
    }

    /// The schemes currently routable given the registered transport kinds.
    pub async fn supported_schemes(&self) -> Vec<&'static str> {
        let registered: Vec<TransportKind> = self.transports.read().await.keys().copied().collect();
        let all = [
            ("http", TransportKind::Direct),
            ("https", TransportKind::Direct),
            ("ssh", TransportKind::Ssh),
            ("ssh+http", TransportKind::Ssh),
            ("ssh+https", TransportKind::Ssh),
            ("ziti", TransportKind::Ziti),
            ("ziti+http", TransportKind::Ziti),
        ];
        all.iter()
            .filter(|(_, kind)| registered.contains(kind))
            .map(|(scheme, _)| *scheme)
            .collect()
    }

    /// Routes by the request URL's scheme to the corresponding registered
    /// transport; fails with `unsupported-scheme` for anything else. Each
    /// transport kind is guarded by its own circuit breaker so a string of
    /// failures against one scheme (e.g. a dead SSH host) doesn't cost every
    /// subsequent dispatch a full dial attempt.
    #[instrument(skip(self, request), fields(url = %request.url))]
    pub async fn round_trip(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let scheme = request
            .scheme()
            .ok_or_else(|| TransportError::Request(format!("malformed URL: {}", request.url)))?;
        let kind = scheme_to_kind(&scheme).ok_or_else(|| TransportError::UnsupportedScheme(scheme.clone()))?;
        let transport = self.get_transport(kind).await.ok_or(TransportError::NotRegistered(kind))?;

        let breaker = self.breaker_for(kind).await;
        if !breaker.allow_request() {
            warn!(?kind, "circuit open, short-circuiting dispatch");
            return Err(TransportError::CircuitOpen(kind));
        }

        let result = transport.round_trip(request).await;
        match &result {
            Ok(_) => breaker.record_success(),
            Err(_) => breaker.record_failure(),
        }
        result
    }

    /// Closes every registered transport, collecting (not short-circuiting on)
    /// individual close errors.
    pub async fn close(&self) -> Result<(), Vec<TransportError>> {
        let transports: Vec<Arc<dyn Transport>> = self.transports.write().await.drain().map(|(_, v)| v).collect();
        let mut errors = Vec::new();
        for transport in transports {
            if let Err(e) = transport.close().await {
                errors.push(e);
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StubTransport {
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Transport for StubTransport {
        async fn round_trip(&self, _request: HttpRequest) -> Result<HttpResponse, TransportError> {
            Ok(HttpResponse { status: 200, headers: HashMap::new(), body: vec![] })
        }

        async fn close(&self) -> Result<(), TransportError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn routes_by_scheme_to_registered_transport() {
        let manager = TransportManager::new();
        manager
            .register(TransportKind::Direct, Arc::new(StubTransport { closed: Arc::new(AtomicBool::new(false)) }))
            .await;

        let response = manager.round_trip(HttpRequest::new("GET", "https://api.example.com/x")).await.unwrap();
        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn unregistered_scheme_fails_unsupported() {
        let manager = TransportManager::new();
        let err = manager.round_trip(HttpRequest::new("GET", "ftp://api.example.com/x")).await.unwrap_err();
        assert!(matches!(err, TransportError::UnsupportedScheme(_)));
    }

    #[tokio::test]
    async fn registered_kind_without_matching_scheme_is_not_registered_error() {
        let manager = TransportManager::new();
        manager
            .register(TransportKind::Ssh, Arc::new(StubTransport { closed: Arc::new(AtomicBool::new(false)) }))
            .await;
        let err = manager.round_trip(HttpRequest::new("GET", "https://api.example.com/x")).await.unwrap_err();
        assert!(matches!(err, TransportError::NotRegistered(TransportKind::Direct)));
    }

    #[tokio::test]
    async fn close_closes_every_registered_transport() {
        let manager = TransportManager::new();
        let closed = Arc::new(AtomicBool::new(false));
        manager.register(TransportKind::Direct, Arc::new(StubTransport { closed: Arc::clone(&closed) })).await;
        manager.close().await.unwrap();
        assert!(closed.load(Ordering::SeqCst));
    }

    struct FailingTransport;

    #[async_trait]
    impl Transport for FailingTransport {
        async fn round_trip(&self, _request: HttpRequest) -> Result<HttpResponse, TransportError> {
            Err(TransportError::Dial("connection refused".into()))
        }

        async fn close(&self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn repeated_failures_trip_the_circuit_for_that_transport_kind() {
        let manager = TransportManager::new();
        manager.register(TransportKind::Direct, Arc::new(FailingTransport)).await;

        for _ in 0..5 {
            assert!(matches!(
                manager.round_trip(HttpRequest::new("GET", "https://api.example.com/x")).await,
                Err(TransportError::Dial(_))
            ));
        }

        let err = manager.round_trip(HttpRequest::new("GET", "https://api.example.com/x")).await.unwrap_err();
        assert!(matches!(err, TransportError::CircuitOpen(TransportKind::Direct)));
    }

    #[tokio::test]
    async fn circuit_for_one_kind_does_not_affect_another() {
        let manager = TransportManager::new();
        manager.register(TransportKind::Direct, Arc::new(FailingTransport)).await;
        manager
            .register(TransportKind::Ssh, Arc::new(StubTransport { closed: Arc::new(AtomicBool::new(false)) }))
            .await;

        for _ in 0..5 {
            let _ = manager.round_trip(HttpRequest::new("GET", "https://api.example.com/x")).await;
        }
        assert!(matches!(
            manager.round_trip(HttpRequest::new("GET", "https://api.example.com/x")).await,
            Err(TransportError::CircuitOpen(TransportKind::Direct))
        ));

        let response = manager.round_trip(HttpRequest::new("GET", "ssh://internal.host/x")).await.unwrap();
        assert_eq!(response.status, 200);
    }
}
