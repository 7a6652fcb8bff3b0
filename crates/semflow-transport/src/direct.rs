//! Direct HTTP transport: a pooled `reqwest::Client` (spec §4.7 "Direct transport").

use std::time::Duration;

use async_trait::async_trait;
use semflow_core::config::HttpTransportConfig;

use crate::{HttpRequest, HttpResponse, Transport, TransportError};

pub struct DirectTransport {
    client: reqwest::Client,
}

impl DirectTransport {
    pub fn new(config: &HttpTransportConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(config.max_idle_conns_per_host)
            .pool_idle_timeout(config.idle_conn_timeout)
            .build()
            .map_err(|e| TransportError::Dial(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for DirectTransport {
    async fn round_trip(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let mut builder = self.client.request(method, &request.url).body(request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(Duration::from_secs(0))
            } else {
                TransportError::Request(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value.to_str().ok().map(|v| (name.to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?
            .to_vec();

        Ok(HttpResponse { status, headers, body })
    }

    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }
}
