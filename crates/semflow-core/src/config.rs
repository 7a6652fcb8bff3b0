//! Explicit configuration record assembled once at process start.
//!
//! The source's pattern of reading environment variables at arbitrary entry
//! points is consolidated here: every env lookup happens in
//! [`RuntimeConfig::from_env`], and every other module receives an already-built
//! `RuntimeConfig` by reference (spec §9).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// HTTP transport pool configuration (spec §6.4 `HTTP_*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpTransportConfig {
    pub timeout: Duration,
    pub max_idle_conns: usize,
    pub max_idle_conns_per_host: usize,
    pub idle_conn_timeout: Duration,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_idle_conns: 100,
            max_idle_conns_per_host: 10,
            idle_conn_timeout: Duration::from_secs(90),
        }
    }
}

/// SSH-tunnel transport configuration (spec §6.4 `SSH_*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshTransportConfig {
    pub host: String,
    pub user: String,
    pub port: u16,
    pub key_file: Option<String>,
    pub password: Option<String>,
    pub known_hosts: Option<String>,
    pub timeout: Duration,
}

/// Overlay-network transport configuration (spec §6.4 `ZITI_*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZitiTransportConfig {
    pub identity_file: Option<String>,
    pub identity_json: Option<String>,
    pub timeout: Duration,
}

/// Per-queue worker width (spec §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub name: String,
    pub worker_count: usize,
}

/// Top-level runtime configuration, built once at the CLI binding layer from
/// flag > environment > file > default precedence (spec §6.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub http: HttpTransportConfig,
    pub ssh: Option<SshTransportConfig>,
    pub ziti: Option<ZitiTransportConfig>,
    pub queues: Vec<QueueConfig>,
    pub dequeue_timeout: Duration,
    pub handler_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            http: HttpTransportConfig::default(),
            ssh: None,
            ziti: None,
            queues: vec![
                QueueConfig { name: "sequential".into(), worker_count: 1 },
                QueueConfig { name: "parallel".into(), worker_count: 5 },
                QueueConfig { name: "priority".into(), worker_count: 2 },
            ],
            dequeue_timeout: Duration::from_secs(5),
            handler_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid environment variable {name}: {message}")]
    InvalidEnv { name: String, message: String },

    #[error("failed to read config file {path}: {message}")]
    FileRead { path: String, message: String },

    #[error("failed to parse config file {path}: {message}")]
    FileParse { path: String, message: String },
}

impl RuntimeConfig {
    /// Build a [`RuntimeConfig`] by reading the environment variables named in
    /// spec §6.4. This is the ONLY place in the runtime that calls
    /// `std::env::var`; everything downstream receives this struct.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Builds a config starting from an optional JSON file (the "file" layer),
    /// then overlays environment variables on top (the "env" layer). Flag
    /// overlay happens one layer further out, in the CLI binding (spec §6.5's
    /// flag > env > file > default precedence).
    pub fn from_file_and_env(file_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let mut config = match file_path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?;
                serde_json::from_str(&raw).map_err(|e| ConfigError::FileParse {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?
            }
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        let config = self;

        if let Ok(v) = std::env::var("HTTP_TIMEOUT") {
            config.http.timeout = parse_secs("HTTP_TIMEOUT", &v)?;
        }
        if let Ok(v) = std::env::var("MAX_IDLE_CONNS") {
            config.http.max_idle_conns = parse_usize("MAX_IDLE_CONNS", &v)?;
        }
        if let Ok(v) = std::env::var("MAX_IDLE_CONNS_PER_HOST") {
            config.http.max_idle_conns_per_host = parse_usize("MAX_IDLE_CONNS_PER_HOST", &v)?;
        }
        if let Ok(v) = std::env::var("IDLE_CONN_TIMEOUT") {
            config.http.idle_conn_timeout = parse_secs("IDLE_CONN_TIMEOUT", &v)?;
        }

        if let Ok(host) = std::env::var("SSH_HOST") {
            let user = std::env::var("SSH_USER").unwrap_or_default();
            let port = std::env::var("SSH_PORT")
                .ok()
                .map(|v| parse_u16("SSH_PORT", &v))
                .transpose()?
                .unwrap_or(22);
            let timeout = std::env::var("SSH_TIMEOUT")
                .ok()
                .map(|v| parse_secs("SSH_TIMEOUT", &v))
                .transpose()?
                .unwrap_or(Duration::from_secs(10));
            config.ssh = Some(SshTransportConfig {
                host,
                user,
                port,
                key_file: std::env::var("SSH_KEY_FILE").ok(),
                password: std::env::var("SSH_PASSWORD").ok(),
                known_hosts: std::env::var("SSH_KNOWN_HOSTS").ok(),
                timeout,
            });
        }

        let identity_file = std::env::var("ZITI_IDENTITY_FILE").ok();
        let identity_json = std::env::var("ZITI_IDENTITY_JSON").ok();
        if identity_file.is_some() || identity_json.is_some() {
            let timeout = std::env::var("ZITI_TIMEOUT")
                .ok()
                .map(|v| parse_secs("ZITI_TIMEOUT", &v))
                .transpose()?
                .unwrap_or(Duration::from_secs(10));
            config.ziti = Some(ZitiTransportConfig {
                identity_file,
                identity_json,
                timeout,
            });
        }

        Ok(())
    }
}

fn parse_secs(name: &str, raw: &str) -> Result<Duration, ConfigError> {
    raw.parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| ConfigError::InvalidEnv { name: name.to_string(), message: e.to_string() })
}

fn parse_usize(name: &str, raw: &str) -> Result<usize, ConfigError> {
    raw.parse::<usize>()
        .map_err(|e| ConfigError::InvalidEnv { name: name.to_string(), message: e.to_string() })
}

fn parse_u16(name: &str, raw: &str) -> Result<u16, ConfigError> {
    raw.parse::<u16>()
        .map_err(|e| ConfigError::InvalidEnv { name: name.to_string(), message: e.to_string() })
}
