//! Gateway configuration with validation.
//!
//! Every section is `#[serde(default)]`, so a TOML file only needs the keys it
//! overrides. Durations accept "500ms", "30s", "5m" or plain seconds.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// Main gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub http: HttpConfig,
    pub websocket: WebSocketConfig,
    pub chain: ChainConfig,
    pub filters: FilterConfig,
    pub subscriptions: SubscriptionConfig,
    pub limits: LimitsConfig,
    pub timeouts: TimeoutConfig,
    pub cors: CorsConfig,
    pub logging: LoggingConfig,
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.websocket.enabled
            && self.http.enabled
            && self.websocket.port == self.http.port
            && self.websocket.host != self.http.host
        {
            return Err(ConfigError::Invalid(
                "shared http/websocket port requires the same host".into(),
            ));
        }

        if self.chain.chain_id == 0 {
            return Err(ConfigError::Invalid("chain_id cannot be 0".into()));
        }

        if self.filters.filter_ttl.is_zero() {
            return Err(ConfigError::InvalidTimeout("filter_ttl cannot be 0".into()));
        }

        if self.filters.sweep_interval.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "sweep_interval cannot be 0".into(),
            ));
        }

        if self.filters.max_filter_results == 0 || self.filters.max_filters == 0 {
            return Err(ConfigError::InvalidLimit(
                "filter limits cannot be 0".into(),
            ));
        }

        if self.subscriptions.queue_capacity < 2 {
            return Err(ConfigError::InvalidLimit(
                "subscription queue_capacity must be at least 2".into(),
            ));
        }

        if self.limits.max_batch_size == 0 || self.limits.max_request_size == 0 {
            return Err(ConfigError::InvalidLimit(
                "request limits cannot be 0".into(),
            ));
        }

        if self.timeouts.default.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "default timeout cannot be 0".into(),
            ));
        }

        Ok(())
    }

    /// Load from a TOML file; missing keys keep their defaults.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.as_ref().display(), e)))?;
        toml::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply `ETH_GATEWAY_*` overrides from an environment lookup.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("ETH_GATEWAY_PORT") {
            let shared = self.websocket.port == self.http.port;
            self.http.port = port
                .parse()
                .map_err(|_| ConfigError::Parse(format!("ETH_GATEWAY_PORT: {}", port)))?;
            if shared {
                self.websocket.port = self.http.port;
            }
        }
        if let Some(port) = lookup("ETH_GATEWAY_WS_PORT") {
            self.websocket.port = port
                .parse()
                .map_err(|_| ConfigError::Parse(format!("ETH_GATEWAY_WS_PORT: {}", port)))?;
        }
        if let Some(id) = lookup("ETH_GATEWAY_CHAIN_ID") {
            self.chain.chain_id = id
                .parse()
                .map_err(|_| ConfigError::Parse(format!("ETH_GATEWAY_CHAIN_ID: {}", id)))?;
        }
        if let Some(ttl) = lookup("ETH_GATEWAY_FILTER_TTL") {
            self.filters.filter_ttl = humantime_serde::parse_duration(&ttl)
                .map_err(|e| ConfigError::Parse(format!("ETH_GATEWAY_FILTER_TTL: {}", e)))?;
        }
        Ok(())
    }

    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.http.host, self.http.port)
    }

    pub fn ws_addr(&self) -> SocketAddr {
        SocketAddr::new(self.websocket.host, self.websocket.port)
    }

    /// WebSocket shares the HTTP listener.
    pub fn ws_shares_http(&self) -> bool {
        self.http.enabled && self.websocket.port == self.http.port
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub host: IpAddr,
    /// Port (default: 1234)
    pub port: u16,
    pub enabled: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 1234,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    pub host: IpAddr,
    /// Port; equal to the HTTP port means the WebSocket upgrade is served on
    /// the HTTP listener.
    pub port: u16,
    pub enabled: bool,
    pub max_connections: usize,
    pub max_subscriptions_per_connection: usize,
    /// Max inbound frame size in bytes
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 1234,
            enabled: true,
            max_connections: 1_000,
            max_subscriptions_per_connection: 100,
            max_message_size: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// EIP-155 chain id (mainnet: 314)
    pub chain_id: u64,
    pub network_name: String,
    pub client_version: String,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: 314,
            network_name: "mainnet".to_string(),
            client_version: crate::client_version(),
        }
    }
}

/// Filter registry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Idle time after which an unpolled filter is evicted
    #[serde(with = "humantime_serde")]
    pub filter_ttl: Duration,
    /// How often the eviction sweep runs
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
    pub max_filters: usize,
    /// Buffered results per filter before the filter is evicted
    pub max_filter_results: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            filter_ttl: Duration::from_secs(5 * 60),
            sweep_interval: Duration::from_secs(30),
            max_filters: 10_000,
            max_filter_results: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    /// Per-subscription delivery queue bound
    pub queue_capacity: usize,
    pub max_subscriptions: usize,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            max_subscriptions: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Max request body size in bytes (default: 1MB)
    pub max_request_size: usize,
    pub max_batch_size: usize,
    /// Max epoch span for eth_getLogs and eth_getFilterLogs
    pub max_log_block_range: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_request_size: 1024 * 1024,
            max_batch_size: 100,
            max_log_block_range: 2_880,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Default timeout for most requests
    #[serde(with = "humantime_serde")]
    pub default: Duration,
    #[serde(with = "humantime_serde")]
    pub eth_call: Duration,
    #[serde(with = "humantime_serde")]
    pub estimate_gas: Duration,
    #[serde(with = "humantime_serde")]
    pub get_logs: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default: Duration::from_secs(30),
            eth_call: Duration::from_secs(60),
            estimate_gas: Duration::from_secs(60),
            get_logs: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub enabled: bool,
    pub allowed_origins: Vec<String>,
    pub allowed_headers: Vec<String>,
    /// Max age for preflight cache in seconds
    pub max_age: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_origins: vec!["*".to_string()],
            allowed_headers: vec!["Content-Type".to_string(), "Authorization".to_string()],
            max_age: 86400,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive when RUST_LOG is unset
    pub level: String,
    /// Emit JSON lines instead of the human format
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("config parse error: {0}")]
    Parse(String),
    #[error("config read error: {0}")]
    Io(String),
}

/// Humantime serde module for Duration serialization
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() != 0 {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        } else {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid milliseconds")
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid seconds")
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(|_| "invalid minutes")
        } else {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid duration format")
        }
    }
}
