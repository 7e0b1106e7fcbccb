//! Proxy checker module for probing proxy reachability and latency

use crate::error::Result;
use crate::proxy::models::ProtocolKind;
use reqwest::header::ACCEPT;
use reqwest::{Client, Proxy as ReqwestProxy};
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// Default timeout for proxy checks in milliseconds
const DEFAULT_TIMEOUT_MS: u64 = 4_000;

/// Canonical endpoint fetched through every proxy
const DEFAULT_TEST_URL: &str = "https://ip.pn/";

/// Default IP geolocation service (ip-api JSON API)
const DEFAULT_GEO_SERVICE_URL: &str = "http://ip-api.com/json/";

/// Configuration for proxy checker
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// Timeout covering dial, handshake and the full exchange
    pub timeout: Duration,
    /// URL to test proxies against
    pub test_url: String,
    /// Treat non-2xx answers from the test URL as failures
    pub require_success_status: bool,
    /// Base URL of the geolocation service, ending in '/'
    pub geo_service_url: String,
    /// Path to MMDB file for offline geolocation (optional)
    pub mmdb_path: Option<String>,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            test_url: DEFAULT_TEST_URL.to_string(),
            require_success_status: false,
            geo_service_url: DEFAULT_GEO_SERVICE_URL.to_string(),
            mmdb_path: None,
        }
    }
}

impl CheckerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_test_url(mut self, url: String) -> Self {
        self.test_url = url;
        self
    }

    pub fn with_require_success_status(mut self, required: bool) -> Self {
        self.require_success_status = required;
        self
    }

    pub fn with_geo_service_url(mut self, url: String) -> Self {
        self.geo_service_url = url;
        self
    }

    pub fn with_mmdb_path(mut self, path: String) -> Self {
        self.mmdb_path = Some(path);
        self
    }
}

/// Result of probing one proxy with one protocol
#[derive(Debug)]
pub enum ProbeOutcome {
    /// The canonical fetch completed. The client is routed through the proxy
    /// and can be reused for egress discovery.
    Reachable { latency_ms: u64, client: Client },
    Unreachable { reason: String },
}

impl ProbeOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, ProbeOutcome::Reachable { .. })
    }

    /// Measured latency, or 0 when the probe failed
    pub fn latency_ms(&self) -> u64 {
        match self {
            ProbeOutcome::Reachable { latency_ms, .. } => *latency_ms,
            ProbeOutcome::Unreachable { .. } => 0,
        }
    }
}

/// Proxy checker for validating proxies
#[derive(Debug, Clone)]
pub struct ProxyChecker {
    config: CheckerConfig,
}

impl ProxyChecker {
    /// Create a new proxy checker with default configuration
    pub fn new() -> Self {
        Self {
            config: CheckerConfig::default(),
        }
    }

    /// Create a new proxy checker with custom configuration
    pub fn with_config(config: CheckerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }

    /// Probe `ip:port` with the given protocol.
    ///
    /// Any failure (dial, handshake, timeout, body read) collapses into
    /// [`ProbeOutcome::Unreachable`]; the reason is only kept for logging.
    pub async fn check(&self, ip: IpAddr, port: u16, kind: ProtocolKind) -> ProbeOutcome {
        let client = match self.create_client(ip, port, kind) {
            Ok(client) => client,
            Err(e) => {
                return ProbeOutcome::Unreachable {
                    reason: e.to_string(),
                }
            }
        };

        match tokio::time::timeout(self.config.timeout, self.measure(&client)).await {
            Ok(Ok(latency_ms)) => ProbeOutcome::Reachable { latency_ms, client },
            Ok(Err(reason)) => ProbeOutcome::Unreachable { reason },
            Err(_) => ProbeOutcome::Unreachable {
                reason: format!("timed out after {}ms", self.config.timeout.as_millis()),
            },
        }
    }

    /// Fetch the test URL and drain the body, returning elapsed milliseconds
    async fn measure(&self, client: &Client) -> std::result::Result<u64, String> {
        let start = Instant::now();

        let response = client
            .get(&self.config.test_url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        response.bytes().await.map_err(|e| e.to_string())?;

        if self.config.require_success_status && !status.is_success() {
            return Err(format!("HTTP status: {}", status));
        }

        Ok(start.elapsed().as_millis() as u64)
    }

    /// Create a reqwest client tunnelled through the proxy.
    ///
    /// Certificates of the test URL are not verified; proxies often intercept
    /// TLS and only reachability is being judged.
    fn create_client(&self, ip: IpAddr, port: u16, kind: ProtocolKind) -> Result<Client> {
        let proxy = ReqwestProxy::all(kind.proxy_url(ip, port))?;

        let client = Client::builder()
            .proxy(proxy)
            .timeout(self.config.timeout)
            .connect_timeout(self.config.timeout)
            .danger_accept_invalid_certs(true)
            .build()?;

        Ok(client)
    }
}

impl Default for ProxyChecker {
    fn default() -> Self {
        Self::new()
    }
}
