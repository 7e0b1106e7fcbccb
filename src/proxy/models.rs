//! Proxy check data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;

/// Protocol a proxy is probed with. Every entry is probed once per kind.
///
/// Variants are declared in the order their stored names sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProtocolKind {
    Http,
    Socks5,
}

impl ProtocolKind {
    /// Both kinds, in the order probe records are created for an entry.
    pub const ALL: [ProtocolKind; 2] = [ProtocolKind::Socks5, ProtocolKind::Http];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolKind::Socks5 => "SOCKS5",
            ProtocolKind::Http => "HTTP",
        }
    }

    /// Proxy URL understood by reqwest. SOCKS5 resolves names on the proxy side.
    pub fn proxy_url(&self, ip: IpAddr, port: u16) -> String {
        let addr = SocketAddr::new(ip, port);
        match self {
            ProtocolKind::Socks5 => format!("socks5h://{}", addr),
            ProtocolKind::Http => format!("http://{}", addr),
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ProtocolKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SOCKS5" => Ok(ProtocolKind::Socks5),
            "HTTP" => Ok(ProtocolKind::Http),
            _ => Err(Error::InvalidStoredValue {
                field: "protocol",
                value: s.to_string(),
            }),
        }
    }
}

/// Lifecycle of a probe record. The only transition is `Pending -> Checked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Pending,
    Checked,
}

impl ProbeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeStatus::Pending => "pending",
            ProbeStatus::Checked => "checked",
        }
    }
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ProbeStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ProbeStatus::Pending),
            "checked" => Ok(ProbeStatus::Checked),
            _ => Err(Error::InvalidStoredValue {
                field: "status",
                value: s.to_string(),
            }),
        }
    }
}

/// A validated `ip:port` pair accepted for checking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProxyAddress {
    pub ip: IpAddr,
    pub port: u16,
}

impl ProxyAddress {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }
}

impl fmt::Display for ProxyAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", SocketAddr::new(self.ip, self.port))
    }
}

/// Group of addresses submitted together
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckBatch {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// One submitted address and the location data resolved for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyEntry {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub ip: IpAddr,
    pub port: u16,
    pub city: Option<String>,
    pub external_ip: Option<IpAddr>,
}

/// One protocol-specific check of a proxy entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeRecord {
    pub id: Uuid,
    pub entry_id: Uuid,
    pub protocol: ProtocolKind,
    pub working: Option<bool>,
    pub latency_ms: Option<u64>,
    pub status: ProbeStatus,
}

/// Work item handed to a worker after a claim.
///
/// A value copy of the stored rows; the worker owns it until the outcome is
/// recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub entry_id: Uuid,
    pub batch_id: Uuid,
    pub ip: IpAddr,
    pub port: u16,
    pub probe_id: Uuid,
    pub protocol: ProtocolKind,
}

impl Task {
    pub fn address(&self) -> ProxyAddress {
        ProxyAddress::new(self.ip, self.port)
    }
}

/// Geolocation and egress data gathered for a reachable proxy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrichment {
    pub city: String,
    pub country: String,
    pub external_ip: IpAddr,
}

impl Enrichment {
    /// Location as stored on the entry: "Country, City", skipping empty parts.
    pub fn location_label(&self) -> String {
        [self.country.as_str(), self.city.as_str()]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Result of inspecting one task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub working: bool,
    pub latency_ms: u64,
    pub enrichment: Option<Enrichment>,
}

impl Outcome {
    pub fn working(latency_ms: u64, enrichment: Enrichment) -> Self {
        Self {
            working: true,
            latency_ms,
            enrichment: Some(enrichment),
        }
    }

    pub fn failed() -> Self {
        Self {
            working: false,
            latency_ms: 0,
            enrichment: None,
        }
    }
}

/// Read-side view of one probe record with its entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRow {
    pub batch_id: Uuid,
    pub ip: IpAddr,
    pub port: u16,
    pub city: String,
    pub external_ip: String,
    pub protocol: ProtocolKind,
    pub working: bool,
    pub latency_ms: u64,
    pub status: ProbeStatus,
}

/// Read-side summary of a submitted batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub batch_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub proxy_count: u64,
}
