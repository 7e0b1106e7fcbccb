//! Proxy module for validating and probing proxies
//!
//! This module provides functionality for:
//! - Parsing and validating submitted `ip:port` addresses
//! - Probing a proxy over SOCKS5 or HTTP and measuring latency
//! - Geolocating a reachable proxy and discovering its egress address

pub mod checker;
pub mod geo;
pub mod models;
pub mod parser;

pub use checker::{CheckerConfig, ProbeOutcome, ProxyChecker};
pub use geo::{GeoEnricher, GeoLocator, Location};
pub use models::{
    CheckBatch, Enrichment, HistoryItem, Outcome, ProbeRecord, ProbeStatus, ProtocolKind,
    ProxyAddress, ProxyEntry, StatusRow, Task,
};
pub use parser::ProxyParser;
