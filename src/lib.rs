//! Proxy Checker - background validation of submitted proxies
//!
//! Submitted proxy addresses are stored as pending SOCKS5 and HTTP probe
//! records. A polling scheduler claims them, probes each proxy through a
//! bounded worker pool, geolocates the ones that answer, and writes the
//! results back.

pub mod config;
pub mod error;
pub mod logging;
pub mod proxy;
pub mod scheduler;
pub mod storage;

pub use config::Config;
pub use error::{Error, Result};
pub use proxy::*;
