//! Address parser for proxy submissions

use crate::error::{Error, Result};
use crate::proxy::models::ProxyAddress;
use std::fs;
use std::net::IpAddr;
use std::path::Path;

/// Parser that turns submitted `ip:port` strings into validated addresses
pub struct ProxyParser;

impl ProxyParser {
    /// Parse a single address
    ///
    /// Supports formats:
    /// - IPv4:PORT
    /// - [IPv6]:PORT
    ///
    /// Host names are rejected; a proxy must be given by IP literal.
    pub fn parse_address(input: &str) -> Result<ProxyAddress> {
        let trimmed = input.trim();
        let (host, port) = Self::split_host_port(trimmed)?;

        let ip: IpAddr = host
            .parse()
            .map_err(|_| Error::invalid_address(trimmed, format!("incorrect IP address: {}", host)))?;

        let port: u16 = port
            .parse()
            .map_err(|_| Error::invalid_address(trimmed, format!("incorrect port: {}", port)))?;

        Ok(ProxyAddress::new(ip, port))
    }

    /// Parse a list of submitted addresses, failing on the first invalid one
    pub fn parse_all<I, S>(inputs: I) -> Result<Vec<ProxyAddress>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        inputs
            .into_iter()
            .map(|input| Self::parse_address(input.as_ref()))
            .collect()
    }

    /// Parse addresses from multi-line content, one per line
    pub fn parse_string(content: &str) -> Result<Vec<ProxyAddress>> {
        Self::parse_all(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#')),
        )
    }

    /// Parse addresses from a file
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Vec<ProxyAddress>> {
        let content = fs::read_to_string(path)?;
        Self::parse_string(&content)
    }

    fn split_host_port(input: &str) -> Result<(&str, &str)> {
        if let Some(rest) = input.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| Error::invalid_address(input, "missing ']' in address"))?;
            let port = tail
                .strip_prefix(':')
                .ok_or_else(|| Error::invalid_address(input, "missing port in address"))?;
            return Ok((host, port));
        }

        let (host, port) = input
            .rsplit_once(':')
            .ok_or_else(|| Error::invalid_address(input, "expected format ip:port"))?;
        if host.contains(':') {
            return Err(Error::invalid_address(input, "too many colons in address"));
        }
        Ok((host, port))
    }
}
