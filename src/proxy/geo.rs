//! Geolocation enrichment for reachable proxies
//!
//! Two lookups are made for every proxy that passes its probe:
//! - where the proxy host sits, queried directly (never through the proxy),
//!   either against the online service or an offline MMDB database
//! - which address the outside world sees, queried through the proxy itself

use crate::error::{Error, Result};
use crate::proxy::checker::CheckerConfig;
use crate::proxy::models::Enrichment;
use maxminddb::{geoip2, Reader};
use reqwest::Client;
use serde::Deserialize;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// City and country of an IP address. Empty strings mean unknown.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Location {
    pub city: String,
    pub country: String,
}

/// Subset of the ip-api JSON response
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct IpApiResponse {
    status: Option<String>,
    message: Option<String>,
    query: Option<String>,
    city: Option<String>,
    country: Option<String>,
}

impl IpApiResponse {
    fn into_location(self) -> Result<Location> {
        if self.status.as_deref() == Some("fail") {
            return Err(Error::Geo(
                self.message.unwrap_or_else(|| "lookup failed".to_string()),
            ));
        }
        Ok(Location {
            city: self.city.unwrap_or_default(),
            country: self.country.unwrap_or_default(),
        })
    }
}

/// GeoLocator for looking up IP addresses in MMDB databases
#[derive(Clone)]
pub struct GeoLocator {
    reader: Arc<Reader<Vec<u8>>>,
}

impl GeoLocator {
    /// Create a new GeoLocator from an MMDB file path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = Reader::open_readfile(path).map_err(|e| Error::Geo(e.to_string()))?;
        Ok(Self {
            reader: Arc::new(reader),
        })
    }

    /// Look up the city and country for an IpAddr
    pub fn lookup_ip(&self, ip: IpAddr) -> Result<Location> {
        let lookup_result = self.reader.lookup(ip).map_err(|e| Error::Geo(e.to_string()))?;
        let city: Option<geoip2::City> = lookup_result
            .decode()
            .map_err(|e| Error::Geo(e.to_string()))?;

        let Some(city) = city else {
            return Ok(Location::default());
        };

        Ok(Location {
            city: city.city.names.english.map(String::from).unwrap_or_default(),
            country: city.country.names.english.map(String::from).unwrap_or_default(),
        })
    }
}

/// Best-effort geolocation and egress discovery
#[derive(Clone)]
pub struct GeoEnricher {
    client: Client,
    service_url: String,
    locator: Option<GeoLocator>,
}

impl GeoEnricher {
    /// Build an enricher from checker settings.
    ///
    /// Fails only if the HTTP client cannot be built or a configured MMDB file
    /// cannot be opened.
    pub fn from_config(config: &CheckerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .no_proxy()
            .build()?;

        let locator = config
            .mmdb_path
            .as_ref()
            .map(GeoLocator::from_path)
            .transpose()?;

        Ok(Self {
            client,
            service_url: config.geo_service_url.clone(),
            locator,
        })
    }

    /// Locate the proxy host itself
    pub async fn locate(&self, ip: IpAddr) -> Result<Location> {
        if let Some(locator) = &self.locator {
            return locator.lookup_ip(ip);
        }

        let url = format!("{}{}", self.service_url, ip);
        let response: IpApiResponse = self.client.get(url).send().await?.json().await?;
        response.into_location()
    }

    /// Discover the address the service sees when called through `proxy_client`
    pub async fn external_ip(&self, proxy_client: &Client) -> Result<IpAddr> {
        let response: IpApiResponse = proxy_client
            .get(&self.service_url)
            .send()
            .await?
            .json()
            .await?;

        let query = response
            .query
            .ok_or_else(|| Error::Geo("response has no query field".to_string()))?;
        query
            .parse()
            .map_err(|_| Error::Geo(format!("unparseable egress address: {}", query)))
    }

    /// Run both lookups, degrading to empty location and the listening IP
    pub async fn enrich(&self, ip: IpAddr, proxy_client: &Client) -> Enrichment {
        let (location, external_ip) =
            tokio::join!(self.locate(ip), self.external_ip(proxy_client));

        let location = location.unwrap_or_else(|e| {
            debug!(%ip, error = %e, "location lookup failed");
            Location::default()
        });
        let external_ip = external_ip.unwrap_or_else(|e| {
            debug!(%ip, error = %e, "egress lookup failed");
            ip
        });

        Enrichment {
            city: location.city,
            country: location.country,
            external_ip,
        }
    }
}
