//! Per-task inspection: probe, then enrich on success

use crate::error::Result;
use crate::proxy::checker::{CheckerConfig, ProbeOutcome, ProxyChecker};
use crate::proxy::geo::GeoEnricher;
use crate::proxy::models::{Outcome, Task};
use async_trait::async_trait;
use tracing::debug;

/// Turns a claimed task into an outcome ready to be recorded.
#[async_trait]
pub trait Inspector: Send + Sync {
    async fn inspect(&self, task: &Task) -> Outcome;
}

/// Network-backed inspector
#[derive(Clone)]
pub struct ProxyInspector {
    checker: ProxyChecker,
    enricher: GeoEnricher,
}

impl ProxyInspector {
    pub fn new(checker: ProxyChecker, enricher: GeoEnricher) -> Self {
        Self { checker, enricher }
    }

    pub fn from_config(config: CheckerConfig) -> Result<Self> {
        let enricher = GeoEnricher::from_config(&config)?;
        Ok(Self::new(ProxyChecker::with_config(config), enricher))
    }
}

#[async_trait]
impl Inspector for ProxyInspector {
    async fn inspect(&self, task: &Task) -> Outcome {
        match self.checker.check(task.ip, task.port, task.protocol).await {
            ProbeOutcome::Reachable { latency_ms, client } => {
                let enrichment = self.enricher.enrich(task.ip, &client).await;
                Outcome::working(latency_ms, enrichment)
            }
            ProbeOutcome::Unreachable { reason } => {
                debug!(
                    proxy = %task.address(),
                    protocol = %task.protocol,
                    %reason,
                    "probe failed"
                );
                Outcome::failed()
            }
        }
    }
}
