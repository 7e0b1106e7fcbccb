//! In-process store with the same claim and write semantics as PostgreSQL

use super::{LeaseTable, TaskStore};
use crate::error::{Error, Result};
use crate::proxy::models::{
    CheckBatch, HistoryItem, Outcome, ProbeRecord, ProbeStatus, ProtocolKind, ProxyAddress,
    ProxyEntry, StatusRow, Task,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

#[derive(Default)]
struct State {
    batches: HashMap<Uuid, CheckBatch>,
    entries: HashMap<Uuid, ProxyEntry>,
    probes: HashMap<Uuid, ProbeRecord>,
    leases: LeaseTable<Uuid>,
}

/// Store backed by in-memory maps
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every probe record
    pub async fn probe_records(&self) -> Vec<ProbeRecord> {
        self.state.lock().await.probes.values().cloned().collect()
    }

    /// Snapshot of every proxy entry
    pub async fn entries(&self) -> Vec<ProxyEntry> {
        self.state.lock().await.entries.values().cloned().collect()
    }

    pub async fn entry(&self, id: Uuid) -> Option<ProxyEntry> {
        self.state.lock().await.entries.get(&id).cloned()
    }

    pub async fn probe(&self, id: Uuid) -> Option<ProbeRecord> {
        self.state.lock().await.probes.get(&id).cloned()
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn submit_batch(&self, addresses: &[ProxyAddress]) -> Result<Uuid> {
        if addresses.is_empty() {
            return Err(Error::EmptyBatch);
        }

        let mut state = self.state.lock().await;
        let batch = CheckBatch {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
        };

        for address in addresses {
            let entry = ProxyEntry {
                id: Uuid::new_v4(),
                batch_id: batch.id,
                ip: address.ip,
                port: address.port,
                city: None,
                external_ip: None,
            };
            for protocol in ProtocolKind::ALL {
                let probe = ProbeRecord {
                    id: Uuid::new_v4(),
                    entry_id: entry.id,
                    protocol,
                    working: None,
                    latency_ms: None,
                    status: ProbeStatus::Pending,
                };
                state.probes.insert(probe.id, probe);
            }
            state.entries.insert(entry.id, entry);
        }

        let batch_id = batch.id;
        state.batches.insert(batch_id, batch);
        debug!(%batch_id, count = addresses.len(), "batch submitted");
        Ok(batch_id)
    }

    async fn claim_pending(&self, lease: Duration, limit: usize) -> Result<Vec<Task>> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.leases.purge_expired(now);

        let mut pending: Vec<Task> = state
            .probes
            .values()
            .filter(|probe| probe.status == ProbeStatus::Pending)
            .filter_map(|probe| {
                let entry = state.entries.get(&probe.entry_id)?;
                Some(Task {
                    entry_id: entry.id,
                    batch_id: entry.batch_id,
                    ip: entry.ip,
                    port: entry.port,
                    probe_id: probe.id,
                    protocol: probe.protocol,
                })
            })
            .collect();
        pending.retain(|task| !state.leases.is_held(&task.probe_id, now));
        pending.sort_by(|a, b| {
            (a.batch_id, a.ip, a.port, a.protocol).cmp(&(b.batch_id, b.ip, b.port, b.protocol))
        });
        pending.truncate(limit);

        let granted: HashSet<Uuid> = state
            .leases
            .acquire(pending.iter().map(|task| task.probe_id), now, lease)
            .into_iter()
            .collect();

        let claimed = pending
            .into_iter()
            .filter(|task| granted.contains(&task.probe_id))
            .collect();
        Ok(claimed)
    }

    async fn record_outcome(&self, task: &Task, outcome: &Outcome) -> Result<()> {
        let mut state = self.state.lock().await;

        let probe = state
            .probes
            .get_mut(&task.probe_id)
            .ok_or(Error::ProbeNotFound(task.probe_id))?;
        probe.working = Some(outcome.working);
        probe.latency_ms = Some(if outcome.working { outcome.latency_ms } else { 0 });
        probe.status = ProbeStatus::Checked;

        if let (true, Some(enrichment)) = (outcome.working, &outcome.enrichment) {
            if let Some(entry) = state.entries.get_mut(&task.entry_id) {
                entry.city = Some(enrichment.location_label());
                entry.external_ip = Some(enrichment.external_ip);
            }
        }

        state.leases.release(&task.probe_id);
        Ok(())
    }

    async fn batch_status(&self, batch_id: Uuid) -> Result<Vec<StatusRow>> {
        let state = self.state.lock().await;

        let mut rows: Vec<StatusRow> = state
            .probes
            .values()
            .filter_map(|probe| {
                let entry = state.entries.get(&probe.entry_id)?;
                (entry.batch_id == batch_id).then(|| StatusRow {
                    batch_id,
                    ip: entry.ip,
                    port: entry.port,
                    city: entry.city.clone().unwrap_or_default(),
                    external_ip: entry
                        .external_ip
                        .map(|ip| ip.to_string())
                        .unwrap_or_default(),
                    protocol: probe.protocol,
                    working: probe.working.unwrap_or(false),
                    latency_ms: probe.latency_ms.unwrap_or(0),
                    status: probe.status,
                })
            })
            .collect();
        rows.sort_by(|a, b| (a.ip, a.port, a.protocol).cmp(&(b.ip, b.port, b.protocol)));
        Ok(rows)
    }

    async fn history(&self) -> Result<Vec<HistoryItem>> {
        let state = self.state.lock().await;

        let mut counts: HashMap<Uuid, u64> = HashMap::new();
        for entry in state.entries.values() {
            *counts.entry(entry.batch_id).or_default() += 1;
        }

        let mut items: Vec<HistoryItem> = state
            .batches
            .values()
            .map(|batch| HistoryItem {
                batch_id: batch.id,
                created_at: batch.created_at,
                proxy_count: counts.get(&batch.id).copied().unwrap_or(0),
            })
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::models::Enrichment;
    use crate::proxy::parser::ProxyParser;

    const LEASE: Duration = Duration::from_secs(60);
    const NO_LIMIT: usize = usize::MAX;

    fn addresses(inputs: &[&str]) -> Vec<ProxyAddress> {
        ProxyParser::parse_all(inputs).unwrap()
    }

    fn berlin() -> Enrichment {
        Enrichment {
            city: "Berlin".to_string(),
            country: "Germany".to_string(),
            external_ip: "5.6.7.8".parse().unwrap(),
        }
    }

    #[tokio::test]
    async fn test_submit_creates_two_pending_probes_per_entry() {
        let store = MemoryStore::new();
        store.submit_batch(&addresses(&["1.2.3.4:8080"])).await.unwrap();

        let entries = store.entries().await;
        assert_eq!(entries.len(), 1);

        let probes = store.probe_records().await;
        assert_eq!(probes.len(), 2);
        assert!(probes.iter().all(|p| p.status == ProbeStatus::Pending));
        assert!(probes.iter().all(|p| p.entry_id == entries[0].id));
        assert!(probes.iter().any(|p| p.protocol == ProtocolKind::Socks5));
        assert!(probes.iter().any(|p| p.protocol == ProtocolKind::Http));

        let tasks = store.claim_pending(LEASE, NO_LIMIT).await.unwrap();
        assert_eq!(tasks.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_batch_rejected() {
        let store = MemoryStore::new();
        assert!(matches!(store.submit_batch(&[]).await, Err(Error::EmptyBatch)));
    }

    #[tokio::test]
    async fn test_claim_with_nothing_pending_is_empty() {
        let store = MemoryStore::new();
        assert!(store.claim_pending(LEASE, NO_LIMIT).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_claim_orders_by_batch_ip_port() {
        let store = MemoryStore::new();
        store
            .submit_batch(&addresses(&["10.0.0.2:80", "10.0.0.1:90", "10.0.0.1:80"]))
            .await
            .unwrap();
        store.submit_batch(&addresses(&["9.9.9.9:1"])).await.unwrap();

        let tasks = store.claim_pending(LEASE, NO_LIMIT).await.unwrap();
        assert_eq!(tasks.len(), 8);

        let keys: Vec<_> = tasks.iter().map(|t| (t.batch_id, t.ip, t.port)).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[tokio::test]
    async fn test_claim_stops_at_limit() {
        let store = MemoryStore::new();
        store
            .submit_batch(&addresses(&["10.0.0.3:80", "10.0.0.2:80", "10.0.0.1:80"]))
            .await
            .unwrap();

        let first = store.claim_pending(LEASE, 4).await.unwrap();
        assert_eq!(first.len(), 4);
        assert!(first.iter().all(|t| t.ip.to_string() != "10.0.0.3"));

        let rest = store.claim_pending(LEASE, 4).await.unwrap();
        assert_eq!(rest.len(), 2);
        assert!(rest.iter().all(|t| t.ip.to_string() == "10.0.0.3"));
        assert!(store.claim_pending(LEASE, 4).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_huge_lease_does_not_panic() {
        let store = MemoryStore::new();
        store.submit_batch(&addresses(&["1.2.3.4:8080"])).await.unwrap();

        let tasks = store
            .claim_pending(Duration::from_secs(u64::MAX), NO_LIMIT)
            .await
            .unwrap();
        assert_eq!(tasks.len(), 2);
        assert!(store.claim_pending(LEASE, NO_LIMIT).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_claim_skips_leased_records() {
        let store = MemoryStore::new();
        store.submit_batch(&addresses(&["1.2.3.4:8080"])).await.unwrap();

        let first = store.claim_pending(LEASE, NO_LIMIT).await.unwrap();
        let second = store.claim_pending(LEASE, NO_LIMIT).await.unwrap();
        assert_eq!(first.len(), 2);
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_failed_outcome_leaves_entry_untouched() {
        let store = MemoryStore::new();
        store.submit_batch(&addresses(&["1.2.3.4:8080"])).await.unwrap();
        let task = store.claim_pending(LEASE, NO_LIMIT).await.unwrap().remove(0);

        store.record_outcome(&task, &Outcome::failed()).await.unwrap();

        let probe = store.probe(task.probe_id).await.unwrap();
        assert_eq!(probe.status, ProbeStatus::Checked);
        assert_eq!(probe.working, Some(false));
        assert_eq!(probe.latency_ms, Some(0));

        let entry = store.entry(task.entry_id).await.unwrap();
        assert!(entry.city.is_none());
        assert!(entry.external_ip.is_none());
    }

    #[tokio::test]
    async fn test_working_outcome_updates_entry() {
        let store = MemoryStore::new();
        store.submit_batch(&addresses(&["1.2.3.4:8080"])).await.unwrap();
        let task = store.claim_pending(LEASE, NO_LIMIT).await.unwrap().remove(0);

        store
            .record_outcome(&task, &Outcome::working(120, berlin()))
            .await
            .unwrap();

        let probe = store.probe(task.probe_id).await.unwrap();
        assert_eq!(probe.working, Some(true));
        assert_eq!(probe.latency_ms, Some(120));
        assert_eq!(probe.status, ProbeStatus::Checked);

        let entry = store.entry(task.entry_id).await.unwrap();
        assert_eq!(entry.city.as_deref(), Some("Germany, Berlin"));
        assert_eq!(entry.external_ip, Some("5.6.7.8".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_record_outcome_is_idempotent() {
        let store = MemoryStore::new();
        store.submit_batch(&addresses(&["1.2.3.4:8080"])).await.unwrap();
        let task = store.claim_pending(LEASE, NO_LIMIT).await.unwrap().remove(0);
        let outcome = Outcome::working(80, berlin());

        store.record_outcome(&task, &outcome).await.unwrap();
        let once = (store.probe_records().await, store.entries().await);
        store.record_outcome(&task, &outcome).await.unwrap();
        let twice = (store.probe_records().await, store.entries().await);

        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn test_checked_records_are_never_reclaimed() {
        let store = MemoryStore::new();
        store.submit_batch(&addresses(&["1.2.3.4:8080"])).await.unwrap();
        for task in store.claim_pending(LEASE, NO_LIMIT).await.unwrap() {
            store.record_outcome(&task, &Outcome::failed()).await.unwrap();
        }

        assert!(store.claim_pending(Duration::ZERO, NO_LIMIT).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expired_lease_makes_task_claimable_again() {
        let store = MemoryStore::new();
        store.submit_batch(&addresses(&["1.2.3.4:8080"])).await.unwrap();

        let first = store.claim_pending(Duration::ZERO, NO_LIMIT).await.unwrap();
        let again = store.claim_pending(LEASE, NO_LIMIT).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(again.len(), 2);
    }

    #[tokio::test]
    async fn test_status_and_history() {
        let store = MemoryStore::new();
        let batch_id = store
            .submit_batch(&addresses(&["1.2.3.4:8080", "5.6.7.8:3128"]))
            .await
            .unwrap();

        let rows = store.batch_status(batch_id).await.unwrap();
        assert_eq!(rows.len(), 4);
        assert!(rows.iter().all(|r| r.status == ProbeStatus::Pending && r.city.is_empty()));

        let history = store.history().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].batch_id, batch_id);
        assert_eq!(history[0].proxy_count, 2);

        assert!(store.batch_status(Uuid::new_v4()).await.unwrap().is_empty());
    }
}
