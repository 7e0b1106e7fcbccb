//! Durable state for check batches, proxy entries and probe records
//!
//! [`TaskStore`] is the seam between the scheduler and storage. Claiming is a
//! lease with skip: a claim reserves pending probe records for a limited time
//! and passes over records another claim already holds instead of waiting.

pub mod lease;
pub mod memory;
pub mod postgres;

pub use lease::{LeaseTable, MAX_LEASE};
pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::error::Result;
use crate::proxy::models::{HistoryItem, Outcome, ProxyAddress, StatusRow, Task};
use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Create a batch with one entry per address and one pending probe record
    /// per protocol kind for each entry. Returns the batch id.
    async fn submit_batch(&self, addresses: &[ProxyAddress]) -> Result<Uuid>;

    /// Claim up to `limit` pending, unleased probe records, ordered by
    /// (batch id, ip, port). Records held by a concurrent claim are skipped.
    /// An empty vector means there is no work.
    ///
    /// Leases longer than [`MAX_LEASE`] are clamped to it.
    async fn claim_pending(&self, lease: Duration, limit: usize) -> Result<Vec<Task>>;

    /// Persist the outcome of a task and mark its probe record checked.
    /// Recording the same outcome twice leaves the same final state.
    async fn record_outcome(&self, task: &Task, outcome: &Outcome) -> Result<()>;

    /// Per-probe results of one batch
    async fn batch_status(&self, batch_id: Uuid) -> Result<Vec<StatusRow>>;

    /// All batches, newest first
    async fn history(&self) -> Result<Vec<HistoryItem>>;
}
