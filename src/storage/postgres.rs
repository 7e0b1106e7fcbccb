//! PostgreSQL store built on sqlx
//!
//! Claims combine `FOR UPDATE SKIP LOCKED` with a `leased_until` column: the
//! row lock keeps two concurrent claim statements apart, and the lease keeps
//! the claimed rows reserved after the statement's transaction ends.

use super::{TaskStore, MAX_LEASE};
use crate::error::{Error, Result};
use crate::proxy::models::{
    HistoryItem, Outcome, ProtocolKind, ProxyAddress, StatusRow, Task,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Attempts made to reach the database on startup
const PING_ATTEMPTS: u32 = 5;

const PING_BACKOFF: Duration = Duration::from_secs(1);

const INSERT_BATCH: &str = "INSERT INTO check_batch (batch_id, created_at) VALUES ($1, $2)";

const INSERT_ENTRY: &str =
    "INSERT INTO proxy_entry (entry_id, batch_id, ip, port) VALUES ($1, $2, $3::inet, $4)";

const INSERT_PROBE: &str = "INSERT INTO probe_record (probe_id, entry_id, protocol, status) \
     VALUES ($1, $2, $3, 'pending')";

const CLAIM_PENDING: &str = r#"
WITH claimed AS (
    UPDATE probe_record pr
    SET leased_until = now() + make_interval(secs => $1)
    WHERE pr.probe_id IN (
        SELECT p.probe_id
        FROM probe_record p
        JOIN proxy_entry e ON e.entry_id = p.entry_id
        WHERE p.status = 'pending'
          AND (p.leased_until IS NULL OR p.leased_until < now())
        ORDER BY e.batch_id, e.ip, e.port, p.protocol
        LIMIT $2
        FOR UPDATE OF p SKIP LOCKED
    )
    RETURNING pr.probe_id, pr.entry_id, pr.protocol
)
SELECT pe.entry_id, pe.batch_id, host(pe.ip) AS ip, pe.port, c.probe_id, c.protocol
FROM claimed c
JOIN proxy_entry pe ON pe.entry_id = c.entry_id
ORDER BY pe.batch_id, pe.ip, pe.port, c.protocol
"#;

const UPDATE_PROBE: &str = r#"
UPDATE probe_record
SET working = $1,
    latency_ms = $2,
    status = 'checked',
    leased_until = NULL
WHERE probe_id = $3
"#;

const UPDATE_ENTRY: &str = r#"
UPDATE proxy_entry
SET city = $1,
    external_ip = $2::inet
WHERE entry_id = $3
"#;

const BATCH_STATUS: &str = r#"
SELECT pe.batch_id, host(pe.ip) AS ip, pe.port,
       COALESCE(pe.city, '') AS city,
       COALESCE(host(pe.external_ip), '') AS external_ip,
       pr.protocol,
       COALESCE(pr.working, false) AS working,
       COALESCE(pr.latency_ms, 0) AS latency_ms,
       pr.status
FROM proxy_entry pe
JOIN probe_record pr ON pr.entry_id = pe.entry_id
WHERE pe.batch_id = $1
ORDER BY pe.ip, pe.port, pr.protocol
"#;

const HISTORY: &str = r#"
SELECT cb.batch_id, cb.created_at, COUNT(pe.entry_id) AS proxy_count
FROM check_batch cb
LEFT JOIN proxy_entry pe ON pe.batch_id = cb.batch_id
GROUP BY cb.batch_id, cb.created_at
ORDER BY cb.created_at DESC
"#;

#[derive(Debug, FromRow)]
struct TaskRow {
    entry_id: Uuid,
    batch_id: Uuid,
    ip: String,
    port: i32,
    probe_id: Uuid,
    protocol: String,
}

impl TryFrom<TaskRow> for Task {
    type Error = Error;

    fn try_from(row: TaskRow) -> Result<Self> {
        Ok(Task {
            entry_id: row.entry_id,
            batch_id: row.batch_id,
            ip: parse_ip(&row.ip)?,
            port: parse_port(row.port)?,
            probe_id: row.probe_id,
            protocol: row.protocol.parse()?,
        })
    }
}

#[derive(Debug, FromRow)]
struct StatusRowRecord {
    batch_id: Uuid,
    ip: String,
    port: i32,
    city: String,
    external_ip: String,
    protocol: String,
    working: bool,
    latency_ms: i64,
    status: String,
}

impl TryFrom<StatusRowRecord> for StatusRow {
    type Error = Error;

    fn try_from(row: StatusRowRecord) -> Result<Self> {
        Ok(StatusRow {
            batch_id: row.batch_id,
            ip: parse_ip(&row.ip)?,
            port: parse_port(row.port)?,
            city: row.city,
            external_ip: row.external_ip,
            protocol: row.protocol.parse()?,
            working: row.working,
            latency_ms: u64::try_from(row.latency_ms).unwrap_or(0),
            status: row.status.parse()?,
        })
    }
}

#[derive(Debug, FromRow)]
struct HistoryRecord {
    batch_id: Uuid,
    created_at: DateTime<Utc>,
    proxy_count: i64,
}

fn parse_ip(value: &str) -> Result<IpAddr> {
    value.parse().map_err(|_| Error::InvalidStoredValue {
        field: "ip",
        value: value.to_string(),
    })
}

fn parse_port(value: i32) -> Result<u16> {
    u16::try_from(value).map_err(|_| Error::InvalidStoredValue {
        field: "port",
        value: value.to_string(),
    })
}

/// Store backed by a PostgreSQL connection pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool and wait for the database to answer.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect_lazy(url)?;
        let store = Self::new(pool);
        store.ping().await?;
        Ok(store)
    }

    /// Ping with a short retry loop; the database may still be starting.
    pub async fn ping(&self) -> Result<()> {
        let mut attempt = 1;
        loop {
            match sqlx::query("SELECT 1").execute(&self.pool).await {
                Ok(_) => return Ok(()),
                Err(e) if attempt < PING_ATTEMPTS => {
                    warn!(attempt, error = %e, "database not reachable yet");
                    attempt += 1;
                    tokio::time::sleep(PING_BACKOFF).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Apply embedded migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("database migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TaskStore for PgStore {
    async fn submit_batch(&self, addresses: &[ProxyAddress]) -> Result<Uuid> {
        if addresses.is_empty() {
            return Err(Error::EmptyBatch);
        }

        let batch_id = Uuid::new_v4();
        let mut tx = self.pool.begin().await?;

        sqlx::query(INSERT_BATCH)
            .bind(batch_id)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

        for address in addresses {
            let entry_id = Uuid::new_v4();
            sqlx::query(INSERT_ENTRY)
                .bind(entry_id)
                .bind(batch_id)
                .bind(address.ip.to_string())
                .bind(i32::from(address.port))
                .execute(&mut *tx)
                .await?;

            for protocol in ProtocolKind::ALL {
                sqlx::query(INSERT_PROBE)
                    .bind(Uuid::new_v4())
                    .bind(entry_id)
                    .bind(protocol.as_str())
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        debug!(%batch_id, count = addresses.len(), "batch submitted");
        Ok(batch_id)
    }

    async fn claim_pending(&self, lease: Duration, limit: usize) -> Result<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as(CLAIM_PENDING)
            .bind(lease.min(MAX_LEASE).as_secs_f64())
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Task::try_from).collect()
    }

    /// A working outcome touches both the probe record and its entry. The two
    /// updates share one transaction, so a crash between them cannot leave a
    /// checked record without its location data.
    async fn record_outcome(&self, task: &Task, outcome: &Outcome) -> Result<()> {
        let latency_ms = if outcome.working {
            i64::try_from(outcome.latency_ms).unwrap_or(i64::MAX)
        } else {
            0
        };

        let mut tx = self.pool.begin().await?;

        if let (true, Some(enrichment)) = (outcome.working, &outcome.enrichment) {
            sqlx::query(UPDATE_ENTRY)
                .bind(enrichment.location_label())
                .bind(enrichment.external_ip.to_string())
                .bind(task.entry_id)
                .execute(&mut *tx)
                .await?;
        }

        let updated = sqlx::query(UPDATE_PROBE)
            .bind(outcome.working)
            .bind(latency_ms)
            .bind(task.probe_id)
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(Error::ProbeNotFound(task.probe_id));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn batch_status(&self, batch_id: Uuid) -> Result<Vec<StatusRow>> {
        let rows: Vec<StatusRowRecord> = sqlx::query_as(BATCH_STATUS)
            .bind(batch_id)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(StatusRow::try_from).collect()
    }

    async fn history(&self) -> Result<Vec<HistoryItem>> {
        let rows: Vec<HistoryRecord> = sqlx::query_as(HISTORY).fetch_all(&self.pool).await?;

        Ok(rows
            .into_iter()
            .map(|row| HistoryItem {
                batch_id: row.batch_id,
                created_at: row.created_at,
                proxy_count: u64::try_from(row.proxy_count).unwrap_or(0),
            })
            .collect())
    }
}
