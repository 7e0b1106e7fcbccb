//! Background proxy validation scheduler
//!
//! The [`Dispatcher`] repeatedly claims pending probe records from a
//! [`TaskStore`](crate::storage::TaskStore), runs them on a bounded pool of
//! workers and records each outcome. The next claim only happens after the
//! whole batch has finished.

pub mod dispatcher;
pub mod inspector;

pub use dispatcher::{claim_limit, worker_count, BatchReport, Dispatcher, SchedulerConfig};
pub use inspector::{Inspector, ProxyInspector};
