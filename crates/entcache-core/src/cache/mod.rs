//! The offline entity cache.
//!
//! This module provides [`EntityCache`], an in-memory store of one entity
//! type with dirty tracking, and the [`TransactionQueue`] that pushes its
//! pending changes to a remote service. Caches persist to snapshot files
//! (JSON by default) and import/export CSV.

pub mod persist;
pub mod snapshot;
pub mod store;
pub mod sync;

pub use snapshot::Snapshot;
pub use store::{EntityCache, PendingCounts};
pub use sync::{CancelHandle, SyncReport, TransactionEvent, TransactionKind, TransactionQueue};
