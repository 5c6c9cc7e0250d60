//! entcache core - a typed, identity-keyed offline entity cache.
//!
//! The cache keeps every entity of one type in memory, keyed by its
//! surrogate key, and tracks local changes in three dirty sets (added,
//! updated, deleted). Pending changes are pushed to a remote service by
//! the [`TransactionQueue`], one entity at a time, in the order deletes,
//! adds, updates.
//!
//! Modules:
//! - [`reader`]: per-type field descriptors and surrogate key resolution
//! - [`cache`]: the [`EntityCache`] and its synchronization queue
//! - [`codec`]: snapshot (JSON) and tabular (CSV) codecs
//! - [`remote`]: the [`RemoteService`] contract and its REST implementation
//! - [`config`]: persisted client configuration
//!
//! The cache is single-owner: every mutation takes `&mut self`, so sharing
//! one cache between threads requires external synchronization.

pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod reader;
pub mod remote;

pub use cache::{
    CancelHandle, EntityCache, PendingCounts, Snapshot, SyncReport, TransactionEvent,
    TransactionKind, TransactionQueue,
};
pub use codec::{JsonCodec, SnapshotCodec, Table};
pub use config::Config;
pub use error::{CacheError, Result};
pub use reader::{
    DescriptorBuilder, Entity, EntityDescriptor, FieldKind, FieldType, FieldValue,
    PropertyFilter, SurrogateKey,
};
pub use remote::{InMemoryRemote, RemoteError, RemoteService, RestClient};

#[cfg(test)]
pub(crate) mod testing;
