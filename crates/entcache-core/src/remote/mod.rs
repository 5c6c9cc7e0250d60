//! Remote service contract used to synchronize a cache.
//!
//! The cache only needs three operations from a remote service: upsert
//! one entity, delete one entity by key, and fetch every entity. The
//! [`RestClient`] implements them over HTTP; [`InMemoryRemote`] keeps
//! them in memory for tests and offline use.

pub mod error;
pub mod memory;
pub mod rest;

use std::future::Future;

pub use error::RemoteError;
pub use memory::InMemoryRemote;
pub use rest::RestClient;

use crate::reader::Entity;

pub trait RemoteService<E: Entity>: Send + Sync {
    /// Create or replace an entity on the remote service.
    fn put_entity(&self, entity: &E) -> impl Future<Output = Result<(), RemoteError>> + Send;

    fn delete_by_id(&self, key: &E::Key) -> impl Future<Output = Result<(), RemoteError>> + Send;

    fn get_all_entities(&self) -> impl Future<Output = Result<Vec<E>, RemoteError>> + Send;
}
