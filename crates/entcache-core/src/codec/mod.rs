//! Serializers used by the cache.
//!
//! - [`SnapshotCodec`] / [`JsonCodec`]: whole-cache snapshots
//! - [`Table`]: tabular CSV import and export

pub mod json;
pub mod tabular;

pub use json::{JsonCodec, SnapshotCodec};
pub use tabular::Table;
