//! Entity reader: typed field tables for cached entity types.
//!
//! Each entity type registers its fields once through
//! [`Entity::descriptor`]. The resulting [`EntityDescriptor`] resolves the
//! surrogate key, exposes a named-value view of an entity for filtering,
//! and projects entities to and from tabular rows.

pub mod descriptor;
pub mod filter;
pub mod shape;
pub mod value;

pub use descriptor::{DescriptorBuilder, Entity, EntityDescriptor, FieldAccessor, SurrogateKey};
pub use filter::PropertyFilter;
pub use shape::shape_column_name;
pub use value::{FieldKind, FieldType, FieldValue};
