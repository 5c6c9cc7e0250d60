use std::any::type_name;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use super::shape::shape_column_name;
use super::value::{FieldKind, FieldType, FieldValue};
use crate::error::{CacheError, Result};

/// A value that can identify an entity inside a cache.
pub trait SurrogateKey:
    FieldType + Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static
{
}

impl<T> SurrogateKey for T where
    T: FieldType + Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static
{
}

/// A record type that can be held in an [`EntityCache`](crate::EntityCache).
///
/// The field table is declared once per type through [`Entity::descriptor`]
/// and validated when a cache is created.
///
/// ```ignore
/// impl Entity for Contact {
///     type Key = i64;
///     const NAME: &'static str = "Contact";
///
///     fn descriptor() -> DescriptorBuilder<Self> {
///         DescriptorBuilder::new()
///             .field("id", |c: &Contact| &c.id, |c, v| c.id = v)
///             .field("name", |c: &Contact| &c.name, |c, v| c.name = v)
///     }
/// }
/// ```
pub trait Entity: Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static {
    type Key: SurrogateKey;

    /// Resource name, used for remote endpoints and default file names.
    const NAME: &'static str;

    fn descriptor() -> DescriptorBuilder<Self>;
}

type Getter<E> = Box<dyn Fn(&E) -> FieldValue + Send + Sync>;
type Setter<E> = Box<dyn Fn(&mut E, FieldValue) -> std::result::Result<(), String> + Send + Sync>;

/// A named, typed accessor pair for one entity field.
pub struct FieldAccessor<E> {
    name: String,
    kind: FieldKind,
    nullable: bool,
    rust_type: &'static str,
    getter: Getter<E>,
    setter: Setter<E>,
}

impl<E> FieldAccessor<E> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn get(&self, entity: &E) -> FieldValue {
        (self.getter)(entity)
    }

    pub fn set(&self, entity: &mut E, value: FieldValue) -> Result<()> {
        (self.setter)(entity, value).map_err(|reason| CacheError::InvalidValue {
            field: self.name.clone(),
            reason,
        })
    }
}

impl<E> fmt::Debug for FieldAccessor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldAccessor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("nullable", &self.nullable)
            .field("rust_type", &self.rust_type)
            .finish()
    }
}

/// Collects the field table of an entity type.
pub struct DescriptorBuilder<E> {
    fields: Vec<FieldAccessor<E>>,
    key_field: Option<String>,
}

impl<E> Default for DescriptorBuilder<E> {
    fn default() -> Self {
        Self {
            fields: Vec::new(),
            key_field: None,
        }
    }
}

impl<E: Entity> DescriptorBuilder<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a field with a typed getter and setter.
    pub fn field<T, G, S>(mut self, name: &str, get: G, set: S) -> Self
    where
        T: FieldType + 'static,
        G: Fn(&E) -> &T + Send + Sync + 'static,
        S: Fn(&mut E, T) + Send + Sync + 'static,
    {
        self.fields.push(FieldAccessor {
            name: name.to_string(),
            kind: T::KIND,
            nullable: T::NULLABLE,
            rust_type: type_name::<T>(),
            getter: Box::new(move |e| get(e).to_value()),
            setter: Box::new(move |e, v| {
                set(e, T::from_value(v)?);
                Ok(())
            }),
        });
        self
    }

    /// Pin the surrogate key to a named field instead of discovering it by type.
    pub fn key_field(mut self, name: &str) -> Self {
        self.key_field = Some(name.to_string());
        self
    }

    pub fn build(self) -> Result<EntityDescriptor<E>> {
        let mut index = HashMap::with_capacity(self.fields.len());
        for (i, field) in self.fields.iter().enumerate() {
            if index.insert(field.name.clone(), i).is_some() {
                return Err(CacheError::DuplicateField {
                    entity: E::NAME,
                    field: field.name.clone(),
                });
            }
        }

        let key_type = type_name::<E::Key>();
        let key_index = match self.key_field {
            Some(ref name) => {
                let i = *index.get(name).ok_or_else(|| CacheError::KeyResolution {
                    entity: E::NAME,
                    reason: format!("key field '{}' is not a registered field", name),
                })?;
                if self.fields[i].rust_type != key_type {
                    return Err(CacheError::KeyResolution {
                        entity: E::NAME,
                        reason: format!(
                            "key field '{}' has type {}, expected {}",
                            name, self.fields[i].rust_type, key_type
                        ),
                    });
                }
                i
            }
            None => {
                let candidates: Vec<usize> = self
                    .fields
                    .iter()
                    .enumerate()
                    .filter(|(_, f)| f.rust_type == key_type)
                    .map(|(i, _)| i)
                    .collect();
                match candidates.as_slice() {
                    [i] => *i,
                    [] => {
                        return Err(CacheError::KeyResolution {
                            entity: E::NAME,
                            reason: format!("no field of type {}", key_type),
                        })
                    }
                    _ => {
                        return Err(CacheError::KeyResolution {
                            entity: E::NAME,
                            reason: format!(
                                "{} fields of type {}; pin one with key_field()",
                                candidates.len(),
                                key_type
                            ),
                        })
                    }
                }
            }
        };

        debug!(
            entity = E::NAME,
            fields = self.fields.len(),
            key = %self.fields[key_index].name,
            "Entity descriptor built"
        );

        Ok(EntityDescriptor {
            fields: self.fields,
            index,
            key_index,
        })
    }
}

/// Validated field table of an entity type.
pub struct EntityDescriptor<E> {
    fields: Vec<FieldAccessor<E>>,
    index: HashMap<String, usize>,
    key_index: usize,
}

impl<E: Entity> EntityDescriptor<E> {
    pub fn entity_name(&self) -> &'static str {
        E::NAME
    }

    pub fn fields(&self) -> &[FieldAccessor<E>] {
        &self.fields
    }

    pub fn key_field(&self) -> &FieldAccessor<E> {
        &self.fields[self.key_index]
    }

    pub fn field(&self, name: &str) -> Result<&FieldAccessor<E>> {
        self.index
            .get(name)
            .map(|&i| &self.fields[i])
            .ok_or_else(|| CacheError::UnknownField {
                entity: E::NAME,
                field: name.to_string(),
            })
    }

    /// Extract the surrogate key of an entity.
    pub fn key_of(&self, entity: &E) -> Result<E::Key> {
        let field = self.key_field();
        E::Key::from_value(field.get(entity)).map_err(|reason| CacheError::KeyResolution {
            entity: E::NAME,
            reason: format!("field '{}': {}", field.name, reason),
        })
    }

    /// Named-value view of an entity, in registration order.
    pub fn read<'a>(&'a self, entity: &E) -> Vec<(&'a str, FieldValue)> {
        self.fields
            .iter()
            .map(|f| (f.name.as_str(), f.get(entity)))
            .collect()
    }

    /// Parse text into a value of the named field's type.
    pub fn parse_value(&self, name: &str, text: &str) -> Result<FieldValue> {
        let field = self.field(name)?;
        let mut scratch = E::default();
        field.set(&mut scratch, FieldValue::Text(text.to_string()))?;
        Ok(field.get(&scratch))
    }

    pub fn column_names(&self, shape: bool) -> Vec<String> {
        self.fields
            .iter()
            .map(|f| column_name(&f.name, shape))
            .collect()
    }

    pub fn to_row(&self, entity: &E) -> Vec<String> {
        self.fields.iter().map(|f| f.get(entity).to_text()).collect()
    }

    /// Build an entity from one tabular row. Columns are matched to fields
    /// by header; fields without a column keep their default value.
    pub fn from_row(&self, headers: &[String], row: &[String], shape: bool) -> Result<E> {
        let mut entity = E::default();
        for (header, cell) in headers.iter().zip(row) {
            let field = self
                .fields
                .iter()
                .find(|f| column_name(&f.name, shape) == *header)
                .ok_or_else(|| CacheError::UnknownField {
                    entity: E::NAME,
                    field: header.clone(),
                })?;
            // Cells carry text; empty cells on nullable fields are null.
            let value = if cell.is_empty() && field.nullable {
                FieldValue::Null
            } else {
                FieldValue::Text(cell.clone())
            };
            field.set(&mut entity, value)?;
        }
        Ok(entity)
    }
}

impl<E> fmt::Debug for EntityDescriptor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityDescriptor")
            .field("fields", &self.fields)
            .field("key_index", &self.key_index)
            .finish()
    }
}

fn column_name(name: &str, shape: bool) -> String {
    if shape {
        shape_column_name(name)
    } else {
        name.to_string()
    }
}
