use super::descriptor::{Entity, EntityDescriptor, FieldAccessor};
use super::value::{FieldKind, FieldValue};
use crate::error::Result;

/// Field-name to expected-value filter for property queries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyFilter {
    conditions: Vec<(String, FieldValue)>,
}

impl PropertyFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: &str, value: impl Into<FieldValue>) -> Self {
        self.insert(field, value);
        self
    }

    /// Set the expected value for a field, replacing an earlier condition.
    pub fn insert(&mut self, field: &str, value: impl Into<FieldValue>) {
        let value = value.into();
        match self.conditions.iter_mut().find(|(name, _)| name == field) {
            Some(existing) => existing.1 = value,
            None => self.conditions.push((field.to_string(), value)),
        }
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.conditions.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Resolve every condition against the descriptor. Fails on the first
    /// field the entity type does not have.
    pub(crate) fn compile<'d, E: Entity>(
        &self,
        descriptor: &'d EntityDescriptor<E>,
        exact_match: bool,
    ) -> Result<CompiledFilter<'d, '_, E>> {
        let conditions = self
            .conditions
            .iter()
            .map(|(name, value)| Ok((descriptor.field(name)?, value)))
            .collect::<Result<Vec<_>>>()?;
        Ok(CompiledFilter {
            conditions,
            exact_match,
        })
    }
}

impl<K: Into<String>, V: Into<FieldValue>> FromIterator<(K, V)> for PropertyFilter {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut filter = PropertyFilter::new();
        for (k, v) in iter {
            filter.insert(&k.into(), v);
        }
        filter
    }
}

pub(crate) struct CompiledFilter<'d, 'f, E> {
    conditions: Vec<(&'d FieldAccessor<E>, &'f FieldValue)>,
    exact_match: bool,
}

impl<E: Entity> CompiledFilter<'_, '_, E> {
    pub(crate) fn matches(&self, entity: &E) -> bool {
        self.conditions.iter().all(|(field, expected)| {
            let actual = field.get(entity);
            if actual.is_null() || expected.is_null() {
                return actual.is_null() && expected.is_null();
            }
            if !self.exact_match && field.kind() == FieldKind::Text {
                actual.contains_ignore_case(expected)
            } else {
                actual == **expected
            }
        })
    }
}
