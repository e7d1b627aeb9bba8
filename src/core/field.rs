//! Field descriptors and their per-category restrictions
//!
//! A field only occupies space in buckets whose categories restrict it. A
//! restriction binds a `(kind, category)` pair to the field's dimensions; the
//! per-entity slot size is the scalar size times the product of those
//! dimensions.

use crate::key::{CategoryOrdinal, EntityKind};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRestriction {
    pub kind: EntityKind,
    pub category: CategoryOrdinal,
    /// Extent of each field rank; empty for scalar fields
    pub dimensions: Vec<u32>,
}

impl FieldRestriction {
    pub fn new(kind: EntityKind, category: CategoryOrdinal, dimensions: &[u32]) -> Self {
        FieldRestriction {
            kind,
            category,
            dimensions: dimensions.to_vec(),
        }
    }

    /// Number of scalars stored per entity, `None` on overflow
    pub fn scalars_per_entity(&self) -> Option<usize> {
        self.dimensions
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d as usize))
    }

    fn sort_key(&self) -> (EntityKind, CategoryOrdinal) {
        (self.kind, self.category)
    }
}

/// A registered field: name, scalar byte size, state count and restriction list
///
/// Restrictions are kept sorted by `(kind, category)` so layout resolution
/// can binary-search them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    name: String,
    scalar_size: usize,
    #[serde(default = "single_state")]
    states: usize,
    restrictions: Vec<FieldRestriction>,
}

fn single_state() -> usize {
    1
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, scalar_size: usize) -> Self {
        FieldDescriptor {
            name: name.into(),
            scalar_size,
            states: 1,
            restrictions: Vec::new(),
        }
    }

    /// Shorthand for a field of `T` scalars
    pub fn of<T>(name: impl Into<String>) -> Self {
        Self::new(name, std::mem::size_of::<T>())
    }

    /// Keep `states` generations of this field's data
    ///
    /// State 0 is the newest; see `BucketRepository::update_field_data_states`.
    pub fn with_states(mut self, states: usize) -> Self {
        self.states = states;
        self
    }

    /// Restrict this field on `category` entities of `kind`
    ///
    /// A later restriction for the same `(kind, category)` replaces the
    /// earlier one.
    pub fn restrict(mut self, kind: EntityKind, category: CategoryOrdinal, dimensions: &[u32]) -> Self {
        let restriction = FieldRestriction::new(kind, category, dimensions);
        match self
            .restrictions
            .binary_search_by_key(&restriction.sort_key(), FieldRestriction::sort_key)
        {
            Ok(idx) => self.restrictions[idx] = restriction,
            Err(idx) => self.restrictions.insert(idx, restriction),
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scalar_size(&self) -> usize {
        self.scalar_size
    }

    pub fn states(&self) -> usize {
        self.states
    }

    /// All restrictions, ordered by `(kind, category)`
    pub fn restrictions(&self) -> &[FieldRestriction] {
        &self.restrictions
    }

    pub fn restriction_for(
        &self,
        kind: EntityKind,
        category: CategoryOrdinal,
    ) -> Option<&FieldRestriction> {
        self.restrictions
            .binary_search_by_key(&(kind, category), FieldRestriction::sort_key)
            .ok()
            .map(|idx| &self.restrictions[idx])
    }
}
