//! Entity handles and the directory that tracks where they live
//!
//! Buckets only reference entities; the directory owns the back-reference
//! from each entity to its `(bucket, slot)` location. The repository reports
//! every relocation to it synchronously, before touching the next slot.

use crate::arena::BucketArena;
use crate::bucket::SlotLocation;
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU64;

/// Opaque identity of an entity stored in a bucket slot
///
/// The zero value is reserved for vacant slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityHandle(NonZeroU64);

impl EntityHandle {
    /// Returns `None` for zero
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(EntityHandle)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// Collaborator notified of every entity move
pub trait EntityDirectory {
    /// Record that `entity` now lives at `location`
    fn set_location(&mut self, entity: EntityHandle, location: SlotLocation);

    /// `entity` left the repository
    fn released(&mut self, _entity: EntityHandle) {}

    /// Relocation propagation hook
    ///
    /// Called right after `set_location` for a moved entity, with mutable
    /// access to bucket storage so relation-derived field data can be
    /// refreshed before the repository continues.
    fn on_relocate(
        &mut self,
        _entity: EntityHandle,
        _location: SlotLocation,
        _buckets: &mut BucketArena,
    ) {
    }
}

/// Hash map directory
#[derive(Debug, Default, Clone)]
pub struct LocationTable {
    locations: AHashMap<EntityHandle, SlotLocation>,
}

impl LocationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn location(&self, entity: EntityHandle) -> Option<SlotLocation> {
        self.locations.get(&entity).copied()
    }

    pub fn contains(&self, entity: EntityHandle) -> bool {
        self.locations.contains_key(&entity)
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityHandle, SlotLocation)> + '_ {
        self.locations.iter().map(|(e, l)| (*e, *l))
    }
}

impl EntityDirectory for LocationTable {
    fn set_location(&mut self, entity: EntityHandle, location: SlotLocation) {
        self.locations.insert(entity, location);
    }

    fn released(&mut self, entity: EntityHandle) {
        self.locations.remove(&entity);
    }
}
