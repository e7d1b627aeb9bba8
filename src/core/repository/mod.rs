//! Bucket repository
//!
//! Owns every bucket of every entity kind. Per kind it keeps one key-ordered
//! list with an entry per bucket; buckets sharing categories form a family
//! of consecutive entries. Families stay packed: only the family's last
//! bucket may have free slots.
//!
//! All relocations are reported to an [`EntityDirectory`] as they happen.

mod resort;

#[cfg(test)]
mod tests;

pub use resort::ResortSummary;

use crate::arena::BucketArena;
use crate::bucket::{Bucket, BucketId, SlotLocation};
use crate::config::StoreConfig;
use crate::directory::{EntityDirectory, EntityHandle};
use crate::error::{BucketError, Result};
use crate::field::FieldDescriptor;
use crate::key::{CategoryKey, CategoryOrdinal, EntityKind, FamilySeq};
use crate::layout::FieldMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Counts across all kinds
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositoryStats {
    pub kinds: usize,
    pub buckets: usize,
    pub families: usize,
    pub live_entities: usize,
    pub allocated_slots: usize,
    pub allocated_bytes: usize,
}

pub struct BucketRepository {
    bucket_capacity: usize,
    buckets: Vec<Vec<BucketId>>,
    arena: BucketArena,
    nil_bucket: Option<BucketId>,
}

impl BucketRepository {
    /// Create an empty repository
    ///
    /// # Panics
    ///
    /// Panics if `bucket_capacity` is 0.
    pub fn new(bucket_capacity: usize, kind_count: usize) -> Self {
        assert!(bucket_capacity > 0, "Bucket capacity must be greater than 0");

        BucketRepository {
            bucket_capacity,
            buckets: vec![Vec::new(); kind_count],
            arena: BucketArena::new(),
            nil_bucket: None,
        }
    }

    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(config.bucket_capacity, config.kind_count))
    }

    pub fn bucket_capacity(&self) -> usize {
        self.bucket_capacity
    }

    pub fn kind_count(&self) -> usize {
        self.buckets.len()
    }

    fn check_kind(&self, kind: EntityKind) -> Result<()> {
        if kind.index() >= self.buckets.len() {
            return Err(BucketError::UnknownKind(kind));
        }
        Ok(())
    }

    /// Buckets of `kind` in key order
    pub fn buckets(&self, kind: EntityKind) -> Result<&[BucketId]> {
        self.check_kind(kind)?;
        Ok(&self.buckets[kind.index()])
    }

    pub fn bucket(&self, id: BucketId) -> Result<&Bucket> {
        self.arena.get(id)
    }

    pub fn bucket_mut(&mut self, id: BucketId) -> Result<&mut Bucket> {
        self.arena.get_mut(id)
    }

    pub fn arena(&self) -> &BucketArena {
        &self.arena
    }

    /// Entity stored at `location`, if the slot is live
    pub fn entity_at(&self, location: SlotLocation) -> Result<EntityHandle> {
        let bucket = self.arena.get(location.bucket)?;
        if location.slot >= bucket.size() {
            return Err(BucketError::SlotOutOfRange {
                id: location.bucket,
                slot: location.slot,
                size: bucket.size(),
            });
        }
        bucket.handle(location.slot).ok_or(BucketError::VacantSlot {
            id: location.bucket,
            slot: location.slot,
        })
    }

    /// Shared capacity-0 bucket for entities of no kind
    pub fn nil_bucket(&mut self) -> Result<BucketId> {
        if let Some(id) = self.nil_bucket {
            return Ok(id);
        }

        let id = self
            .arena
            .allocate(CategoryKey::nil(), 0, Arc::new(FieldMap::empty()))?;
        debug!("Declared nil bucket {}", id);
        self.nil_bucket = Some(id);
        Ok(id)
    }

    /// Index of the first bucket of `kind` whose key is not below `key`
    fn lower_bound(&self, kind: EntityKind, key: &CategoryKey) -> Result<usize> {
        let list = &self.buckets[kind.index()];
        let (mut lo, mut hi) = (0, list.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.arena.get(list[mid])?.key() < key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    /// Last bucket of the family `bucket` belongs to
    pub fn family_last(&self, bucket: BucketId) -> Result<BucketId> {
        let first = self.arena.get(bucket)?.first_in_family();
        Ok(self.arena.get(first)?.last_in_family())
    }

    /// Buckets of the family `bucket` belongs to, first to last
    pub fn family(&self, bucket: BucketId) -> Result<&[BucketId]> {
        let b = self.arena.get(bucket)?;
        let kind = b.kind();
        self.check_kind(kind)?;

        let first = b.first_in_family();
        let last = self.arena.get(first)?.last_in_family();
        let list = &self.buckets[kind.index()];

        let start = self.lower_bound(kind, self.arena.get(first)?.key())?;
        let end = list[start..]
            .iter()
            .position(|id| *id == last)
            .map(|p| start + p + 1)
            .ok_or_else(|| {
                BucketError::MalformedFamily(format!("last bucket {} not listed", last))
            })?;
        Ok(&list[start..end])
    }

    /// Find or create a bucket with room for one more entity
    ///
    /// `ordinals` must be strictly increasing and already include every
    /// superset category. `fields` is only consulted when the family does not
    /// exist yet; its resolved layout is then shared by the whole family.
    ///
    /// An existing family hands out its last bucket whenever it has room,
    /// including a declared bucket that is still empty. Repeated declares
    /// without an insert in between therefore return the same bucket instead
    /// of failing.
    ///
    /// # Errors
    ///
    /// - `IncompatibleFieldDimension` if the family's layout cannot be resolved
    /// - `FamilyOverflow` if the family sequence would wrap
    /// - `ResourceExhaustion` if the bucket block cannot be allocated
    pub fn declare_bucket(
        &mut self,
        kind: EntityKind,
        ordinals: &[CategoryOrdinal],
        fields: &[FieldDescriptor],
    ) -> Result<BucketId> {
        self.check_kind(kind)?;
        let key = CategoryKey::new(kind, ordinals)?;
        let position = self.lower_bound(kind, &key.search_bound())?;

        let last = match position.checked_sub(1) {
            Some(prev) => {
                let id = self.buckets[kind.index()][prev];
                self.arena
                    .get(id)?
                    .key()
                    .same_family(&key)
                    .then_some(id)
            }
            None => None,
        };

        let (new_key, field_map, first) = match last {
            None => {
                let map = FieldMap::resolve(kind, ordinals, fields, self.bucket_capacity)?;
                (key, Arc::new(map), None)
            }
            Some(last_id) => {
                let last = self.arena.get(last_id)?;
                if !last.is_full() {
                    return Ok(last_id);
                }

                let family = last
                    .key()
                    .family()
                    .checked_add(1)
                    .filter(|seq| *seq < FamilySeq::MAX)
                    .ok_or(BucketError::FamilyOverflow { kind })?;

                (
                    last.key().with_family(family),
                    Arc::clone(last.field_map()),
                    Some(last.first_in_family()),
                )
            }
        };

        self.buckets[kind.index()]
            .try_reserve(1)
            .map_err(|_| BucketError::ResourceExhaustion {
                bytes: std::mem::size_of::<BucketId>(),
            })?;

        let id = self
            .arena
            .allocate(new_key, self.bucket_capacity, field_map)?;
        let first = first.unwrap_or(id);
        self.arena.get_mut(id)?.set_first_in_family(first);
        self.arena.get_mut(first)?.set_last_in_family(id);
        self.buckets[kind.index()].insert(position, id);

        debug!(
            "Declared bucket {} with key {} (family head {})",
            id,
            self.arena.get(id)?.key(),
            first
        );

        Ok(id)
    }

    /// Destroy the empty last bucket of a family
    ///
    /// # Errors
    ///
    /// - `BucketNotEmpty` if the bucket still holds entities
    /// - `NotLastInFamily` if it is not the family's current last bucket
    /// - `EmptyFamilyTail` if the bucket that would become last is empty
    pub fn destroy_bucket(&mut self, id: BucketId) -> Result<()> {
        let bucket = self.arena.get(id)?;
        let kind = bucket.kind();
        self.check_kind(kind)?;

        if !bucket.is_empty() {
            return Err(BucketError::BucketNotEmpty {
                id,
                size: bucket.size(),
            });
        }

        let first = bucket.first_in_family();
        if self.arena.get(first)?.last_in_family() != id {
            return Err(BucketError::NotLastInFamily(id));
        }

        let position = self.lower_bound(kind, bucket.key())?;
        if self.buckets[kind.index()].get(position) != Some(&id) {
            return Err(BucketError::MalformedFamily(format!(
                "bucket {} missing from the ordered list of kind {}",
                id, kind
            )));
        }

        let new_last = if first != id {
            let prev = position.checked_sub(1).ok_or_else(|| {
                BucketError::MalformedFamily(format!("bucket {} has no predecessor", id))
            })?;
            let prev_id = self.buckets[kind.index()][prev];
            if self.arena.get(prev_id)?.is_empty() {
                return Err(BucketError::EmptyFamilyTail(prev_id));
            }
            Some(prev_id)
        } else {
            None
        };

        self.buckets[kind.index()].remove(position);
        if let Some(prev_id) = new_last {
            self.arena.get_mut(first)?.set_last_in_family(prev_id);
        }
        self.arena.release(id)?;

        debug!("Destroyed bucket {} (kind {})", id, kind);
        Ok(())
    }

    /// Copy all field data between two slots
    pub fn copy_fields(&mut self, dst: SlotLocation, src: SlotLocation) -> Result<()> {
        self.arena.copy_slot(dst, src)
    }

    pub fn zero_fields(&mut self, location: SlotLocation) -> Result<()> {
        self.arena.zero_slot(location)
    }

    /// Advance every multi-state field by one state
    ///
    /// Per family, state `k` now views the column previously reached as
    /// state `k - 1`, and the oldest column becomes the new state 0. Only
    /// the families' layouts change; no field bytes move and no entity
    /// relocates. Returns the number of buckets whose layout was rotated.
    pub fn update_field_data_states(&mut self) -> Result<usize> {
        let mut rotated = 0;
        for list in &self.buckets {
            let mut family: Option<(BucketId, Arc<FieldMap>)> = None;
            for id in list {
                let bucket = self.arena.get(*id)?;
                if !bucket.field_map().has_multi_state() {
                    continue;
                }

                let head = bucket.first_in_family();
                let map = match &family {
                    Some((first, map)) if *first == head => Arc::clone(map),
                    _ => {
                        let map = Arc::new(bucket.field_map().rotate_states());
                        family = Some((head, Arc::clone(&map)));
                        map
                    }
                };

                self.arena.get_mut(*id)?.set_field_map(map);
                rotated += 1;
            }
        }

        debug!("Rotated field states of {} buckets", rotated);
        Ok(rotated)
    }

    /// Move an entity's data from `from` to `to` and report the move
    fn relocate<D>(
        &mut self,
        entity: EntityHandle,
        to: SlotLocation,
        from: SlotLocation,
        directory: &mut D,
    ) -> Result<()>
    where
        D: EntityDirectory + ?Sized,
    {
        self.arena.copy_slot(to, from)?;
        self.arena
            .get_mut(to.bucket)?
            .set_slot_handle(to.slot, Some(entity))?;
        directory.set_location(entity, to);
        trace!("Relocated {} from {} to {}", entity, from, to);
        directory.on_relocate(entity, to, &mut self.arena);
        Ok(())
    }

    /// Place `entity` in a bucket of the family named by `ordinals`
    ///
    /// The new slot's fields are zeroed.
    pub fn insert_entity<D>(
        &mut self,
        kind: EntityKind,
        ordinals: &[CategoryOrdinal],
        fields: &[FieldDescriptor],
        entity: EntityHandle,
        directory: &mut D,
    ) -> Result<SlotLocation>
    where
        D: EntityDirectory + ?Sized,
    {
        let id = self.declare_bucket(kind, ordinals, fields)?;
        let slot = self.arena.get_mut(id)?.push(entity)?;
        let location = SlotLocation::new(id, slot);
        directory.set_location(entity, location);
        trace!("Inserted {} at {}", entity, location);
        Ok(location)
    }

    /// Swap-remove the entity at `location`
    ///
    /// The family's last live entity fills the hole, has its location
    /// updated and its relocation reported once. A last bucket left empty is
    /// destroyed.
    pub fn remove_entity<D>(&mut self, location: SlotLocation, directory: &mut D) -> Result<EntityHandle>
    where
        D: EntityDirectory + ?Sized,
    {
        let removed = self.remove_slot(location, directory)?;
        directory.released(removed);
        Ok(removed)
    }

    fn remove_slot<D>(&mut self, location: SlotLocation, directory: &mut D) -> Result<EntityHandle>
    where
        D: EntityDirectory + ?Sized,
    {
        let removed = self.entity_at(location)?;

        let mut last_id = self.family_last(location.bucket)?;
        if last_id != location.bucket && self.arena.get(last_id)?.is_empty() {
            // A declared bucket that never received an entity
            self.destroy_bucket(last_id)?;
            last_id = self.family_last(location.bucket)?;
        }

        let last_size = self.arena.get(last_id)?.size();
        let tail = SlotLocation::new(last_id, last_size - 1);

        if tail != location {
            let moved = self.entity_at(tail)?;
            self.relocate(moved, location, tail, directory)?;
        }

        let last = self.arena.get_mut(last_id)?;
        last.decrement_size();
        last.set_slot_handle(tail.slot, None)?;
        last.zero_slot(tail.slot)?;
        let emptied = last.is_empty();

        trace!("Removed {} from {}", removed, location);

        if emptied {
            self.destroy_bucket(last_id)?;
        }

        Ok(removed)
    }

    /// Move the entity at `from` into the family named by `ordinals`
    ///
    /// Field data is carried over and the source slot swap-removed. Returns
    /// `from` unchanged when the entity already belongs to that family.
    pub fn move_entity<D>(
        &mut self,
        from: SlotLocation,
        ordinals: &[CategoryOrdinal],
        fields: &[FieldDescriptor],
        directory: &mut D,
    ) -> Result<SlotLocation>
    where
        D: EntityDirectory + ?Sized,
    {
        let entity = self.entity_at(from)?;
        let source = self.arena.get(from.bucket)?;
        if source.key().ordinals() == ordinals {
            return Ok(from);
        }
        let kind = source.kind();

        let to = self.insert_entity(kind, ordinals, fields, entity, directory)?;
        self.arena.copy_slot(to, from)?;
        directory.on_relocate(entity, to, &mut self.arena);

        // The source slot still names `entity`; the swap-remove overwrites it
        // without releasing the entity.
        self.remove_slot(from, directory)?;

        debug!("Moved {} from {} to {}", entity, from, to);
        Ok(to)
    }

    pub fn stats(&self) -> RepositoryStats {
        let mut stats = RepositoryStats {
            kinds: self.buckets.len(),
            ..RepositoryStats::default()
        };

        for list in &self.buckets {
            for id in list {
                let Ok(bucket) = self.arena.get(*id) else {
                    continue;
                };
                stats.buckets += 1;
                if bucket.first_in_family() == *id {
                    stats.families += 1;
                }
                stats.live_entities += bucket.size();
                stats.allocated_slots += bucket.capacity();
                stats.allocated_bytes += bucket.allocated_bytes();
            }
        }

        stats
    }

    /// Check ordering, packing, family links and slot handles
    ///
    /// # Errors
    ///
    /// Returns `MalformedFamily` describing the first violation found.
    pub fn validate(&self) -> Result<()> {
        let malformed = |msg: String| Err(BucketError::MalformedFamily(msg));

        for (rank, list) in self.buckets.iter().enumerate() {
            let mut family_start = 0;

            for (pos, id) in list.iter().enumerate() {
                let bucket = self.arena.get(*id)?;

                if bucket.kind().index() != rank {
                    return malformed(format!("bucket {} listed under kind {}", id, rank));
                }

                if pos > 0 {
                    let prev = self.arena.get(list[pos - 1])?;
                    if prev.key() >= bucket.key() {
                        return malformed(format!(
                            "keys out of order: {} before {}",
                            prev.key(),
                            bucket.key()
                        ));
                    }
                    if !prev.key().same_family(bucket.key()) {
                        family_start = pos;
                    }
                }

                let first = list[family_start];
                if bucket.first_in_family() != first {
                    return malformed(format!(
                        "bucket {} points at {} instead of family head {}",
                        id,
                        bucket.first_in_family(),
                        first
                    ));
                }
                if pos == family_start && bucket.key().family() != 0 {
                    return malformed(format!("family head {} has sequence {}", id, bucket.key()));
                }

                let is_last = list
                    .get(pos + 1)
                    .map(|next| {
                        self.arena
                            .get(*next)
                            .map(|n| !n.key().same_family(bucket.key()))
                            .unwrap_or(true)
                    })
                    .unwrap_or(true);

                if is_last {
                    if self.arena.get(first)?.last_in_family() != *id {
                        return malformed(format!("family head {} does not point at tail {}", first, id));
                    }
                } else if !bucket.is_full() {
                    return malformed(format!(
                        "bucket {} is not full ({}/{}) but is not its family's last",
                        id,
                        bucket.size(),
                        bucket.capacity()
                    ));
                }

                for slot in 0..bucket.capacity() {
                    let live = slot < bucket.size();
                    if bucket.handle(slot).is_some() != live {
                        return malformed(format!("bucket {} slot {} handle mismatch", id, slot));
                    }
                }
            }
        }

        Ok(())
    }
}

impl Drop for BucketRepository {
    fn drop(&mut self) {
        let buckets = self.arena.len();
        if buckets > 0 {
            debug!("Releasing {} buckets", buckets);
        }
        for list in self.buckets.iter_mut().rev() {
            list.clear();
        }
        self.nil_bucket = None;
        self.arena.clear();
    }
}

impl std::fmt::Debug for BucketRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketRepository")
            .field("bucket_capacity", &self.bucket_capacity)
            .field("kinds", &self.buckets.len())
            .field("buckets", &self.arena.len())
            .finish()
    }
}
