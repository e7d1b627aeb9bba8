//! Fixed-capacity columnar bucket
//!
//! A bucket owns one 16-byte aligned block laid out by its family's
//! [`FieldMap`]: the entity handle array followed by one contiguous column
//! per field. Slots `[0, size)` hold live entities; slots `[size, capacity)`
//! are zeroed and carry no handle.
//!
//! Buckets know nothing about what the field bytes mean. They also carry the
//! family links: every bucket points at the first bucket of its family, and
//! the first bucket additionally points at the current last one.

use crate::directory::EntityHandle;
use crate::error::{BucketError, Result};
use crate::key::{CategoryKey, EntityKind};
use crate::layout::{FieldMap, HANDLE_BYTES};
use bytemuck::Pod;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Stable arena index of a bucket
///
/// The generation changes whenever the arena slot is reused, so ids of
/// destroyed buckets are rejected instead of aliasing a newer bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BucketId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl BucketId {
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// Where an entity's data currently lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotLocation {
    pub bucket: BucketId,
    pub slot: usize,
}

impl SlotLocation {
    pub fn new(bucket: BucketId, slot: usize) -> Self {
        SlotLocation { bucket, slot }
    }
}

impl fmt::Display for SlotLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.bucket, self.slot)
    }
}

pub struct Bucket {
    id: BucketId,
    key: CategoryKey,
    capacity: usize,
    size: usize,
    field_map: Arc<FieldMap>,
    /// u128 words keep the block 16-byte aligned
    block: Vec<u128>,
    first_in_family: BucketId,
    last_in_family: BucketId,
}

impl Bucket {
    /// Allocate a zeroed bucket block
    ///
    /// # Errors
    ///
    /// Returns `ResourceExhaustion` if the block cannot be allocated.
    pub(crate) fn create(
        id: BucketId,
        key: CategoryKey,
        capacity: usize,
        field_map: Arc<FieldMap>,
    ) -> Result<Self> {
        let bytes = field_map.total_bytes();
        let words = bytes.div_ceil(std::mem::size_of::<u128>());

        let mut block: Vec<u128> = Vec::new();
        block
            .try_reserve_exact(words)
            .map_err(|_| BucketError::ResourceExhaustion { bytes })?;
        block.resize(words, 0);

        Ok(Bucket {
            id,
            key,
            capacity,
            size: 0,
            field_map,
            block,
            first_in_family: id,
            last_in_family: id,
        })
    }

    pub fn id(&self) -> BucketId {
        self.id
    }

    pub fn key(&self) -> &CategoryKey {
        &self.key
    }

    pub fn kind(&self) -> EntityKind {
        self.key.kind()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn is_full(&self) -> bool {
        self.size >= self.capacity
    }

    pub fn field_map(&self) -> &Arc<FieldMap> {
        &self.field_map
    }

    /// Swap in a layout over the same block, as produced by state rotation
    pub(crate) fn set_field_map(&mut self, field_map: Arc<FieldMap>) {
        debug_assert_eq!(field_map.total_bytes(), self.field_map.total_bytes());
        self.field_map = field_map;
    }

    /// Bytes held by the block
    pub fn allocated_bytes(&self) -> usize {
        self.block.len() * std::mem::size_of::<u128>()
    }

    fn bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.block)
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut self.block)
    }

    fn check_slot(&self, slot: usize) -> Result<()> {
        if slot >= self.capacity {
            return Err(BucketError::SlotOutOfRange {
                id: self.id,
                slot,
                size: self.capacity,
            });
        }
        Ok(())
    }

    // ---- handles ----

    /// Entity stored in `slot`, if any
    pub fn handle(&self, slot: usize) -> Option<EntityHandle> {
        if slot >= self.capacity {
            return None;
        }
        let start = slot * HANDLE_BYTES;
        let mut raw = [0u8; HANDLE_BYTES];
        raw.copy_from_slice(&self.bytes()[start..start + HANDLE_BYTES]);
        EntityHandle::new(u64::from_ne_bytes(raw))
    }

    /// Live entities in slot order
    pub fn handles(&self) -> impl Iterator<Item = EntityHandle> + '_ {
        (0..self.size).filter_map(move |slot| self.handle(slot))
    }

    pub(crate) fn set_slot_handle(&mut self, slot: usize, entity: Option<EntityHandle>) -> Result<()> {
        self.check_slot(slot)?;
        let raw = entity.map(EntityHandle::get).unwrap_or(0);
        let start = slot * HANDLE_BYTES;
        self.bytes_mut()[start..start + HANDLE_BYTES].copy_from_slice(&raw.to_ne_bytes());
        Ok(())
    }

    /// Claim the next free slot for `entity`
    pub(crate) fn push(&mut self, entity: EntityHandle) -> Result<usize> {
        let slot = self.size;
        self.check_slot(slot)?;
        self.zero_slot(slot)?;
        self.set_slot_handle(slot, Some(entity))?;
        self.size += 1;
        Ok(slot)
    }

    pub(crate) fn decrement_size(&mut self) {
        debug_assert!(self.size > 0);
        self.size = self.size.saturating_sub(1);
    }

    // ---- field data ----

    /// Zero every field of `slot`
    pub fn zero_slot(&mut self, slot: usize) -> Result<()> {
        self.check_slot(slot)?;
        let map = Arc::clone(&self.field_map);
        let bytes = self.bytes_mut();
        for field in map.slots() {
            bytes[field.range(slot)].fill(0);
        }
        Ok(())
    }

    /// Copy every field state of `src[src_slot]` into `self[dst_slot]`
    ///
    /// Fields or states absent from the source layout are zeroed. When the layouts
    /// disagree on a field's size the common prefix is copied and the rest
    /// zeroed.
    pub fn copy_slot(&mut self, dst_slot: usize, src: &Bucket, src_slot: usize) -> Result<()> {
        self.check_slot(dst_slot)?;
        src.check_slot(src_slot)?;

        let map = Arc::clone(&self.field_map);
        let src_bytes = src.bytes();
        let dst_bytes = self.bytes_mut();

        for ordinal in 0..map.len() {
            for state in 0..map.states(ordinal) {
                let Some(field) = map.field_state(ordinal, state) else {
                    continue;
                };
                let dst_range = field.range(dst_slot);
                let copied = match src.field_map.field_state(ordinal, state) {
                    Some(src_field) => {
                        let n = src_field.size.min(field.size);
                        let from = src_field.range(src_slot).start;
                        dst_bytes[dst_range.start..dst_range.start + n]
                            .copy_from_slice(&src_bytes[from..from + n]);
                        n
                    }
                    None => 0,
                };
                dst_bytes[dst_range.start + copied..dst_range.end].fill(0);
            }
        }
        Ok(())
    }

    /// Copy every field of `src_slot` into `dst_slot` of this bucket
    pub fn copy_slot_within(&mut self, dst_slot: usize, src_slot: usize) -> Result<()> {
        self.check_slot(dst_slot)?;
        self.check_slot(src_slot)?;
        if dst_slot == src_slot {
            return Ok(());
        }

        let map = Arc::clone(&self.field_map);
        let bytes = self.bytes_mut();
        for field in map.slots() {
            bytes.copy_within(field.range(src_slot), field.range(dst_slot).start);
        }
        Ok(())
    }

    /// Raw bytes of one field for one slot
    pub fn field_bytes(&self, field: usize, slot: usize) -> Result<&[u8]> {
        self.state_bytes(field, 0, slot)
    }

    pub fn field_bytes_mut(&mut self, field: usize, slot: usize) -> Result<&mut [u8]> {
        self.state_bytes_mut(field, 0, slot)
    }

    fn state_range(&self, field: usize, state: usize, slot: usize) -> Result<std::ops::Range<usize>> {
        self.check_slot(slot)?;
        if field >= self.field_map.len() {
            return Err(BucketError::UnknownField(field));
        }
        let column = self
            .field_map
            .field_state(field, state)
            .ok_or(BucketError::UnknownFieldState { field, state })?;
        Ok(column.range(slot))
    }

    /// Raw bytes of one state of a field for one slot
    pub fn state_bytes(&self, field: usize, state: usize, slot: usize) -> Result<&[u8]> {
        let range = self.state_range(field, state, slot)?;
        Ok(&self.bytes()[range])
    }

    pub fn state_bytes_mut(&mut self, field: usize, state: usize, slot: usize) -> Result<&mut [u8]> {
        let range = self.state_range(field, state, slot)?;
        Ok(&mut self.bytes_mut()[range])
    }

    pub fn state_values<T: Pod>(&self, field: usize, state: usize, slot: usize) -> Result<&[T]> {
        bytemuck::try_cast_slice(self.state_bytes(field, state, slot)?).map_err(BucketError::FieldCast)
    }

    pub fn state_values_mut<T: Pod>(&mut self, field: usize, state: usize, slot: usize) -> Result<&mut [T]> {
        bytemuck::try_cast_slice_mut(self.state_bytes_mut(field, state, slot)?)
            .map_err(BucketError::FieldCast)
    }

    /// Typed view of one field for one slot
    pub fn slot_values<T: Pod>(&self, field: usize, slot: usize) -> Result<&[T]> {
        bytemuck::try_cast_slice(self.field_bytes(field, slot)?).map_err(BucketError::FieldCast)
    }

    pub fn slot_values_mut<T: Pod>(&mut self, field: usize, slot: usize) -> Result<&mut [T]> {
        bytemuck::try_cast_slice_mut(self.field_bytes_mut(field, slot)?)
            .map_err(BucketError::FieldCast)
    }

    /// Typed view of a field column over the live slots
    pub fn column<T: Pod>(&self, field: usize) -> Result<&[T]> {
        let slot = self
            .field_map
            .field(field)
            .ok_or(BucketError::UnknownField(field))?;
        let start = slot.offset;
        let end = start + slot.size * self.size;
        bytemuck::try_cast_slice(&self.bytes()[start..end]).map_err(BucketError::FieldCast)
    }

    pub fn column_mut<T: Pod>(&mut self, field: usize) -> Result<&mut [T]> {
        let slot = *self
            .field_map
            .field(field)
            .ok_or(BucketError::UnknownField(field))?;
        let start = slot.offset;
        let end = start + slot.size * self.size;
        bytemuck::try_cast_slice_mut(&mut self.bytes_mut()[start..end])
            .map_err(BucketError::FieldCast)
    }

    // ---- family links ----

    pub fn first_in_family(&self) -> BucketId {
        self.first_in_family
    }

    /// Only meaningful on the family's first bucket
    pub fn last_in_family(&self) -> BucketId {
        self.last_in_family
    }

    pub(crate) fn set_first_in_family(&mut self, first: BucketId) {
        self.first_in_family = first;
    }

    pub(crate) fn set_last_in_family(&mut self, last: BucketId) {
        self.last_in_family = last;
    }
}

impl fmt::Debug for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bucket")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("size", &self.size)
            .field("capacity", &self.capacity)
            .field("first_in_family", &self.first_in_family)
            .field("last_in_family", &self.last_in_family)
            .finish()
    }
}
