//! Bucket arena
//!
//! Buckets are stored by stable index instead of raw address. Family links,
//! the per-kind ordered lists and entity back-references all hold
//! [`BucketId`]s into this arena.

use crate::bucket::{Bucket, BucketId, SlotLocation};
use crate::error::{BucketError, Result};
use crate::key::CategoryKey;
use crate::layout::FieldMap;
use std::sync::Arc;

#[derive(Debug)]
struct ArenaEntry {
    generation: u32,
    bucket: Option<Bucket>,
}

#[derive(Debug, Default)]
pub struct BucketArena {
    entries: Vec<ArenaEntry>,
    free: Vec<u32>,
}

impl BucketArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live buckets
    pub fn len(&self) -> usize {
        self.entries.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: BucketId) -> Result<&Bucket> {
        self.entries
            .get(id.index())
            .filter(|entry| entry.generation == id.generation)
            .and_then(|entry| entry.bucket.as_ref())
            .ok_or(BucketError::StaleBucket(id))
    }

    pub fn get_mut(&mut self, id: BucketId) -> Result<&mut Bucket> {
        self.entries
            .get_mut(id.index())
            .filter(|entry| entry.generation == id.generation)
            .and_then(|entry| entry.bucket.as_mut())
            .ok_or(BucketError::StaleBucket(id))
    }

    pub fn contains(&self, id: BucketId) -> bool {
        self.get(id).is_ok()
    }

    /// Live buckets in arena order
    pub fn iter(&self) -> impl Iterator<Item = &Bucket> + '_ {
        self.entries.iter().filter_map(|entry| entry.bucket.as_ref())
    }

    pub(crate) fn allocate(
        &mut self,
        key: CategoryKey,
        capacity: usize,
        field_map: Arc<FieldMap>,
    ) -> Result<BucketId> {
        if let Some(index) = self.free.pop() {
            let entry = &mut self.entries[index as usize];
            let id = BucketId {
                index,
                generation: entry.generation,
            };
            match Bucket::create(id, key, capacity, field_map) {
                Ok(bucket) => {
                    entry.bucket = Some(bucket);
                    Ok(id)
                }
                Err(e) => {
                    self.free.push(index);
                    Err(e)
                }
            }
        } else {
            let index = u32::try_from(self.entries.len()).map_err(|_| {
                BucketError::ResourceExhaustion {
                    bytes: field_map.total_bytes(),
                }
            })?;
            self.entries
                .try_reserve(1)
                .map_err(|_| BucketError::ResourceExhaustion {
                    bytes: std::mem::size_of::<ArenaEntry>(),
                })?;

            let id = BucketId {
                index,
                generation: 0,
            };
            let bucket = Bucket::create(id, key, capacity, field_map)?;
            self.entries.push(ArenaEntry {
                generation: 0,
                bucket: Some(bucket),
            });
            Ok(id)
        }
    }

    /// Free an empty bucket
    ///
    /// # Errors
    ///
    /// Returns `BucketNotEmpty` if the bucket still holds entities.
    pub(crate) fn release(&mut self, id: BucketId) -> Result<Bucket> {
        let size = self.get(id)?.size();
        if size != 0 {
            return Err(BucketError::BucketNotEmpty { id, size });
        }

        let entry = &mut self.entries[id.index()];
        let bucket = entry.bucket.take().ok_or(BucketError::StaleBucket(id))?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(id.index);
        Ok(bucket)
    }

    /// Copy all field data of `src` into `dst`
    ///
    /// Handles and sizes are left untouched.
    pub fn copy_slot(&mut self, dst: SlotLocation, src: SlotLocation) -> Result<()> {
        if dst.bucket == src.bucket {
            return self.get_mut(dst.bucket)?.copy_slot_within(dst.slot, src.slot);
        }

        let (dst_bucket, src_bucket) = self.pair_mut(dst.bucket, src.bucket)?;
        dst_bucket.copy_slot(dst.slot, src_bucket, src.slot)
    }

    /// Zero all field data of a slot
    pub fn zero_slot(&mut self, location: SlotLocation) -> Result<()> {
        self.get_mut(location.bucket)?.zero_slot(location.slot)
    }

    fn pair_mut(&mut self, a: BucketId, b: BucketId) -> Result<(&mut Bucket, &Bucket)> {
        // Validate both before splitting
        self.get(a)?;
        self.get(b)?;

        let (ia, ib) = (a.index(), b.index());
        let (first, second) = if ia < ib {
            let (lo, hi) = self.entries.split_at_mut(ib);
            (&mut lo[ia], &hi[0])
        } else {
            let (lo, hi) = self.entries.split_at_mut(ia);
            (&mut hi[0], &lo[ib])
        };

        match (first.bucket.as_mut(), second.bucket.as_ref()) {
            (Some(x), Some(y)) => Ok((x, y)),
            (None, _) => Err(BucketError::StaleBucket(a)),
            (_, None) => Err(BucketError::StaleBucket(b)),
        }
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.free.clear();
    }
}
