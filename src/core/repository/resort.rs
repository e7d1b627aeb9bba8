//! Family resort
//!
//! Puts every family's entities into a caller-defined total order by cyclic
//! relocation through a single vacant slot. The vacancy starts one past the
//! family's last live slot; a full family borrows a scratch bucket for it.
//!
//! Scanning slots in storage order against the sorted target sequence, each
//! mismatch parks the current occupant in the vacancy, pulls the target
//! entity into place and leaves the target's old slot as the new vacancy.
//! Every slot of a family after its first mismatch reports a relocation,
//! because relation data referencing the family may have shifted.

use super::BucketRepository;
use crate::bucket::{BucketId, SlotLocation};
use crate::directory::{EntityDirectory, EntityHandle};
use crate::error::{BucketError, Result};
use crate::key::EntityKind;
use ahash::AHashMap;
use std::cmp::Ordering;
use tracing::{debug, info, warn};

/// Work done by one resort pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResortSummary {
    /// Families visited
    pub families: usize,
    /// Families whose storage order changed
    pub families_changed: usize,
    /// Slot-to-slot data moves
    pub moves: usize,
    /// Scratch buckets borrowed for full families
    pub scratch_buckets: usize,
}

impl BucketRepository {
    /// Sort the entities of every family by `order`
    ///
    /// `order` must be a strict total order over the stored entities.
    ///
    /// # Errors
    ///
    /// - `ResourceExhaustion` if a scratch bucket cannot be allocated
    /// - `MalformedFamily` if a family's links or handles are inconsistent
    pub fn resort_families<F, D>(&mut self, mut order: F, directory: &mut D) -> Result<ResortSummary>
    where
        F: FnMut(&EntityHandle, &EntityHandle) -> Ordering,
        D: EntityDirectory + ?Sized,
    {
        let mut summary = ResortSummary::default();

        for rank in 0..self.kind_count() {
            let kind = EntityKind(rank as u32);
            let mut begin = 0;

            while begin < self.buckets[rank].len() {
                begin = self.resort_family(kind, begin, &mut order, directory, &mut summary)?;
                summary.families += 1;
            }
        }

        info!(
            "Resorted {} families ({} changed, {} moves, {} scratch buckets)",
            summary.families, summary.families_changed, summary.moves, summary.scratch_buckets
        );

        Ok(summary)
    }

    /// Resort the family whose first bucket sits at `begin`
    ///
    /// Returns the list position just past the family.
    fn resort_family<F, D>(
        &mut self,
        kind: EntityKind,
        begin: usize,
        order: &mut F,
        directory: &mut D,
        summary: &mut ResortSummary,
    ) -> Result<usize>
    where
        F: FnMut(&EntityHandle, &EntityHandle) -> Ordering,
        D: EntityDirectory + ?Sized,
    {
        let rank = kind.index();
        let first = self.buckets[rank][begin];
        let last = self.arena.get(first)?.last_in_family();

        let (mut vacant, scratch) = {
            let tail = self.arena.get(last)?;
            if !tail.is_full() {
                (SlotLocation::new(last, tail.size()), None)
            } else {
                let ordinals = tail.key().ordinals().to_vec();
                warn!(
                    "Family {} is full; declaring scratch bucket for resort",
                    tail.key()
                );
                let scratch = self.declare_bucket(kind, &ordinals, &[])?;
                summary.scratch_buckets += 1;
                (SlotLocation::new(scratch, 0), Some(scratch))
            }
        };
        self.arena
            .get_mut(vacant.bucket)?
            .set_slot_handle(vacant.slot, None)?;

        let list = &self.buckets[rank];
        let mut end = list[begin..]
            .iter()
            .position(|id| *id == vacant.bucket)
            .map(|p| begin + p + 1)
            .ok_or_else(|| {
                BucketError::MalformedFamily(format!(
                    "vacant bucket {} not found in family of {}",
                    vacant.bucket, first
                ))
            })?;
        let family: Vec<BucketId> = list[begin..end].to_vec();

        let mut entities = Vec::new();
        let mut locations: AHashMap<EntityHandle, SlotLocation> = AHashMap::new();
        for id in &family {
            let bucket = self.arena.get(*id)?;
            for slot in 0..bucket.size() {
                let entity = bucket
                    .handle(slot)
                    .ok_or(BucketError::VacantSlot { id: *id, slot })?;
                if locations.insert(entity, SlotLocation::new(*id, slot)).is_some() {
                    return Err(BucketError::MalformedFamily(format!(
                        "{} stored twice in family of {}",
                        entity, first
                    )));
                }
                entities.push(entity);
            }
        }

        entities.sort_by(|a, b| order(a, b));

        let mut targets = entities.into_iter();
        let mut changed = false;

        for id in &family {
            let size = self.arena.get(*id)?.size();
            for slot in 0..size {
                let here = SlotLocation::new(*id, slot);
                let target = targets.next().ok_or_else(|| {
                    BucketError::MalformedFamily(format!("family of {} changed size", first))
                })?;
                let current = self.arena.get(*id)?.handle(slot);

                if current == Some(target) {
                    if changed {
                        directory.on_relocate(target, here, &mut self.arena);
                    }
                    continue;
                }

                if let Some(occupant) = current {
                    self.relocate(occupant, vacant, here, directory)?;
                    locations.insert(occupant, vacant);
                    summary.moves += 1;
                }

                let source = locations
                    .get(&target)
                    .copied()
                    .ok_or(BucketError::UnknownEntity(target.get()))?;
                self.arena
                    .get_mut(source.bucket)?
                    .set_slot_handle(source.slot, None)?;
                self.relocate(target, here, source, directory)?;
                locations.insert(target, here);
                summary.moves += 1;

                vacant = source;
                changed = true;
            }
        }

        // The vacancy is back beyond the live range
        self.arena
            .get_mut(vacant.bucket)?
            .set_slot_handle(vacant.slot, None)?;
        self.arena.zero_slot(vacant)?;

        if let Some(scratch) = scratch {
            self.destroy_bucket(scratch)?;
            end -= 1;
        }

        if changed {
            summary.families_changed += 1;
            debug!("Resorted family of {} across {} buckets", first, family.len());
        }

        Ok(end)
    }
}
