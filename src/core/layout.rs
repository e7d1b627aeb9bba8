//! Field layout resolution
//!
//! Computes where each field's columns live inside a bucket block. The
//! block starts with the entity handle array (one `u64` per slot); field
//! columns follow in registration order, one column per field state, each
//! rounded up to [`FIELD_ALIGNMENT`] bytes.
//!
//! ```text
//! ┌──────────────────────┬──────────────┬──────────────┬──────────────┬─────┐
//! │ handles (8 × C)      │ f0 state 0   │ f0 state 1   │ f1 state 0   │ ... │
//! │ padded to 16         │ size0 × C    │ size0 × C    │ size1 × C    │     │
//! └──────────────────────┴──────────────┴──────────────┴──────────────┴─────┘
//! ```

use crate::config::{FIELD_ALIGNMENT, MAX_FIELD_STATES};
use crate::error::{BucketError, Result};
use crate::field::{FieldDescriptor, FieldRestriction};
use crate::key::{CategoryOrdinal, EntityKind};
use serde::{Deserialize, Serialize};

/// Bytes reserved per slot for the entity handle
pub const HANDLE_BYTES: usize = std::mem::size_of::<u64>();

/// Round `bytes` up to the field alignment boundary
pub fn align(bytes: usize) -> usize {
    let gap = bytes % FIELD_ALIGNMENT;
    if gap == 0 {
        bytes
    } else {
        bytes + FIELD_ALIGNMENT - gap
    }
}

fn checked_align(bytes: usize) -> Option<usize> {
    match bytes % FIELD_ALIGNMENT {
        0 => Some(bytes),
        gap => bytes.checked_add(FIELD_ALIGNMENT - gap),
    }
}

/// A layout whose byte count does not fit in `usize`
fn oversized() -> BucketError {
    BucketError::ResourceExhaustion { bytes: usize::MAX }
}

/// Placement of one field column inside a bucket block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSlot {
    /// Byte offset of the column from the start of the block
    pub offset: usize,
    /// Bytes per entity (zero when the family does not carry the field)
    pub size: usize,
}

impl FieldSlot {
    /// Byte range of `slot` within the block
    pub fn range(&self, slot: usize) -> std::ops::Range<usize> {
        let start = self.offset + self.size * slot;
        start..start + self.size
    }
}

/// Resolved layout shared by every bucket of a family
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMap {
    capacity: usize,
    /// Every state column, field-major
    slots: Vec<FieldSlot>,
    /// Index into `slots` of each field's state 0, plus a trailing end marker
    starts: Vec<usize>,
    dimensions: Vec<Option<Vec<u32>>>,
    total_bytes: usize,
}

impl FieldMap {
    /// Resolve the layout of a family
    ///
    /// For each field the restrictions matching `(kind, ordinal)` are visited
    /// in ordinal order; all of them must agree on dimensions.
    ///
    /// # Errors
    ///
    /// - `IncompatibleFieldDimension` naming the field and both categories
    ///   when two matching restrictions disagree
    /// - `ResourceExhaustion` when the block size overflows `usize`
    /// - `InvalidConfig` when a field's state count is outside `1..=MAX_FIELD_STATES`
    pub fn resolve(
        kind: EntityKind,
        ordinals: &[CategoryOrdinal],
        fields: &[FieldDescriptor],
        capacity: usize,
    ) -> Result<Self> {
        let mut offset = HANDLE_BYTES
            .checked_mul(capacity)
            .and_then(checked_align)
            .ok_or_else(oversized)?;
        let mut slots = Vec::with_capacity(fields.len());
        let mut starts = Vec::with_capacity(fields.len() + 1);
        let mut dimensions = Vec::with_capacity(fields.len());

        for field in fields {
            let states = field.states();
            if states == 0 || states > MAX_FIELD_STATES {
                return Err(BucketError::InvalidConfig(format!(
                    "field '{}' has {} states (allowed 1..={})",
                    field.name(),
                    states,
                    MAX_FIELD_STATES
                )));
            }

            let restriction = Self::restriction(field, kind, ordinals)?;
            let size = match restriction {
                Some(r) => r
                    .scalars_per_entity()
                    .and_then(|n| n.checked_mul(field.scalar_size()))
                    .ok_or_else(oversized)?,
                None => 0,
            };
            let column = size
                .checked_mul(capacity)
                .and_then(checked_align)
                .ok_or_else(oversized)?;

            starts.push(slots.len());
            for _ in 0..states {
                slots.push(FieldSlot { offset, size });
                offset = offset.checked_add(column).ok_or_else(oversized)?;
            }
            dimensions.push(restriction.map(|r| r.dimensions.clone()));
        }
        starts.push(slots.len());

        Ok(FieldMap {
            capacity,
            slots,
            starts,
            dimensions,
            total_bytes: offset,
        })
    }

    /// Layout of a capacity-0 bucket with no fields
    pub fn empty() -> Self {
        FieldMap {
            capacity: 0,
            slots: Vec::new(),
            starts: vec![0],
            dimensions: Vec::new(),
            total_bytes: 0,
        }
    }

    fn restriction<'a>(
        field: &'a FieldDescriptor,
        kind: EntityKind,
        ordinals: &[CategoryOrdinal],
    ) -> Result<Option<&'a FieldRestriction>> {
        let mut found: Option<&FieldRestriction> = None;

        for &ordinal in ordinals {
            let Some(candidate) = field.restriction_for(kind, ordinal) else {
                continue;
            };

            match found {
                None => found = Some(candidate),
                Some(first) if first.dimensions != candidate.dimensions => {
                    return Err(BucketError::IncompatibleFieldDimension {
                        field: field.name().to_string(),
                        first: first.category,
                        second: candidate.category,
                    });
                }
                Some(_) => {}
            }
        }

        Ok(found)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of fields in the layout
    pub fn len(&self) -> usize {
        self.dimensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }

    /// Column of a field's current state
    pub fn field(&self, ordinal: usize) -> Option<&FieldSlot> {
        self.field_state(ordinal, 0)
    }

    /// Column of one state of a field; state 0 is the newest
    pub fn field_state(&self, ordinal: usize, state: usize) -> Option<&FieldSlot> {
        if state >= self.states(ordinal) {
            return None;
        }
        self.slots.get(self.starts[ordinal] + state)
    }

    /// Number of states of a field, 0 for an unknown ordinal
    pub fn states(&self, ordinal: usize) -> usize {
        match (self.starts.get(ordinal), self.starts.get(ordinal + 1)) {
            (Some(start), Some(end)) => end - start,
            _ => 0,
        }
    }

    /// True when a field stored by this family carries more than one state
    pub fn has_multi_state(&self) -> bool {
        self.starts
            .windows(2)
            .any(|w| w[1] - w[0] > 1 && self.slots[w[0]].size > 0)
    }

    /// Every state column of every field, field-major
    pub fn slots(&self) -> &[FieldSlot] {
        &self.slots
    }

    /// Layout with every multi-state field advanced by one state
    ///
    /// Each state's column becomes the next older state; the oldest column
    /// is reused as the new state 0. No bytes move.
    pub fn rotate_states(&self) -> Self {
        let mut rotated = self.clone();
        for window in self.starts.windows(2) {
            let (start, end) = (window[0], window[1]);
            if end - start > 1 {
                rotated.slots[start..end].rotate_right(1);
            }
        }
        rotated
    }

    /// Dimensions the family resolved for a field, `None` if unrestricted
    pub fn dimensions(&self, ordinal: usize) -> Option<&[u32]> {
        self.dimensions.get(ordinal)?.as_deref()
    }

    /// Bytes occupied by the handle array
    pub fn handle_bytes(&self) -> usize {
        align(HANDLE_BYTES * self.capacity)
    }

    /// Size of the whole block, a multiple of the field alignment
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }
}
