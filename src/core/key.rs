//! Category keys
//!
//! A bucket is identified by the kind of entity it stores, the sorted set of
//! category (part) ordinals its entities belong to, and a trailing family
//! sequence number that distinguishes buckets of the same family.
//!
//! Keys compare the way their flat encoding `{count, ordinals.., family}`
//! would compare element by element: shorter ordinal lists sort first, then
//! ordinals lexicographically, then the family sequence.

use crate::error::{BucketError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Stable small integer naming a category (mesh part)
pub type CategoryOrdinal = u32;

/// Position of a bucket inside its family
pub type FamilySeq = u32;

/// Entity rank: node, edge, face, element, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKind(pub u32);

impl EntityKind {
    pub const NODE: EntityKind = EntityKind(0);
    pub const EDGE: EntityKind = EntityKind(1);
    pub const FACE: EntityKind = EntityKind(2);
    pub const ELEMENT: EntityKind = EntityKind(3);

    /// Kind tag carried by the nil bucket
    pub const NIL: EntityKind = EntityKind(u32::MAX);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            EntityKind::NIL => write!(f, "nil"),
            EntityKind(rank) => write!(f, "{}", rank),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CategoryKey {
    kind: EntityKind,
    ordinals: Vec<CategoryOrdinal>,
    family: FamilySeq,
}

impl CategoryKey {
    /// Build the key of a family's first bucket
    ///
    /// # Errors
    ///
    /// Returns `UnsortedCategories` unless `ordinals` is strictly increasing.
    pub fn new(kind: EntityKind, ordinals: &[CategoryOrdinal]) -> Result<Self> {
        if ordinals.windows(2).any(|w| w[0] >= w[1]) {
            return Err(BucketError::UnsortedCategories(ordinals.to_vec()));
        }

        Ok(CategoryKey {
            kind,
            ordinals: ordinals.to_vec(),
            family: 0,
        })
    }

    /// Key of the shared nil bucket
    pub(crate) fn nil() -> Self {
        CategoryKey {
            kind: EntityKind::NIL,
            ordinals: Vec::new(),
            family: 0,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn ordinals(&self) -> &[CategoryOrdinal] {
        &self.ordinals
    }

    pub fn family(&self) -> FamilySeq {
        self.family
    }

    /// Same key with the family sequence replaced
    pub fn with_family(&self, family: FamilySeq) -> Self {
        CategoryKey {
            kind: self.kind,
            ordinals: self.ordinals.clone(),
            family,
        }
    }

    /// Upper bound for every bucket of this key's family
    pub fn search_bound(&self) -> Self {
        self.with_family(FamilySeq::MAX)
    }

    /// True when both keys name the same family, ignoring the sequence
    pub fn same_family(&self, other: &CategoryKey) -> bool {
        self.kind == other.kind && self.ordinals == other.ordinals
    }

    /// Membership test against this key's categories
    pub fn contains(&self, ordinal: CategoryOrdinal) -> bool {
        self.ordinals.binary_search(&ordinal).is_ok()
    }

    /// Ordering ignoring the family sequence
    pub fn cmp_family(&self, other: &CategoryKey) -> Ordering {
        self.kind
            .cmp(&other.kind)
            .then_with(|| self.ordinals.len().cmp(&other.ordinals.len()))
            .then_with(|| self.ordinals.cmp(&other.ordinals))
    }
}

impl Ord for CategoryKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_family(other)
            .then_with(|| self.family.cmp(&other.family))
    }
}

impl PartialOrd for CategoryKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for CategoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:?}#{}", self.kind, self.ordinals, self.family)
    }
}
