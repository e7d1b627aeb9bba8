//! Engine error types

use crate::bucket::BucketId;
use crate::key::{CategoryOrdinal, EntityKind};
use thiserror::Error;

/// Broad failure classes.
///
/// Every engine error is fatal for the operation that raised it; the class
/// tells the caller whether the fault lies with memory, with the field
/// schema, or with the caller's own bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Block allocation failed
    ResourceExhaustion,
    /// Field restrictions disagree across categories of one family
    SchemaConflict,
    /// A structural invariant would have been broken
    InvariantViolation,
    /// Store configuration could not be read or is out of range
    Configuration,
}

/// Engine errors
#[derive(Error, Debug)]
pub enum BucketError {
    /// Bucket block could not be allocated
    #[error("Bucket allocation of {bytes} bytes failed")]
    ResourceExhaustion { bytes: usize },

    /// Two categories of one family restrict a field to different dimensions
    #[error(
        "Incompatible dimensions for field '{field}' between category {first} and category {second}"
    )]
    IncompatibleFieldDimension {
        field: String,
        first: CategoryOrdinal,
        second: CategoryOrdinal,
    },

    /// No family sequence number left below the search bound
    #[error("Bucket family sequence overflow for kind {kind}")]
    FamilyOverflow { kind: EntityKind },

    /// Category ordinals not strictly increasing
    #[error("Category ordinals must be strictly increasing: {0:?}")]
    UnsortedCategories(Vec<CategoryOrdinal>),

    /// Entity kind outside the configured range, or the nil kind
    #[error("Unknown entity kind: {0}")]
    UnknownKind(EntityKind),

    /// Bucket id refers to a destroyed or unknown bucket
    #[error("Bucket {0} does not exist")]
    StaleBucket(BucketId),

    /// Bucket still holds entities (cannot destroy)
    #[error("Bucket {id} still holds {size} entities")]
    BucketNotEmpty { id: BucketId, size: usize },

    /// Only the last bucket of a family may be destroyed
    #[error("Bucket {0} is not the last bucket of its family")]
    NotLastInFamily(BucketId),

    /// Destroying the bucket would leave an empty bucket as family tail
    #[error("Bucket {0} would become an empty family tail")]
    EmptyFamilyTail(BucketId),

    /// Slot index beyond the bucket's live range
    #[error("Slot {slot} out of range for bucket {id} (size {size})")]
    SlotOutOfRange { id: BucketId, slot: usize, size: usize },

    /// Slot holds no entity handle
    #[error("Slot {slot} of bucket {id} holds no entity")]
    VacantSlot { id: BucketId, slot: usize },

    /// Field ordinal not in the bucket's layout
    #[error("Field ordinal {0} is not part of this bucket's layout")]
    UnknownField(usize),

    /// Field does not carry the requested state
    #[error("Field {field} has no state {state}")]
    UnknownFieldState { field: usize, state: usize },

    /// Field bytes cannot be cast to the requested type
    #[error("Field column cannot be viewed as the requested type: {0:?}")]
    FieldCast(bytemuck::PodCastError),

    /// Family links or packing are inconsistent
    #[error("Malformed bucket family: {0}")]
    MalformedFamily(String),

    /// Entity not stored
    #[error("Entity {0} is not stored in the repository")]
    UnknownEntity(u64),

    /// Entity already stored
    #[error("Entity {0} is already stored in the repository")]
    DuplicateEntity(u64),

    /// Configuration value out of range
    #[error("Invalid store configuration: {0}")]
    InvalidConfig(String),

    /// TOML configuration could not be parsed
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// TOML configuration could not be written
    #[error("Configuration serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    /// Configuration file I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BucketError {
    pub fn class(&self) -> ErrorClass {
        match self {
            BucketError::ResourceExhaustion { .. } => ErrorClass::ResourceExhaustion,
            BucketError::IncompatibleFieldDimension { .. } => ErrorClass::SchemaConflict,
            BucketError::InvalidConfig(_)
            | BucketError::ConfigParse(_)
            | BucketError::ConfigSerialize(_)
            | BucketError::Io(_) => ErrorClass::Configuration,
            _ => ErrorClass::InvariantViolation,
        }
    }
}

pub type Result<T> = std::result::Result<T, BucketError>;
