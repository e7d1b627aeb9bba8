//! # Meshbucket - Category-Keyed Entity Bucket Storage
//!
//! `meshbucket-rs` stores mesh entities (nodes, edges, faces, elements) in
//! fixed-capacity buckets grouped by the set of categories ("parts") each
//! entity belongs to:
//!
//! - **Families** of buckets share one category set and one field layout
//! - **Packed storage**: only a family's last bucket may have free slots
//! - **Columnar field data**: one 16-byte aligned column per field in a single block
//! - **Swap-remove** with synchronous relocation reporting
//! - **Resort** of every family into a caller-defined order
//!
//! ## Quick Start
//!
//! ```rust
//! use meshbucket_rs::{EntityHandle, EntityKind, FieldDescriptor, Result, StoreBuilder};
//!
//! # fn main() -> Result<()> {
//! let coordinates = FieldDescriptor::of::<f64>("coordinates")
//!     .restrict(EntityKind::NODE, 0, &[3]);
//!
//! let mut store = StoreBuilder::new()
//!     .bucket_capacity(64)
//!     .field(coordinates)
//!     .build()?;
//!
//! let node = EntityHandle::new(1).unwrap();
//! store.insert(node, EntityKind::NODE, &[0])?;
//! store.field_mut::<f64>(node, 0)?.copy_from_slice(&[1.0, 2.0, 3.0]);
//!
//! assert_eq!(store.field::<f64>(node, 0)?, &[1.0, 2.0, 3.0]);
//! # Ok(())
//! # }
//! ```

// Storage engine
pub mod core;

// Re-export core modules internally so crate:: paths in core resolve
#[allow(unused_imports)]
pub(crate) use self::core::{
    arena, bucket, config, directory, error, field, key, layout, repository,
};

// Re-export core types that users need
pub use crate::core::{
    arena::BucketArena,
    bucket::{Bucket, BucketId, SlotLocation},
    config::{StoreConfig, DEFAULT_BUCKET_CAPACITY, FIELD_ALIGNMENT, MAX_FIELD_STATES},
    directory::{EntityDirectory, EntityHandle, LocationTable},
    error::{BucketError, ErrorClass, Result},
    field::{FieldDescriptor, FieldRestriction},
    key::{CategoryKey, CategoryOrdinal, EntityKind},
    layout::FieldMap,
    repository::{BucketRepository, RepositoryStats, ResortSummary},
};

use bytemuck::Pod;
use std::cmp::Ordering;
use tracing::{debug, info};

/// Closure run for every relocated entity
///
/// Receives the entity, its new location and mutable access to bucket
/// storage, so relation-derived field data can be refreshed in place.
pub type RelocationHook = Box<dyn FnMut(EntityHandle, SlotLocation, &mut BucketArena)>;

/// Directory view handed to the repository for one operation
struct StoreDirectory<'a> {
    table: &'a mut LocationTable,
    hook: Option<&'a mut RelocationHook>,
}

impl EntityDirectory for StoreDirectory<'_> {
    fn set_location(&mut self, entity: EntityHandle, location: SlotLocation) {
        self.table.set_location(entity, location);
    }

    fn released(&mut self, entity: EntityHandle) {
        self.table.released(entity);
    }

    fn on_relocate(&mut self, entity: EntityHandle, location: SlotLocation, buckets: &mut BucketArena) {
        if let Some(hook) = self.hook.as_mut() {
            hook(entity, location, buckets);
        }
    }
}

/// Entity store with built-in location tracking
///
/// Owns a [`BucketRepository`], the entity-to-slot table and the registered
/// field descriptors. Fields are addressed by their registration ordinal.
///
/// # Examples
///
/// ```rust
/// use meshbucket_rs::{EntityHandle, EntityKind, StoreBuilder};
///
/// let mut store = StoreBuilder::new().bucket_capacity(2).build()?;
/// for raw in [3, 1, 2] {
///     store.insert(EntityHandle::new(raw).unwrap(), EntityKind::NODE, &[0])?;
/// }
///
/// store.resort(|a, b| a.cmp(b))?;
/// assert_eq!(store.stats().buckets, 2);
/// # Ok::<(), meshbucket_rs::BucketError>(())
/// ```
pub struct EntityStore {
    repository: BucketRepository,
    locations: LocationTable,
    fields: Vec<FieldDescriptor>,
    hook: Option<RelocationHook>,
}

impl EntityStore {
    /// Create a store from a validated configuration
    pub fn new(config: &StoreConfig, fields: Vec<FieldDescriptor>) -> Result<Self> {
        let repository = BucketRepository::from_config(config)?;
        info!(
            "Creating entity store ({} kinds, capacity {}, {} fields)",
            config.kind_count,
            config.bucket_capacity,
            fields.len()
        );

        Ok(EntityStore {
            repository,
            locations: LocationTable::new(),
            fields,
            hook: None,
        })
    }

    /// Install the relocation hook, replacing any previous one
    pub fn on_relocate<H>(&mut self, hook: H)
    where
        H: FnMut(EntityHandle, SlotLocation, &mut BucketArena) + 'static,
    {
        self.hook = Some(Box::new(hook));
    }

    pub fn clear_relocation_hook(&mut self) {
        self.hook = None;
    }

    fn parts(&mut self) -> (&mut BucketRepository, &[FieldDescriptor], StoreDirectory<'_>) {
        (
            &mut self.repository,
            &self.fields,
            StoreDirectory {
                table: &mut self.locations,
                hook: self.hook.as_mut(),
            },
        )
    }

    /// Add `entity` to the family of `kind` and `parts`
    ///
    /// `parts` may be given in any order; duplicates are ignored.
    ///
    /// # Errors
    ///
    /// - `DuplicateEntity` if the entity is already stored
    /// - `IncompatibleFieldDimension` if a new family's layout conflicts
    /// - `ResourceExhaustion` if the family's block cannot be sized or allocated
    pub fn insert(
        &mut self,
        entity: EntityHandle,
        kind: EntityKind,
        parts: &[CategoryOrdinal],
    ) -> Result<SlotLocation> {
        if self.locations.contains(entity) {
            return Err(BucketError::DuplicateEntity(entity.get()));
        }

        let ordinals = normalize(parts);
        let (repository, fields, mut directory) = self.parts();
        repository.insert_entity(kind, &ordinals, fields, entity, &mut directory)
    }

    /// Remove `entity`, swap-filling its slot from the family tail
    pub fn remove(&mut self, entity: EntityHandle) -> Result<()> {
        let location = self.require(entity)?;
        let (repository, _, mut directory) = self.parts();
        repository.remove_entity(location, &mut directory)?;
        debug!("Removed {}", entity);
        Ok(())
    }

    /// Move `entity` to the family of `parts`, keeping its field data
    pub fn change_parts(&mut self, entity: EntityHandle, parts: &[CategoryOrdinal]) -> Result<SlotLocation> {
        let location = self.require(entity)?;
        let ordinals = normalize(parts);
        let (repository, fields, mut directory) = self.parts();
        repository.move_entity(location, &ordinals, fields, &mut directory)
    }

    /// Sort every family's entities by `order`
    pub fn resort<F>(&mut self, order: F) -> Result<ResortSummary>
    where
        F: FnMut(&EntityHandle, &EntityHandle) -> Ordering,
    {
        let (repository, _, mut directory) = self.parts();
        repository.resort_families(order, &mut directory)
    }

    pub fn location(&self, entity: EntityHandle) -> Option<SlotLocation> {
        self.locations.location(entity)
    }

    fn require(&self, entity: EntityHandle) -> Result<SlotLocation> {
        self.locations
            .location(entity)
            .ok_or(BucketError::UnknownEntity(entity.get()))
    }

    /// Values of field `field` for `entity`
    ///
    /// Empty when the field is not defined on the entity's family.
    pub fn field<T: Pod>(&self, entity: EntityHandle, field: usize) -> Result<&[T]> {
        let location = self.require(entity)?;
        self.repository
            .bucket(location.bucket)?
            .slot_values(field, location.slot)
    }

    pub fn field_mut<T: Pod>(&mut self, entity: EntityHandle, field: usize) -> Result<&mut [T]> {
        let location = self.require(entity)?;
        self.repository
            .bucket_mut(location.bucket)?
            .slot_values_mut(field, location.slot)
    }

    /// Values of one state of a multi-state field; state 0 is the newest
    pub fn field_state<T: Pod>(&self, entity: EntityHandle, field: usize, state: usize) -> Result<&[T]> {
        let location = self.require(entity)?;
        self.repository
            .bucket(location.bucket)?
            .state_values(field, state, location.slot)
    }

    pub fn field_state_mut<T: Pod>(
        &mut self,
        entity: EntityHandle,
        field: usize,
        state: usize,
    ) -> Result<&mut [T]> {
        let location = self.require(entity)?;
        self.repository
            .bucket_mut(location.bucket)?
            .state_values_mut(field, state, location.slot)
    }

    /// Advance every multi-state field by one state
    ///
    /// What was state 0 becomes state 1 and so on; the oldest state's storage
    /// is reused as the new state 0 and keeps its old contents.
    pub fn update_field_states(&mut self) -> Result<usize> {
        self.repository.update_field_data_states()
    }

    /// Registration ordinal of the field called `name`
    pub fn field_ordinal(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name() == name)
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn repository(&self) -> &BucketRepository {
        &self.repository
    }

    pub fn locations(&self) -> &LocationTable {
        &self.locations
    }

    pub fn stats(&self) -> RepositoryStats {
        self.repository.stats()
    }

    /// Check repository invariants and that every tracked location is live
    pub fn validate(&self) -> Result<()> {
        self.repository.validate()?;
        for (entity, location) in self.locations.iter() {
            if self.repository.entity_at(location)? != entity {
                return Err(BucketError::MalformedFamily(format!(
                    "{} is tracked at {} but not stored there",
                    entity, location
                )));
            }
        }
        Ok(())
    }

    /// Number of stored entities
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}

impl std::fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityStore")
            .field("repository", &self.repository)
            .field("entities", &self.locations.len())
            .field("fields", &self.fields.len())
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

/// Sorted, deduplicated category ordinals
fn normalize(parts: &[CategoryOrdinal]) -> Vec<CategoryOrdinal> {
    let mut ordinals = parts.to_vec();
    ordinals.sort_unstable();
    ordinals.dedup();
    ordinals
}

/// Builder for creating an EntityStore with custom configuration
///
/// # Examples
///
/// ```rust
/// use meshbucket_rs::{EntityKind, FieldDescriptor, StoreBuilder};
///
/// let store = StoreBuilder::new()
///     .bucket_capacity(128)
///     .kind_count(4)
///     .field(FieldDescriptor::of::<f64>("mass").restrict(EntityKind::ELEMENT, 1, &[]))
///     .build()?;
///
/// assert_eq!(store.field_ordinal("mass"), Some(0));
/// # Ok::<(), meshbucket_rs::BucketError>(())
/// ```
pub struct StoreBuilder {
    config: StoreConfig,
    fields: Vec<FieldDescriptor>,
}

impl StoreBuilder {
    /// Create a new StoreBuilder with default settings
    pub fn new() -> Self {
        StoreBuilder {
            config: StoreConfig::default(),
            fields: Vec::new(),
        }
    }

    /// Set the number of slots per bucket
    pub fn bucket_capacity(mut self, capacity: usize) -> Self {
        self.config.bucket_capacity = capacity;
        self
    }

    /// Set the number of entity kinds
    pub fn kind_count(mut self, kinds: usize) -> Self {
        self.config.kind_count = kinds;
        self
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a field; its ordinal is the registration order
    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    /// Build the EntityStore instance
    pub fn build(self) -> Result<EntityStore> {
        for (i, field) in self.fields.iter().enumerate() {
            if field.scalar_size() == 0 {
                return Err(BucketError::InvalidConfig(format!(
                    "field '{}' has zero scalar size",
                    field.name()
                )));
            }
            if field.states() == 0 || field.states() > MAX_FIELD_STATES {
                return Err(BucketError::InvalidConfig(format!(
                    "field '{}' has {} states (allowed 1..={})",
                    field.name(),
                    field.states(),
                    MAX_FIELD_STATES
                )));
            }
            if self.fields[..i].iter().any(|f| f.name() == field.name()) {
                return Err(BucketError::InvalidConfig(format!(
                    "field '{}' registered twice",
                    field.name()
                )));
            }
        }

        info!(
            "Building entity store with {} registered fields",
            self.fields.len()
        );
        EntityStore::new(&self.config, self.fields)
    }
}

impl Default for StoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}
