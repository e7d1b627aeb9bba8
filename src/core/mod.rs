//! Bucket storage engine
//!
//! Layering, bottom up:
//!
//! - [`key`]: entity kinds and bucket ordering keys
//! - [`field`] / [`layout`]: field descriptors and per-family block layout
//! - [`bucket`] / [`arena`]: fixed-capacity columnar buckets behind stable ids
//! - [`directory`]: entity back-references and the relocation hook
//! - [`repository`]: families, packing, swap-remove and resort

pub mod arena;
pub mod bucket;
pub mod config;
pub mod directory;
pub mod error;
pub mod field;
pub mod key;
pub mod layout;
pub mod repository;


pub use arena::BucketArena;
pub use bucket::{Bucket, BucketId, SlotLocation};
pub use config::StoreConfig;
pub use directory::{EntityDirectory, EntityHandle, LocationTable};
pub use error::{BucketError, ErrorClass, Result};
pub use field::{FieldDescriptor, FieldRestriction};
pub use key::{CategoryKey, CategoryOrdinal, EntityKind, FamilySeq};
pub use layout::{FieldMap, FieldSlot};
pub use repository::{BucketRepository, RepositoryStats, ResortSummary};
