//! Store configuration
//!
//! Loaded from TOML:
//!
//! ```toml
//! bucket_capacity = 512
//! kind_count = 4
//! ```

use crate::error::{BucketError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Alignment of every column inside a bucket block
pub const FIELD_ALIGNMENT: usize = 16;

/// Entities per bucket when not configured
pub const DEFAULT_BUCKET_CAPACITY: usize = 512;

/// Upper bound on configurable bucket capacity
pub const MAX_BUCKET_CAPACITY: usize = 1 << 20;

/// Upper bound on the number of states a field may keep
pub const MAX_FIELD_STATES: usize = 6;

/// Node, edge, face, element
pub const DEFAULT_KIND_COUNT: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Slots per bucket
    pub bucket_capacity: usize,

    /// Number of entity kinds the repository tracks
    pub kind_count: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            bucket_capacity: DEFAULT_BUCKET_CAPACITY,
            kind_count: DEFAULT_KIND_COUNT,
        }
    }
}

impl StoreConfig {
    pub fn new(bucket_capacity: usize, kind_count: usize) -> Self {
        StoreConfig {
            bucket_capacity,
            kind_count,
        }
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: StoreConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string(self)?)
    }

    /// Validate ranges
    pub fn validate(&self) -> Result<()> {
        if self.bucket_capacity == 0 {
            return Err(BucketError::InvalidConfig(
                "bucket_capacity must be at least 1".to_string(),
            ));
        }

        if self.bucket_capacity > MAX_BUCKET_CAPACITY {
            return Err(BucketError::InvalidConfig(format!(
                "bucket_capacity {} exceeds maximum {}",
                self.bucket_capacity, MAX_BUCKET_CAPACITY
            )));
        }

        if self.kind_count == 0 {
            return Err(BucketError::InvalidConfig(
                "kind_count must be at least 1".to_string(),
            ));
        }

        if self.kind_count >= u32::MAX as usize {
            return Err(BucketError::InvalidConfig(format!(
                "kind_count {} collides with the nil kind",
                self.kind_count
            )));
        }

        Ok(())
    }
}
