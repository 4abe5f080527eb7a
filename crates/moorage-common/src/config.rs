//! Configuration types for the gateway core
//!
//! Loading from files or the environment is the embedding binary's
//! concern; these structs only define the knobs the core recognises.

use serde::{Deserialize, Serialize};

/// Configuration of the storage abstraction layer
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SalConfig {
    /// Read-through metadata caches in front of every index GET/PUT.
    /// When false the caches are pass-through.
    pub use_metadata_cache: bool,
    /// Route byte-object deletion through the GC queue; when false
    /// deletes happen synchronously on the request thread.
    pub gc_enabled: bool,
    /// Multipart uploads use one composite object per upload instead of
    /// a separate byte object per part.
    pub tiered_enabled: bool,
    /// Capacity of each metadata cache, in entries.
    pub cache_capacity: usize,
    /// Internal batch size for index enumeration.
    pub next_batch: usize,
    /// Batch size when draining composite extent indices on delete.
    pub extent_batch: usize,
}

impl Default for SalConfig {
    fn default() -> Self {
        Self {
            use_metadata_cache: true,
            gc_enabled: true,
            tiered_enabled: false,
            cache_capacity: 10_000,
            next_batch: 100,
            extent_batch: 128,
        }
    }
}

impl SalConfig {
    /// Batch size for index enumeration, never zero
    #[must_use]
    pub fn next_batch(&self) -> usize {
        self.next_batch.max(1)
    }

    /// Batch size for extent draining, never zero
    #[must_use]
    pub fn extent_batch(&self) -> usize {
        self.extent_batch.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let cfg = SalConfig::default();
        assert!(cfg.use_metadata_cache);
        assert!(cfg.gc_enabled);
        assert!(!cfg.tiered_enabled);
        assert_eq!(cfg.next_batch(), 100);
    }

    #[test]
    fn test_batch_floors() {
        let cfg = SalConfig {
            next_batch: 0,
            extent_batch: 0,
            ..SalConfig::default()
        };
        assert_eq!(cfg.next_batch(), 1);
        assert_eq!(cfg.extent_batch(), 1);
    }
}
