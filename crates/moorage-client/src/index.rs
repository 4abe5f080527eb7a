//! Index service contract
//!
//! An index is an ordered key→value map identified by a 128-bit FID.
//! Every operation is issue-and-wait; the implementation may multiplex
//! onto reactor threads but the caller observes a synchronous call.

use moorage_common::{Fid, Result};

/// Ordered key→value map service
///
/// Key order is plain byte order. A missing index or key surfaces
/// `Error::NotFound`; a `put` without `overwrite` on an extant key
/// surfaces `Error::AlreadyExists`. Any other failure is `Transport`.
pub trait IndexService: Send + Sync {
    /// Create an empty index
    fn create_index(&self, id: Fid) -> Result<()>;

    /// Drop an index and all its entries
    fn delete_index(&self, id: Fid) -> Result<()>;

    /// Insert or replace one entry
    fn put(&self, id: Fid, key: &[u8], value: &[u8], overwrite: bool) -> Result<()>;

    /// Fetch one entry's value
    fn get(&self, id: Fid, key: &[u8]) -> Result<Vec<u8>>;

    /// Remove one entry
    fn del(&self, id: Fid, key: &[u8]) -> Result<()>;

    /// Return up to `max` entries with key ≥ `from`, in key order
    fn next(&self, id: Fid, from: &[u8], max: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;
}
