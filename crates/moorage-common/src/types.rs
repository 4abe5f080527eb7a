//! Core identifier types for Moorage
//!
//! Objects and indices in the backing store are both addressed by
//! 128-bit identifiers. Index identifiers are derived from textual
//! names by hashing; object identifiers come from a per-process
//! monotonic generator.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// FID type tag for distributed indices
pub const FID_TYPE_INDEX: u8 = b'x';

/// FID type tag for byte-container objects
pub const FID_TYPE_OBJECT: u8 = b'o';

/// Mask clearing the type-tag byte of the container word
const FID_CONTAINER_MASK: u64 = 0x00FF_FFFF_FFFF_FFFF;

/// 128-bit store identifier
///
/// The top byte of `container` is the store's type tag; the remaining
/// 120 bits are free for the allocator or hash.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Fid {
    pub container: u64,
    pub key: u64,
}

impl Fid {
    /// The nil identifier; never allocated by the store
    pub const NIL: Self = Self { container: 0, key: 0 };

    /// Create from raw words
    #[must_use]
    pub const fn new(container: u64, key: u64) -> Self {
        Self { container, key }
    }

    /// Whether this is the nil identifier
    #[must_use]
    pub const fn is_nil(&self) -> bool {
        self.container == 0 && self.key == 0
    }

    /// Derive an identifier from a textual name
    ///
    /// Hashes the name with MD5, splits the digest into the two words
    /// big-endian, then forces the result into the store's reserved
    /// namespace by masking the container word and stamping the type
    /// tag. Deterministic across processes.
    #[must_use]
    pub fn from_name(name: &str, type_tag: u8) -> Self {
        let digest = md5::compute(name.as_bytes());
        let hi = u64::from_be_bytes(digest.0[0..8].try_into().expect("8 bytes"));
        let lo = u64::from_be_bytes(digest.0[8..16].try_into().expect("8 bytes"));
        Self {
            container: (hi & FID_CONTAINER_MASK) | (u64::from(type_tag) << 56),
            key: lo,
        }
    }

    /// Re-stamp the type tag, keeping the rest of the identifier
    #[must_use]
    pub const fn with_type(self, type_tag: u8) -> Self {
        Self {
            container: (self.container & FID_CONTAINER_MASK) | ((type_tag as u64) << 56),
            key: self.key,
        }
    }

    /// The type tag in the container word
    #[must_use]
    pub const fn type_tag(&self) -> u8 {
        (self.container >> 56) as u8
    }

    /// 16-byte big-endian wire form (sorts like the numeric value)
    #[must_use]
    pub fn to_bytes(self) -> [u8; 16] {
        let mut buf = [0u8; 16];
        buf[0..8].copy_from_slice(&self.container.to_be_bytes());
        buf[8..16].copy_from_slice(&self.key.to_be_bytes());
        buf
    }

    /// Parse the 16-byte big-endian wire form
    #[must_use]
    pub fn from_bytes(data: [u8; 16]) -> Self {
        Self {
            container: u64::from_be_bytes(data[0..8].try_into().expect("8 bytes")),
            key: u64::from_be_bytes(data[8..16].try_into().expect("8 bytes")),
        }
    }
}

impl fmt::Display for Fid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}:0x{:x}", self.container, self.key)
    }
}

impl fmt::Debug for Fid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fid({self})")
    }
}

/// Per-process monotonic object-identifier generator
///
/// Seeded from the wall clock at construction so identifiers from
/// successive process incarnations do not collide.
pub struct IdGenerator {
    counter: AtomicU64,
}

impl IdGenerator {
    /// Create a generator seeded at the current time
    #[must_use]
    pub fn new() -> Self {
        let seed_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self {
            counter: AtomicU64::new(seed_ms << 16),
        }
    }

    /// Reserve the next object identifier
    pub fn next(&self) -> Fid {
        let key = self.counter.fetch_add(1, Ordering::Relaxed);
        Fid {
            container: u64::from(FID_TYPE_OBJECT) << 56,
            key,
        }
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Current time in milliseconds since the Unix epoch
#[must_use]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fid_from_name_deterministic() {
        let a = Fid::from_name("moorage.gw.users", FID_TYPE_INDEX);
        let b = Fid::from_name("moorage.gw.users", FID_TYPE_INDEX);
        assert_eq!(a, b);
        assert_eq!(a.type_tag(), FID_TYPE_INDEX);

        let c = Fid::from_name("moorage.gw.emails", FID_TYPE_INDEX);
        assert_ne!(a, c);
    }

    #[test]
    fn test_fid_bytes_roundtrip() {
        let fid = Fid::from_name("bucket.b1.multiparts", FID_TYPE_INDEX);
        assert_eq!(Fid::from_bytes(fid.to_bytes()), fid);
    }

    #[test]
    fn test_fid_with_type() {
        let fid = Fid::from_name("layer", FID_TYPE_OBJECT);
        let idx = fid.with_type(FID_TYPE_INDEX);
        assert_eq!(idx.type_tag(), FID_TYPE_INDEX);
        assert_eq!(idx.key, fid.key);
        assert_eq!(idx.container & 0x00FF_FFFF_FFFF_FFFF, fid.container & 0x00FF_FFFF_FFFF_FFFF);
    }

    #[test]
    fn test_id_generator_monotonic() {
        let ids = IdGenerator::new();
        let a = ids.next();
        let b = ids.next();
        assert!(b.key > a.key);
        assert_eq!(a.type_tag(), FID_TYPE_OBJECT);
        assert!(!a.is_nil());
    }
}
