//! Object service contract and striping layouts
//!
//! Objects are byte containers striped over parity groups. Each object
//! carries a layout id chosen from the cluster's layout catalog at
//! create time; composite objects resolve their bytes through one or
//! more layer sub-objects with extent indices.

use bytes::Bytes;
use moorage_common::{Error, FID_TYPE_INDEX, Fid, Result};

/// Create flag: generate data-integrity checksums on the service side
pub const OBJ_CREATE_GEN_DI: u32 = 1 << 0;

/// Create flag: the service keeps its own object metadata record
pub const OBJ_CREATE_META: u32 = 1 << 1;

/// Op flag: this operation covers the final parity group of the object
pub const OP_LAST: u32 = 1 << 0;

/// Op flag: the operation spans whole parity groups only
pub const OP_FULL: u32 = 1 << 1;

/// One contiguous byte range of an object
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Extent {
    pub offset: u64,
    pub len: u64,
}

impl Extent {
    #[must_use]
    pub const fn new(offset: u64, len: u64) -> Self {
        Self { offset, len }
    }

    /// One past the last byte
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.offset + self.len
    }
}

/// Cluster-wide stripe geometry: N data + K parity + S spare units over
/// a pool of P devices
#[derive(Clone, Copy, Debug)]
pub struct StripeGeometry {
    pub data_units: u32,
    pub parity_units: u32,
    pub spare_units: u32,
    pub pool_width: u32,
}

impl Default for StripeGeometry {
    fn default() -> Self {
        Self {
            data_units: 4,
            parity_units: 2,
            spare_units: 0,
            pool_width: 8,
        }
    }
}

/// One striping recipe: a unit size under the cluster geometry
#[derive(Clone, Copy, Debug)]
pub struct Layout {
    pub id: u64,
    pub unit_size: u64,
}

/// The cluster's table of available layouts
///
/// Unit sizes are powers of two; `find_by_objsize` picks the smallest
/// unit keeping the object under `MAX_UNITS_PER_OBJECT` units, falling
/// back to the largest unit for anything bigger.
#[derive(Clone, Debug)]
pub struct LayoutCatalog {
    layouts: Vec<Layout>,
    geometry: StripeGeometry,
}

/// Unit-count ceiling steering layout selection
const MAX_UNITS_PER_OBJECT: u64 = 64;

impl LayoutCatalog {
    /// The standard table: unit sizes 4 KiB … 1 MiB in powers of two
    #[must_use]
    pub fn standard(geometry: StripeGeometry) -> Self {
        let layouts = (0u64..9)
            .map(|i| Layout {
                id: i + 1,
                unit_size: 4096 << i,
            })
            .collect();
        Self { layouts, geometry }
    }

    /// Pick the layout best matching an object size
    pub fn find_by_objsize(&self, size: u64) -> Result<u64> {
        let last = self
            .layouts
            .last()
            .ok_or_else(|| Error::transport("layout catalog is empty"))?;
        for layout in &self.layouts {
            if size <= layout.unit_size * MAX_UNITS_PER_OBJECT {
                return Ok(layout.id);
            }
        }
        Ok(last.id)
    }

    /// Unit size of a layout
    pub fn unit_size(&self, layout_id: u64) -> Result<u64> {
        self.layouts
            .iter()
            .find(|l| l.id == layout_id)
            .map(|l| l.unit_size)
            .ok_or_else(|| Error::invalid_argument(format!("unknown layout id {layout_id}")))
    }

    /// The cluster stripe geometry
    #[must_use]
    pub const fn geometry(&self) -> &StripeGeometry {
        &self.geometry
    }
}

/// One layer of a composite object
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompositeLayer {
    pub sub_object: Fid,
    pub priority: u32,
}

/// The physical shape of an object as recorded by the store
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ObjectLayout {
    /// A single striped object
    Striped { layout_id: u64 },
    /// An umbrella object resolved through layer sub-objects
    Composite { layers: Vec<CompositeLayer> },
}

/// FID of a layer's write- or read-extent index
///
/// The store exposes no enumeration of these indices, so their
/// identifiers are derived from the layer FID: re-stamp the index type
/// tag and perturb the key word by the extent-index kind.
#[must_use]
pub fn layer_extent_index(layer: Fid, write: bool) -> Fid {
    let kind = if write { u64::from(b'W') } else { u64::from(b'R') };
    Fid::new(layer.container, layer.key ^ kind).with_type(FID_TYPE_INDEX)
}

/// Key of one extent record: `(layer, offset)` big-endian so offsets
/// enumerate in order under a layer prefix
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExtentKey {
    pub layer: Fid,
    pub offset: u64,
}

impl ExtentKey {
    /// 24-byte wire form
    #[must_use]
    pub fn to_bytes(self) -> [u8; 24] {
        let mut buf = [0u8; 24];
        buf[0..16].copy_from_slice(&self.layer.to_bytes());
        buf[16..24].copy_from_slice(&self.offset.to_be_bytes());
        buf
    }

    /// Parse the wire form
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() != 24 {
            return Err(Error::decode(format!("extent key length {}", data.len())));
        }
        let layer = Fid::from_bytes(data[0..16].try_into().expect("16 bytes"));
        let offset = u64::from_be_bytes(data[16..24].try_into().expect("8 bytes"));
        Ok(Self { layer, offset })
    }
}

/// Wire form of an extent record's value (its length)
#[must_use]
pub fn extent_val_to_bytes(len: u64) -> [u8; 8] {
    len.to_be_bytes()
}

/// Parse an extent record's value
pub fn extent_val_from_bytes(data: &[u8]) -> Result<u64> {
    if data.len() != 8 {
        return Err(Error::decode(format!("extent value length {}", data.len())));
    }
    Ok(u64::from_be_bytes(data.try_into().expect("8 bytes")))
}

/// Striped byte-container service
///
/// Extent vectors and buffer vectors are parallel: one buffer per
/// extent, already padded to the extent's length by the caller.
pub trait ObjectService: Send + Sync {
    /// Create an object with the given layout
    fn create(&self, id: Fid, layout_id: u64, flags: u32) -> Result<()>;

    /// Open an existing object
    fn open(&self, id: Fid, layout_id: u64, pver: Fid) -> Result<()>;

    /// Delete an object and its bytes
    fn delete(&self, id: Fid) -> Result<()>;

    /// Write the given extents
    fn write(&self, id: Fid, extents: &[Extent], bufs: &[Bytes], flags: u32) -> Result<()>;

    /// Read the given extents; short regions come back zero-filled
    fn read(&self, id: Fid, extents: &[Extent], flags: u32) -> Result<Vec<Bytes>>;

    /// The object's recorded layout
    fn layout_of(&self, id: Fid) -> Result<ObjectLayout>;

    /// Replace the object's recorded layout (striped → composite promotion)
    fn set_layout(&self, id: Fid, layout: ObjectLayout) -> Result<()>;

    /// The cluster layout catalog
    fn layouts(&self) -> &LayoutCatalog;

    /// The current placement (pool) version new objects are created under
    fn placement_version(&self) -> Fid;
}
