//! Striped byte-container I/O
//!
//! Handles creation, striped reads/writes, and deletion of the byte
//! containers behind objects. Two physical shapes exist: plain striped
//! objects and composite objects, the latter resolving through layer
//! sub-objects with write/read extent indices.

use crate::records::ObjectMeta;
use bytes::{Bytes, BytesMut};
use moorage_common::{Error, FID_TYPE_OBJECT, Fid, IdGenerator, Result};
use moorage_client::{
    CompositeLayer, Extent, IndexService, OBJ_CREATE_GEN_DI, OBJ_CREATE_META, OP_LAST,
    ObjectLayout, ObjectService, StripeGeometry, extent_val_to_bytes, layer_extent_index,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Saturation reference unit for I/O depth selection (32 KiB)
const DEPTH_UNIT: u64 = 32 * 1024;

/// Priority of a composite's top layer
///
/// `((0x00FF_FFFF - generation) << 8) | tier`; a single-tier store uses
/// generation 0 and tier 0 throughout.
#[must_use]
pub const fn layer_priority(generation: u32, tier: u8) -> u32 {
    ((0x00FF_FFFF - generation) << 8) | tier as u32
}

/// Round `v` up to a multiple of `align`
#[must_use]
pub const fn round_up(v: u64, align: u64) -> u64 {
    v.div_ceil(align) * align
}

/// Round `v` down to a multiple of `align`
#[must_use]
pub const fn round_down(v: u64, align: u64) -> u64 {
    v / align * align
}

/// Optimal I/O block size for an object with the given unit size
///
/// The group size is `N·U`. A saturation depth of `128 / ⌈U/32KiB⌉`
/// units bounds in-flight data; the ceiling block is
/// `depth·U·P·N/(N+K+S)` rounded up to a whole number of groups. Writes
/// below the ceiling align to the group, the final block of an object
/// only to the unit.
#[must_use]
pub fn optimal_block_size(unit: u64, geo: &StripeGeometry, len: u64, is_last: bool) -> u64 {
    let group = unit * u64::from(geo.data_units);
    let depth = (128 / unit.div_ceil(DEPTH_UNIT)).max(1);
    let width = u64::from(geo.data_units + geo.parity_units + geo.spare_units);
    let max_io = depth * unit * u64::from(geo.pool_width) * u64::from(geo.data_units) / width;
    let max_bs = round_up(max_io, group);
    if len >= max_bs {
        max_bs
    } else if is_last {
        round_up(len, unit)
    } else {
        round_up(len, group)
    }
}

/// Gateway over the striped object service
pub struct ContainerIo {
    obj: Arc<dyn ObjectService>,
    idx: Arc<dyn IndexService>,
    ids: Arc<IdGenerator>,
    extent_batch: usize,
}

impl ContainerIo {
    pub fn new(
        obj: Arc<dyn ObjectService>,
        idx: Arc<dyn IndexService>,
        ids: Arc<IdGenerator>,
        extent_batch: usize,
    ) -> Self {
        Self {
            obj,
            idx,
            ids,
            extent_batch: extent_batch.max(1),
        }
    }

    /// Unit size of a layout
    pub fn unit_size(&self, layout_id: u64) -> Result<u64> {
        self.obj.layouts().unit_size(layout_id)
    }

    /// Parity-group size (`N·U`) of a layout
    pub fn group_size(&self, layout_id: u64) -> Result<u64> {
        Ok(self.unit_size(layout_id)? * u64::from(self.obj.layouts().geometry().data_units))
    }

    /// Unit-rounded size for accounting; zero-byte objects round to zero
    pub fn rounded_size(&self, size: u64, layout_id: u64) -> Result<u64> {
        if size == 0 {
            return Ok(0);
        }
        Ok(round_up(size, self.unit_size(layout_id)?))
    }

    fn create_inner(&self, oid: Fid, size: u64, flags: u32) -> Result<ObjectMeta> {
        let layout_id = self.obj.layouts().find_by_objsize(size)?;
        self.obj.create(oid, layout_id, flags)?;
        Ok(ObjectMeta {
            oid,
            pver: self.obj.placement_version(),
            layout_id,
            is_composite: false,
            top_layer: Fid::NIL,
        })
    }

    /// Create a plain object sized for `size` bytes
    pub fn create(&self, size: u64) -> Result<ObjectMeta> {
        self.create_inner(self.ids.next(), size, OBJ_CREATE_GEN_DI)
    }

    /// Create an object at a name-derived identifier, opening it instead
    /// if a previous attempt already created it
    pub fn create_named(&self, name: &str, size: u64) -> Result<ObjectMeta> {
        let oid = Fid::from_name(name, FID_TYPE_OBJECT);
        match self.create_inner(oid, size, OBJ_CREATE_GEN_DI) {
            Ok(meta) => Ok(meta),
            Err(e) if e.is_already_exists() => {
                let layout_id = self.obj.layouts().find_by_objsize(size)?;
                self.obj
                    .open(oid, layout_id, self.obj.placement_version())?;
                Ok(ObjectMeta {
                    oid,
                    pver: self.obj.placement_version(),
                    layout_id,
                    is_composite: false,
                    top_layer: Fid::NIL,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Create a composite object: a root with service-side metadata, one
    /// top layer sub-object, and full-range write/read extents
    pub fn create_composite(&self, size: u64) -> Result<ObjectMeta> {
        let mut meta =
            self.create_inner(self.ids.next(), size, OBJ_CREATE_GEN_DI | OBJ_CREATE_META)?;
        let top = self.ids.next();

        if let Err(e) = self.compose(meta.oid, top, meta.layout_id) {
            // unwind whatever the failed step left behind
            self.quiet_delete(top);
            for write in [true, false] {
                let _ = self.drop_extent_index(top, write);
            }
            self.quiet_delete(meta.oid);
            return Err(e);
        }

        meta.is_composite = true;
        meta.top_layer = top;
        Ok(meta)
    }

    fn compose(&self, root: Fid, top: Fid, layout_id: u64) -> Result<()> {
        self.obj.create(top, layout_id, 0)?;
        self.obj.set_layout(
            root,
            ObjectLayout::Composite {
                layers: vec![CompositeLayer {
                    sub_object: top,
                    priority: layer_priority(0, 0),
                }],
            },
        )?;
        for write in [true, false] {
            self.idx.create_index(layer_extent_index(top, write))?;
            self.insert_extent(top, write, 0, u64::MAX)?;
        }
        Ok(())
    }

    /// Record one extent on a layer's write or read extent index
    pub fn insert_extent(&self, layer: Fid, write: bool, offset: u64, len: u64) -> Result<()> {
        let key = moorage_client::ExtentKey { layer, offset }.to_bytes();
        self.idx.put(
            layer_extent_index(layer, write),
            &key,
            &extent_val_to_bytes(len),
            true,
        )
    }

    /// Verify an object is reachable before I/O
    pub fn open(&self, meta: &ObjectMeta) -> Result<()> {
        self.obj.open(meta.oid, meta.layout_id, meta.pver)
    }

    /// Write `data` at `offset`, sliced into optimal blocks
    ///
    /// `is_last` marks the write that ends the object: its final block
    /// carries the last-block flag and is zero-padded to the unit size.
    pub fn write(&self, meta: &ObjectMeta, offset: u64, data: &[u8], is_last: bool) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let unit = self.unit_size(meta.layout_id)?;
        let geo = *self.obj.layouts().geometry();

        let mut off = offset;
        let mut rest = data;
        while !rest.is_empty() {
            let bs = optimal_block_size(unit, &geo, rest.len() as u64, is_last);
            let take = (bs as usize).min(rest.len());
            let (chunk, tail) = rest.split_at(take);
            let final_block = tail.is_empty();

            let ext_len = if final_block {
                round_up(take as u64, unit)
            } else {
                take as u64
            };
            let mut buf = BytesMut::with_capacity(ext_len as usize);
            buf.extend_from_slice(chunk);
            buf.resize(ext_len as usize, 0);

            let flags = if final_block && is_last { OP_LAST } else { 0 };
            self.obj
                .write(meta.oid, &[Extent::new(off, ext_len)], &[buf.freeze()], flags)?;

            off += take as u64;
            rest = tail;
        }
        Ok(())
    }

    /// Read `[start, end]` (inclusive), delivering trimmed regions to
    /// `sink` in order
    ///
    /// Reads run block-aligned from `rounddown(start, unit)`; the final
    /// parity group of the object is read with the last-block flag.
    pub fn read(
        &self,
        meta: &ObjectMeta,
        object_size: u64,
        start: u64,
        end: u64,
        sink: &mut dyn FnMut(u64, Bytes) -> Result<()>,
    ) -> Result<()> {
        if meta.oid.is_nil() || object_size == 0 {
            return Ok(());
        }
        let end = end.min(object_size - 1);
        if start > end {
            return Ok(());
        }
        let unit = self.unit_size(meta.layout_id)?;
        let geo = *self.obj.layouts().geometry();
        let object_span = round_up(object_size, unit);

        let mut off = round_down(start, unit);
        let bs = optimal_block_size(unit, &geo, end + 1 - off, false);
        while off <= end {
            let this = bs.min(round_up(end + 1 - off, unit));
            let flags = if off + this >= object_span { OP_LAST } else { 0 };
            let bufs = self.obj.read(meta.oid, &[Extent::new(off, this)], flags)?;
            let buf = bufs
                .into_iter()
                .next()
                .ok_or_else(|| Error::transport("object read returned no buffer"))?;

            let lo = start.max(off);
            let hi = end.min(off + this - 1);
            if hi >= lo {
                sink(lo, buf.slice((lo - off) as usize..=(hi - off) as usize))?;
            }
            off += this;
        }
        Ok(())
    }

    /// Destroy the byte container behind `meta`
    ///
    /// Composites drain and drop each layer's extent indices, delete the
    /// layer sub-objects, then the root. Zero-byte objects have no
    /// container and are a no-op.
    pub fn delete(&self, meta: &ObjectMeta) -> Result<()> {
        if meta.oid.is_nil() {
            return Ok(());
        }
        if meta.is_composite {
            self.delete_composite(meta.oid)
        } else {
            self.delete_tolerant(meta.oid)
        }
    }

    fn delete_composite(&self, root: Fid) -> Result<()> {
        let layers = match self.obj.layout_of(root) {
            Ok(ObjectLayout::Composite { layers }) => layers,
            Ok(ObjectLayout::Striped { .. }) => Vec::new(),
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e),
        };
        for layer in layers {
            for write in [true, false] {
                self.drop_extent_index(layer.sub_object, write)?;
            }
            self.quiet_delete(layer.sub_object);
        }
        self.delete_tolerant(root)
    }

    fn drop_extent_index(&self, layer: Fid, write: bool) -> Result<()> {
        let fid = layer_extent_index(layer, write);
        loop {
            let batch = match self.idx.next(fid, &[], self.extent_batch) {
                Ok(batch) => batch,
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) => return Err(e),
            };
            if batch.is_empty() {
                break;
            }
            for (key, _) in batch {
                match self.idx.del(fid, &key) {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
            }
        }
        match self.idx.delete_index(fid) {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn delete_tolerant(&self, oid: Fid) -> Result<()> {
        match self.obj.delete(oid) {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!(%oid, "object already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn quiet_delete(&self, oid: Fid) {
        if let Err(e) = self.obj.delete(oid) {
            if !e.is_not_found() {
                warn!(%oid, error = %e, "unwind delete failed");
            }
        }
    }
}
