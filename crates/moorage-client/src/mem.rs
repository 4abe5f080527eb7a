//! Process-local store implementation
//!
//! `MemoryCluster` implements both service contracts over ordered maps
//! and flat byte buffers. It exists for the test suite and for
//! embedding demos; durability and distribution are the real store's
//! business.

use crate::index::IndexService;
use crate::object::{Extent, LayoutCatalog, ObjectLayout, ObjectService, StripeGeometry};
use bytes::Bytes;
use moorage_common::{Error, FID_TYPE_INDEX, Fid, Result};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

struct MemObject {
    layout: ObjectLayout,
    data: Vec<u8>,
}

/// In-memory object + index store
pub struct MemoryCluster {
    indices: RwLock<HashMap<Fid, BTreeMap<Vec<u8>, Vec<u8>>>>,
    objects: RwLock<HashMap<Fid, MemObject>>,
    layouts: LayoutCatalog,
    pver: Fid,
    write_ops: AtomicU64,
}

impl MemoryCluster {
    #[must_use]
    pub fn new() -> Self {
        Self::with_geometry(StripeGeometry::default())
    }

    #[must_use]
    pub fn with_geometry(geometry: StripeGeometry) -> Self {
        Self {
            indices: RwLock::new(HashMap::new()),
            objects: RwLock::new(HashMap::new()),
            layouts: LayoutCatalog::standard(geometry),
            pver: Fid::from_name("pool.version.0", FID_TYPE_INDEX),
            write_ops: AtomicU64::new(0),
        }
    }

    /// Number of object write operations served (test inspection)
    #[must_use]
    pub fn write_ops(&self) -> u64 {
        self.write_ops.load(Ordering::Relaxed)
    }

    /// Number of live byte objects (test inspection)
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.read().len()
    }

    /// Whether a byte object exists (test inspection)
    #[must_use]
    pub fn object_exists(&self, id: Fid) -> bool {
        self.objects.read().contains_key(&id)
    }

    /// Whether an index exists (test inspection)
    #[must_use]
    pub fn index_exists(&self, id: Fid) -> bool {
        self.indices.read().contains_key(&id)
    }

    /// Number of entries in an index, if it exists (test inspection)
    #[must_use]
    pub fn index_len(&self, id: Fid) -> Option<usize> {
        self.indices.read().get(&id).map(BTreeMap::len)
    }
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexService for MemoryCluster {
    fn create_index(&self, id: Fid) -> Result<()> {
        let mut indices = self.indices.write();
        if indices.contains_key(&id) {
            return Err(Error::already_exists(format!("index {id}")));
        }
        indices.insert(id, BTreeMap::new());
        Ok(())
    }

    fn delete_index(&self, id: Fid) -> Result<()> {
        self.indices
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("index {id}")))
    }

    fn put(&self, id: Fid, key: &[u8], value: &[u8], overwrite: bool) -> Result<()> {
        let mut indices = self.indices.write();
        let index = indices
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("index {id}")))?;
        if !overwrite && index.contains_key(key) {
            return Err(Error::already_exists(format!("key in index {id}")));
        }
        index.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn get(&self, id: Fid, key: &[u8]) -> Result<Vec<u8>> {
        let indices = self.indices.read();
        let index = indices
            .get(&id)
            .ok_or_else(|| Error::not_found(format!("index {id}")))?;
        index
            .get(key)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("key in index {id}")))
    }

    fn del(&self, id: Fid, key: &[u8]) -> Result<()> {
        let mut indices = self.indices.write();
        let index = indices
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("index {id}")))?;
        index
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("key in index {id}")))
    }

    fn next(&self, id: Fid, from: &[u8], max: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let indices = self.indices.read();
        let index = indices
            .get(&id)
            .ok_or_else(|| Error::not_found(format!("index {id}")))?;
        Ok(index
            .range(from.to_vec()..)
            .take(max)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

impl ObjectService for MemoryCluster {
    fn create(&self, id: Fid, layout_id: u64, _flags: u32) -> Result<()> {
        self.layouts.unit_size(layout_id)?;
        let mut objects = self.objects.write();
        if objects.contains_key(&id) {
            return Err(Error::already_exists(format!("object {id}")));
        }
        objects.insert(
            id,
            MemObject {
                layout: ObjectLayout::Striped { layout_id },
                data: Vec::new(),
            },
        );
        Ok(())
    }

    fn open(&self, id: Fid, _layout_id: u64, _pver: Fid) -> Result<()> {
        if self.objects.read().contains_key(&id) {
            Ok(())
        } else {
            Err(Error::not_found(format!("object {id}")))
        }
    }

    fn delete(&self, id: Fid) -> Result<()> {
        self.objects
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("object {id}")))
    }

    fn write(&self, id: Fid, extents: &[Extent], bufs: &[Bytes], _flags: u32) -> Result<()> {
        if extents.len() != bufs.len() {
            return Err(Error::invalid_argument("extent/buffer vector mismatch"));
        }
        self.write_ops.fetch_add(1, Ordering::Relaxed);
        let mut objects = self.objects.write();
        let obj = objects
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("object {id}")))?;
        for (ext, buf) in extents.iter().zip(bufs) {
            let end = ext.offset as usize + buf.len().min(ext.len as usize);
            if obj.data.len() < end {
                obj.data.resize(end, 0);
            }
            let n = buf.len().min(ext.len as usize);
            obj.data[ext.offset as usize..ext.offset as usize + n].copy_from_slice(&buf[..n]);
        }
        Ok(())
    }

    fn read(&self, id: Fid, extents: &[Extent], _flags: u32) -> Result<Vec<Bytes>> {
        let objects = self.objects.read();
        let obj = objects
            .get(&id)
            .ok_or_else(|| Error::not_found(format!("object {id}")))?;
        let mut out = Vec::with_capacity(extents.len());
        for ext in extents {
            let mut buf = vec![0u8; ext.len as usize];
            let start = (ext.offset as usize).min(obj.data.len());
            let end = (ext.end() as usize).min(obj.data.len());
            if end > start {
                buf[..end - start].copy_from_slice(&obj.data[start..end]);
            }
            out.push(Bytes::from(buf));
        }
        Ok(out)
    }

    fn layout_of(&self, id: Fid) -> Result<ObjectLayout> {
        let objects = self.objects.read();
        objects
            .get(&id)
            .map(|o| o.layout.clone())
            .ok_or_else(|| Error::not_found(format!("object {id}")))
    }

    fn set_layout(&self, id: Fid, layout: ObjectLayout) -> Result<()> {
        let mut objects = self.objects.write();
        let obj = objects
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("object {id}")))?;
        obj.layout = layout;
        Ok(())
    }

    fn layouts(&self) -> &LayoutCatalog {
        &self.layouts
    }

    fn placement_version(&self) -> Fid {
        self.pver
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::CompositeLayer;
    use moorage_common::FID_TYPE_OBJECT;

    fn oid(name: &str) -> Fid {
        Fid::from_name(name, FID_TYPE_OBJECT)
    }

    #[test]
    fn test_index_put_get_del() {
        let cluster = MemoryCluster::new();
        let idx = Fid::from_name("t.index", FID_TYPE_INDEX);
        cluster.create_index(idx).unwrap();

        cluster.put(idx, b"k1", b"v1", false).unwrap();
        assert!(cluster.put(idx, b"k1", b"v2", false).unwrap_err().is_already_exists());
        cluster.put(idx, b"k1", b"v2", true).unwrap();
        assert_eq!(cluster.get(idx, b"k1").unwrap(), b"v2");

        cluster.del(idx, b"k1").unwrap();
        assert!(cluster.get(idx, b"k1").unwrap_err().is_not_found());
    }

    #[test]
    fn test_index_next_ordered() {
        let cluster = MemoryCluster::new();
        let idx = Fid::from_name("t.index", FID_TYPE_INDEX);
        cluster.create_index(idx).unwrap();
        for k in ["b", "a", "d", "c"] {
            cluster.put(idx, k.as_bytes(), b"", false).unwrap();
        }
        let entries = cluster.next(idx, b"b", 2).unwrap();
        let keys: Vec<_> = entries.iter().map(|(k, _)| k.as_slice()).collect();
        assert_eq!(keys, vec![b"b".as_slice(), b"c".as_slice()]);
    }

    #[test]
    fn test_object_write_read() {
        let cluster = MemoryCluster::new();
        let id = oid("obj-1");
        cluster.create(id, 1, 0).unwrap();

        cluster
            .write(id, &[Extent::new(4, 5)], &[Bytes::from_static(b"hello")], 0)
            .unwrap();
        let out = cluster.read(id, &[Extent::new(0, 9)], 0).unwrap();
        assert_eq!(&out[0][..], b"\0\0\0\0hello");

        // reads past the written tail are zero-filled
        let out = cluster.read(id, &[Extent::new(8, 4)], 0).unwrap();
        assert_eq!(&out[0][..], b"o\0\0\0");
    }

    #[test]
    fn test_object_create_conflict_and_delete() {
        let cluster = MemoryCluster::new();
        let id = oid("obj-1");
        cluster.create(id, 1, 0).unwrap();
        assert!(cluster.create(id, 1, 0).unwrap_err().is_already_exists());
        cluster.delete(id).unwrap();
        assert!(cluster.delete(id).unwrap_err().is_not_found());
    }

    #[test]
    fn test_layout_promotion() {
        let cluster = MemoryCluster::new();
        let root = oid("root");
        let layer = oid("layer");
        cluster.create(root, 1, 0).unwrap();
        cluster.create(layer, 1, 0).unwrap();

        let composite = ObjectLayout::Composite {
            layers: vec![CompositeLayer { sub_object: layer, priority: 0xFF_FFFF_00 }],
        };
        cluster.set_layout(root, composite.clone()).unwrap();
        assert_eq!(cluster.layout_of(root).unwrap(), composite);
    }
}
