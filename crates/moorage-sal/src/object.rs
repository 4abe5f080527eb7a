//! Object operations
//!
//! PUT, GET/HEAD, DELETE, and COPY with versioned-bucket semantics:
//! null-version replacement on unversioned buckets, instance generation
//! and CURRENT reconciliation on versioned ones, delete markers, and
//! conditional request checks. Reads dispatch on the entry category so
//! multipart heads stream through their part records.

use crate::catalog::bucket_index;
use crate::records::{
    ATTR_CRYPT_MODE, ATTR_TAGGING, Attrs, BucketRecord, DirEntry, ENTRY_CURRENT,
    ENTRY_DELETE_MARKER, ENTRY_VER, EntryCategory, ObjectMeta,
};
use crate::store::Store;
use crate::version::{KEY_SEP, entry_key, name_prefix, new_instance};
use crate::writer::ObjectWriter;
use bytes::Bytes;
use moorage_common::{Error, Result, now_ms};
use tracing::debug;

/// Inputs of a PUT
#[derive(Clone, Debug, Default)]
pub struct PutParams {
    pub owner: String,
    pub owner_display: String,
    pub attrs: Attrs,
    /// Expected object size; steers layout selection for streamed PUTs
    pub size_hint: u64,
}

/// Inputs of a GET/HEAD
#[derive(Clone, Debug, Default)]
pub struct GetParams {
    /// Explicit version; `"null"` addresses the null version
    pub instance: Option<String>,
    pub if_match: Option<String>,
    pub if_none_match: Option<String>,
    /// Milliseconds since epoch
    pub if_modified_since: Option<u64>,
    pub if_unmodified_since: Option<u64>,
    /// Inclusive byte range
    pub range: Option<(u64, u64)>,
}

/// What a tag set on the copy destination comes from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaggingDirective {
    /// Carry the source object's tags
    Copy,
    /// Take the tags supplied with the request
    Replace,
}

/// Inputs of a COPY
#[derive(Clone, Debug)]
pub struct CopyParams {
    pub source: GetParams,
    pub directive: TaggingDirective,
    /// Tag set applied under `TaggingDirective::Replace`
    pub tags: Option<Vec<u8>>,
    /// Destination owner
    pub owner: String,
    pub owner_display: String,
    /// Set when the source lives in another zonegroup
    pub cross_zonegroup: bool,
}

impl Default for CopyParams {
    fn default() -> Self {
        Self {
            source: GetParams::default(),
            directive: TaggingDirective::Copy,
            tags: None,
            owner: String::new(),
            owner_display: String::new(),
            cross_zonegroup: false,
        }
    }
}

/// Outcome of a DELETE
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeleteResult {
    /// Whether a delete marker now represents the name
    pub delete_marker: bool,
    /// The removed or created version
    pub version_id: Option<String>,
}

/// A streaming PUT in flight
pub struct PutOp<'a> {
    store: &'a Store,
    bucket: BucketRecord,
    name: String,
    params: PutParams,
    writer: ObjectWriter<'a>,
}

impl PutOp<'_> {
    /// Feed a buffer; empty signals end-of-stream
    pub fn process(&mut self, data: &[u8]) -> Result<()> {
        self.writer.process(data)
    }

    /// Finish the stream and link the entry into the bucket index
    pub fn complete(self) -> Result<DirEntry> {
        let result = self.writer.complete()?;
        if let Err(e) =
            self.store
                .quota()
                .check(&self.bucket.owner, &self.bucket.name, result.size, 1)
        {
            // the bytes are already down; reclaim them before failing
            let fqn = format!("{}/{}", self.bucket.tenant_bucket(), self.name);
            self.store.dispose_container(fqn, result.meta, result.size);
            return Err(e);
        }

        let entry = DirEntry {
            name: self.name,
            instance: String::new(),
            size: result.size,
            accounted_size: result.size,
            mtime: now_ms(),
            etag: result.etag,
            owner: self.params.owner,
            owner_display: self.params.owner_display,
            category: EntryCategory::Main,
            flags: 0,
            meta: result.meta,
            attrs: self.params.attrs,
        };
        self.store
            .link_entry(&self.bucket, entry, result.rounded_size as i64, true)
    }
}

impl Store {
    /// Start a streaming PUT
    pub fn put_object_op<'a>(
        &'a self,
        bucket: &BucketRecord,
        name: &str,
        params: PutParams,
    ) -> Result<PutOp<'a>> {
        validate_object_name(name)?;
        Ok(PutOp {
            store: self,
            bucket: bucket.clone(),
            name: name.to_string(),
            writer: ObjectWriter::new(self.io(), params.size_hint),
            params,
        })
    }

    /// One-shot PUT of an in-memory payload
    pub fn put_object(
        &self,
        bucket: &BucketRecord,
        name: &str,
        data: &[u8],
        mut params: PutParams,
    ) -> Result<DirEntry> {
        params.size_hint = params.size_hint.max(data.len() as u64);
        let mut op = self.put_object_op(bucket, name, params)?;
        op.process(data)?;
        op.process(&[])?;
        op.complete()
    }

    /// Insert a finished entry under the bucket's versioning rules
    ///
    /// Versioning enabled: write at a fresh instance flagged
    /// `VER|CURRENT`, then clear `CURRENT` on the predecessor.
    /// Otherwise: replace the null-version record (disposing the old
    /// bytes), flagging the record `CURRENT` when the bucket is
    /// suspended rather than plain unversioned.
    pub(crate) fn link_entry(
        &self,
        bucket: &BucketRecord,
        mut entry: DirEntry,
        rounded_size: i64,
        add_stats: bool,
    ) -> Result<DirEntry> {
        let tb = bucket.tenant_bucket();
        if bucket.versioning_enabled() {
            entry.instance = new_instance(entry.mtime);
            entry.flags |= ENTRY_VER | ENTRY_CURRENT;
            self.catalog().put_entry(&tb, &entry, true)?;
            self.clear_predecessor_current(bucket, &entry)?;
        } else {
            entry.instance = String::new();
            if bucket.versioning_suspended() {
                entry.flags |= ENTRY_CURRENT;
            }
            self.unlink_null_version(bucket, &entry.name)?;
            self.catalog().put_entry(&tb, &entry, true)?;
            if bucket.versioning_suspended() {
                self.clear_predecessor_current(bucket, &entry)?;
            }
        }
        if add_stats {
            self.catalog().adjust_stats(
                &bucket.owner,
                &bucket.name,
                entry.category,
                entry.size as i64,
                rounded_size,
                1,
            );
        }
        debug!(
            bucket = tb,
            name = entry.name,
            instance = entry.instance,
            size = entry.size,
            "object linked"
        );
        Ok(entry)
    }

    /// Remove an existing null-version record, disposing its bytes and
    /// subtracting its stats
    fn unlink_null_version(&self, bucket: &BucketRecord, name: &str) -> Result<()> {
        let tb = bucket.tenant_bucket();
        let key = entry_key(name, "");
        let old = match self.catalog().get_entry(&tb, &key) {
            Ok(old) => old,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        self.dispose_entry(bucket, &old);
        self.catalog().del_entry(&tb, &key)?;
        if !old.is_delete_marker() {
            self.subtract_entry_stats(bucket, &old);
        }
        Ok(())
    }

    pub(crate) fn subtract_entry_stats(&self, bucket: &BucketRecord, entry: &DirEntry) {
        let rounded = self
            .io()
            .rounded_size(entry.size, entry.meta.layout_id)
            .unwrap_or(entry.size);
        self.catalog().adjust_stats(
            &bucket.owner,
            &bucket.name,
            entry.category,
            -(entry.size as i64),
            -(rounded as i64),
            -1,
        );
    }

    /// Clear `CURRENT` on the entry's predecessor, if any
    ///
    /// A targeted NEXT over the first two records of the name; two
    /// racing writers can both miss each other's record, so readers
    /// must still resolve by mtime.
    fn clear_predecessor_current(&self, bucket: &BucketRecord, entry: &DirEntry) -> Result<()> {
        let tb = bucket.tenant_bucket();
        let prefix = name_prefix(&entry.name);
        let batch =
            self.catalog()
                .gateway()
                .next(&bucket_index(&tb), &prefix, 2, Some(&prefix), None)?;
        for item in batch {
            let mut rec = DirEntry::from_bytes(&item.value)?;
            if rec.instance == entry.instance {
                continue;
            }
            if rec.is_current() {
                rec.flags &= !ENTRY_CURRENT;
                self.catalog().put_entry(&tb, &rec, true)?;
            }
        }
        Ok(())
    }

    /// Resolve a (name, instance?) to its entry
    ///
    /// Without an instance the newest-by-mtime record wins; a winning
    /// delete marker reads as absent. An explicitly addressed delete
    /// marker is `NotAllowed`.
    fn resolve_object(
        &self,
        bucket: &BucketRecord,
        name: &str,
        instance: Option<&str>,
    ) -> Result<DirEntry> {
        validate_object_name(name)?;
        let tb = bucket.tenant_bucket();
        if let Some(inst) = instance {
            let inst = normalize_instance(inst);
            let entry = self.catalog().get_entry(&tb, &entry_key(name, inst))?;
            if entry.is_delete_marker() {
                return Err(Error::NotAllowed(format!(
                    "{name} is a delete marker at this version"
                )));
            }
            return Ok(entry);
        }

        let prefix = name_prefix(name);
        let batch =
            self.catalog()
                .gateway()
                .next(&bucket_index(&tb), &prefix, 2, Some(&prefix), None)?;
        let newest = batch
            .into_iter()
            .map(|item| DirEntry::from_bytes(&item.value))
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .max_by_key(|e| e.mtime)
            .ok_or_else(|| Error::not_found(format!("{tb}/{name}")))?;
        if newest.is_delete_marker() {
            return Err(Error::not_found(format!("{tb}/{name}")));
        }
        Ok(newest)
    }

    /// HEAD: resolve and run the conditional checks
    pub fn head_object(
        &self,
        bucket: &BucketRecord,
        name: &str,
        params: &GetParams,
    ) -> Result<DirEntry> {
        let entry = self.resolve_object(bucket, name, params.instance.as_deref())?;
        check_conditionals(&entry, params)?;
        Ok(entry)
    }

    /// GET: resolve, check, and stream the requested range to `sink`
    pub fn get_object(
        &self,
        bucket: &BucketRecord,
        name: &str,
        params: &GetParams,
        sink: &mut dyn FnMut(u64, Bytes) -> Result<()>,
    ) -> Result<DirEntry> {
        let entry = self.head_object(bucket, name, params)?;
        if entry.size == 0 {
            return Ok(entry);
        }
        let (start, end) = match params.range {
            Some((start, end)) => {
                if start > end || start >= entry.size {
                    return Err(Error::invalid_argument("range out of bounds"));
                }
                (start, end.min(entry.size - 1))
            }
            None => (0, entry.size - 1),
        };
        if entry.category == EntryCategory::MultiMeta && !entry.meta.is_composite {
            self.read_multipart_object(bucket, &entry, start, end, sink)?;
        } else {
            self.io().read(&entry.meta, entry.size, start, end, sink)?;
        }
        Ok(entry)
    }

    /// DELETE with versioned-bucket semantics
    pub fn delete_object(
        &self,
        bucket: &BucketRecord,
        name: &str,
        instance: Option<&str>,
    ) -> Result<DeleteResult> {
        validate_object_name(name)?;
        let tb = bucket.tenant_bucket();

        if !bucket.versioned() {
            let key = entry_key(name, "");
            let old = self.catalog().get_entry(&tb, &key)?;
            self.catalog().del_entry(&tb, &key)?;
            self.dispose_entry(bucket, &old);
            if !old.is_delete_marker() {
                self.subtract_entry_stats(bucket, &old);
            }
            return Ok(DeleteResult {
                delete_marker: false,
                version_id: None,
            });
        }

        if let Some(inst) = instance {
            let norm = normalize_instance(inst);
            let key = entry_key(name, norm);
            let old = self.catalog().get_entry(&tb, &key)?;
            self.catalog().del_entry(&tb, &key)?;
            if !old.is_delete_marker() {
                self.dispose_entry(bucket, &old);
                self.subtract_entry_stats(bucket, &old);
            }
            if old.is_current() {
                self.promote_newest(bucket, name)?;
            }
            return Ok(DeleteResult {
                delete_marker: old.is_delete_marker(),
                version_id: Some(inst.to_string()),
            });
        }

        let now = now_ms();
        if bucket.versioning_enabled() {
            let marker = DirEntry {
                name: name.to_string(),
                instance: new_instance(now),
                size: 0,
                accounted_size: 0,
                mtime: now,
                etag: String::new(),
                owner: bucket.owner.clone(),
                owner_display: String::new(),
                category: EntryCategory::Main,
                flags: ENTRY_DELETE_MARKER | ENTRY_VER | ENTRY_CURRENT,
                meta: ObjectMeta::empty(),
                attrs: Attrs::new(),
            };
            self.catalog().put_entry(&tb, &marker, true)?;
            self.clear_predecessor_current(bucket, &marker)?;
            return Ok(DeleteResult {
                delete_marker: true,
                version_id: Some(marker.instance),
            });
        }

        // suspended: the marker takes the null slot
        self.unlink_null_version(bucket, name)?;
        let marker = DirEntry {
            name: name.to_string(),
            instance: String::new(),
            size: 0,
            accounted_size: 0,
            mtime: now,
            etag: String::new(),
            owner: bucket.owner.clone(),
            owner_display: String::new(),
            category: EntryCategory::Main,
            flags: ENTRY_DELETE_MARKER | ENTRY_CURRENT,
            meta: ObjectMeta::empty(),
            attrs: Attrs::new(),
        };
        self.catalog().put_entry(&tb, &marker, true)?;
        self.clear_predecessor_current(bucket, &marker)?;
        Ok(DeleteResult {
            delete_marker: true,
            version_id: Some("null".to_string()),
        })
    }

    /// After removing the CURRENT version, flag the new newest
    fn promote_newest(&self, bucket: &BucketRecord, name: &str) -> Result<()> {
        let tb = bucket.tenant_bucket();
        let prefix = name_prefix(name);
        let batch =
            self.catalog()
                .gateway()
                .next(&bucket_index(&tb), &prefix, 2, Some(&prefix), None)?;
        let newest = batch
            .into_iter()
            .map(|item| DirEntry::from_bytes(&item.value))
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .max_by_key(|e| e.mtime);
        if let Some(mut newest) = newest {
            if !newest.is_current() {
                newest.flags |= ENTRY_CURRENT;
                self.catalog().put_entry(&tb, &newest, true)?;
            }
        }
        Ok(())
    }

    /// Read an object's attribute map
    pub fn get_object_attrs(
        &self,
        bucket: &BucketRecord,
        name: &str,
        instance: Option<&str>,
    ) -> Result<Attrs> {
        Ok(self.resolve_object(bucket, name, instance)?.attrs)
    }

    /// Replace an object's attribute map in place
    pub fn set_object_attrs(
        &self,
        bucket: &BucketRecord,
        name: &str,
        instance: Option<&str>,
        attrs: Attrs,
    ) -> Result<DirEntry> {
        let tb = bucket.tenant_bucket();
        let mut entry = self.resolve_object(bucket, name, instance)?;
        entry.attrs = attrs;
        self.catalog().put_entry(&tb, &entry, true)?;
        Ok(entry)
    }

    /// Same-zone COPY through the writer pipeline
    pub fn copy_object(
        &self,
        src_bucket: &BucketRecord,
        src_name: &str,
        dst_bucket: &BucketRecord,
        dst_name: &str,
        params: &CopyParams,
    ) -> Result<DirEntry> {
        if params.cross_zonegroup {
            return Err(Error::NotImplemented("cross-zonegroup copy".to_string()));
        }
        if src_bucket.tenant_bucket() == dst_bucket.tenant_bucket() && src_name == dst_name {
            return Err(Error::invalid_argument("copy source equals destination"));
        }
        let src = self.head_object(src_bucket, src_name, &params.source)?;
        if src.attrs.contains_key(ATTR_CRYPT_MODE) {
            return Err(Error::NotImplemented("copy of encrypted source".to_string()));
        }

        let mut attrs = src.attrs.clone();
        attrs.remove(ATTR_UPLOAD_ID_KEY);
        if params.directive == TaggingDirective::Replace {
            attrs.remove(ATTR_TAGGING);
            if let Some(tags) = &params.tags {
                attrs.insert(ATTR_TAGGING.to_string(), tags.clone());
            }
        }

        let mut op = self.put_object_op(
            dst_bucket,
            dst_name,
            PutParams {
                owner: params.owner.clone(),
                owner_display: params.owner_display.clone(),
                attrs,
                size_hint: src.size,
            },
        )?;
        self.get_object(src_bucket, src_name, &params.source, &mut |_, buf| {
            op.process(&buf)
        })?;
        op.process(&[])?;
        op.complete()
    }
}

const ATTR_UPLOAD_ID_KEY: &str = crate::records::ATTR_UPLOAD_ID;

fn validate_object_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_argument("empty object name"));
    }
    if name.as_bytes().contains(&KEY_SEP) {
        return Err(Error::invalid_argument(
            "object name contains a reserved byte",
        ));
    }
    Ok(())
}

/// `"null"` in a request addresses the empty instance
fn normalize_instance(instance: &str) -> &str {
    if instance == "null" { "" } else { instance }
}

fn check_conditionals(entry: &DirEntry, params: &GetParams) -> Result<()> {
    if let Some(tag) = &params.if_match {
        if *tag != entry.etag {
            return Err(Error::PreconditionFailed("if-match".to_string()));
        }
    }
    if let Some(tag) = &params.if_none_match {
        if *tag == entry.etag {
            return Err(Error::PreconditionFailed("if-none-match".to_string()));
        }
    }
    if let Some(t) = params.if_unmodified_since {
        if entry.mtime > t {
            return Err(Error::PreconditionFailed("if-unmodified-since".to_string()));
        }
    }
    if let Some(t) = params.if_modified_since {
        if entry.mtime <= t {
            return Err(Error::PreconditionFailed("if-modified-since".to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::ListParams;
    use crate::records::{BUCKET_VERSIONED, BUCKET_VERSIONS_SUSPENDED};
    use moorage_client::MemoryCluster;
    use moorage_common::SalConfig;
    use std::sync::Arc;

    struct Rig {
        cluster: Arc<MemoryCluster>,
        store: Store,
    }

    fn rig() -> Rig {
        let cluster = Arc::new(MemoryCluster::new());
        let store = Store::open(cluster.clone(), cluster.clone(), SalConfig::default()).unwrap();
        Rig { cluster, store }
    }

    fn plain_bucket(store: &Store, name: &str) -> BucketRecord {
        store
            .create_bucket(BucketRecord::new(name, "alice", now_ms()))
            .unwrap()
    }

    fn versioned_bucket(store: &Store, name: &str) -> BucketRecord {
        let mut b = BucketRecord::new(name, "alice", now_ms());
        b.flags |= BUCKET_VERSIONED;
        store.create_bucket(b).unwrap()
    }

    fn read_all(store: &Store, bucket: &BucketRecord, name: &str) -> Vec<u8> {
        let mut out = Vec::new();
        store
            .get_object(bucket, name, &GetParams::default(), &mut |_, buf| {
                out.extend_from_slice(&buf);
                Ok(())
            })
            .unwrap();
        out
    }

    #[test]
    fn test_zero_byte_put_has_no_container() {
        // PUT of an empty body: size 0, the empty-input etag, and no
        // byte object anywhere in the store
        let rig = rig();
        let b = plain_bucket(&rig.store, "b");
        let entry = rig
            .store
            .put_object(&b, "a", b"", PutParams::default())
            .unwrap();

        assert_eq!(entry.size, 0);
        assert_eq!(entry.etag, "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(rig.cluster.object_count(), 0);

        let head = rig
            .store
            .head_object(&b, "a", &GetParams::default())
            .unwrap();
        assert_eq!(head.size, 0);
    }

    #[test]
    fn test_put_get_roundtrip() {
        let rig = rig();
        let b = plain_bucket(&rig.store, "b");
        let data = b"the quick brown fox".repeat(500);
        rig.store
            .put_object(&b, "obj", &data, PutParams::default())
            .unwrap();
        assert_eq!(read_all(&rig.store, &b, "obj"), data);
    }

    #[test]
    fn test_overwrite_disposes_predecessor() {
        let rig = rig();
        let b = plain_bucket(&rig.store, "b");
        let first = rig
            .store
            .put_object(&b, "obj", &vec![1u8; 4096], PutParams::default())
            .unwrap();
        rig.store
            .put_object(&b, "obj", &vec![2u8; 8192], PutParams::default())
            .unwrap();

        // the old container went to the GC queue exactly once; the
        // live one remains
        assert!(rig.cluster.object_exists(first.meta.oid));

        let header = rig.store.read_bucket_stats("alice", "b").unwrap();
        let main = header.category(EntryCategory::Main);
        assert_eq!(main.num_entries, 1);
        assert_eq!(main.actual_size, 8192);
    }

    #[test]
    fn test_unversioned_delete_gc_enqueued_once() {
        let cluster = Arc::new(MemoryCluster::new());
        let gc = Arc::new(crate::gc::MemoryGcQueue::new());
        let store = Store::open_with(
            cluster.clone(),
            cluster.clone(),
            SalConfig::default(),
            gc.clone(),
            Arc::new(crate::catalog::NoQuota),
        )
        .unwrap();
        let b = plain_bucket(&store, "b");
        let entry = store
            .put_object(&b, "obj", &vec![5u8; 10_000], PutParams::default())
            .unwrap();

        store.delete_object(&b, "obj", None).unwrap();
        let items = gc.drain();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].meta.oid, entry.meta.oid);
        assert!(
            store
                .head_object(&b, "obj", &GetParams::default())
                .unwrap_err()
                .is_not_found()
        );

        let header = store.read_bucket_stats("alice", "b").unwrap();
        assert_eq!(header.category(EntryCategory::Main).num_entries, 0);
    }

    #[test]
    fn test_sync_delete_when_gc_disabled() {
        let cluster = Arc::new(MemoryCluster::new());
        let cfg = SalConfig {
            gc_enabled: false,
            ..SalConfig::default()
        };
        let store = Store::open(cluster.clone(), cluster.clone(), cfg).unwrap();
        let b = plain_bucket(&store, "b");
        let entry = store
            .put_object(&b, "obj", &vec![5u8; 10_000], PutParams::default())
            .unwrap();
        assert!(cluster.object_exists(entry.meta.oid));

        store.delete_object(&b, "obj", None).unwrap();
        assert!(!cluster.object_exists(entry.meta.oid));
    }

    #[test]
    fn test_versioned_put_delete_list() {
        // two PUTs then a versionless DELETE: versions listing shows
        // marker (current), v2, v1 newest-first; HEAD sees nothing
        let rig = rig();
        let b = versioned_bucket(&rig.store, "b");
        let v1 = rig
            .store
            .put_object(&b, "a", &vec![1u8; 100], PutParams::default())
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let v2 = rig
            .store
            .put_object(&b, "a", &vec![2u8; 200], PutParams::default())
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let del = rig.store.delete_object(&b, "a", None).unwrap();
        assert!(del.delete_marker);

        let listing = rig
            .store
            .list_objects(
                &b,
                &ListParams {
                    max: 100,
                    list_versions: true,
                    ..ListParams::default()
                },
            )
            .unwrap();
        assert_eq!(listing.entries.len(), 3);
        assert!(listing.entries[0].is_delete_marker());
        assert!(listing.entries[0].is_current());
        assert_eq!(listing.entries[1].size, 200);
        assert_eq!(listing.entries[1].instance, v2.instance);
        assert_eq!(listing.entries[2].size, 100);
        assert_eq!(listing.entries[2].instance, v1.instance);
        // predecessors lost their CURRENT flag
        assert!(!listing.entries[1].is_current());
        assert!(!listing.entries[2].is_current());

        assert!(
            rig.store
                .head_object(&b, "a", &GetParams::default())
                .unwrap_err()
                .is_not_found()
        );
    }

    #[test]
    fn test_head_with_instance_on_marker_not_allowed() {
        let rig = rig();
        let b = versioned_bucket(&rig.store, "b");
        rig.store
            .put_object(&b, "a", b"x", PutParams::default())
            .unwrap();
        let del = rig.store.delete_object(&b, "a", None).unwrap();
        let marker_version = del.version_id.unwrap();

        let err = rig
            .store
            .head_object(
                &b,
                "a",
                &GetParams {
                    instance: Some(marker_version),
                    ..GetParams::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::NotAllowed(_)));
    }

    #[test]
    fn test_delete_specific_version_promotes_successor() {
        let rig = rig();
        let b = versioned_bucket(&rig.store, "b");
        let v1 = rig
            .store
            .put_object(&b, "a", &vec![1u8; 10], PutParams::default())
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let v2 = rig
            .store
            .put_object(&b, "a", &vec![2u8; 20], PutParams::default())
            .unwrap();

        rig.store
            .delete_object(&b, "a", Some(&v2.instance))
            .unwrap();

        let head = rig
            .store
            .head_object(&b, "a", &GetParams::default())
            .unwrap();
        assert_eq!(head.instance, v1.instance);
        assert!(head.is_current());
    }

    #[test]
    fn test_suspended_delete_writes_null_marker() {
        let rig = rig();
        let mut b = versioned_bucket(&rig.store, "b");
        rig.store
            .put_object(&b, "a", b"versioned", PutParams::default())
            .unwrap();

        b.flags |= BUCKET_VERSIONS_SUSPENDED;
        let b = rig.store.store_bucket(b).unwrap();
        let del = rig.store.delete_object(&b, "a", None).unwrap();
        assert!(del.delete_marker);
        assert_eq!(del.version_id.as_deref(), Some("null"));

        // the null slot holds the marker; the versioned record survives
        let listing = rig
            .store
            .list_objects(
                &b,
                &ListParams {
                    max: 10,
                    list_versions: true,
                    ..ListParams::default()
                },
            )
            .unwrap();
        assert_eq!(listing.entries.len(), 2);
        assert!(listing.entries.iter().any(|e| e.is_delete_marker()));
    }

    #[test]
    fn test_list_orders_null_version_by_mtime() {
        // a null version written before versioning was enabled sorts
        // first by key but must list by mtime among the versions
        let rig = rig();
        let b = plain_bucket(&rig.store, "b");
        rig.store
            .put_object(&b, "a", b"null-version", PutParams::default())
            .unwrap();

        let mut versioned = rig.store.load_bucket("", "b").unwrap();
        versioned.flags |= BUCKET_VERSIONED;
        let versioned = rig.store.store_bucket(versioned).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        rig.store
            .put_object(&versioned, "a", b"v1", PutParams::default())
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        rig.store
            .put_object(&versioned, "a", b"v2", PutParams::default())
            .unwrap();

        let listing = rig
            .store
            .list_objects(
                &versioned,
                &ListParams {
                    max: 10,
                    list_versions: true,
                    ..ListParams::default()
                },
            )
            .unwrap();
        let mtimes: Vec<_> = listing.entries.iter().map(|e| e.mtime).collect();
        let mut sorted = mtimes.clone();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        assert_eq!(mtimes, sorted, "descending mtime order");
        assert_eq!(listing.entries[2].instance, "", "null version is oldest");
    }

    #[test]
    fn test_conditionals() {
        let rig = rig();
        let b = plain_bucket(&rig.store, "b");
        let entry = rig
            .store
            .put_object(&b, "a", b"data", PutParams::default())
            .unwrap();

        // matching if-match passes
        rig.store
            .head_object(
                &b,
                "a",
                &GetParams {
                    if_match: Some(entry.etag.clone()),
                    ..GetParams::default()
                },
            )
            .unwrap();
        // stale if-match fails
        let err = rig
            .store
            .head_object(
                &b,
                "a",
                &GetParams {
                    if_match: Some("bogus".to_string()),
                    ..GetParams::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::PreconditionFailed(_)));
        // if-modified-since in the future fails
        let err = rig
            .store
            .head_object(
                &b,
                "a",
                &GetParams {
                    if_modified_since: Some(entry.mtime + 10_000),
                    ..GetParams::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::PreconditionFailed(_)));
    }

    #[test]
    fn test_ranged_get() {
        let rig = rig();
        let b = plain_bucket(&rig.store, "b");
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 256) as u8).collect();
        rig.store
            .put_object(&b, "a", &data, PutParams::default())
            .unwrap();

        let mut out = Vec::new();
        rig.store
            .get_object(
                &b,
                "a",
                &GetParams {
                    range: Some((1000, 1999)),
                    ..GetParams::default()
                },
                &mut |_, buf| {
                    out.extend_from_slice(&buf);
                    Ok(())
                },
            )
            .unwrap();
        assert_eq!(out, data[1000..2000]);
    }

    #[test]
    fn test_copy_object() {
        let rig = rig();
        let src_b = plain_bucket(&rig.store, "src");
        let dst_b = plain_bucket(&rig.store, "dst");
        let data = b"copy me".repeat(1000);
        let mut attrs = Attrs::new();
        attrs.insert(ATTR_TAGGING.to_string(), b"env=prod".to_vec());
        rig.store
            .put_object(
                &src_b,
                "a",
                &data,
                PutParams {
                    attrs,
                    ..PutParams::default()
                },
            )
            .unwrap();

        // COPY directive keeps the source tags
        let copied = rig
            .store
            .copy_object(&src_b, "a", &dst_b, "a-copy", &CopyParams::default())
            .unwrap();
        assert_eq!(copied.size, data.len() as u64);
        assert_eq!(
            copied.attrs.get(ATTR_TAGGING),
            Some(&b"env=prod".to_vec())
        );
        assert_eq!(read_all(&rig.store, &dst_b, "a-copy"), data);

        // REPLACE swaps the tag set
        let replaced = rig
            .store
            .copy_object(
                &src_b,
                "a",
                &dst_b,
                "a-retagged",
                &CopyParams {
                    directive: TaggingDirective::Replace,
                    tags: Some(b"env=dev".to_vec()),
                    ..CopyParams::default()
                },
            )
            .unwrap();
        assert_eq!(
            replaced.attrs.get(ATTR_TAGGING),
            Some(&b"env=dev".to_vec())
        );
    }

    #[test]
    fn test_copy_rejections() {
        let rig = rig();
        let b = plain_bucket(&rig.store, "b");
        rig.store
            .put_object(&b, "a", b"x", PutParams::default())
            .unwrap();

        assert!(matches!(
            rig.store
                .copy_object(&b, "a", &b, "a", &CopyParams::default())
                .unwrap_err(),
            Error::InvalidArgument(_)
        ));
        assert!(matches!(
            rig.store
                .copy_object(
                    &b,
                    "a",
                    &b,
                    "elsewhere",
                    &CopyParams {
                        cross_zonegroup: true,
                        ..CopyParams::default()
                    }
                )
                .unwrap_err(),
            Error::NotImplemented(_)
        ));

        let mut attrs = Attrs::new();
        attrs.insert(ATTR_CRYPT_MODE.to_string(), b"SSE-C".to_vec());
        rig.store
            .put_object(
                &b,
                "secret",
                b"x",
                PutParams {
                    attrs,
                    ..PutParams::default()
                },
            )
            .unwrap();
        assert!(matches!(
            rig.store
                .copy_object(&b, "secret", &b, "elsewhere", &CopyParams::default())
                .unwrap_err(),
            Error::NotImplemented(_)
        ));
    }

    #[test]
    fn test_set_attrs_rewrites_entry() {
        let rig = rig();
        let b = plain_bucket(&rig.store, "b");
        rig.store
            .put_object(&b, "a", b"x", PutParams::default())
            .unwrap();

        let mut attrs = Attrs::new();
        attrs.insert("content-type".to_string(), b"text/plain".to_vec());
        rig.store
            .set_object_attrs(&b, "a", None, attrs.clone())
            .unwrap();
        assert_eq!(rig.store.get_object_attrs(&b, "a", None).unwrap(), attrs);
    }

    #[test]
    fn test_reserved_byte_in_name_rejected() {
        let rig = rig();
        let b = plain_bucket(&rig.store, "b");
        let err = rig
            .store
            .put_object(&b, "bad\u{7}name", b"x", PutParams::default())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
