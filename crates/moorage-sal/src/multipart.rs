//! Multipart uploads
//!
//! Two strategies, chosen at initiation by the store's tiering flag:
//! separate-part gives every part its own byte container; tiered backs
//! the whole upload with one composite object and registers per-part
//! extents at completion. Part records and the in-progress record live
//! in the bucket's multipart indices either way.

use crate::catalog::{parts_index, upload_index};
use crate::records::{
    ATTR_UPLOAD_ID, Attrs, BucketRecord, DirEntry, EntryCategory, ObjectMeta, PartInfo,
    PartRecord, UploadRecord,
};
use crate::store::Store;
use crate::writer::{MAX_ACC_SIZE, ObjectWriter};
use bytes::Bytes;
use moorage_common::{Error, Result, now_ms};
use rand::distributions::Alphanumeric;
use rand::{Rng, thread_rng};
use tracing::debug;

/// Prefix of every upload id
pub const UPLOAD_ID_PREFIX: &str = "2~";

/// Fixed per-part placement stride of the tiered strategy (15 MiB)
///
/// Parts land at `(num-1) × TIERED_PART_SIZE`, which constrains tiered
/// uploads to parts of at most this size. A known prototype limitation.
pub const TIERED_PART_SIZE: u64 = 15 * 1024 * 1024;

/// Minimum size of every part except the last (5 MiB)
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Highest part number a client may choose
const MAX_PART_NUM: u32 = 10_000;

/// One in-progress upload, as reported by the upload listing
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadHandle {
    pub name: String,
    pub upload_id: String,
    pub owner: String,
    pub mtime: u64,
}

/// One part of a client's completion request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletedPart {
    pub num: u32,
    pub etag: String,
}

fn new_upload_id() -> String {
    let suffix: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect();
    format!("{UPLOAD_ID_PREFIX}{suffix}")
}

/// Key of the in-progress record (the meta-object key)
fn progress_key(name: &str, upload_id: &str) -> Vec<u8> {
    format!("_multipart_{name}.{upload_id}").into_bytes()
}

/// Key of one part record, part number zero-padded for ordering
fn part_key(name: &str, upload_id: &str, num: u32) -> Vec<u8> {
    format!("{name}.{upload_id}.{num:08}").into_bytes()
}

fn parts_prefix(name: &str, upload_id: &str) -> Vec<u8> {
    format!("{name}.{upload_id}.").into_bytes()
}

/// A part upload in flight
pub struct PartOp<'a> {
    store: &'a Store,
    bucket: BucketRecord,
    name: String,
    upload_id: String,
    num: u32,
    attrs: Attrs,
    writer: ObjectWriter<'a>,
}

impl PartOp<'_> {
    /// Feed a buffer; empty signals end-of-stream
    pub fn process(&mut self, data: &[u8]) -> Result<()> {
        self.writer.process(data)
    }

    /// Finish the part and store its record, replacing any earlier
    /// upload of the same part number
    pub fn complete(self) -> Result<PartInfo> {
        let result = self.writer.complete()?;
        let tb = self.bucket.tenant_bucket();
        let pidx = parts_index(&tb);
        let key = part_key(&self.name, &self.upload_id, self.num);

        let info = PartInfo {
            num: self.num,
            etag: result.etag,
            size: result.size,
            rounded_size: result.rounded_size,
            accounted_size: result.size,
            mtime: now_ms(),
            compression: String::new(),
        };
        let record = PartRecord {
            info: info.clone(),
            meta: result.meta,
            attrs: self.attrs,
        };

        // a re-uploaded part replaces its predecessor: byte object
        // first (separate strategy only, and only when the old record
        // points at a different container than the one just written),
        // then the accounting delta
        let mut old_size = 0i64;
        let mut old_rounded = 0i64;
        match self.store.catalog().gateway().get(&pidx, &key) {
            Ok(raw) => {
                let old = PartRecord::from_bytes(&raw)?;
                if !old.meta.is_composite
                    && !old.meta.oid.is_nil()
                    && old.meta.oid != record.meta.oid
                {
                    self.store.dispose_container(
                        format!("{tb}/{}.{}.{}", self.name, self.upload_id, old.info.num),
                        old.meta,
                        old.info.size,
                    );
                }
                old_size = old.info.size as i64;
                old_rounded = old.info.rounded_size as i64;
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        self.store
            .catalog()
            .gateway()
            .put(&pidx, &key, &record.to_bytes(), true)?;
        self.store.catalog().adjust_stats(
            &self.bucket.owner,
            &self.bucket.name,
            EntryCategory::MultiMeta,
            info.size as i64 - old_size,
            info.rounded_size as i64 - old_rounded,
            0,
        );
        Ok(info)
    }
}

impl Store {
    /// Start a multipart upload
    pub fn initiate_multipart(
        &self,
        bucket: &BucketRecord,
        name: &str,
        attrs: Attrs,
        owner: &str,
        owner_display: &str,
    ) -> Result<String> {
        if name.is_empty() || name.as_bytes().contains(&crate::version::KEY_SEP) {
            return Err(Error::invalid_argument("invalid object name"));
        }
        let tb = bucket.tenant_bucket();
        let upload_id = new_upload_id();
        let tiered = self.config().tiered_enabled;
        let meta = if tiered {
            self.io().create_composite(MAX_ACC_SIZE)?
        } else {
            ObjectMeta::empty()
        };
        let record = UploadRecord {
            upload_id: upload_id.clone(),
            placement_rule: bucket.placement_rule.clone(),
            tiered,
            meta,
            entry: DirEntry {
                name: name.to_string(),
                instance: String::new(),
                size: 0,
                accounted_size: 0,
                mtime: now_ms(),
                etag: String::new(),
                owner: owner.to_string(),
                owner_display: owner_display.to_string(),
                category: EntryCategory::MultiMeta,
                flags: 0,
                meta,
                attrs,
            },
        };
        self.catalog().gateway().put(
            &upload_index(&tb),
            &progress_key(name, &upload_id),
            &record.to_bytes(),
            false,
        )?;
        self.catalog()
            .adjust_stats(&bucket.owner, &bucket.name, EntryCategory::MultiMeta, 0, 0, 1);
        debug!(bucket = tb, name, upload_id, tiered, "multipart initiated");
        Ok(upload_id)
    }

    /// Fetch an upload's in-progress state
    pub fn get_upload(
        &self,
        bucket: &BucketRecord,
        name: &str,
        upload_id: &str,
    ) -> Result<UploadRecord> {
        let tb = bucket.tenant_bucket();
        let raw = self
            .catalog()
            .gateway()
            .get(&upload_index(&tb), &progress_key(name, upload_id))
            .map_err(|e| {
                if e.is_not_found() {
                    Error::not_found(format!("upload {upload_id} on {tb}/{name}"))
                } else {
                    e
                }
            })?;
        UploadRecord::from_bytes(&raw)
    }

    /// Start writing one part
    pub fn multipart_writer<'a>(
        &'a self,
        bucket: &BucketRecord,
        name: &str,
        upload_id: &str,
        num: u32,
        size_hint: u64,
    ) -> Result<PartOp<'a>> {
        if num == 0 || num > MAX_PART_NUM {
            return Err(Error::invalid_argument(format!("part number {num}")));
        }
        let upload = self.get_upload(bucket, name, upload_id)?;

        let writer = if upload.tiered {
            self.io().open(&upload.meta)?;
            let base = u64::from(num - 1) * TIERED_PART_SIZE;
            ObjectWriter::for_existing(self.io(), upload.meta, base, false)
        } else {
            let part_name = format!("{}.{}.part.{}", bucket.tenant_bucket(), name, num);
            let meta = self.io().create_named(&part_name, size_hint.max(1))?;
            ObjectWriter::for_existing(self.io(), meta, 0, true)
        };
        Ok(PartOp {
            store: self,
            bucket: bucket.clone(),
            name: name.to_string(),
            upload_id: upload_id.to_string(),
            num,
            attrs: Attrs::new(),
            writer,
        })
    }

    /// One-shot upload of an in-memory part
    pub fn upload_part(
        &self,
        bucket: &BucketRecord,
        name: &str,
        upload_id: &str,
        num: u32,
        data: &[u8],
    ) -> Result<PartInfo> {
        let mut op = self.multipart_writer(bucket, name, upload_id, num, data.len() as u64)?;
        op.process(data)?;
        op.process(&[])?;
        op.complete()
    }

    /// List stored parts in part-number order
    pub fn list_parts(
        &self,
        bucket: &BucketRecord,
        name: &str,
        upload_id: &str,
        marker: Option<u32>,
        max: usize,
    ) -> Result<(Vec<PartInfo>, bool)> {
        self.get_upload(bucket, name, upload_id)?;
        let tb = bucket.tenant_bucket();
        let prefix = parts_prefix(name, upload_id);
        let cursor = match marker {
            Some(num) => {
                let mut c = part_key(name, upload_id, num);
                c.push(0x00);
                c
            }
            None => prefix.clone(),
        };
        let max = max.max(1);
        let items = self.catalog().gateway().next(
            &parts_index(&tb),
            &cursor,
            max + 1,
            Some(&prefix),
            None,
        )?;
        let truncated = items.len() > max;
        items
            .into_iter()
            .take(max)
            .map(|item| Ok(PartRecord::from_bytes(&item.value)?.info))
            .collect::<Result<Vec<_>>>()
            .map(|parts| (parts, truncated))
    }

    /// Complete an upload: validate the client's part list against the
    /// stored parts, register extents (tiered), and link the head entry
    pub fn complete_multipart(
        &self,
        bucket: &BucketRecord,
        name: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<DirEntry> {
        let upload = self.get_upload(bucket, name, upload_id)?;
        let tb = bucket.tenant_bucket();
        let stored = self.stored_parts(&tb, name, upload_id)?;

        if stored.is_empty() || stored.len() != parts.len() {
            return Err(Error::invalid_argument(format!(
                "{} parts stored, {} parts submitted",
                stored.len(),
                parts.len()
            )));
        }
        let mut etag_concat = Vec::with_capacity(stored.len() * 16);
        for (i, (record, submitted)) in stored.iter().zip(parts).enumerate() {
            let info = &record.info;
            if info.num != submitted.num {
                return Err(Error::invalid_argument(format!(
                    "part {} missing or out of order",
                    submitted.num
                )));
            }
            if info.etag != submitted.etag {
                return Err(Error::invalid_argument(format!(
                    "etag mismatch on part {}",
                    info.num
                )));
            }
            if i + 1 < stored.len() && info.size < MIN_PART_SIZE {
                return Err(Error::invalid_argument(format!(
                    "part {} below the minimum size",
                    info.num
                )));
            }
            if info.compression != stored[0].info.compression {
                return Err(Error::invalid_argument(
                    "inconsistent part compression".to_string(),
                ));
            }
            let binary = hex::decode(&info.etag)
                .map_err(|_| Error::invalid_argument(format!("malformed etag on part {}", info.num)))?;
            etag_concat.extend_from_slice(&binary);
        }

        let total: u64 = stored.iter().map(|r| r.info.size).sum();
        let accounted: u64 = stored.iter().map(|r| r.info.accounted_size).sum();
        let etag = format!("{:x}-{}", md5::compute(&etag_concat), stored.len());

        if upload.tiered {
            // one write + one read extent per part at its byte offset
            let top = upload.meta.top_layer;
            let mut offset = 0u64;
            for record in &stored {
                self.io().insert_extent(top, true, offset, record.info.size)?;
                self.io().insert_extent(top, false, offset, record.info.size)?;
                offset += record.info.size;
            }
        }

        self.quota().check(&bucket.owner, &bucket.name, total, 1)?;

        let mut entry = upload.entry.clone();
        entry.size = total;
        entry.accounted_size = accounted;
        entry.mtime = now_ms();
        entry.etag = etag;
        entry.meta = if upload.tiered {
            upload.meta
        } else {
            ObjectMeta::empty()
        };
        entry
            .attrs
            .insert(ATTR_UPLOAD_ID.to_string(), upload_id.as_bytes().to_vec());

        let entry = self.link_entry(bucket, entry, 0, false)?;
        self.catalog()
            .gateway()
            .del(&upload_index(&tb), &progress_key(name, upload_id))?;
        debug!(bucket = tb, name, upload_id, size = total, "multipart completed");
        Ok(entry)
    }

    /// Abort an upload: drop the in-progress record, the part byte
    /// objects (or the composite), every part record, and the
    /// accumulated accounting
    pub fn abort_multipart(
        &self,
        bucket: &BucketRecord,
        name: &str,
        upload_id: &str,
    ) -> Result<()> {
        let upload = self.get_upload(bucket, name, upload_id)?;
        let tb = bucket.tenant_bucket();

        let (size, rounded) = self.purge_parts(&tb, name, upload_id, !upload.tiered)?;
        if upload.tiered {
            self.io().delete(&upload.meta)?;
        }
        self.catalog()
            .gateway()
            .del(&upload_index(&tb), &progress_key(name, upload_id))?;
        self.catalog().adjust_stats(
            &bucket.owner,
            &bucket.name,
            EntryCategory::MultiMeta,
            -(size as i64),
            -(rounded as i64),
            -1,
        );
        debug!(bucket = tb, name, upload_id, "multipart aborted");
        Ok(())
    }

    /// List in-progress uploads under a prefix
    pub fn list_multipart_uploads(
        &self,
        bucket: &BucketRecord,
        prefix: &str,
        delim: Option<&str>,
        marker: Option<(&str, &str)>,
        max: usize,
    ) -> Result<(Vec<UploadHandle>, Vec<String>, bool)> {
        let tb = bucket.tenant_bucket();
        let full_prefix = format!("_multipart_{prefix}").into_bytes();
        let cursor = match marker {
            Some((name, upload_id)) => {
                let mut c = progress_key(name, upload_id);
                c.push(0x00);
                c
            }
            None => full_prefix.clone(),
        };
        let max = max.max(1);
        let delim_bytes = delim.filter(|d| !d.is_empty()).map(str::as_bytes);
        let items = self.catalog().gateway().next(
            &upload_index(&tb),
            &cursor,
            max + 1,
            Some(&full_prefix),
            delim_bytes,
        )?;
        let truncated = items.len() > max;

        let mut handles = Vec::new();
        let mut prefixes = Vec::new();
        for item in items.into_iter().take(max) {
            if item.is_dir {
                let dir = String::from_utf8(item.key)
                    .map_err(|_| Error::decode("upload key is not utf-8"))?;
                prefixes.push(dir.trim_start_matches("_multipart_").to_string());
            } else {
                let record = UploadRecord::from_bytes(&item.value)?;
                handles.push(UploadHandle {
                    name: record.entry.name.clone(),
                    upload_id: record.upload_id.clone(),
                    owner: record.entry.owner.clone(),
                    mtime: record.entry.mtime,
                });
            }
        }
        Ok((handles, prefixes, truncated))
    }

    /// Abort every in-progress upload in the bucket
    pub fn abort_all_multiparts(&self, bucket: &BucketRecord) -> Result<()> {
        let tb = bucket.tenant_bucket();
        loop {
            let items =
                self.catalog()
                    .gateway()
                    .next(&upload_index(&tb), &[], 100, None, None)?;
            if items.is_empty() {
                return Ok(());
            }
            for item in items {
                let record = UploadRecord::from_bytes(&item.value)?;
                self.abort_multipart(bucket, &record.entry.name, &record.upload_id)?;
            }
        }
    }

    fn stored_parts(&self, tb: &str, name: &str, upload_id: &str) -> Result<Vec<PartRecord>> {
        let prefix = parts_prefix(name, upload_id);
        let mut out = Vec::new();
        let mut cursor = prefix.clone();
        let batch_size = self.config().next_batch();
        loop {
            let items = self.catalog().gateway().next(
                &parts_index(tb),
                &cursor,
                batch_size,
                Some(&prefix),
                None,
            )?;
            let got = items.len();
            for item in items {
                cursor = item.key.clone();
                cursor.push(0x00);
                out.push(PartRecord::from_bytes(&item.value)?);
            }
            if got < batch_size {
                return Ok(out);
            }
        }
    }

    /// Remove every part record of an upload, optionally destroying the
    /// part byte containers; returns the accumulated (size, rounded)
    pub(crate) fn purge_parts(
        &self,
        tb: &str,
        name: &str,
        upload_id: &str,
        delete_objects: bool,
    ) -> Result<(u64, u64)> {
        let pidx = parts_index(tb);
        let prefix = parts_prefix(name, upload_id);
        let mut size = 0u64;
        let mut rounded = 0u64;
        loop {
            let items = self.catalog().gateway().next(
                &pidx,
                &prefix,
                self.config().next_batch(),
                Some(&prefix),
                None,
            )?;
            if items.is_empty() {
                return Ok((size, rounded));
            }
            for item in items {
                let record = PartRecord::from_bytes(&item.value)?;
                if delete_objects {
                    self.io().delete(&record.meta)?;
                }
                size += record.info.size;
                rounded += record.info.rounded_size;
                self.catalog().gateway().del_if_present(&pidx, &item.key)?;
            }
        }
    }

    /// Range read of a separate-part multipart object: walk the parts
    /// in order and read each one's intersection with the range
    pub(crate) fn read_multipart_object(
        &self,
        bucket: &BucketRecord,
        entry: &DirEntry,
        start: u64,
        end: u64,
        sink: &mut dyn FnMut(u64, Bytes) -> Result<()>,
    ) -> Result<()> {
        let upload_id = entry
            .attrs
            .get(ATTR_UPLOAD_ID)
            .and_then(|raw| std::str::from_utf8(raw).ok())
            .ok_or_else(|| Error::decode("multipart head without upload linkage"))?
            .to_string();
        let tb = bucket.tenant_bucket();
        let stored = self.stored_parts(&tb, &entry.name, &upload_id)?;

        let mut offset = 0u64;
        for record in stored {
            let part_size = record.info.size;
            let part_end = offset + part_size;
            if part_end > start && offset <= end {
                let local_start = start.saturating_sub(offset);
                let local_end = (end.min(part_end - 1)) - offset;
                let base = offset;
                self.io().read(
                    &record.meta,
                    part_size,
                    local_start,
                    local_end,
                    &mut |off, buf| sink(base + off, buf),
                )?;
            }
            offset = part_end;
            if offset > end {
                break;
            }
        }
        Ok(())
    }
}
