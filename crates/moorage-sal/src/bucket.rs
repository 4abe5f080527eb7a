//! Bucket operations and object listing
//!
//! Buckets are records in the global bucket index plus three per-bucket
//! indices (objects, in-progress uploads, part records). Listing walks
//! the object index in key order; because a name's null version always
//! sorts first regardless of its age, the lister holds it back and
//! emits it at its mtime position among the name's versions.

use crate::catalog::{
    bucket_index, parts_index, tenant_bucket_key, upload_index, user_info_index, user_stats_index,
};
use crate::records::{BucketHeader, BucketListEntry, BucketRecord, DirEntry};
use crate::store::Store;
use crate::version::{after_name, entry_key, instance_mtime};
use moorage_common::{Error, Result, now_ms};
use tracing::debug;

/// Inputs of an object listing
#[derive(Clone, Debug, Default)]
pub struct ListParams {
    pub prefix: String,
    pub delim: Option<String>,
    /// Resume point: `(name, None)` skips every version of `name`;
    /// `(name, Some(instance))` resumes among its versions, with
    /// `"null"` addressing the null version.
    pub marker: Option<(String, Option<String>)>,
    pub max: usize,
    pub list_versions: bool,
}

/// Outcome of an object listing
#[derive(Clone, Debug, Default)]
pub struct ListResult {
    pub entries: Vec<DirEntry>,
    pub common_prefixes: Vec<String>,
    pub truncated: bool,
    pub next_marker: Option<(String, Option<String>)>,
}

impl Store {
    /// Create a bucket, its three indices, the owner's bucket-list
    /// entry, and an empty stats header
    pub fn create_bucket(&self, record: BucketRecord) -> Result<BucketRecord> {
        let tb = record.tenant_bucket();
        self.catalog().put_bucket(&record, false)?;

        let gw = self.catalog().gateway();
        gw.ensure(&bucket_index(&tb))?;
        gw.ensure(&upload_index(&tb))?;
        gw.ensure(&parts_index(&tb))?;
        gw.ensure(&user_info_index(&record.owner))?;
        gw.ensure(&user_stats_index(&record.owner))?;

        let listing = BucketListEntry {
            size: 0,
            ctime: record.ctime,
        };
        gw.put(
            &user_info_index(&record.owner),
            record.name.as_bytes(),
            &listing.to_bytes(),
            true,
        )?;
        self.catalog()
            .write_stats(&record.owner, &record.name, &BucketHeader::default())?;
        debug!(bucket = tb, owner = record.owner, "bucket created");
        Ok(record)
    }

    /// Load a bucket instance
    pub fn load_bucket(&self, tenant: &str, name: &str) -> Result<BucketRecord> {
        self.catalog().get_bucket(&tenant_bucket_key(tenant, name))
    }

    /// Persist bucket mutations (versioning state, attributes)
    pub fn store_bucket(&self, mut record: BucketRecord) -> Result<BucketRecord> {
        record.mtime = now_ms();
        record.version.bump();
        self.catalog().put_bucket(&record, true)?;
        Ok(record)
    }

    /// Remove an empty bucket and its indices
    pub fn remove_bucket(&self, record: &BucketRecord) -> Result<()> {
        let tb = record.tenant_bucket();
        let gw = self.catalog().gateway();
        let remaining = gw.next(&bucket_index(&tb), &[], 1, None, None)?;
        if !remaining.is_empty() {
            return Err(Error::NotEmpty(tb));
        }
        gw.drop_index(&bucket_index(&tb))?;
        gw.drop_index(&upload_index(&tb))?;
        gw.drop_index(&parts_index(&tb))?;
        gw.del_if_present(&user_info_index(&record.owner), record.name.as_bytes())?;
        gw.del_if_present(&user_stats_index(&record.owner), record.name.as_bytes())?;
        self.catalog().del_bucket(&tb)?;
        debug!(bucket = tb, "bucket removed");
        Ok(())
    }

    /// List a user's buckets in name order
    pub fn list_buckets(
        &self,
        owner: &str,
        marker: &str,
        max: usize,
    ) -> Result<Vec<(String, BucketListEntry)>> {
        let mut cursor = marker.as_bytes().to_vec();
        if !cursor.is_empty() {
            cursor.push(0x00);
        }
        let items = match self
            .catalog()
            .gateway()
            .next(&user_info_index(owner), &cursor, max, None, None)
        {
            Ok(items) => items,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        items
            .into_iter()
            .map(|item| {
                let name = String::from_utf8(item.key)
                    .map_err(|_| Error::decode("bucket name is not utf-8"))?;
                Ok((name, BucketListEntry::from_bytes(&item.value)?))
            })
            .collect()
    }

    /// List objects (§latest-only) or object versions
    pub fn list_objects(&self, bucket: &BucketRecord, params: &ListParams) -> Result<ListResult> {
        let tb = bucket.tenant_bucket();
        let index = bucket_index(&tb);
        let max = params.max.max(1);

        let mut lister = Lister {
            max,
            list_versions: params.list_versions,
            entries: Vec::new(),
            prefixes: Vec::new(),
            pending_null: None,
            done_name: None,
            null_filter: None,
            truncated: false,
            next_marker: None,
        };
        let mut pos = self.seed_listing(&tb, params, &mut lister)?;

        let prefix_bytes = params.prefix.as_bytes().to_vec();
        let prefix_opt = (!prefix_bytes.is_empty()).then_some(prefix_bytes.as_slice());
        let delim_bytes = params
            .delim
            .as_deref()
            .filter(|d| !d.is_empty())
            .map(str::as_bytes);
        let batch_size = self.config().next_batch();

        'scan: loop {
            let batch = self
                .catalog()
                .gateway()
                .next(&index, &pos, batch_size, prefix_opt, delim_bytes)?;
            let got = batch.len();

            for item in batch {
                pos = item.key.clone();
                pos.push(if item.is_dir { 0xFF } else { 0x00 });

                let stop = if item.is_dir {
                    lister.on_dir(item.key)?
                } else {
                    lister.on_record(DirEntry::from_bytes(&item.value)?)
                };
                if stop {
                    break 'scan;
                }
            }
            if got < batch_size {
                lister.finish();
                break;
            }
        }

        Ok(ListResult {
            entries: lister.entries,
            common_prefixes: lister.prefixes,
            truncated: lister.truncated,
            next_marker: lister.next_marker,
        })
    }

    /// Compute the scan start position and pre-seed marker state
    fn seed_listing(
        &self,
        tb: &str,
        params: &ListParams,
        lister: &mut Lister,
    ) -> Result<Vec<u8>> {
        let Some((name, instance)) = &params.marker else {
            return Ok(params.prefix.clone().into_bytes());
        };
        match instance {
            None => {
                // a directory marker resumes past the whole directory
                if let Some(d) = params.delim.as_deref().filter(|d| !d.is_empty()) {
                    if name.ends_with(d) {
                        let mut pos = name.clone().into_bytes();
                        pos.push(0xFF);
                        return Ok(pos);
                    }
                }
                Ok(after_name(name))
            }
            Some(inst) if inst == "null" => {
                // the null version was delivered; skip the versions that
                // preceded it (all at least as new as the null)
                match self.catalog().get_entry(tb, &entry_key(name, "")) {
                    Ok(entry) => lister.null_filter = Some((name.clone(), entry.mtime)),
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
                let mut pos = entry_key(name, "");
                pos.push(0x00);
                Ok(pos)
            }
            Some(inst) => {
                let marker_mtime = instance_mtime(inst)
                    .map_err(|_| Error::invalid_argument("illegal version-id marker"))?;
                // the name's null version sorts before the marker key;
                // if it is older than the marker it has not been
                // delivered yet, so carry it back into the scan
                match self.catalog().get_entry(tb, &entry_key(name, "")) {
                    Ok(entry) if entry.mtime < marker_mtime => {
                        lister.pending_null = Some(entry);
                    }
                    Ok(_) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
                let mut pos = entry_key(name, inst);
                pos.push(0x00);
                Ok(pos)
            }
        }
    }
}

/// Accumulator for one listing pass
struct Lister {
    max: usize,
    list_versions: bool,
    entries: Vec<DirEntry>,
    prefixes: Vec<String>,
    /// The most recently seen null-version record, held until its
    /// mtime position among its name's versions is known
    pending_null: Option<DirEntry>,
    /// Latest-only: name already represented in the output
    done_name: Option<String>,
    /// Skip versions of this name at or above this mtime (already
    /// delivered before a "null" marker)
    null_filter: Option<(String, u64)>,
    truncated: bool,
    next_marker: Option<(String, Option<String>)>,
}

impl Lister {
    fn count(&self) -> usize {
        self.entries.len() + self.prefixes.len()
    }

    /// Push one record; returns true when the listing is full
    fn push_entry(&mut self, entry: DirEntry) -> bool {
        self.next_marker = Some(if self.list_versions {
            let instance = if entry.instance.is_empty() {
                "null".to_string()
            } else {
                entry.instance.clone()
            };
            (entry.name.clone(), Some(instance))
        } else {
            (entry.name.clone(), None)
        });
        self.entries.push(entry);
        if self.count() >= self.max {
            self.truncated = true;
            return true;
        }
        false
    }

    fn push_prefix(&mut self, prefix: String) -> bool {
        self.next_marker = Some((prefix.clone(), None));
        self.prefixes.push(prefix);
        if self.count() >= self.max {
            self.truncated = true;
            return true;
        }
        false
    }

    /// Emit the held null version; returns true when full
    fn flush_null(&mut self) -> bool {
        let Some(null) = self.pending_null.take() else {
            return false;
        };
        if self.list_versions {
            return self.push_entry(null);
        }
        if self.done_name.as_deref() == Some(null.name.as_str()) {
            return false;
        }
        self.done_name = Some(null.name.clone());
        if null.is_delete_marker() {
            return false;
        }
        self.push_entry(null)
    }

    fn on_dir(&mut self, key: Vec<u8>) -> Result<bool> {
        if self.flush_null() {
            return Ok(true);
        }
        let dir =
            String::from_utf8(key).map_err(|_| Error::decode("directory key is not utf-8"))?;
        Ok(self.push_prefix(dir))
    }

    fn on_record(&mut self, entry: DirEntry) -> bool {
        if let Some((name, mtime)) = &self.null_filter {
            if entry.name == *name && !entry.instance.is_empty() && entry.mtime >= *mtime {
                return false;
            }
        }
        if self
            .pending_null
            .as_ref()
            .is_some_and(|null| null.name != entry.name)
        {
            if self.flush_null() {
                return true;
            }
        }
        if entry.instance.is_empty() {
            self.pending_null = Some(entry);
            return false;
        }
        if self.list_versions {
            self.on_version(entry)
        } else {
            self.on_latest(entry)
        }
    }

    fn on_version(&mut self, entry: DirEntry) -> bool {
        if let Some(null) = &self.pending_null {
            // the null slots in just before the first older record
            if entry.mtime < null.mtime && self.flush_null() {
                return true;
            }
        }
        self.push_entry(entry)
    }

    fn on_latest(&mut self, entry: DirEntry) -> bool {
        if self.done_name.as_deref() == Some(entry.name.as_str()) {
            return false;
        }
        if let Some(null) = &self.pending_null {
            if null.mtime >= entry.mtime {
                // the null is the name's newest record
                return self.flush_null();
            }
            // shadowed by a newer version
            self.pending_null = None;
        }
        if entry.is_delete_marker() {
            if entry.is_current() {
                self.done_name = Some(entry.name);
            }
            false
        } else if entry.is_visible() {
            let name = entry.name.clone();
            let stop = self.push_entry(entry);
            self.done_name = Some(name);
            stop
        } else {
            false
        }
    }

    fn finish(&mut self) {
        let _ = self.flush_null();
    }
}
