//! Store context
//!
//! The single shared context of the gateway core: the two service
//! handles, the metadata caches, the ID generator, the GC queue, and
//! the quota handler. Constructed once at bootstrap and passed by
//! reference through every call; all other entities are value types.

use crate::catalog::{Catalog, NoQuota, QuotaHandler};
use crate::container::ContainerIo;
use crate::gc::{GcItem, GcQueue, MemoryGcQueue};
use crate::records::{ATTR_UPLOAD_ID, BucketRecord, DirEntry, EntryCategory};
use moorage_common::{IdGenerator, Result, SalConfig};
use moorage_client::{IndexService, ObjectService};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};

/// Which metadata cache a cross-process notice addresses
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheKind {
    Objects,
    Users,
    Buckets,
}

/// The gateway core's shared context
pub struct Store {
    catalog: Catalog,
    io: ContainerIo,
    ids: Arc<IdGenerator>,
    gc: Mutex<Option<Arc<dyn GcQueue>>>,
    quota: Arc<dyn QuotaHandler>,
    cfg: SalConfig,
}

impl Store {
    /// Open a store with the default GC queue and quota handler
    pub fn open(
        idx: Arc<dyn IndexService>,
        obj: Arc<dyn ObjectService>,
        cfg: SalConfig,
    ) -> Result<Self> {
        Self::open_with(idx, obj, cfg, Arc::new(MemoryGcQueue::new()), Arc::new(NoQuota))
    }

    /// Open a store, creating the global indices if needed
    pub fn open_with(
        idx: Arc<dyn IndexService>,
        obj: Arc<dyn ObjectService>,
        cfg: SalConfig,
        gc: Arc<dyn GcQueue>,
        quota: Arc<dyn QuotaHandler>,
    ) -> Result<Self> {
        let ids = Arc::new(IdGenerator::new());
        let catalog = Catalog::new(idx.clone(), &cfg);
        catalog.bootstrap()?;
        let io = ContainerIo::new(obj, idx, ids.clone(), cfg.extent_batch());
        let gc = cfg.gc_enabled.then_some(gc);
        info!(
            cache = cfg.use_metadata_cache,
            gc = cfg.gc_enabled,
            tiered = cfg.tiered_enabled,
            "store opened"
        );
        Ok(Self {
            catalog,
            io,
            ids,
            gc: Mutex::new(gc),
            quota,
            cfg,
        })
    }

    /// Detach the GC queue and stop handing it work
    pub fn finalize(&self) {
        self.gc.lock().take();
        info!("store finalized");
    }

    /// The catalog (schema + cached index access)
    pub const fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// The container gateway
    pub const fn io(&self) -> &ContainerIo {
        &self.io
    }

    /// The object-identifier generator
    pub fn ids(&self) -> &IdGenerator {
        &self.ids
    }

    /// The quota handler
    pub fn quota(&self) -> &dyn QuotaHandler {
        self.quota.as_ref()
    }

    /// The recognised configuration
    pub const fn config(&self) -> &SalConfig {
        &self.cfg
    }

    /// Cross-process cache invalidation hook
    ///
    /// Peers notify after mutating a record; the affected key is
    /// dropped so the next read goes through to the index.
    pub fn handle_cache_notice(&self, kind: CacheKind, key: &[u8]) {
        match kind {
            CacheKind::Objects => self.catalog.object_cache().invalidate_remove(key),
            CacheKind::Users => self.catalog.user_cache().invalidate_remove(key),
            CacheKind::Buckets => self.catalog.bucket_cache().invalidate_remove(key),
        }
    }

    /// Hand an entry's byte container to the GC, falling back to
    /// synchronous destruction when the queue is detached or refuses
    pub(crate) fn dispose_entry(&self, bucket: &BucketRecord, entry: &DirEntry) {
        if entry.is_delete_marker() {
            return;
        }
        let multipart = entry.category == EntryCategory::MultiMeta;
        if entry.meta.oid.is_nil() && !multipart {
            return;
        }

        let tb = bucket.tenant_bucket();
        let fqn = if entry.instance.is_empty() {
            format!("{tb}/{}", entry.name)
        } else {
            format!("{tb}/{}:{}", entry.name, entry.instance)
        };
        let upload_id = entry
            .attrs
            .get(ATTR_UPLOAD_ID)
            .and_then(|raw| String::from_utf8(raw.clone()).ok());

        let queue = self.gc.lock().clone();
        if let Some(queue) = queue {
            let item = GcItem {
                tag: format!("{}~{}", entry.meta.oid, entry.mtime),
                fqn: fqn.clone(),
                meta: entry.meta,
                size: entry.size,
                part_index: multipart.then(|| crate::catalog::parts_index(&tb)),
                upload_id: upload_id.clone(),
            };
            match queue.enqueue(item) {
                Ok(()) => return,
                Err(e) => {
                    warn!(fqn, error = %e, "gc enqueue failed; deleting synchronously");
                }
            }
        }
        if let Err(e) = self.destroy_entry_bytes(bucket, entry) {
            warn!(fqn, error = %e, "synchronous object delete failed");
        }
    }

    /// Hand a bare byte container to the GC, falling back to a
    /// synchronous delete
    pub(crate) fn dispose_container(&self, fqn: String, meta: crate::records::ObjectMeta, size: u64) {
        if meta.oid.is_nil() {
            return;
        }
        let queue = self.gc.lock().clone();
        if let Some(queue) = queue {
            let item = GcItem {
                tag: format!("{}~{size}", meta.oid),
                fqn: fqn.clone(),
                meta,
                size,
                part_index: None,
                upload_id: None,
            };
            match queue.enqueue(item) {
                Ok(()) => return,
                Err(e) => {
                    warn!(fqn, error = %e, "gc enqueue failed; deleting synchronously");
                }
            }
        }
        if let Err(e) = self.io.delete(&meta) {
            warn!(fqn, error = %e, "synchronous object delete failed");
        }
    }

    /// Destroy the byte container(s) behind an entry immediately
    ///
    /// Dispatches on `is_composite`: composites delete through the
    /// container gateway (layers, extent indices, root); separate-part
    /// multipart objects delete each part's container. Both shapes
    /// purge the upload's part records.
    pub(crate) fn destroy_entry_bytes(
        &self,
        bucket: &BucketRecord,
        entry: &DirEntry,
    ) -> Result<()> {
        if entry.category == EntryCategory::MultiMeta {
            let tb = bucket.tenant_bucket();
            let upload_id = entry
                .attrs
                .get(ATTR_UPLOAD_ID)
                .and_then(|raw| std::str::from_utf8(raw).ok())
                .map(str::to_string);
            if let Some(upload_id) = upload_id {
                // separate-part uploads own one container per part
                let delete_parts = !entry.meta.is_composite;
                self.purge_parts(&tb, &entry.name, &upload_id, delete_parts)?;
            }
            if entry.meta.is_composite {
                self.io.delete(&entry.meta)?;
            }
            Ok(())
        } else {
            self.io.delete(&entry.meta)
        }
    }
}
