//! Catalog: index schema, cached record access, and statistics
//!
//! The catalog names the bounded set of indices the gateway lives in,
//! fronts record reads with the metadata caches, and maintains the
//! per-user per-bucket usage headers alongside the index writes that
//! change them.

use crate::cache::MetaCache;
use crate::index::IndexGateway;
use crate::records::{BucketHeader, BucketRecord, DirEntry, EntryCategory, UserRecord};
use moorage_common::{Result, SalConfig};
use moorage_client::IndexService;
use std::sync::Arc;
use tracing::warn;

/// Global index of user records, keyed by user id
pub const USERS_INDEX: &str = "moorage.gw.users";

/// Global index of bucket instances, keyed by `tenant$bucket`
pub const BUCKET_INSTANCES_INDEX: &str = "moorage.gw.bucket-instances";

/// Global per-bucket header index (reserved)
pub const BUCKET_HEADERS_INDEX: &str = "moorage.gw.bucket-headers";

/// Global index mapping access keys to `{user-id, secret}`
pub const ACCESS_KEYS_INDEX: &str = "moorage.gw.access-keys";

/// Global index mapping emails to user ids
pub const EMAILS_INDEX: &str = "moorage.gw.emails";

/// The global bucket-index key of a (tenant, bucket) pair
#[must_use]
pub fn tenant_bucket_key(tenant: &str, bucket: &str) -> String {
    if tenant.is_empty() {
        bucket.to_string()
    } else {
        format!("{tenant}${bucket}")
    }
}

/// Index of bucket names owned by a user
#[must_use]
pub fn user_info_index(user_id: &str) -> String {
    format!("moorage.gw.user-info.{user_id}")
}

/// Index of per-bucket usage headers for a user
#[must_use]
pub fn user_stats_index(user_id: &str) -> String {
    format!("moorage.gw.user-stats.{user_id}")
}

/// A bucket's object index
#[must_use]
pub fn bucket_index(tenant_bucket: &str) -> String {
    format!("moorage.gw.bucket-index.{tenant_bucket}")
}

/// A bucket's in-progress multipart uploads
#[must_use]
pub fn upload_index(tenant_bucket: &str) -> String {
    format!("moorage.gw.bucket.{tenant_bucket}.multiparts.in-progress")
}

/// A bucket's uploaded part records
#[must_use]
pub fn parts_index(tenant_bucket: &str) -> String {
    format!("moorage.gw.bucket.{tenant_bucket}.multiparts")
}

/// Quota admission check, delegated to the embedding service
pub trait QuotaHandler: Send + Sync {
    /// Admit or reject adding `size` bytes / `count` objects
    fn check(&self, owner: &str, bucket: &str, size: u64, count: u64) -> Result<()>;
}

/// Default quota handler: admits everything
pub struct NoQuota;

impl QuotaHandler for NoQuota {
    fn check(&self, _owner: &str, _bucket: &str, _size: u64, _count: u64) -> Result<()> {
        Ok(())
    }
}

/// Schema-aware index access with read-through caching
pub struct Catalog {
    gw: IndexGateway,
    objects: MetaCache,
    users: MetaCache,
    buckets: MetaCache,
}

impl Catalog {
    pub fn new(svc: Arc<dyn IndexService>, cfg: &SalConfig) -> Self {
        let enabled = cfg.use_metadata_cache;
        Self {
            gw: IndexGateway::new(svc, cfg.next_batch()),
            objects: MetaCache::new(cfg.cache_capacity, enabled),
            users: MetaCache::new(cfg.cache_capacity, enabled),
            buckets: MetaCache::new(cfg.cache_capacity, enabled),
        }
    }

    /// The underlying index gateway
    pub const fn gateway(&self) -> &IndexGateway {
        &self.gw
    }

    pub const fn object_cache(&self) -> &MetaCache {
        &self.objects
    }

    pub const fn user_cache(&self) -> &MetaCache {
        &self.users
    }

    pub const fn bucket_cache(&self) -> &MetaCache {
        &self.buckets
    }

    /// Create the global indices; idempotent
    pub fn bootstrap(&self) -> Result<()> {
        for name in [
            USERS_INDEX,
            BUCKET_INSTANCES_INDEX,
            BUCKET_HEADERS_INDEX,
            ACCESS_KEYS_INDEX,
            EMAILS_INDEX,
        ] {
            self.gw.ensure(name)?;
        }
        Ok(())
    }

    fn object_cache_key(tenant_bucket: &str, key: &[u8]) -> Vec<u8> {
        let mut ck = Vec::with_capacity(tenant_bucket.len() + 1 + key.len());
        ck.extend_from_slice(tenant_bucket.as_bytes());
        ck.push(0);
        ck.extend_from_slice(key);
        ck
    }

    // ---- Users ----

    pub fn get_user(&self, user_id: &str) -> Result<UserRecord> {
        if let Some(raw) = self.users.get(user_id.as_bytes()) {
            return UserRecord::from_bytes(&raw);
        }
        let raw = self.gw.get(USERS_INDEX, user_id.as_bytes())?;
        let user = UserRecord::from_bytes(&raw)?;
        self.users.put(user_id.as_bytes(), raw, user.version.ver);
        Ok(user)
    }

    pub fn put_user(&self, user: &UserRecord, overwrite: bool) -> Result<()> {
        let raw = user.to_bytes();
        self.gw
            .put(USERS_INDEX, user.user_id.as_bytes(), &raw, overwrite)?;
        self.users.put(user.user_id.as_bytes(), raw, user.version.ver);
        Ok(())
    }

    pub fn del_user(&self, user_id: &str) -> Result<()> {
        self.gw.del(USERS_INDEX, user_id.as_bytes())?;
        self.users.invalidate_remove(user_id.as_bytes());
        Ok(())
    }

    // ---- Buckets ----

    pub fn get_bucket(&self, tenant_bucket: &str) -> Result<BucketRecord> {
        if let Some(raw) = self.buckets.get(tenant_bucket.as_bytes()) {
            return BucketRecord::from_bytes(&raw);
        }
        let raw = self.gw.get(BUCKET_INSTANCES_INDEX, tenant_bucket.as_bytes())?;
        let bucket = BucketRecord::from_bytes(&raw)?;
        self.buckets.put(tenant_bucket.as_bytes(), raw, bucket.mtime);
        Ok(bucket)
    }

    pub fn put_bucket(&self, bucket: &BucketRecord, overwrite: bool) -> Result<()> {
        let tb = bucket.tenant_bucket();
        let raw = bucket.to_bytes();
        self.gw
            .put(BUCKET_INSTANCES_INDEX, tb.as_bytes(), &raw, overwrite)?;
        self.buckets.put(tb.as_bytes(), raw, bucket.mtime);
        Ok(())
    }

    pub fn del_bucket(&self, tenant_bucket: &str) -> Result<()> {
        self.gw.del(BUCKET_INSTANCES_INDEX, tenant_bucket.as_bytes())?;
        self.buckets.invalidate_remove(tenant_bucket.as_bytes());
        Ok(())
    }

    // ---- Object entries ----

    pub fn get_entry(&self, tenant_bucket: &str, key: &[u8]) -> Result<DirEntry> {
        let ck = Self::object_cache_key(tenant_bucket, key);
        if let Some(raw) = self.objects.get(&ck) {
            return DirEntry::from_bytes(&raw);
        }
        let raw = self.gw.get(&bucket_index(tenant_bucket), key)?;
        let entry = DirEntry::from_bytes(&raw)?;
        self.objects.put(&ck, raw, entry.mtime);
        Ok(entry)
    }

    pub fn put_entry(&self, tenant_bucket: &str, entry: &DirEntry, overwrite: bool) -> Result<()> {
        let key = entry.key();
        let raw = entry.to_bytes();
        self.gw
            .put(&bucket_index(tenant_bucket), &key, &raw, overwrite)?;
        self.objects
            .put(&Self::object_cache_key(tenant_bucket, &key), raw, entry.mtime);
        Ok(())
    }

    pub fn del_entry(&self, tenant_bucket: &str, key: &[u8]) -> Result<()> {
        self.gw.del(&bucket_index(tenant_bucket), key)?;
        self.objects
            .invalidate_remove(&Self::object_cache_key(tenant_bucket, key));
        Ok(())
    }

    // ---- Statistics ----

    /// Read a bucket's usage header from its owner's stats index
    pub fn read_stats(&self, owner: &str, bucket_name: &str) -> Result<BucketHeader> {
        match self.gw.get(&user_stats_index(owner), bucket_name.as_bytes()) {
            Ok(raw) => BucketHeader::from_bytes(&raw),
            Err(e) if e.is_not_found() => Ok(BucketHeader::default()),
            Err(e) => Err(e),
        }
    }

    /// Write a bucket's usage header back
    pub fn write_stats(&self, owner: &str, bucket_name: &str, header: &BucketHeader) -> Result<()> {
        self.gw.put(
            &user_stats_index(owner),
            bucket_name.as_bytes(),
            &header.to_bytes(),
            true,
        )
    }

    /// Apply a stats delta after a successful index mutation
    ///
    /// A two-op read-modify-write; concurrent updates can lose
    /// increments and an offline reconciliation scan is the recovery
    /// path, so failures are logged and never fail the caller.
    pub fn adjust_stats(
        &self,
        owner: &str,
        bucket_name: &str,
        category: EntryCategory,
        size: i64,
        rounded: i64,
        count: i64,
    ) {
        let result = self.read_stats(owner, bucket_name).and_then(|mut header| {
            header.apply(category, size, rounded, count);
            self.write_stats(owner, bucket_name, &header)
        });
        if let Err(e) = result {
            warn!(
                owner,
                bucket = bucket_name,
                error = %e,
                "stats update failed; continuing"
            );
        }
    }
}
