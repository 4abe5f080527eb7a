//! Persisted record types and their wire encodings
//!
//! Every value stored in an index is schema-versioned: the encoder
//! writes `(struct_version: u8, compat_version: u8, length: u32-LE,
//! payload)`. A decoder accepts records whose compat version is at or
//! below its own and rejects anything newer; the length field lets an
//! older reader skip fields appended by a newer writer.

use bytes::{BufMut, BytesMut};
use moorage_common::{Error, Fid, Result};
use rand::distributions::Alphanumeric;
use rand::{Rng, thread_rng};
use std::collections::BTreeMap;

/// Attribute map carried by user, bucket, and object records
pub type Attrs = BTreeMap<String, Vec<u8>>;

/// Attribute holding an object's S3 tag set
pub const ATTR_TAGGING: &str = "moorage.tagging";

/// Attribute linking a completed multipart object to its part records
pub const ATTR_UPLOAD_ID: &str = "moorage.mp.upload-id";

/// Attribute marking an object as encrypted at rest
pub const ATTR_CRYPT_MODE: &str = "moorage.crypt.mode";

// ---- Wire primitives ----

pub(crate) mod wire {
    use super::{Attrs, Error, Fid, Result};
    use bytes::{BufMut, BytesMut};

    fn need(buf: &[u8], n: usize) -> Result<()> {
        if buf.len() < n {
            Err(Error::decode(format!(
                "record truncated: need {n} bytes, have {}",
                buf.len()
            )))
        } else {
            Ok(())
        }
    }

    pub fn take_u8(buf: &mut &[u8]) -> Result<u8> {
        need(buf, 1)?;
        let v = buf[0];
        *buf = &buf[1..];
        Ok(v)
    }

    pub fn take_u16(buf: &mut &[u8]) -> Result<u16> {
        need(buf, 2)?;
        let v = u16::from_le_bytes(buf[..2].try_into().expect("2 bytes"));
        *buf = &buf[2..];
        Ok(v)
    }

    pub fn take_u32(buf: &mut &[u8]) -> Result<u32> {
        need(buf, 4)?;
        let v = u32::from_le_bytes(buf[..4].try_into().expect("4 bytes"));
        *buf = &buf[4..];
        Ok(v)
    }

    pub fn take_u64(buf: &mut &[u8]) -> Result<u64> {
        need(buf, 8)?;
        let v = u64::from_le_bytes(buf[..8].try_into().expect("8 bytes"));
        *buf = &buf[8..];
        Ok(v)
    }

    pub fn take_slice<'a>(buf: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
        need(buf, n)?;
        let (head, tail) = buf.split_at(n);
        *buf = tail;
        Ok(head)
    }

    pub fn put_bytes(buf: &mut BytesMut, data: &[u8]) {
        buf.put_u32_le(data.len() as u32);
        buf.put_slice(data);
    }

    pub fn take_bytes(buf: &mut &[u8]) -> Result<Vec<u8>> {
        let len = take_u32(buf)? as usize;
        Ok(take_slice(buf, len)?.to_vec())
    }

    pub fn put_str(buf: &mut BytesMut, s: &str) {
        put_bytes(buf, s.as_bytes());
    }

    pub fn take_str(buf: &mut &[u8]) -> Result<String> {
        let raw = take_bytes(buf)?;
        String::from_utf8(raw).map_err(|_| Error::decode("string field is not utf-8"))
    }

    pub fn put_fid(buf: &mut BytesMut, fid: Fid) {
        buf.put_slice(&fid.to_bytes());
    }

    pub fn take_fid(buf: &mut &[u8]) -> Result<Fid> {
        let raw = take_slice(buf, 16)?;
        Ok(Fid::from_bytes(raw.try_into().expect("16 bytes")))
    }

    pub fn put_attrs(buf: &mut BytesMut, attrs: &Attrs) {
        buf.put_u32_le(attrs.len() as u32);
        for (k, v) in attrs {
            put_str(buf, k);
            put_bytes(buf, v);
        }
    }

    pub fn take_attrs(buf: &mut &[u8]) -> Result<Attrs> {
        let count = take_u32(buf)?;
        let mut attrs = Attrs::new();
        for _ in 0..count {
            let k = take_str(buf)?;
            let v = take_bytes(buf)?;
            attrs.insert(k, v);
        }
        Ok(attrs)
    }

    /// Write the version envelope around an already-encoded payload
    pub fn put_envelope(buf: &mut BytesMut, struct_ver: u8, compat_ver: u8, payload: &[u8]) {
        buf.put_u8(struct_ver);
        buf.put_u8(compat_ver);
        buf.put_u32_le(payload.len() as u32);
        buf.put_slice(payload);
    }

    /// Consume one envelope, returning its payload slice
    ///
    /// Records whose compat version exceeds the reader's are rejected;
    /// the length field lets the reader skip trailing fields appended
    /// by same-compat newer writers.
    pub fn take_envelope<'a>(buf: &mut &'a [u8], reader_compat: u8) -> Result<&'a [u8]> {
        let _struct_ver = take_u8(buf)?;
        let compat_ver = take_u8(buf)?;
        if compat_ver > reader_compat {
            return Err(Error::decode(format!(
                "record compat version {compat_ver} is newer than reader {reader_compat}"
            )));
        }
        let len = take_u32(buf)? as usize;
        take_slice(buf, len)
    }
}

use wire::{
    put_attrs, put_bytes, put_envelope, put_fid, put_str, take_attrs, take_bytes, take_envelope,
    take_fid, take_str, take_u8, take_u16, take_u32, take_u64,
};

// ---- Record versions ----

/// Optimistic version stamp on user and bucket records
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct RecordVersion {
    pub ver: u64,
    pub tag: String,
}

impl RecordVersion {
    /// Fresh stamp for a newly created record
    #[must_use]
    pub fn initial() -> Self {
        let tag: String = thread_rng()
            .sample_iter(&Alphanumeric)
            .take(16)
            .map(char::from)
            .collect();
        Self { ver: 1, tag }
    }

    /// Bump after a successful store
    pub fn bump(&mut self) {
        self.ver += 1;
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64_le(self.ver);
        put_str(buf, &self.tag);
    }

    fn decode(buf: &mut &[u8]) -> Result<Self> {
        Ok(Self {
            ver: take_u64(buf)?,
            tag: take_str(buf)?,
        })
    }
}

// ---- User records ----

/// One S3 access key pair
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessKey {
    pub id: String,
    pub secret: String,
}

/// A gateway user, stored in the global user index
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserRecord {
    pub user_id: String,
    pub display_name: String,
    pub email: String,
    pub access_keys: Vec<AccessKey>,
    pub version: RecordVersion,
    pub attrs: Attrs,
}

impl UserRecord {
    const STRUCT_VER: u8 = 1;
    const COMPAT_VER: u8 = 1;

    #[must_use]
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            email: String::new(),
            access_keys: Vec::new(),
            version: RecordVersion::initial(),
            attrs: Attrs::new(),
        }
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut payload = BytesMut::new();
        put_str(&mut payload, &self.user_id);
        put_str(&mut payload, &self.display_name);
        put_str(&mut payload, &self.email);
        payload.put_u32_le(self.access_keys.len() as u32);
        for key in &self.access_keys {
            put_str(&mut payload, &key.id);
            put_str(&mut payload, &key.secret);
        }
        self.version.encode(&mut payload);
        put_attrs(&mut payload, &self.attrs);

        let mut buf = BytesMut::new();
        put_envelope(&mut buf, Self::STRUCT_VER, Self::COMPAT_VER, &payload);
        buf.to_vec()
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut outer = data;
        let mut buf = take_envelope(&mut outer, Self::COMPAT_VER)?;
        let user_id = take_str(&mut buf)?;
        let display_name = take_str(&mut buf)?;
        let email = take_str(&mut buf)?;
        let key_count = take_u32(&mut buf)?;
        let mut access_keys = Vec::with_capacity(key_count as usize);
        for _ in 0..key_count {
            access_keys.push(AccessKey {
                id: take_str(&mut buf)?,
                secret: take_str(&mut buf)?,
            });
        }
        let version = RecordVersion::decode(&mut buf)?;
        let attrs = take_attrs(&mut buf)?;
        Ok(Self {
            user_id,
            display_name,
            email,
            access_keys,
            version,
            attrs,
        })
    }
}

/// Value of one entry in the global access-key index
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessKeyRecord {
    pub user_id: String,
    pub secret: String,
}

impl AccessKeyRecord {
    const STRUCT_VER: u8 = 1;
    const COMPAT_VER: u8 = 1;

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut payload = BytesMut::new();
        put_str(&mut payload, &self.user_id);
        put_str(&mut payload, &self.secret);
        let mut buf = BytesMut::new();
        put_envelope(&mut buf, Self::STRUCT_VER, Self::COMPAT_VER, &payload);
        buf.to_vec()
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut outer = data;
        let mut buf = take_envelope(&mut outer, Self::COMPAT_VER)?;
        Ok(Self {
            user_id: take_str(&mut buf)?,
            secret: take_str(&mut buf)?,
        })
    }
}

// ---- Bucket records ----

/// Bucket flag: versioning has been enabled at some point
pub const BUCKET_VERSIONED: u32 = 1 << 0;

/// Bucket flag: versioning is currently suspended
pub const BUCKET_VERSIONS_SUSPENDED: u32 = 1 << 1;

/// A bucket instance, stored in the global bucket index
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BucketRecord {
    pub name: String,
    pub tenant: String,
    pub owner: String,
    pub placement_rule: String,
    pub flags: u32,
    pub ctime: u64,
    pub mtime: u64,
    pub version: RecordVersion,
    pub attrs: Attrs,
}

impl BucketRecord {
    const STRUCT_VER: u8 = 1;
    const COMPAT_VER: u8 = 1;

    #[must_use]
    pub fn new(name: impl Into<String>, owner: impl Into<String>, now: u64) -> Self {
        Self {
            name: name.into(),
            tenant: String::new(),
            owner: owner.into(),
            placement_rule: "default".to_string(),
            flags: 0,
            ctime: now,
            mtime: now,
            version: RecordVersion::initial(),
            attrs: Attrs::new(),
        }
    }

    /// Key of this bucket in the global bucket index
    #[must_use]
    pub fn tenant_bucket(&self) -> String {
        if self.tenant.is_empty() {
            self.name.clone()
        } else {
            format!("{}${}", self.tenant, self.name)
        }
    }

    /// Versioning has ever been enabled on this bucket
    #[must_use]
    pub const fn versioned(&self) -> bool {
        self.flags & BUCKET_VERSIONED != 0
    }

    /// Versioning is enabled and not suspended
    #[must_use]
    pub const fn versioning_enabled(&self) -> bool {
        self.versioned() && self.flags & BUCKET_VERSIONS_SUSPENDED == 0
    }

    /// Versioning was enabled but is currently suspended
    #[must_use]
    pub const fn versioning_suspended(&self) -> bool {
        self.versioned() && self.flags & BUCKET_VERSIONS_SUSPENDED != 0
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut payload = BytesMut::new();
        put_str(&mut payload, &self.name);
        put_str(&mut payload, &self.tenant);
        put_str(&mut payload, &self.owner);
        put_str(&mut payload, &self.placement_rule);
        payload.put_u32_le(self.flags);
        payload.put_u64_le(self.ctime);
        payload.put_u64_le(self.mtime);
        self.version.encode(&mut payload);
        put_attrs(&mut payload, &self.attrs);

        let mut buf = BytesMut::new();
        put_envelope(&mut buf, Self::STRUCT_VER, Self::COMPAT_VER, &payload);
        buf.to_vec()
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut outer = data;
        let mut buf = take_envelope(&mut outer, Self::COMPAT_VER)?;
        Ok(Self {
            name: take_str(&mut buf)?,
            tenant: take_str(&mut buf)?,
            owner: take_str(&mut buf)?,
            placement_rule: take_str(&mut buf)?,
            flags: take_u32(&mut buf)?,
            ctime: take_u64(&mut buf)?,
            mtime: take_u64(&mut buf)?,
            version: RecordVersion::decode(&mut buf)?,
            attrs: take_attrs(&mut buf)?,
        })
    }
}

/// Value of one entry in a user's bucket list index
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct BucketListEntry {
    pub size: u64,
    pub ctime: u64,
}

impl BucketListEntry {
    const STRUCT_VER: u8 = 1;
    const COMPAT_VER: u8 = 1;

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut payload = BytesMut::new();
        payload.put_u64_le(self.size);
        payload.put_u64_le(self.ctime);
        let mut buf = BytesMut::new();
        put_envelope(&mut buf, Self::STRUCT_VER, Self::COMPAT_VER, &payload);
        buf.to_vec()
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut outer = data;
        let mut buf = take_envelope(&mut outer, Self::COMPAT_VER)?;
        Ok(Self {
            size: take_u64(&mut buf)?,
            ctime: take_u64(&mut buf)?,
        })
    }
}

// ---- Object records ----

/// Identity and shape of a byte container
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct ObjectMeta {
    /// Object identifier; `Fid::NIL` for zero-byte objects
    pub oid: Fid,
    /// Placement (pool) version the object was created under
    pub pver: Fid,
    /// Striping layout id from the cluster catalog
    pub layout_id: u64,
    /// Whether the object is a composite with layer sub-objects
    pub is_composite: bool,
    /// The composite's top layer, `Fid::NIL` when plain
    pub top_layer: Fid,
}

impl ObjectMeta {
    const STRUCT_VER: u8 = 1;
    const COMPAT_VER: u8 = 1;

    /// Meta for a zero-byte object (no byte container exists)
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            oid: Fid::NIL,
            pver: Fid::NIL,
            layout_id: 0,
            is_composite: false,
            top_layer: Fid::NIL,
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        let mut payload = BytesMut::new();
        put_fid(&mut payload, self.oid);
        put_fid(&mut payload, self.pver);
        payload.put_u64_le(self.layout_id);
        payload.put_u8(u8::from(self.is_composite));
        put_fid(&mut payload, self.top_layer);
        put_envelope(buf, Self::STRUCT_VER, Self::COMPAT_VER, &payload);
    }

    fn decode(outer: &mut &[u8]) -> Result<Self> {
        let mut buf = take_envelope(outer, Self::COMPAT_VER)?;
        Ok(Self {
            oid: take_fid(&mut buf)?,
            pver: take_fid(&mut buf)?,
            layout_id: take_u64(&mut buf)?,
            is_composite: take_u8(&mut buf)? != 0,
            top_layer: take_fid(&mut buf)?,
        })
    }
}

/// Accounting category of a directory entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum EntryCategory {
    /// An ordinary object
    Main = 1,
    /// The head record of a multipart object
    MultiMeta = 2,
}

impl EntryCategory {
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            1 => Ok(Self::Main),
            2 => Ok(Self::MultiMeta),
            other => Err(Error::decode(format!("unknown entry category {other}"))),
        }
    }
}

/// Entry flag: this is a versioned record (non-null instance)
pub const ENTRY_VER: u16 = 1 << 0;

/// Entry flag: the latest live version of its name
pub const ENTRY_CURRENT: u16 = 1 << 1;

/// Entry flag: a delete tombstone
pub const ENTRY_DELETE_MARKER: u16 = 1 << 2;

/// One record in a bucket index: the metadata of one (name, instance)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub instance: String,
    pub size: u64,
    pub accounted_size: u64,
    pub mtime: u64,
    pub etag: String,
    pub owner: String,
    pub owner_display: String,
    pub category: EntryCategory,
    pub flags: u16,
    pub meta: ObjectMeta,
    pub attrs: Attrs,
}

impl DirEntry {
    const STRUCT_VER: u8 = 1;
    const COMPAT_VER: u8 = 1;

    /// The entry's bucket-index key
    #[must_use]
    pub fn key(&self) -> Vec<u8> {
        crate::version::entry_key(&self.name, &self.instance)
    }

    #[must_use]
    pub const fn is_current(&self) -> bool {
        self.flags & ENTRY_CURRENT != 0
    }

    #[must_use]
    pub const fn is_delete_marker(&self) -> bool {
        self.flags & ENTRY_DELETE_MARKER != 0
    }

    /// Visible to a latest-only listing
    #[must_use]
    pub const fn is_visible(&self) -> bool {
        self.is_current() && !self.is_delete_marker()
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut payload = BytesMut::new();
        put_str(&mut payload, &self.name);
        put_str(&mut payload, &self.instance);
        payload.put_u64_le(self.size);
        payload.put_u64_le(self.accounted_size);
        payload.put_u64_le(self.mtime);
        put_str(&mut payload, &self.etag);
        put_str(&mut payload, &self.owner);
        put_str(&mut payload, &self.owner_display);
        payload.put_u8(self.category as u8);
        payload.put_u16_le(self.flags);
        self.meta.encode(&mut payload);
        put_attrs(&mut payload, &self.attrs);

        let mut buf = BytesMut::new();
        put_envelope(&mut buf, Self::STRUCT_VER, Self::COMPAT_VER, &payload);
        buf.to_vec()
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut outer = data;
        let mut buf = take_envelope(&mut outer, Self::COMPAT_VER)?;
        Ok(Self {
            name: take_str(&mut buf)?,
            instance: take_str(&mut buf)?,
            size: take_u64(&mut buf)?,
            accounted_size: take_u64(&mut buf)?,
            mtime: take_u64(&mut buf)?,
            etag: take_str(&mut buf)?,
            owner: take_str(&mut buf)?,
            owner_display: take_str(&mut buf)?,
            category: EntryCategory::from_u8(take_u8(&mut buf)?)?,
            flags: take_u16(&mut buf)?,
            meta: ObjectMeta::decode(&mut buf)?,
            attrs: take_attrs(&mut buf)?,
        })
    }
}

// ---- Multipart records ----

/// Metadata of one uploaded part
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct PartInfo {
    pub num: u32,
    pub etag: String,
    pub size: u64,
    pub rounded_size: u64,
    pub accounted_size: u64,
    pub mtime: u64,
    /// Compression applied to the part; empty means none
    pub compression: String,
}

impl PartInfo {
    const STRUCT_VER: u8 = 1;
    const COMPAT_VER: u8 = 1;

    fn encode(&self, buf: &mut BytesMut) {
        let mut payload = BytesMut::new();
        payload.put_u32_le(self.num);
        put_str(&mut payload, &self.etag);
        payload.put_u64_le(self.size);
        payload.put_u64_le(self.rounded_size);
        payload.put_u64_le(self.accounted_size);
        payload.put_u64_le(self.mtime);
        put_str(&mut payload, &self.compression);
        put_envelope(buf, Self::STRUCT_VER, Self::COMPAT_VER, &payload);
    }

    fn decode(outer: &mut &[u8]) -> Result<Self> {
        let mut buf = take_envelope(outer, Self::COMPAT_VER)?;
        Ok(Self {
            num: take_u32(&mut buf)?,
            etag: take_str(&mut buf)?,
            size: take_u64(&mut buf)?,
            rounded_size: take_u64(&mut buf)?,
            accounted_size: take_u64(&mut buf)?,
            mtime: take_u64(&mut buf)?,
            compression: take_str(&mut buf)?,
        })
    }
}

/// Value of one entry in a bucket's part index
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartRecord {
    pub info: PartInfo,
    pub meta: ObjectMeta,
    pub attrs: Attrs,
}

impl PartRecord {
    const STRUCT_VER: u8 = 1;
    const COMPAT_VER: u8 = 1;

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut payload = BytesMut::new();
        self.info.encode(&mut payload);
        self.meta.encode(&mut payload);
        put_attrs(&mut payload, &self.attrs);
        let mut buf = BytesMut::new();
        put_envelope(&mut buf, Self::STRUCT_VER, Self::COMPAT_VER, &payload);
        buf.to_vec()
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut outer = data;
        let mut buf = take_envelope(&mut outer, Self::COMPAT_VER)?;
        Ok(Self {
            info: PartInfo::decode(&mut buf)?,
            meta: ObjectMeta::decode(&mut buf)?,
            attrs: take_attrs(&mut buf)?,
        })
    }
}

/// State of an in-progress multipart upload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadRecord {
    pub upload_id: String,
    pub placement_rule: String,
    /// Whether the upload targets one composite object
    pub tiered: bool,
    /// The composite's meta when tiered; `ObjectMeta::empty()` otherwise
    pub meta: ObjectMeta,
    /// The initial head entry (owner, ctime, request attrs)
    pub entry: DirEntry,
}

impl UploadRecord {
    const STRUCT_VER: u8 = 1;
    const COMPAT_VER: u8 = 1;

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut payload = BytesMut::new();
        put_str(&mut payload, &self.upload_id);
        put_str(&mut payload, &self.placement_rule);
        payload.put_u8(u8::from(self.tiered));
        self.meta.encode(&mut payload);
        put_bytes(&mut payload, &self.entry.to_bytes());
        let mut buf = BytesMut::new();
        put_envelope(&mut buf, Self::STRUCT_VER, Self::COMPAT_VER, &payload);
        buf.to_vec()
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut outer = data;
        let mut buf = take_envelope(&mut outer, Self::COMPAT_VER)?;
        let upload_id = take_str(&mut buf)?;
        let placement_rule = take_str(&mut buf)?;
        let tiered = take_u8(&mut buf)? != 0;
        let meta = ObjectMeta::decode(&mut buf)?;
        let entry_raw = take_bytes(&mut buf)?;
        Ok(Self {
            upload_id,
            placement_rule,
            tiered,
            meta,
            entry: DirEntry::from_bytes(&entry_raw)?,
        })
    }
}

// ---- Statistics ----

/// Per-category usage counters
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct CategoryStats {
    pub num_entries: u64,
    /// Sum of parity-unit-rounded sizes
    pub total_size: u64,
    /// Sum of true byte sizes
    pub actual_size: u64,
}

/// Per-bucket usage header, one per bucket in a user's stats index
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct BucketHeader {
    pub stats: BTreeMap<u8, CategoryStats>,
}

impl BucketHeader {
    const STRUCT_VER: u8 = 1;
    const COMPAT_VER: u8 = 1;

    /// Counters of one category, zero when untracked
    #[must_use]
    pub fn category(&self, category: EntryCategory) -> CategoryStats {
        self.stats.get(&(category as u8)).copied().unwrap_or_default()
    }

    /// Apply a signed delta to one category
    pub fn apply(&mut self, category: EntryCategory, size: i64, rounded: i64, count: i64) {
        let slot = self.stats.entry(category as u8).or_default();
        slot.actual_size = add_signed(slot.actual_size, size);
        slot.total_size = add_signed(slot.total_size, rounded);
        slot.num_entries = add_signed(slot.num_entries, count);
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut payload = BytesMut::new();
        payload.put_u32_le(self.stats.len() as u32);
        for (cat, s) in &self.stats {
            payload.put_u8(*cat);
            payload.put_u64_le(s.num_entries);
            payload.put_u64_le(s.total_size);
            payload.put_u64_le(s.actual_size);
        }
        let mut buf = BytesMut::new();
        put_envelope(&mut buf, Self::STRUCT_VER, Self::COMPAT_VER, &payload);
        buf.to_vec()
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut outer = data;
        let mut buf = take_envelope(&mut outer, Self::COMPAT_VER)?;
        let count = take_u32(&mut buf)?;
        let mut stats = BTreeMap::new();
        for _ in 0..count {
            let cat = take_u8(&mut buf)?;
            stats.insert(
                cat,
                CategoryStats {
                    num_entries: take_u64(&mut buf)?,
                    total_size: take_u64(&mut buf)?,
                    actual_size: take_u64(&mut buf)?,
                },
            );
        }
        Ok(Self { stats })
    }
}

fn add_signed(value: u64, delta: i64) -> u64 {
    if delta >= 0 {
        value.saturating_add(delta as u64)
    } else {
        value.saturating_sub(delta.unsigned_abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use moorage_common::FID_TYPE_OBJECT;

    fn sample_entry() -> DirEntry {
        let mut attrs = Attrs::new();
        attrs.insert(ATTR_TAGGING.to_string(), b"k=v".to_vec());
        DirEntry {
            name: "photos/cat.jpg".to_string(),
            instance: "0AbCdEf".to_string(),
            size: 1234,
            accounted_size: 1234,
            mtime: 1_700_000_000_000,
            etag: "d41d8cd98f00b204e9800998ecf8427e".to_string(),
            owner: "alice".to_string(),
            owner_display: "Alice".to_string(),
            category: EntryCategory::Main,
            flags: ENTRY_VER | ENTRY_CURRENT,
            meta: ObjectMeta {
                oid: Fid::from_name("obj", FID_TYPE_OBJECT),
                pver: Fid::from_name("pver", FID_TYPE_OBJECT),
                layout_id: 3,
                is_composite: false,
                top_layer: Fid::NIL,
            },
            attrs,
        }
    }

    #[test]
    fn test_dir_entry_roundtrip() {
        let entry = sample_entry();
        let parsed = DirEntry::from_bytes(&entry.to_bytes()).unwrap();
        assert_eq!(parsed, entry);
        assert!(parsed.is_current());
        assert!(!parsed.is_delete_marker());
        assert!(parsed.is_visible());
    }

    #[test]
    fn test_user_record_roundtrip() {
        let mut user = UserRecord::new("alice", "Alice");
        user.email = "alice@example.com".to_string();
        user.access_keys.push(AccessKey {
            id: "AK1".to_string(),
            secret: "S3CR3T".to_string(),
        });
        let parsed = UserRecord::from_bytes(&user.to_bytes()).unwrap();
        assert_eq!(parsed, user);
    }

    #[test]
    fn test_bucket_record_flags() {
        let mut bucket = BucketRecord::new("b1", "alice", 1);
        assert!(!bucket.versioned());
        bucket.flags |= BUCKET_VERSIONED;
        assert!(bucket.versioning_enabled());
        bucket.flags |= BUCKET_VERSIONS_SUSPENDED;
        assert!(bucket.versioning_suspended());
        assert!(!bucket.versioning_enabled());

        let parsed = BucketRecord::from_bytes(&bucket.to_bytes()).unwrap();
        assert_eq!(parsed, bucket);
        assert_eq!(parsed.tenant_bucket(), "b1");
    }

    #[test]
    fn test_tenant_bucket_key() {
        let mut bucket = BucketRecord::new("b1", "alice", 1);
        bucket.tenant = "acme".to_string();
        assert_eq!(bucket.tenant_bucket(), "acme$b1");
    }

    #[test]
    fn test_upload_record_roundtrip() {
        let upload = UploadRecord {
            upload_id: "2~abcDEF".to_string(),
            placement_rule: "default".to_string(),
            tiered: true,
            meta: ObjectMeta {
                oid: Fid::from_name("root", FID_TYPE_OBJECT),
                pver: Fid::NIL,
                layout_id: 5,
                is_composite: true,
                top_layer: Fid::from_name("layer", FID_TYPE_OBJECT),
            },
            entry: sample_entry(),
        };
        let parsed = UploadRecord::from_bytes(&upload.to_bytes()).unwrap();
        assert_eq!(parsed, upload);
    }

    #[test]
    fn test_part_record_roundtrip() {
        let part = PartRecord {
            info: PartInfo {
                num: 2,
                etag: "abcd".to_string(),
                size: 15 << 20,
                rounded_size: 15 << 20,
                accounted_size: 15 << 20,
                mtime: 99,
                compression: String::new(),
            },
            meta: ObjectMeta::empty(),
            attrs: Attrs::new(),
        };
        let parsed = PartRecord::from_bytes(&part.to_bytes()).unwrap();
        assert_eq!(parsed, part);
    }

    #[test]
    fn test_bucket_header_apply() {
        let mut header = BucketHeader::default();
        header.apply(EntryCategory::Main, 100, 4096, 1);
        header.apply(EntryCategory::Main, 50, 4096, 1);
        let main = header.category(EntryCategory::Main);
        assert_eq!(main.actual_size, 150);
        assert_eq!(main.total_size, 8192);
        assert_eq!(main.num_entries, 2);

        header.apply(EntryCategory::Main, -100, -4096, -1);
        let main = header.category(EntryCategory::Main);
        assert_eq!(main.actual_size, 50);
        assert_eq!(main.num_entries, 1);

        let parsed = BucketHeader::from_bytes(&header.to_bytes()).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_newer_compat_rejected() {
        let entry = sample_entry();
        let mut raw = entry.to_bytes();
        // pretend a future writer bumped the compat version
        raw[1] = 9;
        let err = DirEntry::from_bytes(&raw).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_trailing_fields_skipped() {
        // a same-compat newer writer may append fields beyond the
        // declared length; the envelope lets this reader ignore them
        let entry = sample_entry();
        let mut raw = entry.to_bytes();
        raw.extend_from_slice(b"future-field");
        let parsed = DirEntry::from_bytes(&raw).unwrap();
        assert_eq!(parsed, entry);
    }
}
