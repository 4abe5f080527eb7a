//! Moorage SAL - S3 object semantics over a distributed object/index store
//!
//! This crate translates S3 object semantics onto two store primitives:
//! an ordered key→value index service and a parity-striped byte-container
//! object service. It provides:
//!
//! - Name→location resolution across a bounded set of indices
//! - Versioned object lifecycle (PUT/GET/DELETE, delete markers, listing)
//! - Large-object striping with parity-group-aligned I/O
//! - Multipart uploads (separate-part and composite-tiered strategies)
//! - Read-through metadata caching with invalidation hooks
//! - Bucket/user statistics maintained alongside index writes
//!
//! The entry point is [`Store`], constructed once at bootstrap and passed
//! through every call; entities (users, buckets, objects) are value types
//! resolved per request.

pub mod bucket;
pub mod cache;
pub mod catalog;
pub mod container;
pub mod gc;
pub mod index;
pub mod multipart;
pub mod object;
pub mod records;
pub mod store;
pub mod user;
pub mod version;
pub mod writer;

// Re-exports
pub use bucket::{ListParams, ListResult};
pub use cache::{CacheStats, MetaCache};
pub use catalog::{Catalog, NoQuota, QuotaHandler};
pub use container::ContainerIo;
pub use gc::{GcItem, GcQueue, MemoryGcQueue};
pub use index::{IndexEntry, IndexGateway};
pub use multipart::{
    CompletedPart, MIN_PART_SIZE, PartOp, TIERED_PART_SIZE, UPLOAD_ID_PREFIX, UploadHandle,
};
pub use object::{
    CopyParams, DeleteResult, GetParams, PutOp, PutParams, TaggingDirective,
};
pub use records::{
    AccessKey, AccessKeyRecord, Attrs, BUCKET_VERSIONED, BUCKET_VERSIONS_SUSPENDED, BucketHeader,
    BucketListEntry, BucketRecord, CategoryStats, DirEntry, ENTRY_CURRENT, ENTRY_DELETE_MARKER,
    ENTRY_VER, EntryCategory, ObjectMeta, PartInfo, PartRecord, RecordVersion, UploadRecord,
    UserRecord,
};
pub use store::{CacheKind, Store};
pub use writer::{MAX_ACC_SIZE, ObjectWriter, WriteResult};
