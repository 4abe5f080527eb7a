//! Moorage Client - contracts for the backing store services
//!
//! The gateway core consumes two primitive services from the
//! distributed store: an ordered key→value **index service** and a
//! striped byte-container **object service**. This crate defines the
//! synchronous contracts for both, the striping layout catalog, and
//! `MemoryCluster`, a process-local implementation backing the test
//! suite.

pub mod index;
pub mod mem;
pub mod object;

pub use index::IndexService;
pub use mem::MemoryCluster;
pub use object::{
    CompositeLayer, Extent, ExtentKey, Layout, LayoutCatalog, OBJ_CREATE_GEN_DI, OBJ_CREATE_META,
    OP_FULL, OP_LAST, ObjectLayout, ObjectService, StripeGeometry, extent_val_from_bytes,
    extent_val_to_bytes, layer_extent_index,
};
