//! Garbage-collector enqueue interface
//!
//! Delete paths hand byte-object destruction to the GC when it is
//! enabled; only a failed enqueue falls back to synchronous deletion.
//! The collector's scheduling loop lives outside this crate. The
//! contract here is just the queue.

use crate::records::ObjectMeta;
use moorage_common::Result;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// One unit of deferred destruction
#[derive(Clone, Debug)]
pub struct GcItem {
    /// Dedup tag for the collector
    pub tag: String,
    /// Fully qualified object name (`tenant/bucket/name[:instance]`)
    pub fqn: String,
    /// The byte container to destroy
    pub meta: ObjectMeta,
    /// Size being reclaimed
    pub size: u64,
    /// For multipart objects: the part index holding the part records
    pub part_index: Option<String>,
    /// For multipart objects: the upload whose parts should be purged
    pub upload_id: Option<String>,
}

/// Deferred-deletion queue
pub trait GcQueue: Send + Sync {
    /// Hand one object to the collector
    fn enqueue(&self, item: GcItem) -> Result<()>;
}

/// Process-local queue; the default, and what tests drain
#[derive(Default)]
pub struct MemoryGcQueue {
    items: Mutex<VecDeque<GcItem>>,
}

impl MemoryGcQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything queued so far
    pub fn drain(&self) -> Vec<GcItem> {
        self.items.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl GcQueue for MemoryGcQueue {
    fn enqueue(&self, item: GcItem) -> Result<()> {
        self.items.lock().push_back(item);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_queue_fifo() {
        let queue = MemoryGcQueue::new();
        assert!(queue.is_empty());
        for i in 0..3 {
            queue
                .enqueue(GcItem {
                    tag: format!("tag-{i}"),
                    fqn: format!("b/o{i}"),
                    meta: ObjectMeta::empty(),
                    size: i,
                    part_index: None,
                    upload_id: None,
                })
                .unwrap();
        }
        assert_eq!(queue.len(), 3);
        let drained = queue.drain();
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[0].tag, "tag-0");
        assert!(queue.is_empty());
    }
}
