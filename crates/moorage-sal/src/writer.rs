//! Writer pipeline
//!
//! The atomic writer accumulates arriving buffers until a flush
//! threshold or end-of-stream, then hands group-aligned spans to the
//! container gateway. Object-service creation is deferred to the first
//! non-empty flush so a zero-byte PUT never creates a byte container.

use crate::container::{ContainerIo, round_down};
use crate::records::ObjectMeta;
use bytes::BytesMut;
use moorage_common::{Error, Result};

/// Accumulation threshold before a mid-stream flush (32 MiB)
pub const MAX_ACC_SIZE: u64 = 32 * 1024 * 1024;

/// Outcome of a completed write
#[derive(Clone, Debug)]
pub struct WriteResult {
    pub meta: ObjectMeta,
    pub size: u64,
    pub rounded_size: u64,
    pub etag: String,
}

enum Target {
    /// Create a fresh object at first flush, sized by the hint
    New { size_hint: u64 },
    /// Write into an existing container from a base offset
    Existing { base: u64 },
}

/// Accumulating writer over the container gateway
pub struct ObjectWriter<'a> {
    io: &'a ContainerIo,
    target: Target,
    meta: Option<ObjectMeta>,
    acc: BytesMut,
    flushed: u64,
    total: u64,
    digest: md5::Context,
    /// Whether the final flush ends the underlying object
    mark_last: bool,
    finished: bool,
}

impl<'a> ObjectWriter<'a> {
    /// Writer that creates a new object on first flush
    pub fn new(io: &'a ContainerIo, size_hint: u64) -> Self {
        Self {
            io,
            target: Target::New { size_hint },
            meta: None,
            acc: BytesMut::new(),
            flushed: 0,
            total: 0,
            digest: md5::Context::new(),
            mark_last: true,
            finished: false,
        }
    }

    /// Writer into an existing container at `base` offset
    ///
    /// `mark_last` is false when the stream ends mid-object (a tiered
    /// multipart part): the tail flush then pads to the unit without
    /// the last-block flag.
    pub fn for_existing(io: &'a ContainerIo, meta: ObjectMeta, base: u64, mark_last: bool) -> Self {
        Self {
            io,
            target: Target::Existing { base },
            meta: Some(meta),
            acc: BytesMut::new(),
            flushed: 0,
            total: 0,
            digest: md5::Context::new(),
            mark_last,
            finished: false,
        }
    }

    /// Feed a buffer; an empty buffer signals end-of-stream
    pub fn process(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return self.finish();
        }
        if self.finished {
            return Err(Error::invalid_argument("write after end of stream"));
        }
        self.digest.consume(data);
        self.acc.extend_from_slice(data);
        self.total += data.len() as u64;
        while self.acc.len() as u64 >= MAX_ACC_SIZE {
            let before = self.acc.len();
            self.flush(false)?;
            if self.acc.len() == before {
                break;
            }
        }
        Ok(())
    }

    fn ensure_meta(&mut self) -> Result<ObjectMeta> {
        if let Some(meta) = self.meta {
            return Ok(meta);
        }
        let size_hint = match self.target {
            Target::New { size_hint } => size_hint.max(self.total),
            Target::Existing { .. } => unreachable!("existing targets carry meta"),
        };
        let meta = self.io.create(size_hint)?;
        self.meta = Some(meta);
        Ok(meta)
    }

    fn base(&self) -> u64 {
        match self.target {
            Target::New { .. } => 0,
            Target::Existing { base } => base,
        }
    }

    fn flush(&mut self, last: bool) -> Result<()> {
        if self.acc.is_empty() {
            return Ok(());
        }
        let meta = self.ensure_meta()?;
        let group = self.io.group_size(meta.layout_id)?;
        let len = if last {
            self.acc.len()
        } else {
            // group-align, and hold back at least one group so the
            // end-of-stream flush always owns the object's final block
            let mut n = round_down(self.acc.len() as u64, group) as usize;
            if n == self.acc.len() {
                n = n.saturating_sub(group as usize);
            }
            n
        };
        if len == 0 {
            return Ok(());
        }
        let chunk = self.acc.split_to(len);
        let offset = self.base() + self.flushed;
        self.io.write(&meta, offset, &chunk, last && self.mark_last)?;
        self.flushed += len as u64;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.flush(true)?;
        self.finished = true;
        Ok(())
    }

    /// Flush the tail and return the write outcome
    pub fn complete(mut self) -> Result<WriteResult> {
        if !self.finished {
            self.finish()?;
        }
        let digest = std::mem::replace(&mut self.digest, md5::Context::new()).compute();
        let meta = self.meta.take().unwrap_or_else(ObjectMeta::empty);
        let rounded_size = if self.total == 0 {
            0
        } else {
            self.io.rounded_size(self.total, meta.layout_id)?
        };
        Ok(WriteResult {
            meta,
            size: self.total,
            rounded_size,
            etag: format!("{digest:x}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use moorage_client::MemoryCluster;
    use moorage_common::IdGenerator;
    use std::sync::Arc;

    const MIB: usize = 1024 * 1024;

    fn setup() -> (Arc<MemoryCluster>, ContainerIo) {
        let cluster = Arc::new(MemoryCluster::new());
        let io = ContainerIo::new(
            cluster.clone(),
            cluster.clone(),
            Arc::new(IdGenerator::new()),
            128,
        );
        (cluster, io)
    }

    #[test]
    fn test_zero_byte_stream_creates_nothing() {
        let (cluster, io) = setup();
        let mut writer = ObjectWriter::new(&io, 0);
        writer.process(&[]).unwrap();
        let result = writer.complete().unwrap();

        assert_eq!(result.size, 0);
        assert_eq!(result.rounded_size, 0);
        assert!(result.meta.oid.is_nil());
        // the empty-input etag
        assert_eq!(result.etag, "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(cluster.object_count(), 0);
    }

    #[test]
    fn test_small_write_single_flush() {
        let (cluster, io) = setup();
        let data = b"hello moorage".repeat(100);
        let mut writer = ObjectWriter::new(&io, data.len() as u64);
        writer.process(&data).unwrap();
        let result = writer.complete().unwrap();

        assert_eq!(result.size, data.len() as u64);
        assert_eq!(result.etag, format!("{:x}", md5::compute(&data)));
        assert_eq!(cluster.write_ops(), 1);

        let mut out = Vec::new();
        io.read(&result.meta, result.size, 0, result.size - 1, &mut |_, buf| {
            out.extend_from_slice(&buf);
            Ok(())
        })
        .unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_large_write_accumulates_then_flushes() {
        let (cluster, io) = setup();
        let data: Vec<u8> = (0..64 * MIB).map(|i| (i % 241) as u8).collect();

        let mut writer = ObjectWriter::new(&io, data.len() as u64);
        // feed in 8 MiB slices: nothing may hit the service before the
        // accumulator crosses 32 MiB
        for (i, chunk) in data.chunks(8 * MIB).enumerate() {
            writer.process(chunk).unwrap();
            if i < 3 {
                assert_eq!(cluster.write_ops(), 0, "flushed before threshold");
            }
        }
        let result = writer.complete().unwrap();
        assert_eq!(result.size, data.len() as u64);
        // unit 1 MiB for a 64 MiB object: rounded size equals size
        assert_eq!(result.rounded_size, data.len() as u64);

        let mut out = Vec::new();
        io.read(&result.meta, result.size, 0, result.size - 1, &mut |_, buf| {
            out.extend_from_slice(&buf);
            Ok(())
        })
        .unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_unaligned_tail_padded_to_unit() {
        let (cluster, io) = setup();
        let data = vec![3u8; 100_000];
        let mut writer = ObjectWriter::new(&io, data.len() as u64);
        writer.process(&data).unwrap();
        let result = writer.complete().unwrap();

        // 100000 over a 4 KiB unit rounds to 102400
        assert_eq!(result.rounded_size, 102_400);
        assert!(cluster.object_exists(result.meta.oid));
    }

    #[test]
    fn test_existing_target_offset_write() {
        let (_, io) = setup();
        let meta = io.create(32 * MIB as u64).unwrap();
        let part = vec![9u8; 5 * MIB];

        let mut writer = ObjectWriter::for_existing(&io, meta, 15 * MIB as u64, false);
        writer.process(&part).unwrap();
        let result = writer.complete().unwrap();
        assert_eq!(result.size, part.len() as u64);

        let mut out = Vec::new();
        io.read(&meta, 20 * MIB as u64, 15 * MIB as u64, 20 * MIB as u64 - 1, &mut |_, buf| {
            out.extend_from_slice(&buf);
            Ok(())
        })
        .unwrap();
        assert_eq!(out, part);
    }

    #[test]
    fn test_process_after_end_rejected() {
        let (_, io) = setup();
        let mut writer = ObjectWriter::new(&io, 0);
        writer.process(b"data").unwrap();
        writer.process(&[]).unwrap();
        assert!(writer.process(b"more").is_err());
    }
}
