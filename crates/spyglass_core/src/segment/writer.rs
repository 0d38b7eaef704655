//! The segment writer: events in, finished segments out.

use crate::error::CoreResult;
use crate::segment::chunk::ChunkWriter;
use crate::segment::{Compression, Segment};
use spyglass_types::Event;
use tracing::debug;
use uuid::Uuid;

/// Builds segments from a stream of events.
///
/// Events accumulate in a chunk; full chunks move into the current
/// segment. When a chunk would push the segment past its byte budget,
/// the segment is finished and handed back, and a fresh one begins.
#[derive(Debug)]
pub struct SegmentWriter {
    compression: Compression,
    max_events_per_chunk: u32,
    max_segment_bytes: u64,
    segment: Segment,
    chunk: ChunkWriter,
    /// ID of the first event in the current chunk.
    chunk_base: u64,
}

impl SegmentWriter {
    /// Creates a writer producing segments with the given limits.
    pub fn new(
        compression: Compression,
        max_events_per_chunk: u32,
        max_segment_bytes: u64,
    ) -> Self {
        Self {
            compression,
            max_events_per_chunk: max_events_per_chunk.max(1),
            max_segment_bytes,
            segment: Segment::new(Uuid::new_v4(), compression, max_segment_bytes),
            chunk: ChunkWriter::new(compression),
            chunk_base: 0,
        }
    }

    /// Appends an event.
    ///
    /// Returns a finished segment when this write caused a rotation.
    pub fn write(&mut self, event: &Event) -> CoreResult<Option<Segment>> {
        if self.chunk.is_empty() {
            self.chunk_base = event.id;
        }
        self.chunk.write_event(event)?;
        if self.chunk.elements() >= self.max_events_per_chunk {
            return self.flush_chunk();
        }
        Ok(None)
    }

    /// Compresses the pending chunk into the current segment.
    ///
    /// Returns a finished segment when the chunk did not fit anymore.
    pub fn flush_chunk(&mut self) -> CoreResult<Option<Segment>> {
        if self.chunk.is_empty() {
            return Ok(None);
        }
        let writer = std::mem::replace(&mut self.chunk, ChunkWriter::new(self.compression));
        let chunk_base = self.chunk_base;
        let chunk = writer.finish()?;
        if self.segment.events() == 0 {
            self.segment.set_base(chunk_base);
        }
        match self.segment.append(chunk) {
            Ok(()) => Ok(None),
            Err(chunk) => {
                let mut next = Segment::new(
                    Uuid::new_v4(),
                    self.compression,
                    self.max_segment_bytes,
                );
                next.set_base(chunk_base);
                let finished = std::mem::replace(&mut self.segment, next);
                debug!(
                    segment = %finished.id(),
                    events = finished.events(),
                    bytes = finished.bytes(),
                    "finished segment"
                );
                // An empty segment accepts any chunk.
                let accepted = self.segment.append(chunk);
                debug_assert!(accepted.is_ok());
                Ok(Some(finished))
            }
        }
    }

    /// Flushes the pending chunk and returns the final partial segment,
    /// if it holds any events.
    ///
    /// A rotation triggered by the last chunk yields two segments.
    pub fn finish(&mut self) -> CoreResult<Vec<Segment>> {
        let mut out = Vec::new();
        if let Some(rotated) = self.flush_chunk()? {
            out.push(rotated);
        }
        if self.segment.events() > 0 {
            let fresh = Segment::new(Uuid::new_v4(), self.compression, self.max_segment_bytes);
            out.push(std::mem::replace(&mut self.segment, fresh));
        }
        Ok(out)
    }
}
