//! Sequential and random-access reads over a segment.

use crate::error::{CoreError, CoreResult};
use crate::segment::chunk::ChunkReader;
use crate::segment::Segment;
use spyglass_types::Event;

/// A cursor over a segment's events.
///
/// Events do not store their IDs; the reader reconstructs them from the
/// segment base and its position.
#[derive(Debug)]
pub struct SegmentReader<'a> {
    segment: &'a Segment,
    chunk_index: usize,
    reader: Option<ChunkReader>,
    next_id: u64,
}

impl<'a> SegmentReader<'a> {
    /// Creates a reader positioned at the segment's first event.
    pub fn new(segment: &'a Segment) -> Self {
        Self {
            segment,
            chunk_index: 0,
            reader: None,
            next_id: segment.base(),
        }
    }

    /// Reads the next event, or `None` at the end of the segment.
    pub fn read(&mut self) -> CoreResult<Option<Event>> {
        loop {
            if let Some(reader) = self.reader.as_mut() {
                if reader.available() > 0 {
                    let mut event = reader.read()?;
                    event.id = self.next_id;
                    self.next_id += 1;
                    return Ok(Some(event));
                }
                self.chunk_index += 1;
                self.reader = None;
            }
            let Some(chunk) = self.segment.chunks().get(self.chunk_index) else {
                return Ok(None);
            };
            self.reader = Some(ChunkReader::new(chunk)?);
        }
    }

    /// Positions the reader so that the next [`read`](Self::read)
    /// returns the event with the given ID.
    ///
    /// Seeking backwards rewinds to the first chunk; chunks before the
    /// target are skipped by their element counts without
    /// decompression.
    pub fn seek(&mut self, id: u64) -> CoreResult<()> {
        if !self.segment.contains(id) {
            return Err(CoreError::invalid_argument(format!(
                "event {id} is outside segment {}",
                self.segment.id()
            )));
        }
        if id < self.next_id {
            self.chunk_index = 0;
            self.reader = None;
            self.next_id = self.segment.base();
        }
        // Skip whole chunks while the target lies beyond them.
        if self.reader.is_none() {
            while let Some(chunk) = self.segment.chunks().get(self.chunk_index) {
                let elements = u64::from(chunk.elements());
                if self.next_id + elements > id {
                    break;
                }
                self.next_id += elements;
                self.chunk_index += 1;
            }
        }
        // Consume events until the cursor reaches the target.
        while self.next_id < id {
            if self.read()?.is_none() {
                return Err(CoreError::format_error(format!(
                    "segment {} ends before event {id}",
                    self.segment.id()
                )));
            }
        }
        Ok(())
    }
}
