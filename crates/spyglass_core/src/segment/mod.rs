//! Immutable, compressed segments of event payloads.
//!
//! A segment owns a UUID, a base event ID, an event count, and an
//! ordered list of compressed chunks. Segments are built by a single
//! writer and immutable once finished; on disk they live under
//! `<archive>/<uuid>` in a little-endian layout with a leading magic.

mod chunk;
mod reader;
mod writer;

pub use chunk::{Chunk, ChunkReader, ChunkWriter, Compression};
pub use reader::SegmentReader;
pub use writer::SegmentWriter;

use crate::codec::{put_varint, ByteReader};
use crate::error::{CoreError, CoreResult};
use spyglass_types::Event;
use uuid::Uuid;

/// Segment file magic.
pub const SEGMENT_MAGIC: u32 = 0x5641_5354;

/// Current segment format version.
pub const SEGMENT_VERSION: u8 = 1;

/// An immutable container of compressed event chunks covering the
/// contiguous ID range `[base, base + events)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    id: Uuid,
    compression: Compression,
    base: u64,
    events: u32,
    occupied_bytes: u32,
    chunks: Vec<Chunk>,
    max_bytes: u64,
}

impl Segment {
    /// Creates an empty segment.
    pub fn new(id: Uuid, compression: Compression, max_bytes: u64) -> Self {
        Self {
            id,
            compression,
            base: 0,
            events: 0,
            occupied_bytes: 0,
            chunks: Vec::new(),
            max_bytes,
        }
    }

    /// The segment's identity.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The first event ID.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Sets the base event ID. Only meaningful while the segment is
    /// still empty.
    pub fn set_base(&mut self, base: u64) {
        debug_assert_eq!(self.events, 0);
        self.base = base;
    }

    /// The number of events across all chunks.
    pub fn events(&self) -> u32 {
        self.events
    }

    /// The occupied (compressed) payload bytes.
    pub fn bytes(&self) -> u32 {
        self.occupied_bytes
    }

    /// The chunk list.
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Whether the segment covers the given event ID.
    pub fn contains(&self, id: u64) -> bool {
        self.base <= id && id < self.base + u64::from(self.events)
    }

    /// Appends a chunk, refusing when it would push the segment past its
    /// byte budget. An empty segment accepts any chunk.
    pub fn append(&mut self, chunk: Chunk) -> Result<(), Chunk> {
        let grown = u64::from(self.occupied_bytes) + chunk.compressed_bytes() as u64;
        if self.max_bytes > 0 && !self.chunks.is_empty() && grown > self.max_bytes {
            return Err(chunk);
        }
        self.events += chunk.elements();
        self.occupied_bytes = grown.min(u64::from(u32::MAX)) as u32;
        self.chunks.push(chunk);
        Ok(())
    }

    /// Random-access load of one event by ID.
    pub fn load(&self, id: u64) -> CoreResult<Event> {
        let mut reader = SegmentReader::new(self);
        reader.seek(id)?;
        reader.read()?.ok_or_else(|| {
            CoreError::format_error(format!("segment {} ends before event {id}", self.id))
        })
    }

    // -- serialization -------------------------------------------------------

    /// Serializes the segment into its on-disk layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&SEGMENT_MAGIC.to_le_bytes());
        buf.push(SEGMENT_VERSION);
        buf.extend_from_slice(self.id.as_bytes());
        buf.push(self.compression as u8);
        buf.extend_from_slice(&self.base.to_le_bytes());
        buf.extend_from_slice(&self.events.to_le_bytes());
        buf.extend_from_slice(&self.occupied_bytes.to_le_bytes());
        put_varint(&mut buf, self.chunks.len() as u64);
        for chunk in &self.chunks {
            chunk::encode_chunk(chunk, &mut buf);
        }
        buf
    }

    /// Decodes a segment, verifying magic and version.
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        let mut r = ByteReader::new(bytes);
        let (id, compression, base, events, occupied_bytes) = Self::decode_header(&mut r)?;
        let chunk_count = r.count(1 << 32, "chunk")?;
        let mut chunks = Vec::with_capacity(chunk_count);
        let mut total_events = 0u64;
        for _ in 0..chunk_count {
            let chunk = chunk::decode_chunk(compression, &mut r)?;
            total_events += u64::from(chunk.elements());
            chunks.push(chunk);
        }
        if total_events != u64::from(events) {
            return Err(CoreError::format_error(
                "segment event count does not match its chunks",
            ));
        }
        Ok(Self {
            id,
            compression,
            base,
            events,
            occupied_bytes,
            chunks,
            max_bytes: 0,
        })
    }

    /// Reads only the identifying header of a serialized segment.
    pub fn read_header(bytes: &[u8]) -> CoreResult<(Uuid, u64, u32)> {
        let mut r = ByteReader::new(bytes);
        let (id, _, base, events, _) = Self::decode_header(&mut r)?;
        Ok((id, base, events))
    }

    fn decode_header(
        r: &mut ByteReader<'_>,
    ) -> CoreResult<(Uuid, Compression, u64, u32, u32)> {
        let magic = r.u32()?;
        if magic != SEGMENT_MAGIC {
            return Err(CoreError::format_error("invalid segment magic"));
        }
        let version = r.u8()?;
        if version > SEGMENT_VERSION {
            return Err(CoreError::format_error(format!(
                "segment version {version} too new"
            )));
        }
        let mut id = [0u8; 16];
        id.copy_from_slice(r.bytes(16)?);
        let compression = Compression::from_byte(r.u8()?)
            .ok_or_else(|| CoreError::format_error("unknown compression method"))?;
        let base = r.u64()?;
        let events = r.u32()?;
        let occupied = r.u32()?;
        Ok((Uuid::from_bytes(id), compression, base, events, occupied))
    }
}
