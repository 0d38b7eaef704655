//! Chunks: compressed batches of serialized events.

use crate::codec::{self, ByteReader};
use crate::error::{CoreError, CoreResult};
use spyglass_types::Event;

/// The compression method applied to chunk buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Compression {
    /// No compression.
    None = 0,
    /// LZ4 block compression with a length prefix.
    #[default]
    Lz4 = 1,
    /// Snappy raw compression.
    Snappy = 2,
}

impl Compression {
    /// Converts a byte to a compression method.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::None),
            1 => Some(Self::Lz4),
            2 => Some(Self::Snappy),
            _ => None,
        }
    }

    fn compress(self, data: &[u8]) -> CoreResult<Vec<u8>> {
        match self {
            Self::None => Ok(data.to_vec()),
            Self::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
            Self::Snappy => snap::raw::Encoder::new()
                .compress_vec(data)
                .map_err(|e| CoreError::unspecified(format!("snappy compression: {e}"))),
        }
    }

    fn decompress(self, data: &[u8]) -> CoreResult<Vec<u8>> {
        match self {
            Self::None => Ok(data.to_vec()),
            Self::Lz4 => lz4_flex::decompress_size_prepended(data)
                .map_err(|e| CoreError::format_error(format!("lz4 decompression: {e}"))),
            Self::Snappy => snap::raw::Decoder::new()
                .decompress_vec(data)
                .map_err(|e| CoreError::format_error(format!("snappy decompression: {e}"))),
        }
    }
}

/// A compressed byte buffer holding a fixed number of events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    compression: Compression,
    elements: u32,
    data: Vec<u8>,
}

impl Chunk {
    /// The number of events in this chunk.
    pub fn elements(&self) -> u32 {
        self.elements
    }

    /// The compressed size in bytes.
    pub fn compressed_bytes(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn new(compression: Compression, elements: u32, data: Vec<u8>) -> Self {
        Self {
            compression,
            elements,
            data,
        }
    }

    pub(crate) fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Serializes events into an uncompressed buffer, then compresses the
/// whole batch on flush.
#[derive(Debug)]
pub struct ChunkWriter {
    compression: Compression,
    elements: u32,
    buffer: Vec<u8>,
}

impl ChunkWriter {
    /// Creates a writer for a fresh chunk.
    pub fn new(compression: Compression) -> Self {
        Self {
            compression,
            elements: 0,
            buffer: Vec::new(),
        }
    }

    /// The number of events written so far.
    pub fn elements(&self) -> u32 {
        self.elements
    }

    /// The uncompressed size so far.
    pub fn bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Whether no event has been written.
    pub fn is_empty(&self) -> bool {
        self.elements == 0
    }

    /// Appends one event.
    ///
    /// The event's type, timestamp, and value are staged together; the
    /// chunk only grows once all three encoded, so a failed append never
    /// leaves a torn event behind.
    pub fn write_event(&mut self, event: &Event) -> CoreResult<()> {
        let mut staged = Vec::new();
        codec::put_str(&mut staged, event.type_name());
        staged.extend_from_slice(&event.timestamp.to_le_bytes());
        codec::encode_type(&event.ty, &mut staged);
        codec::encode_data(&event.data, &mut staged);
        self.buffer.extend_from_slice(&staged);
        self.elements += 1;
        Ok(())
    }

    /// Compresses the buffered events into a chunk.
    pub fn finish(self) -> CoreResult<Chunk> {
        let data = self.compression.compress(&self.buffer)?;
        Ok(Chunk::new(self.compression, self.elements, data))
    }
}

/// Decompresses a chunk and streams its events back out.
#[derive(Debug)]
pub struct ChunkReader {
    data: Vec<u8>,
    position: usize,
    remaining: u32,
}

impl ChunkReader {
    /// Decompresses the chunk for reading.
    pub fn new(chunk: &Chunk) -> CoreResult<Self> {
        Ok(Self {
            data: chunk.compression.decompress(chunk.data())?,
            position: 0,
            remaining: chunk.elements(),
        })
    }

    /// The number of events left to read.
    pub fn available(&self) -> u32 {
        self.remaining
    }

    /// Reads the next event. The caller assigns the ID.
    pub fn read(&mut self) -> CoreResult<Event> {
        if self.remaining == 0 {
            return Err(CoreError::format_error("read past the end of a chunk"));
        }
        let mut r = ByteReader::new(&self.data[self.position..]);
        let _name = r.str()?;
        let timestamp = r.i64()?;
        let ty = codec::decode_type(&mut r)?;
        let data = codec::decode_data(&mut r)?;
        self.position += r.position();
        self.remaining -= 1;
        Ok(Event::new(timestamp, ty, data))
    }
}

/// Appends the chunk's serialized form to `buf`.
pub(crate) fn encode_chunk(chunk: &Chunk, buf: &mut Vec<u8>) {
    codec::put_varint(buf, u64::from(chunk.elements()));
    codec::put_bytes(buf, chunk.data());
}

/// Decodes one chunk.
pub(crate) fn decode_chunk(
    compression: Compression,
    r: &mut ByteReader<'_>,
) -> CoreResult<Chunk> {
    let elements = r.varint()?;
    if elements > u64::from(u32::MAX) {
        return Err(CoreError::format_error("implausible chunk element count"));
    }
    let data = r.byte_string()?;
    Ok(Chunk::new(compression, elements as u32, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use spyglass_types::{Data, RecordField, Type};

    fn event(n: u64) -> Event {
        let ty = Type::record(vec![RecordField::new("n", Type::count())]).with_name("tick");
        Event::new(n as i64, ty, Data::Record(vec![Data::Count(n)]))
    }

    #[test]
    fn write_and_read_back() {
        for compression in [Compression::None, Compression::Lz4, Compression::Snappy] {
            let mut w = ChunkWriter::new(compression);
            for n in 0..10 {
                w.write_event(&event(n)).unwrap();
            }
            let chunk = w.finish().unwrap();
            assert_eq!(chunk.elements(), 10);
            let mut r = ChunkReader::new(&chunk).unwrap();
            for n in 0..10 {
                let e = r.read().unwrap();
                assert_eq!(e.data, Data::Record(vec![Data::Count(n)]));
                assert_eq!(e.type_name(), "tick");
            }
            assert_eq!(r.available(), 0);
            assert!(r.read().is_err());
        }
    }

    #[test]
    fn compression_shrinks_repetitive_data() {
        let mut w = ChunkWriter::new(Compression::Lz4);
        for _ in 0..1000 {
            w.write_event(&event(7)).unwrap();
        }
        let uncompressed = w.bytes();
        let chunk = w.finish().unwrap();
        assert!(chunk.compressed_bytes() < uncompressed / 4);
    }

    #[test]
    fn truncated_chunk_is_a_format_error() {
        let mut w = ChunkWriter::new(Compression::None);
        w.write_event(&event(1)).unwrap();
        let chunk = w.finish().unwrap();
        let truncated = Chunk::new(Compression::None, 2, chunk.data().to_vec());
        let mut r = ChunkReader::new(&truncated).unwrap();
        r.read().unwrap();
        assert!(r.read().is_err());
    }
}
