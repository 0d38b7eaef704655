//! The index for vectors and sets.
//!
//! One value index per element position, grown lazily up to `max_size`,
//! plus a range coder over the sequence size. Containment lookups
//! reduce to a union of per-position equality lookups.

use crate::bitmap::{Base, Coder, EwahBitmap, MultiLevelCoder, RangeCoder};
use crate::codec::{self, put_varint, ByteReader};
use crate::error::{CoreError, CoreResult};
use crate::index::ValueIndex;
use spyglass_types::{Data, RelOp, Type};

/// An index for homogeneous sequences.
#[derive(Debug, Clone)]
pub struct SequenceIndex {
    element_type: Type,
    max_size: usize,
    elements: Vec<ValueIndex>,
    size: MultiLevelCoder<RangeCoder>,
}

impl SequenceIndex {
    /// Creates a sequence index over the given element type. Sequences
    /// longer than `max_size` are trimmed at the end.
    pub fn new(element_type: Type, max_size: usize) -> Self {
        Self {
            element_type,
            max_size,
            elements: Vec::new(),
            size: MultiLevelCoder::new(Base::covering(10, max_size as u64)),
        }
    }

    pub(crate) fn append(&mut self, x: &Data, pos: u64) -> CoreResult<()> {
        let xs = match x {
            Data::Vector(xs) | Data::Set(xs) => xs,
            other => {
                return Err(CoreError::type_clash("sequence", other.to_string()));
            }
        };
        let count = xs.len().min(self.max_size);
        while self.elements.len() < count {
            let element = ValueIndex::make(&self.element_type).ok_or_else(|| {
                CoreError::unspecified(format!(
                    "unindexable sequence element type: {}",
                    self.element_type
                ))
            })?;
            self.elements.push(element);
        }
        for (element, value) in self.elements.iter_mut().zip(&xs[..count]) {
            element.append_at(value, pos)?;
        }
        self.size.skip(pos - self.size.rows());
        self.size.append(count as u64);
        Ok(())
    }

    pub(crate) fn lookup(&self, op: RelOp, x: &Data, offset: u64) -> CoreResult<EwahBitmap> {
        if !matches!(op, RelOp::Ni | RelOp::NotNi) {
            return Err(CoreError::unsupported_operator(op));
        }
        if self.elements.is_empty() {
            return Ok(EwahBitmap::with_size(offset, false));
        }
        let mut result = self.elements[0].lookup(RelOp::Equal, x)?;
        for element in &self.elements[1..] {
            result |= &element.lookup(RelOp::Equal, x)?;
        }
        Ok(if op == RelOp::NotNi {
            // Flip over the full ID range; the wrapper masks off rows
            // that never carried a value.
            let padded = &result | &EwahBitmap::with_size(offset, false);
            padded.flip()
        } else {
            result
        })
    }

    pub(crate) fn encode(&self, buf: &mut Vec<u8>) {
        codec::encode_type(&self.element_type, buf);
        put_varint(buf, self.max_size as u64);
        self.size.encode(buf);
        put_varint(buf, self.elements.len() as u64);
        for element in &self.elements {
            element.encode(buf);
        }
    }

    pub(crate) fn decode(r: &mut ByteReader<'_>) -> CoreResult<Self> {
        let element_type = codec::decode_type(r)?;
        let max_size = r.varint()? as usize;
        let size = MultiLevelCoder::decode(r)?;
        let count = r.count(1 << 20, "element index")?;
        let mut elements = Vec::with_capacity(count);
        for _ in 0..count {
            elements.push(ValueIndex::decode(r)?);
        }
        Ok(Self {
            element_type,
            max_size,
            elements,
            size,
        })
    }
}
