//! Coders translate values into positions across one or more bitmaps.

use crate::bitmap::EwahBitmap;
use crate::codec::{put_varint, ByteReader};
use crate::error::{CoreError, CoreResult};
use spyglass_types::RelOp;

/// A mapping from a value domain onto bitmaps.
///
/// All bitmaps of a coder have identical lengths; `skip` pads every
/// bitmap so that positions without a value match nothing.
pub trait Coder {
    /// The number of positions coded so far.
    fn rows(&self) -> u64;

    /// Codes a value at the next position.
    fn append(&mut self, x: u64);

    /// Pads `n` positions that match no value.
    fn skip(&mut self, n: u64);

    /// Looks up all positions whose value satisfies `pos_value op x`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnsupportedOperator`] for operators the coder
    /// cannot answer.
    fn lookup(&self, op: RelOp, x: u64) -> CoreResult<EwahBitmap>;

    /// Appends the serialized form to `buf`.
    fn encode(&self, buf: &mut Vec<u8>);

    /// Decodes a coder of this kind.
    fn decode(r: &mut ByteReader<'_>) -> CoreResult<Self>
    where
        Self: Sized;
}

/// Coders usable as the per-digit component of a multi-level coder.
pub trait DigitCoder: Coder {
    /// Creates a coder over the domain `[0, cardinality)`.
    fn with_cardinality(cardinality: u64) -> Self;
}

fn zeros(rows: u64) -> EwahBitmap {
    EwahBitmap::with_size(rows, false)
}

fn ones(rows: u64) -> EwahBitmap {
    EwahBitmap::with_size(rows, true)
}

// -- singleton ---------------------------------------------------------------

/// A coder for a single boolean condition: one bitmap, set where the
/// appended value was nonzero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SingletonCoder {
    bits: EwahBitmap,
}

impl SingletonCoder {
    /// Creates an empty singleton coder.
    pub fn new() -> Self {
        Self::default()
    }

    /// The underlying bitmap.
    pub fn bits(&self) -> &EwahBitmap {
        &self.bits
    }
}

impl Coder for SingletonCoder {
    fn rows(&self) -> u64 {
        self.bits.len()
    }

    fn append(&mut self, x: u64) {
        self.bits.append_bit(x != 0);
    }

    fn skip(&mut self, n: u64) {
        self.bits.append_bits(false, n);
    }

    fn lookup(&self, op: RelOp, x: u64) -> CoreResult<EwahBitmap> {
        match op {
            RelOp::Equal => Ok(if x != 0 {
                self.bits.clone()
            } else {
                self.bits.flip()
            }),
            RelOp::NotEqual => Ok(if x != 0 {
                self.bits.flip()
            } else {
                self.bits.clone()
            }),
            other => Err(CoreError::unsupported_operator(other)),
        }
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        self.bits.encode(buf);
    }

    fn decode(r: &mut ByteReader<'_>) -> CoreResult<Self> {
        Ok(Self {
            bits: EwahBitmap::decode(r)?,
        })
    }
}

// -- equality ----------------------------------------------------------------

/// One bitmap per distinct value of a small, finite domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EqualityCoder {
    rows: u64,
    storage: Vec<EwahBitmap>,
}

impl EqualityCoder {
    fn bitmap(&self, value: u64) -> Option<&EwahBitmap> {
        self.storage.get(value as usize)
    }
}

impl DigitCoder for EqualityCoder {
    fn with_cardinality(cardinality: u64) -> Self {
        Self {
            rows: 0,
            storage: vec![EwahBitmap::new(); cardinality as usize],
        }
    }
}

impl Coder for EqualityCoder {
    fn rows(&self) -> u64 {
        self.rows
    }

    fn append(&mut self, x: u64) {
        debug_assert!((x as usize) < self.storage.len());
        for (value, bits) in self.storage.iter_mut().enumerate() {
            bits.append_bit(value as u64 == x);
        }
        self.rows += 1;
    }

    fn skip(&mut self, n: u64) {
        for bits in &mut self.storage {
            bits.append_bits(false, n);
        }
        self.rows += n;
    }

    fn lookup(&self, op: RelOp, x: u64) -> CoreResult<EwahBitmap> {
        let eq = |value: u64| -> EwahBitmap {
            self.bitmap(value)
                .cloned()
                .unwrap_or_else(|| zeros(self.rows))
        };
        match op {
            RelOp::Equal => Ok(eq(x)),
            RelOp::NotEqual => Ok(eq(x).flip()),
            RelOp::Less | RelOp::LessEqual => {
                let upper = match op {
                    RelOp::Less if x == 0 => return Ok(zeros(self.rows)),
                    RelOp::Less => x - 1,
                    _ => x,
                };
                let mut result = zeros(self.rows);
                if self.storage.is_empty() {
                    return Ok(result);
                }
                for value in 0..=upper.min(self.storage.len() as u64 - 1) {
                    result |= &eq(value);
                }
                Ok(result)
            }
            RelOp::Greater => self.lookup(RelOp::LessEqual, x).map(|r| r.flip()),
            RelOp::GreaterEqual => self.lookup(RelOp::Less, x).map(|r| r.flip()),
            other => Err(CoreError::unsupported_operator(other)),
        }
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        put_varint(buf, self.rows);
        put_varint(buf, self.storage.len() as u64);
        for bits in &self.storage {
            bits.encode(buf);
        }
    }

    fn decode(r: &mut ByteReader<'_>) -> CoreResult<Self> {
        let rows = r.varint()?;
        let cardinality = r.count(1 << 20, "equality coder bitmap")?;
        let mut storage = Vec::with_capacity(cardinality);
        for _ in 0..cardinality {
            storage.push(EwahBitmap::decode(r)?);
        }
        Ok(Self { rows, storage })
    }
}

// -- range -------------------------------------------------------------------

/// A range-encoded coder: bitmap `v` holds positions whose value is
/// `<= v`. The bitmap for the largest value is implicit (all ones), so a
/// domain of `n` values stores `n - 1` bitmaps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeCoder {
    rows: u64,
    cardinality: u64,
    storage: Vec<EwahBitmap>,
}

impl RangeCoder {
    fn less_equal(&self, x: u64) -> EwahBitmap {
        if x >= self.cardinality - 1 {
            ones(self.rows)
        } else {
            self.storage[x as usize].clone()
        }
    }

    fn less(&self, x: u64) -> EwahBitmap {
        if x == 0 {
            zeros(self.rows)
        } else {
            self.less_equal(x - 1)
        }
    }
}

impl DigitCoder for RangeCoder {
    fn with_cardinality(cardinality: u64) -> Self {
        debug_assert!(cardinality > 0);
        Self {
            rows: 0,
            cardinality,
            storage: vec![EwahBitmap::new(); cardinality.saturating_sub(1) as usize],
        }
    }
}

impl Coder for RangeCoder {
    fn rows(&self) -> u64 {
        self.rows
    }

    fn append(&mut self, x: u64) {
        debug_assert!(x < self.cardinality);
        for (value, bits) in self.storage.iter_mut().enumerate() {
            bits.append_bit(x <= value as u64);
        }
        self.rows += 1;
    }

    fn skip(&mut self, n: u64) {
        for bits in &mut self.storage {
            bits.append_bits(false, n);
        }
        self.rows += n;
    }

    fn lookup(&self, op: RelOp, x: u64) -> CoreResult<EwahBitmap> {
        match op {
            RelOp::LessEqual => Ok(self.less_equal(x)),
            RelOp::Less => Ok(self.less(x)),
            RelOp::Equal => Ok(&self.less_equal(x) - &self.less(x)),
            RelOp::NotEqual => self.lookup(RelOp::Equal, x).map(|r| r.flip()),
            RelOp::Greater => Ok(self.less_equal(x).flip()),
            RelOp::GreaterEqual => Ok(self.less(x).flip()),
            other => Err(CoreError::unsupported_operator(other)),
        }
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        put_varint(buf, self.rows);
        put_varint(buf, self.cardinality);
        for bits in &self.storage {
            bits.encode(buf);
        }
    }

    fn decode(r: &mut ByteReader<'_>) -> CoreResult<Self> {
        let rows = r.varint()?;
        let cardinality = r.varint()?;
        if cardinality == 0 || cardinality > 1 << 20 {
            return Err(CoreError::format_error(format!(
                "implausible range coder cardinality: {cardinality}"
            )));
        }
        let mut storage = Vec::with_capacity((cardinality - 1) as usize);
        for _ in 0..cardinality - 1 {
            storage.push(EwahBitmap::decode(r)?);
        }
        Ok(Self {
            rows,
            cardinality,
            storage,
        })
    }
}

// -- bitslice ----------------------------------------------------------------

/// One bitmap per bit of the binary value representation; bitmap `j`
/// holds positions whose value has bit `j` set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitsliceCoder {
    rows: u64,
    storage: Vec<EwahBitmap>,
}

impl BitsliceCoder {
    /// The per-bit bitmaps; index 0 is the least significant bit.
    pub fn storage(&self) -> &[EwahBitmap] {
        &self.storage
    }

    /// The width in bits.
    pub fn width(&self) -> u32 {
        self.storage.len() as u32
    }
}

impl DigitCoder for BitsliceCoder {
    fn with_cardinality(cardinality: u64) -> Self {
        let width = 64 - cardinality.saturating_sub(1).leading_zeros();
        Self {
            rows: 0,
            storage: vec![EwahBitmap::new(); width.max(1) as usize],
        }
    }
}

impl Coder for BitsliceCoder {
    fn rows(&self) -> u64 {
        self.rows
    }

    fn append(&mut self, x: u64) {
        for (bit, bits) in self.storage.iter_mut().enumerate() {
            bits.append_bit(x >> bit & 1 == 1);
        }
        self.rows += 1;
    }

    fn skip(&mut self, n: u64) {
        for bits in &mut self.storage {
            bits.append_bits(false, n);
        }
        self.rows += n;
    }

    fn lookup(&self, op: RelOp, x: u64) -> CoreResult<EwahBitmap> {
        match op {
            RelOp::Equal | RelOp::NotEqual => {
                let mut result = ones(self.rows);
                for (bit, bits) in self.storage.iter().enumerate() {
                    if x >> bit & 1 == 1 {
                        result &= bits;
                    } else {
                        result &= &bits.flip();
                    }
                    if result.all_zeros() {
                        break;
                    }
                }
                Ok(if op == RelOp::NotEqual {
                    result.flip()
                } else {
                    result
                })
            }
            other => Err(CoreError::unsupported_operator(other)),
        }
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        put_varint(buf, self.rows);
        put_varint(buf, self.storage.len() as u64);
        for bits in &self.storage {
            bits.encode(buf);
        }
    }

    fn decode(r: &mut ByteReader<'_>) -> CoreResult<Self> {
        let rows = r.varint()?;
        let width = r.count(64, "bitslice coder bitmap")?;
        let mut storage = Vec::with_capacity(width);
        for _ in 0..width {
            storage.push(EwahBitmap::decode(r)?);
        }
        Ok(Self { rows, storage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positions(bm: &EwahBitmap) -> Vec<u64> {
        bm.ones().collect()
    }

    #[test]
    fn singleton_equality() {
        let mut c = SingletonCoder::new();
        for x in [1, 0, 1, 0] {
            c.append(x);
        }
        assert_eq!(positions(&c.lookup(RelOp::Equal, 1).unwrap()), vec![0, 2]);
        assert_eq!(positions(&c.lookup(RelOp::Equal, 0).unwrap()), vec![1, 3]);
        assert!(c.lookup(RelOp::Less, 1).is_err());
    }

    #[test]
    fn equality_coder_ops() {
        let mut c = EqualityCoder::with_cardinality(4);
        for x in [0, 1, 2, 3, 1] {
            c.append(x);
        }
        assert_eq!(positions(&c.lookup(RelOp::Equal, 1).unwrap()), vec![1, 4]);
        assert_eq!(
            positions(&c.lookup(RelOp::LessEqual, 1).unwrap()),
            vec![0, 1, 4]
        );
        assert_eq!(
            positions(&c.lookup(RelOp::GreaterEqual, 2).unwrap()),
            vec![2, 3]
        );
    }

    #[test]
    fn range_coder_ops() {
        let mut c = RangeCoder::with_cardinality(10);
        for x in [2, 9, 0, 5, 5] {
            c.append(x);
        }
        assert_eq!(positions(&c.lookup(RelOp::Equal, 5).unwrap()), vec![3, 4]);
        assert_eq!(
            positions(&c.lookup(RelOp::Less, 5).unwrap()),
            vec![0, 2]
        );
        assert_eq!(
            positions(&c.lookup(RelOp::LessEqual, 9).unwrap()),
            vec![0, 1, 2, 3, 4]
        );
        assert_eq!(positions(&c.lookup(RelOp::Greater, 5).unwrap()), vec![1]);
        assert_eq!(
            positions(&c.lookup(RelOp::NotEqual, 5).unwrap()),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn range_coder_skip_matches_nothing() {
        let mut c = RangeCoder::with_cardinality(10);
        c.append(3);
        c.skip(2);
        c.append(3);
        assert_eq!(positions(&c.lookup(RelOp::Equal, 3).unwrap()), vec![0, 3]);
        assert_eq!(
            positions(&c.lookup(RelOp::LessEqual, 9).unwrap()),
            vec![0, 3]
        );
    }

    #[test]
    fn bitslice_equality() {
        let mut c = BitsliceCoder::with_cardinality(256);
        assert_eq!(c.width(), 8);
        for x in [7, 255, 0, 7] {
            c.append(x);
        }
        assert_eq!(positions(&c.lookup(RelOp::Equal, 7).unwrap()), vec![0, 3]);
        assert_eq!(positions(&c.lookup(RelOp::Equal, 0).unwrap()), vec![2]);
        assert_eq!(
            positions(&c.lookup(RelOp::NotEqual, 7).unwrap()),
            vec![1, 2]
        );
    }

    #[test]
    fn coder_serialization_round_trips() {
        let mut c = RangeCoder::with_cardinality(10);
        for x in [1, 2, 3] {
            c.append(x);
        }
        let mut buf = Vec::new();
        c.encode(&mut buf);
        let decoded = RangeCoder::decode(&mut ByteReader::new(&buf)).unwrap();
        assert_eq!(c, decoded);
    }
}
