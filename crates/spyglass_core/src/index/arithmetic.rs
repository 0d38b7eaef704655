//! The index for booleans, integers, counts, reals, and time values.

use crate::bitmap::{Base, Binner, Coder, EwahBitmap, MultiLevelCoder, RangeCoder, SingletonCoder};
use crate::codec::ByteReader;
use crate::error::{CoreError, CoreResult};
use spyglass_types::{Data, RelOp};

/// The numeric value kind an arithmetic index is declared over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NumericKind {
    /// Boolean.
    Bool = 0,
    /// Signed integer.
    Int = 1,
    /// Unsigned counter.
    Count = 2,
    /// IEEE 754 double.
    Real = 3,
    /// Duration in nanoseconds.
    Timespan = 4,
    /// Nanoseconds since the epoch.
    Timestamp = 5,
}

impl NumericKind {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Bool),
            1 => Some(Self::Int),
            2 => Some(Self::Count),
            3 => Some(Self::Real),
            4 => Some(Self::Timespan),
            5 => Some(Self::Timestamp),
            _ => None,
        }
    }

    /// The space-efficient default binner for this kind: time values
    /// fold nanoseconds to seconds, reals drop their fractional part.
    fn default_binner(self) -> Binner {
        match self {
            Self::Timespan | Self::Timestamp => Binner::Decimal(9),
            Self::Real => Binner::Precision,
            _ => Binner::Identity,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Count => "count",
            Self::Real => "real",
            Self::Timespan => "duration",
            Self::Timestamp => "time",
        }
    }
}

#[derive(Debug, Clone)]
enum NumericCoder {
    /// Booleans need a single bitmap.
    Bit(SingletonCoder),
    /// Everything else range-codes binned ordinals over a base.
    Ranged(MultiLevelCoder<RangeCoder>),
}

/// An index over numeric ordinals.
///
/// Values are binned, then mapped through an order-preserving bijection
/// onto `u64`, then handed to a multi-level range coder.
#[derive(Debug, Clone)]
pub struct ArithmeticIndex {
    kind: NumericKind,
    binner: Binner,
    coder: NumericCoder,
}

/// Order-preserving mapping of `i64` onto `u64`.
fn ordinal_i64(x: i64) -> u64 {
    (x as u64) ^ (1 << 63)
}

/// Order-preserving mapping of `f64` onto `u64` (total order; negative
/// values map below positives).
fn ordinal_f64(x: f64) -> u64 {
    let bits = x.to_bits();
    if bits >> 63 == 1 {
        !bits
    } else {
        bits | (1 << 63)
    }
}

impl ArithmeticIndex {
    /// Creates an index for the given kind, with an optional custom base.
    pub fn new(kind: NumericKind, base: Option<Base>) -> Self {
        let coder = match kind {
            NumericKind::Bool => NumericCoder::Bit(SingletonCoder::new()),
            _ => NumericCoder::Ranged(MultiLevelCoder::new(
                base.unwrap_or_else(Base::decimal64),
            )),
        };
        Self {
            kind,
            binner: kind.default_binner(),
            coder,
        }
    }

    fn ordinal(&self, x: &Data) -> CoreResult<u64> {
        match (self.kind, x) {
            (NumericKind::Bool, Data::Bool(b)) => Ok(u64::from(*b)),
            (NumericKind::Int, Data::Int(v)) => Ok(ordinal_i64(self.binner.bin_i64(*v))),
            (NumericKind::Count, Data::Count(v)) => Ok(self.binner.bin_u64(*v)),
            (NumericKind::Real, Data::Real(v)) => Ok(ordinal_f64(self.binner.bin_f64(*v))),
            (NumericKind::Timespan, Data::Timespan(v))
            | (NumericKind::Timestamp, Data::Timestamp(v)) => {
                Ok(ordinal_i64(self.binner.bin_i64(*v)))
            }
            _ => Err(CoreError::type_clash(self.kind.name(), x.to_string())),
        }
    }

    pub(crate) fn append(&mut self, x: &Data, pos: u64) -> CoreResult<()> {
        let ordinal = self.ordinal(x)?;
        match &mut self.coder {
            NumericCoder::Bit(coder) => {
                coder.skip(pos - coder.rows());
                coder.append(ordinal);
            }
            NumericCoder::Ranged(coder) => {
                coder.skip(pos - coder.rows());
                coder.append(ordinal);
            }
        }
        Ok(())
    }

    pub(crate) fn lookup(&self, op: RelOp, x: &Data) -> CoreResult<EwahBitmap> {
        let ordinal = self.ordinal(x)?;
        match &self.coder {
            NumericCoder::Bit(coder) => coder.lookup(op, ordinal),
            NumericCoder::Ranged(coder) => coder.lookup(op, ordinal),
        }
    }

    pub(crate) fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(self.kind as u8);
        match &self.coder {
            NumericCoder::Bit(coder) => coder.encode(buf),
            NumericCoder::Ranged(coder) => coder.encode(buf),
        }
    }

    pub(crate) fn decode(r: &mut ByteReader<'_>) -> CoreResult<Self> {
        let kind = NumericKind::from_byte(r.u8()?)
            .ok_or_else(|| CoreError::format_error("invalid numeric kind"))?;
        let coder = match kind {
            NumericKind::Bool => NumericCoder::Bit(SingletonCoder::decode(r)?),
            _ => NumericCoder::Ranged(MultiLevelCoder::decode(r)?),
        };
        Ok(Self {
            kind,
            binner: kind.default_binner(),
            coder,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_of(kind: NumericKind, xs: &[Data]) -> ArithmeticIndex {
        let mut idx = ArithmeticIndex::new(kind, None);
        for (i, x) in xs.iter().enumerate() {
            idx.append(x, i as u64).unwrap();
        }
        idx
    }

    fn hits(idx: &ArithmeticIndex, op: RelOp, x: Data) -> Vec<u64> {
        idx.lookup(op, &x).unwrap().ones().collect()
    }

    #[test]
    fn signed_ordering_spans_zero() {
        let xs: Vec<_> = [-5i64, -1, 0, 1, 5].iter().map(|&x| Data::Int(x)).collect();
        let idx = index_of(NumericKind::Int, &xs);
        assert_eq!(hits(&idx, RelOp::Less, Data::Int(0)), vec![0, 1]);
        assert_eq!(hits(&idx, RelOp::GreaterEqual, Data::Int(0)), vec![2, 3, 4]);
        assert_eq!(hits(&idx, RelOp::Equal, Data::Int(-1)), vec![1]);
    }

    #[test]
    fn count_extremes() {
        let xs = [Data::Count(0), Data::Count(u64::MAX), Data::Count(17)];
        let idx = index_of(NumericKind::Count, &xs);
        assert_eq!(hits(&idx, RelOp::Greater, Data::Count(17)), vec![1]);
        assert_eq!(hits(&idx, RelOp::LessEqual, Data::Count(u64::MAX)), vec![0, 1, 2]);
    }

    #[test]
    fn reals_bin_to_integral_part() {
        let xs = [Data::Real(1.2), Data::Real(1.9), Data::Real(-0.5), Data::Real(3.0)];
        let idx = index_of(NumericKind::Real, &xs);
        // 1.2 and 1.9 fall into the same bin.
        assert_eq!(hits(&idx, RelOp::Equal, Data::Real(1.5)), vec![0, 1]);
        assert_eq!(hits(&idx, RelOp::Greater, Data::Real(1.0)), vec![3]);
    }

    #[test]
    fn timestamps_bin_to_seconds() {
        let base = 1_600_000_000_000_000_000i64;
        let xs = [
            Data::Timestamp(base),
            Data::Timestamp(base + 500_000_000),
            Data::Timestamp(base + 2_000_000_000),
        ];
        let idx = index_of(NumericKind::Timestamp, &xs);
        assert_eq!(hits(&idx, RelOp::Equal, Data::Timestamp(base)), vec![0, 1]);
        assert_eq!(hits(&idx, RelOp::Greater, Data::Timestamp(base)), vec![2]);
    }

    #[test]
    fn booleans_support_equality_only() {
        let xs = [Data::Bool(true), Data::Bool(false), Data::Bool(true)];
        let idx = index_of(NumericKind::Bool, &xs);
        assert_eq!(hits(&idx, RelOp::Equal, Data::Bool(true)), vec![0, 2]);
        assert_eq!(hits(&idx, RelOp::NotEqual, Data::Bool(true)), vec![1]);
        assert!(idx.lookup(RelOp::Less, &Data::Bool(true)).is_err());
    }

    #[test]
    fn type_clash_is_an_error() {
        let idx = index_of(NumericKind::Count, &[Data::Count(1)]);
        assert!(matches!(
            idx.lookup(RelOp::Equal, &Data::Int(1)),
            Err(CoreError::TypeClash { .. })
        ));
    }
}
