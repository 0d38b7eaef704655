//! Per-type value indexes built on bitmaps.
//!
//! A [`ValueIndex`] wraps one concrete index variant together with the
//! shared bookkeeping every index needs: a `mask` bitmap set at every
//! appended position and a `none` bitmap set at every appended nil.
//! Every lookup returns `(inner − none) & mask`, so nil participates in
//! no operator except `== nil` / `!= nil`, which are answered from the
//! `none` bitmap directly.

mod address;
mod arithmetic;
mod port;
mod sequence;
mod string;
mod subnet;

pub use address::AddressIndex;
pub use arithmetic::{ArithmeticIndex, NumericKind};
pub use port::PortIndex;
pub use sequence::SequenceIndex;
pub use string::StringIndex;
pub use subnet::SubnetIndex;

use crate::bitmap::{Base, EwahBitmap};
use crate::codec::ByteReader;
use crate::error::{CoreError, CoreResult};
use spyglass_types::{Data, RelOp, Type, TypeKind};

/// Default maximum string length; longer strings are truncated.
pub const DEFAULT_MAX_LENGTH: usize = 1024;

/// Default maximum sequence size; longer sequences are trimmed.
pub const DEFAULT_MAX_SIZE: usize = 128;

/// The concrete index variants.
///
/// Dispatch is a plain `match`: the leaf set is small and stable.
#[derive(Debug, Clone)]
pub enum IndexVariant {
    /// Numbers, booleans, and time values.
    Arithmetic(ArithmeticIndex),
    /// Strings with substring support.
    String(StringIndex),
    /// IP addresses.
    Address(AddressIndex),
    /// IP subnets.
    Subnet(SubnetIndex),
    /// Ports.
    Port(PortIndex),
    /// Vectors and sets.
    Sequence(SequenceIndex),
}

/// An index for one column of data values.
#[derive(Debug, Clone)]
pub struct ValueIndex {
    mask: EwahBitmap,
    none: EwahBitmap,
    inner: IndexVariant,
}

impl ValueIndex {
    fn with_variant(inner: IndexVariant) -> Self {
        Self {
            mask: EwahBitmap::new(),
            none: EwahBitmap::new(),
            inner,
        }
    }

    pub(crate) fn new_address() -> Self {
        Self::with_variant(IndexVariant::Address(AddressIndex::new()))
    }

    /// Constructs a value index for a type, honoring the `base`,
    /// `max_length`, and `max_size` attributes.
    ///
    /// Returns `None` for types that cannot be indexed (`none`,
    /// `pattern`, `enumeration`, `map`, `record`) and for attribute
    /// values that fail to parse; such columns are skipped at ingest.
    pub fn make(t: &Type) -> Option<Self> {
        let attribute = |key: &str| -> Option<&str> {
            t.attribute(key)
                .or_else(|| t.resolve().attribute(key))
                .flatten()
        };
        let base = || -> Option<Option<Base>> {
            match attribute("base") {
                Some(s) => Base::parse(s).map(Some),
                None => Some(None),
            }
        };
        let variant = match t.resolve().kind() {
            TypeKind::None
            | TypeKind::Pattern
            | TypeKind::Enumeration(_)
            | TypeKind::Map(_, _)
            | TypeKind::Record(_) => return None,
            TypeKind::Bool => IndexVariant::Arithmetic(ArithmeticIndex::new(
                NumericKind::Bool,
                None,
            )),
            TypeKind::Int => {
                IndexVariant::Arithmetic(ArithmeticIndex::new(NumericKind::Int, base()?))
            }
            TypeKind::Count => {
                IndexVariant::Arithmetic(ArithmeticIndex::new(NumericKind::Count, base()?))
            }
            TypeKind::Real => {
                IndexVariant::Arithmetic(ArithmeticIndex::new(NumericKind::Real, base()?))
            }
            TypeKind::Timespan => {
                IndexVariant::Arithmetic(ArithmeticIndex::new(NumericKind::Timespan, base()?))
            }
            TypeKind::Timestamp => {
                IndexVariant::Arithmetic(ArithmeticIndex::new(NumericKind::Timestamp, base()?))
            }
            TypeKind::String => {
                let max_length = match attribute("max_length") {
                    Some(s) => s.parse().ok()?,
                    None => DEFAULT_MAX_LENGTH,
                };
                IndexVariant::String(StringIndex::new(max_length))
            }
            TypeKind::Address => IndexVariant::Address(AddressIndex::new()),
            TypeKind::Subnet => IndexVariant::Subnet(SubnetIndex::new()),
            TypeKind::Port => IndexVariant::Port(PortIndex::new()),
            TypeKind::Vector(elem) | TypeKind::Set(elem) => {
                let max_size = match attribute("max_size") {
                    Some(s) => s.parse().ok()?,
                    None => DEFAULT_MAX_SIZE,
                };
                // The element type must itself be indexable.
                ValueIndex::make(elem)?;
                IndexVariant::Sequence(SequenceIndex::new(elem.clone(), max_size))
            }
            TypeKind::Alias(_) => unreachable!("resolve() strips aliases"),
        };
        Some(Self::with_variant(variant))
    }

    /// The smallest ID not yet written.
    pub fn offset(&self) -> u64 {
        self.mask.len()
    }

    /// Appends a value at the current offset.
    pub fn append(&mut self, x: &Data) -> CoreResult<()> {
        self.append_at(x, self.offset())
    }

    /// Appends a value at position `pos >= offset()`.
    ///
    /// Skipped intermediate positions match nothing, under any operator.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::InvalidArgument`] when `pos` regresses and
    /// with [`CoreError::TypeClash`] when the value does not fit the
    /// index; a failed append leaves the index unchanged.
    pub fn append_at(&mut self, x: &Data, pos: u64) -> CoreResult<()> {
        let offset = self.offset();
        if pos < offset {
            return Err(CoreError::invalid_argument(format!(
                "append position {pos} regresses below offset {offset}"
            )));
        }
        if x.is_nil() {
            self.none.append_bits(false, pos - self.none.len());
            self.none.append_bit(true);
        } else {
            self.inner.append(x, pos)?;
        }
        self.mask.append_bits(false, pos - offset);
        self.mask.append_bit(true);
        Ok(())
    }

    /// Looks up all IDs whose value satisfies `value op x`.
    ///
    /// A nil operand supports only `==` and `!=`.
    pub fn lookup(&self, op: RelOp, x: &Data) -> CoreResult<EwahBitmap> {
        if x.is_nil() {
            // The none bitmap only reaches the last appended nil, so the
            // complement is carved out of the mask rather than flipped.
            return match op {
                RelOp::Equal => Ok(&self.none & &self.mask),
                RelOp::NotEqual => Ok(&self.mask - &self.none),
                other => Err(CoreError::unsupported_operator(other)),
            };
        }
        let raw = match (op, x) {
            (RelOp::In | RelOp::NotIn, Data::Vector(xs) | Data::Set(xs))
                if !matches!(self.inner, IndexVariant::Sequence(_)) =>
            {
                self.container_lookup(op, xs)?
            }
            _ => self.inner.lookup(op, x, self.offset())?,
        };
        Ok(&(&raw - &self.none) & &self.mask)
    }

    /// Decomposes `in`/`!in` with a container operand into a union or
    /// difference of per-element equality lookups, short-circuiting on
    /// saturation.
    fn container_lookup(&self, op: RelOp, xs: &[Data]) -> CoreResult<EwahBitmap> {
        match op {
            RelOp::In => {
                let mut result = EwahBitmap::with_size(self.offset(), false);
                for x in xs {
                    result |= &self.lookup(RelOp::Equal, x)?;
                    if result.all_ones() {
                        break;
                    }
                }
                Ok(result)
            }
            RelOp::NotIn => {
                let mut result = EwahBitmap::with_size(self.offset(), true);
                for x in xs {
                    result -= &self.lookup(RelOp::Equal, x)?;
                    if result.all_zeros() {
                        break;
                    }
                }
                Ok(result)
            }
            other => Err(CoreError::unsupported_operator(other)),
        }
    }

    // -- serialization -------------------------------------------------------

    /// Appends the serialized index to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        self.mask.encode(buf);
        self.none.encode(buf);
        match &self.inner {
            IndexVariant::Arithmetic(idx) => {
                buf.push(0);
                idx.encode(buf);
            }
            IndexVariant::String(idx) => {
                buf.push(1);
                idx.encode(buf);
            }
            IndexVariant::Address(idx) => {
                buf.push(2);
                idx.encode(buf);
            }
            IndexVariant::Subnet(idx) => {
                buf.push(3);
                idx.encode(buf);
            }
            IndexVariant::Port(idx) => {
                buf.push(4);
                idx.encode(buf);
            }
            IndexVariant::Sequence(idx) => {
                buf.push(5);
                idx.encode(buf);
            }
        }
    }

    /// Decodes a value index.
    pub fn decode(r: &mut ByteReader<'_>) -> CoreResult<Self> {
        let mask = EwahBitmap::decode(r)?;
        let none = EwahBitmap::decode(r)?;
        let tag = r.u8()?;
        let inner = match tag {
            0 => IndexVariant::Arithmetic(ArithmeticIndex::decode(r)?),
            1 => IndexVariant::String(StringIndex::decode(r)?),
            2 => IndexVariant::Address(AddressIndex::decode(r)?),
            3 => IndexVariant::Subnet(SubnetIndex::decode(r)?),
            4 => IndexVariant::Port(PortIndex::decode(r)?),
            5 => IndexVariant::Sequence(SequenceIndex::decode(r)?),
            _ => {
                return Err(CoreError::format_error(format!(
                    "unknown index variant tag: {tag}"
                )));
            }
        };
        Ok(Self { mask, none, inner })
    }
}

impl IndexVariant {
    fn append(&mut self, x: &Data, pos: u64) -> CoreResult<()> {
        match self {
            IndexVariant::Arithmetic(idx) => idx.append(x, pos),
            IndexVariant::String(idx) => idx.append(x, pos),
            IndexVariant::Address(idx) => idx.append(x, pos),
            IndexVariant::Subnet(idx) => idx.append(x, pos),
            IndexVariant::Port(idx) => idx.append(x, pos),
            IndexVariant::Sequence(idx) => idx.append(x, pos),
        }
    }

    fn lookup(&self, op: RelOp, x: &Data, offset: u64) -> CoreResult<EwahBitmap> {
        match self {
            IndexVariant::Arithmetic(idx) => idx.lookup(op, x),
            IndexVariant::String(idx) => idx.lookup(op, x, offset),
            IndexVariant::Address(idx) => idx.lookup(op, x, offset),
            IndexVariant::Subnet(idx) => idx.lookup(op, x, offset),
            IndexVariant::Port(idx) => idx.lookup(op, x, offset),
            IndexVariant::Sequence(idx) => idx.lookup(op, x, offset),
        }
    }
}
