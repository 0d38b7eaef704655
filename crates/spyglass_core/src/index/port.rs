//! The port index.
//!
//! A multi-level range coder over the 16-bit port number plus an
//! equality coder over the protocol. A lookup with a known protocol
//! intersects the number result with the protocol match; an unknown
//! protocol matches any.

use crate::bitmap::{Base, Coder, DigitCoder, EqualityCoder, EwahBitmap, MultiLevelCoder, RangeCoder};
use crate::codec::ByteReader;
use crate::error::{CoreError, CoreResult};
use spyglass_types::{Data, Protocol, RelOp};

/// An index for transport-layer ports.
#[derive(Debug, Clone)]
pub struct PortIndex {
    number: MultiLevelCoder<RangeCoder>,
    protocol: EqualityCoder,
}

impl PortIndex {
    /// Creates an empty port index.
    pub fn new() -> Self {
        Self {
            // Five decimal digits cover [0, 65536).
            number: MultiLevelCoder::new(Base::uniform(10, 5)),
            // unknown, tcp, udp, icmp
            protocol: EqualityCoder::with_cardinality(4),
        }
    }

    pub(crate) fn append(&mut self, x: &Data, pos: u64) -> CoreResult<()> {
        let Data::Port(port) = x else {
            return Err(CoreError::type_clash("port", x.to_string()));
        };
        self.number.skip(pos - self.number.rows());
        self.number.append(u64::from(port.number));
        self.protocol.skip(pos - self.protocol.rows());
        self.protocol.append(port.protocol as u64);
        Ok(())
    }

    pub(crate) fn lookup(&self, op: RelOp, x: &Data, offset: u64) -> CoreResult<EwahBitmap> {
        let Data::Port(port) = x else {
            return Err(CoreError::type_clash("port", x.to_string()));
        };
        if matches!(op, RelOp::In | RelOp::NotIn | RelOp::Ni | RelOp::NotNi) {
            return Err(CoreError::unsupported_operator(op));
        }
        if self.number.rows() == 0 {
            return Ok(EwahBitmap::with_size(offset, false));
        }
        let mut result = self.number.lookup(op, u64::from(port.number))?;
        if result.all_zeros() {
            return Ok(EwahBitmap::with_size(offset, false));
        }
        if port.protocol != Protocol::Unknown {
            result &= &self.protocol.lookup(RelOp::Equal, port.protocol as u64)?;
        }
        Ok(result)
    }

    pub(crate) fn encode(&self, buf: &mut Vec<u8>) {
        self.number.encode(buf);
        self.protocol.encode(buf);
    }

    pub(crate) fn decode(r: &mut ByteReader<'_>) -> CoreResult<Self> {
        let number = MultiLevelCoder::decode(r)?;
        let protocol = EqualityCoder::decode(r)?;
        Ok(Self { number, protocol })
    }
}

impl Default for PortIndex {
    fn default() -> Self {
        Self::new()
    }
}
