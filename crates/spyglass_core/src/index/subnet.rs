//! The subnet index.
//!
//! A full address index over the network address plus an equality coder
//! over the prefix length. For a subnet index `U` and argument `x`,
//! `U in x` means U ⊆ x and `U ni x` means U ⊇ x.

use crate::bitmap::{Coder, DigitCoder, EqualityCoder, EwahBitmap};
use crate::codec::ByteReader;
use crate::error::{CoreError, CoreResult};
use crate::index::ValueIndex;
use spyglass_types::{Data, RelOp, Subnet};

/// An index for IP subnets.
#[derive(Debug, Clone)]
pub struct SubnetIndex {
    network: Box<ValueIndex>,
    // Valid prefix lengths range from /0 to /128.
    length: EqualityCoder,
}

impl SubnetIndex {
    /// Creates an empty subnet index.
    pub fn new() -> Self {
        Self {
            network: Box::new(ValueIndex::new_address()),
            length: EqualityCoder::with_cardinality(129),
        }
    }

    pub(crate) fn append(&mut self, x: &Data, pos: u64) -> CoreResult<()> {
        let Data::Subnet(subnet) = x else {
            return Err(CoreError::type_clash("subnet", x.to_string()));
        };
        self.length.skip(pos - self.length.rows());
        self.length.append(u64::from(subnet.length()));
        self.network
            .append_at(&Data::Address(*subnet.network()), pos)
    }

    pub(crate) fn lookup(&self, op: RelOp, x: &Data, offset: u64) -> CoreResult<EwahBitmap> {
        let Data::Subnet(subnet) = x else {
            return Err(CoreError::type_clash("subnet", x.to_string()));
        };
        match op {
            RelOp::Equal | RelOp::NotEqual => {
                let mut result = self
                    .network
                    .lookup(RelOp::Equal, &Data::Address(*subnet.network()))?;
                result &= &self
                    .length
                    .lookup(RelOp::Equal, u64::from(subnet.length()))?;
                Ok(if op == RelOp::NotEqual {
                    result.flip()
                } else {
                    result
                })
            }
            RelOp::In | RelOp::NotIn => {
                // Subnets inside x: network contained in x and at least
                // as long a prefix.
                let mut result = self.network.lookup(RelOp::In, x)?;
                result &= &self
                    .length
                    .lookup(RelOp::GreaterEqual, u64::from(subnet.length()))?;
                Ok(if op == RelOp::NotIn {
                    result.flip()
                } else {
                    result
                })
            }
            RelOp::Ni | RelOp::NotNi => {
                // Subnets covering x: for every k up to x's length, the
                // networks equal to x/k with prefix length exactly k.
                let mut result = EwahBitmap::with_size(offset, false);
                for k in 1..=subnet.length() {
                    let covering = Subnet::new(*subnet.network(), k);
                    let mut xs = self.network.lookup(RelOp::In, &Data::Subnet(covering))?;
                    xs &= &self.length.lookup(RelOp::Equal, u64::from(k))?;
                    result |= &xs;
                }
                Ok(if op == RelOp::NotNi {
                    result.flip()
                } else {
                    result
                })
            }
            other => Err(CoreError::unsupported_operator(other)),
        }
    }

    pub(crate) fn encode(&self, buf: &mut Vec<u8>) {
        self.network.encode(buf);
        self.length.encode(buf);
    }

    pub(crate) fn decode(r: &mut ByteReader<'_>) -> CoreResult<Self> {
        let network = Box::new(ValueIndex::decode(r)?);
        let length = EqualityCoder::decode(r)?;
        Ok(Self { network, length })
    }
}

impl Default for SubnetIndex {
    fn default() -> Self {
        Self::new()
    }
}
