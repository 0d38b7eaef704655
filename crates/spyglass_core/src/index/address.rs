//! The IP address index.
//!
//! Sixteen 8-bit bitslice coders, one per byte of the 128-bit address,
//! plus a singleton bitmap marking embedded-v4 rows. Equality matches
//! byte by byte; subnet membership masks whole bytes through byte
//! equality and combines the remaining bits straight from the bitslice
//! storage.

use crate::bitmap::{BitsliceCoder, Coder, DigitCoder, EwahBitmap, SingletonCoder};
use crate::codec::ByteReader;
use crate::error::{CoreError, CoreResult};
use spyglass_types::{Address, Data, RelOp, Subnet};

/// An index for IP addresses.
#[derive(Debug, Clone)]
pub struct AddressIndex {
    bytes: Vec<BitsliceCoder>,
    v4: SingletonCoder,
}

impl AddressIndex {
    /// Creates an empty address index.
    pub fn new() -> Self {
        Self {
            bytes: (0..16)
                .map(|_| BitsliceCoder::with_cardinality(256))
                .collect(),
            v4: SingletonCoder::new(),
        }
    }

    pub(crate) fn append(&mut self, x: &Data, pos: u64) -> CoreResult<()> {
        let Data::Address(addr) = x else {
            return Err(CoreError::type_clash("addr", x.to_string()));
        };
        for (coder, &byte) in self.bytes.iter_mut().zip(addr.bytes()) {
            coder.skip(pos - coder.rows());
            coder.append(u64::from(byte));
        }
        self.v4.skip(pos - self.v4.rows());
        self.v4.append(u64::from(addr.is_v4()));
        Ok(())
    }

    pub(crate) fn lookup(&self, op: RelOp, x: &Data, offset: u64) -> CoreResult<EwahBitmap> {
        match x {
            Data::Address(addr) => self.lookup_address(op, addr, offset),
            Data::Subnet(subnet) => self.lookup_subnet(op, subnet, offset),
            other => Err(CoreError::type_clash("addr", other.to_string())),
        }
    }

    fn lookup_address(&self, op: RelOp, x: &Address, offset: u64) -> CoreResult<EwahBitmap> {
        if !matches!(op, RelOp::Equal | RelOp::NotEqual) {
            return Err(CoreError::unsupported_operator(op));
        }
        let negated = op == RelOp::NotEqual;
        // A v4 operand can only match embedded-v4 rows, so the v4 bitmap
        // is the starting mask and the leading 12 bytes need no test.
        let mut result = if x.is_v4() {
            self.v4.bits().clone()
        } else {
            EwahBitmap::with_size(offset, true)
        };
        let start = if x.is_v4() { 12 } else { 0 };
        for i in start..16 {
            result &= &self.bytes[i].lookup(RelOp::Equal, u64::from(x.bytes()[i]))?;
            if result.all_zeros() {
                return Ok(EwahBitmap::with_size(offset, negated));
            }
        }
        Ok(if negated { result.flip() } else { result })
    }

    fn lookup_subnet(&self, op: RelOp, x: &Subnet, offset: u64) -> CoreResult<EwahBitmap> {
        if !matches!(op, RelOp::In | RelOp::NotIn) {
            return Err(CoreError::unsupported_operator(op));
        }
        let mut top = x.length();
        if top == 0 {
            return Err(CoreError::invalid_argument(
                "membership in a zero-length prefix",
            ));
        }
        if x.top_bits() == 128 {
            // A /32 or /128 membership test is an equality lookup.
            let eq_op = if op == RelOp::In {
                RelOp::Equal
            } else {
                RelOp::NotEqual
            };
            return self.lookup_address(eq_op, x.network(), offset);
        }
        let negated = op == RelOp::NotIn;
        let network = x.network();
        let mut result = if network.is_v4() {
            self.v4.bits().clone()
        } else {
            EwahBitmap::with_size(offset, true)
        };
        let mut i = if network.is_v4() { 12 } else { 0 };
        while i < 16 && top >= 8 {
            result &= &self.bytes[i].lookup(RelOp::Equal, u64::from(network.bytes()[i]))?;
            i += 1;
            top -= 8;
        }
        for j in 0..top {
            let bit = 7 - j;
            let slice = &self.bytes[i].storage()[bit as usize];
            if network.bytes()[i] >> bit & 1 == 1 {
                result &= slice;
            } else {
                result &= &slice.flip();
            }
        }
        Ok(if negated { result.flip() } else { result })
    }

    pub(crate) fn encode(&self, buf: &mut Vec<u8>) {
        for coder in &self.bytes {
            coder.encode(buf);
        }
        self.v4.encode(buf);
    }

    pub(crate) fn decode(r: &mut ByteReader<'_>) -> CoreResult<Self> {
        let mut bytes = Vec::with_capacity(16);
        for _ in 0..16 {
            bytes.push(BitsliceCoder::decode(r)?);
        }
        let v4 = SingletonCoder::decode(r)?;
        Ok(Self { bytes, v4 })
    }
}

impl Default for AddressIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_of(addrs: &[&str]) -> AddressIndex {
        let mut idx = AddressIndex::new();
        for (i, a) in addrs.iter().enumerate() {
            idx.append(&Data::Address(a.parse().unwrap()), i as u64)
                .unwrap();
        }
        idx
    }

    fn hits(idx: &AddressIndex, op: RelOp, x: Data, offset: u64) -> Vec<u64> {
        idx.lookup(op, &x, offset).unwrap().ones().collect()
    }

    fn addr(s: &str) -> Data {
        Data::Address(s.parse().unwrap())
    }

    fn subnet(s: &str) -> Data {
        Data::Subnet(s.parse().unwrap())
    }

    #[test]
    fn equality_across_families() {
        let idx = index_of(&["10.0.0.1", "10.0.0.2", "192.168.0.1", "::1"]);
        assert_eq!(hits(&idx, RelOp::Equal, addr("10.0.0.1"), 4), vec![0]);
        assert_eq!(hits(&idx, RelOp::NotEqual, addr("::1"), 4), vec![0, 1, 2]);
        assert_eq!(hits(&idx, RelOp::Equal, addr("::1"), 4), vec![3]);
        assert_eq!(hits(&idx, RelOp::Equal, addr("10.9.9.9"), 4), Vec::<u64>::new());
    }

    #[test]
    fn subnet_membership() {
        let idx = index_of(&["10.0.0.1", "10.0.0.2", "192.168.0.1", "::1"]);
        assert_eq!(hits(&idx, RelOp::In, subnet("10.0.0.0/24"), 4), vec![0, 1]);
        assert_eq!(
            hits(&idx, RelOp::NotIn, subnet("10.0.0.0/24"), 4),
            vec![2, 3]
        );
        assert_eq!(hits(&idx, RelOp::In, subnet("10.0.0.0/8"), 4), vec![0, 1]);
        // Embedded v4 rows live inside the v6 space too.
        assert_eq!(hits(&idx, RelOp::In, subnet("::/1"), 4), vec![0, 1, 2, 3]);
        assert_eq!(hits(&idx, RelOp::In, subnet("::/96"), 4), vec![3]);
    }

    #[test]
    fn subnet_with_non_byte_aligned_prefix() {
        // 10.0.0.0/22 spans 10.0.0.0 - 10.0.3.255.
        let idx = index_of(&["10.0.1.7", "10.0.4.7", "10.0.3.255"]);
        assert_eq!(hits(&idx, RelOp::In, subnet("10.0.0.0/22"), 3), vec![0, 2]);
    }

    #[test]
    fn host_prefix_degenerates_to_equality() {
        let idx = index_of(&["10.0.0.1", "10.0.0.2"]);
        assert_eq!(hits(&idx, RelOp::In, subnet("10.0.0.1/32"), 2), vec![0]);
        let v6 = index_of(&["::1", "::2"]);
        assert_eq!(hits(&v6, RelOp::In, subnet("::1/128"), 2), vec![0]);
    }

    #[test]
    fn zero_length_prefix_is_invalid() {
        let idx = index_of(&["10.0.0.1"]);
        assert!(matches!(
            idx.lookup(RelOp::In, &subnet("0.0.0.0/0"), 1),
            Err(CoreError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn v4_operand_against_v6_only_index_is_empty() {
        let idx = index_of(&["::1", "fe80::1"]);
        assert_eq!(hits(&idx, RelOp::Equal, addr("10.0.0.1"), 2), Vec::<u64>::new());
        assert_eq!(hits(&idx, RelOp::In, subnet("10.0.0.0/8"), 2), Vec::<u64>::new());
    }

    #[test]
    fn v4_in_v6_notation_matches_dotted_quad() {
        let idx = index_of(&["10.0.0.1"]);
        assert_eq!(hits(&idx, RelOp::Equal, addr("::ffff:10.0.0.1"), 1), vec![0]);
    }

    #[test]
    fn round_trip() {
        let idx = index_of(&["10.0.0.1", "::1"]);
        let mut buf = Vec::new();
        idx.encode(&mut buf);
        let decoded = AddressIndex::decode(&mut ByteReader::new(&buf)).unwrap();
        assert_eq!(
            decoded
                .lookup(RelOp::Equal, &addr("10.0.0.1"), 2)
                .unwrap()
                .ones()
                .collect::<Vec<_>>(),
            vec![0]
        );
    }
}
