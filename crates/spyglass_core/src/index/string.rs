//! The string index.
//!
//! A string decomposes into its length, coded by a multi-level range
//! coder over decimal digits, and one 8-bit bitslice coder per character
//! position. Equality tests combine a length bound with per-position
//! character equalities; substring tests slide a window over all
//! positions and union the per-window conjunctions.

use crate::bitmap::{Base, BitsliceCoder, Coder, DigitCoder, EwahBitmap, MultiLevelCoder, RangeCoder};
use crate::codec::{put_varint, ByteReader};
use crate::error::{CoreError, CoreResult};
use spyglass_types::{Data, RelOp};

/// An index for strings of up to `max_length` bytes.
#[derive(Debug, Clone)]
pub struct StringIndex {
    max_length: usize,
    length: MultiLevelCoder<RangeCoder>,
    chars: Vec<BitsliceCoder>,
}

impl StringIndex {
    /// Creates a string index. Strings longer than `max_length` are
    /// truncated on append and on lookup.
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            length: MultiLevelCoder::new(Base::covering(10, max_length as u64)),
            chars: Vec::new(),
        }
    }

    pub(crate) fn append(&mut self, x: &Data, pos: u64) -> CoreResult<()> {
        let Data::String(s) = x else {
            return Err(CoreError::type_clash("string", x.to_string()));
        };
        let bytes = s.as_bytes();
        let length = bytes.len().min(self.max_length);
        if length > self.chars.len() {
            self.chars
                .resize_with(length, || BitsliceCoder::with_cardinality(256));
        }
        for (i, &byte) in bytes[..length].iter().enumerate() {
            let coder = &mut self.chars[i];
            coder.skip(pos - coder.rows());
            coder.append(u64::from(byte));
        }
        self.length.skip(pos - self.length.rows());
        self.length.append(length as u64);
        Ok(())
    }

    pub(crate) fn lookup(&self, op: RelOp, x: &Data, offset: u64) -> CoreResult<EwahBitmap> {
        let Data::String(s) = x else {
            return Err(CoreError::type_clash("string", x.to_string()));
        };
        let bytes = &s.as_bytes()[..s.len().min(self.max_length)];
        match op {
            RelOp::Equal | RelOp::NotEqual => {
                let negated = op == RelOp::NotEqual;
                if bytes.is_empty() {
                    let result = self.length.lookup(RelOp::Equal, 0)?;
                    return Ok(if negated { result.flip() } else { result });
                }
                if bytes.len() > self.chars.len() {
                    return Ok(EwahBitmap::with_size(offset, negated));
                }
                let mut result = self.length.lookup(RelOp::LessEqual, bytes.len() as u64)?;
                for (i, &byte) in bytes.iter().enumerate() {
                    if result.all_zeros() {
                        return Ok(EwahBitmap::with_size(offset, negated));
                    }
                    result &= &self.chars[i].lookup(RelOp::Equal, u64::from(byte))?;
                }
                if result.all_zeros() {
                    return Ok(EwahBitmap::with_size(offset, negated));
                }
                Ok(if negated { result.flip() } else { result })
            }
            RelOp::Ni | RelOp::NotNi => {
                let negated = op == RelOp::NotNi;
                if bytes.is_empty() {
                    // Every string contains the empty string.
                    return Ok(EwahBitmap::with_size(offset, !negated));
                }
                if bytes.len() > self.chars.len() {
                    return Ok(EwahBitmap::with_size(offset, negated));
                }
                let mut result = EwahBitmap::with_size(offset, false);
                for window in 0..=self.chars.len() - bytes.len() {
                    let mut substr = EwahBitmap::with_size(offset, true);
                    let mut dead = false;
                    for (j, &byte) in bytes.iter().enumerate() {
                        let bm = self.chars[window + j].lookup(RelOp::Equal, u64::from(byte))?;
                        if bm.all_zeros() {
                            dead = true;
                            break;
                        }
                        substr &= &bm;
                    }
                    if !dead {
                        result |= &substr;
                    }
                }
                Ok(if negated { result.flip() } else { result })
            }
            other => Err(CoreError::unsupported_operator(other)),
        }
    }

    pub(crate) fn encode(&self, buf: &mut Vec<u8>) {
        put_varint(buf, self.max_length as u64);
        self.length.encode(buf);
        put_varint(buf, self.chars.len() as u64);
        for coder in &self.chars {
            coder.encode(buf);
        }
    }

    pub(crate) fn decode(r: &mut ByteReader<'_>) -> CoreResult<Self> {
        let max_length = r.varint()? as usize;
        let length = MultiLevelCoder::decode(r)?;
        let count = r.count(1 << 20, "character coder")?;
        let mut chars = Vec::with_capacity(count);
        for _ in 0..count {
            chars.push(BitsliceCoder::decode(r)?);
        }
        Ok(Self {
            max_length,
            length,
            chars,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_of(max_length: usize, xs: &[&str]) -> StringIndex {
        let mut idx = StringIndex::new(max_length);
        for (i, s) in xs.iter().enumerate() {
            idx.append(&Data::String((*s).into()), i as u64).unwrap();
        }
        idx
    }

    fn hits(idx: &StringIndex, op: RelOp, s: &str, offset: u64) -> Vec<u64> {
        idx.lookup(op, &Data::String(s.into()), offset)
            .unwrap()
            .ones()
            .collect()
    }

    #[test]
    fn equality_and_substring() {
        let idx = index_of(1024, &["foobar", "barbaz", "quxfoo", "qux"]);
        assert_eq!(hits(&idx, RelOp::Ni, "foo", 4), vec![0, 2]);
        assert_eq!(hits(&idx, RelOp::Equal, "", 4), Vec::<u64>::new());
        assert_eq!(hits(&idx, RelOp::Equal, "qux", 4), vec![3]);
        assert_eq!(hits(&idx, RelOp::NotEqual, "qux", 4), vec![0, 1, 2]);
        assert_eq!(hits(&idx, RelOp::NotNi, "foo", 4), vec![1, 3]);
        assert_eq!(hits(&idx, RelOp::Ni, "bar", 4), vec![0, 1]);
    }

    #[test]
    fn empty_strings() {
        let idx = index_of(1024, &["", "a"]);
        assert_eq!(hits(&idx, RelOp::Equal, "", 2), vec![0]);
        assert_eq!(hits(&idx, RelOp::NotEqual, "", 2), vec![1]);
        // The empty string is a substring of everything.
        assert_eq!(hits(&idx, RelOp::Ni, "", 2), vec![0, 1]);
    }

    #[test]
    fn max_length_truncates() {
        let idx = index_of(4, &["abcdx", "abcdy"]);
        // Both strings truncate to "abcd" and become indistinguishable.
        assert_eq!(hits(&idx, RelOp::Equal, "abcdx", 2), vec![0, 1]);
        assert_eq!(hits(&idx, RelOp::Equal, "abcd", 2), vec![0, 1]);
        // A query longer than any stored position set matches nothing
        // after truncation to the same prefix.
        let exact = index_of(4, &["abcd"]);
        assert_eq!(hits(&exact, RelOp::Equal, "abcd", 1), vec![0]);
    }

    #[test]
    fn longer_query_than_any_stored_string() {
        let idx = index_of(1024, &["ab", "cd"]);
        assert_eq!(hits(&idx, RelOp::Equal, "abc", 2), Vec::<u64>::new());
        assert_eq!(hits(&idx, RelOp::NotEqual, "abc", 2), vec![0, 1]);
        assert_eq!(hits(&idx, RelOp::Ni, "abc", 2), Vec::<u64>::new());
    }

    #[test]
    fn unsupported_operators_error() {
        let idx = index_of(1024, &["a"]);
        assert!(idx
            .lookup(RelOp::Less, &Data::String("a".into()), 1)
            .is_err());
    }

    #[test]
    fn round_trip() {
        let idx = index_of(16, &["alpha", "beta"]);
        let mut buf = Vec::new();
        idx.encode(&mut buf);
        let decoded = StringIndex::decode(&mut ByteReader::new(&buf)).unwrap();
        assert_eq!(
            decoded
                .lookup(RelOp::Equal, &Data::String("beta".into()), 2)
                .unwrap()
                .ones()
                .collect::<Vec<_>>(),
            vec![1]
        );
    }
}
