//! Multi-level coding over a positional base.
//!
//! A [`Base`] decomposes a value into digits of a (uniform or mixed)
//! radix; a [`MultiLevelCoder`] maintains one inner coder per digit.
//! This is the main space/accuracy knob: base `[10]^k` yields decimal
//! digits, `[256]^k` yields byte slicing.

use crate::bitmap::coder::{Coder, DigitCoder};
use crate::bitmap::EwahBitmap;
use crate::codec::{put_varint, ByteReader};
use crate::error::{CoreError, CoreResult};
use spyglass_types::RelOp;

/// A positional base: the per-digit radixes, least significant first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base(Vec<u64>);

impl Base {
    /// A uniform base of `digits` digits with the given radix.
    pub fn uniform(radix: u64, digits: usize) -> Self {
        debug_assert!(radix >= 2);
        Self(vec![radix; digits.max(1)])
    }

    /// A uniform base with just enough digits to represent `max_value`.
    pub fn covering(radix: u64, max_value: u64) -> Self {
        debug_assert!(radix >= 2);
        let mut digits = 1;
        let mut ceiling = radix;
        while ceiling <= max_value {
            match ceiling.checked_mul(radix) {
                Some(next) => ceiling = next,
                None => {
                    digits += 1;
                    break;
                }
            }
            digits += 1;
        }
        Self::uniform(radix, digits)
    }

    /// The uniform base covering all 64-bit values in decimal digits.
    pub fn decimal64() -> Self {
        Self::uniform(10, 20)
    }

    /// Parses a base from its attribute form, e.g. `[10, 8, 8]`.
    pub fn parse(s: &str) -> Option<Self> {
        let inner = s.trim().strip_prefix('[')?.strip_suffix(']')?;
        let mut radixes = Vec::new();
        for part in inner.split(',') {
            let radix: u64 = part.trim().parse().ok()?;
            if radix < 2 {
                return None;
            }
            radixes.push(radix);
        }
        if radixes.is_empty() {
            return None;
        }
        Some(Self(radixes))
    }

    /// The per-digit radixes, least significant first.
    pub fn radixes(&self) -> &[u64] {
        &self.0
    }

    /// Decomposes a value into digits, least significant first.
    ///
    /// A value exceeding the base's capacity saturates in the most
    /// significant digit.
    pub fn decompose(&self, mut x: u64) -> Vec<u64> {
        let mut digits = Vec::with_capacity(self.0.len());
        for (i, &radix) in self.0.iter().enumerate() {
            if i + 1 == self.0.len() {
                digits.push(x.min(radix - 1));
            } else {
                digits.push(x % radix);
                x /= radix;
            }
        }
        digits
    }

    /// Composes digits back into a value.
    pub fn compose(&self, digits: &[u64]) -> u64 {
        let mut value = 0u64;
        for (i, &digit) in digits.iter().enumerate().rev() {
            value = value.saturating_mul(self.0[i]).saturating_add(digit);
        }
        value
    }
}

/// A coder that decomposes values into digits and delegates each digit
/// to an inner coder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiLevelCoder<C> {
    base: Base,
    coders: Vec<C>,
    rows: u64,
}

impl<C: DigitCoder> MultiLevelCoder<C> {
    /// Creates a multi-level coder over the given base.
    pub fn new(base: Base) -> Self {
        let coders = base
            .radixes()
            .iter()
            .map(|&radix| C::with_cardinality(radix))
            .collect();
        Self {
            base,
            coders,
            rows: 0,
        }
    }

    /// The positional base.
    pub fn base(&self) -> &Base {
        &self.base
    }

    fn equal(&self, digits: &[u64]) -> CoreResult<EwahBitmap> {
        let mut result = EwahBitmap::with_size(self.rows, true);
        for (coder, &digit) in self.coders.iter().zip(digits) {
            result &= &coder.lookup(RelOp::Equal, digit)?;
            if result.all_zeros() {
                break;
            }
        }
        Ok(result)
    }

    /// Evaluates `value <= x` digit by digit: a value is `<= x` iff its
    /// top digit is smaller, or equal with the remaining digits `<= x`.
    fn less_equal(&self, digits: &[u64]) -> CoreResult<EwahBitmap> {
        let mut result = self.coders[0].lookup(RelOp::LessEqual, digits[0])?;
        for (coder, &digit) in self.coders.iter().zip(digits).skip(1) {
            let less = coder.lookup(RelOp::Less, digit)?;
            let equal = coder.lookup(RelOp::Equal, digit)?;
            result = &less | &(&equal & &result);
        }
        Ok(result)
    }
}

impl<C: DigitCoder> Coder for MultiLevelCoder<C> {
    fn rows(&self) -> u64 {
        self.rows
    }

    fn append(&mut self, x: u64) {
        let digits = self.base.decompose(x);
        for (coder, &digit) in self.coders.iter_mut().zip(&digits) {
            coder.append(digit);
        }
        self.rows += 1;
    }

    fn skip(&mut self, n: u64) {
        for coder in &mut self.coders {
            coder.skip(n);
        }
        self.rows += n;
    }

    fn lookup(&self, op: RelOp, x: u64) -> CoreResult<EwahBitmap> {
        let digits = self.base.decompose(x);
        match op {
            RelOp::Equal => self.equal(&digits),
            RelOp::NotEqual => self.equal(&digits).map(|r| r.flip()),
            RelOp::LessEqual => self.less_equal(&digits),
            RelOp::Less => {
                if x == 0 {
                    Ok(EwahBitmap::with_size(self.rows, false))
                } else {
                    self.less_equal(&self.base.decompose(x - 1))
                }
            }
            RelOp::Greater => self.less_equal(&digits).map(|r| r.flip()),
            RelOp::GreaterEqual => self.lookup(RelOp::Less, x).map(|r| r.flip()),
            other => Err(CoreError::unsupported_operator(other)),
        }
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        put_varint(buf, self.rows);
        put_varint(buf, self.base.radixes().len() as u64);
        for &radix in self.base.radixes() {
            put_varint(buf, radix);
        }
        for coder in &self.coders {
            coder.encode(buf);
        }
    }

    fn decode(r: &mut ByteReader<'_>) -> CoreResult<Self> {
        let rows = r.varint()?;
        let digits = r.count(64, "base digit")?;
        if digits == 0 {
            return Err(CoreError::format_error("empty base"));
        }
        let mut radixes = Vec::with_capacity(digits);
        for _ in 0..digits {
            let radix = r.varint()?;
            if radix < 2 {
                return Err(CoreError::format_error(format!("invalid radix: {radix}")));
            }
            radixes.push(radix);
        }
        let mut coders = Vec::with_capacity(digits);
        for _ in 0..digits {
            coders.push(C::decode(r)?);
        }
        Ok(Self {
            base: Base(radixes),
            coders,
            rows,
        })
    }
}
