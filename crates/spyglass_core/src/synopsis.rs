//! Lossy per-column summaries.
//!
//! A synopsis answers the same `lookup(op, value)` question as a value
//! index but in constant space, and is allowed to err on the side of
//! `true` (false positives). The meta index uses synopses to prune
//! partitions before any value index is opened.

use crate::codec::ByteReader;
use crate::error::{CoreError, CoreResult};
use spyglass_types::{Data, RelOp, Type, TypeKind};
use std::collections::HashMap;
use std::fmt;

/// A lossy, constant-size summary of one column.
pub trait Synopsis: fmt::Debug + Send + Sync {
    /// Incorporates a value.
    fn add(&mut self, x: &Data);

    /// Whether any incorporated value may satisfy `value op x`.
    ///
    /// `false` guarantees no value matches; `true` is a hint only.
    fn lookup(&self, op: RelOp, x: &Data) -> bool;

    /// A stable tag identifying the synopsis encoding.
    ///
    /// Tag 1 is reserved for the built-in min/max synopsis; custom
    /// factories must use tags >= 2.
    fn tag(&self) -> u8;

    /// Appends the synopsis state to `buf`.
    fn encode(&self, buf: &mut Vec<u8>);

    /// Restores the synopsis state.
    fn decode_state(&mut self, r: &mut ByteReader<'_>) -> CoreResult<()>;
}

/// Options passed to synopsis factories at construction time.
#[derive(Debug, Default, Clone)]
pub struct SynopsisOptions(HashMap<String, Data>);

impl SynopsisOptions {
    /// Creates an empty option set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an option.
    pub fn set(&mut self, key: impl Into<String>, value: Data) {
        self.0.insert(key.into(), value);
    }

    /// Reads an option.
    pub fn get(&self, key: &str) -> Option<&Data> {
        self.0.get(key)
    }
}

/// Creates synopses for column types.
///
/// Returning `None` means the column gets no synopsis and cannot be
/// used for pruning.
pub trait SynopsisFactory: Send + Sync {
    /// Creates a synopsis for a column of the given type.
    fn make(&self, t: &Type, options: &SynopsisOptions) -> Option<Box<dyn Synopsis>>;
}

/// The built-in factory: timestamp columns get a min/max synopsis,
/// everything else goes without.
#[derive(Debug, Default)]
pub struct DefaultSynopsisFactory;

impl SynopsisFactory for DefaultSynopsisFactory {
    fn make(&self, t: &Type, _options: &SynopsisOptions) -> Option<Box<dyn Synopsis>> {
        match t.resolve().kind() {
            TypeKind::Timestamp => Some(Box::new(MinMaxSynopsis::new())),
            _ => None,
        }
    }
}

/// A `(min, max)` summary of a timestamp column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinMaxSynopsis {
    min: i64,
    max: i64,
}

impl MinMaxSynopsis {
    /// Creates an empty synopsis; until a value arrives, every lookup is
    /// negative.
    pub fn new() -> Self {
        Self {
            min: i64::MAX,
            max: i64::MIN,
        }
    }

    fn is_empty(&self) -> bool {
        self.min > self.max
    }
}

impl Default for MinMaxSynopsis {
    fn default() -> Self {
        Self::new()
    }
}

impl Synopsis for MinMaxSynopsis {
    fn add(&mut self, x: &Data) {
        if let Data::Timestamp(v) = x {
            self.min = self.min.min(*v);
            self.max = self.max.max(*v);
        }
    }

    fn lookup(&self, op: RelOp, x: &Data) -> bool {
        let Data::Timestamp(v) = x else {
            // A mistyped operand cannot be ruled out here.
            return true;
        };
        if self.is_empty() {
            return false;
        }
        match op {
            RelOp::Equal => self.min <= *v && *v <= self.max,
            RelOp::NotEqual => !(self.min == *v && self.max == *v),
            RelOp::Less => self.min < *v,
            RelOp::LessEqual => self.min <= *v,
            RelOp::Greater => self.max > *v,
            RelOp::GreaterEqual => self.max >= *v,
            _ => true,
        }
    }

    fn tag(&self) -> u8 {
        1
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.min.to_le_bytes());
        buf.extend_from_slice(&self.max.to_le_bytes());
    }

    fn decode_state(&mut self, r: &mut ByteReader<'_>) -> CoreResult<()> {
        self.min = r.i64()?;
        self.max = r.i64()?;
        if self.min > self.max && self.min != i64::MAX {
            return Err(CoreError::format_error("inverted min/max synopsis"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_max_bounds() {
        let mut s = MinMaxSynopsis::new();
        for v in [100, 50, 150] {
            s.add(&Data::Timestamp(v));
        }
        assert!(s.lookup(RelOp::Equal, &Data::Timestamp(100)));
        assert!(!s.lookup(RelOp::Equal, &Data::Timestamp(151)));
        assert!(s.lookup(RelOp::GreaterEqual, &Data::Timestamp(150)));
        assert!(!s.lookup(RelOp::Greater, &Data::Timestamp(150)));
        assert!(!s.lookup(RelOp::Less, &Data::Timestamp(50)));
        assert!(s.lookup(RelOp::LessEqual, &Data::Timestamp(50)));
    }

    #[test]
    fn empty_synopsis_rules_everything_out() {
        let s = MinMaxSynopsis::new();
        assert!(!s.lookup(RelOp::Equal, &Data::Timestamp(0)));
        assert!(!s.lookup(RelOp::Greater, &Data::Timestamp(i64::MIN)));
    }

    #[test]
    fn mistyped_operand_is_conservative() {
        let mut s = MinMaxSynopsis::new();
        s.add(&Data::Timestamp(10));
        assert!(s.lookup(RelOp::Equal, &Data::Count(10)));
    }

    #[test]
    fn default_factory_covers_timestamps_only() {
        let f = DefaultSynopsisFactory;
        let opts = SynopsisOptions::new();
        assert!(f.make(&Type::timestamp(), &opts).is_some());
        assert!(f.make(&Type::alias(Type::timestamp()), &opts).is_some());
        assert!(f.make(&Type::count(), &opts).is_none());
        assert!(f.make(&Type::string(), &opts).is_none());
    }

    #[test]
    fn state_round_trip() {
        let mut s = MinMaxSynopsis::new();
        s.add(&Data::Timestamp(7));
        s.add(&Data::Timestamp(99));
        let mut buf = Vec::new();
        s.encode(&mut buf);
        let mut restored = MinMaxSynopsis::new();
        restored
            .decode_state(&mut ByteReader::new(&buf))
            .unwrap();
        assert_eq!(s, restored);
    }
}
