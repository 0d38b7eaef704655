//! The meta index: per-partition synopses and candidate pruning.
//!
//! Ingestion feeds every value to its column's synopsis; queries walk
//! the expression AST and intersect/union per-predicate candidate sets.
//! The result may contain false positives but never omits a partition
//! that could match.

use crate::codec::{self, put_varint, ByteReader};
use crate::error::{CoreError, CoreResult};
use crate::synopsis::{MinMaxSynopsis, Synopsis, SynopsisFactory, SynopsisOptions};
use spyglass_types::{Data, Expression, TableSlice, Type};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

const META_MAGIC: [u8; 4] = *b"SGMI";
const META_VERSION: u8 = 1;

struct LayoutSynopsis {
    layout: Type,
    columns: Vec<Option<Box<dyn Synopsis>>>,
}

/// Per-partition column synopses, grouped by layout.
#[derive(Default)]
struct PartitionSynopsis {
    layouts: Vec<LayoutSynopsis>,
}

/// The global map of partition to per-column synopses.
pub struct MetaIndex {
    factory: Arc<dyn SynopsisFactory>,
    options: SynopsisOptions,
    partitions: BTreeMap<Uuid, PartitionSynopsis>,
    /// Layouts for which no column yields a synopsis; skipped on add.
    blacklist: HashSet<Type>,
}

impl MetaIndex {
    /// Creates a meta index with the given synopsis factory.
    pub fn new(factory: Arc<dyn SynopsisFactory>) -> Self {
        Self {
            factory,
            options: SynopsisOptions::new(),
            partitions: BTreeMap::new(),
            blacklist: HashSet::new(),
        }
    }

    /// Sets a factory option, clearing the layout blacklist.
    pub fn set_option(&mut self, key: impl Into<String>, value: Data) {
        self.options.set(key, value);
        self.blacklist.clear();
    }

    /// The number of partitions known to the index.
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// The IDs of all known partitions, sorted.
    pub fn partition_ids(&self) -> Vec<Uuid> {
        self.partitions.keys().copied().collect()
    }

    /// Feeds a slice's values into the synopses of a partition.
    pub fn add(&mut self, partition: Uuid, slice: &TableSlice) {
        let layout = slice.layout();
        if self.blacklist.contains(layout) {
            return;
        }
        let known = self
            .partitions
            .get(&partition)
            .is_some_and(|entry| entry.layouts.iter().any(|l| &l.layout == layout));
        if !known {
            let columns: Vec<_> = layout
                .record_fields()
                .iter()
                .map(|field| self.factory.make(&field.ty, &self.options))
                .collect();
            if columns.iter().all(Option::is_none) {
                debug!(%layout, "no synopsis for any column, blacklisting layout");
                self.blacklist.insert(layout.clone());
                return;
            }
            self.partitions
                .entry(partition)
                .or_default()
                .layouts
                .push(LayoutSynopsis {
                    layout: layout.clone(),
                    columns,
                });
        }
        let Some(entry) = self.partitions.get_mut(&partition) else {
            return;
        };
        let Some(table) = entry.layouts.iter_mut().find(|l| &l.layout == layout) else {
            return;
        };
        debug_assert_eq!(table.columns.len(), slice.columns());
        for (column, synopsis) in table.columns.iter_mut().enumerate() {
            if let Some(synopsis) = synopsis {
                for row in 0..slice.rows() {
                    synopsis.add(slice.at(row, column));
                }
            }
        }
    }

    /// All partitions, sorted.
    fn all_partitions(&self) -> Vec<Uuid> {
        self.partitions.keys().copied().collect()
    }

    /// The deduplicated, sorted candidate partitions for an expression.
    pub fn lookup(&self, expr: &Expression) -> Vec<Uuid> {
        match expr {
            Expression::Conjunction(children) => {
                let mut iter = children.iter();
                let mut result = match iter.next() {
                    Some(child) => self.lookup(child),
                    None => return self.all_partitions(),
                };
                for child in iter {
                    if result.is_empty() {
                        return result;
                    }
                    result = intersect_sorted(&result, &self.lookup(child));
                }
                result
            }
            Expression::Disjunction(children) => {
                let mut result = Vec::new();
                for child in children {
                    let candidates = self.lookup(child);
                    if candidates.len() == self.partitions.len() {
                        return candidates;
                    }
                    result = union_sorted(&result, &candidates);
                }
                result
            }
            // A synopsis may report false positives, so negating its
            // answer could drop true matches.
            Expression::Negation(_) => self.all_partitions(),
            Expression::Predicate(predicate) => {
                let Some((extractor, op, rhs)) = predicate.as_lookup() else {
                    warn!(%predicate, "cannot prune by predicate");
                    return self.all_partitions();
                };
                let mut result = Vec::new();
                let mut found_synopsis = false;
                for (&partition, entry) in &self.partitions {
                    for table in &entry.layouts {
                        let fields = table.layout.record_fields();
                        for (field, synopsis) in fields.iter().zip(&table.columns) {
                            let Some(synopsis) = synopsis else { continue };
                            if !extractor.matches(&field.name, &field.ty) {
                                continue;
                            }
                            found_synopsis = true;
                            if synopsis.lookup(op, rhs)
                                && result.last() != Some(&partition)
                            {
                                result.push(partition);
                            }
                        }
                    }
                }
                if !found_synopsis {
                    return self.all_partitions();
                }
                result.sort_unstable();
                result.dedup();
                result
            }
        }
    }

    // -- persistence ---------------------------------------------------------

    /// Serializes the meta index.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&META_MAGIC);
        buf.push(META_VERSION);
        put_varint(&mut buf, self.partitions.len() as u64);
        for (partition, entry) in &self.partitions {
            buf.extend_from_slice(partition.as_bytes());
            put_varint(&mut buf, entry.layouts.len() as u64);
            for table in &entry.layouts {
                codec::encode_type(&table.layout, &mut buf);
                put_varint(&mut buf, table.columns.len() as u64);
                for synopsis in &table.columns {
                    match synopsis {
                        Some(synopsis) => {
                            buf.push(synopsis.tag());
                            synopsis.encode(&mut buf);
                        }
                        None => buf.push(0),
                    }
                }
            }
        }
        buf
    }

    /// Restores a meta index, rebuilding synopses through the factory.
    pub fn decode(bytes: &[u8], factory: Arc<dyn SynopsisFactory>) -> CoreResult<Self> {
        let mut r = ByteReader::new(bytes);
        r.expect_magic(&META_MAGIC, "meta index")?;
        let version = r.u8()?;
        if version != META_VERSION {
            return Err(CoreError::format_error(format!(
                "unsupported meta index version: {version}"
            )));
        }
        let options = SynopsisOptions::new();
        let mut partitions = BTreeMap::new();
        let partition_count = r.count(1 << 32, "partition")?;
        for _ in 0..partition_count {
            let mut id = [0u8; 16];
            id.copy_from_slice(r.bytes(16)?);
            let partition = Uuid::from_bytes(id);
            let layout_count = r.count(1 << 16, "layout")?;
            let mut layouts = Vec::with_capacity(layout_count);
            for _ in 0..layout_count {
                let layout = codec::decode_type(&mut r)?;
                let column_count = r.count(1 << 20, "column")?;
                let fields = layout.record_fields().to_vec();
                if fields.len() != column_count {
                    return Err(CoreError::format_error(
                        "synopsis column count does not match layout",
                    ));
                }
                let mut columns = Vec::with_capacity(column_count);
                for field in &fields {
                    let tag = r.u8()?;
                    let synopsis = match tag {
                        0 => None,
                        1 => {
                            let mut s = MinMaxSynopsis::new();
                            s.decode_state(&mut r)?;
                            Some(Box::new(s) as Box<dyn Synopsis>)
                        }
                        _ => {
                            let mut s = factory.make(&field.ty, &options).ok_or_else(|| {
                                CoreError::format_error(format!(
                                    "no factory for persisted synopsis tag {tag}"
                                ))
                            })?;
                            s.decode_state(&mut r)?;
                            Some(s)
                        }
                    };
                    columns.push(synopsis);
                }
                layouts.push(LayoutSynopsis { layout, columns });
            }
            partitions.insert(partition, PartitionSynopsis { layouts });
        }
        Ok(Self {
            factory,
            options,
            partitions,
            blacklist: HashSet::new(),
        })
    }
}

fn intersect_sorted(a: &[Uuid], b: &[Uuid]) -> Vec<Uuid> {
    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out
}

fn union_sorted(a: &[Uuid], b: &[Uuid]) -> Vec<Uuid> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => {
                out.push(a[i]);
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                out.push(b[j]);
                j += 1;
            }
            std::cmp::Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synopsis::DefaultSynopsisFactory;
    use spyglass_types::{parse_expression, RecordField};

    const HOUR: i64 = 3_600_000_000_000;

    fn layout() -> Type {
        Type::record(vec![
            RecordField::new("ts", Type::timestamp()),
            RecordField::new("msg", Type::string()),
        ])
        .with_name("log")
    }

    fn slice(times: &[i64]) -> TableSlice {
        TableSlice::new(
            layout(),
            times
                .iter()
                .map(|&t| vec![Data::Timestamp(t), Data::String("x".into())])
                .collect(),
        )
        .unwrap()
    }

    fn meta_with_two_partitions() -> (MetaIndex, Uuid, Uuid) {
        let mut meta = MetaIndex::new(Arc::new(DefaultSynopsisFactory));
        let p1 = Uuid::new_v4();
        let p2 = Uuid::new_v4();
        // P1 covers [T, T+1h], P2 covers [T+2h, T+3h].
        meta.add(p1, &slice(&[0, HOUR]));
        meta.add(p2, &slice(&[2 * HOUR, 3 * HOUR]));
        (meta, p1, p2)
    }

    #[test]
    fn prunes_by_timestamp_range() {
        let (meta, _p1, p2) = meta_with_two_partitions();
        // T+1h30m <= time <= T+2h30m only intersects P2.
        let expr = Expression::Conjunction(vec![
            parse_expression("&time >= 1970-01-01T01:30:00").unwrap(),
            parse_expression("&time <= 1970-01-01T02:30:00").unwrap(),
        ])
        .normalize();
        assert_eq!(meta.lookup(&expr), vec![p2]);
    }

    #[test]
    fn disjunction_unions_candidates() {
        let (meta, p1, p2) = meta_with_two_partitions();
        let expr = Expression::Disjunction(vec![
            parse_expression("&time == 1970-01-01T00:00:00").unwrap(),
            parse_expression("&time == 1970-01-01T03:00:00").unwrap(),
        ])
        .normalize();
        let mut expected = vec![p1, p2];
        expected.sort_unstable();
        assert_eq!(meta.lookup(&expr), expected);
    }

    #[test]
    fn conjunction_short_circuits_to_empty() {
        let (meta, _, _) = meta_with_two_partitions();
        let expr = Expression::Conjunction(vec![
            parse_expression("&time > 1970-01-02").unwrap(),
            parse_expression("msg ni \"x\"").unwrap(),
        ])
        .normalize();
        assert!(meta.lookup(&expr).is_empty());
    }

    #[test]
    fn negation_returns_all_partitions() {
        let (meta, p1, p2) = meta_with_two_partitions();
        let expr = Expression::Negation(Box::new(
            parse_expression("&time == 1970-01-01").unwrap(),
        ));
        let mut expected = vec![p1, p2];
        expected.sort_unstable();
        assert_eq!(meta.lookup(&expr), expected);
    }

    #[test]
    fn predicates_without_synopses_are_conservative() {
        let (meta, p1, p2) = meta_with_two_partitions();
        let expr = parse_expression("msg == \"x\"").unwrap().normalize();
        let mut expected = vec![p1, p2];
        expected.sort_unstable();
        assert_eq!(meta.lookup(&expr), expected);
    }

    #[test]
    fn layouts_without_any_synopsis_are_blacklisted() {
        let mut meta = MetaIndex::new(Arc::new(DefaultSynopsisFactory));
        let bare = Type::record(vec![RecordField::new("msg", Type::string())]);
        let slice =
            TableSlice::new(bare, vec![vec![Data::String("hello".into())]]).unwrap();
        meta.add(Uuid::new_v4(), &slice);
        assert_eq!(meta.partition_count(), 0);
    }

    #[test]
    fn persistence_round_trip() {
        let (meta, _p1, p2) = meta_with_two_partitions();
        let bytes = meta.encode();
        let restored = MetaIndex::decode(&bytes, Arc::new(DefaultSynopsisFactory)).unwrap();
        assert_eq!(restored.partition_count(), 2);
        let expr = parse_expression("&time >= 1970-01-01T01:30:00")
            .unwrap()
            .normalize();
        assert_eq!(restored.lookup(&expr), vec![p2]);
        // Re-encoding is byte-identical.
        assert_eq!(restored.encode(), bytes);
    }

    #[test]
    fn corrupt_meta_index_fails_to_load() {
        let (meta, ..) = meta_with_two_partitions();
        let mut bytes = meta.encode();
        bytes[0] = b'X';
        assert!(MetaIndex::decode(&bytes, Arc::new(DefaultSynopsisFactory)).is_err());
    }
}
