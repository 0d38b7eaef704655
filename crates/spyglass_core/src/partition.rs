//! Partitions: sealed or active bundles of per-column value indexes
//! covering a contiguous ID range.

use crate::bitmap::EwahBitmap;
use crate::codec::{self, ByteReader};
use crate::error::{CoreError, CoreResult};
use crate::index::ValueIndex;
use parking_lot::Mutex;
use spyglass_types::{Data, Expression, Predicate, RecordField, Type};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

const LAYOUT_MAGIC: [u8; 4] = *b"SGLY";
const COLUMN_MAGIC: [u8; 4] = *b"SGIX";
const PARTITION_VERSION: u8 = 1;

/// The lifecycle of a partition.
///
/// Only `Active` accepts appends; only `OnDisk` is safe to delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionState {
    /// Accepting appends from the stream driver.
    Active,
    /// Sealed, currently writing the layout to disk.
    Flushing,
    /// Sealed, with column flushes still outstanding.
    Unpersisted,
    /// Fully durable.
    OnDisk,
}

/// A single-writer queue over one column's value index.
///
/// The indexer owns its index; appends come from the partition's stream
/// driver, lookups from query workers.
#[derive(Debug)]
pub struct ColumnIndexer {
    field: RecordField,
    index: Mutex<ValueIndex>,
}

impl ColumnIndexer {
    fn new(field: RecordField, index: ValueIndex) -> Self {
        Self {
            field,
            index: Mutex::new(index),
        }
    }

    /// The flattened column this indexer covers.
    pub fn field(&self) -> &RecordField {
        &self.field
    }

    /// Whether a predicate's extractor resolves to this column.
    pub fn covers(&self, predicate: &Predicate) -> bool {
        predicate
            .as_lookup()
            .is_some_and(|(extractor, _, _)| extractor.matches(&self.field.name, &self.field.ty))
    }

    /// Answers a predicate if it resolves to this column.
    ///
    /// Returns `None` for predicates about other columns.
    pub fn lookup(&self, predicate: &Predicate) -> Option<CoreResult<EwahBitmap>> {
        let (_, op, rhs) = predicate.as_lookup()?;
        if !self.covers(predicate) {
            return None;
        }
        Some(self.index.lock().lookup(op, rhs))
    }

    fn append_at(&self, x: &Data, pos: u64) -> CoreResult<()> {
        self.index.lock().append_at(x, pos)
    }

    fn is_empty(&self) -> bool {
        self.index.lock().offset() == 0
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&COLUMN_MAGIC);
        buf.push(PARTITION_VERSION);
        self.index.lock().encode(&mut buf);
        buf
    }
}

/// A container binding a record layout to one value index per column.
///
/// Event IDs within a partition form the half-open interval
/// `[base, base + events)` with no gaps.
#[derive(Debug)]
pub struct Partition {
    id: Uuid,
    layout: Type,
    base: u64,
    events: AtomicU64,
    columns: Vec<Option<Arc<ColumnIndexer>>>,
    state: Mutex<PartitionState>,
}

impl Partition {
    /// Creates an active partition for a layout, starting at `base`.
    ///
    /// Columns with a `skip` attribute or an unindexable type get no
    /// indexer.
    pub fn new(id: Uuid, layout: &Type, base: u64) -> Self {
        let layout = layout.flatten();
        let columns = layout
            .record_fields()
            .iter()
            .map(|field| {
                if field.ty.has_attribute("skip") {
                    return None;
                }
                ValueIndex::make(&field.ty)
                    .map(|index| Arc::new(ColumnIndexer::new(field.clone(), index)))
            })
            .collect();
        Self {
            id,
            layout,
            base,
            events: AtomicU64::new(0),
            columns,
            state: Mutex::new(PartitionState::Active),
        }
    }

    /// The partition's identity.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The flattened record layout of this partition's events.
    pub fn layout(&self) -> &Type {
        &self.layout
    }

    /// The first event ID of the partition.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// The number of events appended so far.
    pub fn events(&self) -> u64 {
        self.events.load(Ordering::Acquire)
    }

    /// The current lifecycle state.
    pub fn state(&self) -> PartitionState {
        *self.state.lock()
    }

    /// All IDs of this partition as a bitmap.
    pub fn universe(&self) -> EwahBitmap {
        let mut bm = EwahBitmap::with_size(self.base, false);
        bm.append_bits(true, self.events());
        bm
    }

    /// Appends one row at the given global event ID.
    ///
    /// A value that clashes with its column's type is recorded as nil
    /// for that column; the row itself survives.
    pub fn append_row(&self, row: &[Data], id: u64) -> CoreResult<()> {
        if self.state() != PartitionState::Active {
            return Err(CoreError::invalid_argument(
                "append to a sealed partition",
            ));
        }
        if id < self.base {
            return Err(CoreError::invalid_argument(format!(
                "event ID {id} precedes partition base {}",
                self.base
            )));
        }
        for (indexer, value) in self.columns.iter().zip(row) {
            let Some(indexer) = indexer else { continue };
            match indexer.append_at(value, id) {
                Ok(()) => {}
                Err(CoreError::TypeClash { expected, actual }) => {
                    warn!(
                        column = %indexer.field().name,
                        %expected,
                        %actual,
                        "value clashes with column type, recording nil"
                    );
                    indexer.append_at(&Data::Nil, id)?;
                }
                Err(other) => return Err(other),
            }
        }
        self.events.store(id - self.base + 1, Ordering::Release);
        Ok(())
    }

    /// The indexers that could answer any predicate of the expression.
    pub fn get_indexers(&self, expr: &Expression) -> Vec<Arc<ColumnIndexer>> {
        let predicates = expr.predicates();
        self.columns
            .iter()
            .flatten()
            .filter(|indexer| predicates.iter().any(|p| indexer.covers(p)))
            .cloned()
            .collect()
    }

    fn dir(&self, root: &Path) -> PathBuf {
        root.join(self.id.to_string())
    }

    /// Serializes the layout and every non-empty column index into
    /// `<root>/<uuid>/`.
    ///
    /// The partition moves through `Flushing` and `Unpersisted` and ends
    /// `OnDisk` once the last column completes.
    pub fn flush_to_disk(&self, root: &Path) -> CoreResult<()> {
        *self.state.lock() = PartitionState::Flushing;
        let dir = self.dir(root);
        fs::create_dir_all(&dir)?;
        let mut buf = Vec::new();
        buf.extend_from_slice(&LAYOUT_MAGIC);
        buf.push(PARTITION_VERSION);
        buf.extend_from_slice(&self.base.to_le_bytes());
        buf.extend_from_slice(&self.events().to_le_bytes());
        codec::encode_type(&self.layout, &mut buf);
        fs::write(dir.join("layout"), buf)?;
        let pending: Vec<_> = self
            .columns
            .iter()
            .flatten()
            .filter(|c| !c.is_empty())
            .collect();
        *self.state.lock() = PartitionState::Unpersisted;
        let mut remaining = pending.len();
        for indexer in &pending {
            fs::write(
                dir.join(file_name(&indexer.field().name)),
                indexer.encode(),
            )?;
            remaining -= 1;
            if remaining == 0 {
                *self.state.lock() = PartitionState::OnDisk;
            }
        }
        if pending.is_empty() {
            *self.state.lock() = PartitionState::OnDisk;
        }
        debug!(partition = %self.id, events = self.events(), "flushed partition");
        Ok(())
    }

    /// Loads a sealed partition from `<root>/<uuid>/`.
    ///
    /// Column indexes are materialized now, as part of faulting the
    /// partition in; columns without a file come back empty.
    pub fn load(root: &Path, id: Uuid) -> CoreResult<Self> {
        let dir = root.join(id.to_string());
        let bytes = fs::read(dir.join("layout"))?;
        let mut r = ByteReader::new(&bytes);
        r.expect_magic(&LAYOUT_MAGIC, "partition layout")?;
        let version = r.u8()?;
        if version != PARTITION_VERSION {
            return Err(CoreError::format_error(format!(
                "unsupported partition version: {version}"
            )));
        }
        let base = r.u64()?;
        let events = r.u64()?;
        let layout = codec::decode_type(&mut r)?;
        let mut columns = Vec::new();
        for field in layout.record_fields() {
            if field.ty.has_attribute("skip") {
                columns.push(None);
                continue;
            }
            let Some(empty) = ValueIndex::make(&field.ty) else {
                columns.push(None);
                continue;
            };
            let path = dir.join(file_name(&field.name));
            let index = if path.exists() {
                let bytes = fs::read(path)?;
                let mut r = ByteReader::new(&bytes);
                r.expect_magic(&COLUMN_MAGIC, "column index")?;
                let version = r.u8()?;
                if version != PARTITION_VERSION {
                    return Err(CoreError::format_error(format!(
                        "unsupported column index version: {version}"
                    )));
                }
                ValueIndex::decode(&mut r)?
            } else {
                empty
            };
            columns.push(Some(Arc::new(ColumnIndexer::new(field.clone(), index))));
        }
        Ok(Self {
            id,
            layout,
            base,
            events: AtomicU64::new(events),
            columns,
            state: Mutex::new(PartitionState::OnDisk),
        })
    }
}

fn file_name(field: &str) -> String {
    field.replace(['/', '\\'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use spyglass_types::{parse_expression, Attribute};

    fn flow_layout() -> Type {
        Type::record(vec![
            RecordField::new("ts", Type::timestamp()),
            RecordField::new("orig_h", Type::address()),
            RecordField::new("resp_p", Type::port()),
            RecordField::new(
                "internal",
                Type::string().with_attribute(Attribute::new("skip")),
            ),
            RecordField::new("note", Type::pattern()),
        ])
        .with_name("flow")
    }

    fn row(ts: i64, host: &str, port: &str) -> Vec<Data> {
        vec![
            Data::Timestamp(ts),
            Data::Address(host.parse().unwrap()),
            Data::Port(port.parse().unwrap()),
            Data::String("ignored".into()),
            Data::Pattern("ignored".into()),
        ]
    }

    #[test]
    fn skipped_and_unindexable_columns_get_no_indexer() {
        let p = Partition::new(Uuid::new_v4(), &flow_layout(), 0);
        let with_indexers = p.columns.iter().flatten().count();
        assert_eq!(with_indexers, 3);
    }

    #[test]
    fn append_assigns_dense_ids() {
        let p = Partition::new(Uuid::new_v4(), &flow_layout(), 100);
        for i in 0..3 {
            p.append_row(&row(i, "10.0.0.1", "80/tcp"), 100 + i as u64)
                .unwrap();
        }
        assert_eq!(p.events(), 3);
        assert_eq!(p.universe().ones().collect::<Vec<_>>(), vec![100, 101, 102]);
        assert!(p.append_row(&row(9, "10.0.0.1", "80/tcp"), 99).is_err());
    }

    #[test]
    fn get_indexers_resolves_expression_columns() {
        let p = Partition::new(Uuid::new_v4(), &flow_layout(), 0);
        let expr = parse_expression("orig_h in 10.0.0.0/8 && resp_p == 80/tcp")
            .unwrap()
            .normalize();
        let indexers = p.get_indexers(&expr);
        let mut names: Vec<_> = indexers.iter().map(|i| i.field().name.clone()).collect();
        names.sort();
        assert_eq!(names, ["orig_h", "resp_p"]);
        let time_expr = parse_expression("&time > 1970-01-01").unwrap().normalize();
        assert_eq!(p.get_indexers(&time_expr).len(), 1);
    }

    #[test]
    fn type_clash_becomes_nil_for_the_column() {
        let p = Partition::new(Uuid::new_v4(), &flow_layout(), 0);
        let mut bad = row(1, "10.0.0.1", "80/tcp");
        bad[1] = Data::Count(7);
        p.append_row(&bad, 0).unwrap();
        p.append_row(&row(2, "10.0.0.2", "81/tcp"), 1).unwrap();
        let indexer = p
            .columns
            .iter()
            .flatten()
            .find(|c| c.field().name == "orig_h")
            .unwrap();
        let pred = match parse_expression("orig_h != nil").unwrap().normalize() {
            Expression::Predicate(pred) => pred,
            other => panic!("unexpected expression: {other:?}"),
        };
        let hits = indexer.lookup(&pred).unwrap().unwrap();
        assert_eq!(hits.ones().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn flush_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let id = Uuid::new_v4();
        let p = Partition::new(id, &flow_layout(), 40);
        for i in 0..4 {
            p.append_row(&row(i, "10.0.0.1", "443/tcp"), 40 + i as u64)
                .unwrap();
        }
        p.flush_to_disk(dir.path()).unwrap();
        assert_eq!(p.state(), PartitionState::OnDisk);

        let loaded = Partition::load(dir.path(), id).unwrap();
        assert_eq!(loaded.base(), 40);
        assert_eq!(loaded.events(), 4);
        assert_eq!(loaded.layout().name(), Some("flow"));
        assert_eq!(loaded.state(), PartitionState::OnDisk);
        assert!(loaded.append_row(&row(9, "10.0.0.1", "80/tcp"), 44).is_err());

        let expr = parse_expression("resp_p == 443/tcp").unwrap().normalize();
        let indexers = loaded.get_indexers(&expr);
        assert_eq!(indexers.len(), 1);
        let Expression::Predicate(pred) = &expr else {
            panic!("expected a predicate");
        };
        let hits = indexers[0].lookup(pred).unwrap().unwrap();
        assert_eq!(hits.ones().collect::<Vec<_>>(), vec![40, 41, 42, 43]);
    }

    #[test]
    fn load_rejects_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let id = Uuid::new_v4();
        let p = Partition::new(id, &flow_layout(), 0);
        p.append_row(&row(1, "10.0.0.1", "80/tcp"), 0).unwrap();
        p.flush_to_disk(dir.path()).unwrap();
        let layout_path = dir.path().join(id.to_string()).join("layout");
        fs::write(&layout_path, b"garbage").unwrap();
        assert!(matches!(
            Partition::load(dir.path(), id),
            Err(CoreError::Format { .. })
        ));
    }
}
