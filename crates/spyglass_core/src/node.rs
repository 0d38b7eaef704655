//! Node assembly: the index and the archive behind one ingest path.

use crate::archive::Archive;
use crate::config::{ArchiveConfig, IndexConfig};
use crate::error::CoreResult;
use crate::bitmap::EwahBitmap;
use crate::scheduler::{Index, LookupSummary, QueryReply};
use crate::segment::SegmentWriter;
use spyglass_types::{Data, Event, Expression, TableSlice, TypeKind};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use tracing::info;
use uuid::Uuid;

/// A running Spyglass node: partitioned index, meta index, and
/// segmented archive over one data directory.
///
/// Layout on disk:
///
/// ```text
/// <root>/index/meta
/// <root>/index/<partition-uuid>/layout
/// <root>/index/<partition-uuid>/<column>
/// <root>/archive/<segment-uuid>
/// ```
pub struct Node {
    root: PathBuf,
    index: Index,
    archive: Archive,
    writer: SegmentWriter,
}

impl Node {
    /// Opens (or creates) a node under the given data directory.
    pub fn open(
        root: impl Into<PathBuf>,
        index_config: IndexConfig,
        archive_config: ArchiveConfig,
    ) -> CoreResult<Self> {
        let root = root.into();
        let index = Index::open(root.join("index"), index_config)?;
        let archive = Archive::open(root.join("archive"), &archive_config)?;
        info!(root = %root.display(), "node ready");
        Ok(Self {
            root,
            index,
            archive,
            writer: SegmentWriter::new(
                archive_config.compression,
                archive_config.max_events_per_chunk,
                archive_config.max_segment_bytes,
            ),
        })
    }

    /// The data directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ingests one table slice: rows become indexed, archived events
    /// with dense IDs.
    pub fn ingest(&mut self, slice: &TableSlice) -> CoreResult<()> {
        let ids = self.index.ingest(slice)?;
        let timestamp_column = slice
            .layout()
            .record_fields()
            .iter()
            .position(|f| matches!(f.ty.resolve().kind(), TypeKind::Timestamp));
        for (row, id) in (0..slice.rows()).zip(ids) {
            let values = slice.row(row);
            let timestamp = match timestamp_column.map(|c| &values[c]) {
                Some(Data::Timestamp(t)) => *t,
                _ => 0,
            };
            let mut event = Event::new(
                timestamp,
                slice.layout().clone(),
                Data::Record(values.to_vec()),
            );
            event.id = id;
            if let Some(segment) = self.writer.write(&event)? {
                self.archive.store(segment)?;
            }
        }
        Ok(())
    }

    /// Drains a bounded channel of slices until the source closes.
    ///
    /// The channel's capacity is the ingest credit: a full queue holds
    /// the producer back.
    pub fn run_source(&mut self, source: Receiver<TableSlice>) -> CoreResult<()> {
        for slice in source {
            self.ingest(&slice)?;
        }
        Ok(())
    }

    /// Starts a query; replies stream over the returned channel.
    pub fn lookup(
        &mut self,
        expr: Expression,
    ) -> CoreResult<(LookupSummary, Receiver<QueryReply>)> {
        let (tx, rx) = mpsc::channel();
        let summary = self.index.lookup(expr, tx)?;
        Ok((summary, rx))
    }

    /// Requests up to `num` more partitions for a pending query.
    pub fn continue_query(&mut self, query_id: Uuid, num: usize) -> CoreResult<usize> {
        self.index.continue_query(query_id, num)
    }

    /// Cancels a pending query.
    pub fn cancel(&mut self, query_id: Uuid) {
        self.index.cancel(query_id);
    }

    /// Hydrates matched event IDs into full events from the archive.
    pub fn extract(&self, ids: &EwahBitmap) -> CoreResult<Vec<Event>> {
        self.archive.extract(ids)
    }

    /// The number of partitions.
    pub fn partitions(&self) -> usize {
        self.index.partitions()
    }

    /// The number of stored segments.
    pub fn segments(&self) -> usize {
        self.archive.segments()
    }

    /// The number of ingested events.
    pub fn events(&self) -> u64 {
        self.index.next_event_id()
    }

    /// Seals and persists everything in flight: the active partition,
    /// the meta index, and the partial segment.
    pub fn flush(&mut self) -> CoreResult<()> {
        self.index.flush()?;
        for segment in self.writer.finish()? {
            self.archive.store(segment)?;
        }
        Ok(())
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::error!(error = %e, "failed to flush node state");
        }
    }
}
