//! The query scheduler.
//!
//! `lookup` turns a normalized expression into a candidate partition set
//! via the meta index, schedules an initial taste of partitions on a
//! worker, and returns a query ID through which the client requests the
//! rest. Workers evaluate the expression against each partition's
//! column indexers and stream per-partition ID bitmaps back to the
//! client as they complete.

use crate::bitmap::EwahBitmap;
use crate::config::IndexConfig;
use crate::error::{CoreError, CoreResult};
use crate::meta_index::MetaIndex;
use crate::partition::{ColumnIndexer, Partition};
use crate::synopsis::{DefaultSynopsisFactory, SynopsisFactory};
use lru::LruCache;
use spyglass_types::{Data, Expression, TableSlice};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A message from the scheduler's workers to the querying client.
#[derive(Debug)]
pub enum QueryReply {
    /// All matching event IDs of one completed partition.
    Hits {
        /// The partition that produced the IDs.
        partition: Uuid,
        /// The matching event IDs.
        ids: EwahBitmap,
    },
    /// The current round of scheduled partitions is complete.
    Done,
}

/// The immediate result of a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupSummary {
    /// Handle for requesting further partitions; `None` when every
    /// candidate was already scheduled.
    pub query_id: Option<Uuid>,
    /// Total candidate partitions.
    pub hits: usize,
    /// Partitions scheduled in this round.
    pub scheduled: usize,
}

/// One unit of worker work: an expression against a set of partitions.
struct Job {
    expr: Expression,
    query_map: Vec<JobPartition>,
    client: Sender<QueryReply>,
}

struct JobPartition {
    id: Uuid,
    universe: EwahBitmap,
    indexers: Vec<Arc<ColumnIndexer>>,
}

struct LookupState {
    expr: Expression,
    partitions: Vec<Uuid>,
    client: Sender<QueryReply>,
}

/// The partitioned index with its scheduler.
///
/// Owns the active partition, the LRU cache of open partitions, the
/// meta index, and the worker pool.
pub struct Index {
    dir: PathBuf,
    config: IndexConfig,
    meta: MetaIndex,
    active: Option<Arc<Partition>>,
    /// Sealed partitions whose flush did not complete.
    unpersisted: Vec<Arc<Partition>>,
    cache: LruCache<Uuid, Arc<Partition>>,
    pending: HashMap<Uuid, LookupState>,
    workers: Vec<Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
    idle: VecDeque<usize>,
    done_rx: Receiver<usize>,
    next_event_id: u64,
}

impl Index {
    /// Opens (or creates) an index directory and spawns the worker
    /// pool. An existing meta index is restored from `<dir>/meta`.
    pub fn open(dir: impl Into<PathBuf>, config: IndexConfig) -> CoreResult<Self> {
        Self::open_with_factory(dir, config, Arc::new(DefaultSynopsisFactory))
    }

    /// Like [`open`](Self::open), with a custom synopsis factory.
    pub fn open_with_factory(
        dir: impl Into<PathBuf>,
        config: IndexConfig,
        factory: Arc<dyn SynopsisFactory>,
    ) -> CoreResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let meta_path = dir.join("meta");
        let mut meta = if meta_path.exists() {
            let meta = MetaIndex::decode(&fs::read(&meta_path)?, factory)?;
            info!(partitions = meta.partition_count(), "loaded meta index");
            meta
        } else {
            MetaIndex::new(factory)
        };
        meta.set_option(
            "max-partition-size",
            Data::Count(config.max_partition_size),
        );
        let (done_tx, done_rx) = mpsc::channel();
        let mut workers = Vec::new();
        let mut handles = Vec::new();
        let num_workers = config.num_workers.max(1);
        for worker in 0..num_workers {
            let (job_tx, job_rx) = mpsc::channel::<Job>();
            let done = done_tx.clone();
            handles.push(std::thread::spawn(move || worker_loop(worker, job_rx, done)));
            workers.push(job_tx);
        }
        let capacity = NonZeroUsize::new(config.in_memory_partitions.max(1))
            .unwrap_or(NonZeroUsize::MIN);
        // Resume ID assignment after the highest sealed partition.
        let next_event_id = highest_persisted_id(&dir, &meta)?;
        Ok(Self {
            dir,
            config,
            meta,
            active: None,
            unpersisted: Vec::new(),
            cache: LruCache::new(capacity),
            pending: HashMap::new(),
            workers,
            handles,
            idle: (0..num_workers).collect(),
            done_rx,
            next_event_id,
        })
    }

    /// The number of partitions, the active one included.
    pub fn partitions(&self) -> usize {
        self.meta.partition_count()
    }

    /// The next event ID to be assigned.
    pub fn next_event_id(&self) -> u64 {
        self.next_event_id
    }

    // -- ingest --------------------------------------------------------------

    /// Ingests a slice, assigning dense event IDs.
    ///
    /// The active partition seals when it reaches
    /// `max_partition_size` events or when the layout changes; rows
    /// spanning a seal land in the successor partition.
    pub fn ingest(&mut self, slice: &TableSlice) -> CoreResult<std::ops::Range<u64>> {
        let start = self.next_event_id;
        let mut row = 0;
        while row < slice.rows() {
            let id = start + row as u64;
            self.ensure_active(slice, id)?;
            let active = self
                .active
                .clone()
                .unwrap_or_else(|| unreachable!("ensure_active installs a partition"));
            let span_start = row;
            while row < slice.rows() && active.events() < self.config.max_partition_size {
                active.append_row(slice.row(row), start + row as u64)?;
                row += 1;
            }
            self.meta
                .add(active.id(), &slice.skip(span_start).take(row - span_start));
        }
        self.next_event_id = start + slice.rows() as u64;
        Ok(start..self.next_event_id)
    }

    fn ensure_active(&mut self, slice: &TableSlice, id: u64) -> CoreResult<()> {
        let needs_seal = self.active.as_ref().is_some_and(|active| {
            active.events() >= self.config.max_partition_size
                || active.layout() != slice.layout()
        });
        if needs_seal {
            self.seal_active()?;
        }
        if self.active.is_none() {
            let partition = Arc::new(Partition::new(Uuid::new_v4(), slice.layout(), id));
            debug!(partition = %partition.id(), base = id, "starting a new partition");
            self.active = Some(partition);
        }
        Ok(())
    }

    /// Seals and flushes the active partition.
    pub fn seal_active(&mut self) -> CoreResult<()> {
        let Some(active) = self.active.take() else {
            return Ok(());
        };
        if active.events() == 0 {
            return Ok(());
        }
        match active.flush_to_disk(&self.dir) {
            Ok(()) => {
                self.cache.put(active.id(), active);
                Ok(())
            }
            Err(e) => {
                // Keep the partition queryable; retry at next flush.
                error!(partition = %active.id(), error = %e, "partition flush failed");
                self.unpersisted.push(active);
                Err(e)
            }
        }
    }

    /// Seals the active partition and persists the meta index.
    pub fn flush(&mut self) -> CoreResult<()> {
        self.seal_active()?;
        let unpersisted = std::mem::take(&mut self.unpersisted);
        for partition in unpersisted {
            partition.flush_to_disk(&self.dir)?;
            self.cache.put(partition.id(), partition);
        }
        fs::write(self.dir.join("meta"), self.meta.encode())?;
        info!("saved meta index");
        Ok(())
    }

    // -- queries -------------------------------------------------------------

    /// Starts a query, scheduling an initial taste of candidate
    /// partitions on a worker.
    ///
    /// Per-partition results and a round-terminating
    /// [`QueryReply::Done`] arrive on `client`.
    pub fn lookup(
        &mut self,
        expr: Expression,
        client: Sender<QueryReply>,
    ) -> CoreResult<LookupSummary> {
        let expr = expr.normalize();
        let mut candidates = self.meta.lookup(&expr);
        debug!(%expr, candidates = candidates.len(), "meta index candidates");
        if candidates.is_empty() {
            return Ok(LookupSummary {
                query_id: None,
                hits: 0,
                scheduled: 0,
            });
        }
        let hits = candidates.len();
        self.prefer_resident(&mut candidates);
        let taste = hits.min(self.config.taste_partitions.max(1));
        let rest = candidates.split_off(taste.min(candidates.len()));
        let query_map = self.locate(&expr, &candidates);
        let scheduled = query_map.len();
        let query_id = if rest.is_empty() {
            None
        } else {
            let query_id = Uuid::new_v4();
            debug!(%query_id, remaining = rest.len(), "storing continuation");
            self.pending.insert(
                query_id,
                LookupState {
                    expr: expr.clone(),
                    partitions: rest,
                    client: client.clone(),
                },
            );
            Some(query_id)
        };
        self.dispatch(Job {
            expr,
            query_map,
            client,
        })?;
        Ok(LookupSummary {
            query_id,
            hits,
            scheduled,
        })
    }

    /// Schedules up to `num` more partitions for a pending query.
    ///
    /// `num == 0` cancels the query. Returns the number of partitions
    /// actually scheduled.
    pub fn continue_query(&mut self, query_id: Uuid, num: usize) -> CoreResult<usize> {
        if num == 0 {
            debug!(%query_id, "dropping remaining results");
            self.pending.remove(&query_id);
            return Ok(0);
        }
        let mut state = self
            .pending
            .remove(&query_id)
            .ok_or_else(|| CoreError::invalid_argument(format!("unknown query: {query_id}")))?;
        self.prefer_resident(&mut state.partitions);
        let take: Vec<_> = state
            .partitions
            .drain(..num.min(state.partitions.len()))
            .collect();
        let query_map = self.locate(&state.expr, &take);
        let scheduled = query_map.len();
        self.dispatch(Job {
            expr: state.expr.clone(),
            query_map,
            client: state.client.clone(),
        })?;
        if state.partitions.is_empty() {
            debug!(%query_id, "exhausted all partitions");
        } else {
            debug!(%query_id, remaining = state.partitions.len(), "partitions left");
            self.pending.insert(query_id, state);
        }
        Ok(scheduled)
    }

    /// Cancels a pending query.
    pub fn cancel(&mut self, query_id: Uuid) {
        let _ = self.continue_query(query_id, 0);
    }

    /// Stably reorders candidates so resident partitions come first.
    fn prefer_resident(&mut self, candidates: &mut Vec<Uuid>) {
        let mut resident = Vec::new();
        let mut cold = Vec::new();
        for id in candidates.drain(..) {
            let is_resident = self.cache.contains(&id)
                || self.active.as_ref().is_some_and(|p| p.id() == id)
                || self.unpersisted.iter().any(|p| p.id() == id);
            if is_resident {
                resident.push(id);
            } else {
                cold.push(id);
            }
        }
        candidates.extend(resident);
        candidates.extend(cold);
    }

    /// Resolves candidate partitions to their relevant column indexers,
    /// skipping partitions that fail to load or that no indexer covers.
    fn locate(&mut self, expr: &Expression, candidates: &[Uuid]) -> Vec<JobPartition> {
        let mut out = Vec::with_capacity(candidates.len());
        for &id in candidates {
            let partition = match self.partition_by_id(id) {
                Ok(partition) => partition,
                Err(e) => {
                    warn!(partition = %id, error = %e, "ignoring unloadable partition");
                    continue;
                }
            };
            let indexers = partition.get_indexers(expr);
            if indexers.is_empty() {
                debug!(partition = %id, "no indexer covers the expression");
                continue;
            }
            out.push(JobPartition {
                id,
                universe: partition.universe(),
                indexers,
            });
        }
        out
    }

    /// Finds a partition among the active one, the unpersisted ones,
    /// and the cache, faulting it in from disk as a last resort.
    fn partition_by_id(&mut self, id: Uuid) -> CoreResult<Arc<Partition>> {
        if let Some(active) = &self.active {
            if active.id() == id {
                return Ok(Arc::clone(active));
            }
        }
        if let Some(partition) = self.unpersisted.iter().find(|p| p.id() == id) {
            return Ok(Arc::clone(partition));
        }
        if let Some(partition) = self.cache.get(&id) {
            return Ok(Arc::clone(partition));
        }
        debug!(partition = %id, "loading partition");
        let partition = Arc::new(Partition::load(&self.dir, id)?);
        self.cache.put(id, Arc::clone(&partition));
        Ok(partition)
    }

    /// Hands a job to an idle worker, blocking until one frees up when
    /// the whole pool is busy.
    fn dispatch(&mut self, job: Job) -> CoreResult<()> {
        while let Ok(worker) = self.done_rx.try_recv() {
            self.idle.push_back(worker);
        }
        let worker = match self.idle.pop_front() {
            Some(worker) => worker,
            None => self
                .done_rx
                .recv()
                .map_err(|_| CoreError::unspecified("worker pool shut down"))?,
        };
        self.workers[worker]
            .send(job)
            .map_err(|_| CoreError::unspecified("worker unavailable"))
    }
}

impl Drop for Index {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            error!(error = %e, "failed to flush index state");
        }
        self.workers.clear();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(worker: usize, jobs: Receiver<Job>, done: Sender<usize>) {
    while let Ok(job) = jobs.recv() {
        debug!(worker, partitions = job.query_map.len(), "got a new query");
        for partition in &job.query_map {
            let ids = evaluate(&job.expr, partition);
            // A gone client means the query was abandoned; finish the
            // round regardless and return to the idle queue.
            let _ = job.client.send(QueryReply::Hits {
                partition: partition.id,
                ids,
            });
        }
        let _ = job.client.send(QueryReply::Done);
        if done.send(worker).is_err() {
            return;
        }
    }
}

/// Evaluates an expression against one partition.
///
/// A predicate's truth set is the OR across the partition's column
/// indexers; compounds combine per the AST, with negation carving out
/// of the partition's universe.
fn evaluate(expr: &Expression, partition: &JobPartition) -> EwahBitmap {
    match expr {
        Expression::Predicate(predicate) => {
            let mut result = EwahBitmap::new();
            for indexer in &partition.indexers {
                match indexer.lookup(predicate) {
                    None => {}
                    Some(Ok(hits)) => result |= &hits,
                    Some(Err(e)) => {
                        warn!(
                            column = %indexer.field().name,
                            %predicate,
                            error = %e,
                            "predicate evaluation failed"
                        );
                    }
                }
            }
            result
        }
        Expression::Conjunction(children) => {
            let mut iter = children.iter();
            let mut result = match iter.next() {
                Some(child) => evaluate(child, partition),
                None => return partition.universe.clone(),
            };
            for child in iter {
                if result.all_zeros() {
                    break;
                }
                result &= &evaluate(child, partition);
            }
            result
        }
        Expression::Disjunction(children) => {
            let mut result = EwahBitmap::new();
            for child in children {
                result |= &evaluate(child, partition);
            }
            result
        }
        Expression::Negation(child) => &partition.universe - &evaluate(child, partition),
    }
}

fn highest_persisted_id(dir: &std::path::Path, meta: &MetaIndex) -> CoreResult<u64> {
    let mut highest = 0;
    for id in meta.partition_ids() {
        match Partition::load(dir, id) {
            Ok(partition) => {
                highest = highest.max(partition.base() + partition.events());
            }
            Err(e) => warn!(partition = %id, error = %e, "cannot size partition"),
        }
    }
    Ok(highest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use spyglass_types::{parse_expression, RecordField, Type};

    fn layout() -> Type {
        Type::record(vec![
            RecordField::new("ts", Type::timestamp()),
            RecordField::new("n", Type::count()),
        ])
        .with_name("tick")
    }

    fn slice(range: std::ops::Range<u64>) -> TableSlice {
        TableSlice::new(
            layout(),
            range
                .map(|n| vec![Data::Timestamp(n as i64 * 1_000_000_000), Data::Count(n)])
                .collect(),
        )
        .unwrap()
    }

    fn small_config() -> IndexConfig {
        IndexConfig {
            max_partition_size: 4,
            in_memory_partitions: 2,
            taste_partitions: 2,
            num_workers: 2,
        }
    }

    fn collect_round(rx: &Receiver<QueryReply>) -> Vec<(Uuid, Vec<u64>)> {
        let mut out = Vec::new();
        loop {
            match rx.recv().expect("scheduler reply") {
                QueryReply::Hits { partition, ids } => {
                    out.push((partition, ids.ones().collect()))
                }
                QueryReply::Done => return out,
            }
        }
    }

    #[test]
    fn rollover_produces_dense_partitions() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = Index::open(dir.path(), small_config()).unwrap();
        index.ingest(&slice(0..10)).unwrap();
        // 10 events with max_partition_size 4: bases 0, 4, 8.
        assert_eq!(index.partitions(), 3);
        let active = index.active.as_ref().unwrap();
        assert_eq!(active.base(), 8);
        assert_eq!(active.events(), 2);
    }

    #[test]
    fn lookup_streams_partition_hits() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = Index::open(dir.path(), small_config()).unwrap();
        index.ingest(&slice(0..8)).unwrap();
        let (tx, rx) = mpsc::channel();
        let expr = parse_expression("n >= 2 && n <= 5").unwrap();
        let summary = index.lookup(expr, tx).unwrap();
        assert_eq!(summary.hits, 2);
        assert_eq!(summary.scheduled, 2);
        assert_eq!(summary.query_id, None);
        let mut ids: Vec<u64> = collect_round(&rx)
            .into_iter()
            .flat_map(|(_, ids)| ids)
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![2, 3, 4, 5]);
    }

    #[test]
    fn empty_candidate_set_returns_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = Index::open(dir.path(), small_config()).unwrap();
        index.ingest(&slice(0..4)).unwrap();
        let (tx, rx) = mpsc::channel();
        let expr = parse_expression("&time > 2030-01-01").unwrap();
        let summary = index.lookup(expr, tx).unwrap();
        assert_eq!(
            summary,
            LookupSummary {
                query_id: None,
                hits: 0,
                scheduled: 0
            }
        );
        // The scheduler holds no sender; the stream ends.
        assert!(rx.recv().is_err());
    }

    #[test]
    fn taste_and_continuation() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = Index::open(dir.path(), small_config()).unwrap();
        index.ingest(&slice(0..20)).unwrap();
        index.flush().unwrap();
        // 5 partitions, taste 2.
        let (tx, rx) = mpsc::channel();
        let expr = parse_expression("n >= 0").unwrap();
        let summary = index.lookup(expr, tx).unwrap();
        assert_eq!(summary.hits, 5);
        assert_eq!(summary.scheduled, 2);
        let query_id = summary.query_id.expect("continuation handle");

        let mut seen: Vec<(Uuid, Vec<u64>)> = collect_round(&rx);
        assert_eq!(seen.len(), 2);
        assert_eq!(index.continue_query(query_id, 2).unwrap(), 2);
        seen.extend(collect_round(&rx));
        assert_eq!(index.continue_query(query_id, 2).unwrap(), 1);
        seen.extend(collect_round(&rx));
        assert_eq!(seen.len(), 5);
        let mut all: Vec<u64> = seen.into_iter().flat_map(|(_, ids)| ids).collect();
        all.sort_unstable();
        assert_eq!(all, (0..20).collect::<Vec<_>>());
        // The query is exhausted.
        assert!(index.continue_query(query_id, 1).is_err());
    }

    #[test]
    fn cancellation_drops_pending_partitions() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = Index::open(dir.path(), small_config()).unwrap();
        index.ingest(&slice(0..20)).unwrap();
        let (tx, rx) = mpsc::channel();
        let summary = index
            .lookup(parse_expression("n >= 0").unwrap(), tx)
            .unwrap();
        let query_id = summary.query_id.unwrap();
        collect_round(&rx);
        index.cancel(query_id);
        assert!(index.continue_query(query_id, 1).is_err());
    }

    #[test]
    fn within_partition_results_are_id_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = Index::open(dir.path(), small_config()).unwrap();
        index.ingest(&slice(0..4)).unwrap();
        let (tx, rx) = mpsc::channel();
        index
            .lookup(parse_expression("n >= 0").unwrap(), tx)
            .unwrap();
        for (_, ids) in collect_round(&rx) {
            let mut sorted = ids.clone();
            sorted.sort_unstable();
            assert_eq!(ids, sorted);
        }
    }

    #[test]
    fn negated_compounds_normalize_before_scheduling() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = Index::open(dir.path(), small_config()).unwrap();
        index.ingest(&slice(0..4)).unwrap();
        let (tx, rx) = mpsc::channel();
        // Double negation through a compound keeps one negation node.
        let expr = parse_expression("! (n < 2 || n > 2)").unwrap();
        index.lookup(expr, tx).unwrap();
        let ids: Vec<u64> = collect_round(&rx)
            .into_iter()
            .flat_map(|(_, ids)| ids)
            .collect();
        assert_eq!(ids, vec![2]);
    }

    #[test]
    fn queries_survive_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut index = Index::open(dir.path(), small_config()).unwrap();
            index.ingest(&slice(0..8)).unwrap();
        }
        let mut index = Index::open(dir.path(), small_config()).unwrap();
        assert_eq!(index.next_event_id(), 8);
        let (tx, rx) = mpsc::channel();
        let summary = index
            .lookup(parse_expression("n == 6").unwrap(), tx)
            .unwrap();
        assert_eq!(summary.hits, 2);
        let ids: Vec<u64> = collect_round(&rx)
            .into_iter()
            .flat_map(|(_, ids)| ids)
            .collect();
        assert_eq!(ids, vec![6]);
    }
}
