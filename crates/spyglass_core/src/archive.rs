//! The archive: segment files on disk behind an LRU cache.

use crate::bitmap::EwahBitmap;
use crate::config::ArchiveConfig;
use crate::error::{CoreError, CoreResult};
use crate::segment::{Segment, SegmentReader};
use lru::LruCache;
use parking_lot::Mutex;
use spyglass_types::Event;
use std::collections::HashMap;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// The ID interval covered by one stored segment.
#[derive(Debug, Clone, Copy)]
struct SegmentRange {
    base: u64,
    events: u32,
    id: Uuid,
}

impl SegmentRange {
    fn contains(&self, id: u64) -> bool {
        self.base <= id && id < self.base + u64::from(self.events)
    }
}

/// Stores finalized segments under `<dir>/<uuid>` and serves events by
/// ID through a bounded cache of decompressed segments.
///
/// Eviction is strict LRU; loads are serialized, so concurrent misses
/// for one segment materialize it at most once.
pub struct Archive {
    dir: PathBuf,
    files: HashMap<Uuid, PathBuf>,
    /// Segment ranges, sorted by base.
    ranges: Vec<SegmentRange>,
    cache: Mutex<LruCache<Uuid, Arc<Segment>>>,
}

impl Archive {
    /// Opens an archive directory, scanning any existing segment files.
    pub fn open(dir: impl Into<PathBuf>, config: &ArchiveConfig) -> CoreResult<Self> {
        let dir = dir.into();
        let capacity = NonZeroUsize::new(config.segment_cache_capacity.max(1))
            .unwrap_or(NonZeroUsize::MIN);
        let mut archive = Self {
            dir: dir.clone(),
            files: HashMap::new(),
            ranges: Vec::new(),
            cache: Mutex::new(LruCache::new(capacity)),
        };
        if !dir.exists() {
            info!(dir = %dir.display(), "creating archive directory");
            fs::create_dir_all(&dir)?;
            return Ok(archive);
        }
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            match archive.scan_file(&path) {
                Ok(id) => debug!(segment = %id, "found segment"),
                Err(e) => warn!(file = %path.display(), error = %e, "skipping file"),
            }
        }
        archive.ranges.sort_by_key(|r| r.base);
        if archive.files.is_empty() {
            info!(dir = %dir.display(), "no segments found");
        }
        Ok(archive)
    }

    fn scan_file(&mut self, path: &Path) -> CoreResult<Uuid> {
        let bytes = fs::read(path)?;
        let (id, base, events) = Segment::read_header(&bytes)?;
        self.files.insert(id, path.to_path_buf());
        self.ranges.push(SegmentRange { base, events, id });
        Ok(id)
    }

    /// The number of stored segments.
    pub fn segments(&self) -> usize {
        self.files.len()
    }

    /// Persists a finalized segment and makes it retrievable.
    pub fn store(&mut self, segment: Segment) -> CoreResult<()> {
        let id = segment.id();
        debug_assert!(!self.files.contains_key(&id));
        let path = self.dir.join(id.to_string());
        fs::write(&path, segment.encode())?;
        debug!(segment = %id, path = %path.display(), "wrote segment");
        self.files.insert(id, path);
        let range = SegmentRange {
            base: segment.base(),
            events: segment.events(),
            id,
        };
        let at = self.ranges.partition_point(|r| r.base < range.base);
        self.ranges.insert(at, range);
        self.cache.lock().put(id, Arc::new(segment));
        Ok(())
    }

    /// Cache-aware segment load.
    ///
    /// A failed load retires the segment from the cache and surfaces the
    /// error.
    pub fn retrieve(&self, id: Uuid) -> CoreResult<Arc<Segment>> {
        let mut cache = self.cache.lock();
        if let Some(segment) = cache.get(&id) {
            return Ok(Arc::clone(segment));
        }
        let path = self
            .files
            .get(&id)
            .ok_or_else(|| CoreError::invalid_argument(format!("unknown segment: {id}")))?;
        debug!(segment = %id, "cache miss, loading segment");
        let load = || -> CoreResult<Segment> { Segment::decode(&fs::read(path)?) };
        match load() {
            Ok(segment) => {
                let segment = Arc::new(segment);
                cache.put(id, Arc::clone(&segment));
                Ok(segment)
            }
            Err(e) => {
                cache.pop(&id);
                Err(e)
            }
        }
    }

    /// Materializes all events whose IDs are set in the bitmap.
    ///
    /// IDs owned by no segment are treated as absent; a segment that
    /// fails to read is skipped after being retired from the cache.
    pub fn extract(&self, ids: &EwahBitmap) -> CoreResult<Vec<Event>> {
        let mut out = Vec::new();
        let mut current: Option<(SegmentRange, Arc<Segment>)> = None;
        let mut pending: Vec<u64> = Vec::new();
        let flush =
            |range: &SegmentRange, segment: &Arc<Segment>, ids: &[u64], out: &mut Vec<Event>| {
                let mut reader = SegmentReader::new(segment);
                for &id in ids {
                    match reader.seek(id).and_then(|()| reader.read()) {
                        Ok(Some(event)) => out.push(event),
                        Ok(None) => warn!(segment = %range.id, id, "event missing"),
                        Err(e) => {
                            warn!(segment = %range.id, error = %e, "segment read failed");
                            self.cache.lock().pop(&range.id);
                            return;
                        }
                    }
                }
            };
        for id in ids.ones() {
            let owner = self.owner_of(id);
            match (&current, owner) {
                (Some((range, _)), Some(next)) if range.id == next.id => pending.push(id),
                (_, Some(next)) => {
                    if let Some((range, segment)) = current.take() {
                        flush(&range, &segment, &pending, &mut out);
                        pending.clear();
                    }
                    match self.retrieve(next.id) {
                        Ok(segment) => {
                            current = Some((next, segment));
                            pending.push(id);
                        }
                        Err(e) => {
                            warn!(segment = %next.id, error = %e, "segment unavailable");
                        }
                    }
                }
                (_, None) => debug!(id, "no segment owns event"),
            }
        }
        if let Some((range, segment)) = current.take() {
            flush(&range, &segment, &pending, &mut out);
        }
        Ok(out)
    }

    fn owner_of(&self, id: u64) -> Option<SegmentRange> {
        let at = self.ranges.partition_point(|r| r.base <= id);
        at.checked_sub(1)
            .map(|i| self.ranges[i])
            .filter(|r| r.contains(id))
    }
}
