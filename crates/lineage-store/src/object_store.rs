//! Typed persistence of records with staged writes and journaled commits.

use std::any::Any;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use lineage_codec::{RawRecord, RecordCodec};
use lineage_core::errors::{ErrorInfo, LineageError};
use lineage_core::ids::{bucket_of, ObjectId};
use lineage_core::record::{IndexKind, Record, RecordKind};
use tracing::{debug, info, trace};
use walkdir::WalkDir;

use crate::index::{Direction, IndexCache, OrderedShard, RelationShard, Shard, ShardRef};
use crate::journal::{write_synced, Journal, PendingRename};
use crate::layout::StoreLayout;
use crate::root::{catalog, RootRecord};

type CachedRecord = Arc<dyn Any + Send + Sync>;

struct StagedObject {
    kind: RecordKind,
    bytes: Vec<u8>,
    record: CachedRecord,
}

/// What a [`ObjectStore::commit`] wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    /// Primary records written.
    pub objects: usize,
    /// Index shards written.
    pub shards: usize,
    /// Whether the root record was rewritten.
    pub root: bool,
}

impl CommitSummary {
    /// Whether the commit had nothing to write.
    pub fn is_empty(&self) -> bool {
        self.objects == 0 && self.shards == 0 && !self.root
    }
}

/// Session-scoped view of a metadata directory.
///
/// Reads consult the session cache, then staged writes, then disk. Writes are
/// staged in memory together with the index entries they imply and reach disk
/// only through [`ObjectStore::commit`]. Dropping the store without committing
/// discards everything staged.
pub struct ObjectStore {
    layout: StoreLayout,
    codec: RecordCodec,
    root: RootRecord,
    committed_root: RootRecord,
    root_dirty: bool,
    cache: RefCell<HashMap<ObjectId, CachedRecord>>,
    staged: BTreeMap<ObjectId, StagedObject>,
    indices: RefCell<IndexCache>,
}

impl std::fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStore")
            .field("dir", &self.layout.dir())
            .field("schema_version", &self.root.schema_version)
            .field("staged", &self.staged.len())
            .finish_non_exhaustive()
    }
}

impl ObjectStore {
    /// Starts a store whose root has not been written yet.
    pub fn create(layout: StoreLayout, codec: RecordCodec, root: RootRecord) -> Self {
        let layout = layout.with_buckets(root.shard_buckets);
        Self {
            layout,
            codec,
            committed_root: root.clone(),
            root,
            root_dirty: true,
            cache: RefCell::new(HashMap::new()),
            staged: Default::default(),
            indices: RefCell::new(IndexCache::default()),
        }
    }

    /// Opens an initialised metadata directory.
    pub fn open(layout: StoreLayout, codec: RecordCodec) -> Result<Self, LineageError> {
        let path = layout.root_path();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(LineageError::NotFound(
                    ErrorInfo::new("not-initialized", "no metadata store at this location")
                        .with_context("path", layout.dir().display())
                        .with_hint("initialise the project first"),
                ))
            }
            Err(err) => return Err(LineageError::io("root-read", &path, err)),
        };
        let root: RootRecord = codec.decode(&bytes)?;
        let layout = layout.with_buckets(root.shard_buckets);
        debug!(dir = %layout.dir().display(), version = root.schema_version, "opened object store");
        Ok(Self {
            layout,
            codec,
            committed_root: root.clone(),
            root,
            root_dirty: false,
            cache: RefCell::new(HashMap::new()),
            staged: Default::default(),
            indices: RefCell::new(IndexCache::default()),
        })
    }

    /// Layout the store reads and writes.
    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    /// Codec used for new writes.
    pub fn codec(&self) -> RecordCodec {
        self.codec
    }

    /// Root record as seen by this session.
    pub fn root(&self) -> &RootRecord {
        &self.root
    }

    /// Schema version as seen by this session.
    pub fn schema_version(&self) -> u32 {
        self.root.schema_version
    }

    /// Stages a new schema version marker.
    pub fn set_schema_version(&mut self, version: u32) {
        self.root.schema_version = version;
        self.root_dirty = true;
    }

    /// Resets the index catalog to the one this build maintains.
    pub fn refresh_catalog(&mut self) {
        let fresh = catalog(self.root.shard_buckets);
        if self.root.indices != fresh {
            self.root.indices = fresh;
            self.root_dirty = true;
        }
    }

    /// Loads a record.
    ///
    /// Fails with `NotFound` when the id is unknown and `CorruptRecord` when the
    /// stored bytes do not decode as `T`.
    pub fn get<T: Record>(&self, id: &ObjectId) -> Result<T, LineageError> {
        if let Some(cached) = self.cache.borrow().get(id) {
            return downcast::<T>(cached, id);
        }
        if let Some(staged) = self.staged.get(id) {
            return downcast::<T>(&staged.record, id);
        }
        let kind = id.kind().unwrap_or(T::KIND);
        let path = self.layout.object_path(kind, id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Err(not_found(kind, id)),
            Err(err) => return Err(LineageError::io("object-read", &path, err)),
        };
        let record: T = self.codec.decode(&bytes)?;
        debug!(id = %id, kind = T::KIND.as_str(), "loaded record from disk");
        self.cache
            .borrow_mut()
            .insert(id.clone(), Arc::new(record.clone()));
        Ok(record)
    }

    /// Like [`ObjectStore::get`] but maps `NotFound` to `None`.
    pub fn try_get<T: Record>(&self, id: &ObjectId) -> Result<Option<T>, LineageError> {
        match self.get(id) {
            Ok(record) => Ok(Some(record)),
            Err(LineageError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Loads a record without a typed target.
    pub fn get_raw(&self, kind: RecordKind, id: &ObjectId) -> Result<RawRecord, LineageError> {
        match self.stored_bytes(kind, id)? {
            Some(bytes) => self.codec.decode_any(&bytes),
            None => Err(not_found(kind, id)),
        }
    }

    /// Whether a record with this id exists, staged or on disk.
    pub fn contains(&self, id: &ObjectId) -> Result<bool, LineageError> {
        if self.staged.contains_key(id) || self.cache.borrow().contains_key(id) {
            return Ok(true);
        }
        Ok(match id.kind() {
            Some(kind) => self.layout.object_path(kind, id).is_file(),
            None => false,
        })
    }

    /// Every id of a kind, staged or on disk, sorted.
    pub fn ids(&self, kind: RecordKind) -> Result<Vec<ObjectId>, LineageError> {
        let mut ids: BTreeSet<ObjectId> = self
            .staged
            .iter()
            .filter(|(_, staged)| staged.kind == kind)
            .map(|(id, _)| id.clone())
            .collect();
        let dir = self.layout.kind_dir(kind);
        if dir.is_dir() {
            for entry in WalkDir::new(&dir).min_depth(2).max_depth(2) {
                let entry = entry.map_err(|err| {
                    LineageError::Io(
                        ErrorInfo::new("object-scan", err.to_string())
                            .with_context("path", dir.display()),
                    )
                })?;
                if entry.file_type().is_file() {
                    ids.insert(ObjectId::singleton(&entry.file_name().to_string_lossy()));
                }
            }
        }
        Ok(ids.into_iter().collect())
    }

    /// Stages a primary record and the index entries it declares.
    ///
    /// Records are append-only: storing an id again with identical content is
    /// a no-op, with different content a `Conflict`.
    pub fn put<T: Record>(&mut self, record: T) -> Result<ObjectId, LineageError> {
        if !RecordKind::PRIMARY.contains(&T::KIND) {
            return Err(LineageError::InvalidInput(
                ErrorInfo::new("not-a-primary-record", "only primary records can be stored")
                    .with_context("kind", T::KIND.as_str()),
            ));
        }
        let id = record.id().clone();
        let bytes = self.codec.encode(&record)?;
        if let Some(existing) = self.stored_bytes(T::KIND, &id)? {
            if existing == bytes || self.same_content(&existing, &bytes)? {
                trace!(id = %id, "record already stored");
                return Ok(id);
            }
            return Err(LineageError::Conflict(
                ErrorInfo::new("immutable-record", "record already exists with different content")
                    .with_context("id", &id)
                    .with_context("kind", T::KIND.as_str()),
            ));
        }
        let entries = record.index_entries();
        {
            let layout = &self.layout;
            let codec = self.codec;
            let mut indices = self.indices.borrow_mut();
            for entry in &entries {
                indices.apply(entry, layout.buckets(), |at| load_shard(layout, codec, at))?;
            }
        }
        self.staged.insert(
            id.clone(),
            StagedObject {
                kind: T::KIND,
                bytes,
                record: Arc::new(record),
            },
        );
        Ok(id)
    }

    /// Whether anything awaits a commit.
    pub fn has_pending(&self) -> bool {
        !self.staged.is_empty() || self.root_dirty || self.indices.borrow().has_dirty()
    }

    /// Writes staged records, dirty index shards and the root.
    ///
    /// Every payload is encoded and written to `tmp/` before anything is moved
    /// into place; the journal then makes the renames replayable. Objects are
    /// renamed first, index shards next, the root last.
    pub fn commit(&mut self) -> Result<CommitSummary, LineageError> {
        let mut payloads: Vec<(PathBuf, Vec<u8>)> = self
            .staged
            .iter()
            .map(|(id, staged)| (self.layout.object_path(staged.kind, id), staged.bytes.clone()))
            .collect();
        let objects = payloads.len();
        for (at, shard) in self.indices.borrow().dirty() {
            let bytes = match shard {
                Shard::Ordered(shard) => self.codec.encode(shard)?,
                Shard::Relation(shard) => self.codec.encode(shard)?,
            };
            payloads.push((self.layout.index_path(&at.location()), bytes));
        }
        let shards = payloads.len() - objects;
        if self.root_dirty {
            payloads.push((self.layout.root_path(), self.codec.encode(&self.root)?));
        }
        let summary = CommitSummary {
            objects,
            shards,
            root: self.root_dirty,
        };
        if summary.is_empty() {
            return Ok(summary);
        }

        let mut journal = Journal::new();
        let tag: u64 = rand::random();
        for (seq, (target, bytes)) in payloads.iter().enumerate() {
            let scratch = self.layout.tmp_dir().join(format!("{tag:016x}-{seq:06}"));
            journal.renames.push(PendingRename {
                from: self.layout.relative(&scratch),
                to: self.layout.relative(target),
            });
            if let Err(err) = write_synced(&scratch, bytes) {
                discard_scratch(&self.layout, &journal);
                return Err(err);
            }
        }
        if let Err(err) = journal.persist(&self.layout) {
            discard_scratch(&self.layout, &journal);
            return Err(err);
        }
        journal.apply(&self.layout)?;
        Journal::clear(&self.layout)?;

        let staged = std::mem::take(&mut self.staged);
        let cache = self.cache.get_mut();
        for (id, object) in staged {
            cache.insert(id, object.record);
        }
        self.indices.get_mut().mark_clean();
        self.committed_root = self.root.clone();
        self.root_dirty = false;
        info!(
            dir = %self.layout.dir().display(),
            objects = summary.objects,
            shards = summary.shards,
            root = summary.root,
            "committed metadata"
        );
        Ok(summary)
    }

    /// Discards everything staged since the last commit.
    pub fn rollback(&mut self) {
        let discarded = self.staged.len();
        self.staged.clear();
        self.indices.get_mut().clear();
        self.root = self.committed_root.clone();
        self.root_dirty = false;
        if discarded > 0 {
            debug!(discarded, "rolled back staged records");
        }
    }

    /// Ids stored under exactly `key` in an ordered index.
    pub fn lookup(&self, index: &str, key: &str) -> Result<Vec<ObjectId>, LineageError> {
        self.require_index(index, IndexKind::Ordered)?;
        let at = ShardRef::Ordered {
            index: index.to_string(),
            bucket: bucket_of(key, self.layout.buckets()),
        };
        self.with_shard(&at, |shard| match shard {
            Shard::Ordered(shard) => shard.get(key).cloned().collect(),
            Shard::Relation(_) => Vec::new(),
        })
    }

    /// Entries with `lo <= key < hi` in key order; an empty `hi` is unbounded.
    pub fn range(
        &self,
        index: &str,
        lo: &str,
        hi: &str,
    ) -> Result<Vec<(String, ObjectId)>, LineageError> {
        self.scan_ordered(index, |shard| {
            shard
                .range(lo, hi)
                .map(|(key, id)| (key.clone(), id.clone()))
                .collect()
        })
    }

    /// Entries whose key starts with `prefix`, in key order.
    pub fn prefix(&self, index: &str, prefix: &str) -> Result<Vec<(String, ObjectId)>, LineageError> {
        self.scan_ordered(index, |shard| {
            shard
                .prefix(prefix)
                .map(|(key, id)| (key.clone(), id.clone()))
                .collect()
        })
    }

    /// Right-hand neighbours of `left` in a relation index.
    pub fn targets(&self, index: &str, left: &ObjectId) -> Result<Vec<ObjectId>, LineageError> {
        self.neighbours(index, Direction::Forward, left)
    }

    /// Left-hand neighbours of `right` in a relation index.
    pub fn sources(&self, index: &str, right: &ObjectId) -> Result<Vec<ObjectId>, LineageError> {
        self.neighbours(index, Direction::Reverse, right)
    }

    fn neighbours(
        &self,
        index: &str,
        direction: Direction,
        node: &ObjectId,
    ) -> Result<Vec<ObjectId>, LineageError> {
        self.require_index(index, IndexKind::Relation)?;
        let at = ShardRef::Relation {
            index: index.to_string(),
            direction,
            bucket: bucket_of(node.as_str(), self.layout.buckets()),
        };
        self.with_shard(&at, |shard| match shard {
            Shard::Relation(shard) => shard.neighbours(node).cloned().collect(),
            Shard::Ordered(_) => Vec::new(),
        })
    }

    fn scan_ordered<F>(&self, index: &str, mut collect: F) -> Result<Vec<(String, ObjectId)>, LineageError>
    where
        F: FnMut(&OrderedShard) -> Vec<(String, ObjectId)>,
    {
        self.require_index(index, IndexKind::Ordered)?;
        let mut merged = Vec::new();
        for bucket in 0..self.layout.buckets() {
            let at = ShardRef::Ordered {
                index: index.to_string(),
                bucket,
            };
            merged.extend(self.with_shard(&at, |shard| match shard {
                Shard::Ordered(shard) => collect(shard),
                Shard::Relation(_) => Vec::new(),
            })?);
        }
        merged.sort();
        Ok(merged)
    }

    pub(crate) fn with_shard<R>(
        &self,
        at: &ShardRef,
        read: impl FnOnce(&Shard) -> R,
    ) -> Result<R, LineageError> {
        let mut indices = self.indices.borrow_mut();
        let shard = indices.shard(at, |at| load_shard(&self.layout, self.codec, at))?;
        Ok(read(shard))
    }

    pub(crate) fn indices_mut(&mut self) -> &mut IndexCache {
        self.indices.get_mut()
    }

    fn require_index(&self, index: &str, kind: IndexKind) -> Result<(), LineageError> {
        match self.root.index_kind(index) {
            Some(found) if found == kind => Ok(()),
            _ => Err(LineageError::InvalidInput(
                ErrorInfo::new("unknown-index", "index is not in the catalog")
                    .with_context("index", index),
            )),
        }
    }

    fn stored_bytes(&self, kind: RecordKind, id: &ObjectId) -> Result<Option<Vec<u8>>, LineageError> {
        if let Some(staged) = self.staged.get(id) {
            return Ok(Some(staged.bytes.clone()));
        }
        let path = self.layout.object_path(kind, id);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(LineageError::io("object-read", &path, err)),
        }
    }

    fn same_content(&self, left: &[u8], right: &[u8]) -> Result<bool, LineageError> {
        Ok(self.codec.decode_any(left)?.value == self.codec.decode_any(right)?.value)
    }
}

pub(crate) fn load_shard(
    layout: &StoreLayout,
    codec: RecordCodec,
    at: &ShardRef,
) -> Result<Shard, LineageError> {
    let path = layout.index_path(&at.location());
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Shard::empty(at)),
        Err(err) => return Err(LineageError::io("shard-read", &path, err)),
    };
    let shard = match at {
        ShardRef::Ordered { .. } => Shard::Ordered(codec.decode::<OrderedShard>(&bytes)?),
        ShardRef::Relation { .. } => Shard::Relation(codec.decode::<RelationShard>(&bytes)?),
    };
    debug!(shard = %at.location(), "loaded index shard");
    Ok(shard)
}

fn downcast<T: Record>(cached: &CachedRecord, id: &ObjectId) -> Result<T, LineageError> {
    cached.downcast_ref::<T>().cloned().ok_or_else(|| {
        LineageError::CorruptRecord(
            ErrorInfo::new("kind-mismatch", "record is of a different kind")
                .with_context("id", id)
                .with_context("expected", T::KIND.as_str()),
        )
    })
}

fn not_found(kind: RecordKind, id: &ObjectId) -> LineageError {
    LineageError::NotFound(
        ErrorInfo::new("object-not-found", "no record with this id")
            .with_context("id", id)
            .with_context("kind", kind.as_str()),
    )
}

fn discard_scratch(layout: &StoreLayout, journal: &Journal) {
    for rename in &journal.renames {
        let _ = fs::remove_file(layout.absolute(&rename.from));
    }
}
