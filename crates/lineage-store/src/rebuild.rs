//! Explicit index verification and reconstruction from primary records.

use std::collections::{BTreeMap, BTreeSet};

use lineage_core::errors::{ErrorInfo, LineageError};
use lineage_core::ids::ObjectId;
use lineage_core::model::{Activity, CompositePlan, Dataset, Entity, Plan};
use lineage_core::record::{IndexEntry, Record, RecordKind};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::index::{Direction, IndexCache, IndexDrift, IndexReport, Shard, ShardRef};
use crate::object_store::ObjectStore;

impl ObjectStore {
    /// Compares stored index shards with those implied by primary records.
    ///
    /// Nothing is written; drift is reported and logged.
    pub fn verify_indices(&self) -> Result<IndexReport, LineageError> {
        let (records, expected) = self.expected_indices()?;
        let mut addresses: BTreeSet<ShardRef> = expected.keys().cloned().collect();
        addresses.extend(self.stored_shards()?);

        let mut report = IndexReport {
            records,
            ..IndexReport::default()
        };
        for at in addresses {
            let want: BTreeSet<(String, ObjectId)> = expected
                .get(&at)
                .map(|shard| shard.pairs().into_iter().collect())
                .unwrap_or_default();
            let have: BTreeSet<(String, ObjectId)> =
                self.with_shard(&at, |shard| shard.pairs().into_iter().collect())?;
            let location = at.location();
            report.missing.extend(want.difference(&have).map(|(key, value)| IndexDrift {
                location: location.clone(),
                key: key.clone(),
                value: value.clone(),
            }));
            report.unexpected.extend(have.difference(&want).map(|(key, value)| IndexDrift {
                location: location.clone(),
                key: key.clone(),
                value: value.clone(),
            }));
        }
        if !report.is_clean() {
            warn!(
                dir = %self.layout().dir().display(),
                missing = report.missing.len(),
                unexpected = report.unexpected.len(),
                "index drift detected"
            );
        }
        Ok(report)
    }

    /// Discards every index shard and stages fresh ones built from primary records.
    ///
    /// Returns the drift found before rebuilding. The rebuilt shards reach disk
    /// with the next commit.
    pub fn rebuild_indices(&mut self) -> Result<IndexReport, LineageError> {
        let report = self.verify_indices()?;
        let (_, mut shards) = self.expected_indices()?;
        for at in self.stored_shards()? {
            let empty = Shard::empty(&at);
            shards.entry(at).or_insert(empty);
        }
        let written = shards.len();
        let indices = self.indices_mut();
        indices.clear();
        for (at, shard) in shards {
            indices.replace(at, shard);
        }
        info!(
            dir = %self.layout().dir().display(),
            records = report.records,
            shards = written,
            missing = report.missing.len(),
            unexpected = report.unexpected.len(),
            "rebuilt indices from primary records"
        );
        Ok(report)
    }

    fn expected_indices(&self) -> Result<(usize, BTreeMap<ShardRef, Shard>), LineageError> {
        let buckets = self.layout().buckets();
        let mut expected = IndexCache::default();
        let mut records = 0;
        for kind in RecordKind::PRIMARY {
            for id in self.ids(kind)? {
                for entry in self.index_entries_of(kind, &id)? {
                    expected.apply(&entry, buckets, |at| Ok(Shard::empty(at)))?;
                }
                records += 1;
            }
        }
        Ok((records, expected.into_shards()))
    }

    fn index_entries_of(&self, kind: RecordKind, id: &ObjectId) -> Result<Vec<IndexEntry>, LineageError> {
        Ok(match kind {
            RecordKind::Entity => self.get::<Entity>(id)?.index_entries(),
            RecordKind::Plan => self.get::<Plan>(id)?.index_entries(),
            RecordKind::Composite => self.get::<CompositePlan>(id)?.index_entries(),
            RecordKind::Activity => self.get::<Activity>(id)?.index_entries(),
            RecordKind::Dataset => self.get::<Dataset>(id)?.index_entries(),
            RecordKind::Root | RecordKind::OrderedShard | RecordKind::RelationShard => Vec::new(),
        })
    }

    /// Addresses of every shard file currently on disk.
    fn stored_shards(&self) -> Result<Vec<ShardRef>, LineageError> {
        let dir = self.layout().indices_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut found = Vec::new();
        for entry in WalkDir::new(&dir).min_depth(2).max_depth(3) {
            let entry = entry.map_err(|err| {
                LineageError::Io(
                    ErrorInfo::new("index-scan", err.to_string()).with_context("path", dir.display()),
                )
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = self.layout().relative(entry.path());
            if let Some(at) = parse_location(relative.trim_start_matches("indices/")) {
                found.push(at);
            }
        }
        Ok(found)
    }
}

fn parse_location(location: &str) -> Option<ShardRef> {
    let parts: Vec<&str> = location.split('/').collect();
    match parts.as_slice() {
        [index, bucket] => Some(ShardRef::Ordered {
            index: index.to_string(),
            bucket: u16::from_str_radix(bucket, 16).ok()?,
        }),
        [index, direction, bucket] => Some(ShardRef::Relation {
            index: index.to_string(),
            direction: match *direction {
                "forward" => Direction::Forward,
                "reverse" => Direction::Reverse,
                _ => return None,
            },
            bucket: u16::from_str_radix(bucket, 16).ok()?,
        }),
        _ => None,
    }
}
