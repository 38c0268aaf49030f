//! Write-ahead marker of in-flight downloads, one file per query cache.
//!
//! The marker is written before a transfer starts and removed only after the
//! page loop finishes. A marker found at startup names assets that may be
//! partial, whichever query they belonged to.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;

use camino::Utf8PathBuf;

use crate::domain::RecordId;
use crate::error::CantoError;
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct ProgressMarker {
    path: Utf8PathBuf,
}

impl ProgressMarker {
    pub fn for_cache(store: &Store, key: &str) -> Self {
        Self {
            path: store.marker_path(key),
        }
    }

    pub fn path(&self) -> &Utf8PathBuf {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.as_std_path().is_file()
    }

    /// Identifiers named by the marker, or `None` when there is no marker.
    pub fn read(&self) -> Result<Option<BTreeSet<RecordId>>, CantoError> {
        let content = match fs::read_to_string(self.path.as_std_path()) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(CantoError::Filesystem(format!("read {}: {err}", self.path)));
            }
        };
        let mut ids = BTreeSet::new();
        for line in content.lines().map(str::trim).filter(|line| !line.is_empty()) {
            let id = line.parse::<RecordId>().map_err(|_| {
                CantoError::Consistency(format!("marker {} holds {line:?}", self.path))
            })?;
            ids.insert(id);
        }
        Ok(Some(ids))
    }

    /// Replaces the marker content with `ids`, one decimal identifier per line.
    pub fn write<I>(&self, ids: I) -> Result<(), CantoError>
    where
        I: IntoIterator<Item = RecordId>,
    {
        let mut content = String::new();
        for id in ids {
            content.push_str(&id.to_string());
            content.push('\n');
        }
        Store::write_bytes_atomic(&self.path, content.as_bytes())
    }

    /// Returns whether a marker was present.
    pub fn clear(&self) -> Result<bool, CantoError> {
        match fs::remove_file(self.path.as_std_path()) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(CantoError::Filesystem(format!("remove {}: {err}", self.path))),
        }
    }

    /// Drops one identifier; the file goes away with its last entry.
    pub fn discharge(&self, id: RecordId) -> Result<(), CantoError> {
        let Some(mut ids) = self.read()? else {
            return Ok(());
        };
        if !ids.remove(&id) {
            return Ok(());
        }
        if ids.is_empty() {
            self.clear().map(|_| ())
        } else {
            self.write(ids)
        }
    }
}

/// Suspect identifiers gathered from every dangling marker in the dataset.
#[derive(Debug, Clone, Default)]
pub struct RedownloadSet {
    entries: BTreeMap<RecordId, Vec<String>>,
}

impl RedownloadSet {
    pub fn collect(store: &Store) -> Result<Self, CantoError> {
        let mut entries: BTreeMap<RecordId, Vec<String>> = BTreeMap::new();
        for key in store.list_query_keys()? {
            let Some(ids) = ProgressMarker::for_cache(store, &key).read()? else {
                continue;
            };
            if !ids.is_empty() {
                tracing::info!(cache = %key, count = ids.len(), "found interrupted download marker");
            }
            for id in ids {
                entries.entry(id).or_default().push(key.clone());
            }
        }
        Ok(Self { entries })
    }

    pub fn contains(&self, id: RecordId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Suspects that came from `key`'s own marker and are still unconfirmed.
    /// Every rewrite of that marker must keep naming them.
    pub fn pending_for<'s>(&'s self, key: &'s str) -> impl Iterator<Item = RecordId> + 's {
        self.entries
            .iter()
            .filter(move |(_, origins)| origins.iter().any(|origin| origin == key))
            .map(|(id, _)| *id)
    }

    /// After a confirmed re-fetch, removes `id` from markers owned by other
    /// queries. The current query's marker is managed by its own page loop.
    pub fn discharge(
        &mut self,
        store: &Store,
        id: RecordId,
        current_key: &str,
    ) -> Result<(), CantoError> {
        let Some(origins) = self.entries.remove(&id) else {
            return Ok(());
        };
        for key in origins.iter().filter(|key| key.as_str() != current_key) {
            ProgressMarker::for_cache(store, key).discharge(id)?;
        }
        Ok(())
    }
}
