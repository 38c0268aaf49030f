use std::collections::BTreeSet;
use std::fs::{self, DirEntry, ReadDir};
use std::io;

use camino::Utf8PathBuf;
use serde::Serialize;

use crate::domain::RecordId;
use crate::error::CantoError;
use crate::store::{Store, is_hidden};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetEntry {
    pub category: String,
    pub id: RecordId,
    pub extension: String,
    pub path: Utf8PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategorySummary {
    pub name: String,
    pub assets: usize,
}

/// Read-only view over `audio/<category>/<id>.<ext>`. Listing order follows
/// the filesystem and carries no meaning.
pub struct InventoryScanner<'a> {
    store: &'a Store,
}

impl<'a> InventoryScanner<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub fn scan(&self) -> Result<InventoryIter, CantoError> {
        let root = self.store.audio_root();
        let categories = match fs::read_dir(root.as_std_path()) {
            Ok(entries) => Some(entries),
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(err) => return Err(CantoError::Filesystem(format!("read {root}: {err}"))),
        };
        Ok(InventoryIter {
            root,
            categories,
            current: None,
        })
    }

    /// Distinct identifiers; the same id stored under two categories counts once.
    pub fn ids(&self) -> Result<BTreeSet<RecordId>, CantoError> {
        self.scan()?.map(|entry| entry.map(|entry| entry.id)).collect()
    }

    pub fn categories(&self) -> Result<Vec<CategorySummary>, CantoError> {
        let mut summaries = Vec::new();
        for name in self.store.list_categories()? {
            let dir = self.store.category_dir(&name);
            let entries = fs::read_dir(dir.as_std_path())
                .map_err(|err| CantoError::Filesystem(format!("read {dir}: {err}")))?;
            let mut cursor = CategoryCursor {
                name: name.clone(),
                dir,
                entries,
            };
            let mut assets = 0usize;
            while let Some(entry) = cursor.next_asset() {
                entry?;
                assets += 1;
            }
            summaries.push(CategorySummary { name, assets });
        }
        Ok(summaries)
    }
}

pub struct InventoryIter {
    root: Utf8PathBuf,
    categories: Option<ReadDir>,
    current: Option<CategoryCursor>,
}

impl Iterator for InventoryIter {
    type Item = Result<AssetEntry, CantoError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(cursor) = self.current.as_mut() {
                if let Some(item) = cursor.next_asset() {
                    return Some(item);
                }
                self.current = None;
            }

            let entry = match self.categories.as_mut()?.next()? {
                Ok(entry) => entry,
                Err(err) => return Some(Err(CantoError::Filesystem(err.to_string()))),
            };
            let Some(name) = visible_name(&entry) else {
                continue;
            };
            if !entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false) {
                continue;
            }
            let dir = self.root.join(&name);
            match fs::read_dir(dir.as_std_path()) {
                Ok(entries) => {
                    self.current = Some(CategoryCursor { name, dir, entries });
                }
                Err(err) => {
                    return Some(Err(CantoError::Filesystem(format!("read {dir}: {err}"))));
                }
            }
        }
    }
}

struct CategoryCursor {
    name: String,
    dir: Utf8PathBuf,
    entries: ReadDir,
}

impl CategoryCursor {
    fn next_asset(&mut self) -> Option<Result<AssetEntry, CantoError>> {
        loop {
            let entry = match self.entries.next()? {
                Ok(entry) => entry,
                Err(err) => return Some(Err(CantoError::Filesystem(err.to_string()))),
            };
            if !entry.file_type().map(|kind| kind.is_file()).unwrap_or(false) {
                continue;
            }
            let Some(file_name) = visible_name(&entry) else {
                continue;
            };
            let (stem, extension) = file_name
                .rsplit_once('.')
                .unwrap_or((file_name.as_str(), ""));
            // Anything not named by a record id (markers, notes, stray temp files) is not an asset.
            let Ok(id) = stem.parse::<RecordId>() else {
                continue;
            };
            return Some(Ok(AssetEntry {
                category: self.name.clone(),
                id,
                extension: extension.to_string(),
                path: self.dir.join(&file_name),
            }));
        }
    }
}

fn visible_name(entry: &DirEntry) -> Option<String> {
    let name = entry.file_name().to_str()?.to_string();
    (!is_hidden(&name)).then_some(name)
}
