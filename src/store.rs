use std::fs;
use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tempfile::Builder;

use crate::domain::RecordId;
use crate::error::CantoError;

pub const MARKER_FILE: &str = "in_progress.txt";
pub const LIBRARY_FILE: &str = "library.json";

/// On-disk layout of one dataset:
///
/// ```text
/// <root>/metadata/<cache-key>/page<N>.json
/// <root>/metadata/<cache-key>/in_progress.txt
/// <root>/metadata/library.json
/// <root>/audio/<category>/<id>.<ext>
/// ```
#[derive(Debug, Clone)]
pub struct Store {
    root: Utf8PathBuf,
}

impl Store {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn metadata_root(&self) -> Utf8PathBuf {
        self.root.join("metadata")
    }

    pub fn audio_root(&self) -> Utf8PathBuf {
        self.root.join("audio")
    }

    pub fn query_dir(&self, key: &str) -> Utf8PathBuf {
        self.metadata_root().join(key)
    }

    pub fn page_path(&self, key: &str, page: u64) -> Utf8PathBuf {
        self.query_dir(key).join(format!("page{page}.json"))
    }

    pub fn marker_path(&self, key: &str) -> Utf8PathBuf {
        self.query_dir(key).join(MARKER_FILE)
    }

    pub fn library_path(&self) -> Utf8PathBuf {
        self.metadata_root().join(LIBRARY_FILE)
    }

    pub fn category_dir(&self, category: &str) -> Utf8PathBuf {
        self.audio_root().join(category)
    }

    pub fn asset_path(&self, category: &str, id: RecordId, ext: &str) -> Utf8PathBuf {
        self.category_dir(category).join(format!("{id}.{ext}"))
    }

    pub fn ensure_layout(&self) -> Result<(), CantoError> {
        fs::create_dir_all(self.metadata_root().as_std_path())
            .map_err(|err| CantoError::Filesystem(err.to_string()))?;
        fs::create_dir_all(self.audio_root().as_std_path())
            .map_err(|err| CantoError::Filesystem(err.to_string()))
    }

    /// Names of every query cache folder, sorted. Files directly under
    /// `metadata/` (the library index) and hidden entries are skipped.
    pub fn list_query_keys(&self) -> Result<Vec<String>, CantoError> {
        let mut keys = visible_dirs(&self.metadata_root())?;
        keys.sort();
        Ok(keys)
    }

    pub fn list_categories(&self) -> Result<Vec<String>, CantoError> {
        let mut names = visible_dirs(&self.audio_root())?;
        names.sort();
        Ok(names)
    }

    pub fn remove_dir_all(path: &Utf8Path) -> Result<(), CantoError> {
        fs::remove_dir_all(path.as_std_path())
            .map_err(|err| CantoError::Filesystem(format!("remove {path}: {err}")))
    }

    pub fn write_json_atomic<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), CantoError> {
        let content =
            serde_json::to_vec(value).map_err(|err| CantoError::Filesystem(err.to_string()))?;
        Self::write_bytes_atomic(path, &content)
    }

    /// Writes into a hidden temp file next to `path`, then renames it over `path`.
    /// Readers see either the old content or the new one, never a prefix.
    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), CantoError> {
        let parent = path
            .parent()
            .ok_or_else(|| CantoError::Filesystem(format!("invalid destination path {path}")))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| CantoError::Filesystem(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix(".canto-")
            .suffix(".tmp")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| CantoError::Filesystem(err.to_string()))?;
        temp.write_all(content)
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|err| CantoError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| CantoError::Filesystem(format!("persist {path}: {}", err.error)))?;
        Ok(())
    }
}

pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

fn visible_dirs(root: &Utf8Path) -> Result<Vec<String>, CantoError> {
    let entries = match fs::read_dir(root.as_std_path()) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(CantoError::Filesystem(format!("read {root}: {err}"))),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| CantoError::Filesystem(err.to_string()))?;
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        let is_dir = entry
            .file_type()
            .map(|kind| kind.is_dir())
            .unwrap_or(false);
        if is_dir && !is_hidden(&name) {
            names.push(name);
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let store = Store::new("dataset");
        let id = RecordId::new(4242);

        assert!(store.page_path("en_Robin", 2).ends_with("metadata/en_Robin/page2.json"));
        assert!(store.marker_path("en_Robin").ends_with("metadata/en_Robin/in_progress.txt"));
        assert!(store.library_path().ends_with("metadata/library.json"));
        assert!(store.asset_path("Robin", id, "mp3").ends_with("audio/Robin/4242.mp3"));
    }

    #[test]
    fn query_keys_skip_index_and_hidden_entries() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let store = Store::new(root);
        store.ensure_layout().unwrap();
        fs::create_dir_all(store.query_dir("en_Wren").as_std_path()).unwrap();
        fs::create_dir_all(store.query_dir("en_Robin").as_std_path()).unwrap();
        fs::create_dir_all(store.query_dir(".trash").as_std_path()).unwrap();
        fs::write(store.library_path().as_std_path(), b"{}").unwrap();

        assert_eq!(store.list_query_keys().unwrap(), vec!["en_Robin", "en_Wren"]);
    }

    #[test]
    fn atomic_write_replaces_content() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let path = root.join("nested").join("value.json");

        Store::write_bytes_atomic(&path, b"first").unwrap();
        Store::write_bytes_atomic(&path, b"second").unwrap();

        assert_eq!(fs::read(path.as_std_path()).unwrap(), b"second");
        let leftovers = fs::read_dir(root.join("nested").as_std_path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }
}
