//! Table Cache
//!
//! Caches built definition tables per project root so a rebuild is only
//! needed when the predefines or the header set change.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::lines::LineOptions;
use super::table::DefinitionTable;

const INDEX_FILE: &str = "index.json";

/// Cache errors
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializeError(#[from] serde_json::Error),
}

impl From<CacheError> for cdefine_core::Error {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::IoError(e) => cdefine_core::Error::Io(e),
            CacheError::SerializeError(e) => cdefine_core::Error::Json(e),
        }
    }
}

/// Cache entry metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    /// Fingerprint of predefines and header set at build time
    fingerprint: u64,
    /// Path to the cached table
    table_file: PathBuf,
}

/// Built-table cache
pub struct TableCache {
    cache_dir: PathBuf,
    index: HashMap<PathBuf, CacheEntry>,
    enabled: bool,
}

impl TableCache {
    /// Open (or create) a cache in `cache_dir`
    pub fn new(cache_dir: PathBuf) -> Result<Self, CacheError> {
        if !cache_dir.exists() {
            fs::create_dir_all(&cache_dir)?;
        }

        let mut cache = Self {
            cache_dir,
            index: HashMap::new(),
            enabled: true,
        };
        cache.load_index()?;
        Ok(cache)
    }

    /// A cache that stores nothing
    pub fn disabled() -> Self {
        Self {
            cache_dir: PathBuf::new(),
            index: HashMap::new(),
            enabled: false,
        }
    }

    /// The cached table of `root`, if its fingerprint still matches
    pub fn get(&self, root: &Path, fingerprint: u64) -> Option<DefinitionTable> {
        if !self.enabled {
            return None;
        }

        let entry = self.index.get(root)?;
        if entry.fingerprint != fingerprint {
            debug!("Cache for {:?} is stale", root);
            return None;
        }

        let content = fs::read_to_string(&entry.table_file).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Store the table built for `root`
    pub fn put(
        &mut self,
        root: &Path,
        fingerprint: u64,
        table: &DefinitionTable,
    ) -> Result<(), CacheError> {
        if !self.enabled {
            return Ok(());
        }

        let table_file = self.table_file_path(root);
        fs::write(&table_file, serde_json::to_string(table)?)?;

        self.index.insert(
            root.to_path_buf(),
            CacheEntry {
                fingerprint,
                table_file,
            },
        );
        self.save_index()
    }

    /// Drop the cached table of `root`
    pub fn invalidate(&mut self, root: &Path) -> Result<(), CacheError> {
        if let Some(entry) = self.index.remove(root) {
            if entry.table_file.exists() {
                fs::remove_file(&entry.table_file)?;
            }
        }
        self.save_index()
    }

    /// Drop every cached table
    pub fn clear(&mut self) -> Result<(), CacheError> {
        if !self.enabled {
            return Ok(());
        }

        for entry in self.index.values() {
            if entry.table_file.exists() {
                let _ = fs::remove_file(&entry.table_file);
            }
        }
        self.index.clear();
        self.save_index()
    }

    pub fn stats(&self) -> CacheStats {
        let total_size = self
            .index
            .values()
            .filter_map(|e| fs::metadata(&e.table_file).ok())
            .map(|m| m.len())
            .sum();

        CacheStats {
            total_entries: self.index.len(),
            total_size,
        }
    }

    fn table_file_path(&self, root: &Path) -> PathBuf {
        let mut hasher = DefaultHasher::new();
        root.hash(&mut hasher);
        self.cache_dir.join(format!("{:016x}.json", hasher.finish()))
    }

    fn load_index(&mut self) -> Result<(), CacheError> {
        let index_path = self.cache_dir.join(INDEX_FILE);
        if index_path.exists() {
            let content = fs::read_to_string(&index_path)?;
            self.index = serde_json::from_str(&content)?;
        }
        Ok(())
    }

    fn save_index(&self) -> Result<(), CacheError> {
        if !self.enabled {
            return Ok(());
        }
        let content = serde_json::to_string_pretty(&self.index)?;
        fs::write(self.cache_dir.join(INDEX_FILE), content)?;
        Ok(())
    }
}

/// Hash of everything a build depends on: the line options, the
/// predefines and the path, size and modification time of every header
pub fn fingerprint(
    predefines: &DefinitionTable,
    headers: &[PathBuf],
    options: &LineOptions,
) -> u64 {
    let mut hasher = DefaultHasher::new();
    options.hash(&mut hasher);

    for def in predefines.iter() {
        def.name.hash(&mut hasher);
        def.params.hash(&mut hasher);
        def.token.hash(&mut hasher);
    }

    for header in headers {
        header.hash(&mut hasher);
        if let Ok(meta) = fs::metadata(header) {
            meta.len().hash(&mut hasher);
            meta.modified()
                .ok()
                .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
                .map(|d| d.as_nanos())
                .hash(&mut hasher);
        }
    }

    hasher.finish()
}

/// Cache statistics
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub total_entries: usize,
    /// Bytes on disk
    pub total_size: u64,
}

impl CacheStats {
    /// Format total size as human-readable string
    pub fn size_human(&self) -> String {
        const KB: u64 = 1024;
        const MB: u64 = KB * 1024;

        if self.total_size >= MB {
            format!("{:.2} MB", self.total_size as f64 / MB as f64)
        } else if self.total_size >= KB {
            format!("{:.2} KB", self.total_size as f64 / KB as f64)
        } else {
            format!("{} bytes", self.total_size)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdefine_core::Definition;
    use tempfile::TempDir;

    fn table() -> DefinitionTable {
        vec![Definition::object("A", "1"), Definition::function("F", ["x"], "x")].into()
    }

    #[test]
    fn test_cache_put_get() {
        let temp = TempDir::new().unwrap();
        let mut cache = TableCache::new(temp.path().join("cache")).unwrap();
        let root = temp.path().join("project");

        cache.put(&root, 42, &table()).unwrap();

        let cached = cache.get(&root, 42).unwrap();
        assert_eq!(cached.names().collect::<Vec<_>>(), vec!["A", "F"]);
        assert!(cache.get(&root, 43).is_none());
    }

    #[test]
    fn test_cache_survives_reopen() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("cache");
        let root = temp.path().join("project");
        TableCache::new(dir.clone()).unwrap().put(&root, 7, &table()).unwrap();

        let cache = TableCache::new(dir).unwrap();
        assert_eq!(cache.get(&root, 7).unwrap().len(), 2);
        assert_eq!(cache.stats().total_entries, 1);
        assert!(cache.stats().total_size > 0);
    }

    #[test]
    fn test_cache_invalidation() {
        let temp = TempDir::new().unwrap();
        let mut cache = TableCache::new(temp.path().join("cache")).unwrap();
        let root = temp.path().join("project");

        cache.put(&root, 1, &table()).unwrap();
        cache.invalidate(&root).unwrap();
        assert!(cache.get(&root, 1).is_none());

        cache.put(&root, 1, &table()).unwrap();
        cache.clear().unwrap();
        assert_eq!(cache.stats().total_entries, 0);
    }

    #[test]
    fn test_disabled_cache() {
        let mut cache = TableCache::disabled();
        let root = PathBuf::from("/nowhere");
        cache.put(&root, 1, &table()).unwrap();
        assert!(cache.get(&root, 1).is_none());
    }

    #[test]
    fn test_fingerprint_tracks_inputs() {
        let temp = TempDir::new().unwrap();
        let header = temp.path().join("a.h");
        fs::write(&header, "#define A 1\n").unwrap();
        let headers = vec![header.clone()];

        let options = LineOptions::default();

        let base = fingerprint(&table(), &headers, &options);
        assert_eq!(base, fingerprint(&table(), &headers, &options));

        let mut other = table();
        other.insert("B", None, "2");
        assert_ne!(base, fingerprint(&other, &headers, &options));

        let unconditional = LineOptions {
            evaluate_conditionals: false,
            ..options
        };
        assert_ne!(base, fingerprint(&table(), &headers, &unconditional));

        fs::write(&header, "#define A 100\n").unwrap();
        assert_ne!(base, fingerprint(&table(), &headers, &options));
    }
}
