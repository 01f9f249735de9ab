//! Index registry of a document and its single-file persistence
//!
//! The whole registry is one MessagePack document. Every mutation rewrites
//! the file from scratch (truncate, then write); there is no append path.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{IndexEntry, Uid};

/// Document-level counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocReg {
    /// Pushes ever committed, never decremented
    pub entry: u64,
    /// Model that produced the vectors of this document
    #[serde(default)]
    pub vec_model: Option<String>,
}

/// In-memory registry: counters plus uid -> entry in push order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    pub doc_reg: DocReg,
    pub index: IndexMap<Uid, IndexEntry>,
}

impl Registry {
    /// Record a push. The counter moves with every insert.
    pub fn insert(&mut self, entry: IndexEntry) {
        self.index.insert(entry.uid.clone(), entry);
        self.doc_reg.entry += 1;
    }

    /// Reverse an `insert` whose save failed.
    pub(crate) fn undo_insert(&mut self, uid: &str) {
        if self.index.shift_remove(uid).is_some() {
            self.doc_reg.entry = self.doc_reg.entry.saturating_sub(1);
        }
    }

    pub fn get(&self, uid: &str) -> Option<&IndexEntry> {
        self.index.get(uid)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(self).map_err(|e| Error::Serialization(e.to_string()))
    }
}

/// Backing file of a registry
#[derive(Debug, Clone)]
pub struct RegistryFile {
    path: PathBuf,
    strict: bool,
}

impl RegistryFile {
    pub fn new(path: impl Into<PathBuf>, strict: bool) -> Self {
        Self {
            path: path.into(),
            strict,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the registry, creating an empty one on first open.
    pub fn load(&self) -> Result<Registry> {
        match fs::read(&self.path) {
            Ok(bytes) => {
                let registry: Registry = rmp_serde::from_slice(&bytes)
                    .map_err(|e| Error::corruption(&self.path, e))?;
                debug!(path = %self.path.display(), entries = registry.len(), "Loaded registry");
                Ok(registry)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let registry = Registry::default();
                self.save(&registry)?;
                debug!(path = %self.path.display(), "Created empty registry");
                Ok(registry)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Overwrite the file with a full snapshot of `registry`.
    pub fn save(&self, registry: &Registry) -> Result<()> {
        let bytes = registry.to_bytes()?;
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)?;
        file.write_all(&bytes)?;
        if self.strict {
            file.sync_data()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MetaValue, Metadata};
    use chrono::Local;
    use tempfile::TempDir;

    fn entry(uid: &str, key: &str) -> IndexEntry {
        let mut meta = Metadata::new();
        meta.insert("source".into(), MetaValue::from("test"));
        IndexEntry::new(
            uid.into(),
            "doc",
            Some(key.into()),
            Some(meta),
            "text".into(),
            Local::now(),
        )
    }

    #[test]
    fn test_load_creates_empty_registry() {
        let temp = TempDir::new().unwrap();
        let file = RegistryFile::new(temp.path().join("doc.index"), true);

        let registry = file.load().unwrap();
        assert_eq!(registry.doc_reg.entry, 0);
        assert!(registry.doc_reg.vec_model.is_none());
        assert!(registry.is_empty());
        assert!(file.path().exists());
    }

    #[test]
    fn test_undo_insert() {
        let mut registry = Registry::default();
        registry.insert(entry("a", "k"));
        registry.insert(entry("b", "k"));

        registry.undo_insert("b");
        assert_eq!(registry.doc_reg.entry, 1);
        assert!(registry.get("b").is_none());

        registry.undo_insert("missing");
        assert_eq!(registry.doc_reg.entry, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_save_then_load() {
        let temp = TempDir::new().unwrap();
        let file = RegistryFile::new(temp.path().join("doc.index"), false);

        let mut registry = file.load().unwrap();
        registry.insert(entry("b", "second"));
        registry.insert(entry("a", "first"));
        registry.doc_reg.vec_model = Some("hashing-128".into());
        file.save(&registry).unwrap();

        let loaded = file.load().unwrap();
        assert_eq!(loaded, registry);
        assert_eq!(loaded.doc_reg.entry, 2);
        let order: Vec<_> = loaded.index.keys().cloned().collect();
        assert_eq!(order, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_resave_is_byte_identical() {
        let temp = TempDir::new().unwrap();
        let file = RegistryFile::new(temp.path().join("doc.index"), false);

        let mut registry = file.load().unwrap();
        for i in 0..5 {
            registry.insert(entry(&format!("u{i}"), "k"));
        }
        file.save(&registry).unwrap();
        let first = fs::read(file.path()).unwrap();

        let loaded = file.load().unwrap();
        file.save(&loaded).unwrap();
        let second = fs::read(file.path()).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_save_truncates_previous_content() {
        let temp = TempDir::new().unwrap();
        let file = RegistryFile::new(temp.path().join("doc.index"), false);

        let mut big = Registry::default();
        for i in 0..50 {
            big.insert(entry(&format!("u{i}"), "k"));
        }
        file.save(&big).unwrap();
        file.save(&Registry::default()).unwrap();

        assert_eq!(file.load().unwrap(), Registry::default());
    }

    #[test]
    fn test_garbage_is_corruption() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("doc.index");
        fs::write(&path, b"\xc1not msgpack").unwrap();

        let err = RegistryFile::new(&path, false).load().unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_empty_file_is_corruption() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("doc.index");
        fs::write(&path, b"").unwrap();

        let err = RegistryFile::new(&path, false).load().unwrap_err();
        assert!(err.is_corruption());
    }
}
