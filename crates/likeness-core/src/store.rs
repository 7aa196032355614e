//! Flat-file embedding store.
//!
//! The store is a plain value ([`Store`]) that callers load, modify and hand
//! back for persisting. [`EmbeddingStore`] only knows where the blob lives;
//! it holds no records between calls, so every operation sees what is on
//! disk right now.
//!
//! On-disk format is versioned JSON:
//!
//! ```text
//! { "version": 1, "names": ["Ana", ...], "encodings": [[0.1, ...], ...] }
//! ```
//!
//! `names[i]` belongs to `encodings[i]`. Concurrent writers are not
//! coordinated: the last persist wins.

use crate::types::{Embedding, IdentityRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const STORE_FORMAT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("label must not be empty or whitespace")]
    InvalidLabel,
    #[error("invalid embedding: {0}")]
    InvalidEmbedding(String),
    #[error("store file is corrupt: {0}")]
    CorruptStore(String),
    #[error("store I/O: {0}")]
    Io(#[from] io::Error),
}

/// Serialized shape of the store file.
#[derive(Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    names: Vec<String>,
    encodings: Vec<Embedding>,
}

/// Ordered sequence of enrolled identity records.
///
/// All embeddings share one dimension. Labels may repeat.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Store {
    records: Vec<IdentityRecord>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[IdentityRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Embedding dimension shared by every record, or `None` when empty.
    pub fn dim(&self) -> Option<usize> {
        self.records.first().map(|r| r.embedding.dim())
    }

    /// Labels in insertion order, duplicates included.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.label.as_str())
    }

    /// Distinct labels, sorted.
    pub fn identities(&self) -> BTreeSet<String> {
        self.labels().map(str::to_owned).collect()
    }

    /// Append a record under `label`, returning the updated store.
    ///
    /// The label is trimmed before storing. Re-enrolling an existing label
    /// adds another record; nothing is replaced. On rejection `self` is left
    /// untouched.
    pub fn append(&self, label: &str, embedding: Embedding) -> Result<Self, StoreError> {
        let label = validate_label(label)?;
        validate_embedding(&embedding).map_err(StoreError::InvalidEmbedding)?;

        if let Some(expected) = self.dim() {
            if embedding.dim() != expected {
                return Err(StoreError::InvalidEmbedding(format!(
                    "expected {expected}-dim embedding to match the store, got {}",
                    embedding.dim()
                )));
            }
        }

        let mut records = Vec::with_capacity(self.records.len() + 1);
        records.extend_from_slice(&self.records);
        records.push(IdentityRecord {
            label: label.to_owned(),
            embedding,
        });
        Ok(Self { records })
    }

    /// Serialize to the versioned on-disk format.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StoreError> {
        let (names, encodings) = self
            .records
            .iter()
            .map(|r| (r.label.clone(), r.embedding.clone()))
            .unzip();

        let file = StoreFile {
            version: STORE_FORMAT_VERSION,
            names,
            encodings,
        };
        serde_json::to_vec(&file).map_err(|e| StoreError::Io(e.into()))
    }

    /// Parse the on-disk format, rejecting anything that breaks the store's
    /// invariants instead of repairing it.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StoreError> {
        let file: StoreFile = serde_json::from_slice(bytes)
            .map_err(|e| StoreError::CorruptStore(format!("unreadable: {e}")))?;

        if file.version != STORE_FORMAT_VERSION {
            return Err(StoreError::CorruptStore(format!(
                "unsupported format version {} (expected {STORE_FORMAT_VERSION})",
                file.version
            )));
        }

        if file.names.len() != file.encodings.len() {
            return Err(StoreError::CorruptStore(format!(
                "{} names but {} encodings",
                file.names.len(),
                file.encodings.len()
            )));
        }

        let mut store = Store::new();
        for (i, (name, encoding)) in file.names.into_iter().zip(file.encodings).enumerate() {
            store = store
                .append(&name, encoding)
                .map_err(|e| StoreError::CorruptStore(format!("record {i}: {e}")))?;
        }
        Ok(store)
    }
}

/// Trim a label and reject it if nothing is left.
pub fn validate_label(label: &str) -> Result<&str, StoreError> {
    let trimmed = label.trim();
    if trimmed.is_empty() {
        return Err(StoreError::InvalidLabel);
    }
    Ok(trimmed)
}

/// Reject empty vectors and non-finite components.
pub(crate) fn validate_embedding(embedding: &Embedding) -> Result<(), String> {
    if embedding.dim() == 0 {
        return Err("embedding is empty".into());
    }
    if let Some(pos) = embedding.values().iter().position(|v| !v.is_finite()) {
        return Err(format!("non-finite value at index {pos}"));
    }
    Ok(())
}

/// Handle to the store blob at a fixed path.
#[derive(Debug, Clone)]
pub struct EmbeddingStore {
    path: PathBuf,
}

impl EmbeddingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the store from disk. A missing file is an empty store.
    pub fn load(&self) -> Result<Store, StoreError> {
        match fs::read(&self.path) {
            Ok(bytes) => {
                let store = Store::from_bytes(&bytes)?;
                tracing::debug!(path = %self.path.display(), records = store.len(), "loaded store");
                Ok(store)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Store::new()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    /// Write the full store, replacing the previous blob atomically.
    ///
    /// Data goes to a sibling temp file which is synced and then renamed
    /// over the target, so a crash leaves either the old or the new blob.
    pub fn persist(&self, store: &Store) -> Result<(), StoreError> {
        let bytes = store.to_bytes()?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let temp_path = self.temp_path();
        if let Err(e) = write_synced(&temp_path, &bytes) {
            let _ = fs::remove_file(&temp_path);
            return Err(StoreError::Io(e));
        }
        if let Err(e) = fs::rename(&temp_path, &self.path) {
            let _ = fs::remove_file(&temp_path);
            return Err(StoreError::Io(e));
        }

        tracing::info!(path = %self.path.display(), records = store.len(), "persisted store");
        Ok(())
    }

    /// Delete the blob. Clearing a store that does not exist is fine.
    pub fn clear(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "cleared store");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    /// Raw blob bytes for backup, or empty when no store exists.
    pub fn export_raw(&self) -> Result<Vec<u8>, StoreError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "store".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    fn store_in(dir: &TempDir) -> EmbeddingStore {
        EmbeddingStore::new(dir.path().join("encodings.json"))
    }

    #[test]
    fn test_load_missing_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir).load().unwrap();
        assert!(store.is_empty());
        assert_eq!(store.dim(), None);
    }

    #[test]
    fn test_append_rejects_blank_label() {
        for label in ["", "   ", "\t\n"] {
            let err = Store::new().append(label, emb(&[1.0, 0.0])).unwrap_err();
            assert!(matches!(err, StoreError::InvalidLabel), "label {label:?}");
        }
    }

    #[test]
    fn test_append_trims_label() {
        let store = Store::new().append("  Ana ", emb(&[1.0, 0.0])).unwrap();
        assert_eq!(store.records()[0].label, "Ana");
    }

    #[test]
    fn test_append_rejects_dimension_mismatch() {
        let store = Store::new().append("Ana", emb(&[1.0, 0.0, 0.0])).unwrap();
        let err = store.append("Bea", emb(&[1.0, 0.0])).unwrap_err();
        assert!(matches!(err, StoreError::InvalidEmbedding(_)));

        // The rejected append leaves the original usable.
        let store = store.append("Bea", emb(&[0.0, 1.0, 0.0])).unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_append_rejects_empty_and_non_finite() {
        let err = Store::new().append("Ana", emb(&[])).unwrap_err();
        assert!(matches!(err, StoreError::InvalidEmbedding(_)));
        let err = Store::new().append("Ana", emb(&[0.5, f32::NAN])).unwrap_err();
        assert!(matches!(err, StoreError::InvalidEmbedding(_)));
    }

    #[test]
    fn test_append_keeps_duplicate_labels() {
        let store = Store::new()
            .append("Ana", emb(&[1.0, 0.0]))
            .unwrap()
            .append("Ana", emb(&[0.9, 0.1]))
            .unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.identities().len(), 1);
    }

    #[test]
    fn test_identities_sorted_distinct() {
        let store = Store::new()
            .append("Bea", emb(&[0.0, 1.0]))
            .unwrap()
            .append("Ana", emb(&[1.0, 0.0]))
            .unwrap()
            .append("Bea", emb(&[0.1, 0.9]))
            .unwrap();
        let ids: Vec<_> = store.identities().into_iter().collect();
        assert_eq!(ids, vec!["Ana".to_string(), "Bea".to_string()]);
        let labels: Vec<_> = store.labels().collect();
        assert_eq!(labels, vec!["Bea", "Ana", "Bea"]);
    }

    #[test]
    fn test_persist_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let handle = store_in(&dir);
        let store = Store::new()
            .append("Ana", emb(&[1.0, 0.0, 0.0]))
            .unwrap()
            .append("Bea", emb(&[0.0, 1.0, 0.0]))
            .unwrap()
            .append("Ana", emb(&[0.25, -0.5, 0.125]))
            .unwrap();

        handle.persist(&store).unwrap();
        assert_eq!(handle.load().unwrap(), store);
    }

    #[test]
    fn test_persist_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let handle = store_in(&dir);
        let store = Store::new().append("Ana", emb(&[1.0])).unwrap();
        handle.persist(&store).unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["encodings.json".to_string()]);
    }

    #[test]
    fn test_persist_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let handle = EmbeddingStore::new(dir.path().join("a/b/encodings.json"));
        let store = Store::new().append("Ana", emb(&[1.0])).unwrap();
        handle.persist(&store).unwrap();
        assert_eq!(handle.load().unwrap().len(), 1);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let handle = store_in(&dir);
        handle
            .persist(&Store::new().append("Ana", emb(&[1.0])).unwrap())
            .unwrap();

        handle.clear().unwrap();
        assert!(handle.load().unwrap().is_empty());
        handle.clear().unwrap();
        assert!(handle.load().unwrap().is_empty());
    }

    #[test]
    fn test_export_raw() {
        let dir = TempDir::new().unwrap();
        let handle = store_in(&dir);
        assert!(handle.export_raw().unwrap().is_empty());

        let store = Store::new().append("Ana", emb(&[1.0, 2.0])).unwrap();
        handle.persist(&store).unwrap();
        let raw = handle.export_raw().unwrap();
        assert_eq!(Store::from_bytes(&raw).unwrap(), store);
    }

    #[test]
    fn test_load_garbage_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let handle = store_in(&dir);
        fs::write(handle.path(), b"\x80\x04not json").unwrap();
        assert!(matches!(handle.load(), Err(StoreError::CorruptStore(_))));
        // A corrupt store is reported, not replaced.
        assert_eq!(fs::read(handle.path()).unwrap(), b"\x80\x04not json");
    }

    #[test]
    fn test_load_misaligned_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let handle = store_in(&dir);
        fs::write(
            handle.path(),
            br#"{"version":1,"names":["Ana","Bea"],"encodings":[[1.0,0.0]]}"#,
        )
        .unwrap();
        assert!(matches!(handle.load(), Err(StoreError::CorruptStore(_))));
    }

    #[test]
    fn test_load_mixed_dimensions_is_corrupt() {
        let bytes = br#"{"version":1,"names":["Ana","Bea"],"encodings":[[1.0,0.0],[1.0]]}"#;
        assert!(matches!(Store::from_bytes(bytes), Err(StoreError::CorruptStore(_))));
    }

    #[test]
    fn test_load_blank_label_is_corrupt() {
        let bytes = br#"{"version":1,"names":[" "],"encodings":[[1.0]]}"#;
        assert!(matches!(Store::from_bytes(bytes), Err(StoreError::CorruptStore(_))));
    }

    #[test]
    fn test_load_unknown_version_is_corrupt() {
        let bytes = br#"{"version":9,"names":[],"encodings":[]}"#;
        assert!(matches!(Store::from_bytes(bytes), Err(StoreError::CorruptStore(_))));
    }

    #[test]
    fn test_alignment_holds_across_operations() {
        let dir = TempDir::new().unwrap();
        let handle = store_in(&dir);
        let mut store = handle.load().unwrap();
        for (i, label) in ["Ana", "Bea", "Ana", "Cy"].iter().enumerate() {
            store = store.append(label, emb(&[i as f32, 1.0])).unwrap();
            handle.persist(&store).unwrap();

            let raw = handle.export_raw().unwrap();
            let file: serde_json::Value = serde_json::from_slice(&raw).unwrap();
            assert_eq!(
                file["names"].as_array().unwrap().len(),
                file["encodings"].as_array().unwrap().len()
            );
        }
        handle.clear().unwrap();
        assert_eq!(handle.load().unwrap().len(), 0);
    }
}
