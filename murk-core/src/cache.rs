//! The analysis cache (spec §4.3): a content-addressed directory of
//! per-crate analysis entries, keyed by action identifier. Reads are
//! lock-free; writes are exclusive-create with an atomic rename so readers
//! never observe partially written content.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::action_id::ActionId;
use crate::error::{Error, Result};

/// Per-crate analysis facts (spec §3 "Analysis cache entry"). Two maps:
/// which call parameters flow into reflection-equivalent observation, and
/// which named types/fields must keep their original spelling because
/// something observes their identity at runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnalysisEntry {
    /// Function path (e.g. `mycrate::Foo::bar`) -> observed parameter
    /// indices.
    pub reflect_apis: HashMap<String, HashSet<usize>>,
    /// Obfuscated name -> original name, for every named type/field this
    /// crate declares that is reflection-observed. Keyed by the obfuscated
    /// name because the final link step (or the runtime de-obfuscation
    /// table) consults it to reconstruct original names.
    pub reflect_object_names: HashMap<String, String>,
    /// Obfuscated identifier -> original identifier, for every item and
    /// field this crate's compiler transform renamed (spec §4.9 / `murk
    /// reverse`). Persisted here rather than anywhere build-visible, since
    /// the analysis cache is already the durable, content-addressed home
    /// for everything about a build `murk reverse` needs later.
    pub renamed_idents: HashMap<String, String>,
}

impl AnalysisEntry {
    /// The seed entry: `Any::downcast_ref`/`Any::is` observe their type
    /// parameter at argument position 0 (spec §4.4 "Seed").
    pub fn seed() -> Self {
        let mut reflect_apis = HashMap::new();
        reflect_apis.insert(
            "core::any::Any::downcast_ref".to_string(),
            HashSet::from([0]),
        );
        reflect_apis.insert("core::any::Any::is".to_string(), HashSet::from([0]));
        reflect_apis.insert(
            "core::any::Any::downcast_mut".to_string(),
            HashSet::from([0]),
        );
        AnalysisEntry {
            reflect_apis,
            reflect_object_names: HashMap::new(),
            renamed_idents: HashMap::new(),
        }
    }

    /// Unions `other` into `self` in place ("deep" entries, spec §3: before
    /// writing a cache entry, a worker unions in the entries of all direct
    /// imports so loading one entry suffices downstream).
    pub fn union_from(&mut self, other: &AnalysisEntry) {
        for (k, v) in &other.reflect_apis {
            self.reflect_apis
                .entry(k.clone())
                .or_default()
                .extend(v.iter().copied());
        }
        for (k, v) in &other.reflect_object_names {
            self.reflect_object_names
                .entry(k.clone())
                .or_insert_with(|| v.clone());
        }
        for (k, v) in &other.renamed_idents {
            self.renamed_idents.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }

    /// True if `other` adds no new facts relative to `self` -- used by the
    /// analyzer's fixed-point loop (spec §4.4 "Termination").
    pub fn is_superset_of(&self, other: &AnalysisEntry) -> bool {
        other.reflect_apis.iter().all(|(k, v)| {
            self.reflect_apis
                .get(k)
                .map(|existing| v.is_subset(existing))
                .unwrap_or(false)
        }) && other
            .reflect_object_names
            .keys()
            .all(|k| self.reflect_object_names.contains_key(k))
    }
}

/// A directory-backed, content-addressed cache of [`AnalysisEntry`] values.
pub struct AnalysisCache {
    root: PathBuf,
}

impl AnalysisCache {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(AnalysisCache { root })
    }

    fn entry_path(&self, id: &ActionId) -> PathBuf {
        self.root.join(format!("{}.murkcache", id.to_hex()))
    }

    /// Reads an entry if present. Never blocks on a writer: a write is only
    /// ever visible after its atomic rename completes, so a concurrent
    /// reader either sees nothing (falls back to recomputation) or a fully
    /// formed file.
    pub fn load(&self, id: &ActionId) -> Result<Option<AnalysisEntry>> {
        let path = self.entry_path(id);
        match fs::read(&path) {
            Ok(bytes) => {
                let (entry, _): (AnalysisEntry, usize) = bincode::serde::decode_from_slice(
                    &bytes,
                    bincode::config::standard(),
                )
                .map_err(|e| Error::Codec(e.to_string()))?;
                Ok(Some(entry))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Attempts to write `entry` under `id`. Uses exclusive-create on a
    /// private temp file plus an atomic rename, and treats "already exists"
    /// races (another worker won) as success rather than an error, per
    /// spec §4.3's concurrency model.
    pub fn store(&self, id: &ActionId, entry: &AnalysisEntry) -> Result<()> {
        let final_path = self.entry_path(id);
        if final_path.exists() {
            return Ok(());
        }
        let bytes = bincode::serde::encode_to_vec(entry, bincode::config::standard())
            .map_err(|e| Error::Codec(e.to_string()))?;

        let tmp_name = format!(".{}.{}.tmp", id.to_hex(), std::process::id());
        let tmp_path = self.root.join(tmp_name);
        {
            let mut f = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&tmp_path)?;
            f.write_all(&bytes)?;
            f.sync_all()?;
        }
        match fs::rename(&tmp_path, &final_path) {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                if final_path.exists() {
                    Ok(())
                } else {
                    Err(e.into())
                }
            }
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AnalysisCache::new(dir.path()).unwrap();
        let id = ActionId([7u8; 32]);

        let mut entry = AnalysisEntry::seed();
        entry
            .reflect_object_names
            .insert("aB1x9zQ2".to_string(), "Foo".to_string());

        assert!(cache.load(&id).unwrap().is_none());
        cache.store(&id, &entry).unwrap();
        let loaded = cache.load(&id).unwrap().unwrap();
        assert_eq!(loaded, entry);
    }

    #[test]
    fn store_is_idempotent_on_race() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AnalysisCache::new(dir.path()).unwrap();
        let id = ActionId([3u8; 32]);
        let entry = AnalysisEntry::seed();
        cache.store(&id, &entry).unwrap();
        // A second writer "losing the race" must not error.
        cache.store(&id, &entry).unwrap();
    }

    #[test]
    fn union_is_monotonic() {
        let mut a = AnalysisEntry::default();
        a.reflect_object_names
            .insert("h1".to_string(), "Foo".to_string());
        let mut b = AnalysisEntry::default();
        b.reflect_object_names
            .insert("h2".to_string(), "Bar".to_string());
        a.union_from(&b);
        assert_eq!(a.reflect_object_names.len(), 2);
        assert!(a.is_superset_of(&b));
    }
}
