//! Persisted build metadata consulted by `murk reverse` (spec §6).
//!
//! The plan file itself lives in a throwaway scratch directory and is
//! gone once a build finishes, so `murk reverse` -- invoked as its own,
//! later command -- cannot read it. This is a small, durable side table
//! under the cache root instead: per obfuscated crate, the action id
//! whose analysis cache entry holds that crate's `renamed_idents` table,
//! plus the action ids of its to-obfuscate dependencies so a single
//! `murk reverse <main-crate>` invocation can build a full dictionary
//! without re-resolving the crate graph.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::action_id::ActionId;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReverseMeta {
    pub import_path: String,
    pub action_id: ActionId,
    pub dependency_action_ids: Vec<ActionId>,
}

/// Turns an import path into a filesystem-safe file stem. Not required to
/// be reversible -- only to be a pure function of `import_path`, since
/// `load` recomputes the same slug to look the file back up.
fn slug(import_path: &str) -> String {
    import_path
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn meta_path(cache_root: &Path, import_path: &str) -> PathBuf {
    cache_root.join("meta").join(format!("{}.murkmeta", slug(import_path)))
}

/// Writes (or overwrites) one crate's reverse metadata. Call sites are the
/// planner only, once per to-obfuscate crate per build; unlike the
/// analysis cache this is not content-addressed; the latest build for a
/// given import path simply wins.
pub fn write(cache_root: &Path, meta: &ReverseMeta) -> Result<()> {
    let path = meta_path(cache_root, &meta.import_path);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let bytes = bincode::serde::encode_to_vec(meta, bincode::config::standard())
        .map_err(|e| Error::Codec(e.to_string()))?;
    fs::write(path, bytes)?;
    Ok(())
}

pub fn load(cache_root: &Path, import_path: &str) -> Result<Option<ReverseMeta>> {
    let path = meta_path(cache_root, import_path);
    match fs::read(&path) {
        Ok(bytes) => {
            let (meta, _): (ReverseMeta, usize) =
                bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
                    .map_err(|e| Error::Codec(e.to_string()))?;
            Ok(Some(meta))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let meta = ReverseMeta {
            import_path: "myapp::main".to_string(),
            action_id: ActionId([5u8; 32]),
            dependency_action_ids: vec![ActionId([6u8; 32])],
        };
        assert!(load(dir.path(), &meta.import_path).unwrap().is_none());
        write(dir.path(), &meta).unwrap();
        let loaded = load(dir.path(), &meta.import_path).unwrap().unwrap();
        assert_eq!(loaded.action_id, meta.action_id);
        assert_eq!(loaded.dependency_action_ids, meta.dependency_action_ids);
    }

    #[test]
    fn slug_is_filesystem_safe() {
        let s = slug("my-app::sub::main");
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    }
}
