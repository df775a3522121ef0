//! Stand-in per-crate build-id (SPEC_FULL.md §4.2): rustc exposes no
//! publicly queryable build id outside of the `-C metadata` value the
//! *caller* chooses, so murk derives its own stable fingerprint from the
//! crate's own inputs instead of shelling out to read rustc's internals.

use blake3::Hasher;
use std::path::Path;

/// Inputs that must be folded into a crate's fingerprint: anything that,
/// if it changes, should change the crate's action identifier and
/// therefore invalidate its cache entry and rename salts.
pub struct FingerprintInputs<'a> {
    /// Sorted `(path, content)` pairs for every source file in the crate.
    pub sources: &'a [(String, Vec<u8>)],
    /// Sorted `extern_name -> canonical package id` pairs.
    pub externs: &'a [(String, String)],
    /// Sorted enabled Cargo feature names.
    pub features: &'a [String],
    pub rustc_version: &'a str,
}

pub fn compute(inputs: &FingerprintInputs<'_>) -> [u8; 32] {
    let mut hasher = Hasher::new();
    hasher.update(b"murk-fingerprint-v1:");
    for (path, content) in inputs.sources {
        hasher.update(b"src:");
        hasher.update(path.as_bytes());
        hasher.update(b":");
        hasher.update(&(content.len() as u64).to_le_bytes());
        hasher.update(content);
    }
    for (name, pkg_id) in inputs.externs {
        hasher.update(b"extern:");
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        hasher.update(pkg_id.as_bytes());
    }
    for feature in inputs.features {
        hasher.update(b"feature:");
        hasher.update(feature.as_bytes());
    }
    hasher.update(b"rustc:");
    hasher.update(inputs.rustc_version.as_bytes());
    *hasher.finalize().as_bytes()
}

/// Reads and hashes the murk binary's own content, used as the wrapper
/// digest component of the action identifier.
pub fn wrapper_digest(wrapper_path: &Path) -> std::io::Result<[u8; 32]> {
    let bytes = std::fs::read(wrapper_path)?;
    Ok(*blake3::hash(&bytes).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_for_same_inputs() {
        let sources = vec![("a.rs".to_string(), b"fn main() {}".to_vec())];
        let externs = vec![];
        let features = vec![];
        let a = compute(&FingerprintInputs {
            sources: &sources,
            externs: &externs,
            features: &features,
            rustc_version: "1.80.0",
        });
        let b = compute(&FingerprintInputs {
            sources: &sources,
            externs: &externs,
            features: &features,
            rustc_version: "1.80.0",
        });
        assert_eq!(a, b);
    }

    #[test]
    fn changes_with_source_content() {
        let externs = vec![];
        let features = vec![];
        let sources_a = vec![("a.rs".to_string(), b"fn main() {}".to_vec())];
        let sources_b = vec![("a.rs".to_string(), b"fn main() { }".to_vec())];
        let a = compute(&FingerprintInputs {
            sources: &sources_a,
            externs: &externs,
            features: &features,
            rustc_version: "1.80.0",
        });
        let b = compute(&FingerprintInputs {
            sources: &sources_b,
            externs: &externs,
            features: &features,
            rustc_version: "1.80.0",
        });
        assert_ne!(a, b);
    }
}
