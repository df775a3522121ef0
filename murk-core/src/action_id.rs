//! Action identifier derivation (spec §3 "Action identifier").
//!
//! A 32-byte digest that salts every per-crate hash and keys the analysis
//! cache. It is a pure function of: the crate's own content fingerprint,
//! the murk binary's own content digest, the obfuscation-set pattern, and
//! the sorted values of obfuscation-affecting flags.

use blake3::Hasher;
use std::fmt;

/// A 32-byte action identifier. Displayed as lowercase hex for use as a
/// cache file name.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct ActionId(pub [u8; 32]);

impl ActionId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(64);
        for b in &self.0 {
            s.push_str(&format!("{b:02x}"));
        }
        s
    }
}

impl fmt::Debug for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActionId({})", self.to_hex())
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// The obfuscation-affecting flag values that must be folded into every
/// action identifier, so that rebuilding with different flags invalidates
/// stale cache entries and naming salts (spec.md §9 open question: "-X
/// values between builds").
#[derive(Debug, Clone, Default)]
pub struct FlagFingerprint {
    pub literals: bool,
    pub tiny: bool,
    /// Present iff `-seed` was given explicitly; folded in so a seeded
    /// build never shares a cache entry with an unseeded one.
    pub seed: Option<Vec<u8>>,
}

impl FlagFingerprint {
    fn write_into(&self, hasher: &mut Hasher) {
        hasher.update(&[self.literals as u8, self.tiny as u8]);
        match &self.seed {
            Some(seed) => {
                hasher.update(b"seed:1:");
                hasher.update(seed);
            }
            None => hasher.update(b"seed:0:"),
        }
    }
}

/// Computes the action identifier for one crate.
///
/// * `crate_fingerprint` -- the crate's own stable content fingerprint (see
///   `fingerprint.rs`), standing in for rustc's own build-id/`-C metadata`
///   the way spec.md §3 describes.
/// * `wrapper_digest` -- a content digest of the murk binary itself.
/// * `obfuscation_pattern` -- the raw pattern string (e.g. `MURK_PATTERN`).
/// * `flags` -- the sorted, obfuscation-affecting flag values.
pub fn derive_action_id(
    crate_fingerprint: &[u8; 32],
    wrapper_digest: &[u8; 32],
    obfuscation_pattern: &str,
    flags: &FlagFingerprint,
) -> ActionId {
    let mut hasher = Hasher::new();
    hasher.update(b"murk-action-id-v1:");
    hasher.update(crate_fingerprint);
    hasher.update(wrapper_digest);
    hasher.update(obfuscation_pattern.as_bytes());
    flags.write_into(&mut hasher);
    ActionId(*hasher.finalize().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_across_calls() {
        let fp = [1u8; 32];
        let wd = [2u8; 32];
        let flags = FlagFingerprint {
            literals: true,
            tiny: false,
            seed: None,
        };
        let a = derive_action_id(&fp, &wd, "example.com/*", &flags);
        let b = derive_action_id(&fp, &wd, "example.com/*", &flags);
        assert_eq!(a.0, b.0);
    }

    #[test]
    fn flags_change_the_id() {
        let fp = [1u8; 32];
        let wd = [2u8; 32];
        let a = derive_action_id(
            &fp,
            &wd,
            "p",
            &FlagFingerprint {
                literals: true,
                ..Default::default()
            },
        );
        let b = derive_action_id(
            &fp,
            &wd,
            "p",
            &FlagFingerprint {
                literals: false,
                ..Default::default()
            },
        );
        assert_ne!(a.0, b.0);
    }

    #[test]
    fn seed_changes_the_id() {
        let fp = [1u8; 32];
        let wd = [2u8; 32];
        let a = derive_action_id(&fp, &wd, "p", &FlagFingerprint::default());
        let b = derive_action_id(
            &fp,
            &wd,
            "p",
            &FlagFingerprint {
                seed: Some(vec![9, 9, 9]),
                ..Default::default()
            },
        );
        assert_ne!(a.0, b.0);
    }
}
