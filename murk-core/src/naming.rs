//! Deterministic, salted identifier hashing (spec §4.1).
//!
//! `obfuscate(salt, name)` is a pure function: same salt and name always
//! produce the same output, independent of process, machine or call order.
//! Callers own the hasher input explicitly -- there is no global mutable
//! hasher state (see SPEC_FULL.md §9 "Global mutable state").

use blake3::Hasher;

/// A 64-character alphabet drawn from the valid Rust identifier character
/// set (letters, digits, underscore), with one letter repeated to fill all
/// 64 slots of a base64-style encoding. Decoding is never required.
const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_q";

const MIN_LEN: usize = 8;
const MAX_LEN: usize = 15;

/// Whether the source identifier was exported (`pub`-visible / capitalized
/// in the original) or not. Obfuscated names preserve this distinction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Exported,
    Unexported,
}

/// Encodes a 32-byte digest into a fixed 64-char alphabet, independent of
/// standard base64 (so the output never contains `+`, `/`, or `=`).
fn encode_alphabet(digest: &[u8]) -> [u8; 43] {
    // 32 bytes -> ceil(32*8/6) = 43 six-bit groups, using the first 43
    // characters of a bit-stream built by repeating the digest until it is
    // consumed; we only ever need the first MAX_LEN characters in practice
    // but compute a stable, longer buffer so truncation never changes the
    // alphabet mapping of earlier characters.
    let mut out = [0u8; 43];
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    let mut byte_idx = 0;
    for slot in out.iter_mut() {
        while bits < 6 {
            let byte = if byte_idx < digest.len() {
                digest[byte_idx]
            } else {
                // Extend deterministically past 32 bytes by wrapping; in
                // practice MAX_LEN=15 never needs more than 32*8/6≈42 groups
                // anyway, so this branch is unreachable for sha256/blake3
                // digests but kept for robustness against future digest
                // widths.
                digest[byte_idx % digest.len()]
            };
            byte_idx += 1;
            acc = (acc << 8) | byte as u32;
            bits += 8;
        }
        bits -= 6;
        let idx = (acc >> bits) & 0x3f;
        *slot = ALPHABET[idx as usize];
    }
    out
}

/// Computes `blake3(salt || user_seed || name)`, the naming digest.
fn digest(salt: &[u8], user_seed: &[u8], name: &str) -> [u8; 32] {
    let mut hasher = Hasher::new();
    hasher.update(salt);
    hasher.update(user_seed);
    hasher.update(name.as_bytes());
    *hasher.finalize().as_bytes()
}

/// Picks a length in `[MIN_LEN, MAX_LEN]` from the digest's own last two
/// bytes, so the length itself is a pure function of the hash.
fn pick_length(digest: &[u8; 32]) -> usize {
    let a = digest[30] as usize;
    let b = digest[31] as usize;
    MIN_LEN + ((a.wrapping_add(b)) % 7)
}

fn is_digit(b: u8) -> bool {
    b.is_ascii_digit()
}

/// Remaps a leading digit into the letter region so the output is always a
/// syntactically valid identifier start.
fn remap_leading_digit(b: u8) -> u8 {
    // Digits occupy ALPHABET[52..62]; map them onto ALPHABET[0..10].
    let pos = ALPHABET.iter().position(|&c| c == b).unwrap_or(0);
    if pos >= 52 && pos < 62 {
        ALPHABET[pos - 52]
    } else {
        b'a'
    }
}

fn shape_case(mut bytes: [u8; MAX_LEN], len: usize, vis: Visibility) -> [u8; MAX_LEN] {
    if bytes[0] == b'_' {
        // `_` cannot carry case; remap to a fixed letter per direction.
        bytes[0] = match vis {
            Visibility::Exported => b'Q',
            Visibility::Unexported => b'q',
        };
    } else {
        bytes[0] = match vis {
            Visibility::Exported => bytes[0].to_ascii_uppercase(),
            Visibility::Unexported => bytes[0].to_ascii_lowercase(),
        };
    }
    let _ = len;
    bytes
}

/// Produces an obfuscated identifier for `name`, salted with `salt` and the
/// optional user seed, preserving exported/unexported capitalization.
///
/// `name` must be non-empty. The result is a valid Rust identifier of
/// length in `[8, 15]`.
pub fn obfuscate_ident(salt: &[u8], user_seed: &[u8], name: &str, vis: Visibility) -> String {
    debug_assert!(!name.is_empty(), "identifiers must be non-empty");
    let d = digest(salt, user_seed, name);
    let len = pick_length(&d);
    let encoded = encode_alphabet(&d);

    let mut buf = [0u8; MAX_LEN];
    buf[..len].copy_from_slice(&encoded[..len]);

    if is_digit(buf[0]) {
        buf[0] = remap_leading_digit(buf[0]);
    }
    let buf = shape_case(buf, len, vis);

    // SAFETY-free: every byte in ALPHABET is ASCII, so this is valid UTF-8.
    String::from_utf8(buf[..len].to_vec()).expect("alphabet is ASCII")
}

/// Obfuscates a file base name (no directory, no extension change implied),
/// used for position-string salting and scratch file names. Always treated
/// as unexported (file names carry no export semantics).
pub fn obfuscate_file_name(salt: &[u8], user_seed: &[u8], base_name: &str) -> String {
    obfuscate_ident(salt, user_seed, base_name, Visibility::Unexported)
}

/// Derives whether a name is "exported" under Rust's visibility convention:
/// starts with an uppercase ASCII letter (types/traits/consts) is *not*
/// sufficient on its own in Rust (unlike Go) -- murk instead takes the
/// `pub`-ness of the bound item, threaded in by the caller. This helper
/// exists for position/file salts, where there is no visibility and the
/// caller passes `Visibility::Unexported` unconditionally.
pub fn visibility_of_pub(is_pub: bool) -> Visibility {
    if is_pub {
        Visibility::Exported
    } else {
        Visibility::Unexported
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_ident(s: &str) -> bool {
        let mut chars = s.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => return false,
        }
        chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    }

    #[test]
    fn deterministic() {
        let a = obfuscate_ident(b"salt1", b"", "Foo", Visibility::Exported);
        let b = obfuscate_ident(b"salt1", b"", "Foo", Visibility::Exported);
        assert_eq!(a, b);
    }

    #[test]
    fn length_in_window() {
        for name in ["a", "Foo", "some_longer_identifier_name", "X"] {
            let out = obfuscate_ident(b"salt", b"", name, Visibility::Unexported);
            assert!(out.len() >= MIN_LEN && out.len() <= MAX_LEN, "{out}");
        }
    }

    #[test]
    fn valid_identifier_always() {
        for i in 0..200u32 {
            let name = format!("ident_{i}");
            let out = obfuscate_ident(b"salt", b"", &name, Visibility::Exported);
            assert!(valid_ident(&out), "invalid ident: {out}");
        }
    }

    #[test]
    fn capitalization_preserved() {
        let exported = obfuscate_ident(b"salt", b"", "Foo", Visibility::Exported);
        let unexported = obfuscate_ident(b"salt", b"", "foo", Visibility::Unexported);
        assert!(exported.chars().next().unwrap().is_ascii_uppercase());
        assert!(unexported.chars().next().unwrap().is_ascii_lowercase());
    }

    #[test]
    fn different_salts_differ() {
        let a = obfuscate_ident(b"salt-a", b"", "Foo", Visibility::Exported);
        let b = obfuscate_ident(b"salt-b", b"", "Foo", Visibility::Exported);
        assert_ne!(a, b);
    }

    #[test]
    fn no_collisions_in_sample() {
        use std::collections::HashSet;
        let mut seen = HashSet::new();
        for i in 0..5000 {
            let name = format!("item_{i}");
            let out = obfuscate_ident(b"fixed-salt", b"", &name, Visibility::Unexported);
            assert!(seen.insert(out), "collision at {i}");
        }
    }
}
