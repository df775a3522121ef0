//! `murk reverse` (spec §6): recovers original identifiers from an
//! obfuscated crate's output -- a panic backtrace, a log excerpt, any
//! captured text -- using the renamed-identifier table a matching build
//! left behind in the analysis cache.
//!
//! This only reverses identifiers, not source positions: the runtime
//! patch (`murk_transform::runtime_patch`) redacts panic locations rather
//! than encoding a recoverable hash of them, a narrowing from spec.md's
//! full position-reversal recorded in `DESIGN.md`.

use std::collections::HashMap;
use std::io::Read as _;
use std::path::PathBuf;

use murk_core::{AnalysisCache, ReverseMeta};

use crate::cli::ReverseArgs;
use crate::error::{Error, Result};
use crate::planner;

pub fn run(args: &ReverseArgs) -> Result<i32> {
    let cache_root = planner::resolve_cache_root()?;

    let meta = murk_core::reverse_meta::load(&cache_root, &args.main_crate)?.ok_or_else(|| {
        Error::Core(murk_core::Error::UsageError(format!(
            "no cached build metadata for {:?}; run `murk build` for it first",
            args.main_crate
        )))
    })?;

    let dictionary = load_dictionary(&cache_root, &meta)?;
    let text = read_input(&args.files)?;
    print!("{}", translate(&text, &dictionary));
    Ok(0)
}

fn load_dictionary(cache_root: &std::path::Path, meta: &ReverseMeta) -> Result<HashMap<String, String>> {
    let cache = AnalysisCache::new(cache_root.to_path_buf())?;
    let mut dictionary = HashMap::new();

    if let Some(entry) = cache.load(&meta.action_id)? {
        dictionary.extend(entry.renamed_idents);
    }
    for dep_id in &meta.dependency_action_ids {
        if let Some(entry) = cache.load(dep_id)? {
            for (obfuscated, original) in entry.renamed_idents {
                dictionary.entry(obfuscated).or_insert(original);
            }
        }
    }
    Ok(dictionary)
}

fn read_input(files: &[PathBuf]) -> Result<String> {
    if files.is_empty() {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .map_err(murk_core::Error::from)?;
        Ok(buf)
    } else {
        let mut combined = String::new();
        for f in files {
            combined.push_str(&std::fs::read_to_string(f).map_err(murk_core::Error::from)?);
        }
        Ok(combined)
    }
}

/// Replaces every whole-word match of a known obfuscated identifier with
/// `original (obfuscated)`; everything else passes through untouched.
/// This is a plain token scan rather than a real tokenizer, since the
/// input is arbitrary captured text (a panic message, a log line), not
/// parseable Rust source.
fn translate(text: &str, dictionary: &HashMap<String, String>) -> String {
    let bytes = text.as_bytes();
    let is_ident_char = |b: u8| b.is_ascii_alphanumeric() || b == b'_';
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < bytes.len() {
        if is_ident_char(bytes[i]) && (i == 0 || !is_ident_char(bytes[i - 1])) {
            let start = i;
            while i < bytes.len() && is_ident_char(bytes[i]) {
                i += 1;
            }
            let word = &text[start..i];
            match dictionary.get(word) {
                Some(original) => {
                    out.push_str(original);
                    out.push_str(" (");
                    out.push_str(word);
                    out.push(')');
                }
                None => out.push_str(word),
            }
        } else {
            let ch = text[i..].chars().next().expect("i is a valid char boundary");
            out.push(ch);
            i += ch.len_utf8();
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translates_known_identifier_and_leaves_rest() {
        let mut dict = HashMap::new();
        dict.insert("a1b2c3d4".to_string(), "run_server".to_string());
        let out = translate("thread panicked in a1b2c3d4 at line 10", &dict);
        assert_eq!(out, "thread panicked in run_server (a1b2c3d4) at line 10");
    }

    #[test]
    fn unknown_identifiers_pass_through() {
        let dict = HashMap::new();
        let out = translate("no known names here", &dict);
        assert_eq!(out, "no known names here");
    }

    #[test]
    fn does_not_partially_match_inside_a_longer_word() {
        let mut dict = HashMap::new();
        dict.insert("foo".to_string(), "bar".to_string());
        let out = translate("foobar foo_baz foo", &dict);
        assert_eq!(out, "foobar foo_baz bar (foo)");
    }
}
