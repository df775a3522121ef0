//! The linker transform (spec §4.8), realized as the argv/env rewriting
//! done by the `murk` binary when Cargo invokes it via `-C linker=<murk>`
//! (`MURK_LINK_WRAPPER=1` is the sentinel that tells the worker it was
//! invoked as a linker rather than as `RUSTC_WRAPPER`). murk is not
//! itself a linker: it rewrites argv/env and then execs the real linker
//! program read from the plan.

use std::collections::HashMap;

/// One `-Wl,--defsym=obfuscated=original`-shaped alias the linker
/// transform must add, so both the plaintext and the obfuscated spelling
/// of a symbol remain linkable (e.g. a dependency that was not itself
/// obfuscated may still reference the plaintext name).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolAlias {
    pub obfuscated: String,
    pub original: String,
}

/// Rewrites one linker invocation's argv, given the symbol aliases this
/// link needs and whether the host linker is GNU ld/lld-compatible
/// (build-id and linker-script support differ across linkers; spec §4.8
/// rule 3 falls back to a no-op with a logged warning otherwise).
pub struct LinkerRewrite {
    pub aliases: Vec<SymbolAlias>,
    pub gnu_compatible: bool,
    /// Path to a linker script the scratch directory already contains,
    /// carrying the fixed placeholder for the embedded compiler version
    /// string (spec §4.8 rule 3's "inject a fixed placeholder").
    pub version_placeholder_script: Option<std::path::PathBuf>,
}

impl LinkerRewrite {
    /// Builds the final argv to exec the real linker with, given the argv
    /// Cargo invoked *us* with (`real_linker` replaces argv[0]).
    pub fn rewrite_argv(&self, real_linker: &str, original_args: &[String]) -> Vec<String> {
        let mut args = Vec::with_capacity(original_args.len() + self.aliases.len() * 2 + 4);
        args.push(real_linker.to_string());
        args.extend(original_args.iter().cloned());

        for alias in &self.aliases {
            // Duplicate the plaintext defsym alongside the obfuscated one:
            // whichever reference a not-obfuscated dependency kept still
            // resolves, and so does the obfuscated symbol the rest of the
            // obfuscated graph now emits.
            args.push(format!(
                "-Wl,--defsym={}={}",
                alias.obfuscated, alias.original
            ));
        }

        // `-C strip=symbols` is applied earlier at the rustc-wrapper
        // stage; these are forwarded too for linkers that only honor
        // link-time strip flags.
        args.push("-Wl,-s".to_string());
        args.push("-Wl,--strip-all".to_string());

        if self.gnu_compatible {
            args.push("-Wl,--build-id=none".to_string());
            if let Some(script) = &self.version_placeholder_script {
                args.push(format!("-Wl,-T,{}", script.display()));
            }
        } else {
            log::warn!(
                "murk: host linker does not look GNU ld/lld-compatible; \
                 relying on -C strip=symbols alone to remove the version string"
            );
        }

        args
    }
}

/// Builds the set of [`SymbolAlias`] entries for one link step: every
/// top-level item the plan renamed in an obfuscated crate that is also
/// `#[no_mangle]`/`#[export_name]`-visible to the linker gets a
/// plaintext-to-obfuscated alias pair.
pub fn build_aliases(exported_renames: &HashMap<String, String>) -> Vec<SymbolAlias> {
    exported_renames
        .iter()
        .map(|(original, obfuscated)| SymbolAlias {
            obfuscated: obfuscated.clone(),
            original: original.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrite_adds_defsym_per_alias_and_forwards_real_linker() {
        let rewrite = LinkerRewrite {
            aliases: vec![SymbolAlias {
                obfuscated: "a1b2c3d4".to_string(),
                original: "murk_visible_fn".to_string(),
            }],
            gnu_compatible: true,
            version_placeholder_script: None,
        };
        let argv = rewrite.rewrite_argv("cc", &["-o".to_string(), "out".to_string()]);
        assert_eq!(argv[0], "cc");
        assert!(argv.contains(&"-Wl,--defsym=a1b2c3d4=murk_visible_fn".to_string()));
        assert!(argv.contains(&"-Wl,--build-id=none".to_string()));
    }

    #[test]
    fn non_gnu_linker_skips_build_id_flag() {
        let rewrite = LinkerRewrite {
            aliases: vec![],
            gnu_compatible: false,
            version_placeholder_script: None,
        };
        let argv = rewrite.rewrite_argv("ld64", &[]);
        assert!(!argv.iter().any(|a| a.contains("build-id")));
    }

    #[test]
    fn build_aliases_round_trips_map_entries() {
        let mut renames = HashMap::new();
        renames.insert("Foo".to_string(), "q1w2e3r4".to_string());
        let aliases = build_aliases(&renames);
        assert_eq!(aliases.len(), 1);
        assert_eq!(aliases[0].original, "Foo");
        assert_eq!(aliases[0].obfuscated, "q1w2e3r4");
    }
}
