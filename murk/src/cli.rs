//! The `murk` command-line surface (spec §6), realized with `clap` derive.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "murk", version, about = "A source-level build obfuscator for Cargo workspaces")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase log verbosity; repeatable (`-v`, `-vv`, ...). `RUST_LOG`
    /// always takes precedence when set.
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// `cargo build` under obfuscation.
    Build(BuildArgs),
    /// `cargo test` under obfuscation.
    Test(BuildArgs),
    /// `cargo run` under obfuscation.
    Run(BuildArgs),
    /// Translate obfuscated names back to their originals in a panic
    /// backtrace or other captured text, using a build's analysis cache.
    Reverse(ReverseArgs),
}

#[derive(Debug, Args)]
pub struct BuildArgs {
    /// Obfuscation-set glob pattern (comma-separated), analogous to
    /// `GOGARBLE`/`GOPRIVATE`. Defaults to the root package alone.
    #[arg(long = "obfuscate", env = "MURK_PATTERN")]
    pub pattern: Option<String>,

    /// Obfuscate literal values (strings, integers, floats, bools).
    #[arg(long)]
    pub literals: bool,

    /// More aggressive stripping: suppress panic message text, not just
    /// its location.
    #[arg(long)]
    pub tiny: bool,

    /// Keep obfuscated names visible in murk's own log output instead of
    /// masking them.
    #[arg(long)]
    pub debug: bool,

    /// Write the rewritten scratch sources somewhere inspectable instead
    /// of a throwaway temp directory.
    #[arg(long)]
    pub debugdir: Option<PathBuf>,

    /// Base64-encoded seed (or the literal `random`) for reproducible
    /// obfuscation across builds, independent of crate content.
    #[arg(long)]
    pub seed: Option<String>,

    /// Cargo package/target specs and trailing flags to forward verbatim.
    #[arg(trailing_var_arg = true)]
    pub targets: Vec<String>,
}

#[derive(Debug, Args)]
pub struct ReverseArgs {
    /// The main crate's import path, used to locate its analysis cache
    /// entries.
    pub main_crate: String,

    /// Files to de-obfuscate (stdin is read if none are given).
    pub files: Vec<PathBuf>,
}
