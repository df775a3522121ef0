use std::path::PathBuf;

/// Taxonomy of errors the murk core can raise, matching the kinds a worker
/// or planner needs to report distinctly to the process boundary.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad CLI input: unknown flag, malformed seed, missing target. Exit 2.
    #[error("usage: {0}")]
    UsageError(String),

    /// The host environment is unsuitable: toolchain missing, cache
    /// unreadable, wrong rustc version.
    #[error("environment error: {0}")]
    Environment(String),

    /// Aggregated failures from `cargo metadata` / crate graph resolution.
    #[error("failed to resolve crate graph:\n{0}")]
    CrateGraph(String),

    /// Parse/type-check/rewrite failure for a specific crate and file.
    #[error("{crate_name}: {file}: {message}")]
    Transformation {
        crate_name: String,
        file: PathBuf,
        message: String,
    },

    /// An explicit refusal, e.g. a link-name into a runtime-patched symbol.
    #[error("refused: {0}")]
    Policy(String),

    /// "Should not happen" invariant violation.
    #[error("internal invariant violated at {site}: {message}")]
    Internal { site: &'static str, message: String },

    #[error("cache error: {0}")]
    Cache(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to decode plan or cache entry: {0}")]
    Codec(String),
}

/// A position-prefixed diagnostic, as produced by the crate loader.
#[derive(Debug, Clone)]
pub struct PositionedMessage {
    pub position: Option<String>,
    pub message: String,
}

impl std::fmt::Display for PositionedMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.position {
            Some(pos) => write!(f, "{pos}: {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Formats a batch of crate-loader diagnostics into the stable, sorted
/// string carried by [`Error::CrateGraph`].
pub fn format_positions(msgs: &[PositionedMessage]) -> String {
    let mut sorted: Vec<String> = msgs.iter().map(|m| m.to_string()).collect();
    sorted.sort();
    sorted.join("\n")
}

pub type Result<T> = std::result::Result<T, Error>;
