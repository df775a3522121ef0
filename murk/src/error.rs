use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("usage error: {0}")]
    Usage(String),
    #[error(transparent)]
    Core(#[from] murk_core::Error),
    #[error(transparent)]
    Transform(#[from] murk_transform::Error),
    #[error(transparent)]
    Metadata(#[from] cargo_metadata::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
