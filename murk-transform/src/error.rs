use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to parse {file}: {message}")]
    Parse { file: String, message: String },
    #[error("failed to print rewritten source for {file}: {message}")]
    Print { file: String, message: String },
    #[error(transparent)]
    Core(#[from] murk_core::error::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
