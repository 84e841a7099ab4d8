use recordlink_files::FilesError;
use recordlink_token::{RenderError, TokenError};

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("failed to create storage directory: {0}")]
    StorageDirCreation(std::io::Error),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Files(#[from] FilesError),
    #[error(transparent)]
    Render(#[from] RenderError),
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
