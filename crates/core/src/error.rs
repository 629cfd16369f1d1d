use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {message}")]
    Storage { message: String },

    #[error("cancelled")]
    Cancelled,

    #[error("unsupported path (must be UTF-8): {path:?}")]
    NonUtf8Path { path: PathBuf },
}

impl Error {
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidConfig { .. } => "config.invalid",
            Error::Io(_) => "io.error",
            Error::Storage { .. } => "storage.error",
            Error::Cancelled => "upload.cancelled",
            Error::NonUtf8Path { .. } => "path.non_utf8",
        }
    }
}
