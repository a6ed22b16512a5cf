use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum Error {
    /// A caller-supplied parameter is outside its valid range.
    #[error("invalid parameter: {0}")]
    Param(String),
    /// Persisted index data did not match the expected layout.
    #[error("malformed index data: {0}")]
    Format(String),
    /// Training produced non-finite projection or rotation values.
    #[error("numerical failure: {0}")]
    Numeric(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Short reads while decoding index files are format errors, not I/O errors.
    pub(crate) fn from_read(e: std::io::Error) -> Error {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::Format("unexpected end of file".to_string())
        } else {
            Error::Io(e)
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
