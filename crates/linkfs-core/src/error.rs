//! Error types for linkfs core

/// Core filesystem error type
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("too many levels of symbolic links")]
    TooManyLinks,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("name not allowed")]
    InvalidName,
    #[error("directory not empty")]
    NotEmpty,
    #[error("access denied")]
    AccessDenied,
    #[error("bad handle")]
    BadHandle,
    #[error("too many open files")]
    TooManyOpenFiles,
    #[error("no space left")]
    NoSpace,
}

pub type FsResult<T> = Result<T, FsError>;
