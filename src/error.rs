use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Library-wide error type
#[derive(Error, Debug)]
pub enum UsbgError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not empty: {0}")]
    NotEmpty(String),

    #[error("Parse error in {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Fieldless discriminant of [`UsbgError`], handy for matching
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    InvalidParam,
    PermissionDenied,
    NotEmpty,
    Parse,
    Io,
}

impl UsbgError {
    /// Classify an I/O error raised while operating on `path`
    pub fn from_io(path: &Path, err: io::Error) -> Self {
        let target = path.display().to_string();
        match err.raw_os_error() {
            Some(libc::ENOENT) => return UsbgError::NotFound(target),
            Some(libc::EEXIST) => return UsbgError::AlreadyExists(target),
            Some(libc::EACCES) | Some(libc::EPERM) => {
                return UsbgError::PermissionDenied(target)
            }
            Some(libc::ENOTEMPTY) | Some(libc::EBUSY) => return UsbgError::NotEmpty(target),
            Some(libc::EINVAL) | Some(libc::ENAMETOOLONG) => {
                return UsbgError::InvalidParam(format!("{}: {}", target, err))
            }
            _ => {}
        }

        match err.kind() {
            io::ErrorKind::NotFound => UsbgError::NotFound(target),
            io::ErrorKind::AlreadyExists => UsbgError::AlreadyExists(target),
            io::ErrorKind::PermissionDenied => UsbgError::PermissionDenied(target),
            io::ErrorKind::InvalidInput => {
                UsbgError::InvalidParam(format!("{}: {}", target, err))
            }
            _ => UsbgError::Io {
                path: path.to_path_buf(),
                source: err,
            },
        }
    }

    /// Build a parse error for the leaf file at `path`
    pub fn parse(path: &Path, reason: impl Into<String>) -> Self {
        UsbgError::Parse {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            UsbgError::NotFound(_) => ErrorKind::NotFound,
            UsbgError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            UsbgError::InvalidParam(_) => ErrorKind::InvalidParam,
            UsbgError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            UsbgError::NotEmpty(_) => ErrorKind::NotEmpty,
            UsbgError::Parse { .. } => ErrorKind::Parse,
            UsbgError::Io { .. } => ErrorKind::Io,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, UsbgError>;
