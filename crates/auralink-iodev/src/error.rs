//! Errors surfaced by device back-ends.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IoDevError {
    #[error("no supported format intersection between stream and device")]
    NoFormatIntersection,

    #[error("device is not open")]
    NotOpen,

    #[error("back-end open failed: {0}")]
    OpenFailed(String),

    #[error("back-end I/O failed: {0}")]
    BackendIo(String),
}

pub type Result<T> = std::result::Result<T, IoDevError>;
