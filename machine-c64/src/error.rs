//! Error taxonomy of the emulator core.

use thiserror::Error;

/// Numeric error codes surfaced over the host boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    Ok = 0,
    OutOfMemory = 1,
    CantRead = 2,
    CantWrite = 3,
    UnsupportedCrt = 4,
    RomMissing = 5,
    FsWrongCapacity = 6,
    FsDirectoryNotEmpty = 7,
    FsHasNoFiles = 8,
    FsCorrupted = 9,
}

/// Core error type. Every variant maps onto one of the stable
/// [`ErrorCode`] values for hosts that only speak numbers.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unable to read: {0}")]
    CantRead(String),

    #[error("unable to write: {0}")]
    CantWrite(String),

    #[error("unsupported cartridge type {0}")]
    UnsupportedCrt(u16),

    #[error("a required ROM image is not installed")]
    RomMissing,

    #[error("buffer size does not match the device capacity (expected {expected}, got {got})")]
    FsWrongCapacity { expected: usize, got: usize },

    #[error("target directory is not empty")]
    FsDirectoryNotEmpty,

    #[error("file system contains no files")]
    FsHasNoFiles,

    #[error("file system is corrupted")]
    FsCorrupted,
}

impl Error {
    /// Stable numeric code for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::CantRead(_) => ErrorCode::CantRead,
            Error::CantWrite(_) => ErrorCode::CantWrite,
            Error::UnsupportedCrt(_) => ErrorCode::UnsupportedCrt,
            Error::RomMissing => ErrorCode::RomMissing,
            Error::FsWrongCapacity { .. } => ErrorCode::FsWrongCapacity,
            Error::FsDirectoryNotEmpty => ErrorCode::FsDirectoryNotEmpty,
            Error::FsHasNoFiles => ErrorCode::FsHasNoFiles,
            Error::FsCorrupted => ErrorCode::FsCorrupted,
        }
    }
}

impl From<emu_core::ReadError> for Error {
    fn from(err: emu_core::ReadError) -> Self {
        Error::CantRead(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::RomMissing.code() as u32, 5);
        assert_eq!(
            Error::FsWrongCapacity {
                expected: 1,
                got: 2
            }
            .code() as u32,
            6
        );
    }
}
