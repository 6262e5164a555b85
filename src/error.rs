use std::io;

use thiserror::Error;

/// Everything that can go wrong while browsing a folder or producing a
/// thumbnail.
///
/// Per-file kinds (`Io`, `UnsupportedFormat`, `CorruptHeader`, `OutOfMemory`,
/// `Timeout`) are recorded against that file's slot and surfaced through the
/// result callback; they never abort a scan. `DirectoryUnreadable` fails the
/// whole scan synchronously. `Cancelled` is internal bookkeeping and is never
/// delivered to the consumer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(String),

    #[error("not a recognized HDR image file")]
    UnsupportedFormat,

    #[error("corrupt image header: {0}")]
    CorruptHeader(String),

    #[error("pixel buffer allocation failed")]
    OutOfMemory,

    #[error("decode did not finish within the job deadline")]
    Timeout,

    #[error("directory cannot be listed: {0}")]
    DirectoryUnreadable(String),

    #[error("job cancelled")]
    Cancelled,
}

impl Error {
    /// An expired decode deadline travels through the readers as
    /// `io::ErrorKind::TimedOut`; everything else stays an i/o error.
    pub fn from_io(err: &io::Error) -> Self {
        if err.kind() == io::ErrorKind::TimedOut {
            Error::Timeout
        } else {
            Error::Io(err.to_string())
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
