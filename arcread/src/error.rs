use std::fmt;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The non-error outcome of reading a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// The entry is complete.
    Ok,
    /// The entry is usable but something was recovered from. The message is
    /// available from [`ReadArchive::error_string`][crate::ReadArchive::error_string].
    Warn,
    /// No more entries.
    Eof,
}

/// How bad an [`Error`] is, from the least to the most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// A recoverable anomaly, all data before it has been delivered.
    Warn,
    /// The header just read looked invalid. Reading the next header again
    /// attempts to resynchronize.
    Retry,
    /// The current operation cannot complete, but the archive is still usable.
    Failed,
    /// The archive is now permanently unusable.
    Fatal,
}

/// An error raised from reading an archive.
pub struct Error(Box<ErrorInner>);

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug)]
pub(crate) enum ErrorInner {
    Warn(String),
    Retry(String),
    Failed(String),
    Fatal(String),
    Truncated(&'static str),
    Unrecognized(&'static str),
    FeatureDisabled {
        what: &'static str,
        feature: &'static str,
    },
    State {
        op: &'static str,
        state: &'static str,
    },
    Decompress(&'static str, std::io::Error),
    Write(std::io::Error),
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            ErrorInner::Warn(msg)
            | ErrorInner::Retry(msg)
            | ErrorInner::Failed(msg)
            | ErrorInner::Fatal(msg) => f.pad(msg),
            ErrorInner::Truncated(what) => write!(f, "truncated {what}"),
            ErrorInner::Unrecognized(what) => write!(f, "unrecognized {what}"),
            ErrorInner::FeatureDisabled { what, feature } => {
                write!(f, "{what} support is not enabled, feature `{feature}` is required")
            }
            ErrorInner::State { op, state } => {
                write!(f, "cannot {op} in state {state}")
            }
            ErrorInner::Decompress(what, err) => write!(f, "{what} decompression failed: {err}"),
            ErrorInner::Write(err) => write!(f, "failed to write entry data: {err}"),
            ErrorInner::Io(err) => write!(f, "input/output error: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &*self.0 {
            ErrorInner::Decompress(_, err) | ErrorInner::Write(err) | ErrorInner::Io(err) => {
                Some(err)
            }
            _ => None,
        }
    }
}

impl From<ErrorInner> for Error {
    #[cold]
    fn from(err: ErrorInner) -> Self {
        Self(Box::new(err))
    }
}

impl From<std::io::Error> for Error {
    #[cold]
    fn from(err: std::io::Error) -> Self {
        Self(Box::new(ErrorInner::Io(err)))
    }
}

// Needed for `Read` impl.
impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        match *err.0 {
            ErrorInner::Io(err) => err,
            _ => std::io::Error::new(std::io::ErrorKind::InvalidData, err),
        }
    }
}

impl Error {
    /// A recoverable anomaly.
    #[cold]
    pub fn warn(msg: impl Into<String>) -> Self {
        ErrorInner::Warn(msg.into()).into()
    }

    /// An invalid header, retrying may resynchronize.
    #[cold]
    pub fn retry(msg: impl Into<String>) -> Self {
        ErrorInner::Retry(msg.into()).into()
    }

    /// The current operation failed, the archive is still usable.
    #[cold]
    pub fn failed(msg: impl Into<String>) -> Self {
        ErrorInner::Failed(msg.into()).into()
    }

    /// The archive is permanently unusable.
    #[cold]
    pub fn fatal(msg: impl Into<String>) -> Self {
        ErrorInner::Fatal(msg.into()).into()
    }

    #[cold]
    pub(crate) fn truncated(what: &'static str) -> Self {
        ErrorInner::Truncated(what).into()
    }

    #[cold]
    pub(crate) fn unrecognized(what: &'static str) -> Self {
        ErrorInner::Unrecognized(what).into()
    }

    #[cold]
    pub(crate) fn state(op: &'static str, state: &'static str) -> Self {
        ErrorInner::State { op, state }.into()
    }

    #[cold]
    pub(crate) fn write(err: std::io::Error) -> Self {
        ErrorInner::Write(err).into()
    }

    #[cold]
    pub(crate) fn feature_disabled(what: &'static str, feature: &'static str) -> Self {
        ErrorInner::FeatureDisabled { what, feature }.into()
    }

    #[cold]
    pub(crate) fn decompress(what: &'static str, err: impl Into<std::io::Error>) -> Self {
        ErrorInner::Decompress(what, err.into()).into()
    }

    #[cold]
    pub(crate) fn decompress_msg(what: &'static str, msg: impl fmt::Display) -> Self {
        let err = std::io::Error::new(std::io::ErrorKind::InvalidData, msg.to_string());
        ErrorInner::Decompress(what, err).into()
    }

    pub fn severity(&self) -> Severity {
        match &*self.0 {
            ErrorInner::Warn(_) => Severity::Warn,
            ErrorInner::Retry(_) => Severity::Retry,
            ErrorInner::Failed(_) | ErrorInner::State { .. } | ErrorInner::Write(_) => {
                Severity::Failed
            }
            ErrorInner::Fatal(_)
            | ErrorInner::Truncated(_)
            | ErrorInner::Unrecognized(_)
            | ErrorInner::FeatureDisabled { .. }
            | ErrorInner::Decompress(..)
            | ErrorInner::Io(_) => Severity::Fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}
