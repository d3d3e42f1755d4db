//! Closed error taxonomy for the decompression engine: messages and
//! call-site location are kept separate from the error's semantic kind.

use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::panic::Location;

/// The closed set of ways a decode can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad Kraft sum, bad block checksum, table over-read, invalid distance,
    /// size mismatch at file end, invalid repeat symbol at table start.
    CorruptedData,
    /// Unknown filter type, filter overlap, filter queue saturation.
    UnsupportedFilter,
    /// Soft-recoverable bit inconsistency; promoted to `CorruptedData` by the
    /// caller only if no output survives the current file.
    MinorError,
    /// The byte source or sink reported an error.
    Io,
    /// A buffer allocation was refused.
    OutOfMemory,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::CorruptedData => "corrupted data",
            ErrorKind::UnsupportedFilter => "unsupported filter",
            ErrorKind::MinorError => "minor error",
            ErrorKind::Io => "io error",
            ErrorKind::OutOfMemory => "out of memory",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub struct RarError {
    pub kind: ErrorKind,
    pub message: Option<String>,
    pub context: Option<String>,
    pub source: Option<Box<dyn Error + Send + Sync>>,
    pub location: &'static Location<'static>,
}

pub type Res<T> = Result<T, RarError>;

impl Error for RarError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_deref().map(|e| e as &(dyn Error + 'static))
    }
}

impl Display for RarError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}", self.kind, self.location)?;
        if let Some(context) = &self.context {
            write!(f, " ({})", context)?
        }
        if let Some(message) = &self.message {
            write!(f, ": {}", message)?
        }
        if let Some(cause) = &self.source {
            write!(f, "\ncaused by {}", cause)?
        }
        Ok(())
    }
}

impl From<RarError> for std::io::Error {
    fn from(value: RarError) -> Self {
        let kind = match value.kind {
            ErrorKind::Io => std::io::ErrorKind::Other,
            _ => std::io::ErrorKind::InvalidData,
        };
        std::io::Error::new(kind, value)
    }
}

/// Carries everything needed to build a `RarError` except the call-site
/// location, which is attached on conversion so `#[track_caller]` points at
/// the raising site rather than some shared helper.
pub(crate) struct ErrorBuilder {
    pub kind: ErrorKind,
    pub message: Option<String>,
    pub context: Option<String>,
    pub source: Option<Box<dyn Error + Send + Sync>>,
}

impl ErrorBuilder {
    pub fn new(kind: ErrorKind) -> Self {
        ErrorBuilder {
            kind,
            message: None,
            context: None,
            source: None,
        }
    }
}

#[track_caller]
pub(crate) fn raise<T>(kind: ErrorKind, message: impl Into<String>) -> Res<T> {
    let message = message.into();
    if matches!(kind, ErrorKind::CorruptedData | ErrorKind::UnsupportedFilter) {
        log::error!("{}: {}", kind, message);
    }
    Err(RarError {
        kind,
        message: Some(message),
        context: None,
        source: None,
        location: Location::caller(),
    })
}

#[track_caller]
pub(crate) fn corrupted<T>(message: impl Into<String>) -> Res<T> {
    raise(ErrorKind::CorruptedData, message)
}

#[track_caller]
pub(crate) fn unsupported_filter<T>(message: impl Into<String>) -> Res<T> {
    raise(ErrorKind::UnsupportedFilter, message)
}

pub(crate) trait WithContext<T> {
    fn at(self, context: &dyn ErrorContext) -> Res<T>;
}

impl<T> WithContext<T> for Result<T, ErrorBuilder> {
    #[track_caller]
    fn at(self, context: &dyn ErrorContext) -> Res<T> {
        self.map_err(|b| RarError {
            kind: b.kind,
            message: b.message,
            context: context.describe().or(b.context),
            source: b.source,
            location: Location::caller(),
        })
    }
}

impl<T, E: Error + Send + Sync + 'static> WithContext<T> for Result<T, E> {
    #[track_caller]
    fn at(self, context: &dyn ErrorContext) -> Res<T> {
        self.map_err(|e| RarError {
            kind: ErrorKind::Io,
            message: None,
            context: context.describe(),
            source: Some(Box::new(e)),
            location: Location::caller(),
        })
    }
}

/// Implemented by any component that can describe its own state for error
/// messages.
pub(crate) trait ErrorContext {
    fn describe(&self) -> Option<String> {
        None
    }
}

pub(crate) trait ResultBuilder<T>: Sized {
    fn msg_of<M: Debug>(self, kind: ErrorKind, msg: &M) -> Res<T>;
}

impl<T> ResultBuilder<T> for Option<T> {
    #[track_caller]
    fn msg_of<M: Debug>(self, kind: ErrorKind, msg: &M) -> Res<T> {
        match self {
            Some(v) => Ok(v),
            None => Err(RarError {
                kind,
                message: Some(format!("{:?}", msg)),
                context: None,
                source: None,
                location: Location::caller(),
            }),
        }
    }
}
