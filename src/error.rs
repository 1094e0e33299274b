//! Errors raised by the engine and its clients.
//!
//! Every failure carries an [`ErrorKind`] modelled on gRPC status codes.
//! HTTP responses and I/O errors are classified on conversion. Across the
//! host boundary the kinds collapse into the coarser names returned by
//! [`Error::category`].
//!
//! ```rust
//! use playsync::error::{Error, Result};
//!
//! fn play(ready: bool) -> Result<()> {
//!     if !ready {
//!         return Err(Error::failed_precondition("no device is ready"));
//!     }
//!     Ok(())
//! }
//!
//! assert_eq!(play(false).unwrap_err().category(), "NotReadyError");
//! ```

#![allow(clippy::enum_glob_use)]

use std::fmt;
use thiserror::Error;

/// An [`ErrorKind`] paired with whatever caused it.
#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub error: Box<dyn std::error::Error + Send + Sync>,
}

impl Error {
    /// Returns the name of the error as reported to the host.
    ///
    /// The host does not care about the fine-grained status codes; it only
    /// distinguishes:
    /// * `NotReadyError` - no session or device yet, expected during startup
    /// * `AuthenticationError` - credential rejected, needs re-authentication
    /// * `AccountError` - account cannot play (e.g. no premium subscription)
    /// * `InvalidArgumentError` - malformed command arguments
    /// * `ClientOperationError` - the playback client or network failed
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self.kind {
            ErrorKind::FailedPrecondition => "NotReadyError",
            ErrorKind::Unauthenticated => "AuthenticationError",
            ErrorKind::PermissionDenied => "AccountError",
            ErrorKind::InvalidArgument | ErrorKind::OutOfRange => "InvalidArgumentError",
            _ => "ClientOperationError",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure classes, numbered like their gRPC status codes.
#[expect(clippy::module_name_repetitions)]
#[derive(Clone, Copy, Debug, Eq, Error, Hash, Ord, PartialEq, PartialOrd)]
#[repr(u32)]
pub enum ErrorKind {
    #[error("operation was cancelled")]
    Cancelled = 1,

    #[error("unknown error")]
    Unknown = 2,

    /// Malformed command arguments or responses.
    #[error("invalid argument specified")]
    InvalidArgument = 3,

    #[error("operation timed out")]
    DeadlineExceeded = 4,

    #[error("not found")]
    NotFound = 5,

    /// The account may not do this, e.g. playback without a subscription.
    #[error("permission denied")]
    PermissionDenied = 7,

    /// The credential was rejected or has expired.
    #[error("no valid authentication credentials")]
    Unauthenticated = 16,

    /// Rate limited by the web API.
    #[error("resource has been exhausted")]
    ResourceExhausted = 8,

    /// No session or no ready device. Expected while starting up.
    #[error("invalid state")]
    FailedPrecondition = 9,

    #[error("operation aborted")]
    Aborted = 10,

    #[error("out of range")]
    OutOfRange = 11,

    #[error("internal error")]
    Internal = 13,

    #[error("service unavailable")]
    Unavailable = 14,
}

impl Error {
    /// Creates a new error with specified kind and details.
    pub fn new<E>(kind: ErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind,
            error: error.into(),
        }
    }
}

/// Generates one shorthand constructor per [`ErrorKind`].
macro_rules! constructors {
    ($($name:ident => $kind:ident),+ $(,)?) => {
        impl Error {
            $(
                #[doc = concat!("Creates an [`ErrorKind::", stringify!($kind), "`] error.")]
                pub fn $name<E>(error: E) -> Self
                where
                    E: Into<Box<dyn std::error::Error + Send + Sync>>,
                {
                    Self::new(ErrorKind::$kind, error)
                }
            )+
        }
    };
}

constructors! {
    aborted => Aborted,
    cancelled => Cancelled,
    deadline_exceeded => DeadlineExceeded,
    failed_precondition => FailedPrecondition,
    internal => Internal,
    invalid_argument => InvalidArgument,
    not_found => NotFound,
    out_of_range => OutOfRange,
    permission_denied => PermissionDenied,
    resource_exhausted => ResourceExhausted,
    unauthenticated => Unauthenticated,
    unavailable => Unavailable,
    unknown => Unknown,
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error.source()
    }
}

/// Renders as `{kind}: {details}`.
impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}: ", self.kind)?;
        self.error.fmt(fmt)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match err.kind() {
            NotFound => Self::not_found(err),
            PermissionDenied => Self::permission_denied(err),
            AddrNotAvailable | ConnectionRefused | NotConnected => Self::unavailable(err),
            BrokenPipe | ConnectionReset | ConnectionAborted => Self::aborted(err),
            Interrupted | WouldBlock => Self::cancelled(err),
            TimedOut => Self::deadline_exceeded(err),
            InvalidInput | InvalidData => Self::invalid_argument(err),
            WriteZero => Self::resource_exhausted(err),
            _ => Self::unknown(err),
        }
    }
}

/// Status errors are classified by [`Error::from_status`], the rest by
/// what went wrong on the wire.
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(status, err);
        }

        if err.is_decode() {
            return Self::invalid_argument(err);
        }

        if err.is_builder() {
            return Self::internal(err);
        }

        if err.is_connect() || err.is_redirect() {
            return Self::unavailable(err);
        }

        if err.is_timeout() {
            return Self::deadline_exceeded(err);
        }

        Self::unknown(err)
    }
}

impl Error {
    /// Classifies a non-success HTTP status code.
    ///
    /// * 401 -> `Unauthenticated`
    /// * 403 -> `PermissionDenied`
    /// * 404 -> `NotFound`
    /// * 429 -> `ResourceExhausted`
    /// * 5xx -> `Unavailable`
    /// * anything else -> `Unknown`
    pub fn from_status<E>(status: reqwest::StatusCode, error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        use reqwest::StatusCode;
        match status {
            StatusCode::UNAUTHORIZED => Self::unauthenticated(error),
            StatusCode::FORBIDDEN => Self::permission_denied(error),
            StatusCode::NOT_FOUND => Self::not_found(error),
            StatusCode::TOO_MANY_REQUESTS => Self::resource_exhausted(error),
            status if status.is_server_error() => Self::unavailable(error),
            _ => Self::unknown(error),
        }
    }
}

/// Classified like the I/O error it converts into.
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        std::io::Error::from(err).into()
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Self::invalid_argument(e.to_string())
    }
}

/// URLs are built from configuration, so a bad one is our fault.
impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Self::internal(e.to_string())
    }
}
