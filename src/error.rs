//! Error handling for plexer.
//!
//! Provides a single error type that pairs an [`ErrorKind`] with the
//! underlying error details. Kinds fall into three groups:
//!
//! * Usage errors, fixable by the caller before any network call:
//!   [`ErrorKind::InvalidAddress`], [`ErrorKind::InvalidPort`],
//!   [`ErrorKind::InvalidArgument`]
//! * Decoding errors, caused by the response data:
//!   [`ErrorKind::EmptyResponse`], [`ErrorKind::MalformedResponse`]
//! * Transport errors, raised while fetching a response
//!
//! Per-entry anomalies (a missing title, an unparsable number, a device
//! without a host) are never errors. They are absorbed into the counters of
//! a [`Listing`](crate::normalize::Listing).
//!
//! # Example
//!
//! ```rust
//! use plexer::error::{Error, ErrorKind, Result};
//!
//! fn check(port: &str) -> Result<u16> {
//!     port.parse()
//!         .map_err(|e| Error::invalid_port(format!("{port}: {e}")))
//! }
//! ```

#![allow(clippy::enum_glob_use)]

use std::fmt;
use thiserror::Error;

/// Main error type combining error kind and details.
#[derive(Debug)]
pub struct Error {
    /// Classification of the error
    pub kind: ErrorKind,

    /// Details of the underlying error
    pub error: Box<dyn std::error::Error + Send + Sync>,
}

/// Standard result type for plexer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories.
///
/// Usage and decoding kinds are specific to parsing; transport kinds map to
/// the HTTP status codes noted on each variant.
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Copy, Debug, Eq, Error, Hash, Ord, PartialEq, PartialOrd)]
pub enum ErrorKind {
    /// Server address or navigation path is unusable.
    #[error("invalid address")]
    InvalidAddress,

    /// Port is not an integer in 1-65535.
    #[error("invalid port")]
    InvalidPort,

    /// Any other caller-supplied value is unusable.
    #[error("invalid argument specified")]
    InvalidArgument,

    /// The response body contained no data.
    #[error("empty response")]
    EmptyResponse,

    /// The response body could not be decoded under any supported encoding.
    #[error("malformed response")]
    MalformedResponse,

    /// HTTP Mapping: 401 Unauthorized
    #[error("no valid authentication credentials")]
    Unauthenticated,

    /// HTTP Mapping: 403 Forbidden
    #[error("permission denied")]
    PermissionDenied,

    /// HTTP Mapping: 404 Not Found
    #[error("not found")]
    NotFound,

    /// HTTP Mapping: 504 Gateway Timeout
    #[error("operation timed out")]
    DeadlineExceeded,

    /// HTTP Mapping: 503 Service Unavailable
    #[error("service unavailable")]
    Unavailable,

    /// The response body could not be read completely.
    #[error("unrecoverable data loss or corruption")]
    DataLoss,

    /// HTTP Mapping: 500 Internal Server Error
    #[error("internal error")]
    Internal,

    /// HTTP Mapping: 500 Internal Server Error
    #[error("unknown error")]
    Unknown,
}

/// Details of a [`ErrorKind::MalformedResponse`].
///
/// Carries the byte offset at which decoding stopped. The offset is always
/// within the input: `0 <= offset < input.len()`.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("{reason} (at byte {offset})")]
pub struct Malformed {
    /// Byte offset where decoding stopped.
    pub offset: usize,
    /// What the decoder could not make sense of.
    pub reason: String,
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

    /// Attempts to downcast the underlying error to a concrete type.
    #[must_use]
    pub fn downcast<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        self.error.downcast_ref::<E>()
    }

    /// Creates an error for unusable server addresses and navigation paths.
    pub fn invalid_address<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::InvalidAddress, error)
    }

    /// Creates an error for ports outside 1-65535 or that are not numbers.
    pub fn invalid_port<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::InvalidPort, error)
    }

    /// Creates an error for invalid arguments.
    pub fn invalid_argument<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::InvalidArgument, error)
    }

    /// Creates an error for a response body without any content.
    pub fn empty_response<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::EmptyResponse, error)
    }

    /// Creates an error for a response body that could not be decoded.
    ///
    /// `offset` is clamped into the input so that it always points at a byte
    /// of the input.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let err = Error::malformed(b"<a>", 10, "unexpected end of input");
    /// assert_eq!(err.offset(), Some(2));
    /// ```
    pub fn malformed(input: &[u8], offset: usize, reason: impl Into<String>) -> Self {
        let offset = offset.min(input.len().saturating_sub(1));
        Self::new(
            ErrorKind::MalformedResponse,
            Malformed {
                offset,
                reason: reason.into(),
            },
        )
    }

    /// Creates an error for rejected credentials.
    pub fn unauthenticated<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Unauthenticated, error)
    }

    /// Creates an error for forbidden resources.
    pub fn permission_denied<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::PermissionDenied, error)
    }

    /// Creates an error for missing resources.
    pub fn not_found<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::NotFound, error)
    }

    /// Creates an error for operations that exceeded their deadline.
    pub fn deadline_exceeded<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::DeadlineExceeded, error)
    }

    /// Creates an error for unreachable or failing servers.
    pub fn unavailable<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Unavailable, error)
    }

    /// Creates an error for response bodies that could not be read.
    pub fn data_loss<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::DataLoss, error)
    }

    /// Creates an error for internal errors.
    pub fn internal<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Internal, error)
    }

    /// Creates an error for unknown errors.
    pub fn unknown<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Unknown, error)
    }

    /// Byte offset where decoding stopped, for malformed responses.
    #[must_use]
    pub fn offset(&self) -> Option<usize> {
        self.downcast::<Malformed>().map(|malformed| malformed.offset)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error.source()
    }
}

/// Formats the error as "{kind}: {details}".
impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}: ", self.kind)?;
        fmt::Display::fmt(&self.error, fmt)
    }
}

/// Converts IO errors into appropriate error kinds.
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match err.kind() {
            NotFound => Self::not_found(err),
            PermissionDenied => Self::permission_denied(err),
            AddrNotAvailable | ConnectionRefused | NotConnected => Self::unavailable(err),
            BrokenPipe | ConnectionReset | ConnectionAborted | UnexpectedEof => {
                Self::data_loss(err)
            }
            TimedOut => Self::deadline_exceeded(err),
            InvalidInput | InvalidData => Self::invalid_argument(err),
            _ => Self::unknown(err),
        }
    }
}

/// Converts HTTP client errors into appropriate error kinds.
///
/// Status errors are mapped by their code:
/// * 401 -> `Unauthenticated`
/// * 403 -> `PermissionDenied`
/// * 404 -> `NotFound`
/// * 5xx -> `Unavailable`
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return match status.as_u16() {
                401 => Self::unauthenticated(err),
                403 => Self::permission_denied(err),
                404 => Self::not_found(err),
                500..=599 => Self::unavailable(err),
                _ => Self::unknown(err),
            };
        }

        if err.is_timeout() {
            return Self::deadline_exceeded(err);
        }

        if err.is_body() || err.is_decode() {
            return Self::data_loss(err);
        }

        if err.is_builder() {
            return Self::internal(err);
        }

        if err.is_connect() || err.is_redirect() {
            return Self::unavailable(err);
        }

        Self::unknown(err)
    }
}

/// Converts JSON errors to `Internal`; they only occur while printing.
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(err)
    }
}

/// Converts secrets file errors to `InvalidArgument`.
impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::invalid_argument(err.to_string())
    }
}

/// Converts invalid header errors to `Internal`.
impl From<http::header::InvalidHeaderValue> for Error {
    fn from(e: http::header::InvalidHeaderValue) -> Self {
        Self::internal(e.to_string())
    }
}

/// Converts URL parsing errors to `InvalidAddress`.
impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Self::invalid_address(e.to_string())
    }
}

/// Converts formatting errors to `Unknown`.
impl From<std::fmt::Error> for Error {
    fn from(e: std::fmt::Error) -> Self {
        Self::unknown(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_offset_is_clamped_into_input() {
        let err = Error::malformed(b"<a>", 10, "unexpected end of input");
        assert_eq!(err.kind, ErrorKind::MalformedResponse);
        assert_eq!(err.offset(), Some(2));
    }

    #[test]
    fn offset_is_absent_for_other_kinds() {
        let err = Error::empty_response("no bytes");
        assert_eq!(err.offset(), None);
    }

    #[test]
    fn display_shows_kind_and_details() {
        let err = Error::invalid_port("70000 is out of range");
        assert_eq!(err.to_string(), "invalid port: 70000 is out of range");
    }
}
