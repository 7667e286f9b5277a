//! Error handling for jukebox.
//!
//! Provides a single error type whose [`ErrorKind`] is decided at the call
//! boundary, so that retry policies can discriminate failures by kind instead
//! of by message text.
//!
//! # Error Categories
//!
//! Session and playback failures:
//! * [`Auth`](ErrorKind::Auth) - credential exchange itself failed
//! * [`Unauthorized`](ErrorKind::Unauthorized) - a token was rejected (401)
//! * [`DeviceNotFound`](ErrorKind::DeviceNotFound) - no usable playback device
//! * [`Automation`](ErrorKind::Automation) - a browser-driven step failed
//! * [`NotFound`](ErrorKind::NotFound) - target resource absent (404)
//!
//! Transport and state failures map roughly onto HTTP status codes:
//! * Client errors (400, 403, 429)
//! * Server errors (500, 503)
//! * Timeouts and cancellation (499, 504)
//!
//! # Retry Policy
//!
//! [`ErrorKind::is_retryable`] is the one place that decides what the bounded
//! retry wrapper and the automation channel may retry.
//!
//! # Example
//!
//! ```rust
//! use jukebox::error::{Error, ErrorKind, Result};
//!
//! fn lookup(found: bool) -> Result<()> {
//!     if !found {
//!         return Err(Error::not_found("track doesn't exist"));
//!     }
//!     Ok(())
//! }
//! ```

#![allow(clippy::enum_glob_use)]

use std::fmt;

use http::StatusCode;
use thiserror::Error;

/// Main error type combining error kind and details.
#[derive(Debug)]
pub struct Error {
    /// Classification of the error
    pub kind: ErrorKind,

    /// Details of the underlying error
    pub error: Box<dyn std::error::Error + Send + Sync>,
}

impl Error {
    /// Attempts to downcast the underlying error to a concrete type.
    #[must_use]
    pub fn downcast<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        self.error.downcast_ref::<E>()
    }

    /// Whether this error may be retried by the bounded retry wrapper or the
    /// automation channel.
    #[must_use]
    #[inline]
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Standard result type for jukebox operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories.
#[derive(Clone, Copy, Debug, Eq, Error, Hash, Ord, PartialEq, PartialOrd)]
pub enum ErrorKind {
    /// Exchanging or deriving a credential failed.
    ///
    /// Terminal for the current call chain.
    #[error("authorization failed")]
    Auth,

    /// HTTP Mapping: 401 Unauthorized
    ///
    /// A downstream call rejected the current token. Triggers a credential
    /// refresh before the next attempt.
    #[error("token rejected")]
    Unauthorized,

    /// The preferred playback device is not available.
    #[error("playback device not found")]
    DeviceNotFound,

    /// A step on the browser-driven session failed.
    #[error("automation step failed")]
    Automation,

    /// HTTP Mapping: 404 Not Found
    #[error("not found")]
    NotFound,

    /// HTTP Mapping: 400 Bad Request
    #[error("invalid argument specified")]
    InvalidArgument,

    /// HTTP Mapping: 403 Forbidden
    #[error("permission denied")]
    PermissionDenied,

    /// HTTP Mapping: 400 Bad Request
    #[error("invalid state")]
    FailedPrecondition,

    /// HTTP Mapping: 429 Too Many Requests
    #[error("resource has been exhausted")]
    ResourceExhausted,

    /// HTTP Mapping: 504 Gateway Timeout
    #[error("operation timed out")]
    DeadlineExceeded,

    /// HTTP Mapping: 503 Service Unavailable
    #[error("service unavailable")]
    Unavailable,

    /// HTTP Mapping: 499 Client Closed Request
    #[error("operation was cancelled")]
    Cancelled,

    /// HTTP Mapping: 500 Internal Server Error
    #[error("unrecoverable data loss or corruption")]
    DataLoss,

    /// HTTP Mapping: 500 Internal Server Error
    #[error("internal error")]
    Internal,

    /// HTTP Mapping: 500 Internal Server Error
    #[error("unknown error")]
    Unknown,
}

impl ErrorKind {
    /// Returns `false` for kinds that no amount of retrying can fix:
    ///
    /// * `Auth` and `DeviceNotFound` are fatal for the calling operation
    /// * `NotFound` and `InvalidArgument` are surfaced as-is
    #[must_use]
    pub fn is_retryable(self) -> bool {
        !matches!(
            self,
            Self::Auth | Self::DeviceNotFound | Self::NotFound | Self::InvalidArgument
        )
    }
}

macro_rules! constructor {
    ($(#[$doc:meta])* $name:ident => $kind:ident) => {
        $(#[$doc])*
        pub fn $name<E>(error: E) -> Self
        where
            E: Into<Box<dyn std::error::Error + Send + Sync>>,
        {
            Self {
                kind: ErrorKind::$kind,
                error: error.into(),
            }
        }
    };
}

impl Error {
    /// Creates a new error with specified kind and details.
    ///
    /// # Examples
    ///
    /// ```rust
    /// let err = Error::new(ErrorKind::NotFound, "playlist not found");
    /// assert_eq!(err.kind, ErrorKind::NotFound);
    /// ```
    pub fn new<E>(kind: ErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind,
            error: error.into(),
        }
    }

    constructor!(
        /// Creates an error for a failed credential exchange.
        ///
        /// Use when the accounts service refuses a refresh token or
        /// authorization code, or when a web token cannot be derived from the
        /// session cookies.
        auth => Auth
    );

    constructor!(
        /// Creates an error for a token that was rejected downstream.
        unauthorized => Unauthorized
    );

    constructor!(
        /// Creates an error for a missing or unusable playback device.
        device_not_found => DeviceNotFound
    );

    constructor!(
        /// Creates an error for a failed step on the automation session.
        ///
        /// Use when an element cannot be located, a wait exceeds its ceiling,
        /// or the WebDriver endpoint reports an error.
        automation => Automation
    );

    constructor!(
        /// Creates an error for missing resources.
        not_found => NotFound
    );

    constructor!(
        /// Creates an error for invalid arguments.
        ///
        /// # Examples
        ///
        /// ```rust
        /// let err = Error::invalid_argument("volume must be between 0 and 100");
        /// assert_eq!(err.kind, ErrorKind::InvalidArgument);
        /// ```
        invalid_argument => InvalidArgument
    );

    constructor!(
        /// Creates an error for permission denied conditions.
        permission_denied => PermissionDenied
    );

    constructor!(
        /// Creates an error for operations that failed due to current state.
        failed_precondition => FailedPrecondition
    );

    constructor!(
        /// Creates an error for exhausted resources, such as rate limits.
        resource_exhausted => ResourceExhausted
    );

    constructor!(
        /// Creates an error for operations that exceeded their deadline.
        deadline_exceeded => DeadlineExceeded
    );

    constructor!(
        /// Creates an error for unavailable services.
        unavailable => Unavailable
    );

    constructor!(
        /// Creates an error for cancelled operations.
        cancelled => Cancelled
    );

    constructor!(
        /// Creates an error for truncated or corrupted data.
        data_loss => DataLoss
    );

    constructor!(
        /// Creates an error for internal errors.
        internal => Internal
    );

    constructor!(
        /// Creates an error for unknown errors.
        unknown => Unknown
    );

    /// Classifies a non-success HTTP status returned by a Spotify endpoint.
    ///
    /// * 401 -> `Unauthorized`
    /// * 403 -> `PermissionDenied`
    /// * 404 -> `NotFound`
    /// * 429 -> `ResourceExhausted`
    /// * 408, 504 -> `DeadlineExceeded`
    /// * other 5xx -> `Unavailable`
    /// * other 4xx -> `FailedPrecondition`
    pub fn from_status<E>(status: StatusCode, error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let kind = match status {
            StatusCode::UNAUTHORIZED => ErrorKind::Unauthorized,
            StatusCode::FORBIDDEN => ErrorKind::PermissionDenied,
            StatusCode::NOT_FOUND => ErrorKind::NotFound,
            StatusCode::TOO_MANY_REQUESTS => ErrorKind::ResourceExhausted,
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
                ErrorKind::DeadlineExceeded
            }
            status if status.is_server_error() => ErrorKind::Unavailable,
            status if status.is_client_error() => ErrorKind::FailedPrecondition,
            _ => ErrorKind::Unknown,
        };

        Self::new(kind, error)
    }
}

/// Returns the underlying error source.
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error.source()
    }
}

/// Formats the error as "{kind}: {details}".
impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}: ", self.kind)?;
        self.error.fmt(fmt)
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
            BrokenPipe | ConnectionReset | ConnectionAborted => Self::unavailable(err),
            Interrupted | WouldBlock => Self::cancelled(err),
            UnexpectedEof => Self::data_loss(err),
            TimedOut => Self::deadline_exceeded(err),
            InvalidInput | InvalidData => Self::invalid_argument(err),
            _ => Self::unknown(err),
        }
    }
}

/// Converts HTTP client errors into appropriate error kinds.
///
/// Status errors are classified like [`Error::from_status`]; transport
/// errors by their nature.
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(status, err);
        }

        if err.is_timeout() {
            return Self::deadline_exceeded(err);
        }

        if err.is_connect() {
            return Self::unavailable(err);
        }

        if err.is_body() {
            return Self::data_loss(err);
        }

        if err.is_decode() {
            return Self::invalid_argument(err);
        }

        if err.is_builder() {
            return Self::internal(err);
        }

        Self::unknown(err)
    }
}

/// Converts WebSocket errors into appropriate error kinds.
///
/// A handshake refused with 401 means the web token was rejected.
impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error::*;
        let kind = match &err {
            ConnectionClosed => ErrorKind::Cancelled,
            AlreadyClosed => ErrorKind::Unavailable,
            Io(_) => ErrorKind::Unavailable,
            Capacity(_) => ErrorKind::ResourceExhausted,
            Http(response) => {
                return Self::from_status(response.status(), err.to_string());
            }
            Url(_) => ErrorKind::InvalidArgument,
            AttackAttempt => ErrorKind::PermissionDenied,
            _ => ErrorKind::Unknown,
        };

        Self::new(kind, err)
    }
}

/// Converts JSON errors through IO error mapping.
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        std::io::Error::from(err).into()
    }
}

/// Converts configuration parsing errors to `InvalidArgument`.
impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Self::invalid_argument(e)
    }
}

/// Converts invalid header errors to `Internal`.
impl From<http::header::InvalidHeaderValue> for Error {
    fn from(e: http::header::InvalidHeaderValue) -> Self {
        Self::internal(e.to_string())
    }
}

/// Converts header size errors to `ResourceExhausted`.
impl From<http::header::MaxSizeReached> for Error {
    fn from(e: http::header::MaxSizeReached) -> Self {
        Self::resource_exhausted(e.to_string())
    }
}

/// Converts URL parsing errors to `InvalidArgument`.
impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Self::invalid_argument(e.to_string())
    }
}

/// Converts timeout errors to `DeadlineExceeded`.
impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Self::deadline_exceeded(e.to_string())
    }
}

/// Converts integer parsing errors to `InvalidArgument`.
impl From<std::num::ParseIntError> for Error {
    fn from(e: std::num::ParseIntError) -> Self {
        Self::invalid_argument(e.to_string())
    }
}
