//! Error types for the public interface of the library.
//!
//! Internally the crate uses `anyhow` and attaches context as errors travel upward. At the public
//! boundary each error is tagged with an `ErrorType` so that callers (the CLI, or a UI) can decide
//! how to present it: inline for validation problems, as a blocking notice for everything else,
//! and with a retry affordance for remote store failures.

use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter};

/// The internal result type.
pub(crate) type Res<T> = std::result::Result<T, anyhow::Error>;

/// The public result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Classifies an `Error`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// The identity provider rejected the request, e.g. invalid credentials or an email address
    /// that is already registered. The message comes from the provider verbatim.
    Auth,
    /// A remote store operation failed.
    Store,
    /// A remote store operation did not complete in time.
    Timeout,
    /// User input was rejected before anything was changed.
    Validation,
    /// A mutation was attempted while nobody is signed in.
    Unauthenticated,
    /// The home directory or configuration file is missing or invalid.
    Config,
    /// Anything else.
    Internal,
}

serde_plain::derive_display_from_serialize!(ErrorType);
serde_plain::derive_fromstr_from_deserialize!(ErrorType);

/// The public error type: an `anyhow::Error` tagged with an `ErrorType`.
pub struct Error {
    error_type: ErrorType,
    inner: anyhow::Error,
}

impl Error {
    pub fn new(error_type: ErrorType, inner: impl Into<anyhow::Error>) -> Self {
        Self {
            error_type,
            inner: inner.into(),
        }
    }

    /// Creates an error from a plain message, which is displayed as-is.
    pub fn msg(error_type: ErrorType, message: impl Display + Debug + Send + Sync + 'static) -> Self {
        Self::new(error_type, anyhow::Error::msg(message))
    }

    pub fn error_type(&self) -> ErrorType {
        self.error_type
    }

    /// Whether repeating the same operation might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self.error_type, ErrorType::Store | ErrorType::Timeout)
    }

    /// Converts an internal error, keeping the `ErrorType` if one is buried in it and falling back
    /// to `default` otherwise.
    pub(crate) fn from_anyhow(e: anyhow::Error, default: ErrorType) -> Self {
        let error_type = e
            .downcast_ref::<Error>()
            .map(|found| found.error_type)
            .unwrap_or(default);
        Self {
            error_type,
            inner: e,
        }
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} error: {:?}", self.error_type, self.inner)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#}", self.inner)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::from_anyhow(e, ErrorType::Internal)
    }
}

/// Converts an internal result into a public `Result` with the given `ErrorType`.
pub trait IntoResult<T> {
    fn pub_result(self, error_type: ErrorType) -> Result<T>;
}

impl<T, E> IntoResult<T> for std::result::Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn pub_result(self, error_type: ErrorType) -> Result<T> {
        self.map_err(|e| Error::new(error_type, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_pub_result_tags_error_type() {
        let r: std::result::Result<(), anyhow::Error> = Err(anyhow::anyhow!("boom"));
        let e = r.pub_result(ErrorType::Store).unwrap_err();
        assert_eq!(e.error_type(), ErrorType::Store);
        assert!(e.is_retryable());
        assert_eq!(e.to_string(), "boom");
    }

    #[test]
    fn test_error_type_survives_anyhow_round_trip() {
        let original = Error::msg(ErrorType::Unauthenticated, "User is not logged in.");
        let wrapped = Err::<(), Error>(original)
            .context("Unable to delete")
            .unwrap_err();
        let recovered = Error::from(wrapped);
        assert_eq!(recovered.error_type(), ErrorType::Unauthenticated);
        assert!(!recovered.is_retryable());
        assert!(recovered.to_string().contains("User is not logged in."));
    }

    #[test]
    fn test_plain_anyhow_becomes_internal() {
        let e = Error::from(anyhow::anyhow!("nope"));
        assert_eq!(e.error_type(), ErrorType::Internal);
    }

    #[test]
    fn test_error_type_display() {
        assert_eq!(ErrorType::Unauthenticated.to_string(), "unauthenticated");
        assert_eq!("timeout".parse::<ErrorType>().unwrap(), ErrorType::Timeout);
    }
}
