//! Error Handling tools

use std::{
    fmt,
    io::{ErrorKind, Error as IoError},
    error::Error as StdError
};

use bytes::Bytes;
use http_body_util::Full;
use hyper::{StatusCode, Response, header::{CONTENT_TYPE, HeaderValue}};
use crate::{HttpResponse, TEXT_PLAIN, config::ConfigError};

pub(crate) type BoxError = Box<
    dyn StdError
    + Send
    + Sync
>;

/// Generic error
#[derive(Debug)]
pub struct Error {
    /// HTTP status code
    pub status: StatusCode,

    /// Inner error object
    pub(crate) inner: BoxError,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.inner.as_ref())
    }
}

impl From<ConfigError> for Error {
    #[inline]
    fn from(err: ConfigError) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            inner: err.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Error {
        Self {
            status: StatusCode::BAD_REQUEST,
            inner: err.into(),
        }
    }
}

impl From<IoError> for Error {
    #[inline]
    fn from(err: IoError) -> Self {
        let status = match err.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
            ErrorKind::AddrInUse => StatusCode::BAD_GATEWAY,
            ErrorKind::AddrNotAvailable => StatusCode::BAD_GATEWAY,
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::InvalidData => StatusCode::BAD_REQUEST,
            ErrorKind::TimedOut => StatusCode::REQUEST_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR
        };

        Self {
            inner: err.into(),
            status
        }
    }
}

impl From<hyper::http::Error> for Error {
    #[inline]
    fn from(err: hyper::http::Error) -> Self {
        Self {
            inner: err.into(),
            status: StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<Error> for IoError {
    #[inline]
    fn from(err: Error) -> Self {
        Self::other(err)
    }
}

impl Error {
    /// Creates an internal server error
    #[inline]
    pub fn server_error(err: impl Into<BoxError>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            inner: err.into(),
        }
    }

    /// Creates a client error
    #[inline]
    pub fn client_error(err: impl Into<BoxError>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            inner: err.into(),
        }
    }

    /// Returns the [`ConfigError`] behind this error, if any
    #[inline]
    pub fn config_error(&self) -> Option<&ConfigError> {
        self.inner.downcast_ref()
    }

    /// Check if the status is within 500-599.
    #[inline]
    pub fn is_server_error(&self) -> bool {
        self.status.is_server_error()
    }

    /// Check if the status is within 400-499.
    #[inline]
    pub fn is_client_error(&self) -> bool {
        self.status.is_client_error()
    }

    /// Converts the error into a plain-text response carrying its status code.
    ///
    /// Server errors hide their message from the client.
    pub fn into_response(self) -> HttpResponse {
        #[cfg(feature = "tracing")]
        if self.is_server_error() {
            tracing::error!("{self:#}");
        }

        let body = if self.is_server_error() {
            self.status
                .canonical_reason()
                .unwrap_or("Internal Server Error")
                .to_owned()
        } else {
            self.to_string()
        };

        let mut response = Response::new(Full::new(Bytes::from(body)));
        *response.status_mut() = self.status;
        response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN));
        response
    }
}
