//! Admission middleware that runs every request through a [`Guard`]

use std::{net::SocketAddr, sync::Arc, time::Duration};
use bytes::Bytes;
use futures_util::future::{Either, Ready, ready};
use http_body_util::Full;
use serde::Serialize;
use vigil_guard::{BlockReason, Decision, Guard};
use crate::{HttpResponse, HttpResult, error::Error};
use hyper::{
    Request,
    Response,
    StatusCode,
    service::Service,
    header::{CONTENT_TYPE, RETRY_AFTER, HeaderValue}
};

const APPLICATION_JSON: &str = "application/json";
const TOO_MANY_REQUESTS: &str = "Too many requests";

/// Body of a rejected request
#[derive(Serialize)]
struct Rejection<'a> {
    error: &'a str,
    reason: &'a str,
}

/// Wraps services with a shared [`Guard`].
///
/// A layer lives as long as the server; [`GuardLayer::layer`] is called
/// once per accepted connection.
#[derive(Debug, Clone)]
pub struct GuardLayer {
    guard: Arc<Guard>,
}

impl GuardLayer {
    /// Creates a new layer around the shared guard
    #[inline]
    pub fn new(guard: Arc<Guard>) -> Self {
        Self { guard }
    }

    /// Returns the guard shared by every service of this layer
    #[inline]
    pub fn guard(&self) -> &Arc<Guard> {
        &self.guard
    }

    /// Wraps `inner` for a connection accepted from `peer`.
    ///
    /// The peer IP address is the client identifier.
    #[inline]
    pub fn layer<S>(&self, inner: S, peer: SocketAddr) -> GuardService<S> {
        GuardService {
            guard: self.guard.clone(),
            identifier: Arc::from(peer.ip().to_string()),
            inner,
        }
    }
}

/// Per-connection service that admits or rejects requests before
/// they reach the inner service
#[derive(Debug, Clone)]
pub struct GuardService<S> {
    guard: Arc<Guard>,
    identifier: Arc<str>,
    inner: S,
}

impl<S> GuardService<S> {
    /// Returns the client identifier of this connection
    #[inline]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Unwraps the inner service
    #[inline]
    pub fn into_inner(self) -> S {
        self.inner
    }

    #[inline]
    fn admit(&self) -> Decision {
        let decision = self.guard.evaluate(&self.identifier);

        #[cfg(feature = "tracing")]
        if tracing::enabled!(tracing::Level::DEBUG)
            && let Some(status) = self.guard.status(&self.identifier) {
            tracing::debug!("{status}");
        }

        decision
    }

    fn reject(&self, reason: BlockReason) -> HttpResult {
        let body = serde_json::to_vec(&Rejection {
            error: TOO_MANY_REQUESTS,
            reason: reason.as_str(),
        })?;

        let mut response = Response::builder()
            .status(StatusCode::TOO_MANY_REQUESTS)
            .header(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));

        if !reason.is_permanent()
            && let Some(remaining) = self.ban_remaining() {
            response = response.header(RETRY_AFTER, retry_after(remaining));
        }

        response
            .body(Full::new(Bytes::from(body)))
            .map_err(Error::from)
    }

    #[inline]
    fn ban_remaining(&self) -> Option<Duration> {
        self.guard
            .status(&self.identifier)
            .and_then(|status| status.ban_remaining)
    }
}

impl<S, B> Service<Request<B>> for GuardService<S>
where
    S: Service<Request<B>, Response = HttpResponse, Error = Error>
{
    type Response = HttpResponse;
    type Error = Error;
    type Future = Either<Ready<HttpResult>, S::Future>;

    #[inline]
    fn call(&self, request: Request<B>) -> Self::Future {
        match self.admit() {
            Decision::Admitted => Either::Right(self.inner.call(request)),
            Decision::Blocked(reason) => Either::Left(ready(self.reject(reason))),
        }
    }
}

/// Whole seconds, rounded up
#[inline]
fn retry_after(remaining: Duration) -> HeaderValue {
    let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
    HeaderValue::from(secs)
}
