//! # Vigil
//!
//! Request-admission guard for [`hyper`] servers.
//!
//! Every inbound request is counted against its client's sliding window.
//! Clients that exceed the limit are banned temporarily, repeat offenders and
//! clients crossing the hard threshold are banned for good. Blocked requests
//! get a `429 Too Many Requests` with a JSON body.
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use vigil::{Guard, Server, config::GuardConfig, ok};
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let policy = GuardConfig::new()
//!         .with_permanent_ban_threshold(20)
//!         .into_policy()?;
//!
//!     Server::new(Arc::new(Guard::new(policy)), |_req| async { ok("Hello, world!") })
//!         .bind("127.0.0.1:3000")
//!         .run()
//!         .await
//! }
//! ```

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode, header::{CONTENT_TYPE, HeaderValue}};

pub mod config;
pub mod error;
pub mod middleware;
pub mod server;
pub mod status;

pub use error::Error;
pub use middleware::{GuardLayer, GuardService};
pub use server::Server;
pub use vigil_guard::{
    AdmissionPolicy,
    BlockReason,
    Decision,
    Guard,
    GuardStats,
    WindowStatus,
};

/// Body of every response produced by Vigil
pub type HttpBody = Full<Bytes>;

/// HTTP response with a buffered body
pub type HttpResponse = Response<HttpBody>;

/// Result of a request handler
pub type HttpResult = Result<HttpResponse, Error>;

pub(crate) const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// Produces a `200 OK` plain-text response
#[inline]
pub fn ok(body: impl Into<Bytes>) -> HttpResult {
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN))
        .body(Full::new(body.into()))
        .map_err(Error::from)
}
