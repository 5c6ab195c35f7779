//! HTTP/1 server that admits every request through a [`Guard`]

use std::{
    convert::Infallible,
    future::Future,
    io,
    net::SocketAddr,
    sync::Arc,
    time::Duration
};

use futures_util::future::BoxFuture;
use hyper::{Request, body::Incoming, server::conn::http1::Builder, service::Service};
use hyper_util::{rt::TokioIo, server::graceful::GracefulShutdown};
use tokio::{net::{TcpListener, TcpStream}, signal, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use vigil_guard::Guard;
use crate::{
    HttpResponse,
    HttpResult,
    error::Error,
    middleware::{GuardLayer, GuardService}
};

const DEFAULT_ADDR: &str = "127.0.0.1:7878";
const GRACEFUL_SHUTDOWN_TIMEOUT: u64 = 10;

/// Guarded HTTP/1 server.
///
/// Requests that pass the guard are handed to the request handler,
/// rejected ones get a `429 Too Many Requests`.
///
/// # Example
/// ```no_run
/// use std::{sync::Arc, time::Duration};
/// use vigil::{AdmissionPolicy, Guard, Server, ok};
///
/// # async fn docs() -> std::io::Result<()> {
/// let policy = AdmissionPolicy::new(10, Duration::from_secs(60), Duration::from_secs(10));
/// let guard = Arc::new(Guard::new(policy));
///
/// Server::new(guard, |_req| async { ok("Hello, world!") })
///     .bind("127.0.0.1:3000")
///     .run()
///     .await
/// # }
/// ```
#[derive(Debug)]
pub struct Server<H> {
    guard: Arc<Guard>,
    handler: H,
    addr: String,
    shutdown: CancellationToken,
}

/// Calls the user's request handler
struct Endpoint<H> {
    handler: Arc<H>,
}

/// Per-connection service that turns handler errors into responses
struct Scope<H> {
    inner: GuardService<Endpoint<H>>,
}

impl<H> Clone for Endpoint<H> {
    #[inline]
    fn clone(&self) -> Self {
        Self { handler: self.handler.clone() }
    }
}

impl<H, Fut> Service<Request<Incoming>> for Endpoint<H>
where
    H: Fn(Request<Incoming>) -> Fut,
    Fut: Future<Output = HttpResult>
{
    type Response = HttpResponse;
    type Error = Error;
    type Future = Fut;

    #[inline]
    fn call(&self, request: Request<Incoming>) -> Self::Future {
        (self.handler)(request)
    }
}

impl<H, Fut> Service<Request<Incoming>> for Scope<H>
where
    H: Fn(Request<Incoming>) -> Fut,
    Fut: Future<Output = HttpResult> + Send + 'static
{
    type Response = HttpResponse;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    #[inline]
    fn call(&self, request: Request<Incoming>) -> Self::Future {
        let response = self.inner.call(request);
        Box::pin(async move {
            Ok(response.await.unwrap_or_else(Error::into_response))
        })
    }
}

impl<H, Fut> Server<H>
where
    H: Fn(Request<Incoming>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HttpResult> + Send + 'static
{
    /// Creates a new server that guards `handler` with `guard`
    pub fn new(guard: Arc<Guard>, handler: H) -> Self {
        Self {
            guard,
            handler,
            addr: DEFAULT_ADDR.into(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Sets the socket address to listen on
    ///
    /// Default: `127.0.0.1:7878`
    pub fn bind(mut self, addr: impl Into<String>) -> Self {
        self.addr = addr.into();
        self
    }

    /// Returns a token that stops the server when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Returns the guard shared by all connections
    pub fn guard(&self) -> &Arc<Guard> {
        &self.guard
    }

    /// Binds the configured address and serves until Ctrl+C
    /// or until the shutdown token is cancelled.
    pub async fn run(self) -> io::Result<()> {
        let listener = TcpListener::bind(self.addr.as_str()).await?;
        Self::shutdown_signal(self.shutdown.clone());
        self.run_with_listener(listener).await
    }

    /// Serves connections from an already bound listener
    /// until the shutdown token is cancelled.
    pub async fn run_with_listener(self, listener: TcpListener) -> io::Result<()> {
        let Self { guard, handler, shutdown, .. } = self;

        #[cfg(feature = "tracing")]
        {
            let socket = listener.local_addr()?;
            tracing::info!("listening on: http://{socket}");
        }

        Self::spawn_eviction(guard.clone(), shutdown.child_token());

        let layer = GuardLayer::new(guard);
        let endpoint = Endpoint { handler: Arc::new(handler) };
        let graceful = GracefulShutdown::new();

        loop {
            let (stream, peer) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(connection) => connection,
                    Err(_err) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("failed to accept connection: {_err:#}");
                        continue;
                    }
                },
                _ = shutdown.cancelled() => break,
            };

            let scope = Scope { inner: layer.layer(endpoint.clone(), peer) };
            Self::serve_connection(stream, peer, scope, &graceful);
        }

        drop(listener);
        Self::shutdown(graceful).await;
        Ok(())
    }

    #[inline]
    fn serve_connection(
        stream: TcpStream,
        _peer: SocketAddr,
        scope: Scope<H>,
        graceful: &GracefulShutdown
    ) {
        let connection = Builder::new().serve_connection(TokioIo::new(stream), scope);
        let connection = graceful.watch(connection);

        tokio::spawn(async move {
            if let Err(_err) = connection.await {
                #[cfg(feature = "tracing")]
                tracing::error!("error serving connection from {_peer}: {_err:#}");
            }
        });
    }

    #[inline]
    fn spawn_eviction(guard: Arc<Guard>, shutdown: CancellationToken) {
        let Some(period) = guard.policy().eviction() else {
            return;
        };

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let _evicted = guard.evict_idle();
                        #[cfg(feature = "tracing")]
                        if _evicted > 0 {
                            tracing::debug!("evicted {_evicted} idle clients");
                        }
                    },
                    _ = shutdown.cancelled() => break,
                }
            }
        });
    }

    #[inline]
    fn shutdown_signal(shutdown: CancellationToken) {
        tokio::spawn(async move {
            tokio::select! {
                result = signal::ctrl_c() => match result {
                    Ok(_) => (),
                    #[cfg(feature = "tracing")]
                    Err(err) => tracing::error!("unable to listen for shutdown signal: {err:#}"),
                    #[cfg(not(feature = "tracing"))]
                    Err(_) => ()
                },
                _ = shutdown.cancelled() => return,
            }
            #[cfg(feature = "tracing")]
            tracing::trace!("shutdown signal received, not accepting new requests");
            shutdown.cancel();
        });
    }

    #[inline]
    async fn shutdown(graceful: GracefulShutdown) {
        tokio::select! {
            _ = graceful.shutdown() => {
                #[cfg(feature = "tracing")]
                tracing::info!("shutting down the server...");
            },
            _ = tokio::time::sleep(Duration::from_secs(GRACEFUL_SHUTDOWN_TIMEOUT)) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("timed out wait for all connections to close");
            }
        }
    }
}
