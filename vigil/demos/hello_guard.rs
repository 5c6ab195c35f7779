//! Run with:
//!
//! ```no_rust
//! cargo run --example hello_guard
//! ```
//!
//! Then hit it more than 10 times a minute:
//!
//! ```no_rust
//! for i in $(seq 1 12); do curl -i http://127.0.0.1:3000/; done
//! curl http://127.0.0.1:3000/status
//! ```

use std::{sync::Arc, time::Duration};
use tracing_subscriber::{EnvFilter, prelude::*};
use vigil::{Guard, Server, config::GuardConfig, ok, status};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,vigil=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 10 hits per minute, 10 second bans, banned for good after 20 hits
    let policy = GuardConfig::new()
        .with_window(Duration::from_secs(60))
        .with_max_hits(10)
        .with_ban_duration(Duration::from_secs(10))
        .with_permanent_ban_threshold(20)
        .with_eviction(Duration::from_secs(10 * 60))
        .into_policy()?;

    let guard = Arc::new(Guard::new(policy));

    let handler_guard = guard.clone();
    let server = Server::new(guard.clone(), move |req| {
        let guard = handler_guard.clone();
        async move {
            match req.uri().path() {
                "/status" => status::respond(&guard),
                _ => ok("Hello, world!"),
            }
        }
    })
    .bind("127.0.0.1:3000");

    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            tokio::select! {
                _ = interval.tick() => status::log_status(&guard),
                _ = shutdown.cancelled() => break,
            }
        }
    });

    server.run().await
}
