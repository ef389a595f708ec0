//! Proxy server: accept loop, per-connection HTTP/1.1 service, shutdown.
//!
//! # Responsibilities
//! - Accept connections under the connection limit
//! - Serve each connection with hyper, upgrades enabled for CONNECT
//! - Dispatch CONNECT to the tunnel engine and everything else to forwarding
//! - Drain on shutdown, force-close after the grace period
//!
//! # Design Decisions
//! - One task per connection, one more per established tunnel
//! - The header read timeout is the listening-side server timeout
//! - A missed grace period is reported as an error so the process exits non-zero

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, Response},
};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::service::TowerToHyperService;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::config::ProxyConfig;
use crate::http::client::build_client;
use crate::net::{ConnectionPermit, ConnectionState, ConnectionTracker, Listener, ListenerError};
use crate::observability::RecordSink;
use crate::proxy::forward::forward;
use crate::proxy::tunnel::tunnel;
use crate::proxy::{Dispatch, ProxyState};

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("Shutdown grace period of {0:?} expired with connections still open")]
    ShutdownTimeout(Duration),
}

/// Forward HTTP proxy server.
pub struct ProxyServer {
    state: ProxyState,
}

impl ProxyServer {
    /// Create a server from a validated configuration and a record sink.
    pub fn new(config: ProxyConfig, sink: Arc<dyn RecordSink>) -> Self {
        let client = build_client(&config.timeouts);
        Self {
            state: ProxyState {
                config: Arc::new(config),
                client,
                sink,
                tracker: ConnectionTracker::new(),
            },
        }
    }

    /// Accept connections until `shutdown` fires, then drain.
    ///
    /// Returns [`ServerError::ShutdownTimeout`] when connections or tunnels
    /// were still open at the end of the grace period and had to be closed.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(
                address = %addr,
                request_timeout_secs = self.state.config.timeouts.request_secs,
                server_timeout_secs = self.state.config.timeouts.server_secs,
                max_body_size = self.state.config.limits.max_body_size,
                "Proxy server starting"
            );
        }

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        let ctx = ConnectionContext {
                            state: self.state.clone(),
                            permit: Arc::new(permit),
                        };
                        tokio::spawn(serve_connection(ctx, stream, peer));
                    }
                    Err(err @ ListenerError::Closed(_)) => return Err(err.into()),
                    Err(err) => {
                        tracing::warn!(error = %err, "Accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }

        drop(listener);
        let tracker = &self.state.tracker;
        let grace = self.state.config.timeouts.shutdown_grace();
        tracing::info!(
            active = tracker.active_count(),
            grace_secs = grace.as_secs(),
            "Stopped accepting, draining connections"
        );
        tracker.drain();

        if tracker.wait_for_shutdown(grace).await {
            tracing::info!("Proxy server stopped");
            Ok(())
        } else {
            tracing::warn!(
                remaining = tracker.active_count(),
                "Grace period expired, closing remaining connections"
            );
            tracker.close();
            Err(ServerError::ShutdownTimeout(grace))
        }
    }
}

/// Everything a single connection's requests need.
#[derive(Clone)]
struct ConnectionContext {
    state: ProxyState,
    permit: Arc<ConnectionPermit>,
}

impl ConnectionContext {
    async fn handle(&self, request: Request<Incoming>) -> Response<Body> {
        match Dispatch::for_method(request.method()) {
            Dispatch::Tunnel => tunnel(&self.state, Arc::clone(&self.permit), request).await,
            Dispatch::Forward => forward(&self.state, request).await,
        }
    }
}

async fn serve_connection(ctx: ConnectionContext, stream: TcpStream, peer: SocketAddr) {
    let tracker = ctx.state.tracker.clone();
    let guard = tracker.track();
    let mut state_rx = tracker.state_receiver();
    let server_timeout = ctx.state.config.timeouts.server();

    let service = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .service(tower::service_fn(move |request: Request<Incoming>| {
            let ctx = ctx.clone();
            async move { Ok::<_, Infallible>(ctx.handle(request).await) }
        }));

    let conn = http1::Builder::new()
        .timer(TokioTimer::new())
        .header_read_timeout(server_timeout)
        .serve_connection(TokioIo::new(stream), TowerToHyperService::new(service))
        .with_upgrades();
    tokio::pin!(conn);

    loop {
        let state = *state_rx.borrow_and_update();
        match state {
            ConnectionState::Active => {}
            ConnectionState::Draining => conn.as_mut().graceful_shutdown(),
            ConnectionState::Closed => {
                tracing::debug!(connection_id = %guard.id(), peer_addr = %peer, "Connection force-closed");
                return;
            }
        }

        tokio::select! {
            res = conn.as_mut() => {
                if let Err(e) = res {
                    tracing::debug!(connection_id = %guard.id(), peer_addr = %peer, error = %e, "Connection ended with error");
                }
                return;
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    if let Err(e) = conn.as_mut().await {
                        tracing::debug!(connection_id = %guard.id(), peer_addr = %peer, error = %e, "Connection ended with error");
                    }
                    return;
                }
            }
        }
    }
}
