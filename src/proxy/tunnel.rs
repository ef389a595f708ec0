//! CONNECT tunnel engine.
//!
//! # Session states
//! ```text
//! Requested → Dialing → Established → Relaying → Closed
//!                 ↓           ↓
//!               Error       Error
//! ```
//!
//! # Design Decisions
//! - The raw client connection is taken from hyper's upgrade hook before dialing;
//!   without it the CONNECT is rejected and nothing is dialed
//! - Dialing has its own timeout, independent of the request timeout
//! - Relayed bytes are never inspected or logged
//! - A session holds its connection permit and a tracker guard until both
//!   sockets are dropped, so shutdown waits for it and can force it closed

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    http::{Request, Response},
    response::IntoResponse,
};
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::watch;
use uuid::Uuid;

use crate::config::RelayMode;
use crate::http::request::connect_target;
use crate::net::{closed, ConnectionGuard, ConnectionPermit, ConnectionState};
use crate::observability::metrics::{self, ActiveTunnel};
use crate::observability::{ClosedBy, FailureRecord, Record, RecordSink, TunnelRecord};
use crate::proxy::{ProxyError, ProxyState};

/// Handle a CONNECT request.
///
/// On success the relay runs in its own task and an empty `200` acknowledges
/// the tunnel; hyper hands over the raw connection once that response is written.
pub async fn tunnel<B>(
    state: &ProxyState,
    permit: Arc<ConnectionPermit>,
    mut request: Request<B>,
) -> Response<Body> {
    let start = Instant::now();
    let id = Uuid::new_v4();
    let host = request.uri().to_string();

    match establish(state, permit, &mut request, id, start).await {
        Ok(session) => {
            tracing::debug!(tunnel_id = %id, host = %session.host, "Tunnel established");
            tokio::spawn(session.run());
            Response::new(Body::empty())
        }
        Err(err) => {
            let status = err.status();
            tracing::warn!(
                tunnel_id = %id,
                host = %host,
                status = status.as_u16(),
                error = %err,
                "Tunnel failed"
            );
            state.sink.emit(Record::Failure(FailureRecord {
                id,
                method: "CONNECT".into(),
                url: host,
                status: status.as_u16(),
                error: err.to_string(),
                duration: start.elapsed(),
            }));
            metrics::record_tunnel("failed");
            err.into_response()
        }
    }
}

async fn establish<B>(
    state: &ProxyState,
    permit: Arc<ConnectionPermit>,
    request: &mut Request<B>,
    id: Uuid,
    start: Instant,
) -> Result<Session, ProxyError> {
    let authority = connect_target(request.uri())?;

    let Some(on_upgrade) = request.extensions_mut().remove::<OnUpgrade>() else {
        return Err(ProxyError::HijackUnsupported);
    };

    let connect_timeout = state.config.timeouts.connect();
    let target = dial(authority.as_str(), connect_timeout).await?;

    Ok(Session {
        id,
        host: authority.to_string(),
        start,
        target,
        on_upgrade,
        relay: state.config.tunnel.relay,
        sink: Arc::clone(&state.sink),
        state_rx: state.tracker.state_receiver(),
        _guard: state.tracker.track(),
        _permit: permit,
    })
}

async fn dial(host: &str, connect_timeout: Duration) -> Result<TcpStream, ProxyError> {
    match tokio::time::timeout(connect_timeout, TcpStream::connect(host)).await {
        Ok(Ok(stream)) => {
            let _ = stream.set_nodelay(true);
            Ok(stream)
        }
        Ok(Err(e)) => Err(ProxyError::Dial {
            target: host.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Err(ProxyError::Dial {
            target: host.to_string(),
            reason: format!("timed out after {connect_timeout:?}"),
        }),
    }
}

/// An established tunnel waiting for the client connection.
struct Session {
    id: Uuid,
    host: String,
    start: Instant,
    target: TcpStream,
    on_upgrade: OnUpgrade,
    relay: RelayMode,
    sink: Arc<dyn RecordSink>,
    state_rx: watch::Receiver<ConnectionState>,
    _guard: ConnectionGuard,
    _permit: Arc<ConnectionPermit>,
}

impl Session {
    async fn run(self) {
        let _active = ActiveTunnel::start();

        let closed_by = match self.on_upgrade.await {
            Ok(upgraded) => {
                relay(self.relay, TokioIo::new(upgraded), self.target, self.state_rx).await
            }
            Err(e) => {
                tracing::warn!(
                    tunnel_id = %self.id,
                    host = %self.host,
                    error = %e,
                    "Client connection was not handed over"
                );
                ClosedBy::Error
            }
        };

        let duration = self.start.elapsed();
        tracing::debug!(
            tunnel_id = %self.id,
            host = %self.host,
            closed_by = %closed_by,
            duration_ms = duration.as_millis() as u64,
            "Tunnel closed"
        );
        self.sink.emit(Record::Tunnel(TunnelRecord {
            id: self.id,
            host: self.host,
            duration,
            closed_by,
        }));
        metrics::record_tunnel(if closed_by == ClosedBy::Error {
            "error"
        } else {
            "completed"
        });
    }
}

/// Copy bytes between `client` and `target` until the session ends.
///
/// Both streams are dropped before this returns.
pub async fn relay<C, T>(
    mode: RelayMode,
    client: C,
    target: T,
    state_rx: watch::Receiver<ConnectionState>,
) -> ClosedBy
where
    C: AsyncRead + AsyncWrite + Unpin,
    T: AsyncRead + AsyncWrite + Unpin,
{
    match mode {
        RelayMode::FirstClose => relay_first_close(client, target, state_rx).await,
        RelayMode::HalfClose => relay_half_close(client, target, state_rx).await,
    }
}

async fn relay_first_close<C, T>(
    client: C,
    target: T,
    state_rx: watch::Receiver<ConnectionState>,
) -> ClosedBy
where
    C: AsyncRead + AsyncWrite + Unpin,
    T: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut target_read, mut target_write) = tokio::io::split(target);

    tokio::select! {
        res = tokio::io::copy(&mut client_read, &mut target_write) => match res {
            Ok(_) => ClosedBy::Client,
            Err(_) => ClosedBy::Error,
        },
        res = tokio::io::copy(&mut target_read, &mut client_write) => match res {
            Ok(_) => ClosedBy::Target,
            Err(_) => ClosedBy::Error,
        },
        _ = closed(state_rx) => ClosedBy::Shutdown,
    }
}

async fn relay_half_close<C, T>(
    mut client: C,
    mut target: T,
    state_rx: watch::Receiver<ConnectionState>,
) -> ClosedBy
where
    C: AsyncRead + AsyncWrite + Unpin,
    T: AsyncRead + AsyncWrite + Unpin,
{
    tokio::select! {
        res = tokio::io::copy_bidirectional(&mut client, &mut target) => match res {
            Ok(_) => ClosedBy::Both,
            Err(_) => ClosedBy::Error,
        },
        _ = closed(state_rx) => ClosedBy::Shutdown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::ConnectionTracker;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn first_close_ends_when_client_closes() {
        let tracker = ConnectionTracker::new();
        let (client, mut client_peer) = duplex(64);
        let (target, mut target_peer) = duplex(64);

        let session = tokio::spawn(relay(
            RelayMode::FirstClose,
            client,
            target,
            tracker.state_receiver(),
        ));

        client_peer.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        target_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        target_peer.write_all(b"pong").await.unwrap();
        client_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        drop(client_peer);
        assert_eq!(session.await.unwrap(), ClosedBy::Client);

        // The target side is closed together with the client side.
        let mut rest = Vec::new();
        target_peer.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn half_close_waits_for_both_directions() {
        let tracker = ConnectionTracker::new();
        let (client, mut client_peer) = duplex(64);
        let (target, mut target_peer) = duplex(64);

        let session = tokio::spawn(relay(
            RelayMode::HalfClose,
            client,
            target,
            tracker.state_receiver(),
        ));

        client_peer.write_all(b"request").await.unwrap();
        client_peer.shutdown().await.unwrap();

        let mut received = Vec::new();
        target_peer.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"request");

        // Target still answers after the client finished sending.
        target_peer.write_all(b"late reply").await.unwrap();
        drop(target_peer);

        let mut reply = Vec::new();
        client_peer.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"late reply");
        assert_eq!(session.await.unwrap(), ClosedBy::Both);
    }

    #[tokio::test]
    async fn close_broadcast_ends_session() {
        let tracker = ConnectionTracker::new();
        let (client, _client_peer) = duplex(64);
        let (target, _target_peer) = duplex(64);

        let session = tokio::spawn(relay(
            RelayMode::FirstClose,
            client,
            target,
            tracker.state_receiver(),
        ));

        tracker.drain();
        tokio::task::yield_now().await;
        assert!(!session.is_finished());

        tracker.close();
        assert_eq!(session.await.unwrap(), ClosedBy::Shutdown);
    }

    #[derive(Default)]
    struct Collect(std::sync::Mutex<Vec<Record>>);

    impl RecordSink for Collect {
        fn emit(&self, record: Record) {
            self.0.lock().unwrap().push(record);
        }
    }

    #[tokio::test]
    async fn connect_without_upgrade_support_is_rejected_before_dialing() {
        let config = crate::config::ProxyConfig::default();
        let sink = Arc::new(Collect::default());
        let state = ProxyState {
            client: crate::http::client::build_client(&config.timeouts),
            config: Arc::new(config),
            sink: sink.clone(),
            tracker: ConnectionTracker::new(),
        };
        let permit = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let listener = crate::net::Listener::from_tcp(listener, 1).unwrap();
            let _client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
            let (_stream, _peer, permit) = listener.accept().await.unwrap();
            Arc::new(permit)
        };

        // Nothing listens on port 1, so a dial would have produced a 502.
        let request = Request::builder()
            .method("CONNECT")
            .uri("127.0.0.1:1")
            .body(())
            .unwrap();
        let response = tunnel(&state, permit, request).await;
        assert_eq!(response.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);

        let records = sink.0.lock().unwrap();
        assert!(matches!(
            &records[..],
            [Record::Failure(f)] if f.error == "Hijacking not supported"
        ));
        assert_eq!(state.tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn dial_failure_names_target() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = dial(&addr.to_string(), Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ProxyError::Dial { .. }));
        assert!(err.to_string().starts_with(&format!("Failed to connect to target {addr}")));
    }
}
