//! Outbound HTTP client creation.
//!
//! One pooled client is built at startup and shared by every forwarding cycle.
//! Reuse of pooled connections is an optimization only; no cycle depends on it.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;

use crate::config::TimeoutConfig;

/// Client used to reach origins over plain HTTP or TLS.
pub type HttpClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

const TCP_KEEPALIVE: Duration = Duration::from_secs(30);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const POOL_MAX_IDLE_PER_HOST: usize = 100;

/// Build the shared outbound client. TLS origins are verified against the
/// bundled webpki root set.
pub fn build_client(timeouts: &TimeoutConfig) -> HttpClient {
    let mut http = HttpConnector::new();
    http.set_connect_timeout(Some(timeouts.connect()));
    http.set_keepalive(Some(TCP_KEEPALIVE));
    http.set_nodelay(true);
    http.enforce_http(false);

    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .wrap_connector(http);

    let client = Client::builder(TokioExecutor::new())
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .build(https);

    tracing::debug!(
        connect_timeout_secs = timeouts.connect_secs,
        max_idle_per_host = POOL_MAX_IDLE_PER_HOST,
        idle_timeout_secs = POOL_IDLE_TIMEOUT.as_secs(),
        "Outbound client configured"
    );

    client
}
