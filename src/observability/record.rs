//! Traffic records and the sinks that render them.
//!
//! # Responsibilities
//! - Describe one side of an HTTP cycle, a failed cycle, or a finished tunnel
//! - Hand records to an injected [`RecordSink`] without touching wire bytes
//!
//! # Design Decisions
//! - The sink is built once in `main` and passed to the server explicitly
//! - Emission is fire-and-forget; a sink cannot fail a cycle
//! - Rendering (console blocks, log fields) belongs to the sink, not the pipeline

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use uuid::Uuid;

use crate::config::TrafficOutput;

/// Request side of an HTTP cycle, emitted before dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct RequestRecord {
    pub id: Uuid,
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// Response side of an HTTP cycle, emitted once the body has been handed off.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseRecord {
    pub id: Uuid,
    pub status: u16,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub duration: Duration,
    /// False when the client went away before the body was taken.
    pub completed: bool,
}

/// A cycle or tunnel that ended in an error response.
#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    pub id: Uuid,
    pub method: String,
    pub url: String,
    pub status: u16,
    pub error: String,
    pub duration: Duration,
}

/// Which side ended a tunnel session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClosedBy {
    Client,
    Target,
    Both,
    Shutdown,
    Error,
}

impl std::fmt::Display for ClosedBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ClosedBy::Client => "client",
            ClosedBy::Target => "target",
            ClosedBy::Both => "both",
            ClosedBy::Shutdown => "shutdown",
            ClosedBy::Error => "error",
        };
        f.write_str(s)
    }
}

/// A CONNECT session, emitted when both sockets have been closed.
#[derive(Debug, Clone, Serialize)]
pub struct TunnelRecord {
    pub id: Uuid,
    pub host: String,
    pub duration: Duration,
    pub closed_by: ClosedBy,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Record {
    Request(RequestRecord),
    Response(ResponseRecord),
    Failure(FailureRecord),
    Tunnel(TunnelRecord),
}

/// Destination for traffic records.
pub trait RecordSink: Send + Sync {
    fn emit(&self, record: Record);
}

/// Build the sink selected by configuration.
pub fn sink_for(output: TrafficOutput) -> Arc<dyn RecordSink> {
    match output {
        TrafficOutput::Console => Arc::new(ConsoleSink::stdout()),
        TrafficOutput::Log => Arc::new(TracingSink),
    }
}

/// Emits each record as one structured `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl RecordSink for TracingSink {
    fn emit(&self, record: Record) {
        match record {
            Record::Request(r) => tracing::info!(
                target: "lucy::traffic",
                request_id = %r.id,
                method = %r.method,
                url = %r.url,
                headers = ?r.headers,
                body = r.body.as_deref().unwrap_or(""),
                "HTTP request"
            ),
            Record::Response(r) => tracing::info!(
                target: "lucy::traffic",
                request_id = %r.id,
                status = r.status,
                url = %r.url,
                headers = ?r.headers,
                body = r.body.as_deref().unwrap_or(""),
                duration_ms = r.duration.as_millis() as u64,
                completed = r.completed,
                "HTTP response"
            ),
            Record::Failure(r) => tracing::error!(
                target: "lucy::traffic",
                request_id = %r.id,
                method = %r.method,
                url = %r.url,
                status = r.status,
                error = %r.error,
                duration_ms = r.duration.as_millis() as u64,
                "Request failed"
            ),
            Record::Tunnel(r) => tracing::info!(
                target: "lucy::traffic",
                tunnel_id = %r.id,
                host = %r.host,
                duration_ms = r.duration.as_millis() as u64,
                closed_by = %r.closed_by,
                "HTTPS tunnel closed"
            ),
        }
    }
}

/// Writes human-readable blocks, one per record.
pub struct ConsoleSink {
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleSink {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self { out: Mutex::new(out) }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }
}

fn render_headers(text: &mut String, headers: &[(String, String)]) {
    for (name, value) in headers {
        text.push_str(&format!("   {name}: {value}\n"));
    }
}

/// Console rendering of a record.
pub fn render_console(record: &Record) -> String {
    let mut text = String::new();
    match record {
        Record::Request(r) => {
            text.push_str(&format!("➡️ {} {}\n", r.method, r.url));
            render_headers(&mut text, &r.headers);
            if let Some(body) = &r.body {
                text.push_str(&format!("   Body: {body}\n"));
            }
        }
        Record::Response(r) => {
            text.push_str(&format!("\n⬅️ {} {} ({:?})\n", r.status, r.url, r.duration));
            render_headers(&mut text, &r.headers);
            if let Some(body) = &r.body {
                text.push_str(&format!("   Response: {body}\n"));
            }
            if !r.completed {
                text.push_str("   (client disconnected before the body was sent)\n");
            }
            text.push_str("---\n");
        }
        Record::Failure(r) => {
            text.push_str(&format!(
                "❌ ERROR {} {}: {} [{}] ({:?})\n---\n",
                r.method, r.url, r.error, r.status, r.duration
            ));
        }
        Record::Tunnel(r) => {
            text.push_str(&format!(
                "🔒 CONNECT {} closed by {} ({:?})\n---\n",
                r.host, r.closed_by, r.duration
            ));
        }
    }
    text
}

impl RecordSink for ConsoleSink {
    fn emit(&self, record: Record) {
        let text = render_console(&record);
        let Ok(mut out) = self.out.lock() else {
            tracing::debug!("Traffic record output lock poisoned, dropping record");
            return;
        };
        if let Err(e) = out.write_all(text.as_bytes()).and_then(|_| out.flush()) {
            tracing::debug!(error = %e, "Failed to write traffic record");
        }
    }
}

/// A response record waiting for its body to be handed to the connection.
///
/// The record is emitted exactly once, when this value is dropped, with the
/// elapsed time measured from `start`.
pub struct DeferredRecord {
    sink: Arc<dyn RecordSink>,
    record: Option<ResponseRecord>,
    start: Instant,
}

impl DeferredRecord {
    pub fn new(sink: Arc<dyn RecordSink>, record: ResponseRecord, start: Instant) -> Self {
        Self {
            sink,
            record: Some(record),
            start,
        }
    }

    /// Mark the body as fully handed off.
    pub fn complete(&mut self) {
        if let Some(record) = self.record.as_mut() {
            record.completed = true;
        }
    }
}

impl Drop for DeferredRecord {
    fn drop(&mut self) {
        if let Some(mut record) = self.record.take() {
            record.duration = self.start.elapsed();
            self.sink.emit(Record::Response(record));
        }
    }
}
