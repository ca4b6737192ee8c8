//! The HTTP exchange record that flows from the parser through the
//! collector chain to a sink.

use crate::flow::FlowKey;
use crate::tags::TraceTags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What the TLS detector decided about a flow's first bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TlsClassification {
    /// The flow began with a TLS record header; it will not be parsed as
    /// HTTP/1.x.
    Tls,
    /// The flow looked like plaintext HTTP.
    PlainText,
    /// Not enough bytes were seen before the flow closed or timed out to
    /// decide either way.
    Undetermined,
}

/// A single HTTP/1.x request or response, captured off the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpMessage {
    /// Request line ("GET /path HTTP/1.1") or status line ("HTTP/1.1 200 OK").
    pub start_line: String,
    /// Header fields in wire order. Duplicate header names are preserved as
    /// separate entries.
    pub headers: Vec<(String, String)>,
    /// Body bytes, after chunked/length framing has been removed.
    pub body: Vec<u8>,
    /// True if the body was truncated because it exceeded the configured
    /// body size cap.
    pub body_truncated: bool,
    /// Wall-clock time the first byte of this message was observed.
    pub observed_at: DateTime<Utc>,
}

impl HttpMessage {
    /// Looks up the first value of a header, case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A paired request/response captured on one flow, ready for the collector
/// chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    /// Flow the exchange was observed on.
    pub flow: FlowKey,
    /// The request half of the pair.
    pub request: HttpMessage,
    /// The response half, if one arrived before the flow closed or the
    /// pairing window elapsed.
    pub response: Option<HttpMessage>,
    /// Tags merged from process-wide defaults and CLI `--tag` flags.
    pub tags: TraceTags,
    /// Arbitrary per-sink metadata populated by collector stages (e.g. the
    /// sample decision, or a remote-ingest trace id).
    pub metadata: BTreeMap<String, String>,
}

impl Exchange {
    /// The request path, stripped of query string, for path-filter matching.
    #[must_use]
    pub fn request_path(&self) -> &str {
        self.request
            .start_line
            .split_whitespace()
            .nth(1)
            .map(|target| target.split('?').next().unwrap_or(target))
            .unwrap_or("")
    }

    /// The `Host` header value, falling back to an empty string.
    #[must_use]
    pub fn request_host(&self) -> &str {
        self.request.header("host").unwrap_or("")
    }
}

/// Emitted by the reassembler in place of an [`Exchange`] when bytes were
/// lost to a capture gap and the flow can no longer be parsed reliably.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GapMarker {
    /// Flow the gap occurred on.
    pub flow: FlowKey,
    /// Number of bytes the reassembler believes were dropped.
    pub lost_bytes: u64,
    /// Wall-clock time the gap was detected.
    pub observed_at: DateTime<Utc>,
}
