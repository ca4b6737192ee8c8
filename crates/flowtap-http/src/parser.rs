//! Streaming HTTP/1.x message parser.
//!
//! One [`MessageParser`] handles a single direction of a single flow: the
//! request half or the response half. It is fed raw bytes as they arrive
//! from the reassembler and emits complete messages as soon as their
//! framing (`Content-Length` or chunked) closes, buffering partial state
//! across calls so pipelined requests and slow trickles of bytes both work.

use chrono::Utc;
use flowtap_types::exchange::HttpMessage;

/// Which half of an HTTP/1.x message a [`MessageParser`] is reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// A request line ("GET /path HTTP/1.1").
    Request,
    /// A status line ("HTTP/1.1 200 OK").
    Response,
}

/// One parsed message plus whether it was truncated for exceeding the body
/// cap.
#[derive(Debug, Clone)]
pub struct ParsedMessage {
    /// The message itself.
    pub message: HttpMessage,
}

/// Outcome of feeding bytes into a [`MessageParser`].
#[derive(Debug, Default)]
pub struct FeedResult {
    /// Messages completed by this call, in the order their framing closed.
    pub completed: Vec<ParsedMessage>,
    /// Number of times this call had to abandon a message and resync,
    /// incremented once per occurrence (spec.md §4.6).
    pub resyncs: u32,
}

#[derive(Debug, Clone)]
struct PartialMessage {
    start_line: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    truncated: bool,
    observed_at: chrono::DateTime<Utc>,
}

#[derive(Debug)]
enum ChunkState {
    AwaitingSize,
    ReadingChunk { remaining: usize },
    AwaitingChunkCrlf,
    AwaitingTrailerEnd,
}

#[derive(Debug)]
enum State {
    /// No bytes of a message buffered yet, or mid-start-line.
    StartLine,
    /// Start line parsed, reading header lines until a blank line.
    Headers {
        start_line: String,
        headers: Vec<(String, String)>,
        observed_at: chrono::DateTime<Utc>,
    },
    BodyContentLength {
        partial: PartialMessage,
        remaining: usize,
    },
    BodyChunked {
        partial: PartialMessage,
        chunk: ChunkState,
    },
    /// No framing found and the message kind implies no body (e.g. a GET
    /// request, or a response whose status forbids one): complete at the
    /// end of headers with an empty body. This state exists only to share
    /// the completion code path; it never buffers bytes.
    NoBody,
}

/// Streaming parser for one direction of one flow.
pub struct MessageParser {
    kind: MessageKind,
    state: State,
    buffer: Vec<u8>,
    body_cap: usize,
    completed: Vec<ParsedMessage>,
}

impl MessageParser {
    /// Creates a parser for `kind`, capping message bodies at `body_cap`
    /// bytes before truncating with the flag set (spec.md §4.6).
    #[must_use]
    pub fn new(kind: MessageKind, body_cap: usize) -> Self {
        Self {
            kind,
            state: State::StartLine,
            buffer: Vec::new(),
            body_cap,
            completed: Vec::new(),
        }
    }

    /// Feeds newly delivered bytes, returning every message that completed
    /// as a result.
    pub fn feed(&mut self, bytes: &[u8]) -> FeedResult {
        self.buffer.extend_from_slice(bytes);
        let mut result = FeedResult::default();
        loop {
            if !self.step(&mut result) {
                break;
            }
        }
        result.completed.append(&mut self.completed);
        result
    }

    /// Called when the underlying flow closes. Some responses are framed
    /// by connection close rather than `Content-Length`/chunked; this
    /// flushes such a message as complete with whatever body arrived.
    pub fn on_stream_closed(&mut self) -> Option<ParsedMessage> {
        if let State::Headers { start_line, headers, observed_at } =
            std::mem::replace(&mut self.state, State::StartLine)
        {
            if !self.buffer.is_empty() {
                let body = std::mem::take(&mut self.buffer);
                return Some(ParsedMessage {
                    message: HttpMessage {
                        start_line,
                        headers,
                        body,
                        body_truncated: false,
                        observed_at,
                    },
                });
            }
            self.state = State::StartLine;
        }
        None
    }

    /// Advances the state machine by as much as the buffer allows. Returns
    /// `true` if progress was made and the caller should loop again.
    fn step(&mut self, result: &mut FeedResult) -> bool {
        match &mut self.state {
            State::StartLine => self.try_start_line(result),
            State::Headers { .. } => self.try_headers(),
            State::BodyContentLength { .. } => self.try_content_length_body(result),
            State::BodyChunked { .. } => self.try_chunked_body(result),
            State::NoBody => unreachable!("NoBody is resolved within the same step"),
        }
    }

    fn try_start_line(&mut self, result: &mut FeedResult) -> bool {
        let Some(line_end) = find_crlf(&self.buffer) else {
            return false;
        };
        let line = take_line(&mut self.buffer, line_end);

        if line.is_empty() {
            // Tolerate a stray blank line between pipelined messages.
            return !self.buffer.is_empty();
        }

        if !is_plausible_start_line(self.kind, &line) {
            result.resyncs += 1;
            return self.resync();
        }

        self.state = State::Headers {
            start_line: line,
            headers: Vec::new(),
            observed_at: Utc::now(),
        };
        true
    }

    fn try_headers(&mut self) -> bool {
        let Some(line_end) = find_crlf(&self.buffer) else {
            return false;
        };
        let line = take_line(&mut self.buffer, line_end);

        let State::Headers { start_line, headers, observed_at } = &mut self.state else {
            unreachable!()
        };

        if line.is_empty() {
            let start_line = std::mem::take(start_line);
            let headers = std::mem::take(headers);
            let observed_at = *observed_at;
            self.transition_to_body(start_line, headers, observed_at);
            return true;
        }

        let Some((name, value)) = line.split_once(':') else {
            // Malformed header line: treat the whole message as corrupt.
            self.state = State::StartLine;
            return true;
        };
        headers.push((name.trim().to_string(), value.trim().to_string()));
        true
    }

    fn transition_to_body(
        &mut self,
        start_line: String,
        headers: Vec<(String, String)>,
        observed_at: chrono::DateTime<Utc>,
    ) {
        let partial = PartialMessage {
            start_line,
            headers,
            body: Vec::new(),
            truncated: false,
            observed_at,
        };

        if header_value(&partial.headers, "transfer-encoding")
            .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"))
        {
            self.state = State::BodyChunked {
                partial,
                chunk: ChunkState::AwaitingSize,
            };
            return;
        }

        if let Some(len) = header_value(&partial.headers, "content-length")
            .and_then(|v| v.trim().parse::<usize>().ok())
        {
            if len == 0 {
                self.complete(partial);
            } else {
                self.state = State::BodyContentLength {
                    partial,
                    remaining: len,
                };
            }
            return;
        }

        if self.kind == MessageKind::Response && !status_forbids_body(&partial.start_line) {
            // No explicit framing: this response is closed-delimited.
            // Keep accumulating into the headers' trailing buffer via a
            // content-length-style state with an effectively unbounded
            // remaining count, capped by body_cap like everything else.
            self.state = State::BodyContentLength {
                partial,
                remaining: self.body_cap.max(1),
            };
            return;
        }

        self.complete(partial);
    }

    fn try_content_length_body(&mut self, result: &mut FeedResult) -> bool {
        let State::BodyContentLength { partial, remaining } = &mut self.state else {
            unreachable!()
        };
        if self.buffer.is_empty() {
            return false;
        }
        let take = self.buffer.len().min(*remaining);
        let chunk: Vec<u8> = self.buffer.drain(..take).collect();
        append_capped(partial, &chunk, self.body_cap);
        *remaining -= take;

        if *remaining == 0 {
            let partial = match std::mem::replace(&mut self.state, State::StartLine) {
                State::BodyContentLength { partial, .. } => partial,
                _ => unreachable!(),
            };
            self.complete(partial);
            return true;
        }
        let _ = result;
        !self.buffer.is_empty()
    }

    fn try_chunked_body(&mut self, result: &mut FeedResult) -> bool {
        loop {
            let State::BodyChunked { partial: _, chunk } = &mut self.state else {
                unreachable!()
            };
            match chunk {
                ChunkState::AwaitingSize => {
                    let Some(line_end) = find_crlf(&self.buffer) else {
                        return false;
                    };
                    let line = take_line(&mut self.buffer, line_end);
                    let size_str = line.split(';').next().unwrap_or("").trim();
                    let Ok(size) = usize::from_str_radix(size_str, 16) else {
                        result.resyncs += 1;
                        return self.resync();
                    };
                    if size == 0 {
                        let State::BodyChunked { chunk, .. } = &mut self.state else {
                            unreachable!()
                        };
                        *chunk = ChunkState::AwaitingTrailerEnd;
                    } else {
                        let State::BodyChunked { chunk, .. } = &mut self.state else {
                            unreachable!()
                        };
                        *chunk = ChunkState::ReadingChunk { remaining: size };
                    }
                }
                ChunkState::ReadingChunk { remaining } => {
                    if self.buffer.is_empty() {
                        return false;
                    }
                    let take = self.buffer.len().min(*remaining);
                    let bytes: Vec<u8> = self.buffer.drain(..take).collect();
                    let State::BodyChunked { partial, chunk } = &mut self.state else {
                        unreachable!()
                    };
                    append_capped(partial, &bytes, self.body_cap);
                    let new_remaining = match chunk {
                        ChunkState::ReadingChunk { remaining } => {
                            *remaining -= take;
                            *remaining
                        }
                        _ => unreachable!(),
                    };
                    if new_remaining == 0 {
                        *chunk = ChunkState::AwaitingChunkCrlf;
                    } else {
                        return !self.buffer.is_empty();
                    }
                }
                ChunkState::AwaitingChunkCrlf => {
                    let Some(line_end) = find_crlf(&self.buffer) else {
                        return false;
                    };
                    take_line(&mut self.buffer, line_end);
                    let State::BodyChunked { chunk, .. } = &mut self.state else {
                        unreachable!()
                    };
                    *chunk = ChunkState::AwaitingSize;
                }
                ChunkState::AwaitingTrailerEnd => {
                    let Some(line_end) = find_crlf(&self.buffer) else {
                        return false;
                    };
                    let line = take_line(&mut self.buffer, line_end);
                    if line.is_empty() {
                        let partial = match std::mem::replace(&mut self.state, State::StartLine) {
                            State::BodyChunked { partial, .. } => partial,
                            _ => unreachable!(),
                        };
                        self.complete(partial);
                        return true;
                    }
                    // Trailer header: discarded, we don't surface trailers.
                }
            }
        }
    }

    fn resync(&mut self) -> bool {
        // Scan forward for the next line that looks like a plausible
        // start line for this direction, discarding everything before it
        // (spec.md §4.6's "resynchronize at the next plausible
        // request-line or status-line boundary").
        self.state = State::StartLine;
        loop {
            let Some(line_end) = find_crlf(&self.buffer) else {
                return false;
            };
            let candidate = peek_line(&self.buffer, line_end);
            if candidate.is_empty() || is_plausible_start_line(self.kind, &candidate) {
                return !self.buffer.is_empty();
            }
            take_line(&mut self.buffer, line_end);
        }
    }

    fn complete(&mut self, partial: PartialMessage) {
        self.completed.push(ParsedMessage {
            message: HttpMessage {
                start_line: partial.start_line,
                headers: partial.headers,
                body: partial.body,
                body_truncated: partial.truncated,
                observed_at: partial.observed_at,
            },
        });
        self.state = State::StartLine;
    }
}

fn append_capped(partial: &mut PartialMessage, bytes: &[u8], cap: usize) {
    if partial.body.len() >= cap {
        partial.truncated = true;
        return;
    }
    let room = cap - partial.body.len();
    if bytes.len() > room {
        partial.body.extend_from_slice(&bytes[..room]);
        partial.truncated = true;
    } else {
        partial.body.extend_from_slice(bytes);
    }
}

fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn status_forbids_body(start_line: &str) -> bool {
    start_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .is_some_and(|code| (100..200).contains(&code) || code == 204 || code == 304)
}

fn find_crlf(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\r\n").map(|p| p + 2)
}

fn take_line(buffer: &mut Vec<u8>, line_end: usize) -> String {
    let line: Vec<u8> = buffer.drain(..line_end).collect();
    String::from_utf8_lossy(&line[..line.len() - 2]).into_owned()
}

fn peek_line(buffer: &[u8], line_end: usize) -> String {
    String::from_utf8_lossy(&buffer[..line_end - 2]).into_owned()
}

const REQUEST_METHODS: &[&str] = &[
    "GET", "POST", "PUT", "DELETE", "HEAD", "OPTIONS", "PATCH", "CONNECT", "TRACE",
];

fn is_plausible_start_line(kind: MessageKind, line: &str) -> bool {
    match kind {
        MessageKind::Request => {
            let mut parts = line.split_whitespace();
            let Some(method) = parts.next() else {
                return false;
            };
            let has_target = parts.next().is_some();
            let version_ok = parts.next().is_some_and(|v| v.starts_with("HTTP/"));
            REQUEST_METHODS.contains(&method) && has_target && version_ok
        }
        MessageKind::Response => line.starts_with("HTTP/"),
    }
}
