//! Per-flow request/response pairing on top of the streaming parser.
//!
//! Owns one [`MessageParser`] per direction for every flow still open on a
//! pipeline, and pairs completed messages FIFO: the k-th response on a flow
//! pairs with the k-th request, exactly as spec.md §4.6 requires.

use crate::parser::{MessageKind, MessageParser};
use flowtap_types::counts::PipelineCounts;
use flowtap_types::exchange::{Exchange, HttpMessage};
use flowtap_types::flow::{Direction, FlowKey};
use flowtap_types::tags::TraceTags;
use std::collections::{HashMap, VecDeque};

struct FlowParsers {
    requests: MessageParser,
    responses: MessageParser,
    unmatched_requests: VecDeque<HttpMessage>,
    unmatched_responses: VecDeque<HttpMessage>,
}

impl FlowParsers {
    fn new(body_cap: usize) -> Self {
        Self {
            requests: MessageParser::new(MessageKind::Request, body_cap),
            responses: MessageParser::new(MessageKind::Response, body_cap),
            unmatched_requests: VecDeque::new(),
            unmatched_responses: VecDeque::new(),
        }
    }

    fn drain_pairs(&mut self) -> Vec<(HttpMessage, HttpMessage)> {
        let mut pairs = Vec::new();
        while !self.unmatched_requests.is_empty() && !self.unmatched_responses.is_empty() {
            let request = self.unmatched_requests.pop_front().expect("checked");
            let response = self.unmatched_responses.pop_front().expect("checked");
            pairs.push((request, response));
        }
        pairs
    }
}

/// Consumes reassembled payload bytes for every flow on a pipeline and
/// turns them into paired [`Exchange`]s.
pub struct ExchangePairer {
    flows: HashMap<FlowKey, FlowParsers>,
    body_cap: usize,
    tags: TraceTags,
    counts: PipelineCounts,
}

impl ExchangePairer {
    /// Creates a pairer. `tags` are stamped onto every exchange emitted.
    #[must_use]
    pub fn new(body_cap: usize, tags: TraceTags, counts: PipelineCounts) -> Self {
        Self {
            flows: HashMap::new(),
            body_cap,
            tags,
            counts,
        }
    }

    /// Feeds payload bytes for one direction of one flow, returning every
    /// exchange the new bytes completed.
    pub fn feed(&mut self, flow: &FlowKey, direction: Direction, bytes: &[u8]) -> Vec<Exchange> {
        let parsers = self
            .flows
            .entry(flow.clone())
            .or_insert_with(|| FlowParsers::new(self.body_cap));

        let feed_result = match direction {
            Direction::ClientToServer => parsers.requests.feed(bytes),
            Direction::ServerToClient => parsers.responses.feed(bytes),
        };

        if feed_result.resyncs > 0 {
            tracing::debug!(flow = %flow, direction = %direction, count = feed_result.resyncs, "resynchronized after a parse error");
            for _ in 0..feed_result.resyncs {
                self.counts.record_parse_error();
            }
        }

        for parsed in feed_result.completed {
            match direction {
                Direction::ClientToServer => parsers.unmatched_requests.push_back(parsed.message),
                Direction::ServerToClient => parsers.unmatched_responses.push_back(parsed.message),
            }
        }

        parsers
            .drain_pairs()
            .into_iter()
            .map(|(request, response)| self.build_exchange(flow, request, response))
            .collect()
    }

    /// Called when the reassembler reports a flow closed. Flushes any
    /// close-delimited response body and drops the flow's parser state;
    /// unmatched trailing requests (no response ever arrived) are
    /// discarded rather than emitted half-formed, per spec.md §3's "at
    /// most one response per request" invariant — a request with no
    /// response never reaches a sink.
    pub fn close_flow(&mut self, flow: &FlowKey) -> Vec<Exchange> {
        let Some(mut parsers) = self.flows.remove(flow) else {
            return Vec::new();
        };
        if let Some(parsed) = parsers.responses.on_stream_closed() {
            parsers.unmatched_responses.push_back(parsed.message);
        }
        let exchanges: Vec<Exchange> = parsers
            .drain_pairs()
            .into_iter()
            .map(|(request, response)| self.build_exchange(flow, request, response))
            .collect();

        if !parsers.unmatched_requests.is_empty() {
            self.counts
                .record_unmatched_request(parsers.unmatched_requests.len() as u64);
        }
        if !parsers.unmatched_responses.is_empty() {
            self.counts
                .record_unmatched_response(parsers.unmatched_responses.len() as u64);
        }

        exchanges
    }

    fn build_exchange(&self, flow: &FlowKey, request: HttpMessage, response: HttpMessage) -> Exchange {
        Exchange {
            flow: flow.clone(),
            request,
            response: Some(response),
            tags: self.tags.clone(),
            metadata: std::collections::BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn flow() -> FlowKey {
        let (key, _) = FlowKey::from_endpoints(
            "eth0",
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            54321,
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            80,
        );
        key
    }

    #[test]
    fn single_request_response_pairs() {
        let mut pairer = ExchangePairer::new(1024, TraceTags::new(), PipelineCounts::new());
        let flow = flow();
        let exchanges = pairer.feed(
            &flow,
            Direction::ClientToServer,
            b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n",
        );
        assert!(exchanges.is_empty());
        let exchanges = pairer.feed(
            &flow,
            Direction::ServerToClient,
            b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi",
        );
        assert_eq!(exchanges.len(), 1);
        assert_eq!(exchanges[0].response.as_ref().unwrap().body, b"hi");
    }

    #[test]
    fn pipelined_requests_pair_fifo() {
        let mut pairer = ExchangePairer::new(1024, TraceTags::new(), PipelineCounts::new());
        let flow = flow();
        pairer.feed(
            &flow,
            Direction::ClientToServer,
            b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n",
        );
        let exchanges = pairer.feed(
            &flow,
            Direction::ServerToClient,
            b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\nHTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n",
        );
        assert_eq!(exchanges.len(), 2);
        assert_eq!(exchanges[0].request_path(), "/a");
        assert_eq!(exchanges[0].response.as_ref().unwrap().start_line, "HTTP/1.1 200 OK");
        assert_eq!(exchanges[1].request_path(), "/b");
        assert_eq!(exchanges[1].response.as_ref().unwrap().start_line, "HTTP/1.1 404 Not Found");
    }

    #[test]
    fn close_flushes_close_delimited_response() {
        let mut pairer = ExchangePairer::new(1024, TraceTags::new(), PipelineCounts::new());
        let flow = flow();
        pairer.feed(&flow, Direction::ClientToServer, b"GET / HTTP/1.0\r\n\r\n");
        pairer.feed(
            &flow,
            Direction::ServerToClient,
            b"HTTP/1.0 200 OK\r\n\r\nbody without length",
        );
        let exchanges = pairer.close_flow(&flow);
        assert_eq!(exchanges.len(), 1);
        assert_eq!(exchanges[0].response.as_ref().unwrap().body, b"body without length");
    }
}
