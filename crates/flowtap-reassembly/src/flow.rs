//! Per-interface TCP reassembler: owns every flow's state exclusively (no
//! locking, per spec.md §5) and turns a stream of [`TcpSegment`]s into
//! ordered payload deliveries and connection lifecycle events.

use crate::state::FlowState;
use crate::tls::{self, Sniff};
use flowtap_capture::{TcpFlags, TcpSegment};
use flowtap_types::counts::PipelineCounts;
use flowtap_types::exchange::{GapMarker, TlsClassification};
use flowtap_types::flow::{Direction, FlowKey};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, trace};

/// Everything downstream stages (the TLS detector's consumer and the HTTP
/// parser) need from one step of reassembly.
#[derive(Debug, Clone)]
pub enum ReassemblyEvent {
    /// First segment observed on a new 5-tuple.
    Opened {
        /// The newly created flow.
        flow: FlowKey,
    },
    /// The client-to-server half-stream was classified.
    TlsClassified {
        /// Flow the classification applies to.
        flow: FlowKey,
        /// The decision.
        classification: TlsClassification,
        /// Server name, if extractable from a TLS ClientHello.
        sni: Option<String>,
    },
    /// In-order payload bytes ready for the HTTP parser. Only emitted for
    /// flows classified as plaintext.
    Payload {
        /// Flow the bytes belong to.
        flow: FlowKey,
        /// Which half-stream.
        direction: Direction,
        /// The delivered bytes, in stream order.
        bytes: Vec<u8>,
    },
    /// A reassembly gap was resynced past; some bytes are presumed lost.
    Gap(GapMarker),
    /// The flow closed (FIN/RST) or was evicted for being idle.
    Closed {
        /// The closed flow.
        flow: FlowKey,
    },
}

/// Owns reassembly state for every flow observed on one interface/filter
/// pipeline.
pub struct Reassembler {
    interface: String,
    flows: HashMap<FlowKey, FlowState>,
    gap_timeout: Duration,
    idle_timeout: Duration,
    counts: PipelineCounts,
}

impl Reassembler {
    /// Creates an empty reassembler for one pipeline.
    #[must_use]
    pub fn new(
        interface: impl Into<String>,
        gap_timeout: Duration,
        idle_timeout: Duration,
        counts: PipelineCounts,
    ) -> Self {
        Self {
            interface: interface.into(),
            flows: HashMap::new(),
            gap_timeout,
            idle_timeout,
            counts,
        }
    }

    /// Number of flows currently tracked. Exposed for budget/backpressure
    /// decisions by the caller.
    #[must_use]
    pub fn active_flow_count(&self) -> usize {
        self.flows.len()
    }

    /// Feeds one captured TCP segment into the reassembler, returning every
    /// event the segment produced (possibly none, e.g. a duplicate ACK).
    pub fn ingest(&mut self, segment: TcpSegment) -> Vec<ReassemblyEvent> {
        let (key, direction) = FlowKey::from_endpoints(
            self.interface.clone(),
            segment.src_addr,
            segment.src_port,
            segment.dst_addr,
            segment.dst_port,
        );

        if contradictory_flags(&segment.flags) {
            self.counts.record_bad_assembler_context_type();
            trace!(flow = %key, "dropping segment with contradictory control flags");
            return Vec::new();
        }

        let mut events = Vec::new();
        let is_new = !self.flows.contains_key(&key);
        let state = self.flows.entry(key.clone()).or_insert_with(FlowState::new);
        state.last_activity = std::time::Instant::now();

        if is_new {
            events.push(ReassemblyEvent::Opened { flow: key.clone() });
        }

        record_control_flags(state, direction, &segment.flags);

        if !segment.payload.is_empty() {
            feed_payload(&self.counts, &key, state, direction, segment.seq, &segment.payload, &mut events);
        }

        if state.is_closed() {
            events.push(ReassemblyEvent::Closed { flow: key.clone() });
            self.flows.remove(&key);
        }

        events
    }

    /// Sweeps every tracked flow for a gap that has outlived
    /// `gap_timeout` (forcing a resync past it) or total idleness past
    /// `idle_timeout` (closing it). Call periodically — there is no
    /// internal timer thread, per the "no locking, no hidden concurrency
    /// inside one pipeline task" design (spec.md §5).
    pub fn sweep_timeouts(&mut self) -> Vec<ReassemblyEvent> {
        let mut events = Vec::new();
        let mut to_close = Vec::new();

        for (key, state) in &mut self.flows {
            if state.last_activity.elapsed() >= self.idle_timeout {
                to_close.push(key.clone());
                continue;
            }

            if matches!(state.tls, TlsClassification::Undetermined)
                && state.last_activity.elapsed() >= self.idle_timeout.min(self.gap_timeout * 6)
            {
                let classification = match tls::classify_on_idle(&state.sniff_buffer) {
                    Sniff::Tls { .. } => TlsClassification::Tls,
                    _ => TlsClassification::PlainText,
                };
                let sni = match tls::classify_on_idle(&state.sniff_buffer) {
                    Sniff::Tls { sni } => sni,
                    _ => None,
                };
                events.push(ReassemblyEvent::TlsClassified {
                    flow: key.clone(),
                    classification,
                    sni,
                });
                state.tls = classification;
                if classification == TlsClassification::PlainText {
                    for (seq, bytes) in std::mem::take(&mut state.pending_client) {
                        let outcome = state.client_to_server.ingest(seq, &bytes, false);
                        push_delivery(key, Direction::ClientToServer, outcome, &mut events);
                    }
                    for (seq, bytes) in std::mem::take(&mut state.pending_server) {
                        let outcome = state.server_to_client.ingest(seq, &bytes, false);
                        push_delivery(key, Direction::ServerToClient, outcome, &mut events);
                    }
                } else {
                    state.pending_client.clear();
                    state.pending_server.clear();
                }
            }

            for (direction, half) in [
                (Direction::ClientToServer, &mut state.client_to_server),
                (Direction::ServerToClient, &mut state.server_to_client),
            ] {
                if half
                    .gap_duration()
                    .is_some_and(|d| d >= self.gap_timeout)
                {
                    let outcome = half.ingest(0, &[], true);
                    if let Some(lost_bytes) = outcome.gap_closed_lost_bytes {
                        self.counts.record_gap();
                        events.push(ReassemblyEvent::Gap(GapMarker {
                            flow: key.clone(),
                            lost_bytes,
                            observed_at: chrono::Utc::now(),
                        }));
                    }
                    if !outcome.delivered.is_empty() {
                        events.push(ReassemblyEvent::Payload {
                            flow: key.clone(),
                            direction,
                            bytes: outcome.delivered,
                        });
                    }
                }
            }
        }

        for key in to_close {
            self.flows.remove(&key);
            debug!(flow = %key, "closing idle flow");
            events.push(ReassemblyEvent::Closed { flow: key });
        }

        events
    }

    /// Force-closes every remaining flow, emitting a `Closed` event for
    /// each. Called once when the owning pipeline is told to stop, so
    /// in-flight state does not simply vanish (spec.md §5's drain
    /// contract).
    pub fn drain(&mut self) -> Vec<ReassemblyEvent> {
        self.flows
            .drain()
            .map(|(flow, _)| ReassemblyEvent::Closed { flow })
            .collect()
    }
}

/// Feeds one direction's payload bytes into `state`, sniffing for TLS
/// while classification is still undetermined and delivering in-order
/// bytes once it is plaintext. Takes `counts` and `state` directly
/// (rather than `&mut self`) so it can be called while a `&mut FlowState`
/// borrowed out of `Reassembler::flows` is still outstanding.
fn feed_payload(
    counts: &PipelineCounts,
    key: &FlowKey,
    state: &mut FlowState,
    direction: Direction,
    seq: u32,
    payload: &[u8],
    events: &mut Vec<ReassemblyEvent>,
) {
    if matches!(state.tls, TlsClassification::Undetermined) {
        match direction {
            Direction::ClientToServer => {
                state.sniff_buffer.extend_from_slice(payload);
                state.pending_client.push((seq, payload.to_vec()));
            }
            Direction::ServerToClient => {
                state.pending_server.push((seq, payload.to_vec()));
            }
        }

        if direction == Direction::ClientToServer {
            match tls::classify(&state.sniff_buffer) {
                Sniff::Pending => {}
                Sniff::Tls { sni } => {
                    finalize_classification(counts, key, state, TlsClassification::Tls, sni, events);
                }
                Sniff::PlainText => {
                    finalize_classification(
                        counts,
                        key,
                        state,
                        TlsClassification::PlainText,
                        None,
                        events,
                    );
                }
            }
        }
        return;
    }

    deliver(counts, key, state, direction, seq, payload, events);
}

fn finalize_classification(
    counts: &PipelineCounts,
    key: &FlowKey,
    state: &mut FlowState,
    classification: TlsClassification,
    sni: Option<String>,
    events: &mut Vec<ReassemblyEvent>,
) {
    state.tls = classification;
    events.push(ReassemblyEvent::TlsClassified {
        flow: key.clone(),
        classification,
        sni,
    });

    if classification != TlsClassification::PlainText {
        state.pending_client.clear();
        state.pending_server.clear();
        return;
    }

    for (seq, bytes) in std::mem::take(&mut state.pending_client) {
        deliver(counts, key, state, Direction::ClientToServer, seq, &bytes, events);
    }
    for (seq, bytes) in std::mem::take(&mut state.pending_server) {
        deliver(counts, key, state, Direction::ServerToClient, seq, &bytes, events);
    }
}

fn deliver(
    counts: &PipelineCounts,
    key: &FlowKey,
    state: &mut FlowState,
    direction: Direction,
    seq: u32,
    payload: &[u8],
    events: &mut Vec<ReassemblyEvent>,
) {
    let half = match direction {
        Direction::ClientToServer => &mut state.client_to_server,
        Direction::ServerToClient => &mut state.server_to_client,
    };
    let outcome = half.ingest(seq, payload, false);

    if let Some(lost_bytes) = outcome.gap_closed_lost_bytes {
        counts.record_gap();
        events.push(ReassemblyEvent::Gap(GapMarker {
            flow: key.clone(),
            lost_bytes,
            observed_at: chrono::Utc::now(),
        }));
    }

    if !outcome.delivered.is_empty() {
        events.push(ReassemblyEvent::Payload {
            flow: key.clone(),
            direction,
            bytes: outcome.delivered,
        });
    }
}

fn push_delivery(
    key: &FlowKey,
    direction: Direction,
    outcome: crate::state::IngestOutcome,
    events: &mut Vec<ReassemblyEvent>,
) {
    if !outcome.delivered.is_empty() {
        events.push(ReassemblyEvent::Payload {
            flow: key.clone(),
            direction,
            bytes: outcome.delivered,
        });
    }
}

fn contradictory_flags(flags: &TcpFlags) -> bool {
    flags.syn && flags.fin && flags.rst
}

fn record_control_flags(state: &mut FlowState, direction: Direction, flags: &TcpFlags) {
    let half = match direction {
        Direction::ClientToServer => &mut state.client_to_server,
        Direction::ServerToClient => &mut state.server_to_client,
    };
    if flags.fin {
        half.fin_seen = true;
    }
    if flags.rst {
        half.rst_seen = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::net::{IpAddr, Ipv4Addr};

    fn segment(src_port: u16, dst_port: u16, seq: u32, payload: &[u8], flags: TcpFlags) -> TcpSegment {
        TcpSegment {
            timestamp: Utc::now(),
            src_addr: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            src_port,
            dst_addr: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            dst_port,
            flags,
            seq,
            payload: payload.to_vec(),
        }
    }

    fn reassembler() -> Reassembler {
        Reassembler::new("eth0", Duration::from_secs(10), Duration::from_secs(60), PipelineCounts::new())
    }

    #[test]
    fn first_segment_opens_flow() {
        let mut r = reassembler();
        let events = r.ingest(segment(54321, 80, 0, b"GET / HTTP/1.1\r\n\r\n", TcpFlags::default()));
        assert!(matches!(events[0], ReassemblyEvent::Opened { .. }));
        assert_eq!(r.active_flow_count(), 1);
    }

    #[test]
    fn plaintext_request_is_delivered_as_payload() {
        let mut r = reassembler();
        let events = r.ingest(segment(54321, 80, 0, b"GET / HTTP/1.1\r\n\r\n", TcpFlags::default()));
        assert!(events.iter().any(|e| matches!(
            e,
            ReassemblyEvent::TlsClassified {
                classification: TlsClassification::PlainText,
                ..
            }
        )));
        assert!(events
            .iter()
            .any(|e| matches!(e, ReassemblyEvent::Payload { .. })));
    }

    #[test]
    fn tls_record_header_suppresses_payload_delivery() {
        let mut r = reassembler();
        let tls_bytes = [0x16u8, 0x03, 0x01, 0x00, 0x05, 0x01, 0x00, 0x00, 0x01, 0xff];
        let events = r.ingest(segment(54321, 443, 0, &tls_bytes, TcpFlags::default()));
        assert!(events.iter().any(|e| matches!(
            e,
            ReassemblyEvent::TlsClassified {
                classification: TlsClassification::Tls,
                ..
            }
        )));
        assert!(!events
            .iter()
            .any(|e| matches!(e, ReassemblyEvent::Payload { .. })));
    }

    #[test]
    fn fin_from_both_sides_closes_flow() {
        let mut r = reassembler();
        let mut fin = TcpFlags::default();
        fin.fin = true;
        r.ingest(segment(54321, 80, 0, b"", TcpFlags::default()));
        r.ingest(segment(80, 54321, 0, b"", TcpFlags::default()));
        r.ingest(segment(54321, 80, 1, b"", fin));
        let events = r.ingest(segment(80, 54321, 1, b"", fin));
        assert!(events.iter().any(|e| matches!(e, ReassemblyEvent::Closed { .. })));
        assert_eq!(r.active_flow_count(), 0);
    }

    #[test]
    fn contradictory_flags_are_dropped_and_counted() {
        let mut r = reassembler();
        let mut bogus = TcpFlags::default();
        bogus.syn = true;
        bogus.fin = true;
        bogus.rst = true;
        let events = r.ingest(segment(54321, 80, 0, b"x", bogus));
        assert!(events.is_empty());
    }

    #[test]
    fn drain_closes_every_open_flow() {
        let mut r = reassembler();
        r.ingest(segment(54321, 80, 0, b"", TcpFlags::default()));
        r.ingest(segment(11111, 22, 0, b"", TcpFlags::default()));
        let events = r.drain();
        assert_eq!(events.len(), 2);
        assert_eq!(r.active_flow_count(), 0);
    }
}
