//! Per-direction and per-flow reassembly state.

use flowtap_types::exchange::TlsClassification;
use std::collections::BTreeMap;
use std::time::Instant;

/// The reassembly state for one direction of a TCP flow.
#[derive(Debug)]
pub struct HalfStream {
    /// Sequence number of the next byte we expect to deliver, once the
    /// stream's starting sequence has been established.
    next_seq: Option<u32>,
    /// Segments that arrived ahead of `next_seq`, keyed by their starting
    /// sequence number, waiting for the gap to close.
    out_of_order: BTreeMap<u32, Vec<u8>>,
    /// When the earliest still-unresolved gap was first observed.
    gap_opened_at: Option<Instant>,
    /// Whether a FIN has been observed on this half-stream.
    pub fin_seen: bool,
    /// Whether an RST has been observed on this half-stream.
    pub rst_seen: bool,
}

impl Default for HalfStream {
    fn default() -> Self {
        Self {
            next_seq: None,
            out_of_order: BTreeMap::new(),
            gap_opened_at: None,
            fin_seen: false,
            rst_seen: false,
        }
    }
}

/// The outcome of feeding one segment into a [`HalfStream`].
pub struct IngestOutcome {
    /// In-order bytes ready for the HTTP parser, in delivery order. May
    /// span multiple originally-out-of-order segments once a gap closes.
    pub delivered: Vec<u8>,
    /// Set if the stream had been waiting on a gap for longer than the
    /// configured timeout and is resyncing past it. Carries the number of
    /// bytes presumed lost.
    pub gap_closed_lost_bytes: Option<u64>,
}

impl HalfStream {
    /// Feeds one segment's sequence number and payload into the stream,
    /// returning whatever became ready to deliver.
    ///
    /// `gap_timeout_elapsed` is checked by the caller via
    /// [`HalfStream::gap_duration`] before deciding to force a resync; this
    /// method only performs the resync when told to.
    pub fn ingest(&mut self, seq: u32, payload: &[u8], force_resync: bool) -> IngestOutcome {
        if payload.is_empty() && !force_resync {
            return IngestOutcome {
                delivered: Vec::new(),
                gap_closed_lost_bytes: None,
            };
        }

        let Some(expected) = self.next_seq else {
            // First payload-bearing segment observed on this half-stream:
            // treat its sequence number as the origin, regardless of
            // whether we saw the handshake.
            self.next_seq = Some(seq.wrapping_add(payload.len() as u32));
            return IngestOutcome {
                delivered: payload.to_vec(),
                gap_closed_lost_bytes: None,
            };
        };

        let mut lost_bytes = None;

        if seq == expected {
            self.gap_opened_at = None;
        } else if seq_lt(seq, expected) {
            // Overlap/retransmission: drop bytes we've already delivered.
            let overlap = expected.wrapping_sub(seq) as usize;
            if overlap >= payload.len() {
                return IngestOutcome {
                    delivered: Vec::new(),
                    gap_closed_lost_bytes: None,
                };
            }
            let fresh = &payload[overlap..];
            self.next_seq = Some(expected.wrapping_add(fresh.len() as u32));
            return IngestOutcome {
                delivered: fresh.to_vec(),
                gap_closed_lost_bytes: None,
            };
        } else {
            // seq is ahead of what we expect: out-of-order or a real gap.
            self.out_of_order.insert(seq, payload.to_vec());
            if self.gap_opened_at.is_none() {
                self.gap_opened_at = Some(Instant::now());
            }
            if force_resync {
                lost_bytes = Some(u64::from(seq.wrapping_sub(expected)));
                self.next_seq = Some(seq);
                self.gap_opened_at = None;
            } else {
                return IngestOutcome {
                    delivered: Vec::new(),
                    gap_closed_lost_bytes: None,
                };
            }
        }

        if seq != expected && !force_resync {
            return IngestOutcome {
                delivered: Vec::new(),
                gap_closed_lost_bytes: None,
            };
        }

        // Stitch together the contiguous run of bytes now available,
        // starting either at `expected` (in-order arrival) or at `seq`
        // (just resynced past a gap): either way, `payload` itself is the
        // first chunk.
        let mut delivered = payload.to_vec();
        let mut cursor = self.next_seq.expect("set above");

        loop {
            let Some((&buffered_seq, _)) = self.out_of_order.iter().next() else {
                break;
            };
            if buffered_seq != cursor {
                break;
            }
            let buffered = self.out_of_order.remove(&buffered_seq).expect("just peeked");
            cursor = cursor.wrapping_add(buffered.len() as u32);
            delivered.extend_from_slice(&buffered);
        }
        self.next_seq = Some(cursor);

        IngestOutcome {
            delivered,
            gap_closed_lost_bytes: lost_bytes.take(),
        }
    }

    /// How long the oldest unresolved gap has been open, if any.
    #[must_use]
    pub fn gap_duration(&self) -> Option<std::time::Duration> {
        self.gap_opened_at.map(|t| t.elapsed())
    }
}

/// Sequence-number comparison that accounts for 32-bit wraparound: `a < b`
/// if advancing from `a` to `b` the short way is a forward step.
fn seq_lt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

/// Full reassembly state for one TCP flow: both half-streams, timing, and
/// the TLS classification once known.
pub struct FlowState {
    /// Client-to-server half-stream.
    pub client_to_server: HalfStream,
    /// Server-to-client half-stream.
    pub server_to_client: HalfStream,
    /// TLS classification, decided from the first bytes seen in the
    /// client-to-server direction.
    pub tls: TlsClassification,
    /// Bytes buffered for TLS sniffing before a classification was made.
    pub sniff_buffer: Vec<u8>,
    /// Client-to-server segments held back until a TLS classification is
    /// reached, so a plaintext flow's opening bytes are not lost to the
    /// sniffer.
    pub pending_client: Vec<(u32, Vec<u8>)>,
    /// Server-to-client segments held back for the same reason: the
    /// direction itself is never sniffed, but whether to hand its bytes to
    /// the HTTP parser depends on the client-to-server classification.
    pub pending_server: Vec<(u32, Vec<u8>)>,
    /// When this flow's first segment was observed.
    pub created_at: Instant,
    /// Last time any segment was observed on this flow.
    pub last_activity: Instant,
}

impl FlowState {
    /// A fresh, unclassified flow.
    #[must_use]
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            client_to_server: HalfStream::default(),
            server_to_client: HalfStream::default(),
            tls: TlsClassification::Undetermined,
            sniff_buffer: Vec::new(),
            pending_client: Vec::new(),
            pending_server: Vec::new(),
            created_at: now,
            last_activity: now,
        }
    }

    /// Whether both half-streams have seen a FIN or either has seen an RST.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.client_to_server.rst_seen
            || self.server_to_client.rst_seen
            || (self.client_to_server.fin_seen && self.server_to_client.fin_seen)
    }
}

impl Default for FlowState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_order_delivery_is_immediate() {
        let mut hs = HalfStream::default();
        let out = hs.ingest(0, b"hello", false);
        assert_eq!(out.delivered, b"hello");
        let out = hs.ingest(5, b" world", false);
        assert_eq!(out.delivered, b" world");
    }

    #[test]
    fn out_of_order_segment_waits_for_gap_to_close() {
        let mut hs = HalfStream::default();
        hs.ingest(0, b"AAAA", false);
        // "CCCC" arrives before "BBBB" — it should buffer, not deliver.
        let out = hs.ingest(8, b"CCCC", false);
        assert!(out.delivered.is_empty());
        let out = hs.ingest(4, b"BBBB", false);
        assert_eq!(out.delivered, b"BBBBCCCC");
    }

    #[test]
    fn forced_resync_reports_lost_bytes() {
        let mut hs = HalfStream::default();
        hs.ingest(0, b"AAAA", false);
        let out = hs.ingest(100, b"ZZZZ", true);
        assert_eq!(out.delivered, b"ZZZZ");
        assert_eq!(out.gap_closed_lost_bytes, Some(96));
    }

    #[test]
    fn retransmitted_bytes_are_dropped() {
        let mut hs = HalfStream::default();
        hs.ingest(0, b"AAAA", false);
        let out = hs.ingest(0, b"AAAA", false);
        assert!(out.delivered.is_empty());
    }
}
