//! Shared, thread-safe counters for the pipeline's packet- and
//! exchange-level bookkeeping.
//!
//! A single [`PipelineCounts`] is created per pipeline and cloned (cheaply,
//! it is reference-counted) into the capture source, the reassembler, and
//! every collector stage, so the final summary printed at shutdown reflects
//! counts observed anywhere along the chain.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Counters {
    packets_captured: AtomicU64,
    packets_dropped_by_kernel: AtomicU64,
    bytes_captured: AtomicU64,
    reassembly_gaps: AtomicU64,
    parse_errors: AtomicU64,
    exchanges_pre_filter: AtomicU64,
    exchanges_post_filter: AtomicU64,
    exchanges_rate_limited: AtomicU64,
    exchanges_sampled_out: AtomicU64,
    exchanges_sunk: AtomicU64,
    exchanges_sink_failed: AtomicU64,
    nil_assembler_context: AtomicU64,
    bad_assembler_context_type: AtomicU64,
    nil_assembler_context_after_parse: AtomicU64,
    unmatched_requests: AtomicU64,
    unmatched_responses: AtomicU64,
}

/// A cheap-to-clone handle to a pipeline's running counters.
#[derive(Debug, Clone, Default)]
pub struct PipelineCounts(Arc<Counters>);

impl PipelineCounts {
    /// Creates a fresh, zeroed counter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `n` captured packets totaling `bytes`.
    pub fn record_packets(&self, n: u64, bytes: u64) {
        self.0.packets_captured.fetch_add(n, Ordering::Relaxed);
        self.0.bytes_captured.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Records kernel-reported drops, as surfaced by `pcap_stats`.
    pub fn record_kernel_drops(&self, n: u64) {
        self.0
            .packets_dropped_by_kernel
            .fetch_add(n, Ordering::Relaxed);
    }

    /// Records a reassembly gap (lost bytes on a flow).
    pub fn record_gap(&self) {
        self.0.reassembly_gaps.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an HTTP parse error that forced a resync.
    pub fn record_parse_error(&self) {
        self.0.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an exchange reaching the front of the collector chain.
    pub fn record_pre_filter(&self) {
        self.0.exchanges_pre_filter.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an exchange that survived every filter stage.
    pub fn record_post_filter(&self) {
        self.0
            .exchanges_post_filter
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Records an exchange dropped by the rate limiter.
    pub fn record_rate_limited(&self) {
        self.0
            .exchanges_rate_limited
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Records an exchange dropped by the sampler.
    pub fn record_sampled_out(&self) {
        self.0
            .exchanges_sampled_out
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Records an exchange successfully handed to a terminal sink.
    pub fn record_sunk(&self) {
        self.0.exchanges_sunk.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a terminal sink failure.
    pub fn record_sink_failed(&self) {
        self.0.exchanges_sink_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a segment dropped because the reassembler had no usable
    /// context to place it in (spec.md §4.4's recoverable-fault counters).
    pub fn record_nil_assembler_context(&self) {
        self.0
            .nil_assembler_context
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Records a segment dropped because its assembler context was present
    /// but malformed (e.g. contradictory control flags).
    pub fn record_bad_assembler_context_type(&self) {
        self.0
            .bad_assembler_context_type
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Records a segment whose context went missing after the HTTP parse
    /// step had already started consuming it.
    pub fn record_nil_assembler_context_after_parse(&self) {
        self.0
            .nil_assembler_context_after_parse
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Records a request that closed its flow without ever receiving a
    /// matching response.
    pub fn record_unmatched_request(&self, n: u64) {
        self.0.unmatched_requests.fetch_add(n, Ordering::Relaxed);
    }

    /// Records a response that closed its flow without ever being paired
    /// to a request (spec.md §7's asymmetric-shutdown case).
    pub fn record_unmatched_response(&self, n: u64) {
        self.0.unmatched_responses.fetch_add(n, Ordering::Relaxed);
    }

    /// Takes a point-in-time, serializable snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> CountSummary {
        CountSummary {
            packets_captured: self.0.packets_captured.load(Ordering::Relaxed),
            packets_dropped_by_kernel: self.0.packets_dropped_by_kernel.load(Ordering::Relaxed),
            bytes_captured: self.0.bytes_captured.load(Ordering::Relaxed),
            reassembly_gaps: self.0.reassembly_gaps.load(Ordering::Relaxed),
            parse_errors: self.0.parse_errors.load(Ordering::Relaxed),
            exchanges_pre_filter: self.0.exchanges_pre_filter.load(Ordering::Relaxed),
            exchanges_post_filter: self.0.exchanges_post_filter.load(Ordering::Relaxed),
            exchanges_rate_limited: self.0.exchanges_rate_limited.load(Ordering::Relaxed),
            exchanges_sampled_out: self.0.exchanges_sampled_out.load(Ordering::Relaxed),
            exchanges_sunk: self.0.exchanges_sunk.load(Ordering::Relaxed),
            exchanges_sink_failed: self.0.exchanges_sink_failed.load(Ordering::Relaxed),
            nil_assembler_context: self.0.nil_assembler_context.load(Ordering::Relaxed),
            bad_assembler_context_type: self.0.bad_assembler_context_type.load(Ordering::Relaxed),
            nil_assembler_context_after_parse: self
                .0
                .nil_assembler_context_after_parse
                .load(Ordering::Relaxed),
            unmatched_requests: self.0.unmatched_requests.load(Ordering::Relaxed),
            unmatched_responses: self.0.unmatched_responses.load(Ordering::Relaxed),
        }
    }
}

/// A serializable snapshot of [`PipelineCounts`], suitable for the final
/// run report or a periodic log line.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CountSummary {
    /// Total packets captured.
    pub packets_captured: u64,
    /// Packets the kernel reports it dropped before delivery.
    pub packets_dropped_by_kernel: u64,
    /// Total bytes captured.
    pub bytes_captured: u64,
    /// Reassembly gaps (lost-byte events) observed.
    pub reassembly_gaps: u64,
    /// HTTP parse errors that forced a stream resync.
    pub parse_errors: u64,
    /// Exchanges that reached the front of the collector chain.
    pub exchanges_pre_filter: u64,
    /// Exchanges that survived every filter stage.
    pub exchanges_post_filter: u64,
    /// Exchanges dropped by the rate limiter.
    pub exchanges_rate_limited: u64,
    /// Exchanges dropped by the sampler.
    pub exchanges_sampled_out: u64,
    /// Exchanges successfully handed to a terminal sink.
    pub exchanges_sunk: u64,
    /// Exchanges a terminal sink failed to accept.
    pub exchanges_sink_failed: u64,
    /// Segments dropped for lack of any assembler context (spec.md §4.4).
    pub nil_assembler_context: u64,
    /// Segments dropped for a malformed assembler context.
    pub bad_assembler_context_type: u64,
    /// Segments whose assembler context disappeared mid-parse.
    pub nil_assembler_context_after_parse: u64,
    /// Requests whose flow closed with no matching response ever arriving.
    pub unmatched_requests: u64,
    /// Responses whose flow closed with no matching request ever pairing.
    pub unmatched_responses: u64,
}

impl CountSummary {
    /// Fraction of packets the kernel dropped before delivery, 0.0 if none
    /// were captured.
    #[must_use]
    pub fn kernel_drop_rate(&self) -> f64 {
        if self.packets_captured == 0 {
            return 0.0;
        }
        self.packets_dropped_by_kernel as f64 / self.packets_captured as f64
    }
}
