//! One pipeline: a single (interface, filter-state) task owning its own
//! reassembler, HTTP pairer, and collector chain exclusively, per spec.md
//! §5's "no locking required within a task".

use crate::error::{Result, SupervisorError};
use flowtap_capture::{CaptureFilter, PacketSource, SourceConfig};
use flowtap_collector::SharedStage;
use flowtap_http::ExchangePairer;
use flowtap_reassembly::{Reassembler, ReassemblyEvent};
use flowtap_types::counts::{CountSummary, PipelineCounts};
use flowtap_types::flow::FlowKey;
use flowtap_types::tags::TraceTags;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Whether a pipeline carries traffic matching the user's filter, or its
/// complement kept only for diagnostic counting (spec.md §4.2, §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    /// Traffic matching the configured filter.
    Matched,
    /// Traffic matching the filter's negation, captured only when `debug`
    /// is set.
    Negation,
}

/// Everything one pipeline task needs to run to completion.
pub struct PipelineSpec {
    /// Interface this pipeline captures on.
    pub interface: String,
    /// Whether this is the matched or negation side.
    pub kind: FilterKind,
    /// Compiled BPF filter for this pipeline.
    pub filter: CaptureFilter,
    /// How long a flow may sit idle before eviction.
    pub idle_timeout: Duration,
    /// How long the reassembler waits before resyncing past a gap.
    pub gap_timeout: Duration,
    /// Body size cap, in bytes, passed to the HTTP parser.
    pub body_cap_bytes: usize,
    /// Tags stamped onto every exchange this pipeline emits.
    pub tags: TraceTags,
    /// The built collector chain this pipeline's exchanges flow into.
    pub chain: SharedStage,
}

/// How long a pipeline keeps draining already-buffered segments after
/// `stop` before forcing its reassembler closed. Bounds the "wait for
/// drain" promise in spec.md §5 to something finite even if the capture
/// thread is slow to notice the stop flag.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(3);

/// How often the reassembler is swept for gap/idle timeouts while a
/// pipeline is running.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// One pipeline's outcome: its final counter snapshot plus identity, for
/// the supervisor's diagnosis and logging.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    /// Interface the pipeline ran on.
    pub interface: String,
    /// Matched or negation side.
    pub kind: FilterKind,
    /// Final counters observed by this pipeline.
    pub counts: CountSummary,
}

/// Runs one pipeline to completion: opens its capture source, reassembles
/// segments into exchanges, and drives them through the collector chain
/// until `stop_rx` fires, then drains in-flight state before returning.
pub async fn run_pipeline(
    spec: PipelineSpec,
    counts: PipelineCounts,
    mut stop_rx: broadcast::Receiver<()>,
) -> Result<PipelineReport> {
    let source = PacketSource::new(
        SourceConfig::for_device(spec.interface.clone()).with_filter(spec.filter),
    );
    let (mut segments, handle) = source.start(counts.clone())?;

    let mut reassembler = Reassembler::new(
        spec.interface.clone(),
        spec.gap_timeout,
        spec.idle_timeout,
        counts.clone(),
    );
    let mut pairer = ExchangePairer::new(spec.body_cap_bytes, spec.tags.clone(), counts.clone());
    let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = stop_rx.recv() => {
                debug!(interface = %spec.interface, kind = ?spec.kind, "pipeline received stop");
                handle.stop();
                break;
            }
            segment = segments.recv() => {
                match segment {
                    Some(segment) => {
                        let events = reassembler.ingest(segment);
                        dispatch_events(events, &mut pairer, &spec.chain).await;
                    }
                    None => {
                        debug!(interface = %spec.interface, "capture source closed its channel");
                        break;
                    }
                }
            }
            _ = sweep.tick() => {
                let events = reassembler.sweep_timeouts();
                dispatch_events(events, &mut pairer, &spec.chain).await;
            }
        }
    }

    drain(&mut segments, &mut reassembler, &mut pairer, &spec.chain).await;

    Ok(PipelineReport {
        interface: spec.interface,
        kind: spec.kind,
        counts: counts.snapshot(),
    })
}

async fn dispatch_events(
    events: Vec<ReassemblyEvent>,
    pairer: &mut ExchangePairer,
    chain: &SharedStage,
) {
    for event in events {
        match event {
            ReassemblyEvent::Payload { flow, direction, bytes } => {
                feed(pairer, chain, &flow, direction, &bytes).await;
            }
            ReassemblyEvent::Closed { flow } => {
                for exchange in pairer.close_flow(&flow) {
                    chain.process(exchange).await;
                }
            }
            ReassemblyEvent::Opened { .. }
            | ReassemblyEvent::TlsClassified { .. }
            | ReassemblyEvent::Gap(_) => {}
        }
    }
}

async fn feed(
    pairer: &mut ExchangePairer,
    chain: &SharedStage,
    flow: &FlowKey,
    direction: flowtap_types::flow::Direction,
    bytes: &[u8],
) {
    for exchange in pairer.feed(flow, direction, bytes) {
        chain.process(exchange).await;
    }
}

/// Drains whatever the capture thread had already queued before noticing
/// the stop flag, then force-closes every remaining flow so buffered
/// exchanges are not silently dropped (spec.md §5's drain contract).
async fn drain(
    segments: &mut tokio::sync::mpsc::Receiver<flowtap_capture::TcpSegment>,
    reassembler: &mut Reassembler,
    pairer: &mut ExchangePairer,
    chain: &SharedStage,
) {
    let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout_at(deadline, segments.recv()).await {
            Ok(Some(segment)) => {
                let events = reassembler.ingest(segment);
                dispatch_events(events, pairer, chain).await;
            }
            Ok(None) | Err(_) => break,
        }
    }

    let events = reassembler.drain();
    dispatch_events(events, pairer, chain).await;
}

/// Turns a capture-open failure into a [`SupervisorError`] without losing
/// which interface/side it happened on.
pub fn describe_failure(interface: &str, kind: FilterKind, error: &SupervisorError) {
    warn!(interface, kind = ?kind, %error, "pipeline failed to start");
}
