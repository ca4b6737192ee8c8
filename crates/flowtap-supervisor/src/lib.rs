//! Run supervisor: assembles one pipeline per (interface, filter-state),
//! drives the run to completion under either a signal-driven or
//! subprocess-bounded lifetime, and produces the final shutdown diagnosis.
//!
//! This is the crate every other flowtap crate exists to serve: it is the
//! only place that owns the fan-out across interfaces, the shared rate
//! limiter, and the stop/drain protocol described in spec.md §5.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod diagnosis;
pub mod error;
mod pipeline;
mod subprocess;

pub use diagnosis::Diagnosis;
pub use error::{Result, SupervisorError};
pub use subprocess::{running_as_root, SUBPROCESS_DELIMITER};

use flowtap_capture::{CaptureFilter, SelfTraffic};
use flowtap_collector::rate::RateLimiterStage;
use flowtap_collector::sinks::DiscardSink;
use flowtap_types::config::{CaptureConfig, SinkConfig};
use flowtap_types::counts::{CountSummary, PipelineCounts};
use flowtap_types::run_options::RunOptions;
use pipeline::{run_pipeline, FilterKind, PipelineReport, PipelineSpec};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

/// Delay before launching the bounded subprocess, so capture is live
/// before the subcommand can generate any traffic (spec.md §4.9).
const WARMUP_DELAY: Duration = Duration::from_secs(5);

/// Delay after a stop signal (or subprocess exit) before broadcasting stop
/// to every pipeline, to let in-flight packets arrive (spec.md §4.9).
const GRACE_DELAY: Duration = Duration::from_secs(5);

/// Depth of the stop-signal broadcast channel. Must stay small and
/// nonzero so delivery never blocks the signal handler (spec.md §6).
const STOP_CHANNEL_DEPTH: usize = 4;

/// Everything needed to start one run: the sanitized capture configuration
/// plus the run-lifetime choices the CLI layer collects but that
/// `CaptureConfig` itself has no business knowing about.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Capture configuration, as assembled by the CLI. Sanitized again
    /// here even if the caller already did so, since this is the last
    /// point before any pipeline starts.
    pub config: CaptureConfig,
    /// Debug/dogfood flags for this run.
    pub options: RunOptions,
    /// Name used to resolve or create a trace when the configured sink
    /// talks to a remote ingest endpoint. Ignored for local-only sinks.
    pub trace_name: String,
    /// When set, the run's lifetime is bounded by this subcommand instead
    /// of waiting for SIGINT/SIGTERM. First element is the program, the
    /// rest its arguments.
    pub subcommand: Option<Vec<String>>,
    /// User to run the subcommand as, via `sudo -u`, if different from
    /// the supervisor's own user.
    pub subcommand_user: Option<String>,
}

/// Assembles and runs every pipeline for `request` to completion, returning
/// the process exit code spec.md §6 describes: 0 on success with at least
/// one exchange observed, non-zero on a fatal configuration/capture error,
/// a propagated subprocess exit code, or a "trace empty" diagnosis.
///
/// # Errors
///
/// Returns a fatal [`SupervisorError`] for configuration problems, a
/// capture-open failure with no pipelines able to start, or trace
/// resolution failure for a remote sink. Per-pipeline errors after at
/// least one pipeline is running are logged and folded into the exit
/// code rather than returned directly, so a run is never reported wholly
/// successful if any pipeline failed, per the "first error wins" policy
/// of spec.md §5.
pub async fn run_supervisor(request: RunRequest) -> Result<i32> {
    let config = request.config.sanitize()?;

    let interfaces = flowtap_capture::enumerate(&config.interfaces)?;
    info!(interfaces = ?interfaces.keys().collect::<Vec<_>>(), "resolved capture interfaces");

    validate_sink_destination(&config.sink)?;

    let remote = flowtap_collector::resolve_shared_trace(&config.sink, &request.trace_name)
        .await
        .map_err(|e| SupervisorError::TraceResolution(e.to_string()))?;

    let self_traffic = if request.options.dogfood {
        None
    } else {
        match remote_uri(&config.sink) {
            Some(uri) => resolve_self_traffic(uri).await.map(|ingest_addr| SelfTraffic { ingest_addr }),
            None => None,
        }
    };

    let compiled = flowtap_capture::compile(
        &interfaces,
        config.bpf_filter.as_deref().unwrap_or(""),
        self_traffic,
        request.options.debug,
    )?;

    let shared_rate_limiter = config.witnesses_per_minute.map(RateLimiterStage::build_limiter);
    let tags = config.tags.clone().with_environment_defaults();

    let (stop_tx, _) = broadcast::channel::<()>(STOP_CHANNEL_DEPTH);
    let (error_tx, mut error_rx) = mpsc::channel::<String>(interfaces.len().max(1) * 2);

    let mut handles = Vec::new();

    for (name, _descriptor) in &interfaces {
        let matched_filter = compiled
            .user
            .get(name)
            .cloned()
            .unwrap_or_else(CaptureFilter::all);
        let counts = PipelineCounts::new();
        let chain = flowtap_collector::build_pipeline(
            &config,
            name,
            self_traffic.map(|st| st.ingest_addr),
            request.options.dogfood,
            counts.clone(),
            shared_rate_limiter.clone(),
            remote.as_ref().map(|(client, trace_id)| (client, trace_id.as_str())),
        )
        .await
        .map_err(SupervisorError::from)?;

        let spec = PipelineSpec {
            interface: name.clone(),
            kind: FilterKind::Matched,
            filter: matched_filter,
            idle_timeout: config.idle_timeout,
            gap_timeout: config.gap_timeout,
            body_cap_bytes: config.body_cap_bytes,
            tags: tags.clone(),
            chain,
        };
        handles.push(spawn_pipeline(spec, counts, stop_tx.subscribe(), error_tx.clone()));

        if let Some(negation_filters) = &compiled.negation {
            let negation_filter = negation_filters
                .get(name)
                .cloned()
                .unwrap_or_else(CaptureFilter::all);
            let negation_counts = PipelineCounts::new();
            let negation_chain: flowtap_collector::SharedStage =
                Arc::new(DiscardSink::new(negation_counts.clone()));
            let negation_spec = PipelineSpec {
                interface: name.clone(),
                kind: FilterKind::Negation,
                filter: negation_filter,
                idle_timeout: config.idle_timeout,
                gap_timeout: config.gap_timeout,
                body_cap_bytes: config.body_cap_bytes,
                tags: tags.clone(),
                chain: negation_chain,
            };
            handles.push(spawn_pipeline(
                negation_spec,
                negation_counts,
                stop_tx.subscribe(),
                error_tx.clone(),
            ));
        }
    }
    drop(error_tx);

    let subprocess_outcome = run_lifetime(&request).await;

    tokio::time::sleep(GRACE_DELAY).await;
    let _ = stop_tx.send(());

    let mut reports = Vec::new();
    for handle in handles {
        match handle.await {
            Ok(Ok(report)) => reports.push(report),
            Ok(Err(error)) => warn!(%error, "pipeline exited with an error"),
            Err(join_error) => warn!(%join_error, "pipeline task panicked"),
        }
    }

    let mut first_pipeline_error = None;
    while let Ok(message) = error_rx.try_recv() {
        if first_pipeline_error.is_none() {
            first_pipeline_error = Some(message);
        }
    }

    let matched_summary = merge_summaries(
        reports
            .iter()
            .filter(|r| r.kind == FilterKind::Matched)
            .map(|r| r.counts),
    );
    let negation_summary = compiled.negation.as_ref().map(|_| {
        merge_summaries(
            reports
                .iter()
                .filter(|r| r.kind == FilterKind::Negation)
                .map(|r| r.counts),
        )
    });

    log_recoverable_counters(&matched_summary);

    let diagnosis = Diagnosis::evaluate(&matched_summary, negation_summary.as_ref());
    diagnosis.log();

    if let Err(subprocess_error) = subprocess_outcome {
        warn!(error = %subprocess_error, "subcommand did not exit cleanly");
        return match subprocess_error {
            SupervisorError::SubprocessFailed(code) => Ok(code),
            other => Err(other),
        };
    }

    if let Some(message) = first_pipeline_error {
        warn!(error = %message, "a pipeline reported an error");
        return Ok(1);
    }

    Ok(i32::from(diagnosis.is_trace_empty()))
}

fn spawn_pipeline(
    spec: PipelineSpec,
    counts: PipelineCounts,
    stop_rx: broadcast::Receiver<()>,
    error_tx: mpsc::Sender<String>,
) -> tokio::task::JoinHandle<Result<PipelineReport>> {
    tokio::spawn(async move {
        let result = run_pipeline(spec, counts, stop_rx).await;
        if let Err(error) = &result {
            let _ = error_tx.send(error.to_string()).await;
        }
        result
    })
}

/// Runs the configured lifetime: either the bounded subcommand (with its
/// warm-up delay) or a wait for SIGINT/SIGTERM.
async fn run_lifetime(request: &RunRequest) -> Result<()> {
    match &request.subcommand {
        Some(argv) => {
            tokio::time::sleep(WARMUP_DELAY).await;
            subprocess::run_to_completion(argv, request.subcommand_user.as_deref()).await
        }
        None => {
            wait_for_stop_signal().await;
            Ok(())
        }
    }
}

#[cfg(unix)]
async fn wait_for_stop_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(error) => {
            warn!(%error, "failed to install SIGTERM handler, falling back to ctrl_c");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(error) => {
            warn!(%error, "failed to install SIGINT handler, falling back to ctrl_c");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }
}

#[cfg(not(unix))]
async fn wait_for_stop_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("received interrupt");
}

fn validate_sink_destination(sink: &SinkConfig) -> Result<()> {
    match sink {
        SinkConfig::LocalArchive { directory } | SinkConfig::Tee { directory, .. } => {
            flowtap_collector::validate_output_directory(directory).map_err(SupervisorError::from)
        }
        SinkConfig::RemoteIngest { .. } | SinkConfig::Discard => Ok(()),
    }
}

fn remote_uri(sink: &SinkConfig) -> Option<&str> {
    match sink {
        SinkConfig::RemoteIngest { uri } | SinkConfig::Tee { uri, .. } => Some(uri.as_str()),
        SinkConfig::LocalArchive { .. } | SinkConfig::Discard => None,
    }
}

/// Resolves the ingest endpoint's host to an address, so the self-traffic
/// exclusion clause (spec.md §4.2) can be built before any filter is
/// compiled. Best-effort: a resolution failure just means self-traffic
/// suppression is skipped, not that the run fails.
async fn resolve_self_traffic(uri: &str) -> Option<IpAddr> {
    let parsed = reqwest::Url::parse(uri).ok()?;
    let host = parsed.host_str()?;
    let port = parsed.port_or_known_default().unwrap_or(443);
    match tokio::net::lookup_host((host, port)).await {
        Ok(mut addrs) => addrs.next().map(|addr| addr.ip()),
        Err(error) => {
            warn!(%error, uri, "failed to resolve ingest endpoint, skipping self-traffic suppression");
            None
        }
    }
}

fn log_recoverable_counters(summary: &CountSummary) {
    if summary.nil_assembler_context > 0
        || summary.bad_assembler_context_type > 0
        || summary.nil_assembler_context_after_parse > 0
    {
        warn!(
            nil_assembler_context = summary.nil_assembler_context,
            bad_assembler_context_type = summary.bad_assembler_context_type,
            nil_assembler_context_after_parse = summary.nil_assembler_context_after_parse,
            "recoverable reassembly faults occurred during the run"
        );
    }
}

fn merge_summaries(summaries: impl Iterator<Item = CountSummary>) -> CountSummary {
    let mut merged = CountSummary::default();
    for s in summaries {
        merged.packets_captured += s.packets_captured;
        merged.packets_dropped_by_kernel += s.packets_dropped_by_kernel;
        merged.bytes_captured += s.bytes_captured;
        merged.reassembly_gaps += s.reassembly_gaps;
        merged.parse_errors += s.parse_errors;
        merged.exchanges_pre_filter += s.exchanges_pre_filter;
        merged.exchanges_post_filter += s.exchanges_post_filter;
        merged.exchanges_rate_limited += s.exchanges_rate_limited;
        merged.exchanges_sampled_out += s.exchanges_sampled_out;
        merged.exchanges_sunk += s.exchanges_sunk;
        merged.exchanges_sink_failed += s.exchanges_sink_failed;
        merged.nil_assembler_context += s.nil_assembler_context;
        merged.bad_assembler_context_type += s.bad_assembler_context_type;
        merged.nil_assembler_context_after_parse += s.nil_assembler_context_after_parse;
        merged.unmatched_requests += s.unmatched_requests;
        merged.unmatched_responses += s.unmatched_responses;
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(packets: u64) -> CountSummary {
        CountSummary {
            packets_captured: packets,
            ..CountSummary::default()
        }
    }

    #[test]
    fn merge_sums_every_field() {
        let merged = merge_summaries(vec![summary(3), summary(4)].into_iter());
        assert_eq!(merged.packets_captured, 7);
    }

    #[test]
    fn merge_of_empty_iterator_is_default() {
        let merged = merge_summaries(std::iter::empty());
        assert_eq!(merged.packets_captured, 0);
    }

    #[test]
    fn validate_sink_destination_skips_remote_and_discard() {
        assert!(validate_sink_destination(&SinkConfig::Discard).is_ok());
        assert!(validate_sink_destination(&SinkConfig::RemoteIngest {
            uri: "https://ingest.example.com".to_string()
        })
        .is_ok());
    }

    #[test]
    fn validate_sink_destination_creates_local_archive_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        let sink = SinkConfig::LocalArchive {
            directory: nested.clone(),
        };
        assert!(validate_sink_destination(&sink).is_ok());
        assert!(nested.is_dir());
    }

    #[test]
    fn remote_uri_extracts_from_remote_and_tee_only() {
        assert_eq!(remote_uri(&SinkConfig::Discard), None);
        assert_eq!(
            remote_uri(&SinkConfig::RemoteIngest {
                uri: "https://x".to_string()
            }),
            Some("https://x")
        );
        assert_eq!(
            remote_uri(&SinkConfig::Tee {
                directory: "/tmp".into(),
                uri: "https://y".to_string()
            }),
            Some("https://y")
        );
    }
}
