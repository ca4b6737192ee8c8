//! The composable collector chain: filtering, rate limiting/sampling, and
//! terminal sinks, wired together per spec.md §4.7's fixed stage order.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod filters;
pub mod rate;
pub mod sinks;
pub mod stage;

pub use error::{CollectorError, Result};
pub use rate::SharedRateLimiter;
pub use stage::{SharedStage, Stage};

use filters::{AllowFilter, ExcludeFilter, Field, PostFilterCount, PreFilterCount, SelfTrafficSuppressor};
use flowtap_types::config::{CaptureConfig, SinkConfig};
use flowtap_types::counts::PipelineCounts;
use rate::{RateLimiterStage, SamplerStage};
use sinks::{DiscardSink, LocalArchiveSink, RemoteIngestSink, TeeSink};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

fn compile_patterns(patterns: &[String]) -> Vec<regex::Regex> {
    patterns
        .iter()
        .filter_map(|p| match regex::Regex::new(p) {
            Ok(re) => Some(re),
            Err(error) => {
                tracing::warn!(pattern = p, %error, "dropping unparseable filter pattern");
                None
            }
        })
        .collect()
}

async fn build_terminal_sink(
    sink: &SinkConfig,
    interface: &str,
    counts: PipelineCounts,
    remote_client: Option<(&reqwest::Client, &str)>,
) -> Result<SharedStage> {
    match sink {
        SinkConfig::Discard => Ok(Arc::new(DiscardSink::new(counts))),
        SinkConfig::LocalArchive { directory } => {
            Ok(Arc::new(LocalArchiveSink::open(directory, interface, counts)?))
        }
        SinkConfig::RemoteIngest { uri } => {
            let (client, trace_id) = remote_client.ok_or_else(|| {
                CollectorError::RemoteIngest("no resolved trace id for remote sink".to_string())
            })?;
            Ok(Arc::new(RemoteIngestSink::new(
                client.clone(),
                uri,
                trace_id.to_string(),
                counts,
            )))
        }
        SinkConfig::Tee { directory, uri } => {
            let (client, trace_id) = remote_client.ok_or_else(|| {
                CollectorError::RemoteIngest("no resolved trace id for tee sink".to_string())
            })?;
            let local = LocalArchiveSink::open(directory, interface, counts.clone())?;
            let remote = RemoteIngestSink::new(client.clone(), uri, trace_id.to_string(), counts);
            Ok(Arc::new(TeeSink::new(Arc::new(local), Arc::new(remote))))
        }
    }
}

/// Builds one pipeline's collector chain, from the front (pre-filter count)
/// to the terminal sink, in the exact stage order spec.md §4.7 mandates:
/// pre-filter count, self-traffic suppression, path/host allow, path/host
/// exclude, rate limit or sample, post-filter count, terminal sink.
///
/// `shared_rate_limiter` should be the same instance across every pipeline
/// in a run when `config.witnesses_per_minute` is set, so the ceiling is
/// process-wide rather than per-interface. `remote_client` carries an
/// already-resolved `(reqwest::Client, trace_id)` pair, built once by the
/// caller before any pipeline starts, for configs whose sink talks to a
/// remote ingest endpoint.
pub async fn build_pipeline(
    config: &CaptureConfig,
    interface: &str,
    self_traffic_addr: Option<IpAddr>,
    dogfood: bool,
    counts: PipelineCounts,
    shared_rate_limiter: Option<SharedRateLimiter>,
    remote_client: Option<(&reqwest::Client, &str)>,
) -> Result<SharedStage> {
    let sink = build_terminal_sink(&config.sink, interface, counts.clone(), remote_client).await?;

    let mut chain: SharedStage = Arc::new(PostFilterCount::new(counts.clone(), sink));
    chain = Arc::new(wrap_rate_or_sample(config, counts.clone(), shared_rate_limiter, chain));
    chain = Arc::new(ExcludeFilter::new(
        Field::Host,
        compile_patterns(&config.host_exclude),
        chain,
    ));
    chain = Arc::new(ExcludeFilter::new(
        Field::Path,
        compile_patterns(&config.path_exclude),
        chain,
    ));
    chain = Arc::new(AllowFilter::new(
        Field::Host,
        compile_patterns(&config.host_allow),
        chain,
    ));
    chain = Arc::new(AllowFilter::new(
        Field::Path,
        compile_patterns(&config.path_allow),
        chain,
    ));
    if let (Some(ingest_addr), false) = (self_traffic_addr, dogfood) {
        chain = Arc::new(SelfTrafficSuppressor::new(ingest_addr, chain));
    }
    chain = Arc::new(PreFilterCount::new(counts, chain));

    Ok(chain)
}

fn wrap_rate_or_sample(
    config: &CaptureConfig,
    counts: PipelineCounts,
    shared_rate_limiter: Option<SharedRateLimiter>,
    next: SharedStage,
) -> dyn_stage::DynStage {
    if let Some(per_minute) = config.witnesses_per_minute {
        let limiter =
            shared_rate_limiter.unwrap_or_else(|| RateLimiterStage::build_limiter(per_minute));
        dyn_stage::DynStage::RateLimited(RateLimiterStage::with_limiter(limiter, counts, next))
    } else if let Some(rate) = config.sample_rate {
        dyn_stage::DynStage::Sampled(SamplerStage::new(rate, counts, next))
    } else {
        dyn_stage::DynStage::Passthrough(next)
    }
}

mod dyn_stage {
    use super::{RateLimiterStage, SamplerStage, SharedStage};
    use crate::stage::Stage;
    use async_trait::async_trait;
    use flowtap_types::exchange::Exchange;

    /// Picks between a rate limiter, a sampler, or neither, without forcing
    /// every stage to be independently boxed twice.
    pub enum DynStage {
        RateLimited(RateLimiterStage),
        Sampled(SamplerStage),
        Passthrough(SharedStage),
    }

    #[async_trait]
    impl Stage for DynStage {
        async fn process(&self, exchange: Exchange) -> Option<Exchange> {
            match self {
                Self::RateLimited(stage) => stage.process(exchange).await,
                Self::Sampled(stage) => stage.process(exchange).await,
                Self::Passthrough(stage) => stage.process(exchange).await,
            }
        }
    }
}

/// Resolves or creates a remote trace once, for runs whose sink (directly
/// or as part of a tee) talks to a remote ingest endpoint. Returns `None`
/// if no sink in the run needs it.
pub async fn resolve_shared_trace(
    sink: &SinkConfig,
    trace_name: &str,
) -> Result<Option<(reqwest::Client, String)>> {
    let uri = match sink {
        SinkConfig::RemoteIngest { uri } | SinkConfig::Tee { uri, .. } => uri,
        _ => return Ok(None),
    };
    let client = reqwest::Client::new();
    let trace_id = sinks::remote::resolve_or_create_trace(&client, uri, trace_name).await?;
    Ok(Some((client, trace_id)))
}

/// Probes `directory` for existence and writability, creating it if
/// absent. Shared by the supervisor's pre-flight validation so the error
/// surfaces before any capture thread spins up, not on the first write.
pub fn validate_output_directory(directory: &Path) -> Result<()> {
    std::fs::create_dir_all(directory).map_err(|e| CollectorError::LocalArchive {
        path: directory.to_path_buf(),
        message: e.to_string(),
    })?;
    let sentinel = directory.join(".flowtap-write-probe");
    std::fs::write(&sentinel, b"").map_err(|e| CollectorError::LocalArchive {
        path: directory.to_path_buf(),
        message: e.to_string(),
    })?;
    let _ = std::fs::remove_file(&sentinel);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowtap_types::tags::TraceTags;
    use std::time::Duration;

    fn config(sink: SinkConfig) -> CaptureConfig {
        CaptureConfig {
            interfaces: vec![],
            bpf_filter: None,
            path_allow: vec![],
            host_allow: vec![],
            path_exclude: vec![],
            host_exclude: vec![],
            sample_rate: None,
            witnesses_per_minute: None,
            sink,
            tags: TraceTags::new(),
            idle_timeout: Duration::from_secs(300),
            gap_timeout: Duration::from_secs(2),
            body_cap_bytes: 1024 * 1024,
        }
    }

    #[tokio::test]
    async fn discard_sink_pipeline_builds_and_accepts() {
        let cfg = config(SinkConfig::Discard);
        let counts = PipelineCounts::new();
        let chain = build_pipeline(&cfg, "eth0", None, false, counts.clone(), None, None)
            .await
            .unwrap();

        let (flow, _) = flowtap_types::flow::FlowKey::from_endpoints(
            "eth0",
            "10.0.0.1".parse().unwrap(),
            54321,
            "10.0.0.2".parse().unwrap(),
            80,
        );
        let exchange = flowtap_types::exchange::Exchange {
            flow,
            request: flowtap_types::exchange::HttpMessage {
                start_line: "GET /api/x HTTP/1.1".to_string(),
                headers: vec![],
                body: vec![],
                body_truncated: false,
                observed_at: chrono::Utc::now(),
            },
            response: None,
            tags: TraceTags::new(),
            metadata: std::collections::BTreeMap::new(),
        };

        assert!(chain.process(exchange).await.is_none());
        let snapshot = counts.snapshot();
        assert_eq!(snapshot.exchanges_pre_filter, 1);
        assert_eq!(snapshot.exchanges_post_filter, 1);
        assert_eq!(snapshot.exchanges_sunk, 1);
    }

    #[tokio::test]
    async fn local_archive_sink_pipeline_writes_to_directory() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(SinkConfig::LocalArchive {
            directory: dir.path().to_path_buf(),
        });
        let counts = PipelineCounts::new();
        let chain = build_pipeline(&cfg, "eth0", None, false, counts, None, None)
            .await
            .unwrap();

        let (flow, _) = flowtap_types::flow::FlowKey::from_endpoints(
            "eth0",
            "10.0.0.1".parse().unwrap(),
            54321,
            "10.0.0.2".parse().unwrap(),
            80,
        );
        let exchange = flowtap_types::exchange::Exchange {
            flow,
            request: flowtap_types::exchange::HttpMessage {
                start_line: "GET / HTTP/1.1".to_string(),
                headers: vec![],
                body: vec![],
                body_truncated: false,
                observed_at: chrono::Utc::now(),
            },
            response: None,
            tags: TraceTags::new(),
            metadata: std::collections::BTreeMap::new(),
        };
        chain.process(exchange).await;
        assert!(dir.path().join("eth0.har.jsonl").exists());
    }
}
