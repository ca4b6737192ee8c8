//! flowtap - passive HTTP exchange capture
//!
//! Parses the CLI surface into a [`flowtap_types::config::CaptureConfig`]
//! and hands the run off to [`flowtap_supervisor::run_supervisor`].

use clap::Parser;
use color_eyre::eyre::{eyre, Result};
use flowtap_types::config::{CaptureConfig, SinkConfig};
use flowtap_types::run_options::RunOptions;
use flowtap_types::tags::TraceTags;
use flowtap_supervisor::RunRequest;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod app;

use app::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let request = build_run_request(cli)?;
    let exit_code = flowtap_supervisor::run_supervisor(request).await?;
    std::process::exit(exit_code);
}

/// Initialize the logging/tracing system, in the style of the teacher's
/// own verbosity-to-filter mapping.
fn init_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        "error"
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };

    let filter_layer = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn build_run_request(cli: Cli) -> Result<RunRequest> {
    let sink = match (cli.output_dir, cli.ingest_url) {
        (Some(directory), Some(uri)) => SinkConfig::Tee { directory, uri },
        (Some(directory), None) => SinkConfig::LocalArchive { directory },
        (None, Some(uri)) => SinkConfig::RemoteIngest { uri },
        (None, None) => {
            return Err(eyre!(
                "at least one of --output-dir or --ingest-url is required"
            ))
        }
    };

    let tags = TraceTags::parse_cli_args(&cli.tags).map_err(|e| eyre!(e))?;

    let config = CaptureConfig {
        interfaces: cli.interfaces,
        bpf_filter: cli.bpf_filter,
        path_allow: cli.path_allow,
        host_allow: cli.host_allow,
        path_exclude: cli.path_exclude,
        host_exclude: cli.host_exclude,
        sample_rate: cli.sample_rate,
        witnesses_per_minute: cli.witnesses_per_minute,
        sink,
        tags,
        idle_timeout: Duration::from_secs(cli.idle_timeout_secs),
        gap_timeout: Duration::from_secs(cli.gap_timeout_secs),
        body_cap_bytes: cli.body_cap_bytes,
    };

    let options = RunOptions::new()
        .with_debug(cli.debug)
        .with_dogfood(cli.dogfood);

    let subcommand = if cli.subcommand.is_empty() {
        None
    } else {
        Some(cli.subcommand)
    };

    Ok(RunRequest {
        config,
        options,
        trace_name: cli.trace_name,
        subcommand,
        subcommand_user: cli.subcommand_user,
    })
}
